//! Frequency-tagged vectors.

use std::f64::consts::TAU;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::Content;

/// Half-width of the frequency offset a vector may take around the base
const FREQUENCY_SPREAD: f64 = 5.0;

/// Internal representation of a harmonized input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalVector {
    /// Checksum of the source content
    pub checksum: String,

    /// Carrier frequency (base frequency ± spread)
    pub frequency: f64,

    /// Phase in radians, within [0, 2π)
    pub phase: f64,

    /// L2-normalised amplitudes, one per dimension
    pub amplitudes: Vec<f64>,
}

impl SignalVector {
    /// Deterministic transform of `content` seeded by `base_frequency`.
    pub fn harmonize(content: &Content, base_frequency: f64, dimensions: usize) -> Self {
        let checksum = content.checksum();
        let digest = Sha256::digest(checksum.as_bytes());

        let offset = (digest[0] as f64 / 255.0 - 0.5) * 2.0 * FREQUENCY_SPREAD;
        let frequency = base_frequency + offset;

        let phase = phase_of(&digest);

        let dimensions = dimensions.max(1);
        let mut amplitudes = vec![0.0; dimensions];
        for (position, token) in content.tokens().iter().enumerate() {
            let token_digest = Sha256::digest(token.as_bytes());
            let bucket = token_digest[0] as usize % dimensions;
            let angle = base_frequency * (bucket as f64 + 1.0) + position as f64;
            amplitudes[bucket] += 1.0 + 0.5 * angle.sin();
        }

        let norm = amplitudes.iter().map(|a| a * a).sum::<f64>().sqrt();
        if norm > 0.0 {
            for a in &mut amplitudes {
                *a /= norm;
            }
        }

        Self {
            checksum,
            frequency,
            phase,
            amplitudes,
        }
    }

    /// Cosine similarity of the amplitude profiles
    pub fn similarity(&self, other: &SignalVector) -> f64 {
        if self.amplitudes.len() != other.amplitudes.len() {
            return 0.0;
        }
        self.amplitudes
            .iter()
            .zip(&other.amplitudes)
            .map(|(a, b)| a * b)
            .sum()
    }
}

/// Deterministic phase in [0, 2π) for an arbitrary seed, such as a peer id
pub fn seeded_phase(seed: &str) -> f64 {
    phase_of(&Sha256::digest(seed.as_bytes()))
}

fn phase_of(digest: &[u8]) -> f64 {
    u16::from_be_bytes([digest[1], digest[2]]) as f64 / 65536.0 * TAU
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_harmonize_is_deterministic() {
        let content = Content::text("the quick brown fox");
        let a = SignalVector::harmonize(&content, 432.0, 8);
        let b = SignalVector::harmonize(&content, 432.0, 8);
        assert_eq!(a, b);
    }

    #[test]
    fn test_frequency_stays_near_base() {
        for text in ["a", "bb", "ccc", "hello world", "another input entirely"] {
            let v = SignalVector::harmonize(&Content::text(text), 432.0, 8);
            assert!((v.frequency - 432.0).abs() <= FREQUENCY_SPREAD);
            assert!(v.phase >= 0.0 && v.phase < TAU);
        }
    }

    #[test]
    fn test_amplitudes_are_normalised() {
        let v = SignalVector::harmonize(&Content::text("one two three four"), 432.0, 8);
        let norm: f64 = v.amplitudes.iter().map(|a| a * a).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-9);
        assert!((v.similarity(&v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_content_has_zero_amplitudes() {
        let v = SignalVector::harmonize(&Content::text(""), 432.0, 4);
        assert_eq!(v.amplitudes, vec![0.0; 4]);
    }

    #[test]
    fn test_base_frequency_seeds_transform() {
        let content = Content::text("same words here");
        let a = SignalVector::harmonize(&content, 432.0, 8);
        let b = SignalVector::harmonize(&content, 440.0, 8);
        assert!((b.frequency - a.frequency - 8.0).abs() < 1e-9);
    }
}
