//! Payloads flowing through the engine.
//!
//! Every component pattern-matches on [`Content`] instead of probing
//! loosely-typed maps for fields.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A unit of input or output content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Content {
    /// Plain text
    Text { text: String },

    /// Named fields with JSON values
    Structured {
        fields: BTreeMap<String, serde_json::Value>,
    },

    /// Opaque bytes (viewed as lossy UTF-8 for scoring)
    Binary { bytes: Vec<u8> },
}

impl Content {
    /// Create text content
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Create structured content from field pairs
    pub fn structured<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, serde_json::Value)>,
        K: Into<String>,
    {
        Self::Structured {
            fields: fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Flattened text view used for scoring and matching.
    ///
    /// Structured fields render as `key: value` lines in key order.
    pub fn as_text(&self) -> String {
        match self {
            Self::Text { text } => text.clone(),
            Self::Structured { fields } => fields
                .iter()
                .map(|(k, v)| match v {
                    serde_json::Value::String(s) => format!("{}: {}", k, s),
                    other => format!("{}: {}", k, other),
                })
                .collect::<Vec<_>>()
                .join("\n"),
            Self::Binary { bytes } => String::from_utf8_lossy(bytes).into_owned(),
        }
    }

    /// Lowercase alphanumeric words, in order of appearance
    pub fn tokens(&self) -> Vec<String> {
        tokenize(&self.as_text())
    }

    pub fn word_count(&self) -> usize {
        self.tokens().len()
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Text { text } => text.len(),
            Self::Structured { .. } => self.as_text().len(),
            Self::Binary { bytes } => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Short checksum of the canonical text (first 16 hex chars of SHA-256)
    pub fn checksum(&self) -> String {
        hash_text(&self.as_text())
    }

    /// Lossy summary: the first `max_words` words, marked when truncated.
    pub fn summarize(&self, max_words: usize) -> Content {
        let text = self.as_text();
        let words: Vec<&str> = text.split_whitespace().collect();
        if words.len() <= max_words {
            return Content::text(words.join(" "));
        }
        Content::text(format!("{} …", words[..max_words].join(" ")))
    }

    /// Apply a text transform to every text-bearing part.
    ///
    /// Structured string values are transformed in place; binary content is
    /// converted to text first.
    pub fn map_text<F>(&self, f: F) -> Content
    where
        F: Fn(&str) -> String,
    {
        match self {
            Self::Text { text } => Content::text(f(text)),
            Self::Structured { fields } => Self::Structured {
                fields: fields
                    .iter()
                    .map(|(k, v)| {
                        let v = match v {
                            serde_json::Value::String(s) => serde_json::Value::String(f(s)),
                            other => other.clone(),
                        };
                        (k.clone(), v)
                    })
                    .collect(),
            },
            Self::Binary { .. } => Content::text(f(&self.as_text())),
        }
    }
}

impl Default for Content {
    fn default() -> Self {
        Self::text("")
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Content::text(text)
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Content::text(text)
    }
}

/// Split text into lowercase alphanumeric tokens
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

/// Hash text content (first 16 hex chars of SHA-256)
pub fn hash_text(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    hex::encode(&digest[..8])
}
