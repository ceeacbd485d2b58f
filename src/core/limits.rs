//! Execution limits and enforcement.
//!
//! Prevents runaway executions through configurable limits on:
//! - Number of steps
//! - Input/output sizes
//! - Step and execution timeouts

use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::Content;

/// Limits applied to every workflow execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLimits {
    /// Maximum number of steps per execution (default: 50)
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Maximum input size in bytes (default: 1MB)
    #[serde(default = "default_max_input_bytes")]
    pub max_input_bytes: u64,

    /// Maximum size of any step output in bytes (default: 1MB)
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: u64,

    /// Per-step timeout in milliseconds (default: 10s)
    #[serde(default = "default_step_timeout")]
    pub step_timeout_ms: u64,

    /// Total execution timeout in milliseconds (default: 60s)
    #[serde(default = "default_run_timeout")]
    pub run_timeout_ms: u64,
}

fn default_max_steps() -> u32 {
    50
}
fn default_max_input_bytes() -> u64 {
    1024 * 1024
}
fn default_max_output_bytes() -> u64 {
    1024 * 1024
}
fn default_step_timeout() -> u64 {
    10_000
}
fn default_run_timeout() -> u64 {
    60_000
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_input_bytes: default_max_input_bytes(),
            max_output_bytes: default_max_output_bytes(),
            step_timeout_ms: default_step_timeout(),
            run_timeout_ms: default_run_timeout(),
        }
    }
}

impl ExecutionLimits {
    /// Validate input against size limits
    pub fn validate_input(&self, input: &Content) -> Result<(), LimitViolation> {
        let size = input.len() as u64;
        if size > self.max_input_bytes {
            return Err(LimitViolation::MaxInputBytes {
                actual: size,
                limit: self.max_input_bytes,
            });
        }
        Ok(())
    }

    /// Validate a step output against size limits
    pub fn validate_output(&self, output: &Content) -> Result<(), LimitViolation> {
        let size = output.len() as u64;
        if size > self.max_output_bytes {
            return Err(LimitViolation::MaxOutputBytes {
                actual: size,
                limit: self.max_output_bytes,
            });
        }
        Ok(())
    }

    /// Check current tracker state against limits
    pub fn check(&self, tracker: &ExecutionTracker) -> Result<(), LimitViolation> {
        if tracker.steps_executed >= self.max_steps {
            return Err(LimitViolation::MaxSteps {
                actual: tracker.steps_executed,
                limit: self.max_steps,
            });
        }

        let elapsed = tracker.elapsed_ms();
        if elapsed >= self.run_timeout_ms {
            return Err(LimitViolation::RunTimeout {
                elapsed_ms: elapsed,
                limit_ms: self.run_timeout_ms,
            });
        }

        Ok(())
    }
}

/// Tracks resource usage during an execution
#[derive(Debug, Clone)]
pub struct ExecutionTracker {
    pub steps_executed: u32,

    /// Total input bytes consumed by steps
    pub input_bytes: u64,

    /// Total output bytes produced by steps
    pub output_bytes: u64,

    pub started_at: Instant,
}

impl Default for ExecutionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionTracker {
    pub fn new() -> Self {
        Self {
            steps_executed: 0,
            input_bytes: 0,
            output_bytes: 0,
            started_at: Instant::now(),
        }
    }

    /// Record a step execution
    pub fn record_step(&mut self, input_bytes: u64, output_bytes: u64) {
        self.steps_executed += 1;
        self.input_bytes += input_bytes;
        self.output_bytes += output_bytes;
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }
}

/// Limit violations; each one halts the execution
#[derive(Debug, Clone, Error)]
pub enum LimitViolation {
    #[error("Maximum steps exceeded: {actual} >= {limit}")]
    MaxSteps { actual: u32, limit: u32 },

    #[error("Maximum input bytes exceeded: {actual} > {limit}")]
    MaxInputBytes { actual: u64, limit: u64 },

    #[error("Maximum output bytes exceeded: {actual} > {limit}")]
    MaxOutputBytes { actual: u64, limit: u64 },

    #[error("Execution timeout: {elapsed_ms}ms >= {limit_ms}ms")]
    RunTimeout { elapsed_ms: u64, limit_ms: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = ExecutionLimits::default();
        assert_eq!(limits.max_steps, 50);
        assert_eq!(limits.max_input_bytes, 1024 * 1024);
        assert_eq!(limits.step_timeout_ms, 10_000);
        assert_eq!(limits.run_timeout_ms, 60_000);
    }

    #[test]
    fn test_input_validation() {
        let limits = ExecutionLimits {
            max_input_bytes: 10,
            ..Default::default()
        };

        assert!(limits.validate_input(&Content::text("short")).is_ok());
        assert!(matches!(
            limits.validate_input(&Content::text("this is far too long")),
            Err(LimitViolation::MaxInputBytes { limit: 10, .. })
        ));
    }

    #[test]
    fn test_step_limit() {
        let limits = ExecutionLimits {
            max_steps: 2,
            ..Default::default()
        };
        let mut tracker = ExecutionTracker::new();

        assert!(limits.check(&tracker).is_ok());
        tracker.record_step(10, 20);
        assert!(limits.check(&tracker).is_ok());
        tracker.record_step(10, 20);
        assert!(matches!(
            limits.check(&tracker),
            Err(LimitViolation::MaxSteps { actual: 2, limit: 2 })
        ));
        assert_eq!(tracker.output_bytes, 40);
    }

    #[test]
    fn test_run_timeout() {
        let limits = ExecutionLimits {
            run_timeout_ms: 0,
            ..Default::default()
        };
        let tracker = ExecutionTracker::new();
        assert!(matches!(
            limits.check(&tracker),
            Err(LimitViolation::RunTimeout { .. })
        ));
    }
}
