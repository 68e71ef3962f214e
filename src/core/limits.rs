//! Execution limits for scenario and suite runs.
//!
//! Prevents runaway execution through configurable limits on:
//! - Number of steps executed per run
//! - Size of a step's outcome payload
//! - Per-step execution time
//! - Total suite run time (declared per suite)

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Limits applied while executing runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLimits {
    /// Per-step timeout in seconds, unless the step declares its own (default: 300)
    #[serde(default = "default_step_timeout")]
    pub step_timeout_seconds: u64,

    /// Maximum number of steps executed per run (default: 50)
    #[serde(default = "default_max_steps")]
    pub max_steps_per_run: usize,

    /// Maximum serialized outcome payload in bytes (default: 1MB)
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
}

fn default_step_timeout() -> u64 {
    300
} // 5 min
fn default_max_steps() -> usize {
    50
}
fn default_max_payload_bytes() -> usize {
    1024 * 1024
} // 1MB

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            step_timeout_seconds: default_step_timeout(),
            max_steps_per_run: default_max_steps(),
            max_payload_bytes: default_max_payload_bytes(),
        }
    }
}

impl ExecutionLimits {
    /// Check that one more step may execute
    pub fn check_steps(&self, steps_executed: usize) -> Result<(), LimitViolation> {
        if steps_executed >= self.max_steps_per_run {
            return Err(LimitViolation::MaxSteps {
                actual: steps_executed,
                limit: self.max_steps_per_run,
            });
        }
        Ok(())
    }

    /// Validate an outcome payload against the size limit
    pub fn check_payload(&self, payload: &serde_json::Value) -> Result<(), LimitViolation> {
        let size = serde_json::to_vec(payload).map(|b| b.len()).unwrap_or(0);
        if size > self.max_payload_bytes {
            return Err(LimitViolation::MaxPayloadBytes {
                actual: size,
                limit: self.max_payload_bytes,
            });
        }
        Ok(())
    }

    pub fn default_step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_seconds)
    }
}

/// Check a suite run's age against its declared timeout
pub fn check_suite_timeout(
    started_at: DateTime<Utc>,
    timeout_seconds: Option<u64>,
    now: DateTime<Utc>,
) -> Result<(), LimitViolation> {
    let Some(limit_seconds) = timeout_seconds else {
        return Ok(());
    };
    let elapsed_seconds = (now - started_at).num_seconds().max(0) as u64;
    if elapsed_seconds >= limit_seconds {
        return Err(LimitViolation::SuiteTimeout {
            elapsed_seconds,
            limit_seconds,
        });
    }
    Ok(())
}

/// Limit violation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LimitViolation {
    #[error("Maximum steps exceeded: {actual} >= {limit}")]
    MaxSteps { actual: usize, limit: usize },

    #[error("Maximum payload bytes exceeded: {actual} > {limit}")]
    MaxPayloadBytes { actual: usize, limit: usize },

    #[error("Step timeout after {seconds}s")]
    StepTimeout { seconds: u64 },

    #[error("Suite run timeout: {elapsed_seconds}s >= {limit_seconds}s")]
    SuiteTimeout {
        elapsed_seconds: u64,
        limit_seconds: u64,
    },
}
