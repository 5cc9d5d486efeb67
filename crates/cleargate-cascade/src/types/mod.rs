//! Foundational types for the cascade execution model.
//!
//! Every type here is `Serialize + Deserialize + Debug + Clone`. Map fields
//! use `BTreeMap` so variable contexts and node options serialize in a
//! stable order, which keeps event logs and snapshots diffable.
//!
//! Enums that cross the crate boundary are `#[non_exhaustive]`.

pub mod execution;
pub mod generation;
pub mod node;

pub use execution::*;
pub use generation::*;
pub use node::*;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Current schema version for `CascadeEvent` serialization.
pub const CASCADE_EVENT_SCHEMA_VERSION: u16 = 1;

/// Prefix written into the history entry of a node the operator skipped.
pub const SKIPPED_RESPONSE_PREFIX: &str = "[SKIPPED:";

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Retry configuration for non-rate-limit generation failures.
///
/// Rate-limit waits are budgeted separately (see
/// [`ExecutorConfig::max_rate_limit_waits`](crate::executor::ExecutorConfig))
/// and never consume `max_attempts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub struct RetryPolicy {
    /// Attempts before the operator is asked to stop, skip, or retry. Default: 3.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Initial backoff in milliseconds. Default: 1 000.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// Backoff multiplier per attempt. Default: 2.0.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// Backoff to wait after the given (1-based) failed attempt.
    pub fn backoff_for(&self, attempt: u32) -> u64 {
        let exp = attempt.saturating_sub(1).min(16) as i32;
        let backoff = self.backoff_ms as f64 * self.backoff_multiplier.powi(exp);
        backoff.max(0.0) as u64
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_ms() -> u64 {
    1_000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_policy_defaults() {
        let p = RetryPolicy::default();
        assert_eq!(p.max_attempts, 3);
        assert_eq!(p.backoff_ms, 1_000);
        assert!((p.backoff_multiplier - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn retry_policy_partial_config_fills_defaults() {
        let p: RetryPolicy = serde_json::from_str(r#"{"max_attempts": 5}"#).unwrap();
        assert_eq!(p.max_attempts, 5);
        assert_eq!(p.backoff_ms, 1_000);
    }

    #[test]
    fn backoff_grows_exponentially() {
        let p = RetryPolicy {
            max_attempts: 3,
            backoff_ms: 100,
            backoff_multiplier: 2.0,
        };
        assert_eq!(p.backoff_for(1), 100);
        assert_eq!(p.backoff_for(2), 200);
        assert_eq!(p.backoff_for(3), 400);
    }
}
