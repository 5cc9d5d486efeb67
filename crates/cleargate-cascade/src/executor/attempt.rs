//! Per-node attempt bookkeeping.
//!
//! Two independent budgets: normal retries (`RetryPolicy::max_attempts`)
//! and rate-limit waits (`max_rate_limit_waits`). A rate-limit wait never
//! consumes a normal retry. The tracker only decides; the caller sleeps,
//! asks the operator, and reports back.

use crate::engine::CascadeError;
use crate::types::{FailureClass, GenerationFailure, RetryPolicy};

/// What the attempt loop does after a failed call.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum AttemptStep {
    /// Wait `wait_ms` and call again. Normal retry budget untouched.
    RateLimitWait { wait_ms: u64, wait_count: u32 },
    /// Back off and call again. One normal retry consumed.
    Backoff { attempt: u32, backoff_ms: u64 },
    /// Budget spent. Ask the operator.
    Exhausted(CascadeError),
    /// Ends the run without asking.
    Fatal(CascadeError),
}

#[derive(Debug, Clone)]
pub(crate) struct AttemptTracker {
    node_id: String,
    retry: RetryPolicy,
    max_rate_limit_waits: u32,
    rate_limit_fallback_ms: u64,
    /// Failed attempts in the current retry budget.
    failures: u32,
    rate_limit_waits: u32,
    /// Calls made for this node, all budgets and operator retries included.
    calls: u32,
}

impl AttemptTracker {
    pub(crate) fn new(
        node_id: impl Into<String>,
        retry: RetryPolicy,
        max_rate_limit_waits: u32,
        rate_limit_fallback_ms: u64,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            retry,
            max_rate_limit_waits,
            rate_limit_fallback_ms,
            failures: 0,
            rate_limit_waits: 0,
            calls: 0,
        }
    }

    /// Record that a call is about to be made; returns its 1-based number.
    pub(crate) fn begin_call(&mut self) -> u32 {
        self.calls += 1;
        self.calls
    }

    pub(crate) fn calls(&self) -> u32 {
        self.calls
    }

    pub(crate) fn failures(&self) -> u32 {
        self.failures
    }

    pub(crate) fn rate_limit_waits(&self) -> u32 {
        self.rate_limit_waits
    }

    /// Decide the next step for a failed call.
    pub(crate) fn on_failure(&mut self, failure: &GenerationFailure) -> AttemptStep {
        match failure.classify() {
            FailureClass::QuotaExhausted => AttemptStep::Fatal(CascadeError::QuotaExhausted {
                node_id: self.node_id.clone(),
                message: failure.message.clone(),
            }),
            FailureClass::RateLimited { retry_after_ms } => {
                if self.rate_limit_waits >= self.max_rate_limit_waits {
                    return AttemptStep::Exhausted(CascadeError::RateLimit {
                        node_id: self.node_id.clone(),
                        waits: self.rate_limit_waits,
                    });
                }
                self.rate_limit_waits += 1;
                AttemptStep::RateLimitWait {
                    wait_ms: retry_after_ms.unwrap_or(self.rate_limit_fallback_ms),
                    wait_count: self.rate_limit_waits,
                }
            }
            FailureClass::Transient => {
                self.failures += 1;
                let max = self.retry.max_attempts.max(1);
                if self.failures >= max {
                    AttemptStep::Exhausted(CascadeError::Generation {
                        node_id: self.node_id.clone(),
                        attempts: self.failures,
                        message: failure.to_string(),
                    })
                } else {
                    AttemptStep::Backoff {
                        attempt: self.failures,
                        backoff_ms: self.retry.backoff_for(self.failures),
                    }
                }
            }
        }
    }

    /// Operator chose `retry`: fresh budgets, call numbering continues.
    pub(crate) fn reset(&mut self) {
        self.failures = 0;
        self.rate_limit_waits = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> AttemptTracker {
        AttemptTracker::new(
            "n1",
            RetryPolicy {
                max_attempts: 3,
                backoff_ms: 100,
                backoff_multiplier: 2.0,
            },
            12,
            30_000,
        )
    }

    fn transient() -> GenerationFailure {
        GenerationFailure::new("server_error", "boom")
    }

    #[test]
    fn transient_failures_back_off_then_exhaust() {
        let mut t = tracker();
        assert_eq!(
            t.on_failure(&transient()),
            AttemptStep::Backoff {
                attempt: 1,
                backoff_ms: 100
            }
        );
        assert_eq!(
            t.on_failure(&transient()),
            AttemptStep::Backoff {
                attempt: 2,
                backoff_ms: 200
            }
        );
        match t.on_failure(&transient()) {
            AttemptStep::Exhausted(CascadeError::Generation { attempts, .. }) => {
                assert_eq!(attempts, 3)
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[test]
    fn rate_limit_does_not_consume_retries() {
        let mut t = tracker();
        assert_eq!(
            t.on_failure(&GenerationFailure::rate_limited(Some(2_000))),
            AttemptStep::RateLimitWait {
                wait_ms: 2_000,
                wait_count: 1
            }
        );
        assert_eq!(t.failures(), 0);
        // Still three normal attempts available.
        assert!(matches!(t.on_failure(&transient()), AttemptStep::Backoff { .. }));
        assert!(matches!(t.on_failure(&transient()), AttemptStep::Backoff { .. }));
        assert!(matches!(t.on_failure(&transient()), AttemptStep::Exhausted(_)));
    }

    #[test]
    fn rate_limit_without_duration_uses_fallback() {
        let mut t = tracker();
        assert_eq!(
            t.on_failure(&GenerationFailure::rate_limited(None)),
            AttemptStep::RateLimitWait {
                wait_ms: 30_000,
                wait_count: 1
            }
        );
    }

    #[test]
    fn rate_limit_cap_escalates() {
        let mut t = AttemptTracker::new("n1", RetryPolicy::default(), 2, 10);
        let rl = GenerationFailure::rate_limited(None);
        assert!(matches!(t.on_failure(&rl), AttemptStep::RateLimitWait { .. }));
        assert!(matches!(t.on_failure(&rl), AttemptStep::RateLimitWait { .. }));
        assert_eq!(
            t.on_failure(&rl),
            AttemptStep::Exhausted(CascadeError::RateLimit {
                node_id: "n1".into(),
                waits: 2
            })
        );
    }

    #[test]
    fn quota_is_fatal_immediately() {
        let mut t = tracker();
        let step = t.on_failure(&GenerationFailure::new("insufficient_quota", "no credit"));
        assert!(matches!(step, AttemptStep::Fatal(CascadeError::QuotaExhausted { .. })));
    }

    #[test]
    fn reset_restores_budgets_but_keeps_call_numbers() {
        let mut t = tracker();
        t.begin_call();
        t.on_failure(&transient());
        t.begin_call();
        t.on_failure(&GenerationFailure::rate_limited(None));
        t.reset();
        assert_eq!(t.failures(), 0);
        assert_eq!(t.rate_limit_waits(), 0);
        assert_eq!(t.begin_call(), 3);
        assert_eq!(t.calls(), 3);
    }

    #[test]
    fn zero_max_attempts_still_allows_one_call() {
        let mut t = AttemptTracker::new(
            "n1",
            RetryPolicy {
                max_attempts: 0,
                ..RetryPolicy::default()
            },
            12,
            10,
        );
        assert!(matches!(t.on_failure(&transient()), AttemptStep::Exhausted(_)));
    }
}
