//! Tracing recorder using the `tracing` crate.
//!
//! Trace and span IDs are deterministic: derived via SHA-256 from the run id
//! and from `(trace_id, node_id, attempt)`. Each open span is a live
//! `tracing` span until it is completed or failed.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::errors::TracingError;
use crate::traits::{ErrorEvidence, SpanOutcome, TracingRecorder};
use crate::types::RunStatus;

/// Tracing recorder backed by the `tracing` crate.
#[derive(Default)]
pub struct LogTracingRecorder {
    open: Mutex<HashMap<String, tracing::Span>>,
}

impl LogTracingRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spans created but not yet completed or failed.
    pub fn open_spans(&self) -> usize {
        self.open.lock().len()
    }

    fn take(&self, span_id: &str) -> Result<tracing::Span, TracingError> {
        self.open
            .lock()
            .remove(span_id)
            .ok_or_else(|| TracingError::Backend {
                message: format!("unknown span {span_id}"),
            })
    }
}

/// Derive a deterministic hex ID from the given input parts.
fn deterministic_id(parts: &[&str], len: usize) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(b":");
    }
    let hash = hasher.finalize();
    hash.iter().take(len).map(|b| format!("{b:02x}")).collect()
}

#[async_trait]
impl TracingRecorder for LogTracingRecorder {
    async fn start_trace(&self, run_id: &str, root_node_id: &str) -> Result<String, TracingError> {
        let trace_id = deterministic_id(&[run_id], 16); // 128-bit
        tracing::info!(%run_id, %root_node_id, otel.trace_id = %trace_id, "cascade trace started");
        Ok(trace_id)
    }

    async fn create_span(
        &self,
        trace_id: &str,
        node_id: &str,
        attempt: u32,
        previous_span_id: Option<&str>,
    ) -> Result<String, TracingError> {
        let attempt_str = attempt.to_string();
        let span_id = deterministic_id(&[trace_id, node_id, &attempt_str], 8); // 64-bit
        let span = tracing::info_span!(
            "generation_attempt",
            %node_id,
            attempt,
            previous_span_id = previous_span_id.unwrap_or(""),
            otel.trace_id = %trace_id,
            otel.span_id = %span_id,
        );
        self.open.lock().insert(span_id.clone(), span);
        Ok(span_id)
    }

    async fn complete_span(&self, span_id: &str, outcome: &SpanOutcome) -> Result<(), TracingError> {
        let span = self.take(span_id)?;
        span.in_scope(|| {
            tracing::info!(
                latency_ms = outcome.latency_ms,
                input_tokens = ?outcome.usage.map(|u| u.input_tokens),
                output_tokens = ?outcome.usage.map(|u| u.output_tokens),
                model = ?outcome.model,
                response_id = ?outcome.response_id,
                "attempt completed"
            );
        });
        Ok(())
    }

    async fn fail_span(&self, span_id: &str, evidence: &ErrorEvidence) -> Result<(), TracingError> {
        let span = self.take(span_id)?;
        span.in_scope(|| {
            tracing::warn!(
                code = %evidence.code,
                error = %evidence.message,
                attempt = evidence.attempt,
                latency_ms = evidence.latency_ms,
                retry_after_ms = ?evidence.retry_after_ms,
                "attempt failed"
            );
        });
        Ok(())
    }

    async fn complete_trace(&self, trace_id: &str, status: RunStatus) -> Result<(), TracingError> {
        tracing::info!(otel.trace_id = %trace_id, status = ?status, "cascade trace completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ids_are_deterministic() {
        let recorder = LogTracingRecorder::new();
        let t1 = recorder.start_trace("run-1", "root").await.unwrap();
        let t2 = recorder.start_trace("run-1", "root").await.unwrap();
        let t3 = recorder.start_trace("run-2", "root").await.unwrap();
        assert_eq!(t1, t2);
        assert_ne!(t1, t3);
        assert_eq!(t1.len(), 32);

        let s1 = recorder.create_span(&t1, "n1", 1, None).await.unwrap();
        let s2 = recorder.create_span(&t1, "n1", 2, Some(&s1)).await.unwrap();
        assert_ne!(s1, s2);
        assert_eq!(s1.len(), 16);
    }

    #[tokio::test]
    async fn spans_close_once() {
        let recorder = LogTracingRecorder::new();
        let trace = recorder.start_trace("run-1", "root").await.unwrap();
        let span = recorder.create_span(&trace, "n1", 1, None).await.unwrap();
        assert_eq!(recorder.open_spans(), 1);

        recorder
            .fail_span(
                &span,
                &ErrorEvidence {
                    code: "server_error".into(),
                    message: "boom".into(),
                    attempt: 1,
                    latency_ms: 12,
                    retry_after_ms: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(recorder.open_spans(), 0);
        assert!(recorder
            .complete_span(&span, &SpanOutcome::default())
            .await
            .is_err());
        recorder
            .complete_trace(&trace, RunStatus::Completed)
            .await
            .unwrap();
    }
}
