//! Generation request, streaming event, and failure types.
//!
//! The generation service speaks in loosely typed stream payloads. They are
//! decoded once, at the client boundary, into [`GenerationEvent`]; nothing
//! past that point inspects raw JSON.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Conversation threading for a generation call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub struct ThreadingOptions {
    /// Conversation/context the cascade was started against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_context_id: Option<String>,
    /// Response id of the previous successful call in this cascade.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,
}

/// One generation call for one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub struct GenerationRequest {
    pub run_id: String,
    pub node_id: String,
    pub message: String,
    pub variables: BTreeMap<String, String>,
    #[serde(default)]
    pub threading: ThreadingOptions,
    /// 1-based attempt number, counting rate-limit retries.
    pub attempt: u32,
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Token accounting reported by the service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// A completed generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub struct GenerationOutput {
    pub response_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    /// Identifier usable with [`GenerationClient::cancel`](crate::traits::GenerationClient::cancel).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl GenerationOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            response_text: text.into(),
            usage: None,
            response_id: None,
            model: None,
        }
    }
}

/// A structured failure reported by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub struct GenerationFailure {
    /// Machine-readable code, e.g. `rate_limited`, `quota_exceeded`, `server_error`.
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
}

/// How the orchestrator treats a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Wait and retry outside the normal retry budget.
    RateLimited { retry_after_ms: Option<u64> },
    /// Always fatal to the run.
    QuotaExhausted,
    /// Counts against the retry budget.
    Transient,
}

const RATE_LIMIT_CODES: &[&str] = &["rate_limited", "rate_limit_exceeded", "too_many_requests", "429"];
const QUOTA_CODES: &[&str] = &[
    "quota_exceeded",
    "insufficient_quota",
    "quota_exhausted",
    "billing_hard_limit_reached",
];

impl GenerationFailure {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            retry_after_ms: None,
            node_name: None,
        }
    }

    pub fn rate_limited(retry_after_ms: Option<u64>) -> Self {
        Self {
            code: "rate_limited".into(),
            message: "too many requests".into(),
            retry_after_ms,
            node_name: None,
        }
    }

    pub fn classify(&self) -> FailureClass {
        let code = self.code.to_ascii_lowercase();
        if QUOTA_CODES.contains(&code.as_str())
            || self.message.to_ascii_lowercase().contains("exceeded your current quota")
        {
            FailureClass::QuotaExhausted
        } else if RATE_LIMIT_CODES.contains(&code.as_str()) {
            FailureClass::RateLimited {
                retry_after_ms: self.retry_after_ms,
            }
        } else {
            FailureClass::Transient
        }
    }
}

impl std::fmt::Display for GenerationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

// ---------------------------------------------------------------------------
// Stream events
// ---------------------------------------------------------------------------

/// One event on a generation stream. A stream carries any number of
/// `Started`/`Progress` events followed by exactly one terminal event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case", tag = "kind")]
#[non_exhaustive]
pub enum GenerationEvent {
    Started {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response_id: Option<String>,
    },
    Progress {
        delta: String,
    },
    Completed {
        output: GenerationOutput,
    },
    RateLimited {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry_after_ms: Option<u64>,
        #[serde(default)]
        message: String,
    },
    Error {
        failure: GenerationFailure,
    },
}

impl GenerationEvent {
    /// Decode a raw stream payload. Malformed payloads become an `Error`
    /// event so the attempt loop treats them like any transient failure.
    pub fn decode(raw: Value) -> Self {
        match serde_json::from_value::<GenerationEvent>(raw) {
            Ok(event) => event,
            Err(e) => GenerationEvent::Error {
                failure: GenerationFailure::new("malformed_event", e.to_string()),
            },
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::RateLimited { .. } | Self::Error { .. }
        )
    }
}
