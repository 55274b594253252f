//! Closed, additive error taxonomy for the ingestion core.
//!
//! Every error surfaced across a component boundary carries a stable
//! machine code (serialized as `code`) plus a human message, matching the
//! shape external callers match on (see spec §7).

use serde::Serialize;

/// Errors produced by the ingestion core.
///
/// Each variant serializes with a snake_case `code` field so callers outside
/// this crate (an HTTP surface, a CLI) can match on a stable string rather
/// than the Rust type.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum IngestError {
    // Validation (permanent, never retried)
    UnsupportedKind { message: String, kind: String },
    Validation { message: String },

    // Timeout (retryable)
    ParseTimeout { message: String },
    StageTimeout { message: String, stage: String },

    // Transient I/O (retryable)
    ParserIo { message: String },
    StoreContention { message: String },
    WebhookTransport { message: String },

    // Terminal
    Cancelled { message: String },
    ProcessingFailed { message: String },
    WebhookDeliveryExhausted { message: String, attempts: u32 },

    // Policy (permanent, surfaced to caller)
    RateLimitExceeded {
        message: String,
        limit: u32,
        remaining: u32,
        reset_ms: i64,
    },

    // Not-found / state errors
    JobNotFound { message: String },
    AlreadyTerminal { message: String },
    StaleLease { message: String },

    NotFound { message: String },
    Internal { message: String },
}

impl IngestError {
    pub fn unsupported_kind(kind: impl Into<String>) -> Self {
        let kind = kind.into();
        Self::UnsupportedKind {
            message: format!("unsupported declared kind: {kind}"),
            kind,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn job_not_found(id: impl std::fmt::Display) -> Self {
        Self::JobNotFound {
            message: format!("job not found: {id}"),
        }
    }

    pub fn already_terminal(id: impl std::fmt::Display) -> Self {
        Self::AlreadyTerminal {
            message: format!("job {id} is already in a terminal state"),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn rate_limit_exceeded(limit: u32, reset_ms: i64) -> Self {
        Self::RateLimitExceeded {
            message: "rate limit exceeded".to_string(),
            limit,
            remaining: 0,
            reset_ms,
        }
    }

    /// Whether this error should be retried by the worker pool / dispatcher,
    /// or routed directly to a terminal state per spec §7's taxonomy.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ParseTimeout { .. }
                | Self::StageTimeout { .. }
                | Self::ParserIo { .. }
                | Self::StoreContention { .. }
                | Self::WebhookTransport { .. }
        )
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedKind { .. } => "UNSUPPORTED_KIND",
            Self::Validation { .. } => "VALIDATION",
            Self::ParseTimeout { .. } => "PARSE_TIMEOUT",
            Self::StageTimeout { .. } => "STAGE_TIMEOUT",
            Self::ParserIo { .. } => "PARSER_IO",
            Self::StoreContention { .. } => "STORE_CONTENTION",
            Self::WebhookTransport { .. } => "WEBHOOK_TRANSPORT",
            Self::Cancelled { .. } => "CANCELLED",
            Self::ProcessingFailed { .. } => "PROCESSING_FAILED",
            Self::WebhookDeliveryExhausted { .. } => "WEBHOOK_DELIVERY_EXHAUSTED",
            Self::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            Self::JobNotFound { .. } => "JOB_NOT_FOUND",
            Self::AlreadyTerminal { .. } => "ALREADY_TERMINAL",
            Self::StaleLease { .. } => "STALE_LEASE",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Internal { .. } => "INTERNAL",
        }
    }
}

impl std::fmt::Display for IngestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedKind { message, .. }
            | Self::Validation { message }
            | Self::ParseTimeout { message }
            | Self::StageTimeout { message, .. }
            | Self::ParserIo { message }
            | Self::StoreContention { message }
            | Self::WebhookTransport { message }
            | Self::Cancelled { message }
            | Self::ProcessingFailed { message }
            | Self::WebhookDeliveryExhausted { message, .. }
            | Self::RateLimitExceeded { message, .. }
            | Self::JobNotFound { message }
            | Self::AlreadyTerminal { message }
            | Self::StaleLease { message }
            | Self::NotFound { message }
            | Self::Internal { message } => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for IngestError {}

impl From<anyhow::Error> for IngestError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err.to_string())
    }
}

pub type IngestResult<T> = Result<T, IngestError>;
