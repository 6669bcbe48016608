//! Runtime error types for pipeline execution.
//!
//! [`PipelineError`] is what a middleware unit or terminal handler returns
//! when it fails instead of producing a response. Errors propagate outward
//! through every unit that awaited its continuation, and are finally turned
//! into an [`ErrorEnvelope`] response at the executor boundary.
//!
//! Build-time configuration problems are *not* represented here; they are
//! reported before any request is served (see `strata_middleware::BuildError`).

use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Result type alias using [`PipelineError`].
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Status used when the client goes away mid-pipeline.
const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Coarse classification of a [`PipelineError`].
///
/// The category decides both the response status and the machine-readable
/// code written into the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Request input failed a unit's checks.
    Validation,
    /// No usable credentials on the request.
    Authentication,
    /// Credentials present but insufficient.
    Authorization,
    /// Nothing to serve at this path.
    NotFound,
    /// A limiter rejected the request.
    RateLimited,
    /// A unit or handler broke.
    Internal,
    /// The exchange was abandoned.
    Cancelled,
}

impl ErrorCategory {
    /// Status written on envelope responses of this category.
    #[must_use]
    pub fn default_status_code(self) -> StatusCode {
        match self {
            Self::Validation => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Authentication => StatusCode::UNAUTHORIZED,
            Self::Authorization => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Cancelled => StatusCode::from_u16(CLIENT_CLOSED_REQUEST).unwrap_or(StatusCode::BAD_REQUEST),
        }
    }

    /// Envelope `code` for this category.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Validation => "INVALID_INPUT",
            Self::Authentication => "UNAUTHENTICATED",
            Self::Authorization => "FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::RateLimited => "RATE_LIMITED",
            Self::Internal => "INTERNAL_ERROR",
            Self::Cancelled => "CANCELLED",
        }
    }
}

/// Error raised while handling a request.
///
/// # Example
///
/// ```
/// use strata_core::{ErrorCategory, PipelineError};
///
/// fn require_name(name: &str) -> Result<(), PipelineError> {
///     if name.is_empty() {
///         return Err(PipelineError::validation("name must not be empty"));
///     }
///     Ok(())
/// }
///
/// let err = require_name("").unwrap_err();
/// assert_eq!(err.category(), ErrorCategory::Validation);
/// ```
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Input rejected by a unit or handler.
    #[error("invalid input: {message}")]
    Validation {
        /// What was wrong.
        message: String,
    },

    /// The request is not authenticated.
    #[error("unauthenticated: {message}")]
    Authentication {
        /// Why the credentials were refused.
        message: String,
    },

    /// The authenticated user may not do this.
    #[error("forbidden: {message}")]
    Authorization {
        /// Why access was denied.
        message: String,
    },

    /// No resource for the request.
    #[error("not found: {message}")]
    NotFound {
        /// What was looked for.
        message: String,
    },

    /// A limiter refused the request.
    #[error("too many requests: {message}")]
    RateLimited {
        /// Limiter description.
        message: String,
        /// Seconds until the current window closes.
        retry_after_seconds: Option<u64>,
    },

    /// A unit or handler failed unexpectedly.
    ///
    /// The message is hidden from clients unless the executor is told to
    /// expose it.
    #[error("internal failure: {message}")]
    Internal {
        /// Operator-facing message.
        message: String,
        /// Underlying cause.
        #[source]
        source: Option<anyhow::Error>,
    },

    /// Forward execution was abandoned because the exchange was cancelled.
    #[error("request cancelled before '{stage}' could run")]
    Cancelled {
        /// Name of the unit (or `"handler"`) that was skipped first.
        stage: String,
    },
}

impl PipelineError {
    /// Input rejected.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Missing or unusable credentials.
    #[must_use]
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Authenticated but not allowed.
    #[must_use]
    pub fn authorization(message: impl Into<String>) -> Self {
        Self::Authorization {
            message: message.into(),
        }
    }

    /// Nothing to serve.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Limiter rejection, optionally telling the client when to retry.
    #[must_use]
    pub fn rate_limited(message: impl Into<String>, retry_after_seconds: Option<u64>) -> Self {
        Self::RateLimited {
            message: message.into(),
            retry_after_seconds,
        }
    }

    /// Unexpected failure without an underlying cause.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Unexpected failure wrapping `source`.
    pub fn internal_with_source(message: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Internal {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Cancellation observed before `stage` was entered.
    #[must_use]
    pub fn cancelled(stage: impl Into<String>) -> Self {
        Self::Cancelled {
            stage: stage.into(),
        }
    }

    /// The error's category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation { .. } => ErrorCategory::Validation,
            Self::Authentication { .. } => ErrorCategory::Authentication,
            Self::Authorization { .. } => ErrorCategory::Authorization,
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::RateLimited { .. } => ErrorCategory::RateLimited,
            Self::Internal { .. } => ErrorCategory::Internal,
            Self::Cancelled { .. } => ErrorCategory::Cancelled,
        }
    }

    /// Status of the envelope response for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        self.category().default_status_code()
    }

    /// Machine-readable code, see [`ErrorCategory::code`].
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        self.category().code()
    }

    /// Returns `true` for errors whose message must not reach clients.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Builds the client-facing envelope.
    ///
    /// When `expose_internal` is `false`, internal errors carry a generic
    /// message instead of their own.
    #[must_use]
    pub fn to_envelope(&self, request_id: Option<&str>, expose_internal: bool) -> ErrorEnvelope {
        let message = if self.is_internal() && !expose_internal {
            String::from("the request could not be completed")
        } else {
            self.to_string()
        };

        let details = match self {
            Self::RateLimited {
                retry_after_seconds: Some(seconds),
                ..
            } => Some(json!({ "retry_after_seconds": seconds })),
            Self::Cancelled { stage } => Some(json!({ "skipped": stage })),
            _ => None,
        };

        ErrorEnvelope {
            error: ErrorDetail {
                code: self.error_code().to_owned(),
                message,
                category: self.category(),
                details,
            },
            request_id: request_id.map(str::to_owned),
        }
    }
}

/// Body of every error response: `{ "error": {...}, "request_id": "..." }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// What went wrong.
    pub error: ErrorDetail,
    /// Correlates the response with logs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// The `error` object of an [`ErrorEnvelope`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// See [`ErrorCategory::code`].
    pub code: String,
    /// Client-facing message.
    pub message: String,
    /// Category of the error.
    pub category: ErrorCategory,
    /// Category-specific extras, such as `retry_after_seconds`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}
