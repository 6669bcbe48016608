//! Error translation.
//!
//! Converts an error raised anywhere inside the unit into the standard JSON
//! envelope, so outer units see an ordinary response:
//!
//! ```json
//! {
//!   "error": { "code": "NOT_FOUND", "message": "...", "category": "not_found" },
//!   "request_id": "01890a5d-ac96-774b-bcce-b302099a8057"
//! }
//! ```
//!
//! Place it early in the global list. Errors from units before it still
//! reach the executor, which applies the same envelope.

use strata_core::{PipelineResult, RequestContext, Response};

use crate::middleware::{BoxFuture, Middleware, Next};

/// Turns `Err(PipelineError)` into an error envelope response.
#[derive(Debug, Clone, Default)]
pub struct ErrorTranslation {
    expose_internal: bool,
}

impl ErrorTranslation {
    /// Hides internal error messages.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Includes internal error messages (development only).
    #[must_use]
    pub const fn expose_internal_errors(mut self, expose: bool) -> Self {
        self.expose_internal = expose;
        self
    }
}

impl Middleware for ErrorTranslation {
    fn name(&self) -> &'static str {
        "errors"
    }

    fn handle<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        next: Next<'a>,
        _params: &'a [String],
    ) -> BoxFuture<'a, PipelineResult<Response>> {
        Box::pin(async move {
            match next.run(ctx).await {
                Ok(response) => Ok(response),
                Err(err) => {
                    if err.is_internal() {
                        tracing::error!(error = %err, code = err.error_code(), "request failed");
                    } else {
                        tracing::debug!(error = %err, code = err.error_code(), "request rejected");
                    }
                    let request_id = ctx.request_id().to_string();
                    Ok(Response::error_envelope(&err, Some(&request_id), self.expose_internal))
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{endpoint_fn, Executor, Outcome, Sequence, SequenceEntry};
    use http::StatusCode;
    use serde_json::Value;
    use std::sync::Arc;
    use strata_core::{fixtures, PipelineError};

    fn executor(unit: ErrorTranslation) -> Executor {
        Executor::new(Sequence::new(
            "test",
            vec![SequenceEntry::new("errors", Arc::new(unit), Vec::new())],
        ))
    }

    fn body_json(response: &Response) -> Value {
        serde_json::from_slice(&response.body_bytes()).unwrap()
    }

    #[tokio::test]
    async fn test_error_becomes_envelope() {
        let handler = endpoint_fn(|_| Box::pin(async { Err(PipelineError::not_found("post 7")) }));
        let ctx = fixtures::json_get("/posts/7");
        let request_id = ctx.request_id().to_string();

        let completion = executor(ErrorTranslation::new()).execute(ctx, &handler).await;

        assert_eq!(completion.outcome(), Outcome::Completed);
        assert_eq!(completion.response().status(), StatusCode::NOT_FOUND);
        let body = body_json(completion.response());
        assert_eq!(body["error"]["code"], "NOT_FOUND");
        assert_eq!(body["request_id"], request_id.as_str());
    }

    #[tokio::test]
    async fn test_internal_message_hidden_by_default() {
        let handler = endpoint_fn(|_| Box::pin(async { Err(PipelineError::internal("pool exhausted")) }));

        let hidden = executor(ErrorTranslation::new())
            .execute(fixtures::get("/"), &handler)
            .await;
        assert!(!body_json(hidden.response()).to_string().contains("pool exhausted"));

        let shown = executor(ErrorTranslation::new().expose_internal_errors(true))
            .execute(fixtures::get("/"), &handler)
            .await;
        assert!(body_json(shown.response()).to_string().contains("pool exhausted"));
    }

    #[tokio::test]
    async fn test_rate_limit_keeps_retry_after() {
        let handler = endpoint_fn(|_| Box::pin(async { Err(PipelineError::rate_limited("slow down", Some(30))) }));

        let completion = executor(ErrorTranslation::new())
            .execute(fixtures::get("/"), &handler)
            .await;
        assert_eq!(completion.response().status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(completion.response().header("retry-after"), Some("30"));
    }
}
