//! Bearer-token authentication.
//!
//! Resolves the `Authorization: Bearer <token>` header to a user through a
//! [`TokenResolver`] and stores the user as the `"user"` attribute, where
//! downstream units and handlers read it with
//! [`RequestContext::attribute`].
//!
//! Requests without a resolvable token are answered directly:
//!
//! - `401` with the JSON error envelope and `www-authenticate: Bearer` when
//!   the client wants JSON or no login path was declared
//! - a redirect to the login path (`auth:/login`) otherwise

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use strata_core::{PipelineError, PipelineResult, RequestContext, Response};

use crate::middleware::{BoxFuture, Middleware, Next};

/// Attribute key holding the authenticated user.
pub const USER_ATTRIBUTE: &str = "user";

/// Maps a bearer token to a user record.
///
/// Implemented for plain closures `Fn(&str) -> Option<Value>`; implement it
/// directly for lookups that need to await.
pub trait TokenResolver: Send + Sync + 'static {
    /// Returns the user for `token`, or `None` if the token is unknown.
    fn resolve<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Option<Value>>;
}

impl<F> TokenResolver for F
where
    F: Fn(&str) -> Option<Value> + Send + Sync + 'static,
{
    fn resolve<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Option<Value>> {
        let user = self(token);
        Box::pin(async move { user })
    }
}

/// A fixed token table, mostly for tests and local development.
#[derive(Debug, Clone, Default)]
pub struct StaticTokens {
    tokens: HashMap<String, Value>,
}

impl StaticTokens {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a token.
    #[must_use]
    pub fn with(mut self, token: impl Into<String>, user: Value) -> Self {
        self.tokens.insert(token.into(), user);
        self
    }
}

impl TokenResolver for StaticTokens {
    fn resolve<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Option<Value>> {
        Box::pin(async move { self.tokens.get(token).cloned() })
    }
}

/// Authenticates requests with a bearer token.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use strata_middleware::stages::{Authenticate, StaticTokens};
/// use strata_middleware::MiddlewareRegistry;
///
/// let tokens = StaticTokens::new().with("t-1", json!({ "id": 1, "roles": ["admin"] }));
/// let registry = MiddlewareRegistry::new().with("auth", Authenticate::new(tokens));
///
/// assert!(registry.contains("auth"));
/// ```
#[derive(Clone)]
pub struct Authenticate {
    resolver: Arc<dyn TokenResolver>,
}

impl Authenticate {
    /// Creates the unit around a resolver.
    pub fn new(resolver: impl TokenResolver) -> Self {
        Self {
            resolver: Arc::new(resolver),
        }
    }

    fn reject(ctx: &RequestContext, login_path: Option<&str>) -> Response {
        match login_path {
            Some(path) if !ctx.wants_json() => Response::redirect(path),
            _ => {
                let err = PipelineError::authentication("Unauthenticated.");
                let request_id = ctx.request_id().to_string();
                Response::error_envelope(&err, Some(&request_id), false)
                    .with_header(http::header::WWW_AUTHENTICATE.as_str(), "Bearer")
            }
        }
    }
}

impl std::fmt::Debug for Authenticate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticate").finish_non_exhaustive()
    }
}

impl Middleware for Authenticate {
    fn name(&self) -> &'static str {
        "auth"
    }

    fn handle<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        next: Next<'a>,
        params: &'a [String],
    ) -> BoxFuture<'a, PipelineResult<Response>> {
        Box::pin(async move {
            if ctx.has_attribute(USER_ATTRIBUTE) {
                return next.run(ctx).await;
            }

            let user = match ctx.bearer_token() {
                Some(token) => self.resolver.resolve(token).await,
                None => None,
            };

            match user {
                Some(user) => {
                    ctx.set_attribute(USER_ATTRIBUTE, user);
                    next.run(ctx).await
                }
                None => {
                    tracing::debug!(path = ctx.path(), "request rejected: not authenticated");
                    Ok(Self::reject(ctx, params.first().map(String::as_str)))
                }
            }
        })
    }

    fn validate_params(&self, params: &[String]) -> Result<(), String> {
        match params {
            [] => Ok(()),
            [path] if path.starts_with('/') || path.contains("://") => Ok(()),
            [path] => Err(format!("login path '{path}' must be absolute")),
            _ => Err("expected at most one parameter (login path)".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{endpoint_fn, Executor, Sequence, SequenceEntry};
    use http::StatusCode;
    use serde_json::json;
    use strata_core::fixtures;

    fn executor(params: &[&str]) -> Executor {
        let tokens = StaticTokens::new().with("good", json!({ "id": 7, "name": "ada" }));
        Executor::new(Sequence::new(
            "test",
            vec![SequenceEntry::new(
                "auth",
                Arc::new(Authenticate::new(tokens)),
                params.iter().map(ToString::to_string).collect(),
            )],
        ))
    }

    fn echo_user() -> impl crate::Endpoint {
        endpoint_fn(|ctx| {
            let user = ctx.attribute(USER_ATTRIBUTE).cloned();
            Box::pin(async move { Ok(Response::json(StatusCode::OK, &user)) })
        })
    }

    #[tokio::test]
    async fn test_valid_token_sets_user() {
        let completion = executor(&[])
            .execute(fixtures::authenticated_get("/me", "good"), &echo_user())
            .await;

        assert_eq!(completion.response().status(), StatusCode::OK);
        assert_eq!(completion.context().attribute("user"), Some(&json!({ "id": 7, "name": "ada" })));
    }

    #[tokio::test]
    async fn test_unknown_token_is_401() {
        let completion = executor(&["/login"])
            .execute(fixtures::authenticated_get("/me", "bad"), &echo_user())
            .await;

        assert_eq!(completion.response().status(), StatusCode::UNAUTHORIZED);
        assert_eq!(completion.response().header("www-authenticate"), Some("Bearer"));
        assert!(!completion.context().has_attribute(USER_ATTRIBUTE));
    }

    #[tokio::test]
    async fn test_browser_request_redirects_to_login() {
        let completion = executor(&["/login"])
            .execute(fixtures::get("/dashboard"), &echo_user())
            .await;

        assert!(completion.response().is_redirect());
        assert_eq!(completion.response().header("location"), Some("/login"));
    }

    #[tokio::test]
    async fn test_closure_resolver() {
        let unit = Authenticate::new(|token: &str| (token == "letmein").then(|| json!({ "id": 1 })));
        let mut ctx = fixtures::authenticated_get("/", "letmein");
        let handler = echo_user();
        let progress = crate::middleware::Progress::default();

        let response = unit
            .handle(&mut ctx, Next::endpoint(&handler, &progress), &[])
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(ctx.has_attribute(USER_ATTRIBUTE));
    }

    #[test]
    fn test_params() {
        let unit = Authenticate::new(StaticTokens::new());
        assert!(unit.validate_params(&[]).is_ok());
        assert!(unit.validate_params(&["/login".into()]).is_ok());
        assert!(unit.validate_params(&["login".into()]).is_err());
        assert!(unit.validate_params(&["/a".into(), "/b".into()]).is_err());
    }
}
