//! Role checks against the authenticated user.
//!
//! Declared with the accepted roles as parameters (`role:admin,editor`).
//! The user must carry at least one of them in its `roles` list (or as its
//! `role` string). Without parameters the unit only requires that a user is
//! present.

use serde_json::Value;
use strata_core::{PipelineError, PipelineResult, RequestContext, Response};

use super::authenticate::USER_ATTRIBUTE;
use crate::middleware::{BoxFuture, Middleware, Next};

/// Rejects requests whose user lacks every declared role.
///
/// Answers `401` when no user is present and `403` when the roles do not
/// match, both with the JSON error envelope.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequireRole;

impl RequireRole {
    /// Creates the unit.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn user_roles(user: &Value) -> Vec<&str> {
        let mut roles: Vec<&str> = user
            .get("roles")
            .and_then(Value::as_array)
            .map(|roles| roles.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        if let Some(role) = user.get("role").and_then(Value::as_str) {
            roles.push(role);
        }
        roles
    }

    fn deny(ctx: &RequestContext, err: &PipelineError) -> Response {
        let request_id = ctx.request_id().to_string();
        Response::error_envelope(err, Some(&request_id), false)
    }
}

impl Middleware for RequireRole {
    fn name(&self) -> &'static str {
        "role"
    }

    fn handle<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        next: Next<'a>,
        params: &'a [String],
    ) -> BoxFuture<'a, PipelineResult<Response>> {
        Box::pin(async move {
            let denial = match ctx.attribute(USER_ATTRIBUTE) {
                None => Some(PipelineError::authentication("Unauthenticated.")),
                Some(user) => {
                    let roles = Self::user_roles(user);
                    if params.is_empty() || params.iter().any(|wanted| roles.contains(&wanted.as_str())) {
                        None
                    } else {
                        tracing::debug!(required = ?params, held = ?roles, "request rejected: missing role");
                        Some(PipelineError::authorization(format!(
                            "requires one of: {}",
                            params.join(", ")
                        )))
                    }
                }
            };

            if let Some(err) = denial {
                return Ok(Self::deny(ctx, &err));
            }

            next.run(ctx).await
        })
    }
}
