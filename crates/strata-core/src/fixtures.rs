//! Test fixtures for Strata development and testing.
//!
//! Pre-built request contexts used by unit and integration tests across the
//! workspace.
//!
//! # Example
//!
//! ```
//! use strata_core::fixtures;
//!
//! let ctx = fixtures::authenticated_get("/dashboard", "token-alice");
//! assert_eq!(ctx.bearer_token(), Some("token-alice"));
//! ```

use crate::context::RequestContext;
use http::Method;
use serde_json::Value;

/// A plain `GET` request for `uri`.
#[must_use]
pub fn get(uri: &str) -> RequestContext {
    RequestContext::builder(Method::GET, uri).build()
}

/// A `GET` request that asks for a JSON response.
#[must_use]
pub fn json_get(uri: &str) -> RequestContext {
    RequestContext::builder(Method::GET, uri)
        .header("Accept", "application/json")
        .build()
}

/// A `GET` request carrying a bearer token and asking for JSON.
#[must_use]
pub fn authenticated_get(uri: &str, token: &str) -> RequestContext {
    RequestContext::builder(Method::GET, uri)
        .header("Accept", "application/json")
        .header("Authorization", format!("Bearer {token}"))
        .build()
}

/// A `POST` request with a JSON body.
#[must_use]
pub fn post_json(uri: &str, body: &Value) -> RequestContext {
    RequestContext::builder(Method::POST, uri)
        .header("Accept", "application/json")
        .json_body(body)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_get_wants_json() {
        assert!(json_get("/").wants_json());
        assert!(!get("/").wants_json());
    }

    #[test]
    fn test_post_json_is_parseable() {
        let mut ctx = post_json("/posts", &json!({"title": "hello"}));
        assert_eq!(ctx.method(), &Method::POST);
        assert_eq!(ctx.input("title"), Some(json!("hello")));
    }
}
