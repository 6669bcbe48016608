//! Request context types.
//!
//! The [`RequestContext`] carries the inbound request and all per-request
//! state through the middleware pipeline and into the terminal handler.
//!
//! The request identity (method, path, headers, query, raw body) is fixed
//! when the context is built. Only the attribute map, typed extensions and
//! merged input can change afterwards, and because the executor
//! threads a single `&mut RequestContext` through every unit, a write made
//! by one unit is visible to every unit that runs after it, on the way in
//! and on the way out.

use crate::error::PipelineError;
use crate::headers::HeaderBag;
use bytes::Bytes;
use http::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// A unique identifier for each request, using UUID v7.
///
/// UUID v7 is time-ordered, which makes it ideal for request tracking
/// and log correlation.
///
/// # Example
///
/// ```
/// use strata_core::RequestId;
///
/// let id = RequestId::new();
/// assert_eq!(id.to_string().len(), 36);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Creates a new unique request ID using UUID v7.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `RequestId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Parses a request ID from its hyphenated string form.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value).ok().map(Self)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RequestId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Per-request context that flows through the middleware pipeline.
///
/// # Example
///
/// ```
/// use strata_core::RequestContext;
/// use http::Method;
///
/// let mut ctx = RequestContext::builder(Method::GET, "/posts?page=2")
///     .header("Accept", "application/json")
///     .build();
///
/// assert_eq!(ctx.path(), "/posts");
/// assert_eq!(ctx.query("page"), Some("2"));
/// assert!(ctx.wants_json());
///
/// ctx.set_attribute("user", serde_json::json!({"id": 1}));
/// assert_eq!(ctx.attribute("user").unwrap()["id"], 1);
/// ```
#[derive(Debug)]
pub struct RequestContext {
    request_id: RequestId,
    method: Method,
    path: String,
    headers: HeaderBag,
    query: Vec<(String, String)>,
    body: Bytes,

    /// Lazily parsed body (JSON or form).
    parsed: Option<Value>,

    /// Values written by middleware; shadow the body and query.
    merged: serde_json::Map<String, Value>,

    /// Name-keyed attributes shared between units and the handler.
    attributes: HashMap<String, Value>,

    /// Type-erased extension data.
    extensions: HashMap<TypeId, Box<dyn Any + Send + Sync>>,

    started_at: Instant,
}

impl RequestContext {
    /// Starts building a context for `method` and `uri`.
    ///
    /// `uri` is a path with an optional query string (`/users?page=2`).
    #[must_use]
    pub fn builder(method: Method, uri: &str) -> RequestContextBuilder {
        RequestContextBuilder::new(method, uri)
    }

    /// Creates a bare `GET /` context for testing purposes.
    #[must_use]
    pub fn mock() -> Self {
        Self::builder(Method::GET, "/").build()
    }

    /// Returns the request ID.
    #[must_use]
    pub const fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Replaces the request ID, e.g. with one propagated by an upstream service.
    pub fn set_request_id(&mut self, request_id: RequestId) {
        self.request_id = request_id;
    }

    /// Returns the request method.
    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    /// Returns `true` if the request method matches `method` (case-insensitive).
    #[must_use]
    pub fn is_method(&self, method: &str) -> bool {
        self.method.as_str().eq_ignore_ascii_case(method)
    }

    /// Returns the request path without the query string.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Matches the path against a pattern where `*` matches any run of
    /// characters. Leading slashes are ignored on both sides.
    ///
    /// ```
    /// use strata_core::RequestContext;
    /// use http::Method;
    ///
    /// let ctx = RequestContext::builder(Method::GET, "/admin/users/7").build();
    /// assert!(ctx.path_is("admin/*"));
    /// assert!(!ctx.path_is("api/*"));
    /// ```
    #[must_use]
    pub fn path_is(&self, pattern: &str) -> bool {
        let pattern = pattern.trim_start_matches('/');
        let path = self.path.trim_start_matches('/');
        if pattern == path {
            return true;
        }
        if !pattern.contains('*') {
            return false;
        }

        let expression = format!(
            "^{}$",
            regex::escape(pattern).replace(r"\*", ".*")
        );
        regex::Regex::new(&expression).is_ok_and(|re| re.is_match(path))
    }

    /// Returns all request headers.
    #[must_use]
    pub const fn headers(&self) -> &HeaderBag {
        &self.headers
    }

    /// Returns the first value of a header.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Returns the first value of a header, or `default` when absent.
    #[must_use]
    pub fn header_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.headers.get(name).unwrap_or(default)
    }

    /// Returns every value of a header.
    #[must_use]
    pub fn header_all(&self, name: &str) -> Vec<&str> {
        self.headers.get_all(name)
    }

    /// Returns `true` if the header is present.
    #[must_use]
    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains(name)
    }

    /// Returns the token from an `Authorization: Bearer <token>` header.
    #[must_use]
    pub fn bearer_token(&self) -> Option<&str> {
        let value = self.header(http::header::AUTHORIZATION.as_str())?;
        let (scheme, token) = value.split_once(' ')?;
        let token = token.trim();
        (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
    }

    /// Returns `true` if the request body is declared as JSON.
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.header(http::header::CONTENT_TYPE.as_str())
            .is_some_and(|value| value.contains("/json") || value.contains("+json"))
    }

    /// Returns `true` if the client asked for a JSON response.
    #[must_use]
    pub fn wants_json(&self) -> bool {
        self.header(http::header::ACCEPT.as_str())
            .is_some_and(|value| value.contains("/json") || value.contains("+json"))
    }

    /// Returns the first query value for `key`.
    #[must_use]
    pub fn query(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    /// Returns every query value for `key`.
    #[must_use]
    pub fn query_all(&self, key: &str) -> Vec<&str> {
        self.query
            .iter()
            .filter(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
            .collect()
    }

    /// Returns the raw request body.
    #[must_use]
    pub const fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns `true` if the request body is declared as an HTML form.
    #[must_use]
    pub fn is_form(&self) -> bool {
        self.header(http::header::CONTENT_TYPE.as_str())
            .is_some_and(|value| value.starts_with("application/x-www-form-urlencoded"))
    }

    /// Returns the parsed request body, parsing and caching it on first use.
    ///
    /// Form bodies decode into an object of strings (a repeated field
    /// becomes an array); any other body is parsed as JSON. An empty body
    /// parses as an empty object. Values written with
    /// [`merge_input`](Self::merge_input) are not part of the result.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the body does not decode.
    pub fn parsed_input(&mut self) -> Result<&Value, PipelineError> {
        let value = match self.parsed.take() {
            Some(value) => value,
            None if self.body.is_empty() => Value::Object(serde_json::Map::new()),
            None if self.is_form() => decode_form(&self.body)?,
            None => serde_json::from_slice(&self.body)
                .map_err(|error| PipelineError::validation(format!("malformed JSON body: {error}")))?,
        };
        Ok(&*self.parsed.insert(value))
    }

    /// Looks up an input value by key.
    ///
    /// Merged values win, then the parsed body (dot notation walks nested
    /// objects and array indices), then the query string. A body that does
    /// not decode is treated as having no fields.
    pub fn input(&mut self, key: &str) -> Option<Value> {
        if let Some(value) = self.merged.get(key) {
            return Some(value.clone());
        }

        let from_body = self
            .parsed_input()
            .ok()
            .and_then(|root| lookup_path(root, key))
            .cloned();

        from_body.or_else(|| self.query(key).map(|value| Value::String(value.to_string())))
    }

    /// Looks up an input value, falling back to `default`.
    pub fn input_or(&mut self, key: &str, default: impl Into<Value>) -> Value {
        self.input(key).unwrap_or_else(|| default.into())
    }

    /// Returns `true` if an input value exists for `key`.
    pub fn has_input(&mut self, key: &str) -> bool {
        self.input(key).is_some()
    }

    /// Overrides a top-level input value for later [`input`](Self::input)
    /// lookups.
    ///
    /// The raw body and [`parsed_input`](Self::parsed_input) are untouched,
    /// so a malformed body still reports its error.
    pub fn merge_input(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.merged.insert(key.into(), value.into());
    }

    /// Returns an attribute by name.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Deserializes an attribute into `T`.
    ///
    /// Returns `None` if the attribute is missing or has a different shape.
    #[must_use]
    pub fn attribute_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.attributes
            .get(key)
            .and_then(|value| T::deserialize(value).ok())
    }

    /// Sets an attribute, returning the previous value.
    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.attributes.insert(key.into(), value.into())
    }

    /// Removes an attribute.
    pub fn remove_attribute(&mut self, key: &str) -> Option<Value> {
        self.attributes.remove(key)
    }

    /// Returns `true` if the attribute is set.
    #[must_use]
    pub fn has_attribute(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }

    /// Stores a typed extension value.
    pub fn set_extension<T: Send + Sync + 'static>(&mut self, value: T) {
        self.extensions.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Retrieves a typed extension value.
    #[must_use]
    pub fn get_extension<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref())
    }

    /// Removes and returns a typed extension value.
    pub fn remove_extension<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.extensions
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast().ok())
            .map(|b| *b)
    }

    /// Checks if an extension of the given type exists.
    #[must_use]
    pub fn has_extension<T: Send + Sync + 'static>(&self) -> bool {
        self.extensions.contains_key(&TypeId::of::<T>())
    }

    /// Returns when the request started processing.
    #[must_use]
    pub const fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Returns the elapsed time since the request started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

fn lookup_path<'a>(root: &'a Value, key: &str) -> Option<&'a Value> {
    if let Some(direct) = root.get(key) {
        return Some(direct);
    }

    key.split('.').try_fold(root, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Builder for [`RequestContext`].
#[derive(Debug)]
pub struct RequestContextBuilder {
    request_id: Option<RequestId>,
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    headers: HeaderBag,
    body: Bytes,
}

impl RequestContextBuilder {
    fn new(method: Method, uri: &str) -> Self {
        let (path, query) = match uri.split_once('?') {
            Some((path, query)) => (path, parse_query(query)),
            None => (uri, Vec::new()),
        };
        let path = if path.is_empty() { "/" } else { path };

        Self {
            request_id: None,
            method,
            path: path.to_string(),
            query,
            headers: HeaderBag::new(),
            body: Bytes::new(),
        }
    }

    /// Uses a specific request ID instead of generating one.
    #[must_use]
    pub fn request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// Appends a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Replaces all headers.
    #[must_use]
    pub fn headers(mut self, headers: HeaderBag) -> Self {
        self.headers = headers;
        self
    }

    /// Sets the raw body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Sets a JSON body and the matching content type.
    #[must_use]
    pub fn json_body(mut self, value: &Value) -> Self {
        self.body = Bytes::from(value.to_string());
        self.headers.insert(http::header::CONTENT_TYPE.as_str(), "application/json");
        self
    }

    /// Finishes the context.
    #[must_use]
    pub fn build(self) -> RequestContext {
        RequestContext {
            request_id: self.request_id.unwrap_or_default(),
            method: self.method,
            path: self.path,
            headers: self.headers,
            query: self.query,
            body: self.body,
            parsed: None,
            merged: serde_json::Map::new(),
            attributes: HashMap::new(),
            extensions: HashMap::new(),
            started_at: Instant::now(),
        }
    }
}

impl From<http::Request<Bytes>> for RequestContext {
    fn from(request: http::Request<Bytes>) -> Self {
        let (parts, body) = request.into_parts();
        let uri = parts
            .uri
            .path_and_query()
            .map_or_else(|| parts.uri.path().to_string(), ToString::to_string);

        RequestContext::builder(parts.method, &uri)
            .headers(HeaderBag::from(&parts.headers))
            .body(body)
            .build()
    }
}

fn decode_form(body: &[u8]) -> Result<Value, PipelineError> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(body)
        .map_err(|error| PipelineError::validation(format!("malformed form body: {error}")))?;

    let mut fields = serde_json::Map::new();
    for (name, value) in pairs {
        match fields.get_mut(&name) {
            Some(Value::Array(values)) => values.push(Value::String(value)),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, Value::String(value)]);
            }
            None => {
                fields.insert(name, Value::String(value));
            }
        }
    }
    Ok(Value::Object(fields))
}

fn parse_query(query: &str) -> Vec<(String, String)> {
    serde_urlencoded::from_str::<Vec<(String, String)>>(query).unwrap_or_else(|error| {
        tracing::debug!(%error, "ignoring malformed query string");
        Vec::new()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_id_new_generates_unique_ids() {
        let id1 = RequestId::new();
        let id2 = RequestId::new();
        assert_ne!(id1, id2, "Each RequestId should be unique");
    }

    #[test]
    fn test_request_id_parse() {
        let id = RequestId::new();
        assert_eq!(RequestId::parse(&id.to_string()), Some(id));
        assert_eq!(RequestId::parse("not-a-uuid"), None);
    }

    #[test]
    fn test_builder_splits_query() {
        let ctx = RequestContext::builder(Method::GET, "/search?q=rust+lang&tag=a&tag=b").build();

        assert_eq!(ctx.path(), "/search");
        assert_eq!(ctx.query("q"), Some("rust lang"));
        assert_eq!(ctx.query_all("tag"), vec!["a", "b"]);
        assert_eq!(ctx.query("missing"), None);
    }

    #[test]
    fn test_header_accessors() {
        let ctx = RequestContext::builder(Method::GET, "/")
            .header("X-Forwarded-For", "10.0.0.1")
            .header("x-forwarded-for", "10.0.0.2")
            .build();

        assert!(ctx.has_header("X-FORWARDED-FOR"));
        assert_eq!(ctx.header("x-forwarded-for"), Some("10.0.0.1"));
        assert_eq!(ctx.header_all("X-Forwarded-For"), vec!["10.0.0.1", "10.0.0.2"]);
        assert_eq!(ctx.header_or("x-missing", "fallback"), "fallback");
    }

    #[test]
    fn test_bearer_token() {
        let ctx = RequestContext::builder(Method::GET, "/")
            .header("Authorization", "Bearer abc.def")
            .build();
        assert_eq!(ctx.bearer_token(), Some("abc.def"));

        let basic = RequestContext::builder(Method::GET, "/")
            .header("Authorization", "Basic Zm9vOmJhcg==")
            .build();
        assert_eq!(basic.bearer_token(), None);
    }

    #[test]
    fn test_input_prefers_body_then_query() {
        let mut ctx = RequestContext::builder(Method::POST, "/users?name=query&page=3")
            .json_body(&json!({"name": "body", "address": {"city": "Oslo"}, "tags": ["x", "y"]}))
            .build();

        assert!(ctx.is_json());
        assert_eq!(ctx.input("name"), Some(json!("body")));
        assert_eq!(ctx.input("page"), Some(json!("3")));
        assert_eq!(ctx.input("address.city"), Some(json!("Oslo")));
        assert_eq!(ctx.input("tags.1"), Some(json!("y")));
        assert_eq!(ctx.input_or("missing", "dflt"), json!("dflt"));
        assert!(!ctx.has_input("address.zip"));
    }

    #[test]
    fn test_form_body_fields_are_inputs() {
        let mut ctx = RequestContext::builder(Method::POST, "/users?page=2")
            .header("Content-Type", "application/x-www-form-urlencoded; charset=utf-8")
            .body("name=ada&role=admin&tag=a&tag=b")
            .build();

        assert!(ctx.is_form());
        assert_eq!(ctx.input("name"), Some(json!("ada")));
        assert_eq!(ctx.input("role"), Some(json!("admin")));
        assert_eq!(ctx.input("tag"), Some(json!(["a", "b"])));
        assert_eq!(ctx.input("page"), Some(json!("2")));
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        let mut ctx = RequestContext::builder(Method::POST, "/")
            .header("Content-Type", "application/json")
            .body("{not json")
            .build();

        assert!(ctx.parsed_input().is_err());
        assert_eq!(ctx.input("anything"), None);
    }

    #[test]
    fn test_merge_input_is_visible_to_later_lookups() {
        let mut ctx = RequestContext::builder(Method::POST, "/")
            .json_body(&json!({"email": " A@B.COM "}))
            .build();

        ctx.merge_input("email", "a@b.com");
        assert_eq!(ctx.input("email"), Some(json!("a@b.com")));
        assert_eq!(ctx.body(), &Bytes::from(r#"{"email":" A@B.COM "}"#));
    }

    #[test]
    fn test_merge_input_keeps_malformed_body_error() {
        let mut ctx = RequestContext::builder(Method::POST, "/")
            .header("Content-Type", "application/json")
            .body("{not json")
            .build();

        ctx.merge_input("trimmed", "x");
        assert_eq!(ctx.input("trimmed"), Some(json!("x")));
        assert!(ctx.parsed_input().is_err());
        assert!(ctx.parsed_input().is_err());
    }

    #[test]
    fn test_attributes() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct User {
            id: u64,
        }

        let mut ctx = RequestContext::mock();
        assert!(!ctx.has_attribute("user"));

        ctx.set_attribute("user", json!({"id": 42}));
        assert_eq!(ctx.attribute_as::<User>("user"), Some(User { id: 42 }));
        assert_eq!(ctx.attribute_as::<String>("user"), None);

        assert_eq!(ctx.remove_attribute("user"), Some(json!({"id": 42})));
        assert!(ctx.attribute("user").is_none());
    }

    #[test]
    fn test_extensions() {
        #[derive(Debug, Clone, PartialEq)]
        struct MyExtension {
            value: i32,
        }

        let mut ctx = RequestContext::mock();
        assert!(!ctx.has_extension::<MyExtension>());

        ctx.set_extension(MyExtension { value: 42 });
        assert_eq!(ctx.get_extension::<MyExtension>(), Some(&MyExtension { value: 42 }));

        let removed = ctx.remove_extension::<MyExtension>();
        assert_eq!(removed, Some(MyExtension { value: 42 }));
        assert!(!ctx.has_extension::<MyExtension>());
    }

    #[test]
    fn test_path_is_wildcards() {
        let ctx = RequestContext::builder(Method::GET, "/admin/users/7").build();
        assert!(ctx.path_is("/admin/users/7"));
        assert!(ctx.path_is("admin/*"));
        assert!(ctx.path_is("*/users/*"));
        assert!(!ctx.path_is("admin"));
        assert!(ctx.is_method("get"));
    }

    #[test]
    fn test_from_http_request() {
        let request = http::Request::builder()
            .method(Method::PUT)
            .uri("http://example.com/items/1?force=true")
            .header("Accept", "application/json")
            .body(Bytes::from_static(b"{}"))
            .unwrap();

        let ctx = RequestContext::from(request);
        assert_eq!(ctx.method(), &Method::PUT);
        assert_eq!(ctx.path(), "/items/1");
        assert_eq!(ctx.query("force"), Some("true"));
        assert!(ctx.wants_json());
    }

    #[test]
    fn test_request_context_elapsed() {
        let ctx = RequestContext::mock();
        std::thread::sleep(Duration::from_millis(10));
        assert!(ctx.elapsed() >= Duration::from_millis(10));
    }
}
