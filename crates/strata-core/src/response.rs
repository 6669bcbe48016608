//! The outbound response container.
//!
//! A [`Response`] is created by the terminal handler or by a unit that
//! short-circuits, and may be mutated by every unit on the way back out.
//! Once the executor hands it to the caller it is only ever read.

use crate::error::PipelineError;
use crate::headers::HeaderBag;
use bytes::Bytes;
use http::StatusCode;
use serde::Serialize;

/// Lowest status code the pipeline will send.
pub const MIN_STATUS: u16 = 100;

/// Highest status code the pipeline will send.
pub const MAX_STATUS: u16 = 599;

/// Response payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Body {
    /// No body.
    #[default]
    Empty,
    /// Raw bytes.
    Bytes(Bytes),
    /// UTF-8 text.
    Text(String),
    /// A JSON document.
    Json(serde_json::Value),
}

impl Body {
    /// Serializes the body to bytes for the transport.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        match self {
            Self::Empty => Bytes::new(),
            Self::Bytes(bytes) => bytes.clone(),
            Self::Text(text) => Bytes::from(text.clone()),
            Self::Json(value) => Bytes::from(value.to_string()),
        }
    }

    /// Returns `true` for [`Body::Empty`].
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

/// Coarse classification of the response payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentClass {
    /// No payload.
    Empty,
    /// Text payload.
    Text,
    /// JSON payload.
    Json,
    /// Opaque bytes.
    Binary,
}

/// Errors raised by [`Response`] constructors and validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResponseError {
    /// Status code outside `[100, 599]`.
    #[error("invalid status code {0}: must be between {MIN_STATUS} and {MAX_STATUS}")]
    InvalidStatus(u16),
}

/// An outbound response.
///
/// # Example
///
/// ```
/// use strata_core::Response;
/// use http::StatusCode;
///
/// let response = Response::text(StatusCode::OK, "hello")
///     .with_header("X-Served-By", "strata");
///
/// assert_eq!(response.status(), StatusCode::OK);
/// assert_eq!(response.header("x-served-by"), Some("strata"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    status: StatusCode,
    headers: HeaderBag,
    body: Body,
}

impl Response {
    /// Creates an empty response with the given status.
    #[must_use]
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderBag::new(),
            body: Body::Empty,
        }
    }

    /// Creates an empty `200 OK` response.
    #[must_use]
    pub fn ok() -> Self {
        Self::new(StatusCode::OK)
    }

    /// Creates an empty `204 No Content` response.
    #[must_use]
    pub fn no_content() -> Self {
        Self::new(StatusCode::NO_CONTENT)
    }

    /// Creates a response from a raw status code.
    ///
    /// # Errors
    ///
    /// Returns [`ResponseError::InvalidStatus`] for codes outside `[100, 599]`.
    pub fn with_status(code: u16) -> Result<Self, ResponseError> {
        if !(MIN_STATUS..=MAX_STATUS).contains(&code) {
            return Err(ResponseError::InvalidStatus(code));
        }
        StatusCode::from_u16(code)
            .map(Self::new)
            .map_err(|_| ResponseError::InvalidStatus(code))
    }

    /// Creates a `text/plain` response.
    #[must_use]
    pub fn text(status: StatusCode, text: impl Into<String>) -> Self {
        Self::new(status)
            .with_header(http::header::CONTENT_TYPE.as_str(), "text/plain; charset=utf-8")
            .with_body(Body::Text(text.into()))
    }

    /// Creates an `application/json` response from a serializable value.
    ///
    /// Values that fail to serialize produce a JSON `null` body.
    #[must_use]
    pub fn json<T: Serialize>(status: StatusCode, value: &T) -> Self {
        let value = serde_json::to_value(value).unwrap_or_else(|error| {
            tracing::warn!(%error, "response body failed to serialize");
            serde_json::Value::Null
        });
        Self::new(status)
            .with_header(http::header::CONTENT_TYPE.as_str(), "application/json")
            .with_body(Body::Json(value))
    }

    /// Creates a `302 Found` redirect.
    #[must_use]
    pub fn redirect(location: impl Into<String>) -> Self {
        Self::new(StatusCode::FOUND).with_header(http::header::LOCATION.as_str(), location)
    }

    /// Creates the JSON error envelope response for `error`.
    #[must_use]
    pub fn error_envelope(error: &PipelineError, request_id: Option<&str>, expose_internal: bool) -> Self {
        let mut response = Self::json(
            error.status_code(),
            &error.to_envelope(request_id, expose_internal),
        );
        if let PipelineError::RateLimited {
            retry_after_seconds: Some(seconds),
            ..
        } = error
        {
            response.headers.insert(http::header::RETRY_AFTER.as_str(), seconds.to_string());
        }
        response
    }

    /// Returns a copy with a header appended.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Returns a copy with the body replaced.
    #[must_use]
    pub fn with_body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    /// Returns the status code.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Replaces the status code.
    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    /// Returns the headers.
    #[must_use]
    pub const fn headers(&self) -> &HeaderBag {
        &self.headers
    }

    /// Returns the headers for modification.
    pub fn headers_mut(&mut self) -> &mut HeaderBag {
        &mut self.headers
    }

    /// Returns the first value of a header.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Returns the body.
    #[must_use]
    pub const fn body(&self) -> &Body {
        &self.body
    }

    /// Replaces the body.
    pub fn set_body(&mut self, body: Body) {
        self.body = body;
    }

    /// Returns the serialized body.
    #[must_use]
    pub fn body_bytes(&self) -> Bytes {
        self.body.to_bytes()
    }

    /// Returns `true` for a 3xx response carrying a `Location` header.
    #[must_use]
    pub fn is_redirect(&self) -> bool {
        self.status.is_redirection() && self.headers.contains(http::header::LOCATION.as_str())
    }

    /// Classifies the payload.
    #[must_use]
    pub fn content_class(&self) -> ContentClass {
        match &self.body {
            Body::Empty => ContentClass::Empty,
            Body::Text(_) => ContentClass::Text,
            Body::Json(_) => ContentClass::Json,
            Body::Bytes(_) => ContentClass::Binary,
        }
    }

    /// Checks the response can be sent.
    ///
    /// # Errors
    ///
    /// Returns [`ResponseError::InvalidStatus`] when the status is outside
    /// `[100, 599]`.
    pub fn validate(&self) -> Result<(), ResponseError> {
        let code = self.status.as_u16();
        if (MIN_STATUS..=MAX_STATUS).contains(&code) {
            Ok(())
        } else {
            Err(ResponseError::InvalidStatus(code))
        }
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::ok()
    }
}
