//! # Strata Core
//!
//! Core types shared by every Strata crate.
//!
//! - [`RequestContext`] - The inbound request plus per-request attributes
//! - [`RequestId`] - UUID v7 request identifier
//! - [`Response`] - The outbound response container
//! - [`HeaderBag`] - Ordered, case-insensitive, multi-valued headers
//! - [`PipelineError`] - Runtime failures raised by units and handlers

#![doc(html_root_url = "https://docs.rs/strata-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod context;
mod error;
pub mod fixtures;
mod headers;
mod response;

pub use context::{RequestContext, RequestContextBuilder, RequestId};
pub use error::{ErrorCategory, ErrorDetail, ErrorEnvelope, PipelineError, PipelineResult};
pub use headers::HeaderBag;
pub use response::{Body, ContentClass, Response, ResponseError, MAX_STATUS, MIN_STATUS};
