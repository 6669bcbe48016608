//! Request ID propagation.
//!
//! Every context already carries a fresh UUID v7 [`RequestId`]. This unit
//! optionally adopts a trusted `x-request-id` header instead, and stamps the
//! ID used on the response so clients can correlate it with server logs.

use strata_core::{PipelineResult, RequestContext, RequestId, Response};

use crate::middleware::{BoxFuture, Middleware, Next};

/// The header name for request ID propagation.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Propagates or generates request IDs.
///
/// # Example
///
/// ```
/// use strata_middleware::stages::RequestIdMiddleware;
///
/// // Behind a gateway that already assigns IDs:
/// let unit = RequestIdMiddleware::trust_incoming();
/// # let _ = unit;
/// ```
#[derive(Debug, Clone, Default)]
pub struct RequestIdMiddleware {
    /// Adopt a valid incoming `x-request-id` instead of the generated one.
    ///
    /// Leave off for traffic from untrusted clients.
    trust_incoming: bool,
}

impl RequestIdMiddleware {
    /// Always uses the ID generated for the context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopts valid incoming `x-request-id` headers.
    #[must_use]
    pub const fn trust_incoming() -> Self {
        Self { trust_incoming: true }
    }

    fn incoming(&self, ctx: &RequestContext) -> Option<RequestId> {
        if !self.trust_incoming {
            return None;
        }
        ctx.header(REQUEST_ID_HEADER).and_then(RequestId::parse)
    }
}

impl Middleware for RequestIdMiddleware {
    fn name(&self) -> &'static str {
        "request_id"
    }

    fn handle<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        next: Next<'a>,
        _params: &'a [String],
    ) -> BoxFuture<'a, PipelineResult<Response>> {
        Box::pin(async move {
            if let Some(request_id) = self.incoming(ctx) {
                ctx.set_request_id(request_id);
            }
            let request_id = ctx.request_id();

            let mut response = next.run(ctx).await?;
            response.headers_mut().insert(REQUEST_ID_HEADER, request_id.to_string());
            Ok(response)
        })
    }
}
