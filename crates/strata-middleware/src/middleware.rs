//! The unit trait, continuations and terminal handlers.
//!
//! A [`Middleware`] wraps everything after it in the sequence. It receives
//! the request context, a [`Next`] continuation and the parameters it was
//! declared with, and decides whether deeper layers run at all:
//!
//! - **before** logic runs ahead of `next.run(ctx)`
//! - **after** logic inspects or modifies the response `next.run` returned
//! - a **short-circuit** returns a response without calling `next.run`
//!
//! # Example
//!
//! ```
//! use strata_core::{PipelineResult, RequestContext, Response};
//! use strata_middleware::{BoxFuture, Middleware, Next};
//!
//! struct Served;
//!
//! impl Middleware for Served {
//!     fn name(&self) -> &'static str {
//!         "served"
//!     }
//!
//!     fn handle<'a>(
//!         &'a self,
//!         ctx: &'a mut RequestContext,
//!         next: Next<'a>,
//!         params: &'a [String],
//!     ) -> BoxFuture<'a, PipelineResult<Response>> {
//!         Box::pin(async move {
//!             let by = params.first().map_or("strata", String::as_str);
//!             let response = next.run(ctx).await?;
//!             Ok(response.with_header("x-served-by", by))
//!         })
//!     }
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use strata_core::{PipelineError, PipelineResult, RequestContext, Response};

use crate::cancel::CancelSignal;
use crate::sequence::SequenceEntry;

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A middleware unit.
///
/// Units are registered once and shared by every sequence and request, so
/// any state they hold must be synchronized. Per-request data belongs in the
/// [`RequestContext`].
///
/// # Contract
///
/// - An `Err` from `next.run` should be returned (or converted to a
///   response) rather than swallowed silently.
/// - `next` is consumed by [`Next::run`], so it can be invoked at most once.
pub trait Middleware: Send + Sync + 'static {
    /// Name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Processes the request, usually by awaiting `next.run(ctx)`.
    fn handle<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        next: Next<'a>,
        params: &'a [String],
    ) -> BoxFuture<'a, PipelineResult<Response>>;

    /// Post-send hook.
    ///
    /// Called after the final response has been handed to the transport.
    /// Returning `None` means the unit has no hook. Errors are logged and
    /// counted but never reach the client.
    fn terminate<'a>(
        &'a self,
        _ctx: &'a RequestContext,
        _response: &'a Response,
        _params: &'a [String],
    ) -> Option<BoxFuture<'a, PipelineResult<()>>> {
        None
    }

    /// Units that return `true` keep every occurrence in a sequence instead
    /// of being de-duplicated.
    fn repeatable(&self) -> bool {
        false
    }

    /// Checks declared parameters when a sequence is built.
    ///
    /// # Errors
    ///
    /// Returns a reason when the parameters can never be valid for this unit.
    fn validate_params(&self, _params: &[String]) -> Result<(), String> {
        Ok(())
    }
}

/// How far one execution got. Shared by every continuation of that execution.
#[derive(Debug, Default)]
pub(crate) struct Progress {
    entered: AtomicUsize,
    /// One past the deepest unit that returned `Err`.
    raised: AtomicUsize,
    handler_reached: AtomicBool,
    cancelled: AtomicBool,
    cancel: Option<CancelSignal>,
}

impl Progress {
    pub(crate) fn new(cancel: Option<CancelSignal>) -> Self {
        Self {
            cancel,
            ..Self::default()
        }
    }

    fn check_cancel(&self, stage: &str) -> PipelineResult<()> {
        match &self.cancel {
            Some(signal) if signal.is_cancelled() => {
                self.cancelled.store(true, Ordering::Release);
                tracing::debug!(stage, "skipping remaining pipeline after cancellation");
                Err(PipelineError::cancelled(stage))
            }
            _ => Ok(()),
        }
    }

    fn enter(&self, stage: &str, index: usize) -> PipelineResult<()> {
        self.check_cancel(stage)?;
        self.entered.fetch_max(index + 1, Ordering::AcqRel);
        Ok(())
    }

    fn enter_handler(&self) -> PipelineResult<()> {
        self.check_cancel("handler")?;
        self.handler_reached.store(true, Ordering::Release);
        Ok(())
    }

    fn record_raised(&self, index: usize) {
        self.raised.fetch_max(index + 1, Ordering::AcqRel);
    }

    /// The deepest entered unit answered with `Ok` without running its
    /// continuation.
    pub(crate) fn short_circuited_at(&self) -> Option<usize> {
        let entered = self.entered();
        let deepest_ok = entered > 0 && self.raised.load(Ordering::Acquire) < entered;
        (deepest_ok && !self.handler_reached() && !self.was_cancelled()).then(|| entered - 1)
    }

    /// Number of leading units whose `handle` was entered.
    pub(crate) fn entered(&self) -> usize {
        self.entered.load(Ordering::Acquire)
    }

    pub(crate) fn handler_reached(&self) -> bool {
        self.handler_reached.load(Ordering::Acquire)
    }

    pub(crate) fn was_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// The rest of the pipeline after the current unit.
///
/// Built by the executor for each position in the sequence. Consumed by
/// [`Next::run`], so a unit can call it at most once.
pub struct Next<'a> {
    inner: NextInner<'a>,
}

enum NextInner<'a> {
    Unit {
        entry: &'a SequenceEntry,
        index: usize,
        progress: &'a Progress,
        next: Box<Next<'a>>,
    },
    Endpoint {
        endpoint: &'a dyn Endpoint,
        progress: &'a Progress,
    },
}

impl<'a> Next<'a> {
    pub(crate) fn unit(entry: &'a SequenceEntry, index: usize, progress: &'a Progress, next: Self) -> Self {
        Self {
            inner: NextInner::Unit {
                entry,
                index,
                progress,
                next: Box::new(next),
            },
        }
    }

    pub(crate) fn endpoint(endpoint: &'a dyn Endpoint, progress: &'a Progress) -> Self {
        Self {
            inner: NextInner::Endpoint { endpoint, progress },
        }
    }

    /// Runs the next unit, or the terminal handler after the last unit.
    ///
    /// # Errors
    ///
    /// Returns whatever error a deeper layer raised, or
    /// [`PipelineError::Cancelled`] if the execution was cancelled before the
    /// next layer started.
    pub async fn run(self, ctx: &mut RequestContext) -> PipelineResult<Response> {
        match self.inner {
            NextInner::Unit {
                entry,
                index,
                progress,
                next,
            } => {
                progress.enter(entry.id(), index)?;
                tracing::trace!(unit = entry.id(), index, "entering unit");
                let result = entry.unit().handle(ctx, *next, entry.params()).await;
                if result.is_err() {
                    progress.record_raised(index);
                }
                result
            }
            NextInner::Endpoint { endpoint, progress } => {
                progress.enter_handler()?;
                tracing::trace!("entering terminal handler");
                endpoint.call(ctx).await
            }
        }
    }
}

impl std::fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            NextInner::Unit { entry, index, .. } => f
                .debug_struct("Next")
                .field("unit", &entry.id())
                .field("index", index)
                .finish(),
            NextInner::Endpoint { .. } => f.debug_struct("Next").field("unit", &"handler").finish(),
        }
    }
}

/// The terminal handler at the end of a sequence.
pub trait Endpoint: Send + Sync {
    /// Produces the response for the request.
    fn call<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, PipelineResult<Response>>;
}

/// An [`Endpoint`] backed by a closure. Created by [`endpoint_fn`].
pub struct FnEndpoint<F> {
    func: F,
}

/// Wraps a closure as a terminal handler.
///
/// ```
/// use strata_core::Response;
/// use strata_middleware::endpoint_fn;
///
/// let handler = endpoint_fn(|ctx| {
///     Box::pin(async move {
///         let user = ctx.attribute("user").cloned();
///         Ok(Response::json(http::StatusCode::OK, &user))
///     })
/// });
/// # let _ = handler;
/// ```
pub fn endpoint_fn<F>(func: F) -> FnEndpoint<F>
where
    F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, PipelineResult<Response>> + Send + Sync,
{
    FnEndpoint { func }
}

impl<F> Endpoint for FnEndpoint<F>
where
    F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, PipelineResult<Response>> + Send + Sync,
{
    fn call<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, PipelineResult<Response>> {
        (self.func)(ctx)
    }
}

type TerminateFn = dyn for<'a> Fn(&'a RequestContext, &'a Response, &'a [String]) -> BoxFuture<'a, PipelineResult<()>>
    + Send
    + Sync;

/// A unit built from closures.
///
/// ```
/// use strata_middleware::FnMiddleware;
///
/// let timing = FnMiddleware::new("timing", |ctx, next, _params| {
///     Box::pin(async move {
///         let response = next.run(ctx).await?;
///         let elapsed = ctx.elapsed().as_millis().to_string();
///         Ok(response.with_header("x-elapsed-ms", elapsed))
///     })
/// })
/// .with_terminate(|ctx, _response, _params| {
///     Box::pin(async move {
///         tracing::info!(request_id = %ctx.request_id(), "exchange finished");
///         Ok(())
///     })
/// });
/// # let _ = timing;
/// ```
pub struct FnMiddleware<F> {
    name: &'static str,
    func: F,
    terminate: Option<Box<TerminateFn>>,
    repeatable: bool,
}

impl<F> FnMiddleware<F> {
    /// Creates a unit from a `handle` closure.
    pub fn new(name: &'static str, func: F) -> Self
    where
        F: for<'a> Fn(&'a mut RequestContext, Next<'a>, &'a [String]) -> BoxFuture<'a, PipelineResult<Response>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name,
            func,
            terminate: None,
            repeatable: false,
        }
    }

    /// Adds a terminate hook.
    #[must_use]
    pub fn with_terminate<T>(mut self, hook: T) -> Self
    where
        T: for<'a> Fn(&'a RequestContext, &'a Response, &'a [String]) -> BoxFuture<'a, PipelineResult<()>>
            + Send
            + Sync
            + 'static,
    {
        self.terminate = Some(Box::new(hook));
        self
    }

    /// Opts the unit out of de-duplication.
    #[must_use]
    pub fn allow_repeats(mut self) -> Self {
        self.repeatable = true;
        self
    }
}

impl<F> Middleware for FnMiddleware<F>
where
    F: for<'a> Fn(&'a mut RequestContext, Next<'a>, &'a [String]) -> BoxFuture<'a, PipelineResult<Response>>
        + Send
        + Sync
        + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn handle<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        next: Next<'a>,
        params: &'a [String],
    ) -> BoxFuture<'a, PipelineResult<Response>> {
        (self.func)(ctx, next, params)
    }

    fn terminate<'a>(
        &'a self,
        ctx: &'a RequestContext,
        response: &'a Response,
        params: &'a [String],
    ) -> Option<BoxFuture<'a, PipelineResult<()>>> {
        self.terminate.as_ref().map(|hook| hook(ctx, response, params))
    }

    fn repeatable(&self) -> bool {
        self.repeatable
    }
}

impl<F> std::fmt::Debug for FnMiddleware<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnMiddleware")
            .field("name", &self.name)
            .field("has_terminate", &self.terminate.is_some())
            .field("repeatable", &self.repeatable)
            .finish()
    }
}
