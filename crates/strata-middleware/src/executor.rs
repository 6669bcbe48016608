//! Sequence execution.
//!
//! An [`Executor`] threads one [`RequestContext`] through a resolved
//! [`Sequence`] and a terminal [`Endpoint`]. The chain of continuations is
//! built tail-to-head for every request, so unit *i*'s `next` runs unit
//! *i + 1*, and the last unit's `next` runs the handler.
//!
//! Execution returns a [`Completion`]: the final response plus what is
//! needed to fire terminate hooks once the caller has sent that response.
//!
//! ```text
//! request ─▶ unit 0 ─▶ unit 1 ─▶ … ─▶ handler
//!                                        │
//! response ◀─ unit 0 ◀─ unit 1 ◀─ … ◀────┘
//!     │
//!     └─ sent by the caller, then Completion::terminate()
//! ```

use std::fmt;
use std::time::Instant;

use strata_config::ExecutorConfig;
use strata_core::{PipelineError, RequestContext, Response};
use strata_telemetry::metrics::{self, InFlightGuard};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::cancel::CancelSignal;
use crate::middleware::{Endpoint, Next, Progress};
use crate::sequence::{Sequence, SequenceEntry};

/// How an execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// A response came back from the outermost unit.
    Completed,
    /// An error reached the executor and was replaced by the fallback
    /// error response.
    Failed,
    /// The cancel signal tripped before the pipeline finished.
    Cancelled,
}

impl Outcome {
    /// Lowercase label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Executor behavior switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutorOptions {
    /// Include internal error messages in fallback responses.
    pub expose_internal_errors: bool,
}

impl From<&ExecutorConfig> for ExecutorOptions {
    fn from(config: &ExecutorConfig) -> Self {
        Self {
            expose_internal_errors: config.expose_internal_errors,
        }
    }
}

/// Runs requests through one sequence.
///
/// Cheap to clone; share one per route across tasks.
///
/// # Example
///
/// ```
/// use http::StatusCode;
/// use strata_core::{fixtures, Response};
/// use strata_middleware::{endpoint_fn, Executor, Outcome, Sequence};
///
/// # tokio_test::block_on(async {
/// let executor = Executor::new(Sequence::new("health", Vec::new()));
/// let handler = endpoint_fn(|_ctx| Box::pin(async { Ok(Response::text(StatusCode::OK, "up")) }));
///
/// let completion = executor.execute(fixtures::get("/health"), &handler).await;
/// assert_eq!(completion.outcome(), Outcome::Completed);
///
/// let report = completion.terminate().await;
/// assert!(report.is_clean());
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct Executor {
    sequence: Sequence,
    options: ExecutorOptions,
}

impl Executor {
    /// Creates an executor with default options.
    #[must_use]
    pub fn new(sequence: Sequence) -> Self {
        Self {
            sequence,
            options: ExecutorOptions::default(),
        }
    }

    /// Replaces the options.
    #[must_use]
    pub const fn with_options(mut self, options: ExecutorOptions) -> Self {
        self.options = options;
        self
    }

    /// The sequence this executor runs.
    #[must_use]
    pub const fn sequence(&self) -> &Sequence {
        &self.sequence
    }

    /// The active options.
    #[must_use]
    pub const fn options(&self) -> ExecutorOptions {
        self.options
    }

    /// Runs `ctx` through the sequence and `handler`.
    ///
    /// Never fails: errors that escape the outermost unit become the
    /// fallback error response and [`Outcome::Failed`].
    pub async fn execute(&self, ctx: RequestContext, handler: &dyn Endpoint) -> Completion {
        self.execute_inner(ctx, handler, None).await
    }

    /// Like [`execute`](Self::execute), but skips the remaining forward
    /// execution once `cancel` trips.
    pub async fn execute_with_cancel(
        &self,
        ctx: RequestContext,
        handler: &dyn Endpoint,
        cancel: &CancelSignal,
    ) -> Completion {
        self.execute_inner(ctx, handler, Some(cancel.clone())).await
    }

    /// Executes and immediately fires terminate hooks.
    ///
    /// For callers without a separate send step.
    pub async fn run(&self, ctx: RequestContext, handler: &dyn Endpoint) -> (Response, TerminateReport) {
        let (response, terminator) = self.execute(ctx, handler).await.into_parts();
        let report = terminator.run(&response).await;
        (response, report)
    }

    async fn execute_inner(
        &self,
        mut ctx: RequestContext,
        handler: &dyn Endpoint,
        cancel: Option<CancelSignal>,
    ) -> Completion {
        let _in_flight = InFlightGuard::new();
        let started = Instant::now();
        let route = self.sequence.name();

        let span = tracing::info_span!(
            "pipeline",
            request_id = %ctx.request_id(),
            route = %route,
            method = %ctx.method(),
            path = %ctx.path(),
            outcome = tracing::field::Empty,
        );

        let progress = Progress::new(cancel);
        let result = {
            let mut chain = Next::endpoint(handler, &progress);
            for (index, entry) in self.sequence.entries().iter().enumerate().rev() {
                chain = Next::unit(entry, index, &progress, chain);
            }
            chain.run(&mut ctx).instrument(span.clone()).await
        };

        let entered = progress.entered();
        let request_id = ctx.request_id().to_string();
        let expose = self.options.expose_internal_errors;

        let (response, outcome, error, eligible) = if progress.was_cancelled() {
            let response = match result {
                Ok(response) => response,
                Err(err) => Response::error_envelope(&err, Some(&request_id), expose),
            };
            span.in_scope(|| tracing::info!(units_entered = entered, "pipeline cancelled"));
            (response, Outcome::Cancelled, None, entered)
        } else {
            match result {
                Ok(response) => match response.validate() {
                    Ok(()) => {
                        if let Some(index) = progress.short_circuited_at() {
                            let unit = self.sequence.entries()[index].id();
                            metrics::record_short_circuit(route, unit);
                            span.in_scope(|| tracing::debug!(unit, "unit short-circuited the pipeline"));
                        }
                        (response, Outcome::Completed, None, self.sequence.len())
                    }
                    Err(invalid) => {
                        let err = PipelineError::internal(format!("pipeline produced an unsendable response: {invalid}"));
                        span.in_scope(|| tracing::error!(error = %err, "replacing invalid response"));
                        let response = Response::error_envelope(&err, Some(&request_id), expose);
                        (response, Outcome::Failed, Some(err), entered)
                    }
                },
                Err(err) => {
                    span.in_scope(|| {
                        if err.is_internal() {
                            tracing::error!(error = %err, units_entered = entered, "pipeline failed");
                        } else {
                            tracing::warn!(error = %err, units_entered = entered, "pipeline failed");
                        }
                    });
                    let response = Response::error_envelope(&err, Some(&request_id), expose);
                    (response, Outcome::Failed, Some(err), entered)
                }
            }
        };

        let duration = started.elapsed();
        span.record("outcome", outcome.as_str());
        span.in_scope(|| {
            tracing::debug!(
                status = response.status().as_u16(),
                duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
                "pipeline finished"
            );
        });
        metrics::record_execution(route, outcome.as_str(), response.status().as_u16(), duration);

        Completion {
            response,
            outcome,
            error,
            terminator: Terminator {
                ctx,
                route: route.to_string(),
                entries: self.sequence.entries()[..eligible].to_vec(),
            },
        }
    }
}

/// The result of one execution, before terminate hooks have run.
///
/// Send [`response`](Self::response) to the client, then call
/// [`terminate`](Self::terminate) or [`spawn_terminate`](Self::spawn_terminate).
#[derive(Debug)]
pub struct Completion {
    response: Response,
    outcome: Outcome,
    error: Option<PipelineError>,
    terminator: Terminator,
}

impl Completion {
    /// The final response.
    #[must_use]
    pub const fn response(&self) -> &Response {
        &self.response
    }

    /// How the execution ended.
    #[must_use]
    pub const fn outcome(&self) -> Outcome {
        self.outcome
    }

    /// The context after every unit has run.
    #[must_use]
    pub const fn context(&self) -> &RequestContext {
        &self.terminator.ctx
    }

    /// The error that replaced the response, for [`Outcome::Failed`].
    #[must_use]
    pub const fn error(&self) -> Option<&PipelineError> {
        self.error.as_ref()
    }

    /// Identities of the units whose terminate hooks are eligible to run.
    #[must_use]
    pub fn terminate_candidates(&self) -> Vec<&str> {
        self.terminator.entries.iter().map(SequenceEntry::id).collect()
    }

    /// Splits into the response to send and the pending terminate step.
    #[must_use]
    pub fn into_parts(self) -> (Response, Terminator) {
        (self.response, self.terminator)
    }

    /// Fires terminate hooks against the final response.
    pub async fn terminate(self) -> TerminateReport {
        let (response, terminator) = self.into_parts();
        terminator.run(&response).await
    }

    /// Fires terminate hooks on a background task.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn spawn_terminate(self) -> JoinHandle<TerminateReport> {
        let (response, terminator) = self.into_parts();
        terminator.spawn(response)
    }
}

/// Pending terminate hooks for one execution.
pub struct Terminator {
    ctx: RequestContext,
    route: String,
    entries: Vec<SequenceEntry>,
}

impl Terminator {
    /// Runs each eligible unit's hook once, in sequence order.
    ///
    /// A failing hook is logged and counted; the remaining hooks still run.
    pub async fn run(self, response: &Response) -> TerminateReport {
        let span = tracing::debug_span!(
            "terminate",
            request_id = %self.ctx.request_id(),
            route = %self.route,
        );

        let mut report = TerminateReport::default();
        for entry in &self.entries {
            let Some(hook) = entry.unit().terminate(&self.ctx, response, entry.params()) else {
                continue;
            };
            report.invoked.push(entry.id().to_string());

            if let Err(error) = hook.instrument(span.clone()).await {
                span.in_scope(|| tracing::warn!(unit = entry.id(), error = %error, "terminate hook failed"));
                metrics::record_terminate_failure(entry.id());
                report.failures.push(TerminateFailure {
                    unit: entry.id().to_string(),
                    error,
                });
            }
        }
        report
    }

    /// Runs [`run`](Self::run) on a Tokio task.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn spawn(self, response: Response) -> JoinHandle<TerminateReport> {
        tokio::spawn(async move { self.run(&response).await })
    }
}

impl fmt::Debug for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Terminator")
            .field("request_id", &self.ctx.request_id())
            .field("route", &self.route)
            .field("units", &self.entries.iter().map(SequenceEntry::id).collect::<Vec<_>>())
            .finish()
    }
}

/// What happened while terminate hooks ran.
#[derive(Debug, Default)]
pub struct TerminateReport {
    /// Units whose hook was invoked, in order.
    pub invoked: Vec<String>,
    /// Hooks that returned an error.
    pub failures: Vec<TerminateFailure>,
}

impl TerminateReport {
    /// Returns `true` if no hook failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// One failed terminate hook.
#[derive(Debug)]
pub struct TerminateFailure {
    /// The unit identity.
    pub unit: String,
    /// What the hook returned.
    pub error: PipelineError,
}
