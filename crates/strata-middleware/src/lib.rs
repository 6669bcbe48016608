//! # Strata Middleware
//!
//! Resolves and executes per-route middleware sequences.
//!
//! ```text
//!  MiddlewareSettings ─┐
//!  MiddlewareRegistry ─┼─▶ PipelineBuilder ──▶ Sequence ──▶ Executor ──▶ Completion
//!  RouteDeclaration ───┘                                      ▲              │
//!                                       RequestContext ───────┘        terminate()
//! ```
//!
//! - [`PipelineBuilder`] flattens the global list, nested groups, route
//!   entries, aliases, exclusions, de-duplication and priority into one
//!   ordered [`Sequence`] per route, failing fast with a [`BuildError`]
//! - [`Executor`] runs a request through that sequence as nested
//!   continuations around a terminal [`Endpoint`]
//! - [`Completion::terminate`] fires post-send hooks once the response has
//!   been handed to the transport
//!
//! ## Example
//!
//! ```
//! use http::StatusCode;
//! use strata_config::{GroupSettings, MiddlewareSettings};
//! use strata_core::{fixtures, Response};
//! use strata_middleware::stages::register_stock_units;
//! use strata_middleware::{endpoint_fn, Executor, ExecutorOptions, MiddlewareRegistry, PipelineBuilder, RouteDeclaration};
//!
//! # tokio_test::block_on(async {
//! let mut registry = MiddlewareRegistry::new();
//! register_stock_units(&mut registry, ExecutorOptions::default());
//!
//! let mut settings = MiddlewareSettings::default();
//! settings.append_global("request_id");
//! settings.groups.insert("api".into(), GroupSettings::new(["errors", "throttle:100,1"]));
//!
//! let builder = PipelineBuilder::new(settings, registry).unwrap();
//! let sequence = builder.build_sequence(&RouteDeclaration::named("posts.index").group("api")).unwrap();
//! assert_eq!(sequence.labels(), ["request_id", "errors", "throttle:100,1"]);
//!
//! let handler = endpoint_fn(|_ctx| Box::pin(async { Ok(Response::text(StatusCode::OK, "[]")) }));
//! let completion = Executor::new(sequence).execute(fixtures::get("/posts"), &handler).await;
//! assert_eq!(completion.response().header("x-ratelimit-limit"), Some("100"));
//!
//! completion.terminate().await;
//! # });
//! ```

#![doc(html_root_url = "https://docs.rs/strata-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod builder;
pub mod cancel;
pub mod declaration;
pub mod error;
pub mod executor;
pub mod middleware;
pub mod registry;
pub mod sequence;
pub mod stages;

pub use builder::{PipelineBuilder, RouteDeclaration, RouteTable};
pub use cancel::CancelSignal;
pub use declaration::Declaration;
pub use error::BuildError;
pub use executor::{Completion, Executor, ExecutorOptions, Outcome, TerminateFailure, TerminateReport, Terminator};
pub use middleware::{endpoint_fn, BoxFuture, Endpoint, FnEndpoint, FnMiddleware, Middleware, Next};
pub use registry::MiddlewareRegistry;
pub use sequence::{Sequence, SequenceEntry};
