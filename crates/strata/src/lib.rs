//! # Strata
//!
//! **Composable middleware pipelines**
//!
//! Strata sequences named middleware units around a request/response
//! exchange. It does not parse HTTP, match routes or talk to a database; it
//! decides which units run for a route, in what order, and runs them.
//!
//! - **Declarative sequencing**: a global list, nested groups, aliases,
//!   per-route exclusions and a priority list resolve to one ordered
//!   sequence per route
//! - **Fail-fast configuration**: undefined names and cyclic groups are
//!   rejected before the first request
//! - **Onion execution**: before logic runs in declared order, after logic
//!   in reverse, and any unit may answer on its own
//! - **Post-send hooks**: terminate hooks run once the response is out,
//!   isolated from each other
//!
//! ## Quick Start
//!
//! ```
//! use strata::prelude::*;
//!
//! # tokio_test::block_on(async {
//! let config = ConfigLoader::new()
//!     .with_string(
//!         r#"
//!         [middleware]
//!         global = ["request_id", "errors"]
//!
//!         [middleware.groups]
//!         api = ["throttle:120,1"]
//!         "#,
//!         "toml",
//!     )?
//!     .load()?;
//!
//! let routes = [RouteDeclaration::named("posts.index").group("api")];
//! let pipelines = Pipelines::compile(&config, stock_registry(&config), &routes)?;
//!
//! let handler = endpoint_fn(|_ctx| Box::pin(async { Ok(Response::text(http::StatusCode::OK, "[]")) }));
//! let completion = pipelines
//!     .dispatch("posts.index", RequestContext::builder(http::Method::GET, "/posts").build(), &handler)
//!     .await
//!     .expect("route is compiled");
//!
//! assert_eq!(completion.outcome(), Outcome::Completed);
//! completion.terminate().await;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # }).unwrap();
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ConfigLoader ─▶ StrataConfig ─▶ PipelineBuilder ─▶ Sequence per route ─▶ Executor
//!                                        ▲                                    │
//!                              MiddlewareRegistry                 Completion ─┴─▶ terminate()
//! ```

#![doc(html_root_url = "https://docs.rs/strata/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

use indexmap::IndexMap;

pub use strata_config as config;
pub use strata_core as core;
pub use strata_middleware as middleware;
pub use strata_telemetry as telemetry;

use strata_config::{LogFormat, StrataConfig};
use strata_core::RequestContext;
use strata_middleware::stages::register_stock_units;
use strata_middleware::{
    BuildError, Completion, Endpoint, Executor, ExecutorOptions, MiddlewareRegistry, PipelineBuilder, RouteDeclaration,
};
use strata_telemetry::{LogConfig, MetricsConfig, TelemetryConfig, TelemetryResult};

/// Maps the loaded configuration onto the telemetry crate's settings.
#[must_use]
pub fn telemetry_config(config: &StrataConfig) -> TelemetryConfig {
    let logging = &config.logging;
    TelemetryConfig {
        logging: LogConfig {
            enabled: logging.enabled,
            level: logging.level.clone(),
            json_format: logging.format == LogFormat::Json,
            ansi: logging.ansi_enabled,
            file_line_info: logging.include_location,
            ..LogConfig::default()
        },
        metrics: MetricsConfig {
            enabled: config.metrics.enabled,
            addr: config.metrics.addr.clone(),
            ..MetricsConfig::default()
        },
    }
}

/// Initializes logging and metrics from the loaded configuration.
///
/// # Errors
///
/// Returns `TelemetryError` if a subscriber or recorder cannot be installed.
pub fn init_telemetry(config: &StrataConfig) -> TelemetryResult<()> {
    strata_telemetry::init_telemetry(&telemetry_config(config))
}

/// A registry holding the stock units, configured from `config.executor`.
///
/// Application units are registered on the returned registry before it is
/// handed to [`Pipelines::compile`].
#[must_use]
pub fn stock_registry(config: &StrataConfig) -> MiddlewareRegistry {
    let mut registry = MiddlewareRegistry::new();
    register_stock_units(&mut registry, ExecutorOptions::from(&config.executor));
    registry
}

/// One executor per compiled route.
#[derive(Debug, Clone)]
pub struct Pipelines {
    executors: IndexMap<String, Executor>,
}

impl Pipelines {
    /// Resolves every route against the configured middleware settings.
    ///
    /// # Errors
    ///
    /// Returns the first [`BuildError`]; no route is served when any route
    /// is misconfigured.
    pub fn compile(
        config: &StrataConfig,
        registry: MiddlewareRegistry,
        routes: &[RouteDeclaration],
    ) -> Result<Self, BuildError> {
        let builder = PipelineBuilder::new(config.middleware.clone(), registry)?;
        let options = ExecutorOptions::from(&config.executor);

        let executors = builder
            .compile_routes(routes)?
            .into_iter()
            .map(|(name, sequence)| (name, Executor::new(sequence).with_options(options)))
            .collect();

        Ok(Self { executors })
    }

    /// The executor for `route`.
    #[must_use]
    pub fn get(&self, route: &str) -> Option<&Executor> {
        self.executors.get(route)
    }

    /// Compiled route names, in declaration order.
    pub fn routes(&self) -> impl Iterator<Item = &str> {
        self.executors.keys().map(String::as_str)
    }

    /// Number of compiled routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.executors.len()
    }

    /// Returns `true` if no route was compiled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }

    /// Runs `ctx` through the pipeline of `route`.
    ///
    /// Returns `None` for an unknown route.
    pub async fn dispatch(&self, route: &str, ctx: RequestContext, handler: &dyn Endpoint) -> Option<Completion> {
        let Some(executor) = self.get(route) else {
            tracing::warn!(route, "dispatch to unknown route");
            return None;
        };
        Some(executor.execute(ctx, handler).await)
    }
}

/// Prelude module for convenient imports.
///
/// ```
/// use strata::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{init_telemetry, stock_registry, telemetry_config, Pipelines};

    pub use strata_config::{ConfigLoader, GroupSettings, MiddlewareSettings, StrataConfig};

    pub use strata_core::{PipelineError, PipelineResult, RequestContext, RequestId, Response};

    pub use strata_middleware::stages::register_stock_units;
    pub use strata_middleware::{
        endpoint_fn, BoxFuture, BuildError, CancelSignal, Completion, Endpoint, Executor, ExecutorOptions, FnMiddleware,
        Middleware,
        MiddlewareRegistry, Next, Outcome, PipelineBuilder, RouteDeclaration, Sequence,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_config_follows_presets() {
        let development = telemetry_config(&StrataConfig::development());
        assert!(!development.logging.json_format);
        assert_eq!(development.logging.level, "debug");
        assert!(development.logging.file_line_info);

        let production = telemetry_config(&StrataConfig::production());
        assert!(production.logging.json_format);
        assert!(production.metrics.enabled);
    }
}
