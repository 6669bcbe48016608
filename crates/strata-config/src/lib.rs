//! Typed configuration for Strata.
//!
//! The configuration is loaded once at startup and then read-only. It
//! supports:
//! - TOML and JSON files
//! - Environment variable overrides
//! - Strict validation (unknown fields are rejected)
//! - Layered loading (defaults → file → env)
//!
//! The central section is [`MiddlewareSettings`]: the global unit list,
//! named groups, aliases and the priority order that the pipeline builder
//! resolves routes against.
//!
//! # Configuration File Format
//!
//! ```toml
//! [middleware]
//! global = ["request_id", "errors"]
//! priority = ["auth", "throttle"]
//!
//! [middleware.aliases]
//! auth = "strata.authenticate"
//! role = "strata.require_role"
//! throttle = "strata.throttle"
//!
//! [middleware.groups]
//! web = ["auth"]
//!
//! [middleware.groups.api]
//! middleware = ["web", "throttle:60,1"]
//! exclude = ["errors"]
//!
//! [logging]
//! level = "info"
//! format = "json"
//!
//! [metrics]
//! enabled = true
//! addr = "0.0.0.0:9090"
//!
//! [executor]
//! expose_internal_errors = false
//! ```
//!
//! # Example
//!
//! ```no_run
//! use strata_config::ConfigLoader;
//!
//! # fn main() -> Result<(), strata_config::ConfigError> {
//! let config = ConfigLoader::new()
//!     .with_dotenv()?
//!     .with_optional_file("strata.toml")?
//!     .with_env_prefix("STRATA")
//!     .load()?;
//!
//! println!("{} global units", config.middleware.global.len());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::*;
pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::*;
