//! Stock middleware units.
//!
//! Ready-made units for the concerns most applications share:
//!
//! | Identity     | Unit                      | Parameters            |
//! |--------------|---------------------------|-----------------------|
//! | `request_id` | [`RequestIdMiddleware`]   | none                  |
//! | `errors`     | [`ErrorTranslation`]      | none                  |
//! | `auth`       | [`Authenticate`]          | optional login path   |
//! | `role`       | [`RequireRole`]           | accepted roles        |
//! | `throttle`   | [`Throttle`]              | `max`, `minutes`      |
//!
//! [`register_stock_units`] registers every unit that needs no
//! application input. `errors` follows the executor's
//! `expose_internal_errors` switch so both boundaries render internal
//! failures the same way. `auth` needs a [`TokenResolver`] and is
//! registered by the application.

pub mod authenticate;
pub mod error_translation;
pub mod request_id;
pub mod require_role;
pub mod throttle;

pub use authenticate::{Authenticate, StaticTokens, TokenResolver, USER_ATTRIBUTE};
pub use error_translation::ErrorTranslation;
pub use request_id::{RequestIdMiddleware, REQUEST_ID_HEADER};
pub use require_role::RequireRole;
pub use throttle::Throttle;

use crate::executor::ExecutorOptions;
use crate::registry::MiddlewareRegistry;

/// Registers `request_id`, `errors`, `role` and `throttle`.
pub fn register_stock_units(registry: &mut MiddlewareRegistry, options: ExecutorOptions) -> &mut MiddlewareRegistry {
    registry
        .register("request_id", RequestIdMiddleware::new())
        .register(
            "errors",
            ErrorTranslation::new().expose_internal_errors(options.expose_internal_errors),
        )
        .register("role", RequireRole::new())
        .register("throttle", Throttle::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stock_units_registered() {
        let mut registry = MiddlewareRegistry::new();
        register_stock_units(&mut registry, ExecutorOptions::default());

        assert_eq!(
            registry.ids().collect::<Vec<_>>(),
            vec!["request_id", "errors", "role", "throttle"]
        );
    }
}
