//! Build-time errors.
//!
//! Everything here is a configuration problem found while resolving
//! sequences. None of it can happen once requests are being served.

use strata_config::ConfigError;
use thiserror::Error;

/// Error raised while resolving a middleware sequence.
#[derive(Debug, Error)]
pub enum BuildError {
    /// A declaration string could not be parsed.
    #[error("invalid middleware declaration '{declaration}': {reason}")]
    InvalidDeclaration {
        /// The raw declaration.
        declaration: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A name is neither a group, an alias nor a registered unit.
    #[error("undefined middleware '{name}' referenced from {location}")]
    UndefinedMiddleware {
        /// The unresolved name.
        name: String,
        /// Where the name was referenced (`global`, `group 'web'`, `route 'home'`).
        location: String,
    },

    /// A route lists a group that does not exist.
    #[error("undefined middleware group '{name}' referenced from {location}")]
    UndefinedGroup {
        /// The unresolved group name.
        name: String,
        /// Where the name was referenced.
        location: String,
    },

    /// An alias points at a unit identity that is not registered.
    #[error("alias '{alias}' points at unregistered unit '{target}'")]
    UnregisteredUnit {
        /// The alias.
        alias: String,
        /// Its target identity.
        target: String,
    },

    /// Groups reference each other in a loop.
    #[error("middleware groups form a cycle: {}", cycle.join(" -> "))]
    CyclicGroup {
        /// Group names along the cycle, first name repeated at the end.
        cycle: Vec<String>,
    },

    /// A group reference carries parameters.
    #[error("group '{group}' cannot take parameters")]
    GroupParameters {
        /// The group name.
        group: String,
    },

    /// A unit rejected the parameters it was declared with.
    #[error("invalid parameters for '{unit}': {reason}")]
    InvalidParameters {
        /// The unit identity.
        unit: String,
        /// The unit's explanation.
        reason: String,
    },

    /// Two routes in one table share a name.
    #[error("route '{name}' is declared more than once")]
    DuplicateRoute {
        /// The route name.
        name: String,
    },

    /// The settings failed structural validation.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl BuildError {
    pub(crate) fn invalid_declaration(declaration: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDeclaration {
            declaration: declaration.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_problem() {
        let err = BuildError::UndefinedMiddleware {
            name: "csrf".into(),
            location: "group 'web'".into(),
        };
        assert_eq!(
            err.to_string(),
            "undefined middleware 'csrf' referenced from group 'web'"
        );

        let err = BuildError::CyclicGroup {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert!(err.to_string().ends_with("a -> b -> a"));
    }

    #[test]
    fn test_config_errors_convert() {
        let err: BuildError = ConfigError::NameCollision { name: "web".into() }.into();
        assert!(matches!(err, BuildError::Config(_)));
        assert!(err.to_string().contains("web"));
    }
}
