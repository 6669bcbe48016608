//! Parsing of `name:param1,param2` declarations.

use std::fmt;
use std::str::FromStr;

use crate::BuildError;

/// A parsed middleware declaration.
///
/// The name may be a group, an alias or a registered unit identity; that is
/// decided later by the builder. Parameters are passed positionally to the
/// unit.
///
/// # Example
///
/// ```
/// use strata_middleware::Declaration;
///
/// let decl: Declaration = "throttle:60, 1".parse().unwrap();
/// assert_eq!(decl.name(), "throttle");
/// assert_eq!(decl.params(), ["60", "1"]);
/// assert_eq!(decl.to_string(), "throttle:60,1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Declaration {
    name: String,
    params: Vec<String>,
}

impl Declaration {
    /// Creates a declaration without parameters.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
        }
    }

    /// Creates a declaration with parameters.
    #[must_use]
    pub fn with_params<I, S>(name: impl Into<String>, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            params: params.into_iter().map(Into::into).collect(),
        }
    }

    /// Parses `name` or `name:p1,p2`.
    ///
    /// Whitespace around the name and each parameter is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::InvalidDeclaration`] for an empty name, a name
    /// containing whitespace, a trailing `:` with nothing after it, or an
    /// empty parameter.
    pub fn parse(raw: &str) -> Result<Self, BuildError> {
        let (name, params) = match raw.split_once(':') {
            Some((name, params)) => (name.trim(), Some(params)),
            None => (raw.trim(), None),
        };

        if name.is_empty() {
            return Err(BuildError::invalid_declaration(raw, "missing name"));
        }
        if name.chars().any(char::is_whitespace) {
            return Err(BuildError::invalid_declaration(raw, "name contains whitespace"));
        }

        let params = match params {
            None => Vec::new(),
            Some(list) if list.trim().is_empty() => {
                return Err(BuildError::invalid_declaration(raw, "empty parameter list"));
            }
            Some(list) => {
                let params: Vec<String> = list.split(',').map(|p| p.trim().to_string()).collect();
                if params.iter().any(String::is_empty) {
                    return Err(BuildError::invalid_declaration(raw, "empty parameter"));
                }
                params
            }
        };

        Ok(Self {
            name: name.to_string(),
            params,
        })
    }

    /// Returns the name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the parameters.
    #[must_use]
    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Returns `true` if the declaration carries parameters.
    #[must_use]
    pub fn has_params(&self) -> bool {
        !self.params.is_empty()
    }

    pub(crate) fn into_parts(self) -> (String, Vec<String>) {
        (self.name, self.params)
    }
}

impl FromStr for Declaration {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Declaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.params.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}:{}", self.name, self.params.join(","))
        }
    }
}
