//! Configuration schema types.
//!
//! This module defines the structure of all configuration sections.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Log format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON formatted logs (production).
    #[default]
    Json,
    /// Human-readable pretty format (development).
    Pretty,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Enable logging.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Log level or filter directive (e.g. `info`, `strata_middleware=debug`).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Include ANSI color codes in output.
    #[serde(default)]
    pub ansi_enabled: bool,

    /// Include source file and line in logs.
    #[serde(default)]
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_log_level(),
            format: LogFormat::default(),
            ansi_enabled: false,
            include_location: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Enable the Prometheus recorder.
    #[serde(default)]
    pub enabled: bool,

    /// Address for the Prometheus scrape listener. `None` installs the
    /// recorder without a listener.
    #[serde(default)]
    pub addr: Option<String>,
}

/// Executor behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct ExecutorConfig {
    /// Put internal error messages into fallback responses (development only).
    #[serde(default)]
    pub expose_internal_errors: bool,
}

/// A named middleware group.
///
/// A group can be written as a plain list or as a table with exclusions:
///
/// ```toml
/// [middleware.groups]
/// web = ["session", "csrf"]
///
/// [middleware.groups.api]
/// middleware = ["throttle:60,1"]
/// exclude = ["session"]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(from = "GroupRepr")]
pub struct GroupSettings {
    /// Ordered entries; each is a unit declaration or another group's name.
    pub middleware: Vec<String>,

    /// Units (or groups) removed from every route that enters this group.
    pub exclude: Vec<String>,
}

impl GroupSettings {
    /// Creates a group from an ordered entry list.
    #[must_use]
    pub fn new<I, S>(middleware: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            middleware: middleware.into_iter().map(Into::into).collect(),
            exclude: Vec::new(),
        }
    }

    /// Adds exclusions to the group.
    #[must_use]
    pub fn excluding<I, S>(mut self, exclude: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude.extend(exclude.into_iter().map(Into::into));
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum GroupRepr {
    List(Vec<String>),
    Table(GroupTable),
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct GroupTable {
    #[serde(default)]
    middleware: Vec<String>,
    #[serde(default)]
    exclude: Vec<String>,
}

impl From<GroupRepr> for GroupSettings {
    fn from(repr: GroupRepr) -> Self {
        match repr {
            GroupRepr::List(middleware) => Self {
                middleware,
                exclude: Vec::new(),
            },
            GroupRepr::Table(GroupTable { middleware, exclude }) => Self { middleware, exclude },
        }
    }
}

/// Middleware resolution settings: the global list, groups, aliases and
/// priority order.
///
/// Entries are declarations of the form `name` or `name:param1,param2`.
/// Loaded once at startup and read-only afterwards.
///
/// # Example
///
/// ```
/// use strata_config::{GroupSettings, MiddlewareSettings};
///
/// let mut settings = MiddlewareSettings::default();
/// settings.append_global("request_id");
/// settings.groups.insert("web".into(), GroupSettings::new(["auth"]));
/// settings.aliases.insert("auth".into(), "strata.authenticate".into());
///
/// assert!(settings.validate().is_ok());
/// assert!(settings.is_group("web"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct MiddlewareSettings {
    /// Units that run for every route, in order.
    #[serde(default)]
    pub global: Vec<String>,

    /// Named groups.
    #[serde(default)]
    pub groups: IndexMap<String, GroupSettings>,

    /// Short names mapped to registered unit identities.
    #[serde(default)]
    pub aliases: IndexMap<String, String>,

    /// Unit names in the relative order they must run in, wherever they
    /// appear in a resolved sequence.
    #[serde(default)]
    pub priority: Vec<String>,
}

impl MiddlewareSettings {
    /// Inserts a declaration at the front of the global list.
    pub fn prepend_global(&mut self, entry: impl Into<String>) {
        self.global.insert(0, entry.into());
    }

    /// Appends a declaration to the global list.
    pub fn append_global(&mut self, entry: impl Into<String>) {
        self.global.push(entry.into());
    }

    /// Inserts a declaration at the front of a group, creating the group if needed.
    pub fn prepend_to_group(&mut self, group: &str, entry: impl Into<String>) {
        self.groups
            .entry(group.to_string())
            .or_default()
            .middleware
            .insert(0, entry.into());
    }

    /// Appends a declaration to a group, creating the group if needed.
    pub fn append_to_group(&mut self, group: &str, entry: impl Into<String>) {
        self.groups
            .entry(group.to_string())
            .or_default()
            .middleware
            .push(entry.into());
    }

    /// Returns a group by name.
    #[must_use]
    pub fn group(&self, name: &str) -> Option<&GroupSettings> {
        self.groups.get(name)
    }

    /// Returns `true` if `name` names a group.
    #[must_use]
    pub fn is_group(&self, name: &str) -> bool {
        self.groups.contains_key(name)
    }

    /// Checks the structural consistency of the settings.
    ///
    /// Unit identities are not known here; the pipeline builder checks that
    /// every name resolves once units are registered.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::InvalidValue`] for empty names or alias targets
    /// - [`ConfigError::NameCollision`] when an alias shares a group's name
    /// - [`ConfigError::InvalidValue`] when a group reference carries parameters
    /// - [`ConfigError::CyclicGroup`] when groups reference each other in a loop
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (alias, target) in &self.aliases {
            if alias.trim().is_empty() {
                return Err(ConfigError::invalid_value("middleware.aliases", "alias name is empty"));
            }
            if target.trim().is_empty() {
                return Err(ConfigError::invalid_value(
                    format!("middleware.aliases.{alias}"),
                    "alias target is empty",
                ));
            }
            if self.groups.contains_key(alias) {
                return Err(ConfigError::NameCollision { name: alias.clone() });
            }
        }

        let all_entries = self
            .global
            .iter()
            .map(|entry| ("middleware.global".to_string(), entry))
            .chain(self.groups.iter().flat_map(|(name, group)| {
                group
                    .middleware
                    .iter()
                    .chain(group.exclude.iter())
                    .map(move |entry| (format!("middleware.groups.{name}"), entry))
            }));

        for (field, entry) in all_entries {
            let (name, params) = split_entry(entry);
            if name.is_empty() {
                return Err(ConfigError::invalid_value(field, format!("empty declaration '{entry}'")));
            }
            if params.is_some() && self.is_group(name) {
                return Err(ConfigError::invalid_value(
                    field,
                    format!("group '{name}' cannot take parameters"),
                ));
            }
        }

        for name in self.groups.keys() {
            let mut path = Vec::new();
            self.check_cycle(name, &mut path)?;
        }

        Ok(())
    }

    fn check_cycle(&self, group: &str, path: &mut Vec<String>) -> Result<(), ConfigError> {
        if let Some(start) = path.iter().position(|seen| seen == group) {
            let mut cycle = path[start..].to_vec();
            cycle.push(group.to_string());
            return Err(ConfigError::CyclicGroup { cycle });
        }

        let Some(settings) = self.groups.get(group) else {
            return Ok(());
        };

        path.push(group.to_string());
        for entry in &settings.middleware {
            let (name, _) = split_entry(entry);
            if self.is_group(name) {
                self.check_cycle(name, path)?;
            }
        }
        path.pop();

        Ok(())
    }
}

/// Splits `name:params` into its name and optional raw parameter list.
fn split_entry(entry: &str) -> (&str, Option<&str>) {
    match entry.split_once(':') {
        Some((name, params)) => (name.trim(), Some(params)),
        None => (entry.trim(), None),
    }
}

fn default_true() -> bool {
    true
}
