//! Layered configuration loading.
//!
//! [`ConfigLoader`] applies configuration in layers, later layers overriding
//! earlier ones: built-in defaults or a preset, then a TOML or JSON file,
//! then environment variables.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;

use crate::{ConfigError, GroupSettings, LogFormat, StrataConfig};

/// Configuration loader with a layered approach.
///
/// # Example
///
/// ```no_run
/// use strata_config::ConfigLoader;
///
/// # fn main() -> Result<(), strata_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_defaults()
///     .with_file("strata.toml")?
///     .with_env_prefix("STRATA")
///     .load()?;
/// # Ok(())
/// # }
/// ```
///
/// # Environment variables
///
/// Keys use the form `PREFIX__SECTION__KEY`. List values are separated by
/// whitespace so that declarations like `throttle:60,1` keep their commas.
///
/// | Variable | Effect |
/// |----------|--------|
/// | `STRATA__LOGGING__LEVEL` | log filter directive |
/// | `STRATA__LOGGING__FORMAT` | `json` or `pretty` |
/// | `STRATA__LOGGING__ENABLED` / `ANSI_ENABLED` / `INCLUDE_LOCATION` | booleans |
/// | `STRATA__METRICS__ENABLED` | boolean |
/// | `STRATA__METRICS__ADDR` | scrape listener address, empty clears it |
/// | `STRATA__EXECUTOR__EXPOSE_INTERNAL_ERRORS` | boolean |
/// | `STRATA__MIDDLEWARE__GLOBAL` | replaces the global list |
/// | `STRATA__MIDDLEWARE__PRIORITY` | replaces the priority list |
/// | `STRATA__MIDDLEWARE__ALIASES__<NAME>` | sets alias `<name>` |
/// | `STRATA__MIDDLEWARE__GROUPS__<NAME>` | replaces group `<name>`'s entries |
///
/// Alias and group names are lowercased.
#[derive(Debug)]
pub struct ConfigLoader {
    config: StrataConfig,
    env_prefix: Option<String>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a new configuration loader starting from defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: StrataConfig::default(),
            env_prefix: None,
        }
    }

    /// Start with default configuration values.
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        self.config = StrataConfig::default();
        self
    }

    /// Start with the development preset.
    ///
    /// ```
    /// use strata_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new().with_development().load().unwrap();
    /// assert_eq!(config.logging.level, "debug");
    /// ```
    #[must_use]
    pub fn with_development(mut self) -> Self {
        self.config = StrataConfig::development();
        self
    }

    /// Start with the production preset.
    #[must_use]
    pub fn with_production(mut self) -> Self {
        self.config = StrataConfig::production();
        self
    }

    /// Load configuration from a file.
    ///
    /// The format is chosen by extension (`.toml` or `.json`). The file
    /// replaces the current configuration; sections it omits take their
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file is missing, unreadable, malformed,
    /// has an unsupported extension, or contains unknown fields.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::read_error(path, e))?;

        self.config = Self::parse_file(&content, path)?;
        Ok(self)
    }

    /// Load configuration from a file if it exists.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file exists but cannot be loaded.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Load configuration from a string in the given format (`toml` or `json`).
    ///
    /// ```
    /// use strata_config::ConfigLoader;
    ///
    /// let toml = r#"
    ///     [middleware]
    ///     global = ["request_id"]
    /// "#;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string(toml, "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.middleware.global, vec!["request_id"]);
    /// ```
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if parsing fails or the format is unknown.
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        self.config = match format.to_lowercase().as_str() {
            "toml" => toml::from_str(content)?,
            "json" => serde_json::from_str(content)?,
            _ => return Err(ConfigError::unsupported_format(format)),
        };
        Ok(self)
    }

    /// Set the environment variable prefix for overrides.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Load a `.env` file into the process environment if one exists.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a `.env` file exists but cannot be parsed.
    pub fn with_dotenv(self) -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(_) => Ok(self),
            Err(error) if error.not_found() => Ok(self),
            Err(error) => Err(ConfigError::env_parse_error(".env", error.to_string())),
        }
    }

    /// Apply environment overrides and validate.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if an environment variable cannot be parsed or
    /// the final configuration fails validation.
    pub fn load(mut self) -> Result<StrataConfig, ConfigError> {
        if let Some(prefix) = self.env_prefix.take() {
            self.apply_env_overrides(&prefix)?;
        }

        self.config.validate()?;

        Ok(self.config)
    }

    /// Return the configuration without environment overrides or validation.
    #[must_use]
    pub fn load_unvalidated(self) -> StrataConfig {
        self.config
    }

    fn parse_file(content: &str, path: &Path) -> Result<StrataConfig, ConfigError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);

        match extension.as_deref() {
            Some("toml") => Ok(toml::from_str(content)?),
            Some("json") => Ok(serde_json::from_str(content)?),
            _ => Err(ConfigError::unsupported_format(path.display().to_string())),
        }
    }

    fn apply_env_overrides(&mut self, prefix: &str) -> Result<(), ConfigError> {
        // Sorted so that repeated loads apply overrides in the same order.
        let env_vars: BTreeMap<String, String> = env::vars()
            .filter(|(k, _)| k.starts_with(prefix))
            .collect();

        for (key, value) in env_vars {
            self.apply_env_var(&key, &value, prefix)?;
        }

        Ok(())
    }

    fn apply_env_var(&mut self, key: &str, value: &str, prefix: &str) -> Result<(), ConfigError> {
        let Some(key_without_prefix) = key.strip_prefix(prefix).and_then(|k| k.strip_prefix("__"))
        else {
            // Another variable that merely shares the prefix.
            return Ok(());
        };

        let parts: Vec<&str> = key_without_prefix.split("__").collect();

        match parts.as_slice() {
            ["LOGGING", "ENABLED"] => {
                self.config.logging.enabled = parse_bool_var(key, value)?;
            }
            ["LOGGING", "LEVEL"] => {
                self.config.logging.level = value.to_string();
            }
            ["LOGGING", "FORMAT"] => {
                self.config.logging.format = match value.to_lowercase().as_str() {
                    "json" => LogFormat::Json,
                    "pretty" => LogFormat::Pretty,
                    _ => {
                        return Err(ConfigError::env_parse_error(
                            key,
                            "expected 'json' or 'pretty'",
                        ))
                    }
                };
            }
            ["LOGGING", "ANSI_ENABLED"] => {
                self.config.logging.ansi_enabled = parse_bool_var(key, value)?;
            }
            ["LOGGING", "INCLUDE_LOCATION"] => {
                self.config.logging.include_location = parse_bool_var(key, value)?;
            }

            ["METRICS", "ENABLED"] => {
                self.config.metrics.enabled = parse_bool_var(key, value)?;
            }
            ["METRICS", "ADDR"] => {
                self.config.metrics.addr = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }

            ["EXECUTOR", "EXPOSE_INTERNAL_ERRORS"] => {
                self.config.executor.expose_internal_errors = parse_bool_var(key, value)?;
            }

            ["MIDDLEWARE", "GLOBAL"] => {
                self.config.middleware.global = parse_list(value);
            }
            ["MIDDLEWARE", "PRIORITY"] => {
                self.config.middleware.priority = parse_list(value);
            }
            ["MIDDLEWARE", "ALIASES", name] => {
                if value.trim().is_empty() {
                    return Err(ConfigError::env_parse_error(key, "alias target is empty"));
                }
                self.config
                    .middleware
                    .aliases
                    .insert(name.to_lowercase(), value.trim().to_string());
            }
            ["MIDDLEWARE", "GROUPS", name] => {
                let group = self
                    .config
                    .middleware
                    .groups
                    .entry(name.to_lowercase())
                    .or_insert_with(GroupSettings::default);
                group.middleware = parse_list(value);
            }

            _ => {}
        }

        Ok(())
    }
}

fn parse_bool_var(key: &str, value: &str) -> Result<bool, ConfigError> {
    parse_bool(value).ok_or_else(|| ConfigError::env_parse_error(key, "expected boolean"))
}

/// Parse a boolean from a string.
fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value.split_whitespace().map(ToString::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loader_new() {
        let config = ConfigLoader::new().load().unwrap();
        assert_eq!(config, StrataConfig::default());
    }

    #[test]
    fn test_loader_with_production() {
        let config = ConfigLoader::new().with_production().load().unwrap();
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(config.metrics.enabled);
    }

    #[test]
    fn test_loader_with_string_json() {
        let json = r#"{"middleware": {"global": ["a", "b"], "groups": {"web": ["c"]}}}"#;

        let config = ConfigLoader::new()
            .with_string(json, "json")
            .unwrap()
            .load()
            .unwrap();

        assert_eq!(config.middleware.global, vec!["a", "b"]);
        assert_eq!(config.middleware.groups["web"].middleware, vec!["c"]);
    }

    #[test]
    fn test_loader_with_string_unknown_format() {
        let result = ConfigLoader::new().with_string("", "yaml");
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat { .. })));
    }

    #[test]
    fn test_loader_rejects_cyclic_groups() {
        let toml = r#"
            [middleware.groups]
            a = ["b"]
            b = ["a"]
        "#;

        let result = ConfigLoader::new().with_string(toml, "toml").unwrap().load();
        assert!(matches!(result, Err(ConfigError::CyclicGroup { .. })));
    }

    #[test]
    fn test_loader_with_file_not_found() {
        let result = ConfigLoader::new().with_file("/nonexistent/strata.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }

    #[test]
    fn test_loader_with_optional_file_not_found() {
        let config = ConfigLoader::new()
            .with_optional_file("/nonexistent/strata.toml")
            .unwrap()
            .load()
            .unwrap();

        assert_eq!(config, StrataConfig::default());
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("true"), Some(true));
        assert_eq!(parse_bool("ON"), Some(true));
        assert_eq!(parse_bool("1"), Some(true));
        assert_eq!(parse_bool("no"), Some(false));
        assert_eq!(parse_bool("False"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
        assert_eq!(parse_bool(""), None);
    }

    // Environment mutation needs unsafe under edition 2024 rules, which the
    // workspace forbids, so the per-variable logic is tested directly.

    #[test]
    fn test_apply_env_var_logging() {
        let mut loader = ConfigLoader::new();
        loader.apply_env_var("TEST__LOGGING__LEVEL", "strata=trace", "TEST").unwrap();
        loader.apply_env_var("TEST__LOGGING__FORMAT", "Pretty", "TEST").unwrap();
        assert_eq!(loader.config.logging.level, "strata=trace");
        assert_eq!(loader.config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_apply_env_var_middleware_lists() {
        let mut loader = ConfigLoader::new();
        loader
            .apply_env_var("TEST__MIDDLEWARE__GLOBAL", "request_id  throttle:60,1", "TEST")
            .unwrap();
        loader
            .apply_env_var("TEST__MIDDLEWARE__GROUPS__API", "auth role:admin", "TEST")
            .unwrap();
        loader
            .apply_env_var("TEST__MIDDLEWARE__ALIASES__AUTH", "strata.authenticate", "TEST")
            .unwrap();

        let middleware = &loader.config.middleware;
        assert_eq!(middleware.global, vec!["request_id", "throttle:60,1"]);
        assert_eq!(middleware.groups["api"].middleware, vec!["auth", "role:admin"]);
        assert_eq!(middleware.aliases["auth"], "strata.authenticate");
    }

    #[test]
    fn test_apply_env_var_group_keeps_exclusions() {
        let mut loader = ConfigLoader::new();
        loader.config.middleware.groups.insert(
            "api".into(),
            GroupSettings::new(["session"]).excluding(["csrf"]),
        );

        loader
            .apply_env_var("TEST__MIDDLEWARE__GROUPS__API", "auth", "TEST")
            .unwrap();

        let group = &loader.config.middleware.groups["api"];
        assert_eq!(group.middleware, vec!["auth"]);
        assert_eq!(group.exclude, vec!["csrf"]);
    }

    #[test]
    fn test_apply_env_var_invalid_boolean() {
        let mut loader = ConfigLoader::new();
        let result = loader.apply_env_var("TEST__METRICS__ENABLED", "sometimes", "TEST");
        assert!(matches!(result, Err(ConfigError::EnvParseError { .. })));
    }

    #[test]
    fn test_apply_env_var_ignores_unknown_keys() {
        let mut loader = ConfigLoader::new();
        loader.apply_env_var("TEST__SERVER__PORT", "80", "TEST").unwrap();
        loader.apply_env_var("TESTING_OTHER", "x", "TEST").unwrap();
        assert_eq!(loader.config, StrataConfig::default());
    }
}
