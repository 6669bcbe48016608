//! Top-level configuration and its builder.

use serde::{Deserialize, Serialize};

use crate::{ConfigError, ExecutorConfig, LogFormat, LoggingConfig, MetricsConfig, MiddlewareSettings};

/// Complete Strata configuration.
///
/// Use [`ConfigLoader`](crate::ConfigLoader) to load it from files and
/// environment variables. Once loaded it is treated as read-only.
///
/// # Example
///
/// ```
/// use strata_config::StrataConfig;
///
/// let config = StrataConfig::default();
/// assert!(config.middleware.global.is_empty());
/// assert_eq!(config.logging.level, "info");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct StrataConfig {
    /// Middleware resolution settings.
    #[serde(default)]
    pub middleware: MiddlewareSettings,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Executor behaviour.
    #[serde(default)]
    pub executor: ExecutorConfig,
}

impl StrataConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> StrataConfigBuilder {
        StrataConfigBuilder::new()
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - The log level is empty
    /// - Metrics are enabled with an address that is not a socket address
    /// - The middleware settings are inconsistent (see
    ///   [`MiddlewareSettings::validate`])
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::invalid_value("logging.level", "must not be empty"));
        }

        if self.metrics.enabled {
            if let Some(addr) = &self.metrics.addr {
                if addr.parse::<std::net::SocketAddr>().is_err() {
                    return Err(ConfigError::invalid_value(
                        "metrics.addr",
                        format!("invalid socket address: {addr}"),
                    ));
                }
            }
        }

        self.middleware.validate()
    }

    /// Development preset: pretty, colored debug logs and internal error
    /// messages exposed in fallback responses.
    ///
    /// ```
    /// use strata_config::StrataConfig;
    ///
    /// let config = StrataConfig::development();
    /// assert_eq!(config.logging.level, "debug");
    /// assert!(config.executor.expose_internal_errors);
    /// ```
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();

        config.logging.level = "debug".to_string();
        config.logging.format = LogFormat::Pretty;
        config.logging.ansi_enabled = true;
        config.logging.include_location = true;

        config.executor.expose_internal_errors = true;

        config
    }

    /// Production preset: JSON logs at info level, metrics on, internal
    /// errors hidden.
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();

        config.logging.level = "info".to_string();
        config.logging.format = LogFormat::Json;
        config.logging.ansi_enabled = false;

        config.metrics.enabled = true;
        config.executor.expose_internal_errors = false;

        config
    }
}

/// Builder for [`StrataConfig`].
#[derive(Debug, Default)]
pub struct StrataConfigBuilder {
    middleware: Option<MiddlewareSettings>,
    logging: Option<LoggingConfig>,
    metrics: Option<MetricsConfig>,
    executor: Option<ExecutorConfig>,
}

impl StrataConfigBuilder {
    /// Create a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the middleware settings.
    #[must_use]
    pub fn middleware(mut self, middleware: MiddlewareSettings) -> Self {
        self.middleware = Some(middleware);
        self
    }

    /// Set the logging configuration.
    #[must_use]
    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = Some(logging);
        self
    }

    /// Set the metrics configuration.
    #[must_use]
    pub fn metrics(mut self, metrics: MetricsConfig) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Set the executor configuration.
    #[must_use]
    pub fn executor(mut self, executor: ExecutorConfig) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Build the configuration. Unset sections use their defaults.
    #[must_use]
    pub fn build(self) -> StrataConfig {
        StrataConfig {
            middleware: self.middleware.unwrap_or_default(),
            logging: self.logging.unwrap_or_default(),
            metrics: self.metrics.unwrap_or_default(),
            executor: self.executor.unwrap_or_default(),
        }
    }

    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if validation fails.
    pub fn build_validated(self) -> Result<StrataConfig, ConfigError> {
        let config = self.build();
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GroupSettings;

    #[test]
    fn test_default_config_is_valid() {
        assert!(StrataConfig::default().validate().is_ok());
    }

    #[test]
    fn test_builder_sections() {
        let mut middleware = MiddlewareSettings::default();
        middleware.append_global("request_id");

        let config = StrataConfig::builder()
            .middleware(middleware)
            .executor(ExecutorConfig {
                expose_internal_errors: true,
            })
            .build();

        assert_eq!(config.middleware.global, vec!["request_id"]);
        assert!(config.executor.expose_internal_errors);
        assert_eq!(config.logging, LoggingConfig::default());
    }

    #[test]
    fn test_validate_invalid_metrics_addr() {
        let config = StrataConfig::builder()
            .metrics(MetricsConfig {
                enabled: true,
                addr: Some("not-an-address".to_string()),
            })
            .build();

        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_build_validated_propagates_middleware_errors() {
        let mut middleware = MiddlewareSettings::default();
        middleware.groups.insert("loop".into(), GroupSettings::new(["loop"]));

        let result = StrataConfig::builder().middleware(middleware).build_validated();
        assert!(matches!(result, Err(ConfigError::CyclicGroup { .. })));
    }

    #[test]
    fn test_presets() {
        let dev = StrataConfig::development();
        assert_eq!(dev.logging.format, LogFormat::Pretty);
        assert!(dev.logging.ansi_enabled);

        let prod = StrataConfig::production();
        assert_eq!(prod.logging.format, LogFormat::Json);
        assert!(prod.metrics.enabled);
        assert!(!prod.executor.expose_internal_errors);
    }

    #[test]
    fn test_toml_deserialization() {
        let toml = r#"
            [middleware]
            global = ["request_id", "errors"]
            priority = ["auth", "throttle"]

            [middleware.aliases]
            auth = "strata.authenticate"

            [middleware.groups]
            web = ["auth", "role:admin"]

            [logging]
            level = "warn"
        "#;

        let config: StrataConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.middleware.global, vec!["request_id", "errors"]);
        assert_eq!(config.middleware.aliases["auth"], "strata.authenticate");
        assert_eq!(config.middleware.groups["web"].middleware, vec!["auth", "role:admin"]);
        assert_eq!(config.logging.level, "warn");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_section_rejected() {
        let result: Result<StrataConfig, _> = toml::from_str("[server]\nport = 1");
        assert!(result.is_err());
    }
}
