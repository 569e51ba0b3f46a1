//! Configuration for rbgd

use rbg_controller::ControllerConfig;
use rbg_store::{OPTIONAL_SCHEMAS, REQUIRED_SCHEMAS};
use serde::{Deserialize, Serialize};

/// Main daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Controller loop tuning
    #[serde(default)]
    pub controller: ControllerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Schemas reported as registered by the schema probe
    #[serde(default = "default_registered_schemas")]
    pub registered_schemas: Vec<String>,

    /// Directory of YAML manifests loaded into the store at startup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifests: Option<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            controller: ControllerConfig::default(),
            logging: LoggingConfig::default(),
            registered_schemas: default_registered_schemas(),
            manifests: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_registered_schemas() -> Vec<String> {
    REQUIRED_SCHEMAS
        .iter()
        .chain(OPTIONAL_SCHEMAS.iter())
        .map(|s| s.to_string())
        .collect()
}

impl DaemonConfig {
    /// Load configuration: defaults, then the optional file, then `RBG_*`
    /// environment variables (`RBG_LOGGING__LEVEL=debug`)
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("RBG")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
        assert_eq!(config.controller.max_concurrent_reconciles, 10);
        assert_eq!(
            config.registered_schemas.len(),
            REQUIRED_SCHEMAS.len() + OPTIONAL_SCHEMAS.len()
        );
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = DaemonConfig::load(None).unwrap();
        assert_eq!(config.controller.reconcile_timeout_secs, 60);
        assert!(config.manifests.is_none());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "controller:\n  max_concurrent_reconciles: 3\n  conflict_retry:\n    steps: 8\nlogging:\n  json: true"
        )
        .unwrap();

        let config = DaemonConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.controller.max_concurrent_reconciles, 3);
        assert_eq!(config.controller.conflict_retry.steps, 8);
        assert_eq!(config.controller.dependency_requeue_secs, 5);
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let config = DaemonConfig::load(Some("/nonexistent/rbgd")).unwrap();
        assert_eq!(config.controller.max_concurrent_reconciles, 10);
    }
}
