//! Configuration for hive nodes: a typed `AppConfig` loaded from TOML
//! plus environment overrides, and the layered `EnvLookup` source used
//! by task contexts and collaborators.

mod lookup;
pub mod models;

use config::{Config, Environment, File};
use hive_domain::{HiveError, HiveResult};
use tracing::info;

pub use lookup::EnvLookup;
pub use models::{
    AppConfig, CoordinatorConfig, LogConfig, NodeConfig, RetryConfig, TaskConfig,
    ThresholdConfig, TransportConfig,
};

impl AppConfig {
    /// Load configuration, layering (lowest to highest precedence):
    /// built-in defaults, the TOML file if given, then `HIVE__`
    /// environment variables (e.g. `HIVE__COORDINATOR__POLL_WAIT_MS`).
    pub fn load(path: Option<&str>) -> HiveResult<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(false));
        }
        builder = builder.add_source(
            Environment::with_prefix("HIVE")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .map_err(|e| HiveError::config_error(format!("building configuration: {e}")))?
            .try_deserialize()
            .map_err(|e| HiveError::config_error(format!("deserializing configuration: {e}")))?;

        info!(
            job_queue = %config.transport.job_queue,
            approved_tasks = config.tasks.approved.len(),
            "configuration loaded"
        );
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_when_no_file() {
        let config = AppConfig::load(None).unwrap();
        assert_eq!(config.transport.job_queue, "hive_jobs");
        assert_eq!(config.coordinator.poll_wait_ms, 1_000);
        assert_eq!(config.thresholds.workflow, 10);
        assert!(config.tasks.approved.contains(&"pipeline".to_string()));
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            r#"
[transport]
job_queue = "custom_jobs"

[coordinator]
max_lifetime_seconds = 120
"#
        )
        .unwrap();

        let config = AppConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.transport.job_queue, "custom_jobs");
        assert_eq!(config.coordinator.max_lifetime_seconds, 120);
        // untouched sections keep defaults
        assert_eq!(config.transport.status_channel, "hive_status");
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = AppConfig::load(Some("/nonexistent/hive.toml")).unwrap();
        assert_eq!(config.transport.job_queue, "hive_jobs");
    }

    #[test]
    fn shipped_sample_file_is_valid() {
        let sample = concat!(env!("CARGO_MANIFEST_DIR"), "/../../config/hive.toml");
        let contents = std::fs::read_to_string(sample).unwrap();
        let config: AppConfig = toml::from_str(&contents).unwrap();
        assert_eq!(config.transport.job_queue, "hive_jobs");
        assert_eq!(config.coordinator.max_lifetime_seconds, 3_300);
        assert!(config.tasks.approved.contains(&"pipeline".to_string()));
    }
}
