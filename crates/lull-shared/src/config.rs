//! Configuration management for lull components

use config::builder::{ConfigBuilder, DefaultState};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Prefix for `LULL__SECTION__KEY` environment overrides
pub const ENV_PREFIX: &str = "LULL";

/// Environment variable naming an alternative configuration file
pub const CONFIG_PATH_ENV: &str = "LULL_CONFIG";

/// Broker address variable used by the compose deployments
pub const BOOTSTRAP_SERVERS_ENV: &str = "KAFKA_BOOTSTRAP_SERVERS";

/// Job runtime container variable used by the compose deployments
pub const RUNTIME_CONTAINER_ENV: &str = "FLINK_SQL_CLIENT_CONTAINER";

const DEFAULT_TOPIC_PREFIX: &str = "university-server.public";
const DEFAULT_JOB_DIR: &str = "/opt/flink/sql/jobs";

/// Main configuration structure for lull
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LullConfig {
    /// Change stream subscription
    pub kafka: KafkaConfig,

    /// Debounce window and sweeper cadence
    pub debounce: DebounceConfig,

    /// External job runtime
    pub runtime: RuntimeConfig,

    /// Tracked tables, their topics and optional job scripts
    pub tables: Vec<TableConfig>,

    /// Observability configuration
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    /// Comma separated broker list
    pub bootstrap_servers: String,

    /// Consumer group ID
    pub group_id: String,

    /// Client ID for Kafka connections
    pub client_id: String,

    /// Auto offset reset policy
    pub auto_offset_reset: String,

    /// Enable auto commit
    pub enable_auto_commit: bool,

    /// Session timeout (ms)
    pub session_timeout_ms: u32,

    /// Upper bound on a single poll (ms)
    pub poll_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebounceConfig {
    /// Quiet period required between two dispatches of the same table
    pub window_secs: u64,

    /// Age after which activity is forgotten and active jobs released
    pub expiry_secs: u64,

    /// Sweeper cadence
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Program used to reach the job runtime
    pub program: String,

    /// Long-lived container hosting the SQL client
    pub container: String,

    /// SQL client binary inside the container
    pub sql_client: String,

    /// Idempotent catalog/table provisioning script run before every job
    pub setup_script: String,

    pub setup_timeout_secs: u64,

    pub job_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableConfig {
    /// Logical table name
    pub name: String,

    /// Topic carrying the table's change events
    pub topic: String,

    /// Job script; tables without one are tracked but never dispatched
    #[serde(default)]
    pub job: Option<String>,
}

impl TableConfig {
    pub fn new(name: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            topic: topic.into(),
            job: None,
        }
    }

    pub fn with_job(mut self, job: impl Into<String>) -> Self {
        self.job = Some(job.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Metrics configuration
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json or pretty)
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Install the Prometheus exporter
    pub enabled: bool,

    /// Prometheus metrics bind address
    pub bind_address: String,
}

impl DebounceConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn expiry(&self) -> Duration {
        Duration::from_secs(self.expiry_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl RuntimeConfig {
    pub fn setup_timeout(&self) -> Duration {
        Duration::from_secs(self.setup_timeout_secs)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }
}

impl KafkaConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

fn default_tables() -> Vec<TableConfig> {
    let with_jobs = ["faculty", "program", "students", "payment"];
    let tracked_only = [
        "lecturer",
        "course",
        "registration",
        "class",
        "student_enrollment",
        "student_fee",
        "student_detail",
        "room",
    ];

    let mut tables: Vec<TableConfig> = with_jobs
        .iter()
        .map(|name| {
            TableConfig::new(*name, format!("{}.{}", DEFAULT_TOPIC_PREFIX, name))
                .with_job(format!("{}/start-{}-job.sql", DEFAULT_JOB_DIR, name))
        })
        .collect();
    tables.extend(
        tracked_only
            .iter()
            .map(|name| TableConfig::new(*name, format!("{}.{}", DEFAULT_TOPIC_PREFIX, name))),
    );
    tables
}

impl Default for LullConfig {
    fn default() -> Self {
        Self {
            kafka: KafkaConfig {
                bootstrap_servers: "kafka-broker:29092".to_string(),
                group_id: "dynamic-cdc-orchestrator".to_string(),
                client_id: "lull-orchestrator".to_string(),
                auto_offset_reset: "latest".to_string(),
                enable_auto_commit: true,
                session_timeout_ms: 30000,
                poll_timeout_ms: 5000,
            },
            debounce: DebounceConfig {
                window_secs: 30,
                expiry_secs: 60,
                sweep_interval_secs: 30,
            },
            runtime: RuntimeConfig {
                program: "docker".to_string(),
                container: "flink-sql-client".to_string(),
                sql_client: "/opt/flink/bin/sql-client.sh".to_string(),
                setup_script: "/opt/flink/sql/dynamic-table-job-manager.sql".to_string(),
                setup_timeout_secs: 60,
                job_timeout_secs: 120,
            },
            tables: default_tables(),
            observability: ObservabilityConfig {
                logging: LoggingConfig {
                    level: "info".to_string(),
                    format: "text".to_string(),
                },
                metrics: MetricsConfig {
                    enabled: false,
                    bind_address: "0.0.0.0:9090".to_string(),
                },
            },
        }
    }
}

impl LullConfig {
    /// Load configuration from `$LULL_CONFIG` (or `config.toml`) and the environment
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| "config.toml".to_string());
        Self::load_from_file(path)
    }

    /// Load configuration from a specific file, then apply environment overrides
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = Self::layered(Some(path.as_ref()))?
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .set_override_option(
                "kafka.bootstrap_servers",
                std::env::var(BOOTSTRAP_SERVERS_ENV).ok(),
            )?
            .set_override_option("runtime.container", std::env::var(RUNTIME_CONTAINER_ENV).ok())?
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Defaults, then the file when it exists
    fn layered(path: Option<&Path>) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        let mut builder = Config::builder().add_source(Config::try_from(&LullConfig::default())?);

        if let Some(path) = path.filter(|p| p.exists()) {
            builder = builder.add_source(File::from(path));
        }

        Ok(builder)
    }

    /// Reject settings the orchestrator cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.kafka.bootstrap_servers.trim().is_empty() {
            return Err(ConfigError::Message("kafka.bootstrap_servers is empty".into()));
        }
        if self.kafka.poll_timeout_ms == 0 {
            return Err(ConfigError::Message("kafka.poll_timeout_ms must be positive".into()));
        }
        if self.debounce.window_secs == 0 {
            return Err(ConfigError::Message("debounce.window_secs must be positive".into()));
        }
        if self.debounce.expiry_secs < self.debounce.window_secs {
            return Err(ConfigError::Message(
                "debounce.expiry_secs must not be shorter than debounce.window_secs".into(),
            ));
        }
        if self.debounce.sweep_interval_secs == 0 {
            return Err(ConfigError::Message(
                "debounce.sweep_interval_secs must be positive".into(),
            ));
        }
        if self.tables.is_empty() {
            return Err(ConfigError::Message("no tables configured".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_temp(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("lull-{}-{}.toml", name, std::process::id()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_default_config() {
        let config = LullConfig::default();
        assert_eq!(config.debounce.window(), Duration::from_secs(30));
        assert_eq!(config.debounce.expiry(), Duration::from_secs(60));
        assert_eq!(config.kafka.auto_offset_reset, "latest");
        assert_eq!(config.tables.len(), 12);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_tables_allow_list() {
        let config = LullConfig::default();
        let dispatchable: Vec<_> = config
            .tables
            .iter()
            .filter(|t| t.job.is_some())
            .map(|t| t.name.as_str())
            .collect();
        assert_eq!(dispatchable, vec!["faculty", "program", "students", "payment"]);

        let lecturer = config.tables.iter().find(|t| t.name == "lecturer").unwrap();
        assert_eq!(lecturer.topic, "university-server.public.lecturer");
        assert_eq!(lecturer.job, None);
    }

    #[test]
    fn test_config_serialization() {
        let config = LullConfig::default();
        let serialized = serde_json::to_string(&config).unwrap();
        let deserialized: LullConfig = serde_json::from_str(&serialized).unwrap();

        assert_eq!(config.tables, deserialized.tables);
        assert_eq!(config.runtime.job_timeout_secs, deserialized.runtime.job_timeout_secs);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let path = write_temp(
            "override",
            r#"
[debounce]
window_secs = 10
expiry_secs = 20

[[tables]]
name = "orders"
topic = "shop.public.orders"
job = "/jobs/orders.sql"

[[tables]]
name = "audit"
topic = "shop.public.audit"
"#,
        );

        let config: LullConfig = LullConfig::layered(Some(&path))
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.debounce.window_secs, 10);
        assert_eq!(config.debounce.expiry_secs, 20);
        // untouched keys keep their defaults
        assert_eq!(config.debounce.sweep_interval_secs, 30);
        assert_eq!(config.tables.len(), 2);
        assert_eq!(config.tables[0].job.as_deref(), Some("/jobs/orders.sql"));
        assert_eq!(config.tables[1].job, None);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let missing = std::env::temp_dir().join("lull-does-not-exist.toml");
        let config: LullConfig = LullConfig::layered(Some(&missing))
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(config.kafka.group_id, "dynamic-cdc-orchestrator");
    }

    #[test]
    fn test_validation() {
        let mut config = LullConfig::default();
        config.debounce.expiry_secs = 10;
        assert!(config.validate().is_err());

        let mut config = LullConfig::default();
        config.tables.clear();
        assert!(config.validate().is_err());

        let mut config = LullConfig::default();
        config.kafka.poll_timeout_ms = 0;
        assert!(config.validate().is_err());
    }
}
