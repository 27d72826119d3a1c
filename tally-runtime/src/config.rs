use {
    std::{fs, path::PathBuf},
    serde::Deserialize,
    thiserror::Error,
    crate::{
        counter::DEFAULT_COUNTER_KEY,
        kv::{valid_identifier, DEFAULT_KEY_COLUMN, DEFAULT_COUNT_COLUMN},
        metrics::{DEFAULT_METRIC_NAMESPACE, DEFAULT_METRIC_NAME},
    },
};

#[derive(Deserialize, Debug)]
pub struct ServerConfig {
    #[serde(skip_deserializing)]
    pub config_path: Option<PathBuf>,

    #[serde(default = "default_http_port")]
    pub http_port: u16,

    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    pub counter: CounterConfig,

    /// Usage-metric emission is off unless this section is present.
    pub metrics: Option<MetricsConfig>,

    pub logger: Option<LoggerConfig>,
}

#[derive(Deserialize, Debug)]
pub struct CounterConfig {
    #[serde(default = "default_counter_key")]
    pub key: String,

    pub storage: StorageConfig,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type")]
pub enum StorageConfig {
    #[serde(rename = "sqlite")]
    Sqlite {
        #[serde(default = "default_sqlite_path")]
        path: String,
        table: String,
        #[serde(default = "default_key_column")]
        key_column: String,
        #[serde(default = "default_count_column")]
        count_column: String,
    },
    #[serde(rename = "memory")]
    Memory,
}

#[derive(Deserialize, Debug)]
pub struct MetricsConfig {
    #[serde(default = "default_metric_namespace")]
    pub namespace: String,

    #[serde(default = "default_metric_name")]
    pub name: String,

    #[serde(default)]
    pub sink: SinkConfig,
}

#[derive(Deserialize, Debug, Default)]
#[serde(tag = "type")]
pub enum SinkConfig {
    #[default]
    #[serde(rename = "prometheus")]
    Prometheus,
    #[serde(rename = "http")]
    Http {
        endpoint: String,
    },
    #[serde(rename = "noop")]
    Noop,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type")]
pub enum LoggerConfig {
    #[serde(rename = "stdout")]
    Stdout,
    #[serde(rename = "noop")]
    Noop,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0:?}")]
    FailedToRead(std::io::Error),

    #[error("failed to parse config file: {0:?}")]
    FailedToParse(serde_yml::Error),

    #[error("invalid sql identifier in config: {identifier:?}")]
    InvalidIdentifier {
        identifier: String,
    },
}

impl ServerConfig {
    pub fn load(file_path: PathBuf) -> Result<Self, ConfigError> {
        let raw = fs::read(&file_path).map_err(ConfigError::FailedToRead)?;
        let mut config = Self::parse(&raw)?;
        config.config_path = Some(file_path);
        Ok(config)
    }

    pub fn parse(raw: &[u8]) -> Result<Self, ConfigError> {
        let config: Self = serde_yml::from_slice(raw).map_err(ConfigError::FailedToParse)?;
        config.validate()?;
        Ok(config)
    }

    /// Relative storage paths are resolved against the directory holding the
    /// config file, not the process working directory.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        match self.config_path.as_ref().and_then(|v| v.parent()) {
            Some(base) => base.join(path),
            None => PathBuf::from(path),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let StorageConfig::Sqlite { table, key_column, count_column, .. } = &self.counter.storage {
            for identifier in [table, key_column, count_column] {
                if !valid_identifier(identifier) {
                    return Err(ConfigError::InvalidIdentifier { identifier: identifier.clone() });
                }
            }
        }
        Ok(())
    }
}

fn default_http_port() -> u16 {
    8080
}

fn default_metrics_port() -> u16 {
    8081
}

fn default_counter_key() -> String {
    DEFAULT_COUNTER_KEY.to_owned()
}

fn default_sqlite_path() -> String {
    "data/counter.db".to_owned()
}

fn default_key_column() -> String {
    DEFAULT_KEY_COLUMN.to_owned()
}

fn default_count_column() -> String {
    DEFAULT_COUNT_COLUMN.to_owned()
}

fn default_metric_namespace() -> String {
    DEFAULT_METRIC_NAMESPACE.to_owned()
}

fn default_metric_name() -> String {
    DEFAULT_METRIC_NAME.to_owned()
}
