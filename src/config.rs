use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "TRANSLATION_PUBLISHER";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub sink: SinkConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub forwarder: ForwarderConfig,
    #[serde(default)]
    pub stats_file: Option<PathBuf>,
    /// Fixed partition key for every record; the language pair if unset.
    #[serde(default)]
    pub partition_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SinkConfig {
    /// Connection target, e.g. the Kafka bootstrap servers.
    #[serde(default)]
    pub connection: String,
    /// Sink name, e.g. the topic or event hub.
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_max_batch_bytes")]
    pub max_batch_bytes: usize,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default)]
    pub kafka: KafkaSettings,
}

#[derive(Clone, Deserialize, Serialize)]
pub struct KafkaSettings {
    #[serde(default = "default_compression")]
    pub compression: String,
    #[serde(default = "default_acks")]
    pub acks: String,
    #[serde(default = "default_linger_ms")]
    pub linger_ms: u32,
    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u64,
    #[serde(default)]
    pub security_protocol: Option<String>,
    #[serde(default)]
    pub sasl_mechanism: Option<String>,
    #[serde(default)]
    pub sasl_username: Option<String>,
    #[serde(default)]
    pub sasl_password: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_multiplier_ms")]
    pub backoff_multiplier_ms: u64,
    #[serde(default = "default_min_backoff_ms")]
    pub min_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ForwarderConfig {
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_max_pending_events")]
    pub max_pending_events: usize,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> std::result::Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        settings.try_deserialize()
    }

    /// Builds a configuration from environment variables only, e.g.
    /// `TRANSLATION_PUBLISHER_SINK__CONNECTION`.
    pub fn from_env() -> std::result::Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        settings.try_deserialize()
    }

    pub fn new(connection: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            sink: SinkConfig::new(connection, name),
            retry: RetryConfig::default(),
            forwarder: ForwarderConfig::default(),
            stats_file: None,
            partition_key: None,
        }
    }
}

impl SinkConfig {
    pub fn new(connection: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            connection: connection.into(),
            name: name.into(),
            max_batch_bytes: default_max_batch_bytes(),
            connect_timeout_secs: default_connect_timeout(),
            kafka: KafkaSettings::default(),
        }
    }

    /// Checks the parameters every session needs before it can connect.
    pub fn validate(&self) -> Result<()> {
        if self.connection.trim().is_empty() {
            return Err(Error::Config("sink connection target must be set".to_string()));
        }
        if self.name.trim().is_empty() {
            return Err(Error::Config("sink name must be set".to_string()));
        }
        if self.max_batch_bytes == 0 {
            return Err(Error::Config("sink max_batch_bytes must be greater than zero".to_string()));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl RetryConfig {
    pub fn backoff_multiplier(&self) -> Duration {
        Duration::from_millis(self.backoff_multiplier_ms)
    }

    pub fn min_backoff(&self) -> Duration {
        Duration::from_millis(self.min_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

impl ForwarderConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

impl fmt::Debug for KafkaSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KafkaSettings")
            .field("compression", &self.compression)
            .field("acks", &self.acks)
            .field("linger_ms", &self.linger_ms)
            .field("message_timeout_ms", &self.message_timeout_ms)
            .field("security_protocol", &self.security_protocol)
            .field("sasl_mechanism", &self.sasl_mechanism)
            .field("sasl_username", &self.sasl_username)
            .field("sasl_password", &self.sasl_password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Default for KafkaSettings {
    fn default() -> Self {
        Self {
            compression: default_compression(),
            acks: default_acks(),
            linger_ms: default_linger_ms(),
            message_timeout_ms: default_message_timeout_ms(),
            security_protocol: None,
            sasl_mechanism: None,
            sasl_username: None,
            sasl_password: None,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_multiplier_ms: default_backoff_multiplier_ms(),
            min_backoff_ms: default_min_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: default_flush_interval_ms(),
            max_pending_events: default_max_pending_events(),
        }
    }
}

fn default_max_batch_bytes() -> usize {
    1_048_576 // 1MB
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_compression() -> String {
    "none".to_string()
}

fn default_acks() -> String {
    "all".to_string()
}

fn default_linger_ms() -> u32 {
    5
}

fn default_message_timeout_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_multiplier_ms() -> u64 {
    1_000
}

fn default_min_backoff_ms() -> u64 {
    2_000
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

fn default_flush_interval_ms() -> u64 {
    500
}

fn default_max_pending_events() -> usize {
    100
}
