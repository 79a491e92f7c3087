//! Service configuration
//!
//! Resolution order: built-in defaults, then an optional TOML file, then
//! `ML_SERVICE__<SECTION>__<KEY>` environment variables.

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use signal_generation::ModelConfig;

use crate::event_bus::KafkaSettings;
use crate::relay::RelayConfig;
use common::RelayError;

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "ML_SERVICE_CONFIG";

pub const DEFAULT_CONFIG_PATH: &str = "ml-service.toml";

const ENV_PREFIX: &str = "ML_SERVICE";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub kafka: KafkaSettings,

    #[serde(default)]
    pub relay: RelayConfig,

    #[serde(default)]
    pub model: ModelConfig,
}

impl ServiceConfig {
    /// Load from `path` (or `$ML_SERVICE_CONFIG`, or `ml-service.toml`) plus
    /// environment overrides. A missing file is not an error.
    pub fn load(path: Option<&str>) -> Result<Self, RelayError> {
        let path = path
            .map(str::to_string)
            .or_else(|| std::env::var(CONFIG_PATH_ENV).ok())
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

        let settings = Config::builder()
            .add_source(File::new(&path, FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| RelayError::Config(format!("failed to read {}: {}", path, e)))?;

        Self::from_settings(settings)
    }

    /// Parse a TOML document without touching the environment
    pub fn from_toml_str(content: &str) -> Result<Self, RelayError> {
        let settings = Config::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()
            .map_err(|e| RelayError::Config(e.to_string()))?;

        Self::from_settings(settings)
    }

    fn from_settings(settings: Config) -> Result<Self, RelayError> {
        let config: ServiceConfig = settings
            .try_deserialize()
            .map_err(|e| RelayError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RelayError> {
        let kafka = &self.kafka;
        for (name, value) in [
            ("kafka.brokers", &kafka.brokers),
            ("kafka.input_topic", &kafka.input_topic),
            ("kafka.output_topic", &kafka.output_topic),
            ("kafka.group_id", &kafka.group_id),
        ] {
            if value.trim().is_empty() {
                return Err(RelayError::Config(format!("{} must not be empty", name)));
            }
        }
        if kafka.input_topic == kafka.output_topic {
            return Err(RelayError::Config(format!(
                "input and output topic are both '{}'",
                kafka.input_topic
            )));
        }
        if !matches!(kafka.auto_offset_reset.as_str(), "earliest" | "latest" | "error") {
            return Err(RelayError::Config(format!(
                "kafka.auto_offset_reset must be earliest, latest or error (got '{}')",
                kafka.auto_offset_reset
            )));
        }
        self.model.validate()
    }

    /// Write the effective configuration as TOML
    pub fn save(&self, path: &str) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Write a commented configuration file holding the defaults
pub fn write_config_template(path: &str) -> anyhow::Result<()> {
    std::fs::write(path, CONFIG_TEMPLATE)?;
    Ok(())
}

const CONFIG_TEMPLATE: &str = "# ML prediction service configuration
# Every key can be overridden with ML_SERVICE__<SECTION>__<KEY>,
# e.g. ML_SERVICE__KAFKA__BROKERS=broker-1:9092,broker-2:9092

[kafka]
# Comma-separated bootstrap servers
brokers = \"localhost:9092\"

# Topic carrying JSON stock ticks
input_topic = \"stock-data-topic\"

# Topic receiving JSON predictions, keyed by symbol
output_topic = \"ml-predictions-topic\"

# Consumer group shared by all instances of this service
group_id = \"ml-service-group\"

# Where a new consumer group starts: earliest, latest or error
auto_offset_reset = \"earliest\"

# Startup broker probe timeout (ms)
connect_timeout_ms = 5000

# Per-send timeout (ms); leave unset to wait indefinitely
# send_timeout_ms = 5000

# Time allowed to flush pending predictions on shutdown (ms)
flush_timeout_ms = 5000

# Extra librdkafka properties
[kafka.client_properties]
# \"security.protocol\" = \"SSL\"

[relay]
# Malformed tick: skip (log and acknowledge) or halt
on_decode_error = \"skip\"

# Failed publish: halt (message is redelivered after restart) or skip
on_publish_error = \"halt\"

# Pause after a broker receive error (ms)
consume_error_backoff_ms = 500

# Stop after this many messages (unset = run forever)
# max_messages = 1000

[model]
# close > sell_above => SELL
sell_above = 172.0

# close < buy_below => BUY
buy_below = 170.0

# Confidence range for BUY/SELL
strong_confidence_min = 0.8
strong_confidence_max = 0.99

# Confidence range for HOLD
hold_confidence_min = 0.5
hold_confidence_max = 0.7

# Fixed RNG seed for reproducible confidence scores
# seed = 42
";
