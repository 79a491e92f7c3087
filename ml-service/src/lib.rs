//! Kafka prediction relay: reads stock ticks, runs the decision model, and
//! republishes predictions keyed by symbol.

pub mod config;
pub mod event_bus;
pub mod relay;

pub use crate::config::ServiceConfig;
pub use event_bus::{KafkaPredictionPublisher, KafkaSettings, KafkaTickReader};
pub use relay::{ErrorPolicy, PredictionSink, Relay, RelayConfig, RelayStats, TickSource};
