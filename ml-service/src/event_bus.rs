use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::ClientContext;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::relay::{PredictionSink, TickSource};
use common::{Prediction, RelayError, RelayResult, StockTick};

/// Broker connection settings shared by the reader and the publisher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KafkaSettings {
    /// Comma-separated bootstrap servers
    #[serde(default = "default_brokers")]
    pub brokers: String,

    #[serde(default = "default_input_topic")]
    pub input_topic: String,

    #[serde(default = "default_output_topic")]
    pub output_topic: String,

    #[serde(default = "default_group_id")]
    pub group_id: String,

    /// Where a new consumer group starts reading
    #[serde(default = "default_auto_offset_reset")]
    pub auto_offset_reset: String,

    /// Bound on the startup metadata probe
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Per-send timeout; unbounded when absent
    #[serde(default)]
    pub send_timeout_ms: Option<u64>,

    /// Bound on flushing pending deliveries at shutdown
    #[serde(default = "default_flush_timeout_ms")]
    pub flush_timeout_ms: u64,

    /// Extra librdkafka properties applied to both clients
    #[serde(default)]
    pub client_properties: HashMap<String, String>,
}

impl Default for KafkaSettings {
    fn default() -> Self {
        Self {
            brokers: default_brokers(),
            input_topic: default_input_topic(),
            output_topic: default_output_topic(),
            group_id: default_group_id(),
            auto_offset_reset: default_auto_offset_reset(),
            connect_timeout_ms: default_connect_timeout_ms(),
            send_timeout_ms: None,
            flush_timeout_ms: default_flush_timeout_ms(),
            client_properties: HashMap::new(),
        }
    }
}

fn default_brokers() -> String {
    "localhost:9092".to_string()
}

fn default_input_topic() -> String {
    "stock-data-topic".to_string()
}

fn default_output_topic() -> String {
    "ml-predictions-topic".to_string()
}

fn default_group_id() -> String {
    "ml-service-group".to_string()
}

fn default_auto_offset_reset() -> String {
    "earliest".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_flush_timeout_ms() -> u64 {
    5000
}

impl KafkaSettings {
    fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.brokers);
        for (key, value) in &self.client_properties {
            config.set(key, value);
        }
        config
    }

    fn send_timeout(&self) -> Timeout {
        match self.send_timeout_ms {
            Some(ms) => Timeout::After(Duration::from_millis(ms)),
            None => Timeout::Never,
        }
    }
}

/// Fail fast when no broker answers a metadata request
fn check_metadata<C: ClientContext>(
    client: &rdkafka::client::Client<C>,
    topic: &str,
    timeout: Duration,
) -> RelayResult<()> {
    let metadata = client
        .fetch_metadata(Some(topic), timeout)
        .map_err(|e| RelayError::Connection(format!("metadata request failed: {}", e)))?;

    if metadata.brokers().is_empty() {
        return Err(RelayError::Connection("no brokers in cluster metadata".to_string()));
    }
    match metadata.topics().iter().find(|t| t.name() == topic) {
        Some(t) if t.error().is_none() => {
            debug!("Topic {} has {} partitions", topic, t.partitions().len());
        }
        _ => warn!("Topic {} is not available yet; relying on broker auto-creation", topic),
    }
    Ok(())
}

/// Runs a blocking librdkafka call off the async worker threads
async fn run_blocking<T, F>(f: F) -> RelayResult<T>
where
    F: FnOnce() -> RelayResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| RelayError::Connection(format!("blocking broker task failed: {}", e)))?
}

/// Consumes JSON stock ticks from the input topic
///
/// Offsets are stored only when the relay acknowledges a message, and
/// auto-commit flushes the stored offsets. A crash between receive and
/// acknowledge therefore redelivers the message.
pub struct KafkaTickReader {
    consumer: StreamConsumer,
    topic: String,
    pending: Option<(i32, i64)>,
}

impl KafkaTickReader {
    pub async fn connect(settings: &KafkaSettings) -> RelayResult<Self> {
        let mut client_config = settings.client_config();
        client_config
            .set("group.id", &settings.group_id)
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", &settings.auto_offset_reset);

        // probe on a throwaway client so the group is only joined once the broker answers
        let probe_config = client_config.clone();
        let topic = settings.input_topic.clone();
        let timeout = Duration::from_millis(settings.connect_timeout_ms);
        run_blocking(move || {
            let probe: BaseConsumer = probe_config
                .create()
                .map_err(|e| RelayError::Connection(format!("failed to create consumer: {}", e)))?;
            check_metadata(probe.client(), &topic, timeout)
        })
        .await?;

        let consumer: StreamConsumer = client_config
            .create()
            .map_err(|e| RelayError::Connection(format!("failed to create consumer: {}", e)))?;

        consumer
            .subscribe(&[settings.input_topic.as_str()])
            .map_err(|e| RelayError::Connection(format!("failed to subscribe: {}", e)))?;

        info!(
            "Listening for messages on topic: {} (group: {})",
            settings.input_topic, settings.group_id
        );

        Ok(Self {
            consumer,
            topic: settings.input_topic.clone(),
            pending: None,
        })
    }
}

#[async_trait]
impl TickSource for KafkaTickReader {
    async fn next_tick(&mut self) -> RelayResult<StockTick> {
        let message = self
            .consumer
            .recv()
            .await
            .map_err(|e| RelayError::Consume(e.to_string()))?;

        self.pending = Some((message.partition(), message.offset()));
        debug!(
            "Received message from {} [{}] at offset {}",
            message.topic(),
            message.partition(),
            message.offset()
        );

        match message.payload() {
            None | Some([]) => Err(RelayError::Decode {
                reason: "empty payload".to_string(),
                payload: String::new(),
            }),
            Some(payload) => StockTick::from_json_slice(payload),
        }
    }

    async fn acknowledge(&mut self) -> RelayResult<()> {
        if let Some((partition, offset)) = self.pending.take() {
            // librdkafka stores offset + 1, the next position to read
            self.consumer
                .store_offset(&self.topic, partition, offset)
                .map_err(|e| RelayError::Consume(format!("failed to store offset: {}", e)))?;
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.consumer.unsubscribe();
        info!("Consumer for {} closed", self.topic);
    }
}

/// Publishes JSON predictions to the output topic, keyed by symbol
pub struct KafkaPredictionPublisher {
    producer: FutureProducer,
    topic: String,
    send_timeout: Timeout,
    flush_timeout: Duration,
}

impl KafkaPredictionPublisher {
    pub async fn connect(settings: &KafkaSettings) -> RelayResult<Self> {
        let producer: FutureProducer = settings
            .client_config()
            .create()
            .map_err(|e| RelayError::Connection(format!("failed to create producer: {}", e)))?;

        let probe = producer.clone();
        let topic = settings.output_topic.clone();
        let timeout = Duration::from_millis(settings.connect_timeout_ms);
        run_blocking(move || check_metadata(probe.client(), &topic, timeout)).await?;

        info!("Publishing predictions to topic: {}", settings.output_topic);

        Ok(Self {
            producer,
            topic: settings.output_topic.clone(),
            send_timeout: settings.send_timeout(),
            flush_timeout: Duration::from_millis(settings.flush_timeout_ms),
        })
    }
}

#[async_trait]
impl PredictionSink for KafkaPredictionPublisher {
    async fn publish(&self, prediction: &Prediction) -> RelayResult<()> {
        let value = prediction.to_json()?;

        debug!("Publishing to {}: {:?}", self.topic, prediction);

        let (partition, offset) = self
            .producer
            .send(
                FutureRecord::to(&self.topic).key(prediction.key()).payload(&value),
                self.send_timeout,
            )
            .await
            .map_err(|(e, _): (KafkaError, _)| RelayError::Publish {
                symbol: prediction.symbol.clone(),
                reason: e.to_string(),
            })?;

        debug!("Delivered to {} [{}] at offset {}", self.topic, partition, offset);
        Ok(())
    }

    async fn close(&mut self) {
        let producer = self.producer.clone();
        let flush_timeout = self.flush_timeout;
        match tokio::task::spawn_blocking(move || producer.flush(flush_timeout)).await {
            Ok(Ok(())) => info!("Producer for {} flushed and closed", self.topic),
            Ok(Err(e)) => error!("Failed to flush producer for {}: {}", self.topic, e),
            Err(e) => error!("Failed to flush producer for {}: {}", self.topic, e),
        }
    }
}
