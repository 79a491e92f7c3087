// Relay loop
// Single sequential worker: receive one tick, predict, publish, acknowledge, repeat

use async_trait::async_trait;
use common::{Prediction, RelayError, RelayResult, StockTick};
use serde::{Deserialize, Serialize};
use signal_generation::PredictionModel;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Inbound side of the relay
#[async_trait]
pub trait TickSource: Send {
    /// Wait for the next message and decode it
    async fn next_tick(&mut self) -> RelayResult<StockTick>;

    /// Mark the last message returned by `next_tick` as handled
    async fn acknowledge(&mut self) -> RelayResult<()>;

    async fn close(&mut self);
}

/// Outbound side of the relay
#[async_trait]
pub trait PredictionSink: Send {
    async fn publish(&self, prediction: &Prediction) -> RelayResult<()>;

    async fn close(&mut self);
}

/// What to do with a message that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Log, acknowledge, move on
    Skip,
    /// Log and stop the relay without acknowledging
    Halt,
}

/// Relay behaviour settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_on_decode_error")]
    pub on_decode_error: ErrorPolicy,

    #[serde(default = "default_on_publish_error")]
    pub on_publish_error: ErrorPolicy,

    /// Pause after a broker receive error
    #[serde(default = "default_consume_error_backoff_ms")]
    pub consume_error_backoff_ms: u64,

    /// Stop after this many inbound messages
    #[serde(default)]
    pub max_messages: Option<u64>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            on_decode_error: default_on_decode_error(),
            on_publish_error: default_on_publish_error(),
            consume_error_backoff_ms: default_consume_error_backoff_ms(),
            max_messages: None,
        }
    }
}

fn default_on_decode_error() -> ErrorPolicy {
    ErrorPolicy::Skip
}

fn default_on_publish_error() -> ErrorPolicy {
    ErrorPolicy::Halt
}

fn default_consume_error_backoff_ms() -> u64 {
    500
}

/// Counters reported when the relay stops
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub received: u64,
    pub published: u64,
    pub decode_failures: u64,
    pub publish_failures: u64,
    pub consume_failures: u64,
}

impl RelayStats {
    /// Inbound messages seen, decodable or not
    pub fn handled(&self) -> u64 {
        self.received + self.decode_failures
    }
}

pub struct Relay<S, M, P> {
    source: S,
    model: M,
    sink: P,
    config: RelayConfig,
    stats: RelayStats,
}

impl<S, M, P> Relay<S, M, P>
where
    S: TickSource,
    M: PredictionModel,
    P: PredictionSink,
{
    pub fn new(source: S, model: M, sink: P, config: RelayConfig) -> Self {
        Self {
            source,
            model,
            sink,
            config,
            stats: RelayStats::default(),
        }
    }

    /// Run until shutdown, `max_messages`, or a halting error.
    ///
    /// Both connections are closed before this returns, whatever the outcome.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> RelayResult<RelayStats> {
        info!("Relay started with model '{}'", self.model.name());

        let result = self.process(&mut shutdown).await;

        self.source.close().await;
        self.sink.close().await;

        info!(
            received = self.stats.received,
            published = self.stats.published,
            decode_failures = self.stats.decode_failures,
            publish_failures = self.stats.publish_failures,
            consume_failures = self.stats.consume_failures,
            "Relay stopped"
        );

        match result {
            Ok(()) => Ok(self.stats),
            Err(e) => {
                error!(kind = e.kind(), "Relay halted: {}", e);
                Err(e)
            }
        }
    }

    async fn process(&mut self, shutdown: &mut watch::Receiver<bool>) -> RelayResult<()> {
        loop {
            if *shutdown.borrow() {
                info!("Shutdown requested, stopping relay");
                return Ok(());
            }
            if let Some(max) = self.config.max_messages {
                if self.stats.handled() >= max {
                    info!("Reached max_messages ({}), stopping relay", max);
                    return Ok(());
                }
            }

            // Only the wait for input is raced against shutdown; a tick that
            // has been received is always carried through to the sink.
            let next = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        info!("Shutdown handle dropped, stopping relay");
                        return Ok(());
                    }
                    continue;
                }
                next = self.source.next_tick() => next,
            };

            self.handle(next).await?;
        }
    }

    async fn handle(&mut self, next: RelayResult<StockTick>) -> RelayResult<()> {
        match next {
            Ok(tick) => {
                self.stats.received += 1;
                debug!("Received tick for {} at {} (close: {})", tick.symbol, tick.timestamp, tick.close);

                let prediction = self.model.predict(&tick);
                match self.sink.publish(&prediction).await {
                    Ok(()) => {
                        self.stats.published += 1;
                        info!(
                            "Published prediction for {}: {} (confidence: {:.2})",
                            prediction.symbol, prediction.prediction, prediction.confidence
                        );
                        self.acknowledge().await;
                        Ok(())
                    }
                    Err(e) => {
                        self.stats.publish_failures += 1;
                        error!(
                            kind = e.kind(),
                            symbol = %prediction.symbol,
                            timestamp = %prediction.timestamp,
                            "Failed to publish prediction: {}", e
                        );
                        match self.config.on_publish_error {
                            ErrorPolicy::Halt => Err(e),
                            ErrorPolicy::Skip => {
                                self.acknowledge().await;
                                Ok(())
                            }
                        }
                    }
                }
            }
            Err(e @ RelayError::Decode { .. }) => {
                self.stats.decode_failures += 1;
                if let RelayError::Decode { reason, payload } = &e {
                    error!(kind = "decode", %payload, "Malformed tick: {}", reason);
                }
                match self.config.on_decode_error {
                    ErrorPolicy::Halt => Err(e),
                    ErrorPolicy::Skip => {
                        self.acknowledge().await;
                        Ok(())
                    }
                }
            }
            Err(e) => {
                self.stats.consume_failures += 1;
                warn!(kind = e.kind(), "Receive failed: {}", e);
                tokio::time::sleep(Duration::from_millis(self.config.consume_error_backoff_ms)).await;
                Ok(())
            }
        }
    }

    async fn acknowledge(&mut self) {
        if let Err(e) = self.source.acknowledge().await {
            warn!("Failed to store consumer offset: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::PredictionType;
    use signal_generation::{FnModel, ThresholdModel};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Scripted source; flips the shutdown flag once drained
    struct ScriptedSource {
        items: VecDeque<RelayResult<StockTick>>,
        shutdown: Option<watch::Sender<bool>>,
        acked: Arc<Mutex<u64>>,
        closed: Arc<Mutex<bool>>,
    }

    #[async_trait]
    impl TickSource for ScriptedSource {
        async fn next_tick(&mut self) -> RelayResult<StockTick> {
            if let Some(item) = self.items.pop_front() {
                return item;
            }
            if let Some(tx) = self.shutdown.take() {
                let _ = tx.send(true);
            }
            std::future::pending().await
        }

        async fn acknowledge(&mut self) -> RelayResult<()> {
            *self.acked.lock().unwrap() += 1;
            Ok(())
        }

        async fn close(&mut self) {
            *self.closed.lock().unwrap() = true;
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        published: Arc<Mutex<Vec<Prediction>>>,
        fail_symbols: Vec<String>,
        closed: Arc<Mutex<bool>>,
    }

    #[async_trait]
    impl PredictionSink for RecordingSink {
        async fn publish(&self, prediction: &Prediction) -> RelayResult<()> {
            if self.fail_symbols.contains(&prediction.symbol) {
                return Err(RelayError::Publish {
                    symbol: prediction.symbol.clone(),
                    reason: "broker unavailable".to_string(),
                });
            }
            self.published.lock().unwrap().push(prediction.clone());
            Ok(())
        }

        async fn close(&mut self) {
            *self.closed.lock().unwrap() = true;
        }
    }

    struct Harness {
        published: Arc<Mutex<Vec<Prediction>>>,
        acked: Arc<Mutex<u64>>,
        source_closed: Arc<Mutex<bool>>,
        sink_closed: Arc<Mutex<bool>>,
    }

    async fn run_relay(
        items: Vec<RelayResult<StockTick>>,
        fail_symbols: Vec<&str>,
        config: RelayConfig,
    ) -> (RelayResult<RelayStats>, Harness) {
        let (tx, rx) = watch::channel(false);
        let harness = Harness {
            published: Arc::new(Mutex::new(Vec::new())),
            acked: Arc::new(Mutex::new(0)),
            source_closed: Arc::new(Mutex::new(false)),
            sink_closed: Arc::new(Mutex::new(false)),
        };
        let source = ScriptedSource {
            items: items.into(),
            shutdown: Some(tx),
            acked: harness.acked.clone(),
            closed: harness.source_closed.clone(),
        };
        let sink = RecordingSink {
            published: harness.published.clone(),
            fail_symbols: fail_symbols.into_iter().map(String::from).collect(),
            closed: harness.sink_closed.clone(),
        };

        let result = Relay::new(source, ThresholdModel::with_seed(42), sink, config)
            .run(rx)
            .await;
        (result, harness)
    }

    fn tick(symbol: &str, close: f64) -> RelayResult<StockTick> {
        Ok(StockTick::new(symbol, "2024-01-01T00:00:00Z", close))
    }

    fn malformed() -> RelayResult<StockTick> {
        StockTick::from_json_slice(b"{\"symbol\": \"AAPL\", \"close\": ")
    }

    #[tokio::test]
    async fn test_relays_each_tick_in_order() {
        let (result, h) = run_relay(
            vec![tick("AAPL", 175.0), tick("MSFT", 168.0), tick("GOOG", 171.0)],
            vec![],
            RelayConfig::default(),
        )
        .await;

        let stats = result.unwrap();
        assert_eq!(stats.received, 3);
        assert_eq!(stats.published, 3);

        let published = h.published.lock().unwrap();
        let kinds: Vec<_> = published.iter().map(|p| (p.symbol.as_str(), p.prediction)).collect();
        assert_eq!(
            kinds,
            vec![
                ("AAPL", PredictionType::Sell),
                ("MSFT", PredictionType::Buy),
                ("GOOG", PredictionType::Hold),
            ]
        );
        assert!(published.iter().all(|p| p.timestamp == "2024-01-01T00:00:00Z"));
        assert_eq!(*h.acked.lock().unwrap(), 3);
        assert!(*h.source_closed.lock().unwrap());
        assert!(*h.sink_closed.lock().unwrap());
    }

    #[tokio::test]
    async fn test_malformed_tick_is_skipped_by_default() {
        let (result, h) = run_relay(
            vec![tick("AAPL", 175.0), malformed(), tick("AAPL", 168.0)],
            vec![],
            RelayConfig::default(),
        )
        .await;

        let stats = result.unwrap();
        assert_eq!(stats.decode_failures, 1);
        assert_eq!(stats.published, 2);
        assert_eq!(h.published.lock().unwrap().len(), 2);
        // skipped message is still acknowledged
        assert_eq!(*h.acked.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_malformed_tick_halts_when_configured() {
        let config = RelayConfig {
            on_decode_error: ErrorPolicy::Halt,
            ..RelayConfig::default()
        };
        let (result, h) = run_relay(vec![malformed(), tick("AAPL", 175.0)], vec![], config).await;

        assert!(result.unwrap_err().is_decode());
        assert!(h.published.lock().unwrap().is_empty());
        assert_eq!(*h.acked.lock().unwrap(), 0);
        assert!(*h.source_closed.lock().unwrap());
        assert!(*h.sink_closed.lock().unwrap());
    }

    #[tokio::test]
    async fn test_publish_failure_halts_without_ack() {
        let (result, h) = run_relay(
            vec![tick("AAPL", 175.0), tick("TSLA", 160.0), tick("MSFT", 171.0)],
            vec!["TSLA"],
            RelayConfig::default(),
        )
        .await;

        let err = result.unwrap_err();
        assert!(err.is_publish());
        assert!(!err.is_decode());
        assert_eq!(h.published.lock().unwrap().len(), 1);
        assert_eq!(*h.acked.lock().unwrap(), 1);
        assert!(*h.source_closed.lock().unwrap());
        assert!(*h.sink_closed.lock().unwrap());
    }

    #[tokio::test]
    async fn test_publish_failure_skipped_when_configured() {
        let config = RelayConfig {
            on_publish_error: ErrorPolicy::Skip,
            ..RelayConfig::default()
        };
        let (result, h) = run_relay(
            vec![tick("TSLA", 160.0), tick("AAPL", 175.0)],
            vec!["TSLA"],
            config,
        )
        .await;

        let stats = result.unwrap();
        assert_eq!(stats.publish_failures, 1);
        assert_eq!(stats.published, 1);
        assert_eq!(*h.acked.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_consume_error_is_not_fatal() {
        let config = RelayConfig {
            consume_error_backoff_ms: 0,
            ..RelayConfig::default()
        };
        let (result, h) = run_relay(
            vec![Err(RelayError::Consume("transport failure".to_string())), tick("AAPL", 175.0)],
            vec![],
            config,
        )
        .await;

        let stats = result.unwrap();
        assert_eq!(stats.consume_failures, 1);
        assert_eq!(stats.published, 1);
        assert_eq!(h.published.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_max_messages_stops_relay() {
        let config = RelayConfig {
            max_messages: Some(2),
            ..RelayConfig::default()
        };
        let (result, h) = run_relay(
            vec![tick("AAPL", 175.0), malformed(), tick("AAPL", 168.0)],
            vec![],
            config,
        )
        .await;

        let stats = result.unwrap();
        assert_eq!(stats.handled(), 2);
        assert_eq!(h.published.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_before_first_tick() {
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let published = Arc::new(Mutex::new(Vec::new()));
        let source = ScriptedSource {
            items: vec![tick("AAPL", 175.0)].into(),
            shutdown: None,
            acked: Arc::new(Mutex::new(0)),
            closed: Arc::new(Mutex::new(false)),
        };
        let sink = RecordingSink {
            published: published.clone(),
            ..RecordingSink::default()
        };

        let stats = Relay::new(source, ThresholdModel::with_seed(1), sink, RelayConfig::default())
            .run(rx)
            .await
            .unwrap();

        assert_eq!(stats, RelayStats::default());
        assert!(published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_injected_model_is_used() {
        let (tx, rx) = watch::channel(false);
        let published = Arc::new(Mutex::new(Vec::new()));
        let source = ScriptedSource {
            items: vec![tick("AAPL", 175.0), tick("MSFT", 100.0)].into(),
            shutdown: Some(tx),
            acked: Arc::new(Mutex::new(0)),
            closed: Arc::new(Mutex::new(false)),
        };
        let sink = RecordingSink {
            published: published.clone(),
            ..RecordingSink::default()
        };
        let model = FnModel::new("always-hold", |t: &StockTick| {
            Prediction::for_tick(t, PredictionType::Hold, 0.55)
        });

        Relay::new(source, model, sink, RelayConfig::default())
            .run(rx)
            .await
            .unwrap();

        let published = published.lock().unwrap();
        assert_eq!(published.len(), 2);
        assert!(published.iter().all(|p| p.prediction == PredictionType::Hold));
    }
}
