use common::{Prediction, PredictionType, RelayError, StockTick};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Decision policy that turns one tick into one prediction
///
/// The relay only depends on this trait, so a trained model can replace the
/// threshold rules without touching the pipeline.
pub trait PredictionModel: Send {
    fn predict(&mut self, tick: &StockTick) -> Prediction;
    fn name(&self) -> &str;
}

/// Configuration for the threshold model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Close strictly above this is a SELL
    #[serde(default = "default_sell_above")]
    pub sell_above: f64,

    /// Close strictly below this is a BUY
    #[serde(default = "default_buy_below")]
    pub buy_below: f64,

    #[serde(default = "default_strong_confidence_min")]
    pub strong_confidence_min: f64,

    #[serde(default = "default_strong_confidence_max")]
    pub strong_confidence_max: f64,

    #[serde(default = "default_hold_confidence_min")]
    pub hold_confidence_min: f64,

    #[serde(default = "default_hold_confidence_max")]
    pub hold_confidence_max: f64,

    /// Fixed RNG seed; entropy-seeded when absent
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            sell_above: default_sell_above(),
            buy_below: default_buy_below(),
            strong_confidence_min: default_strong_confidence_min(),
            strong_confidence_max: default_strong_confidence_max(),
            hold_confidence_min: default_hold_confidence_min(),
            hold_confidence_max: default_hold_confidence_max(),
            seed: None,
        }
    }
}

fn default_sell_above() -> f64 {
    172.0
}

fn default_buy_below() -> f64 {
    170.0
}

fn default_strong_confidence_min() -> f64 {
    0.8
}

fn default_strong_confidence_max() -> f64 {
    0.99
}

fn default_hold_confidence_min() -> f64 {
    0.5
}

fn default_hold_confidence_max() -> f64 {
    0.7
}

impl ModelConfig {
    pub fn validate(&self) -> Result<(), RelayError> {
        if !self.sell_above.is_finite() || !self.buy_below.is_finite() {
            return Err(RelayError::Config("model thresholds must be finite".to_string()));
        }
        if self.buy_below > self.sell_above {
            return Err(RelayError::Config(format!(
                "model.buy_below ({}) must not exceed model.sell_above ({})",
                self.buy_below, self.sell_above
            )));
        }
        check_range("strong_confidence", self.strong_confidence_min, self.strong_confidence_max)?;
        check_range("hold_confidence", self.hold_confidence_min, self.hold_confidence_max)?;
        Ok(())
    }
}

fn check_range(name: &str, min: f64, max: f64) -> Result<(), RelayError> {
    let in_unit = |v: f64| (0.0..=1.0).contains(&v);
    if !in_unit(min) || !in_unit(max) || min > max {
        return Err(RelayError::Config(format!(
            "model.{name} range [{min}, {max}] must satisfy 0 <= min <= max <= 1"
        )));
    }
    Ok(())
}

/// Placeholder model: fixed price bands with a randomized confidence score
pub struct ThresholdModel {
    config: ModelConfig,
    rng: fastrand::Rng,
}

impl ThresholdModel {
    pub fn new(config: ModelConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => fastrand::Rng::with_seed(seed),
            None => fastrand::Rng::new(),
        };
        Self { config, rng }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::new(ModelConfig {
            seed: Some(seed),
            ..ModelConfig::default()
        })
    }

    /// Uniform draw in [low, high], rounded to two decimals
    fn sample_confidence(&mut self, low: f64, high: f64) -> f64 {
        let raw = low + self.rng.f64() * (high - low);
        ((raw * 100.0).round() / 100.0).clamp(low, high)
    }
}

impl Default for ThresholdModel {
    fn default() -> Self {
        Self::new(ModelConfig::default())
    }
}

impl PredictionModel for ThresholdModel {
    fn predict(&mut self, tick: &StockTick) -> Prediction {
        let (prediction, confidence) = if tick.close > self.config.sell_above {
            let c = self.sample_confidence(
                self.config.strong_confidence_min,
                self.config.strong_confidence_max,
            );
            (PredictionType::Sell, c)
        } else if tick.close < self.config.buy_below {
            let c = self.sample_confidence(
                self.config.strong_confidence_min,
                self.config.strong_confidence_max,
            );
            (PredictionType::Buy, c)
        } else {
            let c = self.sample_confidence(
                self.config.hold_confidence_min,
                self.config.hold_confidence_max,
            );
            (PredictionType::Hold, c)
        };

        debug!(
            "{} @ {}: close {} -> {} ({:.2})",
            tick.symbol, tick.timestamp, tick.close, prediction, confidence
        );
        Prediction::for_tick(tick, prediction, confidence)
    }

    fn name(&self) -> &str {
        "threshold"
    }
}

/// Adapts any closure with the model signature
pub struct FnModel<F> {
    name: String,
    f: F,
}

impl<F> FnModel<F>
where
    F: FnMut(&StockTick) -> Prediction + Send,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

impl<F> PredictionModel for FnModel<F>
where
    F: FnMut(&StockTick) -> Prediction + Send,
{
    fn predict(&mut self, tick: &StockTick) -> Prediction {
        (self.f)(tick)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
