// ML-based trading strategy
// Turns confident BUY/SELL predictions into trade signals

use chrono::{DateTime, Utc};
use common::{Prediction, PredictionType};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

pub const ML_STRATEGY_NAME: &str = "ML_BASED_STRATEGY";

/// Signal direction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SignalDirection {
    Buy,
    Sell,
}

/// Trade signal derived from a model prediction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeSignal {
    pub id: Uuid,
    pub symbol: String,
    pub timestamp: String,
    pub direction: SignalDirection,
    pub confidence: f64,
    pub strategy_name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Configuration for the ML strategy
#[derive(Debug, Clone)]
pub struct MlStrategyConfig {
    /// Confidence must be strictly above this to act
    pub min_confidence: f64,
}

impl Default for MlStrategyConfig {
    fn default() -> Self {
        Self { min_confidence: 0.7 }
    }
}

pub struct MlSignalStrategy {
    config: MlStrategyConfig,
}

impl MlSignalStrategy {
    pub fn new(config: MlStrategyConfig) -> Self {
        Self { config }
    }

    pub fn name(&self) -> &'static str {
        ML_STRATEGY_NAME
    }

    /// HOLD and low-confidence predictions produce no signal
    pub fn signal_from_prediction(&self, prediction: &Prediction) -> Option<TradeSignal> {
        let direction = match prediction.prediction {
            PredictionType::Buy => SignalDirection::Buy,
            PredictionType::Sell => SignalDirection::Sell,
            PredictionType::Hold => return None,
        };

        if prediction.confidence <= self.config.min_confidence {
            debug!(
                "Ignoring {} for {}: confidence {:.2} <= {:.2}",
                prediction.prediction, prediction.symbol, prediction.confidence, self.config.min_confidence
            );
            return None;
        }

        Some(TradeSignal {
            id: Uuid::new_v4(),
            symbol: prediction.symbol.clone(),
            timestamp: prediction.timestamp.clone(),
            direction,
            confidence: prediction.confidence,
            strategy_name: ML_STRATEGY_NAME.to_string(),
            description: format!(
                "ML {}: Prediction {} with {:.2} confidence",
                prediction.prediction, prediction.prediction, prediction.confidence
            ),
            created_at: Utc::now(),
        })
    }
}

impl Default for MlSignalStrategy {
    fn default() -> Self {
        Self::new(MlStrategyConfig::default())
    }
}
