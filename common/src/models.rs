use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::RelayError;

/// Longest payload excerpt kept on a decode error
const MAX_PAYLOAD_EXCERPT: usize = 512;

/// Stock tick as published on the input topic
///
/// Only `symbol`, `timestamp` and `close` are interpreted. Everything else the
/// upstream ingestion service sends (open/high/low/volume, ...) is kept
/// verbatim in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockTick {
    pub symbol: String,
    pub timestamp: String,
    pub close: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StockTick {
    pub fn new(symbol: impl Into<String>, timestamp: impl Into<String>, close: f64) -> Self {
        Self {
            symbol: symbol.into(),
            timestamp: timestamp.into(),
            close,
            extra: Map::new(),
        }
    }

    /// Decode a message body. Failures carry an excerpt of the raw payload.
    pub fn from_json_slice(payload: &[u8]) -> Result<Self, RelayError> {
        serde_json::from_slice(payload).map_err(|e| RelayError::Decode {
            reason: e.to_string(),
            payload: payload_excerpt(payload),
        })
    }
}

/// Model decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PredictionType {
    Buy,
    Sell,
    Hold,
}

impl fmt::Display for PredictionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PredictionType::Buy => "BUY",
            PredictionType::Sell => "SELL",
            PredictionType::Hold => "HOLD",
        };
        f.write_str(s)
    }
}

/// Prediction published on the output topic, keyed by symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub symbol: String,
    /// Copied from the originating tick
    pub timestamp: String,
    pub prediction: PredictionType,
    pub confidence: f64, // 0.0 to 1.0
}

impl Prediction {
    /// Build a prediction that carries the tick's identity
    pub fn for_tick(tick: &StockTick, prediction: PredictionType, confidence: f64) -> Self {
        Self {
            symbol: tick.symbol.clone(),
            timestamp: tick.timestamp.clone(),
            prediction,
            confidence,
        }
    }

    /// Partition key on the output topic
    pub fn key(&self) -> &[u8] {
        self.symbol.as_bytes()
    }

    pub fn to_json(&self) -> Result<String, RelayError> {
        serde_json::to_string(self).map_err(|e| RelayError::Encode(e.to_string()))
    }

    pub fn from_json_slice(payload: &[u8]) -> Result<Self, RelayError> {
        serde_json::from_slice(payload).map_err(|e| RelayError::Decode {
            reason: e.to_string(),
            payload: payload_excerpt(payload),
        })
    }
}

fn payload_excerpt(payload: &[u8]) -> String {
    let text = String::from_utf8_lossy(payload);
    if text.chars().count() > MAX_PAYLOAD_EXCERPT {
        let mut cut: String = text.chars().take(MAX_PAYLOAD_EXCERPT).collect();
        cut.push_str("...");
        cut
    } else {
        text.into_owned()
    }
}
