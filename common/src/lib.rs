//! Shared types for the prediction relay: the records that travel over the
//! event bus and the error taxonomy every stage reports through.

pub mod error;
pub mod models;

pub use error::{RelayError, RelayResult};
pub use models::{Prediction, PredictionType, StockTick};
