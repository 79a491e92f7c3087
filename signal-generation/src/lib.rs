// Signal Generation
// Decision policies applied to incoming ticks, and the strategy that acts on their output

pub mod signals;
pub mod strategy;

pub use signals::{FnModel, ModelConfig, PredictionModel, ThresholdModel};
pub use strategy::{MlSignalStrategy, MlStrategyConfig, SignalDirection, TradeSignal, ML_STRATEGY_NAME};
