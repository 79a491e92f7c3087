use thiserror::Error;

/// Errors raised anywhere along the consume -> predict -> publish path.
///
/// Decode and publish failures are separate variants so the relay can apply a
/// different policy to each.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("Cannot reach broker: {0}")]
    Connection(String),

    #[error("Failed to receive message: {0}")]
    Consume(String),

    #[error("Malformed message: {reason}")]
    Decode { reason: String, payload: String },

    #[error("Failed to encode prediction: {0}")]
    Encode(String),

    #[error("Failed to publish prediction for {symbol}: {reason}")]
    Publish { symbol: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl RelayError {
    /// Short label used in log fields
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::Connection(_) => "connection",
            RelayError::Consume(_) => "consume",
            RelayError::Decode { .. } => "decode",
            RelayError::Encode(_) => "encode",
            RelayError::Publish { .. } => "publish",
            RelayError::Config(_) => "config",
        }
    }

    pub fn is_decode(&self) -> bool {
        matches!(self, RelayError::Decode { .. })
    }

    pub fn is_publish(&self) -> bool {
        matches!(self, RelayError::Publish { .. } | RelayError::Encode(_))
    }
}

pub type RelayResult<T> = std::result::Result<T, RelayError>;
