use attention::AttentionError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EncoderError>;

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("invalid encoder configuration: {}", .0.join("; "))]
    Config(Vec<String>),

    #[error("shape mismatch: {0}")]
    Shape(String),

    #[error(transparent)]
    Attention(#[from] AttentionError),

    #[error("tensor backend error: {0}")]
    Backend(#[from] candle_core::Error),

    #[error("parameter error: {0}")]
    Parameter(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    ConfigFormat(String),
}

impl EncoderError {
    pub fn shape(message: impl Into<String>) -> Self {
        Self::Shape(message.into())
    }

    pub fn parameter(message: impl Into<String>) -> Self {
        Self::Parameter(message.into())
    }
}

impl From<toml::de::Error> for EncoderError {
    fn from(err: toml::de::Error) -> Self {
        Self::ConfigFormat(err.to_string())
    }
}

impl From<serde_json::Error> for EncoderError {
    fn from(err: serde_json::Error) -> Self {
        Self::ConfigFormat(err.to_string())
    }
}
