//! Error types emitted by attention implementations.

/// Attention-specific error category.
#[derive(Debug)]
pub enum AttentionError {
    /// Construction-time configuration problem (e.g. indivisible head count).
    InvalidConfig { message: String },
    /// The supplied tensor shapes do not align with the documented contract.
    InvalidShape { context: String },
    /// The kernel does not support the requested data type.
    UnsupportedDType { requested: String },
    /// A backend failure propagated to the caller unchanged.
    Backend(candle_core::Error),
}

impl AttentionError {
    pub(crate) fn shape(context: impl Into<String>) -> Self {
        Self::InvalidShape {
            context: context.into(),
        }
    }
}

impl std::fmt::Display for AttentionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttentionError::InvalidConfig { message } => {
                write!(f, "invalid attention configuration: {message}")
            }
            AttentionError::InvalidShape { context } => {
                write!(f, "invalid tensor shape: {context}")
            }
            AttentionError::UnsupportedDType { requested } => {
                write!(f, "unsupported dtype {requested}")
            }
            AttentionError::Backend(err) => write!(f, "attention backend error: {err}"),
        }
    }
}

impl std::error::Error for AttentionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AttentionError::Backend(err) => Some(err),
            _ => None,
        }
    }
}

impl From<candle_core::Error> for AttentionError {
    fn from(err: candle_core::Error) -> Self {
        AttentionError::Backend(err)
    }
}
