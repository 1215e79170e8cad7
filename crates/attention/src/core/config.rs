//! Run-time knobs shared by attention implementations.

use super::AttentionError;

/// Configuration driving a single attention call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Config {
    /// Probability for dropout applied to attention weights.
    ///
    /// Callers pass `None` outside of training; the computation is then
    /// deterministic.
    pub dropout_p: Option<f32>,
}

impl Config {
    /// Configuration for evaluation: no dropout.
    pub fn inference() -> Self {
        Self { dropout_p: None }
    }

    /// Configuration for training with the given weight dropout.
    pub fn training(dropout_p: f32) -> Self {
        Self {
            dropout_p: Some(dropout_p),
        }
    }

    /// Rejects dropout probabilities outside `[0, 1)`.
    pub fn validate(&self) -> Result<(), AttentionError> {
        match self.dropout_p {
            Some(p) if !(0.0..1.0).contains(&p) => Err(AttentionError::InvalidConfig {
                message: format!("dropout probability must be in [0, 1), got {p}"),
            }),
            _ => Ok(()),
        }
    }

    /// Dropout probability if it has any effect.
    pub fn active_dropout(&self) -> Option<f32> {
        self.dropout_p.filter(|p| *p > 0.0)
    }
}
