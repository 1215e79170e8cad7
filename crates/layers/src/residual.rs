//! Residual connections with branch dropout.
//!
//! Residual branches combine tensors of shape `(batch, seq, hidden)`. The
//! encoder uses the post-norm wiring `norm(residual + dropout(branch))`;
//! dropout is only active while the owning block is in training mode.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use candle_core::{Error, Result, Tensor};
use candle_nn::ops::dropout;

use crate::{checks, dtypes::PrecisionPolicy, norm::NormalizationLayer};

/// Configuration describing a residual branch.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResidualConfig {
    /// Dropout probability applied to the transformed branch during training.
    pub dropout_p: Option<f32>,
}

impl ResidualConfig {
    pub fn with_dropout(dropout_p: f32) -> Self {
        Self {
            dropout_p: Some(dropout_p),
        }
    }

    /// Dropout probability if it has any effect.
    fn active_dropout(&self) -> Option<f32> {
        self.dropout_p.filter(|p| *p > 0.0)
    }
}

/// Residual add helper with train-only dropout on the branch.
pub struct Residual {
    config: ResidualConfig,
    training: AtomicBool,
}

impl Clone for Residual {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            training: AtomicBool::new(self.is_training()),
        }
    }
}

impl fmt::Debug for Residual {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Residual")
            .field("config", &self.config)
            .field("training", &self.is_training())
            .finish()
    }
}

impl Residual {
    /// Creates a residual helper in training mode.
    pub fn new(config: ResidualConfig) -> Result<Self> {
        if let Some(p) = config.dropout_p {
            if !(0.0..1.0).contains(&p) {
                return Err(Error::Msg(format!(
                    "residual dropout must be in [0, 1), got {p}"
                )));
            }
        }
        Ok(Self {
            config,
            training: AtomicBool::new(true),
        })
    }

    pub fn config(&self) -> &ResidualConfig {
        &self.config
    }

    pub fn set_training(&self, training: bool) {
        self.training.store(training, Ordering::Relaxed);
    }

    pub fn is_training(&self) -> bool {
        self.training.load(Ordering::Relaxed)
    }

    /// Applies dropout to `branch` when training; identity otherwise.
    pub fn apply_dropout(&self, branch: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        match self.config.active_dropout() {
            Some(p) if self.is_training() => {
                let compute = policy.cast_for_matmul(branch)?;
                policy.cast_to_storage(&dropout(&compute, p)?)
            }
            _ => Ok(branch.clone()),
        }
    }

    /// Adds `branch` to `residual` after checking they line up.
    pub fn add(
        &self,
        branch: &Tensor,
        residual: &Tensor,
        policy: &PrecisionPolicy,
    ) -> Result<Tensor> {
        checks::expect_rank("residual.input", residual, 3)?;
        checks::expect_shape("residual.branch", branch, residual.dims())?;
        checks::expect_same_dtype("residual.branch", branch, "residual.input", residual)?;

        let sum = policy
            .cast_for_matmul(branch)?
            .add(&policy.cast_for_matmul(residual)?)?;
        policy.cast_to_storage(&sum)
    }

    /// Post-norm residual step: `norm(residual + dropout(branch))`.
    pub fn postnorm_step(
        &self,
        branch: &Tensor,
        residual: &Tensor,
        norm: &dyn NormalizationLayer,
        policy: &PrecisionPolicy,
    ) -> Result<Tensor> {
        let dropped = self.apply_dropout(branch, policy)?;
        let summed = self.add(&dropped, residual, policy)?;
        norm.forward(&summed, policy)
    }
}
