//! Position-wise feed-forward block.
//!
//! Operates on hidden states shaped `(batch, seq, hidden)`: expands to
//! `intermediate_size`, applies the activation, contracts back to `hidden`.
//! Every position is transformed independently.

use candle_core::{DType, Device, Error, Result, Tensor};
use rand::Rng;

use crate::{
    activations::ActivationKind,
    checks,
    dtypes::PrecisionPolicy,
    linear::{Linear, LinearConfig, LinearInit},
    params::{scoped, ParameterMap, Parameterized},
};

/// Configuration of a feed-forward block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedForwardConfig {
    /// Model hidden size.
    pub hidden_size: usize,
    /// Width of the activation space.
    pub intermediate_size: usize,
    /// Activation between the two projections.
    pub activation: ActivationKind,
}

impl FeedForwardConfig {
    pub fn new(hidden_size: usize, intermediate_size: usize) -> Self {
        Self {
            hidden_size,
            intermediate_size,
            activation: ActivationKind::Relu,
        }
    }

    pub fn with_activation(mut self, activation: ActivationKind) -> Self {
        self.activation = activation;
        self
    }
}

/// `down(activation(up(x)))`.
#[derive(Debug, Clone)]
pub struct FeedForward {
    config: FeedForwardConfig,
    up: Linear,
    down: Linear,
}

impl FeedForward {
    /// Builds the block with both projections initialised by `init`.
    pub fn with_init<R: Rng + ?Sized>(
        config: FeedForwardConfig,
        init: &LinearInit,
        rng: &mut R,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        let up = Linear::with_init(
            LinearConfig::new(config.hidden_size, config.intermediate_size),
            init,
            rng,
            device,
            dtype,
        )?;
        let down = Linear::with_init(
            LinearConfig::new(config.intermediate_size, config.hidden_size),
            init,
            rng,
            device,
            dtype,
        )?;
        Self::from_linears(config, up, down)
    }

    /// Assembles the block from existing projections.
    pub fn from_linears(config: FeedForwardConfig, up: Linear, down: Linear) -> Result<Self> {
        let expected_up = (config.hidden_size, config.intermediate_size);
        let expected_down = (config.intermediate_size, config.hidden_size);
        let actual_up = (up.config().input_dim, up.config().output_dim);
        let actual_down = (down.config().input_dim, down.config().output_dim);
        if actual_up != expected_up || actual_down != expected_down {
            return Err(Error::Msg(format!(
                "feed-forward projections must map {expected_up:?} and {expected_down:?}, got {actual_up:?} and {actual_down:?}"
            )));
        }
        Ok(Self { config, up, down })
    }

    pub fn config(&self) -> &FeedForwardConfig {
        &self.config
    }

    pub fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        checks::expect_batch_seq_hidden("ffn.input", hidden, self.config.hidden_size)?;
        let expanded = self.up.forward(hidden, policy)?;
        let activated = self.config.activation.forward(&expanded, policy)?;
        self.down.forward(&activated, policy)
    }
}

impl Parameterized for FeedForward {
    fn visit_parameters(&self, prefix: &str, out: &mut ParameterMap) {
        self.up.visit_parameters(&scoped(prefix, "up"), out);
        self.down.visit_parameters(&scoped(prefix, "down"), out);
    }
}
