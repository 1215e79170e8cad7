//! Layer normalisation over the hidden axis.
//!
//! Inputs follow the `(batch, seq, hidden)` convention. Mean and variance are
//! computed in [`PrecisionPolicy::reduction`]; the affine scale and shift are
//! applied in the compute dtype before casting back to storage.

use candle_core::{DType, Device, Result, Tensor, D};

use crate::{
    checks,
    dtypes::PrecisionPolicy,
    params::{scoped, Parameter, ParameterMap, Parameterized},
};

/// Configuration of a normalisation layer.
#[derive(Debug, Clone, PartialEq)]
pub struct NormConfig {
    /// Size of the hidden dimension being normalised.
    pub hidden_size: usize,
    /// Added to the variance before the square root.
    pub epsilon: f64,
}

impl NormConfig {
    pub fn new(hidden_size: usize) -> Self {
        Self {
            hidden_size,
            epsilon: 1e-5,
        }
    }

    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }
}

/// Shared interface for normalisation layers applied after residual adds.
pub trait NormalizationLayer: Send + Sync {
    fn config(&self) -> &NormConfig;

    /// Normalises `hidden` along its last axis.
    fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor>;
}

/// LayerNorm with a learnable per-feature scale and shift.
#[derive(Debug, Clone)]
pub struct LayerNorm {
    config: NormConfig,
    weight: Parameter,
    bias: Parameter,
}

impl LayerNorm {
    /// Creates a LayerNorm with scale one and shift zero.
    pub fn new(config: NormConfig, device: &Device, dtype: DType) -> Result<Self> {
        let weight = Tensor::ones(config.hidden_size, dtype, device)?;
        let bias = Tensor::zeros(config.hidden_size, dtype, device)?;
        Self::from_tensors(weight, bias, config)
    }

    /// Wraps existing scale and shift tensors.
    pub fn from_tensors(weight: Tensor, bias: Tensor, config: NormConfig) -> Result<Self> {
        for (label, tensor) in [("norm.weight", &weight), ("norm.bias", &bias)] {
            checks::expect_shape(label, tensor, &[config.hidden_size])?;
            checks::expect_dtype_in(label, tensor, checks::FLOAT_DTYPES)?;
            checks::expect_contiguous(label, tensor)?;
        }
        Ok(Self {
            config,
            weight: Parameter::new(weight),
            bias: Parameter::new(bias),
        })
    }

    pub fn weight(&self) -> &Parameter {
        &self.weight
    }

    pub fn bias(&self) -> &Parameter {
        &self.bias
    }
}

impl NormalizationLayer for LayerNorm {
    fn config(&self) -> &NormConfig {
        &self.config
    }

    fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        checks::expect_batch_seq_hidden("norm.input", hidden, self.config.hidden_size)?;

        let hidden_size = self.config.hidden_size as f64;
        let compute = policy.cast_for_reduction(hidden)?;
        let mean = (compute.sum_keepdim(D::Minus1)? / hidden_size)?;
        let centered = compute.broadcast_sub(&mean)?;
        let variance = (centered.sqr()?.sum_keepdim(D::Minus1)? / hidden_size)?;
        let denom = (variance + self.config.epsilon)?.sqrt()?;
        let normalized = policy.cast_for_matmul(&centered.broadcast_div(&denom)?)?;

        let weight = self.weight.value()?.to_dtype(normalized.dtype())?;
        let bias = self.bias.value()?.to_dtype(normalized.dtype())?;
        let output = normalized.broadcast_mul(&weight)?.broadcast_add(&bias)?;

        policy.cast_to_storage(&output)
    }
}

impl Parameterized for LayerNorm {
    fn visit_parameters(&self, prefix: &str, out: &mut ParameterMap) {
        out.insert(scoped(prefix, "weight"), self.weight.clone());
        out.insert(scoped(prefix, "bias"), self.bias.clone());
    }
}
