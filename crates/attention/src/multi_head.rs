//! Multi-head attention as a single head-batched kernel call.
//!
//! Key, query and value are projected independently to
//! `[batch, seq, num_heads * head_dim]`, split into heads and packed into the
//! batch axis as `[batch * num_heads, seq, head_dim]` (index
//! `b * num_heads + h`), attended in one call, then merged back to
//! `[batch, seq, model_dim]`. There is no output projection after the merge.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use candle_core::{DType, Device, Tensor};
use layers::{
    checks,
    dtypes::PrecisionPolicy,
    linear::{Linear, LinearConfig, LinearInit},
    params::{scoped, ParameterMap, Parameterized},
};
use rand::Rng;

use crate::core::{Attention, AttentionError, AttentionOutput, Config};
use crate::masks::expand_for_heads;
use crate::reference::ScaledDotProductAttention;

/// Shape and regularisation settings for [`MultiHeadAttention`].
#[derive(Debug, Clone, PartialEq)]
pub struct MultiHeadAttentionConfig {
    pub model_dim: usize,
    pub num_heads: usize,
    /// Dropout on attention weights while training.
    pub dropout_p: Option<f32>,
}

impl MultiHeadAttentionConfig {
    pub fn new(model_dim: usize, num_heads: usize) -> Self {
        Self {
            model_dim,
            num_heads,
            dropout_p: None,
        }
    }

    pub fn with_dropout(mut self, dropout_p: f32) -> Self {
        self.dropout_p = Some(dropout_p);
        self
    }

    /// Per-head width; fails unless `model_dim` splits evenly across heads.
    pub fn head_dim(&self) -> Result<usize, AttentionError> {
        if self.model_dim == 0 || self.num_heads == 0 {
            return Err(AttentionError::InvalidConfig {
                message: format!(
                    "model_dim ({}) and num_heads ({}) must be non-zero",
                    self.model_dim, self.num_heads
                ),
            });
        }
        if self.model_dim % self.num_heads != 0 {
            return Err(AttentionError::InvalidConfig {
                message: format!(
                    "model_dim ({}) must be divisible by num_heads ({})",
                    self.model_dim, self.num_heads
                ),
            });
        }
        Ok(self.model_dim / self.num_heads)
    }
}

pub struct MultiHeadAttention {
    config: MultiHeadAttentionConfig,
    head_dim: usize,
    policy: PrecisionPolicy,
    key: Linear,
    query: Linear,
    value: Linear,
    kernel: ScaledDotProductAttention,
    training: AtomicBool,
}

impl fmt::Debug for MultiHeadAttention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiHeadAttention")
            .field("model_dim", &self.config.model_dim)
            .field("num_heads", &self.config.num_heads)
            .field("head_dim", &self.head_dim)
            .field("dropout_p", &self.config.dropout_p)
            .field("training", &self.is_training())
            .finish()
    }
}

impl MultiHeadAttention {
    /// Builds the three projections, drawing initial weights from `rng`.
    ///
    /// Starts in training mode.
    pub fn new<R: Rng + ?Sized>(
        config: MultiHeadAttentionConfig,
        rng: &mut R,
        device: &Device,
        dtype: DType,
    ) -> Result<Self, AttentionError> {
        let head_dim = config.head_dim()?;
        Config {
            dropout_p: config.dropout_p,
        }
        .validate()?;

        let projection = LinearConfig::new(config.model_dim, config.num_heads * head_dim);
        let init = LinearInit::FanInUniform;
        let key = Linear::with_init(projection.clone(), &init, rng, device, dtype)?;
        let query = Linear::with_init(projection.clone(), &init, rng, device, dtype)?;
        let value = Linear::with_init(projection, &init, rng, device, dtype)?;

        Ok(Self {
            head_dim,
            policy: PrecisionPolicy::from_parameter_dtype(dtype),
            key,
            query,
            value,
            kernel: ScaledDotProductAttention::new(),
            training: AtomicBool::new(true),
            config,
        })
    }

    pub fn config(&self) -> &MultiHeadAttentionConfig {
        &self.config
    }

    pub fn head_dim(&self) -> usize {
        self.head_dim
    }

    pub fn set_training(&self, training: bool) {
        self.training.store(training, Ordering::Relaxed);
    }

    pub fn is_training(&self) -> bool {
        self.training.load(Ordering::Relaxed)
    }

    fn check_input(&self, label: &str, tensor: &Tensor) -> Result<(usize, usize), AttentionError> {
        checks::expect_batch_seq_hidden(label, tensor, self.config.model_dim)
            .map_err(|err| AttentionError::shape(err.to_string()))?;
        let (batch, seq, _) = tensor.dims3()?;
        Ok((batch, seq))
    }

    /// `[batch, seq, heads * head_dim]` -> `[batch * heads, seq, head_dim]`.
    fn split_heads(&self, tensor: &Tensor) -> Result<Tensor, AttentionError> {
        let (batch, seq, _) = tensor.dims3()?;
        let heads = self.config.num_heads;
        Ok(tensor
            .reshape((batch, seq, heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((batch * heads, seq, self.head_dim))?)
    }

    /// `[batch * heads, seq, head_dim]` -> `[batch, seq, heads * head_dim]`.
    fn merge_heads(&self, tensor: &Tensor, batch: usize) -> Result<Tensor, AttentionError> {
        let (_, seq, _) = tensor.dims3()?;
        let heads = self.config.num_heads;
        Ok(tensor
            .reshape((batch, heads, seq, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((batch, seq, heads * self.head_dim))?)
    }

    /// Attends `query` over `key`/`value`.
    ///
    /// `mask` is a batch-level additive bias `[batch | 1, q_len | 1, k_len]`;
    /// it is repeated for every head. Returns the merged context
    /// `[batch, q_len, model_dim]` and head-batched weights
    /// `[batch * num_heads, q_len, k_len]`.
    pub fn forward(
        &self,
        key: &Tensor,
        value: &Tensor,
        query: &Tensor,
        mask: Option<&Tensor>,
    ) -> Result<AttentionOutput, AttentionError> {
        let (batch, k_len) = self.check_input("attention.key", key)?;
        let (v_batch, v_len) = self.check_input("attention.value", value)?;
        let (q_batch, _) = self.check_input("attention.query", query)?;
        if v_batch != batch || q_batch != batch || v_len != k_len {
            return Err(AttentionError::shape(format!(
                "key {:?}, value {:?} and query {:?} disagree on batch or key length",
                key.dims(),
                value.dims(),
                query.dims()
            )));
        }

        let k = self.split_heads(&self.key.forward(key, &self.policy)?)?;
        let q = self.split_heads(&self.query.forward(query, &self.policy)?)?;
        let v = self.split_heads(&self.value.forward(value, &self.policy)?)?;

        let mask = match mask {
            Some(bias) => {
                if bias.rank() != 3 {
                    return Err(AttentionError::shape(format!(
                        "attention mask must be [batch, q_len, k_len], got {:?}",
                        bias.dims()
                    )));
                }
                Some(
                    expand_for_heads(bias, batch, self.config.num_heads)
                        .map_err(|err| AttentionError::shape(err.to_string()))?,
                )
            }
            None => None,
        };

        let call = if self.is_training() {
            Config {
                dropout_p: self.config.dropout_p,
            }
        } else {
            Config::inference()
        };
        let attended = self.kernel.attend(&q, &k, &v, mask.as_ref(), &call)?;

        Ok(AttentionOutput {
            context: self.merge_heads(&attended.context, batch)?,
            weights: attended.weights,
        })
    }
}

impl Parameterized for MultiHeadAttention {
    fn visit_parameters(&self, prefix: &str, out: &mut ParameterMap) {
        self.key.visit_parameters(&scoped(prefix, "key"), out);
        self.query.visit_parameters(&scoped(prefix, "query"), out);
        self.value.visit_parameters(&scoped(prefix, "value"), out);
    }
}
