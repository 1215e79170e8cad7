use std::fmt;

use attention::{MultiHeadAttention, MultiHeadAttentionConfig};
use candle_core::Tensor;
use layers::{
    checks,
    dtypes::PrecisionPolicy,
    linear::LinearInit,
    mlp::{FeedForward, FeedForwardConfig},
    norm::{LayerNorm, NormConfig},
    params::{scoped, ParameterMap, Parameterized},
    residual::{Residual, ResidualConfig},
};
use rand::Rng;

use crate::config::EncoderConfig;
use crate::error::{EncoderError, Result};

/// One step of the stack: `(hidden, mask) -> (hidden, attention weights)`.
///
/// `mask` is the additive bias `[batch, 1, seq_len]` already derived from the
/// caller's padding mask; every layer receives the same tensor.
pub trait Layer: Parameterized + Send + Sync {
    fn forward(&self, hidden: &Tensor, mask: Option<&Tensor>) -> Result<(Tensor, Tensor)>;

    fn set_training(&self, training: bool);
}

/// Post-norm encoder layer.
///
/// ```text
/// x'  = LayerNorm(x + Dropout(SelfAttention(x, x, x, mask)))
/// out = LayerNorm(x' + Dropout(FeedForward(x')))
/// ```
pub struct EncoderLayer {
    index: usize,
    model_dim: usize,
    policy: PrecisionPolicy,
    self_attn: MultiHeadAttention,
    attn_residual: Residual,
    attn_norm: LayerNorm,
    ffn: FeedForward,
    ffn_residual: Residual,
    ffn_norm: LayerNorm,
}

impl fmt::Debug for EncoderLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncoderLayer")
            .field("index", &self.index)
            .field("model_dim", &self.model_dim)
            .field("self_attn", &self.self_attn)
            .field("ffn", &self.ffn.config())
            .finish()
    }
}

impl EncoderLayer {
    /// Builds layer `index` of a stack described by `config`.
    pub fn new<R: Rng + ?Sized>(index: usize, config: &EncoderConfig, rng: &mut R) -> Result<Self> {
        let policy = PrecisionPolicy::from_parameter_dtype(config.dtype);

        let mut attn_config = MultiHeadAttentionConfig::new(config.model_dim, config.num_heads);
        if config.dropout > 0.0 {
            attn_config = attn_config.with_dropout(config.dropout);
        }
        let self_attn = MultiHeadAttention::new(attn_config, rng, &config.device, config.dtype)?;

        let ffn = FeedForward::with_init(
            FeedForwardConfig::new(config.model_dim, config.ffw_dim)
                .with_activation(config.activation),
            &LinearInit::FanInUniform,
            rng,
            &config.device,
            config.dtype,
        )?;

        let norm_config = NormConfig::new(config.model_dim).with_epsilon(config.layer_norm_eps);
        let attn_norm = LayerNorm::new(norm_config.clone(), &config.device, config.dtype)?;
        let ffn_norm = LayerNorm::new(norm_config, &config.device, config.dtype)?;

        let residual_config = if config.dropout > 0.0 {
            ResidualConfig::with_dropout(config.dropout)
        } else {
            ResidualConfig::default()
        };
        let attn_residual = Residual::new(residual_config.clone())?;
        let ffn_residual = Residual::new(residual_config)?;

        Ok(Self {
            index,
            model_dim: config.model_dim,
            policy,
            self_attn,
            attn_residual,
            attn_norm,
            ffn,
            ffn_residual,
            ffn_norm,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn self_attention(&self) -> &MultiHeadAttention {
        &self.self_attn
    }

    pub fn is_training(&self) -> bool {
        self.self_attn.is_training()
    }
}

impl Layer for EncoderLayer {
    fn forward(&self, hidden: &Tensor, mask: Option<&Tensor>) -> Result<(Tensor, Tensor)> {
        checks::expect_batch_seq_hidden("encoder_layer.input", hidden, self.model_dim)
            .map_err(|err| EncoderError::shape(err.to_string()))?;

        let attended = self.self_attn.forward(hidden, hidden, hidden, mask)?;
        let hidden = self.attn_residual.postnorm_step(
            &attended.context,
            hidden,
            &self.attn_norm,
            &self.policy,
        )?;

        let transformed = self.ffn.forward(&hidden, &self.policy)?;
        let output =
            self.ffn_residual
                .postnorm_step(&transformed, &hidden, &self.ffn_norm, &self.policy)?;

        Ok((output, attended.weights))
    }

    fn set_training(&self, training: bool) {
        self.self_attn.set_training(training);
        self.attn_residual.set_training(training);
        self.ffn_residual.set_training(training);
    }
}

impl Parameterized for EncoderLayer {
    fn visit_parameters(&self, prefix: &str, out: &mut ParameterMap) {
        self.self_attn.visit_parameters(&scoped(prefix, "self_attn"), out);
        self.attn_norm.visit_parameters(&scoped(prefix, "attn_norm"), out);
        self.ffn.visit_parameters(&scoped(prefix, "ffn"), out);
        self.ffn_norm.visit_parameters(&scoped(prefix, "ffn_norm"), out);
    }
}
