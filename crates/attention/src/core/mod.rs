//! Core traits and types shared across attention implementations.
//!
//! Kernels operate on head-batched tensors laid out as `[n, seq_len, head_dim]`
//! where `n = batch * num_heads`. Scores and weights are `[n, q_len, k_len]`.
//! Reductions run in `f32`; outputs mirror the dtype of `q`.

pub mod config;
pub mod errors;

use candle_core::Tensor;

pub use config::Config;
pub use errors::AttentionError;

/// Result of an attention call.
#[derive(Debug, Clone)]
pub struct AttentionOutput {
    /// Weighted value aggregation, `[n, q_len, head_dim]` for a kernel or
    /// `[batch, q_len, model_dim]` after head recombination.
    pub context: Tensor,
    /// Post-softmax (and post-dropout) weights, `[n, q_len, k_len]`.
    pub weights: Tensor,
}

impl AttentionOutput {
    pub fn into_parts(self) -> (Tensor, Tensor) {
        (self.context, self.weights)
    }
}

/// Unified interface for attention kernels.
///
/// * `q` is `[n, q_len, d]`, `k` is `[n, k_len, d]`, `v` is `[n, k_len, d]`.
/// * `mask`, when present, is an additive bias broadcastable to
///   `[n, q_len, k_len]`: `0` keeps a position, a large negative value
///   suppresses it. An all-zero mask is still a mask.
/// * Dropout is controlled via [`Config::dropout_p`].
pub trait Attention: Send + Sync {
    fn attend(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        mask: Option<&Tensor>,
        config: &Config,
    ) -> Result<AttentionOutput, AttentionError>;
}
