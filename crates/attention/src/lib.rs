//! Scaled dot-product and multi-head attention over candle tensors.
//!
//! The kernel in [`reference`] works on head-batched tensors laid out as
//! `[n, seq_len, head_dim]` where `n = batch * num_heads`. Scores are computed
//! in `f32` regardless of the input dtype (f32, f16 or bf16) and both the
//! context and the attention weights come back in the input dtype.
//!
//! Masks are additive biases. [`masks::padding_bias`] turns a `{0, 1}` keep
//! mask into `(1 - mask) * -10000`, and [`multi_head::MultiHeadAttention`]
//! repeats that bias for every head before calling the kernel.
//!
//! Dropout on the attention weights is train-only and controlled through
//! [`Config`].

pub mod core;
pub mod masks;
pub mod multi_head;
pub mod reference;

pub use core::{Attention, AttentionError, AttentionOutput, Config};
pub use multi_head::{MultiHeadAttention, MultiHeadAttentionConfig};
pub use reference::ScaledDotProductAttention;
