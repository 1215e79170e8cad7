//! Padding-mask utilities.
//!
//! Raw padding masks are `[batch, seq_len]` with `1` for real tokens and `0` for
//! padding. Attention consumes them as additive biases of dtype
//! [`MASK_DTYPE`]: `0.0` keeps a key, [`MASK_FILL`] suppresses it. The fill is
//! finite so a fully padded row still softmaxes to a valid distribution.

pub mod padding;

use candle_core::DType;

/// Dtype shared by all additive masks.
pub const MASK_DTYPE: DType = DType::F32;

/// Bias added to the scores of padded keys.
pub const MASK_FILL: f64 = -10_000.0;

pub use padding::{
    expand_for_heads, padding_bias, padding_mask_from_booleans, padding_mask_from_lengths,
};

#[cfg(test)]
mod tests;
