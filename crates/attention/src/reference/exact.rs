//! Reference scaled dot-product attention.
//!
//! The exact path prioritises numerical fidelity and mirrors the semantics
//! described by the [`Attention`](crate::core::Attention) trait.

use std::sync::OnceLock;

use candle_core::{DType, Tensor};
use candle_nn::ops::{dropout, softmax_last_dim};

use crate::core::{Attention, AttentionError, AttentionOutput, Config};

/// `softmax(q kᵀ / sqrt(d) + mask) v`, computed in `f32`.
#[derive(Debug, Default)]
pub struct ScaledDotProductAttention {
    first_call: OnceLock<()>,
}

impl ScaledDotProductAttention {
    pub fn new() -> Self {
        Self::default()
    }
}

fn check_mask(mask: &Tensor, scores: &[usize]) -> Result<(), AttentionError> {
    let dims = mask.dims();
    let broadcastable = dims.len() == scores.len()
        && dims
            .iter()
            .zip(scores.iter())
            .all(|(m, s)| *m == *s || *m == 1);
    if broadcastable {
        Ok(())
    } else {
        Err(AttentionError::shape(format!(
            "mask shape {dims:?} is not broadcastable to attention scores {scores:?}"
        )))
    }
}

impl Attention for ScaledDotProductAttention {
    fn attend(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        mask: Option<&Tensor>,
        config: &Config,
    ) -> Result<AttentionOutput, AttentionError> {
        config.validate()?;
        if self.first_call.set(()).is_ok() {
            log::info!(
                "attention::reference init dropout={:?} masked={}",
                config.dropout_p,
                mask.is_some()
            );
        }

        let device = q.device();
        if !device.same_device(k.device()) || !device.same_device(v.device()) {
            return Err(AttentionError::shape("q, k, v must reside on the same device"));
        }

        let dtype = q.dtype();
        if dtype != k.dtype() || dtype != v.dtype() {
            return Err(AttentionError::shape(format!(
                "q, k, v must share the same dtype, got {:?}, {:?}, {:?}",
                dtype,
                k.dtype(),
                v.dtype()
            )));
        }
        if !matches!(dtype, DType::F32 | DType::F16 | DType::BF16) {
            return Err(AttentionError::UnsupportedDType {
                requested: format!("{dtype:?}"),
            });
        }

        let (n, q_len, head_dim) = q.dims3().map_err(|_| {
            AttentionError::shape(format!("q must be [n, seq_len, head_dim], got {:?}", q.dims()))
        })?;
        let (kn, k_len, kd) = k.dims3().map_err(|_| {
            AttentionError::shape(format!("k must be [n, seq_len, head_dim], got {:?}", k.dims()))
        })?;
        let (vn, vk, vd) = v.dims3().map_err(|_| {
            AttentionError::shape(format!("v must be [n, seq_len, head_dim], got {:?}", v.dims()))
        })?;

        if n == 0 || q_len == 0 || k_len == 0 || head_dim == 0 {
            return Err(AttentionError::shape(format!(
                "attention dimensions must be non-zero, got q {:?} and k {:?}",
                q.dims(),
                k.dims()
            )));
        }
        if kn != n || kd != head_dim {
            return Err(AttentionError::shape(format!(
                "k shape mismatch: expected [{n}, ?, {head_dim}] got [{kn}, {k_len}, {kd}] (q is [{n}, {q_len}, {head_dim}])"
            )));
        }
        if vn != n || vk != k_len || vd != head_dim {
            return Err(AttentionError::shape(format!(
                "v shape mismatch: expected [{n}, {k_len}, {head_dim}] got [{vn}, {vk}, {vd}]"
            )));
        }

        let q_work = q.to_dtype(DType::F32)?.contiguous()?;
        let k_work = k.to_dtype(DType::F32)?.contiguous()?;
        let v_work = v.to_dtype(DType::F32)?.contiguous()?;

        let scores = q_work.matmul(&k_work.transpose(1, 2)?)?;
        let mut scores = (scores / (head_dim as f64).sqrt())?;

        if let Some(mask) = mask {
            if !device.same_device(mask.device()) {
                return Err(AttentionError::shape(
                    "mask must reside on the same device as q",
                ));
            }
            check_mask(mask, scores.dims())?;
            scores = scores.broadcast_add(&mask.to_dtype(DType::F32)?)?;
        }

        let weights = softmax_last_dim(&scores)?;
        let weights = match config.active_dropout() {
            Some(p) => dropout(&weights, p)?,
            None => weights,
        };

        let context = weights.matmul(&v_work)?;
        Ok(AttentionOutput {
            context: context.to_dtype(dtype)?,
            weights: weights.to_dtype(dtype)?,
        })
    }
}
