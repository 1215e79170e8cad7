//! Lightweight validation helpers shared across layer components.
//!
//! Every helper takes a `label` naming the tensor under test so failures read
//! like `attention.query: expected shape [2, 4, 8], got [2, 4, 6]`. They return
//! `candle_core::Result<()>` so call sites can propagate errors without
//! panicking.

use candle_core::{DType, Error, Result, Tensor};

/// Floating point dtypes accepted for parameters and activations.
pub const FLOAT_DTYPES: &[DType] = &[DType::F16, DType::BF16, DType::F32];

/// Ensures a tensor matches the expected dimensions exactly.
pub fn expect_shape(label: &str, tensor: &Tensor, expected: &[usize]) -> Result<()> {
    let actual = tensor.dims();
    if actual == expected {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{label}: expected shape {expected:?}, got {actual:?}"
        )))
    }
}

/// Ensures a tensor has exactly `rank` dimensions.
pub fn expect_rank(label: &str, tensor: &Tensor, rank: usize) -> Result<()> {
    let dims = tensor.dims();
    if dims.len() == rank {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{label}: expected rank {rank}, got shape {dims:?}"
        )))
    }
}

/// Validates the `(batch, seq, hidden)` convention with a known hidden size.
pub fn expect_batch_seq_hidden(label: &str, tensor: &Tensor, hidden: usize) -> Result<()> {
    match tensor.dims() {
        [_, _, actual] if *actual == hidden => Ok(()),
        dims => Err(Error::Msg(format!(
            "{label}: expected (batch, seq, {hidden}) layout, got {dims:?}"
        ))),
    }
}

/// Checks the tensor dtype is one of the allowed values.
pub fn expect_dtype_in(label: &str, tensor: &Tensor, allowed: &[DType]) -> Result<()> {
    let dtype = tensor.dtype();
    if allowed.contains(&dtype) {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{label}: expected dtype in {allowed:?}, got {dtype:?}"
        )))
    }
}

/// Checks two tensors agree on dtype.
pub fn expect_same_dtype(
    label_a: &str,
    a: &Tensor,
    label_b: &str,
    b: &Tensor,
) -> Result<()> {
    if a.dtype() == b.dtype() {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{label_a} has dtype {:?} but {label_b} has dtype {:?}",
            a.dtype(),
            b.dtype()
        )))
    }
}

/// Rejects strided views where a dense buffer is required.
pub fn expect_contiguous(label: &str, tensor: &Tensor) -> Result<()> {
    if tensor.is_contiguous() {
        Ok(())
    } else {
        Err(Error::Msg(format!("{label}: tensor must be contiguous")))
    }
}
