//! Builders for padding masks and their additive bias form.

use candle_core::{bail, Device, Result, Tensor};

use super::{MASK_DTYPE, MASK_FILL};

/// Converts a keep-mask `[batch, seq_len]` into an additive bias
/// `[batch, 1, seq_len]` computed as `(1 - mask) * MASK_FILL`.
///
/// The singleton query axis broadcasts over every query position.
pub fn padding_bias(mask: &Tensor) -> Result<Tensor> {
    if mask.rank() != 2 {
        bail!("padding mask must be [batch, seq_len], got {:?}", mask.dims());
    }
    let keep = mask.to_dtype(MASK_DTYPE)?.unsqueeze(1)?;
    // 1 - keep, then scale.
    keep.affine(-1.0, 1.0)?.affine(MASK_FILL, 0.0)
}

/// Repeats a batch-level bias `[batch | 1, rows, k_len]` for every head,
/// producing `[batch * num_heads, rows, k_len]` in head-batched order
/// (`index = b * num_heads + h`).
pub fn expand_for_heads(bias: &Tensor, batch: usize, num_heads: usize) -> Result<Tensor> {
    let (mask_batch, rows, k_len) = bias.dims3()?;
    if mask_batch != batch && mask_batch != 1 {
        bail!(
            "mask batch {} does not match input batch {} in mask shape {:?}",
            mask_batch,
            batch,
            bias.dims()
        );
    }
    bias.unsqueeze(1)?
        .broadcast_as((batch, num_heads, rows, k_len))?
        .contiguous()?
        .reshape((batch * num_heads, rows, k_len))
}

/// Keep-mask `[batch, seq_len]` from per-row valid lengths.
pub fn padding_mask_from_lengths(device: &Device, lengths: &[usize], seq_len: usize) -> Result<Tensor> {
    let mut data = vec![0f32; lengths.len() * seq_len];
    for (row, &valid) in lengths.iter().enumerate() {
        let valid = valid.min(seq_len);
        data[row * seq_len..row * seq_len + valid].fill(1.0);
    }
    Tensor::from_vec(data, (lengths.len(), seq_len), device)
}

/// Keep-mask `[batch, seq_len]` from padding flags, where `true` marks padding.
pub fn padding_mask_from_booleans(device: &Device, padding: &[Vec<bool>]) -> Result<Tensor> {
    let seq_len = padding.first().map(Vec::len).unwrap_or(0);
    if let Some(row) = padding.iter().position(|flags| flags.len() != seq_len) {
        bail!(
            "padding row {} has length {} but row 0 has length {}",
            row,
            padding[row].len(),
            seq_len
        );
    }
    let data: Vec<f32> = padding
        .iter()
        .flatten()
        .map(|&is_padding| if is_padding { 0.0 } else { 1.0 })
        .collect();
    Tensor::from_vec(data, (padding.len(), seq_len), device)
}
