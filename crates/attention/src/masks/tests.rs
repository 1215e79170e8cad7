use super::*;
use candle_core::{DType, Device, Result, Tensor};

#[test]
fn bias_is_zero_for_tokens_and_fill_for_padding() -> Result<()> {
    let device = Device::Cpu;
    let mask = Tensor::new(&[[1f32, 1.0, 0.0], [1.0, 0.0, 0.0]], &device)?;
    let bias = padding_bias(&mask)?;
    assert_eq!(bias.dims(), &[2, 1, 3]);
    assert_eq!(bias.dtype(), MASK_DTYPE);

    let values = bias.flatten_all()?.to_vec1::<f32>()?;
    let fill = MASK_FILL as f32;
    assert_eq!(values, vec![0.0, 0.0, fill, 0.0, fill, fill]);
    Ok(())
}

#[test]
fn bias_accepts_integer_masks() -> Result<()> {
    let mask = Tensor::new(&[[1u32, 0]], &Device::Cpu)?;
    let bias = padding_bias(&mask)?;
    assert_eq!(bias.dtype(), DType::F32);
    assert_eq!(
        bias.flatten_all()?.to_vec1::<f32>()?,
        vec![0.0, MASK_FILL as f32]
    );
    Ok(())
}

#[test]
fn all_zero_mask_is_still_applied() -> Result<()> {
    let mask = Tensor::zeros((1, 4), DType::F32, &Device::Cpu)?;
    let bias = padding_bias(&mask)?;
    let values = bias.flatten_all()?.to_vec1::<f32>()?;
    assert!(values.iter().all(|v| *v == MASK_FILL as f32));
    Ok(())
}

#[test]
fn bias_rejects_wrong_rank() -> Result<()> {
    let mask = Tensor::ones((2, 1, 3), DType::F32, &Device::Cpu)?;
    assert!(padding_bias(&mask).is_err());
    Ok(())
}

#[test]
fn expansion_follows_head_batched_order() -> Result<()> {
    let device = Device::Cpu;
    let mask = Tensor::new(&[[1f32, 0.0], [0.0, 1.0]], &device)?;
    let bias = padding_bias(&mask)?;
    let expanded = expand_for_heads(&bias, 2, 3)?;
    assert_eq!(expanded.dims(), &[6, 1, 2]);

    let rows = expanded.squeeze(1)?.to_vec2::<f32>()?;
    let fill = MASK_FILL as f32;
    for head in 0..3 {
        assert_eq!(rows[head], vec![0.0, fill]);
        assert_eq!(rows[3 + head], vec![fill, 0.0]);
    }
    Ok(())
}

#[test]
fn expansion_broadcasts_single_row_and_rejects_other_batches() -> Result<()> {
    let device = Device::Cpu;
    let bias = Tensor::zeros((1, 1, 4), DType::F32, &device)?;
    assert_eq!(expand_for_heads(&bias, 3, 2)?.dims(), &[6, 1, 4]);

    let bias = Tensor::zeros((2, 1, 4), DType::F32, &device)?;
    assert!(expand_for_heads(&bias, 3, 2).is_err());
    Ok(())
}

#[test]
fn lengths_build_prefix_masks() -> Result<()> {
    let mask = padding_mask_from_lengths(&Device::Cpu, &[2, 7], 4)?;
    assert_eq!(
        mask.to_vec2::<f32>()?,
        vec![vec![1.0, 1.0, 0.0, 0.0], vec![1.0, 1.0, 1.0, 1.0]]
    );
    Ok(())
}

#[test]
fn booleans_mark_padding_as_zero() -> Result<()> {
    let device = Device::Cpu;
    let padding = vec![vec![false, true, false], vec![true, true, false]];
    let mask = padding_mask_from_booleans(&device, &padding)?;
    assert_eq!(
        mask.to_vec2::<f32>()?,
        vec![vec![1.0, 0.0, 1.0], vec![0.0, 0.0, 1.0]]
    );

    let ragged = vec![vec![false, true], vec![false]];
    assert!(padding_mask_from_booleans(&device, &ragged).is_err());
    Ok(())
}
