use anyhow::Result;
use attention::masks::{expand_for_heads, padding_bias, padding_mask_from_lengths};
use attention::{
    Attention, AttentionError, Config, MultiHeadAttention, MultiHeadAttentionConfig,
    ScaledDotProductAttention,
};
use candle_core::{DType, Device, Tensor};
use rand::{rngs::StdRng, SeedableRng};

#[test]
fn length_mask_flows_through_head_batched_kernel() -> Result<()> {
    let device = Device::Cpu;
    let (batch, heads, seq, head_dim) = (2, 3, 5, 4);
    let keep = padding_mask_from_lengths(&device, &[5, 2], seq)?;
    let bias = expand_for_heads(&padding_bias(&keep)?, batch, heads)?;
    assert_eq!(bias.dims(), &[batch * heads, 1, seq]);

    let q = Tensor::randn(0f32, 1.0, (batch * heads, seq, head_dim), &device)?;
    let out = ScaledDotProductAttention::new().attend(&q, &q, &q, Some(&bias), &Config::inference())?;

    let weights = out.weights.to_vec3::<f32>()?;
    for matrix in &weights[heads..] {
        for row in matrix {
            assert!(row[2..].iter().all(|w| *w < 1e-3), "{row:?}");
        }
    }
    Ok(())
}

#[test]
fn broadcast_mask_over_batch_matches_explicit_mask() -> Result<()> {
    let device = Device::Cpu;
    let mha = MultiHeadAttention::new(
        MultiHeadAttentionConfig::new(8, 2),
        &mut StdRng::seed_from_u64(11),
        &device,
        DType::F32,
    )?;
    mha.set_training(false);
    let x = Tensor::randn(0f32, 1.0, (3, 4, 8), &device)?;

    let shared = padding_bias(&Tensor::new(&[[1f32, 1.0, 0.0, 1.0]], &device)?)?;
    let explicit = shared.broadcast_as((3, 1, 4))?.contiguous()?;

    let a = mha.forward(&x, &x, &x, Some(&shared))?;
    let b = mha.forward(&x, &x, &x, Some(&explicit))?;
    let diff = a.context.sub(&b.context)?.abs()?.flatten_all()?.max(0)?.to_vec0::<f32>()?;
    assert_eq!(diff, 0.0);
    Ok(())
}

#[test]
fn errors_surface_through_std_error() {
    let err: Box<dyn std::error::Error> = Box::new(AttentionError::InvalidShape {
        context: "q [1, 2, 3]".into(),
    });
    assert!(err.to_string().contains("q [1, 2, 3]"));

    let backend = AttentionError::from(candle_core::Error::Msg("boom".into()));
    assert!(std::error::Error::source(&backend).is_some());
}
