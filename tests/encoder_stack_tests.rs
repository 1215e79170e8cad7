use anyhow::Result;
use candle_core::{Device, Tensor};
use transformer_encoder::attention::masks::padding_mask_from_booleans;
use transformer_encoder::{setup_device, Encoder, EncoderConfig};

fn max_abs_diff(a: &Tensor, b: &Tensor) -> Result<f32> {
    Ok(a.sub(b)?.abs()?.flatten_all()?.max(0)?.to_vec0::<f32>()?)
}

#[test]
fn scenario_through_facade() -> Result<()> {
    std::env::set_var("CANDLE_FORCE_CPU", "1");
    let device = setup_device()?;
    let encoder = Encoder::new(
        EncoderConfig::new(1, 8, 2, 16, 0.1)
            .with_seed(42)
            .with_device(device.clone()),
    )?;
    encoder.eval();

    let x = Tensor::randn(0f32, 1.0, (2, 4, 8), &device)?;
    let out = encoder.forward(&x, None)?;

    assert_eq!(out.output.dims(), &[2, 4, 8]);
    assert_eq!(out.attentions.len(), 1);
    assert_eq!(out.attentions[0].dims(), &[4, 4, 4]);
    Ok(())
}

#[test]
fn padding_does_not_leak_into_real_tokens() -> Result<()> {
    let device = Device::Cpu;
    let encoder = Encoder::new(EncoderConfig::new(3, 16, 4, 32, 0.1).with_seed(9))?;
    encoder.eval();

    let real = Tensor::randn(0f32, 1.0, (1, 3, 16), &device)?;
    let filler = Tensor::randn(0f32, 5.0, (1, 2, 16), &device)?;
    let padded = Tensor::cat(&[&real, &filler], 1)?;
    let mask = padding_mask_from_booleans(&device, &[vec![false, false, false, true, true]])?;

    let short = encoder.forward(&real, None)?;
    let long = encoder.forward(&padded, Some(&mask))?;

    let diff = max_abs_diff(&short.output, &long.output.narrow(1, 0, 3)?)?;
    assert!(diff < 1e-4, "padding changed real-token outputs by {diff}");
    Ok(())
}
