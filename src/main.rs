use anyhow::{Context, Result};
use candle_core::{DType, Tensor};
use layers::params::Parameterized;
use transformer_encoder::{setup_device, Encoder, EncoderHyperparameters};

/// Builds an encoder from an optional TOML/JSON hyperparameter file and runs a
/// random padded batch through it.
fn main() -> Result<()> {
    let hyper = match std::env::args().nth(1) {
        Some(path) => EncoderHyperparameters::from_path(&path)
            .with_context(|| format!("loading encoder config from {path}"))?,
        None => EncoderHyperparameters::default(),
    };
    let device = setup_device()?;
    let config = hyper.to_config(device.clone())?;
    let (batch, seq_len, model_dim) = (2usize, 16usize, config.model_dim);
    let dtype = config.dtype;

    let encoder = Encoder::new(config)?;
    encoder.eval();
    println!(
        "encoder: {} layers, {} parameters",
        encoder.num_layers(),
        encoder.parameter_count()?
    );

    let input = Tensor::randn(0f32, 1.0, (batch, seq_len, model_dim), &device)?.to_dtype(dtype)?;
    let lengths = [seq_len, seq_len / 2];
    let mask = attention::masks::padding_mask_from_lengths(&device, &lengths, seq_len)?;

    let (output, attentions) = encoder.forward(&input, Some(&mask))?.into_parts();
    println!("output shape: {:?}", output.dims());
    for (index, weights) in attentions.iter().enumerate() {
        let padded_share = weights
            .to_dtype(DType::F32)?
            .narrow(0, encoder.config().num_heads, encoder.config().num_heads)?
            .narrow(2, lengths[1], seq_len - lengths[1])?
            .sum_all()?
            .to_vec0::<f32>()?;
        println!(
            "layer {index}: attention {:?}, weight on padding {padded_share:.2e}",
            weights.dims()
        );
    }
    Ok(())
}
