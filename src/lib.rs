//! Post-norm Transformer encoder stack on candle.
//!
//! Re-exports the workspace crates and provides device selection for callers
//! that do not want to pick a backend themselves.

pub use attention;
pub use encoder;
pub use layers;

pub use encoder::{Encoder, EncoderConfig, EncoderError, EncoderHyperparameters, EncoderOutput};

use anyhow::Result;
use candle_core::Device;

/// Picks the best available backend.
///
/// `CANDLE_FORCE_CPU` always wins. Otherwise Metal (when built with the
/// `metal` feature and a smoke test passes), then CUDA, then CPU.
pub fn setup_device() -> Result<Device> {
    if std::env::var("CANDLE_FORCE_CPU").is_ok() {
        log::info!("CANDLE_FORCE_CPU set, using CPU backend");
        return Ok(Device::Cpu);
    }

    #[cfg(feature = "metal")]
    {
        match Device::new_metal(0) {
            Ok(device) => match metal_preflight(&device) {
                Ok(()) => {
                    log::info!("Metal device selected: {device:?}");
                    return Ok(device);
                }
                Err(err) => log::warn!("Metal preflight failed, falling back: {err}"),
            },
            Err(err) => log::debug!("Metal unavailable: {err}"),
        }
    }

    match Device::cuda_if_available(0) {
        Ok(device) if device.is_cuda() => {
            log::info!("CUDA device selected: {device:?}");
            Ok(device)
        }
        Ok(_) | Err(_) => {
            log::info!("using CPU backend");
            Ok(Device::Cpu)
        }
    }
}

/// Runs a one-layer encoder on `device` to catch backends that construct but
/// cannot execute the ops the stack needs.
#[cfg(feature = "metal")]
fn metal_preflight(device: &Device) -> Result<()> {
    use candle_core::Tensor;

    let encoder = Encoder::new(
        EncoderConfig::new(1, 8, 2, 16, 0.0)
            .with_seed(0)
            .with_device(device.clone()),
    )?;
    encoder.eval();
    let x = Tensor::randn(0f32, 1.0, (1, 4, 8), device)?;
    let mask = Tensor::ones((1, 4), candle_core::DType::F32, device)?;
    encoder.forward(&x, Some(&mask))?;
    Ok(())
}
