//! Non-linearities used between feed-forward projections.
//!
//! Activations are shape preserving. Inputs are promoted to
//! [`PrecisionPolicy::compute`] before evaluation and cast back to storage.

use std::fmt;
use std::str::FromStr;

use candle_core::{Error, Result, Tensor};

use crate::dtypes::PrecisionPolicy;

/// Identifies a built-in activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActivationKind {
    /// Pass-through, mostly for tests and probes.
    Identity,
    /// `max(0, x)`.
    #[default]
    Relu,
    /// Erf-based GELU, `0.5 * x * (1 + erf(x / sqrt(2)))`.
    Gelu,
    /// `x * sigmoid(x)`.
    Silu,
}

impl ActivationKind {
    pub fn forward(&self, input: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        let compute = policy.cast_for_matmul(input)?;
        let activated = match self {
            ActivationKind::Identity => compute,
            ActivationKind::Relu => compute.relu()?,
            ActivationKind::Gelu => compute.gelu_erf()?,
            ActivationKind::Silu => compute.silu()?,
        };
        policy.cast_to_storage(&activated)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ActivationKind::Identity => "identity",
            ActivationKind::Relu => "relu",
            ActivationKind::Gelu => "gelu",
            ActivationKind::Silu => "silu",
        }
    }
}

impl fmt::Display for ActivationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ActivationKind {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "identity" | "linear" => Ok(ActivationKind::Identity),
            "relu" => Ok(ActivationKind::Relu),
            "gelu" => Ok(ActivationKind::Gelu),
            "silu" | "swish" => Ok(ActivationKind::Silu),
            other => Err(Error::Msg(format!("unknown activation '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use std::f64::consts::SQRT_2;

    fn max_diff(a: &Tensor, b: &Tensor) -> Result<f32> {
        a.sub(b)?.abs()?.max(0)?.to_vec0::<f32>()
    }

    #[test]
    fn relu_zeroes_negatives() -> Result<()> {
        let input = Tensor::new(&[-2.0f32, -0.0, 0.5, 3.0], &Device::Cpu)?;
        let output = ActivationKind::Relu.forward(&input, &PrecisionPolicy::default())?;
        assert_eq!(output.to_vec1::<f32>()?, vec![0.0, 0.0, 0.5, 3.0]);
        Ok(())
    }

    #[test]
    fn gelu_matches_erf_formula() -> Result<()> {
        let input = Tensor::new(&[-2.5f32, -0.5, 0.0, 1.0, 3.0], &Device::Cpu)?;
        let output = ActivationKind::Gelu.forward(&input, &PrecisionPolicy::default())?;
        let inner = (input.affine(1.0 / SQRT_2, 0.0)?.erf()? + 1.0)?;
        let reference = input.affine(0.5, 0.0)?.mul(&inner)?;
        assert!(max_diff(&output, &reference)? < 5e-6);
        Ok(())
    }

    #[test]
    fn silu_matches_swish_reference() -> Result<()> {
        let input = Tensor::new(&[-3.0f32, -1.0, 0.0, 0.5, 2.0], &Device::Cpu)?;
        let output = ActivationKind::Silu.forward(&input, &PrecisionPolicy::default())?;
        let sigmoid = (input.neg()?.exp()? + 1.0)?.recip()?;
        let reference = input.mul(&sigmoid)?;
        assert!(max_diff(&output, &reference)? < 5e-6);
        Ok(())
    }

    #[test]
    fn half_precision_output_keeps_storage_dtype() -> Result<()> {
        let input = Tensor::new(&[-1.0f32, 1.0], &Device::Cpu)?.to_dtype(DType::F16)?;
        let policy = PrecisionPolicy::from_parameter_dtype(DType::F16);
        let output = ActivationKind::Relu.forward(&input, &policy)?;
        assert_eq!(output.dtype(), DType::F16);
        Ok(())
    }

    #[test]
    fn parses_names() -> Result<()> {
        assert_eq!("ReLU".parse::<ActivationKind>()?, ActivationKind::Relu);
        assert_eq!("swish".parse::<ActivationKind>()?, ActivationKind::Silu);
        assert!("tanh".parse::<ActivationKind>().is_err());
        Ok(())
    }
}
