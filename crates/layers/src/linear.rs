//! Affine projection layers.
//!
//! Linear layers accept `(batch, seq, in_dim)` inputs and return
//! `(batch, seq, out_dim)`. Weights are stored
//! as `[out_dim, in_dim]` and cast to [`PrecisionPolicy::compute`] for the
//! matmul; the output is cast back to the storage dtype.

use candle_core::{DType, Device, Error, Result, Tensor};
use rand::Rng;

use crate::{
    checks,
    dtypes::PrecisionPolicy,
    params::{scoped, Parameter, ParameterMap, Parameterized},
};

/// Shape configuration of a dense projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearConfig {
    /// Incoming feature dimension.
    pub input_dim: usize,
    /// Outgoing feature dimension.
    pub output_dim: usize,
    /// Whether a learnable bias vector is added.
    pub bias: bool,
}

impl LinearConfig {
    /// Creates a configuration with bias enabled.
    pub fn new(input_dim: usize, output_dim: usize) -> Self {
        Self {
            input_dim,
            output_dim,
            bias: true,
        }
    }
}

/// Weight initialisation policies.
#[derive(Debug, Clone, PartialEq)]
pub enum LinearInit {
    /// Uniform in `±1/sqrt(fan_in)` for both weight and bias.
    FanInUniform,
}

impl LinearInit {
    fn bound(&self, fan_in: f64) -> f64 {
        match self {
            LinearInit::FanInUniform => 1.0 / fan_in.sqrt(),
        }
    }

    fn sample_weight<R: Rng + ?Sized>(
        &self,
        config: &LinearConfig,
        rng: &mut R,
        device: &Device,
        dtype: DType,
    ) -> Result<Tensor> {
        let bound = self.bound(config.input_dim as f64);
        let shape = (config.output_dim, config.input_dim);
        uniform(shape.0 * shape.1, bound, rng, shape, device, dtype)
    }

    fn sample_bias<R: Rng + ?Sized>(
        &self,
        config: &LinearConfig,
        rng: &mut R,
        device: &Device,
        dtype: DType,
    ) -> Result<Tensor> {
        let bound = self.bound(config.input_dim as f64);
        uniform(config.output_dim, bound, rng, config.output_dim, device, dtype)
    }
}

fn uniform<R: Rng + ?Sized, S: Into<candle_core::Shape>>(
    count: usize,
    bound: f64,
    rng: &mut R,
    shape: S,
    device: &Device,
    dtype: DType,
) -> Result<Tensor> {
    if !bound.is_finite() || bound <= 0.0 {
        return Err(Error::Msg(format!(
            "linear.init: sampling bound must be positive and finite, got {bound}"
        )));
    }
    let bound = bound as f32;
    let data: Vec<f32> = (0..count).map(|_| rng.gen_range(-bound..bound)).collect();
    Tensor::from_vec(data, shape, device)?.to_dtype(dtype)
}

/// Dense affine projection `y = x Wᵀ + b`.
#[derive(Debug, Clone)]
pub struct Linear {
    config: LinearConfig,
    weight: Parameter,
    bias: Option<Parameter>,
}

impl Linear {
    /// Constructs a linear layer from existing tensors.
    pub fn new(config: LinearConfig, weight: Tensor, bias: Option<Tensor>) -> Result<Self> {
        Self::validate_weight(&config, &weight)?;
        Self::validate_bias(&config, bias.as_ref())?;
        Ok(Self {
            config,
            weight: Parameter::new(weight),
            bias: bias.map(Parameter::new),
        })
    }

    /// Builds a linear layer with parameters drawn from `rng` following `init`.
    pub fn with_init<R: Rng + ?Sized>(
        config: LinearConfig,
        init: &LinearInit,
        rng: &mut R,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        if config.input_dim == 0 || config.output_dim == 0 {
            return Err(Error::Msg(format!(
                "linear dimensions must be non-zero, got {} -> {}",
                config.input_dim, config.output_dim
            )));
        }
        let weight = init.sample_weight(&config, rng, device, dtype)?;
        let bias = if config.bias {
            Some(init.sample_bias(&config, rng, device, dtype)?)
        } else {
            None
        };
        Self::new(config, weight, bias)
    }

    pub fn config(&self) -> &LinearConfig {
        &self.config
    }

    pub fn weight(&self) -> &Parameter {
        &self.weight
    }

    pub fn bias(&self) -> Option<&Parameter> {
        self.bias.as_ref()
    }

    fn validate_weight(config: &LinearConfig, weight: &Tensor) -> Result<()> {
        checks::expect_shape(
            "linear.weight",
            weight,
            &[config.output_dim, config.input_dim],
        )?;
        checks::expect_dtype_in("linear.weight", weight, checks::FLOAT_DTYPES)?;
        checks::expect_contiguous("linear.weight", weight)
    }

    fn validate_bias(config: &LinearConfig, bias: Option<&Tensor>) -> Result<()> {
        match (config.bias, bias) {
            (true, Some(tensor)) => {
                checks::expect_shape("linear.bias", tensor, &[config.output_dim])?;
                checks::expect_dtype_in("linear.bias", tensor, checks::FLOAT_DTYPES)?;
                checks::expect_contiguous("linear.bias", tensor)
            }
            (false, Some(_)) => Err(Error::Msg("bias provided but config disables bias".into())),
            (true, None) => Err(Error::Msg("config expects bias but none supplied".into())),
            (false, None) => Ok(()),
        }
    }

    /// Applies the projection to `(batch, seq, in_dim)` hidden states.
    pub fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        checks::expect_batch_seq_hidden("linear.input", hidden, self.config.input_dim)?;
        let (batch, seq, _) = hidden.dims3()?;
        if batch == 0 || seq == 0 {
            return Err(Error::Msg("batch/seq dimensions must be non-zero".into()));
        }

        let input = policy.cast_for_matmul(hidden)?;
        let weight_t = policy.cast_for_matmul(&self.weight.value()?)?.t()?;

        let mut output = input
            .reshape((batch * seq, self.config.input_dim))?
            .matmul(&weight_t)?
            .reshape((batch, seq, self.config.output_dim))?;

        if let Some(bias) = &self.bias {
            let bias = policy.cast_for_matmul(&bias.value()?)?;
            output = output.broadcast_add(&bias)?;
        }

        policy.cast_to_storage(&output)
    }
}

impl Parameterized for Linear {
    fn visit_parameters(&self, prefix: &str, out: &mut ParameterMap) {
        out.insert(scoped(prefix, "weight"), self.weight.clone());
        if let Some(bias) = &self.bias {
            out.insert(scoped(prefix, "bias"), bias.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn reference_linear(input: &Tensor, weight: &Tensor, bias: &Tensor) -> Result<Tensor> {
        let (batch, seq, hidden) = input.dims3()?;
        input
            .reshape((batch * seq, hidden))?
            .matmul(&weight.t()?)?
            .broadcast_add(bias)?
            .reshape((batch, seq, weight.dims()[0]))
    }

    fn max_abs(tensor: &Tensor) -> Result<f32> {
        tensor
            .to_dtype(DType::F32)?
            .abs()?
            .flatten_all()?
            .max(0)?
            .to_vec0::<f32>()
    }

    #[test]
    fn forward_matches_reference_across_dtypes() -> Result<()> {
        let device = Device::Cpu;
        let config = LinearConfig::new(8, 12);
        let weight = Tensor::randn(0f32, 0.05, (12, 8), &device)?;
        let bias = Tensor::randn(0f32, 0.02, 12, &device)?;

        for dtype in [DType::F32, DType::F16, DType::BF16] {
            let linear = Linear::new(
                config.clone(),
                weight.to_dtype(dtype)?,
                Some(bias.to_dtype(dtype)?),
            )?;
            let input = Tensor::randn(0f32, 1.0, (2, 5, 8), &device)?.to_dtype(dtype)?;
            let policy = PrecisionPolicy::from_parameter_dtype(dtype);
            let output = linear.forward(&input, &policy)?;

            assert_eq!(output.dims(), &[2, 5, 12]);
            assert_eq!(output.dtype(), dtype);

            let reference = reference_linear(&input.to_dtype(DType::F32)?, &weight, &bias)?;
            let diff = max_abs(&output.to_dtype(DType::F32)?.sub(&reference)?)?;
            let tol = match dtype {
                DType::F16 => 1e-2,
                DType::BF16 => 2e-2,
                _ => 1e-4,
            };
            assert!(diff <= tol, "max diff {diff} for {dtype:?}");
        }
        Ok(())
    }

    #[test]
    fn rejects_two_dimensional_input() -> Result<()> {
        let device = Device::Cpu;
        let mut rng = StdRng::seed_from_u64(3);
        let linear = Linear::with_init(
            LinearConfig::new(4, 3),
            &LinearInit::FanInUniform,
            &mut rng,
            &device,
            DType::F32,
        )?;
        let input = Tensor::ones((7, 4), DType::F32, &device)?;
        let err = linear
            .forward(&input, &PrecisionPolicy::default())
            .unwrap_err();
        assert!(err.to_string().contains("linear.input"));
        Ok(())
    }

    #[test]
    fn rejects_wrong_input_width() -> Result<()> {
        let device = Device::Cpu;
        let mut rng = StdRng::seed_from_u64(0);
        let linear = Linear::with_init(
            LinearConfig::new(4, 4),
            &LinearInit::FanInUniform,
            &mut rng,
            &device,
            DType::F32,
        )?;
        let input = Tensor::zeros((1, 2, 5), DType::F32, &device)?;
        let err = linear
            .forward(&input, &PrecisionPolicy::default())
            .unwrap_err();
        assert!(err.to_string().contains("linear.input"));
        Ok(())
    }

    #[test]
    fn fan_in_uniform_respects_bounds_for_weight_and_bias() -> Result<()> {
        let device = Device::Cpu;
        let mut rng = StdRng::seed_from_u64(11);
        let linear = Linear::with_init(
            LinearConfig::new(64, 32),
            &LinearInit::FanInUniform,
            &mut rng,
            &device,
            DType::F32,
        )?;
        let bound = 1.0 / 64f32.sqrt();
        let weight = linear.weight().value()?;
        let bias = linear.bias().expect("bias enabled").value()?;
        assert!(max_abs(&weight)? <= bound);
        assert!(max_abs(&bias)? <= bound);
        assert!(max_abs(&bias)? > 0.0);
        Ok(())
    }

    #[test]
    fn same_seed_yields_same_weights() -> Result<()> {
        let device = Device::Cpu;
        let build = |seed| {
            Linear::with_init(
                LinearConfig::new(6, 6),
                &LinearInit::FanInUniform,
                &mut StdRng::seed_from_u64(seed),
                &device,
                DType::F32,
            )
        };
        let a = build(42)?.weight().value()?;
        let b = build(42)?.weight().value()?;
        let c = build(43)?.weight().value()?;
        assert_eq!(max_abs(&a.sub(&b)?)?, 0.0);
        assert!(max_abs(&a.sub(&c)?)? > 0.0);
        Ok(())
    }

    #[test]
    fn parameters_are_named_and_shared() -> Result<()> {
        let device = Device::Cpu;
        let linear = Linear::with_init(
            LinearConfig::new(3, 2),
            &LinearInit::FanInUniform,
            &mut StdRng::seed_from_u64(1),
            &device,
            DType::F32,
        )?;
        let mut params = ParameterMap::new();
        linear.visit_parameters("proj", &mut params);
        assert_eq!(
            params.keys().cloned().collect::<Vec<_>>(),
            vec!["proj.bias".to_string(), "proj.weight".to_string()]
        );

        params["proj.weight"].replace(&Tensor::zeros((2, 3), DType::F32, &device)?)?;
        params["proj.bias"].replace(&Tensor::new(&[1.0f32, -1.0], &device)?)?;
        let out = linear.forward(
            &Tensor::ones((1, 1, 3), DType::F32, &device)?,
            &PrecisionPolicy::default(),
        )?;
        assert_eq!(out.flatten_all()?.to_vec1::<f32>()?, vec![1.0, -1.0]);
        assert_eq!(linear.parameter_count()?, 8);
        Ok(())
    }
}
