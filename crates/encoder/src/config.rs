use std::{fs, path::Path, str::FromStr};

use candle_core::{DType, Device};
use layers::activations::ActivationKind;
use serde::{Deserialize, Serialize};

use crate::error::{EncoderError, Result};

pub const DEFAULT_LAYER_NORM_EPS: f64 = 1e-5;

/// Fully resolved settings for building an [`Encoder`](crate::Encoder).
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    pub num_layers: usize,
    pub model_dim: usize,
    pub num_heads: usize,
    pub ffw_dim: usize,
    /// Shared by attention weights and both residual branches.
    pub dropout: f32,
    pub layer_norm_eps: f64,
    pub activation: ActivationKind,
    /// Seed for parameter initialisation; `None` draws from OS entropy.
    pub seed: Option<u64>,
    pub dtype: DType,
    pub device: Device,
}

impl EncoderConfig {
    pub fn new(
        num_layers: usize,
        model_dim: usize,
        num_heads: usize,
        ffw_dim: usize,
        dropout: f32,
    ) -> Self {
        Self {
            num_layers,
            model_dim,
            num_heads,
            ffw_dim,
            dropout,
            layer_norm_eps: DEFAULT_LAYER_NORM_EPS,
            activation: ActivationKind::Relu,
            seed: None,
            dtype: DType::F32,
            device: Device::Cpu,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn with_dtype(mut self, dtype: DType) -> Self {
        self.dtype = dtype;
        self
    }

    pub fn with_activation(mut self, activation: ActivationKind) -> Self {
        self.activation = activation;
        self
    }

    pub fn with_layer_norm_eps(mut self, eps: f64) -> Self {
        self.layer_norm_eps = eps;
        self
    }

    /// Width of one attention head. Only meaningful after [`validate`](Self::validate).
    pub fn head_dim(&self) -> usize {
        if self.num_heads == 0 {
            0
        } else {
            self.model_dim / self.num_heads
        }
    }

    /// Checks every structural constraint and reports all violations at once.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.num_layers == 0 {
            errors.push("num_layers must be greater than 0".to_string());
        }
        if self.model_dim == 0 {
            errors.push("model_dim must be greater than 0".to_string());
        }
        if self.num_heads == 0 {
            errors.push("num_heads must be greater than 0".to_string());
        }
        if self.ffw_dim == 0 {
            errors.push("ffw_dim must be greater than 0".to_string());
        }
        if self.num_heads > 0 && self.model_dim % self.num_heads != 0 {
            errors.push(format!(
                "model_dim ({}) must be divisible by num_heads ({})",
                self.model_dim, self.num_heads
            ));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            errors.push(format!("dropout must be in [0, 1), got {}", self.dropout));
        }
        if !(self.layer_norm_eps.is_finite() && self.layer_norm_eps > 0.0) {
            errors.push(format!(
                "layer_norm_eps must be positive, got {}",
                self.layer_norm_eps
            ));
        }
        if !matches!(self.dtype, DType::F32 | DType::F16 | DType::BF16) {
            errors.push(format!("dtype must be f32, f16 or bf16, got {:?}", self.dtype));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(EncoderError::Config(errors))
        }
    }
}

/// File-loadable hyperparameters.
///
/// Missing keys take the defaults below; unknown keys are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EncoderHyperparameters {
    pub num_layers: usize,
    pub model_dim: usize,
    pub num_heads: usize,
    pub ffw_dim: usize,
    pub dropout: f32,
    pub layer_norm_eps: f64,
    pub activation: String,
    pub dtype: String,
    pub seed: Option<u64>,
}

impl Default for EncoderHyperparameters {
    fn default() -> Self {
        Self {
            num_layers: 6,
            model_dim: 768,
            num_heads: 8,
            ffw_dim: 2048,
            dropout: 0.1,
            layer_norm_eps: DEFAULT_LAYER_NORM_EPS,
            activation: "relu".to_string(),
            dtype: "f32".to_string(),
            seed: None,
        }
    }
}

fn parse_dtype(value: &str) -> Option<DType> {
    match value.to_ascii_lowercase().as_str() {
        "f32" | "float32" => Some(DType::F32),
        "f16" | "float16" => Some(DType::F16),
        "bf16" | "bfloat16" => Some(DType::BF16),
        _ => None,
    }
}

impl EncoderHyperparameters {
    /// Reads hyperparameters from a `.toml` or `.json` file and validates them.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let hyper: EncoderHyperparameters = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents)?,
            Some("toml") | None => toml::from_str(&contents)?,
            Some(other) => {
                return Err(EncoderError::ConfigFormat(format!(
                    "unsupported configuration extension '{other}'"
                )));
            }
        };
        hyper.validate()?;
        Ok(hyper)
    }

    pub fn validate(&self) -> Result<()> {
        self.to_config(Device::Cpu).map(|_| ())
    }

    /// Resolves into an [`EncoderConfig`] placed on `device`.
    pub fn to_config(&self, device: Device) -> Result<EncoderConfig> {
        let mut errors = Vec::new();
        let activation = ActivationKind::from_str(&self.activation)
            .map_err(|err| errors.push(err.to_string()))
            .ok();
        let dtype = parse_dtype(&self.dtype);
        if dtype.is_none() {
            errors.push(format!("unknown dtype '{}'", self.dtype));
        }

        let mut config = EncoderConfig::new(
            self.num_layers,
            self.model_dim,
            self.num_heads,
            self.ffw_dim,
            self.dropout,
        )
        .with_layer_norm_eps(self.layer_norm_eps)
        .with_activation(activation.unwrap_or_default())
        .with_dtype(dtype.unwrap_or(DType::F32))
        .with_device(device);
        config.seed = self.seed;

        if let Err(EncoderError::Config(mut structural)) = config.validate() {
            errors.append(&mut structural);
        }
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(EncoderError::Config(errors))
        }
    }
}
