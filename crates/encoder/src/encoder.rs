use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use attention::masks::padding_bias;
use candle_core::Tensor;
use layers::params::{scoped, ParameterMap, Parameterized};
use rand::{rngs::StdRng, SeedableRng};

use crate::config::EncoderConfig;
use crate::error::{EncoderError, Result};
use crate::layer::{EncoderLayer, Layer};

/// Final hidden states plus the attention weights of every layer, in order.
#[derive(Debug, Clone)]
pub struct EncoderOutput {
    /// `[batch, seq_len, model_dim]`.
    pub output: Tensor,
    /// One `[batch * num_heads, seq_len, seq_len]` tensor per layer.
    pub attentions: Vec<Tensor>,
}

impl EncoderOutput {
    pub fn into_parts(self) -> (Tensor, Vec<Tensor>) {
        (self.output, self.attentions)
    }
}

/// A stack of encoder layers sharing one padding mask.
pub struct Encoder {
    config: EncoderConfig,
    layers: Vec<Box<dyn Layer>>,
    training: AtomicBool,
}

impl std::fmt::Debug for Encoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Encoder")
            .field("num_layers", &self.layers.len())
            .field("model_dim", &self.config.model_dim)
            .field("num_heads", &self.config.num_heads)
            .field("training", &self.is_training())
            .finish()
    }
}

impl Encoder {
    /// Builds `config.num_layers` independently initialised [`EncoderLayer`]s.
    ///
    /// The stack starts in training mode; call [`eval`](Self::eval) before
    /// deterministic inference.
    pub fn new(config: EncoderConfig) -> Result<Self> {
        config.validate()?;
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut layers: Vec<Box<dyn Layer>> = Vec::with_capacity(config.num_layers);
        for index in 0..config.num_layers {
            layers.push(Box::new(EncoderLayer::new(index, &config, &mut rng)?));
        }

        let encoder = Self {
            config,
            layers,
            training: AtomicBool::new(true),
        };
        log::info!(
            "encoder init layers={} model_dim={} heads={} head_dim={} ffw_dim={} dropout={} dtype={:?} params={}",
            encoder.config.num_layers,
            encoder.config.model_dim,
            encoder.config.num_heads,
            encoder.config.head_dim(),
            encoder.config.ffw_dim,
            encoder.config.dropout,
            encoder.config.dtype,
            encoder.parameter_count()?
        );
        Ok(encoder)
    }

    /// Wraps caller-built layers. `config` describes the expected input width
    /// and must agree with the number of layers supplied.
    pub fn with_layers(config: EncoderConfig, layers: Vec<Box<dyn Layer>>) -> Result<Self> {
        config.validate()?;
        if layers.len() != config.num_layers {
            return Err(EncoderError::Config(vec![format!(
                "num_layers is {} but {} layers were supplied",
                config.num_layers,
                layers.len()
            )]));
        }
        log::info!(
            "encoder init from {} custom layers model_dim={}",
            layers.len(),
            config.model_dim
        );
        let encoder = Self {
            config,
            layers,
            training: AtomicBool::new(true),
        };
        encoder.set_training(true);
        Ok(encoder)
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn set_training(&self, training: bool) {
        self.training.store(training, Ordering::Relaxed);
        for layer in &self.layers {
            layer.set_training(training);
        }
    }

    pub fn train(&self) {
        self.set_training(true);
    }

    pub fn eval(&self) {
        self.set_training(false);
    }

    pub fn is_training(&self) -> bool {
        self.training.load(Ordering::Relaxed)
    }

    /// Runs `input` through every layer.
    ///
    /// `attn_mask` is a `[batch, seq_len]` keep-mask (1 for tokens, 0 for
    /// padding) in any numeric dtype. It is converted once to the additive
    /// bias `(1 - mask) * -10000` shaped `[batch, 1, seq_len]` and handed to
    /// every layer unchanged.
    pub fn forward(&self, input: &Tensor, attn_mask: Option<&Tensor>) -> Result<EncoderOutput> {
        let (batch, seq_len, hidden) = match input.dims() {
            [b, s, h] => (*b, *s, *h),
            dims => {
                return Err(EncoderError::shape(format!(
                    "encoder input must be [batch, seq_len, model_dim], got {dims:?}"
                )))
            }
        };
        if hidden != self.config.model_dim {
            return Err(EncoderError::shape(format!(
                "encoder input has model_dim {hidden}, expected {} (shape {:?})",
                self.config.model_dim,
                input.dims()
            )));
        }
        if input.dtype() != self.config.dtype {
            return Err(EncoderError::shape(format!(
                "encoder input has dtype {:?}, expected {:?}",
                input.dtype(),
                self.config.dtype
            )));
        }

        let bias = match attn_mask {
            Some(mask) => {
                if mask.dims() != [batch, seq_len].as_slice() {
                    return Err(EncoderError::shape(format!(
                        "attention mask must be [{batch}, {seq_len}] to match input {:?}, got {:?}",
                        input.dims(),
                        mask.dims()
                    )));
                }
                Some(padding_bias(mask)?)
            }
            None => None,
        };

        let mut hidden = input.clone();
        let mut attentions = Vec::with_capacity(self.layers.len());
        for (index, layer) in self.layers.iter().enumerate() {
            log::debug!(
                "encoder layer {index} input={:?} masked={}",
                hidden.dims(),
                bias.is_some()
            );
            let (next, weights) = layer.forward(&hidden, bias.as_ref())?;
            hidden = next;
            attentions.push(weights);
        }

        Ok(EncoderOutput {
            output: hidden,
            attentions,
        })
    }

    /// Replaces every parameter with the tensor of the same name.
    ///
    /// Strict: missing names, unexpected names and shape mismatches are all
    /// reported and nothing is written unless the whole map is consistent.
    pub fn load_parameters(&self, tensors: &HashMap<String, Tensor>) -> Result<()> {
        let params = self.named_parameters();
        let mut problems = Vec::new();

        for (name, param) in &params {
            match tensors.get(name) {
                None => problems.push(format!("missing parameter '{name}'")),
                Some(tensor) => {
                    let expected = param.dims()?;
                    if tensor.dims() != expected.as_slice() {
                        problems.push(format!(
                            "parameter '{name}' expects shape {expected:?}, got {:?}",
                            tensor.dims()
                        ));
                    }
                }
            }
        }
        let mut unexpected: Vec<&String> =
            tensors.keys().filter(|name| !params.contains_key(*name)).collect();
        unexpected.sort();
        for name in unexpected {
            problems.push(format!("unexpected parameter '{name}'"));
        }

        if !problems.is_empty() {
            return Err(EncoderError::parameter(problems.join("; ")));
        }

        for (name, param) in &params {
            if let Some(tensor) = tensors.get(name) {
                param
                    .replace(tensor)
                    .map_err(|err| EncoderError::parameter(format!("{name}: {err}")))?;
            }
        }
        log::info!("encoder loaded {} parameters", params.len());
        Ok(())
    }
}

impl Parameterized for Encoder {
    fn visit_parameters(&self, prefix: &str, out: &mut ParameterMap) {
        for (index, layer) in self.layers.iter().enumerate() {
            layer.visit_parameters(&scoped(prefix, &format!("layers.{index}")), out);
        }
    }
}
