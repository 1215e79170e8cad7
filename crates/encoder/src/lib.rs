//! Post-norm Transformer encoder stack.
//!
//! [`Encoder`] consumes already-embedded inputs `[batch, seq_len, model_dim]`
//! with an optional `[batch, seq_len]` padding mask and returns the final
//! hidden states plus one attention-weight tensor per layer.

pub mod config;
pub mod encoder;
pub mod error;
pub mod layer;

pub use config::{EncoderConfig, EncoderHyperparameters};
pub use encoder::{Encoder, EncoderOutput};
pub use error::{EncoderError, Result};
pub use layer::{EncoderLayer, Layer};
