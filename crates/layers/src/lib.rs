//! Building blocks for the encoder stack.
//!
//! Everything here operates on candle tensors laid out as
//! `(batch, seq, hidden)`: dense projections, activations, LayerNorm, residual
//! adds with branch dropout, and the position-wise feed-forward block.
//! Learned tensors live in shared [`params::Parameter`] handles so an external
//! trainer can read and replace them by name.

pub mod activations;
pub mod checks;
pub mod dtypes;
pub mod linear;
pub mod mlp;
pub mod norm;
pub mod params;
pub mod residual;

pub use activations::ActivationKind;
pub use dtypes::PrecisionPolicy;
pub use linear::{Linear, LinearConfig, LinearInit};
pub use mlp::{FeedForward, FeedForwardConfig};
pub use norm::{LayerNorm, NormConfig, NormalizationLayer};
pub use params::{Parameter, ParameterMap, Parameterized};
pub use residual::{Residual, ResidualConfig};
