//! Portable, exact attention kernels.
//!
//! These paths favour clarity over absolute performance and serve as the
//! baseline every other kernel is checked against.

pub mod exact;

pub use exact::ScaledDotProductAttention;
