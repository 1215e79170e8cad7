//! Precision policy shared by every layer of the encoder.
//!
//! Parameters may live in `f16`/`bf16` while projections and activations run in
//! a wider compute dtype. Statistics (LayerNorm moments, softmax) always run in
//! `f32`. Outputs are cast back to the storage dtype so consecutive layers see a
//! consistent dtype.

use candle_core::{DType, Result, Tensor};

/// Storage, compute and reduction dtypes used by a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrecisionPolicy {
    storage: DType,
    compute: DType,
    reduction: DType,
}

impl PrecisionPolicy {
    /// Constructs a policy from explicit dtype selections.
    pub fn new(storage: DType, compute: DType, reduction: DType) -> Self {
        Self {
            storage,
            compute,
            reduction,
        }
    }

    /// Builds a policy from the parameter storage dtype.
    ///
    /// Half precision storage computes in `f32`; everything else computes in
    /// its own dtype.
    pub fn from_parameter_dtype(storage: DType) -> Self {
        let compute = match storage {
            DType::F16 | DType::BF16 => DType::F32,
            other => other,
        };
        Self::new(storage, compute, DType::F32)
    }

    pub fn storage(&self) -> DType {
        self.storage
    }

    pub fn compute(&self) -> DType {
        self.compute
    }

    pub fn reduction(&self) -> DType {
        self.reduction
    }

    /// Casts a tensor to the compute dtype for matmuls and activations.
    pub fn cast_for_matmul(&self, tensor: &Tensor) -> Result<Tensor> {
        cast_tensor(tensor, self.compute)
    }

    /// Casts a tensor to the reduction dtype for statistics.
    pub fn cast_for_reduction(&self, tensor: &Tensor) -> Result<Tensor> {
        cast_tensor(tensor, self.reduction)
    }

    /// Casts a tensor back to the storage dtype.
    pub fn cast_to_storage(&self, tensor: &Tensor) -> Result<Tensor> {
        cast_tensor(tensor, self.storage)
    }
}

impl Default for PrecisionPolicy {
    fn default() -> Self {
        Self::from_parameter_dtype(DType::F32)
    }
}

fn cast_tensor(tensor: &Tensor, dtype: DType) -> Result<Tensor> {
    if tensor.dtype() == dtype {
        Ok(tensor.clone())
    } else {
        tensor.to_dtype(dtype)
    }
}
