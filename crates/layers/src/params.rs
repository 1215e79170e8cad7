//! Shared parameter handles.
//!
//! Learned tensors are owned by the component that declares them but are also
//! reachable by an external trainer through a flat, named map. Each handle is
//! an `Arc<RwLock<Tensor>>`: forward passes take short read locks, the trainer
//! is the single writer and swaps whole tensors through [`Parameter::replace`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use candle_core::{Error, Result, Tensor};

use crate::checks;

/// Flat mapping from dotted parameter names to their handles.
pub type ParameterMap = BTreeMap<String, Parameter>;

/// A learned tensor shared between its owning layer and outside readers/writers.
#[derive(Clone)]
pub struct Parameter {
    inner: Arc<RwLock<Tensor>>,
}

impl Parameter {
    pub fn new(tensor: Tensor) -> Self {
        Self {
            inner: Arc::new(RwLock::new(tensor)),
        }
    }

    /// Returns the current tensor. Cloning a candle tensor only bumps a refcount.
    pub fn value(&self) -> Result<Tensor> {
        self.inner
            .read()
            .map(|guard| guard.clone())
            .map_err(|_| Error::Msg("parameter lock poisoned".into()))
    }

    /// Shape of the stored tensor.
    pub fn dims(&self) -> Result<Vec<usize>> {
        Ok(self.value()?.dims().to_vec())
    }

    /// Overwrites the stored tensor.
    ///
    /// `value` must match the current shape; it is moved to the parameter's
    /// device and cast to its dtype.
    pub fn replace(&self, value: &Tensor) -> Result<()> {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| Error::Msg("parameter lock poisoned".into()))?;
        checks::expect_shape("parameter.replace", value, guard.dims())?;
        let updated = value
            .to_device(guard.device())?
            .to_dtype(guard.dtype())?
            .contiguous()?;
        *guard = updated;
        Ok(())
    }

    /// True when both handles point at the same storage slot.
    pub fn shares_storage_with(&self, other: &Parameter) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.read() {
            Ok(tensor) => f
                .debug_struct("Parameter")
                .field("dims", &tensor.dims())
                .field("dtype", &tensor.dtype())
                .finish(),
            Err(_) => f.write_str("Parameter(<poisoned>)"),
        }
    }
}

/// Components that own learned parameters.
pub trait Parameterized {
    /// Inserts every parameter under `prefix` into `out`.
    fn visit_parameters(&self, prefix: &str, out: &mut ParameterMap);

    /// Collects all parameters into a fresh map keyed by dotted name.
    fn named_parameters(&self) -> ParameterMap {
        let mut out = ParameterMap::new();
        self.visit_parameters("", &mut out);
        out
    }

    /// Total number of scalar parameters.
    fn parameter_count(&self) -> Result<usize> {
        self.named_parameters()
            .values()
            .map(|param| param.value().map(|tensor| tensor.elem_count()))
            .sum()
    }
}

/// Joins a parent scope and a child name with a dot.
pub fn scoped(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn replace_is_visible_through_clones() -> Result<()> {
        let device = Device::Cpu;
        let param = Parameter::new(Tensor::zeros((2, 2), DType::F32, &device)?);
        let reader = param.clone();
        assert!(reader.shares_storage_with(&param));

        param.replace(&Tensor::ones((2, 2), DType::F32, &device)?)?;
        let seen = reader.value()?.flatten_all()?.to_vec1::<f32>()?;
        assert_eq!(seen, vec![1.0; 4]);
        Ok(())
    }

    #[test]
    fn replace_rejects_shape_changes() -> Result<()> {
        let device = Device::Cpu;
        let param = Parameter::new(Tensor::zeros(4, DType::F32, &device)?);
        let err = param
            .replace(&Tensor::zeros(5, DType::F32, &device)?)
            .unwrap_err();
        assert!(err.to_string().contains("[4]"));
        Ok(())
    }

    #[test]
    fn replace_casts_to_stored_dtype() -> Result<()> {
        let device = Device::Cpu;
        let param = Parameter::new(Tensor::zeros(3, DType::F16, &device)?);
        param.replace(&Tensor::new(&[0.5f32, 1.0, 2.0], &device)?)?;
        assert_eq!(param.value()?.dtype(), DType::F16);
        Ok(())
    }

    #[test]
    fn scoped_names() {
        assert_eq!(scoped("", "weight"), "weight");
        assert_eq!(scoped("layers.0", "weight"), "layers.0.weight");
    }
}
