//! Parameter and gradient health checks.
//!
//! Run after a backward pass to catch NaNs and collapsed parameters early.
//! Findings are reported through `tracing::warn!`; nothing here changes the
//! parameters.

use candle_core::backprop::GradStore;
use candle_core::{DType, Tensor};
use candle_nn::VarMap;
use serde::Serialize;

use crate::error::{CamoError, Result};

/// Ranges narrower than this are reported as collapsed.
pub const COLLAPSED_RANGE: f64 = 1e-6;

/// Min/max summary of one tensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TensorRange {
    /// Smallest element.
    pub min: f64,
    /// Largest element.
    pub max: f64,
    /// Whether any element is NaN.
    pub has_nan: bool,
}

impl TensorRange {
    /// Summarize `tensor`.
    ///
    /// # Errors
    ///
    /// Propagates tensor errors.
    pub fn of(tensor: &Tensor) -> Result<Self> {
        let values = tensor.flatten_all()?.to_dtype(DType::F64)?.to_vec1::<f64>()?;
        let has_nan = values.iter().any(|v| v.is_nan());
        let (min, max) = values
            .iter()
            .filter(|v| !v.is_nan())
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        Ok(Self { min, max, has_nan })
    }

    /// `max - min`, or zero for tensors with a single distinct value.
    pub fn span(&self) -> f64 {
        if self.max < self.min {
            0.0
        } else {
            self.max - self.min
        }
    }
}

/// Health summary of one named parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamReport {
    /// Name in the `VarMap`.
    pub name: String,
    /// Number of elements.
    pub elements: usize,
    /// Parameter value range.
    pub value: TensorRange,
    /// Gradient range, if a gradient was recorded.
    pub grad: Option<TensorRange>,
}

impl ParamReport {
    /// Whether the parameter or its gradient contains NaN.
    pub fn has_nan(&self) -> bool {
        self.value.has_nan || self.grad.is_some_and(|g| g.has_nan)
    }

    /// Whether a multi-element parameter has collapsed to a single value.
    pub fn is_collapsed(&self) -> bool {
        self.elements > 1 && self.value.span() < COLLAPSED_RANGE
    }
}

/// Summarize every parameter in `varmap`, sorted by name, and warn about
/// unhealthy ones.
///
/// # Errors
///
/// Propagates tensor errors.
pub fn inspect_parameters(varmap: &VarMap, grads: Option<&GradStore>) -> Result<Vec<ParamReport>> {
    let mut named: Vec<_> = {
        let data = varmap
            .data()
            .lock()
            .map_err(|_| CamoError::Lifecycle("parameter store lock poisoned".into()))?;
        data.iter()
            .map(|(name, var)| (name.clone(), var.clone()))
            .collect()
    };
    named.sort_by(|a, b| a.0.cmp(&b.0));

    let mut reports = Vec::with_capacity(named.len());
    for (name, var) in named {
        let tensor = var.as_tensor();
        let grad = grads
            .and_then(|g| g.get(tensor))
            .map(TensorRange::of)
            .transpose()?;
        let report = ParamReport {
            name,
            elements: tensor.elem_count(),
            value: TensorRange::of(tensor)?,
            grad,
        };
        if report.has_nan() {
            tracing::warn!(param = %report.name, "NaN detected in parameter or gradient");
        } else if report.is_collapsed() {
            tracing::warn!(
                param = %report.name,
                min = report.value.min,
                max = report.value.max,
                "parameter range collapsed"
            );
        }
        tracing::trace!(param = %report.name, value = ?report.value, grad = ?report.grad, "param range");
        reports.push(report);
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use candle_nn::Init;

    #[test]
    fn test_tensor_range() {
        let t = Tensor::new(&[1.0f32, -2.0, 3.5], &Device::Cpu).unwrap();
        let range = TensorRange::of(&t).unwrap();
        assert_eq!(range.min, -2.0);
        assert_eq!(range.max, 3.5);
        assert!(!range.has_nan);
        assert_eq!(range.span(), 5.5);
    }

    #[test]
    fn test_nan_is_flagged() {
        let t = Tensor::new(&[1.0f32, f32::NAN], &Device::Cpu).unwrap();
        let range = TensorRange::of(&t).unwrap();
        assert!(range.has_nan);
        assert_eq!(range.min, 1.0);
    }

    #[test]
    fn test_collapsed_parameter_detected() {
        let varmap = VarMap::new();
        varmap
            .get((4, 4), "flat", Init::Const(0.5), DType::F32, &Device::Cpu)
            .unwrap();
        varmap
            .get((4, 4), "spread", Init::Randn { mean: 0.0, stdev: 1.0 }, DType::F32, &Device::Cpu)
            .unwrap();

        let reports = inspect_parameters(&varmap, None).unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].name, "flat");
        assert!(reports[0].is_collapsed());
        assert!(!reports[1].is_collapsed());
        assert!(reports.iter().all(|r| r.grad.is_none()));
    }

    #[test]
    fn test_gradients_are_reported() {
        let varmap = VarMap::new();
        let w = varmap
            .get(3, "w", Init::Const(2.0), DType::F32, &Device::Cpu)
            .unwrap();
        let grads = w.sqr().unwrap().sum_all().unwrap().backward().unwrap();

        let reports = inspect_parameters(&varmap, Some(&grads)).unwrap();
        let grad = reports[0].grad.unwrap();
        assert_eq!(grad.min, 4.0);
        assert_eq!(grad.max, 4.0);
    }
}
