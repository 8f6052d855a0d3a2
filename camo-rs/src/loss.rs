//! Training objectives and the relative-error statistic.
//!
//! All functions keep the autograd graph intact so the returned loss can be
//! handed straight to the optimizer.

use candle_core::Tensor;

use crate::error::Result;

/// A differentiable training objective.
pub trait Criterion: Send + Sync {
    /// Scalar loss for a batch of predictions against targets.
    ///
    /// # Errors
    ///
    /// Propagates tensor errors, including shape mismatches.
    fn loss(&self, prediction: &Tensor, target: &Tensor) -> Result<Tensor>;
}

/// Mean squared error over every output point of every sample.
#[derive(Debug, Clone, Copy, Default)]
pub struct OperatorL2Loss;

impl Criterion for OperatorL2Loss {
    fn loss(&self, prediction: &Tensor, target: &Tensor) -> Result<Tensor> {
        Ok((prediction - target)?.sqr()?.mean_all()?)
    }
}

/// Batch mean of the per-sample relative L2 error.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelativeL2Loss;

impl Criterion for RelativeL2Loss {
    fn loss(&self, prediction: &Tensor, target: &Tensor) -> Result<Tensor> {
        Ok(per_sample_relative_error(prediction, target)?.mean_all()?)
    }
}

/// `‖pred_i − target_i‖₂ / ‖target_i‖₂` for every sample `i` of the batch.
///
/// Returns a rank-1 tensor of length `batch`. Targets with zero norm yield
/// `inf`/`NaN`; no epsilon is added.
///
/// # Errors
///
/// Returns an error if the shapes differ.
pub fn per_sample_relative_error(prediction: &Tensor, target: &Tensor) -> Result<Tensor> {
    let diff = (prediction - target)?;
    let numerator = diff.flatten_from(1)?.sqr()?.sum(1)?.sqrt()?;
    let denominator = target.flatten_from(1)?.sqr()?.sum(1)?.sqrt()?;
    Ok((numerator / denominator)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    fn scalar(t: &Tensor) -> f32 {
        t.to_scalar::<f32>().unwrap()
    }

    #[test]
    fn test_l2_loss_zero_for_exact_prediction() {
        let target = Tensor::new(&[[[1.0f32], [2.0]]], &Device::Cpu).unwrap();
        let loss = OperatorL2Loss.loss(&target, &target).unwrap();
        assert_eq!(loss.rank(), 0);
        assert_eq!(scalar(&loss), 0.0);
    }

    #[test]
    fn test_l2_loss_value() {
        let device = Device::Cpu;
        let pred = Tensor::new(&[[[1.0f32], [3.0]]], &device).unwrap();
        let target = Tensor::new(&[[[0.0f32], [1.0]]], &device).unwrap();
        // (1 + 4) / 2
        let loss = OperatorL2Loss.loss(&pred, &target).unwrap();
        assert!((scalar(&loss) - 2.5).abs() < 1e-6);
    }

    #[test]
    fn test_l2_loss_shape_mismatch_propagates() {
        let device = Device::Cpu;
        let pred = Tensor::zeros((2, 5, 1), DType::F32, &device).unwrap();
        let target = Tensor::zeros((2, 4, 1), DType::F32, &device).unwrap();
        assert!(OperatorL2Loss.loss(&pred, &target).is_err());
    }

    #[test]
    fn test_per_sample_relative_error() {
        let device = Device::Cpu;
        let target = Tensor::new(&[[[3.0f32], [4.0]], [[1.0], [0.0]]], &device).unwrap();
        let pred = Tensor::new(&[[[3.0f32], [4.0]], [[0.0], [0.0]]], &device).unwrap();
        let errors = per_sample_relative_error(&pred, &target)
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].abs() < 1e-7);
        assert!((errors[1] - 1.0).abs() < 1e-7);
    }

    #[test]
    fn test_relative_l2_loss_is_mean_of_samples() {
        let device = Device::Cpu;
        let target = Tensor::new(&[[[1.0f32]], [[2.0]]], &device).unwrap();
        let pred = Tensor::new(&[[[2.0f32]], [[2.0]]], &device).unwrap();
        let loss = RelativeL2Loss.loss(&pred, &target).unwrap();
        assert!((scalar(&loss) - 0.5).abs() < 1e-6);
    }
}
