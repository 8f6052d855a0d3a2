//! Batch container and input augmentation.

use candle_core::{Tensor, D};

use crate::error::{CamoError, Result};

/// One batch of operator-learning samples.
///
/// Shapes: `input_field [B, N, F]`, `target_field [B, M, O]`,
/// `input_positions [B, N, P]`, `query_positions [B, M, P]`.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Sampled input field.
    pub input_field: Tensor,
    /// Ground-truth output field at the query positions.
    pub target_field: Tensor,
    /// Coordinates of the input samples.
    pub input_positions: Option<Tensor>,
    /// Coordinates at which the output is requested.
    pub query_positions: Option<Tensor>,
}

impl Batch {
    /// Build a batch with every tensor present.
    pub fn new(
        input_field: Tensor,
        target_field: Tensor,
        input_positions: Tensor,
        query_positions: Tensor,
    ) -> Self {
        Self {
            input_field,
            target_field,
            input_positions: Some(input_positions),
            query_positions: Some(query_positions),
        }
    }

    /// Number of samples (leading dimension of the target).
    ///
    /// # Errors
    ///
    /// Returns an error if the target tensor is rank 0.
    pub fn size(&self) -> Result<usize> {
        Ok(self.target_field.dim(0)?)
    }
}

/// Concatenate the input field and its coordinates along the feature axis.
///
/// `[B, N, F]` ++ `[B, N, P]` → `[B, N, F + P]`.
///
/// # Errors
///
/// Returns [`CamoError::MissingInputPositions`] when `input_positions` is
/// `None`, and propagates tensor errors from the concatenation.
pub fn augment_input(input_field: &Tensor, input_positions: Option<&Tensor>) -> Result<Tensor> {
    let input_positions = input_positions.ok_or(CamoError::MissingInputPositions)?;
    Ok(Tensor::cat(&[input_field, input_positions], D::Minus1)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn test_augment_input_shape() {
        let device = Device::Cpu;
        let x = Tensor::zeros((4, 16, 3), DType::F32, &device).unwrap();
        let pos = Tensor::ones((4, 16, 2), DType::F32, &device).unwrap();
        let augmented = augment_input(&x, Some(&pos)).unwrap();
        assert_eq!(augmented.dims(), &[4, 16, 5]);
    }

    #[test]
    fn test_augment_input_keeps_values_in_order() {
        let device = Device::Cpu;
        let x = Tensor::new(&[[[1.0f32], [2.0]]], &device).unwrap();
        let pos = Tensor::new(&[[[0.0f32], [0.5]]], &device).unwrap();
        let augmented = augment_input(&x, Some(&pos)).unwrap();
        let values = augmented.to_vec3::<f32>().unwrap();
        assert_eq!(values, vec![vec![vec![1.0, 0.0], vec![2.0, 0.5]]]);
    }

    #[test]
    fn test_augment_input_requires_positions() {
        let x = Tensor::zeros((2, 8, 1), DType::F32, &Device::Cpu).unwrap();
        let err = augment_input(&x, None).unwrap_err();
        assert!(matches!(err, CamoError::MissingInputPositions));
    }

    #[test]
    fn test_batch_size() {
        let device = Device::Cpu;
        let batch = Batch::new(
            Tensor::zeros((3, 8, 1), DType::F32, &device).unwrap(),
            Tensor::zeros((3, 4, 1), DType::F32, &device).unwrap(),
            Tensor::zeros((3, 8, 1), DType::F32, &device).unwrap(),
            Tensor::zeros((3, 4, 1), DType::F32, &device).unwrap(),
        );
        assert_eq!(batch.size().unwrap(), 3);
    }
}
