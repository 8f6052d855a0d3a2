//! Stateful metric accumulators.
//!
//! Accumulators ingest per-batch values and produce an aggregate on demand.
//! [`Metric::compute`] takes `&self`: reading an aggregate never changes it, so
//! callers may read in any order and as often as they like. Clearing state is
//! always an explicit [`Metric::reset`] made by the owner.

use candle_core::{DType, Tensor};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::loss::per_sample_relative_error;

/// Common read/reset surface shared by every accumulator.
pub trait Metric {
    /// Aggregate over everything ingested since the last reset.
    fn compute(&self) -> f64;

    /// Forget everything ingested so far.
    fn reset(&mut self);

    /// Whether nothing has been ingested since the last reset.
    fn is_empty(&self) -> bool;
}

/// Weighted running mean.
///
/// An empty mean computes to `NaN`.
#[derive(Debug, Clone, Default)]
pub struct MeanMetric {
    weighted_sum: f64,
    total_weight: f64,
}

impl MeanMetric {
    /// Create an empty mean.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest `value` with the given weight.
    ///
    /// Non-positive weights are ignored.
    pub fn update(&mut self, value: f64, weight: f64) {
        if weight <= 0.0 {
            return;
        }
        self.weighted_sum += value * weight;
        self.total_weight += weight;
    }

    /// Ingest a scalar tensor (rank 0 or a single element) with the given weight.
    ///
    /// # Errors
    ///
    /// Returns an error if the tensor does not hold exactly one element.
    pub fn update_tensor(&mut self, value: &Tensor, weight: f64) -> Result<()> {
        let value = value
            .flatten_all()?
            .to_dtype(DType::F64)?
            .squeeze(0)?
            .to_scalar::<f64>()?;
        self.update(value, weight);
        Ok(())
    }

    /// Total weight ingested since the last reset.
    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }
}

impl Metric for MeanMetric {
    fn compute(&self) -> f64 {
        if self.total_weight == 0.0 {
            return f64::NAN;
        }
        self.weighted_sum / self.total_weight
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    fn is_empty(&self) -> bool {
        self.total_weight == 0.0
    }
}

/// Minimum over every value seen since the last reset.
///
/// `NaN` inputs are skipped so the tracked minimum never becomes `NaN`.
/// An empty tracker computes to `+inf`.
#[derive(Debug, Clone)]
pub struct MinMetric {
    min: f64,
    seen: usize,
}

impl Default for MinMetric {
    fn default() -> Self {
        Self {
            min: f64::INFINITY,
            seen: 0,
        }
    }
}

impl MinMetric {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest one value.
    pub fn update(&mut self, value: f64) {
        if value.is_nan() {
            tracing::warn!("MinMetric ignored a NaN value");
            return;
        }
        self.min = self.min.min(value);
        self.seen += 1;
    }
}

impl Metric for MinMetric {
    fn compute(&self) -> f64 {
        self.min
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    fn is_empty(&self) -> bool {
        self.seen == 0
    }
}

/// Mean relative L2 error over samples.
///
/// Every sample in every batch contributes once, so batches of different sizes
/// are weighted by their sample count rather than averaged per batch.
#[derive(Debug, Clone, Default)]
pub struct RelativeErrorMetric {
    sum: f64,
    samples: usize,
}

impl RelativeErrorMetric {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest a batch of predictions and targets (leading dimension = batch).
    ///
    /// # Errors
    ///
    /// Propagates tensor errors, including shape mismatches between
    /// `prediction` and `target`.
    pub fn update(&mut self, prediction: &Tensor, target: &Tensor) -> Result<()> {
        let errors = per_sample_relative_error(prediction, target)?
            .to_dtype(DType::F64)?
            .to_vec1::<f64>()?;
        self.samples += errors.len();
        self.sum += errors.iter().sum::<f64>();
        Ok(())
    }

    /// Number of samples ingested since the last reset.
    pub fn samples(&self) -> usize {
        self.samples
    }
}

impl Metric for RelativeErrorMetric {
    fn compute(&self) -> f64 {
        if self.samples == 0 {
            return f64::NAN;
        }
        self.sum / self.samples as f64
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    fn is_empty(&self) -> bool {
        self.samples == 0
    }
}

/// Point-in-time view of a phase's accumulators.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseSnapshot {
    /// Sample-weighted mean loss.
    pub loss: f64,
    /// Sample-weighted mean relative error.
    pub relative_error: f64,
    /// Samples ingested so far this epoch.
    pub samples: usize,
}

/// The accumulator pair each phase owns.
#[derive(Debug, Clone, Default)]
pub struct PhaseMetrics {
    /// Loss mean, weighted by batch size.
    pub loss: MeanMetric,
    /// Relative error over samples.
    pub relative_error: RelativeErrorMetric,
}

impl PhaseMetrics {
    /// Create empty accumulators.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest one batch: its scalar loss plus the prediction/target pair.
    ///
    /// # Errors
    ///
    /// Propagates tensor errors from either accumulator.
    pub fn update(&mut self, loss: &Tensor, prediction: &Tensor, target: &Tensor) -> Result<()> {
        let batch_size = target.dim(0)?;
        self.loss.update_tensor(loss, batch_size as f64)?;
        self.relative_error.update(prediction, target)?;
        Ok(())
    }

    /// Clear both accumulators.
    pub fn reset(&mut self) {
        self.loss.reset();
        self.relative_error.reset();
    }

    /// Read both aggregates without clearing them.
    pub fn snapshot(&self) -> PhaseSnapshot {
        PhaseSnapshot {
            loss: self.loss.compute(),
            relative_error: self.relative_error.compute(),
            samples: self.relative_error.samples(),
        }
    }
}

/// Run-long minimum trackers for the validation aggregates.
#[derive(Debug, Clone, Default)]
pub struct BestTrackers {
    /// Lowest epoch validation loss seen.
    pub loss: MinMetric,
    /// Lowest epoch validation relative error seen.
    pub relative_error: MinMetric,
}

impl BestTrackers {
    /// Clear both trackers.
    pub fn reset(&mut self) {
        self.loss.reset();
        self.relative_error.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_mean_metric_empty_is_nan() {
        let mean = MeanMetric::new();
        assert!(mean.is_empty());
        assert!(mean.compute().is_nan());
    }

    #[test]
    fn test_mean_metric_weighted() {
        let mut mean = MeanMetric::new();
        mean.update(1.0, 1.0);
        mean.update(4.0, 3.0);
        assert!((mean.compute() - 3.25).abs() < 1e-12);
        assert_eq!(mean.total_weight(), 4.0);
    }

    #[test]
    fn test_mean_metric_order_independent() {
        let values = [(0.5, 4.0), (2.0, 1.0), (1.25, 7.0)];
        let mut forward = MeanMetric::new();
        let mut backward = MeanMetric::new();
        for (v, w) in values {
            forward.update(v, w);
        }
        for (v, w) in values.iter().rev() {
            backward.update(*v, *w);
        }
        assert!((forward.compute() - backward.compute()).abs() < 1e-12);
    }

    #[test]
    fn test_mean_metric_compute_is_read_only() {
        let mut mean = MeanMetric::new();
        mean.update(2.0, 1.0);
        let first = mean.compute();
        let second = mean.compute();
        assert_eq!(first, second);
        assert!(!mean.is_empty());
    }

    #[test]
    fn test_mean_metric_update_tensor() {
        let mut mean = MeanMetric::new();
        let scalar = Tensor::new(1.5f32, &Device::Cpu).unwrap();
        mean.update_tensor(&scalar, 2.0).unwrap();
        assert!((mean.compute() - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_min_metric_tracks_minimum() {
        let mut best = MinMetric::new();
        assert_eq!(best.compute(), f64::INFINITY);
        for v in [0.5, 0.2, 0.3] {
            best.update(v);
        }
        assert_eq!(best.compute(), 0.2);
    }

    #[test]
    fn test_min_metric_ignores_nan() {
        let mut best = MinMetric::new();
        best.update(0.4);
        best.update(f64::NAN);
        assert_eq!(best.compute(), 0.4);
    }

    #[test]
    fn test_relative_error_exact_prediction_is_zero() {
        let device = Device::Cpu;
        let target = Tensor::new(&[[[1.0f32], [2.0]], [[3.0], [4.0]]], &device).unwrap();
        let mut metric = RelativeErrorMetric::new();
        metric.update(&target, &target).unwrap();
        assert_eq!(metric.samples(), 2);
        assert!(metric.compute().abs() < 1e-7);
    }

    #[test]
    fn test_relative_error_weights_by_sample() {
        let device = Device::Cpu;
        // batch of one sample with relative error 1.0
        let target_a = Tensor::new(&[[[1.0f32]]], &device).unwrap();
        let pred_a = Tensor::new(&[[[2.0f32]]], &device).unwrap();
        // batch of three samples with relative error 0.0
        let target_b = Tensor::new(&[[[1.0f32]], [[1.0]], [[1.0]]], &device).unwrap();

        let mut metric = RelativeErrorMetric::new();
        metric.update(&pred_a, &target_a).unwrap();
        metric.update(&target_b, &target_b).unwrap();
        assert!((metric.compute() - 0.25).abs() < 1e-7);
    }

    #[test]
    fn test_relative_error_shape_mismatch_errors() {
        let device = Device::Cpu;
        let pred = Tensor::zeros((2, 3, 1), DType::F32, &device).unwrap();
        let target = Tensor::zeros((2, 4, 1), DType::F32, &device).unwrap();
        let mut metric = RelativeErrorMetric::new();
        assert!(metric.update(&pred, &target).is_err());
        assert!(metric.is_empty());
    }

    #[test]
    fn test_phase_metrics_reset() {
        let device = Device::Cpu;
        let target = Tensor::ones((2, 3, 1), DType::F32, &device).unwrap();
        let loss = Tensor::new(0.5f32, &device).unwrap();
        let mut phase = PhaseMetrics::new();
        phase.update(&loss, &target, &target).unwrap();
        assert_eq!(phase.snapshot().samples, 2);
        phase.reset();
        assert!(phase.loss.is_empty());
        assert!(phase.relative_error.is_empty());
    }
}
