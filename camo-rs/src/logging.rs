//! Logging boundary for named scalars.
//!
//! The module only produces [`LoggedScalar`] records. Where they go is decided
//! by a [`MetricLogger`]: [`TracingLogger`] turns them into tracing events,
//! [`MetricHistory`] keeps them for later inspection or export.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Metric names emitted by the module.
pub mod names {
    /// Train loss, epoch aggregate.
    pub const TRAIN_LOSS: &str = "train/loss";
    /// Train relative error, epoch aggregate.
    pub const TRAIN_RELATIVE_ERROR: &str = "train/relative_error";
    /// Validation loss, epoch aggregate.
    pub const VAL_LOSS: &str = "val/loss";
    /// Validation relative error, epoch aggregate.
    pub const VAL_RELATIVE_ERROR: &str = "val/relative_error";
    /// Lowest validation loss seen this run.
    pub const VAL_LOSS_BEST: &str = "val/loss_best";
    /// Lowest validation relative error seen this run.
    pub const VAL_RELATIVE_ERROR_BEST: &str = "val/relative_error_best";
    /// Test loss, epoch aggregate.
    pub const TEST_LOSS: &str = "test/loss";
    /// Test relative error, epoch aggregate.
    pub const TEST_RELATIVE_ERROR: &str = "test/relative_error";
}

/// Whether a value describes one step or a whole epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogInterval {
    /// Per-step value.
    Step,
    /// Epoch-level aggregate.
    Epoch,
}

/// One named scalar with its logging intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggedScalar {
    /// Metric name, e.g. `val/loss`.
    pub name: String,
    /// Value.
    pub value: f64,
    /// Step or epoch aggregate.
    pub interval: LogInterval,
    /// Show in the progress display.
    pub prog_bar: bool,
    /// Reduce across workers before logging.
    pub sync_dist: bool,
    /// Epoch the value belongs to.
    pub epoch: usize,
    /// Optimizer steps taken when the value was produced.
    pub global_step: usize,
}

/// Sink for logged scalars.
pub trait MetricLogger {
    /// Record one scalar.
    fn log_scalar(&mut self, scalar: &LoggedScalar);

    /// Record a batch of scalars in order.
    fn log_all(&mut self, scalars: &[LoggedScalar]) {
        for scalar in scalars {
            self.log_scalar(scalar);
        }
    }
}

/// Emits every scalar as a structured `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl MetricLogger for TracingLogger {
    fn log_scalar(&mut self, scalar: &LoggedScalar) {
        tracing::info!(
            target: "camo::metrics",
            name = %scalar.name,
            value = scalar.value,
            epoch = scalar.epoch,
            step = scalar.global_step,
            sync_dist = scalar.sync_dist,
            "{} = {:.6}",
            scalar.name,
            scalar.value
        );
    }
}

/// In-memory record of everything logged during a run.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct MetricHistory {
    entries: Vec<LoggedScalar>,
}

impl MetricHistory {
    /// Create an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// All entries in logging order.
    pub fn entries(&self) -> &[LoggedScalar] {
        &self.entries
    }

    /// Most recent value logged under `name`.
    pub fn last(&self, name: &str) -> Option<f64> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.name == name)
            .map(|e| e.value)
    }

    /// Every value logged under `name`, oldest first.
    pub fn series(&self, name: &str) -> Vec<f64> {
        self.entries
            .iter()
            .filter(|e| e.name == name)
            .map(|e| e.value)
            .collect()
    }

    /// Write the history as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

impl MetricLogger for MetricHistory {
    fn log_scalar(&mut self, scalar: &LoggedScalar) {
        self.entries.push(scalar.clone());
    }
}

/// Forwards every scalar to two loggers.
#[derive(Debug)]
pub struct Tee<A, B>(pub A, pub B);

impl<A: MetricLogger, B: MetricLogger> MetricLogger for Tee<A, B> {
    fn log_scalar(&mut self, scalar: &LoggedScalar) {
        self.0.log_scalar(scalar);
        self.1.log_scalar(scalar);
    }
}
