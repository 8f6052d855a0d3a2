//! Fit/validate/test loops around a [`CamoModule`].
//!
//! The loop owns everything the module does not: batch iteration, the
//! backward pass, optimizer and schedule stepping, the sanity pass and
//! forwarding logged scalars to a [`MetricLogger`].

use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};

use crate::batch::Batch;
use crate::diagnostics;
use crate::error::{CamoError, Result};
use crate::logging::MetricLogger;
use crate::metrics::PhaseSnapshot;
use crate::module::{CamoModule, Phase, Stage};

/// Loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerConfig {
    /// Number of training epochs.
    #[serde(default = "default_max_epochs")]
    pub max_epochs: usize,

    /// Samples per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Validation batches run before training starts. Their results are
    /// discarded.
    #[serde(default = "default_sanity_steps")]
    pub num_sanity_val_steps: usize,

    /// Progress and debug logging interval in optimizer steps.
    #[serde(default = "default_log_every")]
    pub log_every_n_steps: usize,

    /// Inspect parameters and gradients after every backward pass.
    #[serde(default)]
    pub check_params: bool,

    /// Show a progress bar.
    #[serde(default = "default_true")]
    pub progress: bool,
}

fn default_max_epochs() -> usize {
    20
}
fn default_batch_size() -> usize {
    16
}
fn default_sanity_steps() -> usize {
    2
}
fn default_log_every() -> usize {
    10
}
fn default_true() -> bool {
    true
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            max_epochs: default_max_epochs(),
            batch_size: default_batch_size(),
            num_sanity_val_steps: default_sanity_steps(),
            log_every_n_steps: default_log_every(),
            check_params: false,
            progress: true,
        }
    }
}

impl TrainerConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CamoError::Config`] when a count that must be positive is zero.
    pub fn validate(&self) -> Result<()> {
        if self.max_epochs == 0 {
            return Err(CamoError::Config("trainer.max_epochs must be >= 1".into()));
        }
        if self.batch_size == 0 {
            return Err(CamoError::Config("trainer.batch_size must be >= 1".into()));
        }
        if self.log_every_n_steps == 0 {
            return Err(CamoError::Config(
                "trainer.log_every_n_steps must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

/// Outcome of [`FitLoop::fit`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FitSummary {
    /// Training epochs completed.
    pub epochs: usize,
    /// Optimizer steps taken.
    pub global_step: usize,
    /// Lowest epoch validation loss.
    pub best_val_loss: f64,
    /// Lowest epoch validation relative error.
    pub best_val_relative_error: f64,
    /// Learning rate after the last step.
    pub final_learning_rate: f64,
}

/// Drives a module through fit, validation and test.
#[derive(Debug, Clone)]
pub struct FitLoop {
    config: TrainerConfig,
}

impl FitLoop {
    /// Create a loop.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: TrainerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Loop settings.
    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Total optimizer steps a fit over `train_batches` batches will take.
    pub fn estimated_stepping_batches(&self, train_batches: usize) -> usize {
        train_batches * self.config.max_epochs
    }

    fn progress_bar(&self, len: usize) -> Result<ProgressBar> {
        if !self.config.progress {
            return Ok(ProgressBar::hidden());
        }
        let pb = ProgressBar::new(len as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos:>7}/{len:7} {msg}")?
                .progress_chars("#>-"),
        );
        Ok(pb)
    }

    /// Train `module` on `train`, validating on `val` after every epoch.
    ///
    /// # Errors
    ///
    /// Returns [`CamoError::Dataset`] if `train` is empty and propagates any
    /// error raised by the module, the backward pass or the optimizer.
    pub fn fit(
        &self,
        module: &mut CamoModule,
        train: &[Batch],
        val: &[Batch],
        logger: &mut impl MetricLogger,
    ) -> Result<FitSummary> {
        if train.is_empty() {
            return Err(CamoError::Dataset("no training batches".into()));
        }

        module.on_stage_enter(Stage::Fit)?;
        let total_steps = self.estimated_stepping_batches(train.len());
        let mut bundle = module.configure_optimizers(total_steps)?;

        tracing::info!("Starting fit");
        tracing::info!("  Epochs: {}", self.config.max_epochs);
        tracing::info!("  Train batches: {}", train.len());
        tracing::info!("  Val batches: {}", val.len());
        tracing::info!("  Total steps: {}", total_steps);

        let sanity = self.config.num_sanity_val_steps.min(val.len());
        if sanity > 0 {
            run_epoch(module, Phase::Validate, &val[..sanity])?;
            let discarded = module.take_logged();
            tracing::debug!("Sanity check done; discarded {} log entries", discarded.len());
        }

        module.on_train_start();
        let pb = self.progress_bar(total_steps)?;

        for epoch in 0..self.config.max_epochs {
            tracing::info!("Starting epoch {}/{}", epoch + 1, self.config.max_epochs);
            module.on_epoch_start(Phase::Train);
            for batch in train {
                let loss = module.training_step(batch)?;
                let grads = loss.backward()?;
                if self.config.check_params {
                    diagnostics::inspect_parameters(module.varmap(), Some(&grads))?;
                }
                bundle.optimizer.step(&grads)?;
                bundle.after_optimizer_step(module.last_val_loss());

                pb.inc(1);
                let step = module.global_step();
                if step % self.config.log_every_n_steps == 0 {
                    let running = module.running_metrics(Phase::Train);
                    pb.set_message(format!("{:.4}", running.loss));
                    tracing::debug!(
                        "Step {}/{}, Epoch {}, Loss: {:.4}, LR: {:.2e}",
                        step,
                        total_steps,
                        epoch + 1,
                        running.loss,
                        bundle.learning_rate()
                    );
                }
            }
            module.on_epoch_end(Phase::Train)?;

            if !val.is_empty() {
                run_epoch(module, Phase::Validate, val)?;
            }
            bundle.after_epoch(module.last_val_loss());
            logger.log_all(&module.take_logged());
        }

        pb.finish_with_message("Training complete");

        Ok(FitSummary {
            epochs: module.current_epoch(),
            global_step: module.global_step(),
            best_val_loss: module.best_val_loss(),
            best_val_relative_error: module.best_val_relative_error(),
            final_learning_rate: bundle.learning_rate(),
        })
    }

    /// Run one standalone validation epoch.
    ///
    /// # Errors
    ///
    /// Propagates module errors.
    pub fn validate(
        &self,
        module: &mut CamoModule,
        val: &[Batch],
        logger: &mut impl MetricLogger,
    ) -> Result<PhaseSnapshot> {
        self.evaluate(module, Stage::Validate, Phase::Validate, val, logger)
    }

    /// Run one test epoch.
    ///
    /// # Errors
    ///
    /// Propagates module errors.
    pub fn test(
        &self,
        module: &mut CamoModule,
        test: &[Batch],
        logger: &mut impl MetricLogger,
    ) -> Result<PhaseSnapshot> {
        self.evaluate(module, Stage::Test, Phase::Test, test, logger)
    }

    fn evaluate(
        &self,
        module: &mut CamoModule,
        stage: Stage,
        phase: Phase,
        batches: &[Batch],
        logger: &mut impl MetricLogger,
    ) -> Result<PhaseSnapshot> {
        module.on_stage_enter(stage)?;
        run_epoch(module, phase, batches)?;
        logger.log_all(&module.take_logged());
        Ok(module.running_metrics(phase))
    }
}

/// One evaluation epoch: open, step every batch, close.
fn run_epoch(module: &mut CamoModule, phase: Phase, batches: &[Batch]) -> Result<()> {
    module.on_epoch_start(phase);
    for batch in batches {
        match phase {
            Phase::Validate => module.validation_step(batch)?,
            Phase::Test => module.test_step(batch)?,
            Phase::Train => {
                return Err(CamoError::Lifecycle(
                    "training batches need an optimizer step".into(),
                ))
            }
        }
    }
    module.on_epoch_end(phase)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trainer_config_defaults() {
        let config = TrainerConfig::default();
        assert_eq!(config.max_epochs, 20);
        assert_eq!(config.num_sanity_val_steps, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_trainer_config_rejects_zero_epochs() {
        let config = TrainerConfig {
            max_epochs: 0,
            ..Default::default()
        };
        assert!(matches!(FitLoop::new(config), Err(CamoError::Config(_))));
    }

    #[test]
    fn test_estimated_stepping_batches() {
        let fit = FitLoop::new(TrainerConfig {
            max_epochs: 3,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(fit.estimated_stepping_batches(7), 21);
    }

    #[test]
    fn test_hidden_progress_bar() {
        let fit = FitLoop::new(TrainerConfig {
            progress: false,
            ..Default::default()
        })
        .unwrap();
        assert!(fit.progress_bar(10).unwrap().is_hidden());
    }
}
