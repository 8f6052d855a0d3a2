//! Two-phase construction of the optimizer/scheduler bundle.
//!
//! [`OptimizationPlan::prepare`] captures the configuration when the module is
//! built. [`OptimizationPlan::finalize`] runs later, once the driver knows how
//! many optimizer steps the run will take, and binds the optimizer to the
//! model's variables.

use candle_core::Var;
use serde::{Deserialize, Serialize};

use crate::error::{CamoError, Result};
use crate::optimizer::{ModelOptimizer, OptimizerConfig};
use crate::scheduler::{LRScheduler, SchedulerConfig};

/// Metric every schedule is monitored against.
pub const MONITOR_VAL_LOSS: &str = "val/loss";

/// How often a schedule is advanced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepInterval {
    /// Once per optimizer step.
    Step,
    /// Once per training epoch.
    Epoch,
}

/// A schedule together with how the driver must advance it.
#[derive(Debug)]
pub struct SchedulerBinding {
    /// The schedule itself.
    pub scheduler: LRScheduler,
    /// Name of the aggregate handed to schedules that need a monitored value.
    pub monitor: String,
    /// Advance cadence.
    pub interval: StepInterval,
    /// Advance every `frequency` intervals.
    pub frequency: usize,
}

/// Optimizer plus optional schedule for one run.
#[derive(Debug)]
pub struct OptimizationBundle {
    /// Optimizer bound to the trainable variables.
    pub optimizer: ModelOptimizer,
    /// Present only when a scheduler was configured.
    pub scheduler: Option<SchedulerBinding>,
    optimizer_steps: usize,
    epochs: usize,
}

impl OptimizationBundle {
    /// Current learning rate.
    pub fn learning_rate(&self) -> f64 {
        self.optimizer.learning_rate()
    }

    /// Notify the bundle that one optimizer step has been taken.
    ///
    /// `monitored` is the latest value of the binding's monitored metric, if
    /// one exists yet.
    pub fn after_optimizer_step(&mut self, monitored: Option<f64>) {
        self.optimizer_steps += 1;
        let count = self.optimizer_steps;
        self.advance(StepInterval::Step, count, monitored);
    }

    /// Notify the bundle that a training epoch finished.
    pub fn after_epoch(&mut self, monitored: Option<f64>) {
        self.epochs += 1;
        let count = self.epochs;
        self.advance(StepInterval::Epoch, count, monitored);
    }

    fn advance(&mut self, interval: StepInterval, count: usize, monitored: Option<f64>) {
        let Some(binding) = self.scheduler.as_mut() else {
            return;
        };
        if binding.interval != interval || count % binding.frequency.max(1) != 0 {
            return;
        }
        binding.scheduler.step(&mut self.optimizer, monitored);
    }
}

/// Deferred optimizer/scheduler factory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationPlan {
    optimizer: OptimizerConfig,
    scheduler: Option<SchedulerConfig>,
}

impl OptimizationPlan {
    /// First phase: validate and store the factories.
    ///
    /// # Errors
    ///
    /// Returns [`CamoError::Config`] if either config is invalid.
    pub fn prepare(optimizer: OptimizerConfig, scheduler: Option<SchedulerConfig>) -> Result<Self> {
        optimizer.validate()?;
        if let Some(scheduler) = &scheduler {
            scheduler.validate()?;
        }
        Ok(Self {
            optimizer,
            scheduler,
        })
    }

    /// Whether a schedule will be part of the bundle.
    pub fn has_scheduler(&self) -> bool {
        self.scheduler.is_some()
    }

    /// Second phase: bind to `vars` and build the schedule for `total_steps`.
    ///
    /// # Errors
    ///
    /// Returns an error if the optimizer cannot be created, or a scheduler is
    /// configured and `total_steps` is zero.
    pub fn finalize(&self, total_steps: usize, vars: Vec<Var>) -> Result<OptimizationBundle> {
        let mut optimizer = self.optimizer.build(vars)?;

        let scheduler = match &self.scheduler {
            None => None,
            Some(config) => {
                if total_steps == 0 {
                    return Err(CamoError::Optimization(
                        "cannot build a scheduler for a run with zero optimizer steps".into(),
                    ));
                }
                let scheduler = config.build(self.optimizer.learning_rate, total_steps)?;
                scheduler.apply(&mut optimizer);
                tracing::info!(
                    "Initialized {:?} scheduler over {} steps (lr={:.3e})",
                    config,
                    total_steps,
                    scheduler.get_lr()
                );
                Some(SchedulerBinding {
                    scheduler,
                    monitor: MONITOR_VAL_LOSS.to_string(),
                    interval: StepInterval::Step,
                    frequency: 1,
                })
            }
        };

        Ok(OptimizationBundle {
            optimizer,
            scheduler,
            optimizer_steps: 0,
            epochs: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_scheduler_bundle_has_only_optimizer() {
        let plan = OptimizationPlan::prepare(OptimizerConfig::default(), None).unwrap();
        assert!(!plan.has_scheduler());
        let bundle = plan.finalize(0, Vec::new()).unwrap();
        assert!(bundle.scheduler.is_none());
        assert_eq!(bundle.learning_rate(), 1e-3);
    }

    #[test]
    fn test_scheduler_binding_fields() {
        let plan = OptimizationPlan::prepare(
            OptimizerConfig::default(),
            Some(SchedulerConfig::Linear {
                warmup_fraction: 0.1,
            }),
        )
        .unwrap();
        let bundle = plan.finalize(200, Vec::new()).unwrap();
        let binding = bundle.scheduler.as_ref().unwrap();
        assert_eq!(binding.monitor, "val/loss");
        assert_eq!(binding.interval, StepInterval::Step);
        assert_eq!(binding.frequency, 1);
        assert_eq!(binding.scheduler.total_steps(), 200);
        // warmup starts from zero
        assert_eq!(bundle.learning_rate(), 0.0);
    }

    #[test]
    fn test_scheduler_requires_total_steps() {
        let plan = OptimizationPlan::prepare(
            OptimizerConfig::default(),
            Some(SchedulerConfig::Constant),
        )
        .unwrap();
        assert!(matches!(
            plan.finalize(0, Vec::new()),
            Err(CamoError::Optimization(_))
        ));
    }

    #[test]
    fn test_prepare_rejects_invalid_config() {
        let optimizer = OptimizerConfig {
            learning_rate: -1.0,
            ..Default::default()
        };
        assert!(OptimizationPlan::prepare(optimizer, None).is_err());
    }

    #[test]
    fn test_step_interval_advances_per_optimizer_step() {
        let plan = OptimizationPlan::prepare(
            OptimizerConfig::default(),
            Some(SchedulerConfig::Linear {
                warmup_fraction: 0.5,
            }),
        )
        .unwrap();
        let mut bundle = plan.finalize(10, Vec::new()).unwrap();
        bundle.after_epoch(None);
        assert_eq!(bundle.learning_rate(), 0.0);
        bundle.after_optimizer_step(None);
        bundle.after_optimizer_step(None);
        assert!((bundle.learning_rate() - 4e-4).abs() < 1e-12);
    }

    #[test]
    fn test_epoch_interval_ignores_optimizer_steps() {
        let plan = OptimizationPlan::prepare(
            OptimizerConfig::default(),
            Some(SchedulerConfig::Linear {
                warmup_fraction: 0.5,
            }),
        )
        .unwrap();
        let mut bundle = plan.finalize(10, Vec::new()).unwrap();
        if let Some(binding) = bundle.scheduler.as_mut() {
            binding.interval = StepInterval::Epoch;
        }
        bundle.after_optimizer_step(None);
        assert_eq!(bundle.learning_rate(), 0.0);
        bundle.after_epoch(None);
        assert!((bundle.learning_rate() - 2e-4).abs() < 1e-12);
    }
}
