//! Learning rate schedulers.
//!
//! Every schedule is advanced once per optimizer step. Schedules are built
//! against a known `total_steps`, which is why construction is deferred until
//! the driver has estimated the run length (see [`crate::optimization`]).

use serde::{Deserialize, Serialize};

use crate::error::{CamoError, Result};
use crate::optimizer::ModelOptimizer;

/// Learning rate scheduler configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchedulerConfig {
    /// Constant learning rate
    Constant,
    /// Linear warmup then linear decay to zero
    Linear {
        /// Fraction of total steps spent warming up
        #[serde(default = "default_warmup_fraction")]
        warmup_fraction: f64,
    },
    /// Linear warmup then cosine decay to `min_lr`
    Cosine {
        /// Fraction of total steps spent warming up
        #[serde(default = "default_warmup_fraction")]
        warmup_fraction: f64,
        /// Floor reached at the end of training
        #[serde(default)]
        min_lr: f64,
    },
    /// One-cycle policy with cosine annealing
    OneCycle {
        /// Peak learning rate
        max_lr: f64,
        /// Fraction of steps spent increasing the learning rate
        #[serde(default = "default_pct_start")]
        pct_start: f64,
        /// `initial_lr = max_lr / div_factor`
        #[serde(default = "default_div_factor")]
        div_factor: f64,
        /// `min_lr = initial_lr / final_div_factor`
        #[serde(default = "default_final_div_factor")]
        final_div_factor: f64,
    },
    /// Multiply the learning rate by `factor` once the monitored value stops
    /// improving for more than `patience` steps
    ReduceOnPlateau {
        /// Multiplicative decay
        #[serde(default = "default_plateau_factor")]
        factor: f64,
        /// Steps without improvement tolerated before decaying
        #[serde(default = "default_patience")]
        patience: usize,
        /// Relative improvement required to reset patience
        #[serde(default = "default_threshold")]
        threshold: f64,
        /// Lower bound on the learning rate
        #[serde(default)]
        min_lr: f64,
    },
}

fn default_warmup_fraction() -> f64 {
    0.1
}
fn default_pct_start() -> f64 {
    0.3
}
fn default_div_factor() -> f64 {
    25.0
}
fn default_final_div_factor() -> f64 {
    1e4
}
fn default_plateau_factor() -> f64 {
    0.1
}
fn default_patience() -> usize {
    10
}
fn default_threshold() -> f64 {
    1e-4
}

impl SchedulerConfig {
    /// Check parameters are in range.
    ///
    /// # Errors
    ///
    /// Returns [`CamoError::Config`] for out-of-range values.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(CamoError::Config(format!("scheduler: {msg}")));
        match *self {
            SchedulerConfig::Constant => Ok(()),
            SchedulerConfig::Linear { warmup_fraction }
            | SchedulerConfig::Cosine {
                warmup_fraction, ..
            } if !(0.0..1.0).contains(&warmup_fraction) => fail("warmup_fraction must be in [0, 1)"),
            SchedulerConfig::Cosine { min_lr, .. } if min_lr < 0.0 => fail("min_lr must be >= 0"),
            SchedulerConfig::OneCycle { max_lr, .. } if max_lr <= 0.0 => fail("max_lr must be > 0"),
            SchedulerConfig::OneCycle { pct_start, .. } if !(pct_start > 0.0 && pct_start < 1.0) => {
                fail("pct_start must be in (0, 1)")
            }
            SchedulerConfig::OneCycle {
                div_factor,
                final_div_factor,
                ..
            } if div_factor <= 0.0 || final_div_factor <= 0.0 => fail("div factors must be > 0"),
            SchedulerConfig::ReduceOnPlateau { factor, .. } if !(factor > 0.0 && factor < 1.0) => {
                fail("factor must be in (0, 1)")
            }
            SchedulerConfig::ReduceOnPlateau { threshold, min_lr, .. }
                if threshold < 0.0 || min_lr < 0.0 =>
            {
                fail("threshold and min_lr must be >= 0")
            }
            _ => Ok(()),
        }
    }

    /// Whether this schedule reads a monitored metric when stepped.
    pub fn requires_monitor(&self) -> bool {
        matches!(self, SchedulerConfig::ReduceOnPlateau { .. })
    }

    /// Build the schedule for a run of `total_steps` optimizer steps.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid or `total_steps` is zero.
    pub fn build(&self, base_lr: f64, total_steps: usize) -> Result<LRScheduler> {
        self.validate()?;
        if total_steps == 0 {
            return Err(CamoError::Optimization(
                "scheduler needs total_steps >= 1".into(),
            ));
        }
        let mut scheduler = LRScheduler {
            config: self.clone(),
            base_lr,
            total_steps,
            current_step: 0,
            current_lr: base_lr,
            plateau: PlateauState::default(),
        };
        scheduler.current_lr = scheduler.lr_at(0);
        Ok(scheduler)
    }
}

#[derive(Debug, Clone)]
struct PlateauState {
    best: f64,
    bad_steps: usize,
}

impl Default for PlateauState {
    fn default() -> Self {
        Self {
            best: f64::INFINITY,
            bad_steps: 0,
        }
    }
}

/// Learning rate scheduler.
#[derive(Debug, Clone)]
pub struct LRScheduler {
    config: SchedulerConfig,
    /// Learning rate the optimizer was configured with
    base_lr: f64,
    /// Run length the schedule was built for
    total_steps: usize,
    /// Current step
    current_step: usize,
    /// Learning rate for the current step
    current_lr: f64,
    plateau: PlateauState,
}

impl LRScheduler {
    /// Learning rate for the current step.
    pub fn get_lr(&self) -> f64 {
        self.current_lr
    }

    /// Steps taken so far.
    pub fn current_step(&self) -> usize {
        self.current_step
    }

    /// Run length the schedule was built for.
    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    /// Whether [`LRScheduler::step`] reads the monitored value.
    pub fn requires_monitor(&self) -> bool {
        self.config.requires_monitor()
    }

    /// Push the current learning rate into the optimizer.
    pub fn apply(&self, optimizer: &mut ModelOptimizer) {
        optimizer.set_learning_rate(self.current_lr);
    }

    /// Advance one optimizer step and update the optimizer's learning rate.
    ///
    /// `monitored` is only read by plateau schedules; when they get `None`
    /// the learning rate is left unchanged.
    pub fn step(&mut self, optimizer: &mut ModelOptimizer, monitored: Option<f64>) {
        self.current_step += 1;
        self.current_lr = match self.config {
            SchedulerConfig::ReduceOnPlateau { .. } => self.plateau_step(monitored),
            _ => self.lr_at(self.current_step),
        };
        self.apply(optimizer);
    }

    /// Closed-form learning rate at `step` for the step-driven schedules.
    fn lr_at(&self, step: usize) -> f64 {
        match self.config {
            SchedulerConfig::Constant | SchedulerConfig::ReduceOnPlateau { .. } => self.base_lr,
            SchedulerConfig::Linear { warmup_fraction } => {
                let warmup = self.warmup_steps(warmup_fraction);
                if step < warmup {
                    self.base_lr * (step as f64 / warmup as f64)
                } else {
                    let progress = self.decay_progress(step, warmup);
                    self.base_lr * (1.0 - progress).max(0.0)
                }
            }
            SchedulerConfig::Cosine {
                warmup_fraction,
                min_lr,
            } => {
                let warmup = self.warmup_steps(warmup_fraction);
                if step < warmup {
                    self.base_lr * (step as f64 / warmup as f64)
                } else {
                    let progress = self.decay_progress(step, warmup);
                    cosine_anneal(self.base_lr, min_lr, progress)
                }
            }
            SchedulerConfig::OneCycle {
                max_lr,
                pct_start,
                div_factor,
                final_div_factor,
            } => {
                let initial_lr = max_lr / div_factor;
                let min_lr = initial_lr / final_div_factor;
                let last = (self.total_steps - 1) as f64;
                let peak = (pct_start * self.total_steps as f64 - 1.0).max(1.0).min(last);
                let step = (step as f64).min(last);
                if step <= peak {
                    let pct = if peak > 0.0 { step / peak } else { 1.0 };
                    cosine_anneal(initial_lr, max_lr, pct)
                } else {
                    let span = (last - peak).max(1.0);
                    cosine_anneal(max_lr, min_lr, (step - peak) / span)
                }
            }
        }
    }

    fn warmup_steps(&self, warmup_fraction: f64) -> usize {
        (self.total_steps as f64 * warmup_fraction) as usize
    }

    fn decay_progress(&self, step: usize, warmup: usize) -> f64 {
        let span = self.total_steps.saturating_sub(warmup).max(1);
        (step.saturating_sub(warmup) as f64 / span as f64).min(1.0)
    }

    fn plateau_step(&mut self, monitored: Option<f64>) -> f64 {
        let SchedulerConfig::ReduceOnPlateau {
            factor,
            patience,
            threshold,
            min_lr,
        } = self.config
        else {
            return self.current_lr;
        };
        let Some(value) = monitored.filter(|v| v.is_finite()) else {
            return self.current_lr;
        };

        if value < self.plateau.best * (1.0 - threshold) {
            self.plateau.best = value;
            self.plateau.bad_steps = 0;
            return self.current_lr;
        }

        self.plateau.bad_steps += 1;
        if self.plateau.bad_steps > patience {
            self.plateau.bad_steps = 0;
            let reduced = (self.current_lr * factor).max(min_lr);
            if reduced < self.current_lr {
                tracing::info!(
                    "Reducing learning rate {:.3e} -> {:.3e} at step {}",
                    self.current_lr,
                    reduced,
                    self.current_step
                );
            }
            return reduced;
        }
        self.current_lr
    }
}

/// Cosine interpolation from `start` (pct = 0) to `end` (pct = 1).
fn cosine_anneal(start: f64, end: f64, pct: f64) -> f64 {
    end + (start - end) / 2.0 * ((std::f64::consts::PI * pct).cos() + 1.0)
}
