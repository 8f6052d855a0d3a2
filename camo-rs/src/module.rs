//! The training orchestrator.
//!
//! [`CamoModule`] owns an operator network, a loss and one set of metric
//! accumulators per phase. A driver moves it through an explicit lifecycle:
//!
//! ```text
//! on_stage_enter(Fit) -> configure_optimizers(total_steps)
//!   [sanity: on_epoch_start(Validate) -> validation_step* -> on_epoch_end(Validate)]
//!   on_train_start()
//!   repeat per epoch:
//!     on_epoch_start(Train) -> training_step* -> on_epoch_end(Train)
//!     on_epoch_start(Validate) -> validation_step* -> on_epoch_end(Validate)
//! on_stage_enter(Test) -> on_epoch_start(Test) -> test_step* -> on_epoch_end(Test)
//! ```
//!
//! Each phase's accumulators are only touched by that phase's steps and hooks.
//! Aggregates leave the module as [`LoggedScalar`] records which the driver
//! drains with [`CamoModule::take_logged`].

use candle_core::{Tensor, Var};
use candle_nn::VarMap;
use serde::{Deserialize, Serialize};

use crate::batch::{augment_input, Batch};
use crate::error::{CamoError, Result};
use crate::logging::{names, LogInterval, LoggedScalar};
use crate::loss::{Criterion, OperatorL2Loss};
use crate::metrics::{BestTrackers, Metric, PhaseMetrics, PhaseSnapshot};
use crate::model::OperatorNet;
use crate::optimization::{OptimizationBundle, OptimizationPlan};
use crate::optimizer::OptimizerConfig;
use crate::scheduler::SchedulerConfig;

/// Top-level run mode chosen by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Training with periodic validation.
    Fit,
    /// Standalone validation.
    Validate,
    /// Evaluation on held-out data.
    Test,
    /// Inference only.
    Predict,
}

/// Accumulation phase. Each phase has its own accumulators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Optimizer-driven batches.
    Train,
    /// Validation batches, including the sanity pass.
    Validate,
    /// Held-out evaluation.
    Test,
}

impl Phase {
    /// Metric name prefix (`train`, `val`, `test`).
    pub fn prefix(self) -> &'static str {
        match self {
            Phase::Train => "train",
            Phase::Validate => "val",
            Phase::Test => "test",
        }
    }

    fn index(self) -> usize {
        match self {
            Phase::Train => 0,
            Phase::Validate => 1,
            Phase::Test => 2,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Hyperparameters of the orchestrator. Fixed once the module is built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// Optimizer factory settings.
    #[serde(default)]
    pub optimizer: OptimizerConfig,

    /// Optional learning-rate schedule.
    #[serde(default)]
    pub scheduler: Option<SchedulerConfig>,

    /// Specialize the network ahead of time when entering `fit`.
    #[serde(default)]
    pub compile: bool,
}

/// Result of running one batch through the network and the loss.
#[derive(Debug, Clone)]
pub struct StepOutput {
    /// Scalar loss, still attached to the autograd graph.
    pub loss: Tensor,
    /// Network prediction, `[B, M, O]`.
    pub prediction: Tensor,
    /// Target field from the batch.
    pub target: Tensor,
}

/// Operator-learning training orchestrator.
pub struct CamoModule {
    config: ModuleConfig,
    net: Option<Box<dyn OperatorNet>>,
    varmap: VarMap,
    criterion: Box<dyn Criterion>,
    plan: OptimizationPlan,
    phases: [PhaseMetrics; 3],
    open: [bool; 3],
    best: BestTrackers,
    last_val_loss: Option<f64>,
    stage: Option<Stage>,
    compiled: bool,
    current_epoch: usize,
    global_step: usize,
    logged: Vec<LoggedScalar>,
}

impl std::fmt::Debug for CamoModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CamoModule")
            .field("config", &self.config)
            .field("stage", &self.stage)
            .field("compiled", &self.compiled)
            .field("current_epoch", &self.current_epoch)
            .field("global_step", &self.global_step)
            .finish_non_exhaustive()
    }
}

impl CamoModule {
    /// Build a module around `net`, whose trainable parameters live in `varmap`.
    ///
    /// The optimizer and scheduler settings are validated here; the objects
    /// themselves are only built by [`CamoModule::configure_optimizers`].
    ///
    /// # Errors
    ///
    /// Returns [`CamoError::Config`] if the optimizer or scheduler settings
    /// are invalid.
    pub fn new(net: Box<dyn OperatorNet>, varmap: VarMap, config: ModuleConfig) -> Result<Self> {
        let plan = OptimizationPlan::prepare(config.optimizer.clone(), config.scheduler.clone())?;
        Ok(Self {
            config,
            net: Some(net),
            varmap,
            criterion: Box::new(OperatorL2Loss),
            plan,
            phases: Default::default(),
            open: [false; 3],
            best: BestTrackers::default(),
            last_val_loss: None,
            stage: None,
            compiled: false,
            current_epoch: 0,
            global_step: 0,
            logged: Vec::new(),
        })
    }

    /// Replace the default [`OperatorL2Loss`].
    pub fn with_criterion(mut self, criterion: impl Criterion + 'static) -> Self {
        self.criterion = Box::new(criterion);
        self
    }

    /// The immutable configuration.
    pub fn config(&self) -> &ModuleConfig {
        &self.config
    }

    /// Parameter store backing the network.
    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    /// Every trainable variable of the network.
    pub fn trainable_vars(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }

    /// Last stage entered, if any.
    pub fn stage(&self) -> Option<Stage> {
        self.stage
    }

    /// Whether the network has been specialized for `fit`.
    pub fn is_compiled(&self) -> bool {
        self.net.as_ref().is_some_and(|net| net.is_compiled())
    }

    /// Completed training epochs.
    pub fn current_epoch(&self) -> usize {
        self.current_epoch
    }

    /// Training steps taken.
    pub fn global_step(&self) -> usize {
        self.global_step
    }

    fn net(&self) -> Result<&dyn OperatorNet> {
        self.net
            .as_deref()
            .ok_or_else(|| CamoError::Lifecycle("network was lost by a failed compile".into()))
    }

    /// Predict the output field for `input_field` sampled at `input_positions`.
    ///
    /// The input is concatenated with its positions along the last axis and
    /// handed to the network together with both position tensors.
    ///
    /// # Errors
    ///
    /// Returns [`CamoError::MissingInputPositions`] if `input_positions` is
    /// `None`; tensor errors from the network pass through unchanged.
    pub fn forward(
        &self,
        input_field: &Tensor,
        input_positions: Option<&Tensor>,
        query_positions: Option<&Tensor>,
    ) -> Result<Tensor> {
        let augmented = augment_input(input_field, input_positions)?;
        self.net()?
            .forward(&augmented, input_positions, query_positions)
    }

    /// Run one batch through the network and the loss. Touches no state.
    ///
    /// # Errors
    ///
    /// Propagates every error from [`CamoModule::forward`] and the loss.
    pub fn model_step(&self, batch: &Batch) -> Result<StepOutput> {
        let prediction = self.forward(
            &batch.input_field,
            batch.input_positions.as_ref(),
            batch.query_positions.as_ref(),
        )?;
        let loss = self.criterion.loss(&prediction, &batch.target_field)?;
        Ok(StepOutput {
            loss,
            prediction,
            target: batch.target_field.clone(),
        })
    }

    /// Run a training batch and feed its loss and relative error into the
    /// train accumulators.
    ///
    /// Returns the loss for the backward pass.
    ///
    /// # Errors
    ///
    /// Returns [`CamoError::Lifecycle`] if the train epoch is not open, and
    /// propagates errors from [`CamoModule::model_step`].
    pub fn training_step(&mut self, batch: &Batch) -> Result<Tensor> {
        let output = self.phase_step(Phase::Train, batch)?;
        self.global_step += 1;
        Ok(output.loss)
    }

    /// Run a validation batch and update the validation accumulators.
    ///
    /// # Errors
    ///
    /// Same as [`CamoModule::training_step`], for the validation epoch.
    pub fn validation_step(&mut self, batch: &Batch) -> Result<()> {
        self.phase_step(Phase::Validate, batch).map(|_| ())
    }

    /// Run a test batch and update the test accumulators.
    ///
    /// # Errors
    ///
    /// Same as [`CamoModule::training_step`], for the test epoch.
    pub fn test_step(&mut self, batch: &Batch) -> Result<()> {
        self.phase_step(Phase::Test, batch).map(|_| ())
    }

    fn phase_step(&mut self, phase: Phase, batch: &Batch) -> Result<StepOutput> {
        self.require_open(phase)?;
        let output = self.model_step(batch)?;
        self.phases[phase.index()].update(&output.loss, &output.prediction, &output.target)?;
        tracing::debug!(
            phase = %phase,
            step = self.global_step,
            "batch of {} accumulated",
            output.target.dim(0)?
        );
        Ok(output)
    }

    fn require_open(&self, phase: Phase) -> Result<()> {
        if self.open[phase.index()] {
            Ok(())
        } else {
            Err(CamoError::Lifecycle(format!(
                "{phase} step called outside a {phase} epoch"
            )))
        }
    }

    /// Enter a run stage. Compiles the network the first time `Fit` is
    /// entered when `compile` is configured.
    ///
    /// # Errors
    ///
    /// Returns an error if compilation fails. The network is unusable
    /// afterwards.
    pub fn on_stage_enter(&mut self, stage: Stage) -> Result<()> {
        self.stage = Some(stage);
        if self.config.compile && stage == Stage::Fit && !self.compiled {
            let net = self
                .net
                .take()
                .ok_or_else(|| CamoError::Lifecycle("no network to compile".into()))?;
            self.net = Some(net.compile()?);
            self.compiled = true;
            tracing::info!("Compiled operator network for fit");
        }
        tracing::debug!(?stage, "entered stage");
        Ok(())
    }

    /// Called once after the sanity pass and before the first train epoch.
    ///
    /// Clears the validation accumulators and best trackers so sanity batches
    /// never reach the tracked metrics.
    pub fn on_train_start(&mut self) {
        self.phases[Phase::Validate.index()].reset();
        self.best.reset();
        self.last_val_loss = None;
        tracing::info!("Training started; validation state cleared");
    }

    /// Open an epoch for `phase` and clear its accumulators.
    pub fn on_epoch_start(&mut self, phase: Phase) {
        self.phases[phase.index()].reset();
        self.open[phase.index()] = true;
    }

    /// Close the `phase` epoch and log its aggregates.
    ///
    /// For validation the epoch aggregates also feed the best trackers, and
    /// the best values are logged with `sync_dist` set.
    ///
    /// # Errors
    ///
    /// Returns [`CamoError::Lifecycle`] if the epoch was never opened.
    pub fn on_epoch_end(&mut self, phase: Phase) -> Result<()> {
        self.require_open(phase)?;
        self.open[phase.index()] = false;

        let snapshot = self.phases[phase.index()].snapshot();
        let (loss_name, rel_name) = match phase {
            Phase::Train => (names::TRAIN_LOSS, names::TRAIN_RELATIVE_ERROR),
            Phase::Validate => (names::VAL_LOSS, names::VAL_RELATIVE_ERROR),
            Phase::Test => (names::TEST_LOSS, names::TEST_RELATIVE_ERROR),
        };
        self.emit(loss_name, snapshot.loss, false);
        self.emit(rel_name, snapshot.relative_error, false);

        match phase {
            Phase::Train => self.current_epoch += 1,
            Phase::Validate => {
                self.best.loss.update(snapshot.loss);
                self.best.relative_error.update(snapshot.relative_error);
                self.last_val_loss = Some(snapshot.loss);
                let (best_loss, best_rel) = (
                    self.best.loss.compute(),
                    self.best.relative_error.compute(),
                );
                self.emit(names::VAL_LOSS_BEST, best_loss, true);
                self.emit(names::VAL_RELATIVE_ERROR_BEST, best_rel, true);
            }
            Phase::Test => {}
        }

        tracing::info!(
            phase = %phase,
            epoch = self.current_epoch,
            "loss={:.6} relative_error={:.6} over {} samples",
            snapshot.loss,
            snapshot.relative_error,
            snapshot.samples
        );
        Ok(())
    }

    fn emit(&mut self, name: &str, value: f64, sync_dist: bool) {
        self.logged.push(LoggedScalar {
            name: name.to_string(),
            value,
            interval: LogInterval::Epoch,
            prog_bar: true,
            sync_dist,
            epoch: self.current_epoch,
            global_step: self.global_step,
        });
    }

    /// Drain the scalars logged since the last call.
    pub fn take_logged(&mut self) -> Vec<LoggedScalar> {
        std::mem::take(&mut self.logged)
    }

    /// Current aggregates of `phase` without clearing them.
    pub fn running_metrics(&self, phase: Phase) -> PhaseSnapshot {
        self.phases[phase.index()].snapshot()
    }

    /// Lowest epoch validation loss since training started (`+inf` if none).
    pub fn best_val_loss(&self) -> f64 {
        self.best.loss.compute()
    }

    /// Lowest epoch validation relative error since training started.
    pub fn best_val_relative_error(&self) -> f64 {
        self.best.relative_error.compute()
    }

    /// Most recent epoch validation loss, used as the schedule's monitor.
    pub fn last_val_loss(&self) -> Option<f64> {
        self.last_val_loss
    }

    /// Build the optimizer and schedule for a run of `total_steps` optimizer
    /// steps.
    ///
    /// # Errors
    ///
    /// Returns an error if the optimizer cannot be created, or a scheduler is
    /// configured and `total_steps` is zero.
    pub fn configure_optimizers(&self, total_steps: usize) -> Result<OptimizationBundle> {
        self.plan.finalize(total_steps, self.trainable_vars())
    }
}
