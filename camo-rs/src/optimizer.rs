//! Optimizer implementations (AdamW, SGD).

use candle_core::backprop::GradStore;
use candle_core::{Tensor, Var};
use candle_nn::{Optimizer as _, ParamsAdamW};
use serde::{Deserialize, Serialize};

use crate::error::{CamoError, Result};

/// Optimizer family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    /// Adam with decoupled weight decay.
    #[default]
    AdamW,
    /// Plain stochastic gradient descent.
    Sgd,
}

/// Optimizer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Optimizer family
    #[serde(default)]
    pub kind: OptimizerKind,
    /// Learning rate
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    /// Beta1 for Adam
    #[serde(default = "default_beta1")]
    pub beta1: f64,
    /// Beta2 for Adam
    #[serde(default = "default_beta2")]
    pub beta2: f64,
    /// Weight decay (AdamW only)
    #[serde(default = "default_weight_decay")]
    pub weight_decay: f64,
    /// Epsilon for numerical stability
    #[serde(default = "default_eps")]
    pub eps: f64,
}

fn default_learning_rate() -> f64 {
    1e-3
}
fn default_beta1() -> f64 {
    0.9
}
fn default_beta2() -> f64 {
    0.999
}
fn default_weight_decay() -> f64 {
    1e-4
}
fn default_eps() -> f64 {
    1e-8
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            kind: OptimizerKind::AdamW,
            learning_rate: default_learning_rate(),
            beta1: default_beta1(),
            beta2: default_beta2(),
            weight_decay: default_weight_decay(),
            eps: default_eps(),
        }
    }
}

impl OptimizerConfig {
    /// Check hyperparameters are in range.
    ///
    /// # Errors
    ///
    /// Returns [`CamoError::Config`] for out-of-range values.
    pub fn validate(&self) -> Result<()> {
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(CamoError::Config("optimizer.learning_rate must be > 0".into()));
        }
        if !(0.0..1.0).contains(&self.beta1) || !(0.0..1.0).contains(&self.beta2) {
            return Err(CamoError::Config("optimizer betas must be in [0, 1)".into()));
        }
        if self.weight_decay < 0.0 {
            return Err(CamoError::Config("optimizer.weight_decay must be >= 0".into()));
        }
        if self.kind == OptimizerKind::Sgd && self.weight_decay > 0.0 {
            tracing::warn!("optimizer.weight_decay is ignored by SGD");
        }
        Ok(())
    }

    /// Create the optimizer bound to `vars`.
    ///
    /// # Errors
    ///
    /// Returns an error if the optimizer cannot be created.
    pub fn build(&self, vars: Vec<Var>) -> Result<ModelOptimizer> {
        let inner = match self.kind {
            OptimizerKind::AdamW => {
                let params = ParamsAdamW {
                    lr: self.learning_rate,
                    beta1: self.beta1,
                    beta2: self.beta2,
                    eps: self.eps,
                    weight_decay: self.weight_decay,
                };
                let opt = candle_nn::AdamW::new(vars, params).map_err(|e| {
                    CamoError::Optimization(format!("Failed to create AdamW: {}", e))
                })?;
                Inner::AdamW(opt)
            }
            OptimizerKind::Sgd => {
                let opt = candle_nn::SGD::new(vars, self.learning_rate).map_err(|e| {
                    CamoError::Optimization(format!("Failed to create SGD: {}", e))
                })?;
                Inner::Sgd(opt)
            }
        };
        Ok(ModelOptimizer { inner })
    }
}

enum Inner {
    AdamW(candle_nn::AdamW),
    Sgd(candle_nn::SGD),
}

/// Optimizer bound to a model's trainable variables.
pub struct ModelOptimizer {
    inner: Inner,
}

impl std::fmt::Debug for ModelOptimizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelOptimizer")
            .field("kind", &self.kind())
            .field("learning_rate", &self.learning_rate())
            .finish()
    }
}

impl ModelOptimizer {
    /// Family of the wrapped optimizer.
    pub fn kind(&self) -> OptimizerKind {
        match self.inner {
            Inner::AdamW(_) => OptimizerKind::AdamW,
            Inner::Sgd(_) => OptimizerKind::Sgd,
        }
    }

    /// Backpropagate `loss` and apply one update.
    ///
    /// # Errors
    ///
    /// Returns an error if the backward pass or the update fails.
    pub fn backward_step(&mut self, loss: &Tensor) -> Result<()> {
        let grads = loss.backward()?;
        self.step(&grads)
    }

    /// Apply one update from precomputed gradients.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        let result = match &mut self.inner {
            Inner::AdamW(opt) => opt.step(grads),
            Inner::Sgd(opt) => opt.step(grads),
        };
        result.map_err(|e| CamoError::Optimization(format!("Optimizer step failed: {}", e)))
    }

    /// Get current learning rate.
    pub fn learning_rate(&self) -> f64 {
        match &self.inner {
            Inner::AdamW(opt) => opt.learning_rate(),
            Inner::Sgd(opt) => opt.learning_rate(),
        }
    }

    /// Set learning rate (used by schedulers).
    pub fn set_learning_rate(&mut self, lr: f64) {
        match &mut self.inner {
            Inner::AdamW(opt) => opt.set_learning_rate(lr),
            Inner::Sgd(opt) => opt.set_learning_rate(lr),
        }
    }
}
