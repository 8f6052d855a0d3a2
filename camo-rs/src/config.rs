//! Configuration parsing and validation.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::data::DataConfig;
use crate::driver::TrainerConfig;
use crate::error::{CamoError, Result};
use crate::model::BranchTrunkConfig;
use crate::module::ModuleConfig;
use crate::optimizer::{OptimizerConfig, OptimizerKind};
use crate::scheduler::SchedulerConfig;

/// Main configuration for a CAMO run.
///
/// # Example
///
/// ```rust
/// use camo_rs::CamoConfig;
///
/// # fn main() -> camo_rs::Result<()> {
/// let config = CamoConfig::from_preset("heat-1d")?;
/// config.validate()?;
/// assert!(config.module.scheduler.is_some());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CamoConfig {
    /// Reference network dimensions.
    #[serde(default)]
    pub model: BranchTrunkConfig,

    /// Orchestrator hyperparameters.
    #[serde(default)]
    pub module: ModuleConfig,

    /// Loop settings.
    #[serde(default)]
    pub trainer: TrainerConfig,

    /// Synthetic dataset.
    #[serde(default)]
    pub data: DataConfig,

    /// Output directory.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Seed for synthetic data generation.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_output_dir() -> String {
    "./outputs".into()
}

fn default_seed() -> u64 {
    42
}

impl Default for CamoConfig {
    fn default() -> Self {
        Self {
            model: BranchTrunkConfig::default(),
            module: ModuleConfig::default(),
            trainer: TrainerConfig::default(),
            data: DataConfig::default(),
            output_dir: default_output_dir(),
            seed: default_seed(),
        }
    }
}

impl CamoConfig {
    /// Load configuration from a YAML file.
    ///
    /// Missing sections fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid YAML.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Create a configuration from a preset.
    ///
    /// Available presets:
    /// - `"heat-1d"` - AdamW with warmup + cosine decay
    /// - `"heat-1d-onecycle"` - AdamW with a one-cycle schedule and a compiled network
    ///
    /// # Errors
    ///
    /// Returns [`CamoError::Config`] for an unknown preset name.
    pub fn from_preset(preset: &str) -> Result<Self> {
        match preset {
            "heat-1d" => Ok(Self::heat_1d_preset()),
            "heat-1d-onecycle" => Ok(Self::heat_1d_onecycle_preset()),
            _ => Err(CamoError::Config(format!("Unknown preset: {preset}"))),
        }
    }

    /// Heat equation, cosine schedule.
    #[must_use]
    pub fn heat_1d_preset() -> Self {
        Self {
            model: BranchTrunkConfig {
                hidden: 32,
                ..Default::default()
            },
            module: ModuleConfig {
                optimizer: OptimizerConfig {
                    kind: OptimizerKind::AdamW,
                    learning_rate: 1e-3,
                    ..Default::default()
                },
                scheduler: Some(SchedulerConfig::Cosine {
                    warmup_fraction: 0.05,
                    min_lr: 1e-5,
                }),
                compile: false,
            },
            ..Default::default()
        }
    }

    /// Heat equation, one-cycle schedule, compiled network.
    #[must_use]
    pub fn heat_1d_onecycle_preset() -> Self {
        let mut config = Self::heat_1d_preset();
        config.module.scheduler = Some(SchedulerConfig::OneCycle {
            max_lr: 1e-2,
            pct_start: 0.3,
            div_factor: 25.0,
            final_div_factor: 1e4,
        });
        config.module.compile = true;
        config
    }

    /// Validate every section.
    ///
    /// The synthetic data is a scalar field on a 1-D domain, so the network
    /// must take and produce one feature per point with one coordinate.
    ///
    /// # Errors
    ///
    /// Returns [`CamoError::Config`] describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        self.model.validate()?;
        self.module.optimizer.validate()?;
        if let Some(scheduler) = &self.module.scheduler {
            scheduler.validate()?;
        }
        self.trainer.validate()?;
        self.data.validate()?;

        if self.model.in_features != 1 || self.model.coord_dim != 1 || self.model.out_features != 1
        {
            return Err(CamoError::Config(
                "model.in_features, model.coord_dim and model.out_features must be 1 for the heat dataset"
                    .into(),
            ));
        }
        if self.output_dir.is_empty() {
            return Err(CamoError::Config("output_dir is required".into()));
        }
        Ok(())
    }
}
