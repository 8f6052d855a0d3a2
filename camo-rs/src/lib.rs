//! # camo-rs
//!
//! Training and evaluation orchestration for neural operator-learning models.
//!
//! A network maps a sampled input field plus its coordinates to an output
//! field at query coordinates. This crate wraps such a network in a
//! [`CamoModule`] that runs batches through it, accumulates loss and relative
//! error per phase, tracks the best validation values and builds the
//! optimizer and learning-rate schedule once the run length is known.
//!
//! ## Features
//!
//! - **Phase-separated metrics** - train, validation and test never share state
//! - **Sanity-pass isolation** - validation state is cleared when training starts
//! - **Deferred schedules** - optimizer/scheduler built from the estimated step count
//! - **Ahead-of-time specialization** - networks are compiled on entering `fit`
//! - **YAML configuration** - whole runs described by one config file
//!
//! ## Quick Start (CLI)
//!
//! ```bash
//! # Write a starter config
//! camo init config.yaml --preset heat-1d
//!
//! # Validate it
//! camo validate config.yaml
//!
//! # Train, test and write metrics.json
//! camo train config.yaml
//! ```
//!
//! ## Quick Start (Library)
//!
//! ```no_run
//! use camo_rs::data::{make_batches, HeatDataset};
//! use camo_rs::logging::MetricHistory;
//! use camo_rs::model::BranchTrunkNet;
//! use camo_rs::{CamoConfig, CamoModule, FitLoop};
//! use candle_core::{DType, Device};
//! use candle_nn::{VarBuilder, VarMap};
//!
//! # fn main() -> camo_rs::Result<()> {
//! let config = CamoConfig::from_preset("heat-1d")?;
//! let device = Device::Cpu;
//!
//! let dataset = HeatDataset::generate(&config.data, config.seed)?;
//! let train = make_batches(&dataset.train, config.trainer.batch_size, &device)?;
//! let val = make_batches(&dataset.validation, config.trainer.batch_size, &device)?;
//!
//! let varmap = VarMap::new();
//! let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
//! let net = BranchTrunkNet::new(&config.model, vb)?;
//! let mut module = CamoModule::new(Box::new(net), varmap, config.module.clone())?;
//!
//! let mut history = MetricHistory::new();
//! let summary = FitLoop::new(config.trainer.clone())?.fit(&mut module, &train, &val, &mut history)?;
//! println!("best val/loss = {}", summary.best_val_loss);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::pedantic)]

pub mod batch;
pub mod config;
pub mod data;
pub mod diagnostics;
pub mod driver;
pub mod error;
pub mod logging;
pub mod loss;
pub mod metrics;
pub mod model;
pub mod module;
pub mod optimization;
pub mod optimizer;
pub mod scheduler;

pub use batch::Batch;
pub use config::CamoConfig;
pub use driver::{FitLoop, FitSummary, TrainerConfig};
pub use error::{CamoError, Result};
pub use module::{CamoModule, ModuleConfig, Phase, Stage};
