//! Synthetic operator-learning data.
//!
//! Samples come from the periodic 1-D heat equation on `[0, 2π)`:
//!
//! ```text
//! u(x, t) = Σ_{k=1..K} a_k · exp(-k² ν t) · sin(k x)
//! ```
//!
//! The input field is `u(x, 0)` on a uniform grid and the target is
//! `u(x, T)` at randomly drawn query points. Coordinates are stored
//! normalized to `[0, 1)`.

use std::f64::consts::TAU;

use candle_core::{Device, Tensor};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::batch::Batch;
use crate::error::{CamoError, Result};

/// Synthetic dataset configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataConfig {
    /// Training samples.
    #[serde(default = "default_train_samples")]
    pub train_samples: usize,
    /// Validation samples.
    #[serde(default = "default_eval_samples")]
    pub val_samples: usize,
    /// Test samples.
    #[serde(default = "default_eval_samples")]
    pub test_samples: usize,
    /// Points in the uniform input grid (`N`).
    #[serde(default = "default_grid_points")]
    pub grid_points: usize,
    /// Query points per sample (`M`).
    #[serde(default = "default_query_points")]
    pub query_points: usize,
    /// Fourier modes in the initial condition (`K`).
    #[serde(default = "default_modes")]
    pub modes: usize,
    /// Diffusivity `ν`.
    #[serde(default = "default_viscosity")]
    pub viscosity: f64,
    /// Time horizon `T`.
    #[serde(default = "default_final_time")]
    pub final_time: f64,
}

fn default_train_samples() -> usize {
    256
}
fn default_eval_samples() -> usize {
    64
}
fn default_grid_points() -> usize {
    32
}
fn default_query_points() -> usize {
    16
}
fn default_modes() -> usize {
    4
}
fn default_viscosity() -> f64 {
    0.1
}
fn default_final_time() -> f64 {
    1.0
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            train_samples: default_train_samples(),
            val_samples: default_eval_samples(),
            test_samples: default_eval_samples(),
            grid_points: default_grid_points(),
            query_points: default_query_points(),
            modes: default_modes(),
            viscosity: default_viscosity(),
            final_time: default_final_time(),
        }
    }
}

impl DataConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CamoError::Config`] for empty splits or non-physical
    /// parameters.
    pub fn validate(&self) -> Result<()> {
        if self.train_samples == 0 {
            return Err(CamoError::Config("data.train_samples must be >= 1".into()));
        }
        if self.grid_points == 0 || self.query_points == 0 || self.modes == 0 {
            return Err(CamoError::Config(
                "data.grid_points, data.query_points and data.modes must be >= 1".into(),
            ));
        }
        if self.viscosity <= 0.0 || self.final_time < 0.0 {
            return Err(CamoError::Config(
                "data.viscosity must be > 0 and data.final_time >= 0".into(),
            ));
        }
        Ok(())
    }
}

/// One solution pair, stored as flat rows.
#[derive(Debug, Clone, PartialEq)]
pub struct HeatSample {
    /// `u(x, 0)` on the input grid.
    pub input: Vec<f32>,
    /// Normalized input grid coordinates.
    pub input_positions: Vec<f32>,
    /// `u(x, T)` at the query points.
    pub target: Vec<f32>,
    /// Normalized query coordinates.
    pub query_positions: Vec<f32>,
}

/// Train/validation/test splits of heat-equation samples.
#[derive(Debug, Clone)]
pub struct HeatDataset {
    /// Training split.
    pub train: Vec<HeatSample>,
    /// Validation split.
    pub validation: Vec<HeatSample>,
    /// Test split.
    pub test: Vec<HeatSample>,
    config: DataConfig,
}

impl HeatDataset {
    /// Draw every split from one seeded stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn generate(config: &DataConfig, seed: u64) -> Result<Self> {
        config.validate()?;
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut split = |n: usize| (0..n).map(|_| sample(config, &mut rng)).collect::<Vec<_>>();
        let train = split(config.train_samples);
        let validation = split(config.val_samples);
        let test = split(config.test_samples);
        tracing::info!(
            "Generated heat dataset: {} train / {} val / {} test samples",
            train.len(),
            validation.len(),
            test.len()
        );
        Ok(Self {
            train,
            validation,
            test,
            config: config.clone(),
        })
    }

    /// Configuration the dataset was drawn from.
    pub fn config(&self) -> &DataConfig {
        &self.config
    }
}

fn sample(config: &DataConfig, rng: &mut ChaCha8Rng) -> HeatSample {
    let amplitudes: Vec<f64> = (1..=config.modes)
        .map(|k| rng.gen_range(-1.0..1.0) / k as f64)
        .collect();
    let solution = |s: f64, t: f64| -> f32 {
        let x = TAU * s;
        amplitudes
            .iter()
            .enumerate()
            .map(|(i, a)| {
                let k = (i + 1) as f64;
                a * (-k * k * config.viscosity * t).exp() * (k * x).sin()
            })
            .sum::<f64>() as f32
    };

    let grid: Vec<f64> = (0..config.grid_points)
        .map(|i| i as f64 / config.grid_points as f64)
        .collect();
    let mut queries: Vec<f64> = (0..config.query_points)
        .map(|_| rng.gen_range(0.0..1.0))
        .collect();
    queries.sort_by(f64::total_cmp);

    HeatSample {
        input: grid.iter().map(|&s| solution(s, 0.0)).collect(),
        input_positions: grid.iter().map(|&s| s as f32).collect(),
        target: queries
            .iter()
            .map(|&s| solution(s, config.final_time))
            .collect(),
        query_positions: queries.iter().map(|&s| s as f32).collect(),
    }
}

/// Stack samples into batches of at most `batch_size` on `device`.
///
/// The last batch may be smaller.
///
/// # Errors
///
/// Returns [`CamoError::Dataset`] if `batch_size` is zero or the samples are
/// ragged, and propagates tensor errors.
pub fn make_batches(samples: &[HeatSample], batch_size: usize, device: &Device) -> Result<Vec<Batch>> {
    if batch_size == 0 {
        return Err(CamoError::Dataset("batch_size must be >= 1".into()));
    }
    samples
        .chunks(batch_size)
        .map(|chunk| stack(chunk, device))
        .collect()
}

fn stack(chunk: &[HeatSample], device: &Device) -> Result<Batch> {
    let b = chunk.len();
    let n = chunk[0].input.len();
    let m = chunk[0].target.len();
    let ragged = chunk.iter().any(|s| {
        s.input.len() != n
            || s.input_positions.len() != n
            || s.target.len() != m
            || s.query_positions.len() != m
    });
    if ragged {
        return Err(CamoError::Dataset("samples in a batch differ in size".into()));
    }

    let column = |rows: Vec<f32>, points: usize| -> Result<Tensor> {
        Ok(Tensor::from_vec(rows, (b, points, 1), device)?)
    };
    let gather = |f: fn(&HeatSample) -> &Vec<f32>| -> Vec<f32> {
        chunk.iter().flat_map(|s| f(s).iter().copied()).collect()
    };

    Ok(Batch::new(
        column(gather(|s| &s.input), n)?,
        column(gather(|s| &s.target), m)?,
        column(gather(|s| &s.input_positions), n)?,
        column(gather(|s| &s.query_positions), m)?,
    ))
}
