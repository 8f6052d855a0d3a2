//! CLI entry point for camo-rs.

use std::path::Path;

use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use camo_rs::data::{make_batches, HeatDataset};
use camo_rs::logging::{MetricHistory, Tee, TracingLogger};
use camo_rs::model::BranchTrunkNet;
use camo_rs::{CamoConfig, CamoModule, FitLoop, Result};

#[derive(Parser)]
#[command(name = "camo")]
#[command(about = "Train and evaluate neural operator-learning models")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file
    Validate {
        /// Path to configuration file
        config: String,
    },
    /// Fit on the training split, then evaluate on the test split
    Train {
        /// Path to configuration file
        config: String,
    },
    /// Generate a sample configuration file
    Init {
        /// Output path for config file
        #[arg(default_value = "config.yaml")]
        output: String,
        /// Preset (heat-1d, heat-1d-onecycle)
        #[arg(long, default_value = "heat-1d")]
        preset: String,
    },
}

fn select_device() -> Device {
    let force_cpu = std::env::var("CAMO_FORCE_CPU")
        .ok()
        .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));
    if force_cpu || !cfg!(feature = "cuda") {
        tracing::info!("Training device: CPU");
        return Device::Cpu;
    }
    match Device::cuda_if_available(0) {
        Ok(device @ Device::Cuda(_)) => {
            tracing::info!("Training device: CUDA (device 0)");
            device
        }
        Ok(_) => {
            tracing::warn!("CUDA not available; falling back to CPU");
            Device::Cpu
        }
        Err(err) => {
            tracing::warn!("CUDA init failed ({err}); falling back to CPU");
            Device::Cpu
        }
    }
}

fn train(config: &CamoConfig) -> Result<()> {
    let device = select_device();

    let dataset = HeatDataset::generate(&config.data, config.seed)?;
    let batch_size = config.trainer.batch_size;
    let train = make_batches(&dataset.train, batch_size, &device)?;
    let val = make_batches(&dataset.validation, batch_size, &device)?;
    let test = make_batches(&dataset.test, batch_size, &device)?;

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let net = BranchTrunkNet::new(&config.model, vb)?;
    let param_count: usize = varmap.all_vars().iter().map(|v| v.elem_count()).sum();
    tracing::info!("Built branch/trunk network with {} parameters", param_count);

    let mut module = CamoModule::new(Box::new(net), varmap, config.module.clone())?;
    let fit_loop = FitLoop::new(config.trainer.clone())?;
    let mut logger = Tee(TracingLogger, MetricHistory::new());

    let summary = fit_loop.fit(&mut module, &train, &val, &mut logger)?;
    let test_metrics = fit_loop.test(&mut module, &test, &mut logger)?;

    std::fs::create_dir_all(&config.output_dir)?;
    let metrics_path = Path::new(&config.output_dir).join("metrics.json");
    logger.1.save_json(&metrics_path)?;

    println!("✓ Training complete");
    println!("  Epochs: {}", summary.epochs);
    println!("  Steps: {}", summary.global_step);
    println!("  Best val/loss: {:.6}", summary.best_val_loss);
    println!(
        "  Best val/relative_error: {:.6}",
        summary.best_val_relative_error
    );
    println!("  test/loss: {:.6}", test_metrics.loss);
    println!("  test/relative_error: {:.6}", test_metrics.relative_error);
    println!("  Metrics written to: {}", metrics_path.display());
    Ok(())
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { config } => {
            tracing::info!("Validating configuration: {}", config);
            let config = CamoConfig::from_file(&config)?;
            config.validate()?;
            println!("✓ Configuration is valid");
            println!("  Optimizer: {:?}", config.module.optimizer.kind);
            match &config.module.scheduler {
                Some(scheduler) => println!("  Scheduler: {scheduler:?}"),
                None => println!("  Scheduler: none"),
            }
            println!("  Compile: {}", config.module.compile);
            println!("  Epochs: {}", config.trainer.max_epochs);
        }
        Commands::Train { config } => {
            tracing::info!("Starting training with config: {}", config);
            let config = CamoConfig::from_file(&config)?;
            config.validate()?;
            train(&config)?;
        }
        Commands::Init { output, preset } => {
            tracing::info!("Generating config for preset: {}", preset);
            let config = CamoConfig::from_preset(&preset)?;
            config.to_file(&output)?;
            println!("✓ Configuration written to: {output}");
        }
    }

    Ok(())
}
