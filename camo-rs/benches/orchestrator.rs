use camo_rs::data::{make_batches, DataConfig, HeatDataset};
use camo_rs::model::{BranchTrunkConfig, BranchTrunkNet, OperatorNet};
use camo_rs::module::{CamoModule, ModuleConfig, Phase};
use camo_rs::CamoConfig;
use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

const SMALL_YAML: &str = r#"
model:
  hidden: 32
module:
  optimizer:
    kind: adamw
    learning_rate: 1.0e-3
  scheduler:
    kind: one_cycle
    max_lr: 1.0e-2
  compile: true
trainer:
  max_epochs: 5
  batch_size: 8
data:
  train_samples: 64
output_dir: ./outputs/heat
seed: 42
"#;

fn bench_config_from_yaml(c: &mut Criterion) {
    c.bench_function("config_from_yaml", |b| {
        b.iter(|| {
            let config: CamoConfig = black_box(serde_yaml::from_str(SMALL_YAML).unwrap());
            black_box(config);
        });
    });
}

fn bench_config_validate(c: &mut Criterion) {
    c.bench_function("config_validate", |b| {
        let config = CamoConfig::heat_1d_preset();
        b.iter(|| {
            black_box(config.validate()).unwrap();
        });
    });
}

fn net(hidden: usize) -> (VarMap, BranchTrunkNet) {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let config = BranchTrunkConfig {
        hidden,
        ..Default::default()
    };
    let net = BranchTrunkNet::new(&config, vb).unwrap();
    (varmap, net)
}

fn batches() -> Vec<camo_rs::Batch> {
    let data = DataConfig {
        train_samples: 32,
        ..Default::default()
    };
    let dataset = HeatDataset::generate(&data, 0).unwrap();
    make_batches(&dataset.train, 32, &Device::Cpu).unwrap()
}

fn bench_forward_eager_vs_compiled(c: &mut Criterion) {
    let mut group = c.benchmark_group("forward");
    let batch = batches().remove(0);

    for hidden in [32, 128] {
        let (varmap, eager) = net(hidden);
        let module = CamoModule::new(Box::new(eager), varmap, ModuleConfig::default()).unwrap();
        group.bench_with_input(BenchmarkId::new("eager", hidden), &hidden, |b, _| {
            b.iter(|| black_box(module.model_step(&batch).unwrap()));
        });

        let (varmap, eager) = net(hidden);
        let compiled = Box::new(eager).compile().unwrap();
        let module = CamoModule::new(compiled, varmap, ModuleConfig::default()).unwrap();
        group.bench_with_input(BenchmarkId::new("compiled", hidden), &hidden, |b, _| {
            b.iter(|| black_box(module.model_step(&batch).unwrap()));
        });
    }

    group.finish();
}

fn bench_validation_epoch(c: &mut Criterion) {
    let batches = batches();
    let (varmap, eager) = net(32);
    let mut module = CamoModule::new(Box::new(eager), varmap, ModuleConfig::default()).unwrap();
    c.bench_function("validation_epoch", |b| {
        b.iter(|| {
            module.on_epoch_start(Phase::Validate);
            for batch in &batches {
                module.validation_step(batch).unwrap();
            }
            module.on_epoch_end(Phase::Validate).unwrap();
            black_box(module.take_logged());
        });
    });
}

criterion_group!(
    benches,
    bench_config_from_yaml,
    bench_config_validate,
    bench_forward_eager_vs_compiled,
    bench_validation_epoch
);
criterion_main!(benches);
