//! Branch/trunk reference network.
//!
//! A compact DeepONet-style operator: the branch MLP encodes every augmented
//! input point and mean-pools them into one code per sample, the trunk MLP
//! encodes every query coordinate, and a linear head maps their elementwise
//! product to the output features.

use candle_core::{Module, Tensor};
use candle_nn::{linear, Linear, VarBuilder};
use serde::{Deserialize, Serialize};

use super::OperatorNet;
use crate::error::{CamoError, Result};

/// Dimensions of the reference network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchTrunkConfig {
    /// Feature width of the raw input field (`F`).
    #[serde(default = "default_one")]
    pub in_features: usize,

    /// Coordinate width (`P`).
    #[serde(default = "default_one")]
    pub coord_dim: usize,

    /// Feature width of the predicted field (`O`).
    #[serde(default = "default_one")]
    pub out_features: usize,

    /// Hidden width shared by branch, trunk and head.
    #[serde(default = "default_hidden")]
    pub hidden: usize,

    /// Number of linear layers in the branch MLP.
    #[serde(default = "default_layers")]
    pub branch_layers: usize,

    /// Number of linear layers in the trunk MLP.
    #[serde(default = "default_layers")]
    pub trunk_layers: usize,
}

fn default_one() -> usize {
    1
}
fn default_hidden() -> usize {
    64
}
fn default_layers() -> usize {
    3
}

impl Default for BranchTrunkConfig {
    fn default() -> Self {
        Self {
            in_features: 1,
            coord_dim: 1,
            out_features: 1,
            hidden: default_hidden(),
            branch_layers: default_layers(),
            trunk_layers: default_layers(),
        }
    }
}

impl BranchTrunkConfig {
    /// Width the branch expects: input features plus coordinates.
    pub fn augmented_width(&self) -> usize {
        self.in_features + self.coord_dim
    }

    /// Check every dimension is usable.
    ///
    /// # Errors
    ///
    /// Returns [`CamoError::Config`] when a dimension is zero.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("model.in_features", self.in_features),
            ("model.coord_dim", self.coord_dim),
            ("model.out_features", self.out_features),
            ("model.hidden", self.hidden),
            ("model.branch_layers", self.branch_layers),
            ("model.trunk_layers", self.trunk_layers),
        ];
        for (name, value) in fields {
            if value == 0 {
                return Err(CamoError::Config(format!("{name} must be >= 1")));
            }
        }
        Ok(())
    }
}

/// Eager branch/trunk network.
#[derive(Debug, Clone)]
pub struct BranchTrunkNet {
    branch: Vec<Linear>,
    trunk: Vec<Linear>,
    head: Linear,
}

impl BranchTrunkNet {
    /// Create the layers under `vb` (typically backed by a `VarMap`).
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid or a layer cannot be created.
    pub fn new(config: &BranchTrunkConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let branch = mlp(
            config.augmented_width(),
            config.hidden,
            config.branch_layers,
            &vb.pp("branch"),
        )?;
        let trunk = mlp(
            config.coord_dim,
            config.hidden,
            config.trunk_layers,
            &vb.pp("trunk"),
        )?;
        let head = linear(config.hidden, config.out_features, vb.pp("head"))?;
        Ok(Self {
            branch,
            trunk,
            head,
        })
    }
}

fn mlp(in_dim: usize, hidden: usize, layers: usize, vb: &VarBuilder) -> Result<Vec<Linear>> {
    (0..layers)
        .map(|i| {
            let input = if i == 0 { in_dim } else { hidden };
            linear(input, hidden, vb.pp(i.to_string())).map_err(CamoError::from)
        })
        .collect()
}

fn run_mlp(layers: &[Linear], x: &Tensor) -> Result<Tensor> {
    let mut x = x.clone();
    for (i, layer) in layers.iter().enumerate() {
        x = layer.forward(&x)?;
        if i + 1 < layers.len() {
            x = x.gelu()?;
        }
    }
    Ok(x)
}

impl OperatorNet for BranchTrunkNet {
    fn forward(
        &self,
        augmented: &Tensor,
        _input_positions: Option<&Tensor>,
        query_positions: Option<&Tensor>,
    ) -> Result<Tensor> {
        let query = query_positions.ok_or(CamoError::MissingQueryPositions)?;
        // [B, N, H] -> [B, 1, H]
        let code = run_mlp(&self.branch, augmented)?.mean_keepdim(1)?;
        let basis = run_mlp(&self.trunk, query)?;
        let mixed = basis.broadcast_mul(&code)?;
        Ok(self.head.forward(&mixed)?)
    }

    fn compile(self: Box<Self>) -> Result<Box<dyn OperatorNet>> {
        Ok(Box::new(CompiledBranchTrunk::from_eager(&self)?))
    }
}

/// A dense layer lowered to a single 2-D GEMM.
#[derive(Debug, Clone)]
struct DenseOp {
    /// `[in, out]` view over the layer's weight storage.
    weight_t: Tensor,
    bias: Option<Tensor>,
}

impl DenseOp {
    fn lower(layer: &Linear) -> Result<Self> {
        Ok(Self {
            weight_t: layer.weight().t()?,
            bias: layer.bias().cloned(),
        })
    }

    /// `x` is `[rows, in]`.
    fn apply(&self, x: &Tensor) -> Result<Tensor> {
        let y = x.matmul(&self.weight_t)?;
        match &self.bias {
            Some(bias) => Ok(y.broadcast_add(bias)?),
            None => Ok(y),
        }
    }
}

/// Branch/trunk network with its execution plan fixed ahead of time.
///
/// Weight transposes are resolved once and every rank-3 layer application is
/// flattened into a single `[rows, in] x [in, out]` product. The plan holds
/// views over the eager network's parameter storage, so optimizer updates are
/// seen immediately and gradients flow to the same variables.
#[derive(Debug, Clone)]
pub struct CompiledBranchTrunk {
    branch: Vec<DenseOp>,
    trunk: Vec<DenseOp>,
    head: DenseOp,
}

impl CompiledBranchTrunk {
    fn from_eager(net: &BranchTrunkNet) -> Result<Self> {
        let lower_all =
            |layers: &[Linear]| layers.iter().map(DenseOp::lower).collect::<Result<Vec<_>>>();
        Ok(Self {
            branch: lower_all(&net.branch)?,
            trunk: lower_all(&net.trunk)?,
            head: DenseOp::lower(&net.head)?,
        })
    }

    /// Run an op chain over a `[B, N, K]` tensor as 2-D products.
    fn run(ops: &[DenseOp], x: &Tensor) -> Result<Tensor> {
        let (b, n, k) = x.dims3()?;
        let mut rows = x.reshape((b * n, k))?;
        for (i, op) in ops.iter().enumerate() {
            rows = op.apply(&rows)?;
            if i + 1 < ops.len() {
                rows = rows.gelu()?;
            }
        }
        let out = rows.dim(1)?;
        Ok(rows.reshape((b, n, out))?)
    }
}

impl OperatorNet for CompiledBranchTrunk {
    fn forward(
        &self,
        augmented: &Tensor,
        _input_positions: Option<&Tensor>,
        query_positions: Option<&Tensor>,
    ) -> Result<Tensor> {
        let query = query_positions.ok_or(CamoError::MissingQueryPositions)?;
        let code = Self::run(&self.branch, augmented)?.mean_keepdim(1)?;
        let basis = Self::run(&self.trunk, query)?;
        let mixed = basis.broadcast_mul(&code)?;
        Self::run(std::slice::from_ref(&self.head), &mixed)
    }

    fn compile(self: Box<Self>) -> Result<Box<dyn OperatorNet>> {
        Ok(self)
    }

    fn is_compiled(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn build(config: &BranchTrunkConfig) -> (VarMap, BranchTrunkNet) {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let net = BranchTrunkNet::new(config, vb).unwrap();
        (varmap, net)
    }

    fn inputs(config: &BranchTrunkConfig) -> (Tensor, Tensor) {
        let device = Device::Cpu;
        let augmented = Tensor::randn(0f32, 1.0, (2, 12, config.augmented_width()), &device).unwrap();
        let query = Tensor::randn(0f32, 1.0, (2, 7, config.coord_dim), &device).unwrap();
        (augmented, query)
    }

    #[test]
    fn test_output_shape() {
        let config = BranchTrunkConfig {
            out_features: 2,
            hidden: 16,
            ..Default::default()
        };
        let (_varmap, net) = build(&config);
        let (augmented, query) = inputs(&config);
        let pred = net.forward(&augmented, None, Some(&query)).unwrap();
        assert_eq!(pred.dims(), &[2, 7, 2]);
    }

    #[test]
    fn test_parameters_registered() {
        let config = BranchTrunkConfig {
            hidden: 8,
            branch_layers: 2,
            trunk_layers: 2,
            ..Default::default()
        };
        let (varmap, _net) = build(&config);
        // weight + bias for 2 branch, 2 trunk, 1 head
        assert_eq!(varmap.all_vars().len(), 10);
    }

    #[test]
    fn test_requires_query_positions() {
        let config = BranchTrunkConfig::default();
        let (_varmap, net) = build(&config);
        let (augmented, _) = inputs(&config);
        let err = net.forward(&augmented, None, None).unwrap_err();
        assert!(matches!(err, CamoError::MissingQueryPositions));
    }

    #[test]
    fn test_compiled_matches_eager() {
        let config = BranchTrunkConfig {
            hidden: 16,
            ..Default::default()
        };
        let (_varmap, net) = build(&config);
        let (augmented, query) = inputs(&config);
        let eager = net.forward(&augmented, None, Some(&query)).unwrap();

        let compiled = Box::new(net).compile().unwrap();
        assert!(compiled.is_compiled());
        let fast = compiled.forward(&augmented, None, Some(&query)).unwrap();

        let diff = (eager - fast)
            .unwrap()
            .abs()
            .unwrap()
            .max_all()
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert!(diff < 1e-5, "max abs diff {diff}");
    }

    #[test]
    fn test_compiled_sees_parameter_updates() {
        let config = BranchTrunkConfig {
            hidden: 8,
            ..Default::default()
        };
        let (varmap, net) = build(&config);
        let compiled = Box::new(net).compile().unwrap();
        let (augmented, query) = inputs(&config);

        for var in varmap.all_vars() {
            var.set(&var.zeros_like().unwrap()).unwrap();
        }
        let pred = compiled.forward(&augmented, None, Some(&query)).unwrap();
        let max = pred.abs().unwrap().max_all().unwrap().to_scalar::<f32>().unwrap();
        assert_eq!(max, 0.0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = BranchTrunkConfig {
            hidden: 0,
            ..Default::default()
        };
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        assert!(matches!(
            BranchTrunkNet::new(&config, vb),
            Err(CamoError::Config(_))
        ));
    }
}
