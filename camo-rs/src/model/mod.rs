//! Operator network boundary.
//!
//! The orchestrator only ever talks to a network through [`OperatorNet`]. A
//! compiled network must honour exactly the same contract as its eager
//! counterpart, so nothing outside this module can tell them apart.

pub mod branch_trunk;

use candle_core::Tensor;

use crate::error::Result;

pub use branch_trunk::{BranchTrunkConfig, BranchTrunkNet, CompiledBranchTrunk};

/// A network mapping an augmented input field to an output field at query
/// coordinates.
pub trait OperatorNet: Send {
    /// Predict the output field.
    ///
    /// * `augmented` - input field concatenated with its coordinates, `[B, N, F + P]`
    /// * `input_positions` - input coordinates, `[B, N, P]`
    /// * `query_positions` - output coordinates, `[B, M, P]`
    ///
    /// Returns the prediction, `[B, M, O]`.
    ///
    /// # Errors
    ///
    /// Propagates tensor errors from the network's layers.
    fn forward(
        &self,
        augmented: &Tensor,
        input_positions: Option<&Tensor>,
        query_positions: Option<&Tensor>,
    ) -> Result<Tensor>;

    /// Produce an ahead-of-time specialized equivalent of this network.
    ///
    /// The result must share trainable parameters with `self` and return the
    /// same predictions. Networks with nothing to specialize return `self`.
    ///
    /// # Errors
    ///
    /// Returns an error if specialization fails.
    fn compile(self: Box<Self>) -> Result<Box<dyn OperatorNet>>;

    /// Whether this instance came out of [`OperatorNet::compile`].
    fn is_compiled(&self) -> bool {
        false
    }
}
