//! Error types for camo-rs.
//!
//! Every fallible operation in the crate returns [`Result`]. Tensor failures
//! raised inside the network or the loss are carried through unchanged as
//! [`CamoError::Candle`]; the orchestrator never retries or masks them.
//!
//! # Example
//!
//! ```rust
//! use camo_rs::{CamoConfig, CamoError};
//!
//! match CamoConfig::from_preset("no-such-preset") {
//!     Ok(_) => println!("loaded"),
//!     Err(CamoError::Config(msg)) => eprintln!("configuration error: {msg}"),
//!     Err(e) => eprintln!("other error: {e}"),
//! }
//! ```

use thiserror::Error;

/// Result type alias for camo-rs operations.
pub type Result<T> = std::result::Result<T, CamoError>;

/// Errors that can occur in camo-rs.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CamoError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid configuration file.
    #[error("invalid config file: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// The batch did not carry the input-position tensor the forward pass
    /// concatenates onto the input field.
    #[error("precondition violated: input positions are required for the forward pass")]
    MissingInputPositions,

    /// The network needs query positions to place its predictions.
    #[error("precondition violated: query positions are required by this network")]
    MissingQueryPositions,

    /// A hook or step was called out of lifecycle order.
    #[error("lifecycle error: {0}")]
    Lifecycle(String),

    /// Optimizer or scheduler construction failed.
    #[error("optimization error: {0}")]
    Optimization(String),

    /// Dataset generation error.
    #[error("dataset error: {0}")]
    Dataset(String),

    /// Candle error.
    #[error("candle error: {0}")]
    Candle(#[from] candle_core::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Progress bar template error.
    #[error("template error: {0}")]
    Template(String),
}

impl From<indicatif::style::TemplateError> for CamoError {
    fn from(err: indicatif::style::TemplateError) -> Self {
        CamoError::Template(err.to_string())
    }
}
