//! Error types for hetero-vgae.

use thiserror::Error;

/// hetero-vgae error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Candle tensor error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Dimension mismatch.
    #[error("dimension mismatch in {context}: expected {expected}, got {got}")]
    DimensionMismatch {
        context: String,
        expected: usize,
        got: usize,
    },

    /// Invalid configuration.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Decoder family name not recognized.
    #[error("unimplemented decoder family: {0}")]
    UnknownDecoder(String),

    /// `decoder_2_relation` and `relation_2_decoder` disagree.
    #[error("inconsistent decoder mapping: {0}")]
    InconsistentDecoderMapping(String),

    /// Node type not present in the model or the input maps.
    #[error("node type not found: {0}")]
    UnknownNodeType(String),

    /// Edge type not present in the model or the input maps.
    #[error("edge type not found: {0}")]
    UnknownEdgeType(String),

    /// Relation has no decoder assigned.
    #[error("relation not found: {0}")]
    UnknownRelation(String),

    /// Weighted KL reduction without a weight for a node type.
    #[error("missing KL weight for node type: {0}")]
    MissingWeight(String),

    /// Sparse index outside the matrix.
    #[error("index {index} out of bounds for dimension of size {bound}")]
    IndexOutOfBounds { index: usize, bound: usize },

    /// Operation called in an invalid state.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn dims(context: impl Into<String>, expected: usize, got: usize) -> Self {
        Self::DimensionMismatch {
            context: context.into(),
            expected,
            got,
        }
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
