use thiserror::Error;

/// Typed causes carried inside the `anyhow::Error`s returned by this crate.
///
/// Callers that need to tell a configuration problem apart from a data problem
/// can `downcast_ref::<SpatialError>()` on the returned error.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SpatialError {
    /// Unknown significance method string
    #[error("invalid method '{0}', expected one of 'z-score', 'permutation' or 'both'")]
    InvalidMethod(String),

    /// Any other invalid configuration value
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Shapes of expression, weights or signals do not line up
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Two pairs in a pair table share the same name
    #[error("duplicate ligand-receptor pair '{0}'")]
    DuplicatePair(String),

    /// A gene set was constructed without members
    #[error("gene set must contain at least one gene")]
    EmptyGeneSet,

    /// A gene name occurs twice in the expression matrix
    #[error("duplicate gene '{0}' in expression matrix")]
    DuplicateGene(String),

    /// Malformed input that is not a shape problem
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl SpatialError {
    /// True for errors caused by the analysis configuration rather than the data.
    pub fn is_config_error(&self) -> bool {
        matches!(self, SpatialError::InvalidMethod(_) | SpatialError::InvalidConfig(_))
    }
}
