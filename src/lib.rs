pub mod analysis;
pub mod data;
pub mod enrichment;
pub mod error;
pub mod sparse;
pub mod statistics;
pub mod weights;
mod utils;

pub use analysis::{AnalysisConfig, AnalysisResult, LrAnalysis};
pub use data::{ExpressionMatrix, GeneSet, LrPair, LrPairTable};
pub use error::SpatialError;
pub use statistics::Method;
pub use utils::NumericOps;
pub use weights::SpatialWeights;
