use anyhow::bail;

use crate::error::SpatialError;
use crate::statistics::Method;

pub const DEFAULT_N_PERM: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisConfig {
    method: Method,
    n_perm: usize,
    seed: Option<u64>,
    retain_local_null: bool,
}

impl AnalysisConfig {
    pub fn builder() -> AnalysisConfigBuilder {
        AnalysisConfigBuilder::new()
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn n_perm(&self) -> usize {
        self.n_perm
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    pub fn retain_local_null(&self) -> bool {
        self.retain_local_null
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            method: Method::default(),
            n_perm: DEFAULT_N_PERM,
            seed: None,
            retain_local_null: false,
        }
    }
}

pub struct AnalysisConfigBuilder {
    method: Result<Method, SpatialError>,
    n_perm: usize,
    seed: Option<u64>,
    retain_local_null: bool,
}

impl AnalysisConfigBuilder {
    pub fn new() -> Self {
        AnalysisConfigBuilder {
            method: Ok(Method::default()),
            n_perm: DEFAULT_N_PERM,
            seed: None,
            retain_local_null: false,
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Ok(method);
        self
    }

    /// Parses `"z-score"`, `"permutation"` or `"both"`; anything else fails in [`build`](Self::build).
    pub fn method_str(mut self, method: &str) -> Self {
        self.method = method.parse();
        self
    }

    pub fn n_perm(mut self, n_perm: usize) -> Self {
        self.n_perm = n_perm;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Keep the full pairs × n_perm × spots local null array in the result.
    pub fn retain_local_null(mut self, retain: bool) -> Self {
        self.retain_local_null = retain;
        self
    }

    pub fn build(self) -> anyhow::Result<AnalysisConfig> {
        let method = self.method?;
        if method.uses_permutation() && self.n_perm == 0 {
            bail!(SpatialError::InvalidConfig(format!(
                "n_perm must be positive for method '{}'",
                method
            )));
        }
        Ok(AnalysisConfig {
            method,
            n_perm: self.n_perm,
            seed: self.seed,
            retain_local_null: self.retain_local_null,
        })
    }
}

impl Default for AnalysisConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
