use anyhow::Result;
use dst_core::config::SearchConfig;
use dst_data::FeatureSet;
use serde::{Deserialize, Serialize};

/// Configuration bundle handed to the equation-search collaborator on every
/// fit call. Parsimony and populations are overwritten per simulation by the
/// orchestrator; the rest stays fixed for the whole run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitConfig {
    pub niterations: usize,
    pub populations: u32,
    pub binary_operators: Vec<String>,
    pub unary_operators: Vec<String>,
    pub elementwise_loss: String,
    pub parsimony: f64,
    pub batching: bool,
    pub batch_size: usize,
    pub denoise: bool,
    pub progress: bool,
    pub maxsize: u32,
    pub timeout_seconds: u64,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self::from_search(&SearchConfig::default())
    }
}

impl FitConfig {
    pub fn from_search(search: &SearchConfig) -> Self {
        Self {
            niterations: search.niterations,
            populations: 40,
            binary_operators: search.binary_operators.clone(),
            unary_operators: search.unary_operators.clone(),
            elementwise_loss: search.elementwise_loss.clone(),
            parsimony: 0.0,
            batching: search.batching,
            batch_size: search.batch_size,
            denoise: search.denoise,
            progress: search.progress,
            maxsize: search.maxsize,
            timeout_seconds: search.timeout_seconds,
        }
    }
}

/// One equation returned by the collaborator. Complexity and loss are
/// collaborator-assigned scores, treated as opaque comparable values.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateEquation {
    pub equation: String,
    pub complexity: u32,
    pub loss: f64,
}

/// The external search collaborator contract: fixed features and target in,
/// an ordered collection of candidate equations out. Errors are fatal to the
/// run that issued the call.
pub trait EquationSearch {
    fn fit(&mut self, features: &FeatureSet, config: &FitConfig) -> Result<Vec<CandidateEquation>>;
}
