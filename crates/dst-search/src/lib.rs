pub mod aggregator;
pub mod engine;
pub mod orchestrator;
pub mod regressor;

pub use aggregator::{RankedEquation, RankedResults, DEFAULT_MAX_COMPLEXITY};
pub use engine::PopulationSearch;
pub use orchestrator::{
    draw_hyperparams, run_simulations, HyperParams, RunConfig, SimulationState,
};
pub use regressor::{CandidateEquation, EquationSearch, FitConfig};
