use std::path::PathBuf;

use anyhow::{Context, Result};
use dst_core::Settings;
use dst_data::FeatureSet;
use rand::Rng;
use tracing::{debug, error, info};

use crate::aggregator::{RankedResults, DEFAULT_MAX_COMPLEXITY};
use crate::regressor::{EquationSearch, FitConfig};

/// Where a simulation currently is: waiting, blocked on the collaborator, or
/// folding its output into the ranked table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationState {
    Idle,
    Fitting,
    Collecting,
}

#[derive(Debug, Clone, Copy)]
pub struct HyperParams {
    pub parsimony: f64,
    pub populations: u32,
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub simulations: u32,
    pub parsimony_range: (f64, f64),
    pub populations_range: (u32, u32),
    pub max_complexity: u32,
    pub results_path: PathBuf,
    pub fit: FitConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            simulations: 100,
            parsimony_range: (0.0, 0.9),
            populations_range: (20, 120),
            max_complexity: DEFAULT_MAX_COMPLEXITY,
            results_path: PathBuf::from("equations_ranked.csv"),
            fit: FitConfig::default(),
        }
    }
}

impl RunConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        let search = &settings.search;
        Self {
            simulations: search.simulations,
            parsimony_range: (search.parsimony_min, search.parsimony_max),
            populations_range: (search.populations_min, search.populations_max),
            max_complexity: search.max_complexity,
            results_path: search.results_path.clone(),
            fit: FitConfig::from_search(search),
        }
    }
}

/// Draw the per-simulation hyperparameters: parsimony uniform over its range,
/// populations uniform inclusive over its range.
pub fn draw_hyperparams<R: Rng>(rng: &mut R, config: &RunConfig) -> HyperParams {
    HyperParams {
        parsimony: rng.gen_range(config.parsimony_range.0..config.parsimony_range.1),
        populations: rng.gen_range(config.populations_range.0..=config.populations_range.1),
    }
}

/// Run the fixed-count simulation loop: draw hyperparameters, invoke the
/// collaborator on the fixed feature set, merge survivors into the ranked
/// table and rewrite the durable file. Collaborator errors abort the run; a
/// persistence failure only costs that iteration's write, the in-memory
/// table stays intact and the next save retries in full.
pub fn run_simulations<S: EquationSearch, R: Rng>(
    search: &mut S,
    features: &FeatureSet,
    config: &RunConfig,
    rng: &mut R,
    results: &mut RankedResults,
) -> Result<()> {
    let mut state = SimulationState::Idle;
    debug!(?state, rows = features.n_rows(), "orchestrator ready");

    for sim in 1..=config.simulations {
        let params = draw_hyperparams(rng, config);
        info!("Running simulation {}...", sim);
        info!(
            "  parsimony: {:.3}, populations: {}",
            params.parsimony, params.populations
        );

        state = SimulationState::Fitting;
        debug!(?state, sim, "invoking equation search");
        let mut fit = config.fit.clone();
        fit.parsimony = params.parsimony;
        fit.populations = params.populations;
        let candidates = search
            .fit(features, &fit)
            .with_context(|| format!("equation search failed in simulation {sim}"))?;

        state = SimulationState::Collecting;
        debug!(?state, sim, candidates = candidates.len(), "merging candidates");
        results.merge(
            candidates,
            sim,
            params.parsimony,
            params.populations,
            config.max_complexity,
        );

        match results.save(&config.results_path) {
            Ok(()) => info!(
                "Simulation {} complete. Ranked table updated in '{}' ({} rows)",
                sim,
                config.results_path.display(),
                results.len()
            ),
            Err(err) => {
                error!("Simulation {}: {}", sim, err);
            }
        }

        state = SimulationState::Idle;
        debug!(?state, sim, "simulation finished");
    }

    Ok(())
}
