use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use dst_core::StormError;
use polars::prelude::*;
use serde::Serialize;

use crate::regressor::CandidateEquation;

pub const DEFAULT_MAX_COMPLEXITY: u32 = 18;

/// A surviving candidate tagged with the simulation that produced it and the
/// hyperparameters used. Immutable once recorded.
#[derive(Debug, Clone, Serialize)]
pub struct RankedEquation {
    pub equation: String,
    pub complexity: u32,
    pub loss: f64,
    pub simulation: u32,
    pub parsimony: f64,
    pub populations: u32,
}

/// The cumulative ranked table: deduplicated by expression (first-seen row
/// wins), sorted ascending by loss, rewritten in full on every save.
#[derive(Debug, Clone, Default)]
pub struct RankedResults {
    rows: Vec<RankedEquation>,
}

impl RankedResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> &[RankedEquation] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Load a previously persisted table, or start empty when the file does
    /// not exist yet. A table with null cells (hand-edited, truncated rows)
    /// is rejected with the offending column and row.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::new());
        }
        let df = CsvReadOptions::default()
            .with_has_header(true)
            .try_into_reader_with_file_path(Some(path.to_path_buf()))
            .with_context(|| format!("failed to open results file: {}", path.display()))?
            .finish()
            .with_context(|| format!("failed to read results file: {}", path.display()))?;

        let equations = col_str(&df, "equation")?;
        let complexity = col_u32(&df, "complexity")?;
        let loss = col_f64(&df, "loss")?;
        let simulation = col_u32(&df, "simulation")?;
        let parsimony = col_f64(&df, "parsimony")?;
        let populations = col_u32(&df, "populations")?;

        let mut rows = Vec::with_capacity(equations.len());
        for i in 0..equations.len() {
            rows.push(RankedEquation {
                equation: equations[i].clone(),
                complexity: complexity[i],
                loss: loss[i],
                simulation: simulation[i],
                parsimony: parsimony[i],
                populations: populations[i],
            });
        }
        Ok(Self { rows })
    }

    /// Fold one simulation's candidates into the table: drop candidates over
    /// the complexity cap, tag survivors, skip expressions already present,
    /// then re-sort the whole table by ascending loss. The sort is stable so
    /// earlier simulations stay first among equal losses.
    pub fn merge(
        &mut self,
        candidates: Vec<CandidateEquation>,
        simulation: u32,
        parsimony: f64,
        populations: u32,
        max_complexity: u32,
    ) {
        let mut seen: HashSet<String> = self.rows.iter().map(|r| r.equation.clone()).collect();
        for cand in candidates {
            if cand.complexity > max_complexity {
                continue;
            }
            if !seen.insert(cand.equation.clone()) {
                continue;
            }
            self.rows.push(RankedEquation {
                equation: cand.equation,
                complexity: cand.complexity,
                loss: cand.loss,
                simulation,
                parsimony,
                populations,
            });
        }
        self.rows.sort_by(|a, b| a.loss.total_cmp(&b.loss));
    }

    fn to_frame(&self) -> Result<DataFrame> {
        let equations: Vec<String> = self.rows.iter().map(|r| r.equation.clone()).collect();
        let complexity: Vec<u32> = self.rows.iter().map(|r| r.complexity).collect();
        let loss: Vec<f64> = self.rows.iter().map(|r| r.loss).collect();
        let simulation: Vec<u32> = self.rows.iter().map(|r| r.simulation).collect();
        let parsimony: Vec<f64> = self.rows.iter().map(|r| r.parsimony).collect();
        let populations: Vec<u32> = self.rows.iter().map(|r| r.populations).collect();

        let cols: Vec<Column> = vec![
            Series::new("equation".into(), equations).into(),
            Series::new("complexity".into(), complexity).into(),
            Series::new("loss".into(), loss).into(),
            Series::new("simulation".into(), simulation).into(),
            Series::new("parsimony".into(), parsimony).into(),
            Series::new("populations".into(), populations).into(),
        ];
        Ok(DataFrame::new(cols)?)
    }

    /// Rewrite the durable table in full, via a temp file and rename so a
    /// crash mid-write never leaves a truncated table behind.
    pub fn save(&self, path: impl AsRef<Path>) -> std::result::Result<(), StormError> {
        let path = path.as_ref();
        let tmp = path.with_extension("csv.tmp");
        let write = || -> Result<()> {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            let mut df = self.to_frame()?;
            let mut file = fs::File::create(&tmp)?;
            CsvWriter::new(&mut file).include_header(true).finish(&mut df)?;
            fs::rename(&tmp, path)?;
            Ok(())
        };
        write().map_err(|e| {
            let _ = fs::remove_file(&tmp);
            StormError::Persistence(format!("failed to write {}: {e}", path.display()))
        })
    }

    /// Export the best n rows as pretty JSON.
    pub fn save_top_json(&self, path: impl AsRef<Path>, n: usize) -> Result<()> {
        let top = &self.rows[..n.min(self.rows.len())];
        let payload = serde_json::to_string_pretty(top)?;
        fs::write(path, payload)?;
        Ok(())
    }
}

fn col_str(df: &DataFrame, name: &str) -> Result<Vec<String>> {
    let series = df
        .column(name)
        .with_context(|| format!("results file missing column '{name}'"))?
        .as_materialized_series()
        .clone();
    let casted = series.cast(&DataType::String)?;
    let chunked = casted.str().context("column cast to string failed")?;
    chunked
        .into_iter()
        .enumerate()
        .map(|(row, v)| {
            v.map(str::to_string)
                .with_context(|| format!("null '{name}' in results file at row {row}"))
        })
        .collect()
}

fn col_f64(df: &DataFrame, name: &str) -> Result<Vec<f64>> {
    let series = df
        .column(name)
        .with_context(|| format!("results file missing column '{name}'"))?
        .as_materialized_series()
        .clone();
    let casted = series.cast(&DataType::Float64)?;
    let chunked = casted.f64().context("column cast to f64 failed")?;
    chunked
        .into_iter()
        .enumerate()
        .map(|(row, v)| v.with_context(|| format!("null '{name}' in results file at row {row}")))
        .collect()
}

fn col_u32(df: &DataFrame, name: &str) -> Result<Vec<u32>> {
    let series = df
        .column(name)
        .with_context(|| format!("results file missing column '{name}'"))?
        .as_materialized_series()
        .clone();
    let casted = series.cast(&DataType::UInt32)?;
    let chunked = casted.u32().context("column cast to u32 failed")?;
    chunked
        .into_iter()
        .enumerate()
        .map(|(row, v)| v.with_context(|| format!("null '{name}' in results file at row {row}")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(equation: &str, complexity: u32, loss: f64) -> CandidateEquation {
        CandidateEquation {
            equation: equation.to_string(),
            complexity,
            loss,
        }
    }

    #[test]
    fn merge_filters_by_complexity() {
        let mut results = RankedResults::new();
        results.merge(
            vec![candidate("DST", 1, 0.5), candidate("big", 19, 0.1)],
            1,
            0.3,
            50,
            DEFAULT_MAX_COMPLEXITY,
        );
        assert_eq!(results.len(), 1);
        assert!(results.rows().iter().all(|r| r.complexity <= 18));
    }

    #[test]
    fn merge_deduplicates_keeping_first_seen_metadata() {
        let mut results = RankedResults::new();
        results.merge(vec![candidate("DST + Ey", 3, 0.5)], 1, 0.11, 40, 18);
        results.merge(vec![candidate("DST + Ey", 3, 0.2)], 2, 0.77, 90, 18);

        assert_eq!(results.len(), 1);
        let row = &results.rows()[0];
        assert_eq!(row.simulation, 1);
        assert!((row.parsimony - 0.11).abs() < 1e-12);
        assert_eq!(row.populations, 40);
        assert!((row.loss - 0.5).abs() < 1e-12);
    }

    #[test]
    fn merge_sorts_ascending_by_loss() {
        let mut results = RankedResults::new();
        results.merge(
            vec![
                candidate("a", 2, 3.0),
                candidate("b", 2, 1.0),
                candidate("c", 2, 2.0),
            ],
            1,
            0.5,
            30,
            18,
        );
        let losses: Vec<f64> = results.rows().iter().map(|r| r.loss).collect();
        assert_eq!(losses, vec![1.0, 2.0, 3.0]);
        for pair in results.rows().windows(2) {
            assert!(pair[0].loss <= pair[1].loss);
        }
    }

    #[test]
    fn merge_with_empty_candidates_is_idempotent() {
        let mut results = RankedResults::new();
        results.merge(vec![candidate("a", 2, 3.0), candidate("b", 4, 1.0)], 1, 0.5, 30, 18);
        let before: Vec<String> = results.rows().iter().map(|r| r.equation.clone()).collect();
        results.merge(vec![], 2, 0.1, 99, 18);
        let after: Vec<String> = results.rows().iter().map(|r| r.equation.clone()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("equations_ranked.csv");

        let mut results = RankedResults::new();
        results.merge(
            vec![candidate("(DST * 0.900)", 3, 1.25), candidate("Ey", 1, 4.5)],
            7,
            0.42,
            63,
            18,
        );
        results.save(&path).unwrap();
        assert!(path.exists());

        let loaded = RankedResults::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.rows()[0].equation, "(DST * 0.900)");
        assert_eq!(loaded.rows()[0].simulation, 7);
        assert_eq!(loaded.rows()[0].populations, 63);
        assert!((loaded.rows()[0].parsimony - 0.42).abs() < 1e-9);
    }

    #[test]
    fn load_rejects_null_cells() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("equations_ranked.csv");
        std::fs::write(
            &path,
            "equation,complexity,loss,simulation,parsimony,populations\n\
             DST,1,0.5,3,0.3,40\n\
             Ey,1,0.7,,0.3,40\n",
        )
        .unwrap();

        let err = RankedResults::load(&path).unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("simulation"), "unexpected error: {msg}");
        assert!(msg.contains("row 1"), "unexpected error: {msg}");
    }

    #[test]
    fn load_missing_file_starts_empty() {
        let results = RankedResults::load("does/not/exist.csv").unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn save_top_json_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("top.json");
        let mut results = RankedResults::new();
        results.merge(
            vec![candidate("a", 1, 1.0), candidate("b", 1, 2.0), candidate("c", 1, 3.0)],
            1,
            0.0,
            20,
            18,
        );
        results.save_top_json(&path, 2).unwrap();
        let payload = std::fs::read_to_string(&path).unwrap();
        assert!(payload.contains("\"a\""));
        assert!(payload.contains("\"b\""));
        assert!(!payload.contains("\"c\""));
    }
}
