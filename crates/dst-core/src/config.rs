// Configuration for the Dst equation discovery pipeline

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Dataset and preprocessing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub input_path: PathBuf,
    pub date_start: NaiveDate,
    pub date_end: NaiveDate,
    /// Columns repaired by interpolation + edge fills before any derivation.
    pub fill_columns: Vec<String>,
    pub n_lags: usize,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            input_path: PathBuf::from("Cleaned_NASA_OMNI_Dataset.csv"),
            date_start: NaiveDate::from_ymd_opt(1995, 1, 1).unwrap(),
            date_end: NaiveDate::from_ymd_opt(2021, 5, 31).unwrap(),
            fill_columns: vec![
                "Dst-index, nT",
                "SW Plasma Speed, km/s",
                "BZ, nT (GSM)",
                "SW Proton Density, N/cm^3",
                "Vector B Magnitude,nT",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            n_lags: 1,
        }
    }
}

/// Simulation loop and collaborator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub simulations: u32,
    pub parsimony_min: f64,
    pub parsimony_max: f64,
    pub populations_min: u32,
    pub populations_max: u32,
    pub max_complexity: u32,
    pub results_path: PathBuf,
    pub niterations: usize,
    pub binary_operators: Vec<String>,
    pub unary_operators: Vec<String>,
    pub elementwise_loss: String,
    pub batching: bool,
    pub batch_size: usize,
    pub denoise: bool,
    pub progress: bool,
    pub maxsize: u32,
    pub timeout_seconds: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            simulations: 100,
            parsimony_min: 0.0,
            parsimony_max: 0.9,
            populations_min: 20,
            populations_max: 120,
            max_complexity: 18,
            results_path: PathBuf::from("equations_ranked.csv"),
            niterations: 1000,
            binary_operators: vec!["+", "-", "*", "/", "greater", "max", "min"]
                .into_iter()
                .map(String::from)
                .collect(),
            unary_operators: vec!["sqrt", "square", "sign"]
                .into_iter()
                .map(String::from)
                .collect(),
            elementwise_loss: "L1DistLoss()".to_string(),
            batching: true,
            batch_size: 50,
            denoise: false,
            progress: true,
            maxsize: 50,
            timeout_seconds: 3600,
        }
    }
}

/// Main settings structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub data: DataConfig,
    pub search: SearchConfig,
}

impl Settings {
    /// Load settings from YAML config file
    pub fn from_yaml(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = serde_yaml_ng::from_str(&content)?;
        Ok(settings)
    }

    /// Load settings from environment variable CONFIG_FILE or default config.yaml
    pub fn load() -> anyhow::Result<Self> {
        let config_file =
            std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.yaml".to_string());
        Self::from_yaml(&config_file)
    }

    /// Load settings with environment variable overrides
    pub fn load_with_env() -> anyhow::Result<Self> {
        let mut settings = Self::load()?;

        if let Ok(input) = std::env::var("DST_INPUT") {
            settings.data.input_path = PathBuf::from(input);
        }

        if let Ok(results) = std::env::var("DST_RESULTS") {
            settings.search.results_path = PathBuf::from(results);
        }

        if let Ok(sims) = std::env::var("DST_SIMULATIONS") {
            if let Ok(n) = sims.parse() {
                settings.search.simulations = n;
            }
        }

        Ok(settings)
    }

    /// Save settings to YAML file
    pub fn save(&self, path: impl AsRef<std::path::Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml_ng::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.data.fill_columns.len(), 5);
        assert_eq!(settings.search.simulations, 100);
        assert_eq!(settings.search.max_complexity, 18);
        assert!(settings.data.date_start < settings.data.date_end);
    }

    #[test]
    fn test_serialize_deserialize() {
        let settings = Settings::default();
        let yaml = serde_yaml_ng::to_string(&settings).unwrap();
        let deserialized: Settings = serde_yaml_ng::from_str(&yaml).unwrap();
        assert_eq!(deserialized.data.input_path, settings.data.input_path);
        assert_eq!(deserialized.search.binary_operators, settings.search.binary_operators);
    }

    #[test]
    fn test_yaml_round_trip_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let settings = Settings::default();
        settings.save(&path).unwrap();
        let loaded = Settings::from_yaml(&path).unwrap();
        assert_eq!(loaded.search.timeout_seconds, 3600);
        assert_eq!(loaded.data.date_end, settings.data.date_end);
    }
}
