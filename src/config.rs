// Configuration management for tunematch

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::catalog::CacheKeyStrategy;
use crate::similarity::{ExtractionSettings, FeatureWeights, WeightError};

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory scanned recursively for MIDI files
    #[serde(default = "default_dataset_dir")]
    pub dataset_dir: PathBuf,

    /// Directory holding corpus snapshots
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// How the snapshot for this dataset is keyed. Required: there is no
    /// safe default that tells two datasets apart.
    pub cache_key: CacheKeyStrategy,

    /// Default per-dimension weights by feature name. Names left out take
    /// the built-in default.
    #[serde(default)]
    pub weights: BTreeMap<String, f64>,

    /// Result count when the caller does not ask for one
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Files with fewer non-percussion notes are skipped
    #[serde(default = "default_min_notes")]
    pub min_notes: usize,

    /// Seconds an onset may sit from a beat and still count as on the beat
    #[serde(default = "default_syncopation_tolerance")]
    pub syncopation_tolerance: f64,

    /// Tempo assumed when a file gives no usable tempo
    #[serde(default = "default_tempo_bpm")]
    pub default_tempo_bpm: f64,

    /// Feature extraction worker threads during a scan (0 = one per core)
    #[serde(default)]
    pub scan_threads: usize,

    /// How many cached paths are checked for existence when loading a snapshot
    #[serde(default = "default_validation_sample")]
    pub validation_sample: usize,
}

impl Config {
    /// Configuration with defaults for everything but the cache key.
    pub fn new(dataset_dir: PathBuf, cache_key: CacheKeyStrategy) -> Self {
        Self {
            dataset_dir,
            cache_dir: default_cache_dir(),
            cache_key,
            weights: BTreeMap::new(),
            max_results: default_max_results(),
            min_notes: default_min_notes(),
            syncopation_tolerance: default_syncopation_tolerance(),
            default_tempo_bpm: default_tempo_bpm(),
            scan_threads: 0,
            validation_sample: default_validation_sample(),
        }
    }

    /// Load config from a TOML file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config {}: {}", path.display(), e))?;
        let config: Config = toml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("Failed to parse config {}: {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from `path`, or fall back to defaults around the given
    /// cache key when the file is absent or unusable.
    pub fn load_or_default(path: &Path, cache_key: CacheKeyStrategy) -> Self {
        if path.exists() {
            match Self::load(path) {
                Ok(config) => return config,
                Err(e) => log::warn!("{}", e),
            }
        }
        Self::new(default_dataset_dir(), cache_key)
    }

    /// Save config to disk
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if let CacheKeyStrategy::Explicit { key } = &self.cache_key {
            if key.trim().is_empty() {
                anyhow::bail!("cache_key.key must not be empty");
            }
        }
        if !(self.syncopation_tolerance.is_finite() && self.syncopation_tolerance >= 0.0) {
            anyhow::bail!("syncopation_tolerance must be a non-negative number");
        }
        if !(self.default_tempo_bpm.is_finite() && self.default_tempo_bpm > 0.0) {
            anyhow::bail!("default_tempo_bpm must be positive");
        }
        self.default_weights()?;
        Ok(())
    }

    /// The configured weights merged over the built-in defaults.
    pub fn default_weights(&self) -> Result<FeatureWeights, WeightError> {
        FeatureWeights::from_map(&self.weights)
    }

    pub fn extraction_settings(&self) -> ExtractionSettings {
        ExtractionSettings {
            min_notes: self.min_notes,
            syncopation_tolerance: self.syncopation_tolerance,
            default_tempo_bpm: self.default_tempo_bpm,
        }
    }

    /// Worker count for a scan, resolving 0 to the machine's parallelism.
    pub fn resolved_scan_threads(&self) -> usize {
        if self.scan_threads > 0 {
            return self.scan_threads;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

/// Default config file location
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tunematch")
        .join("config.toml")
}

/// Default dataset location
fn default_dataset_dir() -> PathBuf {
    dirs::audio_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join("Music")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tunematch")
}

/// Default snapshot cache location (XDG-compatible)
fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tunematch")
}

fn default_max_results() -> usize {
    100
}

fn default_min_notes() -> usize {
    2
}

fn default_syncopation_tolerance() -> f64 {
    0.05
}

fn default_tempo_bpm() -> f64 {
    120.0
}

fn default_validation_sample() -> usize {
    5
}
