// On-disk corpus snapshot cache
//
// One bincode blob per dataset key, replaced whole via temp file + rename.

use std::collections::HashSet;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::scanner::FileStamp;
use super::CatalogEntry;
use crate::similarity::{Feature, NormalizationModel};

/// Bumped whenever the snapshot layout or feature definitions change.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Encode(#[from] bincode::Error),

    #[error("failed to replace cache file: {0}")]
    Persist(#[from] tempfile::PersistError),

    #[error("refusing to cache an invalid snapshot: {0}")]
    Invalid(String),
}

/// How the cache file for a dataset is named. Must be chosen explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum CacheKeyStrategy {
    /// Caller-supplied name; the caller decides when the dataset changed
    Explicit { key: String },
    /// Hash of the dataset path and every MIDI file's path, size and mtime;
    /// any change to the listing selects a different cache file
    Fingerprint,
}

/// Resolved cache key: the hex digest naming the cache file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn explicit(key: &str) -> Self {
        let canonical = format!("explicit:{}", key);
        Self(blake3::hash(canonical.as_bytes()).to_hex().to_string())
    }

    /// Fingerprint of a directory listing. `stamps` may be in any order.
    pub fn fingerprint(dataset_root: &Path, stamps: &[FileStamp]) -> Self {
        let mut sorted: Vec<&FileStamp> = stamps.iter().collect();
        sorted.sort_by(|a, b| a.path.cmp(&b.path));

        let mut hasher = blake3::Hasher::new();
        hasher.update(b"fingerprint:");
        hasher.update(dataset_root.to_string_lossy().as_bytes());
        for stamp in sorted {
            let relative = stamp.path.strip_prefix(dataset_root).unwrap_or(&stamp.path);
            hasher.update(b"\n");
            hasher.update(relative.to_string_lossy().as_bytes());
            hasher.update(&stamp.size.to_le_bytes());
            hasher.update(&stamp.modified.to_le_bytes());
        }
        Self(hasher.finalize().to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Everything needed to serve queries for one dataset without rescanning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub version: u32,
    pub dataset_root: PathBuf,
    /// Dimension names in column order at the time of writing
    pub feature_names: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub catalog: Vec<CatalogEntry>,
    /// Raw (unnormalized) feature rows, lock-step with `catalog`
    pub corpus: Array2<f64>,
    pub model: NormalizationModel,
}

impl CacheSnapshot {
    pub fn new(
        dataset_root: PathBuf,
        catalog: Vec<CatalogEntry>,
        corpus: Array2<f64>,
        model: NormalizationModel,
    ) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            dataset_root,
            feature_names: Feature::names(),
            created_at: Utc::now(),
            catalog,
            corpus,
            model,
        }
    }

    /// Structural checks that need no filesystem access.
    pub fn check_consistency(&self) -> Result<(), String> {
        if self.version != SNAPSHOT_VERSION {
            return Err(format!("version {} != {}", self.version, SNAPSHOT_VERSION));
        }
        if self.feature_names != Feature::names() {
            return Err(format!("feature dimensions changed: {:?}", self.feature_names));
        }
        if self.catalog.is_empty() {
            return Err("empty catalog".into());
        }
        if self.catalog.len() != self.corpus.nrows() {
            return Err(format!(
                "catalog has {} entries but corpus has {} rows",
                self.catalog.len(),
                self.corpus.nrows()
            ));
        }
        let dims = self.feature_names.len();
        if self.corpus.ncols() != dims || self.model.mean().len() != dims || self.model.std().len() != dims {
            return Err(format!(
                "dimensionality mismatch: corpus {}, model mean {}, model std {}, expected {}",
                self.corpus.ncols(),
                self.model.mean().len(),
                self.model.std().len(),
                dims
            ));
        }
        if let Some(((row, column), _)) = self.corpus.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(format!("non-finite corpus value at row {}, column {}", row, column));
        }
        if !self.model.mean().iter().all(|v| v.is_finite())
            || !self.model.std().iter().all(|v| v.is_finite() && *v >= 0.0)
        {
            return Err("normalization model holds non-finite or negative values".into());
        }
        let mut seen = HashSet::new();
        for (i, entry) in self.catalog.iter().enumerate() {
            if entry.row != i {
                return Err(format!("catalog entry {} points at row {}", i, entry.row));
            }
            if !seen.insert(&entry.path) {
                return Err(format!("duplicate catalog path {}", entry.path.display()));
            }
        }
        Ok(())
    }
}

/// Cache file for one dataset key.
pub struct DatasetCache {
    dir: PathBuf,
    key: CacheKey,
    path: PathBuf,
    validation_sample: usize,
}

impl DatasetCache {
    pub fn new(cache_dir: &Path, key: &CacheKey, validation_sample: usize) -> Self {
        Self {
            dir: cache_dir.to_path_buf(),
            key: key.clone(),
            path: cache_dir.join(format!("{}.bin", key.as_str())),
            validation_sample,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load and validate the snapshot. Any failure is a miss.
    pub fn load(&self) -> Option<CacheSnapshot> {
        if !self.path.exists() {
            log::info!("No cache at {}", self.path.display());
            return None;
        }

        let snapshot = match self.read() {
            Ok(s) => s,
            Err(e) => {
                log::warn!("Discarding unreadable cache {}: {}", self.path.display(), e);
                return None;
            }
        };

        if let Err(reason) = snapshot.check_consistency() {
            log::warn!("Discarding invalid cache {}: {}", self.path.display(), reason);
            return None;
        }

        for entry in sample_entries(&snapshot.catalog, self.validation_sample) {
            if !entry.path.exists() {
                log::warn!(
                    "Discarding stale cache {}: {} no longer exists",
                    self.path.display(),
                    entry.path.display()
                );
                return None;
            }
        }

        log::info!(
            "Loaded cache {} ({} files, written {})",
            self.path.display(),
            snapshot.catalog.len(),
            snapshot.created_at.to_rfc3339()
        );
        Some(snapshot)
    }

    fn read(&self) -> Result<CacheSnapshot, CacheError> {
        // Decode from a slice so corrupt length prefixes fail as EOF instead
        // of driving huge allocations
        let bytes = fs::read(&self.path)?;
        Ok(bincode::deserialize(&bytes)?)
    }

    /// Write the whole snapshot, replacing any previous one atomically.
    pub fn save(&self, snapshot: &CacheSnapshot) -> Result<PathBuf, CacheError> {
        snapshot.check_consistency().map_err(CacheError::Invalid)?;

        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;

        let tmp = tempfile::NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            bincode::serialize_into(&mut writer, snapshot)?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)?;

        log::info!("Saved cache {} ({} files)", self.path.display(), snapshot.catalog.len());
        Ok(self.path.clone())
    }

    /// Record this key as the current cache for `dataset_root` and delete the
    /// blob recorded before it, if any. Returns the path that was removed.
    pub fn supersede_previous(&self, dataset_root: &Path) -> Result<Option<PathBuf>, CacheError> {
        let pointer = self.dir.join(format!("{}.current", current_pointer_name(dataset_root)));
        let previous = fs::read_to_string(&pointer)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| is_digest(s) && s != self.key.as_str());

        fs::create_dir_all(&self.dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(self.key.as_str().as_bytes())?;
        tmp.persist(&pointer)?;

        let Some(previous) = previous else {
            return Ok(None);
        };
        let old = DatasetCache::new(&self.dir, &CacheKey(previous), 0);
        if old.clear()? {
            log::info!("Removed superseded cache {}", old.path.display());
            return Ok(Some(old.path));
        }
        Ok(None)
    }

    /// Remove the cache file if present.
    pub fn clear(&self) -> Result<bool, CacheError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn current_pointer_name(dataset_root: &Path) -> String {
    let material = format!("current:{}", dataset_root.to_string_lossy());
    blake3::hash(material.as_bytes()).to_hex().to_string()
}

/// Pointer contents are only trusted as a file name when they look like a key.
fn is_digest(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Up to `n` entries spread evenly over the catalog, always including the
/// first and last.
fn sample_entries(catalog: &[CatalogEntry], n: usize) -> Vec<&CatalogEntry> {
    if catalog.is_empty() || n == 0 {
        return Vec::new();
    }
    if n >= catalog.len() {
        return catalog.iter().collect();
    }
    if n == 1 {
        return vec![&catalog[0]];
    }
    let last = catalog.len() - 1;
    let mut picks: Vec<usize> = (0..n).map(|i| i * last / (n - 1)).collect();
    picks.dedup();
    picks.into_iter().map(|i| &catalog[i]).collect()
}
