//! Search orchestration: cache lookup, corpus scan, and ranked queries.
//!
//! A [`SearchEngine`] only exists once its corpus is ready. Opening it either
//! restores a cached snapshot or scans the dataset directory, extracts
//! features from every MIDI file, fits the normalizer and writes a new
//! snapshot. Queries then run against an immutable [`Corpus`] shared through
//! an `Arc`, so a concurrent [`SearchEngine::rescan`] swaps in a new corpus
//! without disturbing queries already in flight.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndarray::Array2;
use parking_lot::RwLock;
use serde::Serialize;

use crate::catalog::{
    self, CacheKey, CacheKeyStrategy, CacheSnapshot, CatalogEntry, DatasetCache, ScanError,
};
use crate::config::Config;
use crate::similarity::{
    extract_features, ExtractionSettings, FeatureVector, FeatureWeights, NormalizationModel,
    Normalizer, SimilarityIndex, WeightError, FEATURE_COUNT,
};

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("dataset error: {0}")]
    Dataset(#[from] ScanError),

    #[error("invalid weight: {0}")]
    InvalidWeight(#[from] WeightError),
}

/// Where the current corpus came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CorpusSource {
    CacheHit,
    Scanned,
    /// No usable MIDI files in the dataset
    Empty,
}

/// One ranked result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub path: PathBuf,
    /// In (0, 1]; 1 means identical in weighted-normalized space
    pub similarity: f64,
    pub distance: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub dataset_root: PathBuf,
    pub files: usize,
    pub source: CorpusSource,
    pub cache_path: PathBuf,
}

/// A ready-to-query snapshot of the dataset.
pub struct Corpus {
    catalog: Vec<CatalogEntry>,
    raw: Array2<f64>,
    model: NormalizationModel,
    index: SimilarityIndex,
    source: CorpusSource,
}

impl Corpus {
    fn empty() -> Self {
        Self {
            catalog: Vec::new(),
            raw: Array2::zeros((0, FEATURE_COUNT)),
            model: NormalizationModel::identity(FEATURE_COUNT),
            index: SimilarityIndex::empty(FEATURE_COUNT),
            source: CorpusSource::Empty,
        }
    }

    fn from_parts(
        catalog: Vec<CatalogEntry>,
        raw: Array2<f64>,
        model: NormalizationModel,
        source: CorpusSource,
    ) -> Self {
        let index = SimilarityIndex::build(model.transform_matrix(&raw));
        Self { catalog, raw, model, index, source }
    }

    pub fn len(&self) -> usize {
        self.catalog.len()
    }

    pub fn is_empty(&self) -> bool {
        self.catalog.is_empty()
    }

    pub fn catalog(&self) -> &[CatalogEntry] {
        &self.catalog
    }

    /// Raw feature rows, lock-step with [`Corpus::catalog`].
    pub fn raw(&self) -> &Array2<f64> {
        &self.raw
    }

    pub fn model(&self) -> &NormalizationModel {
        &self.model
    }

    pub fn source(&self) -> CorpusSource {
        self.source
    }
}

pub struct SearchEngine {
    config: Config,
    dataset_root: PathBuf,
    default_weights: FeatureWeights,
    corpus: RwLock<Arc<Corpus>>,
    cache_path: RwLock<PathBuf>,
}

impl SearchEngine {
    /// Bring up the corpus for `config.dataset_dir`, from cache if possible.
    ///
    /// A missing dataset directory is created and yields an empty corpus.
    pub fn open(config: Config) -> Result<Self, SearchError> {
        Self::open_with(config, false)
    }

    /// Like [`SearchEngine::open`], but always scans and rewrites the cache.
    pub fn open_rescanned(config: Config) -> Result<Self, SearchError> {
        Self::open_with(config, true)
    }

    fn open_with(config: Config, force_scan: bool) -> Result<Self, SearchError> {
        let default_weights = config.default_weights()?;

        catalog::ensure_dataset_dir(&config.dataset_dir)?;
        let dataset_root = config
            .dataset_dir
            .canonicalize()
            .map_err(ScanError::from)?;

        let (corpus, cache_path) = load_or_scan(&config, &dataset_root, force_scan)?;
        log_ready(&corpus, &dataset_root);

        Ok(Self {
            config,
            dataset_root,
            default_weights,
            corpus: RwLock::new(Arc::new(corpus)),
            cache_path: RwLock::new(cache_path),
        })
    }

    /// Rescan the dataset regardless of the cache and replace the corpus.
    pub fn rescan(&self) -> Result<EngineStatus, SearchError> {
        let (corpus, cache_path) = load_or_scan(&self.config, &self.dataset_root, true)?;
        log_ready(&corpus, &self.dataset_root);
        *self.corpus.write() = Arc::new(corpus);
        *self.cache_path.write() = cache_path;
        Ok(self.status())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn default_weights(&self) -> FeatureWeights {
        self.default_weights
    }

    /// The corpus queries currently run against.
    pub fn corpus(&self) -> Arc<Corpus> {
        self.corpus.read().clone()
    }

    pub fn status(&self) -> EngineStatus {
        let corpus = self.corpus();
        EngineStatus {
            dataset_root: self.dataset_root.clone(),
            files: corpus.len(),
            source: corpus.source(),
            cache_path: self.cache_path.read().clone(),
        }
    }

    /// Feature vector for any file, with this engine's extraction settings.
    pub fn features(&self, path: &Path) -> Result<FeatureVector, crate::similarity::ExtractError> {
        extract_features(path, &self.config.extraction_settings())
    }

    /// Rank the corpus against `query`, most similar first.
    ///
    /// A query file that yields no features is logged and gives no results.
    /// `k` larger than the corpus returns the whole corpus.
    pub fn search(&self, query: &Path, weights: &FeatureWeights, k: usize) -> Vec<SearchHit> {
        let corpus = self.corpus();
        if corpus.is_empty() {
            log::info!("Search for {} skipped: corpus is empty", query.display());
            return Vec::new();
        }

        let vector = match self.features(query) {
            Ok(v) => v,
            Err(e) => {
                log::error!("Could not extract features from query {}: {}", query.display(), e);
                return Vec::new();
            }
        };

        let normalized = corpus.model.transform(&vector);
        let hits: Vec<SearchHit> = corpus
            .index
            .query_weighted(&normalized, weights, k)
            .into_iter()
            .map(|n| SearchHit {
                path: corpus.catalog[n.row].path.clone(),
                similarity: n.similarity(),
                distance: n.distance,
            })
            .collect();

        log::debug!("Query {} returned {} results", query.display(), hits.len());
        hits
    }

    /// [`SearchEngine::search`] with the configured weights and result count.
    pub fn search_default(&self, query: &Path) -> Vec<SearchHit> {
        self.search(query, &self.default_weights, self.config.max_results)
    }

    /// [`SearchEngine::search`] with weights given by feature name; names
    /// left out take the configured weight.
    pub fn search_by_weights_map<S: AsRef<str>>(
        &self,
        query: &Path,
        weights: &HashMap<S, f64>,
        k: usize,
    ) -> Result<Vec<SearchHit>, SearchError> {
        let merged = self.default_weights.merged(weights)?;
        Ok(self.search(query, &merged, k))
    }
}

fn log_ready(corpus: &Corpus, root: &Path) {
    match corpus.source() {
        CorpusSource::Empty => log::info!("No MIDI files yet in {}", root.display()),
        source => log::info!("Corpus ready: {} files from {} ({:?})", corpus.len(), root.display(), source),
    }
}

/// Resolve the cache for this dataset, then either restore it or scan.
fn load_or_scan(config: &Config, root: &Path, force_scan: bool) -> Result<(Corpus, PathBuf), SearchError> {
    // Fingerprints need the listing up front; explicit keys only on a miss
    let mut files: Option<Vec<PathBuf>> = None;
    let key = match &config.cache_key {
        CacheKeyStrategy::Explicit { key } => CacheKey::explicit(key),
        CacheKeyStrategy::Fingerprint => {
            let listed = catalog::discover_midi_files(root)?;
            let key = CacheKey::fingerprint(root, &catalog::stamp_files(&listed));
            files = Some(listed);
            key
        }
    };
    let cache = DatasetCache::new(&config.cache_dir, &key, config.validation_sample);
    let cache_path = cache.path().to_path_buf();

    if !force_scan {
        if let Some(snapshot) = cache.load() {
            if snapshot.dataset_root == root {
                let corpus = Corpus::from_parts(snapshot.catalog, snapshot.corpus, snapshot.model, CorpusSource::CacheHit);
                return Ok((corpus, cache_path));
            }
            log::warn!(
                "Cache {} belongs to {}, not {}; rescanning",
                cache_path.display(),
                snapshot.dataset_root.display(),
                root.display()
            );
        }
    }

    let files = match files {
        Some(f) => f,
        None => catalog::discover_midi_files(root)?,
    };
    let corpus = scan_corpus(&files, &config.extraction_settings(), config.resolved_scan_threads());

    if !corpus.is_empty() {
        let snapshot = CacheSnapshot::new(
            root.to_path_buf(),
            corpus.catalog.clone(),
            corpus.raw.clone(),
            corpus.model.clone(),
        );
        match cache.save(&snapshot) {
            Ok(_) if config.cache_key == CacheKeyStrategy::Fingerprint => {
                if let Err(e) = cache.supersede_previous(root) {
                    log::warn!("Could not retire the previous cache for {}: {}", root.display(), e);
                }
            }
            Ok(_) => {}
            Err(e) => {
                log::error!("Failed to save cache {}: {} - continuing in memory", cache_path.display(), e);
            }
        }
    }

    Ok((corpus, cache_path))
}

/// Extract, fit and index. Files that fail extraction are left out.
pub fn scan_corpus(files: &[PathBuf], settings: &ExtractionSettings, threads: usize) -> Corpus {
    if files.is_empty() {
        return Corpus::empty();
    }

    log::info!("Extracting features from {} files on {} threads", files.len(), threads.max(1));
    let results = extract_all(files, settings, threads);

    let mut catalog = Vec::new();
    let mut rows: Vec<f64> = Vec::new();
    for (path, result) in files.iter().zip(results) {
        if let Some(vector) = result {
            catalog.push(CatalogEntry { path: path.clone(), row: catalog.len() });
            rows.extend_from_slice(vector.values());
        }
    }

    let skipped = files.len() - catalog.len();
    if skipped > 0 {
        log::warn!("Skipped {} of {} files that produced no features", skipped, files.len());
    }
    if catalog.is_empty() {
        return Corpus::empty();
    }

    let raw = match Array2::from_shape_vec((catalog.len(), FEATURE_COUNT), rows) {
        Ok(m) => m,
        Err(e) => {
            log::error!("Corpus matrix shape error: {}", e);
            return Corpus::empty();
        }
    };
    match Normalizer::fit(&raw) {
        Ok(model) => Corpus::from_parts(catalog, raw, model, CorpusSource::Scanned),
        Err(e) => {
            log::error!("Could not fit normalizer: {}", e);
            Corpus::empty()
        }
    }
}

/// Run extraction over a shared job queue. Results come back in `files` order.
fn extract_all(files: &[PathBuf], settings: &ExtractionSettings, threads: usize) -> Vec<Option<FeatureVector>> {
    let threads = threads.clamp(1, files.len().max(1));
    if threads == 1 {
        return files.iter().map(|p| extract_one(p, settings)).collect();
    }

    let (job_tx, job_rx) = crossbeam_channel::unbounded::<usize>();
    let (result_tx, result_rx) = crossbeam_channel::unbounded::<(usize, Option<FeatureVector>)>();
    for i in 0..files.len() {
        let _ = job_tx.send(i);
    }
    drop(job_tx);

    std::thread::scope(|scope| {
        for _ in 0..threads {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            scope.spawn(move || {
                for i in job_rx.iter() {
                    if result_tx.send((i, extract_one(&files[i], settings))).is_err() {
                        break;
                    }
                }
            });
        }
    });
    drop(result_tx);

    let mut results = vec![None; files.len()];
    for (i, result) in result_rx.iter() {
        results[i] = result;
    }
    results
}

fn extract_one(path: &Path, settings: &ExtractionSettings) -> Option<FeatureVector> {
    match extract_features(path, settings) {
        Ok(v) => Some(v),
        Err(e) => {
            log::warn!("Skipping {}: {}", path.display(), e);
            None
        }
    }
}
