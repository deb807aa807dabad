// Dataset catalog: file discovery and the on-disk snapshot cache

pub mod scanner;
pub mod cache;

pub use scanner::*;
pub use cache::*;

use std::path::PathBuf;
use serde::{Deserialize, Serialize};

/// A file in the corpus and its row in the corpus matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Canonical absolute path; unique within one snapshot
    pub path: PathBuf,
    pub row: usize,
}
