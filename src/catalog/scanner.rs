// Dataset directory scan for MIDI files

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use walkdir::WalkDir;

/// Extensions recognised as Standard MIDI Files (compared case-insensitively).
pub const MIDI_EXTENSIONS: [&str; 2] = ["mid", "midi"];

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("dataset path is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Size and modification time of one discovered file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStamp {
    pub path: PathBuf,
    pub size: u64,
    /// Seconds since the Unix epoch; 0 when the platform gives no mtime
    pub modified: u64,
}

pub fn is_midi_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| MIDI_EXTENSIONS.iter().any(|m| e.eq_ignore_ascii_case(m)))
        .unwrap_or(false)
}

/// Create the dataset directory if it is missing. Returns true if it was created.
pub fn ensure_dataset_dir(root: &Path) -> Result<bool, ScanError> {
    if root.exists() {
        if !root.is_dir() {
            return Err(ScanError::NotADirectory(root.to_path_buf()));
        }
        return Ok(false);
    }
    std::fs::create_dir_all(root)?;
    log::info!("Created dataset directory {} - no files yet", root.display());
    Ok(true)
}

/// Recursively list MIDI files under `root`, canonicalized and sorted.
///
/// Unreadable entries are logged and skipped; a bad subdirectory never
/// aborts the scan.
pub fn discover_midi_files(root: &Path) -> Result<Vec<PathBuf>, ScanError> {
    if !root.is_dir() {
        return Err(ScanError::NotADirectory(root.to_path_buf()));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                log::warn!("Skipping unreadable dataset entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() || !is_midi_file(entry.path()) {
            continue;
        }
        match entry.path().canonicalize() {
            Ok(path) => files.push(path),
            Err(e) => log::warn!("Could not resolve {}: {}", entry.path().display(), e),
        }
    }

    files.sort();
    files.dedup();
    log::debug!("Found {} MIDI files under {}", files.len(), root.display());
    Ok(files)
}

/// Size and mtime for each file; files that vanished since discovery are skipped.
pub fn stamp_files(files: &[PathBuf]) -> Vec<FileStamp> {
    files
        .iter()
        .filter_map(|path| {
            let meta = std::fs::metadata(path).ok()?;
            let modified = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs())
                .unwrap_or(0);
            Some(FileStamp {
                path: path.clone(),
                size: meta.len(),
                modified,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn midi_extensions_are_case_insensitive() {
        assert!(is_midi_file(Path::new("song.mid")));
        assert!(is_midi_file(Path::new("song.MIDI")));
        assert!(is_midi_file(Path::new("a/b/Song.Mid")));
        assert!(!is_midi_file(Path::new("song.wav")));
        assert!(!is_midi_file(Path::new("mid")));
    }

    #[test]
    fn discovery_recurses_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("nested/deeper")).unwrap();
        std::fs::write(dir.path().join("b.mid"), b"x").unwrap();
        std::fs::write(dir.path().join("nested/a.MIDI"), b"x").unwrap();
        std::fs::write(dir.path().join("nested/deeper/c.mid"), b"x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let files = discover_midi_files(dir.path()).unwrap();
        assert_eq!(files.len(), 3);
        let mut sorted = files.clone();
        sorted.sort();
        assert_eq!(files, sorted);
        assert!(files.iter().all(|p| p.is_absolute()));
    }

    #[test]
    fn missing_dataset_dir_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("dataset");
        assert!(ensure_dataset_dir(&root).unwrap());
        assert!(root.is_dir());
        assert!(!ensure_dataset_dir(&root).unwrap());
        assert!(discover_midi_files(&root).unwrap().is_empty());
    }

    #[test]
    fn file_as_dataset_root_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not_a_dir.mid");
        std::fs::write(&file, b"x").unwrap();
        assert!(matches!(ensure_dataset_dir(&file), Err(ScanError::NotADirectory(_))));
    }

    #[test]
    fn stamps_record_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.mid");
        std::fs::write(&path, b"12345").unwrap();
        let stamps = stamp_files(&[path.clone(), dir.path().join("gone.mid")]);
        assert_eq!(stamps.len(), 1);
        assert_eq!(stamps[0].size, 5);
    }
}
