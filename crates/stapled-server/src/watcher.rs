//! Certificate-directory polling
//!
//! No inotify; a poll every tick is plenty at the rate certificate sets
//! change, and it behaves the same on every platform.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Tracks the file set of one folder between polls.
pub struct DirWatcher {
    folder: PathBuf,
    files: HashSet<String>,
}

impl DirWatcher {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        DirWatcher {
            folder: folder.into(),
            files: HashSet::new(),
        }
    }

    /// Diff the folder against the last poll. Returns paths of added files
    /// and the entry names (file stems) of removed ones.
    pub fn check(&mut self) -> std::io::Result<(Vec<PathBuf>, Vec<String>)> {
        let mut current = HashSet::new();
        for dirent in std::fs::read_dir(&self.folder)? {
            let dirent = dirent?;
            if dirent.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = dirent.file_name().to_str() {
                current.insert(name.to_string());
            }
        }

        let removed: Vec<String> = self
            .files
            .difference(&current)
            .filter_map(|name| stem_of(name))
            .collect();
        let added: Vec<PathBuf> = current
            .difference(&self.files)
            .map(|name| self.folder.join(name))
            .collect();

        self.files = current;
        Ok((added, removed))
    }
}

fn stem_of(name: &str) -> Option<String> {
    Path::new(name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .map(|stem| stem.to_string())
}
