//! One-shot enumeration of package files in the watched directory.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Extension of the package archives this tool mirrors.
pub const PAK_EXTENSION: &str = "pak";

/// Lists qualifying package files directly inside a directory.
///
/// Only immediate entries are considered; subdirectories are never entered.
#[derive(Debug, Clone)]
pub struct DirectoryScanner {
    directory: PathBuf,
    /// Lowercased suffix including the leading dot, e.g. `.pak`
    suffix: String,
}

impl DirectoryScanner {
    /// Creates a scanner for `.pak` files in `directory`.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self::with_extension(directory, PAK_EXTENSION)
    }

    /// Creates a scanner for a different extension (without the dot).
    pub fn with_extension(directory: impl Into<PathBuf>, extension: &str) -> Self {
        Self {
            directory: directory.into(),
            suffix: format!(".{}", extension.trim_start_matches('.').to_lowercase()),
        }
    }

    /// The scanned directory.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Returns `true` if the file name ends with the qualifying extension,
    /// compared case-insensitively. The file itself is not inspected.
    pub fn is_qualifying(&self, path: &Path) -> bool {
        path.file_name()
            .map(|name| name.to_string_lossy().to_lowercase().ends_with(&self.suffix))
            .unwrap_or(false)
    }

    /// Returns every qualifying regular file, sorted by path.
    pub fn scan(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();

        for entry in fs::read_dir(&self.directory)? {
            let path = entry?.path();
            if self.is_qualifying(&path) && path.is_file() {
                files.push(path);
            }
        }

        files.sort();
        Ok(files)
    }
}
