//! Link creation with an ordered fallback between link methods.
//!
//! A package file is mirrored into the mod-loading directory as one of:
//!
//! 1. **Hard link**: same volume only, invisible to both the game and the
//!    mod manager as anything but a regular file.
//! 2. **Symbolic link**: works across volumes, but needs Developer Mode or
//!    administrator rights on Windows.
//! 3. **Copy**: always possible, costs disk space and goes stale if the
//!    source is replaced in place.
//!
//! Explicit methods are attempted once with no fallback. [`LinkMethod::Smart`]
//! walks the list above in order and stops at the first success.

use std::fmt;
use std::fs::{self, File, FileTimes};
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// The link method requested by configuration.
///
/// Parsing never fails: any unrecognized name selects [`LinkMethod::Smart`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LinkMethod {
    /// Hard link only.
    Hardlink,
    /// Symbolic link only.
    Symlink,
    /// Plain copy only.
    Copy,
    /// Hard link, then symbolic link, then copy.
    Smart,
}

impl LinkMethod {
    /// The link types attempted for this method, in order.
    pub fn candidates(&self) -> &'static [LinkType] {
        match self {
            Self::Hardlink => &[LinkType::Hardlink],
            Self::Symlink => &[LinkType::Symlink],
            Self::Copy => &[LinkType::Copy],
            Self::Smart => &[LinkType::Hardlink, LinkType::Symlink, LinkType::Copy],
        }
    }

    /// Configuration name of this method.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hardlink => "hardlink",
            Self::Symlink => "symlink",
            Self::Copy => "copy",
            Self::Smart => "smart",
        }
    }
}

impl From<&str> for LinkMethod {
    fn from(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "hardlink" => Self::Hardlink,
            "symlink" => Self::Symlink,
            "copy" => Self::Copy,
            _ => Self::Smart,
        }
    }
}

impl From<String> for LinkMethod {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<LinkMethod> for String {
    fn from(method: LinkMethod) -> Self {
        method.as_str().to_string()
    }
}

impl fmt::Display for LinkMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of link that was actually created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    /// Hard link (same filesystem only).
    Hardlink,
    /// Symbolic link.
    Symlink,
    /// Byte-for-byte copy with the source's timestamps.
    Copy,
}

impl LinkType {
    /// Persisted name of this link type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hardlink => "hardlink",
            Self::Symlink => "symlink",
            Self::Copy => "copy",
        }
    }

    /// Returns a human-readable description of the link type.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Hardlink => "hard link",
            Self::Symlink => "symbolic link",
            Self::Copy => "copy",
        }
    }

    /// Returns `true` if this is a real link (not a copy).
    pub fn is_real_link(&self) -> bool {
        !matches!(self, Self::Copy)
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LinkType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "hardlink" => Ok(Self::Hardlink),
            "symlink" => Ok(Self::Symlink),
            "copy" => Ok(Self::Copy),
            other => Err(Error::Other(format!("Unknown link type: {}", other))),
        }
    }
}

/// Information about a created link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    /// The source package file.
    pub source: PathBuf,
    /// The created link or copy.
    pub link: PathBuf,
    /// The method that succeeded.
    pub link_type: LinkType,
}

/// The primitive filesystem operations behind each link type.
///
/// Split out so the fallback order can be exercised without needing a second
/// volume or a privilege-restricted account.
pub trait LinkBackend: Send + Sync {
    /// Create a hard link at `target` pointing to `source`.
    fn hard_link(&self, source: &Path, target: &Path) -> io::Result<()>;
    /// Create a symbolic link at `target` pointing to `source`.
    fn symlink(&self, source: &Path, target: &Path) -> io::Result<()>;
    /// Copy `source` to `target`, carrying over modification metadata.
    fn copy(&self, source: &Path, target: &Path) -> io::Result<()>;
}

/// [`LinkBackend`] backed by the real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsBackend;

impl LinkBackend for FsBackend {
    fn hard_link(&self, source: &Path, target: &Path) -> io::Result<()> {
        fs::hard_link(source, target)
    }

    fn symlink(&self, source: &Path, target: &Path) -> io::Result<()> {
        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(source, target)
        }

        #[cfg(windows)]
        {
            std::os::windows::fs::symlink_file(source, target)
        }

        #[cfg(not(any(windows, unix)))]
        {
            let _ = (source, target);
            Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "symbolic links are not supported on this platform",
            ))
        }
    }

    fn copy(&self, source: &Path, target: &Path) -> io::Result<()> {
        fs::copy(source, target)?;

        let metadata = fs::metadata(source)?;
        let mut times = FileTimes::new().set_modified(metadata.modified()?);
        if let Ok(accessed) = metadata.accessed() {
            times = times.set_accessed(accessed);
        }
        File::options().write(true).open(target)?.set_times(times)
    }
}

/// Creates and removes package links.
pub struct LinkManager {
    backend: Box<dyn LinkBackend>,
}

impl Default for LinkManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LinkManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkManager").finish_non_exhaustive()
    }
}

impl LinkManager {
    /// Creates a manager operating on the real filesystem.
    pub fn new() -> Self {
        Self::with_backend(FsBackend)
    }

    /// Creates a manager with a custom backend.
    pub fn with_backend(backend: impl LinkBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
        }
    }

    /// Mirrors `source` at `target` using `method`.
    ///
    /// Any existing entry at `target` is removed first; if that removal fails
    /// nothing else is attempted. A failed attempt never leaves a partial
    /// file behind at `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The source doesn't exist or is not a regular file
    /// - The existing target cannot be removed
    /// - Every candidate link type for `method` failed
    pub fn create_link(&self, source: &Path, target: &Path, method: LinkMethod) -> Result<LinkInfo> {
        let metadata = fs::metadata(source).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::SourceNotFound(source.to_path_buf()),
            _ => Error::Io(e),
        })?;
        if !metadata.is_file() {
            return Err(Error::NotAFile(source.to_path_buf()));
        }

        if target.symlink_metadata().is_ok() {
            debug!("Removing existing target: {}", target.display());
            fs::remove_file(target).map_err(|e| Error::TargetRemoval {
                path: target.to_path_buf(),
                source: e,
            })?;
        }

        for &link_type in method.candidates() {
            debug!(
                "Trying {}: {} -> {}",
                link_type.description(),
                target.display(),
                source.display()
            );

            match self.attempt(link_type, source, target) {
                Ok(()) => {
                    info!(
                        "Created {}: {} -> {}",
                        link_type.description(),
                        target.display(),
                        source.display()
                    );
                    return Ok(LinkInfo {
                        source: source.to_path_buf(),
                        link: target.to_path_buf(),
                        link_type,
                    });
                }
                Err(e) => {
                    warn!("{} creation failed for {}: {}", link_type.description(), source.display(), e);
                    discard_partial(target);
                }
            }
        }

        Err(Error::LinkFailed {
            source_path: source.to_path_buf(),
            method: method.to_string(),
        })
    }

    /// Removes a link or copy without affecting its source.
    ///
    /// Returns `Ok(false)` if nothing existed at `path`.
    pub fn remove_link(path: &Path) -> Result<bool> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn attempt(&self, link_type: LinkType, source: &Path, target: &Path) -> io::Result<()> {
        match link_type {
            LinkType::Hardlink => self.backend.hard_link(source, target),
            LinkType::Symlink => self.backend.symlink(source, target),
            LinkType::Copy => self.backend.copy(source, target),
        }
    }
}

fn discard_partial(target: &Path) {
    if target.symlink_metadata().is_ok() {
        if let Err(e) = fs::remove_file(target) {
            warn!("Failed to remove partial target {}: {}", target.display(), e);
        }
    }
}
