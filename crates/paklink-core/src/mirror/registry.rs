//! Durable registry of created links.
//!
//! The registry maps each source package to the link created for it and is
//! persisted as a JSON object keyed by absolute source path:
//!
//! ```json
//! {
//!   "/games/wuchang/Mod1.pak": {
//!     "target": "/games/wuchang/Project_Plague/Content/Paks/~mods/Mod1.pak",
//!     "method": "hardlink",
//!     "created_time": "2026-03-01T12:00:00+08:00",
//!     "file_hash": "9e107d9d372bb6826bd81d3542a419d6"
//!   }
//! }
//! ```
//!
//! Loading never fails: a missing or corrupt file yields an empty registry so
//! monitoring can always start. Every mutation is followed by a full rewrite
//! of the file; if that write fails the in-memory state is kept and the
//! registry is flagged dirty until the next successful save.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::link::{LinkInfo, LinkType};
use crate::error::{Error, Result};

/// One tracked source package and the link created for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRecord {
    /// Absolute path of the package in the watched directory.
    pub source_path: PathBuf,
    /// Absolute path of the link or copy in the mod-loading directory.
    pub target_path: PathBuf,
    /// The link method that actually succeeded.
    pub method: LinkType,
    /// When the link was created.
    pub created_at: DateTime<Local>,
    /// MD5 of the source at creation time, empty if it could not be read.
    pub content_digest: String,
}

impl LinkRecord {
    /// Builds a record for a freshly created link, hashing the source.
    pub fn from_link(info: &LinkInfo) -> Self {
        Self {
            source_path: info.source.clone(),
            target_path: info.link.clone(),
            method: info.link_type,
            created_at: Local::now(),
            content_digest: content_digest(&info.source),
        }
    }

    /// Returns `true` if the recorded target is currently reachable.
    ///
    /// The registry never guarantees this; links can be deleted externally.
    pub fn target_exists(&self) -> bool {
        self.target_path.exists()
    }

    /// File name of the source package.
    pub fn file_name(&self) -> String {
        self.source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.source_path.display().to_string())
    }
}

/// On-disk form of a record; the source path is the map key.
#[derive(Debug, Serialize, Deserialize)]
struct StoredLink {
    target: PathBuf,
    method: LinkType,
    created_time: String,
    #[serde(default)]
    file_hash: String,
}

impl StoredLink {
    fn from_record(record: &LinkRecord) -> Self {
        Self {
            target: record.target_path.clone(),
            method: record.method,
            created_time: record.created_at.to_rfc3339(),
            file_hash: record.content_digest.clone(),
        }
    }

    fn into_record(self, source_path: PathBuf) -> Result<LinkRecord> {
        Ok(LinkRecord {
            source_path,
            target_path: self.target,
            method: self.method,
            created_at: parse_timestamp(&self.created_time)?,
            content_digest: self.file_hash,
        })
    }
}

/// Accepts RFC 3339 and offset-less ISO-8601 local timestamps.
fn parse_timestamp(value: &str) -> Result<DateTime<Local>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Local));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        .ok_or_else(|| Error::Other(format!("Invalid timestamp: {}", value)))
}

/// MD5 hex digest of a file's content, or an empty string on read failure.
pub fn content_digest(path: &Path) -> String {
    let digest = File::open(path).and_then(|mut file| {
        let mut hasher = Md5::new();
        io::copy(&mut file, &mut hasher)?;
        Ok(hasher.finalize())
    });

    match digest {
        Ok(hash) => format!("{:x}", hash),
        Err(e) => {
            debug!("Could not hash {}: {}", path.display(), e);
            String::new()
        }
    }
}

/// Source-path keyed registry of created links.
#[derive(Debug, Default)]
pub struct LinkRegistry {
    /// Backing file; `None` for a purely in-memory registry.
    path: Option<PathBuf>,
    records: BTreeMap<PathBuf, LinkRecord>,
    /// In-memory state has changes not yet written to `path`.
    dirty: bool,
}

impl LinkRegistry {
    /// Creates an empty registry that is never persisted.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Loads the registry backed by `path`.
    ///
    /// A missing, unreadable or malformed file yields an empty registry; the
    /// failure is logged and prior bookkeeping is lost.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = match Self::read_records(&path) {
            Ok(records) => records,
            Err(e) => {
                warn!(
                    "Link registry {} could not be loaded, starting empty: {}",
                    path.display(),
                    e
                );
                BTreeMap::new()
            }
        };

        debug!("Loaded {} link records from {}", records.len(), path.display());

        Self {
            path: Some(path),
            records,
            dirty: false,
        }
    }

    fn read_records(path: &Path) -> Result<BTreeMap<PathBuf, LinkRecord>> {
        if !path.exists() {
            return Ok(BTreeMap::new());
        }

        let content = fs::read_to_string(path)?;
        let stored: BTreeMap<String, StoredLink> = serde_json::from_str(&content)?;

        stored
            .into_iter()
            .map(|(source, link)| {
                let source = PathBuf::from(source);
                link.into_record(source.clone()).map(|record| (source, record))
            })
            .collect()
    }

    /// Rewrites the backing file with the full current state.
    ///
    /// On failure the in-memory state is kept and [`is_dirty`](Self::is_dirty)
    /// stays `true`.
    pub fn save(&mut self) -> Result<()> {
        let Some(path) = self.path.as_deref() else {
            self.dirty = false;
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let stored: BTreeMap<String, StoredLink> = self
            .records
            .iter()
            .map(|(source, record)| {
                (
                    source.to_string_lossy().into_owned(),
                    StoredLink::from_record(record),
                )
            })
            .collect();
        let content = serde_json::to_string_pretty(&stored)?;

        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);
        fs::write(&tmp_path, content)?;
        fs::rename(&tmp_path, path)?;

        self.dirty = false;
        Ok(())
    }

    /// Inserts or replaces the record for its source path.
    pub fn put(&mut self, record: LinkRecord) -> Option<LinkRecord> {
        self.dirty = true;
        self.records.insert(record.source_path.clone(), record)
    }

    /// Removes the record for `source_path`, if tracked.
    pub fn remove(&mut self, source_path: &Path) -> Option<LinkRecord> {
        let removed = self.records.remove(source_path);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    /// Drops every record, returning how many were removed.
    pub fn clear(&mut self) -> usize {
        let count = self.records.len();
        if count > 0 {
            self.records.clear();
            self.dirty = true;
        }
        count
    }

    /// Looks up the record for `source_path`.
    pub fn get(&self, source_path: &Path) -> Option<&LinkRecord> {
        self.records.get(source_path)
    }

    /// Returns `true` if `source_path` is tracked.
    pub fn contains(&self, source_path: &Path) -> bool {
        self.records.contains_key(source_path)
    }

    /// All records, ordered by source path.
    pub fn all(&self) -> impl Iterator<Item = &LinkRecord> {
        self.records.values()
    }

    /// Tracked source paths, ordered.
    pub fn sources(&self) -> Vec<PathBuf> {
        self.records.keys().cloned().collect()
    }

    /// Number of tracked sources.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns `true` if the last mutation has not been persisted.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(source: &str, target: &str, method: LinkType) -> LinkRecord {
        LinkRecord {
            source_path: PathBuf::from(source),
            target_path: PathBuf::from(target),
            method,
            created_at: Local::now(),
            content_digest: "abc".to_string(),
        }
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let temp = TempDir::new().unwrap();
        let registry = LinkRegistry::load(temp.path().join("registry.json"));
        assert!(registry.is_empty());
        assert!(!registry.is_dirty());
    }

    #[test]
    fn test_corrupt_file_loads_empty() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("registry.json");
        fs::write(&path, "[1, 2, 3").unwrap();

        let registry = LinkRegistry::load(&path);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_save_and_reload() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state").join("registry.json");

        let mut registry = LinkRegistry::load(&path);
        registry.put(record("/game/A.pak", "/game/mods/A.pak", LinkType::Hardlink));
        registry.put(record("/game/B.pak", "/game/mods/B.pak", LinkType::Copy));
        assert!(registry.is_dirty());
        registry.save().unwrap();
        assert!(!registry.is_dirty());

        let reloaded = LinkRegistry::load(&path);
        assert_eq!(reloaded.sources(), registry.sources());
        for original in registry.all() {
            let loaded = reloaded.get(&original.source_path).unwrap();
            assert_eq!(loaded.target_path, original.target_path);
            assert_eq!(loaded.method, original.method);
            assert_eq!(loaded.content_digest, original.content_digest);
        }
    }

    #[test]
    fn test_persisted_format() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("registry.json");

        let mut registry = LinkRegistry::load(&path);
        registry.put(record("/game/A.pak", "/game/mods/A.pak", LinkType::Symlink));
        registry.save().unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        let entry = &raw["/game/A.pak"];
        assert_eq!(entry["target"], "/game/mods/A.pak");
        assert_eq!(entry["method"], "symlink");
        assert_eq!(entry["file_hash"], "abc");
        assert!(entry["created_time"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_offsetless_timestamps_are_accepted() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("registry.json");
        fs::write(
            &path,
            r#"{
                "/game/A.pak": {
                    "target": "/game/mods/A.pak",
                    "method": "copy",
                    "created_time": "2025-08-01T10:11:12.123456",
                    "file_hash": ""
                }
            }"#,
        )
        .unwrap();

        let registry = LinkRegistry::load(&path);
        let loaded = registry.get(Path::new("/game/A.pak")).unwrap();
        assert_eq!(loaded.method, LinkType::Copy);
        assert!(loaded.content_digest.is_empty());
    }

    #[test]
    fn test_put_overwrites_same_source() {
        let mut registry = LinkRegistry::in_memory();
        registry.put(record("/game/A.pak", "/old/A.pak", LinkType::Hardlink));
        let previous = registry.put(record("/game/A.pak", "/new/A.pak", LinkType::Copy));

        assert_eq!(previous.unwrap().target_path, PathBuf::from("/old/A.pak"));
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get(Path::new("/game/A.pak")).unwrap().method,
            LinkType::Copy
        );
    }

    #[test]
    fn test_remove_and_clear() {
        let mut registry = LinkRegistry::in_memory();
        registry.put(record("/game/A.pak", "/mods/A.pak", LinkType::Hardlink));
        registry.put(record("/game/B.pak", "/mods/B.pak", LinkType::Hardlink));
        registry.save().unwrap();

        assert!(registry.remove(Path::new("/game/missing.pak")).is_none());
        assert!(!registry.is_dirty());

        assert!(registry.remove(Path::new("/game/A.pak")).is_some());
        assert!(!registry.contains(Path::new("/game/A.pak")));
        assert_eq!(registry.clear(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_failed_save_keeps_memory_state() {
        let temp = TempDir::new().unwrap();
        // A directory where the file should be makes the final rename fail
        let path = temp.path().join("registry.json");
        fs::create_dir(&path).unwrap();
        fs::write(path.join("occupied"), b"x").unwrap();

        let mut registry = LinkRegistry::load(&path);
        registry.put(record("/game/A.pak", "/mods/A.pak", LinkType::Hardlink));

        assert!(registry.save().is_err());
        assert!(registry.is_dirty());
        assert!(registry.contains(Path::new("/game/A.pak")));
    }

    #[test]
    fn test_content_digest() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("Mod1.pak");
        fs::write(&file, b"abc").unwrap();

        assert_eq!(content_digest(&file), "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(content_digest(&temp.path().join("missing.pak")), "");
    }

    #[test]
    fn test_target_exists_is_checked_live() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("A.pak");
        let rec = record("/game/A.pak", target.to_str().unwrap(), LinkType::Copy);

        assert!(!rec.target_exists());
        fs::write(&target, b"x").unwrap();
        assert!(rec.target_exists());
        assert_eq!(rec.file_name(), "A.pak");
    }
}
