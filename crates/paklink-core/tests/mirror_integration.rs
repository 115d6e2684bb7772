//! Integration tests for package mirroring workflows.
//!
//! These tests drive the reconciliation engine against a mock game
//! installation: one-shot linking and cleanup, scan passes, registry
//! persistence across restarts and live file watching.

use paklink_core::mirror::{
    CleanupOutcome, LinkMethod, LinkRegistry, LinkType, ReconciliationEngine, SettlePolicy,
    StartOutcome,
};
use paklink_core::Config;
use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Test fixture that creates a mock game installation.
struct TestFixture {
    _temp_dir: TempDir,
    game_path: PathBuf,
    registry_path: PathBuf,
}

impl TestFixture {
    /// Creates a new fixture with an empty game directory.
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let game_path = temp_dir.path().join("Wuchang");
        let registry_path = temp_dir.path().join("state").join("links-registry.json");

        fs::create_dir_all(&game_path).expect("Failed to create game dir");

        Self {
            _temp_dir: temp_dir,
            game_path,
            registry_path,
        }
    }

    fn config(&self, method: LinkMethod) -> Config {
        let mut config = Config::default();
        config.game_directory = self.game_path.clone();
        config.link_method = method;
        config.auto_start_modmanager = false;
        config
    }

    /// Builds an engine over a freshly loaded registry.
    fn engine(&self, method: LinkMethod) -> ReconciliationEngine {
        let registry = LinkRegistry::load(&self.registry_path);
        ReconciliationEngine::new(self.config(method), registry)
            .with_settle_policy(SettlePolicy::immediate())
    }

    /// Writes a package file into the game directory.
    fn add_pak(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.game_path.join(name);
        fs::write(&path, content).expect("Failed to write package");
        path
    }

    fn target_dir(&self) -> PathBuf {
        self.config(LinkMethod::Smart).target_dir()
    }

    /// Counts items in the target directory (non-recursive).
    fn count_targets(&self) -> usize {
        fs::read_dir(self.target_dir())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

/// Polls `engine` until `done` holds or a few seconds pass.
fn wait_for(engine: &mut ReconciliationEngine, done: impl Fn(&ReconciliationEngine) -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        engine.process_events(Duration::from_millis(100));
        if done(&*engine) {
            return true;
        }
    }
    false
}

// =============================================================================
// Single-File Link Tests
// =============================================================================

#[test]
fn test_smart_link_prefers_hardlink() {
    let fixture = TestFixture::new();
    let source = fixture.add_pak("Mod1.pak", b"mod one");
    let mut engine = fixture.engine(LinkMethod::Smart);

    let record = engine.create_pak_link(&source).expect("Link failed");

    assert_eq!(record.method, LinkType::Hardlink);
    assert_eq!(record.source_path, source);
    assert_eq!(record.target_path, fixture.target_dir().join("Mod1.pak"));
    assert_eq!(fs::read(&record.target_path).unwrap(), b"mod one");
    assert_eq!(record.content_digest.len(), 32);

    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        let src = fs::metadata(&source).unwrap();
        let dst = fs::metadata(&record.target_path).unwrap();
        assert_eq!(src.ino(), dst.ino(), "Target should share the source inode");
    }
}

#[test]
fn test_create_then_cleanup_round_trip() {
    let fixture = TestFixture::new();
    let source = fixture.add_pak("Mod1.pak", b"mod one");
    let mut engine = fixture.engine(LinkMethod::Copy);

    let record = engine.create_pak_link(&source).expect("Link failed");
    assert!(record.target_path.exists());

    let outcome = engine.cleanup_link(&source);

    assert!(matches!(outcome, CleanupOutcome::Removed(_)));
    assert!(!record.target_path.exists());
    assert!(engine.registry().is_empty());
    assert!(source.exists(), "Source must never be touched by cleanup");
}

#[test]
fn test_create_twice_keeps_single_target() {
    let fixture = TestFixture::new();
    let source = fixture.add_pak("Mod1.pak", b"first");
    let mut engine = fixture.engine(LinkMethod::Copy);

    engine.create_pak_link(&source).expect("First link failed");
    fs::write(&source, b"second").unwrap();
    let record = engine.create_pak_link(&source).expect("Second link failed");

    assert_eq!(fixture.count_targets(), 1);
    assert_eq!(engine.registry().len(), 1);
    assert_eq!(fs::read(&record.target_path).unwrap(), b"second");
}

#[test]
fn test_cleanup_after_target_deleted_manually() {
    let fixture = TestFixture::new();
    let source = fixture.add_pak("Mod1.pak", b"mod one");
    let mut engine = fixture.engine(LinkMethod::Copy);

    let record = engine.create_pak_link(&source).expect("Link failed");
    fs::remove_file(&record.target_path).unwrap();
    fs::remove_file(&source).unwrap();

    let outcome = engine.cleanup_link(&source);

    assert!(matches!(outcome, CleanupOutcome::AlreadyGone(_)));
    assert!(engine.registry().is_empty());
}

#[test]
fn test_link_missing_source_fails_without_record() {
    let fixture = TestFixture::new();
    let mut engine = fixture.engine(LinkMethod::Smart);

    let result = engine.create_pak_link(&fixture.game_path.join("Ghost.pak"));

    assert!(result.is_err());
    assert!(engine.registry().is_empty());
    assert_eq!(fixture.count_targets(), 0);
}

// =============================================================================
// Scan Tests
// =============================================================================

#[test]
fn test_scan_links_every_qualifying_file() {
    let fixture = TestFixture::new();
    fixture.add_pak("Mod1.pak", b"1");
    fixture.add_pak("MOD2.PAK", b"2");
    fixture.add_pak("readme.txt", b"not a package");
    fs::create_dir_all(fixture.game_path.join("sub")).unwrap();
    fs::write(fixture.game_path.join("sub").join("Nested.pak"), b"n").unwrap();
    let mut engine = fixture.engine(LinkMethod::Smart);

    let report = engine.scan().expect("Scan failed");

    assert_eq!(report.found, 2);
    assert_eq!(report.linked, 2);
    assert!(report.is_success());
    for record in engine.records() {
        assert!(record.target_exists(), "{:?} should exist", record.target_path);
    }
    assert!(!fixture.target_dir().join("readme.txt").exists());
    assert!(!fixture.target_dir().join("Nested.pak").exists());
}

#[test]
fn test_second_scan_skips_tracked_files() {
    let fixture = TestFixture::new();
    fixture.add_pak("Mod1.pak", b"1");
    let mut engine = fixture.engine(LinkMethod::Copy);

    engine.scan().expect("First scan failed");
    let report = engine.scan().expect("Second scan failed");

    assert_eq!(report.found, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.processed(), 0);
}

#[test]
fn test_scan_relinks_missing_target() {
    let fixture = TestFixture::new();
    let source = fixture.add_pak("Mod1.pak", b"1");
    let mut engine = fixture.engine(LinkMethod::Copy);

    let record = engine.create_pak_link(&source).expect("Link failed");
    fs::remove_file(&record.target_path).unwrap();

    let report = engine.scan().expect("Scan failed");

    assert_eq!(report.relinked, 1);
    assert!(record.target_path.exists());
}

#[test]
fn test_scan_missing_game_directory_fails() {
    let fixture = TestFixture::new();
    fs::remove_dir_all(&fixture.game_path).unwrap();
    let mut engine = fixture.engine(LinkMethod::Smart);

    assert!(engine.scan().is_err());
}

// =============================================================================
// Registry Persistence Tests
// =============================================================================

#[test]
fn test_registry_survives_restart() {
    let fixture = TestFixture::new();
    let source = fixture.add_pak("Mod1.pak", b"mod one");

    let created = {
        let mut engine = fixture.engine(LinkMethod::Copy);
        engine.create_pak_link(&source).expect("Link failed")
    };

    let engine = fixture.engine(LinkMethod::Copy);
    let records: Vec<_> = engine.records().cloned().collect();

    assert_eq!(records.len(), 1);
    let loaded = &records[0];
    assert_eq!(loaded.source_path, created.source_path);
    assert_eq!(loaded.target_path, created.target_path);
    assert_eq!(loaded.method, created.method);
    assert_eq!(loaded.content_digest, created.content_digest);
    assert_eq!(loaded.created_at.timestamp(), created.created_at.timestamp());
}

#[test]
fn test_corrupt_registry_starts_empty() {
    let fixture = TestFixture::new();
    fs::create_dir_all(fixture.registry_path.parent().unwrap()).unwrap();
    fs::write(&fixture.registry_path, "{ this is not json").unwrap();
    fixture.add_pak("Mod1.pak", b"1");

    let mut engine = fixture.engine(LinkMethod::Copy);
    assert!(engine.registry().is_empty());

    let report = engine.scan().expect("Scan failed");
    assert_eq!(report.linked, 1);
}

// =============================================================================
// Monitoring Tests
// =============================================================================

#[test]
fn test_start_twice_is_noop_and_stop_is_idempotent() {
    let fixture = TestFixture::new();
    fixture.add_pak("Mod1.pak", b"1");
    let mut engine = fixture.engine(LinkMethod::Copy);

    match engine.start().expect("Start failed") {
        StartOutcome::Started { scan, mod_manager } => {
            assert_eq!(scan.linked, 1);
            assert!(mod_manager.is_none());
        }
        StartOutcome::AlreadyRunning => panic!("First start should start"),
    }
    assert!(engine.is_monitoring());

    assert!(matches!(engine.start().unwrap(), StartOutcome::AlreadyRunning));

    assert!(engine.stop());
    assert!(!engine.is_monitoring());
    assert!(!engine.stop());
}

#[test]
fn test_start_on_missing_directory_stays_idle() {
    let fixture = TestFixture::new();
    fs::remove_dir_all(&fixture.game_path).unwrap();
    let mut engine = fixture.engine(LinkMethod::Copy);

    assert!(engine.start().is_err());
    assert!(!engine.is_monitoring());
}

#[test]
fn test_watcher_links_new_and_cleans_removed_packages() {
    let fixture = TestFixture::new();
    let mut engine = fixture.engine(LinkMethod::Copy);
    engine.start().expect("Start failed");

    // Give the platform watcher a moment to register
    thread::sleep(Duration::from_millis(200));

    let source = fixture.add_pak("Live.pak", b"live");
    fixture.add_pak("notes.txt", b"ignored");
    let target = fixture.target_dir().join("Live.pak");

    let linked = wait_for(&mut engine, |e| e.registry().contains(&source));
    assert!(linked, "New package should be linked by the watcher");
    assert!(target.exists());
    assert!(!fixture.target_dir().join("notes.txt").exists());

    fs::remove_file(&source).unwrap();

    let cleaned = wait_for(&mut engine, |e| !e.registry().contains(&source));
    assert!(cleaned, "Removed package should be cleaned up by the watcher");
    assert!(!target.exists());

    engine.stop();
}

#[test]
fn test_watcher_treats_rename_into_place_as_creation() {
    let fixture = TestFixture::new();
    let mut engine = fixture.engine(LinkMethod::Copy);
    engine.start().expect("Start failed");
    thread::sleep(Duration::from_millis(200));

    let partial = fixture.add_pak("Download.pak.part", b"payload");
    let source = fixture.game_path.join("Download.pak");
    fs::rename(&partial, &source).unwrap();

    let linked = wait_for(&mut engine, |e| e.registry().contains(&source));
    assert!(linked, "Renamed package should be linked");
    assert_eq!(
        fs::read(fixture.target_dir().join("Download.pak")).unwrap(),
        b"payload"
    );

    engine.stop();
}
