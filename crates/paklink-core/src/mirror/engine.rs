//! Reconciliation engine
//!
//! This module ties the scanner, watcher, registry and link manager together
//! into one monitoring lifecycle:
//!
//! - `start()` optionally launches the mod manager, runs one scan and then
//!   starts the watcher
//! - watcher events are queued on a channel and applied one at a time by
//!   whoever drives [`ReconciliationEngine::process_events`]
//! - `stop()` shuts the watcher down and waits for it to quiesce
//!
//! All registry mutations happen through `&mut self`, so scan passes and
//! event handling are serialized by construction.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::link::LinkManager;
use super::registry::{LinkRecord, LinkRegistry};
use super::scanner::DirectoryScanner;
use super::watcher::{PakWatcher, SettlePolicy, WatchEvent};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::launcher::launch_mod_manager;

/// Granularity of the foreground wait loop.
const WAIT_INTERVAL: Duration = Duration::from_secs(1);

/// Whether the engine is currently watching for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Monitoring,
}

/// Result of a scan pass.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// Qualifying files found in the watched directory.
    pub found: usize,
    /// Untracked files that were linked.
    pub linked: usize,
    /// Tracked files whose target had gone missing and was re-created.
    pub relinked: usize,
    /// Tracked files whose target is still present.
    pub skipped: usize,
    /// Tracked sources that no longer exist and were cleaned up.
    pub pruned: usize,
    /// Files that could not be linked, with the reason.
    pub failures: Vec<(PathBuf, String)>,
}

impl ScanReport {
    /// Creates a new empty scan report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if every qualifying file ended up linked.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Number of files that had a link created during the pass.
    pub fn processed(&self) -> usize {
        self.linked + self.relinked
    }

    /// Records a file that could not be linked.
    pub fn add_failure(&mut self, path: impl Into<PathBuf>, reason: impl Into<String>) {
        self.failures.push((path.into(), reason.into()));
    }
}

/// What `start()` did.
#[derive(Debug, Clone)]
pub enum StartOutcome {
    /// Monitoring was started.
    Started {
        /// Process id of the launched mod manager, if one was started.
        mod_manager: Option<u32>,
        /// The initial scan pass.
        scan: ScanReport,
    },
    /// Monitoring was already running; nothing was done.
    AlreadyRunning,
}

/// What `cleanup_link()` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// The source was never tracked.
    NotTracked,
    /// The target was deleted and the record dropped.
    Removed(LinkRecord),
    /// The target was already gone; the record was dropped.
    AlreadyGone(LinkRecord),
    /// The target could not be deleted; the record was dropped anyway.
    TargetKept { record: LinkRecord, reason: String },
}

impl CleanupOutcome {
    /// The record that was dropped, if any.
    pub fn record(&self) -> Option<&LinkRecord> {
        match self {
            Self::NotTracked => None,
            Self::Removed(record) | Self::AlreadyGone(record) => Some(record),
            Self::TargetKept { record, .. } => Some(record),
        }
    }
}

struct ActiveMonitor {
    watcher: PakWatcher,
    events: Receiver<WatchEvent>,
}

/// Keeps the mod-loading directory in step with the watched directory.
pub struct ReconciliationEngine {
    config: Config,
    registry: LinkRegistry,
    linker: LinkManager,
    scanner: DirectoryScanner,
    target_dir: PathBuf,
    settle: SettlePolicy,
    monitor: Option<ActiveMonitor>,
}

impl ReconciliationEngine {
    /// Creates an idle engine that owns `config` and `registry`.
    ///
    /// Relative directories in the config are resolved against the current
    /// working directory once, here.
    pub fn new(config: Config, registry: LinkRegistry) -> Self {
        let source_dir = absolute(&config.game_directory);
        let target_dir = absolute(&config.target_dir());

        Self {
            config,
            registry,
            linker: LinkManager::new(),
            scanner: DirectoryScanner::new(source_dir),
            target_dir,
            settle: SettlePolicy::default(),
            monitor: None,
        }
    }

    /// Replaces the link manager.
    pub fn with_linker(mut self, linker: LinkManager) -> Self {
        self.linker = linker;
        self
    }

    /// Replaces the settle policy used by the watcher.
    pub fn with_settle_policy(mut self, settle: SettlePolicy) -> Self {
        self.settle = settle;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &LinkRegistry {
        &self.registry
    }

    /// The watched directory.
    pub fn source_dir(&self) -> &Path {
        self.scanner.directory()
    }

    /// The mod-loading directory links are created in.
    pub fn target_dir(&self) -> &Path {
        &self.target_dir
    }

    /// All tracked records, ordered by source path.
    pub fn records(&self) -> impl Iterator<Item = &LinkRecord> {
        self.registry.all()
    }

    pub fn state(&self) -> MonitorState {
        if self.monitor.is_some() {
            MonitorState::Monitoring
        } else {
            MonitorState::Idle
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.state() == MonitorState::Monitoring
    }

    /// Starts monitoring.
    ///
    /// Launches the mod manager if configured (a launch failure is only
    /// logged), runs one scan pass and then starts the watcher. If the scan
    /// or the watcher fails the engine stays idle and the error is returned.
    pub fn start(&mut self) -> Result<StartOutcome> {
        if self.monitor.is_some() {
            info!("Monitoring is already running");
            return Ok(StartOutcome::AlreadyRunning);
        }

        let mod_manager = self.auto_launch();

        let scan = self.scan().map_err(|e| {
            error!("Initial scan of {} failed: {}", self.source_dir().display(), e);
            e
        })?;

        let (watcher, events) = PakWatcher::start(&self.scanner, self.settle.clone()).map_err(|e| {
            error!("Could not start watching {}: {}", self.source_dir().display(), e);
            e
        })?;

        self.monitor = Some(ActiveMonitor { watcher, events });
        info!("Monitoring {} -> {}", self.source_dir().display(), self.target_dir.display());

        Ok(StartOutcome::Started { mod_manager, scan })
    }

    fn auto_launch(&self) -> Option<u32> {
        if !self.config.auto_start_modmanager {
            return None;
        }
        let path = self.config.modmanager()?;

        match launch_mod_manager(path) {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!("{}", e);
                None
            }
        }
    }

    /// Stops monitoring and waits for the watcher to quiesce.
    ///
    /// Events that were already queued are applied before returning. Returns
    /// `false` if the engine was idle.
    pub fn stop(&mut self) -> bool {
        let Some(mut monitor) = self.monitor.take() else {
            return false;
        };

        monitor.watcher.stop();

        let pending: Vec<WatchEvent> = monitor.events.try_iter().collect();
        if !pending.is_empty() {
            debug!("Applying {} queued events before stopping", pending.len());
        }
        for event in pending {
            self.handle_event(event);
        }

        info!("Monitoring stopped");
        true
    }

    /// Runs one reconciliation pass over the watched directory.
    ///
    /// Untracked files are linked and tracked files whose target has gone
    /// missing are re-linked. Tracked sources that no longer exist are
    /// cleaned up. Per-file failures are collected in the report.
    pub fn scan(&mut self) -> Result<ScanReport> {
        let files = self.scanner.scan()?;
        let mut report = ScanReport::new();
        report.found = files.len();

        for source in self.registry.sources() {
            if !source.exists() {
                debug!("Tracked source vanished: {}", source.display());
                self.cleanup_link(&source);
                report.pruned += 1;
            }
        }

        for file in files {
            let relink = match self.registry.get(&file) {
                Some(record) if record.target_exists() => {
                    report.skipped += 1;
                    continue;
                }
                Some(record) => {
                    info!("Link target missing, re-linking: {}", record.target_path.display());
                    true
                }
                None => false,
            };

            match self.create_pak_link(&file) {
                Ok(_) if relink => report.relinked += 1,
                Ok(_) => report.linked += 1,
                Err(e) => report.add_failure(file, e.to_string()),
            }
        }

        info!(
            "Scan of {}: {} found, {} linked, {} re-linked, {} pruned, {} failed",
            self.source_dir().display(),
            report.found,
            report.linked,
            report.relinked,
            report.pruned,
            report.failures.len()
        );

        Ok(report)
    }

    /// Links `source` into the mod-loading directory and records it.
    ///
    /// Any existing file of the same name in the target directory is
    /// replaced. On failure the registry is left unchanged.
    pub fn create_pak_link(&mut self, source: &Path) -> Result<LinkRecord> {
        let source = absolute(source);
        let file_name = source
            .file_name()
            .ok_or_else(|| Error::NotAFile(source.clone()))?;
        let target = self.target_dir.join(file_name);

        let created = std::fs::create_dir_all(&self.target_dir)
            .map_err(Error::from)
            .and_then(|()| {
                // Replacing the target would delete the source
                if same_location(&source, &target) {
                    return Err(Error::SelfTarget(source.clone()));
                }
                self.linker.create_link(&source, &target, self.config.link_method)
            });

        let info = match created {
            Ok(info) => info,
            Err(e) => {
                warn!("Failed to link {}: {}", source.display(), e);
                return Err(e);
            }
        };

        let record = LinkRecord::from_link(&info);
        self.registry.put(record.clone());
        self.persist();

        Ok(record)
    }

    /// Removes the link for `source` and forgets it.
    ///
    /// Untracked sources are ignored. The record is dropped even when the
    /// target cannot be deleted.
    pub fn cleanup_link(&mut self, source: &Path) -> CleanupOutcome {
        let source = absolute(source);
        let Some(record) = self.registry.remove(&source) else {
            debug!("Not tracked, nothing to clean up: {}", source.display());
            return CleanupOutcome::NotTracked;
        };

        let outcome = match LinkManager::remove_link(&record.target_path) {
            Ok(true) => {
                info!("Removed link: {}", record.target_path.display());
                CleanupOutcome::Removed(record)
            }
            Ok(false) => {
                info!("Link already gone: {}", record.target_path.display());
                CleanupOutcome::AlreadyGone(record)
            }
            Err(e) => {
                warn!(
                    "Could not delete {}, dropping record anyway: {}",
                    record.target_path.display(),
                    e
                );
                CleanupOutcome::TargetKept {
                    record,
                    reason: e.to_string(),
                }
            }
        };

        self.persist();
        outcome
    }

    /// Forgets every record. Link files are left in place.
    pub fn clear_registry(&mut self) -> usize {
        let count = self.registry.clear();
        self.persist();
        info!("Cleared {} link records", count);
        count
    }

    /// Applies queued watcher events.
    ///
    /// Waits up to `timeout` for the first event, then drains whatever else
    /// is already queued. Returns how many events were applied.
    pub fn process_events(&mut self, timeout: Duration) -> usize {
        let first = match &self.monitor {
            Some(monitor) => monitor.events.recv_timeout(timeout),
            None => return 0,
        };

        let mut batch = match first {
            Ok(event) => vec![event],
            Err(RecvTimeoutError::Timeout) => return 0,
            Err(RecvTimeoutError::Disconnected) => {
                error!("Watcher stopped unexpectedly");
                self.stop();
                return 0;
            }
        };
        if let Some(monitor) = &self.monitor {
            batch.extend(monitor.events.try_iter());
        }

        let count = batch.len();
        for event in batch {
            self.handle_event(event);
        }
        count
    }

    /// Applies watcher events until `shutdown` is raised or monitoring ends.
    pub fn run_until(&mut self, shutdown: &AtomicBool) {
        while !shutdown.load(Ordering::SeqCst) && self.is_monitoring() {
            self.process_events(WAIT_INTERVAL);
        }
    }

    fn handle_event(&mut self, event: WatchEvent) {
        // Re-root on the configured directory so registry keys match scan results
        let Some(name) = event.path().file_name() else {
            return;
        };
        let path = self.source_dir().join(name);

        match event {
            WatchEvent::Created(_) => {
                info!("New package detected: {}", path.display());
                if let Err(e) = self.create_pak_link(&path) {
                    debug!("Leaving {} for the next scan: {}", path.display(), e);
                }
            }
            WatchEvent::Deleted(_) => {
                info!("Package removed: {}", path.display());
                self.cleanup_link(&path);
            }
        }
    }

    fn persist(&mut self) {
        if let Err(e) = self.registry.save() {
            warn!("Failed to save link registry: {}", e);
        }
    }
}

impl Drop for ReconciliationEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Returns `true` if both paths name the same directory entry, after
/// resolving their parent directories.
fn same_location(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    let resolve = |path: &Path| -> Option<PathBuf> {
        let parent = path.parent()?.canonicalize().ok()?;
        Some(parent.join(path.file_name()?))
    };
    matches!((resolve(a), resolve(b)), (Some(x), Some(y)) if x == y)
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}
