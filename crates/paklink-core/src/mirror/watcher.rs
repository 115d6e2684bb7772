//! Event-driven counterpart of the directory scanner.
//!
//! [`PakWatcher`] subscribes to filesystem notifications for a single
//! directory (non-recursive) using `notify::RecommendedWatcher`, filters them
//! down to qualifying package files and emits typed [`WatchEvent`]s on a
//! channel. The receiving side processes them one at a time, in the order
//! the platform reported them.
//!
//! Creation notifications can arrive before a large file has finished being
//! written, so every creation is held for the [`SettlePolicy`] delay and then
//! re-checked; files that vanished in the meantime are dropped.
//!
//! # Example
//!
//! ```rust,ignore
//! use paklink_core::mirror::{DirectoryScanner, PakWatcher, SettlePolicy, WatchEvent};
//!
//! let scanner = DirectoryScanner::new("/games/wuchang");
//! let (mut watcher, rx) = PakWatcher::start(&scanner, SettlePolicy::default())?;
//!
//! while let Ok(event) = rx.recv() {
//!     match event {
//!         WatchEvent::Created(path) => println!("Created: {:?}", path),
//!         WatchEvent::Deleted(path) => println!("Deleted: {:?}", path),
//!     }
//! }
//! watcher.stop();
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use super::scanner::DirectoryScanner;
use crate::error::{Error, Result};

/// Default time a new file is left alone before it is acted on.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(1);

/// How often the dispatch thread checks for a stop request while idle.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A qualifying change in the watched directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A package file appeared and survived the settle delay.
    Created(PathBuf),
    /// A package file disappeared.
    Deleted(PathBuf),
}

impl WatchEvent {
    /// Returns the path associated with this event.
    pub fn path(&self) -> &Path {
        match self {
            Self::Created(path) | Self::Deleted(path) => path,
        }
    }
}

/// Blocking pause used by the settle delay.
pub trait Sleeper: Send + Sync {
    /// Blocks the calling thread for `duration`.
    fn sleep(&self, duration: Duration);
}

/// [`Sleeper`] that parks the current thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Delay applied to creation events before the file is re-checked.
#[derive(Clone)]
pub struct SettlePolicy {
    delay: Duration,
    sleeper: Arc<dyn Sleeper>,
}

impl Default for SettlePolicy {
    fn default() -> Self {
        Self::new(DEFAULT_SETTLE_DELAY)
    }
}

impl fmt::Debug for SettlePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettlePolicy")
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}

impl SettlePolicy {
    /// Settles for `delay` using the real clock.
    pub fn new(delay: Duration) -> Self {
        Self::with_sleeper(delay, ThreadSleeper)
    }

    /// Acts on creations immediately.
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Settles for `delay` using a custom sleeper.
    pub fn with_sleeper(delay: Duration, sleeper: impl Sleeper + 'static) -> Self {
        Self {
            delay,
            sleeper: Arc::new(sleeper),
        }
    }

    /// The configured delay.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Waits out the delay.
    pub fn settle(&self) {
        if !self.delay.is_zero() {
            self.sleeper.sleep(self.delay);
        }
    }
}

/// Watches one directory for package files being added or removed.
pub struct PakWatcher {
    /// The underlying notify watcher; dropping it ends the raw event stream.
    watcher: Option<RecommendedWatcher>,
    directory: PathBuf,
    handle: Option<JoinHandle<()>>,
    stop_flag: Arc<AtomicBool>,
}

impl PakWatcher {
    /// Starts watching the scanner's directory.
    ///
    /// Returns the watcher and the receiving end of its event channel.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory does not exist or is not a directory
    /// - The platform watcher cannot be created or registered
    pub fn start(
        scanner: &DirectoryScanner,
        settle: SettlePolicy,
    ) -> Result<(Self, Receiver<WatchEvent>)> {
        let directory = scanner.directory().to_path_buf();

        if !directory.is_dir() {
            return Err(Error::Watch(format!(
                "Path is not an accessible directory: {}",
                directory.display()
            )));
        }

        let (raw_tx, raw_rx) = channel::<notify::Result<Event>>();
        let (event_tx, event_rx) = channel();

        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| {
                let _ = raw_tx.send(result);
            },
            notify::Config::default(),
        )?;
        watcher.watch(&directory, RecursiveMode::NonRecursive)?;

        let stop_flag = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop_flag);
        let filter = scanner.clone();

        let handle = thread::Builder::new()
            .name("paklink-watcher".to_string())
            .spawn(move || dispatch(raw_rx, event_tx, filter, settle, thread_stop))?;

        info!("Watching {} for package changes", directory.display());

        Ok((
            Self {
                watcher: Some(watcher),
                directory,
                handle: Some(handle),
                stop_flag,
            },
            event_rx,
        ))
    }

    /// The watched directory.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Returns `true` until [`stop`](Self::stop) has been called.
    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Stops watching and waits for the dispatch thread to exit.
    ///
    /// An event that is being settled is allowed to finish first. Calling
    /// this more than once is harmless.
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        self.watcher.take();

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Watcher thread for {} panicked", self.directory.display());
            }
            info!("Stopped watching {}", self.directory.display());
        }
    }
}

impl Drop for PakWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Change detected in a raw notification, before settling.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RawChange {
    Appeared(PathBuf),
    Vanished(PathBuf),
}

/// Reduces a raw notify event to qualifying appearances and disappearances.
///
/// A rename onto a package name counts as an appearance and a rename away
/// from one as a disappearance, since download tools commonly write to a
/// temporary name first.
fn classify(event: &Event, filter: &DirectoryScanner) -> Vec<RawChange> {
    let qualifying = |path: &PathBuf| filter.is_qualifying(path);

    let changes: Vec<RawChange> = match event.kind {
        EventKind::Create(CreateKind::Folder) | EventKind::Remove(RemoveKind::Folder) => Vec::new(),
        EventKind::Create(_) => event.paths.iter().cloned().map(RawChange::Appeared).collect(),
        EventKind::Remove(_) => event.paths.iter().cloned().map(RawChange::Vanished).collect(),
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::To => event.paths.iter().cloned().map(RawChange::Appeared).collect(),
            RenameMode::From => event.paths.iter().cloned().map(RawChange::Vanished).collect(),
            RenameMode::Both => {
                let mut changes = Vec::new();
                if let Some(from) = event.paths.first() {
                    changes.push(RawChange::Vanished(from.clone()));
                }
                if let Some(to) = event.paths.get(1) {
                    changes.push(RawChange::Appeared(to.clone()));
                }
                changes
            }
            // Platforms that don't say which side of the rename this is
            _ => event
                .paths
                .iter()
                .map(|path| {
                    if path.exists() {
                        RawChange::Appeared(path.clone())
                    } else {
                        RawChange::Vanished(path.clone())
                    }
                })
                .collect(),
        },
        _ => Vec::new(),
    };

    changes
        .into_iter()
        .filter(|change| match change {
            RawChange::Appeared(path) | RawChange::Vanished(path) => qualifying(path),
        })
        .collect()
}

/// Body of the dispatch thread: settles, filters and forwards events.
fn dispatch(
    raw_rx: Receiver<notify::Result<Event>>,
    event_tx: Sender<WatchEvent>,
    filter: DirectoryScanner,
    settle: SettlePolicy,
    stop_flag: Arc<AtomicBool>,
) {
    while !stop_flag.load(Ordering::SeqCst) {
        let event = match raw_rx.recv_timeout(POLL_INTERVAL) {
            Ok(Ok(event)) => event,
            Ok(Err(e)) => {
                warn!("File watcher error: {}", e);
                continue;
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        for change in classify(&event, &filter) {
            let outgoing = match change {
                RawChange::Appeared(path) => {
                    settle.settle();
                    if path.is_file() {
                        Some(WatchEvent::Created(path))
                    } else {
                        debug!("Dropping {}: gone before it settled", path.display());
                        None
                    }
                }
                RawChange::Vanished(path) => Some(WatchEvent::Deleted(path)),
            };

            if let Some(event) = outgoing {
                if event_tx.send(event).is_err() {
                    // Receiver dropped, nobody is listening anymore
                    return;
                }
            }
        }
    }
}
