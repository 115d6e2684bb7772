//! Package Mirroring Module
//!
//! This module keeps the game's mod-loading directory in step with the
//! package files dropped into the game directory, using hard links,
//! symlinks or copies.
//!
//! # Features
//!
//! - Four link methods: hardlink, symlink, copy and smart fallback
//! - Durable registry of created links that survives restarts
//! - One-shot scan passes plus continuous file watching
//! - Optional launch of an external mod manager when monitoring starts
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::atomic::AtomicBool;
//! use paklink_core::mirror::{LinkRegistry, ReconciliationEngine};
//! use paklink_core::Config;
//!
//! let config = Config::load();
//! let registry = LinkRegistry::load(paklink_core::config::default_registry_path());
//! let mut engine = ReconciliationEngine::new(config, registry);
//!
//! engine.start()?;
//! engine.run_until(&AtomicBool::new(false));
//! engine.stop();
//! ```

mod engine;
mod link;
mod registry;
mod scanner;
mod watcher;

pub use engine::{
    CleanupOutcome,
    MonitorState,
    ReconciliationEngine,
    ScanReport,
    StartOutcome,
};

pub use link::{
    FsBackend,
    LinkBackend,
    LinkInfo,
    LinkManager,
    LinkMethod,
    LinkType,
};

pub use registry::{content_digest, LinkRecord, LinkRegistry};

pub use scanner::{DirectoryScanner, PAK_EXTENSION};

pub use watcher::{
    PakWatcher,
    SettlePolicy,
    Sleeper,
    ThreadSleeper,
    WatchEvent,
    DEFAULT_SETTLE_DELAY,
};
