//! # paklink-core
//!
//! Core library for mirroring mod package files into a game's mod-loading
//! directory.
//!
//! This crate provides the foundational functionality for:
//! - Choosing a link method (hardlink, symlink, copy) with smart fallback
//! - Tracking created links in a persistent registry
//! - Scanning and watching the game directory for `.pak` files
//! - Reconciling the mod-loading directory with what was found
//!
//! ## Modules
//!
//! - [`config`] - Configuration, defaults and file locations
//! - [`error`] - Error types and Result alias
//! - [`launcher`] - Launching the external mod manager
//! - [`mirror`] - Link strategy, registry, scanner, watcher and engine
//!
//! ## Example
//!
//! ```no_run
//! use paklink_core::{Config, LinkRegistry, ReconciliationEngine};
//!
//! let config = Config::load();
//! let registry = LinkRegistry::load(paklink_core::config::default_registry_path());
//! let mut engine = ReconciliationEngine::new(config, registry);
//!
//! let report = engine.scan().expect("Failed to scan");
//! println!("Linked {} packages", report.processed());
//! ```

// Module declarations
pub mod config;
pub mod error;
pub mod launcher;
pub mod mirror;

// Re-export key types for convenience

// Error types
pub use error::{Error, Result};

// Configuration
pub use config::Config;

// Launcher
pub use launcher::launch_mod_manager;

// Mirroring
pub use mirror::{
    CleanupOutcome, DirectoryScanner, LinkManager, LinkMethod, LinkRecord, LinkRegistry,
    LinkType, MonitorState, PakWatcher, ReconciliationEngine, ScanReport, SettlePolicy,
    StartOutcome, WatchEvent,
};
