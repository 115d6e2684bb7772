//! Headless command interface
//!
//! Usage:
//!   paklink monitor                 Link existing packages, then watch for changes
//!   paklink scan                    One-shot reconciliation pass
//!   paklink link <file>             Link a single package
//!   paklink unlink <file>           Remove the link for a single package
//!   paklink status                  List tracked links
//!   paklink clear                   Forget all tracked links
//!   paklink config show             Print the configuration
//!   paklink config set <key> <val>  Change one configuration key
//!
//! Options:
//!   --config <file>    Use a different configuration file
//!   --json             Output in JSON format

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::Context;
use tracing::{info, warn};

use paklink_core::config::{default_config_path, default_registry_path, Config, REGISTRY_FILENAME};
use paklink_core::mirror::{CleanupOutcome, LinkRegistry, ReconciliationEngine, ScanReport, StartOutcome};

/// CLI command to execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    Monitor,
    Scan,
    Link(PathBuf),
    Unlink(PathBuf),
    Status,
    Clear,
    ConfigShow,
    ConfigSet { key: String, value: String },
}

/// CLI options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliOptions {
    pub json: bool,
    pub config_path: Option<PathBuf>,
}

impl CliOptions {
    /// Configuration file in effect
    pub fn config_file(&self) -> PathBuf {
        self.config_path.clone().unwrap_or_else(default_config_path)
    }

    /// Registry file in effect; it lives next to an explicit config file
    pub fn registry_file(&self) -> PathBuf {
        match &self.config_path {
            Some(path) => path
                .parent()
                .map(|dir| dir.join(REGISTRY_FILENAME))
                .unwrap_or_else(|| PathBuf::from(REGISTRY_FILENAME)),
            None => default_registry_path(),
        }
    }
}

/// Parse CLI arguments and return command + options
pub fn parse_args(args: &[String]) -> Result<(CliCommand, CliOptions), String> {
    let mut options = CliOptions::default();
    let mut positional: Vec<&str> = Vec::new();

    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];
        match arg.as_str() {
            "--json" => options.json = true,
            "--config" | "-c" => {
                i += 1;
                if i >= args.len() {
                    return Err("--config requires a file path".to_string());
                }
                options.config_path = Some(PathBuf::from(&args[i]));
            }
            other if other.starts_with('-') => return Err(format!("Unknown option: {}", other)),
            other => positional.push(other),
        }
        i += 1;
    }

    let command = match positional.as_slice() {
        ["monitor"] | ["start"] => CliCommand::Monitor,
        ["scan"] => CliCommand::Scan,
        ["link", file] => CliCommand::Link(PathBuf::from(file)),
        ["unlink", file] => CliCommand::Unlink(PathBuf::from(file)),
        ["status"] | ["list"] => CliCommand::Status,
        ["clear"] => CliCommand::Clear,
        ["config"] | ["config", "show"] => CliCommand::ConfigShow,
        ["config", "set", key, value] => CliCommand::ConfigSet {
            key: key.to_string(),
            value: value.to_string(),
        },
        ["link"] | ["unlink"] => return Err(format!("{} requires a file", positional[0])),
        ["config", "set", ..] => return Err("config set requires a key and a value".to_string()),
        [] => {
            return Err(
                "No command specified. Use: monitor, scan, link, unlink, status, clear or config"
                    .to_string(),
            )
        }
        [cmd, ..] => return Err(format!("Unknown command: {}", cmd)),
    };

    Ok((command, options))
}

/// Resolves a package argument: relative paths are taken from the game directory
fn resolve_source(path: &Path, game_directory: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        game_directory.join(path)
    }
}

/// Run CLI command
pub fn run(command: CliCommand, options: CliOptions, config: Config) -> anyhow::Result<()> {
    match command {
        CliCommand::Monitor => run_monitor(config, &options),
        CliCommand::Scan => run_scan(config, &options),
        CliCommand::Link(path) => run_link(config, &options, &path),
        CliCommand::Unlink(path) => run_unlink(config, &options, &path),
        CliCommand::Status => run_status(config, &options),
        CliCommand::Clear => run_clear(config, &options),
        CliCommand::ConfigShow => run_config_show(config, &options),
        CliCommand::ConfigSet { key, value } => run_config_set(config, &options, &key, &value),
    }
}

fn engine(config: Config, options: &CliOptions) -> ReconciliationEngine {
    let registry = LinkRegistry::load(options.registry_file());
    ReconciliationEngine::new(config, registry)
}

fn warn_if_unsaved(engine: &ReconciliationEngine) {
    if engine.registry().is_dirty() {
        eprintln!("Warning: link registry could not be saved; changes are kept in memory only");
    }
}

/// Raises `flag` when Ctrl-C is pressed
fn install_ctrl_c_handler(flag: Arc<AtomicBool>) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create signal runtime")?;

    thread::Builder::new()
        .name("paklink-signal".to_string())
        .spawn(move || {
            runtime.block_on(async {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        info!("Interrupt received, stopping");
                        flag.store(true, Ordering::SeqCst);
                    }
                    Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
                }
            });
        })
        .context("Failed to spawn signal thread")?;

    Ok(())
}

fn run_monitor(config: Config, options: &CliOptions) -> anyhow::Result<()> {
    if !config.monitor_enabled {
        anyhow::bail!("Monitoring is disabled in the configuration (monitor_enabled = false)");
    }
    config.validate()?;

    let mut engine = engine(config, options);
    let outcome = engine.start().context("Failed to start monitoring")?;

    if let StartOutcome::Started { mod_manager, scan } = outcome {
        if let Some(pid) = mod_manager {
            println!("Started mod manager (pid {})", pid);
        }
        print_scan_report(&scan, options.json);
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    install_ctrl_c_handler(Arc::clone(&shutdown))?;

    println!(
        "Monitoring {} -> {}",
        engine.source_dir().display(),
        engine.target_dir().display()
    );
    println!("Press Ctrl-C to stop.");

    engine.run_until(&shutdown);
    let was_running = engine.is_monitoring();
    engine.stop();
    warn_if_unsaved(&engine);

    if !was_running && !shutdown.load(Ordering::SeqCst) {
        anyhow::bail!("Monitoring ended unexpectedly");
    }
    println!("Monitoring stopped");
    Ok(())
}

fn run_scan(config: Config, options: &CliOptions) -> anyhow::Result<()> {
    config.validate()?;

    let mut engine = engine(config, options);
    let report = engine.scan()?;

    print_scan_report(&report, options.json);
    warn_if_unsaved(&engine);
    Ok(())
}

fn print_scan_report(report: &ScanReport, json: bool) {
    if json {
        println!(
            "{}",
            serde_json::json!({
                "found": report.found,
                "linked": report.linked,
                "relinked": report.relinked,
                "skipped": report.skipped,
                "pruned": report.pruned,
                "failures": report.failures.iter().map(|(path, reason)| {
                    serde_json::json!({
                        "path": path.to_string_lossy(),
                        "error": reason
                    })
                }).collect::<Vec<_>>()
            })
        );
        return;
    }

    println!("Scan results:");
    println!("  Found:     {}", report.found);
    println!("  Linked:    {}", report.linked);
    println!("  Re-linked: {}", report.relinked);
    println!("  Unchanged: {}", report.skipped);
    println!("  Pruned:    {}", report.pruned);
    if !report.is_success() {
        println!("  Failed:    {}", report.failures.len());
        for (path, reason) in &report.failures {
            println!("    {}: {}", path.display(), reason);
        }
    }
}

fn run_link(config: Config, options: &CliOptions, path: &Path) -> anyhow::Result<()> {
    let source = resolve_source(path, &config.game_directory);
    let mut engine = engine(config, options);

    let record = engine
        .create_pak_link(&source)
        .with_context(|| format!("Failed to link {}", source.display()))?;

    println!(
        "Linked {} -> {} ({})",
        record.source_path.display(),
        record.target_path.display(),
        record.method.description()
    );
    warn_if_unsaved(&engine);
    Ok(())
}

fn run_unlink(config: Config, options: &CliOptions, path: &Path) -> anyhow::Result<()> {
    let source = resolve_source(path, &config.game_directory);
    let mut engine = engine(config, options);

    match engine.cleanup_link(&source) {
        CleanupOutcome::NotTracked => println!("Not tracked: {}", source.display()),
        CleanupOutcome::Removed(record) => {
            println!("Removed link {}", record.target_path.display())
        }
        CleanupOutcome::AlreadyGone(record) => println!(
            "Link {} was already gone; record removed",
            record.target_path.display()
        ),
        CleanupOutcome::TargetKept { record, reason } => eprintln!(
            "Warning: could not delete {} ({}); record removed",
            record.target_path.display(),
            reason
        ),
    }
    warn_if_unsaved(&engine);
    Ok(())
}

fn run_status(config: Config, options: &CliOptions) -> anyhow::Result<()> {
    let engine = engine(config, options);

    if options.json {
        let records: Vec<_> = engine
            .records()
            .map(|record| {
                serde_json::json!({
                    "source": record.source_path.to_string_lossy(),
                    "target": record.target_path.to_string_lossy(),
                    "method": record.method.as_str(),
                    "created_time": record.created_at.to_rfc3339(),
                    "file_hash": record.content_digest,
                    "target_exists": record.target_exists()
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if engine.registry().is_empty() {
        println!("No links tracked.");
        return Ok(());
    }

    println!("Tracked links ({}):", engine.registry().len());
    for record in engine.records() {
        let state = if record.target_exists() { "ok" } else { "MISSING" };
        println!();
        println!("  {} [{}]", record.file_name(), state);
        println!("    Source:  {}", record.source_path.display());
        println!("    Target:  {}", record.target_path.display());
        println!("    Method:  {}", record.method.description());
        println!("    Created: {}", record.created_at.format("%Y-%m-%d %H:%M:%S"));
    }
    Ok(())
}

fn run_clear(config: Config, options: &CliOptions) -> anyhow::Result<()> {
    let mut engine = engine(config, options);
    let count = engine.clear_registry();

    println!("Cleared {} link records (link files were left in place)", count);
    warn_if_unsaved(&engine);
    Ok(())
}

fn run_config_show(config: Config, options: &CliOptions) -> anyhow::Result<()> {
    if options.json {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    println!("Configuration ({}):", options.config_file().display());
    for (key, value) in config.entries() {
        println!("  {:<22} {}", key, value);
    }
    println!("  {:<22} {}", "(mod directory)", config.target_dir().display());
    Ok(())
}

fn run_config_set(
    mut config: Config,
    options: &CliOptions,
    key: &str,
    value: &str,
) -> anyhow::Result<()> {
    config.set(key, value)?;

    let path = options.config_file();
    config
        .save_to(&path)
        .with_context(|| format!("Failed to save {}", path.display()))?;

    println!("Set {} in {}", key, path.display());
    Ok(())
}

/// Print CLI help
pub fn print_help() {
    println!("paklink v{}", env!("CARGO_PKG_VERSION"));
    println!("Mirror .pak mod packages into the game's mod-loading directory");
    println!();
    println!("USAGE:");
    println!("    paklink [OPTIONS] <COMMAND>");
    println!();
    println!("COMMANDS:");
    println!("    monitor                  Link existing packages, then watch for changes");
    println!("    scan                     Link packages once and exit");
    println!("    link <file>              Link a single package");
    println!("    unlink <file>            Remove the link for a single package");
    println!("    status                   List tracked links");
    println!("    clear                    Forget all tracked links (files are kept)");
    println!("    config show              Print the configuration");
    println!("    config set <key> <value> Change one configuration key");
    println!();
    println!("OPTIONS:");
    println!("    -c, --config <file>      Use a different configuration file");
    println!("    --json                   Output in JSON format");
    println!("    -h, --help               Show this help message");
    println!("    -V, --version            Show version");
    println!();
    println!("Relative package paths are resolved against the game directory.");
    println!("Set RUST_LOG to override the configured log level.");
}
