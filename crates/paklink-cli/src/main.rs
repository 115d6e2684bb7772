//! paklink - Mirror mod packages into the game's mod-loading directory
//!
//! Usage:
//!   paklink <command> [OPTIONS]   Run a command (see `paklink --help`)
//!   paklink --help                Show help

use paklink_core::config::Config;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod cli;

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    // Check for --help
    if args.is_empty() || args.iter().any(|a| a == "--help" || a == "-h") {
        cli::print_help();
        return Ok(());
    }

    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("paklink v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let (command, options) = match cli::parse_args(&args) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            cli::print_help();
            std::process::exit(1);
        }
    };

    let config = Config::load_from(&options.config_file());
    init_logging(config.log_level_filter());

    cli::run(command, options, config)
}

fn init_logging(level: LevelFilter) {
    // RUST_LOG overrides the configured level
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
