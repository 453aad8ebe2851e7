use clap::Parser;
use colored::*;
use env_logger::{Builder, Env};
use log::{error, info, Level};
use std::io::Write;

use endoscan::config::{GlobalArgs, ModelsCommand, ScanCommand, ScanConfig};
use endoscan::detection::RESULT_SCHEMA_VERSION;
use endoscan::registry::{default_registry, CatalogParams};
use endoscan::scan::run_scan;
use endoscan::summary::SizePolicy;

#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run a model over endoscopy images
    Scan(ScanCommand),

    /// List registered models
    Models(ModelsCommand),

    /// Show version information
    Version,
}

#[derive(Parser)]
#[command(name = "endoscan")]
#[command(about = "Endoscopy lesion detection and segmentation toolkit")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

fn get_log_level_from_verbosity(
    verbosity: clap_verbosity_flag::Verbosity<clap_verbosity_flag::ErrorLevel>,
) -> log::LevelFilter {
    let base_level = verbosity.log_level_filter();
    let adjusted_level = match base_level {
        log::LevelFilter::Off => log::LevelFilter::Off, // -qq -> OFF
        log::LevelFilter::Error => log::LevelFilter::Warn, // default -> WARN
        log::LevelFilter::Warn => log::LevelFilter::Info, // -v -> INFO
        log::LevelFilter::Info => log::LevelFilter::Debug, // -vv -> DEBUG
        log::LevelFilter::Debug => log::LevelFilter::Trace, // -vvv -> TRACE
        log::LevelFilter::Trace => log::LevelFilter::Trace, // -vvvv -> TRACE (max)
    };

    if verbosity.is_silent() {
        log::LevelFilter::Error // -q -> ERROR
    } else {
        adjusted_level
    }
}

fn main() {
    let cli = Cli::parse();

    // If user didn't pass -v/-q and RUST_LOG is set, honor the env var.
    let use_env = !cli.global.verbosity.is_present() && std::env::var_os("RUST_LOG").is_some();

    let mut logger = if use_env {
        Builder::from_env(Env::default())
    } else {
        let level_filter = get_log_level_from_verbosity(cli.global.verbosity.clone());
        let mut b = Builder::new();
        b.filter_level(level_filter);
        b
    };

    logger
        .format(|buf, record| {
            let level_str = match record.level() {
                Level::Error => "ERROR".red().bold().to_string(),
                Level::Warn => "WARN".yellow().to_string(),
                Level::Info => "INFO".green().to_string(),
                Level::Debug => "DEBUG".blue().to_string(),
                Level::Trace => "TRACE".magenta().to_string(),
            };
            writeln!(buf, "[{}] {}", level_str, record.args())
        })
        .init();

    match &cli.command {
        Some(Commands::Scan(scan_cmd)) => {
            let sources_desc = if scan_cmd.sources.len() == 1 {
                scan_cmd.sources[0].clone()
            } else {
                format!("{} inputs", scan_cmd.sources.len())
            };
            info!(
                "🔍 Scan: {} | model: {} | device: {}",
                sources_desc, scan_cmd.model, cli.global.device
            );

            let config = ScanConfig::from_args(cli.global.clone(), scan_cmd.clone());
            match run_scan(config) {
                Ok(_) => {}
                Err(e) => {
                    error!("❌ Scan failed: {e:#}");
                    std::process::exit(1);
                }
            }
        }
        Some(Commands::Models(models_cmd)) => {
            let registry = default_registry(
                &cli.global.model_dir,
                &cli.global.device,
                CatalogParams::default(),
                SizePolicy::default(),
            );

            if models_cmd.preload {
                for description in registry.models() {
                    match registry.ensure_loaded(&description.model_id) {
                        Ok(_) => info!("✅ Loaded {}", description.model_id),
                        Err(e) => error!("❌ Failed to load {}: {e}", description.model_id),
                    }
                }
            }

            for description in registry.models() {
                println!(
                    "{:<12} {:<24} {}",
                    description.model_id,
                    description.task.as_str(),
                    if description.loaded { "loaded" } else { "lazy" }
                );
            }
        }
        Some(Commands::Version) => {
            println!("endoscan v{}", env!("CARGO_PKG_VERSION"));
            println!("Result schema version: {RESULT_SCHEMA_VERSION}");
        }
        None => {
            // Show help if no command specified
            use clap::CommandFactory;
            let mut cmd = Cli::command();
            cmd.print_help().unwrap();
        }
    }
}
