//! archfinal - Main entry point
//!
//! Finalizes an installed Arch Linux target root as one step of a larger
//! installer pipeline.

use archfinal::cli::{Cli, Commands};
use archfinal::{
    ChrootExecutor, FinalizeConfig, FinalizeStep, Finalizer, HostProbe, ProcessGuard,
    process_guard,
};
use log::{debug, error, info};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Initialize logging; `RUST_LOG` overrides the default `info` level.
///
/// The subscriber also bridges records from the `log` facade used by the
/// library modules.
fn init_logger() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if let Err(e) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
    {
        eprintln!("Failed to initialize logging: {}", e);
    }
}

fn main() {
    init_logger();

    let cli = Cli::parse_args();
    debug!("CLI arguments parsed");

    let code = match cli.command {
        Commands::Run {
            config,
            root,
            keyrings,
        } => run_finalizer(config, root, keyrings, cli.dry_run),
        Commands::Validate { config } => validate_config(&config),
        Commands::Steps => {
            for step in FinalizeStep::all() {
                println!("{}. {}", step.order(), step);
            }
            0
        }
    };

    std::process::exit(code);
}

fn validate_config(path: &Path) -> i32 {
    info!("Validating configuration file: {:?}", path);
    match FinalizeConfig::load_from_file(path).and_then(|c| c.validate()) {
        Ok(()) => {
            println!("✓ Configuration file is valid: {:?}", path);
            0
        }
        Err(e) => {
            error!("Configuration validation failed: {:#}", e);
            eprintln!("✗ Configuration validation failed: {:#}", e);
            1
        }
    }
}

fn run_finalizer(
    config_path: Option<PathBuf>,
    root: Option<PathBuf>,
    keyrings: Vec<String>,
    dry_run: bool,
) -> i32 {
    let config = match config_path {
        Some(path) => match FinalizeConfig::load_from_file(&path) {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load configuration file: {:#}", e);
                return 1;
            }
        },
        None => FinalizeConfig::default(),
    }
    .with_overrides(root, keyrings);

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {:#}", e);
        return 1;
    }

    // Children of interrupted runs must not keep mutating the target
    if let Err(e) = process_guard::init_signal_handlers() {
        log::warn!("Failed to initialize signal handlers: {}", e);
    }
    let _guard = ProcessGuard::new();

    let span = tracing::info_span!("finalize", root = %config.root_mount_point.display(), dry_run);
    let _entered = span.enter();

    let executor = ChrootExecutor::new(&config.root_mount_point).with_dry_run(dry_run);
    let finalizer = Finalizer::new(config.into_context(), executor, HostProbe);

    match finalizer.run() {
        Ok(report) => {
            info!("Finalization succeeded: {}", report);
            0
        }
        Err(e) => {
            match e.failed_step() {
                Some(step) => error!("Finalization failed at step {} ({}): {}", step.order(), step, e),
                None => error!("Finalization failed: {}", e),
            }
            1
        }
    }
}
