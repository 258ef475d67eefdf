use std::{fs::File, panic, path::PathBuf, process::ExitCode, sync::Mutex};

use anyhow::{Context, Error};
use clap::Parser;
use log::{error, info, LevelFilter};

use zroot::{
    cli::{Cli, Commands},
    ExitKind, MultiLogger, RunLog, Zroot,
};
use zroot_api::{
    config::ProvisionConfig,
    constants::{FALLBACK_RUN_LOG_DIR, RUN_LOG_DIR},
    error::{InternalError, ZrootError, ZrootResultExt},
};

/// Least verbose level a run log records at.
const RUN_LOG_LEVEL: LevelFilter = LevelFilter::Debug;

fn run_zroot(
    config: Result<ProvisionConfig, ZrootError>,
    args: &Cli,
) -> Result<ExitKind, ZrootError> {
    let config = config.message("Failed to load the configuration")?;
    info!("Loaded configuration from '{}'", args.config.display());

    let res = panic::catch_unwind(|| {
        let zroot = Zroot::new(config)?;
        zroot.run(&args.command, args.yes)
    });

    let res = match res {
        Err(e) => Err(ZrootError::new(InternalError::Panic(format!("{e:?}")))),
        Ok(r) => r,
    };

    // Return the error if requested.
    if let (Some(error_path), Err(e)) = (&args.error, &res) {
        if let Err(e2) = std::fs::write(error_path, serde_yaml::to_string(&e).unwrap_or_default())
        {
            error!("Failed to write error to file: {e2}");
        }
    }

    res.message(format!("Failed to execute '{}' command", args.command))
}

/// Run logs go to the configured cache directory once the configuration
/// can be read.
fn run_log_dir(config: &Result<ProvisionConfig, ZrootError>) -> PathBuf {
    match config {
        Ok(config) => config.cache_dir.join(RUN_LOG_DIR),
        Err(_) => FALLBACK_RUN_LOG_DIR.into(),
    }
}

fn setup_logging(args: &Cli, config: &Result<ProvisionConfig, ZrootError>) -> Result<(), Error> {
    let mut max_level = args.verbosity;
    let mut multilogger = MultiLogger::new()
        // Add regular env_logger to output to stderr
        .with_logger(Box::new(
            env_logger::builder()
                .format_timestamp(None)
                .filter_level(args.verbosity)
                .build(),
        ));

    // Only commands that touch the system keep a run log. It records at
    // least debug messages whatever the console shows.
    if args.command.requires_root() {
        let run_log_level = args.verbosity.max(RUN_LOG_LEVEL);
        max_level = max_level.max(run_log_level);
        multilogger = multilogger.with_logger(
            RunLog::new(run_log_dir(config), args.command.name())
                .with_max_level(run_log_level)
                .into_logger(),
        );
    }

    multilogger
        .with_max_level(max_level)
        .init()
        .context("Logger already registered")
}

fn setup_tracing(args: &Cli) -> Result<(), Error> {
    use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt};

    let Some(path) = &args.trace_file else {
        return Ok(());
    };

    let file = File::create(path)
        .with_context(|| format!("Failed to create trace file '{}'", path.display()))?;
    let layer = tracing_subscriber::fmt::layer()
        .json()
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(Mutex::new(file));

    tracing::subscriber::set_global_default(tracing_subscriber::Registry::default().with(layer))
        .context("Failed to set global default subscriber")
}

fn main() -> ExitCode {
    // Parse args
    let args = Cli::parse();

    // Read the configuration early: it decides where the run log goes.
    let config = ProvisionConfig::load(&args.config);

    // Initialize the loggers
    if let Err(e) = setup_logging(&args, &config) {
        eprintln!("Failed to initialize logging: {e:?}");
        return ExitCode::from(1);
    }

    if let Err(e) = setup_tracing(&args) {
        error!("Failed to initialize tracing: {e:?}");
        return ExitCode::from(1);
    }

    match run_zroot(config, &args) {
        Ok(ExitKind::Done) => {
            if matches!(args.command, Commands::Provision { .. }) {
                info!("Run 'zroot configure-os' to write the host configuration");
            }
        }
        Ok(ExitKind::Declined) => info!("'{}' was not confirmed", args.command),
        Err(e) => {
            error!("zroot failed: {e:?}");
            return ExitCode::from(2);
        }
    }
    ExitCode::SUCCESS
}
