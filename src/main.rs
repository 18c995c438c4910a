//! keel - reference host for the keel application kernel
//!
//! Loads configuration, initializes logging, and drives the demo systems
//! through the kernel's tick loop.

mod cli;
mod demo;
mod host;

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, bail};
use clap::Parser;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use keel_config::{Config, ConfigLoader, ConfigValidator, LoggingConfig, ValidationResult};
use keel_core::KernelInitialized;

use cli::{Cli, Commands};

/// Keeps the non-blocking file writer flushing until exit.
static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Initialize tracing with a console layer and, when enabled, a daily
/// rolling file layer.
///
/// `RUST_LOG` wins over the configured level.
fn init_tracing(logging: &LoggingConfig, level_override: Option<&str>) -> anyhow::Result<()> {
    let level = level_override.unwrap_or(&logging.level);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let file_layer = if logging.file {
        let log_dir = ConfigLoader::expand_pathbuf(&logging.directory);
        std::fs::create_dir_all(&log_dir)
            .with_context(|| format!("cannot create log directory {}", log_dir.display()))?;

        let file_appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix("keel")
            .filename_suffix("log")
            .max_log_files(14)
            .build(&log_dir)?;
        let (writer, guard) = tracing_appender::non_blocking(file_appender);
        let _ = LOG_GUARD.set(guard);

        Some(fmt::layer().with_writer(writer).with_ansi(false))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .with(file_layer)
        .init();

    Ok(())
}

/// Load the file given on the command line, falling back to the per-user
/// file and then to the defaults when the default path does not exist.
fn load_config(path: &Path) -> anyhow::Result<(Config, Option<PathBuf>)> {
    let mut candidates = vec![path.to_path_buf()];
    candidates.extend(ConfigLoader::user_config_path());

    let loaded = ConfigLoader::load_first(&candidates)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;
    Ok(loaded)
}

fn report_validation(result: ValidationResult) -> anyhow::Result<()> {
    for warning in &result.warnings {
        warn!(path = %warning.path, "{}", warning.message);
    }
    if let Some(err) = result.into_error() {
        bail!("invalid configuration: {}", err);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (config, source) = load_config(&cli.config)?;
    init_tracing(&config.logging, cli.log_level.as_deref())?;

    match &source {
        Some(path) => info!(path = %path.display(), "Configuration loaded"),
        None => info!("No configuration file found, using defaults"),
    }
    report_validation(ConfigValidator::validate(&config))?;

    match cli.command {
        None => run(&config, None).await,
        Some(Commands::Run { ticks }) => run(&config, ticks).await,
        Some(Commands::Graph { live }) => graph(&config, live).await,
        Some(Commands::Status) => status(&config).await,
    }
}

async fn run(config: &Config, ticks: Option<u64>) -> anyhow::Result<()> {
    info!("Starting keel v{}", env!("CARGO_PKG_VERSION"));

    let kernel = host::build_kernel(config, demo::descriptors());
    kernel.bus().subscribe(|event: &KernelInitialized| {
        info!(
            active = event.active.len(),
            failed = event.failed.len(),
            "Kernel initialized"
        );
        Ok(())
    });

    let report = kernel.start().await?;
    for failed in &report.failed {
        warn!(system = %failed.name, error = %failed.error, "System failed to start");
    }
    for skipped in &report.skipped {
        info!(system = %skipped.name, reason = ?skipped.reason, "System skipped");
    }

    let max_ticks = ticks.unwrap_or(config.host.max_ticks);
    let summary = match host::run(&kernel, &config.host, max_ticks).await {
        Ok(summary) => summary,
        Err(e) => {
            kernel.stop().await?;
            return Err(e);
        }
    };

    if let Some(clock) = kernel.get::<demo::Clock>() {
        info!(elapsed = clock.elapsed(), ticks = summary.ticks, "Shutting down");
    }
    kernel.quit();
    kernel.stop().await?;

    info!("Shutdown complete");
    Ok(())
}

async fn graph(config: &Config, live: bool) -> anyhow::Result<()> {
    let kernel = host::build_kernel(config, demo::descriptors());

    if !live {
        let plan = kernel.plan()?;
        for descriptor in &plan.order {
            println!("{} (priority {})", descriptor.name(), descriptor.priority());
            for dep in descriptor.dependencies() {
                println!("  -> {}", dep);
            }
        }
        for skipped in &plan.skipped {
            println!("# skipped {} ({:?})", skipped.name, skipped.reason);
        }
        return Ok(());
    }

    kernel.start().await?;
    print!("{}", kernel.export_dependency_graph());
    kernel.stop().await?;
    Ok(())
}

async fn status(config: &Config) -> anyhow::Result<()> {
    let kernel = host::build_kernel(config, demo::descriptors());
    kernel.start().await?;

    let delta = (1.0 / config.host.tick_rate) as f32;
    kernel.tick(delta);
    kernel.late_tick(delta);

    println!("{}", serde_json::to_string_pretty(&kernel.status())?);
    kernel.stop().await?;
    Ok(())
}
