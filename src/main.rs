use std::path::PathBuf;

use clap::Parser;
use scan_orchestrator::app::component_factory::{
    ComponentFactory, Components, Config, LogFormat, LoggingConfig,
};
use scan_orchestrator::infra::{ConcreteComponentFactory, JobLogBuffer, JobLogLayer};
use tokio::sync::watch;
use tracing::level_filters::LevelFilter;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Parser)]
#[command(name = "scan-orchestrator")]
#[command(about = "Orchestrates vulnerability scans of registry artifacts")]
#[command(version)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long)]
    config: PathBuf,
}

fn init_logging(config: &LoggingConfig, job_logs: JobLogBuffer) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));
    let output = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer().json().boxed(),
        LogFormat::Text => tracing_subscriber::fmt::layer().boxed(),
    };

    tracing_subscriber::registry()
        .with(output.with_filter(filter))
        .with(JobLogLayer::new(job_logs).with_filter(LevelFilter::DEBUG))
        .init();
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();
    let content = tokio::fs::read_to_string(&cli.config).await?;
    let config = Config::from_yaml(&content)?;

    let factory = ConcreteComponentFactory::default();
    init_logging(&config.logging, factory.job_logs());

    let Components {
        scanners,
        job_hooks,
        hook_events,
        background,
        ..
    } = factory.create_components(config.clone())?;

    for scanner in &config.scanners {
        let registration = scanner.to_registration()?;
        match scanners
            .ensure_scanner(registration, scanner.resolve_conflict)
            .await
        {
            Ok(uuid) => info!(registration = %scanner.name, uuid = %uuid, "scanner installed"),
            Err(e) => error!(registration = %scanner.name, "failed to install scanner: {e}"),
        }
    }

    let (shutdown, shutdown_rx) = watch::channel(false);
    let tasks: Vec<_> = background
        .iter()
        .map(|task| {
            info!(task = task.name(), "starting background task");
            task.spawn(shutdown_rx.clone())
        })
        .collect();
    let dispatcher = tokio::spawn(job_hooks.run(hook_events));

    info!("scan orchestrator started");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    shutdown.send_replace(true);
    for task in tasks {
        if let Err(e) = task.await {
            error!("background task failed: {e}");
        }
    }
    dispatcher.abort();

    Ok(())
}
