use clap::Parser;
use runereum::adapters::{PaperChainClient, PaperMarketFeed};
use runereum::cli::{self, Cli, Commands};
use runereum::config::{AppConfig, LoggingConfig};
use runereum::connectors::TradeAnnouncer;
use runereum::error::Result;
use runereum::runtime::AgentRuntime;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Run { config } => {
            let app_config = AppConfig::load_from(config)?;
            init_logging(&app_config.logging);
            run_runtime(app_config).await?;
        }
        Commands::CheckStrategy { file } => {
            init_logging_simple();
            match cli::check_strategy(file) {
                Ok(strategy) => println!("OK  {}", cli::describe_strategy(&strategy)),
                Err(e) => {
                    eprintln!("INVALID  {}", e);
                    return Err(e);
                }
            }
        }
    }

    Ok(())
}

async fn run_runtime(config: AppConfig) -> Result<()> {
    let market = Arc::new(PaperMarketFeed::new());
    for (asset, price) in &config.paper.prices {
        market.set_price(asset, *price);
    }
    for (asset, depth) in &config.paper.depth {
        market.set_depth(asset, *depth);
    }
    let chain = Arc::new(PaperChainClient::new().with_market(market.clone()));

    let runtime = AgentRuntime::builder(config, market, chain)
        .connector(Arc::new(TradeAnnouncer::new()))
        .build()?;

    let seeded = runtime.seed_agents()?;
    if seeded.is_empty() {
        warn!("no agents configured; add [[agents]] entries to the config");
    }

    // Mirror every event into the log
    let mut events = runtime.subscribe_all();
    let event_log = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(Some(event)) => info!(
                    agent_id = %event.agent_id,
                    sequence = event.sequence,
                    kind = %event.kind,
                    payload = %event.payload,
                    "event"
                ),
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "event log subscriber dropped");
                    break;
                }
            }
        }
    });

    runtime.start()?;
    info!(agents = seeded.len(), "runereum running, press Ctrl+C to stop");

    shutdown_signal().await;
    info!("shutting down");

    runtime.shutdown().await;
    event_log.abort();
    Ok(())
}

fn init_logging(logging: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(logging.level.as_deref().unwrap_or("info,runereum=debug"))
    });

    let log_dir = std::env::var("RUNEREUM_LOG_DIR")
        .ok()
        .map(std::path::PathBuf::from)
        .or_else(|| logging.dir.clone());

    // `tracing_appender::rolling::daily` panics if it can't create the
    // initial log file, so preflight writability.
    let file_layer = log_dir.as_deref().and_then(|dir| {
        if let Err(e) = preflight_log_dir(dir) {
            eprintln!(
                "Warning: Could not write to log directory {} ({}), file logging disabled",
                dir.display(),
                e
            );
            return None;
        }

        let file_appender = tracing_appender::rolling::daily(dir, "runereum.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        // Keep the guard alive for the life of the process
        Box::leak(Box::new(guard));

        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true),
        )
    });

    let (plain, json) = if logging.json {
        (None, Some(tracing_subscriber::fmt::layer().json().with_target(true)))
    } else {
        (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            ),
            None,
        )
    };

    let file_logging_enabled = file_layer.is_some();
    tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(json)
        .with(file_layer)
        .init();

    if let (true, Some(dir)) = (file_logging_enabled, log_dir) {
        eprintln!("Logging to: {}/runereum.log", dir.display());
    }
}

fn preflight_log_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let test_path = dir.join(".runereum_write_test");
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&test_path)?;
    let _ = std::fs::remove_file(&test_path);
    Ok(())
}

fn init_logging_simple() {
    // Minimal logging for one-shot commands
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
