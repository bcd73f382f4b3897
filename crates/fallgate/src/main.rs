//! Fallgate Server
//!
//! Fall detection gateway with device ingestion and alert acknowledgment.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use fallgate::alert::{
    ack_channel, read_console_acks, AlertCoordinator, LogNotifier, ACK_QUEUE_DEPTH,
};
use fallgate::config::GatewayConfig;
use fallgate::ingest::{Ingest, IngestSettings, ResolutionForwarder};
use fallgate::lifecycle::{FallEventStore, MemoryFallEventStore, RedbFallEventStore};
use fallgate::session::BoardSessionRegistry;
use fallgate::status::StatusReporter;
use fallgate_runtime::{Bus, Clock, LocalBus, SystemClock};
use fallgate_types::{BoardId, FallStatus};

/// Fall Detection Gateway
#[derive(Parser, Debug)]
#[command(name = "fallgate")]
#[command(about = "Fall detection gateway", long_about = None)]
struct Cli {
    /// Path to the config file (defaults to ./fallgate.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the gateway (default)
    Serve(ServeArgs),

    /// Print recent fall events for a board
    History(HistoryArgs),
}

#[derive(Args, Debug, Default)]
struct ServeArgs {
    /// Device listener address, overrides `ingest.bind`
    #[arg(long)]
    bind: Option<String>,

    /// Fall event database, overrides `storage.path`
    #[arg(long)]
    db: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct HistoryArgs {
    /// Board to list events for
    #[arg(long)]
    board: String,

    /// Maximum number of events
    #[arg(long, default_value_t = 5)]
    limit: usize,

    /// Fall event database, overrides `storage.path`
    #[arg(long)]
    db: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = GatewayConfig::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Command::Serve(ServeArgs::default())) {
        Command::Serve(args) => serve(config, args).await,
        Command::History(args) => history(config, args).await,
    }
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fallgate=info"));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Run the gateway until Ctrl+C or SIGTERM
async fn serve(mut config: GatewayConfig, args: ServeArgs) -> Result<()> {
    if let Some(bind) = args.bind {
        config.ingest.bind = bind;
    }
    if let Some(db) = args.db {
        config.storage.path = Some(db);
    }
    config.validate()?;

    info!("Starting fallgate v{}", env!("CARGO_PKG_VERSION"));

    let clock = SystemClock::shared();
    let bus: Arc<dyn Bus> = Arc::new(LocalBus::new());
    let registry = Arc::new(BoardSessionRegistry::new(config.stale_after(), clock.clone()));
    let events = open_store(&config, clock)?;

    let directory = config.directory()?;
    info!("Loaded {} subscriber entries", config.subscribers.len());

    let coordinator = Arc::new(AlertCoordinator::new(
        events,
        Arc::new(directory),
        Arc::new(LogNotifier),
        bus.clone(),
        config.event_ttl(),
    ));

    // Subscriptions stay alive until shutdown
    let mut subscriptions = vec![coordinator.attach(bus.as_ref()).await?];
    if config.ingest.forward_resolutions {
        subscriptions.push(
            ResolutionForwarder::new(registry.clone())
                .attach(bus.as_ref())
                .await?,
        );
    }
    for subscription in &subscriptions {
        info!(id = subscription.id(), pattern = subscription.pattern(), "Bus subscription active");
    }

    let (stop_tx, stop_rx) = watch::channel(false);

    let (ack_sender, acks) = ack_channel(ACK_QUEUE_DEPTH);
    let ack_task = tokio::spawn(coordinator.clone().run_acknowledgments(acks, stop_rx.clone()));
    if config.alerts.console_acks {
        // Blocking stdin reader; detached so it never holds up shutdown
        std::thread::spawn(move || {
            let queued = read_console_acks(std::io::stdin().lock(), &ack_sender);
            info!(queued, "Console acknowledgments closed");
        });
        info!("Acknowledge alerts on stdin: <callback> <chat_id> <username>");
    } else {
        drop(ack_sender);
    }

    let ingest = Ingest::new(
        registry,
        bus,
        IngestSettings {
            max_line_bytes: config.ingest.max_line_bytes,
        },
    );

    let status_task = config.status_interval().map(|every| {
        let reporter = StatusReporter::new(ingest.clone(), config.status_window());
        tokio::spawn(reporter.run(every, stop_rx.clone()))
    });

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind device listener on {}", addr))?;
    info!("Device endpoint: tcp://{}", addr);

    ingest.serve(listener, shutdown_signal()).await?;

    stop_tx.send_replace(true);
    if let Some(task) = status_task {
        let _ = task.await;
    }
    let _ = ack_task.await;
    for subscription in subscriptions {
        subscription.cancel();
    }

    info!("Gateway shutdown complete");
    Ok(())
}

fn open_store(config: &GatewayConfig, clock: Arc<dyn Clock>) -> Result<Arc<dyn FallEventStore>> {
    match &config.storage.path {
        Some(path) => {
            let store = RedbFallEventStore::open(path, clock)
                .with_context(|| format!("Failed to open {}", path.display()))?;
            Ok(Arc::new(store))
        }
        None => {
            warn!("No storage path configured, fall events are kept in memory");
            Ok(Arc::new(MemoryFallEventStore::new(clock)))
        }
    }
}

/// Print the most recent fall events for one board
async fn history(config: GatewayConfig, args: HistoryArgs) -> Result<()> {
    let path = args
        .db
        .or(config.storage.path)
        .context("No fall event database configured (set storage.path or pass --db)")?;
    let board = BoardId::new(args.board.as_str())
        .with_context(|| format!("Invalid board id: {:?}", args.board))?;

    let store = RedbFallEventStore::open(&path, SystemClock::shared())?;
    let events = store.recent(&board, args.limit).await?;

    if events.is_empty() {
        println!("No fall events recorded for board {}", board);
        return Ok(());
    }

    for event in events {
        let outcome = match (event.status, &event.resolved_by, event.resolved_at) {
            (FallStatus::Resolved, Some(by), Some(at)) => {
                format!("by @{} at {}", by, at.format("%Y-%m-%d %H:%M:%S"))
            }
            (FallStatus::Expired, _, Some(at)) => format!("at {}", at.format("%Y-%m-%d %H:%M:%S")),
            _ => String::new(),
        };
        println!(
            "#{:<6} {}  {:<8} {}",
            event.id.to_string(),
            event.detected_at.format("%Y-%m-%d %H:%M:%S"),
            event.status.to_string(),
            outcome
        );
    }

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down...");
        },
    }
}
