use brook_core::{BrookConfig, RemoteStoreConfig, RemoteStoreKind, SystemClock};
use brook_storage::object_store::{LocalObjectStore, ObjectStore, S3Config, S3ObjectStore};
use brook_storage::{BufferPool, IngestRecord, LogBufferPool, MetricBufferPool, SpanBufferPool};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

mod inspect;

#[derive(Parser, Debug)]
#[command(name = "brook-ingestd")]
#[command(about = "Durable telemetry ingestion daemon", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ./config/brook.yaml or $BROOK_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Recover every buffer pool and run the scheduler until interrupted
    Run,

    /// Print the segments and a replay summary of one stream WAL
    InspectWal {
        /// Stream WAL directory ({data_dir}/wal/{tenant~kind~name})
        #[arg(long)]
        dir: PathBuf,

        /// First LSN to replay
        #[arg(long, default_value_t = 1)]
        from: u64,
    },

    /// List on-disk partitions and the checkpoint status of their artifacts
    Partitions {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let cli = Cli::parse();
    let config = BrookConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run => run(config).await?,
        Commands::InspectWal { dir, from } => inspect::inspect_wal(&config, &dir, from)?,
        Commands::Partitions { json } => inspect::list_partitions(&config, json).await?,
    }

    Ok(())
}

async fn run(config: BrookConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(data_dir = %config.storage.data_dir.display(), "Starting brook-ingestd");

    let store = build_store(&config.upload.remote).await?;
    let clock = Arc::new(SystemClock);

    let logs = LogBufferPool::open(config.clone(), Arc::clone(&store), clock.clone()).await?;
    let metrics = MetricBufferPool::open(config.clone(), Arc::clone(&store), clock.clone()).await?;
    let traces = SpanBufferPool::open(config, store, clock).await?;

    report_recovery(&logs);
    report_recovery(&metrics);
    report_recovery(&traces);

    logs.start_scheduler();
    metrics.start_scheduler();
    traces.start_scheduler();

    shutdown_signal().await;

    let mut failed = false;
    for result in [logs.shutdown().await, metrics.shutdown().await, traces.shutdown().await] {
        if let Err(e) = result {
            error!(error = %e, "Buffer pool shutdown failed");
            failed = true;
        }
    }
    if failed {
        return Err("one or more buffer pools did not shut down cleanly".into());
    }

    info!("brook-ingestd shutdown complete");
    Ok(())
}

async fn build_store(
    remote: &RemoteStoreConfig,
) -> Result<Arc<dyn ObjectStore>, Box<dyn std::error::Error>> {
    let store: Arc<dyn ObjectStore> = match remote.kind {
        RemoteStoreKind::Local => Arc::new(LocalObjectStore::new(&remote.local_dir).await?),
        RemoteStoreKind::S3 => Arc::new(S3ObjectStore::new(S3Config::from_remote(remote)).await?),
    };
    info!(kind = ?remote.kind, "Object store ready");
    Ok(store)
}

fn report_recovery<R: IngestRecord>(pool: &BufferPool<R>) {
    let recovery = pool.recovery();
    info!(
        kind = R::KIND.as_str(),
        streams = recovery.streams,
        pending_uploads = recovery.artifacts,
        replayed = recovery.replayed,
        quarantined = recovery.quarantined,
        "Buffer pool ready"
    );
}

/// Waits for CTRL+C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for CTRL+C");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C signal, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM signal, initiating graceful shutdown");
        }
    }
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).with_target(false).init();
}
