use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use cloudvault_core::client::types::TransferStatus;
use cloudvault_core::client::{
    ChangeWatcher, ClientConfig, ClientError, HttpUploadApi, NewTransfer, TransferEvent,
    TransferQueue, UploadApi,
};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Upload files to CloudVault in resumable chunks",
    long_about = None
)]
struct Cli {
    /// Files to upload
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Destination folder id (top level when omitted)
    #[arg(long)]
    parent: Option<Uuid>,

    /// Transfers running at once (overrides UPLOAD_CONCURRENCY)
    #[arg(long)]
    concurrency: Option<usize>,

    /// Chunk size in bytes (overrides UPLOAD_CHUNK_SIZE)
    #[arg(long)]
    chunk_size: Option<u64>,

    /// Server base URL
    #[arg(long, env = "CLOUDVAULT_URL")]
    url: Option<String>,

    /// Keep running afterwards and report catalog changes
    #[arg(long)]
    watch: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = ClientConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;
    if let Some(url) = cli.url {
        config.base_url = url;
    }
    if let Some(concurrency) = cli.concurrency {
        config.queue.concurrency = concurrency.max(1);
    }
    if let Some(chunk_size) = cli.chunk_size {
        config.queue.chunk_size = chunk_size.max(1);
    }

    let api: Arc<dyn UploadApi> = Arc::new(HttpUploadApi::new(
        config.base_url.clone(),
        config.token.clone(),
    )?);
    let queue = TransferQueue::new(Arc::clone(&api), config.queue.clone());

    let printer = tokio::spawn(print_events(BroadcastStream::new(queue.subscribe())));

    let files = cli
        .files
        .into_iter()
        .map(|path| NewTransfer::new(path).with_parent(cli.parent))
        .collect();
    match queue.enqueue(files).await {
        Ok(ids) => println!("Queued {} file(s)", ids.len()),
        Err(ClientError::QuotaExceeded(details)) => {
            anyhow::bail!("Not enough storage space: {}", details);
        }
        Err(e) => return Err(e.into()),
    }

    tokio::select! {
        result = queue.wait_idle() => result?,
        _ = tokio::signal::ctrl_c() => {
            println!("Interrupted, cancelling transfers");
            abort_unfinished(&queue, api.as_ref()).await?;
        }
    }

    let snapshot = queue.snapshot().await?;
    let completed = snapshot
        .iter()
        .filter(|t| t.status == TransferStatus::Completed)
        .count();
    let failed: Vec<_> = snapshot
        .iter()
        .filter(|t| t.status == TransferStatus::Error)
        .collect();
    println!("{} completed, {} failed", completed, failed.len());
    for transfer in &failed {
        println!(
            "  {}: {}",
            transfer.name,
            transfer.error.as_deref().unwrap_or("unknown error")
        );
    }

    if cli.watch {
        let cancel = CancellationToken::new();
        let stop = cancel.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            stop.cancel();
        });

        println!(
            "Watching for catalog changes every {:?} (Ctrl-C to stop)",
            config.watch_interval
        );
        ChangeWatcher::new(Arc::clone(&api), config.watch_interval)
            .run(cancel, |marker| println!("Catalog changed at {}", marker))
            .await;
    }

    drop(queue);
    printer.abort();

    if !failed.is_empty() {
        anyhow::bail!("{} upload(s) failed", failed.len());
    }
    Ok(())
}

/// Cancel every transfer still running and drop its server-side session
async fn abort_unfinished(queue: &TransferQueue, api: &dyn UploadApi) -> anyhow::Result<()> {
    for transfer in queue.snapshot().await? {
        if transfer.status.is_terminal() {
            continue;
        }
        queue.cancel(transfer.id).await?;
        match api.abort(&transfer.upload_id).await {
            Ok(true) => println!("  {}: session discarded", transfer.name),
            Ok(false) => {}
            Err(e) => eprintln!("  {}: failed to discard session: {}", transfer.name, e),
        }
    }
    Ok(())
}

async fn print_events(mut events: BroadcastStream<TransferEvent>) {
    while let Some(event) = events.next().await {
        // Lagging only drops progress lines
        let Ok(event) = event else { continue };
        match event {
            TransferEvent::Added { id, name, size } => {
                println!("[{}] {} ({})", id, name, format_bytes(size as f64));
            }
            TransferEvent::Progress {
                id,
                bytes_transferred,
                total_bytes,
                rate_bytes_per_sec,
            } => {
                let percent = if total_bytes == 0 {
                    100.0
                } else {
                    bytes_transferred as f64 * 100.0 / total_bytes as f64
                };
                println!(
                    "[{}] {:5.1}%  {}/s",
                    id,
                    percent,
                    format_bytes(rate_bytes_per_sec)
                );
            }
            TransferEvent::Retrying {
                id,
                chunk_index,
                attempt,
                delay,
            } => {
                println!(
                    "[{}] chunk {} failed (attempt {}), retrying in {:?}",
                    id, chunk_index, attempt, delay
                );
            }
            TransferEvent::StatusChanged {
                id,
                status: TransferStatus::Merging,
            } => println!("[{}] assembling", id),
            TransferEvent::Completed { id, entry } => {
                println!("[{}] done: {} ({})", id, entry.name, entry.id);
            }
            TransferEvent::Failed { id, error } => println!("[{}] failed: {}", id, error),
            TransferEvent::Cancelled { id } => println!("[{}] cancelled", id),
            _ => {}
        }
    }
}

fn format_bytes(bytes: f64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{:.0} {}", value, UNITS[unit])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
