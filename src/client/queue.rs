//! Bounded-concurrency upload scheduler
//!
//! One actor task owns the state of every transfer. Chunk uploads, backoff
//! timers and completion calls run as spawned tasks that report back over a
//! channel; the actor applies each report as a single transition and then
//! re-evaluates admission, so freed slots are reused immediately.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::client::api::{ChunkRequest, UploadApi};
use crate::client::error::ClientError;
use crate::client::progress::RateEstimator;
use crate::client::retry::RetryPolicy;
use crate::client::splitter::{read_chunk, split, ChunkRange};
use crate::client::types::{
    NewTransfer, TransferDirection, TransferEvent, TransferId, TransferSnapshot, TransferStatus,
};
use crate::features::catalog::dtos::CatalogEntryDto;
use crate::features::quota::dtos::QuotaExceededDto;
use crate::features::uploads::dtos::{ChunkAckDto, CompleteUploadDto};
use crate::shared::constants::{
    DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_TIMEOUT_SECS, DEFAULT_MAX_CHUNK_ATTEMPTS,
    DEFAULT_MAX_CONCURRENT_TRANSFERS,
};

const EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub chunk_size: u64,
    /// Transfers allowed in `Processing`/`Merging` at once
    pub concurrency: usize,
    /// Attempts per chunk before the transfer fails
    pub max_attempts: u32,
    pub retry: RetryPolicy,
    /// Upper bound on a single chunk request
    pub chunk_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            concurrency: DEFAULT_MAX_CONCURRENT_TRANSFERS,
            max_attempts: DEFAULT_MAX_CHUNK_ATTEMPTS,
            retry: RetryPolicy::default(),
            chunk_timeout: Duration::from_secs(DEFAULT_CHUNK_TIMEOUT_SECS),
        }
    }
}

/// Handle to the queue. Cloning shares the same queue.
#[derive(Clone)]
pub struct TransferQueue {
    api: Arc<dyn UploadApi>,
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<TransferEvent>,
}

/// A file that passed pre-flight and awaits an id
struct Admission {
    path: PathBuf,
    name: String,
    size: u64,
    parent_id: Option<Uuid>,
    content_type: Option<String>,
}

enum Command {
    Admit {
        files: Vec<Admission>,
        reply: oneshot::Sender<Vec<TransferId>>,
    },
    Cancel {
        id: TransferId,
        reply: oneshot::Sender<bool>,
    },
    ClearFinished {
        reply: oneshot::Sender<Vec<TransferId>>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<TransferSnapshot>>,
    },
    WhenIdle {
        reply: oneshot::Sender<()>,
    },
}

/// Outcomes reported by spawned tasks
enum Report {
    ChunkStored {
        id: TransferId,
        chunk_index: u32,
        bytes: u64,
        elapsed: Duration,
    },
    ChunkFailed {
        id: TransferId,
        chunk_index: u32,
        error: ClientError,
    },
    RetryDue {
        id: TransferId,
    },
    Merged {
        id: TransferId,
        result: Result<CatalogEntryDto, ClientError>,
    },
}

impl TransferQueue {
    /// Start the queue actor on the current tokio runtime
    pub fn new(api: Arc<dyn UploadApi>, config: QueueConfig) -> Self {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (reports, reports_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let actor = QueueActor {
            api: api.clone(),
            config,
            transfers: BTreeMap::new(),
            next_id: 1,
            events: events.clone(),
            reports,
            idle_waiters: Vec::new(),
        };
        tokio::spawn(actor.run(commands_rx, reports_rx));

        Self {
            api,
            commands,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransferEvent> {
        self.events.subscribe()
    }

    /// Admit files as one batch.
    ///
    /// The advisory quota check runs once against the combined size; a
    /// denial rejects the whole batch and nothing is queued.
    pub async fn enqueue(&self, files: Vec<NewTransfer>) -> Result<Vec<TransferId>, ClientError> {
        if files.is_empty() {
            return Ok(Vec::new());
        }

        let mut admissions = Vec::with_capacity(files.len());
        for file in files {
            admissions.push(prepare(file).await?);
        }

        let sizes = admissions
            .iter()
            .map(|a| i64::try_from(a.size))
            .collect::<Result<Vec<i64>, _>>()
            .map_err(|_| ClientError::InvalidResponse("file size out of range".to_string()))?;

        let check = match sizes.as_slice() {
            [size] => self.api.check_quota(*size).await?,
            _ => self.api.check_quota_batch(&sizes).await?,
        };
        if !check.admit {
            warn!(
                "Batch of {} file(s) rejected by pre-flight: {} bytes requested, {} available",
                admissions.len(),
                check.requested,
                check.available
            );
            return Err(ClientError::QuotaExceeded(QuotaExceededDto::from(check)));
        }

        self.request(|reply| Command::Admit {
            files: admissions,
            reply,
        })
        .await
    }

    /// Abort a transfer's in-flight call and drop it. `false` if unknown.
    pub async fn cancel(&self, id: TransferId) -> Result<bool, ClientError> {
        self.request(|reply| Command::Cancel { id, reply }).await
    }

    /// Remove completed and failed transfers, returning their ids
    pub async fn clear_finished(&self) -> Result<Vec<TransferId>, ClientError> {
        self.request(|reply| Command::ClearFinished { reply }).await
    }

    pub async fn snapshot(&self) -> Result<Vec<TransferSnapshot>, ClientError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Resolve once no transfer is pending, processing or merging
    pub async fn wait_idle(&self) -> Result<(), ClientError> {
        self.request(|reply| Command::WhenIdle { reply }).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| ClientError::QueueClosed)?;
        rx.await.map_err(|_| ClientError::QueueClosed)
    }
}

async fn prepare(file: NewTransfer) -> Result<Admission, ClientError> {
    let metadata = tokio::fs::metadata(&file.path).await?;
    if !metadata.is_file() {
        return Err(ClientError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} is not a regular file", file.path.display()),
        )));
    }

    let name = match file.name {
        Some(name) => name,
        None => file
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                ClientError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("{} has no file name", file.path.display()),
                ))
            })?,
    };

    Ok(Admission {
        path: file.path,
        name,
        size: metadata.len(),
        parent_id: file.parent_id,
        content_type: file.content_type,
    })
}

struct Transfer {
    id: TransferId,
    upload_id: String,
    path: PathBuf,
    name: String,
    size: u64,
    parent_id: Option<Uuid>,
    content_type: Option<String>,
    status: TransferStatus,
    ranges: Vec<ChunkRange>,
    cursor: u32,
    bytes_transferred: u64,
    rate: RateEstimator,
    retry_count: u32,
    error: Option<String>,
    entry: Option<CatalogEntryDto>,
    cancel: CancellationToken,
}

impl Transfer {
    fn total_chunks(&self) -> u32 {
        self.ranges.len() as u32
    }

    fn snapshot(&self) -> TransferSnapshot {
        TransferSnapshot {
            id: self.id,
            upload_id: self.upload_id.clone(),
            name: self.name.clone(),
            size: self.size,
            direction: TransferDirection::Upload,
            parent_id: self.parent_id,
            status: self.status,
            bytes_transferred: self.bytes_transferred,
            chunk_cursor: self.cursor,
            total_chunks: self.total_chunks(),
            rate_bytes_per_sec: self.rate.bytes_per_second(),
            retry_count: self.retry_count,
            error: self.error.clone(),
            entry: self.entry.clone(),
        }
    }
}

struct QueueActor {
    api: Arc<dyn UploadApi>,
    config: QueueConfig,
    transfers: BTreeMap<TransferId, Transfer>,
    next_id: TransferId,
    events: broadcast::Sender<TransferEvent>,
    reports: mpsc::UnboundedSender<Report>,
    idle_waiters: Vec<oneshot::Sender<()>>,
}

impl QueueActor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut reports: mpsc::UnboundedReceiver<Report>,
    ) {
        let mut open = true;

        loop {
            tokio::select! {
                command = commands.recv(), if open => match command {
                    Some(command) => self.handle_command(command),
                    None => open = false,
                },
                Some(report) = reports.recv() => self.handle_report(report),
                else => break,
            }

            self.schedule();
            self.notify_idle();

            if !open && !self.has_unfinished() {
                break;
            }
        }

        debug!("Transfer queue stopped");
    }

    fn emit(&self, event: TransferEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn has_unfinished(&self) -> bool {
        self.transfers.values().any(|t| !t.status.is_terminal())
    }

    fn notify_idle(&mut self) {
        if self.has_unfinished() {
            return;
        }
        for waiter in self.idle_waiters.drain(..) {
            let _ = waiter.send(());
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Admit { files, reply } => {
                let ids = files.into_iter().map(|file| self.admit(file)).collect();
                let _ = reply.send(ids);
            }
            Command::Cancel { id, reply } => {
                let _ = reply.send(self.cancel(id));
            }
            Command::ClearFinished { reply } => {
                let ids: Vec<TransferId> = self
                    .transfers
                    .values()
                    .filter(|t| t.status.is_terminal())
                    .map(|t| t.id)
                    .collect();
                for id in &ids {
                    self.transfers.remove(id);
                }
                if !ids.is_empty() {
                    self.emit(TransferEvent::Cleared { ids: ids.clone() });
                }
                let _ = reply.send(ids);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.transfers.values().map(Transfer::snapshot).collect());
            }
            Command::WhenIdle { reply } => self.idle_waiters.push(reply),
        }
    }

    fn admit(&mut self, file: Admission) -> TransferId {
        let id = self.next_id;
        self.next_id += 1;

        let transfer = Transfer {
            id,
            upload_id: Uuid::now_v7().to_string(),
            ranges: split(file.size, self.config.chunk_size),
            path: file.path,
            name: file.name,
            size: file.size,
            parent_id: file.parent_id,
            content_type: file.content_type,
            status: TransferStatus::Pending,
            cursor: 0,
            bytes_transferred: 0,
            rate: RateEstimator::default(),
            retry_count: 0,
            error: None,
            entry: None,
            cancel: CancellationToken::new(),
        };

        info!(
            "Queued transfer {} ({}, {} bytes, {} chunks)",
            id,
            transfer.name,
            transfer.size,
            transfer.total_chunks()
        );
        self.emit(TransferEvent::Added {
            id,
            name: transfer.name.clone(),
            size: transfer.size,
        });
        self.transfers.insert(id, transfer);
        id
    }

    fn cancel(&mut self, id: TransferId) -> bool {
        let Some(transfer) = self.transfers.remove(&id) else {
            return false;
        };

        transfer.cancel.cancel();
        info!("Cancelled transfer {} ({})", id, transfer.name);
        self.emit(TransferEvent::Cancelled { id });
        true
    }

    /// Promote pending transfers in enqueue order while slots are free
    fn schedule(&mut self) {
        let active = self
            .transfers
            .values()
            .filter(|t| t.status.is_active())
            .count();
        let free = self.config.concurrency.saturating_sub(active);
        if free == 0 {
            return;
        }

        let ready: Vec<TransferId> = self
            .transfers
            .values()
            .filter(|t| t.status == TransferStatus::Pending)
            .map(|t| t.id)
            .take(free)
            .collect();

        for id in ready {
            self.set_status(id, TransferStatus::Processing);
            self.spawn_chunk(id);
        }
    }

    fn set_status(&mut self, id: TransferId, status: TransferStatus) {
        let Some(transfer) = self.transfers.get_mut(&id) else {
            return;
        };
        transfer.status = status;
        debug!("Transfer {} is now {:?}", id, status);
        self.emit(TransferEvent::StatusChanged { id, status });
    }

    fn fail(&mut self, id: TransferId, message: String) {
        if let Some(transfer) = self.transfers.get_mut(&id) {
            error!("Transfer {} ({}) failed: {}", id, transfer.name, message);
            transfer.error = Some(message.clone());
        }
        self.set_status(id, TransferStatus::Error);
        self.emit(TransferEvent::Failed { id, error: message });
    }

    fn spawn_chunk(&self, id: TransferId) {
        let Some(transfer) = self.transfers.get(&id) else {
            return;
        };
        let Some(range) = transfer.ranges.get(transfer.cursor as usize).copied() else {
            return;
        };

        let chunk = ChunkMeta {
            upload_id: transfer.upload_id.clone(),
            total_chunks: transfer.total_chunks(),
            file_name: transfer.name.clone(),
            parent_id: transfer.parent_id,
        };
        let path = transfer.path.clone();
        let token = transfer.cancel.clone();
        let api = self.api.clone();
        let reports = self.reports.clone();
        let timeout = self.config.chunk_timeout;

        tokio::spawn(async move {
            let started = Instant::now();
            let send = send_chunk(api, path, range, chunk);
            let outcome = tokio::select! {
                _ = token.cancelled() => return,
                outcome = tokio::time::timeout(timeout, send) => outcome,
            };

            let report = match outcome {
                Ok(Ok(_)) => Report::ChunkStored {
                    id,
                    chunk_index: range.index,
                    bytes: range.len,
                    elapsed: started.elapsed(),
                },
                Ok(Err(error)) => Report::ChunkFailed {
                    id,
                    chunk_index: range.index,
                    error,
                },
                Err(_) => Report::ChunkFailed {
                    id,
                    chunk_index: range.index,
                    error: ClientError::Timeout(timeout),
                },
            };
            let _ = reports.send(report);
        });
    }

    fn spawn_merge(&self, id: TransferId) {
        let Some(transfer) = self.transfers.get(&id) else {
            return;
        };

        let request = CompleteUploadDto {
            upload_id: transfer.upload_id.clone(),
            file_name: transfer.name.clone(),
            parent_id: transfer.parent_id,
            total_chunks: transfer.total_chunks(),
            content_type: transfer.content_type.clone(),
            file_size: transfer.size as i64,
        };
        let token = transfer.cancel.clone();
        let api = self.api.clone();
        let reports = self.reports.clone();

        tokio::spawn(async move {
            let result = tokio::select! {
                _ = token.cancelled() => return,
                result = api.complete(&request) => result,
            };
            let _ = reports.send(Report::Merged { id, result });
        });
    }

    fn spawn_retry(&self, id: TransferId, delay: Duration) {
        let Some(transfer) = self.transfers.get(&id) else {
            return;
        };
        let token = transfer.cancel.clone();
        let reports = self.reports.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = reports.send(Report::RetryDue { id });
                }
            }
        });
    }

    fn handle_report(&mut self, report: Report) {
        match report {
            Report::ChunkStored {
                id,
                chunk_index,
                bytes,
                elapsed,
            } => self.on_chunk_stored(id, chunk_index, bytes, elapsed),
            Report::ChunkFailed {
                id,
                chunk_index,
                error,
            } => self.on_chunk_failed(id, chunk_index, error),
            Report::RetryDue { id } => {
                let processing = self
                    .transfers
                    .get(&id)
                    .is_some_and(|t| t.status == TransferStatus::Processing);
                if processing {
                    self.spawn_chunk(id);
                }
            }
            Report::Merged { id, result } => self.on_merged(id, result),
        }
    }

    fn on_chunk_stored(&mut self, id: TransferId, chunk_index: u32, bytes: u64, elapsed: Duration) {
        // Cancelled transfers are gone from the map and stay gone
        let Some(transfer) = self.transfers.get_mut(&id) else {
            return;
        };
        if transfer.status != TransferStatus::Processing || transfer.cursor != chunk_index {
            return;
        }

        transfer.cursor += 1;
        transfer.bytes_transferred += bytes;
        transfer.retry_count = 0;
        let rate = transfer.rate.record(bytes, elapsed);
        let done = transfer.cursor >= transfer.total_chunks();
        let progress = TransferEvent::Progress {
            id,
            bytes_transferred: transfer.bytes_transferred,
            total_bytes: transfer.size,
            rate_bytes_per_sec: rate,
        };
        self.emit(progress);

        if done {
            self.set_status(id, TransferStatus::Merging);
            self.spawn_merge(id);
        } else {
            self.spawn_chunk(id);
        }
    }

    fn on_chunk_failed(&mut self, id: TransferId, chunk_index: u32, error: ClientError) {
        let max_attempts = self.config.max_attempts;
        let Some(transfer) = self.transfers.get_mut(&id) else {
            return;
        };
        if transfer.status != TransferStatus::Processing || transfer.cursor != chunk_index {
            return;
        }

        transfer.retry_count += 1;
        let attempts = transfer.retry_count;

        if !error.is_retryable() || attempts >= max_attempts {
            let message = format!(
                "chunk {} of {} failed after {} attempt(s): {}",
                chunk_index,
                transfer.total_chunks(),
                attempts,
                error
            );
            self.fail(id, message);
            return;
        }

        let delay = self.config.retry.delay_for(attempts - 1);
        warn!(
            "Chunk {} of transfer {} failed (attempt {}/{}), retrying in {:?}: {}",
            chunk_index, id, attempts, max_attempts, delay, error
        );
        self.emit(TransferEvent::Retrying {
            id,
            chunk_index,
            attempt: attempts,
            delay,
        });
        self.spawn_retry(id, delay);
    }

    fn on_merged(&mut self, id: TransferId, result: Result<CatalogEntryDto, ClientError>) {
        let Some(transfer) = self.transfers.get_mut(&id) else {
            return;
        };
        if transfer.status != TransferStatus::Merging {
            return;
        }

        match result {
            Ok(entry) => {
                info!(
                    "Transfer {} ({}) completed as {}",
                    id, transfer.name, entry.id
                );
                transfer.entry = Some(entry.clone());
                self.set_status(id, TransferStatus::Completed);
                self.emit(TransferEvent::Completed { id, entry });
            }
            Err(e) => self.fail(id, format!("assembly failed: {}", e)),
        }
    }
}

/// Session fields repeated on every chunk request
struct ChunkMeta {
    upload_id: String,
    total_chunks: u32,
    file_name: String,
    parent_id: Option<Uuid>,
}

async fn send_chunk(
    api: Arc<dyn UploadApi>,
    path: PathBuf,
    range: ChunkRange,
    chunk: ChunkMeta,
) -> Result<ChunkAckDto, ClientError> {
    let data = read_chunk(&path, &range).await?;
    api.upload_chunk(ChunkRequest {
        upload_id: chunk.upload_id,
        chunk_index: range.index,
        total_chunks: chunk.total_chunks,
        file_name: chunk.file_name,
        parent_id: chunk.parent_id,
        data,
    })
    .await
}
