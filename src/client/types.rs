use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

use crate::features::catalog::dtos::CatalogEntryDto;

/// Client-local transfer identity, assigned in enqueue order
pub type TransferId = u64;

/// Lifecycle of one transfer.
///
/// `Pending -> Processing -> Merging -> Completed`, with `Error` reachable
/// from `Processing` and `Merging`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Pending,
    Processing,
    Merging,
    Completed,
    Error,
}

impl TransferStatus {
    /// Holds one of the bounded concurrency slots
    pub fn is_active(self) -> bool {
        matches!(self, TransferStatus::Processing | TransferStatus::Merging)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TransferStatus::Completed | TransferStatus::Error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    Upload,
    Download,
}

/// A file to upload
#[derive(Debug, Clone)]
pub struct NewTransfer {
    pub path: PathBuf,
    /// Destination name, defaults to the source file name
    pub name: Option<String>,
    /// Destination folder, `None` for top level
    pub parent_id: Option<Uuid>,
    pub content_type: Option<String>,
}

impl NewTransfer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            name: None,
            parent_id: None,
            content_type: None,
        }
    }

    pub fn with_parent(mut self, parent_id: Option<Uuid>) -> Self {
        self.parent_id = parent_id;
        self
    }
}

/// Point-in-time view of one transfer
#[derive(Debug, Clone, Serialize)]
pub struct TransferSnapshot {
    pub id: TransferId,
    pub upload_id: String,
    pub name: String,
    pub size: u64,
    pub direction: TransferDirection,
    pub parent_id: Option<Uuid>,
    pub status: TransferStatus,
    pub bytes_transferred: u64,
    /// Index of the next chunk to send
    pub chunk_cursor: u32,
    pub total_chunks: u32,
    pub rate_bytes_per_sec: f64,
    /// Failed attempts for the current chunk
    pub retry_count: u32,
    pub error: Option<String>,
    pub entry: Option<CatalogEntryDto>,
}

/// Notifications published by the queue
#[derive(Debug, Clone)]
pub enum TransferEvent {
    Added {
        id: TransferId,
        name: String,
        size: u64,
    },
    StatusChanged {
        id: TransferId,
        status: TransferStatus,
    },
    Progress {
        id: TransferId,
        bytes_transferred: u64,
        total_bytes: u64,
        rate_bytes_per_sec: f64,
    },
    Retrying {
        id: TransferId,
        chunk_index: u32,
        attempt: u32,
        delay: Duration,
    },
    Completed {
        id: TransferId,
        entry: CatalogEntryDto,
    },
    Failed {
        id: TransferId,
        error: String,
    },
    Cancelled {
        id: TransferId,
    },
    Cleared {
        ids: Vec<TransferId>,
    },
}
