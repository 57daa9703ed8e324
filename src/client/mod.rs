//! Upload client: splits local files into chunks and drives them through the
//! server's chunked upload API with bounded concurrency and retries.

pub mod api;
pub mod config;
pub mod error;
pub mod progress;
pub mod queue;
pub mod retry;
pub mod splitter;
pub mod types;
pub mod watcher;

#[cfg(test)]
pub(crate) mod test_support;

pub use api::{HttpUploadApi, UploadApi};
pub use config::ClientConfig;
pub use error::ClientError;
pub use queue::{QueueConfig, TransferQueue};
pub use types::{NewTransfer, TransferEvent, TransferId, TransferSnapshot, TransferStatus};
pub use watcher::ChangeWatcher;
