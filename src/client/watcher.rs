use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::api::UploadApi;
use crate::client::error::ClientError;

/// What the previous polls have seen
#[derive(Debug, Default, Clone, Copy)]
pub struct ChangeCursor {
    polled: bool,
    marker: Option<DateTime<Utc>>,
}

impl ChangeCursor {
    pub fn marker(&self) -> Option<DateTime<Utc>> {
        self.marker
    }
}

/// Polls the catalog change marker and reports when it advances
pub struct ChangeWatcher {
    api: Arc<dyn UploadApi>,
    interval: Duration,
}

impl ChangeWatcher {
    pub fn new(api: Arc<dyn UploadApi>, interval: Duration) -> Self {
        Self { api, interval }
    }

    /// Fetch the marker once.
    ///
    /// The first successful poll only records a baseline. Afterwards the new
    /// marker is returned whenever it is later than the one recorded.
    pub async fn poll_once(
        &self,
        cursor: &mut ChangeCursor,
    ) -> Result<Option<DateTime<Utc>>, ClientError> {
        let current = self.api.catalog_changes().await?;
        let baseline = !cursor.polled;
        cursor.polled = true;

        let advanced = match (cursor.marker, current) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(previous), Some(now)) => now > previous,
        };
        if !advanced {
            return Ok(None);
        }

        cursor.marker = current;
        Ok(if baseline { None } else { current })
    }

    /// Poll every interval until `cancel` fires, calling `on_change` on each advance
    pub async fn run<F>(&self, cancel: CancellationToken, mut on_change: F)
    where
        F: FnMut(DateTime<Utc>) + Send,
    {
        info!("Watching catalog changes every {:?}", self.interval);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cursor = ChangeCursor::default();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.poll_once(&mut cursor).await {
                Ok(Some(marker)) => {
                    debug!("Catalog changed at {}", marker);
                    on_change(marker);
                }
                Ok(None) => {}
                Err(e) => warn!("Catalog change poll failed: {}", e),
            }
        }

        debug!("Change watcher stopped");
    }
}
