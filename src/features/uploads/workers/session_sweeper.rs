use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::interval;

use crate::core::error::Result;
use crate::features::uploads::dtos::SweepResultDto;
use crate::features::uploads::services::SessionStore;

/// Background worker that purges abandoned upload sessions
///
/// A session is stale once nothing has been written to it for longer than
/// the TTL. Cancelled client transfers leave their chunks behind; this is
/// what eventually reclaims them.
pub struct SessionSweeper {
    sessions: Arc<SessionStore>,
    ttl: Duration,
    period: Duration,
}

impl SessionSweeper {
    pub fn new(sessions: Arc<SessionStore>, ttl: Duration, period: Duration) -> Self {
        Self {
            sessions,
            ttl,
            period,
        }
    }

    /// Run the sweeper in a background loop
    pub async fn run(&self) {
        tracing::info!(
            "Starting upload session sweeper (ttl={}s, every {}s)",
            self.ttl.as_secs(),
            self.period.as_secs()
        );

        let mut interval = interval(self.period);

        loop {
            interval.tick().await;

            if let Err(e) = self.sweep_once().await {
                tracing::error!("Error sweeping upload sessions: {:?}", e);
            }
        }
    }

    /// Purge every session idle for at least the TTL
    pub async fn sweep_once(&self) -> Result<SweepResultDto> {
        let now = SystemTime::now();
        let ids = self.sessions.list_sessions().await?;
        let mut purged = Vec::new();

        for upload_id in &ids {
            let Some(modified) = self.sessions.last_activity(upload_id).await? else {
                continue;
            };
            // Clock skew yields an error here; treat such sessions as fresh
            let idle = now.duration_since(modified).unwrap_or_default();
            if idle < self.ttl {
                continue;
            }

            match self.sessions.purge(upload_id).await {
                Ok(true) => purged.push(upload_id.clone()),
                Ok(false) => {}
                Err(e) => tracing::error!("Failed to purge stale session {}: {:?}", upload_id, e),
            }
        }

        if !purged.is_empty() {
            tracing::info!(
                "Swept {} stale upload sessions out of {}",
                purged.len(),
                ids.len()
            );
        }

        Ok(SweepResultDto {
            scanned: ids.len(),
            purged,
        })
    }
}
