use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::db::Db;
use crate::error::ServerResult;
use match_engine::events::MatchingJobEvent;

/// Capacity of each per-job broadcast channel. Slow subscribers lose the
/// oldest frames rather than blocking the publisher.
const JOB_BROADCAST_CAPACITY: usize = 256;

/// Shared application state: the database handle, the job queue's send
/// half, and the realtime broadcast registry the WebSocket route and
/// the publisher both reach into.
#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<ServerConfig>,
    pub db: Arc<Db>,
    pub queue_tx: mpsc::Sender<Uuid>,
    pub broadcast_groups: Arc<DashMap<Uuid, broadcast::Sender<MatchingJobEvent>>>,
}

impl ServerState {
    pub async fn new(config: ServerConfig, queue_tx: mpsc::Sender<Uuid>) -> ServerResult<Self> {
        let db = Db::connect(&config.database_url).await?;
        db.migrate().await?;

        Ok(Self {
            config: Arc::new(config),
            db: Arc::new(db),
            queue_tx,
            broadcast_groups: Arc::new(DashMap::new()),
        })
    }

    /// Fetch or create the broadcast sender a job's subscribers and
    /// publisher share. Created lazily so jobs nobody is watching never
    /// pay for a channel.
    pub fn broadcast_sender(&self, job_id: Uuid) -> broadcast::Sender<MatchingJobEvent> {
        self.broadcast_groups
            .entry(job_id)
            .or_insert_with(|| broadcast::channel(JOB_BROADCAST_CAPACITY).0)
            .clone()
    }

    /// Whether this server was configured with a realtime broadcast
    /// layer at all. When disabled, jobs publish through the null
    /// transport and no job will ever have a broadcast group to join.
    pub fn has_broadcast_layer(&self) -> bool {
        self.config.realtime_enabled
    }

    pub fn provider_timeout(&self) -> Duration {
        self.config.provider_timeout()
    }
}

/// Server metadata for health checks.
#[derive(Debug, serde::Serialize)]
pub struct ServerMetadata {
    pub version: String,
    pub uptime_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_state(realtime_enabled: bool) -> ServerState {
        let dir: &'static tempfile::TempDir = Box::leak(Box::new(tempfile::tempdir().expect("tempdir")));
        let database_url = format!("sqlite://{}?mode=rwc", dir.path().join("matching.db").display());
        let (queue_tx, _rx) = mpsc::channel(1);
        let config = ServerConfig { database_url, realtime_enabled, ..ServerConfig::default() };
        ServerState::new(config, queue_tx).await.expect("state")
    }

    #[tokio::test]
    async fn has_broadcast_layer_reflects_config() {
        assert!(test_state(true).await.has_broadcast_layer());
        assert!(!test_state(false).await.has_broadcast_layer());
    }
}
