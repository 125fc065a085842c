//! Broadcast publisher: persists then fans out every emitted event.
//!
//! Every event is persisted as a [`MatchingJobUpdate`] row first, then
//! best-effort fanned out to the job's realtime subscriber group. A
//! publish never fails the pipeline: transport and persistence errors are
//! logged and swallowed. When no broadcast group registry is configured
//! (`groups: None`), persistence still happens so `/updates` replay keeps
//! working; there is simply nothing to fan out to.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use match_engine::events::{group_name_for_job, MatchingJobEvent, Publisher};
use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

use crate::db::Db;

pub struct BroadcastPublisher {
    db: Arc<Db>,
    groups: Option<Arc<DashMap<Uuid, broadcast::Sender<MatchingJobEvent>>>>,
}

impl BroadcastPublisher {
    pub fn new(db: Arc<Db>, groups: Arc<DashMap<Uuid, broadcast::Sender<MatchingJobEvent>>>) -> Self {
        Self { db, groups: Some(groups) }
    }

    /// Persists updates for replay but never fans out, for servers
    /// configured with no realtime broadcast layer.
    pub fn persist_only(db: Arc<Db>) -> Self {
        Self { db, groups: None }
    }
}

#[async_trait]
impl Publisher for BroadcastPublisher {
    async fn publish(&self, event: MatchingJobEvent) {
        if let Err(err) = self.db.record_update(&event).await {
            warn!(job_id = %event.job_id, error = %err, "failed to persist matching job update");
        }

        let Some(groups) = &self.groups else { return };
        if let Some(sender) = groups.get(&event.job_id) {
            let group = group_name_for_job(event.job_id);
            // A send error here just means nobody is subscribed right now.
            let _ = sender.send(event).map_err(|_| warn!(%group, "no active subscribers for job broadcast group"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;
    use chrono::Utc;
    use match_engine::events::{JobStatusWire, MatchingJobEventPayload};

    async fn test_db() -> Arc<Db> {
        let dir: &'static tempfile::TempDir = Box::leak(Box::new(tempfile::tempdir().expect("tempdir")));
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("matching.db").display());
        let db = Db::connect(&url).await.expect("connect");
        db.migrate().await.expect("migrate");
        Arc::new(db)
    }

    #[tokio::test]
    async fn publish_persists_and_fans_out_to_subscribers() {
        let db = test_db().await;
        let groups: Arc<DashMap<Uuid, broadcast::Sender<MatchingJobEvent>>> = Arc::new(DashMap::new());
        let job_id = Uuid::new_v4();
        let (tx, mut rx) = broadcast::channel(16);
        groups.insert(job_id, tx);

        let publisher = BroadcastPublisher::new(db.clone(), groups);
        let event = MatchingJobEvent {
            job_id,
            run_id: None,
            timestamp: Utc::now(),
            payload: MatchingJobEventPayload::Status { status: JobStatusWire::Running, error_message: None },
        };
        publisher.publish(event.clone()).await;

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);

        let updates = db.recent_updates(job_id, 10).await.unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].event_type, "matching.job.status");
    }

    #[tokio::test]
    async fn persist_only_publisher_persists_without_groups() {
        let db = test_db().await;
        let job_id = Uuid::new_v4();

        let publisher = BroadcastPublisher::persist_only(db.clone());
        let event = MatchingJobEvent {
            job_id,
            run_id: None,
            timestamp: Utc::now(),
            payload: MatchingJobEventPayload::Status { status: JobStatusWire::Running, error_message: None },
        };
        publisher.publish(event).await;

        let updates = db.recent_updates(job_id, 10).await.unwrap();
        assert_eq!(updates.len(), 1);
    }

    #[tokio::test]
    async fn publish_without_subscribers_still_persists() {
        let db = test_db().await;
        let groups: Arc<DashMap<Uuid, broadcast::Sender<MatchingJobEvent>>> = Arc::new(DashMap::new());
        let job_id = Uuid::new_v4();

        let publisher = BroadcastPublisher::new(db.clone(), groups);
        let event = MatchingJobEvent {
            job_id,
            run_id: None,
            timestamp: Utc::now(),
            payload: MatchingJobEventPayload::Status { status: JobStatusWire::Complete, error_message: None },
        };
        publisher.publish(event).await;

        let updates = db.recent_updates(job_id, 10).await.unwrap();
        assert_eq!(updates.len(), 1);
    }
}
