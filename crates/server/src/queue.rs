//! In-process job queue standing in for a durable task broker.
//!
//! Triggering a job pushes its id onto a bounded `mpsc` channel; a single
//! worker task pops ids and drives them through
//! [`JobRunner::run_with_retry`] one at a time. Multiple in-flight jobs
//! do not contend with each other beyond this queue's
//! capacity: providers are built fresh per run, never shared.

use std::sync::Arc;

use match_engine::events::Publisher;
use match_engine::retry::RetryPolicy;
use match_engine::runner::JobRunner;
use tokio::sync::mpsc;
use tracing::{error, info};
use uuid::Uuid;

use crate::providers::HttpProviderFactory;
use crate::publisher::BroadcastPublisher;
use crate::state::ServerState;

/// Drain queued job ids one at a time, driving each through
/// [`JobRunner::run_with_retry`]. The caller owns channel construction
/// since `ServerState` itself needs the sender half to exist first.
pub async fn run_worker(state: ServerState, mut rx: mpsc::Receiver<Uuid>) {
    while let Some(job_id) = rx.recv().await {
        if let Err(err) = run_job(&state, job_id).await {
            error!(job_id = %job_id, error = %err, "matching job failed after exhausting retries");
        }
    }
    info!("matching job queue worker exiting: channel closed");
}

async fn run_job(state: &ServerState, job_id: Uuid) -> Result<(), match_engine::error::MatchingError> {
    let providers = HttpProviderFactory::new(
        state.config.vector_search_url.clone(),
        state.config.language_model_url.clone(),
        state.provider_timeout(),
    );
    let publisher: Arc<dyn Publisher> = if state.has_broadcast_layer() {
        Arc::new(BroadcastPublisher::new(state.db.clone(), state.broadcast_groups.clone()))
    } else {
        Arc::new(BroadcastPublisher::persist_only(state.db.clone()))
    };

    let runner = JobRunner {
        jobs: state.db.as_ref(),
        context: state.db.as_ref(),
        providers: &providers,
        audit: state.db.as_ref(),
        publisher: publisher.as_ref(),
        matches: state.db.as_ref(),
        retry_policy: RetryPolicy::default(),
    };

    info!(job_id = %job_id, "starting matching job run");
    runner.run_with_retry(job_id).await
}
