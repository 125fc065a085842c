//! # match-engine
//!
//! The matching pipeline: given a source entity and a set of candidate
//! target entities, score each target against the source using a
//! configurable set of search criteria, where each criterion is answered
//! by scoped vector retrieval followed by a two-step LLM evaluation.
//!
//! ## Core Types
//!
//! - [`config::MatchingConfiguration`] — normalized criteria for a run.
//! - [`plan::SearchPlan`] — the ordered plan derived from configuration.
//! - [`context::MatchingJobContext`] — a job's fully hydrated source and
//!   target bundles.
//! - [`aggregate::MatchCandidate`] — a scored target prior to persistence.
//! - [`runner::JobRunner`] — drives a job through its full lifecycle.
//!
//! ## Example Usage
//!
//! ```no_run
//! use match_engine::runner::JobRunner;
//!
//! # async fn example(runner: JobRunner<'_>, job_id: uuid::Uuid) -> Result<(), match_engine::error::MatchingError> {
//! runner.run_with_retry(job_id).await
//! # }
//! ```
//!
//! ## Observability
//!
//! Every stage emits `tracing` spans/events at `info`/`warn` level for
//! retries and skipped duplicate runs; structured audit rows and
//! realtime events (see [`events`]) carry the rest of the detail.

pub mod aggregate;
pub mod audit;
pub mod config;
pub mod context;
pub mod domain;
pub mod error;
pub mod evaluation;
pub mod events;
pub mod memory;
pub mod plan;
pub mod retry;
pub mod runner;
pub mod search;

pub use aggregate::MatchCandidate;
pub use config::{normalize_matching_config, MatchingConfiguration};
pub use context::{ContextLoader, MatchingJobContext};
pub use error::MatchingError;
pub use events::{MatchingJobEvent, Publisher};
pub use plan::{build_plan, SearchPlan};
pub use runner::JobRunner;
