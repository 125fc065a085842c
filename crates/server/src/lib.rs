//! HTTP and realtime surface for driving and observing matching jobs.
//!
//! This crate wires [`match_engine`]'s pipeline core to a sqlite-backed
//! persistence layer and a small axum surface: trigger a job, replay its
//! update log, or subscribe to its events over a websocket.
//!
//! # Endpoints
//!
//! - `POST /api/v1/matching-jobs/{id}/run` — enqueue a job
//! - `GET /api/v1/matching-jobs/{id}/updates?limit=<1..200>` — replay
//! - `GET /ws/matching-jobs/{id}/` — realtime relay (broadcast-only)
//! - `GET /`, `/health`, `/ready`, `/metrics`
//!
//! # Quick start
//!
//! ```rust,no_run
//! use server::ServerConfig;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::load()?;
//!     server::start_server(config).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod providers;
pub mod publisher;
pub mod queue;
pub mod routes;
pub mod server;
pub mod state;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use server::start_server;
pub use state::ServerState;
