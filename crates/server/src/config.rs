use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Server configuration, layered from `server.toml` (optional) and
/// `MATCHING_SERVER__*` environment variables.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Server bind address
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Maximum request body size in MB
    #[serde(default = "default_max_body_size_mb")]
    pub max_body_size_mb: usize,

    /// sqlx connection string for the matching job/audit database
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Base URL of the vector search provider
    #[serde(default = "default_vector_search_url")]
    pub vector_search_url: String,

    /// Base URL of the language model provider
    #[serde(default = "default_language_model_url")]
    pub language_model_url: String,

    /// Per-call deadline for vector search and LLM requests, in seconds
    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,

    /// Maximum matching updates returned per replay request
    #[serde(default = "default_updates_page_limit")]
    pub updates_page_limit: u32,

    /// Capacity of the in-process job queue channel
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub enable_cors: bool,

    /// Whether jobs publish through the realtime broadcast layer. When
    /// disabled, events are still persisted for replay via `/updates`
    /// but the websocket relay has nothing to subscribe to and closes
    /// with code 4000.
    #[serde(default = "default_true")]
    pub realtime_enabled: bool,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            port: default_port(),
            timeout_secs: default_timeout_secs(),
            max_body_size_mb: default_max_body_size_mb(),
            database_url: default_database_url(),
            vector_search_url: default_vector_search_url(),
            language_model_url: default_language_model_url(),
            provider_timeout_secs: default_provider_timeout_secs(),
            updates_page_limit: default_updates_page_limit(),
            queue_capacity: default_queue_capacity(),
            enable_cors: default_true(),
            realtime_enabled: default_true(),
            log_level: default_log_level(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables and an optional
    /// `server.toml`, falling back to defaults for anything unset.
    pub fn load() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let builder = config::Config::builder()
            .add_source(config::File::with_name("server").required(false))
            .add_source(config::Environment::with_prefix("MATCHING_SERVER").separator("__"));

        let config: ServerConfig = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        let addr_str = format!("{}:{}", self.bind_addr, self.port);
        Ok(addr_str.parse()?)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn max_body_size(&self) -> usize {
        self.max_body_size_mb * 1024 * 1024
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_body_size_mb() -> usize {
    10
}

fn default_database_url() -> String {
    "sqlite://matching.db".to_string()
}

fn default_vector_search_url() -> String {
    "http://localhost:9200".to_string()
}

fn default_language_model_url() -> String {
    "http://localhost:9300".to_string()
}

fn default_provider_timeout_secs() -> u64 {
    20
}

fn default_updates_page_limit() -> u32 {
    200
}

fn default_queue_capacity() -> usize {
    256
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.timeout_secs, 30);
        assert_eq!(cfg.updates_page_limit, 200);
        assert!(cfg.enable_cors);
    }

    #[test]
    fn test_socket_addr() {
        let cfg = ServerConfig::default();
        let addr = cfg.socket_addr().unwrap();
        assert_eq!(addr.port(), 8080);
    }
}
