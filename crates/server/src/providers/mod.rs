//! HTTP-backed implementations of the vector searcher and language model
//! provider contracts.
//!
//! Both clients are built fresh per [`ProviderFactory::build`] call and
//! dropped on release: one run never shares a client with another.

pub mod llm;
pub mod vector;

pub use llm::HttpLanguageModel;
pub use vector::HttpVectorSearcher;

use async_trait::async_trait;
use match_engine::error::MatchingError;
use match_engine::runner::{ProviderFactory, ProviderHandle};
use std::time::Duration;

/// Builds a fresh [`HttpVectorSearcher`] + [`HttpLanguageModel`] pair per
/// run, pointed at the configured provider base URLs.
pub struct HttpProviderFactory {
    vector_search_url: String,
    language_model_url: String,
    timeout: Duration,
}

impl HttpProviderFactory {
    pub fn new(vector_search_url: String, language_model_url: String, timeout: Duration) -> Self {
        Self { vector_search_url, language_model_url, timeout }
    }
}

#[async_trait]
impl ProviderFactory for HttpProviderFactory {
    async fn build(&self) -> Result<ProviderHandle, MatchingError> {
        let searcher = HttpVectorSearcher::new(self.vector_search_url.clone(), self.timeout)?;
        let llm = HttpLanguageModel::new(self.language_model_url.clone(), self.timeout)?;
        Ok(ProviderHandle { searcher: Box::new(searcher), llm: Box::new(llm) })
    }
}
