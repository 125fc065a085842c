use std::time::Duration;

use async_trait::async_trait;
use match_engine::error::{MatchingError, ProviderConfigurationError};
use match_engine::evaluation::LanguageModel;
use serde::{Deserialize, Serialize};

/// `structured_match_review(prompt) -> string` over HTTP: the production
/// `LanguageModel` implementation. The response body is treated as
/// free-form text; the evaluator is already robust to noise.
pub struct HttpLanguageModel {
    base_url: String,
    client: reqwest::Client,
}

impl HttpLanguageModel {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, MatchingError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MatchingError::ProviderConfiguration(ProviderConfigurationError(format!("failed to build language model client: {e}"))))?;
        Ok(Self { base_url, client })
    }
}

#[derive(Serialize)]
struct ReviewRequest<'a> {
    prompt: &'a str,
}

#[derive(Deserialize)]
struct ReviewResponse {
    response: String,
}

#[async_trait]
impl LanguageModel for HttpLanguageModel {
    async fn structured_match_review(&self, prompt: &str) -> Result<String, MatchingError> {
        let response = self
            .client
            .post(format!("{}/review", self.base_url))
            .json(&ReviewRequest { prompt })
            .send()
            .await
            .map_err(|e| MatchingError::Transient(format!("language model request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(MatchingError::Transient(format!("language model returned status {}", response.status())));
        }

        let body: ReviewResponse = response
            .json()
            .await
            .map_err(|e| MatchingError::Transient(format!("language model response decode failed: {e}")))?;

        Ok(body.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn structured_match_review_returns_response_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/review"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "response": "GOOD" })))
            .mount(&server)
            .await;

        let llm = HttpLanguageModel::new(server.uri(), Duration::from_secs(5)).unwrap();
        let response = llm.structured_match_review("rate this").await.unwrap();
        assert_eq!(response, "GOOD");
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/review"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let llm = HttpLanguageModel::new(server.uri(), Duration::from_secs(5)).unwrap();
        let err = llm.structured_match_review("rate this").await.unwrap_err();
        assert!(matches!(err, MatchingError::Transient(_)));
    }
}
