use std::time::Duration;

use async_trait::async_trait;
use match_engine::error::{MatchingError, ProviderConfigurationError};
use match_engine::search::{RawHit, SearchRequest, VectorSearcher};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `search(workspace_id, query, limit, filters: {entity_id?})` over HTTP:
/// the production `VectorSearcher` implementation. Returns each hit as
/// the remote store reported it; resolving `provider_ref` against local
/// chunks is left to the caller, which has the entity's chunk table in
/// scope and this client does not.
pub struct HttpVectorSearcher {
    base_url: String,
    client: reqwest::Client,
}

impl HttpVectorSearcher {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, MatchingError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MatchingError::ProviderConfiguration(ProviderConfigurationError(format!("failed to build vector search client: {e}"))))?;
        Ok(Self { base_url, client })
    }
}

#[derive(Serialize)]
struct SearchBody<'a> {
    workspace_id: Uuid,
    query: &'a str,
    limit: u32,
    filters: SearchFilters,
}

#[derive(Serialize)]
struct SearchFilters {
    entity_id: Uuid,
}

#[derive(Deserialize)]
struct RemoteHit {
    chunk_or_ref: Option<String>,
    score: f64,
    #[serde(default)]
    metadata: serde_json::Value,
    text: Option<String>,
}

impl RemoteHit {
    fn document_id(&self) -> Option<Uuid> {
        self.metadata.get("document_id")?.as_str().and_then(|s| Uuid::parse_str(s).ok())
    }

    fn chunk_index(&self) -> Option<u32> {
        self.metadata.get("chunk_index")?.as_u64().map(|n| n as u32)
    }
}

#[async_trait]
impl VectorSearcher for HttpVectorSearcher {
    async fn search(&self, request: SearchRequest<'_>) -> Result<Vec<RawHit>, MatchingError> {
        let body = SearchBody {
            workspace_id: request.workspace_id,
            query: request.query,
            limit: request.limit,
            filters: SearchFilters { entity_id: request.entity_id },
        };

        let response = self
            .client
            .post(format!("{}/search", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| MatchingError::Transient(format!("vector search request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(MatchingError::Transient(format!(
                "vector search returned status {}",
                response.status()
            )));
        }

        let hits: Vec<RemoteHit> = response
            .json()
            .await
            .map_err(|e| MatchingError::Transient(format!("vector search response decode failed: {e}")))?;

        Ok(hits
            .iter()
            .map(|h| RawHit {
                provider_ref: h.chunk_or_ref.clone(),
                document_id: h.document_id(),
                chunk_index: h.chunk_index(),
                text: h.text.clone().unwrap_or_default(),
                score: h.score,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn search_maps_remote_hits() {
        let server = MockServer::start().await;
        let chunk_ref = Uuid::new_v4();
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "chunk_or_ref": chunk_ref.to_string(), "score": 0.87, "metadata": {}, "text": "a snippet" }
            ])))
            .mount(&server)
            .await;

        let searcher = HttpVectorSearcher::new(server.uri(), Duration::from_secs(5)).unwrap();
        let hits = searcher
            .search(SearchRequest { workspace_id: Uuid::new_v4(), query: "widgets", limit: 5, entity_id: Uuid::new_v4() })
            .await
            .unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].provider_ref, Some(chunk_ref.to_string()));
        assert_eq!(hits[0].text, "a snippet");
        assert!((hits[0].score - 0.87).abs() < 1e-9);
    }

    #[tokio::test]
    async fn search_extracts_document_id_and_chunk_index_fallback() {
        let server = MockServer::start().await;
        let document_id = Uuid::new_v4();
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {
                    "chunk_or_ref": null,
                    "score": 0.5,
                    "metadata": { "document_id": document_id.to_string(), "chunk_index": 2 },
                    "text": "fallback snippet",
                }
            ])))
            .mount(&server)
            .await;

        let searcher = HttpVectorSearcher::new(server.uri(), Duration::from_secs(5)).unwrap();
        let hits = searcher
            .search(SearchRequest { workspace_id: Uuid::new_v4(), query: "widgets", limit: 5, entity_id: Uuid::new_v4() })
            .await
            .unwrap();

        assert_eq!(hits[0].provider_ref, None);
        assert_eq!(hits[0].document_id, Some(document_id));
        assert_eq!(hits[0].chunk_index, Some(2));
    }

    #[tokio::test]
    async fn non_success_status_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let searcher = HttpVectorSearcher::new(server.uri(), Duration::from_secs(5)).unwrap();
        let err = searcher
            .search(SearchRequest { workspace_id: Uuid::new_v4(), query: "widgets", limit: 5, entity_id: Uuid::new_v4() })
            .await
            .unwrap_err();

        assert!(matches!(err, MatchingError::Transient(_)));
    }
}
