//! HTTP evidence retriever

use super::client::HttpClient;
use super::types::{RetrievalRequest, RetrievalResponse, RetrievedItem};
use crate::EvidenceRetriever;
use async_trait::async_trait;
use truthloop_core::{Credibility, Evidence, TruthloopResult};

/// Evidence retriever posting `{"query", "limit"}` and reading `{"results": [...]}`.
#[derive(Debug)]
pub struct HttpEvidenceRetriever {
    client: HttpClient,
}

impl HttpEvidenceRetriever {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

fn to_evidence(item: RetrievedItem) -> Evidence {
    let credibility = item
        .credibility
        .as_deref()
        .and_then(|c| c.parse::<Credibility>().ok())
        .unwrap_or(Credibility::Low);
    Evidence::new(item.source, item.content, credibility)
}

#[async_trait]
impl EvidenceRetriever for HttpEvidenceRetriever {
    async fn retrieve(&self, query: &str, limit: usize) -> TruthloopResult<Vec<Evidence>> {
        let response: RetrievalResponse = self
            .client
            .request(&RetrievalRequest { query, limit })
            .await?;
        Ok(response
            .results
            .into_iter()
            .filter(|item| !item.content.trim().is_empty())
            .take(limit)
            .map(to_evidence)
            .collect())
    }

    fn name(&self) -> &str {
        self.client.provider()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_parsing_defaults_credibility() {
        let response: RetrievalResponse = serde_json::from_str(
            r#"{"results": [
                {"source": "a", "content": "x", "credibility": "high"},
                {"source": "b", "content": "y"},
                {"source": "c", "content": "z", "credibility": "dubious"}
            ]}"#,
        )
        .unwrap();
        let evidence: Vec<Evidence> = response.results.into_iter().map(to_evidence).collect();
        assert_eq!(evidence[0].credibility, Credibility::High);
        assert_eq!(evidence[1].credibility, Credibility::Low);
        assert_eq!(evidence[2].credibility, Credibility::Low);
    }

    #[test]
    fn test_missing_results_is_empty() {
        let response: RetrievalResponse = serde_json::from_str("{}").unwrap();
        assert!(response.results.is_empty());
    }
}
