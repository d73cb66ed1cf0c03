//! Wire types of the HTTP providers

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct RetrievalRequest<'a> {
    pub query: &'a str,
    pub limit: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalResponse {
    #[serde(default)]
    pub results: Vec<RetrievedItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrievedItem {
    pub source: String,
    pub content: String,
    /// Missing or unknown credibility is treated as low.
    #[serde(default)]
    pub credibility: Option<String>,
}

/// The reasoning response as sent by the endpoint; the verdict label is
/// parsed leniently.
#[derive(Debug, Clone, Deserialize)]
pub struct ReasoningWireResponse {
    pub verdict: String,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    pub error: ApiErrorDetails,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorDetails {
    pub message: String,
}
