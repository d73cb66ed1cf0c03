//! HTTP reasoning provider

use super::client::HttpClient;
use super::types::ReasoningWireResponse;
use crate::{invalid_response, ReasoningProvider, ReasoningRequest, ReasoningResponse};
use async_trait::async_trait;
use truthloop_core::{Outcome, TruthloopResult};

/// Reasoning provider posting the [`ReasoningRequest`] as JSON and reading
/// `{"verdict", "confidence", "reasoning"}`.
#[derive(Debug)]
pub struct HttpReasoningProvider {
    client: HttpClient,
}

impl HttpReasoningProvider {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

pub(crate) fn from_wire(provider: &str, wire: ReasoningWireResponse) -> TruthloopResult<ReasoningResponse> {
    let verdict = wire
        .verdict
        .parse::<Outcome>()
        .map_err(|e| invalid_response(provider, e.to_string()))?;
    ReasoningResponse {
        verdict,
        confidence: wire.confidence,
        reasoning: wire.reasoning,
    }
    .validate(provider)
}

#[async_trait]
impl ReasoningProvider for HttpReasoningProvider {
    async fn reason(&self, request: &ReasoningRequest) -> TruthloopResult<ReasoningResponse> {
        let wire: ReasoningWireResponse = self.client.request(request).await?;
        from_wire(self.client.provider(), wire)
    }

    fn name(&self) -> &str {
        self.client.provider()
    }
}
