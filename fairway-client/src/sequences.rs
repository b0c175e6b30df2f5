//! Sequence lifecycle endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use fairway_core::dto::sequence::{
    ControlResponse, TriggerSequenceRequest, TriggerSequenceResponse,
};
use uuid::Uuid;

impl OrchestratorClient {
    // =============================================================================
    // Sequence Lifecycle
    // =============================================================================

    /// Start a new run of a named sequence
    ///
    /// # Arguments
    /// * `req` - Project, stage, service, sequence name and optional payload
    ///
    /// # Returns
    /// The causal-context identifier of the new run
    pub async fn trigger_sequence(
        &self,
        req: TriggerSequenceRequest,
    ) -> Result<TriggerSequenceResponse> {
        let url = format!("{}/sequence/trigger", self.base_url);
        let response = self.client.post(&url).json(&req).send().await?;

        self.handle_response(response).await
    }

    /// Abort every live instance of a context
    ///
    /// Queued instances are discarded without dispatching; running instances
    /// stop reacting to executor events and free their execution context.
    pub async fn abort_sequence(&self, context_id: Uuid) -> Result<ControlResponse> {
        let url = format!("{}/sequence/{}/abort", self.base_url, context_id);
        let response = self.client.post(&url).send().await?;

        self.handle_response(response).await
    }

    /// Pause the context's running instances
    ///
    /// The next task dispatch is withheld until the context is resumed.
    pub async fn pause_sequence(&self, context_id: Uuid) -> Result<ControlResponse> {
        let url = format!("{}/sequence/{}/pause", self.base_url, context_id);
        let response = self.client.post(&url).send().await?;

        self.handle_response(response).await
    }

    /// Resume a paused context, replaying any withheld dispatch
    pub async fn resume_sequence(&self, context_id: Uuid) -> Result<ControlResponse> {
        let url = format!("{}/sequence/{}/resume", self.base_url, context_id);
        let response = self.client.post(&url).send().await?;

        self.handle_response(response).await
    }
}
