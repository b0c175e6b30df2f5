//! Event submission endpoint

use crate::OrchestratorClient;
use crate::error::Result;
use fairway_core::domain::event::Event;

impl OrchestratorClient {
    // =============================================================================
    // Event Submission
    // =============================================================================

    /// Submit a lifecycle event to the orchestrator
    ///
    /// Task executors use this to report `started` and `finished` events for
    /// the task-triggered events they consumed. External systems may also
    /// start a run by submitting a sequence-level `triggered` event.
    pub async fn send_event(&self, event: &Event) -> Result<()> {
        let url = format!("{}/event", self.base_url);
        let response = self.client.post(&url).json(event).send().await?;

        self.handle_empty_response(response).await
    }
}
