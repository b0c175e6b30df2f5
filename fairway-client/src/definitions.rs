//! Pipeline definition endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use fairway_core::dto::sequence::{PutDefinitionRequest, PutDefinitionResponse};

impl OrchestratorClient {
    // =============================================================================
    // Pipeline Definitions
    // =============================================================================

    /// Register or replace a project's pipeline definition
    ///
    /// The document is validated before it is stored; a structurally invalid
    /// definition is rejected and the previous one stays in effect.
    ///
    /// # Returns
    /// The content version of the stored definition
    pub async fn put_definition(
        &self,
        project: &str,
        content: impl Into<String>,
    ) -> Result<PutDefinitionResponse> {
        let url = format!("{}/project/{}/definition", self.base_url, project);
        let request = PutDefinitionRequest {
            content: content.into(),
        };
        let response = self.client.post(&url).json(&request).send().await?;

        self.handle_response(response).await
    }
}
