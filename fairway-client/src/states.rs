//! Sequence state inspection endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use fairway_core::dto::state::SequenceStates;
use serde::Serialize;

/// Filter and pagination parameters for the state listing.
///
/// `next_page_key` is opaque; pass back the value from the previous page's
/// response to continue where it left off.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StateFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    /// Restrict to runs of this sequence name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "pageSize", skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u64>,
    #[serde(rename = "nextPageKey", skip_serializing_if = "Option::is_none")]
    pub next_page_key: Option<String>,
}

impl OrchestratorClient {
    // =============================================================================
    // State Inspection
    // =============================================================================

    /// List sequence states, newest first
    ///
    /// # Arguments
    /// * `filter` - Optional project/sequence filters and pagination
    ///
    /// # Returns
    /// One page of state summaries plus the total match count
    pub async fn get_sequence_states(&self, filter: &StateFilter) -> Result<SequenceStates> {
        let url = format!("{}/sequence/state", self.base_url);
        let response = self.client.get(&url).query(filter).send().await?;

        self.handle_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_serializes_only_set_fields() {
        let filter = StateFilter {
            project: Some("sockshop".to_string()),
            page_size: Some(20),
            ..StateFilter::default()
        };
        let query = serde_urlencoded::to_string(&filter).unwrap();
        assert_eq!(query, "project=sockshop&pageSize=20");
    }
}
