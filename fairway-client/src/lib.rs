//! Fairway HTTP Client
//!
//! A type-safe HTTP client for the Fairway orchestrator API: triggering and
//! controlling sequences, inspecting their state, submitting lifecycle events
//! and managing pipeline definitions.
//!
//! # Example
//!
//! ```no_run
//! use fairway_client::OrchestratorClient;
//! use fairway_core::dto::sequence::TriggerSequenceRequest;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = OrchestratorClient::new("http://localhost:8080");
//!
//!     let response = client.trigger_sequence(TriggerSequenceRequest {
//!         project: "sockshop".to_string(),
//!         stage: "dev".to_string(),
//!         service: "carts".to_string(),
//!         sequence: "delivery".to_string(),
//!         payload: serde_json::Value::Null,
//!     }).await?;
//!
//!     println!("Sequence started with context {}", response.context_id);
//!     Ok(())
//! }
//! ```

pub mod error;
mod definitions;
mod events;
mod sequences;
mod states;

// Re-export commonly used types
pub use error::{ClientError, Result};
pub use states::StateFilter;

use reqwest::Client;
use serde::de::DeserializeOwned;

/// HTTP client for the Fairway orchestrator API
///
/// This client provides methods for all orchestrator API endpoints, organized
/// into logical groups:
/// - Sequence lifecycle (trigger, abort, pause, resume)
/// - State inspection (paginated sequence state listing)
/// - Event submission (executor `started`/`finished` events)
/// - Pipeline definition management
#[derive(Debug, Clone)]
pub struct OrchestratorClient {
    /// Base URL of the orchestrator (e.g., "http://localhost:8080")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl OrchestratorClient {
    /// Create a new orchestrator client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the orchestrator API (e.g., "http://localhost:8080")
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    /// Create a new orchestrator client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the orchestrator
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Handle an API response and deserialize JSON
    ///
    /// Checks the status code and returns an appropriate error if the request
    /// failed, or deserializes the response body if successful.
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::debug!("API request failed with status {}: {}", status, error_text);
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Handle an API response that carries no body of interest
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = OrchestratorClient::new("http://localhost:8080");
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = OrchestratorClient::new("http://localhost:8080/");
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_client_with_custom_client() {
        let http_client = Client::new();
        let client = OrchestratorClient::with_client("http://localhost:8080", http_client);
        assert_eq!(client.base_url(), "http://localhost:8080");
    }
}
