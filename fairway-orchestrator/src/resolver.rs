//! Pipeline definition resolver
//!
//! Loads and parses the stage/sequence/task graph for a project from the
//! external resource store. Definitions are versioned by a content hash
//! supplied by the store; two requests returning the same version yield the
//! same parsed structure, so parsed definitions are cached by version.
//!
//! Parse errors are non-retryable hard failures that block new sequence
//! starts; they never affect running instances. Transient store failures are
//! retried with backoff before being surfaced.

use async_trait::async_trait;
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fairway_core::domain::definition::PipelineDefinition;

/// A versioned definition document as returned by the resource store.
#[derive(Debug, Clone)]
pub struct Document {
    pub content: String,
    /// Content hash; identical versions imply byte-identical content.
    pub version: String,
}

/// Errors from the resource store.
#[derive(Debug, Clone)]
pub enum ResourceStoreError {
    NotFound(String),
    /// Transient failure; the resolver retries these.
    Unavailable(String),
}

/// Read API over the external resource/config store.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get_document(
        &self,
        project: &str,
        git_ref: Option<&str>,
    ) -> Result<Document, ResourceStoreError>;
}

/// Errors resolving a project's pipeline definition.
#[derive(Debug, Clone)]
pub enum ResolveError {
    /// No definition document exists for the project.
    NotFound(String),
    /// The document exists but cannot be parsed or is structurally invalid.
    /// Non-retryable; blocks new sequence starts only.
    Parse(String),
    /// The resource store stayed unavailable through all retries.
    StoreUnavailable(String),
}

impl std::fmt::Display for ResolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolveError::NotFound(project) => {
                write!(f, "no pipeline definition for project {}", project)
            }
            ResolveError::Parse(msg) => write!(f, "pipeline definition unparsable: {}", msg),
            ResolveError::StoreUnavailable(msg) => {
                write!(f, "resource store unavailable: {}", msg)
            }
        }
    }
}

impl std::error::Error for ResolveError {}

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);

/// Resolver with a version-keyed cache of parsed definitions.
pub struct DefinitionResolver {
    store: Arc<dyn ResourceStore>,
    cache: Mutex<HashMap<String, Arc<PipelineDefinition>>>,
}

impl DefinitionResolver {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self {
            store,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves the pipeline definition for a project.
    ///
    /// Idempotent: the same document version always yields the same parsed
    /// structure (served from cache after the first parse).
    pub async fn resolve(
        &self,
        project: &str,
        git_ref: Option<&str>,
    ) -> Result<Arc<PipelineDefinition>, ResolveError> {
        let document = self.fetch_with_retry(project, git_ref).await?;

        if let Some(cached) = self.cache.lock().unwrap().get(&document.version) {
            return Ok(Arc::clone(cached));
        }

        let definition: PipelineDefinition = serde_json::from_str(&document.content)
            .map_err(|e| ResolveError::Parse(e.to_string()))?;
        definition
            .validate()
            .map_err(|e| ResolveError::Parse(e.to_string()))?;

        let definition = Arc::new(definition);
        self.cache
            .lock()
            .unwrap()
            .insert(document.version, Arc::clone(&definition));
        Ok(definition)
    }

    async fn fetch_with_retry(
        &self,
        project: &str,
        git_ref: Option<&str>,
    ) -> Result<Document, ResolveError> {
        let mut delay = RETRY_BASE_DELAY;
        let mut last_error = String::new();

        for attempt in 1..=RETRY_ATTEMPTS {
            match self.store.get_document(project, git_ref).await {
                Ok(document) => return Ok(document),
                Err(ResourceStoreError::NotFound(_)) => {
                    return Err(ResolveError::NotFound(project.to_string()));
                }
                Err(ResourceStoreError::Unavailable(msg)) => {
                    tracing::warn!(
                        "Resource store unavailable for project {} (attempt {}/{}): {}",
                        project,
                        attempt,
                        RETRY_ATTEMPTS,
                        msg
                    );
                    last_error = msg;
                    if attempt < RETRY_ATTEMPTS {
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }

        Err(ResolveError::StoreUnavailable(last_error))
    }
}

/// In-memory resource store for tests and single-node deployments.
///
/// Documents are versioned by a hash of their content, matching the external
/// store's contract.
pub struct InMemoryResourceStore {
    documents: Mutex<HashMap<String, Document>>,
}

impl InMemoryResourceStore {
    pub fn new() -> Self {
        Self {
            documents: Mutex::new(HashMap::new()),
        }
    }

    /// Stores (or replaces) a project's definition document and returns its
    /// content version.
    pub fn put_document(&self, project: &str, content: &str) -> String {
        let mut hasher = DefaultHasher::new();
        content.hash(&mut hasher);
        let version = format!("{:016x}", hasher.finish());

        self.documents.lock().unwrap().insert(
            project.to_string(),
            Document {
                content: content.to_string(),
                version: version.clone(),
            },
        );
        version
    }
}

impl Default for InMemoryResourceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceStore for InMemoryResourceStore {
    async fn get_document(
        &self,
        project: &str,
        _git_ref: Option<&str>,
    ) -> Result<Document, ResourceStoreError> {
        self.documents
            .lock()
            .unwrap()
            .get(project)
            .cloned()
            .ok_or_else(|| ResourceStoreError::NotFound(project.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const VALID_DEFINITION: &str = r#"{
        "stages": [{
            "name": "dev",
            "sequences": [{
                "name": "delivery",
                "tasks": [{ "name": "deploy" }]
            }]
        }]
    }"#;

    #[tokio::test]
    async fn test_resolve_parses_and_caches_by_version() {
        let store = Arc::new(InMemoryResourceStore::new());
        store.put_document("sockshop", VALID_DEFINITION);

        let resolver = DefinitionResolver::new(store.clone());
        let first = resolver.resolve("sockshop", None).await.unwrap();
        let second = resolver.resolve("sockshop", None).await.unwrap();

        // Same version resolves to the same parsed structure.
        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.sequence("dev", "delivery").is_some());
    }

    #[tokio::test]
    async fn test_resolve_missing_project() {
        let resolver = DefinitionResolver::new(Arc::new(InMemoryResourceStore::new()));
        assert!(matches!(
            resolver.resolve("unknown", None).await,
            Err(ResolveError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_unparsable_definition() {
        let store = Arc::new(InMemoryResourceStore::new());
        store.put_document("sockshop", "not json");

        let resolver = DefinitionResolver::new(store);
        assert!(matches!(
            resolver.resolve("sockshop", None).await,
            Err(ResolveError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_structurally_invalid_definition() {
        let store = Arc::new(InMemoryResourceStore::new());
        store.put_document(
            "sockshop",
            r#"{
                "stages": [{
                    "name": "dev",
                    "sequences": [{
                        "name": "delivery",
                        "tasks": [{ "name": "deploy" }, { "name": "deploy" }]
                    }]
                }]
            }"#,
        );

        let resolver = DefinitionResolver::new(store);
        assert!(matches!(
            resolver.resolve("sockshop", None).await,
            Err(ResolveError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn test_transient_store_failures_are_retried() {
        struct FlakyStore {
            calls: AtomicUsize,
        }

        #[async_trait]
        impl ResourceStore for FlakyStore {
            async fn get_document(
                &self,
                _project: &str,
                _git_ref: Option<&str>,
            ) -> Result<Document, ResourceStoreError> {
                if self.calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ResourceStoreError::Unavailable("connection reset".into()))
                } else {
                    Ok(Document {
                        content: VALID_DEFINITION.to_string(),
                        version: "v1".to_string(),
                    })
                }
            }
        }

        let resolver = DefinitionResolver::new(Arc::new(FlakyStore {
            calls: AtomicUsize::new(0),
        }));
        let definition = resolver.resolve("sockshop", None).await.unwrap();
        assert_eq!(definition.stages.len(), 1);
    }
}
