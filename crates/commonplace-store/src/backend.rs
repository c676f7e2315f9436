//! Collaborator seams: the replicated key-value namespace and the
//! content-addressed blob store.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::warn;

use commonplace_shared::constants::DEFAULT_CALL_TIMEOUT_MS;

use crate::error::{Result, StoreError};

/// Handle to an opened namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    name: String,
}

impl Namespace {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// Replicated key-value store with per-key last-writer-visible semantics.
///
/// Implementations report an unreachable backend as
/// [`StoreError::BackendUnavailable`]; they are never retried here.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn open(&self, name: &str) -> Result<Namespace>;

    async fn put(&self, ns: &Namespace, key: &str, value: Vec<u8>) -> Result<()>;

    async fn get(&self, ns: &Namespace, key: &str) -> Result<Option<Vec<u8>>>;

    /// Every key currently visible in the namespace.
    async fn get_all(&self, ns: &Namespace) -> Result<Vec<(String, Vec<u8>)>>;
}

/// Content-addressed blob store.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, data: Bytes) -> Result<String>;

    async fn get(&self, content_id: &str) -> Result<Bytes>;
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Budget applied to each individual collaborator call.
    pub call_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_millis(DEFAULT_CALL_TIMEOUT_MS),
        }
    }
}

impl StoreConfig {
    pub fn with_call_timeout(call_timeout: Duration) -> Self {
        Self { call_timeout }
    }
}

/// Run a collaborator call under `budget`, mapping expiry to
/// [`StoreError::Timeout`].
pub(crate) async fn bounded<T, F>(op: &'static str, budget: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(budget, call).await {
        Ok(result) => result,
        Err(_) => {
            warn!(op, ?budget, "Backend call timed out");
            Err(StoreError::Timeout { op, budget })
        }
    }
}
