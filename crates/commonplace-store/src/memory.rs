//! In-process collaborators. They give the last-writer-wins, enumerate-all
//! contract of the replicated store without replication, and can be taken
//! offline to exercise failure paths.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;
use tracing::debug;

use crate::backend::{BlobStore, KvStore, Namespace};
use crate::error::{Result, StoreError};

/// Shared, cloneable in-memory key-value store. Clones see the same data,
/// standing in for several peers attached to one replicated substrate.
#[derive(Debug, Clone, Default)]
pub struct MemoryKv {
    namespaces: Arc<RwLock<HashMap<String, BTreeMap<String, Vec<u8>>>>>,
    offline: Arc<AtomicBool>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every call fails with `BackendUnavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::BackendUnavailable(
                "in-memory store is offline".to_string(),
            ));
        }
        Ok(())
    }

    /// Write raw bytes, bypassing any record encoding.
    pub async fn put_raw(&self, ns: &str, key: &str, value: Vec<u8>) {
        let mut namespaces = self.namespaces.write().await;
        namespaces
            .entry(ns.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn open(&self, name: &str) -> Result<Namespace> {
        self.ensure_online()?;
        let mut namespaces = self.namespaces.write().await;
        namespaces.entry(name.to_string()).or_default();
        Ok(Namespace::new(name))
    }

    async fn put(&self, ns: &Namespace, key: &str, value: Vec<u8>) -> Result<()> {
        self.ensure_online()?;
        debug!(namespace = %ns, key, len = value.len(), "kv put");
        let mut namespaces = self.namespaces.write().await;
        namespaces
            .entry(ns.name().to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, ns: &Namespace, key: &str) -> Result<Option<Vec<u8>>> {
        self.ensure_online()?;
        let namespaces = self.namespaces.read().await;
        Ok(namespaces
            .get(ns.name())
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    async fn get_all(&self, ns: &Namespace) -> Result<Vec<(String, Vec<u8>)>> {
        self.ensure_online()?;
        let namespaces = self.namespaces.read().await;
        Ok(namespaces
            .get(ns.name())
            .map(|entries| {
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// In-memory blob store addressed by the BLAKE3 hash of the content.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<RwLock<HashMap<String, Bytes>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, data: Bytes) -> Result<String> {
        let id = blake3::hash(&data).to_hex().to_string();
        debug!(id = %id, size = data.len(), "Stored blob");
        self.blobs.write().await.insert(id.clone(), data);
        Ok(id)
    }

    async fn get(&self, content_id: &str) -> Result<Bytes> {
        self.blobs
            .read()
            .await
            .get(content_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("blob {content_id}")))
    }
}
