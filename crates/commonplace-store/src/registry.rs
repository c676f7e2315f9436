//! Collection Registry: the well-known namespace mapping a peer id (hex
//! public key) to the collection namespaces that peer owns.
//!
//! `register` and `unregister` are read-modify-write with the same race as
//! document edits. Ownership of a store name is convention, not enforced.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use commonplace_shared::constants::REGISTRY_NAMESPACE;
use commonplace_shared::types::UserId;

use crate::backend::{bounded, KvStore, Namespace, StoreConfig};
use crate::collections::{decode, encode};
use crate::error::Result;
use crate::models::RegistryEntry;

#[derive(Clone)]
pub struct CollectionRegistry {
    kv: Arc<dyn KvStore>,
    config: StoreConfig,
    namespace: String,
    write_lock: Arc<Mutex<()>>,
}

impl CollectionRegistry {
    pub fn new(kv: Arc<dyn KvStore>, config: StoreConfig) -> Self {
        Self::with_namespace(kv, config, REGISTRY_NAMESPACE)
    }

    pub fn with_namespace(kv: Arc<dyn KvStore>, config: StoreConfig, namespace: &str) -> Self {
        Self {
            kv,
            config,
            namespace: namespace.to_string(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    async fn open(&self) -> Result<Namespace> {
        bounded("open", self.config.call_timeout, self.kv.open(&self.namespace)).await
    }

    async fn read_entry(&self, ns: &Namespace, peer: &UserId) -> Result<RegistryEntry> {
        let raw = bounded(
            "get",
            self.config.call_timeout,
            self.kv.get(ns, &peer.to_hex()),
        )
        .await?;
        match raw {
            Some(bytes) => decode(&bytes),
            None => Ok(RegistryEntry::default()),
        }
    }

    async fn write_entry(&self, ns: &Namespace, peer: &UserId, entry: &RegistryEntry) -> Result<()> {
        bounded(
            "put",
            self.config.call_timeout,
            self.kv.put(ns, &peer.to_hex(), encode(entry)?),
        )
        .await
    }

    /// Add `store_name` to the peer's list if absent.
    pub async fn register(&self, peer: &UserId, store_name: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let ns = self.open().await?;
        let mut entry = self.read_entry(&ns, peer).await?;
        if entry.collections.iter().any(|c| c == store_name) {
            debug!(peer = %peer.short(), store_name, "Collection already registered");
            return Ok(());
        }
        entry.collections.push(store_name.to_string());
        self.write_entry(&ns, peer, &entry).await?;
        info!(peer = %peer.short(), store_name, "Registered collection");
        Ok(())
    }

    pub async fn unregister(&self, peer: &UserId, store_name: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let ns = self.open().await?;
        let mut entry = self.read_entry(&ns, peer).await?;
        let before = entry.collections.len();
        entry.collections.retain(|c| c != store_name);
        if entry.collections.len() != before {
            self.write_entry(&ns, peer, &entry).await?;
            info!(peer = %peer.short(), store_name, "Unregistered collection");
        }
        Ok(())
    }

    /// Empty when the peer has never registered anything.
    pub async fn list_for_peer(&self, peer: &UserId) -> Result<Vec<String>> {
        let ns = self.open().await?;
        Ok(self.read_entry(&ns, peer).await?.collections)
    }

    /// Union of every peer's list, sorted.
    pub async fn list_all(&self) -> Result<Vec<String>> {
        let ns = self.open().await?;
        let entries = bounded("get_all", self.config.call_timeout, self.kv.get_all(&ns)).await?;

        let mut all = BTreeSet::new();
        for (key, bytes) in entries {
            match decode::<RegistryEntry>(&bytes) {
                Ok(entry) => all.extend(entry.collections),
                Err(e) => warn!(key = %key, error = %e, "Skipping undecodable registry entry"),
            }
        }
        Ok(all.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryKv;

    fn registry(kv: &MemoryKv) -> CollectionRegistry {
        CollectionRegistry::new(Arc::new(kv.clone()), StoreConfig::default())
    }

    #[tokio::test]
    async fn test_list_all_unions_peers_in_any_order() {
        let p1 = UserId([1; 32]);
        let p2 = UserId([2; 32]);

        let kv = MemoryKv::new();
        let reg = registry(&kv);
        reg.register(&p1, "c1").await.unwrap();
        reg.register(&p2, "c2").await.unwrap();

        let kv2 = MemoryKv::new();
        let reg2 = registry(&kv2);
        reg2.register(&p2, "c2").await.unwrap();
        reg2.register(&p1, "c1").await.unwrap();

        let expected = vec!["c1".to_string(), "c2".to_string()];
        assert_eq!(reg.list_all().await.unwrap(), expected);
        assert_eq!(reg2.list_all().await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_register_is_idempotent_and_unregister_filters() {
        let kv = MemoryKv::new();
        let reg = registry(&kv);
        let peer = UserId([5; 32]);

        reg.register(&peer, "a").await.unwrap();
        reg.register(&peer, "a").await.unwrap();
        reg.register(&peer, "b").await.unwrap();
        assert_eq!(reg.list_for_peer(&peer).await.unwrap(), vec!["a", "b"]);

        reg.unregister(&peer, "a").await.unwrap();
        reg.unregister(&peer, "never-there").await.unwrap();
        assert_eq!(reg.list_for_peer(&peer).await.unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_unknown_peer_has_no_collections() {
        let reg = registry(&MemoryKv::new());
        assert!(reg.list_for_peer(&UserId([0; 32])).await.unwrap().is_empty());
        assert!(reg.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_entry_skipped_in_list_all() {
        let kv = MemoryKv::new();
        let reg = registry(&kv);
        reg.register(&UserId([1; 32]), "good").await.unwrap();
        kv.put_raw(REGISTRY_NAMESPACE, "garbage", b"[1,2".to_vec()).await;
        assert_eq!(reg.list_all().await.unwrap(), vec!["good"]);
    }
}
