//! Collection Store: one namespace per collection holding a `metadata`
//! record and one record per document under `doc/<id>`.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use commonplace_shared::constants::{COLLECTION_METADATA_KEY, DOCUMENT_KEY_PREFIX};
use commonplace_shared::types::{now_millis, DocumentId, Millis, UserId};

use crate::backend::{bounded, KvStore, Namespace, StoreConfig};
use crate::error::{Result, StoreError};
use crate::models::{Collection, Document};

#[derive(Clone)]
pub struct CollectionStore {
    kv: Arc<dyn KvStore>,
    config: StoreConfig,
    /// Narrows (does not close) the metadata read-modify-write window for
    /// writers inside this process.
    metadata_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

/// `<owner hex>-<created millis>-<8 hex>`; the suffix keeps two
/// collections created in the same millisecond apart.
fn collection_store_name(owner: &UserId, created: Millis) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", owner.to_hex(), created, &suffix[..8])
}

pub(crate) fn document_key(id: &DocumentId) -> String {
    format!("{DOCUMENT_KEY_PREFIX}{id}")
}

pub(crate) fn encode<T: Serialize>(record: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(record)?)
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}

impl CollectionStore {
    pub fn new(kv: Arc<dyn KvStore>, config: StoreConfig) -> Self {
        Self {
            kv,
            config,
            metadata_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    async fn open(&self, namespace: &str) -> Result<Namespace> {
        bounded("open", self.config.call_timeout, self.kv.open(namespace)).await
    }

    async fn get_raw(&self, ns: &Namespace, key: &str) -> Result<Option<Vec<u8>>> {
        bounded("get", self.config.call_timeout, self.kv.get(ns, key)).await
    }

    async fn put_raw(&self, ns: &Namespace, key: &str, value: Vec<u8>) -> Result<()> {
        bounded("put", self.config.call_timeout, self.kv.put(ns, key, value)).await
    }

    async fn metadata_lock(&self, namespace: &str) -> Arc<Mutex<()>> {
        let mut locks = self.metadata_locks.lock().await;
        locks
            .entry(namespace.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Allocate a fresh namespace owned by `owner` and write its metadata.
    pub async fn create_collection(
        &self,
        owner: &UserId,
        name: &str,
        description: &str,
    ) -> Result<Collection> {
        let now = now_millis();
        let store_name = collection_store_name(owner, now);
        let ns = self.open(&store_name).await?;

        let collection = Collection {
            store_name: store_name.clone(),
            name: name.to_string(),
            description: description.to_string(),
            owner: *owner,
            document_count: 0,
            created: now,
            last_updated: now,
        };
        self.put_raw(&ns, COLLECTION_METADATA_KEY, encode(&collection)?)
            .await?;

        info!(namespace = %store_name, owner = %owner.short(), name, "Created collection");
        Ok(collection)
    }

    pub async fn get_collection(&self, namespace: &str) -> Result<Collection> {
        let ns = self.open(namespace).await?;
        match self.get_raw(&ns, COLLECTION_METADATA_KEY).await? {
            Some(bytes) => decode(&bytes),
            None => Err(StoreError::NotFound(format!("collection {namespace}"))),
        }
    }

    /// Write `doc` under its id-derived key (re-adding overwrites), then
    /// best-effort bump the collection's counter and `lastUpdated`.
    pub async fn add_document(&self, namespace: &str, doc: &Document) -> Result<()> {
        let ns = self.open(namespace).await?;
        self.put_raw(&ns, &document_key(&doc.id), encode(doc)?)
            .await?;
        debug!(namespace, doc = %doc.id, "Added document");

        if let Err(e) = self.touch_metadata(&ns, 1).await {
            warn!(namespace, error = %e, "Could not update collection counter");
        }
        Ok(())
    }

    /// Non-atomic read-modify-write of the metadata record. Concurrent
    /// writers on other peers may overwrite each other's increments.
    async fn touch_metadata(&self, ns: &Namespace, added: u64) -> Result<()> {
        let lock = self.metadata_lock(ns.name()).await;
        let result = {
            let _guard = lock.lock().await;
            self.bump_metadata(ns, added).await
        };
        self.release_metadata_lock(ns.name(), lock).await;
        result
    }

    /// Drop the namespace's lock entry once no other writer holds it.
    async fn release_metadata_lock(&self, namespace: &str, lock: Arc<Mutex<()>>) {
        drop(lock);
        let mut locks = self.metadata_locks.lock().await;
        if locks
            .get(namespace)
            .is_some_and(|held| Arc::strong_count(held) == 1)
        {
            locks.remove(namespace);
        }
    }

    async fn bump_metadata(&self, ns: &Namespace, added: u64) -> Result<()> {
        let mut collection: Collection = match self.get_raw(ns, COLLECTION_METADATA_KEY).await? {
            Some(bytes) => decode(&bytes)?,
            None => return Err(StoreError::NotFound(format!("collection {ns}"))),
        };
        collection.document_count += added;
        collection.last_updated = now_millis();
        self.put_raw(ns, COLLECTION_METADATA_KEY, encode(&collection)?)
            .await
    }

    pub async fn get_document(&self, namespace: &str, id: &DocumentId) -> Result<Document> {
        let ns = self.open(namespace).await?;
        match self.get_raw(&ns, &document_key(id)).await? {
            Some(bytes) => decode(&bytes),
            None => Err(StoreError::NotFound(format!("document {id} in {namespace}"))),
        }
    }

    /// Every decodable document record, tombstones included, in no
    /// particular order. Undecodable records are skipped.
    pub async fn load_records(&self, namespace: &str) -> Result<Vec<Document>> {
        let ns = self.open(namespace).await?;
        let entries = bounded("get_all", self.config.call_timeout, self.kv.get_all(&ns)).await?;

        let docs = entries
            .into_iter()
            .filter(|(key, _)| key.starts_with(DOCUMENT_KEY_PREFIX))
            .filter_map(|(key, bytes)| match decode::<Document>(&bytes) {
                Ok(doc) => Some(doc),
                Err(e) => {
                    warn!(namespace, key = %key, error = %e, "Skipping undecodable record");
                    None
                }
            })
            .collect();
        Ok(docs)
    }

    /// Live documents, newest first.
    pub async fn list_documents(&self, namespace: &str) -> Result<Vec<Document>> {
        let mut docs: Vec<Document> = self
            .load_records(namespace)
            .await?
            .into_iter()
            .filter(|doc| !doc.deleted)
            .collect();
        docs.sort_by(|a, b| b.created.cmp(&a.created));
        Ok(docs)
    }

    /// Overwrite the record at `id`. Used for edits, link-backs and
    /// tombstones alike.
    pub async fn update_document(
        &self,
        namespace: &str,
        id: &DocumentId,
        new_doc: &Document,
    ) -> Result<()> {
        if &new_doc.id != id {
            return Err(StoreError::InvalidInput(format!(
                "record id {} does not match key {id}",
                new_doc.id
            )));
        }
        let ns = self.open(namespace).await?;
        self.put_raw(&ns, &document_key(id), encode(new_doc)?).await?;
        debug!(namespace, doc = %id, version = new_doc.version, "Updated document");
        Ok(())
    }

    /// Replace the document with a tombstone. Lineage fields are kept.
    pub async fn delete_document(
        &self,
        namespace: &str,
        id: &DocumentId,
        by: &UserId,
    ) -> Result<Document> {
        let mut doc = self.get_document(namespace, id).await?;
        if &doc.uploaded_by != by {
            return Err(StoreError::NotOwner);
        }
        doc.deleted = true;
        doc.last_accessed = now_millis();
        self.update_document(namespace, id, &doc).await?;
        info!(namespace, doc = %id, "Deleted document (tombstone)");
        Ok(doc)
    }
}
