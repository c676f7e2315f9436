//! Network-wide views built from the registry: the feed, cross-collection
//! fork trees and the collection summaries a peer announces in presence.

use tracing::warn;

use commonplace_shared::protocol::CollectionSummary;
use commonplace_shared::types::{DocumentId, UserId};

use crate::collections::CollectionStore;
use crate::error::{Result, StoreError};
use crate::fork_tree::{ForkTree, ForkTreeResolver};
use crate::models::Document;
use crate::registry::CollectionRegistry;

#[derive(Debug, Clone)]
pub struct FeedItem {
    pub namespace: String,
    pub document: Document,
}

#[derive(Clone)]
pub struct Discovery {
    registry: CollectionRegistry,
    store: CollectionStore,
}

impl Discovery {
    pub fn new(registry: CollectionRegistry, store: CollectionStore) -> Self {
        Self { registry, store }
    }

    /// Newest live documents across every registered collection.
    /// Collections that no longer exist are skipped.
    pub async fn feed(&self, limit: usize) -> Result<Vec<FeedItem>> {
        let mut items = Vec::new();
        for namespace in self.registry.list_all().await? {
            match self.store.list_documents(&namespace).await {
                Ok(docs) => items.extend(docs.into_iter().map(|document| FeedItem {
                    namespace: namespace.clone(),
                    document,
                })),
                Err(StoreError::NotFound(what)) => {
                    warn!(namespace = %namespace, what = %what, "Registered collection missing");
                }
                Err(e) => return Err(e),
            }
        }
        items.sort_by(|a, b| b.document.created.cmp(&a.document.created));
        items.truncate(limit);
        Ok(items)
    }

    /// Fork tree over every registered collection.
    pub async fn resolve_network_tree(&self, target: &DocumentId) -> Result<ForkTree> {
        let namespaces = self.registry.list_all().await?;
        ForkTreeResolver::new(self.store.clone())
            .resolve(target, &namespaces)
            .await
    }

    /// Summaries of `peer`'s collections, most recently updated first.
    pub async fn collection_summaries(&self, peer: &UserId) -> Result<Vec<CollectionSummary>> {
        let mut summaries = Vec::new();
        for namespace in self.registry.list_for_peer(peer).await? {
            match self.store.get_collection(&namespace).await {
                Ok(collection) => summaries.push(CollectionSummary {
                    name: collection.name,
                    namespace,
                    count: collection.document_count,
                    last_updated: collection.last_updated,
                }),
                Err(StoreError::NotFound(_)) => {
                    warn!(namespace = %namespace, "Registered collection has no metadata");
                }
                Err(e) => return Err(e),
            }
        }
        summaries.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
        Ok(summaries)
    }
}
