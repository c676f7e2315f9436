//! Fork Tree Resolver.
//!
//! Rebuilds the lineage around a document from flat records. Every walk is
//! guarded by a visited set; cycles and dangling links are tolerated, never
//! repaired.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use tracing::{debug, warn};

use commonplace_shared::types::DocumentId;

use crate::collections::CollectionStore;
use crate::error::Result;
use crate::models::Document;

#[derive(Debug, Clone, Default)]
pub struct ForkTree {
    pub root: DocumentId,
    pub nodes: BTreeMap<DocumentId, Document>,
    /// Child ids referenced by the tree but absent from the loaded records.
    pub unresolved: BTreeSet<DocumentId>,
}

impl ForkTree {
    pub fn contains(&self, id: &DocumentId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Resolved children of `id` within the tree.
    pub fn children_of(&self, id: &DocumentId) -> Vec<&Document> {
        self.nodes
            .values()
            .filter(|doc| doc.parent_document_id.as_ref() == Some(id) && &doc.id != id)
            .collect()
    }
}

/// Resolve the tree containing `target` from an already loaded record set.
///
/// If a record id appears more than once (the same document seen through
/// several namespaces), the highest version wins.
pub fn resolve_fork_tree<I>(target: &DocumentId, records: I) -> ForkTree
where
    I: IntoIterator<Item = Document>,
{
    let mut loaded: HashMap<DocumentId, Document> = HashMap::new();
    for doc in records {
        let keep_existing = loaded
            .get(&doc.id)
            .is_some_and(|existing| existing.version >= doc.version);
        if !keep_existing {
            loaded.insert(doc.id.clone(), doc);
        }
    }

    if !loaded.contains_key(target) {
        debug!(target = %target, "Fork tree target not in loaded records");
        return ForkTree {
            root: target.clone(),
            nodes: BTreeMap::new(),
            unresolved: BTreeSet::from([target.clone()]),
        };
    }

    // Children by parent pointer, so a fork whose link-back never landed
    // still shows up under its parent.
    let mut pointed_children: HashMap<&DocumentId, Vec<&DocumentId>> = HashMap::new();
    for doc in loaded.values() {
        if let Some(parent) = &doc.parent_document_id {
            pointed_children.entry(parent).or_default().push(&doc.id);
        }
    }

    // Walk up.
    let mut path: Vec<DocumentId> = Vec::new();
    let mut seen: HashSet<DocumentId> = HashSet::new();
    let mut current = target.clone();
    let root = loop {
        seen.insert(current.clone());
        path.push(current.clone());
        let parent = loaded
            .get(&current)
            .and_then(|doc| doc.parent_document_id.clone());
        match parent {
            Some(parent) if seen.contains(&parent) => {
                warn!(at = %current, repeated = %parent, "Cycle in fork lineage");
                break parent;
            }
            Some(parent) if loaded.contains_key(&parent) => current = parent,
            _ => break current,
        }
    };

    // Walk down.
    let mut tree = ForkTree {
        root: root.clone(),
        ..Default::default()
    };
    let mut visited: HashSet<DocumentId> = HashSet::new();
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        if !visited.insert(id.clone()) {
            continue;
        }
        let Some(doc) = loaded.get(&id) else {
            tree.unresolved.insert(id);
            continue;
        };

        let mut children: Vec<DocumentId> = doc.child_document_ids.clone();
        if let Some(extra) = pointed_children.get(&id) {
            for child in extra {
                if !children.contains(*child) {
                    children.push((*child).clone());
                }
            }
        }
        for child in children {
            if !loaded.contains_key(&child) {
                debug!(parent = %id, child = %child, "Unresolved fork child");
                tree.unresolved.insert(child);
            } else if !visited.contains(&child) {
                stack.push(child);
            }
        }
        tree.nodes.insert(id, doc.clone());
    }

    // The upward path is lineage even where child links are missing.
    for id in path {
        if let Some(doc) = loaded.get(&id) {
            tree.nodes.entry(id).or_insert_with(|| doc.clone());
        }
    }

    tree
}

/// Loads records from one or more collection namespaces and resolves.
#[derive(Clone)]
pub struct ForkTreeResolver {
    store: CollectionStore,
}

impl ForkTreeResolver {
    pub fn new(store: CollectionStore) -> Self {
        Self { store }
    }

    /// `namespaces` must name every collection the caller wants considered;
    /// children living elsewhere come back as unresolved.
    pub async fn resolve(&self, target: &DocumentId, namespaces: &[String]) -> Result<ForkTree> {
        let mut records = Vec::new();
        for namespace in namespaces {
            records.extend(self.store.load_records(namespace).await?);
        }
        let tree = resolve_fork_tree(target, records);
        debug!(
            target = %target,
            root = %tree.root,
            nodes = tree.len(),
            unresolved = tree.unresolved.len(),
            "Resolved fork tree"
        );
        Ok(tree)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use commonplace_shared::types::UserId;

    use super::*;
    use crate::backend::StoreConfig;
    use crate::memory::MemoryKv;
    use crate::models::{DocumentMetadata, QuoteMetadata};
    use crate::versioning::{fork_document, link_child, ForkRequest};

    fn doc(id: &str, parent: Option<&str>, children: &[&str]) -> Document {
        let mut d = Document::new(
            UserId([1; 32]),
            id,
            "",
            DocumentMetadata::Quote(QuoteMetadata::default()),
            0,
        );
        d.id = DocumentId::from(id);
        d.parent_document_id = parent.map(DocumentId::from);
        d.child_document_ids = children.iter().map(|c| DocumentId::from(*c)).collect();
        d
    }

    fn chain() -> Vec<Document> {
        vec![
            doc("root", None, &["child1"]),
            doc("child1", Some("root"), &["child2"]),
            doc("child2", Some("child1"), &[]),
        ]
    }

    #[test]
    fn test_chain_resolves_from_any_node() {
        for target in ["root", "child1", "child2"] {
            let tree = resolve_fork_tree(&DocumentId::from(target), chain());
            assert_eq!(tree.root, DocumentId::from("root"), "target {target}");
            assert_eq!(tree.len(), 3);
            assert!(tree.unresolved.is_empty());
        }
    }

    #[test]
    fn test_two_node_cycle_terminates() {
        let records = vec![doc("A", Some("B"), &["B"]), doc("B", Some("A"), &["A"])];
        let tree = resolve_fork_tree(&DocumentId::from("A"), records);
        assert_eq!(tree.root, DocumentId::from("A"));
        assert!(!tree.is_empty());
        assert!(tree.contains(&DocumentId::from("B")));
    }

    #[test]
    fn test_self_parent_terminates() {
        let records = vec![doc("A", Some("A"), &["A"])];
        let tree = resolve_fork_tree(&DocumentId::from("A"), records);
        assert_eq!(tree.root, DocumentId::from("A"));
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_dangling_children_reported_not_fatal() {
        let records = vec![doc("root", None, &["elsewhere", "child1"]), doc("child1", Some("root"), &[])];
        let tree = resolve_fork_tree(&DocumentId::from("child1"), records);
        assert_eq!(tree.len(), 2);
        assert!(tree.unresolved.contains(&DocumentId::from("elsewhere")));
    }

    #[test]
    fn test_missing_parent_makes_target_root() {
        let records = vec![doc("orphan", Some("gone"), &[])];
        let tree = resolve_fork_tree(&DocumentId::from("orphan"), records);
        assert_eq!(tree.root, DocumentId::from("orphan"));
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_missing_target_gives_empty_tree() {
        let tree = resolve_fork_tree(&DocumentId::from("ghost"), chain());
        assert!(tree.is_empty());
        assert!(tree.unresolved.contains(&DocumentId::from("ghost")));
    }

    #[test]
    fn test_unlinked_fork_found_by_parent_pointer() {
        let records = vec![
            doc("root", None, &[]),
            doc("silent-fork", Some("root"), &[]),
            doc("sibling", Some("root"), &[]),
        ];
        let tree = resolve_fork_tree(&DocumentId::from("sibling"), records);
        assert_eq!(tree.len(), 3);
        assert_eq!(tree.children_of(&DocumentId::from("root")).len(), 2);
    }

    #[test]
    fn test_highest_version_wins_for_duplicates() {
        let stale = doc("root", None, &[]);
        let mut fresh = doc("root", None, &["child1"]);
        fresh.version = 3;
        let records = vec![fresh, stale, doc("child1", Some("root"), &[])];
        let tree = resolve_fork_tree(&DocumentId::from("root"), records);
        assert_eq!(tree.nodes[&DocumentId::from("root")].version, 3);
    }

    #[tokio::test]
    async fn test_resolver_spans_namespaces() {
        let kv = MemoryKv::new();
        let store = CollectionStore::new(Arc::new(kv), StoreConfig::default());
        let owner = UserId([1; 32]);
        let forker = UserId([2; 32]);

        let mut root = doc("root", None, &[]);
        root.uploaded_by = owner;
        let child = fork_document(&root, &forker, ForkRequest::silent("mine"), 1).unwrap();
        link_child(&mut root, &child.id);
        store.add_document("ns-a", &root).await.unwrap();
        store.add_document("ns-b", &child).await.unwrap();

        let resolver = ForkTreeResolver::new(store);
        let single = resolver
            .resolve(&DocumentId::from("root"), &["ns-a".to_string()])
            .await
            .unwrap();
        assert_eq!(single.len(), 1);
        assert!(single.unresolved.contains(&child.id));

        let both = resolver
            .resolve(&child.id, &["ns-a".to_string(), "ns-b".to_string()])
            .await
            .unwrap();
        assert_eq!(both.root, DocumentId::from("root"));
        assert_eq!(both.len(), 2);
        assert!(both.unresolved.is_empty());
    }
}
