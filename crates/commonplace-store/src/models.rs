//! Records persisted in collection namespaces and the registry.
//!
//! Everything is stored as camelCase JSON so records written by other
//! peers remain readable field-for-field.

use serde::{Deserialize, Serialize};

use commonplace_shared::types::{DocumentId, Millis, UserId};

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Quote,
    Link,
    Image,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct QuoteMetadata {
    pub content: String,
    pub author: String,
    #[serde(default)]
    pub publisher: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct LinkMetadata {
    pub url: String,
    #[serde(default)]
    pub site_name: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ImageMetadata {
    /// Content id in the blob store.
    pub blob_id: String,
    pub content_type: String,
    pub size: u64,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Type-tagged metadata. The variant is fixed for the life of a document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "documentType", rename_all = "lowercase")]
pub enum DocumentMetadata {
    Quote(QuoteMetadata),
    Link(LinkMetadata),
    Image(ImageMetadata),
}

impl DocumentMetadata {
    pub fn document_type(&self) -> DocumentType {
        match self {
            DocumentMetadata::Quote(_) => DocumentType::Quote,
            DocumentMetadata::Link(_) => DocumentType::Link,
            DocumentMetadata::Image(_) => DocumentType::Image,
        }
    }
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Written by an in-place edit; `version` is the pre-edit version.
    #[default]
    Edit,
    /// Written once, at fork time, holding the parent's metadata.
    Fork,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VersionEntry {
    pub version: u32,
    #[serde(default)]
    pub kind: EntryKind,
    pub edited_by: UserId,
    pub edited_at: Millis,
    pub change_comment: String,
    pub previous_metadata: DocumentMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: DocumentId,
    pub title: String,
    pub description: String,
    pub metadata: DocumentMetadata,
    pub version: u32,
    pub version_history: Vec<VersionEntry>,
    #[serde(default)]
    pub parent_document_id: Option<DocumentId>,
    #[serde(default)]
    pub child_document_ids: Vec<DocumentId>,
    /// Owner of this copy. Differs from the parent's for a fork.
    pub uploaded_by: UserId,
    pub created: Millis,
    pub last_accessed: Millis,
    /// Tombstone flag; the record stays so lineage can still be resolved.
    #[serde(default)]
    pub deleted: bool,
}

impl Document {
    /// A fresh version-1 document with no history and no lineage.
    pub fn new(
        owner: UserId,
        title: impl Into<String>,
        description: impl Into<String>,
        metadata: DocumentMetadata,
        now: Millis,
    ) -> Self {
        Self {
            id: DocumentId::new(),
            title: title.into(),
            description: description.into(),
            metadata,
            version: 1,
            version_history: Vec::new(),
            parent_document_id: None,
            child_document_ids: Vec::new(),
            uploaded_by: owner,
            created: now,
            last_accessed: now,
            deleted: false,
        }
    }

    pub fn document_type(&self) -> DocumentType {
        self.metadata.document_type()
    }

    pub fn is_fork(&self) -> bool {
        self.parent_document_id.is_some()
    }

    /// History entries written by in-place edits.
    pub fn edit_entries(&self) -> impl Iterator<Item = &VersionEntry> {
        self.version_history
            .iter()
            .filter(|entry| entry.kind == EntryKind::Edit)
    }

    /// Edit entries number `version - 1` and read `1, 2, .., version - 1`;
    /// a fork carries at most one leading fork entry.
    pub fn history_is_consistent(&self) -> bool {
        let forks = self
            .version_history
            .iter()
            .filter(|entry| entry.kind == EntryKind::Fork)
            .count();
        let fork_prefix_ok = match forks {
            0 => true,
            1 => self.version_history[0].kind == EntryKind::Fork,
            _ => false,
        };

        let edits: Vec<u32> = self.edit_entries().map(|entry| entry.version).collect();
        let expected: Vec<u32> = (1..self.version).collect();
        fork_prefix_ok && edits == expected
    }

    pub fn has_child(&self, id: &DocumentId) -> bool {
        self.child_document_ids.contains(id)
    }
}

// ---------------------------------------------------------------------------
// Collection
// ---------------------------------------------------------------------------

/// Metadata record of a collection namespace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    /// Namespace name; unique network-wide.
    pub store_name: String,
    pub name: String,
    pub description: String,
    pub owner: UserId,
    /// Advisory only; may drift under concurrent writers.
    pub document_count: u64,
    pub created: Millis,
    pub last_updated: Millis,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    pub collections: Vec<String>,
}
