//! Document Versioning Engine.
//!
//! Versions move forward only. An edit appends the pre-edit state to the
//! history and bumps `version`; a fork starts a new, independently owned
//! lineage member at version 1 and then links it back into the parent's
//! `childDocumentIds` with a second, non-transactional write.
//!
//! Edits are read-then-write against the store. Two concurrent edits of the
//! same id both succeed and the later write wins; the other's history entry
//! is lost. Nothing here detects that.

use tracing::{debug, info, warn};

use commonplace_shared::types::{now_millis, DocumentId, Millis, UserId};

use crate::collections::CollectionStore;
use crate::error::{Result, StoreError};
use crate::models::{Document, DocumentMetadata, EntryKind, VersionEntry};

#[derive(Debug, Clone)]
pub struct EditRequest {
    pub metadata: DocumentMetadata,
    pub change_comment: String,
    pub title: Option<String>,
    pub description: Option<String>,
    /// Client-generated key; an edit whose key is already in the history
    /// is not applied again.
    pub idempotency_key: Option<String>,
}

impl EditRequest {
    pub fn new(metadata: DocumentMetadata, change_comment: impl Into<String>) -> Self {
        Self {
            metadata,
            change_comment: change_comment.into(),
            title: None,
            description: None,
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct ForkRequest {
    /// Required; recorded on the fork entry.
    pub change_comment: String,
    /// `None` forks silently with the parent's metadata.
    pub metadata: Option<DocumentMetadata>,
    pub title: Option<String>,
    pub description: Option<String>,
    /// Makes the child id deterministic so a retried fork rewrites the
    /// same record.
    pub idempotency_key: Option<String>,
}

impl ForkRequest {
    pub fn silent(change_comment: impl Into<String>) -> Self {
        Self {
            change_comment: change_comment.into(),
            metadata: None,
            title: None,
            description: None,
            idempotency_key: None,
        }
    }

    pub fn with_metadata(change_comment: impl Into<String>, metadata: DocumentMetadata) -> Self {
        Self {
            metadata: Some(metadata),
            ..Self::silent(change_comment)
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    Applied { from: u32, to: u32 },
    AlreadyApplied,
}

/// Result of a fork. The child is always written when this is returned;
/// `link_error` carries a failed parent link-back for the caller to retry
/// via [`VersioningEngine::link_child`].
#[derive(Debug)]
pub struct ForkOutcome {
    pub document: Document,
    pub link_error: Option<StoreError>,
}

impl ForkOutcome {
    pub fn is_linked(&self) -> bool {
        self.link_error.is_none()
    }
}

fn ensure_same_type(doc: &Document, metadata: &DocumentMetadata) -> Result<()> {
    let expected = doc.document_type();
    let found = metadata.document_type();
    if expected != found {
        return Err(StoreError::TypeMismatch { expected, found });
    }
    Ok(())
}

/// Apply an edit in memory.
pub fn apply_edit(
    doc: &mut Document,
    editor: &UserId,
    request: EditRequest,
    now: Millis,
) -> Result<EditOutcome> {
    ensure_same_type(doc, &request.metadata)?;

    if let Some(key) = &request.idempotency_key {
        let seen = doc
            .version_history
            .iter()
            .any(|entry| entry.idempotency_key.as_deref() == Some(key.as_str()));
        if seen {
            return Ok(EditOutcome::AlreadyApplied);
        }
    }

    let old_version = doc.version;
    let previous = std::mem::replace(&mut doc.metadata, request.metadata);
    doc.version_history.push(VersionEntry {
        version: old_version,
        kind: EntryKind::Edit,
        edited_by: *editor,
        edited_at: now,
        change_comment: request.change_comment,
        previous_metadata: previous,
        idempotency_key: request.idempotency_key,
    });
    if let Some(title) = request.title {
        doc.title = title;
    }
    if let Some(description) = request.description {
        doc.description = description;
    }
    doc.version = old_version + 1;
    doc.last_accessed = now;

    Ok(EditOutcome::Applied {
        from: old_version,
        to: doc.version,
    })
}

/// Build the child of a fork in memory. The source is not touched.
pub fn fork_document(
    source: &Document,
    forker: &UserId,
    request: ForkRequest,
    now: Millis,
) -> Result<Document> {
    if request.change_comment.trim().is_empty() {
        return Err(StoreError::InvalidInput(
            "a fork requires a change comment".to_string(),
        ));
    }
    if let Some(metadata) = &request.metadata {
        ensure_same_type(source, metadata)?;
    }

    let id = match &request.idempotency_key {
        Some(key) => DocumentId::derived_for_fork(&source.id, forker, key),
        None => DocumentId::new(),
    };

    Ok(Document {
        id,
        title: request.title.unwrap_or_else(|| source.title.clone()),
        description: request
            .description
            .unwrap_or_else(|| source.description.clone()),
        metadata: request.metadata.unwrap_or_else(|| source.metadata.clone()),
        version: 1,
        version_history: vec![VersionEntry {
            version: 1,
            kind: EntryKind::Fork,
            edited_by: *forker,
            edited_at: now,
            change_comment: request.change_comment,
            previous_metadata: source.metadata.clone(),
            idempotency_key: request.idempotency_key,
        }],
        parent_document_id: Some(source.id.clone()),
        child_document_ids: Vec::new(),
        uploaded_by: *forker,
        created: now,
        last_accessed: now,
        deleted: false,
    })
}

/// Record `child` on `parent`. Returns false if it was already there.
pub fn link_child(parent: &mut Document, child: &DocumentId) -> bool {
    if parent.has_child(child) {
        return false;
    }
    parent.child_document_ids.push(child.clone());
    true
}

/// Store-backed edit and fork operations.
#[derive(Clone)]
pub struct VersioningEngine {
    store: CollectionStore,
}

impl VersioningEngine {
    pub fn new(store: CollectionStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &CollectionStore {
        &self.store
    }

    /// Create a version-1 document in `namespace`.
    pub async fn create(
        &self,
        namespace: &str,
        owner: &UserId,
        title: &str,
        description: &str,
        metadata: DocumentMetadata,
    ) -> Result<Document> {
        let doc = Document::new(*owner, title, description, metadata, now_millis());
        self.store.add_document(namespace, &doc).await?;
        info!(namespace, doc = %doc.id, kind = ?doc.document_type(), "Created document");
        Ok(doc)
    }

    /// Read, apply, write back. Last writer wins under concurrency.
    pub async fn edit(
        &self,
        namespace: &str,
        id: &DocumentId,
        editor: &UserId,
        request: EditRequest,
    ) -> Result<Document> {
        let mut doc = self.live_document(namespace, id).await?;
        if &doc.uploaded_by != editor {
            return Err(StoreError::NotOwner);
        }

        match apply_edit(&mut doc, editor, request, now_millis())? {
            EditOutcome::Applied { from, to } => {
                self.store.update_document(namespace, id, &doc).await?;
                info!(namespace, doc = %id, from, to, "Edited document");
            }
            EditOutcome::AlreadyApplied => {
                debug!(namespace, doc = %id, "Edit already applied, skipping write");
            }
        }
        Ok(doc)
    }

    /// Fork `source_id` from `source_namespace` into `target_namespace`.
    pub async fn fork(
        &self,
        source_namespace: &str,
        source_id: &DocumentId,
        target_namespace: &str,
        forker: &UserId,
        request: ForkRequest,
    ) -> Result<ForkOutcome> {
        let source = self.live_document(source_namespace, source_id).await?;

        // A retried keyed fork must not rebuild a child that may have been
        // edited since; only the link-back is repeated.
        let existing = match &request.idempotency_key {
            Some(key) => {
                let id = DocumentId::derived_for_fork(source_id, forker, key);
                match self.store.get_document(target_namespace, &id).await {
                    Ok(doc) => Some(doc),
                    Err(StoreError::NotFound(_)) => None,
                    Err(e) => return Err(e),
                }
            }
            None => None,
        };

        let child = match existing {
            Some(child) => {
                debug!(source = %source_id, child = %child.id, "Fork already written");
                child
            }
            None => {
                let child = fork_document(&source, forker, request, now_millis())?;
                self.store.add_document(target_namespace, &child).await?;
                info!(
                    source = %source_id,
                    child = %child.id,
                    target = target_namespace,
                    "Forked document"
                );
                child
            }
        };

        let link_error = match self.link_child(source_namespace, source_id, &child.id).await {
            Ok(()) => None,
            Err(e) => {
                warn!(
                    source = %source_id,
                    child = %child.id,
                    error = %e,
                    "Fork written but parent link-back failed"
                );
                Some(e)
            }
        };

        Ok(ForkOutcome {
            document: child,
            link_error,
        })
    }

    /// Tombstoned documents can be neither edited nor forked.
    async fn live_document(&self, namespace: &str, id: &DocumentId) -> Result<Document> {
        let doc = self.store.get_document(namespace, id).await?;
        if doc.deleted {
            return Err(StoreError::NotFound(format!("document {id} in {namespace} (deleted)")));
        }
        Ok(doc)
    }

    /// Add `child_id` to the parent's `childDocumentIds`. Re-reads the parent
    /// so a retry picks up writes made since the fork; safe to repeat.
    pub async fn link_child(
        &self,
        namespace: &str,
        parent_id: &DocumentId,
        child_id: &DocumentId,
    ) -> Result<()> {
        let mut parent = self.store.get_document(namespace, parent_id).await?;
        if link_child(&mut parent, child_id) {
            self.store
                .update_document(namespace, parent_id, &parent)
                .await?;
            debug!(parent = %parent_id, child = %child_id, "Linked child to parent");
        }
        Ok(())
    }
}
