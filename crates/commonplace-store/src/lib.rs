//! # commonplace-store
//!
//! Collections of versioned, forkable documents kept in a replicated
//! key-value substrate.
//!
//! The substrate and the content-addressed blob store are external
//! collaborators reached through the [`KvStore`] and [`BlobStore`] traits;
//! [`memory`] provides in-process implementations of both. Every call to a
//! collaborator is bounded by the caller's [`StoreConfig::call_timeout`].

pub mod backend;
pub mod blobs;
pub mod collections;
pub mod discovery;
pub mod fork_tree;
pub mod memory;
pub mod models;
pub mod registry;
pub mod versioning;

mod error;

pub use backend::{BlobStore, KvStore, Namespace, StoreConfig};
pub use collections::CollectionStore;
pub use blobs::ImageStore;
pub use discovery::{Discovery, FeedItem};
pub use error::{Result, StoreError};
pub use fork_tree::{resolve_fork_tree, ForkTree, ForkTreeResolver};
pub use memory::{MemoryBlobStore, MemoryKv};
pub use models::*;
pub use registry::CollectionRegistry;
pub use versioning::{EditOutcome, EditRequest, ForkOutcome, ForkRequest, VersioningEngine};
