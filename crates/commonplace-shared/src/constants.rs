/// Protocol version string for libp2p identify
pub const PROTOCOL_VERSION: &str = "/commonplace/1.0.0";

/// Maximum GossipSub message size in bytes (64 KiB)
pub const MAX_MESSAGE_SIZE: usize = 65_536;

/// GossipSub heartbeat interval in seconds
pub const GOSSIPSUB_HEARTBEAT_SECS: u64 = 1;

/// Default QUIC listen port
pub const DEFAULT_QUIC_PORT: u16 = 4001;

/// Well-known pub/sub topic carrying presence heartbeats
pub const PRESENCE_TOPIC: &str = "commonplace/presence/v1";

/// Presence heartbeat period
pub const DEFAULT_HEARTBEAT_SECS: u64 = 30;

/// Entries unseen for longer than this are soft-expired; twice this, removed
pub const PRESENCE_TTL_SECS: u64 = 90;

/// Size ceiling for a serialized presence message
pub const MAX_PRESENCE_PAYLOAD: usize = 4096;

/// Collections summarised in a normal heartbeat
pub const MAX_ANNOUNCED_COLLECTIONS: usize = 5;

/// Collections kept when a heartbeat must be shrunk under the ceiling
pub const TRUNCATED_ANNOUNCED_COLLECTIONS: usize = 3;

/// Presence rate limit: accepted messages per sender per window
pub const PRESENCE_RATE_LIMIT_MAX: usize = 10;
pub const PRESENCE_RATE_LIMIT_WINDOW_MS: u64 = 1000;

/// Default budget for a single call to the store, blob store or transport
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 10_000;

/// Well-known namespace mapping peer ids to the collections they own
pub const REGISTRY_NAMESPACE: &str = "commonplace-registry";

/// Key of the metadata record inside a collection namespace
pub const COLLECTION_METADATA_KEY: &str = "metadata";

/// Prefix of document records inside a collection namespace
pub const DOCUMENT_KEY_PREFIX: &str = "doc/";

/// Key derivation context (BLAKE3) for deterministic fork ids
pub const KDF_CONTEXT_FORK_ID: &str = "commonplace-fork-id-v1";
