// Presence protocol and the pub/sub plumbing it runs over: an in-memory hub
// for tests and single-process use, and a libp2p gossipsub adapter over QUIC.

pub mod behaviour;
pub mod error;
pub mod gossip;
pub mod presence;
pub mod pubsub;
pub mod rate_limit;
pub mod service;
pub mod swarm;
pub mod transport;

pub use behaviour::{CommonplaceBehaviour, CommonplaceEvent};
pub use error::NetError;
pub use gossip::GossipPubSub;
pub use presence::{
    PresenceConfig, PresenceEntry, PresenceEvent, PresenceTracker, ReceiveOutcome, RejectReason,
};
pub use pubsub::{MemoryPubSub, PubSub};
pub use rate_limit::RateLimiter;
pub use service::{LocalProfile, PresenceHandle, PresenceService};
pub use swarm::{spawn_swarm, SwarmCommand, SwarmConfig, SwarmNotification};
pub use transport::build_swarm;
