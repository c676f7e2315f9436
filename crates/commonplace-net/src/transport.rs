use std::time::Duration;

use libp2p::gossipsub::{self, MessageAuthenticity, MessageId, ValidationMode};
use libp2p::identity::Keypair;
use libp2p::kad::{self, store::MemoryStore};
use libp2p::{identify, Swarm, SwarmBuilder};
use tracing::info;

use commonplace_shared::constants::{GOSSIPSUB_HEARTBEAT_SECS, MAX_MESSAGE_SIZE, PROTOCOL_VERSION};

use crate::behaviour::CommonplaceBehaviour;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Gossipsub message id: blake3 over source and payload, so a re-published
/// identical heartbeat from the same peer is deduplicated.
fn message_id(message: &gossipsub::Message) -> MessageId {
    let mut hasher = blake3::Hasher::new();
    if let Some(source) = &message.source {
        hasher.update(&source.to_bytes());
    }
    hasher.update(&message.data);
    MessageId::from(hasher.finalize().to_hex().to_string())
}

fn build_behaviour(key: &Keypair) -> Result<CommonplaceBehaviour, BoxError> {
    let local_peer_id = key.public().to_peer_id();

    let gossipsub_config = gossipsub::ConfigBuilder::default()
        .heartbeat_interval(Duration::from_secs(GOSSIPSUB_HEARTBEAT_SECS))
        .validation_mode(ValidationMode::Strict)
        .max_transmit_size(MAX_MESSAGE_SIZE)
        .message_id_fn(message_id)
        .build()
        .map_err(|e| -> BoxError { format!("gossipsub config: {e}").into() })?;
    let gossipsub =
        gossipsub::Behaviour::new(MessageAuthenticity::Signed(key.clone()), gossipsub_config)
            .map_err(|e| -> BoxError { format!("gossipsub init: {e}").into() })?;

    let mut kademlia = kad::Behaviour::new(local_peer_id, MemoryStore::new(local_peer_id));
    kademlia.set_mode(Some(kad::Mode::Server));

    let identify = identify::Behaviour::new(
        identify::Config::new(PROTOCOL_VERSION.to_string(), key.public())
            .with_push_listen_addr_updates(true)
            .with_interval(Duration::from_secs(60)),
    );

    Ok(CommonplaceBehaviour {
        gossipsub,
        kademlia,
        identify,
    })
}

/// Build a QUIC-only swarm. Peers are expected to be directly reachable or
/// to share a bootstrap node.
pub fn build_swarm(keypair: Keypair) -> anyhow::Result<Swarm<CommonplaceBehaviour>> {
    let swarm = SwarmBuilder::with_existing_identity(keypair)
        .with_tokio()
        .with_quic()
        .with_behaviour(build_behaviour)?
        .with_swarm_config(|cfg| cfg.with_idle_connection_timeout(Duration::from_secs(60)))
        .build();

    info!(peer_id = %swarm.local_peer_id(), "Built swarm over QUIC");
    Ok(swarm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_swarm_keeps_identity() {
        let keypair = Keypair::generate_ed25519();
        let expected = keypair.public().to_peer_id();
        let swarm = build_swarm(keypair).unwrap();
        assert_eq!(*swarm.local_peer_id(), expected);
    }
}
