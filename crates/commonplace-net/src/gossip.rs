//! [`PubSub`] over the libp2p swarm.
//!
//! Gossipsub does not echo a peer's own messages back to it, unlike
//! [`crate::MemoryPubSub`].

use async_trait::async_trait;
use bytes::Bytes;
use libp2p::identity::Keypair;
use libp2p::PeerId;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::error::{NetError, Result};
use crate::pubsub::{PubSub, Subscribers};
use crate::swarm::{spawn_swarm, SwarmCommand, SwarmConfig, SwarmNotification};

#[derive(Clone)]
pub struct GossipPubSub {
    commands: mpsc::Sender<SwarmCommand>,
    subscribers: Subscribers,
    local_peer_id: PeerId,
}

impl GossipPubSub {
    /// Spawn the swarm and the task that fans its messages out to subscribers.
    pub async fn start(keypair: Keypair, config: SwarmConfig) -> anyhow::Result<Self> {
        let (commands, notifications, local_peer_id) = spawn_swarm(keypair, config).await?;
        let subscribers = Subscribers::default();
        tokio::spawn(dispatch(notifications, subscribers.clone()));
        Ok(Self {
            commands,
            subscribers,
            local_peer_id,
        })
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(SwarmCommand::Shutdown).await
    }

    async fn send(&self, cmd: SwarmCommand) -> Result<()> {
        self.commands
            .send(cmd)
            .await
            .map_err(|_| NetError::Transport("swarm task stopped".to_string()))
    }

    async fn request(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<()>>) -> SwarmCommand,
    ) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.send(make(reply)).await?;
        response
            .await
            .map_err(|_| NetError::Transport("swarm task dropped the request".to_string()))?
    }
}

#[async_trait]
impl PubSub for GossipPubSub {
    async fn publish(&self, topic: &str, data: Bytes) -> Result<()> {
        let topic = topic.to_string();
        self.request(|reply| SwarmCommand::Publish {
            topic,
            data: data.to_vec(),
            reply,
        })
        .await
    }

    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<Bytes>> {
        let inbox = self.subscribers.add(topic).await;
        let topic = topic.to_string();
        self.request(|reply| SwarmCommand::Subscribe { topic, reply })
            .await?;
        Ok(inbox)
    }
}

async fn dispatch(mut notifications: mpsc::Receiver<SwarmNotification>, subscribers: Subscribers) {
    while let Some(notification) = notifications.recv().await {
        match notification {
            SwarmNotification::MessageReceived { topic, data, source } => {
                let delivered = subscribers.deliver(&topic, &Bytes::from(data)).await;
                debug!(topic = %topic, source = ?source, delivered, "Dispatched gossip message");
            }
            SwarmNotification::PeerConnected { peer_id, .. } => {
                debug!(peer = %peer_id, "Gossip peer up");
            }
            SwarmNotification::PeerDisconnected { peer_id } => {
                debug!(peer = %peer_id, "Gossip peer down");
            }
        }
    }
    info!("Gossip dispatch stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lonely_peer_can_subscribe_and_publish() {
        let keypair = Keypair::generate_ed25519();
        let expected = keypair.public().to_peer_id();
        let gossip = GossipPubSub::start(
            keypair,
            SwarmConfig {
                listen_port: 0,
                bootstrap: Vec::new(),
            },
        )
        .await
        .unwrap();
        assert_eq!(gossip.local_peer_id(), expected);

        let _inbox = gossip.subscribe("commonplace/test").await.unwrap();
        gossip
            .publish("commonplace/test", Bytes::from_static(b"hello"))
            .await
            .unwrap();

        gossip.shutdown().await.unwrap();
    }
}
