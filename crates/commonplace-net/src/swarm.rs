//! Swarm event loop in its own task, driven through command and
//! notification channels.

use futures::StreamExt;
use libp2p::{
    gossipsub, identify, kad, multiaddr::Protocol, swarm::SwarmEvent, Multiaddr, PeerId, Swarm,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use commonplace_shared::constants::DEFAULT_QUIC_PORT;

use crate::behaviour::{CommonplaceBehaviour, CommonplaceEvent};
use crate::error::NetError;
use crate::transport::build_swarm;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug)]
pub enum SwarmCommand {
    Publish {
        topic: String,
        data: Vec<u8>,
        reply: oneshot::Sender<Result<(), NetError>>,
    },
    Subscribe {
        topic: String,
        reply: oneshot::Sender<Result<(), NetError>>,
    },
    Shutdown,
}

#[derive(Debug, Clone)]
pub enum SwarmNotification {
    PeerConnected { peer_id: PeerId, address: Multiaddr },
    PeerDisconnected { peer_id: PeerId },
    MessageReceived {
        source: Option<PeerId>,
        topic: String,
        data: Vec<u8>,
    },
}

#[derive(Debug, Clone)]
pub struct SwarmConfig {
    pub listen_port: u16,
    /// Dialed at startup and added to Kademlia when they carry a `/p2p/` id.
    pub bootstrap: Vec<Multiaddr>,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            listen_port: DEFAULT_QUIC_PORT,
            bootstrap: Vec::new(),
        }
    }
}

/// Build the swarm, start listening and dialing, and spawn the event loop.
pub async fn spawn_swarm(
    keypair: libp2p::identity::Keypair,
    config: SwarmConfig,
) -> anyhow::Result<(
    mpsc::Sender<SwarmCommand>,
    mpsc::Receiver<SwarmNotification>,
    PeerId,
)> {
    let mut swarm = build_swarm(keypair)?;
    let local_peer_id = *swarm.local_peer_id();

    let v4: Multiaddr = format!("/ip4/0.0.0.0/udp/{}/quic-v1", config.listen_port).parse()?;
    let v6: Multiaddr = format!("/ip6/::/udp/{}/quic-v1", config.listen_port).parse()?;
    swarm.listen_on(v4)?;
    if let Err(e) = swarm.listen_on(v6) {
        warn!(error = %e, "IPv6 listen failed");
    }
    info!(peer_id = %local_peer_id, port = config.listen_port, "Swarm listening");

    dial_bootstrap(&mut swarm, &config.bootstrap);

    let (cmd_tx, cmd_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (notif_tx, notif_rx) = mpsc::channel(CHANNEL_CAPACITY);
    tokio::spawn(run(swarm, cmd_rx, notif_tx));

    Ok((cmd_tx, notif_rx, local_peer_id))
}

fn dial_bootstrap(swarm: &mut Swarm<CommonplaceBehaviour>, addrs: &[Multiaddr]) {
    let mut known = 0;
    for addr in addrs {
        if let Err(e) = swarm.dial(addr.clone()) {
            warn!(addr = %addr, error = %e, "Failed to dial bootstrap peer");
            continue;
        }
        if let Some(peer_id) = extract_peer_id(addr) {
            swarm.behaviour_mut().kademlia.add_address(&peer_id, addr.clone());
            known += 1;
        }
        debug!(addr = %addr, "Dialing bootstrap peer");
    }
    if known > 0 {
        if let Err(e) = swarm.behaviour_mut().kademlia.bootstrap() {
            warn!(error = %e, "Kademlia bootstrap failed to start");
        }
    }
}

async fn run(
    mut swarm: Swarm<CommonplaceBehaviour>,
    mut commands: mpsc::Receiver<SwarmCommand>,
    notifications: mpsc::Sender<SwarmNotification>,
) {
    loop {
        tokio::select! {
            cmd = commands.recv() => {
                let Some(cmd) = cmd else {
                    info!("Command channel closed, shutting down swarm");
                    break;
                };
                if !handle_command(&mut swarm, cmd) {
                    info!("Swarm shutdown requested");
                    break;
                }
            }
            event = swarm.select_next_some() => {
                if let Some(notification) = handle_event(&mut swarm, event) {
                    if notifications.send(notification).await.is_err() {
                        debug!("Notification receiver dropped");
                    }
                }
            }
        }
    }
    info!("Swarm event loop terminated");
}

/// Returns false on shutdown.
fn handle_command(swarm: &mut Swarm<CommonplaceBehaviour>, cmd: SwarmCommand) -> bool {
    match cmd {
        SwarmCommand::Publish { topic, data, reply } => {
            let result = match swarm
                .behaviour_mut()
                .gossipsub
                .publish(gossipsub::IdentTopic::new(&topic), data)
            {
                Ok(_) => Ok(()),
                // Nobody is listening yet; nothing to deliver.
                Err(gossipsub::PublishError::InsufficientPeers) => {
                    debug!(topic = %topic, "No peers on topic");
                    Ok(())
                }
                Err(e) => Err(NetError::Transport(format!("publish on {topic}: {e}"))),
            };
            let _ = reply.send(result);
        }
        SwarmCommand::Subscribe { topic, reply } => {
            let result = swarm
                .behaviour_mut()
                .gossipsub
                .subscribe(&gossipsub::IdentTopic::new(&topic))
                .map(|_| ())
                .map_err(|e| NetError::Transport(format!("subscribe to {topic}: {e}")));
            let _ = reply.send(result);
        }
        SwarmCommand::Shutdown => return false,
    }
    true
}

fn handle_event(
    swarm: &mut Swarm<CommonplaceBehaviour>,
    event: SwarmEvent<CommonplaceEvent>,
) -> Option<SwarmNotification> {
    match event {
        SwarmEvent::Behaviour(CommonplaceEvent::Gossipsub(gossipsub::Event::Message {
            message,
            ..
        })) => {
            let topic = message.topic.to_string();
            debug!(topic = %topic, source = ?message.source, len = message.data.len(), "Gossip message");
            Some(SwarmNotification::MessageReceived {
                source: message.source,
                topic,
                data: message.data,
            })
        }
        SwarmEvent::Behaviour(CommonplaceEvent::Identify(identify::Event::Received {
            peer_id,
            info,
            ..
        })) => {
            for addr in info.listen_addrs {
                swarm.behaviour_mut().kademlia.add_address(&peer_id, addr);
            }
            None
        }
        SwarmEvent::Behaviour(CommonplaceEvent::Kademlia(
            kad::Event::OutboundQueryProgressed { result, .. },
        )) => {
            debug!(result = ?result, "Kademlia query progressed");
            None
        }
        SwarmEvent::ConnectionEstablished {
            peer_id, endpoint, ..
        } => {
            let address = endpoint.get_remote_address().clone();
            info!(peer = %peer_id, addr = %address, "Peer connected");
            Some(SwarmNotification::PeerConnected { peer_id, address })
        }
        SwarmEvent::ConnectionClosed {
            peer_id,
            num_established: 0,
            ..
        } => {
            info!(peer = %peer_id, "Peer disconnected");
            Some(SwarmNotification::PeerDisconnected { peer_id })
        }
        SwarmEvent::NewListenAddr { address, .. } => {
            info!(addr = %address, "Listening on new address");
            None
        }
        SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
            warn!(peer = ?peer_id, error = %error, "Outgoing connection error");
            None
        }
        _ => None,
    }
}

fn extract_peer_id(addr: &Multiaddr) -> Option<PeerId> {
    addr.iter().find_map(|p| match p {
        Protocol::P2p(peer_id) => Some(peer_id),
        _ => None,
    })
}
