//! # commonplace-node
//!
//! One commonplace peer: local collections and registry, a gossipsub swarm
//! over QUIC, and signed presence announcing this peer's collections.

mod config;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use commonplace_net::{GossipPubSub, LocalProfile, PresenceEvent, PresenceService};
use commonplace_shared::{Identity, Signer};
use commonplace_store::{CollectionRegistry, CollectionStore, Discovery, KvStore, MemoryKv};

use crate::config::NodeConfig;

const ONLINE_LOG_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,commonplace_node=debug")),
        )
        .init();

    info!("Starting commonplace node v{}", env!("CARGO_PKG_VERSION"));

    let config = NodeConfig::from_env();
    info!(?config, "Loaded configuration");

    // Identity
    let identity = match &config.identity_secret {
        Some(secret) => Identity::from_secret_hex(secret)?,
        None => {
            warn!("IDENTITY_SECRET not set, running under a fresh identity");
            Identity::generate()
        }
    };
    let user = identity.user_id();
    let keypair = libp2p::identity::Keypair::ed25519_from_bytes(identity.derive_transport_seed())?;
    let signer: Arc<dyn Signer> = Arc::new(identity);
    info!(user = %user, "Identity ready");

    // Storage
    let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
    let store = CollectionStore::new(kv.clone(), config.store_config());
    let registry = CollectionRegistry::new(kv, config.store_config());
    let discovery = Discovery::new(registry.clone(), store.clone());

    if let Some(name) = &config.collection_name {
        let collection = store.create_collection(&user, name, "").await?;
        registry.register(&user, &collection.store_name).await?;
    }

    let (summaries_tx, summaries_rx) =
        watch::channel(discovery.collection_summaries(&user).await?);
    let refresher = tokio::spawn(refresh_summaries(
        discovery.clone(),
        user,
        summaries_tx,
        config.heartbeat,
    ));

    // Network and presence
    let gossip = GossipPubSub::start(keypair, config.swarm_config()).await?;
    let presence = PresenceService::new(
        Arc::new(gossip.clone()),
        signer,
        LocalProfile {
            peer_id: gossip.local_peer_id().to_string(),
            username: config.username.clone(),
        },
        config.presence_config(),
        summaries_rx,
    )
    .start()
    .await?;

    let mut events = presence.subscribe().await;
    let event_logger = tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Presence event log lagging");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            match event {
                PresenceEvent::Joined(entry) => {
                    info!(user = %entry.username, peer = %entry.peer_id, "Peer online");
                }
                PresenceEvent::Expired { owner } => info!(owner = %owner.short(), "Peer expired"),
                PresenceEvent::LeaveNotice { peer_id, .. } => {
                    info!(peer = %peer_id, "Peer announced leaving");
                }
                other => debug!(event = ?other, "Presence event"),
            }
        }
    });

    info!(peer_id = %gossip.local_peer_id(), "Node running, Ctrl+C to stop");

    let mut ticker = tokio::time::interval(ONLINE_LOG_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let online = presence.online_users().await;
                let offline = presence.offline_users().await;
                info!(online = online.len(), offline = offline.len(), "Presence snapshot");
                for entry in &online {
                    debug!(
                        user = %entry.username,
                        collections = entry.collections.len(),
                        "Online"
                    );
                }
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "Signal handler failed");
                }
                break;
            }
        }
    }

    info!("Shutting down");
    presence.shutdown().await;
    refresher.abort();
    event_logger.abort();
    if let Err(e) = gossip.shutdown().await {
        warn!(error = %e, "Swarm already stopped");
    }

    Ok(())
}

/// Keep the announced collection summaries current for the heartbeat task.
async fn refresh_summaries(
    discovery: Discovery,
    user: commonplace_shared::UserId,
    tx: watch::Sender<Vec<commonplace_shared::protocol::CollectionSummary>>,
    period: Duration,
) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        match discovery.collection_summaries(&user).await {
            Ok(summaries) => {
                tx.send_replace(summaries);
            }
            Err(e) => warn!(error = %e, "Could not refresh collection summaries"),
        }
    }
}
