//! Presence service: three background tasks per peer.
//!
//! - heartbeat: publish a signed announcement every `heartbeat_interval`
//! - sweep: expire and drop stale entries every `heartbeat_interval / 2`
//! - receive: feed messages from the presence topic into the tracker
//!
//! The receive and sweep tasks both mutate the tracker; it sits behind one
//! mutex owned by this service.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use commonplace_shared::identity::Signer;
use commonplace_shared::protocol::CollectionSummary;
use commonplace_shared::types::now_millis;

use crate::error::Result;
use crate::presence::{
    encode_heartbeat, encode_leaving, PresenceConfig, PresenceEntry, PresenceEvent,
    PresenceTracker, ReceiveOutcome,
};
use crate::pubsub::{bounded, PubSub};

/// How this peer introduces itself.
#[derive(Debug, Clone)]
pub struct LocalProfile {
    /// Transport peer id.
    pub peer_id: String,
    pub username: String,
}

#[derive(Clone)]
struct Broadcaster {
    pubsub: Arc<dyn PubSub>,
    signer: Arc<dyn Signer>,
    profile: LocalProfile,
    config: PresenceConfig,
    collections: watch::Receiver<Vec<CollectionSummary>>,
}

impl Broadcaster {
    async fn heartbeat(&self) -> Result<()> {
        let collections = self.collections.borrow().clone();
        let bytes = encode_heartbeat(
            self.signer.as_ref(),
            &self.profile.peer_id,
            &self.profile.username,
            &collections,
            now_millis(),
            &self.config,
        )?;
        let len = bytes.len();
        bounded(
            "publish",
            self.config.call_timeout,
            self.pubsub.publish(&self.config.topic, Bytes::from(bytes)),
        )
        .await?;
        debug!(len, collections = collections.len(), "Sent presence heartbeat");
        Ok(())
    }

    async fn leaving(&self) -> Result<()> {
        let bytes = encode_leaving(
            self.signer.public_key_bytes(),
            &self.profile.peer_id,
            now_millis(),
        )?;
        bounded(
            "publish",
            self.config.call_timeout,
            self.pubsub.publish(&self.config.topic, Bytes::from(bytes)),
        )
        .await
    }
}

pub struct PresenceService {
    broadcaster: Broadcaster,
}

impl PresenceService {
    pub fn new(
        pubsub: Arc<dyn PubSub>,
        signer: Arc<dyn Signer>,
        profile: LocalProfile,
        config: PresenceConfig,
        collections: watch::Receiver<Vec<CollectionSummary>>,
    ) -> Self {
        Self {
            broadcaster: Broadcaster {
                pubsub,
                signer,
                profile,
                config,
                collections,
            },
        }
    }

    /// Subscribe to the presence topic and spawn the background tasks.
    pub async fn start(self) -> Result<PresenceHandle> {
        let b = self.broadcaster;
        let tracker = Arc::new(Mutex::new(PresenceTracker::new(
            b.signer.public_key_bytes(),
            b.config.clone(),
        )));

        let inbox = bounded(
            "subscribe",
            b.config.call_timeout,
            b.pubsub.subscribe(&b.config.topic),
        )
        .await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tasks = vec![
            tokio::spawn(receive_loop(tracker.clone(), inbox, shutdown_rx.clone())),
            tokio::spawn(heartbeat_loop(b.clone(), shutdown_rx.clone())),
            tokio::spawn(sweep_loop(
                tracker.clone(),
                b.config.sweep_interval(),
                shutdown_rx,
            )),
        ];

        info!(
            peer = %b.profile.peer_id,
            user = %b.profile.username,
            topic = %b.config.topic,
            "Presence started"
        );

        Ok(PresenceHandle {
            tracker,
            broadcaster: b,
            shutdown_tx,
            tasks,
        })
    }
}

/// Running presence for one peer.
pub struct PresenceHandle {
    tracker: Arc<Mutex<PresenceTracker>>,
    broadcaster: Broadcaster,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl PresenceHandle {
    pub async fn subscribe(&self) -> broadcast::Receiver<PresenceEvent> {
        self.tracker.lock().await.subscribe()
    }

    pub async fn online_users(&self) -> Vec<PresenceEntry> {
        self.tracker.lock().await.online_users(now_millis())
    }

    pub async fn offline_users(&self) -> Vec<PresenceEntry> {
        self.tracker.lock().await.offline_users(now_millis())
    }

    /// Publish a heartbeat now, outside the timer.
    pub async fn send_heartbeat(&self) -> Result<()> {
        self.broadcaster.heartbeat().await
    }

    /// Stop the tasks and send the unsigned leave notice. Failure to send
    /// is logged and otherwise ignored.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Presence task ended abnormally");
            }
        }
        if let Err(e) = self.broadcaster.leaving().await {
            warn!(error = %e, "Leave notice not sent");
        }
        info!("Presence stopped");
    }
}

async fn receive_loop(
    tracker: Arc<Mutex<PresenceTracker>>,
    mut inbox: mpsc::Receiver<Bytes>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            message = inbox.recv() => {
                let Some(data) = message else {
                    warn!("Presence subscription closed");
                    break;
                };
                let outcome = tracker.lock().await.receive(&data, now_millis());
                if outcome == ReceiveOutcome::Accepted {
                    debug!(len = data.len(), "Accepted presence heartbeat");
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

async fn heartbeat_loop(broadcaster: Broadcaster, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(broadcaster.config.heartbeat_period());
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = broadcaster.heartbeat().await {
                    warn!(error = %e, "Heartbeat not sent");
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

async fn sweep_loop(
    tracker: Arc<Mutex<PresenceTracker>>,
    period: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                tracker.lock().await.sweep(now_millis());
            }
            _ = shutdown.changed() => break,
        }
    }
}
