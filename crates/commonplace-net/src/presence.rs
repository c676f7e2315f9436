//! Presence tracking.
//!
//! [`PresenceTracker`] owns the map of peers heard from and the per-sender
//! rate-limit table. It is plain state with `&mut self` methods taking an
//! explicit `now`; [`crate::service::PresenceService`] serializes access to
//! it behind a mutex shared by the receive loop and the expiry sweep.
//!
//! Rejected messages are dropped, never surfaced as errors: the caller gets
//! a [`ReceiveOutcome`] for logging only.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use commonplace_shared::constants::{
    DEFAULT_CALL_TIMEOUT_MS, DEFAULT_HEARTBEAT_SECS, MAX_ANNOUNCED_COLLECTIONS,
    MAX_PRESENCE_PAYLOAD, PRESENCE_RATE_LIMIT_MAX, PRESENCE_RATE_LIMIT_WINDOW_MS, PRESENCE_TOPIC,
    PRESENCE_TTL_SECS, TRUNCATED_ANNOUNCED_COLLECTIONS,
};
use commonplace_shared::identity::Signer;
use commonplace_shared::protocol::{
    CollectionSummary, PresenceAnnouncement, PresenceMessage, PresenceStatus,
};
use commonplace_shared::types::{Millis, UserId};

use crate::error::{NetError, Result};
use crate::rate_limit::RateLimiter;

const EVENT_BUFFER: usize = 128;

#[derive(Debug, Clone)]
pub struct PresenceConfig {
    pub topic: String,
    pub heartbeat_interval: Duration,
    /// Unseen for longer than this: soft-expired. Twice this: removed.
    pub ttl: Duration,
    pub max_payload_bytes: usize,
    pub max_announced_collections: usize,
    pub truncated_collections: usize,
    pub rate_limit_window: Duration,
    pub rate_limit_max: usize,
    /// Budget for each publish/subscribe call.
    pub call_timeout: Duration,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            topic: PRESENCE_TOPIC.to_string(),
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
            ttl: Duration::from_secs(PRESENCE_TTL_SECS),
            max_payload_bytes: MAX_PRESENCE_PAYLOAD,
            max_announced_collections: MAX_ANNOUNCED_COLLECTIONS,
            truncated_collections: TRUNCATED_ANNOUNCED_COLLECTIONS,
            rate_limit_window: Duration::from_millis(PRESENCE_RATE_LIMIT_WINDOW_MS),
            rate_limit_max: PRESENCE_RATE_LIMIT_MAX,
            call_timeout: Duration::from_millis(DEFAULT_CALL_TIMEOUT_MS),
        }
    }
}

/// Shortest timer period the service will run; `tokio::time::interval`
/// rejects zero.
const MIN_TIMER_PERIOD: Duration = Duration::from_millis(1);

impl PresenceConfig {
    pub fn heartbeat_period(&self) -> Duration {
        self.heartbeat_interval.max(MIN_TIMER_PERIOD)
    }

    pub fn sweep_interval(&self) -> Duration {
        (self.heartbeat_interval / 2).max(MIN_TIMER_PERIOD)
    }

    fn ttl_ms(&self) -> Millis {
        self.ttl.as_millis() as Millis
    }
}

/// What this peer currently believes about another peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEntry {
    pub owner_pub_key: [u8; 32],
    pub peer_id: String,
    pub username: String,
    pub collections: Vec<CollectionSummary>,
    pub status: PresenceStatus,
    /// Sender's timestamp of the newest accepted heartbeat.
    pub ts: Millis,
    pub signature: Vec<u8>,
    /// Local receive time of that heartbeat.
    pub last_seen: Millis,
    pub expired: bool,
}

impl PresenceEntry {
    pub fn user_id(&self) -> UserId {
        UserId(self.owner_pub_key)
    }

    fn is_online(&self, now: Millis, ttl_ms: Millis) -> bool {
        !self.expired && now - self.last_seen <= ttl_ms
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    Joined(PresenceEntry),
    Updated(PresenceEntry),
    Expired { owner: UserId },
    Removed { owner: UserId },
    /// Unsigned; informational only.
    LeaveNotice { owner: UserId, peer_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Oversize,
    Malformed,
    OwnMessage,
    RateLimited,
    InvalidSignature,
    /// `ts` not newer than the held entry's.
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    Accepted,
    LeaveNotice,
    Rejected(RejectReason),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub removed: usize,
}

pub struct PresenceTracker {
    own_key: [u8; 32],
    config: PresenceConfig,
    entries: HashMap<[u8; 32], PresenceEntry>,
    /// Counts accepted heartbeats only.
    limiter: RateLimiter,
    /// Leave notices are unauthenticated and get their own window.
    leave_limiter: RateLimiter,
    events: broadcast::Sender<PresenceEvent>,
}

impl PresenceTracker {
    pub fn new(own_key: [u8; 32], config: PresenceConfig) -> Self {
        let limiter = RateLimiter::new(
            config.rate_limit_window.as_millis() as Millis,
            config.rate_limit_max,
        );
        let leave_limiter = limiter.clone();
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            own_key,
            config,
            entries: HashMap::new(),
            limiter,
            leave_limiter,
            events,
        }
    }

    pub fn config(&self) -> &PresenceConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PresenceEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: PresenceEvent) {
        // no receivers is fine
        let _ = self.events.send(event);
    }

    /// Validate and apply one message from the presence topic.
    pub fn receive(&mut self, data: &[u8], now: Millis) -> ReceiveOutcome {
        let outcome = self.classify(data, now);
        if let ReceiveOutcome::Rejected(reason) = outcome {
            debug!(?reason, len = data.len(), "Dropped presence message");
        }
        outcome
    }

    fn classify(&mut self, data: &[u8], now: Millis) -> ReceiveOutcome {
        use ReceiveOutcome::Rejected;

        if data.len() > self.config.max_payload_bytes {
            return Rejected(RejectReason::Oversize);
        }
        let message = match PresenceMessage::from_bytes(data, self.config.max_payload_bytes) {
            Ok(message) => message,
            Err(_) => return Rejected(RejectReason::Malformed),
        };

        match message {
            PresenceMessage::Heartbeat(signed) => {
                let announcement = &signed.announcement;
                if announcement.owner_pub_key == self.own_key {
                    return Rejected(RejectReason::OwnMessage);
                }
                // Only accepted heartbeats take a slot, so forgeries under
                // someone else's peer id cannot use up that peer's window.
                if !self.limiter.allows(&announcement.peer_id, now) {
                    return Rejected(RejectReason::RateLimited);
                }
                if !signed.verify() {
                    warn!(peer = %announcement.peer_id, "Presence signature did not verify");
                    return Rejected(RejectReason::InvalidSignature);
                }
                if let Some(held) = self.entries.get(&announcement.owner_pub_key) {
                    if announcement.ts <= held.ts {
                        return Rejected(RejectReason::Stale);
                    }
                }

                self.limiter.record(&announcement.peer_id, now);
                let announcement = signed.announcement;
                let entry = PresenceEntry {
                    owner_pub_key: announcement.owner_pub_key,
                    peer_id: announcement.peer_id,
                    username: announcement.username,
                    collections: announcement.collections,
                    status: announcement.status,
                    ts: announcement.ts,
                    signature: signed.signature,
                    last_seen: now,
                    expired: false,
                };
                let previous = self.entries.insert(entry.owner_pub_key, entry.clone());
                match previous {
                    Some(prev) if !prev.expired => self.emit(PresenceEvent::Updated(entry)),
                    _ => {
                        info!(peer = %entry.peer_id, user = %entry.username, "Peer online");
                        self.emit(PresenceEvent::Joined(entry));
                    }
                }
                ReceiveOutcome::Accepted
            }
            PresenceMessage::Leaving {
                owner_pub_key,
                peer_id,
                ..
            } => {
                if owner_pub_key == self.own_key {
                    return Rejected(RejectReason::OwnMessage);
                }
                if !self.leave_limiter.check(&peer_id, now) {
                    return Rejected(RejectReason::RateLimited);
                }
                debug!(peer = %peer_id, "Leave notice (unsigned, not acted on)");
                self.emit(PresenceEvent::LeaveNotice {
                    owner: UserId(owner_pub_key),
                    peer_id,
                });
                ReceiveOutcome::LeaveNotice
            }
        }
    }

    /// Soft-expire entries unseen for more than the TTL and drop those
    /// unseen for more than twice the TTL.
    pub fn sweep(&mut self, now: Millis) -> SweepReport {
        let ttl = self.config.ttl_ms();
        let mut report = SweepReport::default();
        let mut events = Vec::new();

        self.entries.retain(|key, entry| {
            let age = now - entry.last_seen;
            if age > 2 * ttl {
                report.removed += 1;
                events.push(PresenceEvent::Removed {
                    owner: UserId(*key),
                });
                return false;
            }
            if age > ttl && !entry.expired {
                entry.expired = true;
                report.expired += 1;
                events.push(PresenceEvent::Expired {
                    owner: UserId(*key),
                });
            }
            true
        });
        self.limiter.purge_stale(now);
        self.leave_limiter.purge_stale(now);

        if report != SweepReport::default() {
            debug!(expired = report.expired, removed = report.removed, "Presence sweep");
        }
        for event in events {
            self.emit(event);
        }
        report
    }

    /// Entries heard from within the TTL, most recent first.
    pub fn online_users(&self, now: Millis) -> Vec<PresenceEntry> {
        let ttl = self.config.ttl_ms();
        let mut users: Vec<PresenceEntry> = self
            .entries
            .values()
            .filter(|entry| entry.is_online(now, ttl))
            .cloned()
            .collect();
        users.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        users
    }

    /// Entries still held but no longer online.
    pub fn offline_users(&self, now: Millis) -> Vec<PresenceEntry> {
        let ttl = self.config.ttl_ms();
        let mut users: Vec<PresenceEntry> = self
            .entries
            .values()
            .filter(|entry| !entry.is_online(now, ttl))
            .cloned()
            .collect();
        users.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        users
    }

    pub fn get(&self, owner: &UserId) -> Option<&PresenceEntry> {
        self.entries.get(&owner.0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Sign and encode a heartbeat. Shrinks the collection list to
/// `truncated_collections` (re-signing) if the full message is over the
/// ceiling; refuses to produce an over-size message at all.
pub fn encode_heartbeat(
    signer: &dyn Signer,
    peer_id: &str,
    username: &str,
    collections: &[CollectionSummary],
    now: Millis,
    config: &PresenceConfig,
) -> Result<Vec<u8>> {
    let mut keep = config.max_announced_collections;
    loop {
        let announcement = PresenceAnnouncement {
            owner_pub_key: signer.public_key_bytes(),
            peer_id: peer_id.to_string(),
            username: username.to_string(),
            collections: collections.iter().take(keep).cloned().collect(),
            status: PresenceStatus::Online,
            ts: now,
        };
        let bytes = PresenceMessage::Heartbeat(announcement.sign(signer)?).to_bytes()?;
        if bytes.len() <= config.max_payload_bytes {
            return Ok(bytes);
        }
        if keep <= config.truncated_collections {
            return Err(NetError::PayloadTooLarge {
                size: bytes.len(),
                max: config.max_payload_bytes,
            });
        }
        warn!(
            size = bytes.len(),
            max = config.max_payload_bytes,
            "Heartbeat over size ceiling, truncating collections"
        );
        keep = config.truncated_collections;
    }
}

/// The unsigned shutdown notice.
pub fn encode_leaving(owner_pub_key: [u8; 32], peer_id: &str, now: Millis) -> Result<Vec<u8>> {
    Ok(PresenceMessage::Leaving {
        owner_pub_key,
        peer_id: peer_id.to_string(),
        ts: now,
    }
    .to_bytes()?)
}

#[cfg(test)]
mod tests {
    use commonplace_shared::identity::Identity;

    use super::*;

    const T0: Millis = 1_700_000_000_000;

    fn tracker() -> (PresenceTracker, Identity) {
        let me = Identity::generate();
        (
            PresenceTracker::new(me.public_key_bytes(), PresenceConfig::default()),
            me,
        )
    }

    fn heartbeat(peer: &Identity, ts: Millis) -> Vec<u8> {
        encode_heartbeat(
            peer,
            "12D3KooWpeer",
            "grace",
            &[],
            ts,
            &PresenceConfig::default(),
        )
        .unwrap()
    }

    fn summary(name: String) -> CollectionSummary {
        CollectionSummary {
            name,
            namespace: "ns".to_string(),
            count: 1,
            last_updated: T0,
        }
    }

    #[test]
    fn test_timer_periods_never_zero() {
        let config = PresenceConfig {
            heartbeat_interval: Duration::from_nanos(1),
            ..PresenceConfig::default()
        };
        assert!(config.heartbeat_period() > Duration::ZERO);
        assert!(config.sweep_interval() > Duration::ZERO);

        let defaults = PresenceConfig::default();
        assert_eq!(defaults.heartbeat_period(), Duration::from_secs(30));
        assert_eq!(defaults.sweep_interval(), Duration::from_secs(15));
    }

    #[test]
    fn test_accepts_then_rejects_stale() {
        let (mut tracker, _) = tracker();
        let peer = Identity::generate();

        assert_eq!(tracker.receive(&heartbeat(&peer, T0), T0), ReceiveOutcome::Accepted);
        assert_eq!(
            tracker.receive(&heartbeat(&peer, T0), T0 + 1),
            ReceiveOutcome::Rejected(RejectReason::Stale)
        );
        assert_eq!(
            tracker.receive(&heartbeat(&peer, T0 - 5), T0 + 2),
            ReceiveOutcome::Rejected(RejectReason::Stale)
        );
        assert_eq!(
            tracker.receive(&heartbeat(&peer, T0 + 10), T0 + 3),
            ReceiveOutcome::Accepted
        );

        let entry = tracker.get(&peer.user_id()).unwrap();
        assert_eq!(entry.ts, T0 + 10);
        assert_eq!(entry.last_seen, T0 + 3);
        assert_eq!(entry.username, "grace");
    }

    #[test]
    fn test_eleventh_message_within_a_second_dropped() {
        let (mut tracker, _) = tracker();
        let peer = Identity::generate();

        for i in 0..10 {
            assert_eq!(
                tracker.receive(&heartbeat(&peer, T0 + i), T0 + i * 50),
                ReceiveOutcome::Accepted
            );
        }
        assert_eq!(
            tracker.receive(&heartbeat(&peer, T0 + 10), T0 + 900),
            ReceiveOutcome::Rejected(RejectReason::RateLimited)
        );
        // a second later the window has room again
        assert_eq!(
            tracker.receive(&heartbeat(&peer, T0 + 11), T0 + 2000),
            ReceiveOutcome::Accepted
        );
    }

    #[test]
    fn test_signature_must_match_claimed_key() {
        let (mut tracker, _) = tracker();
        let victim = Identity::generate();
        let forger = Identity::generate();

        let announcement = PresenceAnnouncement {
            owner_pub_key: victim.public_key_bytes(),
            peer_id: "12D3KooWforger".to_string(),
            username: "victim".to_string(),
            collections: Vec::new(),
            status: PresenceStatus::Online,
            ts: T0,
        };
        let forged = PresenceMessage::Heartbeat(announcement.sign(&forger).unwrap())
            .to_bytes()
            .unwrap();

        assert_eq!(
            tracker.receive(&forged, T0),
            ReceiveOutcome::Rejected(RejectReason::InvalidSignature)
        );
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_forged_heartbeats_do_not_use_up_genuine_senders_window() {
        let (mut tracker, _) = tracker();
        let victim = Identity::generate();
        let forger = Identity::generate();

        for i in 0..10 {
            let announcement = PresenceAnnouncement {
                owner_pub_key: victim.public_key_bytes(),
                peer_id: "12D3KooWpeer".to_string(),
                username: "grace".to_string(),
                collections: Vec::new(),
                status: PresenceStatus::Online,
                ts: T0 + i,
            };
            let forged = PresenceMessage::Heartbeat(announcement.sign(&forger).unwrap())
                .to_bytes()
                .unwrap();
            assert_eq!(
                tracker.receive(&forged, T0 + i),
                ReceiveOutcome::Rejected(RejectReason::InvalidSignature)
            );
        }

        assert_eq!(
            tracker.receive(&heartbeat(&victim, T0 + 20), T0 + 20),
            ReceiveOutcome::Accepted
        );
    }

    #[test]
    fn test_stale_heartbeats_do_not_count_against_rate_limit() {
        let (mut tracker, _) = tracker();
        let peer = Identity::generate();

        assert_eq!(tracker.receive(&heartbeat(&peer, T0 + 100), T0), ReceiveOutcome::Accepted);
        for i in 0..20 {
            assert_eq!(
                tracker.receive(&heartbeat(&peer, T0 + i), T0 + i),
                ReceiveOutcome::Rejected(RejectReason::Stale)
            );
        }
        assert_eq!(
            tracker.receive(&heartbeat(&peer, T0 + 101), T0 + 30),
            ReceiveOutcome::Accepted
        );
    }

    #[test]
    fn test_leave_notices_do_not_use_up_heartbeat_window() {
        let (mut tracker, _) = tracker();
        let peer = Identity::generate();

        for i in 0..10 {
            let leaving = encode_leaving(peer.public_key_bytes(), "12D3KooWpeer", T0 + i).unwrap();
            assert_eq!(tracker.receive(&leaving, T0 + i), ReceiveOutcome::LeaveNotice);
        }
        assert_eq!(
            tracker.receive(&heartbeat(&peer, T0 + 20), T0 + 20),
            ReceiveOutcome::Accepted
        );
    }

    #[test]
    fn test_own_and_malformed_and_oversize_dropped() {
        let (mut tracker, me) = tracker();
        assert_eq!(
            tracker.receive(&heartbeat(&me, T0), T0),
            ReceiveOutcome::Rejected(RejectReason::OwnMessage)
        );
        assert_eq!(
            tracker.receive(b"\xff\xff\xff", T0),
            ReceiveOutcome::Rejected(RejectReason::Malformed)
        );
        let huge = vec![0u8; MAX_PRESENCE_PAYLOAD + 1];
        assert_eq!(
            tracker.receive(&huge, T0),
            ReceiveOutcome::Rejected(RejectReason::Oversize)
        );
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_expiry_soft_then_hard() {
        let (mut tracker, _) = tracker();
        let peer = Identity::generate();
        tracker.receive(&heartbeat(&peer, T0), T0);

        assert_eq!(tracker.online_users(T0 + 90_000).len(), 1);

        let later = T0 + 91_000;
        assert!(tracker.online_users(later).is_empty());
        assert_eq!(tracker.offline_users(later).len(), 1);
        let report = tracker.sweep(later);
        assert_eq!(report, SweepReport { expired: 1, removed: 0 });
        assert!(tracker.get(&peer.user_id()).unwrap().expired);

        assert_eq!(tracker.sweep(T0 + 180_000).removed, 0);
        assert_eq!(tracker.len(), 1);

        let report = tracker.sweep(T0 + 181_000);
        assert_eq!(report.removed, 1);
        assert!(tracker.get(&peer.user_id()).is_none());
        assert!(tracker.offline_users(T0 + 181_000).is_empty());
    }

    #[test]
    fn test_fresh_heartbeat_revives_expired_entry() {
        let (mut tracker, _) = tracker();
        let mut events = tracker.subscribe();
        let peer = Identity::generate();

        tracker.receive(&heartbeat(&peer, T0), T0);
        tracker.sweep(T0 + 100_000);
        tracker.receive(&heartbeat(&peer, T0 + 100_000), T0 + 100_000);

        assert!(matches!(events.try_recv(), Ok(PresenceEvent::Joined(_))));
        assert!(matches!(events.try_recv(), Ok(PresenceEvent::Expired { .. })));
        assert!(matches!(events.try_recv(), Ok(PresenceEvent::Joined(_))));
        assert_eq!(tracker.online_users(T0 + 100_000).len(), 1);
    }

    #[test]
    fn test_leave_notice_does_not_remove_entry() {
        let (mut tracker, _) = tracker();
        let mut events = tracker.subscribe();
        let peer = Identity::generate();
        tracker.receive(&heartbeat(&peer, T0), T0);

        let leaving = encode_leaving(peer.public_key_bytes(), "12D3KooWpeer", T0 + 1).unwrap();
        assert_eq!(tracker.receive(&leaving, T0 + 1), ReceiveOutcome::LeaveNotice);
        assert_eq!(tracker.online_users(T0 + 1).len(), 1);

        assert!(matches!(events.try_recv(), Ok(PresenceEvent::Joined(_))));
        assert!(matches!(
            events.try_recv(),
            Ok(PresenceEvent::LeaveNotice { .. })
        ));
    }

    #[test]
    fn test_heartbeat_caps_collections_at_five() {
        let me = Identity::generate();
        let collections: Vec<_> = (0..8).map(|i| summary(format!("c{i}"))).collect();
        let bytes =
            encode_heartbeat(&me, "p", "me", &collections, T0, &PresenceConfig::default()).unwrap();
        match PresenceMessage::from_bytes(&bytes, MAX_PRESENCE_PAYLOAD).unwrap() {
            PresenceMessage::Heartbeat(signed) => {
                assert_eq!(signed.announcement.collections.len(), 5);
                assert!(signed.verify());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_oversize_heartbeat_truncated_and_resigned() {
        let me = Identity::generate();
        let collections: Vec<_> = (0..5).map(|i| summary(format!("{i}{}", "x".repeat(1000)))).collect();
        let bytes =
            encode_heartbeat(&me, "p", "me", &collections, T0, &PresenceConfig::default()).unwrap();
        assert!(bytes.len() <= MAX_PRESENCE_PAYLOAD);
        match PresenceMessage::from_bytes(&bytes, MAX_PRESENCE_PAYLOAD).unwrap() {
            PresenceMessage::Heartbeat(signed) => {
                assert_eq!(signed.announcement.collections.len(), 3);
                assert!(signed.verify());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_heartbeat_too_large_even_truncated_is_refused() {
        let me = Identity::generate();
        let collections = vec![summary("y".repeat(5000))];
        let err = encode_heartbeat(&me, "p", "me", &collections, T0, &PresenceConfig::default())
            .unwrap_err();
        assert!(matches!(err, NetError::PayloadTooLarge { .. }));
    }
}
