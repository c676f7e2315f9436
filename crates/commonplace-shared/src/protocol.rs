//! Presence wire protocol.
//!
//! Heartbeats are signed over the bincode encoding of
//! [`PresenceAnnouncement`]; the leave notice sent at shutdown is unsigned
//! and informational only.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::identity::{verify_signature, Signer};
use crate::types::Millis;

/// Summary of one shared collection carried in a heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectionSummary {
    pub name: String,
    pub namespace: String,
    pub count: u64,
    pub last_updated: Millis,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PresenceStatus {
    Online,
}

/// The signed part of a heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceAnnouncement {
    pub owner_pub_key: [u8; 32],
    /// Transport-level peer id of the sender.
    pub peer_id: String,
    pub username: String,
    pub collections: Vec<CollectionSummary>,
    pub status: PresenceStatus,
    pub ts: Millis,
}

impl PresenceAnnouncement {
    /// Canonical bytes covered by the signature.
    pub fn signing_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn sign(self, signer: &dyn Signer) -> Result<SignedPresence, ProtocolError> {
        let bytes = self.signing_bytes()?;
        let signature = signer.sign_bytes(&bytes).to_vec();
        Ok(SignedPresence {
            announcement: self,
            signature,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignedPresence {
    pub announcement: PresenceAnnouncement,
    pub signature: Vec<u8>,
}

impl SignedPresence {
    /// True when the signature verifies under the claimed `owner_pub_key`.
    pub fn verify(&self) -> bool {
        match self.announcement.signing_bytes() {
            Ok(bytes) => {
                verify_signature(&self.announcement.owner_pub_key, &bytes, &self.signature).is_ok()
            }
            Err(_) => false,
        }
    }
}

/// Everything published on the presence topic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum PresenceMessage {
    Heartbeat(SignedPresence),
    /// Best-effort, unsigned. Never trusted for removing entries.
    Leaving {
        owner_pub_key: [u8; 32],
        peer_id: String,
        ts: Millis,
    },
}

impl PresenceMessage {
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode, refusing anything over `max` bytes before touching it.
    pub fn from_bytes(data: &[u8], max: usize) -> Result<Self, ProtocolError> {
        if data.len() > max {
            return Err(ProtocolError::PayloadTooLarge {
                size: data.len(),
                max,
            });
        }
        Ok(bincode::deserialize(data)?)
    }
}
