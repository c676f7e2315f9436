//! Types shared by every commonplace crate: peer identity, id newtypes,
//! protocol constants and the presence wire format.

pub mod constants;
pub mod error;
pub mod identity;
pub mod protocol;
pub mod types;

pub use error::{IdentityError, ProtocolError};
pub use identity::{verify_signature, Identity, Signer};
pub use types::{now_millis, DocumentId, Millis, UserId};
