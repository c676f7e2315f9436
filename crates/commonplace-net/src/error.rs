use std::time::Duration;

use thiserror::Error;

use commonplace_shared::error::{IdentityError, ProtocolError};

#[derive(Error, Debug)]
pub enum NetError {
    /// The pub/sub transport could not be reached.
    #[error("Transport unavailable: {0}")]
    Transport(String),

    #[error("{op} timed out after {budget:?}")]
    Timeout { op: &'static str, budget: Duration },

    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),
}

pub type Result<T> = std::result::Result<T, NetError>;
