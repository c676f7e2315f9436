use thiserror::Error;

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Invalid key bytes")]
    InvalidKeyBytes,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Key parse error: {0}")]
    KeyParse(String),
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },
}
