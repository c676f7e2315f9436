use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

use crate::error::IdentityError;
use crate::types::UserId;

/// Signing seam used by the presence protocol. Key management lives
/// outside the core; [`Identity`] is the in-process implementation.
pub trait Signer: Send + Sync {
    fn public_key_bytes(&self) -> [u8; 32];

    fn sign_bytes(&self, message: &[u8]) -> [u8; 64];

    fn user_id(&self) -> UserId {
        UserId(self.public_key_bytes())
    }
}

/// A peer's cryptographic identity based on Ed25519.
/// The public key serves as the durable peer id.
#[derive(Clone)]
pub struct Identity {
    signing_key: SigningKey,
}

impl Identity {
    /// Generate a new random identity
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Restore identity from secret key bytes
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(secret);
        Self { signing_key }
    }

    /// Restore identity from a 64-char hex secret
    pub fn from_secret_hex(hex_secret: &str) -> Result<Self, IdentityError> {
        let bytes =
            hex::decode(hex_secret.trim()).map_err(|e| IdentityError::KeyParse(e.to_string()))?;
        let secret: [u8; 32] = bytes
            .try_into()
            .map_err(|_| IdentityError::InvalidKeyBytes)?;
        Ok(Self::from_secret_bytes(&secret))
    }

    /// Seed for the transport keypair, kept distinct from the signing key.
    pub fn derive_transport_seed(&self) -> [u8; 32] {
        blake3::derive_key("commonplace-libp2p-keypair-v1", self.signing_key.as_bytes())
    }
}

impl Signer for Identity {
    fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    fn sign_bytes(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }
}

/// Verify a detached signature against a public key
pub fn verify_signature(
    pubkey_bytes: &[u8; 32],
    message: &[u8],
    signature: &[u8],
) -> Result<(), IdentityError> {
    let verifying_key =
        VerifyingKey::from_bytes(pubkey_bytes).map_err(|_| IdentityError::InvalidKeyBytes)?;
    let signature =
        Signature::from_slice(signature).map_err(|_| IdentityError::InvalidSignature)?;
    verifying_key
        .verify(message, &signature)
        .map_err(|_| IdentityError::InvalidSignature)
}
