use super::Authenticator;
use ed25519_dalek::{Signer, SigningKey, Verifier, Signature, VerifyingKey};

use crate::error::{AtlasError, Result};

pub struct Ed25519Authenticator {
    keypair: SigningKey,
}

impl Ed25519Authenticator {
    pub fn new(keypair: SigningKey) -> Self {
        Self { keypair }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let secret: &[u8; 32] = bytes
            .try_into()
            .map_err(|_| AtlasError::Other("Invalid key length".to_string()))?;
        Ok(Self { keypair: SigningKey::from_bytes(secret) })
    }
}

impl std::fmt::Debug for Ed25519Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ed25519Authenticator")
            .field("public_key", &hex::encode(self.public_key()))
            .finish()
    }
}

impl Authenticator for Ed25519Authenticator {
    fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.keypair.sign(message).to_vec()
    }

    fn public_key(&self) -> [u8; 32] {
        self.keypair.verifying_key().to_bytes()
    }
}

/// Checks an ed25519 signature against a raw public key.
///
/// Malformed keys or signatures are reported as errors, a well-formed
/// signature that does not match yields `Ok(false)`.
pub fn verify_with_key(message: &[u8], signature: &[u8], public_key: &[u8; 32]) -> Result<bool> {
    let verifying_key = VerifyingKey::from_bytes(public_key)
        .map_err(|e| AtlasError::InvalidSignature(e.to_string()))?;
    let signature = Signature::from_slice(signature)
        .map_err(|e| AtlasError::InvalidSignature(e.to_string()))?;

    Ok(verifying_key.verify(message, &signature).is_ok())
}
