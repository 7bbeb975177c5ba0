pub mod ed25519;

/// Signs consensus messages on behalf of a validator.
pub trait Authenticator {
    fn sign(&self, message: &[u8]) -> Vec<u8>;

    fn public_key(&self) -> [u8; 32];
}
