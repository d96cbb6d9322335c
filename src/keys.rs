use crate::error::Error;
use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const PUBLIC_KEY_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 64;
pub const SEED_LEN: usize = 32;

/// Ed25519 verification key, as carried on the wire and in the stores.
///
/// Only the raw 32 bytes are kept here; point validity is checked at
/// verification time, so an unparseable key simply never verifies.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PublicKey([u8; PUBLIC_KEY_LEN]);

impl PublicKey {
    pub const fn from_bytes(bytes: [u8; PUBLIC_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.0
    }

    pub fn to_vec(self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl TryFrom<&[u8]> for PublicKey {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let bytes = <[u8; PUBLIC_KEY_LEN]>::try_from(bytes)
            .map_err(|_| Error::MalformedTx("public key must be 32 bytes"))?;

        Ok(Self(bytes))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({}...)", hex::encode(&self.0[..4]))
    }
}

/// Ed25519 key pair used to sign envelope payloads.
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    pub fn new_random() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Rebuild a key pair from its 32-byte seed. Deterministic; this is how
    /// accounts come back out of the store.
    pub fn from_seed(seed: [u8; SEED_LEN]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&seed),
        }
    }

    pub fn seed(&self) -> [u8; SEED_LEN] {
        self.signing_key.to_bytes()
    }

    pub fn public(&self) -> PublicKey {
        PublicKey(self.signing_key.verifying_key().to_bytes())
    }

    /// Produce a detached 64-byte signature over `message`.
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LEN] {
        self.signing_key.sign(message).to_bytes()
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyPair(public={:?})", self.public())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_round_trip_is_deterministic() {
        let keypair = KeyPair::new_random();
        let restored = KeyPair::from_seed(keypair.seed());

        assert_eq!(keypair.public(), restored.public());
    }

    #[test]
    fn public_key_rejects_wrong_length() {
        assert!(PublicKey::try_from([0u8; 31].as_slice()).is_err());
        assert!(PublicKey::try_from([0u8; 33].as_slice()).is_err());
    }

    #[test]
    fn public_key_serde_round_trip() {
        let pubkey = KeyPair::new_random().public();

        let json = serde_json::to_string(&pubkey).unwrap();
        let back: PublicKey = serde_json::from_str(&json).unwrap();

        assert_eq!(pubkey, back);
    }
}
