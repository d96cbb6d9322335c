use crate::keys::PUBLIC_KEY_LEN;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};

/// Verify a detached Ed25519 signature against raw key bytes.
///
/// Fail-closed on shape: a wrong-length key or signature, or key bytes that
/// do not decode to a curve point, verify as `false` rather than erroring.
/// A zero-filled 64-byte slot is therefore indistinguishable from an
/// unsigned one, which is exactly the slot semantics the envelopes need.
pub(crate) fn verify(pubkey: &[u8], payload: &[u8], signature: &[u8]) -> bool {
    let Ok(pubkey) = <&[u8; PUBLIC_KEY_LEN]>::try_from(pubkey) else {
        return false;
    };
    let Ok(key) = VerifyingKey::from_bytes(pubkey) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(signature) else {
        return false;
    };

    key.verify(payload, &signature).is_ok()
}
