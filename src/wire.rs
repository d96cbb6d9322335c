//! Canonical wire encoding and the envelope signature discipline.
//!
//! Every transaction has a fixed protobuf encoding; the encoded payload is
//! what gets signed, and appending signatures never touches it. Field tags
//! are part of the protocol and must not be reassigned.

use crate::{
    error::Error,
    keys::{KeyPair, PublicKey},
    signature,
};
use prost::Message;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const CHANNEL_ID_LEN: usize = 32;

/// Signature slot holding the judge's witness signature on an opening or
/// finalized-update envelope.
pub const JUDGE_SLOT: usize = 2;

/// Transaction that establishes a channel: its identifier, the ordered
/// participant keys (slot 0 is the initiator), the initial opaque state and
/// the hold period in seconds.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OpeningTx {
    #[prost(bytes = "vec", tag = "1")]
    pub channel_id: Vec<u8>,
    #[prost(bytes = "vec", repeated, tag = "2")]
    pub pubkeys: Vec<Vec<u8>>,
    #[prost(bytes = "vec", tag = "3")]
    pub state: Vec<u8>,
    #[prost(uint64, tag = "4")]
    pub hold_period: u64,
}

/// Replacement state for a channel, strictly sequence-numbered. The `fast`
/// flag is a protocol hint and does not alter any core rule.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateTx {
    #[prost(bytes = "vec", tag = "1")]
    pub channel_id: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub state: Vec<u8>,
    #[prost(uint64, tag = "3")]
    pub sequence_number: u64,
    #[prost(bool, tag = "4")]
    pub fast: bool,
}

/// Participant-signed request to begin channel closure.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ClosingTx {
    #[prost(bytes = "vec", tag = "1")]
    pub channel_id: Vec<u8>,
}

/// Auxiliary evidence submitted once closure has begun.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FollowOnTx {
    #[prost(bytes = "vec", tag = "1")]
    pub channel_id: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub state: Vec<u8>,
}

/// The signed wire unit: one canonically-encoded transaction plus an ordered
/// list of detached signatures over it.
///
/// Slot semantics depend on the transaction type. Opening envelopes grow from
/// one to three signatures via [`Envelope::append_signature`]; update
/// envelopes carry exactly two empty-initialized slots indexed by the
/// signer's side; closing and follow-on envelopes carry a single signature.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Envelope {
    #[prost(bytes = "vec", tag = "1")]
    pub payload: Vec<u8>,
    #[prost(bytes = "vec", repeated, tag = "2")]
    pub signatures: Vec<Vec<u8>>,
}

impl Envelope {
    /// Seal a transaction into an envelope with no signature slots.
    pub fn seal<T>(tx: &T) -> Self
    where
        T: Message,
    {
        Self {
            payload: tx.encode_to_vec(),
            signatures: Vec::new(),
        }
    }

    /// Seal a transaction with `slots` empty-initialized signature slots.
    pub fn seal_with_slots<T>(tx: &T, slots: usize) -> Self
    where
        T: Message,
    {
        Self {
            payload: tx.encode_to_vec(),
            signatures: vec![Vec::new(); slots],
        }
    }

    /// Decode the payload back into a transaction.
    pub fn transaction<T>(&self) -> Result<T, Error>
    where
        T: Message + Default,
    {
        T::decode(self.payload.as_slice()).map_err(|e| Error::EncodingError(e.to_string()))
    }

    /// Append one detached signature over the payload. Monotonic: existing
    /// slots and the payload are never modified.
    pub fn append_signature(&mut self, keypair: &KeyPair) {
        self.signatures.push(keypair.sign(&self.payload).to_vec());
    }

    /// Sign into a specific slot, growing the slot list if needed.
    pub fn sign_slot(&mut self, slot: usize, keypair: &KeyPair) {
        if self.signatures.len() <= slot {
            self.signatures.resize(slot + 1, Vec::new());
        }
        self.signatures[slot] = keypair.sign(&self.payload).to_vec();
    }

    /// Check the signature at `slot` against `pubkey`.
    ///
    /// A missing slot, a zero-filled slot or a wrong-length signature all
    /// fail the same way: validity is decided by verification, not length.
    pub fn verify_slot(&self, slot: usize, pubkey: &PublicKey) -> Result<(), Error> {
        self.verify_slot_raw(slot, pubkey.as_bytes())
    }

    /// Like [`Envelope::verify_slot`] but against raw key bytes, e.g. the
    /// `pubkeys` entries of an opening transaction.
    pub fn verify_slot_raw(&self, slot: usize, pubkey: &[u8]) -> Result<(), Error> {
        let signature = self.signatures.get(slot).map(Vec::as_slice).unwrap_or(&[]);

        if signature::verify(pubkey, &self.payload, signature) {
            Ok(())
        } else {
            Err(Error::SignatureInvalid { slot })
        }
    }

    /// Require the exact slot count for this transaction type.
    pub fn expect_signatures(&self, expected: usize) -> Result<(), Error> {
        let actual = self.signatures.len();
        if actual != expected {
            return Err(Error::WrongSignatureCount { expected, actual });
        }

        Ok(())
    }
}

/// A sequence-numbered update paired with the envelope that carries it.
#[derive(Clone, Debug, PartialEq)]
pub struct SignedUpdate {
    pub tx: UpdateTx,
    pub envelope: Envelope,
}

impl SignedUpdate {
    pub(crate) fn from_envelope(envelope: &Envelope) -> Result<Self, Error> {
        Ok(Self {
            tx: envelope.transaction()?,
            envelope: envelope.clone(),
        })
    }

    pub fn sequence_number(&self) -> u64 {
        self.tx.sequence_number
    }
}

/// Channel identifier: 32 bytes drawn by the initiator from the OS CSPRNG.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId([u8; CHANNEL_ID_LEN]);

impl ChannelId {
    /// Draw a fresh random identifier. An initiator cannot propose without
    /// one, so a failing random source surfaces as an encoding error.
    pub fn random() -> Result<Self, Error> {
        let mut bytes = [0u8; CHANNEL_ID_LEN];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| Error::EncodingError(format!("random source failed: {e}")))?;

        Ok(Self(bytes))
    }

    pub const fn from_bytes(bytes: [u8; CHANNEL_ID_LEN]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; CHANNEL_ID_LEN] {
        &self.0
    }

    pub fn to_vec(self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl TryFrom<&[u8]> for ChannelId {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let bytes = <[u8; CHANNEL_ID_LEN]>::try_from(bytes)
            .map_err(|_| Error::MalformedTx("channel id must be 32 bytes"))?;

        Ok(Self(bytes))
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelId({}...)", hex::encode(&self.0[..4]))
    }
}
