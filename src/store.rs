//! Persistence schema and store collaborators.
//!
//! Four name-spaced collections hold the durable state: judges, accounts and
//! counterparties keyed by public key, channels keyed by channel id. Records
//! carry cross-references as public keys only and persist envelopes as their
//! canonical protobuf bytes; loading a channel resolves every referenced
//! record and re-decodes transactions from envelope payloads. A channel
//! cannot be persisted or loaded unless its judge and both participant
//! records resolve.
//!
//! [`MemoryPeerStore`] and [`MemoryJudgeStore`] are the reference
//! implementations; durable adapters implement the same traits against a
//! real key-value store.

use crate::{
    error::Error,
    judge,
    keys::{KeyPair, PublicKey, SEED_LEN},
    peer,
    wire::{ChannelId, Envelope, SignedUpdate},
    Phase,
};
use anyhow::{anyhow, Context, Result};
use prost::Message;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JudgeRecord {
    pub name: String,
    pub pubkey: PublicKey,
    pub address: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccountRecord {
    pub name: String,
    pub pubkey: PublicKey,
    pub seed: [u8; SEED_LEN],
    pub judge: PublicKey,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CounterpartyRecord {
    pub name: String,
    pub pubkey: PublicKey,
    pub address: String,
    pub judge: PublicKey,
}

/// Participant-side channel, flattened for storage.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeerChannelRecord {
    pub channel_id: ChannelId,
    pub phase: Phase,
    pub me: usize,
    pub opening_tx_envelope: Vec<u8>,
    pub my_proposed: Option<Vec<u8>>,
    pub their_proposed: Option<Vec<u8>>,
    pub last_full: Option<Vec<u8>>,
    pub follow_ons: Vec<Vec<u8>>,
    pub account: PublicKey,
    pub counterparty: PublicKey,
    pub judge: PublicKey,
}

impl PeerChannelRecord {
    pub fn from_channel(channel: &peer::Channel) -> Self {
        Self {
            channel_id: channel.channel_id(),
            phase: channel.phase(),
            me: channel.me(),
            opening_tx_envelope: channel.opening_tx_envelope().encode_to_vec(),
            my_proposed: channel
                .my_proposed_update()
                .map(|u| u.envelope.encode_to_vec()),
            their_proposed: channel
                .their_proposed_update()
                .map(|u| u.envelope.encode_to_vec()),
            last_full: channel
                .last_full_update()
                .map(|u| u.envelope.encode_to_vec()),
            follow_ons: channel
                .follow_ons()
                .iter()
                .map(Envelope::encode_to_vec)
                .collect(),
            account: channel.account().pubkey(),
            counterparty: channel.counterparty().pubkey,
            judge: channel.account().judge.pubkey,
        }
    }

    /// Rebuild the in-memory channel from this record and its resolved
    /// references.
    pub fn into_channel(
        self,
        account: peer::Account,
        counterparty: peer::Counterparty,
    ) -> Result<peer::Channel, Error> {
        let opening_tx_envelope = decode_envelope(&self.opening_tx_envelope)?;
        let opening_tx = opening_tx_envelope.transaction()?;

        Ok(peer::Channel::from_parts(
            self.channel_id,
            self.phase,
            self.me,
            opening_tx,
            opening_tx_envelope,
            decode_update(self.my_proposed.as_deref())?,
            decode_update(self.their_proposed.as_deref())?,
            decode_update(self.last_full.as_deref())?,
            self.follow_ons
                .iter()
                .map(|bytes| decode_envelope(bytes))
                .collect::<Result<_, _>>()?,
            account,
            counterparty,
        ))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JudgeAccountRecord {
    pub name: String,
    pub pubkey: PublicKey,
    pub address: String,
    pub judge: PublicKey,
}

/// Judge-side channel, flattened for storage.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JudgeChannelRecord {
    pub channel_id: ChannelId,
    pub phase: Phase,
    pub opening_tx_envelope: Vec<u8>,
    pub full_updates: Vec<Vec<u8>>,
    pub close_time: Option<u64>,
    pub closing_tx_envelope: Option<Vec<u8>>,
    pub follow_ons: Vec<Vec<u8>>,
    pub final_update: Option<Vec<u8>>,
    pub accounts: [PublicKey; 2],
    pub judge: PublicKey,
}

impl JudgeChannelRecord {
    pub fn from_channel(channel: &judge::Channel) -> Self {
        Self {
            channel_id: channel.channel_id(),
            phase: channel.phase(),
            opening_tx_envelope: channel.opening_tx_envelope().encode_to_vec(),
            full_updates: channel
                .full_updates()
                .iter()
                .map(|u| u.envelope.encode_to_vec())
                .collect(),
            close_time: channel.close_time(),
            closing_tx_envelope: channel.closing_tx_envelope().map(Envelope::encode_to_vec),
            follow_ons: channel
                .follow_ons()
                .iter()
                .map(Envelope::encode_to_vec)
                .collect(),
            final_update: channel.final_update().map(|u| u.envelope.encode_to_vec()),
            accounts: [channel.accounts()[0].pubkey, channel.accounts()[1].pubkey],
            judge: channel.judge_pubkey(),
        }
    }

    pub fn into_channel(self, accounts: [judge::Account; 2]) -> Result<judge::Channel, Error> {
        let opening_tx_envelope = decode_envelope(&self.opening_tx_envelope)?;
        let opening_tx = opening_tx_envelope.transaction()?;

        Ok(judge::Channel::from_parts(
            self.channel_id,
            self.phase,
            opening_tx,
            opening_tx_envelope,
            self.full_updates
                .iter()
                .map(|bytes| decode_update_required(bytes))
                .collect::<Result<_, _>>()?,
            self.close_time,
            self.closing_tx_envelope
                .as_deref()
                .map(decode_envelope)
                .transpose()?,
            self.follow_ons
                .iter()
                .map(|bytes| decode_envelope(bytes))
                .collect::<Result<_, _>>()?,
            self.final_update
                .as_deref()
                .map(decode_update_required)
                .transpose()?,
            accounts,
            self.judge,
        ))
    }
}

fn decode_envelope(bytes: &[u8]) -> Result<Envelope, Error> {
    Envelope::decode(bytes).map_err(|e| Error::EncodingError(e.to_string()))
}

fn decode_update(bytes: Option<&[u8]>) -> Result<Option<SignedUpdate>, Error> {
    bytes.map(decode_update_required).transpose()
}

fn decode_update_required(bytes: &[u8]) -> Result<SignedUpdate, Error> {
    SignedUpdate::from_envelope(&decode_envelope(bytes)?)
}

/// Participant-side persistence collaborator. Lookups return `Ok(None)` on a
/// plain miss; `Err` is reserved for storage failures and unresolvable
/// references.
pub trait PeerStore {
    fn judge(&self, pubkey: &PublicKey) -> Result<Option<peer::Judge>>;
    fn put_judge(&mut self, judge: &peer::Judge) -> Result<()>;
    fn account(&self, pubkey: &PublicKey) -> Result<Option<peer::Account>>;
    fn put_account(&mut self, account: &peer::Account) -> Result<()>;
    fn counterparty(&self, pubkey: &PublicKey) -> Result<Option<peer::Counterparty>>;
    fn put_counterparty(&mut self, counterparty: &peer::Counterparty) -> Result<()>;
    fn channel(&self, channel_id: &ChannelId) -> Result<Option<peer::Channel>>;
    fn put_channel(&mut self, channel: &peer::Channel) -> Result<()>;
    fn channels(&self) -> Result<Vec<peer::Channel>>;
}

/// Judge-side persistence collaborator.
pub trait JudgeStore {
    fn account(&self, pubkey: &PublicKey) -> Result<Option<judge::Account>>;
    fn put_account(&mut self, account: &judge::Account) -> Result<()>;
    fn channel(&self, channel_id: &ChannelId) -> Result<Option<judge::Channel>>;
    fn put_channel(&mut self, channel: &judge::Channel) -> Result<()>;
    fn channels(&self) -> Result<Vec<judge::Channel>>;
}

/// In-memory [`PeerStore`]. Stores the same flattened records a durable
/// adapter would, so reference resolution is exercised on every load.
#[derive(Debug, Default)]
pub struct MemoryPeerStore {
    judges: HashMap<PublicKey, JudgeRecord>,
    accounts: HashMap<PublicKey, AccountRecord>,
    counterparties: HashMap<PublicKey, CounterpartyRecord>,
    channels: HashMap<ChannelId, PeerChannelRecord>,
}

impl MemoryPeerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn resolve_judge(&self, pubkey: &PublicKey) -> Result<peer::Judge> {
        let record = self
            .judges
            .get(pubkey)
            .ok_or_else(|| anyhow!("judge {pubkey} not found"))?;

        Ok(peer::Judge {
            name: record.name.clone(),
            pubkey: record.pubkey,
            address: record.address.clone(),
        })
    }

    fn resolve_account(&self, pubkey: &PublicKey) -> Result<Option<peer::Account>> {
        let Some(record) = self.accounts.get(pubkey) else {
            return Ok(None);
        };
        let judge = self.resolve_judge(&record.judge)?;

        Ok(Some(peer::Account::from_keypair(
            record.name.clone(),
            KeyPair::from_seed(record.seed),
            judge,
        )))
    }

    fn resolve_counterparty(&self, pubkey: &PublicKey) -> Result<Option<peer::Counterparty>> {
        let Some(record) = self.counterparties.get(pubkey) else {
            return Ok(None);
        };
        let judge = self.resolve_judge(&record.judge)?;

        Ok(Some(peer::Counterparty {
            name: record.name.clone(),
            pubkey: record.pubkey,
            address: record.address.clone(),
            judge,
        }))
    }

    fn resolve_channel(&self, record: &PeerChannelRecord) -> Result<peer::Channel> {
        let account = self
            .resolve_account(&record.account)?
            .ok_or_else(|| anyhow!("account {} not found", record.account))?;
        let counterparty = self
            .resolve_counterparty(&record.counterparty)?
            .ok_or_else(|| anyhow!("counterparty {} not found", record.counterparty))?;

        record
            .clone()
            .into_channel(account, counterparty)
            .context("stored channel record does not decode")
    }
}

impl PeerStore for MemoryPeerStore {
    fn judge(&self, pubkey: &PublicKey) -> Result<Option<peer::Judge>> {
        match self.judges.contains_key(pubkey) {
            true => Ok(Some(self.resolve_judge(pubkey)?)),
            false => Ok(None),
        }
    }

    fn put_judge(&mut self, judge: &peer::Judge) -> Result<()> {
        self.judges.insert(
            judge.pubkey,
            JudgeRecord {
                name: judge.name.clone(),
                pubkey: judge.pubkey,
                address: judge.address.clone(),
            },
        );

        Ok(())
    }

    fn account(&self, pubkey: &PublicKey) -> Result<Option<peer::Account>> {
        self.resolve_account(pubkey)
    }

    fn put_account(&mut self, account: &peer::Account) -> Result<()> {
        self.put_judge(&account.judge)?;
        self.accounts.insert(
            account.pubkey(),
            AccountRecord {
                name: account.name.clone(),
                pubkey: account.pubkey(),
                seed: account.keypair().seed(),
                judge: account.judge.pubkey,
            },
        );

        Ok(())
    }

    fn counterparty(&self, pubkey: &PublicKey) -> Result<Option<peer::Counterparty>> {
        self.resolve_counterparty(pubkey)
    }

    fn put_counterparty(&mut self, counterparty: &peer::Counterparty) -> Result<()> {
        self.put_judge(&counterparty.judge)?;
        self.counterparties.insert(
            counterparty.pubkey,
            CounterpartyRecord {
                name: counterparty.name.clone(),
                pubkey: counterparty.pubkey,
                address: counterparty.address.clone(),
                judge: counterparty.judge.pubkey,
            },
        );

        Ok(())
    }

    fn channel(&self, channel_id: &ChannelId) -> Result<Option<peer::Channel>> {
        self.channels
            .get(channel_id)
            .map(|record| self.resolve_channel(record))
            .transpose()
    }

    fn put_channel(&mut self, channel: &peer::Channel) -> Result<()> {
        // Relations travel with the channel, as the access layer would write
        // them in one transaction.
        self.put_account(channel.account())?;
        self.put_counterparty(channel.counterparty())?;
        self.channels
            .insert(channel.channel_id(), PeerChannelRecord::from_channel(channel));

        Ok(())
    }

    fn channels(&self) -> Result<Vec<peer::Channel>> {
        self.channels
            .values()
            .map(|record| self.resolve_channel(record))
            .collect()
    }
}

/// In-memory [`JudgeStore`].
#[derive(Debug, Default)]
pub struct MemoryJudgeStore {
    accounts: HashMap<PublicKey, JudgeAccountRecord>,
    channels: HashMap<ChannelId, JudgeChannelRecord>,
}

impl MemoryJudgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn resolve_account(&self, pubkey: &PublicKey) -> Result<judge::Account> {
        let record = self
            .accounts
            .get(pubkey)
            .ok_or_else(|| anyhow!("account {pubkey} not found"))?;

        Ok(judge::Account {
            name: record.name.clone(),
            pubkey: record.pubkey,
            address: record.address.clone(),
            judge: record.judge,
        })
    }

    fn resolve_channel(&self, record: &JudgeChannelRecord) -> Result<judge::Channel> {
        let accounts = [
            self.resolve_account(&record.accounts[0])?,
            self.resolve_account(&record.accounts[1])?,
        ];

        record
            .clone()
            .into_channel(accounts)
            .context("stored channel record does not decode")
    }
}

impl JudgeStore for MemoryJudgeStore {
    fn account(&self, pubkey: &PublicKey) -> Result<Option<judge::Account>> {
        match self.accounts.contains_key(pubkey) {
            true => Ok(Some(self.resolve_account(pubkey)?)),
            false => Ok(None),
        }
    }

    fn put_account(&mut self, account: &judge::Account) -> Result<()> {
        self.accounts.insert(
            account.pubkey,
            JudgeAccountRecord {
                name: account.name.clone(),
                pubkey: account.pubkey,
                address: account.address.clone(),
                judge: account.judge,
            },
        );

        Ok(())
    }

    fn channel(&self, channel_id: &ChannelId) -> Result<Option<judge::Channel>> {
        self.channels
            .get(channel_id)
            .map(|record| self.resolve_channel(record))
            .transpose()
    }

    fn put_channel(&mut self, channel: &judge::Channel) -> Result<()> {
        for account in channel.accounts() {
            self.put_account(account)?;
        }
        self.channels.insert(
            channel.channel_id(),
            JudgeChannelRecord::from_channel(channel),
        );

        Ok(())
    }

    fn channels(&self) -> Result<Vec<judge::Channel>> {
        self.channels
            .values()
            .map(|record| self.resolve_channel(record))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_harness::{
        cosigned_update, judge_accounts, open_pair, propose_accept, test_judge, PeerFixture,
    };

    #[test]
    fn peer_channel_survives_a_store_round_trip() {
        let fixture = PeerFixture::new();
        let (mut alice, mut bob) = open_pair(&fixture);
        cosigned_update(&mut alice, &mut bob, vec![0x02]);

        let mut store = MemoryPeerStore::new();
        store.put_channel(&alice).unwrap();

        let loaded = store.channel(&alice.channel_id()).unwrap().unwrap();

        assert_eq!(loaded.channel_id(), alice.channel_id());
        assert_eq!(loaded.phase(), alice.phase());
        assert_eq!(loaded.me(), alice.me());
        assert_eq!(loaded.opening_tx(), alice.opening_tx());
        assert_eq!(
            loaded.last_full_update().unwrap().tx,
            alice.last_full_update().unwrap().tx
        );
        assert_eq!(loaded.account().pubkey(), alice.account().pubkey());

        // The rehydrated channel keeps working: it can sign the next update.
        let mut loaded = loaded;
        let proposal = loaded.propose_update(vec![0x03], false).unwrap();
        bob.receive_proposed_update(&proposal).unwrap();
    }

    #[test]
    fn loading_a_channel_with_a_missing_judge_fails() {
        let fixture = PeerFixture::new();
        let (alice, _) = open_pair(&fixture);

        let mut store = MemoryPeerStore::new();
        store.put_channel(&alice).unwrap();

        // Simulate a corrupted directory: the judge record disappears.
        store.judges.clear();

        assert!(store.channel(&alice.channel_id()).is_err());
    }

    #[test]
    fn judge_channel_survives_a_store_round_trip() {
        let fixture = PeerFixture::new();
        let judge = test_judge();
        let (_, _, envelope) = propose_accept(&fixture);
        let mut channel = judge
            .admit_opening(&envelope, judge_accounts(&fixture, &judge))
            .unwrap();
        judge.confirm(&mut channel).unwrap();

        let (mut alice, mut bob) = open_pair(&fixture);
        let update = cosigned_update(&mut alice, &mut bob, vec![0x02]);
        channel.admit_full_update(&update).unwrap();
        let closing = alice.new_closing_tx().unwrap();
        channel.admit_closing_tx(&closing, 42).unwrap();

        let mut store = MemoryJudgeStore::new();
        store.put_channel(&channel).unwrap();

        let loaded = store.channel(&channel.channel_id()).unwrap().unwrap();

        assert_eq!(loaded.phase(), channel.phase());
        assert_eq!(loaded.close_time(), Some(42));
        assert_eq!(loaded.full_updates().len(), 1);
        assert_eq!(loaded.accounts()[0].pubkey, channel.accounts()[0].pubkey);
        assert!(loaded.closing_tx_envelope().is_some());
    }

    #[test]
    fn missing_channel_is_a_plain_miss_not_an_error() {
        let store = MemoryPeerStore::new();

        assert!(store
            .channel(&ChannelId::from_bytes([9; 32]))
            .unwrap()
            .is_none());
    }

    #[test]
    fn records_serialize_to_json_and_back() {
        let fixture = PeerFixture::new();
        let (alice, _) = open_pair(&fixture);

        let record = PeerChannelRecord::from_channel(&alice);
        let json = serde_json::to_string(&record).unwrap();
        let back: PeerChannelRecord = serde_json::from_str(&json).unwrap();

        assert_eq!(back.channel_id, record.channel_id);
        assert_eq!(back.opening_tx_envelope, record.opening_tx_envelope);
        assert_eq!(back.me, record.me);
    }
}
