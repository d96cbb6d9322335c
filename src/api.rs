//! Role surfaces: the operations external callers (RPC servers, CLIs) drive.
//!
//! Every operation follows the same discipline: load from the store,
//! transition the channel, persist, and only then forward envelopes over the
//! network. A failed forward leaves the persisted state authoritative, and
//! re-issuing the operation simply re-sends the same envelope; the
//! sequence-number and signature checks make replays no-ops at the receiver.

use crate::{
    error::Error,
    judge,
    keys::PublicKey,
    peer,
    store::{JudgeStore, PeerStore},
    wire::{ChannelId, Envelope, OpeningTx, UpdateTx},
    Phase,
};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// Transport towards the counterparty. Consumers implement this on whatever
/// carries envelopes between the two participants.
#[async_trait]
pub trait CounterpartyClient {
    async fn add_channel(&self, address: &str, envelope: &Envelope) -> Result<()>;
    async fn add_proposed_update(&self, address: &str, envelope: &Envelope) -> Result<()>;
    async fn add_full_update(&self, address: &str, envelope: &Envelope) -> Result<()>;
    async fn add_follow_on(&self, address: &str, envelope: &Envelope) -> Result<()>;
}

/// Transport towards the judge, including the two poll endpoints peers use
/// to observe judge-side events.
#[async_trait]
pub trait JudgeClient {
    async fn add_channel(&self, address: &str, envelope: &Envelope) -> Result<()>;
    async fn add_update_tx(&self, address: &str, envelope: &Envelope) -> Result<()>;
    async fn add_closing_tx(&self, address: &str, envelope: &Envelope) -> Result<()>;
    async fn add_follow_on_tx(&self, address: &str, envelope: &Envelope) -> Result<()>;
    async fn opening_tx(&self, address: &str, channel_id: &ChannelId)
        -> Result<Option<Envelope>>;
    async fn final_update_tx(
        &self,
        address: &str,
        channel_id: &ChannelId,
    ) -> Result<Option<Envelope>>;
}

/// Wall-clock source, seconds since the Unix epoch. Must be monotonically
/// non-decreasing across judge restarts for hold-period correctness.
pub trait Clock {
    fn now(&self) -> u64;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0)
    }
}

/// Participant-side surface.
#[derive(Debug)]
pub struct PeerApi<S, C, J> {
    store: S,
    counterparty_client: C,
    judge_client: J,
}

impl<S, C, J> PeerApi<S, C, J>
where
    S: PeerStore,
    C: CounterpartyClient,
    J: JudgeClient,
{
    pub fn new(store: S, counterparty_client: C, judge_client: J) -> Self {
        Self {
            store,
            counterparty_client,
            judge_client,
        }
    }

    /// Register a judge this peer is willing to operate under.
    pub fn add_judge(&mut self, name: &str, pubkey: PublicKey, address: &str) -> Result<()> {
        self.store.put_judge(&peer::Judge {
            name: name.to_string(),
            pubkey,
            address: address.to_string(),
        })
    }

    /// Create a fresh account under a known judge.
    pub fn new_account(&mut self, name: &str, judge: &PublicKey) -> Result<PublicKey> {
        let judge = self
            .store
            .judge(judge)?
            .ok_or_else(|| anyhow!("judge {judge} not found"))?;

        let account = peer::Account::new(name, judge);
        let pubkey = account.pubkey();
        self.store.put_account(&account)?;

        info!(account = %pubkey, "created account");

        Ok(pubkey)
    }

    /// Register a counterparty operating under a known judge.
    pub fn add_counterparty(
        &mut self,
        name: &str,
        pubkey: PublicKey,
        address: &str,
        judge: &PublicKey,
    ) -> Result<()> {
        let judge = self
            .store
            .judge(judge)?
            .ok_or_else(|| anyhow!("judge {judge} not found"))?;

        self.store.put_counterparty(&peer::Counterparty {
            name: name.to_string(),
            pubkey,
            address: address.to_string(),
            judge,
        })
    }

    /// Draw a channel id, build and sign the opening, and send it to the
    /// counterparty.
    pub async fn propose_channel(
        &mut self,
        account: &PublicKey,
        counterparty: &PublicKey,
        state: Vec<u8>,
        hold_period: u64,
    ) -> Result<ChannelId> {
        let account = self
            .store
            .account(account)?
            .ok_or_else(|| anyhow!("account {account} not found"))?;
        let counterparty = self
            .store
            .counterparty(counterparty)?
            .ok_or_else(|| anyhow!("counterparty {counterparty} not found"))?;
        let address = counterparty.address.clone();

        let channel_id = ChannelId::random()?;
        let (channel, envelope) =
            peer::Channel::propose(channel_id, account, counterparty, state, hold_period)?;

        self.store.put_channel(&channel)?;

        info!(channel = %channel_id, "proposed channel");

        self.counterparty_client
            .add_channel(&address, &envelope)
            .await
            .context("failed to send opening to counterparty")?;

        Ok(channel_id)
    }

    /// Countersign an inbound opening and forward the two-signature envelope
    /// to the judge.
    pub async fn accept_channel(&mut self, envelope: &Envelope) -> Result<ChannelId> {
        let opening_tx: OpeningTx = envelope.transaction()?;
        if opening_tx.pubkeys.len() != 2 {
            return Err(Error::MalformedTx("opening must carry exactly two keys").into());
        }

        // Slot 0 is the initiator, so their record is our counterparty and
        // the key at slot 1 must be one of our accounts.
        let account_key = PublicKey::try_from(opening_tx.pubkeys[1].as_slice())?;
        let counterparty_key = PublicKey::try_from(opening_tx.pubkeys[0].as_slice())?;

        let account = self
            .store
            .account(&account_key)?
            .ok_or_else(|| anyhow!("account {account_key} not found"))?;
        let counterparty = self
            .store
            .counterparty(&counterparty_key)?
            .ok_or_else(|| anyhow!("counterparty {counterparty_key} not found"))?;
        let judge_address = account.judge.address.clone();

        let (channel, signed) = peer::Channel::accept(envelope, account, counterparty)?;
        let channel_id = channel.channel_id();

        self.store.put_channel(&channel)?;

        info!(channel = %channel_id, "accepted channel");

        self.judge_client
            .add_channel(&judge_address, &signed)
            .await
            .context("failed to send opening to judge")?;

        Ok(channel_id)
    }

    /// Poll the judge for the witnessed opening and open the channel when it
    /// has arrived.
    pub async fn check_channel(&mut self, channel_id: &ChannelId) -> Result<Phase> {
        let judge_address = self.judge_address(channel_id)?;

        let Some(envelope) = self
            .judge_client
            .opening_tx(&judge_address, channel_id)
            .await?
        else {
            return self.phase(channel_id);
        };

        if envelope.signatures.len() != 3 {
            return self.phase(channel_id);
        }

        let mut channel = self.load(channel_id)?;
        if channel.phase() == Phase::PendingOpen {
            channel.open(&envelope)?;
            self.store.put_channel(&channel)?;
            info!(channel = %channel_id, "channel open");
        }

        Ok(channel.phase())
    }

    /// Process a judge-witnessed opening that was pushed to us.
    pub fn open_channel(&mut self, envelope: &Envelope) -> Result<()> {
        let opening_tx: OpeningTx = envelope.transaction()?;
        let channel_id = ChannelId::try_from(opening_tx.channel_id.as_slice())?;

        let mut channel = self.load(&channel_id)?;
        channel.open(envelope)?;
        self.store.put_channel(&channel)?;

        info!(channel = %channel_id, "channel open");

        Ok(())
    }

    /// Build the next update, sign it and send it to the counterparty.
    /// Returns the sequence number assigned to the proposal.
    pub async fn propose_update(
        &mut self,
        channel_id: &ChannelId,
        state: Vec<u8>,
        fast: bool,
    ) -> Result<u64> {
        let mut channel = self.load(channel_id)?;
        let envelope = channel.propose_update(state, fast)?;
        let sequence_number = channel
            .my_proposed_update()
            .map(|update| update.sequence_number())
            .unwrap_or(0);
        let address = channel.counterparty().address.clone();

        self.store.put_channel(&channel)?;

        debug!(channel = %channel_id, seq = sequence_number, "proposed update");

        self.counterparty_client
            .add_proposed_update(&address, &envelope)
            .await
            .context("failed to send update proposal to counterparty")?;

        Ok(sequence_number)
    }

    /// Process an inbound update proposal from the counterparty.
    pub fn receive_update(&mut self, envelope: &Envelope) -> Result<()> {
        let tx: UpdateTx = envelope.transaction()?;
        let channel_id = ChannelId::try_from(tx.channel_id.as_slice())?;

        let mut channel = self.load(&channel_id)?;
        channel.receive_proposed_update(envelope)?;
        self.store.put_channel(&channel)?;

        debug!(channel = %channel_id, seq = tx.sequence_number, "received update proposal");

        Ok(())
    }

    /// Cosign the stored inbound proposal and send the full update back.
    pub async fn cosign_update(&mut self, channel_id: &ChannelId) -> Result<()> {
        let mut channel = self.load(channel_id)?;
        let envelope = channel.cosign_proposed_update()?;
        let address = channel.counterparty().address.clone();

        self.store.put_channel(&channel)?;

        debug!(channel = %channel_id, "cosigned update");

        self.counterparty_client
            .add_full_update(&address, &envelope)
            .await
            .context("failed to send full update to counterparty")?;

        Ok(())
    }

    /// Process a fully-signed update coming back from the counterparty.
    pub fn receive_full_update(&mut self, envelope: &Envelope) -> Result<()> {
        let tx: UpdateTx = envelope.transaction()?;
        let channel_id = ChannelId::try_from(tx.channel_id.as_slice())?;

        let mut channel = self.load(&channel_id)?;
        channel.receive_full_update(envelope)?;
        self.store.put_channel(&channel)?;

        debug!(channel = %channel_id, seq = tx.sequence_number, "received full update");

        Ok(())
    }

    /// Push the last full update to the judge, superseding whatever is on
    /// file there. Used during the hold period of a contested close.
    pub async fn submit_update(&mut self, channel_id: &ChannelId) -> Result<()> {
        let channel = self.load(channel_id)?;
        let update = channel
            .last_full_update()
            .ok_or(Error::NoUpdatesAvailable)?
            .envelope
            .clone();
        let judge_address = channel.account().judge.address.clone();

        self.judge_client
            .add_update_tx(&judge_address, &update)
            .await
            .context("failed to send update to judge")?;

        Ok(())
    }

    /// Initiate a close: send the last full update (if any) and a signed
    /// closing tx to the judge, and enter the pending-closed phase locally.
    pub async fn close_channel(&mut self, channel_id: &ChannelId) -> Result<()> {
        let mut channel = self.load(channel_id)?;
        let closing = channel.new_closing_tx()?;
        let update = channel
            .last_full_update()
            .map(|update| update.envelope.clone());
        let judge_address = channel.account().judge.address.clone();

        if channel.phase() == Phase::Open {
            channel.begin_close()?;
        }
        self.store.put_channel(&channel)?;

        info!(channel = %channel_id, "closing channel");

        if let Some(update) = update {
            self.judge_client
                .add_update_tx(&judge_address, &update)
                .await
                .context("failed to send update to judge")?;
        }
        self.judge_client
            .add_closing_tx(&judge_address, &closing)
            .await
            .context("failed to send closing tx to judge")?;

        Ok(())
    }

    /// Poll the judge for a finalized update and settle the channel on it.
    pub async fn check_final_update(&mut self, channel_id: &ChannelId) -> Result<Phase> {
        let judge_address = self.judge_address(channel_id)?;

        let Some(envelope) = self
            .judge_client
            .final_update_tx(&judge_address, channel_id)
            .await?
        else {
            return self.phase(channel_id);
        };

        let mut channel = self.load(channel_id)?;
        if channel.phase() != Phase::Closed {
            channel.receive_final_update(&envelope)?;
            self.store.put_channel(&channel)?;
            info!(channel = %channel_id, "channel closed");
        }

        Ok(channel.phase())
    }

    /// Build a follow-on and send it to both the judge and the counterparty.
    pub async fn new_follow_on(&mut self, channel_id: &ChannelId, state: Vec<u8>) -> Result<()> {
        let channel = self.load(channel_id)?;
        let envelope = channel.new_follow_on_tx(state)?;
        let judge_address = channel.account().judge.address.clone();
        let counterparty_address = channel.counterparty().address.clone();

        self.judge_client
            .add_follow_on_tx(&judge_address, &envelope)
            .await
            .context("failed to send follow-on to judge")?;
        self.counterparty_client
            .add_follow_on(&counterparty_address, &envelope)
            .await
            .context("failed to send follow-on to counterparty")?;

        Ok(())
    }

    /// Process a follow-on signed by the counterparty.
    pub fn receive_follow_on(&mut self, envelope: &Envelope) -> Result<()> {
        let tx: crate::wire::FollowOnTx = envelope.transaction()?;
        let channel_id = ChannelId::try_from(tx.channel_id.as_slice())?;

        let mut channel = self.load(&channel_id)?;
        channel.receive_follow_on_tx(envelope)?;
        self.store.put_channel(&channel)?;

        Ok(())
    }

    pub fn view_channels(&self) -> Result<Vec<peer::Channel>> {
        self.store.channels()
    }

    fn load(&self, channel_id: &ChannelId) -> Result<peer::Channel> {
        self.store
            .channel(channel_id)?
            .ok_or_else(|| Error::ChannelNotFound(*channel_id).into())
    }

    fn phase(&self, channel_id: &ChannelId) -> Result<Phase> {
        Ok(self.load(channel_id)?.phase())
    }

    fn judge_address(&self, channel_id: &ChannelId) -> Result<String> {
        Ok(self.load(channel_id)?.account().judge.address.clone())
    }
}

/// Judge-side surface. Purely reactive: it never initiates network traffic,
/// so all operations are synchronous.
#[derive(Debug)]
pub struct JudgeApi<S, T> {
    store: S,
    judge: judge::Judge,
    clock: T,
}

impl<S, T> JudgeApi<S, T>
where
    S: JudgeStore,
    T: Clock,
{
    pub fn new(store: S, judge: judge::Judge, clock: T) -> Self {
        Self {
            store,
            judge,
            clock,
        }
    }

    pub fn pubkey(&self) -> PublicKey {
        self.judge.pubkey()
    }

    /// Register a participant account in this judge's directory.
    pub fn add_account(&mut self, name: &str, pubkey: PublicKey, address: &str) -> Result<()> {
        self.store.put_account(&judge::Account {
            name: name.to_string(),
            pubkey,
            address: address.to_string(),
            judge: self.judge.pubkey(),
        })
    }

    /// Admit a two-signature opening. Channel-id collisions within this
    /// judge's admitted set are rejected.
    pub fn admit_channel(&mut self, envelope: &Envelope) -> Result<ChannelId> {
        let opening_tx: OpeningTx = envelope.transaction()?;
        if opening_tx.pubkeys.len() != 2 {
            return Err(Error::MalformedTx("opening must carry exactly two keys").into());
        }
        let channel_id = ChannelId::try_from(opening_tx.channel_id.as_slice())?;

        if self.store.channel(&channel_id)?.is_some() {
            return Err(Error::ChannelExists(channel_id).into());
        }

        let accounts = [
            self.directory_account(&opening_tx.pubkeys[0])?,
            self.directory_account(&opening_tx.pubkeys[1])?,
        ];

        let channel = self.judge.admit_opening(envelope, accounts)?;
        self.store.put_channel(&channel)?;

        info!(channel = %channel_id, "admitted channel");

        Ok(channel_id)
    }

    /// Witness a pending opening, returning the three-signature envelope the
    /// peers wait for.
    pub fn confirm_channel(&mut self, channel_id: &ChannelId) -> Result<Envelope> {
        let mut channel = self.load(channel_id)?;
        let envelope = self.judge.confirm(&mut channel)?;
        self.store.put_channel(&channel)?;

        info!(channel = %channel_id, "confirmed channel");

        Ok(envelope)
    }

    /// Record a fully-signed update.
    pub fn admit_update_tx(&mut self, envelope: &Envelope) -> Result<()> {
        let tx: UpdateTx = envelope.transaction()?;
        let channel_id = ChannelId::try_from(tx.channel_id.as_slice())?;

        let mut channel = self.load(&channel_id)?;
        channel.admit_full_update(envelope)?;
        self.store.put_channel(&channel)?;

        debug!(channel = %channel_id, seq = tx.sequence_number, "admitted update");

        Ok(())
    }

    /// Record a close request and start the hold period.
    pub fn admit_closing_tx(&mut self, envelope: &Envelope) -> Result<()> {
        let tx: crate::wire::ClosingTx = envelope.transaction()?;
        let channel_id = ChannelId::try_from(tx.channel_id.as_slice())?;

        let mut channel = self.load(&channel_id)?;
        channel.admit_closing_tx(envelope, self.clock.now())?;
        self.store.put_channel(&channel)?;

        info!(channel = %channel_id, "close requested, hold period started");

        Ok(())
    }

    /// Record auxiliary evidence.
    pub fn admit_follow_on_tx(&mut self, envelope: &Envelope) -> Result<()> {
        let tx: crate::wire::FollowOnTx = envelope.transaction()?;
        let channel_id = ChannelId::try_from(tx.channel_id.as_slice())?;

        let mut channel = self.load(&channel_id)?;
        channel.admit_follow_on_tx(envelope)?;
        self.store.put_channel(&channel)?;

        Ok(())
    }

    /// Commit the `index`-th admitted update as the final state.
    pub fn finalize(&mut self, channel_id: &ChannelId, index: usize) -> Result<Envelope> {
        let mut channel = self.load(channel_id)?;
        let envelope = channel.finalize(&self.judge, index, self.clock.now())?;
        self.store.put_channel(&channel)?;

        info!(channel = %channel_id, index, "finalized channel");

        Ok(envelope)
    }

    /// Close without choosing a final update.
    pub fn cancel(&mut self, channel_id: &ChannelId) -> Result<()> {
        let mut channel = self.load(channel_id)?;
        channel.cancel(self.clock.now())?;
        self.store.put_channel(&channel)?;

        info!(channel = %channel_id, "cancelled channel");

        Ok(())
    }

    /// Poll endpoint: the opening envelope in whatever signature state it is
    /// in. Peers open once it carries three signatures.
    pub fn opening_tx(&self, channel_id: &ChannelId) -> Result<Option<Envelope>> {
        Ok(self
            .store
            .channel(channel_id)?
            .map(|channel| channel.opening_tx_envelope().clone()))
    }

    /// Poll endpoint: the finalized update, once one exists.
    pub fn final_update_tx(&self, channel_id: &ChannelId) -> Result<Option<Envelope>> {
        Ok(self
            .store
            .channel(channel_id)?
            .and_then(|channel| channel.final_update().map(|update| update.envelope.clone())))
    }

    pub fn view_channels(&self) -> Result<Vec<judge::Channel>> {
        self.store.channels()
    }

    fn load(&self, channel_id: &ChannelId) -> Result<judge::Channel> {
        self.store
            .channel(channel_id)?
            .ok_or_else(|| Error::ChannelNotFound(*channel_id).into())
    }

    fn directory_account(&self, pubkey: &[u8]) -> Result<judge::Account> {
        let pubkey = PublicKey::try_from(pubkey)?;
        self.store
            .account(&pubkey)?
            .ok_or_else(|| anyhow!("account {pubkey} not registered with this judge"))
    }
}
