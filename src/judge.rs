//! Judge-role view of a channel.
//!
//! The judge admits fully-signed openings, witnesses them, records full
//! updates in strictly increasing sequence order, and runs the hold period
//! once a close has been requested. Time never comes from inside this module:
//! every time-dependent operation takes the current wall-clock instant in
//! seconds, and elapsed-ness is evaluated lazily on each attempt.

use crate::{
    error::Error,
    keys::{KeyPair, PublicKey},
    wire::{ChannelId, ClosingTx, Envelope, FollowOnTx, OpeningTx, SignedUpdate, UpdateTx},
    Phase,
};

/// The arbiter's own identity: the only party holding the judge signing key.
#[derive(Clone, Debug)]
pub struct Judge {
    pub name: String,
    keypair: KeyPair,
}

impl Judge {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            keypair: KeyPair::new_random(),
        }
    }

    pub fn from_keypair(name: impl Into<String>, keypair: KeyPair) -> Self {
        Self {
            name: name.into(),
            keypair,
        }
    }

    pub fn pubkey(&self) -> PublicKey {
        self.keypair.public()
    }

    pub(crate) fn keypair(&self) -> &KeyPair {
        &self.keypair
    }

    /// Admit a two-signature opening between two accounts registered under
    /// this judge. The resulting channel is in [`Phase::PendingOpen`] until
    /// confirmed.
    pub fn admit_opening(
        &self,
        envelope: &Envelope,
        accounts: [Account; 2],
    ) -> Result<Channel, Error> {
        let opening_tx: OpeningTx = envelope.transaction()?;

        envelope.expect_signatures(2)?;
        if opening_tx.pubkeys.len() != 2 {
            return Err(Error::MalformedTx("opening must carry exactly two keys"));
        }
        if opening_tx.pubkeys[0] == opening_tx.pubkeys[1] {
            return Err(Error::MalformedTx("participant keys must be distinct"));
        }
        if opening_tx.hold_period == 0 {
            return Err(Error::MalformedTx("hold period must be positive"));
        }
        if accounts[0].judge != self.pubkey() || accounts[1].judge != self.pubkey() {
            return Err(Error::JudgeMismatch);
        }
        envelope.verify_slot_raw(0, &opening_tx.pubkeys[0])?;
        envelope.verify_slot_raw(1, &opening_tx.pubkeys[1])?;

        let channel_id = ChannelId::try_from(opening_tx.channel_id.as_slice())?;

        Ok(Channel {
            channel_id,
            phase: Phase::PendingOpen,
            opening_tx,
            opening_tx_envelope: envelope.clone(),
            full_updates: Vec::new(),
            close_time: None,
            closing_tx_envelope: None,
            follow_ons: Vec::new(),
            final_update: None,
            accounts,
            judge: self.pubkey(),
        })
    }

    /// Witness the opening: sign into slot 2 and move the channel to
    /// [`Phase::Open`]. Peers rely on the returned three-signature envelope
    /// to open on their side.
    pub fn confirm(&self, channel: &mut Channel) -> Result<Envelope, Error> {
        if channel.phase != Phase::PendingOpen {
            return Err(Error::PhaseViolation(channel.phase));
        }

        channel.opening_tx_envelope.append_signature(&self.keypair);
        channel.phase = Phase::Open;

        Ok(channel.opening_tx_envelope.clone())
    }
}

/// A participant as registered in the judge's directory.
#[derive(Clone, Debug)]
pub struct Account {
    pub name: String,
    pub pubkey: PublicKey,
    pub address: String,
    /// Public key of the judge this account is registered under.
    pub judge: PublicKey,
}

/// Judge-side channel state machine.
#[derive(Clone, Debug)]
pub struct Channel {
    channel_id: ChannelId,
    phase: Phase,
    opening_tx: OpeningTx,
    opening_tx_envelope: Envelope,
    full_updates: Vec<SignedUpdate>,
    close_time: Option<u64>,
    closing_tx_envelope: Option<Envelope>,
    follow_ons: Vec<Envelope>,
    final_update: Option<SignedUpdate>,
    accounts: [Account; 2],
    judge: PublicKey,
}

impl Channel {
    /// Record a fully-signed (2-of-2) update.
    ///
    /// Legal while open and, crucially, while a close is pending: a
    /// higher-sequence update arriving during the hold period supersedes the
    /// one already on file.
    pub fn admit_full_update(&mut self, envelope: &Envelope) -> Result<(), Error> {
        if !matches!(self.phase, Phase::Open | Phase::PendingClosed) {
            return Err(Error::PhaseViolation(self.phase));
        }

        let tx: UpdateTx = envelope.transaction()?;

        envelope.expect_signatures(2)?;
        envelope.verify_slot_raw(0, &self.opening_tx.pubkeys[0])?;
        envelope.verify_slot_raw(1, &self.opening_tx.pubkeys[1])?;
        self.expect_own_channel(&tx.channel_id)?;

        if let Some(last) = self.full_updates.last() {
            if tx.sequence_number <= last.sequence_number() {
                return Err(Error::SequenceNotMonotonic {
                    proposed: tx.sequence_number,
                    highest: last.sequence_number(),
                });
            }
        }

        self.full_updates.push(SignedUpdate {
            tx,
            envelope: envelope.clone(),
        });

        Ok(())
    }

    /// Record a close request signed by either participant; stamps the close
    /// time and starts the hold period.
    pub fn admit_closing_tx(&mut self, envelope: &Envelope, now: u64) -> Result<(), Error> {
        if self.phase != Phase::Open {
            return Err(Error::PhaseViolation(self.phase));
        }

        let tx: ClosingTx = envelope.transaction()?;

        envelope.expect_signatures(1)?;
        self.verify_either_participant(envelope)?;
        self.expect_own_channel(&tx.channel_id)?;

        self.closing_tx_envelope = Some(envelope.clone());
        self.close_time = Some(now);
        self.phase = Phase::PendingClosed;

        Ok(())
    }

    /// Record auxiliary evidence signed by either participant.
    pub fn admit_follow_on_tx(&mut self, envelope: &Envelope) -> Result<(), Error> {
        if !matches!(self.phase, Phase::Open | Phase::PendingClosed) {
            return Err(Error::PhaseViolation(self.phase));
        }

        let tx: FollowOnTx = envelope.transaction()?;

        envelope.expect_signatures(1)?;
        self.verify_either_participant(envelope)?;
        self.expect_own_channel(&tx.channel_id)?;

        self.follow_ons.push(envelope.clone());

        Ok(())
    }

    /// Commit the `index`-th admitted update as the channel's final state.
    ///
    /// Only once the hold period has elapsed; the judge's signature lands in
    /// slot 2, making the chosen update 3-of-3 signed.
    pub fn finalize(
        &mut self,
        judge: &Judge,
        index: usize,
        now: u64,
    ) -> Result<Envelope, Error> {
        if self.phase != Phase::PendingClosed {
            return Err(Error::PhaseViolation(self.phase));
        }
        if self.full_updates.is_empty() {
            return Err(Error::NoUpdatesAvailable);
        }
        if index >= self.full_updates.len() {
            return Err(Error::IndexOutOfRange(index));
        }
        self.expect_hold_elapsed(now)?;

        let chosen = &mut self.full_updates[index];
        chosen.envelope.append_signature(judge.keypair());

        self.final_update = Some(chosen.clone());
        self.phase = Phase::Closed;

        Ok(self.full_updates[index].envelope.clone())
    }

    /// Close the channel without choosing a final update. Only legal once
    /// the hold period has elapsed without dispute.
    pub fn cancel(&mut self, now: u64) -> Result<(), Error> {
        if self.phase != Phase::PendingClosed {
            return Err(Error::PhaseViolation(self.phase));
        }
        self.expect_hold_elapsed(now)?;

        self.phase = Phase::Closed;

        Ok(())
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn opening_tx(&self) -> &OpeningTx {
        &self.opening_tx
    }

    pub fn opening_tx_envelope(&self) -> &Envelope {
        &self.opening_tx_envelope
    }

    pub fn full_updates(&self) -> &[SignedUpdate] {
        &self.full_updates
    }

    pub fn close_time(&self) -> Option<u64> {
        self.close_time
    }

    pub fn closing_tx_envelope(&self) -> Option<&Envelope> {
        self.closing_tx_envelope.as_ref()
    }

    pub fn follow_ons(&self) -> &[Envelope] {
        &self.follow_ons
    }

    pub fn final_update(&self) -> Option<&SignedUpdate> {
        self.final_update.as_ref()
    }

    pub fn accounts(&self) -> &[Account; 2] {
        &self.accounts
    }

    pub fn judge_pubkey(&self) -> PublicKey {
        self.judge
    }

    fn expect_own_channel(&self, channel_id: &[u8]) -> Result<(), Error> {
        if channel_id != self.channel_id.as_bytes() {
            return Err(Error::WrongChannelId {
                expected: self.channel_id,
            });
        }

        Ok(())
    }

    fn verify_either_participant(&self, envelope: &Envelope) -> Result<(), Error> {
        envelope
            .verify_slot_raw(0, &self.opening_tx.pubkeys[0])
            .or_else(|_| envelope.verify_slot_raw(0, &self.opening_tx.pubkeys[1]))
    }

    fn expect_hold_elapsed(&self, now: u64) -> Result<(), Error> {
        match self.close_time {
            Some(close_time)
                if now >= close_time.saturating_add(self.opening_tx.hold_period) =>
            {
                Ok(())
            }
            _ => Err(Error::HoldPeriodNotElapsed),
        }
    }

    /// Reassemble a channel out of its persisted parts; see
    /// `peer::Channel::from_parts`.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        channel_id: ChannelId,
        phase: Phase,
        opening_tx: OpeningTx,
        opening_tx_envelope: Envelope,
        full_updates: Vec<SignedUpdate>,
        close_time: Option<u64>,
        closing_tx_envelope: Option<Envelope>,
        follow_ons: Vec<Envelope>,
        final_update: Option<SignedUpdate>,
        accounts: [Account; 2],
        judge: PublicKey,
    ) -> Self {
        Self {
            channel_id,
            phase,
            opening_tx,
            opening_tx_envelope,
            full_updates,
            close_time,
            closing_tx_envelope,
            follow_ons,
            final_update,
            accounts,
            judge,
        }
    }
}
