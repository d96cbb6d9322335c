//! Participant-role view of a channel.
//!
//! Both ends of a channel run the same code, parameterized by `me`: the index
//! of the local account's public key in the opening transaction's key pair.
//! Signature slots on update envelopes are indexed by `me`; slot 2 on opening
//! and finalized-update envelopes belongs to the judge.

use crate::{
    error::Error,
    keys::{KeyPair, PublicKey},
    wire::{
        ChannelId, ClosingTx, Envelope, FollowOnTx, OpeningTx, SignedUpdate, UpdateTx, JUDGE_SLOT,
    },
    Phase,
};

fn other(me: usize) -> usize {
    1 - me
}

/// A judge as a participant sees it: public key and a reachable address.
#[derive(Clone, Debug)]
pub struct Judge {
    pub name: String,
    pub pubkey: PublicKey,
    pub address: String,
}

/// The local account: owns the signing key and operates under one judge.
#[derive(Clone, Debug)]
pub struct Account {
    pub name: String,
    keypair: KeyPair,
    pub judge: Judge,
}

impl Account {
    pub fn new(name: impl Into<String>, judge: Judge) -> Self {
        Self {
            name: name.into(),
            keypair: KeyPair::new_random(),
            judge,
        }
    }

    pub fn from_keypair(name: impl Into<String>, keypair: KeyPair, judge: Judge) -> Self {
        Self {
            name: name.into(),
            keypair,
            judge,
        }
    }

    pub fn pubkey(&self) -> PublicKey {
        self.keypair.public()
    }

    pub(crate) fn keypair(&self) -> &KeyPair {
        &self.keypair
    }
}

/// The remote participant: public key, address, and the judge they operate
/// under. A channel can only exist between parties sharing one judge.
#[derive(Clone, Debug)]
pub struct Counterparty {
    pub name: String,
    pub pubkey: PublicKey,
    pub address: String,
    pub judge: Judge,
}

/// Participant-side channel state machine.
#[derive(Clone, Debug)]
pub struct Channel {
    channel_id: ChannelId,
    phase: Phase,
    me: usize,
    opening_tx: OpeningTx,
    opening_tx_envelope: Envelope,
    my_proposed: Option<SignedUpdate>,
    their_proposed: Option<SignedUpdate>,
    last_full: Option<SignedUpdate>,
    follow_ons: Vec<Envelope>,
    account: Account,
    counterparty: Counterparty,
}

impl Channel {
    /// Create an opening as the initiator: build the opening transaction,
    /// seal it and sign into slot 0.
    ///
    /// Returns the channel (phase [`Phase::PendingOpen`]) and the
    /// one-signature envelope to forward to the counterparty.
    pub fn propose(
        channel_id: ChannelId,
        account: Account,
        counterparty: Counterparty,
        state: Vec<u8>,
        hold_period: u64,
    ) -> Result<(Self, Envelope), Error> {
        if account.judge.pubkey != counterparty.judge.pubkey {
            return Err(Error::JudgeMismatch);
        }
        if account.pubkey() == counterparty.pubkey {
            return Err(Error::MalformedTx("participant keys must be distinct"));
        }
        if hold_period == 0 {
            return Err(Error::MalformedTx("hold period must be positive"));
        }

        let opening_tx = OpeningTx {
            channel_id: channel_id.to_vec(),
            pubkeys: vec![account.pubkey().to_vec(), counterparty.pubkey.to_vec()],
            state,
            hold_period,
        };

        let mut envelope = Envelope::seal(&opening_tx);
        envelope.append_signature(account.keypair());

        let channel = Self {
            channel_id,
            phase: Phase::PendingOpen,
            me: 0,
            opening_tx,
            opening_tx_envelope: envelope.clone(),
            my_proposed: None,
            their_proposed: None,
            last_full: None,
            follow_ons: Vec::new(),
            account,
            counterparty,
        };

        Ok((channel, envelope))
    }

    /// Receive an opening as the non-initiator and countersign it.
    ///
    /// The inbound envelope must carry exactly the initiator's signature,
    /// both parties must operate under the same judge, and slot 0 must verify
    /// against the counterparty's key. Returns the channel (phase
    /// [`Phase::PendingOpen`]) and the two-signature envelope to forward to
    /// the judge.
    pub fn accept(
        envelope: &Envelope,
        account: Account,
        counterparty: Counterparty,
    ) -> Result<(Self, Envelope), Error> {
        let opening_tx: OpeningTx = envelope.transaction()?;

        envelope.expect_signatures(1)?;
        if account.judge.pubkey != counterparty.judge.pubkey {
            return Err(Error::JudgeMismatch);
        }
        if opening_tx.pubkeys.len() != 2 {
            return Err(Error::MalformedTx("opening must carry exactly two keys"));
        }
        envelope.verify_slot(0, &counterparty.pubkey)?;

        let me = opening_tx
            .pubkeys
            .iter()
            .position(|key| key.as_slice() == account.pubkey().as_bytes())
            .ok_or(Error::MalformedTx("own key not part of the opening"))?;

        let channel_id = ChannelId::try_from(opening_tx.channel_id.as_slice())?;

        let mut signed = envelope.clone();
        signed.append_signature(account.keypair());

        let channel = Self {
            channel_id,
            phase: Phase::PendingOpen,
            me,
            opening_tx,
            opening_tx_envelope: signed.clone(),
            my_proposed: None,
            their_proposed: None,
            last_full: None,
            follow_ons: Vec::new(),
            account,
            counterparty,
        };

        Ok((channel, signed))
    }

    /// Process the judge-witnessed opening envelope and move to
    /// [`Phase::Open`].
    ///
    /// All three signatures must verify and the payload must be
    /// byte-identical to the opening this channel was built from.
    pub fn open(&mut self, envelope: &Envelope) -> Result<(), Error> {
        if self.phase != Phase::PendingOpen {
            return Err(Error::PhaseViolation(self.phase));
        }

        envelope.expect_signatures(3)?;
        envelope.verify_slot(self.me, &self.account.pubkey())?;
        envelope.verify_slot(other(self.me), &self.counterparty.pubkey)?;
        envelope.verify_slot(JUDGE_SLOT, &self.account.judge.pubkey)?;

        if envelope.payload != self.opening_tx_envelope.payload {
            return Err(Error::PayloadMismatch);
        }

        self.phase = Phase::Open;
        self.opening_tx_envelope = envelope.clone();

        Ok(())
    }

    /// Highest sequence number seen so far on this side, over both proposal
    /// slots and the last full update. Zero when nothing has been exchanged.
    pub fn highest_seq(&self) -> u64 {
        [&self.my_proposed, &self.their_proposed, &self.last_full]
            .into_iter()
            .flatten()
            .map(SignedUpdate::sequence_number)
            .max()
            .unwrap_or(0)
    }

    /// Build, sign and store an outbound update proposal carrying the next
    /// sequence number. Returns the half-signed envelope to forward.
    pub fn propose_update(&mut self, state: Vec<u8>, fast: bool) -> Result<Envelope, Error> {
        self.expect_updatable()?;

        let tx = UpdateTx {
            channel_id: self.channel_id.to_vec(),
            state,
            sequence_number: self.highest_seq() + 1,
            fast,
        };

        let mut envelope = Envelope::seal_with_slots(&tx, 2);
        envelope.sign_slot(self.me, self.account.keypair());

        self.my_proposed = Some(SignedUpdate {
            tx,
            envelope: envelope.clone(),
        });

        Ok(envelope)
    }

    /// Validate an inbound update proposal and store it for cosigning.
    ///
    /// This is the only path by which an inbound proposal may raise
    /// [`Channel::highest_seq`].
    pub fn receive_proposed_update(&mut self, envelope: &Envelope) -> Result<(), Error> {
        self.expect_updatable()?;

        let tx: UpdateTx = envelope.transaction()?;

        envelope.expect_signatures(2)?;
        envelope.verify_slot(other(self.me), &self.counterparty.pubkey)?;
        self.expect_own_channel(&tx.channel_id)?;

        let highest = self.highest_seq();
        if tx.sequence_number <= highest {
            return Err(Error::SequenceNotMonotonic {
                proposed: tx.sequence_number,
                highest,
            });
        }

        self.their_proposed = Some(SignedUpdate {
            tx,
            envelope: envelope.clone(),
        });

        Ok(())
    }

    /// Cosign the stored inbound proposal, promoting it to the last full
    /// update. Returns the two-signature envelope to forward back.
    pub fn cosign_proposed_update(&mut self) -> Result<Envelope, Error> {
        self.expect_updatable()?;

        let mut full = self
            .their_proposed
            .clone()
            .ok_or(Error::NoProposedUpdate)?;
        full.envelope.sign_slot(self.me, self.account.keypair());

        self.their_proposed = Some(full.clone());
        self.last_full = Some(full.clone());

        Ok(full.envelope)
    }

    /// Accept a fully-signed (2-of-2) update from the counterparty.
    ///
    /// Replays and anything at or below the last full update's sequence are
    /// rejected with [`Error::SequenceNotMonotonic`].
    pub fn receive_full_update(&mut self, envelope: &Envelope) -> Result<(), Error> {
        self.expect_updatable()?;

        let tx: UpdateTx = envelope.transaction()?;

        envelope.expect_signatures(2)?;
        envelope.verify_slot(self.me, &self.account.pubkey())?;
        envelope.verify_slot(other(self.me), &self.counterparty.pubkey)?;
        self.expect_own_channel(&tx.channel_id)?;

        if let Some(last) = &self.last_full {
            if tx.sequence_number <= last.sequence_number() {
                return Err(Error::SequenceNotMonotonic {
                    proposed: tx.sequence_number,
                    highest: last.sequence_number(),
                });
            }
        }

        self.last_full = Some(SignedUpdate {
            tx,
            envelope: envelope.clone(),
        });

        Ok(())
    }

    /// Build and sign a cooperative close request for the judge.
    pub fn new_closing_tx(&self) -> Result<Envelope, Error> {
        self.expect_updatable()?;

        let tx = ClosingTx {
            channel_id: self.channel_id.to_vec(),
        };

        let mut envelope = Envelope::seal(&tx);
        envelope.append_signature(self.account.keypair());

        Ok(envelope)
    }

    /// Record that this side has initiated a close; the judge-side hold
    /// period is assumed to be starting.
    pub fn begin_close(&mut self) -> Result<(), Error> {
        if self.phase != Phase::Open {
            return Err(Error::PhaseViolation(self.phase));
        }

        self.phase = Phase::PendingClosed;

        Ok(())
    }

    /// Accept a judge-finalized (3-signature) update and settle the channel.
    pub fn receive_final_update(&mut self, envelope: &Envelope) -> Result<(), Error> {
        if !matches!(self.phase, Phase::Open | Phase::PendingClosed) {
            return Err(Error::PhaseViolation(self.phase));
        }

        let tx: UpdateTx = envelope.transaction()?;

        envelope.expect_signatures(3)?;
        envelope.verify_slot(self.me, &self.account.pubkey())?;
        envelope.verify_slot(other(self.me), &self.counterparty.pubkey)?;
        envelope.verify_slot(JUDGE_SLOT, &self.account.judge.pubkey)?;
        self.expect_own_channel(&tx.channel_id)?;

        self.last_full = Some(SignedUpdate {
            tx,
            envelope: envelope.clone(),
        });
        self.phase = Phase::Closed;

        Ok(())
    }

    /// Build and sign a follow-on carrying auxiliary evidence.
    pub fn new_follow_on_tx(&self, state: Vec<u8>) -> Result<Envelope, Error> {
        self.expect_updatable()?;

        let tx = FollowOnTx {
            channel_id: self.channel_id.to_vec(),
            state,
        };

        let mut envelope = Envelope::seal(&tx);
        envelope.append_signature(self.account.keypair());

        Ok(envelope)
    }

    /// Accept a follow-on signed by the counterparty.
    pub fn receive_follow_on_tx(&mut self, envelope: &Envelope) -> Result<(), Error> {
        self.expect_updatable()?;

        let tx: FollowOnTx = envelope.transaction()?;

        envelope.expect_signatures(1)?;
        envelope.verify_slot(0, &self.counterparty.pubkey)?;
        self.expect_own_channel(&tx.channel_id)?;

        self.follow_ons.push(envelope.clone());

        Ok(())
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Index of the local account in the opening's key pair.
    pub fn me(&self) -> usize {
        self.me
    }

    pub fn opening_tx(&self) -> &OpeningTx {
        &self.opening_tx
    }

    pub fn opening_tx_envelope(&self) -> &Envelope {
        &self.opening_tx_envelope
    }

    pub fn my_proposed_update(&self) -> Option<&SignedUpdate> {
        self.my_proposed.as_ref()
    }

    pub fn their_proposed_update(&self) -> Option<&SignedUpdate> {
        self.their_proposed.as_ref()
    }

    pub fn last_full_update(&self) -> Option<&SignedUpdate> {
        self.last_full.as_ref()
    }

    pub fn follow_ons(&self) -> &[Envelope] {
        &self.follow_ons
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn counterparty(&self) -> &Counterparty {
        &self.counterparty
    }

    fn expect_updatable(&self) -> Result<(), Error> {
        if !matches!(self.phase, Phase::Open | Phase::PendingClosed) {
            return Err(Error::PhaseViolation(self.phase));
        }

        Ok(())
    }

    fn expect_own_channel(&self, channel_id: &[u8]) -> Result<(), Error> {
        if channel_id != self.channel_id.as_bytes() {
            return Err(Error::WrongChannelId {
                expected: self.channel_id,
            });
        }

        Ok(())
    }

    /// Reassemble a channel out of its persisted parts. Used by stores; no
    /// validation happens here because everything was validated on the way
    /// in.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        channel_id: ChannelId,
        phase: Phase,
        me: usize,
        opening_tx: OpeningTx,
        opening_tx_envelope: Envelope,
        my_proposed: Option<SignedUpdate>,
        their_proposed: Option<SignedUpdate>,
        last_full: Option<SignedUpdate>,
        follow_ons: Vec<Envelope>,
        account: Account,
        counterparty: Counterparty,
    ) -> Self {
        Self {
            channel_id,
            phase,
            me,
            opening_tx,
            opening_tx_envelope,
            my_proposed,
            their_proposed,
            last_full,
            follow_ons,
            account,
            counterparty,
        }
    }
}
