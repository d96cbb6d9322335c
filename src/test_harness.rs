//! Shared fixtures for the unit tests: deterministic key material and the
//! usual two-participants-one-judge setup.

use crate::{
    judge,
    keys::KeyPair,
    peer,
    wire::{ChannelId, Envelope},
};

pub const HOLD_PERIOD: u64 = 60;

/// Deterministic key pair; a distinct `seed` yields a distinct identity.
pub fn keypair(seed: u8) -> KeyPair {
    KeyPair::from_seed([seed; 32])
}

/// The judge every fixture operates under.
pub fn test_judge() -> judge::Judge {
    judge::Judge::from_keypair("sffcu", keypair(0xf0))
}

/// Two participants, one judge, and a fixed channel id; everything needed to
/// drive a channel through its lifetime from both ends.
pub struct PeerFixture {
    pub channel_id: ChannelId,
    pub alice_keypair: KeyPair,
    pub bob_keypair: KeyPair,
    pub alice_account: peer::Account,
    pub alice_counterparty: peer::Counterparty,
    pub bob_account: peer::Account,
    pub bob_counterparty: peer::Counterparty,
}

impl PeerFixture {
    pub fn new() -> Self {
        Self::build(peer_judge(), peer_judge())
    }

    /// Alice's record of Bob references a different judge; opening a channel
    /// between them must fail.
    pub fn with_distinct_judges() -> Self {
        let other = peer::Judge {
            name: "someone else".to_string(),
            pubkey: keypair(0xf1).public(),
            address: "http://judge.invalid:4546".to_string(),
        };

        Self::build(peer_judge(), other)
    }

    fn build(judge: peer::Judge, counterparty_judge: peer::Judge) -> Self {
        let alice_keypair = keypair(1);
        let bob_keypair = keypair(2);

        let alice_account =
            peer::Account::from_keypair("alfred", alice_keypair.clone(), judge.clone());
        let bob_account = peer::Account::from_keypair("billary", bob_keypair.clone(), judge.clone());

        let alice_counterparty = peer::Counterparty {
            name: "billary".to_string(),
            pubkey: bob_keypair.public(),
            address: "http://bob.invalid:4545".to_string(),
            judge: counterparty_judge,
        };
        let bob_counterparty = peer::Counterparty {
            name: "alfred".to_string(),
            pubkey: alice_keypair.public(),
            address: "http://alice.invalid:4545".to_string(),
            judge,
        };

        Self {
            channel_id: ChannelId::from_bytes([0xde; 32]),
            alice_keypair,
            bob_keypair,
            alice_account,
            alice_counterparty,
            bob_account,
            bob_counterparty,
        }
    }
}

fn peer_judge() -> peer::Judge {
    peer::Judge {
        name: "sffcu".to_string(),
        pubkey: test_judge().pubkey(),
        address: "http://judge.invalid:4546".to_string(),
    }
}

/// Judge-side directory records for the fixture's participants.
pub fn judge_accounts(fixture: &PeerFixture, judge: &judge::Judge) -> [judge::Account; 2] {
    [
        judge::Account {
            name: "alfred".to_string(),
            pubkey: fixture.alice_keypair.public(),
            address: "http://alice.invalid:4545".to_string(),
            judge: judge.pubkey(),
        },
        judge::Account {
            name: "billary".to_string(),
            pubkey: fixture.bob_keypair.public(),
            address: "http://bob.invalid:4545".to_string(),
            judge: judge.pubkey(),
        },
    ]
}

/// Stand-in for the judge's signing action in tests that do not need the
/// full judge state machine.
pub struct JudgeActor {
    judge: judge::Judge,
}

impl JudgeActor {
    pub fn new(judge: judge::Judge) -> Self {
        Self { judge }
    }

    pub fn keypair(&self) -> &KeyPair {
        self.judge.keypair()
    }

    /// Append the judge's witness signature, yielding the envelope peers
    /// rely on to open (or settle) on their side.
    pub fn witness(&self, envelope: &Envelope) -> Envelope {
        let mut witnessed = envelope.clone();
        witnessed.append_signature(self.judge.keypair());
        witnessed
    }
}

/// Run the opening exchange up to the point where the judge would take over:
/// Alice proposes, Bob countersigns.
pub fn propose_accept(fixture: &PeerFixture) -> (peer::Channel, peer::Channel, Envelope) {
    let (alice, envelope) = peer::Channel::propose(
        fixture.channel_id,
        fixture.alice_account.clone(),
        fixture.alice_counterparty.clone(),
        vec![0x01],
        HOLD_PERIOD,
    )
    .unwrap();

    let (bob, signed) = peer::Channel::accept(
        &envelope,
        fixture.bob_account.clone(),
        fixture.bob_counterparty.clone(),
    )
    .unwrap();

    (alice, bob, signed)
}

/// Full opening: both sides end up in phase `Open`.
pub fn open_pair(fixture: &PeerFixture) -> (peer::Channel, peer::Channel) {
    let (mut alice, mut bob, envelope) = propose_accept(fixture);
    let witnessed = JudgeActor::new(test_judge()).witness(&envelope);

    alice.open(&witnessed).unwrap();
    bob.open(&witnessed).unwrap();

    (alice, bob)
}

/// One full update round: `proposer` proposes `state`, `cosigner` cosigns,
/// and the proposer takes the full update back. Returns the 2-of-2 envelope.
pub fn cosigned_update(
    proposer: &mut peer::Channel,
    cosigner: &mut peer::Channel,
    state: Vec<u8>,
) -> Envelope {
    let proposal = proposer.propose_update(state, false).unwrap();
    cosigner.receive_proposed_update(&proposal).unwrap();
    let full = cosigner.cosign_proposed_update().unwrap();
    proposer.receive_full_update(&full).unwrap();

    full
}
