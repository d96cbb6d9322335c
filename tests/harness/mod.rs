//! In-process network of two peers and one judge.
//!
//! Outbound envelopes land in the receiving peer's inbox and are ferried
//! across by the test, mimicking the request/response transport without any
//! actual networking. The judge is wired up directly, so judge-bound traffic
//! is processed synchronously.

use anyhow::Result;
use arbchan::{
    api::{Clock, CounterpartyClient, JudgeApi, JudgeClient, PeerApi},
    judge,
    store::{MemoryJudgeStore, MemoryPeerStore},
    ChannelId, Envelope, Phase, PublicKey,
};
use async_trait::async_trait;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};

pub const HOLD_PERIOD: u64 = 60;
pub const START_TIME: u64 = 1_000_000;

const ALICE_ADDR: &str = "http://alice.test:4545";
const BOB_ADDR: &str = "http://bob.test:4545";
const JUDGE_ADDR: &str = "http://judge.test:4546";

/// Test clock: starts at [`START_TIME`] and only moves when told to.
#[derive(Clone, Debug)]
pub struct ManualClock(Arc<AtomicU64>);

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self(Arc::new(AtomicU64::new(start)))
    }

    pub fn advance(&self, secs: u64) {
        self.0.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Envelopes delivered to one peer, bucketed by endpoint.
#[derive(Clone, Debug, Default)]
pub struct Inbox {
    channels: Arc<Mutex<Vec<Envelope>>>,
    proposed_updates: Arc<Mutex<Vec<Envelope>>>,
    full_updates: Arc<Mutex<Vec<Envelope>>>,
    follow_ons: Arc<Mutex<Vec<Envelope>>>,
}

impl Inbox {
    pub fn pop_channel(&self) -> Envelope {
        self.channels.lock().unwrap().remove(0)
    }

    pub fn pop_proposed_update(&self) -> Envelope {
        self.proposed_updates.lock().unwrap().remove(0)
    }

    pub fn pop_full_update(&self) -> Envelope {
        self.full_updates.lock().unwrap().remove(0)
    }

    pub fn pop_follow_on(&self) -> Envelope {
        self.follow_ons.lock().unwrap().remove(0)
    }
}

/// Counterparty transport that drops envelopes into the receiver's inbox.
#[derive(Clone, Debug)]
pub struct InboxClient {
    receiver: Inbox,
}

impl InboxClient {
    pub fn new(receiver: Inbox) -> Self {
        Self { receiver }
    }
}

#[async_trait]
impl CounterpartyClient for InboxClient {
    async fn add_channel(&self, _address: &str, envelope: &Envelope) -> Result<()> {
        self.receiver.channels.lock().unwrap().push(envelope.clone());
        Ok(())
    }

    async fn add_proposed_update(&self, _address: &str, envelope: &Envelope) -> Result<()> {
        self.receiver
            .proposed_updates
            .lock()
            .unwrap()
            .push(envelope.clone());
        Ok(())
    }

    async fn add_full_update(&self, _address: &str, envelope: &Envelope) -> Result<()> {
        self.receiver
            .full_updates
            .lock()
            .unwrap()
            .push(envelope.clone());
        Ok(())
    }

    async fn add_follow_on(&self, _address: &str, envelope: &Envelope) -> Result<()> {
        self.receiver
            .follow_ons
            .lock()
            .unwrap()
            .push(envelope.clone());
        Ok(())
    }
}

pub type SharedJudge = Arc<Mutex<JudgeApi<MemoryJudgeStore, ManualClock>>>;

/// Judge transport wired straight into a shared [`JudgeApi`].
#[derive(Clone)]
pub struct LoopbackJudgeClient {
    judge: SharedJudge,
}

impl LoopbackJudgeClient {
    pub fn new(judge: SharedJudge) -> Self {
        Self { judge }
    }
}

#[async_trait]
impl JudgeClient for LoopbackJudgeClient {
    async fn add_channel(&self, _address: &str, envelope: &Envelope) -> Result<()> {
        self.judge.lock().unwrap().admit_channel(envelope)?;
        Ok(())
    }

    async fn add_update_tx(&self, _address: &str, envelope: &Envelope) -> Result<()> {
        self.judge.lock().unwrap().admit_update_tx(envelope)
    }

    async fn add_closing_tx(&self, _address: &str, envelope: &Envelope) -> Result<()> {
        self.judge.lock().unwrap().admit_closing_tx(envelope)
    }

    async fn add_follow_on_tx(&self, _address: &str, envelope: &Envelope) -> Result<()> {
        self.judge.lock().unwrap().admit_follow_on_tx(envelope)
    }

    async fn opening_tx(
        &self,
        _address: &str,
        channel_id: &ChannelId,
    ) -> Result<Option<Envelope>> {
        self.judge.lock().unwrap().opening_tx(channel_id)
    }

    async fn final_update_tx(
        &self,
        _address: &str,
        channel_id: &ChannelId,
    ) -> Result<Option<Envelope>> {
        self.judge.lock().unwrap().final_update_tx(channel_id)
    }
}

pub type Peer = PeerApi<MemoryPeerStore, InboxClient, LoopbackJudgeClient>;

pub struct Network {
    pub judge: SharedJudge,
    pub clock: ManualClock,
    pub alice: Peer,
    pub bob: Peer,
    /// Envelopes delivered to Alice / Bob respectively.
    pub alice_inbox: Inbox,
    pub bob_inbox: Inbox,
    pub alice_key: PublicKey,
    pub bob_key: PublicKey,
}

/// Two registered peers, one judge, everybody knowing everybody.
pub fn make_network() -> Network {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let judge_identity = judge::Judge::new("sffcu");
    let judge_pubkey = judge_identity.pubkey();
    let clock = ManualClock::new(START_TIME);
    let judge: SharedJudge = Arc::new(Mutex::new(JudgeApi::new(
        MemoryJudgeStore::new(),
        judge_identity,
        clock.clone(),
    )));

    let alice_inbox = Inbox::default();
    let bob_inbox = Inbox::default();

    let mut alice = PeerApi::new(
        MemoryPeerStore::new(),
        InboxClient::new(bob_inbox.clone()),
        LoopbackJudgeClient::new(judge.clone()),
    );
    let mut bob = PeerApi::new(
        MemoryPeerStore::new(),
        InboxClient::new(alice_inbox.clone()),
        LoopbackJudgeClient::new(judge.clone()),
    );

    alice.add_judge("sffcu", judge_pubkey, JUDGE_ADDR).unwrap();
    bob.add_judge("sffcu", judge_pubkey, JUDGE_ADDR).unwrap();

    let alice_key = alice.new_account("alfred", &judge_pubkey).unwrap();
    let bob_key = bob.new_account("billary", &judge_pubkey).unwrap();

    alice
        .add_counterparty("billary", bob_key, BOB_ADDR, &judge_pubkey)
        .unwrap();
    bob.add_counterparty("alfred", alice_key, ALICE_ADDR, &judge_pubkey)
        .unwrap();

    {
        let mut judge = judge.lock().unwrap();
        judge.add_account("alfred", alice_key, ALICE_ADDR).unwrap();
        judge.add_account("billary", bob_key, BOB_ADDR).unwrap();
    }

    Network {
        judge,
        clock,
        alice,
        bob,
        alice_inbox,
        bob_inbox,
        alice_key,
        bob_key,
    }
}

/// Full opening exchange: Alice proposes, Bob countersigns and forwards to
/// the judge, the judge confirms, both peers poll until open.
pub async fn open_channel(net: &mut Network) -> ChannelId {
    let channel_id = net
        .alice
        .propose_channel(&net.alice_key, &net.bob_key, vec![0x01], HOLD_PERIOD)
        .await
        .unwrap();

    let opening = net.bob_inbox.pop_channel();
    let accepted = net.bob.accept_channel(&opening).await.unwrap();
    assert_eq!(accepted, channel_id);

    net.judge
        .lock()
        .unwrap()
        .confirm_channel(&channel_id)
        .unwrap();

    assert_eq!(
        net.alice.check_channel(&channel_id).await.unwrap(),
        Phase::Open
    );
    assert_eq!(
        net.bob.check_channel(&channel_id).await.unwrap(),
        Phase::Open
    );

    channel_id
}

/// One full update round initiated by Alice.
pub async fn alice_update(net: &mut Network, channel_id: &ChannelId, state: Vec<u8>) -> u64 {
    let seq = net
        .alice
        .propose_update(channel_id, state, false)
        .await
        .unwrap();

    let proposal = net.bob_inbox.pop_proposed_update();
    net.bob.receive_update(&proposal).unwrap();
    net.bob.cosign_update(channel_id).await.unwrap();

    let full = net.alice_inbox.pop_full_update();
    net.alice.receive_full_update(&full).unwrap();

    seq
}

/// One full update round initiated by Bob.
pub async fn bob_update(net: &mut Network, channel_id: &ChannelId, state: Vec<u8>) -> u64 {
    let seq = net
        .bob
        .propose_update(channel_id, state, false)
        .await
        .unwrap();

    let proposal = net.alice_inbox.pop_proposed_update();
    net.alice.receive_update(&proposal).unwrap();
    net.alice.cosign_update(channel_id).await.unwrap();

    let full = net.bob_inbox.pop_full_update();
    net.bob.receive_full_update(&full).unwrap();

    seq
}
