#![warn(
    unused_extern_crates,
    missing_debug_implementations,
    rust_2018_idioms,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::fallible_impl_from,
    clippy::cast_precision_loss,
    clippy::cast_possible_wrap,
    clippy::dbg_macro
)]
#![cfg_attr(not(test), warn(clippy::unwrap_used))]
#![forbid(unsafe_code)]

//! Bilateral off-chain state channels arbitrated by a semi-trusted judge.
//!
//! Two participants open a channel anchored by a mutually-signed opening
//! transaction, exchange sequence-numbered state updates off-chain, and close
//! either cooperatively or unilaterally. A third party, the judge, witnesses
//! the opening, records fully-signed updates, and enforces a hold period
//! during which a higher-sequence update supersedes the one on file.
//!
//! The crate is transport- and storage-agnostic: [`api::PeerApi`] and
//! [`api::JudgeApi`] drive the state machines against the collaborator traits
//! in [`api`] and [`store`].

pub mod api;
mod error;
pub mod judge;
mod keys;
pub mod peer;
mod signature;
pub mod store;
pub mod wire;

#[cfg(test)]
mod test_harness;

pub use error::Error;
pub use keys::{KeyPair, PublicKey};
pub use wire::{ChannelId, Envelope};

use serde::{Deserialize, Serialize};

/// Lifecycle phase of a channel, shared by every role-view.
///
/// Which operations are legal depends solely on the current phase; an
/// operation attempted in the wrong phase fails with [`Error::PhaseViolation`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// The opening has been exchanged between the participants but not yet
    /// witnessed by the judge.
    PendingOpen,
    /// The judge has signed the opening.
    Open,
    /// A close has been initiated; the hold period timer is running.
    PendingClosed,
    /// The final state has been committed.
    Closed,
}
