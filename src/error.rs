use crate::{wire::ChannelId, Phase};

/// Everything a core channel operation can fail with.
///
/// Validation failures abort the operation and leave the channel untouched;
/// none of them is retriable with the same input. Collaborator failures
/// (storage, transport) are not part of this taxonomy and travel through
/// `anyhow` at the API layer instead.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("signature at slot {slot} does not verify")]
    SignatureInvalid { slot: usize },
    #[error("expected {expected} signatures, envelope carries {actual}")]
    WrongSignatureCount { expected: usize, actual: usize },
    #[error("transaction does not belong to channel {expected}")]
    WrongChannelId { expected: ChannelId },
    #[error("sequence number {proposed} does not exceed {highest}")]
    SequenceNotMonotonic { proposed: u64, highest: u64 },
    #[error("operation not permitted in phase {0:?}")]
    PhaseViolation(Phase),
    #[error("counterparty is registered under a different judge")]
    JudgeMismatch,
    #[error("channel {0} has already been admitted")]
    ChannelExists(ChannelId),
    #[error("channel {0} not found")]
    ChannelNotFound(ChannelId),
    #[error("hold period has not elapsed")]
    HoldPeriodNotElapsed,
    #[error("no admitted update at index {0}")]
    IndexOutOfRange(usize),
    #[error("no full updates on file")]
    NoUpdatesAvailable,
    #[error("no inbound update proposal to cosign")]
    NoProposedUpdate,
    #[error("opening payload differs from the one on file")]
    PayloadMismatch,
    #[error("malformed transaction: {0}")]
    MalformedTx(&'static str),
    #[error("encoding failed: {0}")]
    EncodingError(String),
}
