use thiserror::Error;

/// Violations of BFT chain construction rules and driver mistakes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BftError {
    #[error("proposal epoch {epoch} is not after parent epoch {parent_epoch}")]
    NonMonotonicEpoch { epoch: u64, parent_epoch: u64 },

    #[error("proposal has {votes} of {threshold} required votes")]
    NotNotarized { votes: usize, threshold: usize },

    #[error("cannot propose for epoch {epoch}: already voted in epoch {voted_epoch}")]
    StaleProposal { epoch: u64, voted_epoch: u64 },

    #[error("epoch 0 belongs to the genesis block and has no proposer")]
    NoProposerForGenesis,
}
