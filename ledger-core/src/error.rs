use thiserror::Error;

/// Violations of best-chain construction invariants.
///
/// These indicate bugs in the driving code and are never recoverable.
/// Contextual invalidity (double spends, unknown inputs) is reported as
/// `false` from [`crate::context::BcContext::add_if_valid`] instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("transaction has inputs but a negative fee")]
    NegativeFee,

    #[error("only coinbase transactions may carry issuance")]
    IssuanceOutsideCoinbase,

    #[error("transaction does not balance: funds {funded} versus {spent} disposed")]
    Unbalanced { funded: i128, spent: i128 },

    #[error("shielded inputs require an anchor")]
    MissingAnchor,

    #[error("anchor supplied without shielded inputs")]
    UnexpectedAnchor,

    #[error("anchor cannot spend the shielded inputs")]
    UnspendableNotes,

    #[error("block has no transactions")]
    EmptyBlock,

    #[error("first transaction in a block must be a coinbase")]
    MissingCoinbase,

    #[error("block contains more than one coinbase transaction")]
    ExtraCoinbase,

    #[error("block fees do not sum to zero (got {0})")]
    UnbalancedFees(i128),
}
