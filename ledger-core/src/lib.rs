//! Best-chain (Bitcoin/Zcash-like) ledger model.
//!
//! Transactions spend transparent UTXOs and shielded notes; contexts check
//! contextual validity and track the unspent sets; blocks carry scores and
//! enforce non-contextual consensus rules. No real cryptography is involved:
//! notes conflate commitments and nullifiers, and block hashes are unique
//! tokens.

pub mod block;
pub mod context;
pub mod error;
pub mod transaction;

pub use block::{BcBlock, BlockHash};
pub use context::{BcContext, NoteMap, Spentness};
pub use error::LedgerError;
pub use transaction::{Amount, BcTransaction, Note, NoteId, TxId, Txo};
