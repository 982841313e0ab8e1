//! Byzantine-fault-tolerant consensus over the simulation framework: a
//! generic permissioned layer (the shared chain base, thresholds, vote sets,
//! notarization) and an adapted-Streamlet instantiation (chain structures
//! plus the node state machine).

pub mod chain;
pub mod error;
pub mod node;
pub mod permissioned;

pub use chain::{BlockRef, StreamletBlock, StreamletGenesis, StreamletProposal};
pub use error::BftError;
pub use node::{Ballot, StreamletMessage, StreamletNode};
pub use permissioned::{
    two_thirds_threshold, BftBase, ChainView, Notarizable, Params, VoteSet, VoterId,
    GENESIS_LENGTH,
};
