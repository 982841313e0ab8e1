//! Shared abstractions for permissioned BFT protocols: the generic chain
//! base (parent link, chain length, default finality), protocol parameters,
//! vote sets, and the notarization rule. The adapted-Streamlet
//! instantiation lives in [`crate::chain`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Index of a voter in a permissioned protocol (the node's network ident).
pub type VoterId = usize;

/// Chain length of a genesis block. Every child chain is one longer than
/// its parent's.
pub const GENESIS_LENGTH: u64 = 1;

/// The notarization threshold used by most permissioned BFT protocols:
/// `ceiling(n * 2 / 3)`.
#[must_use]
pub fn two_thirds_threshold(n: usize) -> usize {
    (n * 2 + 2) / 3
}

/// Shared parameters of a permissioned protocol instance: `n` voters, of
/// which at least `t` must vote for a proposal to notarize it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Params {
    pub n: usize,
    pub t: usize,
}

impl Params {
    /// Parameters with the standard two-thirds threshold.
    #[must_use]
    pub fn two_thirds(n: usize) -> Self {
        Self {
            n,
            t: two_thirds_threshold(n),
        }
    }
}

/// The base every element of a permissioned BFT chain shares: the protocol
/// parameters, the parent link, and the chain length.
///
/// A genesis block is a bare base with no parent; proposals and the blocks
/// built from them extend their parent's base by one. `P` is the protocol's
/// parent handle type.
#[derive(Debug, Clone)]
pub struct BftBase<P> {
    params: Params,
    parent: Option<P>,
    length: u64,
}

impl<P> BftBase<P> {
    /// The base of a genesis block: no parent, length [`GENESIS_LENGTH`].
    #[must_use]
    pub fn genesis(params: Params) -> Self {
        Self {
            params,
            parent: None,
            length: GENESIS_LENGTH,
        }
    }

    #[must_use]
    pub fn params(&self) -> Params {
        self.params
    }

    /// The parent element, or `None` for a genesis base.
    #[must_use]
    pub fn parent(&self) -> Option<&P> {
        self.parent.as_ref()
    }

    #[must_use]
    pub fn length(&self) -> u64 {
        self.length
    }
}

impl<P: ChainView> BftBase<P> {
    /// The base of a proposal or block extending `parent`.
    #[must_use]
    pub fn extending(params: Params, parent: P) -> Self {
        Self {
            params,
            length: parent.length() + 1,
            parent: Some(parent),
        }
    }
}

/// An element of a permissioned BFT chain, linked to its parent.
///
/// `last_final` has a deliberately naive default: absent a protocol-specific
/// finality rule, only the genesis block is final. Protocol instantiations
/// override it; Streamlet caches its consecutive-epoch rule at block
/// construction.
pub trait ChainView: Clone + PartialEq {
    /// The parent element, or `None` for the genesis block.
    fn parent(&self) -> Option<Self>;

    /// Chain length: [`GENESIS_LENGTH`] for the genesis block, one more
    /// than the parent for everything else.
    fn length(&self) -> u64;

    /// The last final block in this element's ancestor chain.
    fn last_final(&self) -> Self {
        let mut current = self.clone();
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    /// Ancestry: `self` precedes-or-equals `descendant` iff they are the
    /// same element or `self` is a transitive parent of `descendant`.
    fn preceq(&self, descendant: &Self) -> bool {
        let mut current = descendant.clone();
        while current.length() > self.length() {
            match current.parent() {
                Some(parent) => current = parent,
                None => return false,
            }
        }
        *self == current
    }
}

/// The set of voters recorded on a proposal.
///
/// Voting twice is a no-op, and the voter count can never exceed `n`.
#[derive(Debug, Clone)]
pub struct VoteSet {
    voters: BTreeSet<VoterId>,
    n: usize,
}

impl VoteSet {
    #[must_use]
    pub fn new(n: usize) -> Self {
        Self {
            voters: BTreeSet::new(),
            n,
        }
    }

    /// Records a vote. Returns `true` if the voter was not already recorded.
    pub fn record(&mut self, voter: VoterId) -> bool {
        let added = self.voters.insert(voter);
        assert!(
            self.voters.len() <= self.n,
            "more voters than protocol participants"
        );
        added
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.voters.len()
    }

    #[must_use]
    pub fn contains(&self, voter: VoterId) -> bool {
        self.voters.contains(&voter)
    }
}

/// Notarization: validity plus a threshold of distinct votes.
///
/// Once a proposal is notarized it stays notarized; votes are only ever
/// added.
pub trait Notarizable {
    fn threshold(&self) -> usize;

    fn vote_count(&self) -> usize;

    /// Protocol-specific validity. Structural rules enforced at construction
    /// time may make this trivially true.
    fn is_valid(&self) -> bool;

    fn is_notarized(&self) -> bool {
        self.is_valid() && self.vote_count() >= self.threshold()
    }
}
