//! Adapted-Streamlet chain structures: epochs, parent links, ancestry, and
//! the last-final rule.
//!
//! Every chain element builds on the generic permissioned base
//! ([`BftBase`]): the genesis is a bare base, proposals extend their
//! parent's base by one, and blocks inherit their proposal's shape.
//! Streamlet overrides the base layer's default finality (only genesis is
//! final) with the consecutive-epoch rule, cached at block construction.
//!
//! Chain history is immutable once built. Blocks and the genesis are shared
//! through [`BlockRef`] handles whose equality is referential, which models
//! unforgeability: two proposals or blocks with identical contents are still
//! distinct objects.

use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::error::BftError;
use crate::permissioned::{BftBase, ChainView, Notarizable, Params, VoteSet, VoterId};

/// The adapted-Streamlet genesis block for `n` nodes: epoch 0, notarized by
/// definition, with the standard two-thirds threshold.
#[derive(Debug)]
pub struct StreamletGenesis {
    base: BftBase<BlockRef>,
}

impl StreamletGenesis {
    #[must_use]
    pub fn new(n: usize) -> Rc<Self> {
        Rc::new(Self {
            base: BftBase::genesis(Params::two_thirds(n)),
        })
    }

    fn base(&self) -> &BftBase<BlockRef> {
        &self.base
    }

    #[must_use]
    pub fn params(&self) -> Params {
        self.base.params()
    }

    /// The epoch of the genesis block is 0.
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        0
    }

    /// The designated proposer for an epoch: node `(e - 1) mod n`.
    ///
    /// # Errors
    ///
    /// Epoch 0 is the genesis epoch and has no proposer.
    pub fn proposer_for_epoch(&self, epoch: u64) -> Result<VoterId, BftError> {
        if epoch == 0 {
            return Err(BftError::NoProposerForGenesis);
        }
        Ok(((epoch - 1) % self.params().n as u64) as VoterId)
    }
}

impl fmt::Display for StreamletGenesis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "genesis(n={})", self.params().n)
    }
}

/// An adapted-Streamlet proposal.
///
/// A proposal extends a parent block in an epoch strictly after the parent's
/// epoch, and accumulates votes until it is notarized. Share proposals with
/// `Rc` and compare them with `Rc::ptr_eq`; there is no structural equality.
#[derive(Debug)]
pub struct StreamletProposal {
    base: BftBase<BlockRef>,
    epoch: u64,
    votes: RefCell<VoteSet>,
}

impl StreamletProposal {
    /// Constructs a proposal extending `parent` in `epoch`. The protocol
    /// parameters are inherited from the parent.
    ///
    /// # Errors
    ///
    /// Fails if `epoch` is not strictly after the parent's epoch.
    pub fn new(parent: BlockRef, epoch: u64) -> Result<Rc<Self>, BftError> {
        if epoch <= parent.epoch() {
            return Err(BftError::NonMonotonicEpoch {
                epoch,
                parent_epoch: parent.epoch(),
            });
        }
        let params = parent.params();
        Ok(Rc::new(Self {
            votes: RefCell::new(VoteSet::new(params.n)),
            base: BftBase::extending(params, parent),
            epoch,
        }))
    }

    #[must_use]
    pub fn parent(&self) -> &BlockRef {
        self.base.parent().expect("a proposal extends a parent block")
    }

    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Chain length of the block this proposal would form.
    #[must_use]
    pub fn length(&self) -> u64 {
        self.base.length()
    }

    #[must_use]
    pub fn params(&self) -> Params {
        self.base.params()
    }

    /// Records a vote. Repeated votes from the same voter are no-ops.
    pub fn add_vote(&self, voter: VoterId) {
        self.votes.borrow_mut().record(voter);
    }
}

impl Notarizable for StreamletProposal {
    fn threshold(&self) -> usize {
        self.base.params().t
    }

    fn vote_count(&self) -> usize {
        self.votes.borrow().count()
    }

    fn is_valid(&self) -> bool {
        // Epoch monotonicity and parameter inheritance are enforced at
        // construction, so every constructed proposal is valid. The seam
        // exists for attack models that forge proposals.
        true
    }
}

impl fmt::Display for StreamletProposal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "proposal(epoch={}, parent_epoch={}, length={})",
            self.epoch,
            self.parent().epoch(),
            self.length()
        )
    }
}

/// An adapted-Streamlet block, built from a notarized proposal and immutable
/// afterwards: votes added or removed later cannot change it.
#[derive(Debug)]
pub struct StreamletBlock {
    proposal: Rc<StreamletProposal>,
    base: BftBase<BlockRef>,
    epoch: u64,
    last_final: BlockRef,
}

impl StreamletBlock {
    /// Wraps a notarized proposal. The parent and length are inherited from
    /// the proposal; the last-final block is computed once here and cached.
    ///
    /// # Errors
    ///
    /// Fails if the proposal is not notarized.
    pub fn new(proposal: Rc<StreamletProposal>) -> Result<Rc<Self>, BftError> {
        if !proposal.is_notarized() {
            return Err(BftError::NotNotarized {
                votes: proposal.vote_count(),
                threshold: proposal.threshold(),
            });
        }
        let parent = proposal.parent().clone();
        let last_final = compute_last_final(proposal.epoch(), &parent);
        Ok(Rc::new(Self {
            base: BftBase::extending(proposal.params(), parent),
            epoch: proposal.epoch(),
            last_final,
            proposal,
        }))
    }

    fn base(&self) -> &BftBase<BlockRef> {
        &self.base
    }

    #[must_use]
    pub fn proposal(&self) -> &Rc<StreamletProposal> {
        &self.proposal
    }

    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    #[must_use]
    pub fn length(&self) -> u64 {
        self.base.length()
    }

    #[must_use]
    pub fn params(&self) -> Params {
        self.base.params()
    }

    #[must_use]
    pub fn parent(&self) -> &BlockRef {
        self.base.parent().expect("a block extends a parent block")
    }

    /// The last final block in this block's ancestor chain, cached at
    /// construction.
    #[must_use]
    pub fn last_final(&self) -> &BlockRef {
        &self.last_final
    }
}

impl fmt::Display for StreamletBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block(epoch={}, length={})", self.epoch, self.length())
    }
}

/// The last final block for a block with the given epoch on top of `parent`:
/// the middle of the most recent group of three ancestors proposed in
/// consecutive epochs, or the genesis if the walk reaches it first.
fn compute_last_final(block_epoch: u64, parent: &BlockRef) -> BlockRef {
    let mut last_epoch = block_epoch;
    let mut middle = parent.clone();
    let Some(mut first) = middle.parent() else {
        return middle;
    };
    loop {
        let Some(grandparent) = first.parent() else {
            return first;
        };
        if first.epoch() + 1 == middle.epoch() && middle.epoch() + 1 == last_epoch {
            return middle;
        }
        last_epoch = middle.epoch();
        middle = first;
        first = grandparent;
    }
}

/// Shared handle to a block in the Streamlet chain: either the genesis or a
/// notarized block. Equality and hashing are referential; parent links,
/// lengths, and ancestry come from the [`ChainView`] implementation over the
/// elements' shared bases.
#[derive(Clone, Debug)]
pub enum BlockRef {
    Genesis(Rc<StreamletGenesis>),
    Block(Rc<StreamletBlock>),
}

impl BlockRef {
    #[must_use]
    pub fn epoch(&self) -> u64 {
        match self {
            Self::Genesis(genesis) => genesis.epoch(),
            Self::Block(block) => block.epoch(),
        }
    }

    #[must_use]
    pub fn params(&self) -> Params {
        match self {
            Self::Genesis(genesis) => genesis.params(),
            Self::Block(block) => block.params(),
        }
    }

    fn base(&self) -> &BftBase<BlockRef> {
        match self {
            Self::Genesis(genesis) => genesis.base(),
            Self::Block(block) => block.base(),
        }
    }
}

impl ChainView for BlockRef {
    fn parent(&self) -> Option<BlockRef> {
        self.base().parent().cloned()
    }

    fn length(&self) -> u64 {
        self.base().length()
    }

    /// Streamlet's consecutive-epoch rule, cached at block construction,
    /// replaces the base layer's walk to the genesis.
    fn last_final(&self) -> BlockRef {
        match self {
            Self::Genesis(_) => self.clone(),
            Self::Block(block) => block.last_final().clone(),
        }
    }
}

impl PartialEq for BlockRef {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Genesis(a), Self::Genesis(b)) => Rc::ptr_eq(a, b),
            (Self::Block(a), Self::Block(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for BlockRef {}

impl Hash for BlockRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Genesis(genesis) => {
                0u8.hash(state);
                (Rc::as_ptr(genesis) as usize).hash(state);
            }
            Self::Block(block) => {
                1u8.hash(state);
                (Rc::as_ptr(block) as usize).hash(state);
            }
        }
    }
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Genesis(genesis) => write!(f, "{genesis}"),
            Self::Block(block) => write!(f, "{block}"),
        }
    }
}

impl From<Rc<StreamletGenesis>> for BlockRef {
    fn from(genesis: Rc<StreamletGenesis>) -> Self {
        Self::Genesis(genesis)
    }
}

impl From<Rc<StreamletBlock>> for BlockRef {
    fn from(block: Rc<StreamletBlock>) -> Self {
        Self::Block(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissioned::GENESIS_LENGTH;

    /// Builds a tree of notarized blocks with the parent structure given by
    /// `parent_map` (indexed by epoch minus one, values are parent epochs,
    /// `None` skips the epoch) and checks each block's last-final against
    /// `final_map`.
    fn check_last_final(parent_map: &[Option<usize>], final_map: &[usize]) {
        assert_eq!(parent_map.len(), final_map.len());
        let genesis = StreamletGenesis::new(3);
        let genesis_ref = BlockRef::from(Rc::clone(&genesis));
        assert_eq!(genesis_ref.last_final(), genesis_ref);

        let mut blocks: Vec<Option<BlockRef>> = vec![Some(genesis_ref)];
        for (index, parent_epoch) in parent_map.iter().enumerate() {
            let epoch = (index + 1) as u64;
            let Some(parent_epoch) = parent_epoch else {
                blocks.push(None);
                continue;
            };
            let parent = blocks[*parent_epoch].clone().expect("parent epoch was built");

            let proposal = StreamletProposal::new(parent.clone(), epoch).unwrap();
            assert_eq!(proposal.length(), parent.length() + 1);
            assert!(proposal.is_valid());
            assert!(!proposal.is_notarized());

            // One vote is not enough, and voting twice does not help.
            proposal.add_vote(0);
            assert!(!proposal.is_notarized());
            proposal.add_vote(0);
            assert!(!proposal.is_notarized());
            proposal.add_vote(1);
            assert!(proposal.is_notarized());

            let block = BlockRef::from(StreamletBlock::new(proposal).unwrap());
            blocks.push(Some(block.clone()));

            let expected = blocks[final_map[index]].clone().expect("final epoch was built");
            assert_eq!(block.last_final(), expected);
        }
    }

    #[test]
    fn test_last_final_straight_line() {
        check_last_final(&[Some(0), Some(1), Some(2)], &[0, 0, 2]);
    }

    #[test]
    fn test_last_final_with_fork() {
        // 0 --- 2 --- 5 --- 6 --- 7
        //   \
        //    -- 1 --- 3
        //
        // The epoch 6 block is last-final in the context of the epoch 7
        // block: it is the middle of three blocks with consecutive epochs,
        // and the most recent such block.
        check_last_final(
            &[Some(0), Some(0), Some(1), None, Some(2), Some(5), Some(6)],
            &[0, 0, 0, 0, 0, 0, 6],
        );
    }

    #[test]
    fn test_last_final_with_divergent_branches() {
        // 0 --- 2 --- 5 --- 6 --- 7
        //   \
        //    -- 1 --- 3 --- 8 --- 9 --- 10
        check_last_final(
            &[
                Some(0),
                Some(0),
                Some(1),
                None,
                Some(2),
                Some(5),
                Some(6),
                Some(3),
                Some(8),
                Some(9),
            ],
            &[0, 0, 0, 0, 0, 0, 6, 0, 0, 9],
        );
    }

    #[test]
    fn test_epochs_are_strictly_monotonic() {
        let genesis = BlockRef::from(StreamletGenesis::new(3));
        assert_eq!(
            StreamletProposal::new(genesis.clone(), 0).unwrap_err(),
            BftError::NonMonotonicEpoch { epoch: 0, parent_epoch: 0 }
        );

        let proposal = StreamletProposal::new(genesis, 2).unwrap();
        proposal.add_vote(0);
        proposal.add_vote(1);
        let block = BlockRef::from(StreamletBlock::new(proposal).unwrap());
        assert_eq!(
            StreamletProposal::new(block, 2).unwrap_err(),
            BftError::NonMonotonicEpoch { epoch: 2, parent_epoch: 2 }
        );
    }

    #[test]
    fn test_blocks_require_notarization() {
        let genesis = BlockRef::from(StreamletGenesis::new(3));
        let proposal = StreamletProposal::new(genesis, 1).unwrap();
        proposal.add_vote(2);

        assert_eq!(
            StreamletBlock::new(Rc::clone(&proposal)).unwrap_err(),
            BftError::NotNotarized { votes: 1, threshold: 2 }
        );

        proposal.add_vote(0);
        let block = StreamletBlock::new(Rc::clone(&proposal)).unwrap();

        // Extra votes change nothing for the already-built block.
        proposal.add_vote(1);
        assert!(proposal.is_notarized());
        assert_eq!(block.epoch(), 1);
    }

    #[test]
    fn test_preceq_is_reflexive_and_transitive() {
        let genesis = BlockRef::from(StreamletGenesis::new(3));
        let mut chain = vec![genesis.clone()];
        for epoch in 1..=3 {
            let proposal =
                StreamletProposal::new(chain.last().unwrap().clone(), epoch).unwrap();
            proposal.add_vote(0);
            proposal.add_vote(1);
            chain.push(BlockRef::from(StreamletBlock::new(proposal).unwrap()));
        }

        for block in &chain {
            assert!(block.preceq(block));
        }
        assert!(genesis.preceq(&chain[1]));
        assert!(chain[1].preceq(&chain[3]));
        assert!(genesis.preceq(&chain[3]));
        assert!(!chain[3].preceq(&chain[1]));

        // A sibling branch is not an ancestor.
        let sibling = StreamletProposal::new(genesis.clone(), 7).unwrap();
        sibling.add_vote(0);
        sibling.add_vote(2);
        let sibling = BlockRef::from(StreamletBlock::new(sibling).unwrap());
        assert!(!sibling.preceq(&chain[3]));
        assert!(!chain[1].preceq(&sibling));
        assert!(genesis.preceq(&sibling));
    }

    #[test]
    fn test_proposer_rotation() {
        let genesis = StreamletGenesis::new(3);
        assert_eq!(
            genesis.proposer_for_epoch(0).unwrap_err(),
            BftError::NoProposerForGenesis
        );
        assert_eq!(genesis.proposer_for_epoch(1).unwrap(), 0);
        assert_eq!(genesis.proposer_for_epoch(2).unwrap(), 1);
        assert_eq!(genesis.proposer_for_epoch(3).unwrap(), 2);
        assert_eq!(genesis.proposer_for_epoch(4).unwrap(), 0);
    }

    #[test]
    fn test_parameters_are_inherited_from_the_parent() {
        let genesis = StreamletGenesis::new(5);
        assert_eq!(genesis.params(), Params { n: 5, t: 4 });

        let genesis_ref = BlockRef::from(Rc::clone(&genesis));
        assert_eq!(genesis_ref.length(), GENESIS_LENGTH);
        assert_eq!(genesis_ref.parent(), None);

        let proposal = StreamletProposal::new(genesis_ref.clone(), 1).unwrap();
        assert_eq!(proposal.params(), genesis.params());
        for voter in 0..4 {
            proposal.add_vote(voter);
        }
        let block = BlockRef::from(StreamletBlock::new(proposal).unwrap());
        assert_eq!(block.params(), genesis.params());
        assert_eq!(block.length(), GENESIS_LENGTH + 1);
        assert_eq!(block.parent(), Some(genesis_ref));
    }
}
