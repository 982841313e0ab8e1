//! The adapted-Streamlet node: a protocol state machine over the simulation
//! framework.
//!
//! Nodes gossip by echoing every received non-echo message to every other
//! node (the amplification Streamlet's liveness proof requires), vote for
//! valid proposals in epochs they have not voted in yet, count ballots for
//! their own proposal, and track a longest chain as their tip. Divergent
//! finalization is not an error: it is recorded per node as a safety
//! violation and inspected by the driver afterwards.

use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use sim_core::{Behavior, NodeCtx, NodeId, Process};

use crate::chain::{BlockRef, StreamletBlock, StreamletGenesis, StreamletProposal};
use crate::error::BftError;
use crate::permissioned::{ChainView, Notarizable};

/// A ballot: `voter` has voted for `proposal`.
///
/// Ballots compare by proposal identity and voter. They are not forged
/// unless an attack driver forges them deliberately.
#[derive(Clone, Debug)]
pub struct Ballot {
    pub proposal: Rc<StreamletProposal>,
    pub voter: NodeId,
}

impl PartialEq for Ballot {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.proposal, &other.proposal) && self.voter == other.voter
    }
}

impl Eq for Ballot {}

impl Hash for Ballot {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Rc::as_ptr(&self.proposal) as usize).hash(state);
        self.voter.hash(state);
    }
}

impl fmt::Display for Ballot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ballot({}, voter={})", self.proposal, self.voter)
    }
}

/// Messages exchanged by Streamlet nodes.
#[derive(Clone, Debug)]
pub enum StreamletMessage {
    /// An echo of another message. Echoes are unwrapped on receipt and never
    /// re-echoed, which keeps the gossip amplification finite.
    Echo(Box<StreamletMessage>),
    /// A proposal for the receiver to vote on.
    Proposal(Rc<StreamletProposal>),
    /// A vote on a proposal.
    Ballot(Ballot),
    /// A notarized block.
    Block(Rc<StreamletBlock>),
}

impl fmt::Display for StreamletMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Echo(inner) => write!(f, "echo({inner})"),
            Self::Proposal(proposal) => write!(f, "{proposal}"),
            Self::Ballot(ballot) => write!(f, "{ballot}"),
            Self::Block(block) => write!(f, "{block}"),
        }
    }
}

/// Streamlet protocol state for one node.
///
/// Wrap in a [`sim_core::SequentialNode`] to run it on a network; messages
/// must be handled one at a time for the vote counting to be meaningful.
pub struct StreamletNode {
    genesis: Rc<StreamletGenesis>,
    voted_epoch: u64,
    tip: BlockRef,
    proposal: Option<Rc<StreamletProposal>>,
    safety_violations: HashSet<(BlockRef, BlockRef)>,
}

impl StreamletNode {
    #[must_use]
    pub fn new(genesis: Rc<StreamletGenesis>) -> Self {
        Self {
            tip: BlockRef::from(Rc::clone(&genesis)),
            genesis,
            voted_epoch: 0,
            proposal: None,
            safety_violations: HashSet::new(),
        }
    }

    #[must_use]
    pub fn genesis(&self) -> &Rc<StreamletGenesis> {
        &self.genesis
    }

    /// The highest epoch this node has voted in. Nondecreasing.
    #[must_use]
    pub fn voted_epoch(&self) -> u64 {
        self.voted_epoch
    }

    /// A longest chain known to this node. The node's finalized prefix is
    /// `tip.last_final()`.
    #[must_use]
    pub fn tip(&self) -> &BlockRef {
        &self.tip
    }

    /// Our own in-flight proposal, while we are the proposer.
    #[must_use]
    pub fn proposal(&self) -> Option<&Rc<StreamletProposal>> {
        self.proposal.as_ref()
    }

    /// The last final block seen by this node.
    #[must_use]
    pub fn final_block(&self) -> BlockRef {
        self.tip.last_final()
    }

    /// Pairs of blocks whose last-final blocks this node has observed on
    /// mutually non-ancestral branches.
    #[must_use]
    pub fn safety_violations(&self) -> &HashSet<(BlockRef, BlockRef)> {
        &self.safety_violations
    }

    /// Makes this node the proposer: remembers the proposal and broadcasts
    /// it. Called by the driver for the designated proposer of an epoch.
    ///
    /// # Errors
    ///
    /// Fails if the proposal is invalid or not after our voted epoch.
    pub fn propose(
        &mut self,
        ctx: &NodeCtx<StreamletMessage>,
        proposal: Rc<StreamletProposal>,
    ) -> Result<(), BftError> {
        if !proposal.is_valid() || proposal.epoch() <= self.voted_epoch {
            return Err(BftError::StaleProposal {
                epoch: proposal.epoch(),
                voted_epoch: self.voted_epoch,
            });
        }
        self.proposal = Some(Rc::clone(&proposal));
        ctx.broadcast(StreamletMessage::Proposal(proposal));
        Ok(())
    }

    /// Vote for a valid proposal unless we already voted in its epoch or a
    /// later one.
    fn on_proposal(&mut self, ctx: &NodeCtx<StreamletMessage>, proposal: Rc<StreamletProposal>) {
        if proposal.epoch() <= self.voted_epoch {
            ctx.log(
                "proposal",
                &format!(
                    "ignoring epoch {} proposal, already voted in epoch {}",
                    proposal.epoch(),
                    self.voted_epoch
                ),
            );
            return;
        }
        if !proposal.is_valid() {
            return;
        }
        ctx.log("proposal", &format!("voting for {proposal}"));
        // Receiving a different valid proposal makes us forget our own. We
        // still vote for our own proposal when it is echoed back to us.
        let ours = self
            .proposal
            .as_ref()
            .is_some_and(|mine| Rc::ptr_eq(mine, &proposal));
        if !ours {
            self.proposal = None;
        }
        self.voted_epoch = proposal.epoch();
        ctx.broadcast(StreamletMessage::Ballot(Ballot {
            proposal,
            voter: ctx.ident,
        }));
    }

    /// Count a ballot for our own proposal; build and broadcast the block
    /// once it notarizes. Ballots for proposals we are not tracking are
    /// ignored.
    fn on_ballot(&mut self, ctx: &NodeCtx<StreamletMessage>, ballot: Ballot) {
        let tracking = self
            .proposal
            .as_ref()
            .is_some_and(|mine| Rc::ptr_eq(mine, &ballot.proposal));
        if !tracking {
            return;
        }
        let proposal = ballot.proposal;
        ctx.log(
            "count",
            &format!(
                "node {} voted for our proposal in epoch {}",
                ballot.voter,
                proposal.epoch()
            ),
        );
        proposal.add_vote(ballot.voter);
        if proposal.is_notarized() {
            let block = StreamletBlock::new(Rc::clone(&proposal))
                .expect("proposal was just notarized");
            ctx.log("block", &format!("notarized, broadcasting {block}"));
            ctx.broadcast(StreamletMessage::Block(block));
            // It's fine to forget that we made the proposal now.
            self.proposal = None;
        }
    }

    /// Accept a block iff its finalized prefix extends ours; update the tip
    /// iff the block is strictly later in `(length, epoch)` order.
    fn on_block(&mut self, ctx: &NodeCtx<StreamletMessage>, block: Rc<StreamletBlock>) {
        let block = BlockRef::from(block);
        let our_final = self.tip.last_final();
        let block_final = block.last_final();
        if !our_final.preceq(&block_final) {
            ctx.log(
                "block",
                &format!("rejecting {block}: its last-final does not extend ours"),
            );
            if !block_final.preceq(&our_final) {
                ctx.log(
                    "block",
                    &format!("safety violation: ({block}, {})", self.tip),
                );
                tracing::warn!(
                    node = ctx.ident,
                    block = %block,
                    tip = %self.tip,
                    "last-final blocks on divergent branches"
                );
                self.safety_violations.insert((block, self.tip.clone()));
            }
            return;
        }

        if (block.length(), block.epoch()) > (self.tip.length(), self.tip.epoch()) {
            ctx.log("block", &format!("updating tip to {block}"));
            self.tip = block;
        } else {
            ctx.log("block", &format!("keeping tip over {block}"));
        }
    }
}

impl Behavior<StreamletMessage> for StreamletNode {
    fn name(&self) -> &'static str {
        "streamlet"
    }

    fn handle(
        &mut self,
        ctx: &NodeCtx<StreamletMessage>,
        _sender: NodeId,
        message: StreamletMessage,
    ) -> Option<Box<dyn Process>> {
        // Unwrap echoes without re-echoing; everything else is echoed to
        // every other node before being interpreted.
        let message = match message {
            StreamletMessage::Echo(inner) => *inner,
            other => {
                ctx.broadcast(StreamletMessage::Echo(Box::new(other.clone())));
                other
            }
        };
        match message {
            StreamletMessage::Proposal(proposal) => self.on_proposal(ctx, proposal),
            StreamletMessage::Ballot(ballot) => self.on_ballot(ctx, ballot),
            StreamletMessage::Block(block) => self.on_block(ctx, block),
            // A doubly-wrapped echo; nothing sends these.
            StreamletMessage::Echo(_) => {}
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::BTreeSet;

    use sim_core::{Kernel, Network, SequentialNode, Step};

    use super::*;

    type StreamletHost = SequentialNode<StreamletMessage, StreamletNode>;

    enum Phase {
        NextEpoch,
        Act,
        Verify,
    }

    /// Drives a consensus scenario: for each epoch, waits for the network to
    /// quiesce, hands the designated proposer a proposal whose parent is
    /// chosen by `parent_map`, waits again, and then checks the tips,
    /// finalization, and (at the end) the safety violations every node
    /// observed.
    ///
    /// `blocks` is a shadow chain built from the same shared proposals the
    /// network notarizes, so identity comparisons against node state hold.
    struct ScenarioDriver {
        net: Network<StreamletMessage>,
        genesis: Rc<StreamletGenesis>,
        nodes: Vec<Rc<RefCell<StreamletHost>>>,
        parent_map: Vec<Option<usize>>,
        final_map: Vec<usize>,
        divergence_at: Option<usize>,
        expected_violations: BTreeSet<(u64, u64)>,
        blocks: Vec<Option<BlockRef>>,
        epoch: usize,
        phase: Phase,
        pending: Option<Rc<StreamletProposal>>,
    }

    impl ScenarioDriver {
        fn verify_round(&mut self, proposal: Rc<StreamletProposal>) {
            let epoch = self.epoch;
            let proposer = self.genesis.proposer_for_epoch(epoch as u64).unwrap();

            // The proposer built and broadcast the block, then forgot the
            // proposal.
            assert!(self.nodes[proposer]
                .borrow()
                .behavior()
                .borrow()
                .proposal()
                .is_none());

            // A shadow block over the same proposal, for expected values.
            let current =
                BlockRef::from(StreamletBlock::new(Rc::clone(&proposal)).unwrap());
            assert_eq!(current.length(), proposal.length());
            let parent = proposal.parent().clone();
            assert!(parent.preceq(&current));
            assert!(!current.preceq(&parent));
            assert_eq!(self.blocks.len(), epoch);
            self.blocks.push(Some(current.clone()));

            let final_block = self.blocks[self.final_map[epoch - 1]]
                .clone()
                .expect("final epoch was built");
            assert_eq!(current.last_final(), final_block);

            // All nodes converge on the same tip.
            let tip = self.nodes[0].borrow().behavior().borrow().tip().clone();
            for node in &self.nodes[1..] {
                assert_eq!(*node.borrow().behavior().borrow().tip(), tip);
            }

            match self.divergence_at {
                Some(divergence) if epoch == divergence => {
                    // The new block is on a shorter branch and is ignored.
                    assert!(current.length() < tip.length());
                }
                Some(divergence) if epoch > divergence => {}
                _ => {
                    assert_eq!(current.length(), tip.length());
                    assert_eq!(tip.epoch(), epoch as u64);
                    let BlockRef::Block(tip_block) = &tip else {
                        panic!("tip is genesis after a successful round");
                    };
                    assert!(Rc::ptr_eq(tip_block.proposal(), &proposal));
                    for node in &self.nodes {
                        assert_eq!(
                            node.borrow().behavior().borrow().final_block(),
                            final_block
                        );
                    }
                }
            }
        }

        fn finish(&self) {
            for node in &self.nodes {
                let observed: BTreeSet<(u64, u64)> = node
                    .borrow()
                    .behavior()
                    .borrow()
                    .safety_violations()
                    .iter()
                    .map(|(a, b)| (a.epoch(), b.epoch()))
                    .collect();
                assert_eq!(observed, self.expected_violations);
            }
            self.net.set_done();
        }
    }

    impl sim_core::Process for ScenarioDriver {
        fn resume(&mut self) -> Step {
            loop {
                match self.phase {
                    Phase::NextEpoch => {
                        if self.epoch == self.parent_map.len() {
                            self.finish();
                            return Step::Done;
                        }
                        self.epoch += 1;
                        self.phase = Phase::Act;
                        return Step::Sleep(10);
                    }
                    Phase::Act => {
                        let Some(parent_epoch) = self.parent_map[self.epoch - 1] else {
                            self.blocks.push(None);
                            self.phase = Phase::NextEpoch;
                            continue;
                        };
                        let parent = self.blocks[parent_epoch]
                            .clone()
                            .expect("parent epoch was built");
                        let proposal =
                            StreamletProposal::new(parent.clone(), self.epoch as u64)
                                .unwrap();
                        assert_eq!(proposal.length(), parent.length() + 1);
                        assert!(!proposal.is_notarized());

                        let proposer = self
                            .genesis
                            .proposer_for_epoch(self.epoch as u64)
                            .unwrap();
                        let node = &self.nodes[proposer];
                        let ctx = node.borrow().ctx();
                        node.borrow()
                            .behavior()
                            .borrow_mut()
                            .propose(&ctx, Rc::clone(&proposal))
                            .unwrap();

                        self.pending = Some(proposal);
                        self.phase = Phase::Verify;
                        return Step::Sleep(10);
                    }
                    Phase::Verify => {
                        let proposal = self.pending.take().expect("a proposal is pending");
                        self.verify_round(proposal);
                        self.phase = Phase::NextEpoch;
                    }
                }
            }
        }
    }

    fn run_scenario(
        parent_map: &[Option<usize>],
        final_map: &[usize],
        divergence_at: Option<usize>,
        expected_violations: &[(u64, u64)],
    ) -> Vec<Rc<RefCell<StreamletHost>>> {
        let mut kernel = Kernel::new();
        let genesis = StreamletGenesis::new(3);
        let net: Network<StreamletMessage> = Network::new(kernel.sim(), 1);

        let mut nodes = Vec::new();
        for _ in 0..3 {
            let node = Rc::new(RefCell::new(SequentialNode::new(StreamletNode::new(
                Rc::clone(&genesis),
            ))));
            net.add_node(node.clone());
            nodes.push(node);
        }

        let genesis_ref = BlockRef::from(Rc::clone(&genesis));
        kernel.sim().spawn(Box::new(ScenarioDriver {
            net: net.clone(),
            genesis,
            nodes: nodes.clone(),
            parent_map: parent_map.to_vec(),
            final_map: final_map.to_vec(),
            divergence_at,
            expected_violations: expected_violations.iter().copied().collect(),
            blocks: vec![Some(genesis_ref)],
            epoch: 0,
            phase: Phase::NextEpoch,
            pending: None,
        }));

        net.run_all(&mut kernel, None);
        assert!(net.is_done());
        nodes
    }

    #[test]
    fn test_straight_line_finalizes_the_middle_block() {
        // 0 --- 1 --- 2 --- 3
        let nodes = run_scenario(&[Some(0), Some(1), Some(2)], &[0, 0, 2], None, &[]);

        for node in &nodes {
            let node = node.borrow();
            let behavior = node.behavior();
            let behavior = behavior.borrow();
            assert_eq!(behavior.voted_epoch(), 3);
            assert_eq!(behavior.tip().epoch(), 3);
            assert_eq!(behavior.final_block().epoch(), 2);
        }
    }

    #[test]
    fn test_fork_finalizes_through_consecutive_epochs() {
        // 0 --- 2 --- 5 --- 6 --- 7
        //   \
        //    -- 1 --- 3
        run_scenario(
            &[Some(0), Some(0), Some(1), None, Some(2), Some(5), Some(6)],
            &[0, 0, 0, 0, 0, 0, 6],
            None,
            &[],
        );
    }

    #[test]
    fn test_divergent_finalization_is_detected() {
        // 0 --- 2 --- 5 --- 6 --- 7
        //   \
        //    -- 1 --- 3 --- 8 --- 9 --- 10
        //
        // 6 is last-final in the context of 7, 9 is last-final in the
        // context of 10, and neither descends from the other. Every node
        // records the violation when the epoch 10 block arrives.
        run_scenario(
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
            Some(8),
            &[(10, 7)],
        );
    }

    #[test]
    fn test_stale_proposal_is_rejected_by_propose() {
        let mut kernel = Kernel::new();
        let genesis = StreamletGenesis::new(3);
        let net: Network<StreamletMessage> = Network::new(kernel.sim(), 1);
        let node = Rc::new(RefCell::new(SequentialNode::new(StreamletNode::new(
            Rc::clone(&genesis),
        ))));
        net.add_node(node.clone());

        let genesis_ref = BlockRef::from(Rc::clone(&genesis));
        let proposal = StreamletProposal::new(genesis_ref, 1).unwrap();
        let ctx = node.borrow().ctx();
        let behavior = node.borrow().behavior();
        behavior
            .borrow_mut()
            .propose(&ctx, Rc::clone(&proposal))
            .unwrap();

        // Proposing for an epoch we have effectively voted past fails.
        behavior.borrow_mut().voted_epoch = 5;
        let stale = StreamletProposal::new(
            BlockRef::from(Rc::clone(&genesis)),
            3,
        )
        .unwrap();
        assert_eq!(
            behavior.borrow_mut().propose(&ctx, stale).unwrap_err(),
            BftError::StaleProposal { epoch: 3, voted_epoch: 5 }
        );
    }
}
