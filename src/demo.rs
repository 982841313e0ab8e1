//! Demo drivers wiring up small simulated networks.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use bft_core::chain::{BlockRef, StreamletGenesis, StreamletProposal};
use bft_core::node::{StreamletMessage, StreamletNode};
use ledger_core::{BcBlock, BcContext, BcTransaction, LedgerError, Spentness};
use shared::logging::Logger;
use sim_core::{
    Behavior, Kernel, Network, NodeCtx, NodeId, PassiveNode, Process, SequentialNode, Step,
};

/// Messages for the ping demo.
#[derive(Clone, Debug)]
pub enum PingMessage {
    Ping(usize),
    Pong(usize),
}

impl fmt::Display for PingMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ping(tag) => write!(f, "ping {tag}"),
            Self::Pong(tag) => write!(f, "pong {tag}"),
        }
    }
}

/// Sends two pings to every node in turn, with think time in between.
/// With a jitter seed, per-message delays are drawn from a seeded generator,
/// so runs are still reproducible.
struct Pinger {
    jitter_seed: Option<u64>,
}

impl Behavior<PingMessage> for Pinger {
    fn name(&self) -> &'static str {
        "ping"
    }

    fn on_start(&mut self, ctx: &NodeCtx<PingMessage>) -> Option<Box<dyn Process>> {
        Some(Box::new(PingRun {
            ctx: ctx.clone(),
            target: 0,
            second: false,
            rng: self.jitter_seed.map(StdRng::seed_from_u64),
        }))
    }

    fn handle(
        &mut self,
        ctx: &NodeCtx<PingMessage>,
        sender: NodeId,
        message: PingMessage,
    ) -> Option<Box<dyn Process>> {
        if let PingMessage::Pong(tag) = message {
            ctx.log("pong", &format!("node {sender} answered ping {tag}"));
        }
        None
    }
}

struct PingRun {
    ctx: NodeCtx<PingMessage>,
    target: NodeId,
    second: bool,
    rng: Option<StdRng>,
}

impl PingRun {
    fn send_ping(&mut self) {
        let message = PingMessage::Ping(self.target);
        match &mut self.rng {
            Some(rng) => {
                let delay = rng.gen_range(1..=6);
                self.ctx.send_with_delay(self.target, message, delay);
            }
            None => self.ctx.send(self.target, message),
        }
    }
}

impl Process for PingRun {
    fn resume(&mut self) -> Step {
        if self.target >= self.ctx.num_nodes() {
            return Step::Done;
        }
        self.send_ping();
        if self.second {
            self.second = false;
            self.target += 1;
            Step::Sleep(2)
        } else {
            self.second = true;
            Step::Sleep(1)
        }
    }
}

/// Answers each ping with a pong carrying the same tag, after a fixed
/// service delay. Sequential: pings queue up behind each other.
struct Ponger;

impl Behavior<PingMessage> for Ponger {
    fn name(&self) -> &'static str {
        "pong"
    }

    fn handle(
        &mut self,
        ctx: &NodeCtx<PingMessage>,
        sender: NodeId,
        message: PingMessage,
    ) -> Option<Box<dyn Process>> {
        match message {
            PingMessage::Ping(tag) => Some(Box::new(PongReply {
                ctx: ctx.clone(),
                sender,
                tag,
                slept: false,
            })),
            PingMessage::Pong(_) => None,
        }
    }
}

struct PongReply {
    ctx: NodeCtx<PingMessage>,
    sender: NodeId,
    tag: usize,
    slept: bool,
}

impl Process for PongReply {
    fn resume(&mut self) -> Step {
        if self.slept {
            self.ctx.send(self.sender, PingMessage::Pong(self.tag));
            Step::Done
        } else {
            self.slept = true;
            Step::Sleep(5)
        }
    }
}

/// Runs the message-passing demo: `nodes` pongers and one pinger.
pub fn run_ping(
    nodes: usize,
    delay: u64,
    until: Option<u64>,
    logger: Rc<dyn Logger>,
    jitter_seed: Option<u64>,
) {
    let mut kernel = Kernel::new();
    let net: Network<PingMessage> = Network::with_logger(kernel.sim(), delay, logger);
    for _ in 0..nodes {
        net.add_node(Rc::new(RefCell::new(SequentialNode::new(Ponger))));
    }
    net.add_node(Rc::new(RefCell::new(PassiveNode::new(Pinger { jitter_seed }))));

    net.run_all(&mut kernel, until);
    info!(now = kernel.now(), "ping demo finished");
}

/// Walks through the best-chain ledger: issuance, a transparent spend,
/// shielding, an in-pool spend, and deshielding.
///
/// # Errors
///
/// Fails only on a construction bug in the storyline itself.
pub fn run_ledger() -> Result<(), LedgerError> {
    let mut ctx = BcContext::new();

    fn apply(ctx: &mut BcContext, label: &str, tx: &Rc<BcTransaction>) {
        let applied = ctx.add_if_valid(tx);
        println!(
            "apply {label:<10} {:<8} total issuance {:3}",
            if applied { "ok" } else { "rejected" },
            ctx.total_issuance()
        );
    }

    let coinbase0 = BcTransaction::coinbase(&[10], 0, 10)?;
    apply(&mut ctx, "coinbase0", &coinbase0);
    let genesis = BcBlock::new(None, 1, vec![Rc::clone(&coinbase0)])?;
    println!("block genesis: score {}", genesis.score());

    let coinbase1 = BcTransaction::coinbase(&[6], -1, 5)?;
    let spend = BcTransaction::transparent(vec![coinbase0.transparent_output(0)], &[9], 1)?;
    apply(&mut ctx, "coinbase1", &coinbase1);
    apply(&mut ctx, "spend", &spend);
    let block1 = BcBlock::new(
        Some(&genesis),
        1,
        vec![Rc::clone(&coinbase1), Rc::clone(&spend)],
    )?;
    println!("block 1: score {}", block1.score());

    let coinbase2 = BcTransaction::coinbase(&[6], -1, 5)?;
    let shielding = BcTransaction::new(
        vec![coinbase1.transparent_output(0), spend.transparent_output(0)],
        &[],
        Vec::new(),
        &[8, 6],
        1,
        None,
        0,
    )?;
    apply(&mut ctx, "coinbase2", &coinbase2);
    apply(&mut ctx, "shielding", &shielding);
    let block2 = BcBlock::new(
        Some(&block1),
        2,
        vec![Rc::clone(&coinbase2), Rc::clone(&shielding)],
    )?;
    println!("block 2: score {}", block2.score());
    let anchor = ctx.clone();

    let coinbase3 = BcTransaction::coinbase(&[7], -2, 5)?;
    let shielded = BcTransaction::new(
        Vec::new(),
        &[],
        vec![shielding.shielded_output(0)],
        &[7],
        1,
        Some(&anchor),
        0,
    )?;
    let deshielding = BcTransaction::new(
        Vec::new(),
        &[5],
        vec![shielding.shielded_output(1)],
        &[],
        1,
        Some(&anchor),
        0,
    )?;
    apply(&mut ctx, "coinbase3", &coinbase3);
    apply(&mut ctx, "shielded", &shielded);
    apply(&mut ctx, "deshield", &deshielding);
    let block3 = BcBlock::new(
        Some(&block2),
        3,
        vec![coinbase3, shielded, deshielding],
    )?;
    println!("block 3: score {}", block3.score());

    println!("committed notes, in commitment order:");
    for (note, spentness) in ctx.committed_notes() {
        let status = match spentness {
            Spentness::Unspent => "unspent",
            Spentness::Spent => "spent",
        };
        println!("  {} value {:2} {status}", note.id, note.value);
    }
    Ok(())
}

/// Drives a straight line of Streamlet epochs over a small network.
struct ChainDriver {
    net: Network<StreamletMessage>,
    genesis: Rc<StreamletGenesis>,
    nodes: Vec<Rc<RefCell<SequentialNode<StreamletMessage, StreamletNode>>>>,
    epochs: u64,
    epoch: u64,
    parent: BlockRef,
    round_ticks: u64,
    waiting: bool,
}

impl Process for ChainDriver {
    fn resume(&mut self) -> Step {
        loop {
            if self.waiting {
                self.waiting = false;
                // Adopt the network's tip as the next parent.
                let tip = self.nodes[0].borrow().behavior().borrow().tip().clone();
                self.parent = tip;
            }
            if self.epoch == self.epochs {
                for (ident, node) in self.nodes.iter().enumerate() {
                    let node = node.borrow();
                    let behavior = node.behavior();
                    let behavior = behavior.borrow();
                    info!(
                        node = ident,
                        tip = %behavior.tip(),
                        last_final = %behavior.final_block(),
                        "consensus state"
                    );
                }
                self.net.set_done();
                return Step::Done;
            }
            self.epoch += 1;
            let proposal = StreamletProposal::new(self.parent.clone(), self.epoch)
                .expect("the driver proposes strictly increasing epochs");
            let proposer = self
                .genesis
                .proposer_for_epoch(self.epoch)
                .expect("non-genesis epoch");
            let node = &self.nodes[proposer];
            let ctx = node.borrow().ctx();
            node.borrow()
                .behavior()
                .borrow_mut()
                .propose(&ctx, proposal)
                .expect("the proposer has not voted in this epoch yet");
            self.waiting = true;
            return Step::Sleep(self.round_ticks);
        }
    }
}

/// Runs adapted-Streamlet for `epochs` epochs over `nodes` nodes.
pub fn run_streamlet(nodes: usize, epochs: u64, delay: u64, logger: Rc<dyn Logger>) {
    assert!(
        nodes >= 3,
        "streamlet needs at least 3 nodes for a quorum of others to form"
    );
    let mut kernel = Kernel::new();
    let genesis = StreamletGenesis::new(nodes);
    let net: Network<StreamletMessage> = Network::with_logger(kernel.sim(), delay, logger);

    let mut hosts = Vec::new();
    for _ in 0..nodes {
        let node = Rc::new(RefCell::new(SequentialNode::new(StreamletNode::new(
            Rc::clone(&genesis),
        ))));
        net.add_node(node.clone());
        hosts.push(node);
    }

    let parent = BlockRef::from(Rc::clone(&genesis));
    kernel.sim().spawn(Box::new(ChainDriver {
        net: net.clone(),
        genesis,
        nodes: hosts,
        epochs,
        epoch: 0,
        parent,
        // A round needs four message hops (proposal, ballots, block, echoes)
        // to settle.
        round_ticks: 5 * delay + 5,
        waiting: false,
    }));

    net.run_all(&mut kernel, None);
    info!(now = kernel.now(), done = net.is_done(), "streamlet demo finished");
}
