//! The simulated network: a registry of nodes bound to a kernel, message
//! delivery with deterministic delays, and the logging hook.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use shared::logging::{Logger, NullLogger};

use crate::kernel::{Kernel, Process, Sim, Step, Time};

/// Index of a node within its network, assigned at registration.
pub type NodeId = usize;

/// Messages carried by the simulated network.
///
/// The wire is virtual: messages move by value and only identity and field
/// values matter. `Display` feeds the log sink.
pub trait SimMessage: Clone + fmt::Display + 'static {}

impl<T: Clone + fmt::Display + 'static> SimMessage for T {}

/// A participant in a simulated network.
///
/// Implementations are usually not written directly; wrap a
/// [`crate::node::Behavior`] in [`crate::node::PassiveNode`] or
/// [`crate::node::SequentialNode`] instead.
pub trait Node<M: SimMessage>: 'static {
    /// Binds the node to its network. Called by [`Network::add_node`].
    fn initialize(&mut self, ctx: NodeCtx<M>);

    /// Delivers a message. Returns a continuation that the delivery process
    /// runs to completion, or `None` when handling finished synchronously.
    fn receive(&mut self, sender: NodeId, message: M) -> Option<Box<dyn Process>>;

    /// Starts the node's own process, if it has one.
    fn start(&mut self) -> Option<Box<dyn Process>>;

    /// Short name for log lines.
    fn name(&self) -> &'static str {
        "node"
    }
}

struct NetworkInner<M: SimMessage> {
    sim: Sim,
    nodes: RefCell<Vec<Rc<RefCell<dyn Node<M>>>>>,
    default_delay: u64,
    logger: Rc<dyn Logger>,
    done: Cell<bool>,
}

/// Handle to a simulated network.
///
/// The network exclusively owns its nodes; nodes hold a non-owning
/// [`NodeCtx`] back-reference. The node registry is only mutated during
/// setup; once the simulation runs it is read-only.
pub struct Network<M: SimMessage> {
    inner: Rc<NetworkInner<M>>,
}

impl<M: SimMessage> Clone for Network<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<M: SimMessage> Network<M> {
    /// Creates an unlogged network bound to a kernel handle.
    #[must_use]
    pub fn new(sim: Sim, default_delay: u64) -> Self {
        Self::with_logger(sim, default_delay, Rc::new(NullLogger))
    }

    /// Creates a network that reports events to `logger`. Calls
    /// `logger.header()` once, up front.
    pub fn with_logger(sim: Sim, default_delay: u64, logger: Rc<dyn Logger>) -> Self {
        assert!(default_delay > 0, "message delays must be positive");
        logger.header();
        Self {
            inner: Rc::new(NetworkInner {
                sim,
                nodes: RefCell::new(Vec::new()),
                default_delay,
                logger,
                done: Cell::new(false),
            }),
        }
    }

    /// Registers a node, assigning it the next ident.
    pub fn add_node(&self, node: Rc<RefCell<dyn Node<M>>>) -> NodeId {
        let ident = {
            let mut nodes = self.inner.nodes.borrow_mut();
            nodes.push(Rc::clone(&node));
            nodes.len() - 1
        };
        node.borrow_mut().initialize(NodeCtx {
            ident,
            net: Rc::downgrade(&self.inner),
            sim: self.inner.sim.clone(),
        });
        ident
    }

    #[must_use]
    pub fn num_nodes(&self) -> usize {
        self.inner.nodes.borrow().len()
    }

    /// The registered node with the given ident.
    #[must_use]
    pub fn node(&self, ident: NodeId) -> Rc<RefCell<dyn Node<M>>> {
        Rc::clone(&self.inner.nodes.borrow()[ident])
    }

    #[must_use]
    pub fn now(&self) -> Time {
        self.inner.sim.now()
    }

    /// Sends a message from `sender` to `target`, arriving after `delay`
    /// ticks (the network default if `None`). Sending completes in zero
    /// virtual time; delivery happens in a spawned convey process.
    pub fn send(&self, sender: NodeId, target: NodeId, message: M, delay: Option<u64>) {
        let delay = delay.unwrap_or(self.inner.default_delay);
        assert!(delay > 0, "message delays must be positive");
        self.log(
            sender,
            "send",
            &format!("to {target} delay {delay}: {message}"),
        );
        self.inner.sim.spawn(Box::new(Convey {
            net: self.clone(),
            sender,
            target,
            delay,
            message: Some(message),
            slept: false,
        }));
    }

    /// Sends `message` to every node other than `sender`, all in the same
    /// tick. Every recipient sees the message at exactly `now + delay`.
    pub fn broadcast(&self, sender: NodeId, message: M, delay: Option<u64>) {
        let delay = delay.unwrap_or(self.inner.default_delay);
        assert!(delay > 0, "message delays must be positive");
        self.log(sender, "broadcast", &format!("delay {delay}: {message}"));
        for target in 0..self.num_nodes() {
            if target != sender {
                self.inner.sim.spawn(Box::new(Convey {
                    net: self.clone(),
                    sender,
                    target,
                    delay,
                    message: Some(message.clone()),
                    slept: false,
                }));
            }
        }
    }

    /// Starts every node's own process.
    pub fn start_all(&self) {
        let nodes: Vec<_> = self.inner.nodes.borrow().iter().cloned().collect();
        for (ident, node) in nodes.iter().enumerate() {
            let mut node = node.borrow_mut();
            self.log(ident, "start", node.name());
            if let Some(process) = node.start() {
                self.inner.sim.spawn(process);
            }
        }
    }

    /// Starts every node and drives the kernel to exhaustion, or to `until`.
    pub fn run_all(&self, kernel: &mut Kernel, until: Option<Time>) {
        self.start_all();
        kernel.run(until);
    }

    /// Flag checked by scenario drivers to confirm they ran to completion.
    pub fn set_done(&self) {
        self.inner.done.set(true);
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.inner.done.get()
    }

    pub fn log(&self, ident: NodeId, event: &str, detail: &str) {
        self.inner.logger.log(self.inner.sim.now(), ident, event, detail);
    }
}

/// Conveys one message: sleeps for the transmission delay, then delivers it
/// and runs the receiver's continuation to completion.
struct Convey<M: SimMessage> {
    net: Network<M>,
    sender: NodeId,
    target: NodeId,
    delay: u64,
    message: Option<M>,
    slept: bool,
}

impl<M: SimMessage> Process for Convey<M> {
    fn resume(&mut self) -> Step {
        if !self.slept {
            self.slept = true;
            return Step::Sleep(self.delay);
        }
        let Some(message) = self.message.take() else {
            return Step::Done;
        };
        self.net.log(
            self.target,
            "receive",
            &format!("from {} delay {}: {}", self.sender, self.delay, message),
        );
        let node = self.net.node(self.target);
        let continuation = node.borrow_mut().receive(self.sender, message);
        match continuation {
            Some(process) => Step::Call(process),
            None => Step::Done,
        }
    }
}

/// Per-node view of the network, handed to behaviors.
///
/// The back-reference is non-owning; the network must outlive the simulation
/// run.
pub struct NodeCtx<M: SimMessage> {
    pub ident: NodeId,
    net: Weak<NetworkInner<M>>,
    sim: Sim,
}

impl<M: SimMessage> Clone for NodeCtx<M> {
    fn clone(&self) -> Self {
        Self {
            ident: self.ident,
            net: Weak::clone(&self.net),
            sim: self.sim.clone(),
        }
    }
}

impl<M: SimMessage> NodeCtx<M> {
    fn network(&self) -> Network<M> {
        Network {
            inner: self
                .net
                .upgrade()
                .expect("network dropped while the simulation is running"),
        }
    }

    #[must_use]
    pub fn now(&self) -> Time {
        self.sim.now()
    }

    #[must_use]
    pub fn sim(&self) -> &Sim {
        &self.sim
    }

    #[must_use]
    pub fn num_nodes(&self) -> usize {
        self.network().num_nodes()
    }

    pub fn send(&self, target: NodeId, message: M) {
        self.network().send(self.ident, target, message, None);
    }

    pub fn send_with_delay(&self, target: NodeId, message: M, delay: u64) {
        self.network().send(self.ident, target, message, Some(delay));
    }

    pub fn broadcast(&self, message: M) {
        self.network().broadcast(self.ident, message, None);
    }

    pub fn broadcast_with_delay(&self, message: M, delay: u64) {
        self.network().broadcast(self.ident, message, Some(delay));
    }

    pub fn log(&self, event: &str, detail: &str) {
        self.network().log(self.ident, event, detail);
    }
}
