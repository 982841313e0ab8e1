//! Node execution disciplines.
//!
//! Protocol logic is written once as a [`Behavior`] and hosted by one of two
//! disciplines:
//!
//! * [`PassiveNode`] handles every delivery immediately and concurrently: a
//!   handler's continuation delays only itself, never other deliveries.
//! * [`SequentialNode`] queues deliveries in a FIFO mailbox and handles them
//!   one at a time from its own run process, fully finishing each handler
//!   (including its continuation) before popping the next message.
//!
//! Both disciplines are deterministic given the same event schedule.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use crate::kernel::{EventId, Process, Step};
use crate::network::{Node, NodeCtx, NodeId, SimMessage};

/// Protocol logic hosted by a node discipline.
pub trait Behavior<M: SimMessage>: 'static {
    /// Short name for log lines.
    fn name(&self) -> &'static str {
        "node"
    }

    /// Optional process started alongside the node.
    fn on_start(&mut self, ctx: &NodeCtx<M>) -> Option<Box<dyn Process>> {
        let _ = ctx;
        None
    }

    /// Handles one message. The returned continuation runs after the
    /// synchronous part; under the sequential discipline it finishes before
    /// the next message is popped.
    fn handle(&mut self, ctx: &NodeCtx<M>, sender: NodeId, message: M)
        -> Option<Box<dyn Process>>;
}

/// Concurrent discipline: each delivery is handled in the convey process
/// that carried it, so handler continuations overlap freely in virtual time.
pub struct PassiveNode<M: SimMessage, B: Behavior<M>> {
    ctx: Option<NodeCtx<M>>,
    behavior: Rc<RefCell<B>>,
}

impl<M: SimMessage, B: Behavior<M>> PassiveNode<M, B> {
    #[must_use]
    pub fn new(behavior: B) -> Self {
        Self {
            ctx: None,
            behavior: Rc::new(RefCell::new(behavior)),
        }
    }

    /// Shared handle to the hosted behavior, for drivers and assertions.
    #[must_use]
    pub fn behavior(&self) -> Rc<RefCell<B>> {
        Rc::clone(&self.behavior)
    }

    /// The node's network context. Panics if the node was never registered.
    #[must_use]
    pub fn ctx(&self) -> NodeCtx<M> {
        self.ctx.clone().expect("node not registered with a network")
    }
}

impl<M: SimMessage, B: Behavior<M>> Node<M> for PassiveNode<M, B> {
    fn initialize(&mut self, ctx: NodeCtx<M>) {
        self.ctx = Some(ctx);
    }

    fn receive(&mut self, sender: NodeId, message: M) -> Option<Box<dyn Process>> {
        let ctx = self.ctx();
        self.behavior.borrow_mut().handle(&ctx, sender, message)
    }

    fn start(&mut self) -> Option<Box<dyn Process>> {
        let ctx = self.ctx();
        self.behavior.borrow_mut().on_start(&ctx)
    }

    fn name(&self) -> &'static str {
        self.behavior.borrow().name()
    }
}

/// Mailbox discipline: deliveries are queued and a dedicated run process
/// drains them one at a time, blocking on a wakeup event when idle.
pub struct SequentialNode<M: SimMessage, B: Behavior<M>> {
    ctx: Option<NodeCtx<M>>,
    behavior: Rc<RefCell<B>>,
    mailbox: Rc<RefCell<VecDeque<(NodeId, M)>>>,
    wakeup: Option<Rc<Cell<EventId>>>,
}

impl<M: SimMessage, B: Behavior<M>> SequentialNode<M, B> {
    #[must_use]
    pub fn new(behavior: B) -> Self {
        Self {
            ctx: None,
            behavior: Rc::new(RefCell::new(behavior)),
            mailbox: Rc::new(RefCell::new(VecDeque::new())),
            wakeup: None,
        }
    }

    /// Shared handle to the hosted behavior, for drivers and assertions.
    #[must_use]
    pub fn behavior(&self) -> Rc<RefCell<B>> {
        Rc::clone(&self.behavior)
    }

    /// The node's network context. Panics if the node was never registered.
    #[must_use]
    pub fn ctx(&self) -> NodeCtx<M> {
        self.ctx.clone().expect("node not registered with a network")
    }
}

impl<M: SimMessage, B: Behavior<M>> Node<M> for SequentialNode<M, B> {
    fn initialize(&mut self, ctx: NodeCtx<M>) {
        self.wakeup = Some(Rc::new(Cell::new(ctx.sim().event())));
        self.ctx = Some(ctx);
    }

    fn receive(&mut self, sender: NodeId, message: M) -> Option<Box<dyn Process>> {
        self.mailbox.borrow_mut().push_back((sender, message));
        let wakeup = self.wakeup.as_ref().expect("node not registered");
        // Succeeding an already-succeeded wakeup just means the run loop is
        // already scheduled to drain the mailbox.
        let _ = self.ctx().sim().succeed(wakeup.get());
        None
    }

    fn start(&mut self) -> Option<Box<dyn Process>> {
        let ctx = self.ctx();
        if let Some(process) = self.behavior.borrow_mut().on_start(&ctx) {
            ctx.sim().spawn(process);
        }
        Some(Box::new(SequentialRun {
            ctx,
            behavior: Rc::clone(&self.behavior),
            mailbox: Rc::clone(&self.mailbox),
            wakeup: Rc::clone(self.wakeup.as_ref().expect("node not registered")),
        }))
    }

    fn name(&self) -> &'static str {
        self.behavior.borrow().name()
    }
}

/// The run process of a [`SequentialNode`]: pop, handle, repeat; refresh the
/// wakeup event and block on it when the mailbox is empty.
struct SequentialRun<M: SimMessage, B: Behavior<M>> {
    ctx: NodeCtx<M>,
    behavior: Rc<RefCell<B>>,
    mailbox: Rc<RefCell<VecDeque<(NodeId, M)>>>,
    wakeup: Rc<Cell<EventId>>,
}

impl<M: SimMessage, B: Behavior<M>> Process for SequentialRun<M, B> {
    fn resume(&mut self) -> Step {
        loop {
            let next = self.mailbox.borrow_mut().pop_front();
            match next {
                Some((sender, message)) => {
                    self.ctx
                        .log("handle", &format!("from {sender}: {message}"));
                    let continuation =
                        self.behavior.borrow_mut().handle(&self.ctx, sender, message);
                    if let Some(process) = continuation {
                        return Step::Call(process);
                    }
                }
                None => {
                    let event = self.ctx.sim().event();
                    self.wakeup.set(event);
                    return Step::Wait(event);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fmt;

    use super::*;
    use crate::kernel::{Delay, Kernel, Time};
    use crate::network::Network;

    #[derive(Clone, Debug, PartialEq, Eq)]
    struct Packet(usize);

    impl fmt::Display for Packet {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "packet {}", self.0)
        }
    }

    type Received = Rc<RefCell<Vec<(NodeId, usize, Time)>>>;

    /// Records every handled packet with the time handling began, then
    /// models a fixed service time.
    struct Recorder {
        service_time: u64,
        received: Received,
    }

    impl Behavior<Packet> for Recorder {
        fn handle(
            &mut self,
            ctx: &NodeCtx<Packet>,
            sender: NodeId,
            message: Packet,
        ) -> Option<Box<dyn Process>> {
            self.received
                .borrow_mut()
                .push((sender, message.0, ctx.now()));
            if self.service_time > 0 {
                Some(Box::new(Delay::new(self.service_time)))
            } else {
                None
            }
        }
    }

    /// Broadcasts packets 0..=2 at times 0, 1, 2; sends packet 3 to node 0
    /// at time 3 with delay 11; broadcasts packet 4 at time 4.
    struct Burst;

    impl Behavior<Packet> for Burst {
        fn on_start(&mut self, ctx: &NodeCtx<Packet>) -> Option<Box<dyn Process>> {
            Some(Box::new(BurstRun {
                ctx: ctx.clone(),
                step: 0,
            }))
        }

        fn handle(
            &mut self,
            _ctx: &NodeCtx<Packet>,
            _sender: NodeId,
            _message: Packet,
        ) -> Option<Box<dyn Process>> {
            None
        }
    }

    struct BurstRun {
        ctx: NodeCtx<Packet>,
        step: usize,
    }

    impl Process for BurstRun {
        fn resume(&mut self) -> Step {
            let step = self.step;
            self.step += 1;
            match step {
                0 | 1 | 2 => {
                    self.ctx.broadcast(Packet(step));
                    Step::Sleep(1)
                }
                3 => {
                    self.ctx.send_with_delay(0, Packet(3), 11);
                    Step::Sleep(1)
                }
                _ => {
                    self.ctx.broadcast(Packet(4));
                    Step::Done
                }
            }
        }
    }

    fn run_burst(service_time: u64, sequential: bool) -> Vec<(NodeId, usize, Time)> {
        let mut kernel = Kernel::new();
        let net: Network<Packet> = Network::new(kernel.sim(), 1);
        let received: Received = Rc::default();
        for _ in 0..10 {
            let recorder = Recorder {
                service_time,
                received: Rc::clone(&received),
            };
            if sequential {
                net.add_node(Rc::new(RefCell::new(SequentialNode::new(recorder))));
            } else {
                net.add_node(Rc::new(RefCell::new(PassiveNode::new(recorder))));
            }
        }
        net.add_node(Rc::new(RefCell::new(PassiveNode::new(Burst))));

        net.run_all(&mut kernel, None);

        let trace = received.borrow();
        trace.clone()
    }

    fn times_seen_by_first_recorder(
        trace: &[(NodeId, usize, Time)],
    ) -> Vec<(usize, Time)> {
        // Each broadcast round reaches node 0 first among the recorders, so
        // node 0's deliveries are exactly the first occurrence of each tag.
        let mut seen = Vec::new();
        for &(_, tag, at) in trace {
            if !seen.iter().any(|&(t, _)| t == tag) {
                seen.push((tag, at));
            }
        }
        seen
    }

    #[test]
    fn test_passive_nodes_handle_concurrently() {
        let trace = run_burst(3, false);
        let seen = times_seen_by_first_recorder(&trace);
        assert_eq!(seen, vec![(0, 1), (1, 2), (2, 3), (4, 5), (3, 14)]);
    }

    #[test]
    fn test_sequential_nodes_handle_one_at_a_time() {
        let trace = run_burst(3, true);
        let seen = times_seen_by_first_recorder(&trace);
        assert_eq!(seen, vec![(0, 1), (1, 4), (2, 7), (4, 10), (3, 14)]);
    }

    #[test]
    fn test_sequential_without_service_time_drains_at_arrival() {
        let trace = run_burst(0, true);
        let seen = times_seen_by_first_recorder(&trace);
        assert_eq!(seen, vec![(0, 1), (1, 2), (2, 3), (4, 5), (3, 14)]);
    }

    /// Sends two packets back to back in the same tick.
    struct Pair;

    impl Behavior<Packet> for Pair {
        fn on_start(&mut self, ctx: &NodeCtx<Packet>) -> Option<Box<dyn Process>> {
            ctx.send(0, Packet(0));
            ctx.send(0, Packet(1));
            None
        }

        fn handle(
            &mut self,
            _ctx: &NodeCtx<Packet>,
            _sender: NodeId,
            _message: Packet,
        ) -> Option<Box<dyn Process>> {
            None
        }
    }

    #[test]
    fn test_same_tick_sends_deliver_in_program_order() {
        let mut kernel = Kernel::new();
        let net: Network<Packet> = Network::new(kernel.sim(), 2);
        let received: Received = Rc::default();
        net.add_node(Rc::new(RefCell::new(PassiveNode::new(Recorder {
            service_time: 0,
            received: Rc::clone(&received),
        }))));
        net.add_node(Rc::new(RefCell::new(PassiveNode::new(Pair))));

        net.run_all(&mut kernel, None);

        assert_eq!(*received.borrow(), vec![(1, 0, 2), (1, 1, 2)]);
    }
}
