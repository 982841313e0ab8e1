//! The event-loop kernel: a monotonically nondecreasing virtual clock and a
//! priority queue of process resumptions.
//!
//! A process is a state machine that runs without preemption between
//! suspension points. Each call to [`Process::resume`] performs some work and
//! returns a [`Step`] saying how to continue: sleep for a number of ticks,
//! wait for an explicit event, run a sub-process to completion first, or
//! finish. This replaces a coroutine runtime with an explicit queue of
//! `(virtual_time, insertion_seq, process)` entries, which makes dispatch
//! order fully deterministic: ties at the same virtual time are dispatched in
//! insertion order.

use std::cell::{Cell, RefCell};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::rc::Rc;

use crate::error::SimError;

/// Virtual time, measured in ticks since the start of the simulation.
pub type Time = u64;

/// Identifier of an explicit kernel event.
///
/// Events start pending and are succeeded at most once; processes suspend on
/// them with [`Step::Wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ProcessId(usize);

/// What a process does next after a resumption.
pub enum Step {
    /// Suspend and resume after the given number of ticks.
    Sleep(u64),
    /// Suspend until the given event is succeeded.
    Wait(EventId),
    /// Run a sub-process to completion, then resume this process. This is
    /// the flattening used when a handler returns a continuation.
    Call(Box<dyn Process>),
    /// The process is finished.
    Done,
}

/// A cooperative process in virtual time.
///
/// State that must survive a suspension lives in the implementing struct;
/// everything else runs to completion inside a single `resume` call.
pub trait Process: 'static {
    fn resume(&mut self) -> Step;
}

/// A process that completes immediately without doing anything.
pub struct Skip;

impl Process for Skip {
    fn resume(&mut self) -> Step {
        Step::Done
    }
}

/// A process that sleeps once and completes. Useful as a handler
/// continuation that only models service time.
pub struct Delay {
    ticks: u64,
    slept: bool,
}

impl Delay {
    #[must_use]
    pub fn new(ticks: u64) -> Self {
        Self {
            ticks,
            slept: false,
        }
    }
}

impl Process for Delay {
    fn resume(&mut self) -> Step {
        if self.slept {
            Step::Done
        } else {
            self.slept = true;
            Step::Sleep(self.ticks)
        }
    }
}

enum Command {
    Spawn(Box<dyn Process>),
    Wake(EventId),
}

#[derive(Default)]
struct EventState {
    succeeded: bool,
    waiters: Vec<ProcessId>,
}

#[derive(Default)]
struct SimState {
    now: Cell<Time>,
    pending: RefCell<Vec<Command>>,
    events: RefCell<Vec<EventState>>,
}

/// Cheap cloneable handle onto the kernel.
///
/// Processes capture a `Sim` to read the clock, spawn further processes, and
/// create or succeed events. Side effects requested mid-dispatch are queued
/// and applied by the kernel after the current resumption returns, preserving
/// insertion order.
#[derive(Clone, Default)]
pub struct Sim {
    state: Rc<SimState>,
}

impl Sim {
    /// The current virtual time.
    #[must_use]
    pub fn now(&self) -> Time {
        self.state.now.get()
    }

    /// Schedules a process to start at the current virtual time.
    pub fn spawn(&self, process: Box<dyn Process>) {
        self.state.pending.borrow_mut().push(Command::Spawn(process));
    }

    /// Creates a fresh event in the pending state.
    pub fn event(&self) -> EventId {
        let mut events = self.state.events.borrow_mut();
        events.push(EventState::default());
        EventId(events.len() - 1)
    }

    /// Succeeds an event, waking every process waiting on it.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::AlreadySucceeded`] if the event was succeeded
    /// before; callers racing on wakeups catch and ignore this.
    pub fn succeed(&self, event: EventId) -> Result<(), SimError> {
        {
            let mut events = self.state.events.borrow_mut();
            let state = &mut events[event.0];
            if state.succeeded {
                return Err(SimError::AlreadySucceeded(event));
            }
            state.succeeded = true;
        }
        self.state.pending.borrow_mut().push(Command::Wake(event));
        Ok(())
    }
}

struct TaskSlot {
    /// Call stack of the process: sub-processes pushed by [`Step::Call`] run
    /// to completion before the entry below them resumes.
    stack: Vec<Box<dyn Process>>,
}

/// The discrete-event kernel.
pub struct Kernel {
    sim: Sim,
    queue: BinaryHeap<Reverse<(Time, u64, usize)>>,
    tasks: HashMap<usize, TaskSlot>,
    next_pid: usize,
    next_seq: u64,
}

impl Kernel {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sim: Sim::default(),
            queue: BinaryHeap::new(),
            tasks: HashMap::new(),
            next_pid: 0,
            next_seq: 0,
        }
    }

    /// A handle for spawning processes and manipulating events.
    #[must_use]
    pub fn sim(&self) -> Sim {
        self.sim.clone()
    }

    /// The current virtual time.
    #[must_use]
    pub fn now(&self) -> Time {
        self.sim.now()
    }

    /// Runs until the queue drains, or until the clock would reach `until`.
    ///
    /// Entries scheduled at exactly `until` are not dispatched; the clock is
    /// left at `until` in that case. Calling `run` again resumes where the
    /// previous call stopped.
    pub fn run(&mut self, until: Option<Time>) {
        self.drain_commands();
        while let Some(&Reverse((at, _, _))) = self.queue.peek() {
            if let Some(limit) = until {
                if at >= limit {
                    self.sim.state.now.set(limit);
                    return;
                }
            }
            let Reverse((at, _, pid)) = self.queue.pop().expect("peeked entry is present");
            self.sim.state.now.set(at);
            tracing::trace!(time = at, pid, "dispatch");
            self.dispatch(ProcessId(pid));
            self.drain_commands();
        }
    }

    fn enqueue(&mut self, at: Time, pid: ProcessId) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Reverse((at, seq, pid.0)));
    }

    fn drain_commands(&mut self) {
        loop {
            let commands: Vec<Command> =
                self.sim.state.pending.borrow_mut().drain(..).collect();
            if commands.is_empty() {
                return;
            }
            for command in commands {
                match command {
                    Command::Spawn(process) => {
                        let pid = ProcessId(self.next_pid);
                        self.next_pid += 1;
                        self.tasks.insert(
                            pid.0,
                            TaskSlot {
                                stack: vec![process],
                            },
                        );
                        self.enqueue(self.sim.now(), pid);
                    }
                    Command::Wake(event) => {
                        let waiters = {
                            let mut events = self.sim.state.events.borrow_mut();
                            std::mem::take(&mut events[event.0].waiters)
                        };
                        for pid in waiters {
                            self.enqueue(self.sim.now(), pid);
                        }
                    }
                }
            }
        }
    }

    fn dispatch(&mut self, pid: ProcessId) {
        let Some(mut task) = self.tasks.remove(&pid.0) else {
            return;
        };
        loop {
            let Some(top) = task.stack.last_mut() else {
                // The outermost process finished; the task is dropped.
                return;
            };
            match top.resume() {
                Step::Sleep(ticks) => {
                    let at = self.sim.now() + ticks;
                    self.tasks.insert(pid.0, task);
                    self.enqueue(at, pid);
                    return;
                }
                Step::Wait(event) => {
                    let already_succeeded = {
                        let mut events = self.sim.state.events.borrow_mut();
                        let state = &mut events[event.0];
                        if state.succeeded {
                            true
                        } else {
                            state.waiters.push(pid);
                            false
                        }
                    };
                    self.tasks.insert(pid.0, task);
                    if already_succeeded {
                        self.enqueue(self.sim.now(), pid);
                    }
                    return;
                }
                Step::Call(sub) => task.stack.push(sub),
                Step::Done => {
                    task.stack.pop();
                }
            }
        }
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}
