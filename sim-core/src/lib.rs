//! Discrete-event simulation framework: a virtual-time kernel, a message
//! network with deterministic delays, and two node execution disciplines.
//!
//! There is exactly one scheduler and no real threads; concurrency in the
//! simulated world is modelled by cooperative processes in virtual time.

pub mod error;
pub mod kernel;
pub mod network;
pub mod node;

pub use error::SimError;
pub use kernel::{Delay, EventId, Kernel, Process, Sim, Skip, Step, Time};
pub use network::{Network, Node, NodeCtx, NodeId, SimMessage};
pub use node::{Behavior, PassiveNode, SequentialNode};
