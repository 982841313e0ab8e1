use thiserror::Error;

use crate::kernel::EventId;

/// Errors surfaced by the simulation kernel.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SimError {
    /// The event was already succeeded. Callers racing on wakeups are
    /// expected to catch and ignore this.
    #[error("event {0:?} was already succeeded")]
    AlreadySucceeded(EventId),
}
