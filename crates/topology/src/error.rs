//! Error types for topology table operations.
//!
//! None of these errors poison the table: after any of them the table and
//! every entry in it remain usable.

use crate::neighbor::NeighborState;
use meshlink_core::ExtAddress;
use std::fmt::Debug;
use thiserror::Error;

/// Kind of table slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum EntryKind {
    /// Sleepy or rx-on child attached to this node
    Child,
    /// Router neighbor
    Router,
}

/// Errors that can occur in topology operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyError {
    /// No free slot of the requested kind
    #[error("Topology table full: no free {kind:?} slot")]
    TableFull { kind: EntryKind },

    /// Lookup miss
    #[error("Entry not found")]
    NotFound,

    /// Handle refers to a slot that has since been released or reused
    #[error("Stale entry handle")]
    StaleHandle,

    /// An entry with this extended address already exists
    #[error("Entry already exists for {0}")]
    DuplicateEntry(ExtAddress),

    /// Frame counter or key sequence did not advance
    #[error("Replay rejected from {peer}: counter {counter} not above {stored}")]
    ReplayRejected {
        peer: ExtAddress,
        counter: u32,
        stored: u32,
    },

    /// Payload read or written that does not belong to the current state
    #[error("Invalid state access: entry is {state:?}")]
    InvalidStateAccess { state: NeighborState },

    /// State machine transition not permitted
    #[error("Invalid transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: NeighborState,
        to: NeighborState,
    },

    /// Child already holds the maximum number of registered addresses
    #[error("Child address table full ({max} addresses)")]
    AddressTableFull { max: usize },

    /// More requested TLVs than a child can hold
    #[error("Too many requested TLVs: {count} (max {max})")]
    TooManyRequestTlvs { count: usize, max: usize },

    /// Challenge longer than the handshake allows
    #[error("Challenge too long: {len} bytes (max {max})")]
    ChallengeTooLong { len: usize, max: usize },

    /// Indirect queue for a child is full
    #[error("Indirect queue full for child {child}")]
    QueueOverflow { child: ExtAddress },
}

/// Result type for topology operations.
pub type TopologyResult<T> = Result<T, TopologyError>;

/// A message that could not be buffered, handed back to its sender.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct EnqueueError<M: Debug> {
    /// Why the message was rejected
    pub error: TopologyError,
    /// The rejected message
    pub message: M,
}

impl<M: Debug> From<EnqueueError<M>> for TopologyError {
    fn from(rejected: EnqueueError<M>) -> Self {
        rejected.error
    }
}
