//! A Logoot-style list CRDT that maps logical positions to local offsets.
//!
//! The model tracks *where* elements live, never the elements themselves.
//! Local edits (`insert N at offset K`, `remove N at offset K`) become
//! logical envelopes that commute across replicas; applying a remote
//! envelope yields the local [`Operation`]s to replay against whatever
//! backing store holds the actual content.
//!
//! ```
//! use logoot_list::{ListDocumentModel, Operation};
//!
//! let mut model = ListDocumentModel::new();
//! let alice = model.branches_mut().get_or_create("alice");
//!
//! // A remote insert of 5 elements into the empty document.
//! let ops = model.insert_logoot(alice, None, None, 5, Default::default()).unwrap();
//! assert_eq!(ops, vec![Operation::Insert { start: 0, offset: 0, length: 5 }]);
//! ```
//!
//! Runs are kept in an order-statistic tree and remember the neighbours
//! they were inserted between ("anchors"); concurrent insertions between
//! the same neighbours are detected and recorded as conflicts either way
//! they interleave.

pub mod bigint;
pub mod branch;
mod list;
pub mod node;
pub mod position;
mod tree;

pub use bigint::{BigInt, LogootInt};
pub use branch::{BranchId, BranchOrder};
pub use list::operation::{Operation, OperationBuffer};
pub use list::{InsertEnvelope, ListDocumentModel, RunView};
pub use node::{AnchorLogootNode, NodeType};
pub use position::{Anchor, Level, LogootPosition};
pub use tree::NodeIdx;

/// The three failure classes of the model.
///
/// `InvalidArgument` is recoverable caller error. `Internal` means a merge
/// found the tree in a state it cannot have produced; `Fatal` means the
/// self-test found corruption. Neither of the latter leaves the instance
/// safe to keep using, and partial mutations are not rolled back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    InvalidArgument(&'static str),
    Internal(&'static str),
    Fatal(&'static str),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Error::Internal(msg) => write!(f, "internal invariant violated: {msg}"),
            Error::Fatal(msg) => write!(f, "model corrupt: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    // As per smartstring's documentation.
    #[test]
    fn validate_smartstring() {
        smartstring::validate();
    }
}
