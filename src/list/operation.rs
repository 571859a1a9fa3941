use std::fmt;

use rle::HasLength;

use crate::Error;

/// A local edit the caller must replay against its materialized document.
///
/// Operations come out of the merge algorithms in application order;
/// `start` offsets are always relative to the document state after the
/// operations before them have been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Operation {
    /// Copy `length` elements from `offset` in the caller's source buffer
    /// to local offset `start`.
    Insert {
        start: usize,
        offset: usize,
        length: usize,
    },
    /// Delete `length` elements at local offset `start`.
    Remove { start: usize, length: usize },
    /// Update a visual conflict marker. Reserved: accepted by the type but
    /// not produced by the merge algorithms.
    Mark {
        start: usize,
        length: usize,
        conflicting: bool,
    },
}

impl Operation {
    pub fn start(&self) -> usize {
        match self {
            Operation::Insert { start, .. }
            | Operation::Remove { start, .. }
            | Operation::Mark { start, .. } => *start,
        }
    }
}

impl HasLength for Operation {
    fn len(&self) -> usize {
        match self {
            Operation::Insert { length, .. }
            | Operation::Remove { length, .. }
            | Operation::Mark { length, .. } => *length,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Insert {
                start,
                offset,
                length,
            } => write!(f, "ins {length}@{start} (src {offset})"),
            Operation::Remove { start, length } => write!(f, "del {length}@{start}"),
            Operation::Mark {
                start,
                length,
                conflicting,
            } => write!(f, "mark {length}@{start} ({conflicting})"),
        }
    }
}

/// Accumulates operations for one merge, validating source offsets against
/// the declared source length as they are recorded.
#[derive(Debug)]
pub struct OperationBuffer {
    ops: Vec<Operation>,
    length_avail: usize,
}

impl OperationBuffer {
    pub fn new(length_avail: usize) -> Self {
        OperationBuffer {
            ops: Vec::new(),
            length_avail,
        }
    }

    pub fn insert(&mut self, start: usize, offset: usize, length: usize) -> Result<(), Error> {
        if offset + length > self.length_avail {
            return Err(Error::InvalidArgument("insert outside the source buffer"));
        }
        if length > 0 {
            self.ops.push(Operation::Insert {
                start,
                offset,
                length,
            });
        }
        Ok(())
    }

    pub fn remove(&mut self, start: usize, length: usize) {
        if length > 0 {
            self.ops.push(Operation::Remove { start, length });
        }
    }

    pub fn into_ops(self) -> Vec<Operation> {
        self.ops
    }
}
