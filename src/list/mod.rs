//! The list document model: anchored Logoot runs in an order-statistic
//! tree, translating between logical envelopes and local offset edits.

use std::fmt;

use crate::bigint::LogootInt;
use crate::branch::{BranchId, BranchOrder};
use crate::position::LogootPosition;
use crate::tree::PositionTree;
use crate::Error;

mod check;
mod merge;
pub mod operation;
mod slice;

pub use operation::Operation;

/// The logical envelope a local insertion turns into: generate `length`
/// positions between `left` and `right` at clock `clk`. Absent bounds are
/// the document edges. This is what gets shipped to peers.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InsertEnvelope {
    pub left: Option<LogootPosition>,
    pub right: Option<LogootPosition>,
    pub clk: LogootInt,
    pub length: usize,
}

/// Snapshot of one run, as reported by [`ListDocumentModel::runs`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunView {
    pub start: LogootPosition,
    pub length: usize,
    pub node_type: crate::node::NodeType,
    pub clk: LogootInt,
    pub ldoc_start: usize,
}

/// A replicated list document.
///
/// The model tracks positions and offsets only; content lives with the
/// caller, which applies the returned [`Operation`]s to its own store.
#[derive(Clone, Default)]
pub struct ListDocumentModel {
    pub(crate) tree: PositionTree,
    branches: BranchOrder,
}

impl ListDocumentModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Local length of the materialized document.
    pub fn len(&self) -> usize {
        self.tree.total_units()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn branches(&self) -> &BranchOrder {
        &self.branches
    }

    pub fn branches_mut(&mut self) -> &mut BranchOrder {
        &mut self.branches
    }

    /// Translate "insert `length` elements at local offset `start`" into a
    /// logical envelope. The model itself is not changed; integrating the
    /// envelope (locally or remotely) goes through [`Self::insert_logoot`].
    pub fn insert_local(&self, start: usize, length: usize) -> Result<InsertEnvelope, Error> {
        if length == 0 {
            return Err(Error::InvalidArgument("cannot insert an empty run"));
        }
        if start > self.len() {
            return Err(Error::InvalidArgument("insert offset beyond document"));
        }

        let q = self.tree.local_search(start);

        // New content must dominate any tombstone sitting at the offset,
        // or a concurrent removal would swallow it.
        let clk = q
            .lesser
            .iter()
            .filter(|&&i| !self.tree[i].is_data())
            .map(|&i| &self.tree[i].clk)
            .max()
            .map(|c| c.incremented())
            .unwrap_or_default();

        let mut lesser_data = None;
        for &i in &q.lesser {
            if self.tree[i].is_data() {
                if lesser_data.is_some() {
                    return Err(Error::Internal("two data runs touch one local offset"));
                }
                lesser_data = Some(i);
            }
        }

        if let Some(i) = lesser_data {
            let s = self.tree.ldoc_start(i);
            if s + self.tree[i].ldoc_length() > start {
                // Splitting a run: the insertion is pinned to a single
                // point inside it.
                let at = self.tree[i].logoot_start.offset_lowest(start - s);
                return Ok(InsertEnvelope {
                    left: Some(at.clone()),
                    right: Some(at),
                    clk,
                    length,
                });
            }
        }

        let left = lesser_data.map(|i| self.tree[i].logoot_end());
        let right = q
            .greater
            .iter()
            .copied()
            .find(|&i| self.tree[i].is_data())
            .map(|i| self.tree[i].logoot_start.clone());

        Ok(InsertEnvelope {
            left,
            right,
            clk,
            length,
        })
    }

    /// Integrate an envelope produced by [`Self::insert_local`] (locally or
    /// on a peer) on behalf of `branch`.
    pub fn insert_envelope(
        &mut self,
        branch: BranchId,
        env: &InsertEnvelope,
    ) -> Result<Vec<Operation>, Error> {
        self.insert_logoot(
            branch,
            env.left.as_ref(),
            env.right.as_ref(),
            env.length,
            env.clk.clone(),
        )
    }

    /// Every run in key order. Debugging / test helper.
    pub fn runs(&self) -> Vec<RunView> {
        let mut out = Vec::new();
        self.tree.operate_on_all(|idx, n| {
            out.push(RunView {
                start: n.logoot_start.clone(),
                length: n.length,
                node_type: n.node_type,
                clk: n.clk.clone(),
                ldoc_start: self.tree.ldoc_start(idx),
            });
        });
        out
    }

    /// The conflict partners of the run keyed exactly at `at`, as sorted
    /// positions. Debugging / test helper.
    pub fn conflict_positions(&self, at: &LogootPosition) -> Option<Vec<LogootPosition>> {
        let mut found = None;
        self.tree.operate_on_all(|idx, n| {
            if n.logoot_start == *at {
                found = Some(idx);
            }
        });
        let idx = found?;
        let mut out: Vec<LogootPosition> = self.tree[idx]
            .conflict_with
            .iter()
            .map(|c| self.tree[c].logoot_start.clone())
            .collect();
        out.sort();
        Some(out)
    }

    /// Clock of the run keyed exactly at `at`. Debugging / test helper.
    pub fn clock_at(&self, at: &LogootPosition) -> Option<LogootInt> {
        let mut found = None;
        self.tree.operate_on_all(|_, n| {
            if n.logoot_start == *at {
                found = Some(n.clk.clone());
            }
        });
        found
    }
}

/// Replica equality: same runs, types, clocks, anchors and conflict
/// relations in the same order. Conflict sets are compared through the
/// positions of their members since arena indices differ between replicas.
impl PartialEq for ListDocumentModel {
    fn eq(&self, other: &Self) -> bool {
        let fingerprint = |model: &ListDocumentModel| {
            let mut out = Vec::new();
            model.tree.operate_on_all(|_, n| {
                let mut conflicts: Vec<LogootPosition> = n
                    .conflict_with
                    .iter()
                    .map(|c| model.tree[c].logoot_start.clone())
                    .collect();
                conflicts.sort();
                out.push((
                    n.logoot_start.clone(),
                    n.length,
                    n.node_type,
                    n.clk.clone(),
                    n.left_anchor.clone(),
                    n.right_anchor.clone(),
                    conflicts,
                ));
            });
            out
        };
        fingerprint(self) == fingerprint(other)
    }
}

impl Eq for ListDocumentModel {}

impl fmt::Debug for ListDocumentModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListDocumentModel")
            .field("len", &self.len())
            .field("tree", &self.tree)
            .finish()
    }
}
