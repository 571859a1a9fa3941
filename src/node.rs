use std::fmt;

use rle::{HasLength, MergableSpan, SplitableSpanHelpers};
use smallvec::SmallVec;

use crate::bigint::LogootInt;
use crate::position::{Anchor, LogootPosition};
use crate::tree::NodeIdx;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NodeType {
    /// Live elements occupying local document space.
    Data,
    /// Tombstone. Keeps its logical span, occupies no local space.
    Removal,
    /// Transient merge placeholder. Never stored in the tree.
    Dummy,
}

/// Set of node indices this node is in conflict with. Kept sorted so set
/// contents compare independently of insertion order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConflictSet(SmallVec<[NodeIdx; 2]>);

impl ConflictSet {
    pub fn insert(&mut self, idx: NodeIdx) -> bool {
        match self.0.binary_search(&idx) {
            Ok(_) => false,
            Err(at) => {
                self.0.insert(at, idx);
                true
            }
        }
    }

    pub fn remove(&mut self, idx: NodeIdx) -> bool {
        match self.0.binary_search(&idx) {
            Ok(at) => {
                self.0.remove(at);
                true
            }
            Err(_) => false,
        }
    }

    pub fn contains(&self, idx: NodeIdx) -> bool {
        self.0.binary_search(&idx).is_ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = NodeIdx> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A maximal run of contiguous logical positions.
///
/// The run covers `length` lowest-level atoms from `logoot_start`. Anchors
/// record the logical neighbours the run was inserted between; they only
/// ever move inward (see `reduce_left`/`reduce_right`), except that the
/// removal patch passes re-extend them across tombstones.
#[derive(Clone, PartialEq, Eq)]
pub struct AnchorLogootNode {
    pub logoot_start: LogootPosition,
    pub length: usize,
    pub node_type: NodeType,
    /// Removal clock: the highest clock that has authoritatively updated
    /// this run. Higher clocks win.
    pub clk: LogootInt,
    pub left_anchor: Anchor,
    pub right_anchor: Anchor,
    pub conflict_with: ConflictSet,
}

impl AnchorLogootNode {
    /// A fresh run with edge anchors; the merge pass reduces them.
    pub fn new_data(logoot_start: LogootPosition, length: usize, clk: LogootInt) -> Self {
        debug_assert!(length >= 1);
        AnchorLogootNode {
            logoot_start,
            length,
            node_type: NodeType::Data,
            clk,
            left_anchor: Anchor::Start,
            right_anchor: Anchor::End,
            conflict_with: ConflictSet::default(),
        }
    }

    pub fn logoot_end(&self) -> LogootPosition {
        self.logoot_start.offset_lowest(self.length)
    }

    pub fn is_data(&self) -> bool {
        self.node_type == NodeType::Data
    }

    /// Local space the run occupies. Tombstones and dummies occupy none.
    pub fn ldoc_length(&self) -> usize {
        match self.node_type {
            NodeType::Data => self.length,
            _ => 0,
        }
    }

    /// The surviving anchors. Stored values either way; the patch passes
    /// decide what a tombstone makes visible.
    pub fn true_left(&self) -> &Anchor {
        &self.left_anchor
    }

    pub fn true_right(&self) -> &Anchor {
        &self.right_anchor
    }

    /// Move the left anchor rightward to `to`, clamping at the run's own
    /// start so the anchor stays tight.
    pub fn reduce_left(&mut self, to: &Anchor) {
        let capped = if *to > self.logoot_start {
            Anchor::Pos(self.logoot_start.clone())
        } else {
            to.clone()
        };
        if capped > self.left_anchor {
            self.left_anchor = capped;
        }
    }

    /// Move the right anchor leftward to `to`, clamping at the run's end.
    pub fn reduce_right(&mut self, to: &Anchor) {
        let end = self.logoot_end();
        let capped = if *to < end { Anchor::Pos(end) } else { to.clone() };
        if capped < self.right_anchor {
            self.right_anchor = capped;
        }
    }

    /// With `self` ordered before `other`: does self's rightward reach
    /// cross other's start? One direction of the conflict relation.
    pub fn reaches_right_past(&self, other_start: &LogootPosition) -> bool {
        match self.true_right() {
            Anchor::End => true,
            Anchor::Start => false,
            Anchor::Pos(p) => p > other_start,
        }
    }

    /// With `self` ordered after `other` (whose end is `other_end`): does
    /// self's leftward reach cross it? The other direction.
    pub fn reaches_left_past(&self, other_end: &LogootPosition) -> bool {
        match self.true_left() {
            Anchor::Start => true,
            Anchor::End => false,
            Anchor::Pos(p) => p < other_end,
        }
    }
}

impl HasLength for AnchorLogootNode {
    fn len(&self) -> usize {
        self.length
    }
}

impl SplitableSpanHelpers for AnchorLogootNode {
    fn truncate_h(&mut self, at: usize) -> Self {
        debug_assert!(at > 0 && at < self.length);
        let rem_start = self.logoot_start.offset_lowest(at);
        let rem = AnchorLogootNode {
            logoot_start: rem_start.clone(),
            length: self.length - at,
            node_type: self.node_type,
            clk: self.clk.clone(),
            // Inner edges are tight; the halves abut and claim nothing
            // across the cut. Outer anchors stay with their half.
            left_anchor: Anchor::Pos(rem_start),
            right_anchor: self.right_anchor.clone(),
            conflict_with: self.conflict_with.clone(),
        };
        self.length = at;
        self.right_anchor = Anchor::Pos(self.logoot_end());
        rem
    }
}

impl MergableSpan for AnchorLogootNode {
    fn can_append(&self, other: &Self) -> bool {
        self.node_type == other.node_type
            && self.node_type != NodeType::Dummy
            && self.clk == other.clk
            && self.logoot_start.same_run_level(&other.logoot_start)
            && self.logoot_end() == other.logoot_start
            && self.right_anchor == Anchor::Pos(other.logoot_start.clone())
            && other.left_anchor == Anchor::Pos(other.logoot_start.clone())
            && self.conflict_with == other.conflict_with
    }

    fn append(&mut self, other: Self) {
        self.length += other.length;
        self.right_anchor = other.right_anchor;
    }
}

impl fmt::Debug for AnchorLogootNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} {:?}+{} clk={} <{:?}|{:?}>",
            self.node_type,
            self.logoot_start,
            self.length,
            self.clk,
            self.left_anchor,
            self.right_anchor
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::branch::BranchId;
    use rle::{test_splitable_methods_valid, SplitableSpan};

    const A: BranchId = BranchId(0);

    fn node(start: i64, len: usize) -> AnchorLogootNode {
        AnchorLogootNode::new_data(
            LogootPosition::single(LogootInt::new(start), A),
            len,
            LogootInt::zero(),
        )
    }

    #[test]
    fn derived_end() {
        let n = node(3, 4);
        assert_eq!(n.logoot_end(), LogootPosition::single(LogootInt::new(7), A));
        assert_eq!(n.ldoc_length(), 4);
    }

    #[test]
    fn reduce_clamps_at_edges() {
        let mut n = node(5, 3);
        let before = Anchor::Pos(LogootPosition::single(LogootInt::new(2), A));
        n.reduce_left(&before);
        assert_eq!(n.left_anchor, before);
        // A reduction past the start leaves the anchor tight.
        let inside = Anchor::Pos(LogootPosition::single(LogootInt::new(6), A));
        n.reduce_left(&inside);
        assert_eq!(
            n.left_anchor,
            Anchor::Pos(LogootPosition::single(LogootInt::new(5), A))
        );
        // Widening is a no-op.
        n.reduce_left(&Anchor::Start);
        assert_ne!(n.left_anchor, Anchor::Start);

        let mut n = node(5, 3);
        n.reduce_right(&Anchor::Pos(LogootPosition::single(LogootInt::new(4), A)));
        assert_eq!(
            n.right_anchor,
            Anchor::Pos(LogootPosition::single(LogootInt::new(8), A))
        );
    }

    #[test]
    fn reach_predicates() {
        let mut p = node(0, 2);
        let n = node(5, 1);
        assert!(p.reaches_right_past(&n.logoot_start)); // DocEnd reaches all
        p.reduce_right(&Anchor::Pos(n.logoot_start.clone()));
        assert!(!p.reaches_right_past(&n.logoot_start)); // abutting, no reach
    }

    #[test]
    fn splitable() {
        let mut n = node(0, 6);
        // Anchors as a mid-document run would carry them.
        n.left_anchor = Anchor::Pos(LogootPosition::single(LogootInt::new(-4), A));
        n.right_anchor = Anchor::Pos(LogootPosition::single(LogootInt::new(9), A));
        test_splitable_methods_valid(n);
    }

    #[test]
    fn split_keeps_outer_anchors() {
        let mut n = node(0, 6);
        n.right_anchor = Anchor::End;
        let rem = n.truncate(2);
        assert_eq!(n.length, 2);
        assert_eq!(n.right_anchor, Anchor::Pos(n.logoot_end()));
        assert_eq!(rem.length, 4);
        assert_eq!(rem.left_anchor, Anchor::Pos(rem.logoot_start.clone()));
        assert_eq!(rem.right_anchor, Anchor::End);
    }
}
