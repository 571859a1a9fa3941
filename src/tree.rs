use std::fmt;
use std::ops::{Bound, Index, IndexMut};

use crate::node::AnchorLogootNode;
use crate::position::LogootPosition;
use crate::Error;

/// Arena index of a tree node. Slots are never freed (runs are never
/// deleted, only re-typed), so an index stays valid for the life of the
/// tree; conflict sets and patch passes lean on that.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeIdx(u32);

impl Default for NodeIdx {
    fn default() -> Self {
        NodeIdx(u32::MAX)
    }
}

impl NodeIdx {
    const NONE: NodeIdx = NodeIdx(u32::MAX);

    fn exists(self) -> bool {
        self.0 != u32::MAX
    }

    fn opt(self) -> Option<NodeIdx> {
        if self.exists() {
            Some(self)
        } else {
            None
        }
    }
}

impl fmt::Debug for NodeIdx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.exists() {
            write!(f, "n{}", self.0)
        } else {
            f.write_str("n-")
        }
    }
}

#[derive(Clone, Debug)]
struct Slot {
    node: AnchorLogootNode,
    parent: NodeIdx,
    left: NodeIdx,
    right: NodeIdx,
    height: u8,
    /// Sum of `ldoc_length` over this slot and both subtrees.
    subtree_units: usize,
}

/// Result of a key-range query: the nearest node on each side plus the
/// nodes inside the range, all in key order. The predecessor matters even
/// for interval questions — a run can *end* inside the range while its key
/// (the start) sits before it.
#[derive(Debug, Default)]
pub struct RangeQuery {
    pub lesser: Option<NodeIdx>,
    pub range: Vec<NodeIdx>,
    pub greater: Option<NodeIdx>,
}

/// Nodes touching a local offset, split by side. `lesser` holds runs
/// ending at the offset (tombstones there have zero extent and count) plus
/// at most one data run spanning it strictly; `greater` holds runs with
/// positive extent starting at it.
#[derive(Debug, Default)]
pub struct LocalQuery {
    pub lesser: Vec<NodeIdx>,
    pub greater: Vec<NodeIdx>,
}

/// Order-statistic tree over anchored runs: an AVL tree keyed by
/// `logoot_start`, augmented with subtree sums of local lengths so local
/// offsets derive from the structure instead of being stored.
#[derive(Clone, Default)]
pub struct PositionTree {
    slots: Vec<Slot>,
    root: NodeIdx,
}

impl Index<NodeIdx> for PositionTree {
    type Output = AnchorLogootNode;
    fn index(&self, idx: NodeIdx) -> &AnchorLogootNode {
        &self.slots[idx.0 as usize].node
    }
}

impl IndexMut<NodeIdx> for PositionTree {
    fn index_mut(&mut self, idx: NodeIdx) -> &mut AnchorLogootNode {
        &mut self.slots[idx.0 as usize].node
    }
}

impl PositionTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        !self.root.exists()
    }

    pub fn node_count(&self) -> usize {
        self.slots.len()
    }

    /// Total local length of the document.
    pub fn total_units(&self) -> usize {
        self.units(self.root)
    }

    fn slot(&self, idx: NodeIdx) -> &Slot {
        &self.slots[idx.0 as usize]
    }

    fn slot_mut(&mut self, idx: NodeIdx) -> &mut Slot {
        &mut self.slots[idx.0 as usize]
    }

    fn height(&self, idx: NodeIdx) -> u8 {
        if idx.exists() {
            self.slot(idx).height
        } else {
            0
        }
    }

    fn units(&self, idx: NodeIdx) -> usize {
        if idx.exists() {
            self.slot(idx).subtree_units
        } else {
            0
        }
    }

    fn refresh(&mut self, idx: NodeIdx) {
        let (l, r) = {
            let s = self.slot(idx);
            (s.left, s.right)
        };
        let height = 1 + self.height(l).max(self.height(r));
        let units = self.units(l) + self.units(r) + self.slot(idx).node.ldoc_length();
        let s = self.slot_mut(idx);
        s.height = height;
        s.subtree_units = units;
    }

    fn balance_factor(&self, idx: NodeIdx) -> i16 {
        let s = self.slot(idx);
        self.height(s.left) as i16 - self.height(s.right) as i16
    }

    fn replace_child(&mut self, parent: NodeIdx, old: NodeIdx, new: NodeIdx) {
        if new.exists() {
            self.slot_mut(new).parent = parent;
        }
        if parent.exists() {
            let p = self.slot_mut(parent);
            if p.left == old {
                p.left = new;
            } else {
                debug_assert_eq!(p.right, old);
                p.right = new;
            }
        } else {
            self.root = new;
        }
    }

    /// Left rotation around `idx`. Aggregates are refreshed here, in the
    /// same routine as the structural change.
    fn rotate_left(&mut self, idx: NodeIdx) {
        let parent = self.slot(idx).parent;
        let pivot = self.slot(idx).right;
        let inner = self.slot(pivot).left;

        self.slot_mut(idx).right = inner;
        if inner.exists() {
            self.slot_mut(inner).parent = idx;
        }
        self.slot_mut(pivot).left = idx;
        self.slot_mut(idx).parent = pivot;
        self.replace_child(parent, idx, pivot);

        self.refresh(idx);
        self.refresh(pivot);
    }

    fn rotate_right(&mut self, idx: NodeIdx) {
        let parent = self.slot(idx).parent;
        let pivot = self.slot(idx).left;
        let inner = self.slot(pivot).right;

        self.slot_mut(idx).left = inner;
        if inner.exists() {
            self.slot_mut(inner).parent = idx;
        }
        self.slot_mut(pivot).right = idx;
        self.slot_mut(idx).parent = pivot;
        self.replace_child(parent, idx, pivot);

        self.refresh(idx);
        self.refresh(pivot);
    }

    fn rebalance_from(&mut self, start: NodeIdx) {
        let mut cur = start;
        while cur.exists() {
            self.refresh(cur);
            let bf = self.balance_factor(cur);
            if bf > 1 {
                let left = self.slot(cur).left;
                if self.balance_factor(left) < 0 {
                    self.rotate_left(left);
                }
                self.rotate_right(cur);
                cur = self.slot(cur).parent;
            } else if bf < -1 {
                let right = self.slot(cur).right;
                if self.balance_factor(right) > 0 {
                    self.rotate_right(right);
                }
                self.rotate_left(cur);
                cur = self.slot(cur).parent;
            }
            cur = self.slot(cur).parent;
        }
    }

    /// Insert a run, keeping key order and aggregates. Keys are unique by
    /// construction; a duplicate is a corrupted merge.
    pub fn add(&mut self, node: AnchorLogootNode) -> Result<NodeIdx, Error> {
        let idx = NodeIdx(self.slots.len() as u32);
        debug_assert!(idx.exists(), "arena full");

        let mut parent = NodeIdx::NONE;
        let mut cur = self.root;
        let mut went_left = false;
        while cur.exists() {
            parent = cur;
            match node.logoot_start.cmp(&self.slot(cur).node.logoot_start) {
                std::cmp::Ordering::Less => {
                    went_left = true;
                    cur = self.slot(cur).left;
                }
                std::cmp::Ordering::Greater => {
                    went_left = false;
                    cur = self.slot(cur).right;
                }
                std::cmp::Ordering::Equal => {
                    return Err(Error::Internal("duplicate logoot_start in tree"));
                }
            }
        }

        let units = node.ldoc_length();
        self.slots.push(Slot {
            node,
            parent,
            left: NodeIdx::NONE,
            right: NodeIdx::NONE,
            height: 1,
            subtree_units: units,
        });

        if parent.exists() {
            if went_left {
                self.slot_mut(parent).left = idx;
            } else {
                self.slot_mut(parent).right = idx;
            }
            self.rebalance_from(parent);
        } else {
            self.root = idx;
        }
        Ok(idx)
    }

    /// Propagate an `ldoc_length` change of `idx` (a re-typed run) into the
    /// ancestor aggregates. This is the local-space shift every later run
    /// observes through its derived `ldoc_start`.
    pub fn update_units(&mut self, idx: NodeIdx) {
        let mut cur = idx;
        while cur.exists() {
            self.refresh(cur);
            cur = self.slot(cur).parent;
        }
    }

    /// Local offset of the run's first element: left subtree total plus
    /// every left-ancestor contribution.
    pub fn ldoc_start(&self, idx: NodeIdx) -> usize {
        let mut acc = self.units(self.slot(idx).left);
        let mut cur = idx;
        let mut parent = self.slot(cur).parent;
        while parent.exists() {
            if self.slot(parent).right == cur {
                acc += self.units(self.slot(parent).left) + self.slot(parent).node.ldoc_length();
            }
            cur = parent;
            parent = self.slot(cur).parent;
        }
        acc
    }

    pub fn ldoc_end(&self, idx: NodeIdx) -> usize {
        self.ldoc_start(idx) + self[idx].ldoc_length()
    }

    fn leftmost(&self, mut idx: NodeIdx) -> NodeIdx {
        while self.slot(idx).left.exists() {
            idx = self.slot(idx).left;
        }
        idx
    }

    fn rightmost(&self, mut idx: NodeIdx) -> NodeIdx {
        while self.slot(idx).right.exists() {
            idx = self.slot(idx).right;
        }
        idx
    }

    pub fn first(&self) -> Option<NodeIdx> {
        self.root.opt().map(|r| self.leftmost(r))
    }

    pub fn last(&self) -> Option<NodeIdx> {
        self.root.opt().map(|r| self.rightmost(r))
    }

    pub fn successor(&self, idx: NodeIdx) -> Option<NodeIdx> {
        let right = self.slot(idx).right;
        if right.exists() {
            return Some(self.leftmost(right));
        }
        let mut cur = idx;
        let mut parent = self.slot(cur).parent;
        while parent.exists() {
            if self.slot(parent).left == cur {
                return Some(parent);
            }
            cur = parent;
            parent = self.slot(cur).parent;
        }
        None
    }

    pub fn predecessor(&self, idx: NodeIdx) -> Option<NodeIdx> {
        let left = self.slot(idx).left;
        if left.exists() {
            return Some(self.rightmost(left));
        }
        let mut cur = idx;
        let mut parent = self.slot(cur).parent;
        while parent.exists() {
            if self.slot(parent).right == cur {
                return Some(parent);
            }
            cur = parent;
            parent = self.slot(cur).parent;
        }
        None
    }

    /// In-order visit.
    pub fn operate_on_all(&self, mut f: impl FnMut(NodeIdx, &AnchorLogootNode)) {
        let mut cur = self.first();
        while let Some(idx) = cur {
            f(idx, &self[idx]);
            cur = self.successor(idx);
        }
    }

    fn key_satisfies_low(&self, idx: NodeIdx, lo: &Bound<&LogootPosition>) -> bool {
        let key = &self[idx].logoot_start;
        match lo {
            Bound::Unbounded => true,
            Bound::Included(p) => key >= *p,
            Bound::Excluded(p) => key > *p,
        }
    }

    fn key_satisfies_high(&self, idx: NodeIdx, hi: &Bound<&LogootPosition>) -> bool {
        let key = &self[idx].logoot_start;
        match hi {
            Bound::Unbounded => true,
            Bound::Included(p) => key <= *p,
            Bound::Excluded(p) => key < *p,
        }
    }

    /// First in-order node whose key satisfies the low bound.
    fn lower_node(&self, lo: &Bound<&LogootPosition>) -> Option<NodeIdx> {
        let mut best = None;
        let mut cur = self.root;
        while cur.exists() {
            if self.key_satisfies_low(cur, lo) {
                best = Some(cur);
                cur = self.slot(cur).left;
            } else {
                cur = self.slot(cur).right;
            }
        }
        best
    }

    /// Key-range query with the nearest neighbour on each side.
    pub fn range_search(
        &self,
        lo: Bound<&LogootPosition>,
        hi: Bound<&LogootPosition>,
    ) -> RangeQuery {
        let mut out = RangeQuery::default();
        let Some(first) = self.lower_node(&lo) else {
            out.lesser = self.last();
            return out;
        };
        out.lesser = self.predecessor(first);
        let mut cur = Some(first);
        while let Some(idx) = cur {
            if !self.key_satisfies_high(idx, &hi) {
                out.greater = Some(idx);
                break;
            }
            out.range.push(idx);
            cur = self.successor(idx);
        }
        out
    }

    /// First in-order node with `ldoc_end >= point`. In-order local ends
    /// are non-decreasing, so the descent can use the aggregates.
    fn first_ldoc_end_at_least(&self, point: usize) -> Option<NodeIdx> {
        if !self.root.exists() || self.total_units() < point {
            return None;
        }
        let mut cur = self.root;
        let mut acc = 0usize;
        let mut best = None;
        while cur.exists() {
            let left = self.slot(cur).left;
            let left_units = self.units(left);
            if acc + left_units >= point {
                // Somewhere in the left subtree (or this node).
                best = Some(cur);
                cur = left;
            } else if acc + left_units + self.slot(cur).node.ldoc_length() >= point {
                return Some(cur);
            } else {
                acc += left_units + self.slot(cur).node.ldoc_length();
                cur = self.slot(cur).right;
            }
        }
        best
    }

    /// All nodes touching local offset `point`, bucketed by side.
    pub fn local_search(&self, point: usize) -> LocalQuery {
        let mut out = LocalQuery::default();
        let mut cur = self.first_ldoc_end_at_least(point);
        while let Some(idx) = cur {
            let start = self.ldoc_start(idx);
            if start > point {
                break;
            }
            let end = start + self[idx].ldoc_length();
            if end == point || (start < point && end > point) {
                out.lesser.push(idx);
            } else if start == point && end > point {
                out.greater.push(idx);
            }
            cur = self.successor(idx);
        }
        out
    }

    /// Structural and aggregate self-test.
    pub fn check(&self) -> Result<(), Error> {
        if !self.root.exists() {
            return Ok(());
        }
        if self.slot(self.root).parent.exists() {
            return Err(Error::Fatal("root has a parent"));
        }
        self.check_subtree(self.root)?;
        Ok(())
    }

    fn check_subtree(&self, idx: NodeIdx) -> Result<(u8, usize), Error> {
        let s = self.slot(idx);
        let mut units = s.node.ldoc_length();
        let mut lh = 0;
        let mut rh = 0;
        if s.left.exists() {
            if self.slot(s.left).parent != idx {
                return Err(Error::Fatal("broken parent link"));
            }
            if self.slot(s.left).node.logoot_start >= s.node.logoot_start {
                return Err(Error::Fatal("left child out of order"));
            }
            let (h, u) = self.check_subtree(s.left)?;
            lh = h;
            units += u;
        }
        if s.right.exists() {
            if self.slot(s.right).parent != idx {
                return Err(Error::Fatal("broken parent link"));
            }
            if self.slot(s.right).node.logoot_start <= s.node.logoot_start {
                return Err(Error::Fatal("right child out of order"));
            }
            let (h, u) = self.check_subtree(s.right)?;
            rh = h;
            units += u;
        }
        let height = 1 + lh.max(rh);
        if height != s.height {
            return Err(Error::Fatal("stale height"));
        }
        if (lh as i16 - rh as i16).abs() > 1 {
            return Err(Error::Fatal("unbalanced subtree"));
        }
        if units != s.subtree_units {
            return Err(Error::Fatal("stale subtree units"));
        }
        Ok((height, units))
    }
}

impl fmt::Debug for PositionTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        self.operate_on_all(|idx, node| {
            list.entry(&(idx, self.ldoc_start(idx), node));
        });
        list.finish()
    }
}
