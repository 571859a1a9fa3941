//! Integration of remote envelopes: `insert_logoot` and `remove_logoot`.
//!
//! Both work the same way at the top: range-query the tree around the
//! affected span, slice the touched runs into bands at the span edges,
//! mutate the bands, then repair anchors and conflict sets along the seam.

use std::ops::Bound;

use crate::bigint::LogootInt;
use crate::branch::BranchId;
use crate::list::operation::{Operation, OperationBuffer};
use crate::list::slice::slice_nodes_into_ranges;
use crate::list::ListDocumentModel;
use crate::node::{AnchorLogootNode, NodeType};
use crate::position::{Anchor, LogootPosition};
use crate::tree::NodeIdx;
use crate::Error;

/// One step of the fill walk: an existing run inside the new span, or the
/// structural placeholder that terminates the walk at the span's end so
/// the final gap gets flushed even when the span is empty.
enum SkipItem {
    Node(NodeIdx),
    Dummy(LogootPosition),
}

impl ListDocumentModel {
    /// Integrate a run of `length` fresh elements on `branch` between the
    /// logical bounds `left` and `right`, at clock `clk`. Returns the local
    /// edits to apply, in order.
    pub fn insert_logoot(
        &mut self,
        branch: BranchId,
        left: Option<&LogootPosition>,
        right: Option<&LogootPosition>,
        length: usize,
        clk: LogootInt,
    ) -> Result<Vec<Operation>, Error> {
        let start = LogootPosition::new_between(branch, length, left, right)?;
        let end = start.offset_lowest(length);

        // Everything the new run can touch: the band from just before the
        // left bound through the right bound, plus the nearest neighbour
        // on each side (a run can end inside the band while its key sits
        // before it).
        let lo = left.map(|l| l.inverse_offset_lowest(1));
        let q = self.tree.range_search(
            lo.as_ref().map(Bound::Included).unwrap_or(Bound::Unbounded),
            right.map(Bound::Included).unwrap_or(Bound::Unbounded),
        );
        let mut union: Vec<NodeIdx> = Vec::new();
        union.extend(q.lesser);
        union.extend(q.range.iter().copied());
        union.extend(q.greater);

        // Band edges. An outer bound only forms its own band when it
        // really sits outside the new span; a point insertion's bounds
        // sort past the nested span and collapse into the inner edges.
        let has_left = left.map_or(false, |l| *l < start);
        let has_right = right.map_or(false, |r| *r > end);
        let mut bounds: Vec<LogootPosition> = Vec::with_capacity(4);
        if has_left {
            bounds.push(left.unwrap().clone());
        }
        bounds.push(start.clone());
        bounds.push(end.clone());
        if has_right {
            bounds.push(right.unwrap().clone());
        }

        let groups = slice_nodes_into_ranges(&mut self.tree, &bounds, union)?;
        let skip_g = if has_left { 2 } else { 1 };
        let nc_left_g = skip_g - 1;
        let nc_right_g = skip_g + 1;

        // Anchor nodes: the data runs flush against the outer bounds.
        let anchor_left = left.and_then(|l| {
            groups[..=nc_left_g]
                .iter()
                .flatten()
                .rev()
                .copied()
                .find(|&i| self.tree[i].is_data() && self.tree[i].logoot_end() == *l)
        });
        let anchor_right = right.and_then(|r| {
            groups[nc_right_g..]
                .iter()
                .flatten()
                .copied()
                .find(|&i| self.tree[i].is_data() && self.tree[i].logoot_start == *r)
        });

        // --- Fill the span ---------------------------------------------
        // Walk the existing runs inside [start, end) on start's own atom
        // lattice. Gaps become fresh data runs; runs already present are
        // re-typed when our clock wins (replay and resurrection both land
        // here). Runs nested deeper or on another lattice pass through
        // untouched.
        let mut buf = OperationBuffer::new(length);
        let start_atom = start.lowest().atom.clone();
        let mut last_atom = start_atom.clone();
        // Same-lattice runs in walk order: (index, did we fill it).
        let mut chain: Vec<(NodeIdx, bool)> = Vec::new();
        let mut fresh: Vec<NodeIdx> = Vec::new();

        let items = groups[skip_g]
            .iter()
            .map(|&i| SkipItem::Node(i))
            .chain(std::iter::once(SkipItem::Dummy(end.clone())))
            .collect::<Vec<_>>();
        for item in items {
            let upto = match &item {
                SkipItem::Node(idx) => {
                    if !self.tree[*idx].logoot_start.same_run_level(&start) {
                        continue;
                    }
                    self.tree[*idx].logoot_start.lowest().atom.clone()
                }
                SkipItem::Dummy(pos) => pos.lowest().atom.clone(),
            };
            let gap = last_atom
                .gap_to(&upto)
                .to_usize()
                .ok_or(Error::Internal("fill walk ran backwards"))?;
            if gap > 0 {
                let src = start_atom
                    .gap_to(&last_atom)
                    .to_usize()
                    .ok_or(Error::Internal("fill offset out of range"))?;
                let node =
                    AnchorLogootNode::new_data(start.offset_lowest(src), gap, clk.clone());
                let fidx = self.tree.add(node)?;
                buf.insert(self.tree.ldoc_start(fidx), src, gap)?;
                chain.push((fidx, true));
                fresh.push(fidx);
            }
            let SkipItem::Node(idx) = item else { break };
            if self.tree[idx].clk <= clk {
                // Our clock wins: the run becomes (or stays) live with the
                // new content. On replay the remove/insert pair cancels
                // out on the caller's side.
                buf.remove(self.tree.ldoc_start(idx), self.tree[idx].ldoc_length());
                self.tree[idx].node_type = NodeType::Data;
                self.tree[idx].clk = clk.clone();
                self.tree.update_units(idx);
                let src = start_atom
                    .gap_to(&upto)
                    .to_usize()
                    .ok_or(Error::Internal("fill offset out of range"))?;
                buf.insert(self.tree.ldoc_start(idx), src, self.tree[idx].length)?;
                chain.push((idx, true));
            } else {
                // A concurrent higher-clock write holds these atoms.
                chain.push((idx, false));
            }
            last_atom = upto.offset(self.tree[idx].length);
        }

        // --- Link anchors along the chain ------------------------------
        let outer_left = match left {
            Some(l) => Anchor::Pos(l.clone()),
            None => Anchor::Start,
        };
        let outer_right = match right {
            Some(r) => Anchor::Pos(r.clone()),
            None => Anchor::End,
        };
        for i in 0..chain.len() {
            let (idx, is_filled) = chain[i];
            if !is_filled {
                continue;
            }
            let la = if i == 0 {
                outer_left.clone()
            } else {
                Anchor::Pos(self.tree[chain[i - 1].0].logoot_end())
            };
            self.tree[idx].reduce_left(&la);
            let ra = if i + 1 == chain.len() {
                outer_right.clone()
            } else {
                Anchor::Pos(self.tree[chain[i + 1].0].logoot_start.clone())
            };
            self.tree[idx].reduce_right(&ra);
        }

        // --- Conflicts across the seam ---------------------------------
        let nl_lesser = groups[nc_left_g].last().copied().or(anchor_left);
        let nl_greater = groups[nc_right_g].first().copied().or(anchor_right);

        let scan_of = |model: &Self, seed: Option<NodeIdx>| -> Vec<NodeIdx> {
            seed.map(|nl| {
                let mut v = vec![nl];
                v.extend(model.tree[nl].conflict_with.iter());
                v
            })
            .unwrap_or_default()
        };
        let scan_left = scan_of(self, nl_lesser);
        let scan_right = scan_of(self, nl_greater);

        let first_filled = chain.iter().find(|(_, f)| *f).map(|&(i, _)| i);
        let last_filled = chain.iter().rev().find(|(_, f)| *f).map(|&(i, _)| i);

        // Tighten the outer filled anchors against live neighbours the
        // envelope did not know about (reductions clamp, so this can only
        // move inward).
        if let Some(ff) = first_filled {
            for &c in &scan_left {
                if self.tree[c].is_data() && c != ff {
                    let e = Anchor::Pos(self.tree[c].logoot_end());
                    self.tree[ff].reduce_left(&e);
                }
            }
        }
        if let Some(lf) = last_filled {
            for &c in &scan_right {
                if self.tree[c].is_data() && c != lf {
                    let s = Anchor::Pos(self.tree[c].logoot_start.clone());
                    self.tree[lf].reduce_right(&s);
                }
            }
        }

        self.fill_range_conflicts(&chain, &scan_left, &scan_right);

        // Neighbour runs the new content landed inside of: everything in
        // nc_left past the fill's leftward reach conflicts with it.
        if let Some(ff) = first_filled {
            let stoppos = self.tree[ff].true_left().clone();
            for &t in groups[nc_left_g].iter().rev() {
                if Anchor::Pos(self.tree[t].logoot_end()) <= stoppos {
                    break;
                }
                self.tree[t].conflict_with.insert(ff);
            }
        }
        if let Some(lf) = last_filled {
            let stoppos = self.tree[lf].true_right().clone();
            for &t in groups[nc_right_g].iter() {
                if Anchor::Pos(self.tree[t].logoot_start.clone()) >= stoppos {
                    break;
                }
                self.tree[t].conflict_with.insert(lf);
            }
        }

        // --- Outer anchors step aside ----------------------------------
        // The runs flush against the bounds now abut the new content; their
        // old reach across it is gone, along with the conflicts it caused.
        if let Some(al) = anchor_left {
            self.tree[al].reduce_right(&Anchor::Pos(start.clone()));
            let mut cur = self.tree.successor(al);
            while let Some(n) = cur {
                if !self.tree[n].conflict_with.remove(al) {
                    break;
                }
                cur = self.tree.successor(n);
            }
        }
        if let Some(ar) = anchor_right {
            self.tree[ar].reduce_left(&Anchor::Pos(end.clone()));
            let mut cur = self.tree.predecessor(ar);
            while let Some(n) = cur {
                if !self.tree[n].conflict_with.remove(ar) {
                    break;
                }
                cur = self.tree.predecessor(n);
            }
        }

        // --- Anchor visibility through tombstones ----------------------
        let mut band: Vec<NodeIdx> = groups[skip_g].clone();
        band.extend(fresh);
        band.sort_by(|&a, &b| self.tree[a].logoot_start.cmp(&self.tree[b].logoot_start));
        let mut composite: Vec<NodeIdx> = Vec::with_capacity(band.len() + 2);
        composite.extend(nl_lesser);
        composite.extend(band);
        composite.extend(nl_greater);
        self.patch_removal_anchors(&composite);

        Ok(buf.into_ops())
    }

    /// Apply a removal of `length` atoms from `start` at clock `clk`.
    pub fn remove_logoot(
        &mut self,
        start: &LogootPosition,
        length: usize,
        clk: &LogootInt,
    ) -> Result<Vec<Operation>, Error> {
        if length == 0 {
            return Err(Error::InvalidArgument("cannot remove an empty run"));
        }
        let end = start.offset_lowest(length);

        let q = self
            .tree
            .range_search(Bound::Included(start), Bound::Excluded(&end));
        let mut union: Vec<NodeIdx> = Vec::new();
        union.extend(q.lesser);
        union.extend(q.range.iter().copied());
        union.extend(q.greater);

        let groups =
            slice_nodes_into_ranges(&mut self.tree, &[start.clone(), end.clone()], union)?;
        let mut lesser = groups[0].clone();
        let rm_range = groups[1].clone();
        let mut greater = groups[2].clone();

        let mut buf = OperationBuffer::new(0);
        for &idx in &rm_range {
            // Only runs on the removal's own nesting depth go; a deeper
            // concurrent insert inside the span stays live.
            if self.tree[idx].clk <= *clk && self.tree[idx].logoot_start.len() == start.len() {
                buf.remove(self.tree.ldoc_start(idx), self.tree[idx].ldoc_length());
                self.tree[idx].node_type = NodeType::Removal;
                self.tree[idx].clk = clk.clone();
                self.tree.update_units(idx);
            }
        }

        // Pull adjacent tombstones (up to the first live run) into the
        // patch window; their anchors take part in visibility repair.
        loop {
            match lesser.first().copied() {
                Some(i) if !self.tree[i].is_data() => match self.tree.predecessor(i) {
                    Some(p) => lesser.insert(0, p),
                    None => break,
                },
                Some(_) => break,
                None => {
                    let seed = rm_range.first().or(greater.first()).copied();
                    match seed.and_then(|s| self.tree.predecessor(s)) {
                        Some(p) => lesser.insert(0, p),
                        None => break,
                    }
                }
            }
        }
        loop {
            match greater.last().copied() {
                Some(i) if !self.tree[i].is_data() => match self.tree.successor(i) {
                    Some(s) => greater.push(s),
                    None => break,
                },
                Some(_) => break,
                None => {
                    let seed = rm_range.last().or(lesser.last()).copied();
                    match seed.and_then(|s| self.tree.successor(s)) {
                        Some(s) => greater.push(s),
                        None => break,
                    }
                }
            }
        }

        let mut composite = lesser;
        composite.extend(rm_range);
        composite.extend(greater);
        self.patch_new_removal_anchors(&composite);
        self.patch_removal_anchors(&composite);

        Ok(buf.into_ops())
    }

    /// Sweep the freshly integrated runs against the neighbours on each
    /// side, recording conflicts where anchor reaches overlap. Candidates
    /// that stop conflicting stop propagating.
    fn fill_range_conflicts(
        &mut self,
        chain: &[(NodeIdx, bool)],
        scan_left: &[NodeIdx],
        scan_right: &[NodeIdx],
    ) {
        // Forward: reaches coming from the left.
        let mut scan: Vec<NodeIdx> = scan_left.to_vec();
        for &(f, _) in chain {
            let f_start = self.tree[f].logoot_start.clone();
            scan.retain(|&c| c != f);
            let mut kept = Vec::new();
            for c in std::mem::take(&mut scan) {
                if self.tree[c].reaches_right_past(&f_start) {
                    self.tree[f].conflict_with.insert(c);
                    let c_end = self.tree[c].logoot_end();
                    if self.tree[f].reaches_left_past(&c_end) {
                        self.tree[c].conflict_with.insert(f);
                    }
                    kept.push(c);
                }
            }
            scan = kept;
            scan.push(f);
        }

        // Backward: reaches coming from the right.
        let mut scan: Vec<NodeIdx> = scan_right.to_vec();
        for &(f, _) in chain.iter().rev() {
            let f_end = self.tree[f].logoot_end();
            scan.retain(|&c| c != f);
            let mut kept = Vec::new();
            for c in std::mem::take(&mut scan) {
                if self.tree[c].reaches_left_past(&f_end) {
                    self.tree[f].conflict_with.insert(c);
                    let c_start = self.tree[c].logoot_start.clone();
                    if self.tree[f].reaches_right_past(&c_start) {
                        self.tree[c].conflict_with.insert(f);
                    }
                    kept.push(c);
                }
            }
            scan = kept;
            scan.push(f);
        }
    }

    /// Re-anchor fresh tombstones against the nearest live runs and drop
    /// live-run relations their retreating reach no longer justifies.
    fn patch_new_removal_anchors(&mut self, seq: &[NodeIdx]) {
        // Forward: live reaches meeting tombstone starts.
        let mut scan: Vec<NodeIdx> = Vec::new();
        for &n in seq {
            if self.tree[n].is_data() {
                scan.clear();
                scan.push(n);
                let live: Vec<NodeIdx> = self.tree[n]
                    .conflict_with
                    .iter()
                    .filter(|&c| self.tree[c].is_data())
                    .collect();
                scan.extend(live);
            } else {
                let n_start = self.tree[n].logoot_start.clone();
                for c in std::mem::take(&mut scan) {
                    match self.tree[c].true_right().clone() {
                        Anchor::Pos(p) if p <= n_start => {
                            if p == n_start {
                                let e = Anchor::Pos(self.tree[c].logoot_end());
                                self.tree[n].reduce_left(&e);
                            }
                            self.tree[n].conflict_with.remove(c);
                        }
                        _ => scan.push(c),
                    }
                }
            }
        }

        // Backward: live reaches meeting tombstone ends.
        let mut scan: Vec<NodeIdx> = Vec::new();
        for &n in seq.iter().rev() {
            if self.tree[n].is_data() {
                scan.clear();
                scan.push(n);
                let live: Vec<NodeIdx> = self.tree[n]
                    .conflict_with
                    .iter()
                    .filter(|&c| self.tree[c].is_data())
                    .collect();
                scan.extend(live);
            } else {
                let n_end = self.tree[n].logoot_end();
                for c in std::mem::take(&mut scan) {
                    match self.tree[c].true_left().clone() {
                        Anchor::Pos(p) if p >= n_end => {
                            if p == n_end {
                                let s = Anchor::Pos(self.tree[c].logoot_start.clone());
                                self.tree[n].reduce_right(&s);
                            }
                            self.tree[n].conflict_with.remove(c);
                        }
                        _ => scan.push(c),
                    }
                }
            }
        }
    }

    /// Two-direction scan keeping the rule: a live run's anchor visibility
    /// extends through the tombstones it conceptually spans.
    pub(crate) fn patch_removal_anchors(&mut self, seq: &[NodeIdx]) {
        // Forward pass: right anchors push through tombstones.
        let mut scan: Vec<NodeIdx> = Vec::new();
        for &n in seq {
            if self.tree[n].is_data() {
                scan.clear();
                scan.push(n);
                scan.extend(self.tree[n].conflict_with.iter());
                scan.retain(|&s| !matches!(self.tree[s].true_right(), Anchor::End));
            } else {
                let n_start = self.tree[n].logoot_start.clone();
                let n_end = self.tree[n].logoot_end();
                for s in std::mem::take(&mut scan) {
                    let apos = self.tree[s].true_right().clone();
                    let Anchor::Pos(p) = apos else { continue };
                    if p < n_start {
                        // Never reached this far.
                        continue;
                    }
                    if p < n_end {
                        self.tree[s].right_anchor = Anchor::Pos(n_end.clone());
                        self.tree[n].conflict_with.insert(s);
                    }
                    scan.push(s);
                }
            }
        }

        // Backward pass: left anchors, mirrored.
        let mut scan: Vec<NodeIdx> = Vec::new();
        for &n in seq.iter().rev() {
            if self.tree[n].is_data() {
                scan.clear();
                scan.push(n);
                scan.extend(self.tree[n].conflict_with.iter());
                scan.retain(|&s| !matches!(self.tree[s].true_left(), Anchor::Start));
            } else {
                let n_start = self.tree[n].logoot_start.clone();
                let n_end = self.tree[n].logoot_end();
                for s in std::mem::take(&mut scan) {
                    let apos = self.tree[s].true_left().clone();
                    let Anchor::Pos(p) = apos else { continue };
                    if p > n_end {
                        continue;
                    }
                    if p > n_start {
                        self.tree[s].left_anchor = Anchor::Pos(n_start.clone());
                        self.tree[n].conflict_with.insert(s);
                    }
                    scan.push(s);
                }
            }
        }
    }
}
