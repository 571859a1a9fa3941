//! Partitioning sorted node sets at boundary positions.
//!
//! A merge works on bands of the key space ("before the left anchor",
//! "inside the new run", ...). Runs straddling a band edge are split into
//! two tree nodes so every node lands wholly inside one band.

use std::cmp::Ordering;

use rle::SplitableSpan;

use crate::position::LogootPosition;
use crate::tree::{NodeIdx, PositionTree};
use crate::Error;

/// Number of the node's atoms that sort strictly below `boundary`.
///
/// Only meaningful when `boundary` sorts inside the node's span, which
/// forces it to share the node's prefix down to the node's lowest level.
fn atoms_below(tree: &PositionTree, idx: NodeIdx, boundary: &LogootPosition) -> usize {
    let node = &tree[idx];
    let d = node.logoot_start.len();
    debug_assert!(boundary.len() >= d);
    let diff = node.logoot_start.l(d - 1).gap_to(boundary.l(d - 1));
    debug_assert!(!diff.is_negative());
    let mut off = 0usize;
    while off < node.length && diff.cmp_usize(off) == Ordering::Greater {
        off += 1;
    }
    if off >= node.length {
        return node.length;
    }
    // The atom sharing the boundary's value: a full comparison settles
    // which side of the cut it belongs to (branch rank, deeper levels).
    if node.logoot_start.offset_lowest(off) < *boundary {
        off + 1
    } else {
        off
    }
}

/// Split the run at atom offset `at`, keeping the left part in place and
/// adding the right part as a fresh tree node. Conflict membership is
/// re-derived for both halves from the members' reach, in both directions.
pub(crate) fn split_node(
    tree: &mut PositionTree,
    idx: NodeIdx,
    at: usize,
) -> Result<NodeIdx, Error> {
    debug_assert!(at > 0 && at < tree[idx].length);
    let rem = tree[idx].truncate(at);
    tree.update_units(idx);
    let ridx = tree.add(rem)?;

    let members: Vec<NodeIdx> = tree[idx].conflict_with.iter().collect();
    for c in members {
        for h in [idx, ridx] {
            let (c_into_h, h_into_c) = {
                let cn = &tree[c];
                let hn = &tree[h];
                if cn.logoot_start < hn.logoot_start {
                    (
                        cn.reaches_right_past(&hn.logoot_start),
                        hn.reaches_left_past(&cn.logoot_end()),
                    )
                } else {
                    (
                        cn.reaches_left_past(&hn.logoot_end()),
                        hn.reaches_right_past(&cn.logoot_start),
                    )
                }
            };
            if c_into_h {
                tree[h].conflict_with.insert(c);
            } else {
                tree[h].conflict_with.remove(c);
            }
            if h_into_c {
                tree[c].conflict_with.insert(h);
            } else {
                tree[c].conflict_with.remove(h);
            }
        }
    }

    // Nodes past the cut may hold the run one-directionally (its old right
    // reach crossed their start). That reach now belongs to the right
    // half; re-home those memberships. Holders form a contiguous stretch.
    let mut cur = tree.successor(ridx);
    while let Some(s) = cur {
        if !tree[s].conflict_with.contains(idx) {
            break;
        }
        let s_start = tree[s].logoot_start.clone();
        if !tree[idx].reaches_right_past(&s_start) {
            tree[s].conflict_with.remove(idx);
        }
        if tree[ridx].reaches_right_past(&s_start) {
            tree[s].conflict_with.insert(ridx);
        }
        cur = tree.successor(s);
    }
    Ok(ridx)
}

/// Partition `nodes` (sorted by key) into `boundaries.len() + 1` groups,
/// splitting any node whose atoms straddle a boundary. Group `g` holds the
/// nodes at or after boundary `g - 1` and before boundary `g`.
pub(crate) fn slice_nodes_into_ranges(
    tree: &mut PositionTree,
    boundaries: &[LogootPosition],
    nodes: Vec<NodeIdx>,
) -> Result<Vec<Vec<NodeIdx>>, Error> {
    debug_assert!(boundaries.windows(2).all(|w| w[0] < w[1]));
    let mut groups: Vec<Vec<NodeIdx>> = vec![Vec::new(); boundaries.len() + 1];

    for idx in nodes {
        let mut idx = idx;
        loop {
            let g = boundaries
                .iter()
                .take_while(|b| **b <= tree[idx].logoot_start)
                .count();
            let Some(b) = boundaries.get(g) else {
                groups[g].push(idx);
                break;
            };
            debug_assert!(*b > tree[idx].logoot_start);
            if *b >= tree[idx].logoot_end() {
                groups[g].push(idx);
                break;
            }
            let at = atoms_below(tree, idx, b);
            if at >= tree[idx].length {
                // All atoms sort below the boundary (it only cuts the
                // span's tail space), so the node stays whole.
                groups[g].push(idx);
                break;
            }
            debug_assert!(at > 0);
            let rest = split_node(tree, idx, at)?;
            groups[g].push(idx);
            idx = rest;
        }
    }
    Ok(groups)
}
