//! Validation of the model's internal state.
//!
//! Used by the fuzzers and tests to catch corruption as early as possible;
//! callers can run it after any batch of operations.

use crate::list::ListDocumentModel;
use crate::node::NodeType;
use crate::tree::NodeIdx;
use crate::Error;

impl ListDocumentModel {
    /// Verify the model's invariants. Returns `Error::Fatal` on corruption;
    /// a failing instance must be discarded.
    pub fn check(&self) -> Result<(), Error> {
        self.tree.check()?;

        let mut order: Vec<NodeIdx> = Vec::new();
        self.tree.operate_on_all(|idx, _| order.push(idx));

        let mut running_ldoc = 0usize;
        // Enclosing runs whose span the walk is still inside of.
        let mut open: Vec<NodeIdx> = Vec::new();
        let mut prev: Option<NodeIdx> = None;

        for &idx in &order {
            let n = &self.tree[idx];

            if n.length == 0 {
                return Err(Error::Fatal("empty run in tree"));
            }
            if n.node_type == NodeType::Dummy {
                return Err(Error::Fatal("dummy run stored in tree"));
            }

            if let Some(p) = prev {
                if self.tree[p].logoot_start >= n.logoot_start {
                    return Err(Error::Fatal("runs out of key order"));
                }
            }

            // No two runs may share atoms: a run starting inside an open
            // span must sit on a different lattice (deeper, or another
            // branch at the same depth).
            open.retain(|&o| self.tree[o].logoot_end() > n.logoot_start);
            for &o in &open {
                if self.tree[o].logoot_start.same_run_level(&n.logoot_start) {
                    return Err(Error::Fatal("runs overlap on one atom lattice"));
                }
            }
            open.push(idx);

            if self.tree.ldoc_start(idx) != running_ldoc {
                return Err(Error::Fatal("local offsets not contiguous"));
            }
            running_ldoc += n.ldoc_length();

            // Anchors stay tight around the run.
            if *n.true_left() > n.logoot_start {
                return Err(Error::Fatal("left anchor beyond run start"));
            }
            if *n.true_right() < n.logoot_end() {
                return Err(Error::Fatal("right anchor before run end"));
            }

            // Conflict sets: well-formed references to distinct runs.
            // (Reach justification is asserted where it is load-bearing,
            // in the merge tests; resurrections can leave a stale-but-
            // harmless relation behind until the next patch pass.)
            if n.conflict_with.contains(idx) {
                return Err(Error::Fatal("run conflicts with itself"));
            }
            for c in n.conflict_with.iter() {
                if self.tree[c].logoot_start == n.logoot_start && c != idx {
                    return Err(Error::Fatal("conflict pair shares a key"));
                }
            }
        }

        if running_ldoc != self.tree.total_units() {
            return Err(Error::Fatal("local length does not match aggregates"));
        }
        Ok(())
    }
}
