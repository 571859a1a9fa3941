use jumprope::JumpRope;
use rand::prelude::*;
use rand::rngs::SmallRng;

use logoot_list::{
    BranchId, InsertEnvelope, ListDocumentModel, LogootInt, LogootPosition, NodeType, Operation,
};

fn pos(v: i64) -> LogootPosition {
    LogootPosition::single(LogootInt::new(v), BranchId(0))
}

/// A logical operation as it would travel between peers.
#[derive(Debug, Clone)]
enum RemoteOp {
    Insert {
        branch: String,
        env: InsertEnvelope,
        text: String,
    },
    Remove {
        start: LogootPosition,
        length: usize,
        clk: LogootInt,
    },
}

/// A replica: the position model plus a locally materialized rope.
struct Replica {
    model: ListDocumentModel,
    doc: JumpRope,
}

impl Replica {
    fn new(branches: &[&str]) -> Self {
        let mut model = ListDocumentModel::new();
        // Replicas must agree on branch ranks; register in a fixed order.
        for b in branches {
            model.branches_mut().get_or_create(b);
        }
        Replica {
            model,
            doc: JumpRope::new(),
        }
    }

    fn apply_ops(&mut self, ops: &[Operation], src: &str) {
        for op in ops {
            match op {
                Operation::Insert {
                    start,
                    offset,
                    length,
                } => {
                    let chunk: String = src.chars().skip(*offset).take(*length).collect();
                    assert_eq!(chunk.chars().count(), *length, "op outside source");
                    self.doc.insert(*start, &chunk);
                }
                Operation::Remove { start, length } => {
                    self.doc.remove(*start..*start + *length);
                }
                Operation::Mark { .. } => {}
            }
        }
    }

    fn local_insert(&mut self, branch: &str, pos: usize, text: &str) -> RemoteOp {
        let env = self.model.insert_local(pos, text.chars().count()).unwrap();
        let b = self.model.branches_mut().get_or_create(branch);
        let ops = self.model.insert_envelope(b, &env).unwrap();
        self.apply_ops(&ops, text);
        RemoteOp::Insert {
            branch: branch.into(),
            env,
            text: text.into(),
        }
    }

    /// A local deletion becomes one logical removal per data run it spans.
    fn local_remove(&mut self, pos: usize, len: usize) -> Vec<RemoteOp> {
        let mut spans = Vec::new();
        for run in self.model.runs() {
            if run.node_type != NodeType::Data {
                continue;
            }
            let lo = run.ldoc_start.max(pos);
            let hi = (run.ldoc_start + run.length).min(pos + len);
            if lo < hi {
                spans.push(RemoteOp::Remove {
                    start: run.start.offset_lowest(lo - run.ldoc_start),
                    length: hi - lo,
                    clk: run.clk.clone(),
                });
            }
        }
        for op in &spans {
            let RemoteOp::Remove { start, length, clk } = op else {
                unreachable!()
            };
            let ops = self.model.remove_logoot(start, *length, clk).unwrap();
            self.apply_ops(&ops, "");
        }
        spans
    }

    fn apply_remote(&mut self, op: &RemoteOp) {
        match op {
            RemoteOp::Insert { branch, env, text } => {
                let b = self.model.branches_mut().get_or_create(branch);
                let ops = self.model.insert_envelope(b, env).unwrap();
                self.apply_ops(&ops, text);
            }
            RemoteOp::Remove { start, length, clk } => {
                let ops = self.model.remove_logoot(start, *length, clk).unwrap();
                self.apply_ops(&ops, "");
            }
        }
    }

    fn text(&self) -> String {
        self.doc.to_string()
    }
}

#[test]
fn fresh_insert_into_empty_doc() {
    let mut model = ListDocumentModel::new();
    let a = model.branches_mut().get_or_create("alice");
    let ops = model
        .insert_logoot(a, None, None, 5, LogootInt::zero())
        .unwrap();
    assert_eq!(
        ops,
        vec![Operation::Insert {
            start: 0,
            offset: 0,
            length: 5
        }]
    );
    assert_eq!(model.len(), 5);
    let runs = model.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].start, pos(0));
    assert_eq!(runs[0].length, 5);
    model.check().unwrap();
}

#[test]
fn nested_insert_between_adjacent_atoms() {
    let mut model = ListDocumentModel::new();
    let a = model.branches_mut().get_or_create("alice");
    let b = model.branches_mut().get_or_create("bob");
    model
        .insert_logoot(a, None, None, 5, LogootInt::zero())
        .unwrap();

    // No atom room between 3 and 4: the run must descend a level.
    let ops = model
        .insert_logoot(b, Some(&pos(3)), Some(&pos(4)), 2, LogootInt::zero())
        .unwrap();
    assert_eq!(
        ops,
        vec![Operation::Insert {
            start: 4,
            offset: 0,
            length: 2
        }]
    );
    assert_eq!(model.len(), 7);

    let nested = model
        .runs()
        .into_iter()
        .find(|r| r.start.len() == 2)
        .expect("descended run");
    assert_eq!(nested.length, 2);
    assert!(pos(3) < nested.start && nested.start < pos(4));
    model.check().unwrap();
}

#[test]
fn removal_retypes_and_shifts() {
    let mut model = ListDocumentModel::new();
    let a = model.branches_mut().get_or_create("alice");
    let b = model.branches_mut().get_or_create("bob");
    model
        .insert_logoot(a, None, None, 5, LogootInt::zero())
        .unwrap();
    model
        .insert_logoot(b, Some(&pos(3)), Some(&pos(4)), 2, LogootInt::zero())
        .unwrap();

    let ops = model.remove_logoot(&pos(1), 2, &LogootInt::new(1)).unwrap();
    assert_eq!(
        ops,
        vec![Operation::Remove {
            start: 1,
            length: 2
        }]
    );
    assert_eq!(model.len(), 5);

    let runs = model.runs();
    let types: Vec<(usize, NodeType, usize)> = runs
        .iter()
        .map(|r| (r.start.len(), r.node_type, r.length))
        .collect();
    assert_eq!(
        types,
        vec![
            (1, NodeType::Data, 1),    // atom 0
            (1, NodeType::Removal, 2), // atoms 1..3, tombstoned
            (1, NodeType::Data, 1),    // atom 3
            (2, NodeType::Data, 2),    // nested run, untouched
            (1, NodeType::Data, 1),    // atom 4
        ]
    );
    model.check().unwrap();
}

#[test]
fn insert_and_remove_commute() {
    let seed = |m: &mut ListDocumentModel| {
        let a = m.branches_mut().get_or_create("alice");
        m.insert_logoot(a, None, None, 5, LogootInt::zero()).unwrap();
    };

    let mut forward = ListDocumentModel::new();
    seed(&mut forward);
    let b = forward.branches_mut().get_or_create("bob");
    forward
        .insert_logoot(b, Some(&pos(3)), Some(&pos(4)), 2, LogootInt::zero())
        .unwrap();
    forward
        .remove_logoot(&pos(1), 2, &LogootInt::new(1))
        .unwrap();
    forward.check().unwrap();

    let mut reversed = ListDocumentModel::new();
    seed(&mut reversed);
    let b = reversed.branches_mut().get_or_create("bob");
    reversed
        .remove_logoot(&pos(1), 2, &LogootInt::new(1))
        .unwrap();
    reversed
        .insert_logoot(b, Some(&pos(3)), Some(&pos(4)), 2, LogootInt::zero())
        .unwrap();
    reversed.check().unwrap();

    assert_eq!(forward, reversed);
}

#[test]
fn disjoint_point_inserts_commute() {
    let seed = |m: &mut ListDocumentModel| {
        let a = m.branches_mut().get_or_create("alice");
        m.insert_logoot(a, None, None, 10, LogootInt::zero())
            .unwrap();
    };

    let mut base = ListDocumentModel::new();
    seed(&mut base);
    let e1 = base.insert_local(2, 1).unwrap();
    let e2 = base.insert_local(8, 2).unwrap();

    let mut x = base.clone();
    let bx = x.branches_mut().get_or_create("bob");
    let cx = x.branches_mut().get_or_create("carol");
    x.insert_envelope(bx, &e1).unwrap();
    x.insert_envelope(cx, &e2).unwrap();
    x.check().unwrap();

    let mut y = base.clone();
    let by = y.branches_mut().get_or_create("bob");
    let cy = y.branches_mut().get_or_create("carol");
    y.insert_envelope(cy, &e2).unwrap();
    y.insert_envelope(by, &e1).unwrap();
    y.check().unwrap();

    assert_eq!(x, y);
}

#[test]
fn point_insert_mid_run() {
    let mut model = ListDocumentModel::new();
    let a = model.branches_mut().get_or_create("alice");
    model
        .insert_logoot(a, None, None, 10, LogootInt::zero())
        .unwrap();

    let env = model.insert_local(3, 4).unwrap();
    assert_eq!(env.left, Some(pos(3)));
    assert_eq!(env.right, Some(pos(3)));
    assert_eq!(env.clk, LogootInt::zero());
    assert_eq!(env.length, 4);
}

#[test]
fn replay_is_idempotent() {
    let mut model = ListDocumentModel::new();
    let a = model.branches_mut().get_or_create("alice");
    model
        .insert_logoot(a, None, None, 5, LogootInt::zero())
        .unwrap();
    let before = model.clone();

    // Replaying the identical envelope re-emits a cancelling pair at the
    // same offsets; the tree state is unchanged.
    let ops = model
        .insert_logoot(a, None, None, 5, LogootInt::zero())
        .unwrap();
    assert_eq!(
        ops,
        vec![
            Operation::Remove {
                start: 0,
                length: 5
            },
            Operation::Insert {
                start: 0,
                offset: 0,
                length: 5
            },
        ]
    );
    assert_eq!(model, before);
    model.check().unwrap();
}

#[test]
fn higher_clock_resurrects() {
    let mut r = Replica::new(&["alice"]);
    r.local_insert("alice", 0, "hello");
    assert_eq!(r.text(), "hello");

    r.local_remove(0, 5);
    assert_eq!(r.text(), "");
    assert_eq!(r.model.len(), 0);

    // The tombstones still hold clock 0, so fresh content at the same
    // spot must carry clock 1 and wins the spot back.
    let env = r.model.insert_local(0, 5).unwrap();
    assert_eq!(env.clk, LogootInt::new(1));
    let RemoteOp::Insert { .. } = r.local_insert("alice", 0, "world") else {
        unreachable!()
    };
    assert_eq!(r.text(), "world");
    assert_eq!(r.model.len(), 5);
    r.model.check().unwrap();
}

#[test]
fn removal_spares_deeper_nesting() {
    let mut r = Replica::new(&["alice", "bob"]);
    r.local_insert("alice", 0, "aaaa");
    // Nested insert in the middle of alice's run.
    r.local_insert("bob", 2, "BB");
    assert_eq!(r.text(), "aaBBaa");

    // Remove alice's entire original run; the removal names level-1
    // positions, so bob's deeper run survives.
    let ops = r.local_remove(0, 2);
    let ops2 = r.local_remove(2, 2); // offsets shifted after first removal
    assert_eq!(ops.len() + ops2.len(), 2);
    assert_eq!(r.text(), "BB");
    assert_eq!(r.model.len(), 2);
    r.model.check().unwrap();
}

#[test]
fn concurrent_same_envelope_inserts() {
    let branches = ["alice", "xavier", "yvonne"];
    let mut r1 = Replica::new(&branches);
    let mut r2 = Replica::new(&branches);

    let seed = r1.local_insert("alice", 0, "abcde");
    r2.apply_remote(&seed);

    // Same envelope on both sides, different branches.
    let env = InsertEnvelope {
        left: Some(pos(3)),
        right: Some(pos(4)),
        clk: LogootInt::zero(),
        length: 1,
    };
    let from_x = RemoteOp::Insert {
        branch: "xavier".into(),
        env: env.clone(),
        text: "X".into(),
    };
    let from_y = RemoteOp::Insert {
        branch: "yvonne".into(),
        env,
        text: "Y".into(),
    };

    r1.apply_remote(&from_x);
    r1.apply_remote(&from_y);
    r2.apply_remote(&from_y);
    r2.apply_remote(&from_x);

    // rank(xavier) < rank(yvonne): X sorts first on both replicas.
    assert_eq!(r1.text(), "abcdXYe");
    assert_eq!(r2.text(), "abcdXYe");
    r1.model.check().unwrap();
    r2.model.check().unwrap();

    for r in [&r1, &r2] {
        let x_start = r
            .model
            .runs()
            .into_iter()
            .find(|run| run.start.len() == 2 && run.length == 1 && run.node_type == NodeType::Data)
            .unwrap()
            .start;
        // The two runs descend to the same level; they record each other.
        let x_conf = r.model.conflict_positions(&x_start).unwrap();
        assert!(!x_conf.is_empty());
        let partner = x_conf
            .iter()
            .find(|p| p.len() == 2 && **p != x_start)
            .expect("conflict with the concurrent run");
        let partner_conf = r.model.conflict_positions(partner).unwrap();
        assert!(partner_conf.contains(&x_start));
    }
}

#[test]
fn clock_rises_over_tombstones() {
    let mut r = Replica::new(&["alice"]);
    r.local_insert("alice", 0, "abc");
    r.local_remove(1, 1);
    let env = r.model.insert_local(1, 1).unwrap();
    assert_eq!(env.clk, LogootInt::new(1));

    // And over the raised tombstone again.
    r.local_insert("alice", 1, "z");
    r.local_remove(1, 1);
    let env = r.model.insert_local(1, 1).unwrap();
    assert_eq!(env.clk, LogootInt::new(2));
}

#[test]
fn round_trip_replay_on_peer() {
    let branches = ["alice", "bob"];
    let mut r1 = Replica::new(&branches);
    let mut r2 = Replica::new(&branches);

    let mut log = Vec::new();
    log.push(r1.local_insert("alice", 0, "the quick brown fox"));
    log.extend(r1.local_remove(4, 6));
    log.push(r1.local_insert("alice", 4, "slow "));
    log.extend(r1.local_remove(0, 3));
    log.push(r1.local_insert("bob", 0, "A"));

    for op in &log {
        r2.apply_remote(op);
    }
    assert_eq!(r1.text(), r2.text());
    assert_eq!(r1.model.len(), r2.model.len());
    r1.model.check().unwrap();
    r2.model.check().unwrap();
}

fn random_text(rng: &mut SmallRng, len: usize) -> String {
    let alphabet: Vec<char> = "abcdefghijklmnop_".chars().collect();
    (0..len)
        .map(|_| alphabet[rng.gen_range(0..alphabet.len())])
        .collect()
}

fn random_edit(r: &mut Replica, branch: &str, rng: &mut SmallRng) -> Vec<RemoteOp> {
    let doc_len = r.model.len();
    let insert_weight = if doc_len < 50 { 0.7 } else { 0.45 };
    if doc_len == 0 || rng.gen_bool(insert_weight) {
        let pos = rng.gen_range(0..=doc_len);
        let len = rng.gen_range(1..4);
        let text = random_text(rng, len);
        vec![r.local_insert(branch, pos, &text)]
    } else {
        let pos = rng.gen_range(0..doc_len);
        let len = rng.gen_range(1..=usize::min(6, doc_len - pos));
        r.local_remove(pos, len)
    }
}

/// Two replicas edit concurrently; each then replays the other's log in
/// origin order. Their materialized documents must converge byte for byte.
#[test]
fn fuzz_concurrent_editing_converges() {
    for seed in 0..6u64 {
        let mut rng = SmallRng::seed_from_u64(seed);
        let branches = ["alice", "bob"];
        let mut r1 = Replica::new(&branches);
        let mut r2 = Replica::new(&branches);

        // Shared prefix so concurrent edits collide on real content.
        let base = r1.local_insert("alice", 0, "the quick brown fox jumped");
        r2.apply_remote(&base);

        let mut log1 = Vec::new();
        let mut log2 = Vec::new();
        for _ in 0..30 {
            if rng.gen_bool(0.5) {
                log1.extend(random_edit(&mut r1, "alice", &mut rng));
            } else {
                log2.extend(random_edit(&mut r2, "bob", &mut rng));
            }
            r1.model.check().unwrap();
            r2.model.check().unwrap();
        }

        for op in &log2 {
            r1.apply_remote(op);
        }
        for op in &log1 {
            r2.apply_remote(op);
        }

        r1.model.check().unwrap();
        r2.model.check().unwrap();
        assert_eq!(r1.text(), r2.text(), "divergence at seed {seed}");
        assert_eq!(r1.model.len(), r2.model.len());
    }
}

/// Replaying a whole log against a fresh replica reproduces the document.
#[test]
fn fuzz_log_replay_round_trips() {
    for seed in 10..14u64 {
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut origin = Replica::new(&["alice"]);
        let mut log = Vec::new();
        for _ in 0..40 {
            log.extend(random_edit(&mut origin, "alice", &mut rng));
            origin.model.check().unwrap();
        }

        let mut fresh = Replica::new(&["alice"]);
        for op in &log {
            fresh.apply_remote(op);
        }
        assert_eq!(origin.text(), fresh.text(), "divergence at seed {seed}");
        assert_eq!(origin.model, fresh.model);
    }
}
