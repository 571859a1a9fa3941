use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use rand::prelude::*;
use rand::rngs::SmallRng;

use logoot_list::{ListDocumentModel, LogootInt};

const EDITS: usize = 1000;

fn edit_storm(seed: u64) -> ListDocumentModel {
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut model = ListDocumentModel::new();
    let branch = model.branches_mut().get_or_create("bench");

    for _ in 0..EDITS {
        let len = model.len();
        if len == 0 || rng.gen_bool(0.65) {
            let pos = rng.gen_range(0..=len);
            let env = model.insert_local(pos, rng.gen_range(1..8)).unwrap();
            model.insert_envelope(branch, &env).unwrap();
        } else {
            let pos = rng.gen_range(0..len);
            let span = rng.gen_range(1..=usize::min(8, len - pos));
            // One removal per spanned run, like a caller would issue.
            let spans: Vec<_> = model
                .runs()
                .into_iter()
                .filter(|r| r.node_type == logoot_list::NodeType::Data)
                .filter_map(|r| {
                    let lo = r.ldoc_start.max(pos);
                    let hi = (r.ldoc_start + r.length).min(pos + span);
                    (lo < hi).then(|| {
                        (r.start.offset_lowest(lo - r.ldoc_start), hi - lo, r.clk)
                    })
                })
                .collect();
            for (p, l, clk) in spans {
                model.remove_logoot(&p, l, &clk).unwrap();
            }
        }
    }
    model
}

fn local_edits(c: &mut Criterion) {
    let mut group = c.benchmark_group("core");
    group.throughput(Throughput::Elements(EDITS as u64));

    group.bench_function("local_edit_storm", |b| {
        b.iter(|| {
            let model = edit_storm(12345);
            black_box(model.len());
        })
    });

    group.bench_function("sequential_typing", |b| {
        b.iter(|| {
            let mut model = ListDocumentModel::new();
            let branch = model.branches_mut().get_or_create("bench");
            for _ in 0..EDITS {
                let env = model.insert_local(model.len(), 1).unwrap();
                model.insert_envelope(branch, &env).unwrap();
            }
            black_box(model.len());
        })
    });

    group.bench_function("remote_replay", |b| {
        // Build once, replay the envelope stream against fresh models.
        let mut rng = SmallRng::seed_from_u64(99);
        let mut origin = ListDocumentModel::new();
        let branch = origin.branches_mut().get_or_create("bench");
        let mut log = Vec::new();
        for _ in 0..EDITS {
            let pos = rng.gen_range(0..=origin.len());
            let env = origin.insert_local(pos, rng.gen_range(1..4)).unwrap();
            origin.insert_envelope(branch, &env).unwrap();
            log.push(env);
        }

        b.iter(|| {
            let mut model = ListDocumentModel::new();
            let branch = model.branches_mut().get_or_create("bench");
            for env in &log {
                model.insert_envelope(branch, env).unwrap();
            }
            black_box(model.len());
        })
    });

    group.finish();
}

fn clock_math(c: &mut Criterion) {
    c.bench_function("clk_increment", |b| {
        let clk = LogootInt::new(i64::MAX - 1);
        b.iter(|| black_box(clk.incremented()));
    });
}

criterion_group!(benches, local_edits, clock_math);
criterion_main!(benches);
