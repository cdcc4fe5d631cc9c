//! hostgc Benchmarks
//!
//! Allocation, collection, compaction and write barrier costs.
//! Run with: `cargo bench --package hostgc`

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use hostgc::{
    GarbageCollected, GarbageCollector, GcConfig, HeapOptions, IndexGenerator, Member, Persistent, StackState,
    SweepingType, Trace, Visitor, MB,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

struct BenchNode {
    value: u64,
    edges: [Member<BenchNode>; 2],
}

impl Trace for BenchNode {
    fn trace(&self, visitor: &mut dyn Visitor) {
        self.edges.trace(visitor);
    }
}
impl GarbageCollected for BenchNode {}

struct BenchBlob {
    value: u64,
    next: Member<BenchBlob>,
}

impl Trace for BenchBlob {
    fn trace(&self, visitor: &mut dyn Visitor) {
        self.next.trace(visitor);
    }
}
impl GarbageCollected for BenchBlob {
    const COMPACTABLE: bool = true;
}

fn create_gc() -> GarbageCollector {
    GarbageCollector::new(HeapOptions {
        max_heap_size: 512 * MB,
        verify_marking: false,
        ..Default::default()
    })
    .unwrap()
}

fn node(gc: &GarbageCollector, value: u64) -> anyhow::Result<hostgc::GcPtr<BenchNode>> {
    Ok(gc.make_garbage_collected(BenchNode {
        value,
        edges: Default::default(),
    })?)
}

/// Random graph of `size` nodes, every node reachable from the root, plus
/// as many unreachable nodes
fn build_graph(gc: &GarbageCollector, size: usize, seed: u64) -> anyhow::Result<Persistent<BenchNode>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut nodes = vec![node(gc, 0)?];
    let root = Persistent::new(gc, Some(nodes[0]));
    for value in 1..size as u64 {
        let fresh = node(gc, value)?;
        let parent = nodes[rng.gen_range(0..nodes.len())];
        parent.edges[rng.gen_range(0..2)].set(Some(fresh));
        nodes.push(fresh);
        node(gc, value)?;
    }
    // Cross edges make the graph cyclic.
    for _ in 0..size / 4 {
        let from = nodes[rng.gen_range(0..nodes.len())];
        let to = nodes[rng.gen_range(0..nodes.len())];
        if from.edges[1].is_null() {
            from.edges[1].set(Some(to));
        }
    }
    Ok(root)
}

fn bench_gc_creation(c: &mut Criterion) {
    let mut group = c.benchmark_group("gc_creation");

    group.bench_function("default_options", |b| {
        b.iter(|| black_box(GarbageCollector::new(HeapOptions::default()).unwrap()))
    });

    group.bench_function("single_threaded", |b| {
        b.iter(|| {
            black_box(
                GarbageCollector::new(HeapOptions {
                    marker_threads: 1,
                    sweeper_threads: 1,
                    ..Default::default()
                })
                .unwrap(),
            )
        })
    });

    group.finish();
}

fn bench_allocation(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocation");
    const BATCH: usize = 1000;
    group.throughput(Throughput::Elements(BATCH as u64));

    for additional in [0usize, 64, 1024] {
        group.bench_function(format!("node_plus_{}", additional), |b| {
            b.iter_batched(
                create_gc,
                |gc| {
                    for value in 0..BATCH as u64 {
                        let object = gc
                            .make_garbage_collected_with_additional_bytes(
                                BenchNode {
                                    value,
                                    edges: Default::default(),
                                },
                                additional,
                            )
                            .unwrap();
                        black_box(object);
                    }
                    gc
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.bench_function("large_object", |b| {
        b.iter_batched(
            create_gc,
            |gc| {
                for value in 0..16u64 {
                    let object = gc
                        .make_garbage_collected_with_additional_bytes(
                            BenchNode {
                                value,
                                edges: Default::default(),
                            },
                            hostgc::heap::PAGE_SIZE,
                        )
                        .unwrap();
                    black_box(object);
                }
                gc
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

fn bench_collection(c: &mut Criterion) {
    let mut group = c.benchmark_group("collection");
    group.sample_size(20);

    let configs = [
        ("atomic", GcConfig::precise_atomic()),
        (
            "atomic_concurrent_sweep",
            GcConfig::precise_atomic().with_sweeping(SweepingType::IncrementalAndConcurrent),
        ),
    ];
    for size in [1_000usize, 10_000] {
        group.throughput(Throughput::Elements(2 * size as u64));
        for (name, config) in configs {
            group.bench_function(format!("{}_{}", name, size), |b| {
                b.iter_batched(
                    || {
                        let gc = create_gc();
                        let root = build_graph(&gc, size, 42).unwrap();
                        (gc, root)
                    },
                    |(gc, root)| {
                        gc.collect_garbage(config);
                        gc.finish_sweeping_if_running();
                        black_box(root.get().map(|node| node.value));
                        drop(root);
                        gc
                    },
                    BatchSize::LargeInput,
                )
            });
        }

        group.bench_function(format!("incremental_steps_{}", size), |b| {
            b.iter_batched(
                || {
                    let gc = create_gc();
                    let root = build_graph(&gc, size, 7).unwrap();
                    (gc, root)
                },
                |(gc, root)| {
                    gc.start_incremental_garbage_collection(GcConfig::precise_incremental_concurrent());
                    while !gc.advance_incremental_marking(StackState::NoHeapPointers) {}
                    gc.finish_sweeping_if_running();
                    drop(root);
                    gc
                },
                BatchSize::LargeInput,
            )
        });
    }

    group.finish();
}

fn bench_compaction(c: &mut Criterion) {
    let mut group = c.benchmark_group("compaction");
    group.sample_size(20);

    group.bench_function("sparse_chain", |b| {
        b.iter_batched(
            || {
                let gc = create_gc();
                let head = gc
                    .make_garbage_collected(BenchBlob {
                        value: 0,
                        next: Member::null(),
                    })
                    .unwrap();
                let root = Persistent::new(&gc, Some(head));
                let mut tail = head;
                for value in 1..20_000u64 {
                    let blob = gc
                        .make_garbage_collected(BenchBlob {
                            value,
                            next: Member::null(),
                        })
                        .unwrap();
                    if value % 4 == 0 {
                        tail.next.set(Some(blob));
                        tail = blob;
                    }
                }
                (gc, root)
            },
            |(gc, root)| {
                gc.collect_garbage(GcConfig::precise_atomic().with_compaction());
                black_box(root.get().map(|head| head.value));
                drop(root);
                gc
            },
            BatchSize::LargeInput,
        )
    });

    group.finish();
}

fn bench_write_barrier(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_barrier");
    let gc = create_gc();
    let holder = node(&gc, 0).unwrap();
    let target = node(&gc, 1).unwrap();
    let _roots = (Persistent::new(&gc, Some(holder)), Persistent::new(&gc, Some(target)));

    group.bench_function("member_set_idle", |b| {
        b.iter(|| holder.edges[0].set(black_box(Some(target))))
    });

    gc.start_incremental_garbage_collection(GcConfig::precise_incremental());
    group.bench_function("member_set_marking", |b| {
        b.iter(|| holder.edges[0].set(black_box(Some(target))))
    });
    gc.finalize_incremental_garbage_collection_if_running(StackState::NoHeapPointers);
    gc.finish_sweeping_if_running();

    group.finish();
}

fn bench_primitives(c: &mut Criterion) {
    let mut group = c.benchmark_group("primitives");
    group.throughput(Throughput::Elements(4096));

    group.bench_function("index_generator_drain", |b| {
        b.iter(|| {
            let generator = IndexGenerator::new(4096);
            let mut sum = 0usize;
            while let Some(index) = generator.get_next() {
                sum += index;
            }
            black_box(sum)
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_gc_creation,
    bench_allocation,
    bench_collection,
    bench_compaction,
    bench_write_barrier,
    bench_primitives,
);
criterion_main!(benches);
