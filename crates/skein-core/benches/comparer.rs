//! Comparer throughput: bulk load, incremental discovery, and comparisons.
//!
//! Run with:
//! ```sh
//! cargo bench --bench comparer
//! ```

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use skein_core::FragmentIdComparer;
use skein_core::model::{Boundary, Fragment, FragmentId};

const SIZES: [usize; 3] = [64, 1_024, 16_384];

fn chain(len: usize) -> Vec<Fragment> {
    let ids: Vec<i64> = (1..=i64::try_from(len).unwrap_or(i64::MAX)).collect();
    ids.iter()
        .enumerate()
        .map(|(pos, id)| Fragment {
            id: FragmentId(*id),
            room_id: "!bench:example.org".into(),
            start: pos
                .checked_sub(1)
                .map_or(Boundary::Edge, |p| Boundary::Linked(FragmentId(ids[p]))),
            end: ids
                .get(pos + 1)
                .map_or_else(|| Boundary::Gap("live".into()), |n| Boundary::Linked(FragmentId(*n))),
        })
        .collect()
}

fn bench_bulk_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("comparer.bulk_load");
    for size in SIZES {
        let fragments = chain(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &fragments, |b, fragments| {
            b.iter(|| black_box(FragmentIdComparer::from_fragments(fragments).len()));
        });
    }
    group.finish();
}

/// History discovered backward: every new fragment is prepended.
fn bench_prepend(c: &mut Criterion) {
    let mut group = c.benchmark_group("comparer.prepend");
    for size in SIZES {
        let fragments = chain(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &fragments, |b, fragments| {
            b.iter(|| {
                let comparer = FragmentIdComparer::new();
                for fragment in fragments.iter().rev() {
                    comparer.add_fragment(fragment);
                }
                black_box(comparer.len())
            });
        });
    }
    group.finish();
}

fn bench_compare(c: &mut Criterion) {
    let mut group = c.benchmark_group("comparer.compare");
    for size in SIZES {
        let fragments = chain(size);
        let comparer = FragmentIdComparer::from_fragments(&fragments);
        let first = fragments[0].id;
        let last = fragments[size - 1].id;
        group.bench_with_input(BenchmarkId::from_parameter(size), &comparer, |b, comparer| {
            b.iter(|| black_box(comparer.compare_positions((first, 7), (last, -7))));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_bulk_load, bench_prepend, bench_compare);
criterion_main!(benches);
