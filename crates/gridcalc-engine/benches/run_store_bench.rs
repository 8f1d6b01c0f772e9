use criterion::{BatchSize, BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use gridcalc_common::{CellAddr, SheetLimits};
use gridcalc_engine::{Document, EngineConfig, RunStore};

const MAX_ROW: u32 = 1_048_575;

fn striped(runs: u32) -> RunStore<u16> {
    let mut store = RunStore::new(MAX_ROW, 256u16);
    let step = MAX_ROW / runs.max(1);
    for i in 0..runs {
        let start = i * step;
        store.set_range(start, start + step / 2, 300 + (i % 7) as u16).unwrap();
    }
    store
}

fn bench_run_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("RunStore");

    for runs in [100u32, 1_000, 10_000] {
        let store = striped(runs);

        // Row height lookups while scrolling.
        group.bench_with_input(BenchmarkId::new("Get/Point", runs), &runs, |b, _| {
            b.iter(|| store.get(black_box(MAX_ROW / 3)).unwrap())
        });

        group.bench_with_input(BenchmarkId::new("SumRange", runs), &runs, |b, _| {
            b.iter(|| store.sum_range(black_box(0), black_box(MAX_ROW / 2)))
        });

        group.bench_with_input(BenchmarkId::new("SetRange", runs), &runs, |b, _| {
            b.iter_batched(
                || store.clone(),
                |mut s| s.set_range(black_box(1_000), black_box(200_000), 512).unwrap(),
                BatchSize::SmallInput,
            )
        });

        // Structural shifts move every run below the edit.
        group.bench_with_input(BenchmarkId::new("Insert", runs), &runs, |b, _| {
            b.iter_batched(
                || store.clone(),
                |mut s| s.insert(black_box(10), black_box(64)).unwrap(),
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

fn fan_out_doc(listeners: u32) -> Document {
    let config = EngineConfig::default()
        .with_parallel(false)
        .with_limits(SheetLimits::new(255, 65_535));
    let mut doc = Document::new(config);
    doc.append_sheet("Sheet1").unwrap();
    doc.set_value(CellAddr::new(0, 0, 0), 1.0).unwrap();
    for row in 0..listeners {
        let r = row + 1;
        doc.set_formula_text(CellAddr::new(0, 1, row), &format!("=$A$1+SUM(A1:A{r})"))
            .unwrap();
    }
    doc.recalc();
    doc
}

fn bench_broadcast(c: &mut Criterion) {
    let mut group = c.benchmark_group("Broadcast");
    group.sample_size(20);

    for listeners in [100u32, 1_000, 5_000] {
        // One edit dirties every dependent; the recalc settles them.
        group.bench_with_input(
            BenchmarkId::new("EditAndRecalc", listeners),
            &listeners,
            |b, &listeners| {
                b.iter_batched(
                    || fan_out_doc(listeners),
                    |mut d| {
                        d.set_value(CellAddr::new(0, 0, 0), black_box(2.0)).unwrap();
                        d.recalc()
                    },
                    BatchSize::LargeInput,
                )
            },
        );

        group.bench_with_input(
            BenchmarkId::new("ListenersAt", listeners),
            &listeners,
            |b, &listeners| {
                let doc = fan_out_doc(listeners);
                b.iter(|| {
                    doc.dependency_graph()
                        .listeners_at(black_box(CellAddr::new(0, 0, 0)))
                        .len()
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_run_store, bench_broadcast);
criterion_main!(benches);
