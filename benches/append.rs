use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use tabula::{DataSetW, DataType, MISSING_INT};

fn bench_append_rows(c: &mut Criterion) {
    let mut group = c.benchmark_group("append_rows");

    for rows in [1_000usize, 10_000, 100_000] {
        group.bench_with_input(BenchmarkId::new("grow_to", rows), &rows, |b, &rows| {
            b.iter(|| {
                let dir = tempfile::tempdir().unwrap();
                let mut ds =
                    DataSetW::create_with_capacity(dir.path().join("bench.tab"), 64 * 1024, 16)
                        .unwrap();
                ds.append_column("x", None).unwrap();
                {
                    let mut x = ds.column_mut(0).unwrap();
                    x.change_dm_type(Some(DataType::Decimal), None).unwrap();
                }
                ds.append_rows(rows).unwrap();
            });
        });
    }
    group.finish();
}

fn bench_integer_setter_with_levels(c: &mut Criterion) {
    let mut group = c.benchmark_group("setters");

    group.bench_function("set_i_value_nominal_10k", |b| {
        b.iter(|| {
            let dir = tempfile::tempdir().unwrap();
            let mut ds = DataSetW::create(dir.path().join("bench.tab")).unwrap();
            ds.append_column("g", None).unwrap();
            ds.append_rows(10_000).unwrap();
            let mut g = ds.column_mut(0).unwrap();
            for row in 0..10_000 {
                g.set_i_value(row, (row % 7) as i32).unwrap();
            }
        });
    });

    group.bench_function("set_s_value_text_10k", |b| {
        let labels = ["alpha", "beta", "gamma", "delta"];
        b.iter(|| {
            let dir = tempfile::tempdir().unwrap();
            let mut ds = DataSetW::create(dir.path().join("bench.tab")).unwrap();
            ds.append_column("t", None).unwrap();
            ds.append_rows(10_000).unwrap();
            let mut t = ds.column_mut(0).unwrap();
            t.change_dm_type(Some(DataType::Text), None).unwrap();
            for row in 0..10_000 {
                t.set_s_value(row, Some(labels[row % labels.len()])).unwrap();
            }
        });
    });

    group.finish();
}

fn bench_filter_refresh(c: &mut Criterion) {
    c.bench_function("refresh_filter_state_50k", |b| {
        let dir = tempfile::tempdir().unwrap();
        let mut ds = DataSetW::create(dir.path().join("bench.tab")).unwrap();
        {
            let mut keep = ds.append_column("keep", None).unwrap();
            keep.set_column_type(tabula::ColumnType::Filter);
        }
        ds.append_column("data", None).unwrap();
        ds.append_rows(50_000).unwrap();
        {
            let mut keep = ds.column_mut(0).unwrap();
            for row in 0..50_000 {
                keep.set_i_value(row, (row % 2) as i32).unwrap();
            }
        }
        let mut data = ds.column_mut(1).unwrap();
        for row in 0..50_000 {
            data.set_i_value(row, if row % 3 == 0 { MISSING_INT } else { 1 })
                .unwrap();
        }
        b.iter(|| {
            ds.refresh_filter_state().unwrap();
        });
    });
}

criterion_group!(
    benches,
    bench_append_rows,
    bench_integer_setter_with_levels,
    bench_filter_refresh
);
criterion_main!(benches);
