use std::borrow::Cow;
use std::collections::BTreeMap;

use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use redshift_upload::schema;
use redshift_upload::source::SourceTable;
use redshift_upload::sql::TableName;
use redshift_upload::staging;

fn generate_orders(rows: usize) -> SourceTable {
    let mut data = Vec::with_capacity(rows);
    for i in 0..rows {
        let status = match i % 3 {
            0 => "shipped",
            1 => "pending",
            _ => "processing",
        };
        let day = (i % 28) + 1;
        let hour = i % 24;
        data.push(vec![
            i.to_string(),
            format!("2024-01-{day:02}"),
            format!("2024-01-{day:02} {hour:02}:00:00"),
            format!("{}.{:02}", i % 1000, i % 100),
            status.to_string(),
            if i % 7 == 0 { String::new() } else { (i % 2 == 0).to_string() },
        ]);
    }
    SourceTable {
        headers: ["id", "ordered_at", "shipped_at", "amount", "status", "gift"]
            .map(String::from)
            .to_vec(),
        rows: data,
        has_header: true,
    }
}

fn bench_resolve_columns(c: &mut Criterion) {
    let data = generate_orders(50_000);
    let table = TableName::new("public", "orders");
    let declared = BTreeMap::new();

    let mut group = c.benchmark_group("resolve_columns");

    group.bench_function("infer_50k_rows", |b| {
        b.iter(|| schema::resolve(&table, &data, &declared, &[], false).expect("resolve"));
    });

    let rows: Vec<Vec<Cow<'_, str>>> = data
        .rows
        .iter()
        .map(|row| row.iter().map(|value| Cow::Borrowed(value.as_str())).collect())
        .collect();
    for parallel in [1, 4] {
        group.bench_function(format!("serialize_{parallel}_chunks"), |b| {
            b.iter_batched(
                || (),
                |_| staging::serialize_chunks(&rows, parallel).expect("serialize"),
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_resolve_columns);
criterion_main!(benches);
