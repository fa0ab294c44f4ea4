use std::time::Duration;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use graphsql::graph::{compile_batch_create, compile_create, compile_query, compile_update};
use graphsql::spec::{
    BatchCreateSpec, CreateSpec, EdgeSpec, FieldSpec, IdSpec, NodeSpec, QuerySpec, Rel, UpdateSpec,
};
use graphsql::sql::{ConflictOption, Dialect, Render, desc, field_gt, field_has_prefix};
use graphsql::{FieldType, Value};

const SAMPLE_SIZE: usize = 20;
const WARM_UP: Duration = Duration::from_millis(300);
const MEASURE: Duration = Duration::from_millis(500);
const DIALECTS: [Dialect; 3] = [Dialect::Sqlite, Dialect::Postgres, Dialect::MySql];

fn batch_sizes() -> &'static [usize] {
    #[cfg(feature = "bench-ci")]
    {
        &[10, 100]
    }
    #[cfg(not(feature = "bench-ci"))]
    {
        &[10, 100, 1_000]
    }
}

fn users() -> NodeSpec {
    NodeSpec::new("users", IdSpec::Single(FieldSpec::new("id", FieldType::Int)))
        .column("name", FieldType::String)
        .column("age", FieldType::Int)
        .column("group_id", FieldType::Int)
}

fn groups_edge() -> EdgeSpec {
    EdgeSpec::new(
        Rel::M2M,
        "user_groups",
        vec!["user_id".into(), "group_id".into()],
        FieldSpec::new("id", FieldType::Int),
    )
}

fn user_create(i: usize) -> CreateSpec {
    let mut spec = CreateSpec::new("users", Some(FieldSpec::new("id", FieldType::Int)));
    spec.set_field("name", FieldType::String, format!("user-{i}"));
    spec.set_field("age", FieldType::Int, i as i64);
    spec.edges
        .push(groups_edge().nodes(vec![Value::Int(1), Value::Int(2)]));
    spec
}

fn bench_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile_query");
    group.sample_size(SAMPLE_SIZE);
    group.warm_up_time(WARM_UP);
    group.measurement_time(MEASURE);
    let mut spec = QuerySpec::new(users())
        .where_(field_gt("age", 30))
        .where_(field_has_prefix("name", "a"));
    spec.order.push(desc("age"));
    spec.limit = Some(50);
    for dialect in DIALECTS {
        group.bench_function(BenchmarkId::from_parameter(dialect.name()), |b| {
            b.iter(|| {
                let selector = compile_query(black_box(&spec)).expect("compile");
                black_box(selector.query(dialect));
            });
        });
    }
    group.finish();
}

fn bench_create(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile_create");
    group.sample_size(SAMPLE_SIZE);
    group.warm_up_time(WARM_UP);
    group.measurement_time(MEASURE);
    let spec = user_create(1);
    let mut upsert = user_create(1);
    upsert.on_conflict = vec![
        ConflictOption::columns(["name"]),
        ConflictOption::ResolveWithNewValues,
    ];
    for dialect in DIALECTS {
        group.bench_function(BenchmarkId::new("with_edges", dialect.name()), |b| {
            b.iter(|| {
                let plan = compile_create(black_box(&spec), dialect).expect("compile");
                black_box(plan.edge_writes(&Value::Int(1)).expect("edges"));
            });
        });
        group.bench_function(BenchmarkId::new("upsert", dialect.name()), |b| {
            b.iter(|| black_box(compile_create(black_box(&upsert), dialect).expect("compile")));
        });
    }
    group.finish();
}

fn bench_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile_batch_create");
    group.sample_size(SAMPLE_SIZE);
    group.warm_up_time(WARM_UP);
    group.measurement_time(MEASURE);
    for &size in batch_sizes() {
        let spec = BatchCreateSpec {
            nodes: (0..size).map(user_create).collect(),
            on_conflict: Vec::new(),
        };
        let ids: Vec<Value> = (1..=size as i64).map(Value::Int).collect();
        group.bench_function(BenchmarkId::from_parameter(size), |b| {
            b.iter(|| {
                let plan = compile_batch_create(black_box(&spec), Dialect::Postgres).expect("compile");
                black_box(plan.edge_writes(&ids).expect("edges"));
            });
        });
    }
    group.finish();
}

fn bench_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile_update");
    group.sample_size(SAMPLE_SIZE);
    group.warm_up_time(WARM_UP);
    group.measurement_time(MEASURE);
    let mut node = users();
    if let IdSpec::Single(id) = &mut node.id {
        id.value = Value::Int(1);
    }
    let mut spec = UpdateSpec::new(node);
    spec.set_field("name", FieldType::String, "renamed");
    spec.add_field("age", FieldType::Int, 1);
    spec.edges.clear.push(groups_edge());
    spec.edges
        .add
        .push(groups_edge().nodes(vec![Value::Int(3), Value::Int(4)]));
    spec.returning = true;
    for dialect in DIALECTS {
        group.bench_function(BenchmarkId::from_parameter(dialect.name()), |b| {
            b.iter(|| black_box(compile_update(black_box(&spec), dialect).expect("compile")));
        });
    }
    group.finish();
}

criterion_group!(
    name = compile_benches;
    config = Criterion::default();
    targets = bench_query, bench_create, bench_batch, bench_update
);
criterion_main!(compile_benches);
