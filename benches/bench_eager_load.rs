use std::time::Duration;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use graphsql::{
    Client, EdgeDescriptor, EntitySchema, FieldDescriptor, FieldType, Rel, Schema, SqliteDriver,
    Value,
};
use rand::{Rng, SeedableRng, rngs::StdRng};

const SEED: u64 = 0xE1D0;
const SAMPLE_SIZE: usize = 20;
const WARM_UP: Duration = Duration::from_millis(300);
const MEASURE: Duration = Duration::from_millis(500);
const PETS_PER_USER: usize = 3;
const GROUPS: usize = 20;
const GROUPS_PER_USER: usize = 4;

const DDL: &str = r#"
CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL);
CREATE TABLE pets (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL, owner_id INTEGER);
CREATE TABLE "groups" (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL);
CREATE TABLE user_groups (user_id INTEGER NOT NULL, group_id INTEGER NOT NULL, PRIMARY KEY (user_id, group_id));
"#;

fn bench_scales() -> &'static [usize] {
    #[cfg(feature = "bench-ci")]
    {
        &[100, 500]
    }
    #[cfg(not(feature = "bench-ci"))]
    {
        &[100, 1_000, 5_000]
    }
}

fn schema() -> Schema {
    Schema::new()
        .entity(
            EntitySchema::new("User", "users")
                .field(FieldDescriptor::new("name", FieldType::String))
                .edge(EdgeDescriptor::new("pets", "Pet", Rel::O2M, "pets", &["owner_id"]))
                .edge(EdgeDescriptor::new(
                    "groups",
                    "Group",
                    Rel::M2M,
                    "user_groups",
                    &["user_id", "group_id"],
                )),
        )
        .entity(
            EntitySchema::new("Pet", "pets")
                .field(FieldDescriptor::new("name", FieldType::String))
                .edge(EdgeDescriptor::new("owner", "User", Rel::M2O, "pets", &["owner_id"])),
        )
        .entity(
            EntitySchema::new("Group", "groups")
                .field(FieldDescriptor::new("name", FieldType::String))
                .edge(
                    EdgeDescriptor::new(
                        "users",
                        "User",
                        Rel::M2M,
                        "user_groups",
                        &["user_id", "group_id"],
                    )
                    .inverse(),
                ),
        )
}

fn populate(users: usize) -> Client {
    let drv = SqliteDriver::open_in_memory().expect("open");
    drv.execute_batch(DDL).expect("ddl");
    let client = Client::new(drv, schema()).expect("client");
    let mut rng = StdRng::seed_from_u64(SEED + users as u64);

    let groups: Vec<Value> = client
        .create_bulk(
            (0..GROUPS)
                .map(|i| client.create("Group").set("name", format!("group-{i}")))
                .collect(),
        )
        .save()
        .expect("groups")
        .into_iter()
        .map(|g| g.id)
        .collect();

    let tx = client.tx().expect("tx");
    for i in 0..users {
        let joined: Vec<Value> = (0..GROUPS_PER_USER)
            .map(|_| groups[rng.gen_range(0..groups.len())].clone())
            .collect();
        let id = tx
            .create("User")
            .set("name", format!("user-{i}"))
            .add_edge("groups", joined)
            .id()
            .expect("user");
        let pets = (0..PETS_PER_USER)
            .map(|p| {
                tx.create("Pet")
                    .set("name", format!("pet-{i}-{p}"))
                    .add_edge("owner", [id.clone()])
            })
            .collect();
        tx.create_bulk(pets).save().expect("pets");
    }
    tx.commit().expect("commit");
    client
}

fn bench_eager_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("eager_load");
    group.sample_size(SAMPLE_SIZE);
    group.warm_up_time(WARM_UP);
    group.measurement_time(MEASURE);
    for &users in bench_scales() {
        let client = populate(users);
        group.bench_function(BenchmarkId::new("o2m_pets", users), |b| {
            b.iter(|| black_box(client.query("User").with_edge("pets", |q| q).all().expect("load")));
        });
        group.bench_function(BenchmarkId::new("m2m_groups", users), |b| {
            b.iter(|| black_box(client.query("User").with_edge("groups", |q| q).all().expect("load")));
        });
        group.bench_function(BenchmarkId::new("m2o_owner", users), |b| {
            b.iter(|| black_box(client.query("Pet").with_edge("owner", |q| q).all().expect("load")));
        });
        group.bench_function(BenchmarkId::new("nested", users), |b| {
            b.iter(|| {
                black_box(
                    client
                        .query("Group")
                        .with_edge("users", |q| q.with_edge("pets", |q| q))
                        .all()
                        .expect("load"),
                )
            });
        });
    }
    group.finish();
}

criterion_group!(
    name = eager_load_benches;
    config = Criterion::default();
    targets = bench_eager_load
);
criterion_main!(eager_load_benches);
