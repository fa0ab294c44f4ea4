mod common;

use common::{client, instrumented_client, user};
use graphsql::sql::{asc, field_eq};
use graphsql::{Client, Record, Value};

fn pet(client: &Client, name: &str, owner: Option<&Value>) -> Value {
    let mut create = client.create("Pet").set("name", name);
    if let Some(owner) = owner {
        create = create.add_edge("owner", [owner.clone()]);
    }
    create.id().expect("create pet")
}

fn names(records: &[Record]) -> Vec<String> {
    records
        .iter()
        .filter_map(|r| r.get("name").and_then(Value::as_str).map(str::to_string))
        .collect()
}

#[test]
fn test_o2m_load_marks_every_parent_loaded() {
    let client = client();
    let a = user(&client, "a");
    user(&client, "b");
    pet(&client, "pedro", Some(&a));
    pet(&client, "xabi", Some(&a));

    let users = client
        .query("User")
        .order(asc("id"))
        .with_edge("pets", |q| q.order(asc("name")))
        .all()
        .expect("users");
    assert_eq!(names(users[0].edge("pets").expect("a loaded")), vec!["pedro", "xabi"]);
    assert!(users[1].edge("pets").expect("b loaded").is_empty());
}

#[test]
fn test_m2o_load_groups_parents_by_owner() {
    let client = client();
    let a = user(&client, "a");
    pet(&client, "pedro", Some(&a));
    pet(&client, "xabi", Some(&a));
    pet(&client, "stray", None);

    let pets = client
        .query("Pet")
        .order(asc("id"))
        .with_edge("owner", |q| q)
        .all()
        .expect("pets");
    for owned in &pets[..2] {
        let owner = owned.edge_one("owner").expect("loaded").expect("has owner");
        assert_eq!(owner.id, a);
    }
    assert_eq!(pets[2].edge_one("owner").expect("loaded"), None);
}

#[test]
fn test_m2m_load_fetches_each_neighbor_once() {
    let (client, metrics) = instrumented_client();
    let a = user(&client, "a");
    let b = user(&client, "b");
    let g1 = client.create("Group").set("name", "g1").id().expect("g1");
    let g2 = client.create("Group").set("name", "g2").id().expect("g2");
    for u in [&a, &b] {
        client
            .update_one("User", u.clone())
            .add_edge("groups", [g1.clone(), g2.clone()])
            .exec()
            .expect("join");
    }
    metrics.reset();

    let users = client
        .query("User")
        .order(asc("id"))
        .with_edge("groups", |q| q.order(asc("name")))
        .all()
        .expect("users");
    assert_eq!(metrics.snapshot().query_count, 2);
    for u in &users {
        assert_eq!(names(u.edge("groups").expect("loaded")), vec!["g1", "g2"]);
    }

    let groups = client
        .query("Group")
        .where_(field_eq("name", "g1"))
        .with_edge("users", |q| q)
        .only()
        .expect("g1");
    let members: Vec<Value> = groups
        .edge("users")
        .expect("loaded")
        .iter()
        .map(|u| u.id.clone())
        .collect();
    assert_eq!(members.len(), 2);
    assert!(members.contains(&a) && members.contains(&b));
}

#[test]
fn test_nested_and_filtered_loads() {
    let client = client();
    let a = user(&client, "a");
    let b = user(&client, "b");
    pet(&client, "pedro", Some(&a));
    pet(&client, "xabi", Some(&b));
    let g = client.create("Group").set("name", "g").id().expect("group");
    client
        .update_one("Group", g)
        .add_edge("users", [a.clone(), b])
        .exec()
        .expect("members");

    let group = client
        .query("Group")
        .with_edge("users", |users| {
            users
                .order(asc("id"))
                .with_edge("pets", |pets| pets.where_(field_eq("name", "pedro")))
        })
        .only()
        .expect("group");
    let users = group.edge("users").expect("users loaded");
    assert_eq!(users.len(), 2);
    assert_eq!(names(users[0].edge("pets").expect("pets loaded")), vec!["pedro"]);
    assert!(users[1].edge("pets").expect("pets loaded").is_empty());
}

#[test]
fn test_projection_keeps_the_key() {
    let client = client();
    let a = client
        .create("User")
        .set("name", "a")
        .set("age", 3)
        .id()
        .expect("create");
    let only = client.query("User").select(&["name"]).only().expect("only");
    assert_eq!(only.id, a);
    assert_eq!(only.fields.keys().collect::<Vec<_>>(), vec!["id", "name"]);
}

#[test]
fn test_unknown_edge_fails_at_execution() {
    let client = client();
    let err = client
        .query("User")
        .with_edge("enemies", |q| q)
        .all()
        .expect_err("no such edge");
    assert!(err.to_string().contains("enemies"), "got {err}");
}
