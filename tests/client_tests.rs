mod common;

use common::{client, instrumented_client, schema, user, DDL};
use graphsql::sql::{field_eq, field_gt};
use graphsql::{Client, ClientConfig, GraphSqlError, SqliteDriver, Value};

fn validation_name(err: &GraphSqlError) -> Option<&str> {
    match err {
        GraphSqlError::Validation { name, .. } => Some(name),
        _ => None,
    }
}

#[test]
fn test_create_returns_generated_id_and_fields() {
    let client = client();
    let a8m = client
        .create("User")
        .set("name", "a8m")
        .set("age", 30)
        .save()
        .expect("create");
    assert_eq!(a8m.id, Value::Int(1));
    assert_eq!(a8m.get("name"), Some(&Value::from("a8m")));
    assert_eq!(a8m.get("nickname"), Some(&Value::Null));

    let stored = client
        .query("User")
        .where_(field_eq("id", 1))
        .only()
        .expect("only");
    assert_eq!(stored.get("age"), Some(&Value::Int(30)));
}

#[test]
fn test_validation_failure_reaches_no_backend() {
    let (client, metrics) = instrumented_client();
    let err = client.create("User").set("age", 3).save().expect_err("missing name");
    assert_eq!(validation_name(&err), Some("name"));

    let err = client.create("User").set("name", "").save().expect_err("empty name");
    assert_eq!(validation_name(&err), Some("name"));

    let err = client
        .create("User")
        .set("name", "a8m")
        .set("age", "thirty")
        .save()
        .expect_err("wrong type");
    assert_eq!(validation_name(&err), Some("age"));

    assert_eq!(metrics.snapshot().backend_calls(), 0);
}

#[test]
fn test_edge_schema_missing_key_field_names_the_edge() {
    let (client, metrics) = instrumented_client();
    let a = user(&client, "a");
    let b = user(&client, "b");
    metrics.reset();

    let err = client
        .create("Friendship")
        .set("friend_id", b.clone())
        .save()
        .expect_err("missing user");
    assert_eq!(validation_name(&err), Some("user"));
    assert_eq!(metrics.snapshot().backend_calls(), 0);

    let friendship = client
        .create("Friendship")
        .set("user_id", a.clone())
        .set("friend_id", b.clone())
        .save()
        .expect("create");
    assert!(matches!(friendship.id, Value::Int(_)));
    assert_eq!(friendship.get("weight"), Some(&Value::Int(1)));
    assert_eq!(friendship.get("user_id"), Some(&a));
    assert_eq!(friendship.get("friend_id"), Some(&b));
}

#[test]
fn test_bidi_edge_schema_writes_both_directions_with_defaults() {
    let client = client();
    let a = user(&client, "a");
    let b = user(&client, "b");
    client
        .update_one("User", a.clone())
        .add_edge("friends", [b.clone()])
        .exec()
        .expect("add friend");

    let rows = client.query("Friendship").all().expect("friendships");
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.get("weight") == Some(&Value::Int(1))));

    let users = client
        .query("User")
        .with_edge("friends", |q| q)
        .all()
        .expect("users");
    let friends_of = |id: &Value| -> Vec<Value> {
        users
            .iter()
            .find(|u| &u.id == id)
            .expect("user")
            .edge("friends")
            .expect("loaded")
            .iter()
            .map(|f| f.id.clone())
            .collect()
    };
    assert_eq!(friends_of(&a), vec![b.clone()]);
    assert_eq!(friends_of(&b), vec![a]);
}

#[test]
fn test_update_without_match_is_not_found() {
    let client = client();
    let err = client
        .update_one("User", 999)
        .set("name", "ghost")
        .save()
        .expect_err("no row");
    assert!(err.is_not_found(), "got {err}");

    let id = client
        .create("User")
        .set("name", "a8m")
        .set("age", 10)
        .id()
        .expect("create");
    let err = client
        .update_one("User", id.clone())
        .where_(field_gt("age", 20))
        .set("name", "older")
        .save()
        .expect_err("predicate mismatch");
    assert!(err.is_not_found(), "got {err}");

    let err = client
        .update_one("User", 999)
        .save()
        .expect_err("empty update of missing row");
    assert!(err.is_not_found(), "got {err}");
}

#[test]
fn test_update_sets_adds_and_clears() {
    let client = client();
    let id = client
        .create("User")
        .set("name", "a8m")
        .set("age", 30)
        .set("nickname", "ariel")
        .id()
        .expect("create");
    let updated = client
        .update_one("User", id.clone())
        .add("age", 1)
        .clear("nickname")
        .set("name", "Ariel")
        .save()
        .expect("update");
    assert_eq!(updated.get("age"), Some(&Value::Int(31)));
    assert_eq!(updated.get("nickname"), Some(&Value::Null));
    assert_eq!(updated.get("name"), Some(&Value::from("Ariel")));

    let err = client
        .update_one("User", id)
        .clear("name")
        .save()
        .expect_err("name is not nillable");
    assert_eq!(validation_name(&err), Some("name"));
}

#[test]
fn test_update_many_returns_affected_count() {
    let client = client();
    for (name, age) in [("a", 10), ("b", 20), ("c", 30)] {
        client
            .create("User")
            .set("name", name)
            .set("age", age)
            .exec()
            .expect("create");
    }
    let n = client
        .update("User")
        .where_(field_gt("age", 15))
        .add("age", 1)
        .save()
        .expect("update");
    assert_eq!(n, 2);
    let ages: Vec<Value> = client
        .query("User")
        .all()
        .expect("all")
        .iter()
        .filter_map(|u| u.get("age").cloned())
        .collect();
    assert_eq!(ages, vec![Value::Int(10), Value::Int(21), Value::Int(31)]);
}

#[test]
fn test_clear_and_add_in_one_update_keeps_the_new_link() {
    let client = client();
    let id = user(&client, "a8m");
    let g1 = client.create("Group").set("name", "g1").id().expect("g1");
    let g2 = client.create("Group").set("name", "g2").id().expect("g2");
    client
        .update_one("User", id.clone())
        .add_edge("groups", [g1])
        .exec()
        .expect("join g1");
    client
        .update_one("User", id.clone())
        .clear_edge("groups")
        .add_edge("groups", [g2.clone()])
        .exec()
        .expect("move to g2");

    let groups: Vec<Value> = client
        .query("User")
        .where_(field_eq("id", id))
        .query_edge("groups")
        .expect("traverse")
        .ids()
        .expect("ids");
    assert_eq!(groups, vec![g2]);
}

#[test]
fn test_linking_an_owned_pet_fails_and_rolls_back() {
    let client = client();
    let a = user(&client, "a");
    let pet = client
        .create("Pet")
        .set("name", "pedro")
        .add_edge("owner", [a])
        .id()
        .expect("pet");

    let err = client
        .create("User")
        .set("name", "b")
        .add_edge("pets", [pet])
        .save()
        .expect_err("pet already owned");
    assert!(err.is_constraint(), "got {err}");
    assert_eq!(client.query("User").count().expect("count"), 1);
}

#[test]
fn test_only_first_and_exist() {
    let client = client();
    user(&client, "a");
    user(&client, "b");

    let err = client.query("User").only().expect_err("two users");
    assert!(err.is_not_singular(), "got {err}");
    let err = client
        .query("User")
        .where_(field_eq("name", "zoe"))
        .first()
        .expect_err("no zoe");
    assert!(err.is_not_found(), "got {err}");

    let first = client.query("User").first().expect("first");
    assert_eq!(first.get("name"), Some(&Value::from("a")));
    assert!(client.query("User").where_(field_eq("name", "b")).exist().expect("exist"));
    assert_eq!(client.query("User").count().expect("count"), 2);
}

#[test]
fn test_unloaded_edge_is_an_error() {
    let client = client();
    user(&client, "a");
    let a = client.query("User").only().expect("only");
    let err = a.edge("pets").expect_err("not loaded");
    assert!(err.is_not_loaded(), "got {err}");
}

#[test]
fn test_delete_one_and_delete_many() {
    let client = client();
    let a = user(&client, "a");
    user(&client, "b");
    user(&client, "c");

    client.delete_one("User", a.clone()).exec().expect("delete a");
    let err = client.delete_one("User", a).exec().expect_err("already gone");
    assert!(err.is_not_found(), "got {err}");

    let n = client
        .delete("User")
        .where_(field_eq("name", "b"))
        .exec()
        .expect("delete b");
    assert_eq!(n, 1);
    assert_eq!(client.query("User").count().expect("count"), 1);
}

#[test]
fn test_transaction_commit_and_rollback() {
    let client = client();
    {
        let tx = client.tx().expect("tx");
        tx.create("User").set("name", "a").exec().expect("create");
        tx.rollback().expect("rollback");
    }
    assert_eq!(client.query("User").count().expect("count"), 0);

    {
        let tx = client.tx().expect("tx");
        let id = tx.create("User").set("name", "a").id().expect("create");
        tx.update_one("User", id).set("age", 5).exec().expect("update");
        assert_eq!(tx.query("User").count().expect("count in tx"), 1);
        tx.commit().expect("commit");
    }
    let a = client.query("User").only().expect("committed");
    assert_eq!(a.get("age"), Some(&Value::Int(5)));

    {
        let tx = client.tx().expect("tx");
        tx.create("User").set("name", "dropped").exec().expect("create");
    }
    assert_eq!(client.query("User").count().expect("count"), 1);
}

#[test]
fn test_bulk_create_returns_keys_in_order() {
    let client = client();
    let users = client
        .create_bulk(vec![
            client.create("User").set("name", "a").set("age", 1),
            client.create("User").set("name", "b"),
            client.create("User").set("name", "c").set("nickname", "cc"),
        ])
        .save()
        .expect("bulk");
    let ids: Vec<Value> = users.iter().map(|u| u.id.clone()).collect();
    assert_eq!(ids, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    assert_eq!(users[1].get("name"), Some(&Value::from("b")));
    assert_eq!(client.query("User").count().expect("count"), 3);
}

#[test]
fn test_bulk_with_an_invalid_row_executes_nothing() {
    let (client, metrics) = instrumented_client();
    let err = client
        .create_bulk(vec![
            client.create("User").set("name", "a"),
            client.create("User").set("age", 2),
            client.create("User").set("name", "c"),
        ])
        .save()
        .expect_err("second row has no name");
    assert_eq!(validation_name(&err), Some("name"));
    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.backend_calls(), 0);
    assert_eq!(snapshot.tx_begin_count, 0);
    assert_eq!(client.query("User").count().expect("count"), 0);
}

#[test]
fn test_upsert_keeps_one_row_with_new_values() {
    let client = client();
    let first = client
        .create("Counter")
        .set("name", "first")
        .set("value", 7)
        .id()
        .expect("first");
    let second = client
        .create("Counter")
        .set("name", "second")
        .set("value", 7)
        .on_conflict_columns(&["value"])
        .update_new_values()
        .id()
        .expect("upsert");
    assert_eq!(second, first);

    let rows = client.query("Counter").all().expect("all");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("name"), Some(&Value::from("second")));
}

#[test]
fn test_upsert_do_nothing_reports_no_key() {
    let client = client();
    client
        .create("Counter")
        .set("name", "first")
        .set("value", 1)
        .exec()
        .expect("first");
    let id = client
        .create("Counter")
        .set("name", "again")
        .set("value", 1)
        .do_nothing()
        .id()
        .expect("ignored");
    assert_eq!(id, Value::Null);
    let only = client.query("Counter").only().expect("one row");
    assert_eq!(only.get("name"), Some(&Value::from("first")));
}

#[test]
fn test_file_backed_client_with_debug_metrics() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("graph.db");
    SqliteDriver::open(&path)
        .expect("open")
        .execute_batch(DDL)
        .expect("ddl");

    let config = ClientConfig::file(&path)
        .with_debug(true)
        .with_statement_log_capacity(8);
    let client = Client::open(&config, schema()).expect("client");
    user(&client, "a8m");
    let metrics = client.metrics().expect("debug metrics");
    assert!(metrics.snapshot().backend_calls() >= 1);
    assert!(!metrics.statements().is_empty());

    let reopened = Client::open(&ClientConfig::file(&path), schema()).expect("reopen");
    assert!(reopened.metrics().is_none());
    assert_eq!(reopened.query("User").count().expect("count"), 1);
}

#[test]
fn test_composite_key_entity_is_addressed_by_its_edges() {
    let client = client();
    let a = user(&client, "a");
    let pet = client.create("Pet").set("name", "pedro").id().expect("pet");

    let like = client
        .create("Like")
        .set("user_id", a.clone())
        .set("pet_id", pet.clone())
        .save()
        .expect("like");
    assert_eq!(like.id, Value::Null);
    assert_eq!(like.get("rating"), Some(&Value::Int(1)));

    let bumped = client
        .update_one_key("Like", vec![a.clone(), pet.clone()])
        .add("rating", 2)
        .save()
        .expect("update by key");
    assert_eq!(bumped.get("rating"), Some(&Value::Int(3)));

    let err = client
        .update_one_key("Like", vec![a.clone()])
        .set("rating", 5)
        .save()
        .expect_err("partial key");
    assert!(matches!(err, GraphSqlError::InvalidSpec(_)), "got {err}");
    assert!(client.query("Like").ids().is_err());
    assert!(client.query("Like").exist().expect("exist"));

    client
        .delete_one_key("Like", vec![a.clone(), pet.clone()])
        .exec()
        .expect("delete by key");
    let err = client
        .delete_one_key("Like", vec![a, pet])
        .exec()
        .expect_err("already gone");
    assert!(err.is_not_found(), "got {err}");
}

#[test]
fn test_bulk_do_nothing_keys_only_inserted_rows() {
    let client = client();
    let stored = client
        .create("Counter")
        .set("name", "first")
        .set("value", 1)
        .id()
        .expect("first");
    let rows = client
        .create_bulk(vec![
            client.create("Counter").set("name", "dup").set("value", 1),
            client.create("Counter").set("name", "new").set("value", 2),
        ])
        .on_conflict_columns(&["value"])
        .do_nothing()
        .save()
        .expect("bulk");
    assert_eq!(rows[0].id, Value::Null);
    let inserted = client
        .query("Counter")
        .where_(field_eq("value", 2))
        .only()
        .expect("new row");
    assert_eq!(rows[1].id, inserted.id);
    assert_ne!(rows[1].id, stored);
    assert_eq!(client.query("Counter").count().expect("count"), 2);
}

#[test]
fn test_upsert_of_a_row_without_fields() {
    let client = client();
    let first = client.create("Tag").do_nothing().id().expect("bare upsert");
    assert_eq!(first, Value::Int(1));
    let ids = client
        .create_bulk(vec![client.create("Tag"), client.create("Tag")])
        .do_nothing()
        .save()
        .expect("bare bulk upsert")
        .into_iter()
        .map(|r| r.id)
        .collect::<Vec<_>>();
    assert_eq!(ids, vec![Value::Int(2), Value::Int(3)]);
}

#[test]
fn test_client_is_shared_across_threads() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Client>();

    let client = client();
    std::thread::scope(|s| {
        for t in 0..4 {
            let client = &client;
            s.spawn(move || {
                for i in 0..5 {
                    user(client, &format!("user-{t}-{i}"));
                }
            });
        }
    });
    assert_eq!(client.query("User").count().expect("count"), 20);
}
