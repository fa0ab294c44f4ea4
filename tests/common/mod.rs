#![allow(dead_code)]

use std::sync::Arc;

use graphsql::{
    Client, DriverMetrics, EdgeDescriptor, EntitySchema, FieldDescriptor, FieldType,
    IdDescriptor, InstrumentedDriver, Rel, Schema, SqliteDriver, Value,
};
use time::OffsetDateTime;

pub const DDL: &str = r#"
CREATE TABLE users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    age INTEGER,
    nickname TEXT
);
CREATE TABLE pets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    owner_id INTEGER REFERENCES users (id)
);
CREATE TABLE "groups" (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);
CREATE TABLE user_groups (
    user_id INTEGER NOT NULL,
    group_id INTEGER NOT NULL,
    PRIMARY KEY (user_id, group_id)
);
CREATE TABLE friendships (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    weight INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    note TEXT,
    user_id INTEGER NOT NULL REFERENCES users (id),
    friend_id INTEGER NOT NULL REFERENCES users (id),
    UNIQUE (user_id, friend_id)
);
CREATE TABLE counters (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    value INTEGER NOT NULL UNIQUE
);
CREATE TABLE likes (
    user_id INTEGER NOT NULL REFERENCES users (id),
    pet_id INTEGER NOT NULL REFERENCES pets (id),
    rating INTEGER NOT NULL,
    PRIMARY KEY (user_id, pet_id)
);
CREATE TABLE tags (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    label TEXT
);
"#;

fn now() -> Value {
    Value::from(OffsetDateTime::now_utc())
}

fn non_empty(v: &Value) -> Result<(), String> {
    match v.as_str() {
        Some("") => Err("value is empty".to_string()),
        _ => Ok(()),
    }
}

pub fn schema() -> Schema {
    Schema::new()
        .entity(
            EntitySchema::new("User", "users")
                .field(FieldDescriptor::new("name", FieldType::String).validate_with(non_empty))
                .field(FieldDescriptor::new("age", FieldType::Int).optional())
                .field(FieldDescriptor::new("nickname", FieldType::String).nillable())
                .edge(EdgeDescriptor::new("pets", "Pet", Rel::O2M, "pets", &["owner_id"]))
                .edge(EdgeDescriptor::new(
                    "groups",
                    "Group",
                    Rel::M2M,
                    "user_groups",
                    &["user_id", "group_id"],
                ))
                .edge(
                    EdgeDescriptor::new(
                        "friends",
                        "User",
                        Rel::M2M,
                        "friendships",
                        &["user_id", "friend_id"],
                    )
                    .bidi()
                    .through("Friendship"),
                ),
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
        .entity(
            EntitySchema::new("Friendship", "friendships")
                .field(FieldDescriptor::new("weight", FieldType::Int).default_value(1))
                .field(
                    FieldDescriptor::new("created_at", FieldType::Time)
                        .immutable()
                        .default_fn(now),
                )
                .field(FieldDescriptor::new("note", FieldType::String).optional())
                .field(FieldDescriptor::new("user_id", FieldType::Int))
                .field(FieldDescriptor::new("friend_id", FieldType::Int))
                .edge(
                    EdgeDescriptor::new("user", "User", Rel::M2O, "friendships", &["user_id"])
                        .required()
                        .field("user_id"),
                )
                .edge(
                    EdgeDescriptor::new("friend", "User", Rel::M2O, "friendships", &["friend_id"])
                        .required()
                        .field("friend_id"),
                ),
        )
        .entity(
            EntitySchema::new("Counter", "counters")
                .field(FieldDescriptor::new("name", FieldType::String))
                .field(FieldDescriptor::new("value", FieldType::Int)),
        )
        .entity(
            EntitySchema::new("Like", "likes")
                .id(IdDescriptor::Composite(vec!["user".into(), "pet".into()]))
                .field(FieldDescriptor::new("rating", FieldType::Int).default_value(1))
                .field(FieldDescriptor::new("user_id", FieldType::Int))
                .field(FieldDescriptor::new("pet_id", FieldType::Int))
                .edge(
                    EdgeDescriptor::new("user", "User", Rel::M2O, "likes", &["user_id"])
                        .required()
                        .field("user_id"),
                )
                .edge(
                    EdgeDescriptor::new("pet", "Pet", Rel::M2O, "likes", &["pet_id"])
                        .required()
                        .field("pet_id"),
                ),
        )
        .entity(
            EntitySchema::new("Tag", "tags")
                .field(FieldDescriptor::new("label", FieldType::String).optional()),
        )
}

pub fn driver() -> SqliteDriver {
    let drv = SqliteDriver::open_in_memory().expect("open");
    drv.execute_batch(DDL).expect("ddl");
    drv
}

pub fn client() -> Client {
    Client::new(driver(), schema()).expect("client")
}

/// A client whose every statement is counted.
pub fn instrumented_client() -> (Client, Arc<DriverMetrics>) {
    let drv = InstrumentedDriver::with_log_capacity(driver(), 64);
    let metrics = drv.metrics();
    (Client::new(drv, schema()).expect("client"), metrics)
}

pub fn user(client: &Client, name: &str) -> Value {
    client
        .create("User")
        .set("name", name)
        .id()
        .expect("create user")
}
