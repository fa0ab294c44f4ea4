//! Graph-to-relational statement compiler with eager loading and mutation hooks.
//! Run Criterion benchmarks with `cargo bench` to inspect reports under `target/criterion`.

pub mod client;
pub mod config;
pub mod driver;
pub mod errors;
pub mod field;
pub mod graph;
pub mod hook;
pub mod instrument;
pub mod load;
pub mod mutation;
pub mod record;
pub mod schema;
pub mod spec;
pub mod sql;
pub mod sqlite;

pub use crate::client::{
    Client, ClientTx, Create, CreateBulk, Delete, DeleteOne, Query, Update, UpdateOne,
};
pub use crate::config::{ClientConfig, SqliteConfig, StorageKind};
pub use crate::driver::{Driver, ExecQuerier, ExecResult, Rows, Tx};
pub use crate::errors::GraphSqlError;
pub use crate::field::{FieldType, Value};
pub use crate::hook::{
    Hook, HookRegistry, Interceptor, Mutator, Querier, QueryOutput, chain, hook_fn, interceptor_fn,
    on, reject, unless,
};
pub use crate::instrument::{DriverMetrics, DriverMetricsSnapshot, InstrumentedDriver};
pub use crate::mutation::{Mutation, MutationOutput, MutationState, Op};
pub use crate::record::Record;
pub use crate::schema::{
    DefaultValue, EdgeDescriptor, EntitySchema, FieldDescriptor, IdDescriptor, Schema,
};
pub use crate::spec::Rel;
pub use crate::sqlite::SqliteDriver;
