//! Graph-to-relational statement compiler.
//!
//! Every function here is split in two: a pure `compile_*` that turns a
//! spec into statements for a dialect, and an executing counterpart that
//! runs them through a driver, opening a transaction only when the write
//! touches more than one table.

mod batch;
mod create;
mod delete;
mod edges;
mod query;
mod update;

pub use batch::{BatchIds, BatchPlan, batch_create, compile_batch_create};
pub use create::{CreatePlan, IdCapture, compile_create, create_node};
pub use delete::{compile_delete, delete_nodes};
pub use edges::{EdgeWrite, Expect, compile_edge_writes};
pub use query::{
    MAX_LIMIT, compile_count, compile_edge_query, compile_query, count_nodes, decode_row,
    query_edges, query_nodes,
};
pub use update::{UpdatePlan, compile_update, update_node, update_nodes};
