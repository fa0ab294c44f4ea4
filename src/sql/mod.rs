//! Dialect-aware SQL statement builders.
//!
//! Every statement the graph compiler emits is rendered through these
//! builders. Builders hold no dialect; the dialect is chosen when a builder
//! is rendered with [`Render::query`].

mod builder;
mod dialect;
mod dml;
mod predicate;
mod select;

pub use builder::{Builder, Render, Statement};
pub use dialect::Dialect;
pub use dml::{ConflictOption, DeleteBuilder, InsertBuilder, Resolver, SetExpr, UpdateBuilder, UpdateSet};
pub use predicate::{
    CmpOp, P, Predicate, and_preds, asc, desc, field_contains, field_eq, field_gt, field_gte,
    field_has_prefix, field_in, field_is_null, field_lt, field_lte, field_neq, field_not_in,
    field_not_null, not_pred, or_preds, predicate,
};
pub(crate) use predicate::Opaque;
pub use select::{Join, JoinKind, SelectItem, Selector, TableRef};
