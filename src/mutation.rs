//! In-flight write operations as seen by hooks.

use std::fmt;

use bitflags::bitflags;
use indexmap::IndexMap;

use crate::errors::GraphSqlError;
use crate::field::Value;
use crate::record::Record;
use crate::sql::{ConflictOption, Opaque, Predicate};

bitflags! {
    /// Kind of a mutation. Hooks filter on unions such as
    /// `Op::UPDATE | Op::UPDATE_ONE`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Op: u8 {
        const CREATE = 1;
        const UPDATE = 1 << 1;
        const UPDATE_ONE = 1 << 2;
        const DELETE = 1 << 3;
        const DELETE_ONE = 1 << 4;
    }
}

impl Op {
    /// Reports whether `self` is one of the kinds in `other`.
    pub fn is(self, other: Op) -> bool {
        self.intersects(other)
    }
}

/// Lifecycle of a mutation. A mutation executes at most once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MutationState {
    Pending,
    Executing,
    Committed,
    Failed,
}

/// What a mutation produced.
#[derive(Clone, Debug, PartialEq)]
pub enum MutationOutput {
    /// The created or updated node.
    Record(Record),
    /// Rows touched by a predicate-based update or delete.
    Affected(usize),
}

impl MutationOutput {
    pub fn into_record(self) -> Result<Record, GraphSqlError> {
        match self {
            MutationOutput::Record(r) => Ok(r),
            MutationOutput::Affected(n) => Err(GraphSqlError::inconsistent(format!(
                "expected a record, mutation reported {n} affected rows"
            ))),
        }
    }

    pub fn into_affected(self) -> Result<usize, GraphSqlError> {
        match self {
            MutationOutput::Affected(n) => Ok(n),
            MutationOutput::Record(_) => Ok(1),
        }
    }
}

/// One logical write: its kind, target and the field and edge changes
/// collected by a builder. Hooks read and amend it before the terminal
/// step compiles it.
pub struct Mutation {
    op: Op,
    entity: String,
    id: Option<Value>,
    fields: IndexMap<String, Value>,
    added: IndexMap<String, Value>,
    cleared_fields: Vec<String>,
    added_edges: IndexMap<String, Vec<Value>>,
    removed_edges: IndexMap<String, Vec<Value>>,
    cleared_edges: Vec<String>,
    predicates: Vec<Predicate>,
    conflict: Vec<ConflictOption>,
    state: MutationState,
}

impl Mutation {
    pub fn new(op: Op, entity: impl Into<String>) -> Self {
        Self {
            op,
            entity: entity.into(),
            id: None,
            fields: IndexMap::new(),
            added: IndexMap::new(),
            cleared_fields: Vec::new(),
            added_edges: IndexMap::new(),
            removed_edges: IndexMap::new(),
            cleared_edges: Vec::new(),
            predicates: Vec::new(),
            conflict: Vec::new(),
            state: MutationState::Pending,
        }
    }

    pub fn op(&self) -> Op {
        self.op
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Target key of an `UPDATE_ONE`/`DELETE_ONE`, or a caller-supplied key
    /// on create.
    pub fn id(&self) -> Option<&Value> {
        self.id.as_ref()
    }

    pub fn set_id(&mut self, id: impl Into<Value>) {
        self.id = Some(id.into());
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Sets a field, undoing an earlier clear of it.
    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        self.cleared_fields.retain(|c| *c != name);
        self.fields.insert(name, value.into());
    }

    pub fn reset_field(&mut self, name: &str) {
        self.fields.shift_remove(name);
        self.added.shift_remove(name);
        self.cleared_fields.retain(|c| c != name);
    }

    pub fn added_field(&self, name: &str) -> Option<&Value> {
        self.added.get(name)
    }

    pub fn added_fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.added.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Numeric increment. Adding twice to the same field replaces the
    /// first amount.
    pub fn add_field(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.added.insert(name.into(), value.into());
    }

    pub fn clear_field(&mut self, name: impl Into<String>) {
        let name = name.into();
        self.fields.shift_remove(&name);
        self.added.shift_remove(&name);
        if !self.cleared_fields.contains(&name) {
            self.cleared_fields.push(name);
        }
    }

    pub fn field_cleared(&self, name: &str) -> bool {
        self.cleared_fields.iter().any(|c| c == name)
    }

    pub fn cleared_fields(&self) -> &[String] {
        &self.cleared_fields
    }

    pub fn add_edge_ids(&mut self, edge: impl Into<String>, ids: impl IntoIterator<Item = Value>) {
        self.added_edges.entry(edge.into()).or_default().extend(ids);
    }

    pub fn added_ids(&self, edge: &str) -> &[Value] {
        self.added_edges.get(edge).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn added_edges(&self) -> impl Iterator<Item = (&str, &[Value])> {
        self.added_edges.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn remove_edge_ids(&mut self, edge: impl Into<String>, ids: impl IntoIterator<Item = Value>) {
        self.removed_edges.entry(edge.into()).or_default().extend(ids);
    }

    pub fn removed_ids(&self, edge: &str) -> &[Value] {
        self.removed_edges.get(edge).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn removed_edges(&self) -> impl Iterator<Item = (&str, &[Value])> {
        self.removed_edges.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn clear_edge(&mut self, edge: impl Into<String>) {
        let edge = edge.into();
        if !self.cleared_edges.contains(&edge) {
            self.cleared_edges.push(edge);
        }
    }

    pub fn edge_cleared(&self, edge: &str) -> bool {
        self.cleared_edges.iter().any(|e| e == edge)
    }

    pub fn cleared_edges(&self) -> &[String] {
        &self.cleared_edges
    }

    pub fn where_(&mut self, pred: Predicate) {
        self.predicates.push(pred);
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn on_conflict(&mut self, options: impl IntoIterator<Item = ConflictOption>) {
        self.conflict.extend(options);
    }

    pub fn conflict_options(&self) -> &[ConflictOption] {
        &self.conflict
    }

    pub fn state(&self) -> MutationState {
        self.state
    }

    /// Moves a pending mutation to `Executing`. Any other state means the
    /// mutation already ran.
    pub(crate) fn begin(&mut self) -> Result<(), GraphSqlError> {
        if self.state != MutationState::Pending {
            return Err(GraphSqlError::invalid_spec(format!(
                "{} mutation on {} already executed ({:?})",
                op_name(self.op),
                self.entity,
                self.state
            )));
        }
        self.state = MutationState::Executing;
        Ok(())
    }

    pub(crate) fn finish(&mut self, ok: bool) {
        self.state = if ok {
            MutationState::Committed
        } else {
            MutationState::Failed
        };
    }
}

fn op_name(op: Op) -> &'static str {
    if op.is(Op::CREATE) {
        "create"
    } else if op.is(Op::UPDATE | Op::UPDATE_ONE) {
        "update"
    } else {
        "delete"
    }
}

impl fmt::Debug for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutation")
            .field("op", &self.op)
            .field("entity", &self.entity)
            .field("id", &self.id)
            .field("fields", &self.fields)
            .field("added", &self.added)
            .field("cleared_fields", &self.cleared_fields)
            .field("added_edges", &self.added_edges)
            .field("removed_edges", &self.removed_edges)
            .field("cleared_edges", &self.cleared_edges)
            .field("predicates", &Opaque(self.predicates.len()))
            .field("conflict", &self.conflict)
            .field("state", &self.state)
            .finish()
    }
}
