use indexmap::IndexMap;
use serde::Serialize;

use crate::errors::GraphSqlError;
use crate::field::Value;
use crate::load::Node;

/// A materialized entity row together with the edges loaded for it.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Record {
    pub entity: String,
    /// Surrogate key, or `Null` for composite-key entities.
    pub id: Value,
    /// Every selected column, in selection order.
    pub fields: IndexMap<String, Value>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub edges: IndexMap<String, Vec<Record>>,
}

impl Record {
    pub fn new(entity: impl Into<String>, id: Value) -> Self {
        Self {
            entity: entity.into(),
            id,
            fields: IndexMap::new(),
            edges: IndexMap::new(),
        }
    }

    pub fn id(&self) -> &Value {
        &self.id
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields.get(column)
    }

    /// Neighbors across `name`. Edges that were never eager-loaded are an
    /// error, not an empty list.
    pub fn edge(&self, name: &str) -> Result<&[Record], GraphSqlError> {
        self.edges
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| GraphSqlError::not_loaded(format!("{}.{name}", self.entity)))
    }

    /// The single neighbor of a unique edge; `Ok(None)` when the edge was
    /// loaded and is empty.
    pub fn edge_one(&self, name: &str) -> Result<Option<&Record>, GraphSqlError> {
        self.edge(name).map(|records| records.first())
    }

    pub fn set_edge(&mut self, name: impl Into<String>, records: Vec<Record>) {
        self.edges.insert(name.into(), records);
    }

    pub(crate) fn push_edge(&mut self, name: &str, record: Record) {
        self.edges.entry(name.to_string()).or_default().push(record);
    }
}

impl Node for Record {
    fn node_id(&self) -> Value {
        self.id.clone()
    }

    fn field_value(&self, column: &str) -> Option<Value> {
        self.fields.get(column).cloned()
    }
}
