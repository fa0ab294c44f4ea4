//! Entity schemas: the declarative graph the generic builders compile from.
//!
//! A [`Schema`] maps entity names to [`EntitySchema`]s. Each entity declares
//! its table, how it is keyed, its fields and its edges; the client turns
//! these declarations into [`NodeSpec`]s and [`EdgeSpec`]s per call.

use std::fmt;

use indexmap::IndexMap;

use crate::errors::GraphSqlError;
use crate::field::{FieldType, Value};
use crate::spec::{EdgeSpec, FieldSpec, IdSpec, NodeSpec, Rel};

/// A field or key default.
///
/// Defaults are plain values or plain functions. Resolving one never runs
/// hooks or touches the backing store.
#[derive(Clone)]
pub enum DefaultValue {
    Value(Value),
    Fn(fn() -> Value),
}

impl DefaultValue {
    pub fn resolve(&self) -> Value {
        match self {
            DefaultValue::Value(v) => v.clone(),
            DefaultValue::Fn(f) => f(),
        }
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Value(v) => f.debug_tuple("Value").field(v).finish(),
            DefaultValue::Fn(_) => f.write_str("Fn(<fn>)"),
        }
    }
}

/// How an entity is keyed.
#[derive(Clone, Debug)]
pub enum IdDescriptor {
    /// Generated by the backend.
    Surrogate { column: String, ty: FieldType },
    /// Set by the caller, or by `default` when the caller does not.
    Supplied {
        column: String,
        ty: FieldType,
        default: Option<DefaultValue>,
    },
    /// Composite key made of the foreign-key fields of the named edges
    /// (edge-schema entities).
    Composite(Vec<String>),
}

pub type Validator = fn(&Value) -> Result<(), String>;

#[derive(Clone, Debug)]
pub struct FieldDescriptor {
    pub name: String,
    pub column: String,
    pub ty: FieldType,
    /// Not required on create.
    pub optional: bool,
    /// Stored as NULL when unset; the only fields `clear` accepts.
    pub nillable: bool,
    /// Set on create only.
    pub immutable: bool,
    pub default: Option<DefaultValue>,
    pub update_default: Option<DefaultValue>,
    pub validators: Vec<Validator>,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        let name = name.into();
        Self {
            column: name.clone(),
            name,
            ty,
            optional: false,
            nillable: false,
            immutable: false,
            default: None,
            update_default: None,
            validators: Vec::new(),
        }
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn nillable(mut self) -> Self {
        self.nillable = true;
        self.optional = true;
        self
    }

    pub fn immutable(mut self) -> Self {
        self.immutable = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(DefaultValue::Value(value.into()));
        self
    }

    pub fn default_fn(mut self, f: fn() -> Value) -> Self {
        self.default = Some(DefaultValue::Fn(f));
        self
    }

    pub fn update_default(mut self, f: fn() -> Value) -> Self {
        self.update_default = Some(DefaultValue::Fn(f));
        self
    }

    pub fn validate_with(mut self, v: Validator) -> Self {
        self.validators.push(v);
        self
    }

    /// Runs the type check and the declared validators against `value`.
    pub fn check(&self, value: &Value) -> Result<(), GraphSqlError> {
        if !self.ty.accepts(value) {
            return Err(GraphSqlError::validation(
                &self.name,
                format!("value {value} is not a {:?}", self.ty),
            ));
        }
        for validate in &self.validators {
            validate(value).map_err(|msg| GraphSqlError::validation(&self.name, msg))?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct EdgeDescriptor {
    pub name: String,
    /// Name of the neighbor entity.
    pub target: String,
    pub rel: Rel,
    pub inverse: bool,
    pub bidi: bool,
    /// The join table for M2M edges, otherwise the table holding the
    /// foreign key.
    pub table: String,
    pub columns: Vec<String>,
    pub required: bool,
    /// Field of this entity exposing the foreign key (`user_id` for `user`).
    pub field: Option<String>,
    /// Edge-schema entity stored in the join table.
    pub through: Option<String>,
}

impl EdgeDescriptor {
    pub fn new(
        name: impl Into<String>,
        target: impl Into<String>,
        rel: Rel,
        table: impl Into<String>,
        columns: &[&str],
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            rel,
            inverse: false,
            bidi: false,
            table: table.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            required: false,
            field: None,
            through: None,
        }
    }

    pub fn inverse(mut self) -> Self {
        self.inverse = true;
        self
    }

    pub fn bidi(mut self) -> Self {
        self.bidi = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.field = Some(name.into());
        self
    }

    pub fn through(mut self, entity: impl Into<String>) -> Self {
        self.through = Some(entity.into());
        self
    }

    /// At most one neighbor per node.
    pub fn unique(&self) -> bool {
        matches!(self.rel, Rel::O2O | Rel::M2O)
    }
}

#[derive(Clone, Debug)]
pub struct EntitySchema {
    pub name: String,
    pub table: String,
    pub id: IdDescriptor,
    pub fields: Vec<FieldDescriptor>,
    pub edges: Vec<EdgeDescriptor>,
}

impl EntitySchema {
    /// An entity keyed by a generated integer `id`.
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            id: IdDescriptor::Surrogate {
                column: "id".into(),
                ty: FieldType::Int,
            },
            fields: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn id(mut self, id: IdDescriptor) -> Self {
        self.id = id;
        self
    }

    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    pub fn edge(mut self, edge: EdgeDescriptor) -> Self {
        self.edges.push(edge);
        self
    }

    pub fn field_desc(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn edge_desc(&self, name: &str) -> Option<&EdgeDescriptor> {
        self.edges.iter().find(|e| e.name == name)
    }

    /// The edge a field exposes the foreign key of, if any.
    pub fn edge_of_field(&self, field: &str) -> Option<&EdgeDescriptor> {
        self.edges.iter().find(|e| e.field.as_deref() == Some(field))
    }

    /// Key column and type of a single-key entity.
    pub fn id_field(&self) -> Option<FieldSpec> {
        match &self.id {
            IdDescriptor::Surrogate { column, ty } | IdDescriptor::Supplied { column, ty, .. } => {
                Some(FieldSpec::new(column.clone(), *ty))
            }
            IdDescriptor::Composite(_) => None,
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self.id, IdDescriptor::Composite(_))
    }
}

/// Registry of every entity of the graph.
#[derive(Clone, Debug, Default)]
pub struct Schema {
    entities: IndexMap<String, EntitySchema>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity(mut self, entity: EntitySchema) -> Self {
        self.add(entity);
        self
    }

    pub fn add(&mut self, entity: EntitySchema) {
        self.entities.insert(entity.name.clone(), entity);
    }

    pub fn get(&self, name: &str) -> Result<&EntitySchema, GraphSqlError> {
        self.entities
            .get(name)
            .ok_or_else(|| GraphSqlError::invalid_spec(format!("unknown entity {name:?}")))
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntitySchema> {
        self.entities.values()
    }

    pub fn edge(&self, entity: &str, edge: &str) -> Result<&EdgeDescriptor, GraphSqlError> {
        self.get(entity)?.edge_desc(edge).ok_or_else(|| {
            GraphSqlError::invalid_spec(format!("entity {entity:?} has no edge {edge:?}"))
        })
    }

    /// Checks that every edge points at a declared entity with the right
    /// number of columns, and that composite keys name M2O edges that
    /// expose a field.
    pub fn validate(&self) -> Result<(), GraphSqlError> {
        for entity in self.entities.values() {
            for edge in &entity.edges {
                self.get(&edge.target)?;
                if let Some(through) = &edge.through {
                    self.get(through)?;
                }
                let want = if edge.rel == Rel::M2M { 2 } else { 1 };
                if edge.columns.len() != want {
                    return Err(GraphSqlError::invalid_spec(format!(
                        "edge {}.{} declares {} columns, want {want}",
                        entity.name,
                        edge.name,
                        edge.columns.len()
                    )));
                }
                if let Some(field) = &edge.field {
                    if entity.field_desc(field).is_none() {
                        return Err(GraphSqlError::invalid_spec(format!(
                            "edge {}.{} exposes undeclared field {field:?}",
                            entity.name, edge.name
                        )));
                    }
                }
            }
            if let IdDescriptor::Composite(edges) = &entity.id {
                for name in edges {
                    let edge = entity.edge_desc(name).ok_or_else(|| {
                        GraphSqlError::invalid_spec(format!(
                            "composite key of {} names unknown edge {name:?}",
                            entity.name
                        ))
                    })?;
                    if edge.rel != Rel::M2O || edge.field.is_none() {
                        return Err(GraphSqlError::invalid_spec(format!(
                            "composite key edge {}.{name} must be an M2O edge exposing a field",
                            entity.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Identity of `entity` as an [`IdSpec`] without key values.
    pub fn id_spec(&self, entity: &str) -> Result<IdSpec, GraphSqlError> {
        let schema = self.get(entity)?;
        match &schema.id {
            IdDescriptor::Surrogate { column, ty } | IdDescriptor::Supplied { column, ty, .. } => {
                Ok(IdSpec::Single(FieldSpec::new(column.clone(), *ty)))
            }
            IdDescriptor::Composite(edges) => {
                let mut fields = Vec::with_capacity(edges.len());
                for name in edges {
                    let edge = self.edge(entity, name)?;
                    let column = edge.columns[0].clone();
                    let ty = self.target_id(edge)?.ty;
                    fields.push(FieldSpec::new(column, ty));
                }
                Ok(IdSpec::Composite(fields))
            }
        }
    }

    /// Column layout of `entity`: key, fields, then foreign keys held in
    /// its own table.
    pub fn node_spec(&self, entity: &str) -> Result<NodeSpec, GraphSqlError> {
        let schema = self.get(entity)?;
        let mut node = NodeSpec::new(&schema.table, self.id_spec(entity)?);
        for field in &schema.fields {
            if node.field_type(&field.column).is_none() {
                node = node.column(&field.column, field.ty);
            }
        }
        for edge in &schema.edges {
            let spec = self.edge_spec(entity, &edge.name)?;
            if spec.sets_own_column() && node.field_type(&edge.columns[0]).is_none() {
                node = node.column(&edge.columns[0], spec.target.id.ty);
            }
        }
        Ok(node)
    }

    fn target_id(&self, edge: &EdgeDescriptor) -> Result<FieldSpec, GraphSqlError> {
        self.get(&edge.target)?.id_field().ok_or_else(|| {
            GraphSqlError::invalid_spec(format!(
                "edge {:?} points at composite-key entity {:?}",
                edge.name, edge.target
            ))
        })
    }

    /// Edge spec of `entity.edge` with no target nodes.
    pub fn edge_spec(&self, entity: &str, edge: &str) -> Result<EdgeSpec, GraphSqlError> {
        let desc = self.edge(entity, edge)?;
        Ok(EdgeSpec::new(desc.rel, &desc.table, desc.columns.clone(), self.target_id(desc)?)
            .inverse(desc.inverse)
            .bidi(desc.bidi)
            .required(desc.required))
    }

    /// Join-table row template of an edge-schema edge: the `through`
    /// entity's fields filled from their declared defaults. Key columns of
    /// the join table are skipped; a required field with no default fails.
    pub fn edge_template(&self, entity: &str, edge: &str) -> Result<Vec<FieldSpec>, GraphSqlError> {
        let desc = self.edge(entity, edge)?;
        let Some(through) = &desc.through else {
            return Ok(Vec::new());
        };
        let through = self.get(through)?;
        let mut template = Vec::new();
        for field in &through.fields {
            if desc.columns.contains(&field.column) {
                continue;
            }
            match &field.default {
                Some(default) => {
                    let value = default.resolve();
                    field.check(&value)?;
                    template.push(FieldSpec::with_value(&field.column, field.ty, value));
                }
                None if field.optional => {}
                None => {
                    return Err(GraphSqlError::validation(
                        &field.name,
                        format!(
                            "missing required field \"{}.{}\" for edge {entity}.{edge}",
                            through.name, field.name
                        ),
                    ));
                }
            }
        }
        Ok(template)
    }
}
