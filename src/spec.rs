//! Declarative description of nodes, edges and the operations the graph
//! compiler consumes.
//!
//! Specs are built per call and treated as immutable by the compiler:
//! compiling the same spec twice produces identical statements.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::GraphSqlError;
use crate::field::{FieldType, Value};
use crate::sql::{ConflictOption, Opaque, P, Predicate, Selector, TableRef};

/// A column, its logical type, and (for writes) the value to store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub column: String,
    pub ty: FieldType,
    pub value: Value,
}

impl FieldSpec {
    pub fn new(column: impl Into<String>, ty: FieldType) -> Self {
        Self {
            column: column.into(),
            ty,
            value: Value::Null,
        }
    }

    pub fn with_value(column: impl Into<String>, ty: FieldType, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            ty,
            value: value.into(),
        }
    }

    /// Checks that the value has the runtime shape the type tag declares.
    pub fn check(&self) -> Result<(), GraphSqlError> {
        if self.ty.accepts(&self.value) {
            Ok(())
        } else {
            Err(GraphSqlError::invalid_spec(format!(
                "value {} does not match type {:?} of column {:?}",
                self.value, self.ty, self.column
            )))
        }
    }
}

/// Identity of a node: one surrogate key or a composite key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum IdSpec {
    Single(FieldSpec),
    Composite(Vec<FieldSpec>),
}

impl IdSpec {
    pub fn columns(&self) -> Vec<&str> {
        match self {
            IdSpec::Single(f) => vec![f.column.as_str()],
            IdSpec::Composite(fs) => fs.iter().map(|f| f.column.as_str()).collect(),
        }
    }

    pub fn fields(&self) -> &[FieldSpec] {
        match self {
            IdSpec::Single(f) => std::slice::from_ref(f),
            IdSpec::Composite(fs) => fs,
        }
    }

    pub fn single(&self) -> Option<&FieldSpec> {
        match self {
            IdSpec::Single(f) => Some(f),
            IdSpec::Composite(_) => None,
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, IdSpec::Composite(_))
    }

    /// Values carried by the id fields, in key order.
    pub fn values(&self) -> Vec<Value> {
        self.fields().iter().map(|f| f.value.clone()).collect()
    }
}

/// Storage shape of one node type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub table: String,
    pub columns: Vec<FieldSpec>,
    pub id: IdSpec,
}

impl NodeSpec {
    /// Creates a node spec whose column list starts with the id column(s).
    pub fn new(table: impl Into<String>, id: IdSpec) -> Self {
        let columns = id
            .fields()
            .iter()
            .map(|f| FieldSpec::new(f.column.clone(), f.ty))
            .collect();
        Self {
            table: table.into(),
            columns,
            id,
        }
    }

    /// Appends a column, ignoring duplicates.
    pub fn column(mut self, column: impl Into<String>, ty: FieldType) -> Self {
        let column = column.into();
        if self.field_type(&column).is_none() {
            self.columns.push(FieldSpec::new(column, ty));
        }
        self
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|f| f.column.clone()).collect()
    }

    pub fn field_type(&self, column: &str) -> Option<FieldType> {
        self.columns
            .iter()
            .find(|f| f.column == column)
            .map(|f| f.ty)
    }

    pub fn id_columns(&self) -> Vec<&str> {
        self.id.columns()
    }

    /// Builds the WHERE condition matching one node by its key.
    pub fn id_predicate(&self, values: &[Value]) -> Result<P, GraphSqlError> {
        let fields = self.id.fields();
        if fields.len() != values.len() {
            return Err(GraphSqlError::invalid_spec(format!(
                "table {:?} has a {}-column key, got {} values",
                self.table,
                fields.len(),
                values.len()
            )));
        }
        let mut preds: Vec<P> = fields
            .iter()
            .zip(values)
            .map(|(f, v)| P::eq(f.column.clone(), v.clone()))
            .collect();
        if preds.len() == 1 {
            return Ok(preds.remove(0));
        }
        Ok(P::and(preds))
    }

    /// Narrows the column list to `columns`. The id column of a
    /// surrogate-key node is always kept.
    pub fn project(&self, columns: &[String]) -> Result<NodeSpec, GraphSqlError> {
        let mut projected = Vec::with_capacity(columns.len() + 1);
        if let IdSpec::Single(id) = &self.id {
            projected.push(FieldSpec::new(id.column.clone(), id.ty));
        }
        for column in columns {
            let ty = self.field_type(column).ok_or_else(|| {
                GraphSqlError::invalid_spec(format!(
                    "unknown column {column:?} for table {:?}",
                    self.table
                ))
            })?;
            if !projected.iter().any(|f: &FieldSpec| &f.column == column) {
                projected.push(FieldSpec::new(column.clone(), ty));
            }
        }
        Ok(NodeSpec {
            table: self.table.clone(),
            columns: projected,
            id: self.id.clone(),
        })
    }

    pub fn validate(&self) -> Result<(), GraphSqlError> {
        if self.table.is_empty() {
            return Err(GraphSqlError::invalid_spec("node spec without a table"));
        }
        if let IdSpec::Composite(fields) = &self.id {
            if fields.len() < 2 {
                return Err(GraphSqlError::invalid_spec(format!(
                    "composite key of table {:?} needs at least 2 columns",
                    self.table
                )));
            }
        }
        for column in self.id.columns() {
            if self.field_type(column).is_none() {
                return Err(GraphSqlError::invalid_spec(format!(
                    "key column {column:?} missing from the column list of {:?}",
                    self.table
                )));
            }
        }
        Ok(())
    }
}

/// Relation kind of an edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rel {
    O2O,
    O2M,
    M2O,
    M2M,
}

impl fmt::Display for Rel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Rel::O2O => "O2O",
            Rel::O2M => "O2M",
            Rel::M2O => "M2O",
            Rel::M2M => "M2M",
        })
    }
}

/// Where the rows of an edge live.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backing {
    /// A foreign-key column, in the node's own table or in the target's.
    ForeignKey { own_table: bool },
    JoinTable,
}

/// The nodes an edge points to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EdgeTarget {
    pub nodes: Vec<Value>,
    /// Id column and type of the target node.
    pub id: FieldSpec,
    /// Extra columns written to the join table (edge schemas).
    pub fields: Vec<FieldSpec>,
}

impl EdgeTarget {
    pub fn field_values(&self) -> Vec<Value> {
        self.fields.iter().map(|f| f.value.clone()).collect()
    }
}

/// A relationship between the node being written or read and its
/// neighbors.
///
/// For O2O and M2O edges `columns` holds the foreign-key column; for M2M it
/// holds the two key columns of the join table, owner first.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EdgeSpec {
    pub rel: Rel,
    pub inverse: bool,
    pub bidi: bool,
    pub table: String,
    pub columns: Vec<String>,
    /// The foreign key may not be NULL.
    pub required: bool,
    pub target: EdgeTarget,
}

impl EdgeSpec {
    pub fn new(rel: Rel, table: impl Into<String>, columns: Vec<String>, target_id: FieldSpec) -> Self {
        Self {
            rel,
            inverse: false,
            bidi: false,
            table: table.into(),
            columns,
            required: false,
            target: EdgeTarget {
                nodes: Vec::new(),
                id: target_id,
                fields: Vec::new(),
            },
        }
    }

    pub fn inverse(mut self, inverse: bool) -> Self {
        self.inverse = inverse;
        self
    }

    pub fn bidi(mut self, bidi: bool) -> Self {
        self.bidi = bidi;
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn nodes(mut self, nodes: Vec<Value>) -> Self {
        self.target.nodes = nodes;
        self
    }

    pub fn fields(mut self, fields: Vec<FieldSpec>) -> Self {
        self.target.fields = fields;
        self
    }

    pub fn backing(&self) -> Backing {
        match self.rel {
            Rel::M2M => Backing::JoinTable,
            Rel::M2O => Backing::ForeignKey { own_table: true },
            Rel::O2M => Backing::ForeignKey { own_table: false },
            Rel::O2O => Backing::ForeignKey {
                own_table: self.inverse || self.bidi,
            },
        }
    }

    /// The edge sets a foreign-key column on the node's own row.
    pub fn sets_own_column(&self) -> bool {
        matches!(self.backing(), Backing::ForeignKey { own_table: true })
    }

    /// Writing the edge touches a table other than the node's own.
    pub fn is_external(&self) -> bool {
        match self.rel {
            Rel::M2M | Rel::O2M => true,
            Rel::O2O => !self.inverse,
            Rel::M2O => false,
        }
    }

    /// Join-table columns as (owner, neighbor) from this side's view.
    pub fn join_columns(&self) -> Result<(&str, &str), GraphSqlError> {
        match self.columns.as_slice() {
            [a, b] if self.inverse => Ok((b.as_str(), a.as_str())),
            [a, b] => Ok((a.as_str(), b.as_str())),
            _ => Err(GraphSqlError::invalid_spec(format!(
                "join table {:?} needs exactly 2 columns",
                self.table
            ))),
        }
    }

    /// The foreign-key column of an FK-backed edge.
    pub fn fk_column(&self) -> Result<&str, GraphSqlError> {
        match self.columns.as_slice() {
            [c] => Ok(c.as_str()),
            _ => Err(GraphSqlError::invalid_spec(format!(
                "{} edge on table {:?} needs exactly 1 foreign-key column",
                self.rel, self.table
            ))),
        }
    }

    pub fn validate(&self) -> Result<(), GraphSqlError> {
        match self.backing() {
            Backing::JoinTable => {
                self.join_columns()?;
            }
            Backing::ForeignKey { .. } => {
                self.fk_column()?;
                if !self.target.fields.is_empty() {
                    return Err(GraphSqlError::invalid_spec(format!(
                        "edge fields on {} edge of table {:?}; only join tables carry edge fields",
                        self.rel, self.table
                    )));
                }
            }
        }
        if self.rel == Rel::O2O && self.target.nodes.len() > 1 {
            return Err(GraphSqlError::invalid_spec(format!(
                "O2O edge on table {:?} got {} target nodes",
                self.table,
                self.target.nodes.len()
            )));
        }
        if self.sets_own_column() && self.target.nodes.len() > 1 {
            return Err(GraphSqlError::invalid_spec(format!(
                "{} edge column {:?} can hold only one target",
                self.rel, self.columns[0]
            )));
        }
        self.target.fields.iter().try_for_each(FieldSpec::check)
    }
}

/// Field mutations of an update.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FieldMut {
    /// `column = value`
    pub set: Vec<FieldSpec>,
    /// `column = column + value`
    pub add: Vec<FieldSpec>,
    /// `column = NULL`
    pub clear: Vec<FieldSpec>,
}

/// Edge mutations of an update, applied clear, then remove, then add.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EdgeMut {
    /// Edges whose every link is removed. Target nodes are ignored.
    pub clear: Vec<EdgeSpec>,
    /// Edges whose links to the target nodes are removed.
    pub remove: Vec<EdgeSpec>,
    pub add: Vec<EdgeSpec>,
}

impl EdgeMut {
    pub fn is_empty(&self) -> bool {
        self.clear.is_empty() && self.remove.is_empty() && self.add.is_empty()
    }

    pub fn has_external(&self) -> bool {
        self.clear
            .iter()
            .chain(&self.remove)
            .chain(&self.add)
            .any(EdgeSpec::is_external)
    }
}

/// A read of nodes.
#[derive(Clone)]
pub struct QuerySpec {
    pub node: NodeSpec,
    /// Source selector from a traversal step, replacing the node's table.
    pub from: Option<Selector>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub unique: bool,
    pub predicates: Vec<Predicate>,
    pub order: Vec<Predicate>,
}

impl QuerySpec {
    pub fn new(node: NodeSpec) -> Self {
        Self {
            node,
            from: None,
            limit: None,
            offset: None,
            unique: false,
            predicates: Vec::new(),
            order: Vec::new(),
        }
    }

    pub fn where_(mut self, p: Predicate) -> Self {
        self.predicates.push(p);
        self
    }
}

impl fmt::Debug for QuerySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuerySpec")
            .field("node", &self.node)
            .field("from", &self.from)
            .field("limit", &self.limit)
            .field("offset", &self.offset)
            .field("unique", &self.unique)
            .field("predicates", &Opaque(self.predicates.len()))
            .field("order", &Opaque(self.order.len()))
            .finish()
    }
}

/// Creation of one node and its edges.
#[derive(Clone, Debug)]
pub struct CreateSpec {
    pub table: String,
    /// `None` for composite-key nodes (edge schemas). A `Null` value means
    /// the backend generates the key.
    pub id: Option<FieldSpec>,
    pub fields: Vec<FieldSpec>,
    pub edges: Vec<EdgeSpec>,
    pub on_conflict: Vec<ConflictOption>,
}

impl CreateSpec {
    pub fn new(table: impl Into<String>, id: Option<FieldSpec>) -> Self {
        Self {
            table: table.into(),
            id,
            fields: Vec::new(),
            edges: Vec::new(),
            on_conflict: Vec::new(),
        }
    }

    pub fn set_field(&mut self, column: impl Into<String>, ty: FieldType, value: impl Into<Value>) {
        self.fields.push(FieldSpec::with_value(column, ty, value));
    }

    pub fn has_external_edges(&self) -> bool {
        self.edges.iter().any(EdgeSpec::is_external)
    }
}

/// Creation of many nodes of one table in a single INSERT.
#[derive(Clone, Debug, Default)]
pub struct BatchCreateSpec {
    pub nodes: Vec<CreateSpec>,
    pub on_conflict: Vec<ConflictOption>,
}

/// Update of one node (by the id values carried in `node.id`) or of every
/// node matching the predicates.
#[derive(Clone)]
pub struct UpdateSpec {
    pub node: NodeSpec,
    pub fields: FieldMut,
    pub edges: EdgeMut,
    pub predicates: Vec<Predicate>,
    /// Read the updated row back after an update by id.
    pub returning: bool,
}

impl UpdateSpec {
    pub fn new(node: NodeSpec) -> Self {
        Self {
            node,
            fields: FieldMut::default(),
            edges: EdgeMut::default(),
            predicates: Vec::new(),
            returning: false,
        }
    }

    pub fn set_field(&mut self, column: impl Into<String>, ty: FieldType, value: impl Into<Value>) {
        self.fields.set.push(FieldSpec::with_value(column, ty, value));
    }

    pub fn add_field(&mut self, column: impl Into<String>, ty: FieldType, value: impl Into<Value>) {
        self.fields.add.push(FieldSpec::with_value(column, ty, value));
    }

    pub fn clear_field(&mut self, column: impl Into<String>, ty: FieldType) {
        self.fields.clear.push(FieldSpec::new(column, ty));
    }
}

impl fmt::Debug for UpdateSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateSpec")
            .field("node", &self.node)
            .field("fields", &self.fields)
            .field("edges", &self.edges)
            .field("predicates", &Opaque(self.predicates.len()))
            .field("returning", &self.returning)
            .finish()
    }
}

/// Deletion of one node by key, or of every node matching the predicates.
#[derive(Clone)]
pub struct DeleteSpec {
    pub node: NodeSpec,
    pub key: Option<Vec<Value>>,
    pub predicates: Vec<Predicate>,
}

impl DeleteSpec {
    pub fn new(node: NodeSpec) -> Self {
        Self {
            node,
            key: None,
            predicates: Vec::new(),
        }
    }
}

impl fmt::Debug for DeleteSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeleteSpec")
            .field("node", &self.node)
            .field("key", &self.key)
            .field("predicates", &Opaque(self.predicates.len()))
            .finish()
    }
}

/// Listing of the raw `(out, in)` pairs stored in a join table.
#[derive(Clone)]
pub struct EdgeQuerySpec {
    pub edge: EdgeSpec,
    pub predicates: Vec<Predicate>,
}

/// `EQ` for one key, `IN` for many.
pub(crate) fn match_ids(column: &str, ids: &[Value]) -> P {
    match ids {
        [one] => P::eq(column, one.clone()),
        many => P::in_values(column, many.to_vec()),
    }
}

/// One hop of a graph traversal: from a node (or a set of nodes) across an
/// edge to its neighbors.
#[derive(Clone, Debug, PartialEq)]
pub struct Step {
    pub from_table: String,
    pub from_column: String,
    pub rel: Rel,
    pub inverse: bool,
    pub edge_table: String,
    pub edge_columns: Vec<String>,
    pub to_table: String,
    pub to_column: String,
}

impl Step {
    /// Step across `edge` from nodes stored in `from` to nodes stored in
    /// `to`.
    pub fn new(from: &NodeSpec, edge: &EdgeSpec, to: &NodeSpec) -> Result<Self, GraphSqlError> {
        let from_column = from
            .id
            .single()
            .map(|f| f.column.clone())
            .ok_or_else(|| {
                GraphSqlError::invalid_spec(format!(
                    "cannot traverse from composite-key table {:?}",
                    from.table
                ))
            })?;
        let to_column = to
            .id
            .single()
            .map(|f| f.column.clone())
            .unwrap_or_else(|| edge.target.id.column.clone());
        edge.validate()?;
        Ok(Self {
            from_table: from.table.clone(),
            from_column,
            rel: edge.rel,
            inverse: edge.inverse,
            edge_table: edge.table.clone(),
            edge_columns: edge.columns.clone(),
            to_table: to.table.clone(),
            to_column,
        })
    }

    fn holds_fk_on_source(&self) -> bool {
        self.rel == Rel::M2O || (self.rel == Rel::O2O && self.inverse)
    }

    /// Join-table columns as (neighbor, owner).
    fn m2m_columns(&self) -> (&str, &str) {
        let (a, b) = (self.edge_columns[0].as_str(), self.edge_columns[1].as_str());
        if self.inverse { (a, b) } else { (b, a) }
    }

    fn fk(&self) -> &str {
        &self.edge_columns[0]
    }

    /// Neighbors of the single node `id`.
    pub fn neighbors(&self, id: Value) -> Selector {
        let to = TableRef::table(&self.to_table);
        let mut q = Selector::new();
        q.from(to.clone());
        match self.rel {
            Rel::M2M => {
                let (pk1, pk2) = self.m2m_columns();
                let join = TableRef::table(&self.edge_table);
                let mut matches = Selector::new();
                matches
                    .from(join.clone())
                    .select(vec![join.c(pk1)])
                    .where_(P::eq(join.c(pk2), id));
                let matches = TableRef::select(matches, "t1");
                let on = P::columns_eq(to.c(&self.to_column), matches.c(pk1));
                q.join(matches, on);
            }
            _ if self.holds_fk_on_source() => {
                let mut owner = Selector::from_table(&self.edge_table);
                owner
                    .select(vec![self.fk().to_string()])
                    .where_(P::eq(self.from_column.clone(), id));
                let owner = TableRef::select(owner, "t1");
                let on = P::columns_eq(to.c(&self.to_column), owner.c(self.fk()));
                q.join(owner, on);
            }
            _ => {
                q.where_(P::eq(to.c(self.fk()), id));
            }
        }
        q
    }

    /// Neighbors of every node selected by `set`.
    pub fn set_neighbors(&self, mut set: Selector) -> Selector {
        let to = TableRef::table(&self.to_table);
        let mut q = Selector::new();
        q.from(to.clone());
        match self.rel {
            Rel::M2M => {
                let (pk1, pk2) = self.m2m_columns();
                let from_col = set.c(&self.from_column);
                set.select(vec![from_col]);
                let set = TableRef::select(set, "t1");
                let join = TableRef::table(&self.edge_table);
                let mut matches = Selector::new();
                let on = P::columns_eq(join.c(pk2), set.c(&self.from_column));
                matches
                    .from(join.clone())
                    .select(vec![join.c(pk1)])
                    .join(set, on);
                let matches = TableRef::select(matches, "t2");
                let on = P::columns_eq(to.c(&self.to_column), matches.c(pk1));
                q.join(matches, on);
            }
            _ if self.holds_fk_on_source() => {
                let fk = set.c(self.fk());
                set.select(vec![fk]);
                let set = TableRef::select(set, "t1");
                let on = P::columns_eq(to.c(&self.to_column), set.c(self.fk()));
                q.join(set, on);
            }
            _ => {
                let from_col = set.c(&self.from_column);
                set.select(vec![from_col]);
                let set = TableRef::select(set, "t1");
                let on = P::columns_eq(to.c(self.fk()), set.c(&self.from_column));
                q.join(set, on);
            }
        }
        q
    }

    /// Restricts `q` to nodes that have at least one neighbor.
    pub fn has_neighbors(&self, q: &mut Selector) {
        match self.rel {
            Rel::M2M => {
                let (_, owner) = self.m2m_columns();
                let join = TableRef::table(&self.edge_table);
                let mut owners = Selector::new();
                owners.from(join.clone()).select(vec![join.c(owner)]);
                let p = P::in_select(q.c(&self.from_column), owners);
                q.where_(p);
            }
            _ if self.holds_fk_on_source() => {
                let p = P::not_null(q.c(self.fk()));
                q.where_(p);
            }
            _ => {
                let to = TableRef::table(&self.edge_table);
                let mut owners = Selector::new();
                owners
                    .from(to.clone())
                    .select(vec![to.c(self.fk())])
                    .where_(P::not_null(to.c(self.fk())));
                let p = P::in_select(q.c(&self.from_column), owners);
                q.where_(p);
            }
        }
    }

    /// Restricts `q` to nodes with at least one neighbor matching `pred`.
    pub fn has_neighbors_with(&self, q: &mut Selector, pred: &Predicate) {
        match self.rel {
            Rel::M2M => {
                let (pk1, pk2) = self.m2m_columns();
                let to = TableRef::table(&self.to_table);
                let edge = TableRef::table(&self.edge_table);
                let mut matches = Selector::new();
                matches.from(to.clone());
                pred(&mut matches);
                let mut join = Selector::new();
                let on = P::columns_eq(edge.c(pk1), to.c(&self.to_column));
                join.from(edge.clone())
                    .select(vec![edge.c(pk2)])
                    .join(to, on);
                if let Some(w) = matches.take_where() {
                    join.where_(w);
                }
                let p = P::in_select(q.c(&self.from_column), join);
                q.where_(p);
            }
            _ if self.holds_fk_on_source() => {
                let to = TableRef::table(&self.to_table);
                let mut matches = Selector::new();
                matches.from(to.clone()).select(vec![to.c(&self.to_column)]);
                pred(&mut matches);
                let p = P::in_select(q.c(self.fk()), matches);
                q.where_(p);
            }
            _ => {
                let to = TableRef::table(&self.edge_table);
                let mut matches = Selector::new();
                matches.from(to.clone()).select(vec![to.c(self.fk())]);
                pred(&mut matches);
                let p = P::in_select(q.c(&self.from_column), matches);
                q.where_(p);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::{Dialect, Render, field_eq};

    fn users() -> NodeSpec {
        NodeSpec::new("users", IdSpec::Single(FieldSpec::new("id", FieldType::Int)))
            .column("name", FieldType::String)
    }

    fn groups() -> NodeSpec {
        NodeSpec::new("groups", IdSpec::Single(FieldSpec::new("id", FieldType::Int)))
            .column("name", FieldType::String)
    }

    fn pets() -> NodeSpec {
        NodeSpec::new("pets", IdSpec::Single(FieldSpec::new("id", FieldType::Int)))
            .column("owner_id", FieldType::Int)
    }

    fn user_groups() -> EdgeSpec {
        EdgeSpec::new(
            Rel::M2M,
            "user_groups",
            vec!["user_id".into(), "group_id".into()],
            FieldSpec::new("id", FieldType::Int),
        )
    }

    #[test]
    fn composite_id_predicate_requires_full_key() {
        let node = NodeSpec::new(
            "likes",
            IdSpec::Composite(vec![
                FieldSpec::new("user_id", FieldType::Int),
                FieldSpec::new("tweet_id", FieldType::Int),
            ]),
        );
        node.validate().expect("valid node");
        let p = node
            .id_predicate(&[Value::Int(1), Value::Int(2)])
            .expect("predicate");
        assert_eq!(
            p.query(Dialect::Sqlite).sql,
            "\"user_id\" = ? AND \"tweet_id\" = ?"
        );
        assert!(node.id_predicate(&[Value::Int(1)]).is_err());
    }

    #[test]
    fn projection_keeps_surrogate_id() {
        let node = users().project(&["name".to_string()]).expect("projection");
        assert_eq!(node.column_names(), vec!["id", "name"]);
        assert!(users().project(&["nope".to_string()]).is_err());
    }

    #[test]
    fn m2m_neighbors_go_through_join_table() {
        let step = Step::new(&users(), &user_groups(), &groups()).expect("step");
        let stmt = step.neighbors(Value::Int(1)).query(Dialect::Sqlite);
        assert_eq!(
            stmt.sql,
            "SELECT * FROM \"groups\" JOIN (SELECT \"user_groups\".\"group_id\" FROM \"user_groups\" WHERE \"user_groups\".\"user_id\" = ?) AS \"t1\" ON \"groups\".\"id\" = \"t1\".\"group_id\""
        );
    }

    #[test]
    fn o2m_set_neighbors_join_on_foreign_key() {
        let edge = EdgeSpec::new(
            Rel::O2M,
            "pets",
            vec!["owner_id".into()],
            FieldSpec::new("id", FieldType::Int),
        );
        let step = Step::new(&users(), &edge, &pets()).expect("step");
        let mut set = Selector::from_table("users");
        field_eq("name", "a8m")(&mut set);
        let stmt = step.set_neighbors(set).query(Dialect::Sqlite);
        assert_eq!(
            stmt.sql,
            "SELECT * FROM \"pets\" JOIN (SELECT \"users\".\"id\" FROM \"users\" WHERE \"users\".\"name\" = ?) AS \"t1\" ON \"pets\".\"owner_id\" = \"t1\".\"id\""
        );
    }

    #[test]
    fn has_neighbors_with_filters_through_join_table() {
        let step = Step::new(&users(), &user_groups(), &groups()).expect("step");
        let mut q = Selector::from_table("users");
        step.has_neighbors_with(&mut q, &field_eq("name", "admins"));
        assert_eq!(
            q.query(Dialect::Sqlite).sql,
            "SELECT * FROM \"users\" WHERE \"users\".\"id\" IN (SELECT \"user_groups\".\"user_id\" FROM \"user_groups\" JOIN \"groups\" ON \"user_groups\".\"group_id\" = \"groups\".\"id\" WHERE \"groups\".\"name\" = ?)"
        );
    }
}
