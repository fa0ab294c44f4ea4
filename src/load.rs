//! Eager loading: one extra query per edge, regrouped onto the parents.
//!
//! [`load_edge`] only reads. It returns the decoded neighbors together with
//! the `(parent, neighbor)` links found, and the caller applies them with
//! [`Loaded::assign`]. A failed load therefore leaves the parents exactly as
//! they were.

use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use indexmap::IndexMap;

use crate::driver::ExecQuerier;
use crate::errors::GraphSqlError;
use crate::field::Value;
use crate::graph::{compile_query, decode_row};
use crate::spec::{EdgeSpec, FieldSpec, NodeSpec, QuerySpec, Rel};
use crate::sql::{P, Render, Selector, TableRef};

/// A materialized node the loader can read keys from.
pub trait Node {
    fn node_id(&self) -> Value;

    /// Value of a column of the node's own row, if it was loaded.
    fn field_value(&self, column: &str) -> Option<Value>;
}

/// Neighbors of an edge load and the links back to the parents, as indexes
/// into the parent slice and into `neighbors`.
#[derive(Clone, Debug, PartialEq)]
pub struct Loaded<N> {
    pub neighbors: Vec<N>,
    pub links: Vec<(usize, usize)>,
}

impl<N> Loaded<N> {
    fn empty() -> Self {
        Self {
            neighbors: Vec::new(),
            links: Vec::new(),
        }
    }

    /// Mutable access to the neighbors, e.g. to load their own edges before
    /// they are assigned.
    pub fn neighbors_mut(&mut self) -> &mut [N] {
        &mut self.neighbors
    }

    /// Calls `f` once per `(parent, neighbor)` link.
    pub fn assign<T>(&self, parents: &mut [T], mut f: impl FnMut(&mut T, &N)) -> Result<(), GraphSqlError> {
        for &(p, n) in &self.links {
            let parent = parents.get_mut(p).ok_or_else(|| {
                GraphSqlError::inconsistent(format!("link to parent {p} outside the parent set"))
            })?;
            f(parent, &self.neighbors[n]);
        }
        Ok(())
    }
}

enum Strategy<'a> {
    /// The key sits on the parent row (M2O, inverse O2O).
    ParentFk(&'a str),
    /// The key sits on the neighbor row (O2M, O2O).
    NeighborFk(&'a str),
    /// Through a join table (M2M).
    JoinTable { owner: &'a str, neighbor: &'a str },
}

fn strategy(edge: &EdgeSpec) -> Result<Strategy<'_>, GraphSqlError> {
    Ok(match edge.rel {
        Rel::M2M => {
            let (owner, neighbor) = edge.join_columns()?;
            Strategy::JoinTable { owner, neighbor }
        }
        Rel::M2O => Strategy::ParentFk(edge.fk_column()?),
        Rel::O2O if edge.inverse => Strategy::ParentFk(edge.fk_column()?),
        Rel::O2O | Rel::O2M => Strategy::NeighborFk(edge.fk_column()?),
    })
}

fn single_id<'a>(node: &'a NodeSpec, role: &str) -> Result<&'a FieldSpec, GraphSqlError> {
    node.id.single().ok_or_else(|| {
        GraphSqlError::invalid_spec(format!(
            "cannot eager-load edges with {role} composite-key table {:?}",
            node.table
        ))
    })
}

fn position(columns: &[FieldSpec], column: &str) -> Result<usize, GraphSqlError> {
    columns.iter().position(|f| f.column == column).ok_or_else(|| {
        GraphSqlError::invalid_spec(format!("column {column:?} is not selected"))
    })
}

/// Groups parent indexes by a key, keeping first-seen key order.
fn group_by_key(keys: impl Iterator<Item = Option<Value>>) -> IndexMap<Value, Vec<usize>> {
    let mut groups: IndexMap<Value, Vec<usize>> = IndexMap::new();
    for (i, key) in keys.enumerate() {
        if let Some(key) = key.filter(|k| !k.is_null()) {
            groups.entry(key).or_default().push(i);
        }
    }
    groups
}

/// Loads the neighbors of `parents` across `edge`.
///
/// `owner` is the parents' node spec and `query` the neighbor query (with
/// any caller filters, ordering or projection). `decode` builds a neighbor
/// from its column names and decoded values; it runs exactly once per
/// distinct neighbor.
pub fn load_edge<Q, T, N>(
    q: &Q,
    owner: &NodeSpec,
    parents: &[T],
    edge: &EdgeSpec,
    mut query: QuerySpec,
    mut decode: impl FnMut(&[String], Vec<Value>) -> Result<N, GraphSqlError>,
) -> Result<Loaded<N>, GraphSqlError>
where
    Q: ExecQuerier + ?Sized,
    T: Node,
{
    if parents.is_empty() {
        return Ok(Loaded::empty());
    }
    let owner_id = single_id(owner, "owner")?.clone();
    let neighbor_id = single_id(&query.node, "neighbor")?.clone();
    let dialect = q.dialect();

    match strategy(edge)? {
        Strategy::ParentFk(fk) => {
            let groups = group_by_key(parents.iter().map(|p| p.field_value(fk)));
            if groups.is_empty() {
                return Ok(Loaded::empty());
            }
            let keys: Vec<Value> = groups.keys().cloned().collect();
            let column = neighbor_id.column.clone();
            query.predicates.push(Arc::new(move |s: &mut Selector| {
                let p = P::in_values(s.c(&column), keys.clone());
                s.where_(p);
            }));
            let id_at = position(&query.node.columns, &neighbor_id.column)?;
            let stmt = compile_query(&query)?.query(dialect);
            let columns = query.node.column_names();
            let mut loaded = Loaded::empty();
            for raw in q.query(&stmt)?.rows {
                let values = decode_row(&query.node.columns, raw)?;
                let id = values[id_at].clone();
                let holders = groups.get(&id).ok_or_else(|| {
                    GraphSqlError::inconsistent(format!(
                        "unexpected foreign-key {fk:?} returned {id}"
                    ))
                })?;
                let n = loaded.neighbors.len();
                loaded.neighbors.push(decode(&columns, values)?);
                loaded.links.extend(holders.iter().map(|&p| (p, n)));
            }
            tracing::trace!(edge = %edge.table, parents = parents.len(), neighbors = loaded.neighbors.len(), "loaded M2O edge");
            Ok(loaded)
        }
        Strategy::NeighborFk(fk) => {
            let groups = group_by_key(parents.iter().map(|p| Some(p.node_id())));
            let keys: Vec<Value> = groups.keys().cloned().collect();
            if query.node.field_type(fk).is_none() {
                query.node = query.node.column(fk, owner_id.ty);
            }
            let column = fk.to_string();
            query.predicates.push(Arc::new(move |s: &mut Selector| {
                let p = P::in_values(s.c(&column), keys.clone());
                s.where_(p);
            }));
            let fk_at = position(&query.node.columns, fk)?;
            let stmt = compile_query(&query)?.query(dialect);
            let columns = query.node.column_names();
            let mut loaded = Loaded::empty();
            for raw in q.query(&stmt)?.rows {
                let values = decode_row(&query.node.columns, raw)?;
                let key = values[fk_at].clone();
                if key.is_null() {
                    return Err(GraphSqlError::inconsistent(format!(
                        "foreign-key {fk:?} is NULL on a loaded neighbor"
                    )));
                }
                let holders = groups.get(&key).ok_or_else(|| {
                    GraphSqlError::inconsistent(format!(
                        "unexpected referenced foreign-key {fk:?} returned {key}"
                    ))
                })?;
                let n = loaded.neighbors.len();
                loaded.neighbors.push(decode(&columns, values)?);
                loaded.links.extend(holders.iter().map(|&p| (p, n)));
            }
            tracing::trace!(edge = %edge.table, parents = parents.len(), neighbors = loaded.neighbors.len(), "loaded O2M edge");
            Ok(loaded)
        }
        Strategy::JoinTable {
            owner: owner_column,
            neighbor: neighbor_column,
        } => {
            let groups = group_by_key(parents.iter().map(|p| Some(p.node_id())));
            let keys: Vec<Value> = groups.keys().cloned().collect();
            let join_table = edge.table.clone();
            let (oc, nc, target) = (
                owner_column.to_string(),
                neighbor_column.to_string(),
                neighbor_id.column.clone(),
            );
            query.predicates.push(Arc::new(move |s: &mut Selector| {
                let join = TableRef::table(&join_table);
                let on = P::columns_eq(s.c(&target), join.c(&nc));
                s.join(join.clone(), on);
                s.where_(P::in_values(join.c(&oc), keys.clone()));
                let columns = s.selected_columns();
                s.select(vec![join.c(&oc)]);
                s.append_select(columns);
                s.set_distinct(false);
            }));
            let id_at = position(&query.node.columns, &neighbor_id.column)?;
            let stmt = compile_query(&query)?.query(dialect);
            let columns = query.node.column_names();

            let mut loaded = Loaded::empty();
            let mut decoded: AHashMap<Value, usize> = AHashMap::new();
            let mut seen: AHashSet<(usize, usize)> = AHashSet::new();
            for mut raw in q.query(&stmt)?.rows {
                if raw.is_empty() {
                    return Err(GraphSqlError::inconsistent("join row without owner column"));
                }
                let out = owner_id.ty.decode(raw.remove(0))?;
                let holders = groups.get(&out).ok_or_else(|| {
                    GraphSqlError::inconsistent(format!(
                        "unexpected {:?} owner {out} returned",
                        edge.table
                    ))
                })?;
                let values = decode_row(&query.node.columns, raw)?;
                let id = values[id_at].clone();
                let n = match decoded.get(&id) {
                    Some(&n) => n,
                    None => {
                        let n = loaded.neighbors.len();
                        loaded.neighbors.push(decode(&columns, values)?);
                        decoded.insert(id, n);
                        n
                    }
                };
                for &p in holders {
                    if seen.insert((p, n)) {
                        loaded.links.push((p, n));
                    }
                }
            }
            tracing::trace!(edge = %edge.table, parents = parents.len(), neighbors = loaded.neighbors.len(), links = loaded.links.len(), "loaded M2M edge");
            Ok(loaded)
        }
    }
}
