//! Edge side-writes shared by create, batch create and update.
//!
//! Statements are emitted in a fixed order: join-table deletes, join-table
//! inserts, foreign-key clears, foreign-key links. A later add is never
//! undone by an earlier clear of the same edge.

use indexmap::IndexMap;

use crate::driver::ExecQuerier;
use crate::errors::GraphSqlError;
use crate::field::Value;
use crate::spec::{EdgeMut, EdgeSpec, Rel, match_ids};
use crate::sql::{ConflictOption, DeleteBuilder, Dialect, InsertBuilder, P, Render, Statement, UpdateBuilder};

/// One compiled edge statement. Foreign-key links carry the number of rows
/// they must touch; fewer means a target was already linked elsewhere.
#[derive(Clone, Debug, PartialEq)]
pub struct EdgeWrite {
    pub stmt: Statement,
    pub expect: Option<Expect>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Expect {
    pub rows: u64,
    pub message: String,
}

impl EdgeWrite {
    fn plain(stmt: Statement) -> Self {
        Self { stmt, expect: None }
    }
}

fn is_fk_external(edge: &EdgeSpec) -> bool {
    match edge.rel {
        Rel::O2M => true,
        Rel::O2O => !edge.inverse,
        Rel::M2O | Rel::M2M => false,
    }
}

/// `DELETE` per join table for cleared and removed M2M edges. Edges that
/// share a table are OR-ed into one statement.
fn m2m_deletes(dialect: Dialect, ids: &[Value], edges: &EdgeMut) -> Result<Vec<EdgeWrite>, GraphSqlError> {
    let mut tables: IndexMap<&str, Vec<P>> = IndexMap::new();
    let cleared = edges.clear.iter().map(|e| (e, true));
    let removed = edges.remove.iter().map(|e| (e, false));
    for (edge, clear_all) in cleared.chain(removed) {
        if edge.rel != Rel::M2M {
            continue;
        }
        let (from, to) = edge.join_columns()?;
        let preds = tables.entry(edge.table.as_str()).or_default();
        if clear_all {
            preds.push(match_ids(from, ids));
            if edge.bidi {
                preds.push(match_ids(to, ids));
            }
        } else {
            let nodes = &edge.target.nodes;
            if nodes.is_empty() {
                continue;
            }
            preds.push(P::and(vec![match_ids(from, ids), match_ids(to, nodes)]));
            if edge.bidi {
                preds.push(P::and(vec![match_ids(to, ids), match_ids(from, nodes)]));
            }
        }
    }
    Ok(tables
        .into_iter()
        .filter(|(_, preds)| !preds.is_empty())
        .map(|(table, preds)| {
            let mut delete = DeleteBuilder::new(table);
            delete.where_(P::or(preds));
            EdgeWrite::plain(delete.query(dialect))
        })
        .collect())
}

/// Join-table INSERTs for M2M links, one statement per table. `links`
/// pairs owner ids with the edge they are linked through.
pub(crate) fn m2m_inserts(
    dialect: Dialect,
    links: &[(&[Value], &EdgeSpec)],
) -> Result<Vec<EdgeWrite>, GraphSqlError> {
    let mut tables: IndexMap<&str, Vec<(&[Value], &EdgeSpec)>> = IndexMap::new();
    for &(ids, edge) in links {
        if edge.rel == Rel::M2M && !edge.target.nodes.is_empty() {
            tables
                .entry(edge.table.as_str())
                .or_default()
                .push((ids, edge));
        }
    }
    let mut out = Vec::with_capacity(tables.len());
    for (table, edges) in tables {
        let first = edges[0].1;
        first.join_columns()?;
        let mut columns = first.columns.clone();
        columns.extend(first.target.fields.iter().map(|f| f.column.clone()));
        let mut insert = InsertBuilder::new(table);
        insert.columns(columns);
        for &(ids, edge) in &edges {
            let extra = edge.target.field_values();
            let (pk1, pk2): (&[Value], &[Value]) = if edge.inverse {
                (edge.target.nodes.as_slice(), ids)
            } else {
                (ids, edge.target.nodes.as_slice())
            };
            for a in pk1 {
                for b in pk2 {
                    let mut row = vec![a.clone(), b.clone()];
                    row.extend(extra.iter().cloned());
                    insert.values(row);
                    if edge.bidi {
                        let mut row = vec![b.clone(), a.clone()];
                        row.extend(extra.iter().cloned());
                        insert.values(row);
                    }
                }
            }
        }
        if first.target.fields.is_empty() {
            insert.on_conflict(vec![ConflictOption::DoNothing]);
        }
        out.push(EdgeWrite::plain(insert.query(dialect)));
    }
    Ok(out)
}

/// `UPDATE .. SET fk = NULL` for cleared and removed edges whose key lives
/// in the neighbor's table.
fn fk_clears(dialect: Dialect, ids: &[Value], edges: &EdgeMut) -> Result<Vec<EdgeWrite>, GraphSqlError> {
    let cleared = edges.clear.iter().map(|e| (e, true));
    let removed = edges.remove.iter().map(|e| (e, false));
    let mut out = Vec::new();
    for (edge, clear_all) in cleared.chain(removed) {
        if !is_fk_external(edge) {
            continue;
        }
        let column = edge.fk_column()?;
        let mut p = match_ids(column, ids);
        if !clear_all {
            if edge.target.nodes.is_empty() {
                continue;
            }
            p = match_ids(&edge.target.id.column, &edge.target.nodes).and_with(p);
        }
        let mut update = UpdateBuilder::new(&edge.table);
        update.set_null(column).where_(p);
        out.push(EdgeWrite::plain(update.query(dialect)));
    }
    Ok(out)
}

/// `UPDATE .. SET fk = id WHERE target IN (..) AND fk IS NULL` for added
/// edges whose key lives in the neighbor's table.
pub(crate) fn fk_links<'a>(
    dialect: Dialect,
    ids: &[Value],
    edges: impl IntoIterator<Item = &'a EdgeSpec>,
) -> Result<Vec<EdgeWrite>, GraphSqlError> {
    let edges: Vec<&EdgeSpec> = edges
        .into_iter()
        .filter(|e| is_fk_external(e) && !e.target.nodes.is_empty())
        .collect();
    if edges.is_empty() {
        return Ok(Vec::new());
    }
    let id = match ids {
        [id] => id,
        _ => {
            return Err(GraphSqlError::invalid_spec(format!(
                "unable to link FK edge to more than 1 node: {ids:?}"
            )));
        }
    };
    let mut out = Vec::with_capacity(edges.len());
    for edge in edges {
        let column = edge.fk_column()?;
        let nodes = &edge.target.nodes;
        let mut update = UpdateBuilder::new(&edge.table);
        update
            .set(column, id.clone())
            .where_(match_ids(&edge.target.id.column, nodes).and_with(P::is_null(column)));
        let listed: Vec<String> = nodes.iter().map(ToString::to_string).collect();
        out.push(EdgeWrite {
            stmt: update.query(dialect),
            expect: Some(Expect {
                rows: nodes.len() as u64,
                message: format!(
                    "one of [{}] is already connected to a different {column}",
                    listed.join(" ")
                ),
            }),
        });
    }
    Ok(out)
}

/// Compiles every external edge write of an update (or create) of the nodes
/// `ids`, in execution order.
pub fn compile_edge_writes(
    dialect: Dialect,
    ids: &[Value],
    edges: &EdgeMut,
) -> Result<Vec<EdgeWrite>, GraphSqlError> {
    for edge in edges.clear.iter().chain(&edges.remove).chain(&edges.add) {
        edge.validate()?;
    }
    let mut out = m2m_deletes(dialect, ids, edges)?;
    let links: Vec<(&[Value], &EdgeSpec)> = edges.add.iter().map(|e| (ids, e)).collect();
    out.extend(m2m_inserts(dialect, &links)?);
    out.extend(fk_clears(dialect, ids, edges)?);
    out.extend(fk_links(dialect, ids, &edges.add)?);
    Ok(out)
}

/// Runs compiled edge writes in order, checking foreign-key link counts.
pub(crate) fn exec_edge_writes<Q>(q: &Q, writes: &[EdgeWrite]) -> Result<(), GraphSqlError>
where
    Q: ExecQuerier + ?Sized,
{
    for write in writes {
        let res = q.exec(&write.stmt)?;
        if let Some(expect) = &write.expect {
            if res.rows_affected < expect.rows {
                return Err(GraphSqlError::constraint(expect.message.clone()));
            }
        }
    }
    Ok(())
}
