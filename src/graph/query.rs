//! Read compilation: node selects, counts and raw join-table listings.

use crate::driver::{ExecQuerier, Rows};
use crate::errors::GraphSqlError;
use crate::field::Value;
use crate::spec::{EdgeQuerySpec, FieldSpec, QuerySpec};
use crate::sql::{Render, Selector, TableRef};

/// LIMIT substituted when only an offset is given.
pub const MAX_LIMIT: u64 = i32::MAX as u64;

fn source(spec: &QuerySpec) -> Selector {
    match &spec.from {
        Some(from) => from.clone(),
        None => Selector::from_table(&spec.node.table),
    }
}

/// Compiles a node query into a selector.
///
/// The selected columns are exactly the node's column list, in order, so
/// rows decode positionally against it.
pub fn compile_query(spec: &QuerySpec) -> Result<Selector, GraphSqlError> {
    spec.node.validate()?;
    let mut selector = source(spec);
    let columns = spec
        .node
        .columns
        .iter()
        .map(|f| selector.c(&f.column))
        .collect();
    selector.select(columns);
    if spec.unique {
        selector.distinct();
    }
    for pred in &spec.predicates {
        pred(&mut selector);
    }
    for order in &spec.order {
        order(&mut selector);
    }
    match (spec.limit, spec.offset) {
        (Some(limit), offset) => {
            selector.limit(limit);
            if let Some(offset) = offset {
                selector.offset(offset);
            }
        }
        (None, Some(offset)) => {
            selector.limit(MAX_LIMIT).offset(offset);
        }
        (None, None) => {}
    }
    Ok(selector)
}

/// Compiles a count of the nodes a query would return. Ordering is dropped;
/// a unique query counts distinct projected columns (or keys).
pub fn compile_count(spec: &QuerySpec) -> Result<Selector, GraphSqlError> {
    spec.node.validate()?;
    let mut selector = source(spec);
    for pred in &spec.predicates {
        pred(&mut selector);
    }
    selector.clear_order();
    if spec.unique {
        let columns = spec
            .node
            .columns
            .iter()
            .map(|f| selector.c(&f.column))
            .collect();
        selector.count(columns, true);
    } else {
        selector.count(Vec::new(), false);
    }
    Ok(selector)
}

/// Decodes one storage row positionally against `fields`.
pub fn decode_row(fields: &[FieldSpec], row: Vec<Value>) -> Result<Vec<Value>, GraphSqlError> {
    if row.len() != fields.len() {
        return Err(GraphSqlError::inconsistent(format!(
            "expected {} columns, the backend returned {}",
            fields.len(),
            row.len()
        )));
    }
    fields
        .iter()
        .zip(row)
        .map(|(f, raw)| f.ty.decode(raw))
        .collect()
}

/// Runs a node query and decodes every row into the node's logical types.
pub fn query_nodes<Q>(q: &Q, spec: &QuerySpec) -> Result<Rows, GraphSqlError>
where
    Q: ExecQuerier + ?Sized,
{
    let stmt = compile_query(spec)?.query(q.dialect());
    let raw = q.query(&stmt)?;
    let rows = raw
        .rows
        .into_iter()
        .map(|row| decode_row(&spec.node.columns, row))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Rows {
        columns: spec.node.column_names(),
        rows,
    })
}

pub fn count_nodes<Q>(q: &Q, spec: &QuerySpec) -> Result<usize, GraphSqlError>
where
    Q: ExecQuerier + ?Sized,
{
    let stmt = compile_count(spec)?.query(q.dialect());
    let n = q.query(&stmt)?.scan_int()?;
    usize::try_from(n).map_err(|_| GraphSqlError::inconsistent(format!("negative count {n}")))
}

/// Compiles a listing of the `(out, in)` pairs of a join table, from the
/// edge owner's point of view.
pub fn compile_edge_query(spec: &EdgeQuerySpec) -> Result<Selector, GraphSqlError> {
    let (out, inn) = spec.edge.join_columns()?;
    let table = TableRef::table(&spec.edge.table);
    let mut selector = Selector::new();
    selector
        .from(table.clone())
        .select(vec![table.c(out), table.c(inn)]);
    for pred in &spec.predicates {
        pred(&mut selector);
    }
    Ok(selector)
}

pub fn query_edges<Q>(q: &Q, spec: &EdgeQuerySpec) -> Result<Vec<(Value, Value)>, GraphSqlError>
where
    Q: ExecQuerier + ?Sized,
{
    let stmt = compile_edge_query(spec)?.query(q.dialect());
    let ty = spec.edge.target.id.ty;
    q.query(&stmt)?
        .rows
        .into_iter()
        .map(|row| match <[Value; 2]>::try_from(row) {
            Ok([out, inn]) => Ok((ty.decode(out)?, ty.decode(inn)?)),
            Err(row) => Err(GraphSqlError::inconsistent(format!(
                "edge listing returned {} columns",
                row.len()
            ))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldType;
    use crate::spec::{IdSpec, NodeSpec};
    use crate::sql::{Dialect, desc, field_eq};

    fn users() -> NodeSpec {
        NodeSpec::new("users", IdSpec::Single(FieldSpec::new("id", FieldType::Int)))
            .column("name", FieldType::String)
    }

    #[test]
    fn offset_without_limit_uses_sentinel() {
        let mut spec = QuerySpec::new(users());
        spec.offset = Some(10);
        spec.unique = true;
        spec.order.push(desc("name"));
        let stmt = compile_query(&spec).expect("compile").query(Dialect::Sqlite);
        assert_eq!(
            stmt.sql,
            "SELECT DISTINCT \"users\".\"id\", \"users\".\"name\" FROM \"users\" ORDER BY \"users\".\"name\" DESC LIMIT 2147483647 OFFSET 10"
        );
    }

    #[test]
    fn count_drops_order_and_respects_unique() {
        let mut spec = QuerySpec::new(users()).where_(field_eq("name", "a8m"));
        spec.order.push(desc("name"));
        let stmt = compile_count(&spec).expect("compile").query(Dialect::Postgres);
        assert_eq!(
            stmt.sql,
            "SELECT COUNT(*) FROM \"users\" WHERE \"users\".\"name\" = $1"
        );
        spec.unique = true;
        spec.node = spec.node.project(&[]).expect("project");
        let stmt = compile_count(&spec).expect("compile").query(Dialect::Postgres);
        assert_eq!(
            stmt.sql,
            "SELECT COUNT(DISTINCT \"users\".\"id\") FROM \"users\" WHERE \"users\".\"name\" = $1"
        );
    }
}
