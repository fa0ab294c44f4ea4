//! UPDATE compilation for one node (by key) or many (by predicate).

use ahash::AHashSet;

use crate::driver::{Driver, ExecQuerier, NopTx, Tx, rollback};
use crate::errors::GraphSqlError;
use crate::field::Value;
use crate::spec::{EdgeMut, EdgeSpec, IdSpec, NodeSpec, UpdateSpec};
use crate::sql::{Dialect, P, Predicate, Render, Selector, Statement, UpdateBuilder};

use super::edges::{EdgeWrite, compile_edge_writes, exec_edge_writes};
use super::query::decode_row;

/// A compiled update of a single node.
#[derive(Clone, Debug, PartialEq)]
pub struct UpdatePlan {
    /// `None` when the update only touches edges.
    pub update: Option<Statement>,
    /// Probe run when the update touched no row.
    pub exists: Statement,
    /// Read-back of the updated row.
    pub select: Option<Statement>,
    pub edges: Vec<EdgeWrite>,
    pub tx: bool,
}

/// WHERE condition contributed by predicate functions, qualified with the
/// node's table.
pub(crate) fn predicate_where(table: &str, preds: &[Predicate]) -> Option<P> {
    if preds.is_empty() {
        return None;
    }
    let mut selector = Selector::from_table(table);
    for pred in preds {
        pred(&mut selector);
    }
    selector.take_where()
}

/// Assignments to the node's own row, in order: cleared fields, cleared
/// own-column edges (unless re-set), set fields and added own-column edges,
/// then numeric additions.
fn set_table_columns(update: &mut UpdateBuilder, spec: &UpdateSpec) -> Result<(), GraphSqlError> {
    let edges = &spec.edges;
    for edge in &edges.remove {
        if edge.sets_own_column() {
            return Err(GraphSqlError::invalid_spec(format!(
                "{} edge column {:?} cannot be removed by target; clear it instead",
                edge.rel,
                edge.columns.first().map(String::as_str).unwrap_or_default()
            )));
        }
    }
    let mut assigned: AHashSet<&str> = AHashSet::new();
    for edge in edges.add.iter().filter(|e| e.sets_own_column()) {
        assigned.insert(edge.fk_column()?);
    }
    for f in &spec.fields.clear {
        update.set_null(&f.column);
    }
    for edge in edges.clear.iter().filter(|e| e.sets_own_column()) {
        let column = edge.fk_column()?;
        if !assigned.contains(column) {
            update.set_null(column);
        }
    }
    for f in &spec.fields.set {
        f.check()?;
        update.set(&f.column, f.value.clone());
    }
    for edge in edges.add.iter().filter(|e| e.sets_own_column()) {
        edge.validate()?;
        if let Some(target) = edge.target.nodes.first() {
            update.set(edge.fk_column()?, target.clone());
        }
    }
    for f in &spec.fields.add {
        f.check()?;
        if !f.ty.numeric() {
            return Err(GraphSqlError::invalid_spec(format!(
                "cannot add to non-numeric column {:?}",
                f.column
            )));
        }
        update.add(&f.column, f.value.clone());
    }
    Ok(())
}

fn external_edges(edges: &EdgeMut) -> EdgeMut {
    let keep = |list: &[EdgeSpec]| -> Vec<EdgeSpec> {
        list.iter().filter(|e| e.is_external()).cloned().collect()
    };
    EdgeMut {
        clear: keep(&edges.clear),
        remove: keep(&edges.remove),
        add: keep(&edges.add),
    }
}

fn key_values(node: &NodeSpec) -> Result<Vec<Value>, GraphSqlError> {
    let values = node.id.values();
    if values.iter().any(Value::is_null) {
        return Err(GraphSqlError::invalid_spec(format!(
            "update of table {:?} by key without a key value",
            node.table
        )));
    }
    Ok(values)
}

/// Compiles an update of the node whose key values are carried in
/// `spec.node.id`.
pub fn compile_update(spec: &UpdateSpec, dialect: Dialect) -> Result<UpdatePlan, GraphSqlError> {
    spec.node.validate()?;
    let key = key_values(&spec.node)?;
    let idp = spec.node.id_predicate(&key)?;
    let filter = predicate_where(&spec.node.table, &spec.predicates);
    let condition = match &filter {
        Some(p) => idp.clone().and_with(p.clone()),
        None => idp.clone(),
    };

    let mut update = UpdateBuilder::new(&spec.node.table);
    set_table_columns(&mut update, spec)?;
    let update = if update.is_empty() {
        None
    } else {
        update.where_(condition.clone());
        Some(update.query(dialect))
    };

    let mut exists = Selector::from_table(&spec.node.table);
    exists.select_raw("1").where_(condition).limit(1);

    let external = external_edges(&spec.edges);
    let edges = match (&spec.node.id, external.is_empty()) {
        (_, true) => Vec::new(),
        (IdSpec::Composite(_), false) => {
            return Err(GraphSqlError::invalid_spec(format!(
                "update of composite-key table {:?} cannot update external tables",
                spec.node.table
            )));
        }
        (IdSpec::Single(_), false) => compile_edge_writes(dialect, &key, &external)?,
    };

    let select = spec.returning.then(|| {
        let mut s = Selector::from_table(&spec.node.table);
        s.select(spec.node.column_names()).where_(idp);
        s.query(dialect)
    });

    let tx = !edges.is_empty() || (select.is_some() && update.is_some());
    Ok(UpdatePlan {
        update,
        exists: exists.query(dialect),
        select,
        edges,
        tx,
    })
}

fn not_found(node: &NodeSpec) -> GraphSqlError {
    let key: Vec<String> = node.id.values().iter().map(ToString::to_string).collect();
    GraphSqlError::not_found(format!("{} with key ({})", node.table, key.join(", ")))
}

fn apply_update<Q>(q: &Q, spec: &UpdateSpec, plan: &UpdatePlan) -> Result<Option<Vec<Value>>, GraphSqlError>
where
    Q: ExecQuerier + ?Sized,
{
    let affected = match &plan.update {
        Some(stmt) => q.exec(stmt)?.rows_affected,
        None => 0,
    };
    if affected == 0 && q.query(&plan.exists)?.is_empty() {
        return Err(not_found(&spec.node));
    }
    exec_edge_writes(q, &plan.edges)?;
    let Some(select) = &plan.select else {
        return Ok(None);
    };
    let row = q
        .query(select)?
        .rows
        .into_iter()
        .next()
        .ok_or_else(|| not_found(&spec.node))?;
    decode_row(&spec.node.columns, row).map(Some)
}

/// Updates one node by key. Returns the updated row, decoded against the
/// node's columns, when `spec.returning` is set.
///
/// An update that matches no row (missing key, or key filtered out by the
/// predicates) fails with `NotFound`.
pub fn update_node<D>(drv: &D, spec: &UpdateSpec) -> Result<Option<Vec<Value>>, GraphSqlError>
where
    D: Driver + ?Sized,
{
    let plan = compile_update(spec, drv.dialect())?;
    let tx: Box<dyn Tx + '_> = if plan.tx {
        drv.tx()?
    } else {
        Box::new(NopTx::new(drv))
    };
    match apply_update(tx.as_ref(), spec, &plan) {
        Ok(row) => {
            tx.commit()?;
            Ok(row)
        }
        Err(err) => Err(rollback(tx, err)),
    }
}

fn apply_update_many<Q>(q: &Q, spec: &UpdateSpec, dialect: Dialect) -> Result<usize, GraphSqlError>
where
    Q: ExecQuerier + ?Sized,
{
    let external = external_edges(&spec.edges);
    let mut update = UpdateBuilder::new(&spec.node.table);
    set_table_columns(&mut update, spec)?;
    let filter = predicate_where(&spec.node.table, &spec.predicates);

    if external.is_empty() {
        if update.is_empty() {
            return Ok(0);
        }
        if let Some(p) = filter {
            update.where_(p);
        }
        let affected = q.exec(&update.query(dialect))?.rows_affected;
        return usize::try_from(affected)
            .map_err(|_| GraphSqlError::inconsistent(format!("affected rows {affected}")));
    }

    let id = match &spec.node.id {
        IdSpec::Single(id) => id,
        IdSpec::Composite(_) => {
            return Err(GraphSqlError::invalid_spec(format!(
                "update of composite-key table {:?} cannot update external tables",
                spec.node.table
            )));
        }
    };
    let mut selector = Selector::from_table(&spec.node.table);
    let c = selector.c(&id.column);
    selector.select(vec![c]);
    if let Some(p) = filter {
        selector.where_(p);
    }
    let ids = q
        .query(&selector.query(dialect))?
        .scan_column()
        .into_iter()
        .map(|raw| id.ty.decode(raw))
        .collect::<Result<Vec<_>, _>>()?;
    if ids.is_empty() {
        return Ok(0);
    }
    let writes = compile_edge_writes(dialect, &ids, &external)?;
    exec_edge_writes(q, &writes)?;
    if !update.is_empty() {
        update.where_(P::in_values(id.column.clone(), ids.clone()));
        q.exec(&update.query(dialect))?;
    }
    Ok(ids.len())
}

/// Updates every node matching the spec predicates and returns how many
/// were affected. When edges in other tables change, the matching keys are
/// selected first and every write runs in one transaction.
pub fn update_nodes<D>(drv: &D, spec: &UpdateSpec) -> Result<usize, GraphSqlError>
where
    D: Driver + ?Sized,
{
    spec.node.validate()?;
    let dialect = drv.dialect();
    let tx: Box<dyn Tx + '_> = if external_edges(&spec.edges).is_empty() {
        Box::new(NopTx::new(drv))
    } else {
        drv.tx()?
    };
    match apply_update_many(tx.as_ref(), spec, dialect) {
        Ok(n) => {
            tx.commit()?;
            Ok(n)
        }
        Err(err) => Err(rollback(tx, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldType;
    use crate::spec::{FieldSpec, Rel};
    use crate::sql::field_gt;

    fn user(id: i64) -> NodeSpec {
        NodeSpec::new(
            "users",
            IdSpec::Single(FieldSpec::with_value("id", FieldType::Int, id)),
        )
        .column("name", FieldType::String)
        .column("age", FieldType::Int)
        .column("group_id", FieldType::Int)
    }

    fn group_edge() -> EdgeSpec {
        EdgeSpec::new(
            Rel::M2O,
            "users",
            vec!["group_id".into()],
            FieldSpec::new("id", FieldType::Int),
        )
    }

    #[test]
    fn clear_of_reassigned_own_column_is_skipped() {
        let mut spec = UpdateSpec::new(user(1));
        spec.clear_field("name", FieldType::String);
        spec.add_field("age", FieldType::Int, 1);
        spec.edges.clear.push(group_edge());
        spec.edges.add.push(group_edge().nodes(vec![Value::Int(5)]));
        spec.predicates.push(field_gt("age", 10));
        let plan = compile_update(&spec, Dialect::Sqlite).expect("compile");
        assert_eq!(
            plan.update.expect("update").sql,
            "UPDATE \"users\" SET \"name\" = NULL, \"group_id\" = ?, \"age\" = COALESCE(\"age\", 0) + ? WHERE \"id\" = ? AND \"users\".\"age\" > ?"
        );
        assert!(plan.edges.is_empty());
        assert!(!plan.tx);
    }

    #[test]
    fn m2m_clear_precedes_add() {
        let groups = EdgeSpec::new(
            Rel::M2M,
            "user_groups",
            vec!["user_id".into(), "group_id".into()],
            FieldSpec::new("id", FieldType::Int),
        );
        let mut spec = UpdateSpec::new(user(1));
        spec.edges.add.push(groups.clone().nodes(vec![Value::Int(2)]));
        spec.edges.clear.push(groups);
        let plan = compile_update(&spec, Dialect::Sqlite).expect("compile");
        assert!(plan.update.is_none());
        assert!(plan.tx);
        let sql: Vec<&str> = plan.edges.iter().map(|w| w.stmt.sql.as_str()).collect();
        assert_eq!(
            sql,
            vec![
                "DELETE FROM \"user_groups\" WHERE \"user_id\" = ?",
                "INSERT INTO \"user_groups\" (\"user_id\", \"group_id\") VALUES (?, ?) ON CONFLICT DO NOTHING",
            ]
        );
    }
}
