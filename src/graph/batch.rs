//! Multi-row INSERT compilation for batch creates.

use std::collections::BTreeSet;

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::driver::{Driver, ExecQuerier, NopTx, Tx, rollback};
use crate::errors::GraphSqlError;
use crate::field::{FieldType, Value};
use crate::spec::{BatchCreateSpec, EdgeSpec};
use crate::sql::{ConflictOption, Dialect, InsertBuilder, Render, Statement};

use super::create::{check_conflict, table_columns};
use super::edges::{EdgeWrite, exec_edge_writes, fk_links, m2m_inserts};

/// How the keys of a batch are obtained.
#[derive(Clone, Debug, PartialEq)]
pub enum BatchIds {
    /// One `RETURNING` row per inserted node.
    Returning(FieldType),
    /// Consecutive keys starting at the driver's last-insert id (MySQL).
    LastInsertId,
    /// Every key was supplied by the caller.
    Supplied(Vec<Value>),
    None,
}

/// Conflict-target values of every batch row. A conflict clause may skip
/// rows, so returned keys are paired with rows by these values.
#[derive(Clone, Debug, PartialEq)]
pub struct RowKeys {
    pub columns: Vec<(String, FieldType)>,
    pub rows: Vec<Vec<Value>>,
}

#[derive(Clone, Debug)]
pub struct BatchPlan {
    pub insert: Statement,
    pub ids: BatchIds,
    pub tx: bool,
    /// Set when `RETURNING` also yields the conflict target.
    pub keys: Option<RowKeys>,
    conflict: bool,
    dialect: Dialect,
    edges: Vec<Vec<EdgeSpec>>,
}

impl BatchPlan {
    /// Edge statements to run once the key of every node is known. Join
    /// tables get one INSERT each for the whole batch; foreign-key links run
    /// per node.
    pub fn edge_writes(&self, ids: &[Value]) -> Result<Vec<EdgeWrite>, GraphSqlError> {
        if self.edges.iter().all(Vec::is_empty) {
            return Ok(Vec::new());
        }
        if ids.len() != self.edges.len() || ids.iter().any(Value::is_null) {
            return Err(GraphSqlError::invalid_spec(
                "cannot link edges of batch nodes whose keys were not returned",
            ));
        }
        let owners: Vec<[Value; 1]> = ids.iter().map(|id| [id.clone()]).collect();
        let mut links: Vec<(&[Value], &EdgeSpec)> = Vec::new();
        for (owner, edges) in owners.iter().zip(&self.edges) {
            links.extend(edges.iter().map(|e| (&owner[..], e)));
        }
        let mut out = m2m_inserts(self.dialect, &links)?;
        for (owner, edges) in owners.iter().zip(&self.edges) {
            out.extend(fk_links(self.dialect, owner, edges)?);
        }
        Ok(out)
    }
}

pub fn compile_batch_create(spec: &BatchCreateSpec, dialect: Dialect) -> Result<BatchPlan, GraphSqlError> {
    let first = spec
        .nodes
        .first()
        .ok_or_else(|| GraphSqlError::invalid_spec("empty batch"))?;
    let mut columns: BTreeSet<String> = BTreeSet::new();
    let mut rows: Vec<IndexMap<String, Value>> = Vec::with_capacity(spec.nodes.len());
    for (i, node) in spec.nodes.iter().enumerate() {
        if node.table != first.table {
            return Err(GraphSqlError::invalid_spec(format!(
                "more than 1 table for batch insert: {:?} != {:?}",
                node.table, first.table
            )));
        }
        if !node.on_conflict.is_empty() {
            return Err(GraphSqlError::invalid_spec(format!(
                "row {i} of a batch sets its own conflict options; set them on the batch"
            )));
        }
        let mut row = table_columns(&node.fields, &node.edges)?;
        if let Some(id) = node.id.as_ref().filter(|id| !id.value.is_null()) {
            id.check()?;
            row.insert(id.column.clone(), id.value.clone());
        }
        columns.extend(row.keys().cloned());
        rows.push(row);
    }
    let id_field = first.id.as_ref();
    if let Some(id) = id_field {
        let given = rows.iter().filter(|row| row.contains_key(&id.column)).count();
        if given != 0 && given != rows.len() {
            return Err(GraphSqlError::invalid_spec("inconsistent id values for batch insert"));
        }
    }
    let mut columns: Vec<String> = columns.into_iter().collect();
    if columns.is_empty() {
        // Neither DEFAULT VALUES takes several rows nor SQLite an upsert
        // clause after it, so a generated integer key is passed as NULL.
        match id_field {
            Some(id) if dialect == Dialect::Sqlite && id.ty.numeric() => {
                columns.push(id.column.clone());
            }
            _ if rows.len() == 1 && (spec.on_conflict.is_empty() || dialect != Dialect::Sqlite) => {}
            _ => {
                return Err(GraphSqlError::invalid_spec(format!(
                    "batch insert into {:?} sets no columns",
                    first.table
                )));
            }
        }
    }
    let mut insert = InsertBuilder::new(&first.table);
    insert.columns(columns.clone());
    for row in &rows {
        insert.values(
            columns
                .iter()
                .map(|c| row.get(c).cloned().unwrap_or(Value::Null))
                .collect(),
        );
    }
    check_conflict(dialect, &spec.on_conflict)?;
    if !spec.on_conflict.is_empty() {
        insert.on_conflict(spec.on_conflict.clone());
    }
    let mut keys = None;
    let ids = match id_field {
        None => BatchIds::None,
        Some(id) if dialect.supports_returning() => {
            let mut returning = vec![id.column.clone()];
            keys = row_keys(spec, &rows);
            if let Some(keys) = &keys {
                returning.extend(keys.columns.iter().map(|(c, _)| c.clone()));
            }
            insert.returning(returning);
            BatchIds::Returning(id.ty)
        }
        Some(id) if rows.iter().all(|row| row.contains_key(&id.column)) => BatchIds::Supplied(
            rows.iter()
                .map(|row| row.get(&id.column).cloned().unwrap_or(Value::Null))
                .collect(),
        ),
        Some(id) if id.ty.numeric() => BatchIds::LastInsertId,
        Some(_) => BatchIds::None,
    };
    let edges: Vec<Vec<EdgeSpec>> = spec
        .nodes
        .iter()
        .map(|n| n.edges.iter().filter(|e| e.is_external()).cloned().collect())
        .collect();
    Ok(BatchPlan {
        insert: insert.query(dialect),
        ids,
        tx: edges.iter().any(|e| !e.is_empty()),
        keys,
        conflict: !spec.on_conflict.is_empty(),
        dialect,
        edges,
    })
}

/// Conflict-target values per row, when the batch names target columns
/// whose types are known.
fn row_keys(spec: &BatchCreateSpec, rows: &[IndexMap<String, Value>]) -> Option<RowKeys> {
    let target = spec.on_conflict.iter().find_map(|o| match o {
        ConflictOption::Columns(columns) if !columns.is_empty() => Some(columns),
        _ => None,
    })?;
    let mut types: AHashMap<&str, FieldType> = AHashMap::new();
    for node in &spec.nodes {
        for f in node.id.iter().chain(&node.fields) {
            types.insert(&f.column, f.ty);
        }
        for edge in node.edges.iter().filter(|e| e.sets_own_column()) {
            if let Ok(column) = edge.fk_column() {
                types.insert(column, edge.target.id.ty);
            }
        }
    }
    let columns = target
        .iter()
        .map(|c| types.get(c.as_str()).map(|ty| (c.clone(), *ty)))
        .collect::<Option<Vec<_>>>()?;
    let rows = rows
        .iter()
        .map(|row| {
            columns
                .iter()
                .map(|(c, _)| row.get(c).cloned().unwrap_or(Value::Null))
                .collect()
        })
        .collect();
    Some(RowKeys { columns, rows })
}

/// Keys of a `RETURNING` batch in batch order. Rows a conflict clause
/// skipped get `Null`; without conflict-target values to pair by, keys are
/// only trusted when every row came back.
fn returned_ids(
    ty: FieldType,
    keys: Option<&RowKeys>,
    rows: Vec<Vec<Value>>,
    len: usize,
) -> Result<Vec<Value>, GraphSqlError> {
    if let Some(keys) = keys {
        let mut by_key: AHashMap<Vec<Value>, Value> = AHashMap::with_capacity(rows.len());
        for row in rows {
            let mut raw = row.into_iter();
            let id = ty.decode(raw.next().unwrap_or(Value::Null))?;
            let key = keys
                .columns
                .iter()
                .zip(raw)
                .map(|((_, ty), v)| ty.decode(v))
                .collect::<Result<Vec<_>, _>>()?;
            by_key.insert(key, id);
        }
        return Ok(keys
            .rows
            .iter()
            .map(|k| by_key.get(k).cloned().unwrap_or(Value::Null))
            .collect());
    }
    if rows.len() != len {
        return Ok(vec![Value::Null; len]);
    }
    rows.into_iter()
        .map(|row| row.into_iter().next().map_or(Ok(Value::Null), |raw| ty.decode(raw)))
        .collect()
}

fn insert_batch<Q>(q: &Q, plan: &BatchPlan, len: usize) -> Result<Vec<Value>, GraphSqlError>
where
    Q: ExecQuerier + ?Sized,
{
    let ids = match &plan.ids {
        BatchIds::Returning(ty) => {
            let rows = q.query(&plan.insert)?.rows;
            returned_ids(*ty, plan.keys.as_ref(), rows, len)?
        }
        BatchIds::LastInsertId => {
            let res = q.exec(&plan.insert)?;
            let mut ids = vec![Value::Null; len];
            // Keys are consecutive only when every row was inserted once.
            let all_inserted = usize::try_from(res.rows_affected).is_ok_and(|n| n == len);
            if let Some(first) = res.last_insert_id.filter(|_| all_inserted || !plan.conflict) {
                let affected = usize::try_from(res.rows_affected).unwrap_or(len).min(len);
                for (i, id) in ids.iter_mut().take(affected).enumerate() {
                    *id = Value::Int(first + i as i64);
                }
            }
            ids
        }
        BatchIds::Supplied(ids) => {
            q.exec(&plan.insert)?;
            ids.clone()
        }
        BatchIds::None => {
            q.exec(&plan.insert)?;
            vec![Value::Null; len]
        }
    };
    exec_edge_writes(q, &plan.edge_writes(&ids)?)?;
    Ok(ids)
}

/// Creates every node of the batch in one INSERT and returns their keys in
/// batch order.
pub fn batch_create<D>(drv: &D, spec: &BatchCreateSpec) -> Result<Vec<Value>, GraphSqlError>
where
    D: Driver + ?Sized,
{
    if spec.nodes.is_empty() {
        return Ok(Vec::new());
    }
    let plan = compile_batch_create(spec, drv.dialect())?;
    let tx: Box<dyn Tx + '_> = if plan.tx {
        drv.tx()?
    } else {
        Box::new(NopTx::new(drv))
    };
    match insert_batch(tx.as_ref(), &plan, spec.nodes.len()) {
        Ok(ids) => {
            tx.commit()?;
            Ok(ids)
        }
        Err(err) => Err(rollback(tx, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{CreateSpec, FieldSpec};
    use crate::sql::ConflictOption;

    fn node(name: &str, age: Option<i64>) -> CreateSpec {
        let mut spec = CreateSpec::new("users", Some(FieldSpec::new("id", FieldType::Int)));
        spec.set_field("name", FieldType::String, name);
        if let Some(age) = age {
            spec.set_field("age", FieldType::Int, age);
        }
        spec
    }

    #[test]
    fn columns_are_the_sorted_union_with_null_fill() {
        let spec = BatchCreateSpec {
            nodes: vec![node("a", Some(1)), node("b", None)],
            on_conflict: Vec::new(),
        };
        let plan = compile_batch_create(&spec, Dialect::Sqlite).expect("compile");
        assert_eq!(
            plan.insert.sql,
            "INSERT INTO \"users\" (\"age\", \"name\") VALUES (?, ?), (?, ?) RETURNING \"id\""
        );
        assert_eq!(plan.insert.args[2], Value::Null);
    }

    #[test]
    fn partial_ids_and_row_conflicts_are_rejected() {
        let mut with_id = node("a", None);
        if let Some(id) = with_id.id.as_mut() {
            id.value = Value::Int(10);
        }
        let spec = BatchCreateSpec {
            nodes: vec![with_id, node("b", None)],
            on_conflict: Vec::new(),
        };
        assert!(compile_batch_create(&spec, Dialect::Sqlite).is_err());

        let mut row = node("c", None);
        row.on_conflict = vec![ConflictOption::DoNothing];
        let spec = BatchCreateSpec {
            nodes: vec![node("b", None), row],
            on_conflict: vec![ConflictOption::DoNothing],
        };
        let err = compile_batch_create(&spec, Dialect::Sqlite).expect_err("row conflict");
        assert!(matches!(err, GraphSqlError::InvalidSpec(_)));
    }

    fn keyed_batch() -> BatchCreateSpec {
        BatchCreateSpec {
            nodes: vec![node("dup", Some(1)), node("new", Some(2))],
            on_conflict: vec![ConflictOption::columns(["age"]), ConflictOption::DoNothing],
        }
    }

    #[test]
    fn conflict_target_is_returned_with_the_key() {
        let plan = compile_batch_create(&keyed_batch(), Dialect::Sqlite).expect("compile");
        assert_eq!(
            plan.insert.sql,
            "INSERT INTO \"users\" (\"age\", \"name\") VALUES (?, ?), (?, ?) ON CONFLICT (\"age\") DO NOTHING RETURNING \"id\", \"age\""
        );
        let keys = plan.keys.expect("row keys");
        assert_eq!(keys.rows, vec![vec![Value::Int(1)], vec![Value::Int(2)]]);
    }

    #[test]
    fn skipped_rows_get_no_key() {
        let plan = compile_batch_create(&keyed_batch(), Dialect::Sqlite).expect("compile");
        // Only the second row was inserted.
        let rows = vec![vec![Value::Int(3), Value::Int(2)]];
        let ids = returned_ids(FieldType::Int, plan.keys.as_ref(), rows, 2).expect("ids");
        assert_eq!(ids, vec![Value::Null, Value::Int(3)]);

        // Without a target to pair by, a short result assigns nothing.
        let ids = returned_ids(FieldType::Int, None, vec![vec![Value::Int(3)]], 2).expect("ids");
        assert_eq!(ids, vec![Value::Null, Value::Null]);
    }

    #[test]
    fn rows_without_columns() {
        let bare = || CreateSpec::new("users", Some(FieldSpec::new("id", FieldType::Int)));
        let spec = BatchCreateSpec {
            nodes: vec![bare(), bare()],
            on_conflict: vec![ConflictOption::DoNothing],
        };
        let plan = compile_batch_create(&spec, Dialect::Sqlite).expect("compile");
        assert_eq!(
            plan.insert.sql,
            "INSERT INTO \"users\" (\"id\") VALUES (?), (?) ON CONFLICT DO NOTHING RETURNING \"id\""
        );
        assert!(compile_batch_create(&spec, Dialect::Postgres).is_err());
    }
}
