//! INSERT compilation for a single node and its edges.

use indexmap::IndexMap;

use crate::driver::{Driver, ExecQuerier, NopTx, Tx, rollback};
use crate::errors::GraphSqlError;
use crate::field::{FieldType, Value};
use crate::spec::{CreateSpec, EdgeSpec, FieldSpec};
use crate::sql::{ConflictOption, Dialect, InsertBuilder, Render, Statement};

use super::edges::{EdgeWrite, exec_edge_writes, fk_links, m2m_inserts};

/// How the key of a created node is obtained.
#[derive(Clone, Debug, PartialEq)]
pub enum IdCapture {
    /// Read back from the `RETURNING` clause.
    Returning(FieldType),
    /// Taken from the driver's last-insert id (MySQL, numeric keys).
    LastInsertId,
    /// Supplied by the caller.
    Supplied(Value),
    /// Nothing to capture: composite keys, or generated non-numeric keys on
    /// a backend without `RETURNING`.
    None,
}

/// A compiled node creation.
#[derive(Clone, Debug)]
pub struct CreatePlan {
    pub insert: Statement,
    pub capture: IdCapture,
    /// Edge writes touch other tables, so the create runs in a transaction.
    pub tx: bool,
    dialect: Dialect,
    edges: Vec<EdgeSpec>,
}

impl CreatePlan {
    /// Edge statements to run once the node key `id` is known.
    pub fn edge_writes(&self, id: &Value) -> Result<Vec<EdgeWrite>, GraphSqlError> {
        if self.edges.is_empty() {
            return Ok(Vec::new());
        }
        if id.is_null() {
            return Err(GraphSqlError::invalid_spec(
                "cannot link edges of a node whose key was not returned",
            ));
        }
        let ids = [id.clone()];
        let links: Vec<(&[Value], &EdgeSpec)> =
            self.edges.iter().map(|e| (&ids[..], e)).collect();
        let mut out = m2m_inserts(self.dialect, &links)?;
        out.extend(fk_links(self.dialect, &ids, &self.edges)?);
        Ok(out)
    }
}

/// Columns written to the node's own row: its fields, then the foreign keys
/// of edges whose key lives in this table. A later write to the same column
/// wins.
pub(crate) fn table_columns(
    fields: &[FieldSpec],
    edges: &[EdgeSpec],
) -> Result<IndexMap<String, Value>, GraphSqlError> {
    let mut columns = IndexMap::with_capacity(fields.len() + edges.len());
    for f in fields {
        f.check()?;
        columns.insert(f.column.clone(), f.value.clone());
    }
    for edge in edges {
        edge.validate()?;
        if edge.sets_own_column() {
            if let Some(target) = edge.target.nodes.first() {
                columns.insert(edge.fk_column()?.to_string(), target.clone());
            }
        }
    }
    Ok(columns)
}

/// Conflict clauses need a target for `DO UPDATE` everywhere but MySQL.
pub(crate) fn check_conflict(dialect: Dialect, options: &[ConflictOption]) -> Result<(), GraphSqlError> {
    if options.is_empty() || dialect == Dialect::MySql {
        return Ok(());
    }
    let has_target = options.iter().any(ConflictOption::is_target);
    let updates = options
        .iter()
        .any(|o| !o.is_target() && !matches!(o, ConflictOption::DoNothing | ConflictOption::UpdateWhere(_)));
    if updates && !has_target {
        return Err(GraphSqlError::invalid_spec(format!(
            "{} upsert with DO UPDATE needs conflict columns or a constraint",
            dialect.name()
        )));
    }
    Ok(())
}

/// MySQL reports the key of an updated conflicting row only when the
/// update assigns it through `LAST_INSERT_ID(..)`.
fn last_insert_id_resolver(table: &str, id: &FieldSpec) -> ConflictOption {
    let column = id.column.clone();
    let expr = format!(
        "LAST_INSERT_ID({})",
        Dialect::MySql.quote(&format!("{table}.{column}"))
    );
    ConflictOption::resolve_with(move |u| {
        u.set_raw(&column, expr.clone());
    })
}

pub fn compile_create(spec: &CreateSpec, dialect: Dialect) -> Result<CreatePlan, GraphSqlError> {
    if spec.table.is_empty() {
        return Err(GraphSqlError::invalid_spec("create spec without a table"));
    }
    let mut insert = InsertBuilder::new(&spec.table);
    let columns = table_columns(&spec.fields, &spec.edges)?;
    let bare = columns.is_empty() && spec.id.as_ref().is_none_or(|id| id.value.is_null());
    for (column, value) in columns {
        insert.set(&column, value);
    }
    let mut conflict = spec.on_conflict.clone();
    check_conflict(dialect, &conflict)?;
    if bare && !conflict.is_empty() && dialect == Dialect::Sqlite {
        // SQLite takes no upsert clause after DEFAULT VALUES.
        match &spec.id {
            Some(id) if id.ty.numeric() => {
                insert.set(&id.column, Value::Null);
            }
            _ => {
                return Err(GraphSqlError::invalid_spec(format!(
                    "upsert into {:?} sets no columns",
                    spec.table
                )));
            }
        }
    }
    let capture = match &spec.id {
        None => IdCapture::None,
        Some(id) => {
            id.check()?;
            let supplied = !id.value.is_null();
            if !conflict.is_empty() && dialect == Dialect::MySql && id.ty.numeric() && !supplied {
                conflict.push(last_insert_id_resolver(&spec.table, id));
            }
            if supplied {
                insert.set(&id.column, id.value.clone());
            }
            if supplied && conflict.is_empty() {
                IdCapture::Supplied(id.value.clone())
            } else if dialect.supports_returning() {
                insert.returning(vec![id.column.clone()]);
                IdCapture::Returning(id.ty)
            } else if id.ty.numeric() {
                IdCapture::LastInsertId
            } else if supplied {
                IdCapture::Supplied(id.value.clone())
            } else {
                IdCapture::None
            }
        }
    };
    if !conflict.is_empty() {
        insert.on_conflict(conflict);
    }
    let edges: Vec<EdgeSpec> = spec
        .edges
        .iter()
        .filter(|e| e.is_external())
        .cloned()
        .collect();
    Ok(CreatePlan {
        insert: insert.query(dialect),
        capture,
        tx: !edges.is_empty(),
        dialect,
        edges,
    })
}

fn insert_node<Q>(q: &Q, plan: &CreatePlan) -> Result<Value, GraphSqlError>
where
    Q: ExecQuerier + ?Sized,
{
    let id = match &plan.capture {
        IdCapture::Returning(ty) => {
            let rows = q.query(&plan.insert)?;
            match rows.rows.into_iter().next().and_then(|r| r.into_iter().next()) {
                Some(raw) => ty.decode(raw)?,
                // DO NOTHING skipped the row.
                None => Value::Null,
            }
        }
        IdCapture::LastInsertId => {
            let res = q.exec(&plan.insert)?;
            res.last_insert_id.map_or(Value::Null, Value::Int)
        }
        IdCapture::Supplied(id) => {
            q.exec(&plan.insert)?;
            id.clone()
        }
        IdCapture::None => {
            q.exec(&plan.insert)?;
            Value::Null
        }
    };
    exec_edge_writes(q, &plan.edge_writes(&id)?)?;
    Ok(id)
}

/// Creates one node and its edges, returning the node key (`Null` for
/// composite keys, or when an upsert skipped the row).
pub fn create_node<D>(drv: &D, spec: &CreateSpec) -> Result<Value, GraphSqlError>
where
    D: Driver + ?Sized,
{
    let plan = compile_create(spec, drv.dialect())?;
    let tx: Box<dyn Tx + '_> = if plan.tx {
        drv.tx()?
    } else {
        Box::new(NopTx::new(drv))
    };
    match insert_node(tx.as_ref(), &plan) {
        Ok(id) => {
            tx.commit()?;
            Ok(id)
        }
        Err(err) => Err(rollback(tx, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::Rel;

    fn user_spec() -> CreateSpec {
        let mut spec = CreateSpec::new("users", Some(FieldSpec::new("id", FieldType::Int)));
        spec.set_field("name", FieldType::String, "a8m");
        spec
    }

    #[test]
    fn generated_id_is_returned_or_last_insert_id() {
        let plan = compile_create(&user_spec(), Dialect::Postgres).expect("compile");
        assert_eq!(
            plan.insert.sql,
            "INSERT INTO \"users\" (\"name\") VALUES ($1) RETURNING \"id\""
        );
        assert_eq!(plan.capture, IdCapture::Returning(FieldType::Int));
        let plan = compile_create(&user_spec(), Dialect::MySql).expect("compile");
        assert_eq!(plan.insert.sql, "INSERT INTO `users` (`name`) VALUES (?)");
        assert_eq!(plan.capture, IdCapture::LastInsertId);
    }

    #[test]
    fn m2o_edge_sets_own_column_without_transaction() {
        let mut spec = user_spec();
        spec.edges.push(
            EdgeSpec::new(
                Rel::M2O,
                "users",
                vec!["group_id".into()],
                FieldSpec::new("id", FieldType::Int),
            )
            .nodes(vec![Value::Int(3)]),
        );
        let plan = compile_create(&spec, Dialect::Sqlite).expect("compile");
        assert!(!plan.tx);
        assert_eq!(
            plan.insert.sql,
            "INSERT INTO \"users\" (\"name\", \"group_id\") VALUES (?, ?) RETURNING \"id\""
        );
    }

    #[test]
    fn mysql_upsert_captures_key_through_last_insert_id() {
        let mut spec = user_spec();
        spec.on_conflict = vec![ConflictOption::ResolveWithNewValues];
        let plan = compile_create(&spec, Dialect::MySql).expect("compile");
        assert_eq!(
            plan.insert.sql,
            "INSERT INTO `users` (`name`) VALUES (?) ON DUPLICATE KEY UPDATE `name` = VALUES(`name`), `id` = LAST_INSERT_ID(`users`.`id`)"
        );
        assert!(compile_create(&spec, Dialect::Postgres).is_err());
    }

    #[test]
    fn bare_upsert_passes_a_null_key_on_sqlite() {
        let mut spec = CreateSpec::new("tags", Some(FieldSpec::new("id", FieldType::Int)));
        spec.on_conflict = vec![ConflictOption::DoNothing];
        let plan = compile_create(&spec, Dialect::Sqlite).expect("compile");
        assert_eq!(
            plan.insert.sql,
            "INSERT INTO \"tags\" (\"id\") VALUES (?) ON CONFLICT DO NOTHING RETURNING \"id\""
        );
        assert_eq!(plan.insert.args, vec![Value::Null]);
        let plan = compile_create(&spec, Dialect::Postgres).expect("compile");
        assert_eq!(
            plan.insert.sql,
            "INSERT INTO \"tags\" DEFAULT VALUES ON CONFLICT DO NOTHING RETURNING \"id\""
        );

        let mut keyed = CreateSpec::new("tags", Some(FieldSpec::new("id", FieldType::Uuid)));
        keyed.on_conflict = vec![ConflictOption::DoNothing];
        assert!(compile_create(&keyed, Dialect::Sqlite).is_err());
    }
}
