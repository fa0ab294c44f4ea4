//! DELETE compilation.

use crate::driver::ExecQuerier;
use crate::errors::GraphSqlError;
use crate::spec::DeleteSpec;
use crate::sql::{DeleteBuilder, Dialect, Render, Statement};

use super::update::predicate_where;

/// Compiles a delete by key (single or composite) and/or predicates.
pub fn compile_delete(spec: &DeleteSpec, dialect: Dialect) -> Result<Statement, GraphSqlError> {
    spec.node.validate()?;
    let mut delete = DeleteBuilder::new(&spec.node.table);
    if let Some(key) = &spec.key {
        delete.where_(spec.node.id_predicate(key)?);
    }
    if let Some(p) = predicate_where(&spec.node.table, &spec.predicates) {
        delete.where_(p);
    }
    Ok(delete.query(dialect))
}

/// Deletes the matching nodes and returns how many rows were removed.
pub fn delete_nodes<Q>(q: &Q, spec: &DeleteSpec) -> Result<usize, GraphSqlError>
where
    Q: ExecQuerier + ?Sized,
{
    let stmt = compile_delete(spec, q.dialect())?;
    let affected = q.exec(&stmt)?.rows_affected;
    usize::try_from(affected)
        .map_err(|_| GraphSqlError::inconsistent(format!("affected rows {affected}")))
}
