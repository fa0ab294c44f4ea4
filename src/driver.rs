//! Backing-store boundary: the capabilities the graph compiler needs from a
//! database connection.

use crate::errors::GraphSqlError;
use crate::field::{FieldType, Value};
use crate::sql::{Dialect, Statement};

/// Result of an `exec` call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExecResult {
    pub rows_affected: u64,
    pub last_insert_id: Option<i64>,
}

/// Rows returned by a `query` call, holding storage-level values.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Rows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Rows {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First column of the first row as an integer.
    pub fn scan_int(&self) -> Result<i64, GraphSqlError> {
        let value = self
            .rows
            .first()
            .and_then(|row| row.first())
            .ok_or_else(|| GraphSqlError::query("expected one row with one column"))?;
        match FieldType::Int.decode(value.clone())? {
            Value::Int(v) => Ok(v),
            other => Err(GraphSqlError::query(format!(
                "expected an integer, got {other}"
            ))),
        }
    }

    /// First column of every row.
    pub fn scan_column(&self) -> Vec<Value> {
        self.rows
            .iter()
            .filter_map(|row| row.first().cloned())
            .collect()
    }
}

/// Runs statements against the backing store.
pub trait ExecQuerier {
    fn dialect(&self) -> Dialect;

    fn query(&self, stmt: &Statement) -> Result<Rows, GraphSqlError>;

    fn exec(&self, stmt: &Statement) -> Result<ExecResult, GraphSqlError>;
}

/// A connection that can open transactions.
pub trait Driver: ExecQuerier {
    fn tx(&self) -> Result<Box<dyn Tx + '_>, GraphSqlError>;
}

/// An open transaction. Dropping it without `commit` rolls it back.
pub trait Tx: ExecQuerier {
    fn commit(self: Box<Self>) -> Result<(), GraphSqlError>;

    fn rollback(self: Box<Self>) -> Result<(), GraphSqlError>;
}

/// Transaction stand-in for work that already runs inside a transaction,
/// or that is a single statement. Commit and rollback do nothing.
pub struct NopTx<'a, Q: ?Sized> {
    inner: &'a Q,
}

impl<'a, Q: ExecQuerier + ?Sized> NopTx<'a, Q> {
    pub fn new(inner: &'a Q) -> Self {
        Self { inner }
    }
}

impl<Q: ExecQuerier + ?Sized> ExecQuerier for NopTx<'_, Q> {
    fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }

    fn query(&self, stmt: &Statement) -> Result<Rows, GraphSqlError> {
        self.inner.query(stmt)
    }

    fn exec(&self, stmt: &Statement) -> Result<ExecResult, GraphSqlError> {
        self.inner.exec(stmt)
    }
}

impl<Q: ExecQuerier + ?Sized> Tx for NopTx<'_, Q> {
    fn commit(self: Box<Self>) -> Result<(), GraphSqlError> {
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<(), GraphSqlError> {
        Ok(())
    }
}

/// A driver bound to an open transaction. Nested transactions opened from
/// it are no-ops, so every statement runs on the same transaction.
pub struct TxDriver<'a> {
    tx: Box<dyn Tx + 'a>,
}

impl<'a> TxDriver<'a> {
    pub fn new(tx: Box<dyn Tx + 'a>) -> Self {
        Self { tx }
    }

    pub fn commit(self) -> Result<(), GraphSqlError> {
        self.tx.commit()
    }

    pub fn rollback(self) -> Result<(), GraphSqlError> {
        self.tx.rollback()
    }
}

impl ExecQuerier for TxDriver<'_> {
    fn dialect(&self) -> Dialect {
        self.tx.dialect()
    }

    fn query(&self, stmt: &Statement) -> Result<Rows, GraphSqlError> {
        self.tx.query(stmt)
    }

    fn exec(&self, stmt: &Statement) -> Result<ExecResult, GraphSqlError> {
        self.tx.exec(stmt)
    }
}

impl Driver for TxDriver<'_> {
    fn tx(&self) -> Result<Box<dyn Tx + '_>, GraphSqlError> {
        Ok(Box::new(NopTx::new(self.tx.as_ref())))
    }
}

/// Rolls `tx` back and returns `err`, noting a failed rollback in the
/// message.
pub(crate) fn rollback(tx: Box<dyn Tx + '_>, err: GraphSqlError) -> GraphSqlError {
    match tx.rollback() {
        Ok(()) => err,
        Err(rerr) => {
            tracing::warn!(error = %rerr, "rollback failed");
            match err {
                GraphSqlError::QueryError(msg) => {
                    GraphSqlError::QueryError(format!("{msg}: rollback: {rerr}"))
                }
                other => other,
            }
        }
    }
}
