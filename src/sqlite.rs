//! SQLite driver over rusqlite.

use std::path::Path;
use std::time::Duration;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{Connection, ErrorCode, ToSql, params_from_iter};
use time::format_description::well_known::Rfc3339;

use crate::config::{ClientConfig, SqliteConfig, StorageKind};
use crate::driver::{Driver, ExecQuerier, ExecResult, Rows, Tx};
use crate::errors::{GraphSqlError, classify_backend_message};
use crate::field::Value;
use crate::sql::{Dialect, Statement};

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        use rusqlite::types::Value as Sql;
        let out = match self {
            Value::Null => ToSqlOutput::Owned(Sql::Null),
            Value::Bool(v) => ToSqlOutput::Owned(Sql::Integer(i64::from(*v))),
            Value::Int(v) => ToSqlOutput::Owned(Sql::Integer(*v)),
            Value::Float(v) => ToSqlOutput::Owned(Sql::Real(*v)),
            Value::String(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            Value::Bytes(v) => ToSqlOutput::Borrowed(ValueRef::Blob(v)),
            Value::Json(v) => ToSqlOutput::Owned(Sql::Text(v.to_string())),
            Value::Time(v) => {
                let text = v
                    .format(&Rfc3339)
                    .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
                ToSqlOutput::Owned(Sql::Text(text))
            }
            Value::Uuid(v) => ToSqlOutput::Owned(Sql::Text(v.hyphenated().to_string())),
        };
        Ok(out)
    }
}

fn from_value_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Int(v),
        ValueRef::Real(v) => Value::Float(v),
        ValueRef::Text(v) => Value::String(String::from_utf8_lossy(v).into_owned()),
        ValueRef::Blob(v) => Value::Bytes(v.to_vec()),
    }
}

fn map_err(err: rusqlite::Error) -> GraphSqlError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            GraphSqlError::constraint(err.to_string())
        }
        _ => classify_backend_message(err.to_string()),
    }
}

fn run_query(conn: &Connection, stmt: &Statement) -> Result<Rows, GraphSqlError> {
    let mut prepared = conn.prepare_cached(&stmt.sql).map_err(map_err)?;
    let columns: Vec<String> = prepared
        .column_names()
        .into_iter()
        .map(String::from)
        .collect();
    let width = columns.len();
    let mut rows = prepared
        .query(params_from_iter(stmt.args.iter()))
        .map_err(map_err)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(map_err)? {
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            values.push(from_value_ref(row.get_ref(i).map_err(map_err)?));
        }
        out.push(values);
    }
    Ok(Rows { columns, rows: out })
}

fn run_exec(conn: &Connection, stmt: &Statement) -> Result<ExecResult, GraphSqlError> {
    let mut prepared = conn.prepare_cached(&stmt.sql).map_err(map_err)?;
    let affected = prepared
        .execute(params_from_iter(stmt.args.iter()))
        .map_err(map_err)?;
    Ok(ExecResult {
        rows_affected: affected as u64,
        last_insert_id: Some(conn.last_insert_rowid()),
    })
}

/// A driver over one SQLite connection.
///
/// The connection is guarded by a re-entrant lock; an open transaction
/// holds the lock until it commits or rolls back.
pub struct SqliteDriver {
    conn: ReentrantMutex<Connection>,
}

impl SqliteDriver {
    pub fn open_in_memory() -> Result<Self, GraphSqlError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| GraphSqlError::connection(e.to_string()))?;
        Self::from_connection(conn, &SqliteConfig::default())
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, GraphSqlError> {
        let conn =
            Connection::open(path).map_err(|e| GraphSqlError::connection(e.to_string()))?;
        Self::from_connection(conn, &SqliteConfig::default())
    }

    pub fn open_with(config: &ClientConfig) -> Result<Self, GraphSqlError> {
        let conn = match &config.storage {
            StorageKind::InMemory => Connection::open_in_memory(),
            StorageKind::File(path) => Connection::open(path),
        }
        .map_err(|e| GraphSqlError::connection(e.to_string()))?;
        Self::from_connection(conn, &config.sqlite)
    }

    pub fn from_connection(conn: Connection, config: &SqliteConfig) -> Result<Self, GraphSqlError> {
        conn.pragma_update(None, "foreign_keys", config.foreign_keys)
            .map_err(|e| GraphSqlError::connection(e.to_string()))?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))
            .map_err(|e| GraphSqlError::connection(e.to_string()))?;
        conn.set_prepared_statement_cache_capacity(config.statement_cache_capacity);
        Ok(Self {
            conn: ReentrantMutex::new(conn),
        })
    }

    /// Runs a batch of semicolon separated statements, e.g. table setup.
    pub fn execute_batch(&self, sql: &str) -> Result<(), GraphSqlError> {
        self.conn.lock().execute_batch(sql).map_err(map_err)
    }
}

impl ExecQuerier for SqliteDriver {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn query(&self, stmt: &Statement) -> Result<Rows, GraphSqlError> {
        let conn = self.conn.lock();
        run_query(&conn, stmt)
    }

    fn exec(&self, stmt: &Statement) -> Result<ExecResult, GraphSqlError> {
        let conn = self.conn.lock();
        run_exec(&conn, stmt)
    }
}

impl Driver for SqliteDriver {
    fn tx(&self) -> Result<Box<dyn Tx + '_>, GraphSqlError> {
        let conn = self.conn.lock();
        conn.execute_batch("BEGIN")
            .map_err(|e| GraphSqlError::transaction(e.to_string()))?;
        Ok(Box::new(SqliteTx { conn, done: false }))
    }
}

/// A transaction on a [`SqliteDriver`].
pub struct SqliteTx<'a> {
    conn: ReentrantMutexGuard<'a, Connection>,
    done: bool,
}

impl SqliteTx<'_> {
    fn finish(&mut self, sql: &str) -> Result<(), GraphSqlError> {
        self.done = true;
        self.conn
            .execute_batch(sql)
            .map_err(|e| GraphSqlError::transaction(e.to_string()))
    }
}

impl ExecQuerier for SqliteTx<'_> {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn query(&self, stmt: &Statement) -> Result<Rows, GraphSqlError> {
        run_query(&self.conn, stmt)
    }

    fn exec(&self, stmt: &Statement) -> Result<ExecResult, GraphSqlError> {
        run_exec(&self.conn, stmt)
    }
}

impl Tx for SqliteTx<'_> {
    fn commit(mut self: Box<Self>) -> Result<(), GraphSqlError> {
        self.finish("COMMIT")
    }

    fn rollback(mut self: Box<Self>) -> Result<(), GraphSqlError> {
        self.finish("ROLLBACK")
    }
}

impl Drop for SqliteTx<'_> {
    fn drop(&mut self) {
        if !self.done {
            if let Err(err) = self.conn.execute_batch("ROLLBACK") {
                tracing::warn!(error = %err, "rollback of abandoned transaction failed");
            }
        }
    }
}
