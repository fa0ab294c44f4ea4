//! Statement counters and a bounded statement log around any driver.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashSet;
use parking_lot::Mutex;

use crate::driver::{Driver, ExecQuerier, ExecResult, Rows, Tx};
use crate::errors::GraphSqlError;
use crate::sql::{Dialect, Statement};

/// Distinct SQL texts remembered for repeat detection before the set starts
/// over.
pub const SEEN_STATEMENTS_CAPACITY: usize = 4096;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverMetricsSnapshot {
    pub query_count: u64,
    pub exec_count: u64,
    pub tx_begin_count: u64,
    pub tx_commit_count: u64,
    pub tx_rollback_count: u64,
    /// Statements whose SQL text was seen before.
    pub repeat_statements: u64,
    /// Statements whose SQL text was new.
    pub distinct_statements: u64,
}

impl DriverMetricsSnapshot {
    /// Every statement that reached the backend, queries and execs alike.
    pub fn backend_calls(&self) -> u64 {
        self.query_count + self.exec_count
    }
}

#[derive(Default)]
pub struct DriverMetrics {
    queries: AtomicU64,
    execs: AtomicU64,
    tx_begin: AtomicU64,
    tx_commit: AtomicU64,
    tx_rollback: AtomicU64,
    repeats: AtomicU64,
    distinct: AtomicU64,
    seen: Mutex<AHashSet<String>>,
    log: Mutex<VecDeque<Statement>>,
    log_capacity: usize,
}

impl DriverMetrics {
    pub fn new(log_capacity: usize) -> Self {
        Self {
            log_capacity,
            ..Self::default()
        }
    }

    pub fn snapshot(&self) -> DriverMetricsSnapshot {
        DriverMetricsSnapshot {
            query_count: self.queries.load(Ordering::Relaxed),
            exec_count: self.execs.load(Ordering::Relaxed),
            tx_begin_count: self.tx_begin.load(Ordering::Relaxed),
            tx_commit_count: self.tx_commit.load(Ordering::Relaxed),
            tx_rollback_count: self.tx_rollback.load(Ordering::Relaxed),
            repeat_statements: self.repeats.load(Ordering::Relaxed),
            distinct_statements: self.distinct.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.queries.store(0, Ordering::Relaxed);
        self.execs.store(0, Ordering::Relaxed);
        self.tx_begin.store(0, Ordering::Relaxed);
        self.tx_commit.store(0, Ordering::Relaxed);
        self.tx_rollback.store(0, Ordering::Relaxed);
        self.repeats.store(0, Ordering::Relaxed);
        self.distinct.store(0, Ordering::Relaxed);
        self.seen.lock().clear();
        self.log.lock().clear();
    }

    /// The most recent statements, oldest first.
    pub fn statements(&self) -> Vec<Statement> {
        self.log.lock().iter().cloned().collect()
    }

    fn observe(&self, stmt: &Statement) {
        let mut seen = self.seen.lock();
        if seen.len() >= SEEN_STATEMENTS_CAPACITY && !seen.contains(stmt.sql.trim()) {
            seen.clear();
        }
        let new = seen.insert(stmt.sql.trim().to_string());
        drop(seen);
        if new {
            self.distinct.fetch_add(1, Ordering::Relaxed);
        } else {
            self.repeats.fetch_add(1, Ordering::Relaxed);
        }
        if self.log_capacity > 0 {
            let mut log = self.log.lock();
            if log.len() == self.log_capacity {
                log.pop_front();
            }
            log.push_back(stmt.clone());
        }
    }

    fn record_query(&self, stmt: &Statement) {
        self.queries.fetch_add(1, Ordering::Relaxed);
        self.observe(stmt);
        tracing::debug!(sql = %stmt.sql, args = stmt.args.len(), "query");
    }

    fn record_exec(&self, stmt: &Statement) {
        self.execs.fetch_add(1, Ordering::Relaxed);
        self.observe(stmt);
        tracing::debug!(sql = %stmt.sql, args = stmt.args.len(), "exec");
    }
}

/// Wraps a driver and counts every statement and transaction it sees.
pub struct InstrumentedDriver<D> {
    inner: D,
    metrics: Arc<DriverMetrics>,
}

impl<D: Driver> InstrumentedDriver<D> {
    pub fn new(inner: D) -> Self {
        Self::with_log_capacity(inner, 64)
    }

    pub fn with_log_capacity(inner: D, capacity: usize) -> Self {
        Self {
            inner,
            metrics: Arc::new(DriverMetrics::new(capacity)),
        }
    }

    pub fn metrics(&self) -> Arc<DriverMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }
}

impl<D: Driver> ExecQuerier for InstrumentedDriver<D> {
    fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }

    fn query(&self, stmt: &Statement) -> Result<Rows, GraphSqlError> {
        self.metrics.record_query(stmt);
        self.inner.query(stmt)
    }

    fn exec(&self, stmt: &Statement) -> Result<ExecResult, GraphSqlError> {
        self.metrics.record_exec(stmt);
        self.inner.exec(stmt)
    }
}

impl<D: Driver> Driver for InstrumentedDriver<D> {
    fn tx(&self) -> Result<Box<dyn Tx + '_>, GraphSqlError> {
        let inner = self.inner.tx()?;
        self.metrics.tx_begin.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("begin");
        Ok(Box::new(InstrumentedTx {
            inner,
            metrics: &self.metrics,
        }))
    }
}

struct InstrumentedTx<'a> {
    inner: Box<dyn Tx + 'a>,
    metrics: &'a DriverMetrics,
}

impl ExecQuerier for InstrumentedTx<'_> {
    fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }

    fn query(&self, stmt: &Statement) -> Result<Rows, GraphSqlError> {
        self.metrics.record_query(stmt);
        self.inner.query(stmt)
    }

    fn exec(&self, stmt: &Statement) -> Result<ExecResult, GraphSqlError> {
        self.metrics.record_exec(stmt);
        self.inner.exec(stmt)
    }
}

impl Tx for InstrumentedTx<'_> {
    fn commit(self: Box<Self>) -> Result<(), GraphSqlError> {
        self.metrics.tx_commit.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("commit");
        self.inner.commit()
    }

    fn rollback(self: Box<Self>) -> Result<(), GraphSqlError> {
        self.metrics.tx_rollback.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("rollback");
        self.inner.rollback()
    }
}
