//! In-memory doubles for the connector's database seams
//!
//! [`MemoryPool`] stores tables as rows keyed by a unique `id` column and
//! understands the small statement language [`MemoryQueryBuilder`] emits:
//!
//! ```text
//! BOUNDS <table> <id_column>
//! RANGE <table> <id_column>                          params: low, high
//! INSERT <table> <col,col,...>                       params: one per column
//! UPDATE <table> <col,...> WHERE <col,...>           params: set values, then predicate values
//! ```
//!
//! Transactions work on a staged copy of every table, published on commit.
//! Inserting a duplicate `id` fails like a unique-key violation.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use slicer::{
    ConnectionPool, ConnectorError, Partition, QueryBuilder, Result, Row, Statement, Transaction,
    Value,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

type Tables = HashMap<String, BTreeMap<i64, Row>>;

#[derive(Debug, Default)]
struct State {
    tables: Tables,
    fail_queries: bool,
    closed: bool,
}

/// Shared in-memory database
#[derive(Debug, Clone, Default)]
pub struct MemoryPool {
    state: Arc<Mutex<State>>,
    pub commits: Arc<AtomicUsize>,
    pub rollbacks: Arc<AtomicUsize>,
    close_called: Arc<AtomicBool>,
}

impl MemoryPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// A pool holding `table` with rows for every id in `ids`
    pub fn with_ids(table: &str, ids: impl IntoIterator<Item = i64>) -> Self {
        let pool = Self::new();
        pool.create_table(table);
        for id in ids {
            pool.put(table, row(&[("id", Value::Int(id)), ("name", Value::from(format!("row-{}", id)))]));
        }
        pool
    }

    pub fn create_table(&self, table: &str) {
        self.state.lock().unwrap().tables.entry(table.to_string()).or_default();
    }

    pub fn put(&self, table: &str, row: Row) {
        let id = row.get("id").and_then(Value::as_i64).expect("row needs an integer id");
        self.state
            .lock()
            .unwrap()
            .tables
            .entry(table.to_string())
            .or_default()
            .insert(id, row);
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.state
            .lock()
            .unwrap()
            .tables
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn fail_queries(&self, fail: bool) {
        self.state.lock().unwrap().fail_queries = fail;
    }

    pub fn is_closed(&self) -> bool {
        self.close_called.load(Ordering::SeqCst)
    }
}

pub fn row(pairs: &[(&str, Value)]) -> Row {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

fn db_error(message: impl Into<String>) -> ConnectorError {
    ConnectorError::Database(sqlx::Error::Protocol(message.into()))
}

fn int_param(statement: &Statement, index: usize) -> Result<i64> {
    statement
        .params
        .get(index)
        .and_then(Value::as_i64)
        .ok_or_else(|| db_error(format!("parameter {} is not an integer", index + 1)))
}

fn columns(list: &str) -> Vec<String> {
    list.split(',').map(str::to_string).collect()
}

fn query(tables: &Tables, statement: &Statement) -> Result<Vec<Row>> {
    let words: Vec<&str> = statement.sql.split_whitespace().collect();
    match words.as_slice() {
        ["BOUNDS", table, _] => {
            let rows = tables.get(*table).ok_or_else(|| db_error(format!("relation {} does not exist", table)))?;
            let bound = |id: Option<&i64>| id.map_or(Value::Null, |id| Value::Int(*id));
            Ok(vec![row(&[
                ("min_id", bound(rows.keys().next())),
                ("max_id", bound(rows.keys().next_back())),
            ])])
        }
        ["RANGE", table, _] => {
            let low = int_param(statement, 0)?;
            let high = int_param(statement, 1)?;
            let rows = tables.get(*table).ok_or_else(|| db_error(format!("relation {} does not exist", table)))?;
            Ok(rows.range(low..=high).map(|(_, row)| row.clone()).collect())
        }
        _ => Err(db_error(format!("unsupported query: {}", statement.sql))),
    }
}

fn execute(tables: &mut Tables, statement: &Statement) -> Result<u64> {
    let words: Vec<&str> = statement.sql.split_whitespace().collect();
    match words.as_slice() {
        ["INSERT", table, cols] => {
            let inserted: Row = columns(cols).into_iter().zip(statement.params.iter().cloned()).collect();
            let id = inserted
                .get("id")
                .and_then(Value::as_i64)
                .ok_or_else(|| db_error("null value in column \"id\""))?;
            let rows = tables.entry(table.to_string()).or_default();
            if rows.contains_key(&id) {
                return Err(db_error(format!(
                    "duplicate key value violates unique constraint \"{}_pkey\"",
                    table
                )));
            }
            rows.insert(id, inserted);
            Ok(1)
        }
        ["UPDATE", table, set, "WHERE", predicate] => {
            let set = columns(set);
            let predicate = columns(predicate);
            let (set_values, predicate_values) = statement.params.split_at(set.len());
            let matches: Vec<(String, Value)> = predicate.into_iter().zip(predicate_values.iter().cloned()).collect();

            let rows = tables.entry(table.to_string()).or_default();
            let mut updated = 0;
            for existing in rows.values_mut() {
                if matches.iter().all(|(col, value)| existing.get(col) == Some(value)) {
                    for (col, value) in set.iter().zip(set_values) {
                        existing.insert(col.clone(), value.clone());
                    }
                    updated += 1;
                }
            }
            Ok(updated)
        }
        _ => Err(db_error(format!("unsupported statement: {}", statement.sql))),
    }
}

#[async_trait]
impl ConnectionPool for MemoryPool {
    async fn query(&self, statement: &Statement) -> Result<Vec<Row>> {
        let state = self.state.lock().unwrap();
        if state.closed {
            return Err(ConnectorError::Database(sqlx::Error::PoolClosed));
        }
        if state.fail_queries {
            return Err(db_error("connection refused"));
        }
        query(&state.tables, statement)
    }

    async fn execute(&self, statement: &Statement) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        execute(&mut state.tables, statement)
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let state = self.state.lock().unwrap();
        if state.closed {
            return Err(ConnectorError::Database(sqlx::Error::PoolClosed));
        }
        Ok(Box::new(MemoryTransaction {
            staged: state.tables.clone(),
            pool: self.clone(),
        }))
    }

    async fn close(&self) {
        self.close_called.store(true, Ordering::SeqCst);
        self.state.lock().unwrap().closed = true;
    }
}

struct MemoryTransaction {
    staged: Tables,
    pool: MemoryPool,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn execute(&mut self, statement: &Statement) -> Result<u64> {
        execute(&mut self.staged, statement)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.pool.state.lock().unwrap().tables = self.staged;
        self.pool.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.pool.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Emits the statement language [`MemoryPool`] runs
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryQueryBuilder;

impl QueryBuilder for MemoryQueryBuilder {
    fn select_bounds(&self, table: &str, id_column: &str) -> Result<Statement> {
        Ok(Statement::new(format!("BOUNDS {} {}", table, id_column), Vec::new()))
    }

    fn select_range(&self, partition: &Partition) -> Result<Statement> {
        Ok(Statement::new(
            format!("RANGE {} {}", partition.table, partition.id_column),
            vec![Value::Int(partition.low), Value::Int(partition.high)],
        ))
    }

    fn insert(&self, table: &str, row: &Row) -> Result<Statement> {
        let cols: Vec<&str> = row.keys().map(String::as_str).collect();
        Ok(Statement::new(
            format!("INSERT {} {}", table, cols.join(",")),
            row.values().cloned().collect(),
        ))
    }

    fn update(&self, table: &str, row: &Row, predicate: &Row) -> Result<Statement> {
        let set: Vec<&str> = row.keys().map(String::as_str).collect();
        let matches: Vec<&str> = predicate.keys().map(String::as_str).collect();
        Ok(Statement::new(
            format!("UPDATE {} {} WHERE {}", table, set.join(","), matches.join(",")),
            row.values().chain(predicate.values()).cloned().collect(),
        ))
    }
}

pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,slicer=debug")),
        )
        .with_test_writer()
        .try_init();
}
