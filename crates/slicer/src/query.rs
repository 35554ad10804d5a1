//! SQL statement construction
//!
//! [`QueryBuilder`] is the dialect seam: the partition source and the table
//! writers only ever see [`Statement`]s. [`PostgresQueryBuilder`] quotes
//! identifiers with double quotes and numbers parameters `$1, $2, ...`.
//! `Value::Null` is rendered as a literal `NULL` (or `IS NULL` in
//! predicates) so no untyped parameter is ever bound.

use crate::error::{ConnectorError, Result};
use crate::types::{Partition, Row, Value};

/// SQL text plus its positional parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// Builds the statements the connector runs
pub trait QueryBuilder: Send + Sync {
    /// `MIN`/`MAX` of the id column, aliased `min_id` and `max_id`
    fn select_bounds(&self, table: &str, id_column: &str) -> Result<Statement>;

    /// Every row of a partition, ordered by id
    fn select_range(&self, partition: &Partition) -> Result<Statement>;

    fn insert(&self, table: &str, row: &Row) -> Result<Statement>;

    /// Update `table` with `row`'s columns where every predicate column matches
    fn update(&self, table: &str, row: &Row, predicate: &Row) -> Result<Statement>;
}

/// Validate an identifier: a letter or underscore, then letters, digits, underscores
pub fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
    if !valid_start || name.len() > 63 || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ConnectorError::InvalidInput(format!(
            "invalid SQL identifier '{}'",
            name
        )));
    }
    Ok(())
}

/// PostgreSQL statement builder
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresQueryBuilder;

impl PostgresQueryBuilder {
    pub fn new() -> Self {
        Self
    }

    fn quote(&self, name: &str) -> Result<String> {
        validate_identifier(name)?;
        Ok(format!("\"{}\"", name))
    }

    /// Quote a possibly schema-qualified table name (`schema.table`)
    fn quote_table(&self, table: &str) -> Result<String> {
        let parts = table
            .split('.')
            .map(|part| self.quote(part))
            .collect::<Result<Vec<_>>>()?;
        if parts.len() > 2 {
            return Err(ConnectorError::InvalidInput(format!(
                "invalid table name '{}'",
                table
            )));
        }
        Ok(parts.join("."))
    }
}

/// Accumulates positional parameters while a statement is rendered
struct Params {
    values: Vec<Value>,
}

impl Params {
    fn new() -> Self {
        Self { values: Vec::new() }
    }

    /// Placeholder for `value`, or `NULL` without binding
    fn push(&mut self, value: &Value) -> String {
        if value.is_null() {
            return "NULL".to_string();
        }
        self.values.push(value.clone());
        format!("${}", self.values.len())
    }
}

impl QueryBuilder for PostgresQueryBuilder {
    fn select_bounds(&self, table: &str, id_column: &str) -> Result<Statement> {
        let id = self.quote(id_column)?;
        Ok(Statement::new(
            format!(
                "SELECT MIN({id}) AS min_id, MAX({id}) AS max_id FROM {}",
                self.quote_table(table)?
            ),
            Vec::new(),
        ))
    }

    fn select_range(&self, partition: &Partition) -> Result<Statement> {
        let id = self.quote(&partition.id_column)?;
        Ok(Statement::new(
            format!(
                "SELECT * FROM {} WHERE {id} BETWEEN $1 AND $2 ORDER BY {id}",
                self.quote_table(&partition.table)?
            ),
            vec![Value::Int(partition.low), Value::Int(partition.high)],
        ))
    }

    fn insert(&self, table: &str, row: &Row) -> Result<Statement> {
        if row.is_empty() {
            return Err(ConnectorError::InvalidInput(format!(
                "cannot insert an empty row into {}",
                table
            )));
        }

        let mut params = Params::new();
        let mut columns = Vec::with_capacity(row.len());
        let mut placeholders = Vec::with_capacity(row.len());
        for (column, value) in row {
            columns.push(self.quote(column)?);
            placeholders.push(params.push(value));
        }

        Ok(Statement::new(
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                self.quote_table(table)?,
                columns.join(", "),
                placeholders.join(", ")
            ),
            params.values,
        ))
    }

    fn update(&self, table: &str, row: &Row, predicate: &Row) -> Result<Statement> {
        if row.is_empty() {
            return Err(ConnectorError::InvalidInput(format!(
                "cannot update {} with an empty row",
                table
            )));
        }
        if predicate.is_empty() {
            return Err(ConnectorError::InvalidInput(format!(
                "refusing to update {} without a predicate",
                table
            )));
        }

        let mut params = Params::new();
        let mut assignments = Vec::with_capacity(row.len());
        for (column, value) in row {
            assignments.push(format!("{} = {}", self.quote(column)?, params.push(value)));
        }

        let mut conditions = Vec::with_capacity(predicate.len());
        for (column, value) in predicate {
            let column = self.quote(column)?;
            if value.is_null() {
                conditions.push(format!("{} IS NULL", column));
            } else {
                conditions.push(format!("{} = {}", column, params.push(value)));
            }
        }

        Ok(Statement::new(
            format!(
                "UPDATE {} SET {} WHERE {}",
                self.quote_table(table)?,
                assignments.join(", "),
                conditions.join(" AND ")
            ),
            params.values,
        ))
    }
}
