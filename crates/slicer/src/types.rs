//! Core types for the partition pipeline and the table writers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Inclusive id-range over a source table
///
/// Ordering is by table, id column, then `low`, so a sorted set of partitions
/// for one table follows the id axis.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Partition {
    pub table: String,
    pub id_column: String,
    pub low: i64,
    pub high: i64,
}

impl Partition {
    pub fn new(table: impl Into<String>, id_column: impl Into<String>, low: i64, high: i64) -> Self {
        Self {
            table: table.into(),
            id_column: id_column.into(),
            low,
            high,
        }
    }

    /// Number of ids the range spans (not the number of rows present)
    pub fn span(&self) -> u64 {
        (self.high as i128 - self.low as i128 + 1).max(0) as u64
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}[{}..={}]", self.table, self.id_column, self.low, self.high)
    }
}

/// A unit on the work queue: a partition, or the terminal signal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkItem {
    Partition(Partition),
    /// No partitions remain after this one is acknowledged
    Done,
}

impl WorkItem {
    pub fn is_done(&self) -> bool {
        matches!(self, WorkItem::Done)
    }

    pub fn partition(&self) -> Option<&Partition> {
        match self {
            WorkItem::Partition(p) => Some(p),
            WorkItem::Done => None,
        }
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkItem::Partition(p) => p.fmt(f),
            WorkItem::Done => f.write_str("<done>"),
        }
    }
}

/// Identity assigned to a work item each time it is pulled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A work item handed to the host, not yet acknowledged or retried
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    pub id: MessageId,
    pub item: WorkItem,
}

/// Completion status of a partition in the checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionStatus {
    Incomplete,
    Acked,
}

/// One serialized checkpoint entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionEntry {
    pub partition: Partition,
    pub status: PartitionStatus,
}

/// Partition completion state, the payload stored in the checkpoint log
///
/// Serialized as a JSON list of `{partition, status}` entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<CompletionEntry>", into = "Vec<CompletionEntry>")]
pub struct CompletionMap {
    entries: BTreeMap<Partition, PartitionStatus>,
}

impl CompletionMap {
    /// Every partition starts incomplete
    pub fn from_partitions(partitions: impl IntoIterator<Item = Partition>) -> Self {
        Self {
            entries: partitions
                .into_iter()
                .map(|p| (p, PartitionStatus::Incomplete))
                .collect(),
        }
    }

    /// Partitions still to deliver, in id order
    pub fn incomplete(&self) -> impl Iterator<Item = &Partition> {
        self.entries
            .iter()
            .filter(|(_, status)| **status == PartitionStatus::Incomplete)
            .map(|(p, _)| p)
    }

    pub fn contains(&self, partition: &Partition) -> bool {
        self.entries.contains_key(partition)
    }

    /// Drop an acknowledged partition; returns false if it was not tracked
    pub fn remove(&mut self, partition: &Partition) -> bool {
        self.entries.remove(partition).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }

    pub fn from_json(value: serde_json::Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }
}

impl From<Vec<CompletionEntry>> for CompletionMap {
    fn from(entries: Vec<CompletionEntry>) -> Self {
        Self {
            entries: entries.into_iter().map(|e| (e.partition, e.status)).collect(),
        }
    }
}

impl From<CompletionMap> for Vec<CompletionEntry> {
    fn from(map: CompletionMap) -> Self {
        map.entries
            .into_iter()
            .map(|(partition, status)| CompletionEntry { partition, status })
            .collect()
    }
}

/// A single column value read from or written to a table
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Json(serde_json::Value),
    Timestamp(DateTime<Utc>),
    Uuid(Uuid),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Column name to value, ordered by column name
pub type Row = BTreeMap<String, Value>;

/// Rows produced from one processed message, written in a single transaction
///
/// `predicate` is the upserter's `where`: column/value pairs matched by equality.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteMessage {
    pub rows: Vec<Row>,
    pub predicate: Option<Row>,
}

impl WriteMessage {
    pub fn rows(rows: Vec<Row>) -> Self {
        Self {
            rows,
            predicate: None,
        }
    }

    pub fn with_predicate(mut self, predicate: Row) -> Self {
        self.predicate = Some(predicate);
        self
    }
}
