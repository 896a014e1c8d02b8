//! # Sink
//! Append-only, column-typed tables that the pollers write rows into.
//!
//! A [`MemoryTable`] keeps every appended row and fans new rows out to live
//! readers, each over its own unbounded channel. [`MergedOutput`] stitches the
//! per-worker tables back into one logical output.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Column types a schema can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    String,
    Timestamp,
    Float,
    Int,
    Bool,
}

/// One typed cell of an [`OutputRow`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    String(String),
    Timestamp(DateTime<Utc>),
    Float(f64),
    Int(i64),
    Bool(bool),
}

impl Value {
    pub fn column_type(&self) -> ColumnType {
        match self {
            Value::String(_) => ColumnType::String,
            Value::Timestamp(_) => ColumnType::Timestamp,
            Value::Float(_) => ColumnType::Float,
            Value::Int(_) => ColumnType::Int,
            Value::Bool(_) => ColumnType::Bool,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(t: DateTime<Utc>) -> Self {
        Value::Timestamp(t)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

pub type OutputRow = Vec<Value>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Ordered `(name, type)` column list, fixed for the lifetime of a table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Schema with `other`'s columns appended after ours.
    pub fn concat(&self, other: &Schema) -> Schema {
        let mut columns = self.columns.clone();
        columns.extend(other.columns.iter().cloned());
        Schema { columns }
    }

    /// Check arity and per-column types of `row`.
    pub fn check(&self, row: &[Value]) -> Result<(), SinkError> {
        if row.len() != self.columns.len() {
            return Err(SinkError::Arity {
                expected: self.columns.len(),
                actual: row.len(),
            });
        }
        for (col, value) in self.columns.iter().zip(row) {
            if col.ty != value.column_type() {
                return Err(SinkError::ColumnType {
                    column: col.name.clone(),
                    expected: col.ty,
                    actual: value.column_type(),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cols: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("{}:{:?}", c.name, c.ty))
            .collect();
        write!(f, "[{}]", cols.join(", "))
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SinkError {
    #[error("row has {actual} values, schema declares {expected} columns")]
    Arity { expected: usize, actual: usize },

    #[error("column `{column}` expects {expected:?}, got {actual:?}")]
    ColumnType {
        column: String,
        expected: ColumnType,
        actual: ColumnType,
    },
}

/// Append-only structured destination. Implementations must tolerate
/// concurrent `append` calls from several workers.
pub trait Sink: Send + Sync {
    fn schema(&self) -> &Schema;
    fn append(&self, row: OutputRow) -> Result<(), SinkError>;

    /// Append the rows of one entry, or none of them. The default checks every
    /// row against the schema first; sinks with other rejection rules override it.
    fn append_all(&self, rows: Vec<OutputRow>) -> Result<(), SinkError> {
        for row in &rows {
            self.schema().check(row)?;
        }
        for row in rows {
            self.append(row)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct TableInner {
    rows: Vec<OutputRow>,
    readers: Vec<mpsc::UnboundedSender<OutputRow>>,
}

impl TableInner {
    fn push(&mut self, row: OutputRow) {
        // drop readers that went away
        self.readers.retain(|tx| tx.send(row.clone()).is_ok());
        self.rows.push(row);
    }
}

/// In-memory table with a live stream for readers.
#[derive(Debug)]
pub struct MemoryTable {
    schema: Schema,
    inner: Mutex<TableInner>,
}

impl MemoryTable {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            inner: Mutex::new(TableInner::default()),
        }
    }

    pub fn snapshot(&self) -> Vec<OutputRow> {
        self.inner.lock().rows.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().rows.is_empty()
    }

    /// Backlog plus a receiver for every row appended afterwards.
    /// Both are taken under the table lock so nothing is missed or repeated.
    /// The receiver is unbounded: a slow reader buffers, it never loses rows.
    pub fn subscribe(&self) -> (Vec<OutputRow>, mpsc::UnboundedReceiver<OutputRow>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        inner.readers.push(tx);
        (inner.rows.clone(), rx)
    }
}

impl Sink for MemoryTable {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn append(&self, row: OutputRow) -> Result<(), SinkError> {
        self.schema.check(&row)?;
        self.inner.lock().push(row);
        Ok(())
    }

    fn append_all(&self, rows: Vec<OutputRow>) -> Result<(), SinkError> {
        for row in &rows {
            self.schema.check(row)?;
        }
        let mut inner = self.inner.lock();
        for row in rows {
            inner.push(row);
        }
        Ok(())
    }
}

/// One logical output over the per-worker tables.
/// Row order across tables is unspecified.
#[derive(Debug, Clone)]
pub struct MergedOutput {
    schema: Schema,
    tables: Vec<Arc<MemoryTable>>,
}

impl MergedOutput {
    pub fn new(schema: Schema, tables: Vec<Arc<MemoryTable>>) -> Self {
        Self { schema, tables }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn tables(&self) -> &[Arc<MemoryTable>] {
        &self.tables
    }

    pub fn len(&self) -> usize {
        self.tables.iter().map(|t| t.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.iter().all(|t| t.is_empty())
    }

    /// Concatenation of every table, worker 0 first.
    pub fn snapshot(&self) -> Vec<OutputRow> {
        self.tables.iter().flat_map(|t| t.snapshot()).collect()
    }

    /// Live merged stream of `(worker, row)`, starting with each table's backlog.
    /// Must be called inside a Tokio runtime; one forwarding task per table.
    pub fn stream(&self) -> mpsc::UnboundedReceiver<(usize, OutputRow)> {
        let (tx, rx) = mpsc::unbounded_channel();
        for (worker, table) in self.tables.iter().enumerate() {
            let (backlog, mut live) = table.subscribe();
            let tx = tx.clone();
            tokio::spawn(async move {
                for row in backlog {
                    if tx.send((worker, row)).is_err() {
                        return;
                    }
                }
                while let Some(row) = live.recv().await {
                    if tx.send((worker, row)).is_err() {
                        return;
                    }
                }
            });
        }
        rx
    }
}
