//! Decoded query results and their forward-only cursor.
//!
//! A [`QueryResult`] owns its columns and rows outright; it keeps no reference
//! to the session that produced it. The cursor starts before the first row and
//! only moves forward with [`next`](QueryResult::next), plus jumps to the
//! boundaries. Column indexes are 1-based and name lookups ignore case.

use crate::column::ColumnDescriptor;
use crate::error::{ClientError, Result};
use crate::types::DatasetResponse;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value as Json;
use std::fmt;

/// A single decoded cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    Text(String),
    /// Absolute instant, from a `timestamptz` column
    Timestamp(DateTime<Utc>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(i64::from(*v)),
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(f64::from(*v)),
            Value::Long(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    /// Convert a JSON cell, using the column's native type as a hint.
    fn from_json(cell: Json, column: Option<&ColumnDescriptor>) -> Self {
        match cell {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Boolean(b),
            Json::Number(n) => {
                if let Some(v) = n.as_i64() {
                    i32::try_from(v).map_or(Value::Long(v), Value::Int)
                } else {
                    n.as_f64().map_or(Value::Null, Value::Double)
                }
            }
            Json::String(s) => {
                if column.is_some_and(is_timestamptz) {
                    parse_instant(&s).map_or(Value::Text(s), Value::Timestamp)
                } else {
                    Value::Text(s)
                }
            }
            nested @ (Json::Array(_) | Json::Object(_)) => Value::Text(nested.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Boolean(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Long(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Text(v) => f.write_str(v),
            Value::Timestamp(v) => f.write_str(&v.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        }
    }
}

fn is_timestamptz(column: &ColumnDescriptor) -> bool {
    column.native_type().is_some_and(|native| {
        let native = native.to_ascii_lowercase();
        native == "timestamptz" || native == "timestamp with time zone"
    })
}

/// Parse `2024-03-01T10:00:00Z`, `2024-03-01T10:00:00+02:00` or a zone-less
/// timestamp (taken as UTC).
fn parse_instant(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Execution details reported by the server alongside the rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionInfo {
    /// Server-side execution time in milliseconds
    pub running_time: Option<i64>,
    /// Row count as reported by the server
    pub row_count: Option<i64>,
    /// e.g. `completed`
    pub status: Option<String>,
    pub results_timezone: Option<String>,
    pub database_id: Option<i64>,
    pub started_at: Option<String>,
    /// Whether the server answered from its own result cache
    pub cached: Option<bool>,
    /// e.g. `ad-hoc`
    pub context: Option<String>,
    pub average_execution_time: Option<i64>,
}

impl ExecutionInfo {
    /// One-line summary such as `executed in 12ms, 3 row(s), from cache`.
    pub fn performance_summary(&self) -> String {
        let mut parts = Vec::new();
        if let Some(ms) = self.running_time {
            parts.push(format!("executed in {}ms", ms));
        }
        if let Some(rows) = self.row_count {
            parts.push(format!("{} row(s)", rows));
        }
        if self.cached == Some(true) {
            parts.push("from cache".to_string());
        }
        if let Some(context) = &self.context {
            parts.push(format!("context: {}", context));
        }
        if let Some(avg) = self.average_execution_time {
            parts.push(format!("average: {}ms", avg));
        }

        if parts.is_empty() {
            "Performance information not available".to_string()
        } else {
            parts.join(", ")
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    BeforeFirst,
    At(usize),
    AfterLast,
}

static NULL: Value = Value::Null;

/// Columns, rows and a forward-only cursor over them.
#[derive(Debug, Clone)]
pub struct QueryResult {
    columns: Vec<ColumnDescriptor>,
    rows: Vec<Vec<Value>>,
    info: ExecutionInfo,
    cursor: Cursor,
}

impl QueryResult {
    pub fn new(columns: Vec<ColumnDescriptor>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns,
            rows,
            info: ExecutionInfo::default(),
            cursor: Cursor::BeforeFirst,
        }
    }

    /// Decode a `POST /api/dataset` response body.
    ///
    /// # Errors
    ///
    /// [`ClientError::QueryExecution`] when the body carries an `error`, is not
    /// valid JSON, or lacks `data`, `data.cols` or `data.rows`.
    pub fn decode(body: &[u8]) -> Result<Self> {
        let response: DatasetResponse = serde_json::from_slice(body).map_err(|e| {
            ClientError::QueryExecution(format!("failed to parse dataset response: {}", e))
        })?;
        Self::from_response(response)
    }

    pub(crate) fn from_response(response: DatasetResponse) -> Result<Self> {
        match response.error {
            Json::Null => {}
            Json::String(message) => return Err(ClientError::QueryExecution(message)),
            other => return Err(ClientError::QueryExecution(other.to_string())),
        }

        let data = response.data.ok_or_else(|| {
            ClientError::QueryExecution("response does not contain data".to_string())
        })?;
        let columns: Vec<ColumnDescriptor> = data
            .cols
            .ok_or_else(|| ClientError::QueryExecution("column metadata not found".to_string()))?
            .into_iter()
            .map(ColumnDescriptor::from)
            .collect();
        let raw_rows = data
            .rows
            .ok_or_else(|| ClientError::QueryExecution("data rows not found".to_string()))?;

        let rows = raw_rows
            .into_iter()
            .map(|row| match row {
                Json::Array(cells) => cells
                    .into_iter()
                    .enumerate()
                    .map(|(i, cell)| Value::from_json(cell, columns.get(i)))
                    .collect(),
                _ => Vec::new(),
            })
            .collect();

        let info = ExecutionInfo {
            running_time: response.running_time,
            row_count: response.row_count,
            status: response.status,
            results_timezone: data.results_timezone,
            database_id: response.database_id,
            started_at: response.started_at,
            cached: response.cached.and_then(|cached| match cached {
                Json::Bool(b) => Some(b),
                Json::Null => None,
                // Newer servers report the cache entry instead of a flag.
                _ => Some(true),
            }),
            context: response.context,
            average_execution_time: response.average_execution_time,
        };

        Ok(Self {
            columns,
            rows,
            info,
            cursor: Cursor::BeforeFirst,
        })
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Column at a 1-based index.
    pub fn column(&self, index: usize) -> Result<&ColumnDescriptor> {
        self.check_index(index)?;
        Ok(&self.columns[index - 1])
    }

    /// 1-based index of the first column with this name, ignoring case.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name().eq_ignore_ascii_case(name))
            .map(|i| i + 1)
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn execution_info(&self) -> &ExecutionInfo {
        &self.info
    }

    // Cursor movement

    /// Advance one row. Returns false (and parks after the last row) at the end.
    pub fn next(&mut self) -> bool {
        let next = match self.cursor {
            Cursor::BeforeFirst => 0,
            Cursor::At(i) => i + 1,
            Cursor::AfterLast => return false,
        };
        if next < self.rows.len() {
            self.cursor = Cursor::At(next);
            true
        } else {
            self.cursor = Cursor::AfterLast;
            false
        }
    }

    /// Jump to the first row. False (cursor unchanged) when there are no rows.
    pub fn first(&mut self) -> bool {
        if self.rows.is_empty() {
            return false;
        }
        self.cursor = Cursor::At(0);
        true
    }

    /// Jump to the last row. False (cursor unchanged) when there are no rows.
    pub fn last(&mut self) -> bool {
        if self.rows.is_empty() {
            return false;
        }
        self.cursor = Cursor::At(self.rows.len() - 1);
        true
    }

    pub fn before_first(&mut self) {
        self.cursor = Cursor::BeforeFirst;
    }

    pub fn after_last(&mut self) {
        self.cursor = Cursor::AfterLast;
    }

    pub fn is_before_first(&self) -> bool {
        self.cursor == Cursor::BeforeFirst
    }

    pub fn is_after_last(&self) -> bool {
        self.cursor == Cursor::AfterLast
    }

    pub fn is_first(&self) -> bool {
        self.cursor == Cursor::At(0)
    }

    pub fn is_last(&self) -> bool {
        !self.rows.is_empty() && self.cursor == Cursor::At(self.rows.len() - 1)
    }

    /// 1-based number of the current row, 0 when not on a row.
    pub fn row(&self) -> usize {
        match self.cursor {
            Cursor::At(i) => i + 1,
            _ => 0,
        }
    }

    // Value access on the current row

    /// The current row's cells.
    pub fn current_row(&self) -> Result<&[Value]> {
        match self.cursor {
            Cursor::At(i) => Ok(&self.rows[i]),
            _ => Err(ClientError::NoCurrentRow),
        }
    }

    /// Cell at a 1-based column index of the current row.
    pub fn value(&self, index: usize) -> Result<&Value> {
        let row = self.current_row()?;
        self.check_index(index)?;
        Ok(row.get(index - 1).unwrap_or(&NULL))
    }

    /// Cell of the current row by column name (case-insensitive).
    pub fn value_by_name(&self, name: &str) -> Result<&Value> {
        let index = self
            .column_index(name)
            .ok_or_else(|| ClientError::ColumnNotFound(name.to_string()))?;
        self.value(index)
    }

    /// Textual form of any non-null cell.
    pub fn get_string(&self, index: usize) -> Result<Option<String>> {
        let value = self.value(index)?;
        Ok((!value.is_null()).then(|| value.to_string()))
    }

    pub fn get_i64(&self, index: usize) -> Result<Option<i64>> {
        self.typed(index, "integer", Value::as_i64)
    }

    pub fn get_f64(&self, index: usize) -> Result<Option<f64>> {
        self.typed(index, "floating point", Value::as_f64)
    }

    pub fn get_bool(&self, index: usize) -> Result<Option<bool>> {
        self.typed(index, "boolean", Value::as_bool)
    }

    pub fn get_timestamp(&self, index: usize) -> Result<Option<DateTime<Utc>>> {
        self.typed(index, "timestamp", Value::as_timestamp)
    }

    fn typed<T>(
        &self,
        index: usize,
        expected: &'static str,
        convert: impl Fn(&Value) -> Option<T>,
    ) -> Result<Option<T>> {
        let value = self.value(index)?;
        if value.is_null() {
            return Ok(None);
        }
        convert(value)
            .map(Some)
            .ok_or(ClientError::TypeMismatch {
                column: index,
                expected,
            })
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index == 0 || index > self.columns.len() {
            return Err(ClientError::InvalidColumn {
                index,
                count: self.columns.len(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "QueryResult{{columns={}, rows={}, row={}}}",
            self.columns.len(),
            self.rows.len(),
            self.row()
        )
    }
}
