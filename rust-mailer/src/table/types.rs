//! Type definitions for recipient tables.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Sentinel written to the status column after a successful delivery.
pub const STATUS_SENT: &str = "sent";

/// Sentinel written to the status column when a row could not be delivered.
pub const STATUS_FAILED: &str = "failed";

/// Columns every recipient table must carry.
pub const REQUIRED_COLUMNS: [&str; 2] = ["email", "name"];

/// A single cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Empty,
}

impl Value {
    /// Whether the cell counts as absent for rendering and validation.
    ///
    /// Empty cells, empty strings and NaN floats are all missing.
    pub fn is_missing(&self) -> bool {
        match self {
            Value::Empty => true,
            Value::Text(s) => s.is_empty(),
            Value::Float(f) => f.is_nan(),
            Value::Int(_) | Value::Bool(_) => false,
        }
    }

    /// Canonical display text, or `None` when the cell is missing.
    pub fn display_text(&self) -> Option<String> {
        if self.is_missing() {
            None
        } else {
            Some(self.to_string())
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => f.write_str(s),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Empty => Ok(()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        if s.is_empty() {
            Value::Empty
        } else {
            Value::Text(s.to_string())
        }
    }
}

/// One recipient row: a positional index plus ordered `(column, value)` cells.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// 0-based data-row position in the source file
    pub index: usize,
    cells: Vec<(String, Value)>,
}

impl Row {
    pub fn new(index: usize, cells: Vec<(String, Value)>) -> Self {
        Self { index, cells }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.cells
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Display text of a column, `None` if absent or missing.
    pub fn text(&self, column: &str) -> Option<String> {
        self.get(column).and_then(Value::display_text)
    }

    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(|(_, value)| value.is_missing())
    }

    fn set(&mut self, column: &str, value: Value) {
        match self.cells.iter_mut().find(|(name, _)| name == column) {
            Some((_, slot)) => *slot = value,
            None => self.cells.push((column.to_string(), value)),
        }
    }
}

/// Status written back for a row at the end of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowStatus {
    Sent,
    Failed,
}

impl RowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowStatus::Sent => STATUS_SENT,
            RowStatus::Failed => STATUS_FAILED,
        }
    }
}

/// Side-table of status mutations keyed by row index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusUpdates {
    updates: BTreeMap<usize, RowStatus>,
}

impl StatusUpdates {
    pub fn record(&mut self, index: usize, status: RowStatus) {
        self.updates.insert(index, status);
    }

    pub fn get(&self, index: usize) -> Option<RowStatus> {
        self.updates.get(&index).copied()
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }
}

/// File family a table was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Csv,
    Excel,
}

/// A loaded recipient table.
#[derive(Debug, Clone)]
pub struct Table {
    pub path: PathBuf,
    pub format: SourceFormat,
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    /// Column that receives delivery status for this batch
    pub status_column: String,
    /// The status column was not in the source file
    pub status_appended: bool,
}

impl Table {
    /// Build a table, choosing the status column and appending it if new.
    pub fn new(path: PathBuf, format: SourceFormat, mut columns: Vec<String>, rows: Vec<Row>) -> Self {
        let status_column = choose_status_column(&columns, &rows);
        let status_appended = !columns.contains(&status_column);
        if status_appended {
            columns.push(status_column.clone());
        }

        let rows = rows
            .into_iter()
            .map(|mut row| {
                if row.get(&status_column).is_none() {
                    row.set(&status_column, Value::Empty);
                }
                row
            })
            .collect();

        Self {
            path,
            format,
            columns,
            rows,
            status_column,
            status_appended,
        }
    }

    /// Columns to write back. An appended status column that never received
    /// a value is left out, so an early stop does not claim a column name.
    pub fn persisted_columns(&self) -> Vec<&str> {
        let unused_status = self.status_appended
            && self
                .rows
                .iter()
                .all(|row| row.get(&self.status_column).map_or(true, Value::is_missing));

        self.columns
            .iter()
            .map(String::as_str)
            .filter(|column| !(unused_status && *column == self.status_column))
            .collect()
    }

    /// Write every recorded status into its row's status cell.
    pub fn apply(&mut self, updates: &StatusUpdates) {
        let column = self.status_column.clone();
        for row in &mut self.rows {
            if let Some(status) = updates.get(row.index) {
                row.set(&column, Value::Text(status.as_str().to_string()));
            }
        }
    }
}

/// Pick the status column for a batch.
///
/// A `status` / `status_N` column written by an earlier run (only sentinel
/// values, at least one of them) is reused so that run can be resumed; the
/// last such column wins. Otherwise the first free name among `status`,
/// `status_1`, `status_2`, ... is chosen.
pub fn choose_status_column(columns: &[String], rows: &[Row]) -> String {
    if let Some(previous) = columns
        .iter()
        .filter(|c| is_status_name(c))
        .filter(|c| holds_only_sentinels(c, rows))
        .last()
    {
        return previous.clone();
    }

    let taken = |name: &str| columns.iter().any(|c| c == name);

    if !taken("status") {
        return "status".to_string();
    }

    let mut counter = 1;
    while taken(&format!("status_{}", counter)) {
        counter += 1;
    }
    format!("status_{}", counter)
}

fn is_status_name(column: &str) -> bool {
    match column.strip_prefix("status") {
        Some("") => true,
        Some(rest) => rest
            .strip_prefix('_')
            .map(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
            .unwrap_or(false),
        None => false,
    }
}

fn holds_only_sentinels(column: &str, rows: &[Row]) -> bool {
    let mut seen = false;
    for value in rows.iter().filter_map(|row| row.get(column)) {
        match value.display_text().as_deref() {
            None => {}
            Some(STATUS_SENT) | Some(STATUS_FAILED) => seen = true,
            Some(_) => return false,
        }
    }
    seen
}
