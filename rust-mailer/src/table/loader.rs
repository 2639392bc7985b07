//! Loading recipient tables from CSV and Excel files.

use std::collections::HashSet;
use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};
use csv::{ReaderBuilder, Trim};
use tracing::{info, warn};

use super::types::{Row, SourceFormat, Table, Value, REQUIRED_COLUMNS};
use crate::error::LoadError;

/// Load a CSV or Excel file into a [`Table`].
///
/// Fully blank rows are dropped; the remaining rows keep their original
/// positional index. The status column is chosen once here and fixed for the
/// rest of the batch.
pub fn load_table(path: &Path) -> Result<Table, LoadError> {
    if !path.exists() {
        return Err(LoadError::NotFound(path.to_path_buf()));
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    let (format, columns, rows) = match extension.as_str() {
        "csv" => {
            let (columns, rows) = read_csv(path)?;
            (SourceFormat::Csv, columns, rows)
        }
        "xlsx" | "xls" => {
            let (columns, rows) = read_excel(path)?;
            (SourceFormat::Excel, columns, rows)
        }
        other => return Err(LoadError::Unsupported(format!(".{}", other))),
    };

    for required in REQUIRED_COLUMNS {
        if !columns.iter().any(|c| c == required) {
            return Err(LoadError::MissingColumn(required.to_string()));
        }
    }

    let total = rows.len();
    let rows: Vec<Row> = rows.into_iter().filter(|row| !row.is_blank()).collect();
    if rows.len() < total {
        info!(dropped = total - rows.len(), "table_blank_rows_dropped");
    }

    let table = Table::new(path.to_path_buf(), format, columns, rows);

    info!(
        path = %path.display(),
        format = ?table.format,
        rows = table.rows.len(),
        status_column = %table.status_column,
        "table_loaded"
    );

    Ok(table)
}

fn read_csv(path: &Path) -> Result<(Vec<String>, Vec<Row>), LoadError> {
    let mut reader = ReaderBuilder::new()
        .trim(Trim::Headers)
        .flexible(true)
        .from_path(path)
        .map_err(|e| LoadError::Malformed(e.to_string()))?;

    let columns = dedupe_headers(
        reader
            .headers()
            .map_err(|e| LoadError::Malformed(format!("Failed to read CSV headers: {}", e)))?
            .iter()
            .enumerate()
            .map(|(i, h)| header_name(i, h))
            .collect(),
    );

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.map_err(|e| {
            LoadError::Malformed(format!("Failed to parse CSV row {}: {}", index + 1, e))
        })?;

        if record.len() > columns.len() {
            warn!(
                row = index,
                fields = record.len(),
                columns = columns.len(),
                "csv_row_extra_fields_ignored"
            );
        }

        let cells = columns
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), record.get(i).map(Value::from).unwrap_or(Value::Empty)))
            .collect();
        rows.push(Row::new(index, cells));
    }

    Ok((columns, rows))
}

fn read_excel(path: &Path) -> Result<(Vec<String>, Vec<Row>), LoadError> {
    let mut workbook =
        open_workbook_auto(path).map_err(|e| LoadError::Malformed(e.to_string()))?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| LoadError::Malformed("No worksheet found".to_string()))?
        .map_err(|e| LoadError::Malformed(e.to_string()))?;

    let mut sheet_rows = range.rows();
    let columns = match sheet_rows.next() {
        Some(header) => dedupe_headers(
            header
                .iter()
                .enumerate()
                .map(|(i, cell)| header_name(i, &cell.to_string()))
                .collect(),
        ),
        None => Vec::new(),
    };

    let rows = sheet_rows
        .enumerate()
        .map(|(index, cells)| {
            let cells = columns
                .iter()
                .enumerate()
                .map(|(i, name)| (name.clone(), cells.get(i).map(cell_value).unwrap_or(Value::Empty)))
                .collect();
            Row::new(index, cells)
        })
        .collect();

    Ok((columns, rows))
}

fn cell_value(cell: &Data) -> Value {
    match cell {
        Data::String(s) => Value::from(s.as_str()),
        Data::Int(i) => Value::Int(*i),
        Data::Float(f) => Value::Float(*f),
        Data::Bool(b) => Value::Bool(*b),
        Data::Empty | Data::Error(_) => Value::Empty,
        other => Value::Text(other.to_string()),
    }
}

fn header_name(position: usize, raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        format!("Unnamed: {}", position)
    } else {
        trimmed.to_string()
    }
}

/// Repeated headers become `name.1`, `name.2`, ... so every column keeps its
/// own cells when the table is written back.
fn dedupe_headers(headers: Vec<String>) -> Vec<String> {
    let original: HashSet<String> = headers.iter().cloned().collect();
    let mut seen = HashSet::new();
    let mut columns = Vec::with_capacity(headers.len());

    for name in headers {
        let mut column = name.clone();
        let mut counter = 1;
        while seen.contains(&column) || (column != name && original.contains(&column)) {
            column = format!("{}.{}", name, counter);
            counter += 1;
        }
        if column != name {
            warn!(header = %name, renamed = %column, "duplicate_header_renamed");
        }
        seen.insert(column.clone());
        columns.push(column);
    }

    columns
}
