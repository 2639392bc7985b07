//! Persisting recipient tables with their status column.

use std::path::{Path, PathBuf};

use rust_xlsxwriter::Workbook;
use tracing::{info, warn};

use super::types::{SourceFormat, Table, Value};
use crate::error::SaveError;

/// Save the table and return the path written.
///
/// CSV sources are always overwritten. `.xlsx` sources are overwritten only
/// when `in_place` is set; otherwise the table goes to `<stem>_updated.xlsx`
/// (or `_updated_1`, `_updated_2`, ... if that already exists). Legacy `.xls`
/// sources cannot be rewritten in their own format and always get the
/// `_updated` sibling.
pub fn save_table(table: &Table, in_place: bool) -> Result<PathBuf, SaveError> {
    let target = match table.format {
        SourceFormat::Csv => table.path.clone(),
        SourceFormat::Excel if in_place && is_xlsx(&table.path) => table.path.clone(),
        SourceFormat::Excel => {
            if in_place {
                warn!(path = %table.path.display(), "xls_in_place_unsupported");
            }
            updated_path(&table.path)
        }
    };

    match table.format {
        SourceFormat::Csv => write_csv(table, &target)?,
        SourceFormat::Excel => write_excel(table, &target)?,
    }

    info!(
        path = %target.display(),
        rows = table.rows.len(),
        in_place = in_place,
        "table_saved"
    );

    Ok(target)
}

fn is_xlsx(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case("xlsx"))
}

/// First free sibling path of the form `<stem>_updated[_N].xlsx`.
fn updated_path(source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut candidate = source.with_file_name(format!("{}_updated.xlsx", stem));
    let mut counter = 1;
    while candidate.exists() {
        candidate = source.with_file_name(format!("{}_updated_{}.xlsx", stem, counter));
        counter += 1;
    }
    candidate
}

fn write_csv(table: &Table, target: &Path) -> Result<(), SaveError> {
    let csv_err = |source| SaveError::Csv {
        path: target.to_path_buf(),
        source,
    };

    let columns = table.persisted_columns();
    let mut writer = csv::Writer::from_path(target).map_err(csv_err)?;
    writer.write_record(&columns).map_err(csv_err)?;

    for row in &table.rows {
        let record: Vec<String> = columns
            .iter()
            .map(|column| row.get(column).map(Value::to_string).unwrap_or_default())
            .collect();
        writer.write_record(&record).map_err(csv_err)?;
    }

    writer.flush().map_err(|source| SaveError::Io {
        path: target.to_path_buf(),
        source,
    })
}

fn write_excel(table: &Table, target: &Path) -> Result<(), SaveError> {
    let xlsx_err = |source| SaveError::Excel {
        path: target.to_path_buf(),
        source,
    };

    let columns = table.persisted_columns();
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();

    for (col, name) in columns.iter().enumerate() {
        worksheet.write_string(0, col as u16, *name).map_err(xlsx_err)?;
    }

    for (line, row) in table.rows.iter().enumerate() {
        let sheet_row = (line + 1) as u32;
        for (col, name) in columns.iter().enumerate() {
            let col = col as u16;
            match row.get(name) {
                Some(Value::Text(s)) => {
                    worksheet.write_string(sheet_row, col, s.as_str()).map_err(xlsx_err)?;
                }
                Some(Value::Int(i)) => {
                    worksheet.write_number(sheet_row, col, *i as f64).map_err(xlsx_err)?;
                }
                Some(Value::Float(f)) if !f.is_nan() => {
                    worksheet.write_number(sheet_row, col, *f).map_err(xlsx_err)?;
                }
                Some(Value::Bool(b)) => {
                    worksheet.write_boolean(sheet_row, col, *b).map_err(xlsx_err)?;
                }
                _ => {}
            }
        }
    }

    workbook.save(target).map_err(xlsx_err)
}
