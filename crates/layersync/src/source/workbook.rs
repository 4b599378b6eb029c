//! Spreadsheet workbooks.
//!
//! A data sheet holds one row per record under a row of column names. A
//! schema sheet, when present, holds one row per column (field name, data
//! type, description) and is turned into a table by
//! [`crate::translate::sheet::translate_schema_sheet`].

use std::fs::File;
use std::io::BufReader;

use calamine::{Data, DataType, Range, Reader, Sheets, open_workbook_auto};
use camino::{Utf8Path, Utf8PathBuf};

use super::{MemorySource, RowSource};
use crate::translate::sheet::SchemaSheetRow;
use crate::value::SqlValue;
use crate::{Error, Result};

/// Where the column names sit and where data starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SheetLayout {
    /// 1-based row holding the column names
    pub column_names_row: usize,
    /// Rows at the top of the sheet that are not data
    pub header_rows: usize,
}

impl Default for SheetLayout {
    fn default() -> Self {
        Self {
            column_names_row: 1,
            header_rows: 1,
        }
    }
}

impl SheetLayout {
    /// Last 1-based row that is not data.
    fn last_header_row(&self) -> usize {
        self.header_rows.max(self.column_names_row)
    }
}

/// Which columns of a schema sheet hold what.
///
/// Each column is named by its header text (case-insensitive), or by its
/// 1-based position when the value is a number.
#[derive(Debug, Clone)]
pub struct SchemaSheetLayout {
    pub rows: SheetLayout,
    pub field_name: String,
    pub data_type: String,
    pub description: String,
}

impl Default for SchemaSheetLayout {
    fn default() -> Self {
        Self {
            rows: SheetLayout::default(),
            field_name: "Field Name".to_string(),
            data_type: "Data Type".to_string(),
            description: "Description (Optional)".to_string(),
        }
    }
}

/// An opened workbook file.
pub struct Workbook {
    path: Utf8PathBuf,
    sheets: Sheets<BufReader<File>>,
}

impl Workbook {
    pub fn open(path: &Utf8Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::FileNotFound(path.to_owned()));
        }
        let sheets = open_workbook_auto(path)?;
        Ok(Self {
            path: path.to_owned(),
            sheets,
        })
    }

    pub fn sheet_names(&self) -> Vec<String> {
        self.sheets.sheet_names()
    }

    /// Cells of the named sheet.
    pub fn sheet(&mut self, name: &str) -> Result<Range<Data>> {
        if !self.sheet_names().iter().any(|s| s == name) {
            return Err(Error::SheetNotFound {
                sheet: name.to_string(),
                file: self.path.clone(),
            });
        }
        Ok(self.sheets.worksheet_range(name)?)
    }
}

/// Rows of `range` with their 1-based sheet row numbers.
///
/// A range starts at its first non-empty cell, not at A1.
fn numbered_rows(range: &Range<Data>) -> impl Iterator<Item = (usize, &[Data])> {
    let first = range.start().map_or(0, |(row, _)| row as usize);
    range
        .rows()
        .enumerate()
        .map(move |(i, cells)| (first + i + 1, cells))
}

fn cell_text(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty | Data::Error(_) => None,
        Data::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        other => Some(other.to_string()),
    }
}

/// A cell as a bindable value.
pub fn cell_value(cell: &Data) -> SqlValue {
    match cell {
        Data::Empty | Data::Error(_) => SqlValue::Null,
        Data::Int(n) => SqlValue::Int(*n),
        Data::Float(f) => SqlValue::Float(*f),
        Data::Bool(b) => SqlValue::Bool(*b),
        Data::String(s) => SqlValue::Text(s.clone()),
        Data::DateTime(_) | Data::DateTimeIso(_) => match cell.as_datetime() {
            Some(t) => SqlValue::Timestamp(t),
            None => SqlValue::Text(cell.to_string()),
        },
        Data::DurationIso(s) => SqlValue::Text(s.clone()),
    }
}

/// Header texts of the column-names row, trailing blanks dropped.
fn column_names(range: &Range<Data>, layout: &SheetLayout) -> Result<Vec<Option<String>>> {
    let (_, cells) = numbered_rows(range)
        .find(|(n, _)| *n == layout.column_names_row)
        .ok_or_else(|| {
            Error::InvalidInput(format!(
                "sheet has no column names in row {}",
                layout.column_names_row
            ))
        })?;
    let mut names: Vec<Option<String>> = cells.iter().map(cell_text).collect();
    while names.last().is_some_and(Option::is_none) {
        names.pop();
    }
    Ok(names)
}

/// Rows of a data sheet.
pub struct WorkbookSource {
    inner: MemorySource,
}

impl WorkbookSource {
    pub fn from_range(range: &Range<Data>, layout: &SheetLayout) -> Result<Self> {
        let columns = column_names(range, layout)?
            .into_iter()
            .enumerate()
            .map(|(i, name)| {
                name.ok_or_else(|| {
                    Error::InvalidInput(format!(
                        "column {} of row {} has no name",
                        i + 1,
                        layout.column_names_row
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        if columns.is_empty() {
            return Err(Error::InvalidInput(format!(
                "sheet has no column names in row {}",
                layout.column_names_row
            )));
        }

        let width = columns.len();
        let rows: Vec<Vec<SqlValue>> = numbered_rows(range)
            .filter(|(n, _)| *n > layout.last_header_row())
            .map(|(_, cells)| {
                let mut values: Vec<SqlValue> = cells.iter().take(width).map(cell_value).collect();
                values.resize(width, SqlValue::Null);
                values
            })
            .filter(|values| !values.iter().all(SqlValue::is_null))
            .collect();

        tracing::debug!(columns = width, rows = rows.len(), "read data sheet");
        Ok(Self {
            inner: MemorySource::new(columns, rows),
        })
    }
}

impl RowSource for WorkbookSource {
    fn columns(&self) -> &[String] {
        self.inner.columns()
    }

    fn next_row(&mut self) -> Option<Vec<SqlValue>> {
        self.inner.next_row()
    }
}

/// Resolve a schema-sheet column by position or header text.
fn locate(wanted: &str, headers: &[Option<String>]) -> Option<usize> {
    if let Ok(position) = wanted.trim().parse::<usize>() {
        return position.checked_sub(1);
    }
    headers.iter().position(|h| {
        h.as_deref()
            .is_some_and(|h| h.eq_ignore_ascii_case(wanted.trim()))
    })
}

/// Read the column descriptions of a schema sheet.
pub fn read_schema_sheet(
    range: &Range<Data>,
    layout: &SchemaSheetLayout,
) -> Result<Vec<SchemaSheetRow>> {
    let headers = if layout.rows.column_names_row > 0 {
        column_names(range, &layout.rows)?
    } else {
        Vec::new()
    };

    let mut positions = [0usize; 3];
    for (slot, wanted) in positions
        .iter_mut()
        .zip([&layout.field_name, &layout.data_type, &layout.description])
    {
        *slot = locate(wanted, &headers).ok_or_else(|| {
            Error::Validation(format!("schema sheet has no column {wanted:?}"))
        })?;
    }
    let [name_at, type_at, description_at] = positions;
    let text_at = |cells: &[Data], at: usize| cells.get(at).and_then(cell_text);

    let rows = numbered_rows(range)
        .filter(|(n, _)| *n > layout.rows.last_header_row())
        .filter_map(|(_, cells)| {
            let name = text_at(cells, name_at)?;
            Some(SchemaSheetRow {
                name,
                data_type: text_at(cells, type_at).unwrap_or_default(),
                description: text_at(cells, description_at),
            })
        })
        .collect();
    Ok(rows)
}
