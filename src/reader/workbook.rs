use calamine::{open_workbook_auto, Data, ExcelDateTime, Range, Reader};
use chrono::Timelike;
use polars::prelude::*;
use std::path::Path;
use tracing::debug;

use super::Table;
use crate::error::{StatsError, StatsResult};

/// Inferred polars type of one spreadsheet column
#[derive(Debug, Clone, Copy, PartialEq)]
enum ColumnKind {
    Int,
    Float,
    Bool,
    Text,
}

fn open(path: &Path) -> StatsResult<calamine::Sheets<std::io::BufReader<std::fs::File>>> {
    open_workbook_auto(path).map_err(|e| match e {
        calamine::Error::Io(source) => StatsError::io(path, source),
        other => StatsError::parse(format!(
            "cannot parse spreadsheet {}: {}",
            path.display(),
            other
        )),
    })
}

/// Sheet names in declared workbook order
pub fn sheet_names(path: &Path) -> StatsResult<Vec<String>> {
    Ok(open(path)?.sheet_names())
}

/// Read one sheet, the first one when `sheet_name` is `None`
pub fn read_sheet(path: &Path, sheet_name: Option<&str>) -> StatsResult<Table> {
    let mut workbook = open(path)?;
    let sheets = workbook.sheet_names();

    let selected = match sheet_name {
        Some(requested) => sheets
            .iter()
            .find(|name| name.as_str() == requested)
            .cloned()
            .ok_or_else(|| {
                StatsError::not_found(format!(
                    "sheet '{}' not found; available sheets: [{}]",
                    requested,
                    sheets.join(", ")
                ))
            })?,
        None => sheets
            .first()
            .cloned()
            .ok_or_else(|| StatsError::parse(format!("{} has no worksheets", path.display())))?,
    };

    let range = workbook.worksheet_range(&selected).map_err(|e| {
        StatsError::parse(format!("cannot read sheet '{}': {}", selected, e))
    })?;

    debug!("Read sheet '{}' with {:?} cells", selected, range.get_size());
    range_to_table(&range, selected)
}

fn range_to_table(range: &Range<Data>, sheet: String) -> StatsResult<Table> {
    let mut rows = range.rows();
    let header = match rows.next() {
        Some(header) => header,
        None => return Ok(Table::empty(Some(sheet))),
    };
    let body: Vec<&[Data]> = rows.collect();

    let mut names: Vec<String> = Vec::with_capacity(header.len());
    let mut columns = Vec::with_capacity(header.len());
    for (col_idx, cell) in header.iter().enumerate() {
        let raw = cell_text(cell).unwrap_or_default();
        let base = if raw.trim().is_empty() {
            format!("column_{}", col_idx + 1)
        } else {
            raw.trim().to_string()
        };
        let name = unique_name(&names, &base);

        let cells: Vec<Option<&Data>> = body
            .iter()
            .map(|row| row.get(col_idx).filter(|c| !is_missing(c)))
            .collect();
        columns.push(build_series(&name, &cells));
        names.push(name);
    }

    let frame = DataFrame::new(columns)
        .map_err(|e| StatsError::parse(format!("sheet '{}': {}", sheet, e)))?;
    Ok(Table::new(frame, Some(sheet)))
}

/// Suffix duplicate headers as `name.1`, `name.2`, ...
fn unique_name(existing: &[String], base: &str) -> String {
    if !existing.iter().any(|n| n == base) {
        return base.to_string();
    }
    (1..)
        .map(|i| format!("{}.{}", base, i))
        .find(|candidate| !existing.iter().any(|n| n == candidate))
        .unwrap_or_else(|| base.to_string())
}

fn is_missing(cell: &Data) -> bool {
    match cell {
        Data::Empty | Data::Error(_) => true,
        Data::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn cell_text(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty | Data::Error(_) => None,
        Data::String(s) => Some(s.clone()),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => Some(format!("{}", *f as i64)),
        Data::DateTime(dt) => Some(datetime_text(dt)),
        other => Some(other.to_string()),
    }
}

/// Dates as `YYYY-MM-DD`, with the time only when one is present
fn datetime_text(dt: &ExcelDateTime) -> String {
    if dt.is_duration() {
        if let Some(duration) = dt.as_duration() {
            let secs = duration.num_seconds();
            return format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60);
        }
    } else if let Some(datetime) = dt.as_datetime() {
        let pattern = if datetime.num_seconds_from_midnight() == 0 {
            "%Y-%m-%d"
        } else {
            "%Y-%m-%d %H:%M:%S"
        };
        return datetime.format(pattern).to_string();
    }
    dt.to_string()
}

/// Whole-number floats count as integers; any text makes the column text
fn infer_kind(cells: &[Option<&Data>]) -> ColumnKind {
    let mut kind: Option<ColumnKind> = None;
    for cell in cells.iter().flatten() {
        let cell_kind = match cell {
            Data::Int(_) => ColumnKind::Int,
            Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => ColumnKind::Int,
            Data::Float(_) => ColumnKind::Float,
            Data::Bool(_) => ColumnKind::Bool,
            _ => return ColumnKind::Text,
        };
        kind = Some(match (kind, cell_kind) {
            (None, k) => k,
            (Some(a), b) if a == b => a,
            (Some(ColumnKind::Int), ColumnKind::Float) | (Some(ColumnKind::Float), ColumnKind::Int) => {
                ColumnKind::Float
            }
            _ => return ColumnKind::Text,
        });
    }
    // All-empty columns stay text, like an all-empty CSV column
    kind.unwrap_or(ColumnKind::Text)
}

fn build_series(name: &str, cells: &[Option<&Data>]) -> Series {
    match infer_kind(cells) {
        ColumnKind::Int => {
            let values: Vec<Option<i64>> = cells
                .iter()
                .map(|cell| match cell {
                    Some(Data::Int(i)) => Some(*i),
                    Some(Data::Float(f)) => Some(*f as i64),
                    _ => None,
                })
                .collect();
            Series::new(name, values)
        }
        ColumnKind::Float => {
            let values: Vec<Option<f64>> = cells
                .iter()
                .map(|cell| match cell {
                    Some(Data::Int(i)) => Some(*i as f64),
                    Some(Data::Float(f)) => Some(*f),
                    _ => None,
                })
                .collect();
            Series::new(name, values)
        }
        ColumnKind::Bool => {
            let values: Vec<Option<bool>> = cells
                .iter()
                .map(|cell| match cell {
                    Some(Data::Bool(b)) => Some(*b),
                    _ => None,
                })
                .collect();
            Series::new(name, values)
        }
        ColumnKind::Text => {
            let values: Vec<Option<String>> =
                cells.iter().map(|cell| cell.and_then(cell_text)).collect();
            Series::new(name, values)
        }
    }
}
