//! Tabular store: the grid that supplies intake rows and receives staging rows.
//!
//! Rows are addressed the way spreadsheet users see them: 1-based, with the
//! header in row 1. Every cell is text; blank cells are empty strings.
//!
//! - [`CsvWorkbook`] keeps one `<sheet>.csv` per sheet in a directory.
//! - [`MemoryWorkbook`] keeps sheets in memory (tests, dry runs).

mod csv_workbook;
mod memory;

use intakesync_shared::{IntakeSyncError, Result};

pub use csv_workbook::CsvWorkbook;
pub use memory::MemoryWorkbook;

/// Header plus data rows of one sheet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SheetData {
    /// Row 1.
    pub headers: Vec<String>,
    /// Rows 2.., with trailing blank rows removed.
    pub rows: Vec<Vec<String>>,
}

/// Grid-like data source and sink.
pub trait TabularStore {
    /// Read a whole sheet. Fails if the sheet does not exist.
    fn read_all(&self, sheet: &str) -> Result<SheetData>;

    /// Blank `row_count` rows starting at 1-based `from_row`.
    fn clear_rows(&self, sheet: &str, from_row: usize, row_count: usize) -> Result<()>;

    /// Overwrite cells starting at 1-based `start_row`, growing the sheet as needed.
    fn write_rows(&self, sheet: &str, start_row: usize, rows: &[Vec<String>]) -> Result<()>;

    /// Write `header` into row 1 unless row 1 already has content.
    fn ensure_header(&self, sheet: &str, header: &[&str]) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Grid helpers shared by the store implementations
// ---------------------------------------------------------------------------

type Grid = Vec<Vec<String>>;

fn is_blank(row: &[String]) -> bool {
    row.iter().all(|c| c.trim().is_empty())
}

fn check_row(sheet: &str, row: usize) -> Result<()> {
    if row == 0 {
        return Err(IntakeSyncError::sheet(format!(
            "{sheet}: row numbers are 1-based, got 0"
        )));
    }
    Ok(())
}

fn trim_trailing_blank(grid: &mut Grid) {
    while grid.last().is_some_and(|r| is_blank(r)) {
        grid.pop();
    }
}

fn grid_to_sheet(mut grid: Grid) -> SheetData {
    trim_trailing_blank(&mut grid);
    if grid.is_empty() {
        return SheetData::default();
    }
    let headers = grid.remove(0);
    SheetData {
        headers,
        rows: grid,
    }
}

fn clear_grid_rows(grid: &mut Grid, from_row: usize, row_count: usize) {
    let start = from_row - 1;
    let end = (start + row_count).min(grid.len());
    for row in grid.iter_mut().take(end).skip(start) {
        for cell in row.iter_mut() {
            cell.clear();
        }
    }
}

fn write_grid_rows(grid: &mut Grid, start_row: usize, rows: &[Vec<String>]) {
    let start = start_row - 1;
    if grid.len() < start + rows.len() {
        grid.resize_with(start + rows.len(), Vec::new);
    }
    for (offset, values) in rows.iter().enumerate() {
        let target = &mut grid[start + offset];
        if target.len() < values.len() {
            target.resize(values.len(), String::new());
        }
        for (cell, value) in target.iter_mut().zip(values) {
            cell.clone_from(value);
        }
    }
}

fn ensure_grid_header(grid: &mut Grid, header: &[&str]) -> bool {
    if grid.first().is_some_and(|r| !is_blank(r)) {
        return false;
    }
    let row: Vec<String> = header.iter().map(|h| (*h).to_string()).collect();
    if grid.is_empty() {
        grid.push(row);
    } else {
        grid[0] = row;
    }
    true
}
