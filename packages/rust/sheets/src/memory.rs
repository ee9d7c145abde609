//! In-memory workbook.

use std::collections::HashMap;
use std::sync::Mutex;

use intakesync_shared::{IntakeSyncError, Result};

use crate::{
    Grid, SheetData, TabularStore, check_row, clear_grid_rows, ensure_grid_header,
    grid_to_sheet, write_grid_rows,
};

/// Workbook held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryWorkbook {
    sheets: Mutex<HashMap<String, Grid>>,
}

impl MemoryWorkbook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a sheet with a header row and data rows.
    pub fn with_sheet(self, name: &str, headers: &[&str], rows: Vec<Vec<String>>) -> Self {
        let mut grid: Grid = vec![headers.iter().map(|h| (*h).to_string()).collect()];
        grid.extend(rows);
        self.lock().insert(name.to_string(), grid);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Grid>> {
        // A poisoned lock only means a test panicked mid-write; the grid is still usable.
        self.sheets.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl TabularStore for MemoryWorkbook {
    fn read_all(&self, sheet: &str) -> Result<SheetData> {
        let sheets = self.lock();
        let grid = sheets
            .get(sheet)
            .ok_or_else(|| IntakeSyncError::sheet(format!("sheet '{sheet}' not found")))?;
        Ok(grid_to_sheet(grid.clone()))
    }

    fn clear_rows(&self, sheet: &str, from_row: usize, row_count: usize) -> Result<()> {
        check_row(sheet, from_row)?;
        let mut sheets = self.lock();
        if let Some(grid) = sheets.get_mut(sheet) {
            clear_grid_rows(grid, from_row, row_count);
        }
        Ok(())
    }

    fn write_rows(&self, sheet: &str, start_row: usize, rows: &[Vec<String>]) -> Result<()> {
        check_row(sheet, start_row)?;
        let mut sheets = self.lock();
        let grid = sheets.entry(sheet.to_string()).or_default();
        write_grid_rows(grid, start_row, rows);
        Ok(())
    }

    fn ensure_header(&self, sheet: &str, header: &[&str]) -> Result<()> {
        let mut sheets = self.lock();
        let grid = sheets.entry(sheet.to_string()).or_default();
        ensure_grid_header(grid, header);
        Ok(())
    }
}
