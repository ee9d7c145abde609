//! Directory-of-CSV workbook: sheet `Requests` lives in `<dir>/Requests.csv`.

use std::path::{Path, PathBuf};

use intakesync_shared::{IntakeSyncError, Result};
use tracing::debug;

use crate::{
    Grid, SheetData, TabularStore, check_row, clear_grid_rows, ensure_grid_header,
    grid_to_sheet, trim_trailing_blank, write_grid_rows,
};

/// Workbook backed by CSV files in one directory.
#[derive(Debug, Clone)]
pub struct CsvWorkbook {
    dir: PathBuf,
}

impl CsvWorkbook {
    /// Open a workbook directory, creating it if missing.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| IntakeSyncError::io(&dir, e))?;
        Ok(Self { dir })
    }

    /// Path of the CSV file holding `sheet`.
    pub fn sheet_path(&self, sheet: &str) -> PathBuf {
        self.dir.join(format!("{sheet}.csv"))
    }

    fn load(&self, sheet: &str) -> Result<Option<Grid>> {
        let path = self.sheet_path(sheet);
        if !path.exists() {
            return Ok(None);
        }
        load_grid(&path).map(Some)
    }

    fn load_or_empty(&self, sheet: &str) -> Result<Grid> {
        Ok(self.load(sheet)?.unwrap_or_default())
    }

    fn save(&self, sheet: &str, mut grid: Grid) -> Result<()> {
        trim_trailing_blank(&mut grid);
        let path = self.sheet_path(sheet);
        save_grid(&path, &grid)?;
        debug!(sheet, rows = grid.len(), path = %path.display(), "sheet saved");
        Ok(())
    }
}

impl TabularStore for CsvWorkbook {
    fn read_all(&self, sheet: &str) -> Result<SheetData> {
        let grid = self.load(sheet)?.ok_or_else(|| {
            IntakeSyncError::sheet(format!(
                "sheet '{sheet}' not found at {}",
                self.sheet_path(sheet).display()
            ))
        })?;
        Ok(grid_to_sheet(grid))
    }

    fn clear_rows(&self, sheet: &str, from_row: usize, row_count: usize) -> Result<()> {
        check_row(sheet, from_row)?;
        let Some(mut grid) = self.load(sheet)? else {
            return Ok(());
        };
        clear_grid_rows(&mut grid, from_row, row_count);
        self.save(sheet, grid)
    }

    fn write_rows(&self, sheet: &str, start_row: usize, rows: &[Vec<String>]) -> Result<()> {
        check_row(sheet, start_row)?;
        let mut grid = self.load_or_empty(sheet)?;
        write_grid_rows(&mut grid, start_row, rows);
        self.save(sheet, grid)
    }

    fn ensure_header(&self, sheet: &str, header: &[&str]) -> Result<()> {
        let mut grid = self.load_or_empty(sheet)?;
        if ensure_grid_header(&mut grid, header) {
            self.save(sheet, grid)?;
        }
        Ok(())
    }
}

fn load_grid(path: &Path) -> Result<Grid> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| IntakeSyncError::sheet(format!("{}: {e}", path.display())))?;

    let mut grid = Grid::new();
    for record in reader.records() {
        let record =
            record.map_err(|e| IntakeSyncError::sheet(format!("{}: {e}", path.display())))?;
        grid.push(record.iter().map(str::to_string).collect());
    }
    Ok(grid)
}

fn save_grid(path: &Path, grid: &Grid) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| IntakeSyncError::sheet(format!("{}: {e}", path.display())))?;

    // The CSV reader skips empty lines, so pad every row to the sheet width to
    // keep blank rows (and therefore row numbers) intact.
    let width = grid.iter().map(Vec::len).max().unwrap_or(0).max(1);
    for row in grid {
        let padded = row
            .iter()
            .map(String::as_str)
            .chain(std::iter::repeat_n("", width - row.len()));
        writer
            .write_record(padded)
            .map_err(|e| IntakeSyncError::sheet(format!("{}: {e}", path.display())))?;
    }
    writer.flush().map_err(|e| IntakeSyncError::io(path, e))?;
    Ok(())
}
