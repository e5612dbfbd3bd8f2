//! In-memory tabular endpoint backend.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::a1::{self, RangeRef};
use crate::{EndpointError, TabularEndpoint};

/// An in-memory sheet: a growable grid of text cells.
///
/// Behaves like the remote `values.*` API closely enough for cycle tests:
/// reads clip to the populated grid, writes grow it, appends land after the
/// last row containing any non-blank cell.
#[derive(Default)]
pub struct MemorySheet {
    grid: Mutex<Vec<Vec<String>>>,
}

impl MemorySheet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sheet pre-populated with `rows` (row 1 first).
    pub fn with_rows(rows: Vec<Vec<&str>>) -> Self {
        let grid = rows
            .into_iter()
            .map(|r| r.into_iter().map(str::to_string).collect())
            .collect();
        Self {
            grid: Mutex::new(grid),
        }
    }

    /// Snapshot of the full grid, for assertions.
    pub fn rows(&self) -> Vec<Vec<String>> {
        self.grid.lock().expect("sheet lock poisoned").clone()
    }

    fn write_at(&self, start_row: usize, start_col: usize, values: &[Vec<String>]) {
        let mut grid = self.grid.lock().expect("sheet lock poisoned");
        for (i, row) in values.iter().enumerate() {
            let r = start_row + i;
            if grid.len() <= r {
                grid.resize(r + 1, Vec::new());
            }
            for (j, cell) in row.iter().enumerate() {
                let c = start_col + j;
                if grid[r].len() <= c {
                    grid[r].resize(c + 1, String::new());
                }
                grid[r][c] = cell.clone();
            }
        }
    }
}

#[async_trait]
impl TabularEndpoint for MemorySheet {
    async fn values_get(&self, range: &str) -> Result<Vec<Vec<String>>, EndpointError> {
        let RangeRef { start, end, .. } = a1::parse_range(range)?;
        let grid = self.grid.lock().expect("sheet lock poisoned");

        let first_row = start.row.unwrap_or(0);
        let last_row = end.row.unwrap_or_else(|| grid.len().saturating_sub(1));
        let first_col = start.col.unwrap_or(0);

        let mut out = Vec::new();
        for r in first_row..=last_row {
            let Some(row) = grid.get(r) else { break };
            let last_col = end.col.unwrap_or_else(|| row.len().saturating_sub(1));
            let cells: Vec<String> = row
                .iter()
                .skip(first_col)
                .take(last_col.saturating_sub(first_col) + 1)
                .cloned()
                .collect();
            out.push(cells);
        }
        Ok(out)
    }

    async fn values_update(
        &self,
        range: &str,
        values: Vec<Vec<String>>,
    ) -> Result<(), EndpointError> {
        let RangeRef { start, .. } = a1::parse_range(range)?;
        let row = start
            .row
            .ok_or_else(|| EndpointError::InvalidRange(range.to_string()))?;
        self.write_at(row, start.col.unwrap_or(0), &values);
        Ok(())
    }

    async fn values_append(
        &self,
        range: &str,
        values: Vec<Vec<String>>,
    ) -> Result<(), EndpointError> {
        a1::parse_range(range)?;
        let next_row = {
            let grid = self.grid.lock().expect("sheet lock poisoned");
            grid.iter()
                .rposition(|row| row.iter().any(|c| !c.is_empty()))
                .map(|i| i + 1)
                .unwrap_or(0)
        };
        self.write_at(next_row, 0, &values);
        Ok(())
    }
}
