//! Implements the `Sheet` trait in memory for testing purposes.
//!
//! Note: this is compiled even in the "production" version of this app so that the whole program
//! can run, top-to-bottom, without Google Sheets (see `Mode::Testing`). State is process-global and
//! keyed by spreadsheet id so that every `TestSheet` created for the same spreadsheet sees the same
//! data, just like every client of a real spreadsheet does.

use crate::api::Sheet;
use crate::error::Res;
use anyhow::{bail, Context};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, OnceLock};

/// The contents of one in-memory spreadsheet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct TestSheetState {
    /// Sheets in creation order with their rows.
    sheets: Vec<(String, Vec<Vec<String>>)>,
    /// Sheets whose reads and writes fail, for exercising partial-failure handling.
    pub(crate) failing: BTreeSet<String>,
    /// Number of mutating calls served so far.
    pub(crate) writes: usize,
}

impl TestSheetState {
    pub(crate) fn rows(&self, sheet_name: &str) -> Option<&Vec<Vec<String>>> {
        self.sheets
            .iter()
            .find(|(name, _)| name == sheet_name)
            .map(|(_, rows)| rows)
    }

    /// Replaces (or creates) a sheet with `rows`.
    #[cfg(test)]
    pub(crate) fn set_rows(&mut self, sheet_name: &str, rows: Vec<Vec<String>>) {
        match self.rows_mut(sheet_name) {
            Some(existing) => *existing = rows,
            None => self.sheets.push((sheet_name.to_string(), rows)),
        }
    }

    pub(crate) fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|(name, _)| name.clone()).collect()
    }

    fn rows_mut(&mut self, sheet_name: &str) -> Option<&mut Vec<Vec<String>>> {
        self.sheets
            .iter_mut()
            .find(|(name, _)| name == sheet_name)
            .map(|(_, rows)| rows)
    }

    /// Rows of a sheet that exists and is not marked as failing.
    fn usable_rows(&mut self, sheet_name: &str) -> Res<&mut Vec<Vec<String>>> {
        if self.failing.contains(sheet_name) {
            bail!("Simulated failure for sheet '{sheet_name}'");
        }
        self.rows_mut(sheet_name)
            .with_context(|| format!("Sheet '{sheet_name}' not found"))
    }
}

fn states() -> &'static Mutex<HashMap<String, TestSheetState>> {
    static STATES: OnceLock<Mutex<HashMap<String, TestSheetState>>> = OnceLock::new();
    STATES.get_or_init(|| Mutex::new(HashMap::new()))
}

/// An implementation of the `Sheet` trait that holds its data in memory.
#[derive(Debug, Clone)]
pub(crate) struct TestSheet {
    spreadsheet_id: String,
}

impl TestSheet {
    pub(crate) fn new(spreadsheet_id: impl Into<String>) -> Self {
        Self {
            spreadsheet_id: spreadsheet_id.into(),
        }
    }

    #[cfg(test)]
    pub(crate) fn get_state(&self) -> TestSheetState {
        self.with_state(|state| state.clone())
    }

    #[cfg(test)]
    pub(crate) fn set_state(&self, state: TestSheetState) {
        self.with_state(|existing| *existing = state)
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut TestSheetState) -> T) -> T {
        // A panic in another test must not poison every other test's spreadsheet.
        let mut guard = states().lock().unwrap_or_else(|e| e.into_inner());
        f(guard.entry(self.spreadsheet_id.clone()).or_default())
    }
}

#[async_trait::async_trait]
impl Sheet for TestSheet {
    async fn sheet_names(&mut self) -> Res<Vec<String>> {
        Ok(self.with_state(|state| state.sheet_names()))
    }

    async fn add_sheet(&mut self, sheet_name: &str) -> Res<()> {
        self.with_state(|state| {
            if state.rows(sheet_name).is_some() {
                bail!("A sheet named '{sheet_name}' already exists");
            }
            state.sheets.push((sheet_name.to_string(), Vec::new()));
            state.writes += 1;
            Ok(())
        })
    }

    async fn get(&mut self, sheet_name: &str) -> Res<Vec<Vec<String>>> {
        self.with_state(|state| state.usable_rows(sheet_name).map(|rows| rows.clone()))
    }

    async fn append_rows(&mut self, sheet_name: &str, rows: &[Vec<String>]) -> Res<()> {
        self.with_state(|state| {
            state.usable_rows(sheet_name)?.extend_from_slice(rows);
            state.writes += 1;
            Ok(())
        })
    }

    async fn update_range(
        &mut self,
        sheet_name: &str,
        start_row: usize,
        rows: &[Vec<String>],
    ) -> Res<()> {
        if start_row == 0 {
            bail!("Row numbers start at 1");
        }
        self.with_state(|state| {
            let existing = state.usable_rows(sheet_name)?;
            for (i, row) in rows.iter().enumerate() {
                let index = start_row - 1 + i;
                if existing.len() <= index {
                    existing.resize(index + 1, Vec::new());
                }
                // Cells to the right of the written range keep their values.
                let target = &mut existing[index];
                if target.len() < row.len() {
                    target.resize(row.len(), String::new());
                }
                target[..row.len()].clone_from_slice(row);
            }
            state.writes += 1;
            Ok(())
        })
    }

    async fn delete_row(&mut self, sheet_name: &str, row: usize) -> Res<()> {
        self.with_state(|state| {
            let existing = state.usable_rows(sheet_name)?;
            if row == 0 || row > existing.len() {
                bail!("Row {row} does not exist in sheet '{sheet_name}'");
            }
            existing.remove(row - 1);
            state.writes += 1;
            Ok(())
        })
    }
}
