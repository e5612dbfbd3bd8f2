//! In-memory relational store.
//!
//! Simulates the MySQL backend closely enough to drive full propagation
//! cycles in tests: row mutations are recorded in the change log whenever
//! capture is enabled, exactly as the database triggers would.

use std::collections::BTreeMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::store::{ChangeLogEntry, ChangeOp, RelationalStore, RowRecord, ID_COLUMN};

#[derive(Default)]
struct MemoryInner {
    table_created: bool,
    columns: Vec<String>,
    rows: BTreeMap<String, BTreeMap<String, String>>,
    changes: Vec<ChangeLogEntry>,
    next_change_id: i64,
    capture_enabled: bool,
    overlapping_disables: usize,
}

impl MemoryInner {
    fn capture(&mut self, row_id: &str, op: ChangeOp) {
        if !self.capture_enabled {
            return;
        }
        self.next_change_id += 1;
        self.changes.push(ChangeLogEntry {
            id: self.next_change_id,
            row_id: row_id.to_string(),
            op,
        });
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                capture_enabled: true,
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().expect("store lock poisoned")
    }

    /// Whether capture is currently enabled; every cycle must leave this true.
    pub fn capture_enabled(&self) -> bool {
        self.lock().capture_enabled
    }

    /// How many times capture was disabled while already disabled. Stays zero
    /// when the loop suppressor serializes the propagators correctly.
    pub fn overlapping_disables(&self) -> usize {
        self.lock().overlapping_disables
    }

    /// Drop captured entries; used by tests to seed rows without queueing
    /// replay work.
    pub fn clear_change_log(&self) {
        self.lock().changes.clear();
    }
}

#[async_trait]
impl RelationalStore for MemoryStore {
    async fn table_exists(&self) -> Result<bool> {
        Ok(self.lock().table_created)
    }

    async fn create_table(&self, columns: &[String]) -> Result<()> {
        let mut inner = self.lock();
        inner.table_created = true;
        inner.columns = columns.to_vec();
        Ok(())
    }

    async fn current_columns(&self) -> Result<Vec<String>> {
        Ok(self.lock().columns.clone())
    }

    async fn add_column(&self, name: &str) -> Result<()> {
        self.lock().columns.push(name.to_string());
        Ok(())
    }

    async fn drop_column(&self, name: &str) -> Result<()> {
        let mut inner = self.lock();
        inner.columns.retain(|c| c != name);
        for row in inner.rows.values_mut() {
            row.remove(name);
        }
        Ok(())
    }

    async fn fetch_row(&self, id: &str) -> Result<Option<RowRecord>> {
        let inner = self.lock();
        let Some(row) = inner.rows.get(id) else {
            return Ok(None);
        };
        let fields = inner
            .columns
            .iter()
            .map(|c| (c.clone(), row.get(c).cloned().unwrap_or_default()))
            .collect();
        Ok(Some(RowRecord::new(fields)))
    }

    async fn insert_row(&self, row: &RowRecord) -> Result<()> {
        let id = row
            .id()
            .ok_or_else(|| anyhow!("insert without an {ID_COLUMN} value"))?
            .to_string();
        let mut inner = self.lock();
        let cells = row
            .fields
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        inner.rows.insert(id.clone(), cells);
        inner.capture(&id, ChangeOp::Insert);
        Ok(())
    }

    async fn update_row(&self, row: &RowRecord) -> Result<()> {
        let id = row
            .id()
            .ok_or_else(|| anyhow!("update without an {ID_COLUMN} value"))?
            .to_string();
        let mut inner = self.lock();
        let cells = inner
            .rows
            .get_mut(&id)
            .ok_or_else(|| anyhow!("no row with {ID_COLUMN} {id}"))?;
        for (name, value) in &row.fields {
            cells.insert(name.clone(), value.clone());
        }
        inner.capture(&id, ChangeOp::Update);
        Ok(())
    }

    async fn delete_row(&self, id: &str) -> Result<()> {
        let mut inner = self.lock();
        if inner.rows.remove(id).is_some() {
            inner.capture(id, ChangeOp::Delete);
        }
        Ok(())
    }

    async fn list_ids(&self) -> Result<Vec<String>> {
        Ok(self.lock().rows.keys().cloned().collect())
    }

    async fn pending_changes(&self) -> Result<Vec<ChangeLogEntry>> {
        Ok(self.lock().changes.clone())
    }

    async fn delete_change(&self, id: i64) -> Result<()> {
        self.lock().changes.retain(|e| e.id != id);
        Ok(())
    }

    async fn enable_capture(&self) -> Result<()> {
        self.lock().capture_enabled = true;
        Ok(())
    }

    async fn disable_capture(&self) -> Result<()> {
        let mut inner = self.lock();
        if !inner.capture_enabled {
            inner.overlapping_disables += 1;
        }
        inner.capture_enabled = false;
        Ok(())
    }
}
