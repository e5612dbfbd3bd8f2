//! Relational store abstraction.
//!
//! The synchronizer treats the relational side as an abstract collaborator:
//! a single dynamic table of text columns keyed by [`ID_COLUMN`], a captured
//! change log populated by row-level triggers, and a capture switch the loop
//! suppressor toggles around every propagation cycle.
//!
//! Two backends implement the trait: [`crate::mysql::MySqlStore`] for real
//! deployments and [`crate::memory::MemoryStore`] for tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;

/// Name of the primary-key column shared by the table and the sheet's first
/// data column.
pub const ID_COLUMN: &str = "Id";

/// Kind of captured row mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

impl ChangeOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOp::Insert => "INSERT",
            ChangeOp::Update => "UPDATE",
            ChangeOp::Delete => "DELETE",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "INSERT" => Ok(ChangeOp::Insert),
            "UPDATE" => Ok(ChangeOp::Update),
            "DELETE" => Ok(ChangeOp::Delete),
            other => Err(anyhow!("unknown change operation: {other}")),
        }
    }
}

/// One entry of the captured change log.
///
/// `id` is the autoincrement sequence number; entries are consumed in `id`
/// order and deleted only after successful replay to the endpoint.
#[derive(Debug, Clone)]
pub struct ChangeLogEntry {
    pub id: i64,
    pub row_id: String,
    pub op: ChangeOp,
}

/// A relational row as an ordered column-name/value mapping.
///
/// The column set is dynamic (it follows the sheet's header row), so rows are
/// ordered pairs rather than a fixed record type. Order matches the table's
/// column order, which is also the sheet's column order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowRecord {
    pub fields: Vec<(String, String)>,
}

impl RowRecord {
    pub fn new(fields: Vec<(String, String)>) -> Self {
        Self { fields }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }

    /// The row's primary-key value, if the record carries an `Id` column.
    pub fn id(&self) -> Option<&str> {
        self.get(ID_COLUMN)
    }

    /// Cell values in column order, for writing to the endpoint.
    pub fn values(&self) -> Vec<String> {
        self.fields.iter().map(|(_, value)| value.clone()).collect()
    }
}

/// The relational side of the synchronizer.
///
/// All values are textual; schema mutations are driven by the schema
/// reconciler. `enable_capture`/`disable_capture` install and remove the
/// row-level capture triggers and must stay balanced — the loop suppressor
/// owns that discipline.
#[async_trait]
pub trait RelationalStore: Send + Sync {
    async fn table_exists(&self) -> Result<bool>;

    /// Create the table with exactly the given columns, each textual.
    async fn create_table(&self, columns: &[String]) -> Result<()>;

    /// Current column names in table order.
    async fn current_columns(&self) -> Result<Vec<String>>;

    async fn add_column(&self, name: &str) -> Result<()>;

    /// Drop a column. Destructive and permanent; the reconciler warns before
    /// calling this.
    async fn drop_column(&self, name: &str) -> Result<()>;

    /// Fetch the full current row for a primary key, or `None` if the row no
    /// longer exists.
    async fn fetch_row(&self, id: &str) -> Result<Option<RowRecord>>;

    async fn insert_row(&self, row: &RowRecord) -> Result<()>;

    /// Update all non-key columns of the row identified by the record's `Id`.
    async fn update_row(&self, row: &RowRecord) -> Result<()>;

    async fn delete_row(&self, id: &str) -> Result<()>;

    /// All primary-key values currently in the table.
    async fn list_ids(&self) -> Result<Vec<String>>;

    /// Captured change-log entries in FIFO (`id` ascending) order.
    async fn pending_changes(&self) -> Result<Vec<ChangeLogEntry>>;

    /// Acknowledge one replayed entry.
    async fn delete_change(&self, id: i64) -> Result<()>;

    /// Reinstall the capture triggers. Tolerates already-installed triggers
    /// and a not-yet-created table.
    async fn enable_capture(&self) -> Result<()>;

    /// Remove the capture triggers so propagated writes are not re-captured.
    async fn disable_capture(&self) -> Result<()>;
}
