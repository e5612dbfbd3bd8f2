//! MySQL implementation of the relational store.
//!
//! Change capture uses three row-level `AFTER INSERT/UPDATE/DELETE` triggers
//! that append `(row_id, operation)` to a change-log table with an
//! autoincrement sequence id. Suppressing capture drops the triggers;
//! resuming recreates them. This works on any MySQL 5.6+ without binlog
//! access or special privileges.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use mysql_async::{prelude::*, Conn, Pool, Row, Value};
use tracing::{debug, info};

use crate::schema::is_safe_column_name;
use crate::store::{ChangeLogEntry, ChangeOp, RelationalStore, RowRecord, ID_COLUMN};

/// Table holding captured row mutations.
const CHANGE_LOG_TABLE: &str = "sheet_sync_changes";

/// Names of the capture triggers, one per operation kind.
const TRIGGER_NAMES: [&str; 3] = ["sheet_sync_insert", "sheet_sync_update", "sheet_sync_delete"];

pub struct MySqlStore {
    pool: Pool,
    table: String,
}

impl MySqlStore {
    /// Table and column names are interpolated into DDL, so the table name is
    /// allow-listed up front.
    pub fn new(pool: Pool, table: &str) -> Result<Self> {
        if !is_safe_column_name(table) {
            return Err(anyhow!("unsafe table name: {table:?}"));
        }
        Ok(Self {
            pool,
            table: table.to_string(),
        })
    }

    /// Create the change-log table and install capture triggers if the data
    /// table already exists. Called once at startup; the pull propagator
    /// creates the data table later if the sheet is seen first.
    pub async fn initialize(&self) -> Result<()> {
        let mut conn = self.conn().await?;
        ensure_change_log(&mut conn).await?;
        drop(conn);
        self.enable_capture().await?;
        info!("MySQL change capture initialized for table {}", self.table);
        Ok(())
    }

    async fn conn(&self) -> Result<Conn> {
        self.pool
            .get_conn()
            .await
            .context("acquiring MySQL connection")
    }

    async fn exists(conn: &mut Conn, table: &str) -> Result<bool> {
        let found: Option<i64> = conn
            .exec_first(
                "SELECT 1 FROM information_schema.tables
                 WHERE table_schema = DATABASE() AND table_name = ?",
                (table,),
            )
            .await?;
        Ok(found.is_some())
    }
}

async fn ensure_change_log(conn: &mut Conn) -> Result<()> {
    let ddl = format!(
        "CREATE TABLE IF NOT EXISTS {CHANGE_LOG_TABLE} (
            id BIGINT AUTO_INCREMENT PRIMARY KEY,
            row_id VARCHAR(255) NOT NULL,
            operation VARCHAR(10) NOT NULL
        )"
    );
    conn.query_drop(ddl)
        .await
        .context("creating change-log table")
}

/// The capture triggers reference the row's `Id` column, so they can only be
/// installed once the data table exists with that column.
fn capture_trigger_ddl(table: &str) -> [String; 3] {
    [
        format!(
            "CREATE TRIGGER {name}
             AFTER INSERT ON {table}
             FOR EACH ROW
             INSERT INTO {CHANGE_LOG_TABLE} (row_id, operation) VALUES (NEW.{ID_COLUMN}, 'INSERT')",
            name = TRIGGER_NAMES[0],
        ),
        format!(
            "CREATE TRIGGER {name}
             AFTER UPDATE ON {table}
             FOR EACH ROW
             INSERT INTO {CHANGE_LOG_TABLE} (row_id, operation) VALUES (NEW.{ID_COLUMN}, 'UPDATE')",
            name = TRIGGER_NAMES[1],
        ),
        format!(
            "CREATE TRIGGER {name}
             AFTER DELETE ON {table}
             FOR EACH ROW
             INSERT INTO {CHANGE_LOG_TABLE} (row_id, operation) VALUES (OLD.{ID_COLUMN}, 'DELETE')",
            name = TRIGGER_NAMES[2],
        ),
    ]
}

/// All synced columns are VARCHAR; anything else MySQL hands back is
/// coerced to text.
fn value_to_text(value: &Value) -> String {
    match value {
        Value::NULL => String::new(),
        Value::Bytes(bytes) => String::from_utf8_lossy(bytes).to_string(),
        Value::Int(i) => i.to_string(),
        Value::UInt(u) => u.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Double(d) => d.to_string(),
        other => format!("{other:?}"),
    }
}

#[async_trait]
impl RelationalStore for MySqlStore {
    async fn table_exists(&self) -> Result<bool> {
        let mut conn = self.conn().await?;
        Self::exists(&mut conn, &self.table).await
    }

    async fn create_table(&self, columns: &[String]) -> Result<()> {
        for name in columns {
            if !is_safe_column_name(name) {
                return Err(anyhow!("unsafe column name: {name:?}"));
            }
        }
        let defs = columns
            .iter()
            .map(|c| format!("{c} VARCHAR(255)"))
            .collect::<Vec<_>>()
            .join(", ");
        let mut conn = self.conn().await?;
        conn.query_drop(format!(
            "CREATE TABLE IF NOT EXISTS {} ({defs})",
            self.table
        ))
        .await
        .with_context(|| format!("creating table {}", self.table))?;
        info!("created table {} with columns [{}]", self.table, columns.join(", "));
        Ok(())
    }

    async fn current_columns(&self) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        let columns: Vec<String> = conn
            .exec(
                "SELECT COLUMN_NAME FROM information_schema.columns
                 WHERE table_schema = DATABASE() AND table_name = ?
                 ORDER BY ORDINAL_POSITION",
                (&self.table,),
            )
            .await?;
        Ok(columns)
    }

    async fn add_column(&self, name: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.query_drop(format!(
            "ALTER TABLE {} ADD COLUMN {name} VARCHAR(255)",
            self.table
        ))
        .await
        .with_context(|| format!("adding column {name}"))?;
        Ok(())
    }

    async fn drop_column(&self, name: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.query_drop(format!("ALTER TABLE {} DROP COLUMN {name}", self.table))
            .await
            .with_context(|| format!("dropping column {name}"))?;
        Ok(())
    }

    async fn fetch_row(&self, id: &str) -> Result<Option<RowRecord>> {
        let mut conn = self.conn().await?;
        let row: Option<Row> = conn
            .exec_first(
                format!("SELECT * FROM {} WHERE {ID_COLUMN} = ?", self.table),
                (id,),
            )
            .await
            .with_context(|| format!("fetching row {id}"))?;

        let Some(row) = row else { return Ok(None) };
        let columns = row.columns();
        let mut fields = Vec::with_capacity(columns.len());
        for (index, column) in columns.iter().enumerate() {
            let value = row
                .as_ref(index)
                .ok_or_else(|| anyhow!("missing value for column {}", column.name_str()))?;
            fields.push((column.name_str().to_string(), value_to_text(value)));
        }
        Ok(Some(RowRecord::new(fields)))
    }

    async fn insert_row(&self, row: &RowRecord) -> Result<()> {
        for (name, _) in &row.fields {
            if !is_safe_column_name(name) {
                return Err(anyhow!("unsafe column name: {name:?}"));
            }
        }
        let names = row
            .fields
            .iter()
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = vec!["?"; row.fields.len()].join(", ");
        let params: Vec<Value> = row
            .fields
            .iter()
            .map(|(_, value)| Value::from(value.as_str()))
            .collect();

        let mut conn = self.conn().await?;
        conn.exec_drop(
            format!(
                "INSERT INTO {} ({names}) VALUES ({placeholders})",
                self.table
            ),
            params,
        )
        .await
        .with_context(|| format!("inserting row {:?}", row.id()))?;
        Ok(())
    }

    async fn update_row(&self, row: &RowRecord) -> Result<()> {
        let id = row
            .id()
            .ok_or_else(|| anyhow!("update without an {ID_COLUMN} value"))?;
        let mut sets = Vec::new();
        let mut params: Vec<Value> = Vec::new();
        for (name, value) in &row.fields {
            if name == ID_COLUMN {
                continue;
            }
            if !is_safe_column_name(name) {
                return Err(anyhow!("unsafe column name: {name:?}"));
            }
            sets.push(format!("{name} = ?"));
            params.push(Value::from(value.as_str()));
        }
        if sets.is_empty() {
            return Ok(());
        }
        params.push(Value::from(id));

        let mut conn = self.conn().await?;
        conn.exec_drop(
            format!(
                "UPDATE {} SET {} WHERE {ID_COLUMN} = ?",
                self.table,
                sets.join(", ")
            ),
            params,
        )
        .await
        .with_context(|| format!("updating row {id}"))?;
        Ok(())
    }

    async fn delete_row(&self, id: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.exec_drop(
            format!("DELETE FROM {} WHERE {ID_COLUMN} = ?", self.table),
            (id,),
        )
        .await
        .with_context(|| format!("deleting row {id}"))?;
        Ok(())
    }

    async fn list_ids(&self) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        let ids: Vec<String> = conn
            .query(format!("SELECT {ID_COLUMN} FROM {}", self.table))
            .await?;
        Ok(ids)
    }

    async fn pending_changes(&self) -> Result<Vec<ChangeLogEntry>> {
        let mut conn = self.conn().await?;
        if !Self::exists(&mut conn, CHANGE_LOG_TABLE).await? {
            return Ok(Vec::new());
        }

        let rows: Vec<Row> = conn
            .query(format!(
                "SELECT id, row_id, operation FROM {CHANGE_LOG_TABLE} ORDER BY id ASC"
            ))
            .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.get(0).ok_or_else(|| anyhow!("change entry missing id"))?;
            let row_id: String = row
                .get(1)
                .ok_or_else(|| anyhow!("change entry {id} missing row_id"))?;
            let operation: String = row
                .get(2)
                .ok_or_else(|| anyhow!("change entry {id} missing operation"))?;
            entries.push(ChangeLogEntry {
                id,
                row_id,
                op: ChangeOp::parse(&operation)?,
            });
        }
        Ok(entries)
    }

    async fn delete_change(&self, id: i64) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.exec_drop(
            format!("DELETE FROM {CHANGE_LOG_TABLE} WHERE id = ?"),
            (id,),
        )
        .await
        .with_context(|| format!("acknowledging change entry {id}"))?;
        Ok(())
    }

    async fn enable_capture(&self) -> Result<()> {
        let mut conn = self.conn().await?;
        if !Self::exists(&mut conn, &self.table).await? {
            debug!(
                "table {} does not exist yet, deferring capture triggers",
                self.table
            );
            return Ok(());
        }
        ensure_change_log(&mut conn).await?;

        for ddl in capture_trigger_ddl(&self.table) {
            match conn.query_drop(&ddl).await {
                Ok(()) => {}
                Err(e) if e.to_string().contains("already exists") => {
                    debug!("capture trigger already installed");
                }
                Err(e) => return Err(e).context("installing capture trigger"),
            }
        }
        debug!("capture triggers installed on {}", self.table);
        Ok(())
    }

    async fn disable_capture(&self) -> Result<()> {
        let mut conn = self.conn().await?;
        for name in TRIGGER_NAMES {
            conn.query_drop(format!("DROP TRIGGER IF EXISTS {name}"))
                .await
                .with_context(|| format!("dropping capture trigger {name}"))?;
        }
        debug!("capture triggers removed from {}", self.table);
        Ok(())
    }
}
