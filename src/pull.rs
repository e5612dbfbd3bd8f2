//! Endpoint-to-database propagation.
//!
//! Polls the sheet, reconciles the table's schema with the header row, then
//! upserts every data row whose last-modified timestamp is strictly newer
//! than the sync mark. Rows present in the table but absent from the sheet
//! are deleted — the endpoint emits no delete signal, so removal is inferred
//! from the id set. The sync mark only advances after a cycle ran all the
//! way through; an aborted cycle leaves it unchanged so nothing is missed on
//! retry.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tracing::{debug, info};

use sync_mark::SyncMarkStore;
use tabular_endpoint::{a1, TabularEndpoint};

use crate::schema;
use crate::store::{RelationalStore, RowRecord};
use crate::suppress::LoopSuppressor;

#[derive(Clone)]
pub struct PullPropagator {
    store: Arc<dyn RelationalStore>,
    endpoint: Arc<dyn TabularEndpoint>,
    sheet: String,
    /// Column letter of the reserved last-modified timestamp column.
    timestamp_column: String,
    mark_store: Arc<dyn SyncMarkStore>,
    suppressor: Arc<LoopSuppressor>,
}

impl PullPropagator {
    pub fn new(
        store: Arc<dyn RelationalStore>,
        endpoint: Arc<dyn TabularEndpoint>,
        sheet: impl Into<String>,
        timestamp_column: impl Into<String>,
        mark_store: Arc<dyn SyncMarkStore>,
        suppressor: Arc<LoopSuppressor>,
    ) -> Self {
        Self {
            store,
            endpoint,
            sheet: sheet.into(),
            timestamp_column: timestamp_column.into(),
            mark_store,
            suppressor,
        }
    }

    /// One full propagation cycle. The sync mark advances only when the
    /// cycle reached the delete-reconciliation step without error.
    pub async fn run_cycle(&self) -> Result<()> {
        let completed = self
            .suppressor
            .run(self.store.as_ref(), self.sync_once())
            .await?;
        if completed {
            self.mark_store
                .store(Utc::now())
                .await
                .context("persisting sync mark")?;
        }
        Ok(())
    }

    /// Returns `Ok(true)` when the sheet was fully reconciled into the
    /// table, `Ok(false)` when there was nothing to sync.
    async fn sync_once(&self) -> Result<bool> {
        let header_rows = self
            .endpoint
            .values_get(&format!("{}!1:1", self.sheet))
            .await
            .context("reading sheet header row")?;
        let headers = active_headers(header_rows.first().map(Vec::as_slice).unwrap_or(&[]));
        if headers.is_empty() {
            info!("sheet has no header row, nothing to sync");
            return Ok(false);
        }

        let last = a1::column_name(headers.len() - 1);
        let data = self
            .endpoint
            .values_get(&format!("{sheet}!A:{last}", sheet = self.sheet))
            .await
            .context("reading sheet data rows")?;
        let stamps = self
            .endpoint
            .values_get(&format!(
                "{sheet}!{col}:{col}",
                sheet = self.sheet,
                col = self.timestamp_column
            ))
            .await
            .context("reading sheet timestamp column")?;

        if data.len() <= 1 {
            info!("no data rows in sheet");
            return Ok(false);
        }

        schema::reconcile(self.store.as_ref(), &headers)
            .await
            .context("reconciling table schema with sheet headers")?;

        let mark = self
            .mark_store
            .load()
            .await
            .context("loading sync mark")?
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        debug!("syncing sheet rows newer than {mark}");

        let mut sheet_ids = Vec::new();
        for (index, cells) in data.iter().enumerate().skip(1) {
            let record = row_record(&headers, cells);
            let Some(id) = record.id().filter(|id| !id.is_empty()) else {
                // Blanked rows (replayed deletes) have no id and are treated
                // as absent.
                continue;
            };
            let id = id.to_string();
            sheet_ids.push(id.clone());

            let stamp = stamps
                .get(index)
                .and_then(|cells| cells.first())
                .and_then(|s| parse_timestamp(s));
            match stamp {
                Some(ts) if ts > mark => self
                    .upsert(&record, &id)
                    .await
                    .with_context(|| format!("upserting sheet row {}", index + 1))?,
                Some(_) => {}
                // A missing or malformed timestamp never counts as stale-old
                // (epoch); the row is simply not eligible this cycle.
                None => debug!("sheet row {} has no usable timestamp, skipping", index + 1),
            }
        }

        self.reconcile_deletes(&sheet_ids).await?;
        Ok(true)
    }

    async fn upsert(&self, record: &RowRecord, id: &str) -> Result<()> {
        if self.store.fetch_row(id).await?.is_some() {
            self.store.update_row(record).await?;
            debug!("updated row {id} from sheet");
        } else {
            self.store.insert_row(record).await?;
            debug!("inserted row {id} from sheet");
        }
        Ok(())
    }

    /// Delete table rows whose ids no longer appear in the sheet.
    async fn reconcile_deletes(&self, sheet_ids: &[String]) -> Result<()> {
        let db_ids = self.store.list_ids().await?;
        for id in db_ids {
            if !sheet_ids.contains(&id) {
                info!("row {id} removed from sheet, deleting from table");
                self.store
                    .delete_row(&id)
                    .await
                    .with_context(|| format!("deleting row {id}"))?;
            }
        }
        Ok(())
    }
}

/// Active columns: the first contiguous run of non-blank header cells.
pub fn active_headers(header_row: &[String]) -> Vec<String> {
    header_row
        .iter()
        .map(|h| h.trim())
        .take_while(|h| !h.is_empty())
        .map(str::to_string)
        .collect()
}

/// Build a row record from one sheet data row, coercing missing cells to
/// empty strings.
fn row_record(headers: &[String], cells: &[String]) -> RowRecord {
    let fields = headers
        .iter()
        .enumerate()
        .map(|(i, header)| (header.clone(), cells.get(i).cloned().unwrap_or_default()))
        .collect();
    RowRecord::new(fields)
}

/// Parse a cell from the timestamp column. Sheets hold timestamps in several
/// spellings; anything unrecognized yields `None` and excludes the row from
/// the cycle.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%m/%d/%Y %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%m/%d/%Y") {
        let naive = date.and_hms_opt(0, 0, 0)?;
        return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
    }
    None
}
