//! Database-to-endpoint propagation.
//!
//! Drains the captured change log in FIFO order and replays each mutation
//! against the sheet: INSERT appends a row, UPDATE overwrites the sheet row
//! carrying the same Id, DELETE blanks that row's cells (the endpoint
//! interface has no row removal; blanking preserves the positions of the
//! rows below). Each entry is acknowledged only after successful replay, so
//! a failed entry and everything queued behind it are retried next cycle in
//! the original order.
//!
//! Rows are located by scanning the sheet's first column for the Id rather
//! than by assuming `sheet row = row id + 1`; manual reordering or gaps in
//! the sheet would silently break a positional mapping.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use tabular_endpoint::{a1, TabularEndpoint};

use crate::store::{ChangeLogEntry, ChangeOp, RelationalStore};
use crate::suppress::LoopSuppressor;

#[derive(Clone)]
pub struct PushPropagator {
    store: Arc<dyn RelationalStore>,
    endpoint: Arc<dyn TabularEndpoint>,
    sheet: String,
    suppressor: Arc<LoopSuppressor>,
}

impl PushPropagator {
    pub fn new(
        store: Arc<dyn RelationalStore>,
        endpoint: Arc<dyn TabularEndpoint>,
        sheet: impl Into<String>,
        suppressor: Arc<LoopSuppressor>,
    ) -> Self {
        Self {
            store,
            endpoint,
            sheet: sheet.into(),
            suppressor,
        }
    }

    /// One full propagation cycle: suppress capture, drain the change log,
    /// resume capture.
    pub async fn run_cycle(&self) -> Result<()> {
        self.suppressor.run(self.store.as_ref(), self.drain()).await
    }

    async fn drain(&self) -> Result<()> {
        let entries = self.store.pending_changes().await?;
        if entries.is_empty() {
            debug!("no captured changes to replay");
            return Ok(());
        }
        info!("replaying {} captured changes to the sheet", entries.len());

        for entry in entries {
            self.replay(&entry).await.with_context(|| {
                format!(
                    "replaying change {} ({} row {})",
                    entry.id,
                    entry.op.as_str(),
                    entry.row_id
                )
            })?;
            self.store.delete_change(entry.id).await?;
        }
        Ok(())
    }

    async fn replay(&self, entry: &ChangeLogEntry) -> Result<()> {
        match entry.op {
            ChangeOp::Insert => {
                let Some(row) = self.store.fetch_row(&entry.row_id).await? else {
                    // Row already deleted by a later queued operation; the
                    // pending DELETE entry will reconcile the sheet.
                    warn!(
                        "change {} references missing row {}, skipping",
                        entry.id, entry.row_id
                    );
                    return Ok(());
                };
                self.endpoint
                    .values_append(&format!("{}!A:A", self.sheet), vec![row.values()])
                    .await?;
                debug!("appended row {} to the sheet", entry.row_id);
            }
            ChangeOp::Update => {
                let Some(row) = self.store.fetch_row(&entry.row_id).await? else {
                    warn!(
                        "change {} references missing row {}, skipping",
                        entry.id, entry.row_id
                    );
                    return Ok(());
                };
                let values = row.values();
                match self.find_sheet_row(&entry.row_id).await? {
                    Some(position) => {
                        let last = a1::column_name(values.len().saturating_sub(1));
                        self.endpoint
                            .values_update(
                                &format!("{sheet}!A{position}:{last}{position}", sheet = self.sheet),
                                vec![values],
                            )
                            .await?;
                        debug!("overwrote sheet row {position} for row {}", entry.row_id);
                    }
                    None => {
                        // Not in the sheet (e.g. its row was blanked); append
                        // so both sides still converge.
                        debug!(
                            "row {} not found in sheet, appending instead",
                            entry.row_id
                        );
                        self.endpoint
                            .values_append(&format!("{}!A:A", self.sheet), vec![values])
                            .await?;
                    }
                }
            }
            ChangeOp::Delete => match self.find_sheet_row(&entry.row_id).await? {
                Some(position) => {
                    let width = self.sheet_width().await?;
                    let last = a1::column_name(width.saturating_sub(1));
                    self.endpoint
                        .values_update(
                            &format!("{sheet}!A{position}:{last}{position}", sheet = self.sheet),
                            vec![vec![String::new(); width]],
                        )
                        .await?;
                    debug!("blanked sheet row {position} for deleted row {}", entry.row_id);
                }
                None => {
                    debug!("deleted row {} already absent from sheet", entry.row_id);
                }
            },
        }
        Ok(())
    }

    /// 1-based sheet row whose first cell equals `row_id`, if any.
    async fn find_sheet_row(&self, row_id: &str) -> Result<Option<usize>> {
        let first_column = self
            .endpoint
            .values_get(&format!("{}!A:A", self.sheet))
            .await?;
        Ok(first_column
            .iter()
            .position(|cells| cells.first().map(String::as_str) == Some(row_id))
            .map(|index| index + 1))
    }

    /// Width of the header row: its first contiguous run of non-blank cells.
    async fn sheet_width(&self) -> Result<usize> {
        let header = self
            .endpoint
            .values_get(&format!("{}!1:1", self.sheet))
            .await?;
        let cells = header.into_iter().next().unwrap_or_default();
        Ok(cells.iter().take_while(|c| !c.trim().is_empty()).count())
    }
}
