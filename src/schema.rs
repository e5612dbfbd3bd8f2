//! Schema reconciliation between the sheet's header row and the table.
//!
//! The header row is the source of truth for the column set: headers missing
//! from the table are added, table columns missing from the headers are
//! dropped. Dropping is destructive and permanent; losing a column's data
//! when its header disappears from the sheet is an accepted risk.

use anyhow::{anyhow, Result};
use tracing::{info, warn};

use crate::store::RelationalStore;

/// Column additions and removals needed to make `current` equal `desired`.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub to_add: Vec<String>,
    pub to_drop: Vec<String>,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_drop.is_empty()
    }
}

/// Compute the set difference between the table's columns and the headers.
/// Order within each list follows the input order.
pub fn diff_columns(current: &[String], desired: &[String]) -> ReconcilePlan {
    ReconcilePlan {
        to_add: desired
            .iter()
            .filter(|c| !current.contains(c))
            .cloned()
            .collect(),
        to_drop: current
            .iter()
            .filter(|c| !desired.contains(c))
            .cloned()
            .collect(),
    }
}

/// Headers are untrusted external input but end up in DDL, so only
/// identifier-shaped names are allowed: ASCII letter or underscore first,
/// then letters, digits and underscores.
pub fn is_safe_column_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Converge the table's column set on the sheet's headers, creating the
/// table on first sync. Additions run before drops so later steps can rely
/// on every desired column existing.
pub async fn reconcile(store: &dyn RelationalStore, headers: &[String]) -> Result<()> {
    for header in headers {
        if !is_safe_column_name(header) {
            return Err(anyhow!("unsafe header name in sheet: {header:?}"));
        }
    }

    if !store.table_exists().await? {
        store.create_table(headers).await?;
        return Ok(());
    }

    let current = store.current_columns().await?;
    let plan = diff_columns(&current, headers);
    if plan.is_empty() {
        return Ok(());
    }
    info!(
        "reconciling schema: adding [{}], dropping [{}]",
        plan.to_add.join(", "),
        plan.to_drop.join(", ")
    );

    for column in &plan.to_add {
        store.add_column(column).await?;
    }
    for column in &plan.to_drop {
        warn!("dropping column {column}; its data is lost permanently");
        store.drop_column(column).await?;
    }
    Ok(())
}
