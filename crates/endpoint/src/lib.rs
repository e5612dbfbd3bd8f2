//! Abstract tabular data endpoint for sheet-sync.
//!
//! The synchronizer talks to the spreadsheet side exclusively through the
//! [`TabularEndpoint`] trait: read a range, overwrite a range, append rows.
//! Ranges use A1 notation (`Sheet1!A2:C2`, `Sheet1!A:C`, `Sheet1!1:1`).
//!
//! Two backends are provided:
//! - [`RestEndpoint`] — a thin client for a Google-Sheets-style `values.*`
//!   REST API, authenticated with a caller-supplied bearer token.
//! - [`MemorySheet`] — an in-memory grid used by tests and local runs.

use async_trait::async_trait;
use thiserror::Error;

pub mod a1;
mod memory;
mod rest;

pub use memory::MemorySheet;
pub use rest::RestEndpoint;

/// Error raised by a tabular endpoint backend.
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("endpoint read failed: {0}")]
    Read(String),
    #[error("endpoint write failed: {0}")]
    Write(String),
    #[error("invalid range: {0}")]
    InvalidRange(String),
}

/// A spreadsheet-like tabular data endpoint.
///
/// Cell values are plain text in both directions. `values_get` may return
/// ragged rows (trailing blank cells omitted); callers coerce missing cells
/// to empty strings.
#[async_trait]
pub trait TabularEndpoint: Send + Sync {
    /// Read all cell values covered by `range`.
    async fn values_get(&self, range: &str) -> Result<Vec<Vec<String>>, EndpointError>;

    /// Overwrite the cells of `range` with `values` (row-major).
    async fn values_update(
        &self,
        range: &str,
        values: Vec<Vec<String>>,
    ) -> Result<(), EndpointError>;

    /// Append `values` as new rows after the last populated row of the sheet
    /// containing `range`.
    async fn values_append(
        &self,
        range: &str,
        values: Vec<Vec<String>>,
    ) -> Result<(), EndpointError>;
}
