//! MySQL connection pooling.

use anyhow::{Context, Result};
use mysql_async::Pool;

/// Create the process-wide MySQL connection pool from a `mysql://` URL.
///
/// The pool is opened at process start and shared by both propagators; there
/// is no global mutable connection.
pub fn new_mysql_pool(url: &str) -> Result<Pool> {
    Pool::from_url(url).context("parsing MySQL connection URL")
}
