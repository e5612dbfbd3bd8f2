//! Loop suppression.
//!
//! Every propagation cycle runs inside a suppress → work → resume bracket:
//! capture triggers are removed before the cycle touches either store and
//! reinstalled when it finishes, so a propagated write is never re-captured
//! and echoed back.
//!
//! One process-wide mutex spans the whole bracket. The two propagators
//! therefore never hold "capture disabled" at the same time; whichever cycle
//! fires second suspends until the first releases the lock.

use std::future::Future;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tracing::warn;

use crate::store::RelationalStore;

#[derive(Default)]
pub struct LoopSuppressor {
    lock: Mutex<()>,
}

impl LoopSuppressor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` with change capture suppressed.
    ///
    /// Capture is re-enabled on every exit path, including a failed
    /// `disable_capture`: dropping the triggers is not atomic, so a
    /// mid-sequence failure may already have removed some of them, and
    /// leaving capture partially off would silently lose mutations.
    pub async fn run<T>(
        &self,
        store: &dyn RelationalStore,
        work: impl Future<Output = Result<T>> + Send,
    ) -> Result<T> {
        let _guard = self.lock.lock().await;

        let outcome = match store
            .disable_capture()
            .await
            .context("suppressing change capture")
        {
            Ok(()) => work.await,
            Err(e) => Err(e),
        };

        if let Err(e) = store.enable_capture().await {
            warn!("failed to re-enable change capture: {e:#}");
            if outcome.is_ok() {
                return Err(e).context("resuming change capture");
            }
        }

        outcome
    }
}
