//! Periodic job scheduling.
//!
//! Each propagator gets its own loop: a tick runs the cycle to completion
//! before the next tick is taken, so a slow cycle can never overlap itself.
//! Missed ticks are delayed rather than bursted.

use std::future::Future;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::error;

/// Drive `cycle` every `period`, forever. Cycle failures are logged and the
/// next tick retries; nothing escalates to process termination.
pub async fn run_periodic<F, Fut>(name: &str, period: Duration, mut cycle: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(e) = cycle().await {
            error!("{name} cycle failed: {e:#}");
        }
    }
}
