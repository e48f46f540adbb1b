//! Fixed-interval snapshot loop for running without an external scheduler.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;

use crate::devices::Selector;
use crate::service::SnapshotService;

/// Snapshot every device each `interval` until `shutdown` fires.
///
/// The first snapshot is taken immediately. Failed cycles are logged and
/// the next tick proceeds as normal. Returns the number of cycles run.
pub async fn run(
    service: Arc<SnapshotService>,
    interval: Duration,
    mut shutdown: oneshot::Receiver<()>,
) -> u64 {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::info!("Polling every {:?}", interval);

    let mut cycles = 0;
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Poll loop stopping after {} cycles", cycles);
                return cycles;
            }
            _ = ticker.tick() => {
                cycles += 1;
                match service.snapshot(&Selector::All).await {
                    Ok(report) => {
                        if let Err(e) = report.into_result() {
                            tracing::error!("Poll cycle {} failed: ERROR: {} {}", cycles, e.kind(), e);
                        }
                    }
                    Err(e) => {
                        tracing::error!("Poll cycle {} failed: ERROR: {} {}", cycles, e.kind(), e);
                    }
                }
            }
        }
    }
}
