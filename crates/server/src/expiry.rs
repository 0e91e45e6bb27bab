//! Periodic expiry sweep.
//!
//! Every sweep walks the store and removes records whose age or
//! staleness-in-traffic crossed the configured thresholds. The sweep runs
//! on its own task and never blocks the acceptor; a slow walk only delays
//! the next tick.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use weathervane_clock::ClockHandle;
use weathervane_store::{now_epoch_ms, ExpiryPolicy, RecordStore};

/// Spawn the sweep task ticking every `interval`.
pub fn spawn_sweep(
    store: Arc<RecordStore>,
    clock: ClockHandle,
    policy: ExpiryPolicy,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it so the sweep
        // starts one full interval after startup.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let removed = sweep_once(&store, &clock, &policy).await;
            if removed > 0 {
                tracing::info!(removed, "expiry sweep removed records");
            }
        }
    })
}

/// Walk the store once, removing every expired record. Returns how many
/// were removed.
pub async fn sweep_once(store: &RecordStore, clock: &ClockHandle, policy: &ExpiryPolicy) -> usize {
    let now = now_epoch_ms();
    let current_seq = clock.update_count();
    let mut removed = 0;

    for (id, record) in store.snapshot().await {
        if store
            .remove_if_expired(&id, &record, now, current_seq, policy)
            .await
        {
            weathervane_metrics::metrics().records_expired.inc();
            tracing::info!(station = %id, "removed expired record");
            removed += 1;
        }
    }
    removed
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
