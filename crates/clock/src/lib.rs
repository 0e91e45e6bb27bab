//! weathervane-clock: process-wide Lamport clock and update counter.
//!
//! Every message in the fleet carries a scalar Lamport timestamp; the
//! aggregator additionally numbers every admitted PUT with a global update
//! sequence. Both scalars live behind a single mutex so that a PUT observes
//! a consistent `(lamport, seq)` pair.

use std::sync::{Arc, Mutex};

/// The two process-wide scalars, updated together under one lock.
#[derive(Debug, Default)]
struct ClockState {
    lamport: u64,
    update_count: u64,
}

/// Handle to the aggregator's Lamport clock and global update counter.
///
/// Cheap to clone; all clones share the same state. The only ways to mutate
/// the scalars are the tick/bump operations below; there is deliberately no
/// raw setter outside of [`ClockHandle::restore`], which bootstrap uses once.
#[derive(Debug, Clone, Default)]
pub struct ClockHandle {
    inner: Arc<Mutex<ClockState>>,
}

impl ClockHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the clock for a request carrying a peer Lamport value:
    /// `lamport = max(lamport, peer) + 1`. Returns the new value.
    pub fn tick_for_request(&self, peer: u64) -> u64 {
        let mut state = self.lock();
        state.lamport = state.lamport.max(peer) + 1;
        state.lamport
    }

    /// Advance the clock for an internal event (no peer value available,
    /// e.g. responding 400 to an unparseable frame). Returns the new value.
    pub fn tick_for_internal(&self) -> u64 {
        let mut state = self.lock();
        state.lamport += 1;
        state.lamport
    }

    /// Increment the global update counter and return the new value.
    /// Called exactly once per admitted PUT.
    pub fn bump_update_seq(&self) -> u64 {
        let mut state = self.lock();
        state.update_count += 1;
        state.update_count
    }

    /// One critical section for an admitted PUT: advance the clock with the
    /// peer value and bump the update counter, returning `(lamport, seq)`.
    ///
    /// The pairs handed out by this method form a total order consistent
    /// with the order in which callers entered the lock.
    pub fn tick_for_put(&self, peer: u64) -> (u64, u64) {
        let mut state = self.lock();
        state.lamport = state.lamport.max(peer) + 1;
        state.update_count += 1;
        (state.lamport, state.update_count)
    }

    /// Current Lamport value (snapshot).
    pub fn lamport(&self) -> u64 {
        self.lock().lamport
    }

    /// Current update counter (snapshot). The expiry sweep reads this to
    /// judge staleness-in-traffic.
    pub fn update_count(&self) -> u64 {
        self.lock().update_count
    }

    /// Reset both scalars to values recovered from disk. Bootstrap only.
    pub fn restore(&self, lamport: u64, update_count: u64) {
        let mut state = self.lock();
        state.lamport = lamport;
        state.update_count = update_count;
        tracing::info!(lamport, update_count, "clock restored from disk maxima");
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ClockState> {
        // A poisoned clock mutex means a panic mid-tick; the state itself is
        // two integers and always valid, so keep serving.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
