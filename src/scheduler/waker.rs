//! A small per-simulator wake map: every scheduler task calls
//! [`WakerMap::wait_until_past`] to block until some other simulator's
//! progress crosses a time it depends on, and [`WakerMap::notify_all`]
//! after committing its own step.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

use crate::ids::SimulatorId;
use crate::remote::SharedWorld;
use crate::time::T;

pub struct WakerMap {
    notifies: BTreeMap<SimulatorId, Notify>,
}

impl WakerMap {
    pub fn new(ids: impl Iterator<Item = SimulatorId>) -> Self {
        Self {
            notifies: ids.map(|id| (id, Notify::new())).collect(),
        }
    }

    pub fn notify_all(&self) {
        for n in self.notifies.values() {
            n.notify_waiters();
        }
    }

    /// Blocks until `sim`'s progress (as tracked in `world`) exceeds `t`, or
    /// `shutdown` is signalled — a run-wide abort must not leave a task
    /// stuck waiting on a predecessor that will never advance again.
    pub async fn wait_until_past(
        &self,
        world: &SharedWorld,
        sim: &SimulatorId,
        t: T,
        shutdown: &AtomicBool,
    ) {
        loop {
            if world.progress_of(sim) > t || shutdown.load(Ordering::Acquire) {
                return;
            }
            match self.notifies.get(sim) {
                Some(notify) => notify.notified().await,
                // Unknown simulator: nothing to wait on, avoid looping forever.
                None => return,
            }
        }
    }

    /// Blocks until `sim`'s progress reaches at least `t` — one tick looser
    /// than [`Self::wait_until_past`], for a time-shifted predecessor: it
    /// must satisfy `next_time(P) > t - 1`, i.e. `progress_of(P) >= t`.
    /// Phrased as `>= t` rather than subtracting 1 from `t` since `t` may be
    /// zero. Also returns once `shutdown` is signalled, same reasoning as
    /// [`Self::wait_until_past`].
    pub async fn wait_until_at_least(
        &self,
        world: &SharedWorld,
        sim: &SimulatorId,
        t: T,
        shutdown: &AtomicBool,
    ) {
        loop {
            if world.progress_of(sim) >= t || shutdown.load(Ordering::Acquire) {
                return;
            }
            match self.notifies.get(sim) {
                Some(notify) => notify.notified().await,
                None => return,
            }
        }
    }

    /// Waits for one "something changed" signal on `sim`'s channel.
    /// `notify_all` fires every channel on every simulator's progress
    /// update, so this is really "wait for any progress change" — the
    /// caller re-checks its own condition after waking. Returns immediately
    /// if `shutdown` is already signalled.
    pub async fn wait_for_signal(&self, sim: &SimulatorId, shutdown: &AtomicBool) {
        if shutdown.load(Ordering::Acquire) {
            return;
        }
        if let Some(notify) = self.notifies.get(sim) {
            notify.notified().await;
        }
    }
}
