//! Timer tasks behind the periodic and debounce flush strategies.
//!
//! Both task shapes hold only a `Weak` reference to the store internals: a
//! store that is dropped without `close()` simply stops ticking instead of
//! being kept alive by its own timers.

use super::StoreInner;
use crate::core::StatePayload;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Handle to the repeating sweep task. Stopping is graceful (signal, then
/// await); dropping without `stop` aborts the task outright.
pub(crate) struct PeriodicWorker {
    stop_tx: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
}

impl PeriodicWorker {
    pub async fn stop(mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(join_handle) = self.join_handle.take() {
            let _ = join_handle.await;
        }
    }
}

impl Drop for PeriodicWorker {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(join_handle) = self.join_handle.take() {
            join_handle.abort();
        }
    }
}

/// Spawns the repeating sweep: every tick performs TTL eviction and flushes
/// all dirty entries.
pub(crate) fn spawn_periodic_worker<T, R>(
    inner: &Arc<Mutex<StoreInner<T, R>>>,
    interval_ms: u64,
    handle: &Handle,
) -> PeriodicWorker
where
    T: StatePayload,
    R: StatePayload,
{
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    let weak = Arc::downgrade(inner);
    let interval = Duration::from_millis(interval_ms.max(1));

    let join_handle = handle.spawn(async move {
        loop {
            tokio::select! {
                _ = &mut stop_rx => break,
                _ = sleep(interval) => {
                    if !sweep_once(&weak) {
                        break;
                    }
                }
            }
        }
    });

    PeriodicWorker {
        stop_tx: Some(stop_tx),
        join_handle: Some(join_handle),
    }
}

/// One periodic tick. Returns `false` when the store is gone or closed and
/// the loop should end.
fn sweep_once<T, R>(weak: &Weak<Mutex<StoreInner<T, R>>>) -> bool
where
    T: StatePayload,
    R: StatePayload,
{
    let Some(inner) = weak.upgrade() else {
        return false;
    };
    let Ok(mut guard) = inner.lock() else {
        return false;
    };
    if guard.closed {
        return false;
    }
    guard.sweep();
    true
}

/// (Re)arms the per-key debounce timer for one mutation.
///
/// The task captures the entry's mutation sequence at scheduling time; if a
/// later mutation has superseded it by the time the delay elapses, the stale
/// task does nothing and leaves the newer timer in charge.
pub(crate) fn schedule_debounce<T, R>(
    inner: &Arc<Mutex<StoreInner<T, R>>>,
    guard: &mut StoreInner<T, R>,
    key: &str,
    seq: u64,
) where
    T: StatePayload,
    R: StatePayload,
{
    let Some(delay_ms) = guard.debounce_delay_ms else {
        return;
    };
    if guard.closed {
        return;
    }
    let Some(handle) = guard.runtime.clone() else {
        return;
    };

    let weak = Arc::downgrade(inner);
    let key_owned = key.to_string();
    let task = handle.spawn(async move {
        sleep(Duration::from_millis(delay_ms)).await;
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let Ok(mut guard) = inner.lock() else {
            return;
        };
        if guard.closed {
            return;
        }
        let current = guard.cache.peek(&key_owned).map(|entry| entry.mutation_seq);
        if current == Some(seq) {
            guard.flush_key(&key_owned);
            guard.debounce_timers.remove(&key_owned);
        }
    });

    if let Some(previous) = guard.debounce_timers.insert(key.to_string(), task) {
        previous.abort();
    }
}
