//! C3: pending registry. Tracks outstanding fetches and scheduled refresh timers, and is
//! the single source of truth for "is it safe to close the stream yet" (invariant 5/6).

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

pub type TimerId = u64;

/// Whether the registry will still accept new timers. `schedule` becomes a no-op once the
/// controller has moved past `Reading` (SPEC_FULL.md §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptState {
    Accepting,
    Closed,
}

struct Inner {
    inflight: AtomicU64,
    timers: Mutex<HashMap<TimerId, CancellationToken>>,
    next_timer_id: AtomicU64,
}

/// Shared handle to the pending registry; cheap to clone, safe to use from any spawned task.
#[derive(Clone)]
pub struct PendingRegistry {
    inner: Arc<Inner>,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                inflight: AtomicU64::new(0),
                timers: Mutex::new(HashMap::new()),
                next_timer_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn incr(&self) {
        self.inner.inflight.fetch_add(1, Ordering::SeqCst);
    }

    pub fn decr(&self) {
        self.inner.inflight.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn inflight(&self) -> u64 {
        self.inner.inflight.load(Ordering::SeqCst)
    }

    pub fn has_pending_timers(&self) -> bool {
        !self.inner.timers.lock().unwrap().is_empty()
    }

    /// Invariant 6: the engine may close iff the controller signals `ended` (checked by the
    /// caller) and both of these are empty.
    pub fn is_quiescent(&self) -> bool {
        self.inflight() == 0 && !self.has_pending_timers()
    }

    /// Schedules `action` to run after `delay`, returning `None` (a no-op) if `accept` is
    /// `Closed`. On firing, the timer removes itself, runs `action`, then sends `on_fire` so
    /// the controller can re-check whether it is time to close.
    pub fn schedule<F, Fut>(
        &self,
        accept: AcceptState,
        delay: Duration,
        action: F,
        on_fire: mpsc::UnboundedSender<()>,
    ) -> Option<TimerId>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if accept == AcceptState::Closed {
            return None;
        }
        let id = self.inner.next_timer_id.fetch_add(1, Ordering::SeqCst);
        let token = CancellationToken::new();
        self.inner.timers.lock().unwrap().insert(id, token.clone());

        let registry = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    trace!(timer = id, "timer cancelled before firing");
                }
                _ = tokio::time::sleep(delay) => {
                    registry.inner.timers.lock().unwrap().remove(&id);
                    action().await;
                    let _ = on_fire.send(());
                }
            }
        });

        Some(id)
    }

    pub fn cancel_all(&self) {
        let mut timers = self.inner.timers.lock().unwrap();
        for (_, token) in timers.drain() {
            token.cancel();
        }
    }
}

impl Default for PendingRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn incr_decr_tracks_inflight() {
        let registry = PendingRegistry::new();
        assert_eq!(registry.inflight(), 0);
        registry.incr();
        registry.incr();
        assert_eq!(registry.inflight(), 2);
        registry.decr();
        assert_eq!(registry.inflight(), 1);
    }

    #[tokio::test]
    async fn schedule_is_noop_when_closed() {
        let registry = PendingRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = registry.schedule(
            AcceptState::Closed,
            Duration::from_millis(1),
            || async {},
            tx,
        );
        assert!(id.is_none());
        assert!(!registry.has_pending_timers());
    }

    #[tokio::test]
    async fn schedule_fires_and_clears_pending_set() {
        let registry = PendingRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let fired = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let fired_clone = fired.clone();
        let id = registry.schedule(
            AcceptState::Accepting,
            Duration::from_millis(5),
            move || async move {
                fired_clone.store(true, Ordering::SeqCst);
            },
            tx,
        );
        assert!(id.is_some());
        assert!(registry.has_pending_timers());
        rx.recv().await.unwrap();
        assert!(fired.load(Ordering::SeqCst));
        assert!(!registry.has_pending_timers());
    }

    #[tokio::test]
    async fn cancel_all_prevents_action_from_running() {
        let registry = PendingRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let fired = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let fired_clone = fired.clone();
        registry.schedule(
            AcceptState::Accepting,
            Duration::from_millis(50),
            move || async move {
                fired_clone.store(true, Ordering::SeqCst);
            },
            tx,
        );
        registry.cancel_all();
        assert!(!registry.has_pending_timers());
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!fired.load(Ordering::SeqCst));
        assert!(rx.try_recv().is_err());
    }
}
