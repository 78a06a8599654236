//! Reactive Runtime
//!
//! The runtime coordinates update propagation once a signal changes.
//!
//! # How It Works
//!
//! 1. A mutable signal stores its new value and bumps its version.
//!
//! 2. It walks its invalidation listeners. Each dependent computed signal
//!    marks itself stale and forwards the invalidation to its own dependents.
//!    Nothing is recomputed during this walk.
//!
//! 3. Computed signals with user subscribers cannot wait for someone to read
//!    them, so they enqueue themselves for an eager refresh.
//!
//! 4. When the outermost batch exits, the queue is drained. Each refresh is a
//!    normal pull: recompute if a source version moved, compare under the
//!    equality policy, notify only on change.
//!
//! Because refreshes run only after the whole invalidation walk finished, no
//! derivation ever sees a half-updated set of dependencies.
//!
//! # Thread Safety
//!
//! Batching state is thread-local. Propagation runs synchronously on the
//! thread that performed the write.

use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use super::source::{SignalId, Source};

#[derive(Default)]
struct BatchState {
    depth: usize,
    flushing: bool,
    pending: VecDeque<Arc<dyn Source>>,
    queued: HashSet<SignalId>,
}

thread_local! {
    static BATCH: RefCell<BatchState> = RefCell::new(BatchState::default());
}

/// The propagation coordinator.
pub struct Runtime;

/// Leaves the batch when dropped, flushing if it was the outermost one.
struct BatchGuard;

impl BatchGuard {
    fn enter() -> Self {
        BATCH.with(|state| state.borrow_mut().depth += 1);
        BatchGuard
    }
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        let outermost = BATCH.with(|state| {
            let mut state = state.borrow_mut();
            state.depth -= 1;
            state.depth == 0
        });
        if outermost && !std::thread::panicking() {
            Runtime::flush();
        }
    }
}

/// Clears the flushing flag when dropped, including when a refresh or a
/// subscriber panics. Refreshes still queued are kept for the next flush.
struct FlushGuard;

impl Drop for FlushGuard {
    fn drop(&mut self) {
        BATCH.with(|state| state.borrow_mut().flushing = false);
    }
}

impl Runtime {
    /// Run `f` and defer eager refreshes until it returns.
    ///
    /// Batches nest; only the outermost one flushes.
    pub fn batch<R>(f: impl FnOnce() -> R) -> R {
        let _guard = BatchGuard::enter();
        f()
    }

    /// Whether a batch is open on this thread.
    pub fn is_batching() -> bool {
        BATCH.with(|state| state.borrow().depth > 0)
    }

    /// Queue an observed computed signal for refresh.
    pub(crate) fn schedule_refresh(source: Arc<dyn Source>) {
        let idle = BATCH.with(|state| {
            let mut state = state.borrow_mut();
            if state.queued.insert(source.id()) {
                state.pending.push_back(source);
            }
            state.depth == 0
        });
        if idle {
            Self::flush();
        }
    }

    /// Number of refreshes waiting for the current batch to close.
    pub fn pending_refreshes() -> usize {
        BATCH.with(|state| state.borrow().pending.len())
    }

    fn flush() {
        let already = BATCH.with(|state| {
            let mut state = state.borrow_mut();
            std::mem::replace(&mut state.flushing, true)
        });
        if already {
            return;
        }
        let _guard = FlushGuard;

        loop {
            let next = BATCH.with(|state| {
                let mut state = state.borrow_mut();
                let next = state.pending.pop_front();
                if let Some(source) = &next {
                    state.queued.remove(&source.id());
                }
                next
            });
            match next {
                Some(source) => {
                    tracing::trace!(signal = %source.label(), "eager refresh");
                    source.refresh();
                }
                None => break,
            }
        }
    }
}

/// Run `f` as a single batch. See [`Runtime::batch`].
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    Runtime::batch(f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::reactive::source::Listener;
    use crate::reactive::SubscriberId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockSource {
        id: SignalId,
        refreshed: AtomicUsize,
    }

    impl MockSource {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                id: SignalId::next(),
                refreshed: AtomicUsize::new(0),
            })
        }
    }

    impl Source for MockSource {
        fn id(&self) -> SignalId {
            self.id
        }

        fn label(&self) -> String {
            self.id.to_string()
        }

        fn version(&self) -> u64 {
            0
        }

        fn refresh(&self) {
            self.refreshed.fetch_add(1, Ordering::SeqCst);
        }

        fn add_listener(&self, _listener: Listener) -> Result<SubscriberId> {
            Ok(SubscriberId::new())
        }

        fn remove_listener(&self, _id: SubscriberId) {}

        fn dispose(&self) {}

        fn is_disposed(&self) -> bool {
            false
        }
    }

    #[test]
    fn refresh_runs_immediately_outside_batch() {
        let source = MockSource::new();
        Runtime::schedule_refresh(source.clone());
        assert_eq!(source.refreshed.load(Ordering::SeqCst), 1);
        assert_eq!(Runtime::pending_refreshes(), 0);
    }

    #[test]
    fn batch_defers_and_dedupes_refreshes() {
        let source = MockSource::new();

        batch(|| {
            Runtime::schedule_refresh(source.clone());
            Runtime::schedule_refresh(source.clone());
            assert!(Runtime::is_batching());
            assert_eq!(source.refreshed.load(Ordering::SeqCst), 0);
            assert_eq!(Runtime::pending_refreshes(), 1);
        });

        assert_eq!(source.refreshed.load(Ordering::SeqCst), 1);
        assert!(!Runtime::is_batching());
    }

    #[test]
    fn nested_batches_flush_once_at_the_outermost_exit() {
        let source = MockSource::new();

        batch(|| {
            batch(|| Runtime::schedule_refresh(source.clone()));
            assert_eq!(source.refreshed.load(Ordering::SeqCst), 0);
        });

        assert_eq!(source.refreshed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_refresh_does_not_stall_later_flushes() {
        struct Exploding {
            id: SignalId,
        }

        impl Source for Exploding {
            fn id(&self) -> SignalId {
                self.id
            }

            fn label(&self) -> String {
                self.id.to_string()
            }

            fn version(&self) -> u64 {
                0
            }

            fn refresh(&self) {
                panic!("subscriber failed");
            }

            fn add_listener(&self, _listener: Listener) -> Result<SubscriberId> {
                Ok(SubscriberId::new())
            }

            fn remove_listener(&self, _id: SubscriberId) {}

            fn dispose(&self) {}

            fn is_disposed(&self) -> bool {
                false
            }
        }

        let exploding: Arc<dyn Source> = Arc::new(Exploding { id: SignalId::next() });
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            Runtime::schedule_refresh(exploding)
        }));
        assert!(outcome.is_err());

        let healthy = MockSource::new();
        Runtime::schedule_refresh(healthy.clone());
        assert_eq!(healthy.refreshed.load(Ordering::SeqCst), 1);
        assert_eq!(Runtime::pending_refreshes(), 0);
    }
}
