//! End-of-turn scheduling.
//!
//! Deferred disposal checks must run after the synchronous code of the
//! current turn has finished, but before the next external event. A
//! [`Defer`] implementation decides what "end of turn" means:
//!
//! - [`TokioDefer`] spawns the check on a current-thread tokio runtime
//!   behind a `yield_now`, so it runs once the current task yields, which
//!   is exactly the end of the turn. Elsewhere it falls back to a
//!   [`TurnQueue`].
//! - [`TurnQueue`] collects checks until [`TurnQueue::run_pending`] is
//!   called. Hosts with their own event loop call it between events; tests
//!   call it to simulate the turn ending.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tokio::runtime::{Handle, RuntimeFlavor};

use crate::config::DeferralMode;

/// A unit of deferred work.
pub type Deferred = Box<dyn FnOnce() + Send>;

/// Runs work at the end of the current turn.
pub trait Defer: Send + Sync {
    fn defer(&self, task: Deferred);
}

/// An explicit queue of end-of-turn work.
#[derive(Clone, Default)]
pub struct TurnQueue {
    tasks: Arc<Mutex<VecDeque<Deferred>>>,
}

impl TurnQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run everything queued, including work queued while running.
    /// Returns how many tasks ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = self.tasks.lock().pop_front();
            match next {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => break,
            }
        }
        if ran > 0 {
            tracing::trace!(ran, "turn queue drained");
        }
        ran
    }

    pub fn pending(&self) -> usize {
        self.tasks.lock().len()
    }
}

impl Defer for TurnQueue {
    fn defer(&self, task: Deferred) {
        self.tasks.lock().push_back(task);
    }
}

impl fmt::Debug for TurnQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TurnQueue")
            .field("pending", &self.pending())
            .finish()
    }
}

/// Spawns deferred work on a current-thread tokio runtime.
///
/// Only a current-thread runtime guarantees that a spawned check waits for
/// the deferring task to yield. On a multi-thread runtime another worker
/// could run the check while the caller is still in its turn, so the work
/// goes to a fallback [`TurnQueue`] instead, as it does when no runtime is
/// current. The fallback defaults to the process turn queue.
#[derive(Debug, Clone)]
pub struct TokioDefer {
    handle: Option<Handle>,
    fallback: TurnQueue,
}

impl TokioDefer {
    /// Use whichever runtime is current when work is deferred.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handle(handle: Handle) -> Self {
        Self {
            handle: Some(handle),
            ..Self::default()
        }
    }

    /// Queue work that cannot be spawned on `queue` instead of the process
    /// turn queue.
    pub fn with_fallback(mut self, queue: TurnQueue) -> Self {
        self.fallback = queue;
        self
    }
}

impl Default for TokioDefer {
    fn default() -> Self {
        Self {
            handle: None,
            fallback: global_queue().clone(),
        }
    }
}

impl Defer for TokioDefer {
    fn defer(&self, task: Deferred) {
        let handle = self.handle.clone().or_else(|| Handle::try_current().ok());
        match handle {
            Some(handle) if handle.runtime_flavor() == RuntimeFlavor::CurrentThread => {
                handle.spawn(async move {
                    tokio::task::yield_now().await;
                    task();
                });
            }
            Some(_) => {
                tracing::trace!("multi-thread runtime; deferring to the turn queue");
                self.fallback.defer(task);
            }
            None => {
                tracing::trace!("no async runtime; deferring to the turn queue");
                self.fallback.defer(task);
            }
        }
    }
}

/// The process turn queue.
pub fn global_queue() -> &'static TurnQueue {
    static QUEUE: OnceLock<TurnQueue> = OnceLock::new();
    QUEUE.get_or_init(TurnQueue::new)
}

/// Run every check waiting in the process turn queue.
pub fn flush_deferred() -> usize {
    global_queue().run_pending()
}

/// The scheduler for a configured mode.
pub fn scheduler_for(mode: DeferralMode) -> Arc<dyn Defer> {
    match mode {
        DeferralMode::Auto | DeferralMode::Tokio => Arc::new(TokioDefer::new()),
        DeferralMode::Queue => Arc::new(global_queue().clone()),
    }
}
