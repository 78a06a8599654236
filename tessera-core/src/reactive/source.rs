//! Type-erased view of a signal.
//!
//! The dependency graph never needs to know what a node holds, only how to
//! ask whether it changed. [`Source`] is that view: a version counter that
//! moves whenever the value changes under the node's equality policy, a way
//! to bring a lazy node up to date, and a list of invalidation listeners.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::subscriber::SubscriberId;
use crate::error::{Error, Result};

/// Unique identifier for a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SignalId(u64);

impl SignalId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Invalidation callback attached by a dependent.
pub type Listener = Arc<dyn Fn() + Send + Sync>;

pub(crate) type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// A node of the signal graph, independent of its value type.
pub trait Source: Send + Sync {
    fn id(&self) -> SignalId;

    /// Display name, or the id when the signal is anonymous.
    fn label(&self) -> String;

    /// Moves every time the value changes.
    fn version(&self) -> u64;

    /// Bring a stale node up to date. A no-op for mutable signals.
    fn refresh(&self);

    fn add_listener(&self, listener: Listener) -> Result<SubscriberId>;

    fn remove_listener(&self, id: SubscriberId);

    fn dispose(&self);

    fn is_disposed(&self) -> bool;
}

/// Anything that can be read as a value of the graph.
///
/// Implemented by [`Signal`](super::Signal) and
/// [`Computed`](super::Computed); used to declare explicit dependencies.
pub trait Readable: Clone + Send + Sync + 'static {
    type Value: Clone + Send + Sync + 'static;

    /// Tracked read.
    fn read(&self) -> Result<Self::Value>;

    fn source(&self) -> Arc<dyn Source>;
}

/// Bookkeeping shared by mutable and computed signals.
pub(crate) struct SignalCore<T> {
    id: SignalId,
    name: Option<String>,
    version: AtomicU64,
    disposed: AtomicBool,
    subscribers: Mutex<IndexMap<SubscriberId, Callback<T>>>,
    listeners: Mutex<IndexMap<SubscriberId, Listener>>,
}

impl<T> SignalCore<T> {
    pub(crate) fn new(name: Option<String>) -> Self {
        Self {
            id: SignalId::next(),
            name,
            version: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
            subscribers: Mutex::new(IndexMap::new()),
            listeners: Mutex::new(IndexMap::new()),
        }
    }

    pub(crate) fn id(&self) -> SignalId {
        self.id
    }

    pub(crate) fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.id.to_string(),
        }
    }

    pub(crate) fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub(crate) fn bump(&self) -> u64 {
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::Disposed {
                signal: self.label(),
            });
        }
        Ok(())
    }

    /// Flip the disposed flag. Returns false if it was already set.
    pub(crate) fn mark_disposed(&self) -> bool {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.subscribers.lock().clear();
        self.listeners.lock().clear();
        true
    }

    pub(crate) fn subscribe(&self, callback: Callback<T>) -> SubscriberId {
        let id = SubscriberId::new();
        self.subscribers.lock().insert(id, callback);
        id
    }

    pub(crate) fn unsubscribe(&self, id: SubscriberId) {
        self.subscribers.lock().shift_remove(&id);
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub(crate) fn has_subscribers(&self) -> bool {
        !self.subscribers.lock().is_empty()
    }

    pub(crate) fn add_listener(&self, listener: Listener) -> Result<SubscriberId> {
        self.ensure_live()?;
        let id = SubscriberId::new();
        self.listeners.lock().insert(id, listener);
        Ok(id)
    }

    pub(crate) fn remove_listener(&self, id: SubscriberId) {
        self.listeners.lock().shift_remove(&id);
    }

    /// Run user callbacks in subscription order.
    ///
    /// The list is snapshotted first so a callback may subscribe or
    /// unsubscribe without deadlocking.
    pub(crate) fn notify(&self, value: &T) {
        let callbacks: Vec<Callback<T>> = self.subscribers.lock().values().cloned().collect();
        for callback in callbacks {
            callback(value);
        }
    }

    /// Tell dependents their cached values may be stale.
    pub(crate) fn invalidate_dependents(&self) {
        let listeners: Vec<Listener> = self.listeners.lock().values().cloned().collect();
        for listener in listeners {
            listener();
        }
    }
}

impl<T> fmt::Debug for SignalCore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalCore")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("version", &self.version())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
