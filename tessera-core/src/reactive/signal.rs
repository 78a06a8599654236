//! Signal Implementation
//!
//! A Signal is the fundamental mutable reactive cell. It holds a value and
//! tells its dependents when that value changes.
//!
//! # How Signals Work
//!
//! 1. When a signal is read while a dispatcher is listening (inside a computed
//!    derivation, for example), the read is reported so the reader can
//!    subscribe to invalidations.
//!
//! 2. When a new value is written, it is compared with a copy of the old one
//!    under the signal's [`Equality`]. Equal writes are dropped silently.
//!
//! 3. Otherwise the value is stored, dependents are invalidated and user
//!    subscribers run synchronously in subscription order.
//!
//! # Thread Safety
//!
//! The value sits behind a `parking_lot::RwLock` and subscriber maps behind
//! mutexes. Writers are serialized by a separate lock; no value or
//! subscriber lock is held while comparators or callbacks run.

use std::fmt::{self, Debug};
use std::sync::{Arc, Weak};

use parking_lot::{ReentrantMutex, RwLock};

use super::dispatcher;
use super::equality::{Equality, Identity};
use super::runtime::Runtime;
use super::source::{Listener, Readable, SignalCore, SignalId, Source};
use super::subscriber::{SubscriberId, Subscription};
use crate::error::Result;

/// Construction options shared by [`Signal`] and
/// [`Computed`](super::Computed).
pub struct SignalOptions<T> {
    pub(crate) name: Option<String>,
    pub(crate) equality: Equality<T>,
}

impl<T: 'static> SignalOptions<T> {
    /// Options for a type without `PartialEq`.
    pub fn with_equality(equality: Equality<T>) -> Self {
        Self {
            name: None,
            equality,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn equality(mut self, equality: Equality<T>) -> Self {
        self.equality = equality;
        self
    }
}

impl<T: PartialEq + 'static> Default for SignalOptions<T> {
    fn default() -> Self {
        Self::with_equality(Equality::deep())
    }
}

struct SignalInner<T> {
    core: SignalCore<T>,
    value: RwLock<T>,
    /// Serializes compare-and-store across writers. The value lock is only
    /// held to copy or store, so a comparator may read the signal.
    write: ReentrantMutex<()>,
    initial: T,
    equality: Equality<T>,
}

/// A mutable reactive signal holding a value of type T.
///
/// # Example
///
/// ```rust,ignore
/// let count = Signal::new(0);
///
/// let _sub = count.on(|v| println!("count = {v}"))?;
/// count.set(5)?;          // prints "count = 5"
/// count.set(5)?;          // equal, nothing happens
/// count.update(|v| v + 1)?;
/// ```
pub struct Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<SignalInner<T>>,
}

impl<T> Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a signal compared with `PartialEq`.
    pub fn new(value: T) -> Self
    where
        T: PartialEq,
    {
        Self::with_options(value, SignalOptions::default())
    }

    pub fn with_options(value: T, options: SignalOptions<T>) -> Self {
        let signal = Self {
            inner: Arc::new(SignalInner {
                core: SignalCore::new(options.name),
                value: RwLock::new(value.clone()),
                write: ReentrantMutex::new(()),
                initial: value,
                equality: options.equality,
            }),
        };
        dispatcher::report_created(&signal.as_source());
        signal
    }

    pub fn id(&self) -> SignalId {
        self.inner.core.id()
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.core.name()
    }

    /// Read the value, reporting the read to the current dispatcher.
    pub fn get(&self) -> Result<T> {
        self.inner.core.ensure_live()?;
        dispatcher::report_read(|| self.as_source());
        Ok(self.peek())
    }

    /// Read the value without tracking.
    pub fn peek(&self) -> T {
        self.inner.value.read().clone()
    }

    /// Store `value` if it differs from the current one.
    pub fn set(&self, value: T) -> Result<()> {
        self.inner.core.ensure_live()?;

        let changed = {
            let _write = self.inner.write.lock();
            let old = self.peek();
            if self.inner.equality.eq(&old, &value) {
                false
            } else {
                *self.inner.value.write() = value;
                true
            }
        };

        if !changed {
            tracing::trace!(signal = %self.inner.core.label(), "write suppressed by equality");
            return Ok(());
        }

        let version = self.inner.core.bump();
        tracing::trace!(signal = %self.inner.core.label(), version, "signal changed");

        let current = self.peek();
        Runtime::batch(|| {
            self.inner.core.invalidate_dependents();
            self.inner.core.notify(&current);
        });
        Ok(())
    }

    /// Derive the next value from the current one.
    pub fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&T) -> T,
    {
        let next = {
            let guard = self.inner.value.read();
            f(&guard)
        };
        self.set(next)
    }

    /// Return to the initial value, through the same equality gate as `set`.
    pub fn reset(&self) -> Result<()> {
        self.set(self.inner.initial.clone())
    }

    /// Call `callback` with every new value.
    pub fn on<F>(&self, callback: F) -> Result<Subscription>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.inner.core.ensure_live()?;
        let id = self.inner.core.subscribe(Arc::new(callback));
        let weak: Weak<SignalInner<T>> = Arc::downgrade(&self.inner);
        Ok(Subscription::new(id, move || {
            if let Some(inner) = weak.upgrade() {
                inner.core.unsubscribe(id);
            }
        }))
    }

    /// Drop all subscribers and refuse further writes. Idempotent.
    pub fn dispose(&self) {
        Source::dispose(&*self.inner);
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.core.is_disposed()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.core.subscriber_count()
    }

    pub fn version(&self) -> u64 {
        self.inner.core.version()
    }

    /// Type-erased handle for the graph.
    pub fn as_source(&self) -> Arc<dyn Source> {
        self.inner.clone()
    }
}

impl<T> Source for SignalInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn id(&self) -> SignalId {
        self.core.id()
    }

    fn label(&self) -> String {
        self.core.label()
    }

    fn version(&self) -> u64 {
        self.core.version()
    }

    fn refresh(&self) {}

    fn add_listener(&self, listener: Listener) -> Result<SubscriberId> {
        self.core.add_listener(listener)
    }

    fn remove_listener(&self, id: SubscriberId) {
        self.core.remove_listener(id);
    }

    fn dispose(&self) {
        if self.core.mark_disposed() {
            tracing::trace!(signal = %self.core.label(), "signal disposed");
        }
    }

    fn is_disposed(&self) -> bool {
        self.core.is_disposed()
    }
}

impl<T> Readable for Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Value = T;

    fn read(&self) -> Result<T> {
        self.get()
    }

    fn source(&self) -> Arc<dyn Source> {
        self.as_source()
    }
}

impl<T> Clone for Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Identity for Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Debug for Signal<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("value", &self.peek())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::OnceLock;

    #[test]
    fn signal_get_and_set() {
        let signal = Signal::new(0);
        assert_eq!(signal.get().unwrap(), 0);

        signal.set(42).unwrap();
        assert_eq!(signal.get().unwrap(), 42);
    }

    #[test]
    fn signal_update() {
        let signal = Signal::new(10);
        signal.update(|v| v + 5).unwrap();
        assert_eq!(signal.peek(), 15);
    }

    #[test]
    fn signal_notifies_subscribers_in_order() {
        let signal = Signal::new(0);
        let log = Arc::new(Mutex::new(Vec::new()));

        let first = log.clone();
        let _a = signal.on(move |v| first.lock().push(("a", *v))).unwrap();
        let second = log.clone();
        let _b = signal.on(move |v| second.lock().push(("b", *v))).unwrap();

        signal.set(1).unwrap();
        signal.set(2).unwrap();

        assert_eq!(*log.lock(), vec![("a", 1), ("b", 1), ("a", 2), ("b", 2)]);
    }

    #[test]
    fn equal_writes_do_not_notify() {
        let signal = Signal::new(7);
        let calls = Arc::new(AtomicI32::new(0));
        let counter = calls.clone();
        let _sub = signal
            .on(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        signal.set(7).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(signal.version(), 0);

        signal.set(8).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn custom_equality_gates_writes() {
        let options = SignalOptions::default()
            .name("parity")
            .equality(Equality::custom(|a: &i32, b: &i32| a % 2 == b % 2));
        let signal = Signal::with_options(1, options);

        signal.set(3).unwrap();
        assert_eq!(signal.peek(), 1);
        signal.set(4).unwrap();
        assert_eq!(signal.peek(), 4);
        assert_eq!(signal.name(), Some("parity"));
    }

    #[test]
    fn reset_restores_initial_value() {
        let signal = Signal::new("idle".to_string());
        signal.set("busy".to_string()).unwrap();
        signal.reset().unwrap();
        assert_eq!(signal.peek(), "idle");
    }

    #[test]
    fn signal_unsubscribe() {
        let signal = Signal::new(0);
        let calls = Arc::new(AtomicI32::new(0));
        let counter = calls.clone();

        let subscription = signal
            .on(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        signal.set(1).unwrap();
        subscription.unsubscribe();
        signal.set(2).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(signal.subscriber_count(), 0);
    }

    #[test]
    fn disposed_signal_rejects_use() {
        let signal = Signal::new(1);
        let _sub = signal.on(|_| {}).unwrap();

        signal.dispose();
        signal.dispose();

        assert!(signal.is_disposed());
        assert_eq!(signal.subscriber_count(), 0);
        assert!(matches!(signal.set(2), Err(Error::Disposed { .. })));
        assert!(matches!(signal.get(), Err(Error::Disposed { .. })));
        assert!(signal.on(|_| {}).is_err());
        assert_eq!(signal.peek(), 1);
    }

    #[test]
    fn signal_clone_shares_state() {
        let signal1 = Signal::new(0);
        let signal2 = signal1.clone();

        signal1.set(42).unwrap();
        assert_eq!(signal2.peek(), 42);
        assert!(signal1.same(&signal2));
    }

    #[test]
    fn signal_ids_are_unique() {
        let s1 = Signal::new(0);
        let s2 = Signal::new(0);
        assert_ne!(s1.id(), s2.id());
    }

    fn count_notifications<T>(signal: &Signal<T>) -> (Arc<AtomicI32>, Subscription)
    where
        T: Clone + Send + Sync + 'static,
    {
        let calls = Arc::new(AtomicI32::new(0));
        let counter = calls.clone();
        let subscription = signal
            .on(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        (calls, subscription)
    }

    #[test]
    fn reference_equality_compares_handles() {
        let rows = Arc::new(vec![1, 2, 3]);
        let signal = Signal::with_options(
            rows.clone(),
            SignalOptions::with_equality(Equality::reference()),
        );
        let (calls, _sub) = count_notifications(&signal);

        signal.set(rows.clone()).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(signal.version(), 0);

        // Equal contents behind a new handle still count as a change.
        signal.set(Arc::new(vec![1, 2, 3])).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!Arc::ptr_eq(&signal.peek(), &rows));
    }

    #[test]
    fn shallow_equality_compares_elements_by_handle() {
        let a = Arc::new("a".to_string());
        let b = Arc::new("b".to_string());
        let signal = Signal::with_options(
            vec![a.clone(), b.clone()],
            SignalOptions::with_equality(Equality::shallow()),
        );
        let (calls, _sub) = count_notifications(&signal);

        signal.set(vec![a.clone(), b.clone()]).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        signal.set(vec![a.clone(), Arc::new("b".to_string())]).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        signal.set(vec![a.clone()]).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn comparator_may_read_the_signal() {
        let slot: Arc<OnceLock<Signal<i32>>> = Arc::new(OnceLock::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let lookup = slot.clone();
        let log = seen.clone();
        let equality = Equality::custom(move |old: &i32, new: &i32| {
            if let Some(signal) = lookup.get() {
                log.lock().push(signal.peek());
            }
            old == new
        });
        let signal = Signal::with_options(1, SignalOptions::with_equality(equality));
        assert!(slot.set(signal.clone()).is_ok());

        signal.set(2).unwrap();
        signal.set(2).unwrap();

        assert_eq!(signal.peek(), 2);
        assert_eq!(*seen.lock(), vec![1, 2]);
    }
}
