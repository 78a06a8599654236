//! Computed Implementation
//!
//! A Computed is a cached derived value that re-evaluates only when its
//! dependencies change.
//!
//! # How Computeds Work
//!
//! 1. On first access, the derivation runs and its result is cached.
//!
//! 2. When a dependency changes, the computed is marked stale (`MaybeDirty`)
//!    and forwards the invalidation to its own dependents. It does not
//!    recompute.
//!
//! 3. On next access, each recorded dependency is brought up to date and its
//!    version compared with the version seen during the last run. Only if a
//!    version moved does the derivation run again.
//!
//! 4. The new result is compared with the old one under the equality policy.
//!    Subscribers are notified only if it changed.
//!
//! A computed that nobody reads is never recomputed. A computed with `on`
//! subscribers cannot wait to be read, so it asks the runtime for an eager
//! refresh once the current batch of writes has settled.
//!
//! # Errors
//!
//! A derivation that fails leaves the computed in an error state. `get`
//! returns the same error on every read until a later run succeeds;
//! [`Computed::try_get`] and [`Computed::error`] expose the state without
//! failing. A fallback can turn an error into a substitute value.

use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::future::Future;
use std::rc::Rc;
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use indexmap::IndexMap;
use parking_lot::{Mutex, ReentrantMutex};
use smallvec::SmallVec;

use super::abort::AbortSignal;
use super::dispatcher::{self, Dispatcher, Loadable};
use super::equality::{Equality, Identity};
use super::runtime::Runtime;
use super::source::{Listener, Readable, SignalCore, SignalId, Source};
use super::subscriber::{SubscriberId, Subscription};
use crate::error::{Error, Result};
use crate::task::Task;

type Derive<T> = Box<dyn Fn(&AbortSignal) -> Result<T> + Send + Sync>;
type Fallback<T> = Arc<dyn Fn(&Error) -> Option<T> + Send + Sync>;

/// Staleness of a computed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    /// The cached value is up-to-date.
    Clean,

    /// A dependency might have changed. Versions are checked on next read.
    MaybeDirty,

    /// The computed definitely needs to recompute.
    Dirty,
}

/// Options for [`Computed`].
pub struct ComputedOptions<T> {
    name: Option<String>,
    equality: Equality<T>,
    fallback: Option<Fallback<T>>,
}

impl<T: 'static> ComputedOptions<T> {
    pub fn with_equality(equality: Equality<T>) -> Self {
        Self {
            name: None,
            equality,
            fallback: None,
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

    /// Convert a failed derivation into a value. Returning `None` keeps the
    /// error.
    pub fn fallback<F>(mut self, fallback: F) -> Self
    where
        F: Fn(&Error) -> Option<T> + Send + Sync + 'static,
    {
        self.fallback = Some(Arc::new(fallback));
        self
    }
}

impl<T: PartialEq + 'static> Default for ComputedOptions<T> {
    fn default() -> Self {
        Self::with_equality(Equality::deep())
    }
}

/// How a computed learns its dependencies.
enum Tracking {
    /// Whatever the derivation reads.
    Auto,
    /// A fixed list declared up front.
    Fixed(Vec<Arc<dyn Source>>),
}

/// A recorded dependency: the version seen and our listener on it.
struct Edge {
    source: Arc<dyn Source>,
    version: u64,
    listener: SubscriberId,
}

struct ComputedState<T> {
    value: Option<Result<T>>,
    staleness: Staleness,
    paused: bool,
    missed: bool,
    /// The thread running the derivation, if any.
    computing: Option<ThreadId>,
    rerun: bool,
    edges: SmallVec<[Edge; 4]>,
    abort: Option<AbortSignal>,
    runs: u64,
}

struct ComputedInner<T> {
    core: SignalCore<T>,
    derive: Derive<T>,
    fallback: Option<Fallback<T>>,
    equality: Equality<T>,
    tracking: Tracking,
    state: Mutex<ComputedState<T>>,
    /// Serializes evaluation across threads. Reentrant so that a subscriber
    /// notified mid-update may read the computed again.
    eval: ReentrantMutex<()>,
    me: Weak<ComputedInner<T>>,
}

/// A cached derived value that recomputes only when dependencies change.
///
/// # Example
///
/// ```rust,ignore
/// let count = Signal::new(2);
/// let doubled = {
///     let count = count.clone();
///     Computed::new(move || Ok(count.get()? * 2))
/// };
/// assert_eq!(doubled.get()?, 4);
/// ```
pub struct Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<ComputedInner<T>>,
}

impl<T> Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Derive a value from whatever signals `derive` reads.
    ///
    /// The derivation does not run until the first read.
    pub fn new<F>(derive: F) -> Self
    where
        T: PartialEq,
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        Self::with_options(derive, ComputedOptions::default())
    }

    pub fn with_options<F>(derive: F, options: ComputedOptions<T>) -> Self
    where
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        Self::build(Box::new(move |_| derive()), Tracking::Auto, options)
    }

    /// Like [`Computed::with_options`], but the derivation receives an
    /// [`AbortSignal`] that fires when a newer run supersedes it.
    pub fn cancellable<F>(derive: F, options: ComputedOptions<T>) -> Self
    where
        F: Fn(&AbortSignal) -> Result<T> + Send + Sync + 'static,
    {
        Self::build(Box::new(derive), Tracking::Auto, options)
    }

    /// Derive a value from an explicit set of dependencies.
    ///
    /// `derive` receives a snapshot of every dependency's current value and
    /// is re-invoked when any one of them changes. Reads inside `derive`
    /// are not tracked.
    pub fn from_deps<D, F>(deps: D, derive: F) -> Self
    where
        T: PartialEq,
        D: Dependencies,
        F: Fn(D::Values) -> Result<T> + Send + Sync + 'static,
    {
        Self::from_deps_with_options(deps, derive, ComputedOptions::default())
    }

    pub fn from_deps_with_options<D, F>(deps: D, derive: F, options: ComputedOptions<T>) -> Self
    where
        D: Dependencies,
        F: Fn(D::Values) -> Result<T> + Send + Sync + 'static,
    {
        let sources = deps.sources();
        Self::build(
            Box::new(move |_| derive(deps.snapshot()?)),
            Tracking::Fixed(sources),
            options,
        )
    }

    fn build(derive: Derive<T>, tracking: Tracking, options: ComputedOptions<T>) -> Self {
        let inner = Arc::new_cyclic(|me| ComputedInner {
            core: SignalCore::new(options.name),
            derive,
            fallback: options.fallback,
            equality: options.equality,
            tracking,
            state: Mutex::new(ComputedState {
                value: None,
                staleness: Staleness::Dirty,
                paused: false,
                missed: false,
                computing: None,
                rerun: false,
                edges: SmallVec::new(),
                abort: None,
                runs: 0,
            }),
            eval: ReentrantMutex::new(()),
            me: me.clone(),
        });
        let computed = Self { inner };
        dispatcher::report_created(&computed.as_source());
        computed
    }

    pub fn id(&self) -> SignalId {
        self.inner.core.id()
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.core.name()
    }

    /// Read the value, recomputing if a dependency changed.
    pub fn get(&self) -> Result<T> {
        self.inner.core.ensure_live()?;
        self.inner.ensure_not_computing()?;
        self.inner.update();
        dispatcher::report_read(|| self.as_source());
        self.inner.current()
    }

    /// Like `get`, but `None` instead of an error. Still tracked.
    pub fn try_get(&self) -> Option<T> {
        self.get().ok()
    }

    /// The current error, if the last run failed. Still tracked.
    pub fn error(&self) -> Option<Error> {
        self.get().err()
    }

    /// Call `callback` whenever the computed value changes.
    ///
    /// Subscribing computes the value immediately so that dependencies are
    /// known; the callback itself only runs on later changes.
    pub fn on<F>(&self, callback: F) -> Result<Subscription>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.inner.core.ensure_live()?;
        self.inner.update();
        let id = self.inner.core.subscribe(Arc::new(callback));
        let weak = Arc::downgrade(&self.inner);
        Ok(Subscription::new(id, move || {
            if let Some(inner) = weak.upgrade() {
                inner.core.unsubscribe(id);
            }
        }))
    }

    /// Stop reacting to invalidations. The last value stays readable.
    pub fn pause(&self) {
        self.inner.state.lock().paused = true;
    }

    /// Resume after [`Computed::pause`]. Invalidations missed while paused
    /// are applied now.
    pub fn resume(&self) {
        let missed = {
            let mut state = self.inner.state.lock();
            state.paused = false;
            std::mem::take(&mut state.missed)
        };
        if missed {
            self.inner.invalidate();
        }
    }

    pub fn is_paused(&self) -> bool {
        self.inner.state.lock().paused
    }

    pub fn staleness(&self) -> Staleness {
        self.inner.state.lock().staleness
    }

    pub fn is_stale(&self) -> bool {
        self.staleness() != Staleness::Clean
    }

    /// Number of times the derivation has run.
    pub fn run_count(&self) -> u64 {
        self.inner.state.lock().runs
    }

    /// Number of dependencies recorded by the last run.
    pub fn dependency_count(&self) -> usize {
        self.inner.state.lock().edges.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.core.subscriber_count()
    }

    pub fn version(&self) -> u64 {
        self.inner.core.version()
    }

    /// Detach from dependencies and drop subscribers. Idempotent.
    pub fn dispose(&self) {
        Source::dispose(&*self.inner);
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.core.is_disposed()
    }

    pub fn as_source(&self) -> Arc<dyn Source> {
        self.inner.clone()
    }
}

impl<T> ComputedInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn ensure_not_computing(&self) -> Result<()> {
        if self.computing_here() {
            return Err(Error::CircularSignal {
                signal: self.core.label(),
            });
        }
        Ok(())
    }

    /// Whether this thread is inside the derivation.
    fn computing_here(&self) -> bool {
        self.state.lock().computing == Some(thread::current().id())
    }

    fn current(&self) -> Result<T> {
        match &self.state.lock().value {
            Some(result) => result.clone(),
            None => Err(Error::CircularSignal {
                signal: self.core.label(),
            }),
        }
    }

    /// A dependency changed: go stale and tell our own dependents.
    fn invalidate(&self) {
        self.mark(Staleness::MaybeDirty);
    }

    fn mark(&self, staleness: Staleness) {
        let propagate = {
            let mut state = self.state.lock();
            if self.core.is_disposed() {
                return;
            }
            if state.paused {
                state.missed = true;
                return;
            }
            if state.computing.is_some() {
                state.rerun = true;
                return;
            }
            let was_clean = state.staleness == Staleness::Clean;
            if staleness == Staleness::Dirty || was_clean {
                state.staleness = staleness;
            }
            was_clean
        };

        if propagate {
            tracing::trace!(signal = %self.core.label(), "computed invalidated");
            self.core.invalidate_dependents();
            if self.core.has_subscribers() {
                if let Some(me) = self.me.upgrade() {
                    Runtime::schedule_refresh(me);
                }
            }
        }
    }

    /// Pull: recompute only if a dependency version moved.
    ///
    /// Another thread evaluating the same computed is waited for, after
    /// which its result is usually clean.
    fn update(&self) {
        if self.computing_here() {
            return;
        }
        let _eval = self.eval.lock();
        let edges = {
            let state = self.state.lock();
            if state.computing.is_some() {
                return;
            }
            if state.paused && state.value.is_some() {
                return;
            }
            match state.staleness {
                Staleness::Clean => return,
                Staleness::Dirty => None,
                Staleness::MaybeDirty => Some(
                    state
                        .edges
                        .iter()
                        .map(|edge| (edge.source.clone(), edge.version))
                        .collect::<SmallVec<[(Arc<dyn Source>, u64); 4]>>(),
                ),
            }
        };

        if let Some(edges) = edges {
            let moved = edges.iter().any(|(source, seen)| {
                source.refresh();
                source.version() != *seen
            });
            if !moved {
                let mut state = self.state.lock();
                if state.staleness == Staleness::MaybeDirty {
                    state.staleness = Staleness::Clean;
                }
                return;
            }
        }

        self.recompute();
    }

    fn recompute(&self) {
        let abort = AbortSignal::new();
        let superseded = {
            let mut state = self.state.lock();
            if state.computing.is_some() {
                return;
            }
            state.computing = Some(thread::current().id());
            state.rerun = false;
            state.abort.replace(abort.clone())
        };
        if let Some(previous) = superseded {
            previous.abort();
        }
        let guard = ComputingGuard { inner: self };

        let seen: Rc<RefCell<Vec<(Arc<dyn Source>, u64)>>> = Rc::default();
        let result = {
            let me = self.me.clone();
            let hooks = Dispatcher::new().on_track_loadable(move |loadable| {
                wake_on_settle(me.clone(), loadable);
            });
            match &self.tracking {
                Tracking::Auto => {
                    let sink = seen.clone();
                    let own = self.core.id();
                    let hooks = hooks.on_track_signal(move |source| {
                        if source.id() != own {
                            sink.borrow_mut().push((source.clone(), source.version()));
                        }
                    });
                    dispatcher::with_dispatcher(hooks, || (self.derive)(&abort))
                }
                Tracking::Fixed(sources) => {
                    let result = dispatcher::with_dispatcher(hooks.on_track_signal(|_| {}), || {
                        (self.derive)(&abort)
                    });
                    seen.borrow_mut().extend(
                        sources
                            .iter()
                            .map(|source| (source.clone(), source.version())),
                    );
                    result
                }
            }
        };

        let result = match (result, &self.fallback) {
            (Err(error), Some(fallback)) => match fallback(&error) {
                Some(value) => Ok(value),
                None => Err(error),
            },
            (result, _) => result,
        };
        if let Err(error) = &result {
            tracing::trace!(signal = %self.core.label(), %error, "derivation failed");
        }

        let edges = self.rewire(seen.take());

        let (changed, rerun) = {
            let mut state = self.state.lock();
            let changed = match (&state.value, &result) {
                (Some(Ok(old)), Ok(new)) => !self.equality.eq(old, new),
                _ => true,
            };
            state.value = Some(result.clone());
            state.edges = edges;
            state.runs += 1;
            state.staleness = if state.rerun {
                Staleness::Dirty
            } else {
                Staleness::Clean
            };
            (changed, state.rerun)
        };
        drop(guard);

        if changed {
            let version = self.core.bump();
            tracing::trace!(signal = %self.core.label(), version, "computed changed");
            if let Ok(value) = &result {
                Runtime::batch(|| self.core.notify(value));
            }
        }
        if rerun && self.core.has_subscribers() {
            if let Some(me) = self.me.upgrade() {
                Runtime::schedule_refresh(me);
            }
        }
    }

    /// Replace the recorded edges, keeping listeners on sources that are
    /// still read and detaching from the rest.
    fn rewire(&self, seen: Vec<(Arc<dyn Source>, u64)>) -> SmallVec<[Edge; 4]> {
        let mut previous = std::mem::take(&mut self.state.lock().edges);
        let mut edges: SmallVec<[Edge; 4]> = SmallVec::new();

        for (source, version) in seen {
            if edges.iter().any(|edge| edge.source.id() == source.id()) {
                continue;
            }
            if let Some(pos) = previous
                .iter()
                .position(|edge| edge.source.id() == source.id())
            {
                let kept = previous.swap_remove(pos);
                edges.push(Edge { version, ..kept });
                continue;
            }
            let me = self.me.clone();
            let listener: Listener = Arc::new(move || {
                if let Some(inner) = me.upgrade() {
                    inner.invalidate();
                }
            });
            match source.add_listener(listener) {
                Ok(id) => edges.push(Edge {
                    source,
                    version,
                    listener: id,
                }),
                Err(error) => {
                    tracing::trace!(signal = %self.core.label(), %error, "skipping dependency");
                }
            }
        }

        for stale in previous {
            stale.source.remove_listener(stale.listener);
        }
        edges
    }
}

/// Clears the computing flag even if the derivation panics.
struct ComputingGuard<'a, T> {
    inner: &'a ComputedInner<T>,
}

impl<T> Drop for ComputingGuard<'_, T> {
    fn drop(&mut self) {
        self.inner.state.lock().computing = None;
    }
}

/// Re-run a computed once a task it waited on has settled.
fn wake_on_settle<T>(me: Weak<ComputedInner<T>>, loadable: Loadable)
where
    T: Clone + Send + Sync + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                loadable.await;
                if let Some(inner) = me.upgrade() {
                    inner.mark(Staleness::Dirty);
                }
            });
        }
        Err(_) => {
            tracing::trace!("no async runtime; pending dependency will not wake its reader");
        }
    }
}

impl<T> Source for ComputedInner<T>
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

    fn refresh(&self) {
        if !self.core.is_disposed() {
            self.update();
        }
    }

    fn add_listener(&self, listener: Listener) -> Result<SubscriberId> {
        self.core.add_listener(listener)
    }

    fn remove_listener(&self, id: SubscriberId) {
        self.core.remove_listener(id);
    }

    fn dispose(&self) {
        if !self.core.mark_disposed() {
            return;
        }
        let (edges, abort) = {
            let mut state = self.state.lock();
            (std::mem::take(&mut state.edges), state.abort.take())
        };
        for edge in edges {
            edge.source.remove_listener(edge.listener);
        }
        if let Some(abort) = abort {
            abort.abort();
        }
        tracing::trace!(signal = %self.core.label(), "computed disposed");
    }

    fn is_disposed(&self) -> bool {
        self.core.is_disposed()
    }
}

impl<T> Readable for Computed<T>
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

impl<T> Clone for Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Identity for Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Debug for Computed<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Computed")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("staleness", &state.staleness)
            .field("value", &state.value)
            .field("runs", &state.runs)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Explicit dependencies
// ----------------------------------------------------------------------------

/// A declared set of dependencies for [`Computed::from_deps`].
///
/// Implemented for tuples of readables (values arrive as a tuple), for
/// `Vec<R>` and for `IndexMap<String, R>` (values arrive keyed by name, in
/// declaration order).
pub trait Dependencies: Send + Sync + 'static {
    type Values;

    fn sources(&self) -> Vec<Arc<dyn Source>>;

    /// Read every dependency. The first failure wins.
    fn snapshot(&self) -> Result<Self::Values>;
}

impl<R: Readable> Dependencies for Vec<R> {
    type Values = Vec<R::Value>;

    fn sources(&self) -> Vec<Arc<dyn Source>> {
        self.iter().map(Readable::source).collect()
    }

    fn snapshot(&self) -> Result<Self::Values> {
        self.iter().map(Readable::read).collect()
    }
}

impl<R: Readable> Dependencies for IndexMap<String, R> {
    type Values = IndexMap<String, R::Value>;

    fn sources(&self) -> Vec<Arc<dyn Source>> {
        self.values().map(Readable::source).collect()
    }

    fn snapshot(&self) -> Result<Self::Values> {
        self.iter()
            .map(|(name, dep)| Ok((name.clone(), dep.read()?)))
            .collect()
    }
}

macro_rules! tuple_dependencies {
    ($($name:ident : $idx:tt),+) => {
        impl<$($name: Readable),+> Dependencies for ($($name,)+) {
            type Values = ($($name::Value,)+);

            fn sources(&self) -> Vec<Arc<dyn Source>> {
                vec![$(self.$idx.source()),+]
            }

            fn snapshot(&self) -> Result<Self::Values> {
                Ok(($(self.$idx.read()?,)+))
            }
        }
    };
}

tuple_dependencies!(A: 0);
tuple_dependencies!(A: 0, B: 1);
tuple_dependencies!(A: 0, B: 1, C: 2);
tuple_dependencies!(A: 0, B: 1, C: 2, D: 3);

/// A computed holding the [`Task`] produced by an async body.
///
/// `body` runs synchronously, so signals it reads before returning its
/// future are tracked. Each run gets a fresh [`AbortSignal`]; when a
/// dependency change triggers a new run, the previous future is aborted and
/// its task settles with [`Error::Aborted`] instead of a stale value.
pub fn computed_task<T, F, Fut>(body: F) -> Computed<Task<T>>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(AbortSignal) -> Result<Fut> + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    Computed::cancellable(
        move |abort| {
            let future = body(abort.clone())?;
            Ok(Task::from_future(abort.clone().guard(future)))
        },
        ComputedOptions::with_equality(Equality::reference()),
    )
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{batch, Signal};
    use std::sync::atomic::{AtomicI32, Ordering};

    fn counter() -> (Arc<AtomicI32>, Arc<AtomicI32>) {
        let count = Arc::new(AtomicI32::new(0));
        (count.clone(), count)
    }

    #[test]
    fn computed_is_lazy_until_first_read() {
        let (runs, runs_in) = counter();
        let computed = Computed::new(move || {
            runs_in.fetch_add(1, Ordering::SeqCst);
            Ok(42)
        });

        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(computed.staleness(), Staleness::Dirty);
        assert_eq!(computed.get().unwrap(), 42);
        assert_eq!(computed.get().unwrap(), 42);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(computed.staleness(), Staleness::Clean);
    }

    #[test]
    fn computed_tracks_reads_automatically() {
        let count = Signal::new(10);
        let source = count.clone();
        let doubled = Computed::new(move || Ok(source.get()? * 2));

        assert_eq!(doubled.get().unwrap(), 20);
        assert_eq!(doubled.dependency_count(), 1);

        count.set(5).unwrap();
        assert!(doubled.is_stale());
        assert_eq!(doubled.get().unwrap(), 10);
    }

    #[test]
    fn unread_computed_never_recomputes() {
        let count = Signal::new(1);
        let source = count.clone();
        let (runs, runs_in) = counter();
        let computed = Computed::new(move || {
            runs_in.fetch_add(1, Ordering::SeqCst);
            source.get()
        });

        computed.get().unwrap();
        count.set(2).unwrap();
        count.set(3).unwrap();
        count.set(4).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        assert_eq!(computed.get().unwrap(), 4);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unchanged_intermediate_stops_recomputation() {
        let count = Signal::new(2);
        let source = count.clone();
        let parity = Computed::new(move || Ok(source.get()? % 2));

        let upstream = parity.clone();
        let (runs, runs_in) = counter();
        let label = Computed::new(move || {
            runs_in.fetch_add(1, Ordering::SeqCst);
            Ok(if upstream.get()? == 0 { "even" } else { "odd" })
        });

        assert_eq!(label.get().unwrap(), "even");
        count.set(4).unwrap();
        assert_eq!(label.get().unwrap(), "even");
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        count.set(5).unwrap();
        assert_eq!(label.get().unwrap(), "odd");
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn subscribers_fire_only_on_change() {
        let count = Signal::new(1);
        let source = count.clone();
        let parity = Computed::new(move || Ok(source.get()? % 2));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let _sub = parity.on(move |v| log.lock().push(*v)).unwrap();

        count.set(3).unwrap();
        count.set(4).unwrap();
        count.set(6).unwrap();
        count.set(7).unwrap();

        assert_eq!(*seen.lock(), vec![0, 1]);
    }

    #[test]
    fn batch_refreshes_observers_once() {
        let a = Signal::new(1);
        let b = Signal::new(1);
        let (sa, sb) = (a.clone(), b.clone());
        let (runs, runs_in) = counter();
        let sum = Computed::new(move || {
            runs_in.fetch_add(1, Ordering::SeqCst);
            Ok(sa.get()? + sb.get()?)
        });

        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let _sub = sum.on(move |v| log.lock().push(*v)).unwrap();

        batch(|| {
            a.set(10).unwrap();
            b.set(20).unwrap();
        });

        assert_eq!(*seen.lock(), vec![30]);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn errors_are_sticky_until_success() {
        let input = Signal::new(-1);
        let source = input.clone();
        let checked = Computed::new(move || {
            let v = source.get()?;
            if v < 0 {
                Err(Error::msg("negative"))
            } else {
                Ok(v)
            }
        });

        assert!(checked.get().is_err());
        assert!(checked.get().is_err());
        assert_eq!(checked.try_get(), None);
        assert!(matches!(checked.error(), Some(Error::Message(m)) if m == "negative"));

        input.set(3).unwrap();
        assert_eq!(checked.get().unwrap(), 3);
        assert!(checked.error().is_none());
    }

    #[test]
    fn fallback_substitutes_a_value() {
        let options = ComputedOptions::default().fallback(|_| Some(0));
        let computed = Computed::with_options(|| Err(Error::msg("unavailable")), options);
        assert_eq!(computed.get().unwrap(), 0);
    }

    #[test]
    fn failing_computed_does_not_poison_siblings() {
        let input = Signal::new(1);
        let (s1, s2) = (input.clone(), input.clone());
        let broken: Computed<i32> = Computed::new(move || {
            s1.get()?;
            Err(Error::msg("broken"))
        });
        let healthy = Computed::new(move || Ok(s2.get()? + 1));

        assert!(broken.get().is_err());
        assert_eq!(healthy.get().unwrap(), 2);
    }

    #[test]
    fn pause_freezes_value_and_resume_catches_up() {
        let count = Signal::new(1);
        let source = count.clone();
        let computed = Computed::new(move || source.get());

        assert_eq!(computed.get().unwrap(), 1);
        computed.pause();
        count.set(2).unwrap();
        assert!(!computed.is_stale());
        assert_eq!(computed.get().unwrap(), 1);

        computed.resume();
        assert!(!computed.is_paused());
        assert_eq!(computed.get().unwrap(), 2);
    }

    #[test]
    fn explicit_dependencies_receive_a_snapshot() {
        let first = Signal::new("Ada".to_string());
        let last = Signal::new("Lovelace".to_string());
        let (runs, runs_in) = counter();

        let full = Computed::from_deps((first.clone(), last.clone()), move |(f, l)| {
            runs_in.fetch_add(1, Ordering::SeqCst);
            Ok(format!("{f} {l}"))
        });

        assert_eq!(full.get().unwrap(), "Ada Lovelace");
        last.set("Byron".to_string()).unwrap();
        assert_eq!(full.get().unwrap(), "Ada Byron");
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(full.dependency_count(), 2);
    }

    #[test]
    fn named_dependencies_keep_declaration_order() {
        let mut deps = IndexMap::new();
        deps.insert("width".to_string(), Signal::new(3));
        deps.insert("height".to_string(), Signal::new(4));
        let height = deps["height"].clone();

        let area = Computed::from_deps(deps, |values| {
            let keys: Vec<_> = values.keys().cloned().collect();
            assert_eq!(keys, vec!["width", "height"]);
            Ok(values["width"] * values["height"])
        });

        assert_eq!(area.get().unwrap(), 12);
        height.set(5).unwrap();
        assert_eq!(area.get().unwrap(), 15);
    }

    #[test]
    fn dependencies_follow_the_last_run() {
        let use_a = Signal::new(true);
        let a = Signal::new(1);
        let b = Signal::new(2);
        let (flag, sa, sb) = (use_a.clone(), a.clone(), b.clone());
        let (runs, runs_in) = counter();

        let pick = Computed::new(move || {
            runs_in.fetch_add(1, Ordering::SeqCst);
            if flag.get()? {
                sa.get()
            } else {
                sb.get()
            }
        });

        assert_eq!(pick.get().unwrap(), 1);
        use_a.set(false).unwrap();
        assert_eq!(pick.get().unwrap(), 2);
        assert_eq!(a.as_source().version(), 0);

        // `a` is no longer a dependency.
        a.set(100).unwrap();
        assert!(!pick.is_stale());
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn self_read_is_reported_as_a_cycle() {
        let slot: Arc<Mutex<Option<Computed<i32>>>> = Arc::new(Mutex::new(None));
        let inner = slot.clone();
        let looping = Computed::new(move || {
            let me = inner.lock().clone();
            match me {
                Some(me) => me.get(),
                None => Ok(0),
            }
        });
        *slot.lock() = Some(looping.clone());

        assert!(matches!(looping.get(), Err(Error::CircularSignal { .. })));
    }

    #[test]
    fn dispose_detaches_from_sources() {
        let count = Signal::new(1);
        let source = count.clone();
        let computed = Computed::new(move || source.get());
        computed.get().unwrap();

        computed.dispose();
        computed.dispose();
        assert!(computed.is_disposed());
        assert_eq!(computed.dependency_count(), 0);
        assert!(matches!(computed.get(), Err(Error::Disposed { .. })));
        count.set(2).unwrap();
    }

    #[tokio::test]
    async fn computed_task_aborts_superseded_runs() {
        let query = Signal::new(1);
        let source = query.clone();
        let results = computed_task(move |abort| {
            let q = source.get()?;
            Ok(async move {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                abort.check()?;
                Ok::<_, Error>(q * 10)
            })
        });

        let first = results.get().unwrap();
        query.set(2).unwrap();
        let second = results.get().unwrap();
        assert!(!first.same(&second));

        assert!(matches!(first.promise().await, Err(Error::Aborted)));
        assert_eq!(second.promise().await.unwrap(), 20);
    }

    #[test]
    fn concurrent_reader_waits_instead_of_reporting_a_cycle() {
        let (runs, runs_in) = counter();
        let slow = Computed::new(move || {
            runs_in.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(60));
            Ok(7)
        });

        let other = {
            let slow = slow.clone();
            std::thread::spawn(move || slow.get())
        };
        std::thread::sleep(std::time::Duration::from_millis(20));

        assert_eq!(slow.get().unwrap(), 7);
        assert_eq!(other.join().unwrap().unwrap(), 7);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
