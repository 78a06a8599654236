//! Reference-counted scope entries.

use std::fmt::{self, Debug};
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::args::ScopeArgs;
use super::cache::CacheInner;
use super::defer::Defer;
use crate::error::Result;
use crate::logic::{Bundle, Registry};
use crate::reactive::Source;

pub(crate) struct EntryInner<K, A, T> {
    key: K,
    args: A,
    scope: T,
    created: Mutex<Vec<Arc<dyn Source>>>,
    refs: AtomicUsize,
    disposed: AtomicBool,
    cache: Weak<CacheInner<K, A, T>>,
    scheduler: Arc<dyn Defer>,
    registry: Arc<Registry>,
}

/// One cached bundle and its reference count.
///
/// A new entry starts with a count of zero and a disposal check already
/// scheduled for the end of the turn. The caller [`commit`]s once it has
/// durably accepted the entry; each [`uncommit`] that brings the count back
/// to zero schedules another check. A check disposes the entry only if the
/// count is still zero when it runs.
///
/// [`commit`]: ScopeEntry::commit
/// [`uncommit`]: ScopeEntry::uncommit
pub struct ScopeEntry<K, A, T> {
    pub(crate) inner: Arc<EntryInner<K, A, T>>,
}

impl<K, A, T> ScopeEntry<K, A, T>
where
    K: Hash + Eq + Clone + Send + Sync + Debug + 'static,
    A: ScopeArgs,
    T: Bundle,
{
    pub(crate) fn new(
        key: K,
        args: A,
        scope: T,
        created: Vec<Arc<dyn Source>>,
        cache: Weak<CacheInner<K, A, T>>,
        scheduler: Arc<dyn Defer>,
        registry: Arc<Registry>,
    ) -> Self {
        Self {
            inner: Arc::new(EntryInner {
                key,
                args,
                scope,
                created: Mutex::new(created),
                refs: AtomicUsize::new(0),
                disposed: AtomicBool::new(false),
                cache,
                scheduler,
                registry,
            }),
        }
    }

    pub fn scope(&self) -> &T {
        &self.inner.scope
    }

    pub fn args(&self) -> &A {
        &self.inner.args
    }

    pub fn key(&self) -> &K {
        &self.inner.key
    }

    /// Take a reference.
    pub fn commit(&self) {
        let refs = self.inner.refs.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!(key = ?self.inner.key, refs, "scope entry committed");
    }

    /// Drop a reference. At zero, a disposal check is scheduled.
    pub fn uncommit(&self) {
        let previous = self
            .inner
            .refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |refs| refs.checked_sub(1));
        match previous {
            Ok(1) => {
                tracing::debug!(key = ?self.inner.key, "scope entry released");
                self.schedule_check();
            }
            Ok(previous) => {
                tracing::debug!(key = ?self.inner.key, refs = previous - 1, "scope entry uncommitted");
            }
            Err(_) => {
                tracing::warn!(key = ?self.inner.key, "uncommit without a matching commit");
            }
        }
    }

    pub fn ref_count(&self) -> usize {
        self.inner.refs.load(Ordering::Acquire)
    }

    /// Dispose at the end of the turn unless committed by then.
    pub(crate) fn schedule_check(&self) {
        let weak = Arc::downgrade(&self.inner);
        self.inner.scheduler.defer(Box::new(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let entry = ScopeEntry { inner };
            if entry.is_disposed() || entry.ref_count() > 0 {
                tracing::trace!(key = ?entry.inner.key, "scope entry kept");
                return;
            }
            tracing::debug!(key = ?entry.inner.key, "disposing unclaimed scope entry");
            if let Err(error) = entry.dispose() {
                tracing::warn!(key = ?entry.inner.key, %error, "deferred disposal failed");
            }
        }));
    }

    /// Release the entry. Idempotent.
    ///
    /// Disposes the signals created during construction, then the bundle,
    /// then removes the entry from its cache unless a newer entry has taken
    /// its key. If the bundle exposes a singleton's signals, the bundle
    /// itself is left alone and `SingletonDisposal` is returned; the entry
    /// is still marked disposed and leaves the cache.
    pub fn dispose(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let created = std::mem::take(&mut *inner.created.lock());
        for source in created {
            source.dispose();
        }
        let result = inner
            .registry
            .check_not_singleton(&inner.scope.signals())
            .and_then(|()| inner.scope.dispose());

        if let Some(cache) = inner.cache.upgrade() {
            cache.remove_if_current(&inner.key, inner);
        }
        tracing::debug!(key = ?inner.key, refused = result.is_err(), "scope entry disposed");
        result
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }
}

impl<K, A, T> ScopeEntry<K, A, T> {
    pub(crate) fn same(&self, other: &Arc<EntryInner<K, A, T>>) -> bool {
        Arc::ptr_eq(&self.inner, other)
    }
}

impl<K, A, T> Clone for ScopeEntry<K, A, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: Debug, A, T> Debug for ScopeEntry<K, A, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeEntry")
            .field("key", &self.inner.key)
            .field("refs", &self.inner.refs.load(Ordering::Acquire))
            .field("disposed", &self.inner.disposed.load(Ordering::Acquire))
            .finish()
    }
}
