//! The scope cache.

use std::fmt::{self, Debug};
use std::hash::Hash;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::args::ScopeArgs;
use super::defer::{scheduler_for, Defer};
use super::entry::{EntryInner, ScopeEntry};
use crate::config::Config;
use crate::error::Result;
use crate::logic::{Bundle, Registry};
use crate::reactive::dispatcher;

pub(crate) struct CacheInner<K, A, T> {
    entries: Mutex<IndexMap<K, ScopeEntry<K, A, T>>>,
    scheduler: Arc<dyn Defer>,
    registry: Arc<Registry>,
}

impl<K, A, T> CacheInner<K, A, T>
where
    K: Hash + Eq,
{
    /// Forget `key` if it still maps to `entry`.
    pub(crate) fn remove_if_current(&self, key: &K, entry: &Arc<EntryInner<K, A, T>>) {
        let mut entries = self.entries.lock();
        if entries.get(key).is_some_and(|current| current.same(entry)) {
            entries.shift_remove(key);
        }
    }
}

/// Cached, reference-counted bundles keyed by `K` and built from args `A`.
///
/// # Example
///
/// ```rust,ignore
/// let cache: ScopeCache<String, (u32,), Signal<u32>> = ScopeCache::new();
///
/// // A host that runs setup twice gets the same entry both times.
/// let first = cache.get("row".into(), (7,), |&(id,)| Ok(Signal::new(id)))?;
/// let second = cache.get("row".into(), (7,), |&(id,)| Ok(Signal::new(id)))?;
/// second.commit();
/// ```
pub struct ScopeCache<K, A, T> {
    inner: Arc<CacheInner<K, A, T>>,
}

impl<K, A, T> ScopeCache<K, A, T>
where
    K: Hash + Eq + Clone + Send + Sync + Debug + 'static,
    A: ScopeArgs,
    T: Bundle,
{
    /// A cache using the default deferral and the global registry.
    pub fn new() -> Self {
        Self::from_config(&Config::default())
    }

    pub fn with_scheduler(scheduler: Arc<dyn Defer>) -> Self {
        Self::build(scheduler, Registry::global())
    }

    pub fn from_config(config: &Config) -> Self {
        Self::with_scheduler(scheduler_for(config.deferral))
    }

    /// Use `registry` to recognize singleton signals.
    pub fn in_registry(self, registry: Arc<Registry>) -> Self {
        let scheduler = Arc::clone(&self.inner.scheduler);
        Self::build(scheduler, registry)
    }

    fn build(scheduler: Arc<dyn Defer>, registry: Arc<Registry>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                entries: Mutex::new(IndexMap::new()),
                scheduler,
                registry,
            }),
        }
    }

    /// The entry for `key`, reused if its args match `args`.
    ///
    /// On a miss (or an args change, which disposes the old entry first)
    /// `factory` builds a new bundle. Every signal created during that call
    /// belongs to the entry. New entries start uncommitted with a disposal
    /// check scheduled for the end of the turn.
    pub fn get<F>(&self, key: K, args: A, factory: F) -> Result<ScopeEntry<K, A, T>>
    where
        F: FnOnce(&A) -> Result<T>,
    {
        self.get_with(key, args, factory, A::matches)
    }

    /// Like [`ScopeCache::get`] with a custom args comparison.
    ///
    /// `equals` receives the stored args first.
    pub fn get_with<F, E>(&self, key: K, args: A, factory: F, equals: E) -> Result<ScopeEntry<K, A, T>>
    where
        F: FnOnce(&A) -> Result<T>,
        E: Fn(&A, &A) -> bool,
    {
        let stale = {
            let entries = self.inner.entries.lock();
            match entries.get(&key) {
                Some(entry) if !entry.is_disposed() && equals(entry.args(), &args) => {
                    entry.args().adopt(&args);
                    tracing::trace!(key = ?key, "scope cache hit");
                    return Ok(entry.clone());
                }
                Some(entry) => Some(entry.clone()),
                None => None,
            }
        };

        if let Some(stale) = stale {
            tracing::debug!(key = ?key, "scope args changed; replacing entry");
            if let Err(error) = stale.dispose() {
                tracing::warn!(key = ?key, %error, "failed to dispose replaced entry");
            }
        }

        let (result, created) = dispatcher::capture_created(|| factory(&args));
        let scope = match result {
            Ok(scope) => scope,
            Err(error) => {
                for source in created {
                    source.dispose();
                }
                return Err(error);
            }
        };

        tracing::debug!(key = ?key, signals = created.len(), "scope entry created");
        let entry = ScopeEntry::new(
            key.clone(),
            args,
            scope,
            created,
            Arc::downgrade(&self.inner),
            Arc::clone(&self.inner.scheduler),
            Arc::clone(&self.inner.registry),
        );
        self.inner.entries.lock().insert(key, entry.clone());
        entry.schedule_check();
        Ok(entry)
    }

    /// Dispose every entry and empty the cache.
    pub fn clear(&self) {
        let entries = std::mem::take(&mut *self.inner.entries.lock());
        let count = entries.len();
        for (key, entry) in entries {
            if let Err(error) = entry.dispose() {
                tracing::warn!(key = ?key, %error, "failed to dispose entry during clear");
            }
        }
        tracing::debug!(count, "scope cache cleared");
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.lock().is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inner.entries.lock().contains_key(key)
    }

    /// The live entry for `key`, without touching its count.
    pub fn peek(&self, key: &K) -> Option<ScopeEntry<K, A, T>> {
        self.inner.entries.lock().get(key).cloned()
    }
}

impl<K, A, T> Default for ScopeCache<K, A, T>
where
    K: Hash + Eq + Clone + Send + Sync + Debug + 'static,
    A: ScopeArgs,
    T: Bundle,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, A, T> Clone for ScopeCache<K, A, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, A, T> Debug for ScopeCache<K, A, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeCache")
            .field("entries", &self.inner.entries.lock().len())
            .finish()
    }
}
