//! The override and ownership context for factories.
//!
//! A [`Registry`] holds everything factories share: override registrations,
//! the instances made by `create` since the last clear, the singletons that
//! have been built, and which signals belong to singletons. Factories are
//! bound to one registry; most code uses [`Registry::global`].
//!
//! [`Registry::clear`] is the single teardown operation. It disposes tracked
//! instances, drops every override and forgets every singleton, so the next
//! access rebuilds from scratch.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use dashmap::DashMap;
use parking_lot::Mutex;

use super::bundle::{Bundle, Disposable};
use super::construction;
use super::factory::Factory;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::reactive::dispatcher;
use crate::reactive::SignalId;

/// Unique identifier for a factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogicId(u64);

impl LogicId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

pub(crate) type Body<T> = Arc<dyn Fn() -> Result<T> + Send + Sync>;

/// A registered override and the single instance it produced.
pub(crate) struct OverrideSlot<T> {
    pub(crate) body: Body<T>,
    instance: Mutex<Option<T>>,
}

/// A singleton that can be forgotten.
pub(crate) trait Reset: Send + Sync {
    fn reset(&self);
}

/// Override registrations and tracked instances.
pub struct Registry {
    config: Config,
    overrides: DashMap<LogicId, Arc<dyn Any + Send + Sync>>,
    tracked: Mutex<Vec<Weak<dyn Disposable>>>,
    singletons: Mutex<Vec<Weak<dyn Reset>>>,
    singleton_signals: DashMap<SignalId, String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            config,
            overrides: DashMap::new(),
            tracked: Mutex::new(Vec::new()),
            singletons: Mutex::new(Vec::new()),
            singleton_signals: DashMap::new(),
        }
    }

    /// The process-wide registry used by factories built with `new`.
    pub fn global() -> Arc<Registry> {
        static GLOBAL: OnceLock<Arc<Registry>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Registry::new())))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Route `logic` through `body` until [`Registry::unprovide`] or
    /// [`Registry::clear`].
    ///
    /// The override's result is cached: every access during this
    /// registration sees the same instance. Providing again replaces both
    /// the body and the cached instance.
    pub fn provide<T, L, F>(&self, logic: &L, body: F)
    where
        T: Bundle,
        L: Factory<T>,
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        let slot: Arc<OverrideSlot<T>> = Arc::new(OverrideSlot {
            body: Arc::new(body),
            instance: Mutex::new(None),
        });
        self.overrides.insert(logic.id(), slot);
        tracing::debug!(factory = logic.name(), "override provided");
    }

    /// Remove the override for `logic`. Returns whether one was set.
    pub fn unprovide<T, L: Factory<T>>(&self, logic: &L) -> bool {
        let removed = self.overrides.remove(&logic.id()).is_some();
        if removed {
            tracing::debug!(factory = logic.name(), "override removed");
        }
        removed
    }

    pub fn has_override<T, L: Factory<T>>(&self, logic: &L) -> bool {
        self.overrides.contains_key(&logic.id())
    }

    /// Number of live instances made by `create` since the last clear.
    pub fn tracked_count(&self) -> usize {
        self.tracked
            .lock()
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Whether `id` was created by a singleton's construction.
    pub fn is_singleton_signal(&self, id: SignalId) -> bool {
        self.singleton_signals.contains_key(&id)
    }

    /// Tear everything down.
    ///
    /// Tracked instances are disposed first (unless the config says
    /// otherwise); a failing disposal is logged and does not stop the rest.
    /// Then overrides and singletons are dropped.
    pub fn clear(&self) {
        let tracked = std::mem::take(&mut *self.tracked.lock());
        let mut disposed = 0usize;
        if self.config.dispose_on_clear {
            for instance in tracked.iter().filter_map(Weak::upgrade) {
                match instance.dispose() {
                    Ok(()) => disposed += 1,
                    Err(error) => {
                        tracing::warn!(factory = instance.label(), %error, "disposal failed during clear");
                    }
                }
            }
        }

        self.overrides.clear();
        let singletons = std::mem::take(&mut *self.singletons.lock());
        for singleton in singletons.iter().filter_map(Weak::upgrade) {
            singleton.reset();
        }
        self.singleton_signals.clear();

        tracing::debug!(disposed, singletons = singletons.len(), "registry cleared");
    }

    pub(crate) fn override_slot<T: Bundle>(&self, id: LogicId) -> Option<Arc<OverrideSlot<T>>> {
        let slot = self.overrides.get(&id).map(|entry| Arc::clone(entry.value()))?;
        slot.downcast::<OverrideSlot<T>>().ok()
    }

    /// The override instance for `id`, built on first access.
    ///
    /// `None` when no override is registered.
    pub(crate) fn resolve_override<T: Bundle>(&self, id: LogicId, name: &str) -> Option<Result<T>> {
        let slot = self.override_slot::<T>(id)?;
        if let Some(instance) = slot.instance.lock().clone() {
            return Some(Ok(instance));
        }

        let built = construction::enter(id, name).and_then(|_frame| {
            self.construct_shared(name, || (slot.body)())
                .map_err(|error| Error::creation(name, error))
        });
        Some(built.map(|instance| {
            tracing::debug!(factory = name, "override instance built");
            slot.instance.lock().get_or_insert(instance).clone()
        }))
    }

    /// Build a shared instance, recording its signals as singleton-owned.
    ///
    /// Signals created by a failed construction are disposed.
    pub(crate) fn construct_shared<T>(
        &self,
        name: &str,
        body: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let (result, created) = dispatcher::capture_created(body);
        match &result {
            Ok(_) => {
                for source in &created {
                    self.singleton_signals.insert(source.id(), name.to_string());
                }
            }
            Err(_) => {
                for source in &created {
                    source.dispose();
                }
            }
        }
        result
    }

    pub(crate) fn track(&self, instance: Weak<dyn Disposable>) {
        let mut tracked = self.tracked.lock();
        tracked.retain(|weak| weak.strong_count() > 0);
        tracked.push(instance);
    }

    pub(crate) fn register_singleton(&self, singleton: Weak<dyn Reset>) {
        self.singletons.lock().push(singleton);
    }

    /// Refuse to release signals that belong to a singleton.
    pub(crate) fn check_not_singleton(&self, signals: &[SignalId]) -> Result<()> {
        for id in signals {
            if let Some(owner) = self.singleton_signals.get(id) {
                return Err(Error::SingletonDisposal {
                    factory: owner.value().clone(),
                });
            }
        }
        Ok(())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("config", &self.config)
            .field("overrides", &self.overrides.len())
            .field("tracked", &self.tracked_count())
            .field("singleton_signals", &self.singleton_signals.len())
            .finish()
    }
}
