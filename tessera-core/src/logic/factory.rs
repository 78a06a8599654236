//! Named factories with singleton and owned instances.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::bundle::{Bundle, Owned};
use super::construction;
use super::registry::{Body, LogicId, Registry, Reset};
use crate::error::{Error, Result};
use crate::reactive::dispatcher;

/// Something overrides can be registered for.
pub trait Factory<T> {
    fn id(&self) -> LogicId;

    fn name(&self) -> &str;

    fn registry(&self) -> &Arc<Registry>;
}

/// Singleton lifecycle.
enum Singleton<T> {
    Uninitialized,
    Initializing,
    Ready(T),
}

struct LogicInner<T> {
    id: LogicId,
    name: String,
    body: Body<T>,
    registry: Arc<Registry>,
    state: Mutex<Singleton<T>>,
    /// Held for the duration of a singleton construction.
    init: Mutex<()>,
}

impl<T: Bundle> Reset for LogicInner<T> {
    fn reset(&self) {
        *self.state.lock() = Singleton::Uninitialized;
    }
}

/// A named constructor for a bundle.
///
/// [`Logic::get`] returns the shared singleton, built on first access.
/// [`Logic::create`] builds a fresh instance owned by the caller. Either
/// can be redirected with [`Registry::provide`] for tests.
///
/// # Example
///
/// ```rust,ignore
/// let counter = Logic::new("Counter", || Ok(Signal::new(0)));
/// counter.get()?.set(1)?;
/// assert_eq!(counter.get()?.peek(), 1);
///
/// let mine = counter.create()?;   // independent
/// mine.dispose()?;
/// ```
pub struct Logic<T: Bundle> {
    inner: Arc<LogicInner<T>>,
}

impl<T: Bundle> Logic<T> {
    /// A factory bound to the global registry.
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        Self::in_registry(Registry::global(), name, body)
    }

    pub fn in_registry<F>(registry: Arc<Registry>, name: impl Into<String>, body: F) -> Self
    where
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(LogicInner {
                id: LogicId::next(),
                name: name.into(),
                body: Arc::new(body),
                registry,
                state: Mutex::new(Singleton::Uninitialized),
                init: Mutex::new(()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The shared instance.
    ///
    /// With an override registered, this is the override's instance.
    /// Otherwise the body runs once and its result is cached until the
    /// registry is cleared. Re-entering a factory that is still being
    /// built fails with [`Error::CircularDependency`]; other failures are
    /// wrapped in [`Error::Creation`].
    pub fn get(&self) -> Result<T> {
        let inner = &self.inner;
        if let Some(result) = inner.registry.resolve_override::<T>(inner.id, &inner.name) {
            return result;
        }
        if let Singleton::Ready(instance) = &*inner.state.lock() {
            return Ok(instance.clone());
        }

        let _frame = construction::enter(inner.id, &inner.name)?;
        let _init = inner.init.lock();
        {
            let mut state = inner.state.lock();
            if let Singleton::Ready(instance) = &*state {
                return Ok(instance.clone());
            }
            *state = Singleton::Initializing;
        }

        tracing::debug!(factory = %inner.name, depth = construction::depth(), "constructing singleton");
        match inner.registry.construct_shared(&inner.name, || (inner.body)()) {
            Ok(instance) => {
                *inner.state.lock() = Singleton::Ready(instance.clone());
                let weak: std::sync::Weak<LogicInner<T>> = Arc::downgrade(inner);
                inner.registry.register_singleton(weak);
                Ok(instance)
            }
            Err(error) => {
                *inner.state.lock() = Singleton::Uninitialized;
                Err(Error::creation(&inner.name, error))
            }
        }
    }

    /// A fresh instance owned by the caller.
    ///
    /// Never cached. Signals created during construction are released by
    /// [`Owned::dispose`], and the instance is disposed by
    /// [`Registry::clear`] if the caller has not done so.
    pub fn create(&self) -> Result<Owned<T>> {
        let inner = &self.inner;
        let body = match inner.registry.override_slot::<T>(inner.id) {
            Some(slot) => Arc::clone(&slot.body),
            None => Arc::clone(&inner.body),
        };

        let _frame = construction::enter(inner.id, &inner.name)?;
        let (result, created) = dispatcher::capture_created(|| body());
        let bundle = match result {
            Ok(bundle) => bundle,
            Err(error) => {
                for source in created {
                    source.dispose();
                }
                return Err(Error::creation(&inner.name, error));
            }
        };

        tracing::debug!(factory = %inner.name, signals = created.len(), "created owned instance");
        let owned = Owned::new(&inner.name, bundle, created, &inner.registry);
        inner.registry.track(owned.as_disposable());
        Ok(owned)
    }

    /// Whether the singleton has been built.
    pub fn is_initialized(&self) -> bool {
        matches!(*self.inner.state.lock(), Singleton::Ready(_))
    }

    /// Whether the singleton is being built right now.
    pub fn is_initializing(&self) -> bool {
        matches!(*self.inner.state.lock(), Singleton::Initializing)
    }
}

impl<T: Bundle> Factory<T> for Logic<T> {
    fn id(&self) -> LogicId {
        self.inner.id
    }

    fn name(&self) -> &str {
        &self.inner.name
    }

    fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }
}

impl<T: Bundle> Clone for Logic<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Bundle> fmt::Debug for Logic<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logic")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}
