//! Bundles and owned instances.

use std::fmt::{self, Debug};
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::registry::Registry;
use crate::error::Result;
use crate::reactive::{Computed, Signal, SignalId, Source};

/// What a factory builds.
///
/// Usually a struct of signals and handles. Implement `dispose` to release
/// resources the bundle owns beyond the signals created during its
/// construction, which are released automatically. Implement `signals` to
/// list the signals the bundle exposes, so that disposing a bundle that
/// holds a shared singleton's signals is refused.
pub trait Bundle: Clone + Send + Sync + 'static {
    fn dispose(&self) -> Result<()> {
        Ok(())
    }

    fn signals(&self) -> Vec<SignalId> {
        Vec::new()
    }
}

impl Bundle for () {}

impl<T> Bundle for Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn dispose(&self) -> Result<()> {
        Signal::dispose(self);
        Ok(())
    }

    fn signals(&self) -> Vec<SignalId> {
        vec![self.id()]
    }
}

impl<T> Bundle for Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn dispose(&self) -> Result<()> {
        Computed::dispose(self);
        Ok(())
    }

    fn signals(&self) -> Vec<SignalId> {
        vec![self.id()]
    }
}

impl<T: Bundle> Bundle for Option<T> {
    fn dispose(&self) -> Result<()> {
        match self {
            Some(bundle) => bundle.dispose(),
            None => Ok(()),
        }
    }

    fn signals(&self) -> Vec<SignalId> {
        self.as_ref().map(Bundle::signals).unwrap_or_default()
    }
}

/// Shared handles own nothing.
impl<T: ?Sized + Send + Sync + 'static> Bundle for Arc<T> {}

macro_rules! tuple_bundle {
    ($($name:ident : $idx:tt),+) => {
        impl<$($name: Bundle),+> Bundle for ($($name,)+) {
            fn dispose(&self) -> Result<()> {
                let mut first = None;
                $(
                    if let Err(error) = self.$idx.dispose() {
                        first.get_or_insert(error);
                    }
                )+
                first.map_or(Ok(()), Err)
            }

            fn signals(&self) -> Vec<SignalId> {
                let mut ids = Vec::new();
                $(ids.extend(self.$idx.signals());)+
                ids
            }
        }
    };
}

tuple_bundle!(A: 0, B: 1);
tuple_bundle!(A: 0, B: 1, C: 2);
tuple_bundle!(A: 0, B: 1, C: 2, D: 3);

/// Something `Registry::clear` can tear down.
pub(crate) trait Disposable: Send + Sync {
    fn label(&self) -> &str;

    fn dispose(&self) -> Result<()>;
}

pub(crate) struct OwnedInner<T> {
    factory: String,
    bundle: T,
    created: Mutex<Vec<Arc<dyn Source>>>,
    disposed: AtomicBool,
    registry: Weak<Registry>,
}

impl<T: Bundle> Disposable for OwnedInner<T> {
    fn label(&self) -> &str {
        &self.factory
    }

    fn dispose(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let created = std::mem::take(&mut *self.created.lock());
        tracing::debug!(factory = %self.factory, signals = created.len(), "disposing owned instance");
        for source in created {
            source.dispose();
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.check_not_singleton(&self.bundle.signals())?;
        }
        self.bundle.dispose()
    }
}

/// A bundle from [`Logic::create`](super::Logic::create), owned by the
/// caller.
///
/// Dereferences to the bundle. [`Owned::dispose`] releases every signal
/// created while the bundle was constructed, then the bundle's own
/// resources; calling it again does nothing.
pub struct Owned<T: Bundle> {
    inner: Arc<OwnedInner<T>>,
}

impl<T: Bundle> Owned<T> {
    pub(crate) fn new(
        factory: &str,
        bundle: T,
        created: Vec<Arc<dyn Source>>,
        registry: &Arc<Registry>,
    ) -> Self {
        Self {
            inner: Arc::new(OwnedInner {
                factory: factory.to_string(),
                bundle,
                created: Mutex::new(created),
                disposed: AtomicBool::new(false),
                registry: Arc::downgrade(registry),
            }),
        }
    }

    pub(crate) fn as_disposable(&self) -> Weak<dyn Disposable> {
        let weak: Weak<OwnedInner<T>> = Arc::downgrade(&self.inner);
        weak
    }

    pub fn bundle(&self) -> &T {
        &self.inner.bundle
    }

    pub fn factory(&self) -> &str {
        &self.inner.factory
    }

    /// Number of signals created during construction and not yet released.
    pub fn created_count(&self) -> usize {
        self.inner.created.lock().len()
    }

    /// Release the instance.
    ///
    /// Signals created during construction are always released. If the
    /// bundle exposes signals of a shared singleton, the bundle itself is
    /// left alone and [`Error::SingletonDisposal`](crate::Error::SingletonDisposal) is returned.
    pub fn dispose(&self) -> Result<()> {
        Disposable::dispose(&*self.inner)
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }
}

impl<T: Bundle> Deref for Owned<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner.bundle
    }
}

impl<T: Bundle> Clone for Owned<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Bundle + Debug> Debug for Owned<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Owned")
            .field("factory", &self.inner.factory)
            .field("bundle", &self.inner.bundle)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct Pair {
        left: Signal<i32>,
        right: Signal<i32>,
    }

    impl Bundle for Pair {
        fn signals(&self) -> Vec<SignalId> {
            vec![self.left.id(), self.right.id()]
        }
    }

    #[test]
    fn owned_dispose_is_idempotent() {
        let registry = Arc::new(Registry::new());
        let signal = Signal::new(1);
        let owned = Owned::new("Counter", signal.clone(), vec![signal.as_source()], &registry);

        assert_eq!(owned.peek(), 1);
        owned.dispose().unwrap();
        owned.dispose().unwrap();
        assert!(owned.is_disposed());
        assert!(signal.is_disposed());
        assert_eq!(owned.created_count(), 0);
    }

    #[test]
    fn tuple_bundles_collect_signals() {
        let pair = Pair {
            left: Signal::new(1),
            right: Signal::new(2),
        };
        let both = (pair.clone(), Signal::new(3));
        assert_eq!(both.signals().len(), 3);
        both.dispose().unwrap();
        assert!(both.1.is_disposed());
        assert!(!pair.left.is_disposed());
    }
}
