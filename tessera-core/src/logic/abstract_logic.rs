//! Abstract factories: a name and a contract, bound later.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use super::bundle::Bundle;
use super::factory::Factory;
use super::registry::{LogicId, Registry};
use crate::error::{Error, Result};

/// The current binding of an abstract factory.
#[derive(Debug, Clone)]
pub enum Binding<T> {
    /// No override is registered. Carries the factory name.
    Unbound(String),
    Bound(T),
}

impl<T> Binding<T> {
    pub fn is_bound(&self) -> bool {
        matches!(self, Self::Bound(_))
    }
}

struct AbstractInner {
    id: LogicId,
    name: String,
    registry: Arc<Registry>,
}

/// A factory with no body of its own.
///
/// Obtaining its [`Facade`] never fails. Using a member fails with
/// [`Error::NotImplemented`] until an implementation is provided through
/// the registry.
///
/// ```rust,ignore
/// let storage: AbstractLogic<Arc<dyn Storage>> = AbstractLogic::new("Storage");
/// let facade = storage.get();
///
/// provide(&storage, || Ok(Arc::new(MemoryStorage::default()) as Arc<dyn Storage>));
/// facade.member("load", |s| s.load("key"))?;
/// ```
pub struct AbstractLogic<T> {
    inner: Arc<AbstractInner>,
    _bundle: PhantomData<fn() -> T>,
}

impl<T: Bundle> AbstractLogic<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self::in_registry(Registry::global(), name)
    }

    pub fn in_registry(registry: Arc<Registry>, name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(AbstractInner {
                id: LogicId::next(),
                name: name.into(),
                registry,
            }),
            _bundle: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The late-binding facade. Never fails.
    pub fn get(&self) -> Facade<T> {
        Facade {
            logic: self.clone(),
        }
    }
}

impl<T: Bundle> Factory<T> for AbstractLogic<T> {
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

impl<T> Clone for AbstractLogic<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _bundle: PhantomData,
        }
    }
}

impl<T> fmt::Debug for AbstractLogic<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbstractLogic")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .finish()
    }
}

/// Member access on an abstract factory.
///
/// Every access consults the registry, so overrides provided or replaced
/// after the facade was obtained are picked up.
pub struct Facade<T> {
    logic: AbstractLogic<T>,
}

impl<T: Bundle> Facade<T> {
    pub fn name(&self) -> &str {
        self.logic.name()
    }

    /// The implementation currently provided, if any.
    pub fn binding(&self) -> Result<Binding<T>> {
        let inner = &self.logic.inner;
        match inner.registry.resolve_override::<T>(inner.id, &inner.name) {
            Some(instance) => Ok(Binding::Bound(instance?)),
            None => Ok(Binding::Unbound(inner.name.clone())),
        }
    }

    /// Use `member` of the bound implementation.
    ///
    /// Fails with [`Error::NotImplemented`] naming the factory and `member`
    /// when nothing is bound.
    pub fn member<R>(&self, member: &str, f: impl FnOnce(&T) -> R) -> Result<R> {
        match self.binding()? {
            Binding::Bound(instance) => Ok(f(&instance)),
            Binding::Unbound(factory) => {
                tracing::debug!(%factory, member, "abstract member used without an override");
                Err(Error::NotImplemented {
                    factory,
                    member: member.to_string(),
                })
            }
        }
    }

    /// Like [`Facade::member`] for members that can fail themselves.
    pub fn try_member<R>(&self, member: &str, f: impl FnOnce(&T) -> Result<R>) -> Result<R> {
        self.member(member, f)?
    }
}

impl<T> Clone for Facade<T> {
    fn clone(&self) -> Self {
        Self {
            logic: self.logic.clone(),
        }
    }
}

impl<T> fmt::Debug for Facade<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Facade")
            .field("factory", &self.logic.inner.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Greeter: Send + Sync {
        fn greet(&self, who: &str) -> String;
    }

    struct English;

    impl Greeter for English {
        fn greet(&self, who: &str) -> String {
            format!("hello {who}")
        }
    }

    struct French;

    impl Greeter for French {
        fn greet(&self, who: &str) -> String {
            format!("bonjour {who}")
        }
    }

    #[test]
    fn unbound_member_names_factory_and_member() {
        let greeter: AbstractLogic<Arc<dyn Greeter>> =
            AbstractLogic::in_registry(Arc::new(Registry::new()), "Greeter");
        let facade = greeter.get();

        assert!(!facade.binding().unwrap().is_bound());
        match facade.member("greet", |g| g.greet("you")) {
            Err(Error::NotImplemented { factory, member }) => {
                assert_eq!(factory, "Greeter");
                assert_eq!(member, "greet");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn facade_follows_override_changes() {
        let registry = Arc::new(Registry::new());
        let greeter: AbstractLogic<Arc<dyn Greeter>> =
            AbstractLogic::in_registry(registry.clone(), "Greeter");
        let facade = greeter.get();

        registry.provide(&greeter, || Ok(Arc::new(English) as Arc<dyn Greeter>));
        assert_eq!(facade.member("greet", |g| g.greet("Ada")).unwrap(), "hello Ada");

        registry.provide(&greeter, || Ok(Arc::new(French) as Arc<dyn Greeter>));
        assert_eq!(facade.member("greet", |g| g.greet("Ada")).unwrap(), "bonjour Ada");

        registry.clear();
        assert!(facade.member("greet", |g| g.greet("Ada")).is_err());
    }

    #[test]
    fn try_member_flattens_errors() {
        let registry = Arc::new(Registry::new());
        let greeter: AbstractLogic<Arc<dyn Greeter>> =
            AbstractLogic::in_registry(registry.clone(), "Greeter");
        registry.provide(&greeter, || Ok(Arc::new(English) as Arc<dyn Greeter>));

        let result: Result<String> = greeter
            .get()
            .try_member("greet", |_| Err(Error::msg("muted")));
        assert!(matches!(result, Err(Error::Message(m)) if m == "muted"));
    }
}
