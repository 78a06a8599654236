//! Factories and Ownership
//!
//! A [`Logic`] is a named constructor for a bundle of signals and behavior.
//!
//! - `get()` returns the shared singleton, built lazily on first access.
//! - `create()` builds a fresh, independent instance owned by the caller.
//!   Its [`Owned::dispose`] releases every signal the construction created.
//!
//! An [`AbstractLogic`] has a name and a contract but no body. Its
//! [`Facade`] can be handed out freely and only fails when a member is used
//! while nothing is bound.
//!
//! # Overrides
//!
//! Every factory belongs to a [`Registry`]. [`provide`] redirects a factory
//! to another body (a fake, in tests) and [`clear`] restores a clean slate:
//! owned instances are disposed, overrides dropped, singletons forgotten.
//!
//! ```rust,ignore
//! let api = Logic::new("Api", || Ok(Arc::new(HttpApi::connect()?)));
//!
//! provide(&api, || Ok(Arc::new(FakeApi::default())));
//! run_test(api.get()?);
//! clear();
//! ```

mod abstract_logic;
mod bundle;
mod construction;
mod factory;
mod registry;

pub use abstract_logic::{AbstractLogic, Binding, Facade};
pub use bundle::{Bundle, Owned};
pub use factory::{Factory, Logic};
pub use registry::{LogicId, Registry};

use crate::error::Result;

/// Register an override in the factory's own registry.
pub fn provide<T, L, F>(logic: &L, body: F)
where
    T: Bundle,
    L: Factory<T>,
    F: Fn() -> Result<T> + Send + Sync + 'static,
{
    logic.registry().provide(logic, body);
}

/// Remove the override for `logic`, if any.
pub fn unprovide<T, L: Factory<T>>(logic: &L) -> bool {
    logic.registry().unprovide(logic)
}

/// Clear the global registry. See [`Registry::clear`].
pub fn clear() {
    Registry::global().clear();
}
