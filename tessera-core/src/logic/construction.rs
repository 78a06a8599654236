//! Cycle detection for factory construction.
//!
//! Each thread keeps the chain of factories it is currently constructing.
//! Entering a factory that is already on the chain is a cycle.

use std::cell::RefCell;

use super::registry::LogicId;
use crate::error::{Error, Result};

thread_local! {
    static CONSTRUCTING: RefCell<Vec<(LogicId, String)>> = const { RefCell::new(Vec::new()) };
}

/// Pops the factory off the chain when dropped.
pub(crate) struct Frame {
    _private: (),
}

impl Drop for Frame {
    fn drop(&mut self) {
        CONSTRUCTING.with(|chain| {
            chain.borrow_mut().pop();
        });
    }
}

/// Push `id` onto this thread's construction chain.
///
/// Fails with [`Error::CircularDependency`] naming the re-entered factory
/// and the full chain, e.g. `A -> B -> A`.
pub(crate) fn enter(id: LogicId, name: &str) -> Result<Frame> {
    CONSTRUCTING.with(|chain| {
        let mut chain = chain.borrow_mut();
        if let Some(start) = chain.iter().position(|(entry, _)| *entry == id) {
            let mut names: Vec<&str> = chain[start..].iter().map(|(_, n)| n.as_str()).collect();
            names.push(name);
            let chain = names.join(" -> ");
            tracing::debug!(factory = name, %chain, "circular factory dependency");
            return Err(Error::CircularDependency {
                factory: name.to_string(),
                chain,
            });
        }
        chain.push((id, name.to_string()));
        Ok(Frame { _private: () })
    })
}

/// Depth of the current construction chain.
pub(crate) fn depth() -> usize {
    CONSTRUCTING.with(|chain| chain.borrow().len())
}
