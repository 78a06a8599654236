//! Scope Cache
//!
//! A host that may run setup code twice for the same logical unit (a
//! development mode that double-invokes to surface side effects, say) still
//! needs each unit to get exactly one bundle, neither leaked nor destroyed
//! early. The scope cache provides that.
//!
//! # How It Works
//!
//! 1. `get(key, args, factory)` returns the cached entry for `key` if its
//!    args match, otherwise disposes any stale entry and builds a new one.
//!    Signals created while building belong to the entry.
//!
//! 2. A new entry has a reference count of zero, and a disposal check is
//!    deferred to the end of the current turn.
//!
//! 3. The host calls `commit()` once it has accepted the entry and
//!    `uncommit()` when done with it. Reaching zero schedules another check.
//!
//! 4. A check disposes the entry only if its count is still zero when the
//!    check runs. A synchronous uncommit-then-commit in the same turn is
//!    therefore harmless.
//!
//! # Scheduling
//!
//! "End of turn" is pluggable through [`Defer`]. [`TokioDefer`] uses a
//! current-thread tokio runtime and falls back to a [`TurnQueue`] elsewhere.
//! A [`TurnQueue`] runs checks when told to, which is what tests and hosts
//! with their own event loop use.

mod args;
mod cache;
mod defer;
mod entry;

pub use args::{Callback, ScopeArgs};
pub use cache::ScopeCache;
pub use defer::{flush_deferred, global_queue, scheduler_for, Defer, Deferred, TokioDefer, TurnQueue};
pub use entry::ScopeEntry;
