//! Reactive Primitives
//!
//! This module implements the signal graph: mutable signals, computed
//! signals, and the ambient dispatcher that wires them together.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! while a dispatcher is listening (such as inside a computed derivation), the
//! read is recorded as a dependency. When the value changes under the signal's
//! equality policy, dependents are invalidated and subscribers are notified.
//!
//! ## Computeds
//!
//! A Computed is a derived value that caches its result. It re-evaluates only
//! when one of its dependencies changed, and only when someone asks for the
//! value. Errors raised by the derivation are cached too, and re-raised on
//! every read until a later run succeeds.
//!
//! ## Dispatcher
//!
//! The dispatcher is a thread-local set of hooks consulted on every read,
//! every signal construction and every suspension on a loading task. It is
//! how computeds learn their dependencies and how factories learn which
//! signals they created.
//!
//! # Implementation Notes
//!
//! Propagation is push-pull. A write pushes a cheap "maybe stale" mark
//! through the graph; reads pull, comparing per-signal version counters to
//! decide whether anything has to be recomputed. Computeds with subscribers
//! are refreshed eagerly once the write's batch closes.

mod abort;
mod computed;
pub mod dispatcher;
mod equality;
mod runtime;
mod signal;
mod source;
mod subscriber;

pub use abort::AbortSignal;
pub use computed::{computed_task, Computed, ComputedOptions, Dependencies, Staleness};
pub use dispatcher::{current, untracked, with_dispatcher, Dispatcher, Loadable};
pub use equality::{Equality, Identity, ShallowEq};
pub use runtime::{batch, Runtime};
pub use signal::{Signal, SignalOptions};
pub use source::{Listener, Readable, SignalId, Source};
pub use subscriber::{SubscriberId, Subscription};
