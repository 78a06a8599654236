//! Tessera Core
//!
//! This crate provides the core runtime for the Tessera reactive-state
//! library. It implements:
//!
//! - Reactive primitives (mutable signals, computed signals, batching)
//! - Ambient dependency tracking through a thread-local dispatcher
//! - Tasks: one synchronous shape for ready, pending and failed values
//! - Factories with singletons, overrides and owned instances
//! - A reference-counted scope cache tolerant of double invocation
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Signals, computeds, dispatcher and propagation runtime
//! - `task`: Promises, tasks and the `wait` combinators
//! - `logic`: Factory registry, singletons and abstract factories
//! - `scope`: Scope cache with deferred disposal
//! - `config`: Runtime configuration
//!
//! # Example
//!
//! ```rust,ignore
//! use tessera_core::reactive::{Computed, Signal};
//!
//! // Create a signal
//! let count = Signal::new(0);
//!
//! // Create a derived value
//! let doubled = {
//!     let count = count.clone();
//!     Computed::new(move || Ok(count.get()? * 2))
//! };
//!
//! // Subscribe to changes
//! let _sub = doubled.on(|v| println!("doubled: {v}"))?;
//!
//! // Update the signal
//! count.set(5)?;
//! // Prints: "doubled: 10"
//! ```

pub mod config;
pub mod error;
pub mod logic;
pub mod reactive;
pub mod scope;
pub mod task;

pub use config::{Config, DeferralMode};
pub use error::{Error, Result};
pub use logic::{AbstractLogic, Bundle, Logic, Owned, Registry};
pub use reactive::{batch, computed_task, untracked, AbortSignal, Computed, Equality, Signal};
pub use scope::{Callback, ScopeCache, ScopeEntry};
pub use task::{wait, Promise, Suspend, Task, TaskStatus};
