//! Tasks and Waiting
//!
//! Asynchronous values come in many forms: a value already at hand, a future
//! still running, a failure. This module gives them one shape.
//!
//! # Concepts
//!
//! ## Promises
//!
//! A [`Promise`] is a shared future with identity. Every clone observes the
//! same single result, and the result can be peeked without awaiting.
//!
//! ## Tasks
//!
//! A [`Task`] is the synchronous view of a promise: `Loading`, `Success` or
//! `Error`. [`Task::from`] normalizes anything task-like, and normalizing
//! the same promise always yields the same task.
//!
//! ## Waiting
//!
//! [`wait`] resolves a task, or a `Vec`, keyed record or tuple of them, to
//! plain values in one step, or hands back exactly one reason it cannot.
//! This lets N-ary async coordination read like a single synchronous read.

mod handle;
mod promise;
mod wait;

pub use handle::{IntoTask, Task, TaskStatus};
pub use promise::{Promise, PromiseId};
pub use wait::{delay, timeout, timeout_with, wait, wait_async, Awaitable, Probe, Suspend};
