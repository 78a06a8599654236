//! Synchronous resolution of tasks.
//!
//! [`wait`] turns any shape of awaitables (one task, a `Vec`, a keyed
//! record, a tuple) into either all of their values, in the same shape, or
//! a single reason it cannot: the first error in input order, or one
//! combined promise that settles once every loading input has settled.
//! Nothing is ever partially applied.
//!
//! ```rust,ignore
//! let (user, prefs) = match wait((user_task.clone(), prefs_task.clone())) {
//!     Ok(values) => values,
//!     Err(Suspend::Pending(promise)) => { promise.await.ok(); return retry() }
//!     Err(Suspend::Failed(error)) => return Err(error),
//! };
//! ```
//!
//! Inside a computed derivation the `?` operator is enough: the pending
//! promise is reported to the computed, which re-runs once it settles.

use std::fmt;
use std::hash::Hash;
use std::time::Duration;

use futures_util::future::{self, BoxFuture};
use futures_util::FutureExt;
use indexmap::IndexMap;

use super::handle::{Task, TaskStatus};
use super::promise::Promise;
use crate::error::{Error, Result};
use crate::reactive::dispatcher;

/// Why [`wait`] could not return values.
#[derive(Clone)]
pub enum Suspend {
    /// At least one input is still loading. Settles when all inputs have.
    Pending(Promise<()>),
    /// The first failed input, in input order.
    Failed(Error),
}

impl Suspend {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }
}

impl From<Suspend> for Error {
    fn from(suspend: Suspend) -> Self {
        match suspend {
            Suspend::Pending(_) => Error::Pending,
            Suspend::Failed(error) => error,
        }
    }
}

impl fmt::Debug for Suspend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending(promise) => f.debug_tuple("Pending").field(&promise.id()).finish(),
            Self::Failed(error) => f.debug_tuple("Failed").field(error).finish(),
        }
    }
}

/// What one pass over the inputs found.
#[derive(Default)]
pub struct Probe {
    pending: Vec<BoxFuture<'static, ()>>,
    error: Option<Error>,
}

impl Probe {
    pub fn pending(&mut self, settled: BoxFuture<'static, ()>) {
        self.pending.push(settled);
    }

    /// Record a failure. Only the first one is kept.
    pub fn failed(&mut self, error: Error) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }
}

/// A shape of values that may still be loading.
pub trait Awaitable {
    type Output;

    /// Record every loading input and the first failure, in input order.
    fn probe(&self, probe: &mut Probe);

    /// The values. Only meaningful once `probe` found nothing.
    fn collect(&self) -> Result<Self::Output>;
}

impl<T> Awaitable for Task<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Output = T;

    fn probe(&self, probe: &mut Probe) {
        match self.status() {
            TaskStatus::Loading => probe.pending(self.promise().ignored()),
            TaskStatus::Error => {
                if let Some(error) = self.error_value() {
                    probe.failed(error);
                }
            }
            TaskStatus::Success => {}
        }
    }

    fn collect(&self) -> Result<T> {
        match self.promise().settled() {
            Some(result) => result,
            None => Err(Error::Pending),
        }
    }
}

impl<T> Awaitable for Promise<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Output = T;

    fn probe(&self, probe: &mut Probe) {
        match self.settled() {
            None => probe.pending(self.ignored()),
            Some(Err(error)) => probe.failed(error),
            Some(Ok(_)) => {}
        }
    }

    fn collect(&self) -> Result<T> {
        self.settled().unwrap_or(Err(Error::Pending))
    }
}

impl<A: Awaitable> Awaitable for &A {
    type Output = A::Output;

    fn probe(&self, probe: &mut Probe) {
        (**self).probe(probe);
    }

    fn collect(&self) -> Result<Self::Output> {
        (**self).collect()
    }
}

impl<A: Awaitable> Awaitable for Vec<A> {
    type Output = Vec<A::Output>;

    fn probe(&self, probe: &mut Probe) {
        for item in self {
            item.probe(probe);
        }
    }

    fn collect(&self) -> Result<Self::Output> {
        self.iter().map(Awaitable::collect).collect()
    }
}

impl<K, A> Awaitable for IndexMap<K, A>
where
    K: Clone + Hash + Eq,
    A: Awaitable,
{
    type Output = IndexMap<K, A::Output>;

    fn probe(&self, probe: &mut Probe) {
        for item in self.values() {
            item.probe(probe);
        }
    }

    fn collect(&self) -> Result<Self::Output> {
        self.iter()
            .map(|(key, item)| Ok((key.clone(), item.collect()?)))
            .collect()
    }
}

macro_rules! tuple_awaitable {
    ($($name:ident : $idx:tt),+) => {
        impl<$($name: Awaitable),+> Awaitable for ($($name,)+) {
            type Output = ($($name::Output,)+);

            fn probe(&self, probe: &mut Probe) {
                $(self.$idx.probe(probe);)+
            }

            fn collect(&self) -> Result<Self::Output> {
                Ok(($(self.$idx.collect()?,)+))
            }
        }
    };
}

tuple_awaitable!(A: 0);
tuple_awaitable!(A: 0, B: 1);
tuple_awaitable!(A: 0, B: 1, C: 2);
tuple_awaitable!(A: 0, B: 1, C: 2, D: 3);

/// One pass over the inputs, without reporting anything.
fn resolve<A: Awaitable>(awaitable: &A) -> Result<A::Output, Suspend> {
    let mut probe = Probe::default();
    awaitable.probe(&mut probe);

    if let Some(error) = probe.error {
        return Err(Suspend::Failed(error));
    }
    if !probe.pending.is_empty() {
        let waiting = probe.pending.len();
        let combined = Promise::new(future::join_all(probe.pending).map(|_| Ok(())));
        tracing::trace!(waiting, "wait suspended");
        return Err(Suspend::Pending(combined));
    }
    awaitable.collect().map_err(Suspend::Failed)
}

/// Resolve `awaitable` now.
///
/// Returns the values in the input's shape, or [`Suspend::Failed`] with the
/// first error in input order, or [`Suspend::Pending`] with a promise that
/// settles once every loading input has settled. A known failure wins over
/// inputs that are still loading.
///
/// A suspension is reported to the current dispatcher, so a computed that
/// waits re-runs when the promise settles.
pub fn wait<A: Awaitable>(awaitable: A) -> Result<A::Output, Suspend> {
    let result = resolve(&awaitable);
    if let Err(Suspend::Pending(promise)) = &result {
        dispatcher::report_loadable(promise.ignored());
    }
    result
}

/// Await every input, then resolve like [`wait`].
pub async fn wait_async<A: Awaitable>(awaitable: A) -> Result<A::Output> {
    loop {
        match resolve(&awaitable) {
            Ok(values) => return Ok(values),
            Err(Suspend::Failed(error)) => return Err(error),
            Err(Suspend::Pending(promise)) => {
                let _ = promise.await;
            }
        }
    }
}

/// [`wait_async`] with a deadline. Fails with [`Error::Timeout`].
pub async fn timeout<A: Awaitable>(awaitable: A, after: Duration) -> Result<A::Output> {
    timeout_with(awaitable, after, || Error::Timeout { after }).await
}

/// [`wait_async`] with a deadline and a custom timeout error.
pub async fn timeout_with<A, F>(awaitable: A, after: Duration, on_timeout: F) -> Result<A::Output>
where
    A: Awaitable,
    F: FnOnce() -> Error,
{
    match tokio::time::timeout(after, wait_async(awaitable)).await {
        Ok(result) => result,
        Err(_) => {
            tracing::debug!(?after, "wait timed out");
            Err(on_timeout())
        }
    }
}

/// Complete after `duration`. Carries no value.
pub async fn delay(duration: Duration) {
    tokio::time::sleep(duration).await;
}
