//! Shared, identity-bearing futures.

use std::fmt::{self, Debug};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::task::{Context, Poll};

use futures_util::future::{self, BoxFuture, Shared};
use futures_util::FutureExt;
use parking_lot::Mutex;

use super::handle::TaskInner;
use crate::error::{Error, Result};
use crate::reactive::Identity;

/// Unique identifier for a promise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PromiseId(u64);

impl PromiseId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

pub(crate) struct PromiseInner<T> {
    id: PromiseId,
    settled: Arc<OnceLock<Result<T>>>,
    /// The task wrapping this promise, so every `Task::from` of the same
    /// promise yields the same task.
    pub(crate) task: Mutex<Weak<TaskInner<T>>>,
}

/// A cloneable handle to a value that is available now or later.
///
/// All clones share one underlying future and one result. Promises are
/// eager: when created inside a tokio runtime the future is driven in the
/// background even if nobody awaits it, so [`Promise::settled`] eventually
/// reports the outcome.
pub struct Promise<T> {
    pub(crate) inner: Arc<PromiseInner<T>>,
    future: Shared<BoxFuture<'static, Result<T>>>,
}

impl<T> Promise<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let settled = Arc::new(OnceLock::new());
        let slot = Arc::clone(&settled);
        let future = async move {
            let result = future.await;
            let _ = slot.set(result.clone());
            result
        }
        .boxed()
        .shared();

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(future.clone());
        }

        Self::assemble(settled, future)
    }

    /// An already-settled promise.
    pub fn ready(result: Result<T>) -> Self {
        let settled = Arc::new(OnceLock::new());
        let _ = settled.set(result.clone());
        Self::assemble(settled, future::ready(result).boxed().shared())
    }

    pub fn resolved(value: T) -> Self {
        Self::ready(Ok(value))
    }

    pub fn rejected(error: Error) -> Self {
        Self::ready(Err(error))
    }

    fn assemble(
        settled: Arc<OnceLock<Result<T>>>,
        future: Shared<BoxFuture<'static, Result<T>>>,
    ) -> Self {
        Self {
            inner: Arc::new(PromiseInner {
                id: PromiseId::next(),
                settled,
                task: Mutex::new(Weak::new()),
            }),
            future,
        }
    }

    pub fn id(&self) -> PromiseId {
        self.inner.id
    }

    /// The outcome, if the promise has settled.
    pub fn settled(&self) -> Option<Result<T>> {
        self.inner.settled.get().cloned()
    }

    pub fn is_settled(&self) -> bool {
        self.inner.settled.get().is_some()
    }

    /// A promise that settles with `()` when this one settles either way.
    pub fn ignored(&self) -> BoxFuture<'static, ()> {
        self.clone().map(|_| ()).boxed()
    }
}

impl<T> Future for Promise<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.future.poll_unpin(cx)
    }
}

impl<T: Clone> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            future: self.future.clone(),
        }
    }
}

impl<T> Identity for Promise<T> {
    fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> PartialEq for Promise<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: Debug> Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("id", &self.inner.id)
            .field("settled", &self.inner.settled.get())
            .finish()
    }
}
