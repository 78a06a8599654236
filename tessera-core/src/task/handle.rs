//! Tri-state results.
//!
//! A [`Task`] is a read-only view of a [`Promise`]: loading until the
//! promise settles, then success or error. Tasks carry no state of their own
//! beyond the promise, so normalizing the same promise twice yields the same
//! task and a task is always consistent with its promise.

use std::fmt::{self, Debug};
use std::future::Future;
use std::sync::Arc;

use super::promise::Promise;
use crate::error::{Error, Result};
use crate::reactive::Identity;

/// Where a task is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Loading,
    Success,
    Error,
}

pub(crate) struct TaskInner<T> {
    promise: Promise<T>,
}

/// An immutable pending/success/error wrapper around a promise.
///
/// Two tasks are equal only if they are the same task.
pub struct Task<T> {
    inner: Arc<TaskInner<T>>,
}

impl<T> Task<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Normalize a task, promise or result into a task.
    ///
    /// Tasks are returned unchanged and promises map to their one task.
    pub fn from(source: impl IntoTask<T>) -> Self {
        source.into_task()
    }

    pub fn success(value: T) -> Self {
        Self::loading(Promise::resolved(value))
    }

    pub fn error(error: Error) -> Self {
        Self::loading(Promise::rejected(error))
    }

    /// The task tracking `promise`. Loading until the promise settles.
    pub fn loading(promise: Promise<T>) -> Self {
        let mut slot = promise.inner.task.lock();
        if let Some(inner) = slot.upgrade() {
            return Self { inner };
        }
        let inner = Arc::new(TaskInner {
            promise: promise.clone(),
        });
        *slot = Arc::downgrade(&inner);
        Self { inner }
    }

    pub fn from_future<F>(future: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        Self::loading(Promise::new(future))
    }

    pub fn status(&self) -> TaskStatus {
        match self.inner.promise.settled() {
            None => TaskStatus::Loading,
            Some(Ok(_)) => TaskStatus::Success,
            Some(Err(_)) => TaskStatus::Error,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.status() == TaskStatus::Loading
    }

    pub fn is_success(&self) -> bool {
        self.status() == TaskStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.status() == TaskStatus::Error
    }

    pub fn value(&self) -> Option<T> {
        self.inner.promise.settled().and_then(Result::ok)
    }

    pub fn error_value(&self) -> Option<Error> {
        self.inner.promise.settled().and_then(Result::err)
    }

    pub fn promise(&self) -> Promise<T> {
        self.inner.promise.clone()
    }
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> PartialEq for Task<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Identity for Task<T> {
    fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Debug for Task<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Task");
        debug.field("status", &self.status());
        match self.inner.promise.settled() {
            Some(Ok(value)) => debug.field("value", &value),
            Some(Err(error)) => debug.field("error", &error),
            None => &mut debug,
        };
        debug.finish()
    }
}

/// Anything [`Task::from`] accepts.
pub trait IntoTask<T> {
    fn into_task(self) -> Task<T>;
}

impl<T> IntoTask<T> for Task<T> {
    fn into_task(self) -> Task<T> {
        self
    }
}

impl<T> IntoTask<T> for Promise<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn into_task(self) -> Task<T> {
        Task::loading(self)
    }
}

impl<T> IntoTask<T> for Result<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn into_task(self) -> Task<T> {
        match self {
            Ok(value) => Task::success(value),
            Err(error) => Task::error(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizing_twice_is_idempotent() {
        let once = Task::from(Ok::<_, Error>(5));
        let twice = Task::from(once.clone());
        assert_eq!(once, twice);
        assert_eq!(twice.status(), TaskStatus::Success);
        assert_eq!(twice.value(), Some(5));

        let failed: Task<i32> = Task::from(Err(Error::msg("bad")));
        let again = Task::from(failed.clone());
        assert_eq!(again.status(), TaskStatus::Error);
        assert!(again.error_value().is_some());
    }

    #[test]
    fn one_task_per_promise() {
        let promise = Promise::resolved("x");
        let a = Task::from(promise.clone());
        let b = Task::loading(promise);
        assert!(a.same(&b));
    }

    #[test]
    fn distinct_promises_give_distinct_tasks() {
        assert_ne!(Task::success(1), Task::success(1));
    }

    #[tokio::test]
    async fn loading_task_flips_when_future_settles() {
        let (tx, rx) = tokio::sync::oneshot::channel::<i32>();
        let task = Task::from_future(async move { rx.await.map_err(Error::other) });

        assert!(task.is_loading());
        assert_eq!(task.value(), None);

        tx.send(9).unwrap();
        assert_eq!(task.promise().await.unwrap(), 9);
        assert!(task.is_success());
        assert_eq!(task.value(), Some(9));
    }

    #[tokio::test]
    async fn failed_future_yields_error_task() {
        let task: Task<()> = Task::from_future(async { Err(Error::msg("offline")) });
        let _ = task.promise().await;
        assert!(task.is_error());
        assert!(matches!(task.error_value(), Some(Error::Message(m)) if m == "offline"));
    }
}
