//! Per-invocation cancellation for derivations.
//!
//! Every run of a computed derivation receives its own [`AbortSignal`]. When
//! the derivation runs again, the previous run's signal is aborted so any
//! asynchronous work it started can stop, and so a late result from a
//! superseded run is never delivered.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

use crate::error::{Error, Result};

/// A one-shot cancellation flag that can also be awaited.
#[derive(Clone)]
pub struct AbortSignal {
    sender: Arc<watch::Sender<bool>>,
}

impl AbortSignal {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Trigger the signal. Further calls are no-ops.
    pub fn abort(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.sender.borrow()
    }

    /// `Err(Error::Aborted)` once triggered.
    pub fn check(&self) -> Result<()> {
        if self.is_aborted() {
            Err(Error::Aborted)
        } else {
            Ok(())
        }
    }

    /// Completes when the signal is triggered.
    pub async fn aborted(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = receiver.wait_for(|aborted| *aborted).await;
    }

    /// Race `future` against this signal.
    ///
    /// Resolves to `Err(Error::Aborted)` if the signal fires first, or if it
    /// fired before the future's result could be handed out.
    pub fn guard<T, F>(self, future: F) -> impl Future<Output = Result<T>> + Send + 'static
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        async move {
            tokio::select! {
                biased;
                _ = self.aborted() => Err(Error::Aborted),
                result = future => {
                    self.check()?;
                    result
                }
            }
        }
    }
}

impl Default for AbortSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortSignal")
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn abort_is_sticky() {
        let signal = AbortSignal::new();
        assert!(signal.check().is_ok());
        signal.abort();
        signal.abort();
        assert!(signal.is_aborted());
        assert!(matches!(signal.check(), Err(Error::Aborted)));
    }

    #[tokio::test]
    async fn guard_passes_results_through() {
        let signal = AbortSignal::new();
        let result = signal.guard(async { Ok(5) }).await;
        assert_eq!(result.unwrap(), 5);
    }

    #[tokio::test]
    async fn guard_discards_superseded_work() {
        let signal = AbortSignal::new();
        let trigger = signal.clone();

        let guarded = tokio::spawn(signal.guard(async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(1)
        }));
        trigger.abort();

        let result = guarded.await.unwrap();
        assert!(matches!(result, Err(Error::Aborted)));
    }
}
