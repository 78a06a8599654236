//! Error Types
//!
//! Every fallible operation in the crate returns [`Error`]. The type is
//! `Clone` so that a single failure can be stored in a computed signal or a
//! settled promise and handed out on every subsequent read.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised by signals, tasks, factories and the scope cache.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A member of an abstract factory was used before an override was provided.
    #[error("`{factory}.{member}` is not implemented: `{factory}` is abstract and has no override")]
    NotImplemented { factory: String, member: String },

    /// A factory body failed.
    #[error("failed to create `{factory}`: {source}")]
    Creation {
        factory: String,
        #[source]
        source: Arc<Error>,
    },

    /// A factory re-entered itself while it was still being constructed.
    #[error("circular dependency while creating `{factory}`: {chain}")]
    CircularDependency { factory: String, chain: String },

    /// A disposed signal was written, tracked or subscribed to.
    #[error("signal `{signal}` is disposed")]
    Disposed { signal: String },

    /// A computed signal read itself during its own derivation.
    #[error("signal `{signal}` read itself while computing")]
    CircularSignal { signal: String },

    /// A deadline passed before the awaited values were available.
    #[error("timed out after {after:?}")]
    Timeout { after: Duration },

    /// A process-wide singleton was disposed through an ownership path.
    #[error("`{factory}` is a shared singleton and cannot be disposed through an owner")]
    SingletonDisposal { factory: String },

    /// A derivation suspended on a value that is still loading.
    #[error("value is still loading")]
    Pending,

    /// An asynchronous derivation was superseded by a newer run.
    #[error("computation was superseded")]
    Aborted,

    /// The runtime configuration could not be loaded.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Other(Arc<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Build an error from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    /// Wrap any foreign error.
    pub fn other<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Other(Arc::new(error))
    }

    /// Wrap a factory failure with the factory's name.
    ///
    /// Cycle errors pass through untouched so the originating factory
    /// stays visible at the top of the error.
    pub(crate) fn creation(factory: &str, cause: Error) -> Self {
        match cause {
            Self::CircularDependency { .. } => cause,
            cause => Self::Creation {
                factory: factory.to_string(),
                source: Arc::new(cause),
            },
        }
    }

    pub fn is_circular(&self) -> bool {
        matches!(self, Self::CircularDependency { .. })
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Follow `Creation` wrappers down to the original failure.
    pub fn root_cause(&self) -> &Error {
        match self {
            Self::Creation { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Self::Config(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creation_wraps_ordinary_errors() {
        let err = Error::creation("Counter", Error::msg("boom"));
        assert!(matches!(&err, Error::Creation { factory, .. } if factory == "Counter"));
        assert_eq!(err.to_string(), "failed to create `Counter`: boom");
        assert!(matches!(err.root_cause(), Error::Message(m) if m == "boom"));
    }

    #[test]
    fn creation_passes_cycles_through() {
        let cycle = Error::CircularDependency {
            factory: "A".into(),
            chain: "A -> B -> A".into(),
        };
        let err = Error::creation("B", cycle);
        assert!(err.is_circular());
        assert!(err.to_string().contains("`A`"));
    }

    #[test]
    fn not_implemented_names_factory_and_member() {
        let err = Error::NotImplemented {
            factory: "Storage".into(),
            member: "load".into(),
        };
        let text = err.to_string();
        assert!(text.contains("Storage.load"));
    }
}
