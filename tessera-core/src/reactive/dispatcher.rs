//! Dispatcher
//!
//! The dispatcher is the ambient hook set consulted whenever a signal is read,
//! a signal is created, or a pending task is observed. Computed signals,
//! factories and the scope cache install their own hooks for the duration of a
//! call and everything underneath reports to them without explicit parameter
//! threading.
//!
//! # Implementation
//!
//! Each thread holds its current [`Dispatcher`] in a thread-local slot.
//! [`with_dispatcher`] merges an override on top of the current hooks, runs the
//! closure, and restores the previous hooks from a drop guard, so the slot is
//! restored on early return, on error and on panic alike. Nested calls compose:
//! an inner override only replaces the hooks it sets.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use futures_util::future::BoxFuture;

use super::source::Source;

/// A future that completes once some pending value has settled.
pub type Loadable = BoxFuture<'static, ()>;

type SourceHook = Rc<dyn Fn(&Arc<dyn Source>)>;
type LoadableHook = Rc<dyn Fn(Loadable)>;

thread_local! {
    static CURRENT: RefCell<Dispatcher> = RefCell::new(Dispatcher::default());
}

/// A set of tracking hooks. Unset hooks are no-ops.
#[derive(Clone, Default)]
pub struct Dispatcher {
    track_signal: Option<SourceHook>,
    track_loadable: Option<LoadableHook>,
    track_created: Option<SourceHook>,
}

impl Dispatcher {
    /// An empty override: merging it changes nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Called for every signal read while this dispatcher is current.
    pub fn on_track_signal(mut self, hook: impl Fn(&Arc<dyn Source>) + 'static) -> Self {
        self.track_signal = Some(Rc::new(hook));
        self
    }

    /// Called for every pending task observed by `wait`.
    pub fn on_track_loadable(mut self, hook: impl Fn(Loadable) + 'static) -> Self {
        self.track_loadable = Some(Rc::new(hook));
        self
    }

    /// Called for every signal constructed while this dispatcher is current.
    pub fn on_track_created(mut self, hook: impl Fn(&Arc<dyn Source>) + 'static) -> Self {
        self.track_created = Some(Rc::new(hook));
        self
    }

    /// Whether reads are currently being recorded by someone.
    pub fn is_tracking(&self) -> bool {
        self.track_signal.is_some()
    }

    pub fn track_signal(&self, source: &Arc<dyn Source>) {
        if let Some(hook) = &self.track_signal {
            hook(source);
        }
    }

    pub fn track_loadable(&self, loadable: Loadable) {
        if let Some(hook) = &self.track_loadable {
            hook(loadable);
        }
    }

    pub fn track_created(&self, source: &Arc<dyn Source>) {
        if let Some(hook) = &self.track_created {
            hook(source);
        }
    }

    fn layered(&self, overrides: Dispatcher) -> Dispatcher {
        Dispatcher {
            track_signal: overrides.track_signal.or_else(|| self.track_signal.clone()),
            track_loadable: overrides
                .track_loadable
                .or_else(|| self.track_loadable.clone()),
            track_created: overrides.track_created.or_else(|| self.track_created.clone()),
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("track_signal", &self.track_signal.is_some())
            .field("track_loadable", &self.track_loadable.is_some())
            .field("track_created", &self.track_created.is_some())
            .finish()
    }
}

/// Restores the previous dispatcher when dropped.
struct DispatcherGuard {
    previous: Option<Dispatcher>,
}

impl Drop for DispatcherGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            CURRENT.with(|slot| *slot.borrow_mut() = previous);
        }
    }
}

/// The hooks active on this thread.
pub fn current() -> Dispatcher {
    CURRENT.with(|slot| slot.borrow().clone())
}

/// Run `f` with `overrides` layered on top of the current hooks.
pub fn with_dispatcher<R>(overrides: Dispatcher, f: impl FnOnce() -> R) -> R {
    let merged = current().layered(overrides);
    let previous = CURRENT.with(|slot| std::mem::replace(&mut *slot.borrow_mut(), merged));
    let _guard = DispatcherGuard {
        previous: Some(previous),
    };
    f()
}

/// Run `f` without recording signal reads.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    with_dispatcher(Dispatcher::new().on_track_signal(|_| {}), f)
}

/// Report a read. The source handle is only built when someone listens.
pub(crate) fn report_read(source: impl FnOnce() -> Arc<dyn Source>) {
    let dispatcher = current();
    if dispatcher.is_tracking() {
        dispatcher.track_signal(&source());
    }
}

pub(crate) fn report_created(source: &Arc<dyn Source>) {
    current().track_created(source);
}

pub(crate) fn report_loadable(loadable: Loadable) {
    current().track_loadable(loadable);
}

/// Run a construction untracked, collecting every signal it creates.
///
/// Signals created here are not reported to any outer creation hook.
pub(crate) fn capture_created<R>(f: impl FnOnce() -> R) -> (R, Vec<Arc<dyn Source>>) {
    let created: Rc<RefCell<Vec<Arc<dyn Source>>>> = Rc::default();
    let sink = created.clone();
    let hooks = Dispatcher::new()
        .on_track_signal(|_| {})
        .on_track_created(move |source| sink.borrow_mut().push(source.clone()));
    let result = with_dispatcher(hooks, f);
    let created = created.take();
    (result, created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Signal;
    use std::cell::Cell;

    #[test]
    fn default_dispatcher_is_inert() {
        let dispatcher = current();
        assert!(!dispatcher.is_tracking());
    }

    #[test]
    fn with_dispatcher_records_reads_and_restores() {
        let signal = Signal::new(1);
        let seen = Rc::new(Cell::new(0));
        let counter = seen.clone();

        with_dispatcher(
            Dispatcher::new().on_track_signal(move |_| counter.set(counter.get() + 1)),
            || {
                let _ = signal.get();
                let _ = signal.get();
            },
        );

        assert_eq!(seen.get(), 2);
        assert!(!current().is_tracking());
    }

    #[test]
    fn nested_overrides_layer_and_unwind() {
        let outer = Rc::new(Cell::new(0));
        let inner = Rc::new(Cell::new(0));
        let created = Rc::new(Cell::new(0));
        let signal = Signal::new(0);

        let (o, i, c) = (outer.clone(), inner.clone(), created.clone());
        with_dispatcher(
            Dispatcher::new()
                .on_track_signal(move |_| o.set(o.get() + 1))
                .on_track_created(move |_| c.set(c.get() + 1)),
            || {
                let _ = signal.get();
                with_dispatcher(
                    Dispatcher::new().on_track_signal(move |_| i.set(i.get() + 1)),
                    || {
                        let _ = signal.get();
                        // The outer creation hook is still in effect.
                        let _fresh = Signal::new(1);
                    },
                );
                let _ = signal.get();
            },
        );

        assert_eq!(outer.get(), 2);
        assert_eq!(inner.get(), 1);
        assert_eq!(created.get(), 1);
    }

    #[test]
    fn dispatcher_is_restored_after_panic() {
        let result = std::panic::catch_unwind(|| {
            with_dispatcher(Dispatcher::new().on_track_signal(|_| {}), || {
                panic!("derivation failed");
            })
        });
        assert!(result.is_err());
        assert!(!current().is_tracking());
    }

    #[test]
    fn capture_created_isolates_constructions() {
        let outer = Rc::new(Cell::new(0));
        let counter = outer.clone();

        with_dispatcher(
            Dispatcher::new().on_track_created(move |_| counter.set(counter.get() + 1)),
            || {
                let (value, created) = capture_created(|| {
                    let a = Signal::new(1);
                    let _b = Signal::new(2);
                    a.peek()
                });
                assert_eq!(value, 1);
                assert_eq!(created.len(), 2);
            },
        );
        assert_eq!(outer.get(), 0);
    }

    #[test]
    fn untracked_hides_reads() {
        let seen = Rc::new(Cell::new(0));
        let counter = seen.clone();
        let signal = Signal::new(3);

        with_dispatcher(
            Dispatcher::new().on_track_signal(move |_| counter.set(counter.get() + 1)),
            || {
                untracked(|| {
                    let _ = signal.get();
                });
            },
        );
        assert_eq!(seen.get(), 0);
    }
}
