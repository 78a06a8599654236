//! Argument comparison for the scope cache.
//!
//! A cache hit requires the stored arguments to match the new ones. Plain
//! data matches by value and shared handles by identity. Callbacks are the
//! exception: hosts rebuild closures on every render, so a [`Callback`]
//! always matches and instead adopts the newest implementation, which the
//! cached bundle then calls through its stable handle.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

/// Arguments a scope entry is keyed on.
pub trait ScopeArgs: Clone + Send + Sync + 'static {
    /// Whether `self` (stored) and `other` (newly supplied) are the same.
    fn matches(&self, other: &Self) -> bool;

    /// Carry over what must follow the newest arguments after a match.
    fn adopt(&self, _newer: &Self) {}
}

macro_rules! value_args {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ScopeArgs for $ty {
                fn matches(&self, other: &Self) -> bool {
                    self == other
                }
            }
        )*
    };
}

value_args!(
    (),
    bool,
    char,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    f32,
    f64,
    String,
    &'static str,
);

impl<T: ScopeArgs> ScopeArgs for Option<T> {
    fn matches(&self, other: &Self) -> bool {
        match (self, other) {
            (Some(a), Some(b)) => a.matches(b),
            (None, None) => true,
            _ => false,
        }
    }

    fn adopt(&self, newer: &Self) {
        if let (Some(a), Some(b)) = (self, newer) {
            a.adopt(b);
        }
    }
}

impl<T: ScopeArgs> ScopeArgs for Vec<T> {
    fn matches(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other).all(|(a, b)| a.matches(b))
    }

    fn adopt(&self, newer: &Self) {
        for (a, b) in self.iter().zip(newer) {
            a.adopt(b);
        }
    }
}

/// Shared handles match by identity.
impl<T: ?Sized + Send + Sync + 'static> ScopeArgs for Arc<T> {
    fn matches(&self, other: &Self) -> bool {
        Arc::ptr_eq(self, other)
    }
}

macro_rules! tuple_args {
    ($($name:ident : $idx:tt),+) => {
        impl<$($name: ScopeArgs),+> ScopeArgs for ($($name,)+) {
            fn matches(&self, other: &Self) -> bool {
                $(self.$idx.matches(&other.$idx))&&+
            }

            fn adopt(&self, newer: &Self) {
                $(self.$idx.adopt(&newer.$idx);)+
            }
        }
    };
}

tuple_args!(A: 0);
tuple_args!(A: 0, B: 1);
tuple_args!(A: 0, B: 1, C: 2);
tuple_args!(A: 0, B: 1, C: 2, D: 3);

type Handler<A, R> = Arc<dyn Fn(A) -> R + Send + Sync>;

/// A stable handle to a function that may be replaced.
///
/// Clones share the handle: after [`ScopeArgs::adopt`], every clone calls
/// the newest implementation.
pub struct Callback<A, R = ()> {
    current: Arc<RwLock<Handler<A, R>>>,
}

impl<A, R> Callback<A, R>
where
    A: 'static,
    R: 'static,
{
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        Self {
            current: Arc::new(RwLock::new(Arc::new(f))),
        }
    }

    /// Call the newest implementation.
    pub fn call(&self, arg: A) -> R {
        let handler = Arc::clone(&self.current.read());
        handler(arg)
    }

    /// Swap in a new implementation.
    pub fn replace<F>(&self, f: F)
    where
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        *self.current.write() = Arc::new(f);
    }
}

impl<A, R> Clone for Callback<A, R> {
    fn clone(&self) -> Self {
        Self {
            current: Arc::clone(&self.current),
        }
    }
}

impl<A: 'static, R: 'static> ScopeArgs for Callback<A, R> {
    fn matches(&self, _other: &Self) -> bool {
        true
    }

    fn adopt(&self, newer: &Self) {
        if Arc::ptr_eq(&self.current, &newer.current) {
            return;
        }
        let latest = Arc::clone(&newer.current.read());
        *self.current.write() = latest;
    }
}

impl<A, R> fmt::Debug for Callback<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback").finish_non_exhaustive()
    }
}
