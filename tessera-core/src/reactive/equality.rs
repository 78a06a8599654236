//! Equality Policies
//!
//! Every signal carries one [`Equality`] and uses it for exactly one decision:
//! whether a new value differs from the old one. `set` and post-recomputation
//! change detection both go through it, so a signal never notifies for a value
//! its own policy considers unchanged.
//!
//! | Policy        | Compares                                            |
//! |---------------|-----------------------------------------------------|
//! | `deep()`      | `PartialEq` (structural); default for `T: PartialEq` |
//! | `reference()` | pointer identity for shared handles, value for scalars |
//! | `shallow()`   | element-wise identity one level down                 |
//! | `custom(f)`   | a user comparator                                    |
//! | `never()`     | nothing is ever equal; every write notifies          |

use std::collections::HashMap;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

use indexmap::IndexMap;

type Comparator<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

/// An equality predicate used to gate change notification.
pub struct Equality<T: ?Sized> {
    compare: Comparator<T>,
    kind: &'static str,
}

impl<T: ?Sized + 'static> Equality<T> {
    pub fn custom<F>(compare: F) -> Self
    where
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        Self {
            compare: Arc::new(compare),
            kind: "custom",
        }
    }

    pub fn never() -> Self {
        Self {
            compare: Arc::new(|_, _| false),
            kind: "never",
        }
    }

    /// Whether `old` and `new` are the same value under this policy.
    pub fn eq(&self, old: &T, new: &T) -> bool {
        (self.compare)(old, new)
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }
}

impl<T: ?Sized + PartialEq + 'static> Equality<T> {
    pub fn deep() -> Self {
        Self {
            compare: Arc::new(|a, b| a == b),
            kind: "deep",
        }
    }
}

impl<T: ?Sized + Identity + 'static> Equality<T> {
    pub fn reference() -> Self {
        Self {
            compare: Arc::new(|a, b| a.same(b)),
            kind: "reference",
        }
    }
}

impl<T: ?Sized + ShallowEq + 'static> Equality<T> {
    pub fn shallow() -> Self {
        Self {
            compare: Arc::new(|a, b| a.shallow_eq(b)),
            kind: "shallow",
        }
    }
}

impl<T: ?Sized + PartialEq + 'static> Default for Equality<T> {
    fn default() -> Self {
        Self::deep()
    }
}

impl<T: ?Sized> Clone for Equality<T> {
    fn clone(&self) -> Self {
        Self {
            compare: Arc::clone(&self.compare),
            kind: self.kind,
        }
    }
}

impl<T: ?Sized> fmt::Debug for Equality<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Equality").field(&self.kind).finish()
    }
}

/// Reference equality.
///
/// Shared handles compare by pointer; plain scalars have no identity apart
/// from their value and compare by value.
pub trait Identity {
    fn same(&self, other: &Self) -> bool;
}

impl<T: ?Sized> Identity for Arc<T> {
    fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(self, other)
    }
}

impl<T: Identity> Identity for Option<T> {
    fn same(&self, other: &Self) -> bool {
        match (self, other) {
            (Some(a), Some(b)) => a.same(b),
            (None, None) => true,
            _ => false,
        }
    }
}

macro_rules! identity_by_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Identity for $ty {
                fn same(&self, other: &Self) -> bool {
                    self == other
                }
            }
        )*
    };
}

identity_by_value!(
    (), bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64,
    &'static str, String,
);

/// One level of structural comparison, identity below that.
pub trait ShallowEq {
    fn shallow_eq(&self, other: &Self) -> bool;
}

impl<T: Identity> ShallowEq for [T] {
    fn shallow_eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other).all(|(a, b)| a.same(b))
    }
}

impl<T: Identity> ShallowEq for Vec<T> {
    fn shallow_eq(&self, other: &Self) -> bool {
        self.as_slice().shallow_eq(other.as_slice())
    }
}

impl<T: Identity> ShallowEq for Option<T> {
    fn shallow_eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl<K, V, S> ShallowEq for IndexMap<K, V, S>
where
    K: Hash + Eq,
    V: Identity,
    S: BuildHasher,
{
    fn shallow_eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(k, v)| other.get(k).is_some_and(|w| v.same(w)))
    }
}

impl<K, V, S> ShallowEq for HashMap<K, V, S>
where
    K: Hash + Eq,
    V: Identity,
    S: BuildHasher,
{
    fn shallow_eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(k, v)| other.get(k).is_some_and(|w| v.same(w)))
    }
}

impl<A: Identity, B: Identity> ShallowEq for (A, B) {
    fn shallow_eq(&self, other: &Self) -> bool {
        self.0.same(&other.0) && self.1.same(&other.1)
    }
}

impl<A: Identity, B: Identity, C: Identity> ShallowEq for (A, B, C) {
    fn shallow_eq(&self, other: &Self) -> bool {
        self.0.same(&other.0) && self.1.same(&other.1) && self.2.same(&other.2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deep_compares_structure() {
        let eq = Equality::<Vec<i32>>::deep();
        assert!(eq.eq(&vec![1, 2], &vec![1, 2]));
        assert!(!eq.eq(&vec![1, 2], &vec![2, 1]));
    }

    #[test]
    fn reference_compares_pointers() {
        let eq = Equality::<Arc<Vec<i32>>>::reference();
        let a = Arc::new(vec![1]);
        let b = Arc::new(vec![1]);
        assert!(eq.eq(&a, &a.clone()));
        assert!(!eq.eq(&a, &b));
    }

    #[test]
    fn shallow_compares_one_level() {
        let eq = Equality::<Vec<Arc<String>>>::shallow();
        let x = Arc::new("x".to_string());
        let y = Arc::new("x".to_string());

        assert!(eq.eq(&vec![x.clone()], &vec![x.clone()]));
        // Same contents, different allocation.
        assert!(!eq.eq(&vec![x.clone()], &vec![y]));
        assert!(!eq.eq(&vec![x.clone()], &vec![x.clone(), x]));
    }

    #[test]
    fn shallow_maps_ignore_insertion_order() {
        let eq = Equality::<IndexMap<&str, i32>>::shallow();
        let a: IndexMap<_, _> = [("a", 1), ("b", 2)].into_iter().collect();
        let b: IndexMap<_, _> = [("b", 2), ("a", 1)].into_iter().collect();
        assert!(eq.eq(&a, &b));
    }

    #[test]
    fn custom_and_never() {
        let parity = Equality::<i32>::custom(|a, b| a % 2 == b % 2);
        assert!(parity.eq(&1, &3));
        assert!(!parity.eq(&1, &2));

        let never = Equality::<i32>::never();
        assert!(!never.eq(&1, &1));
        assert_eq!(never.kind(), "never");
    }
}
