//! Abstract value domains.
//!
//! Every analysis value type comes with an [`AbstractValueDomain`] describing its lattice:
//!
//! - [`bottom`](AbstractValueDomain::bottom) is the least element,
//! - [`unknown_or_may_be_value`](AbstractValueDomain::unknown_or_may_be_value) is the value
//!   of anything the analysis knows nothing about,
//! - [`merge`](AbstractValueDomain::merge) computes an upper bound of two values, and
//! - [`compare`](AbstractValueDomain::compare) orders two values.
//!
//! # Monotonicity
//!
//! The fixed-point driver relies on `merge(a, b)` being greater than or equal to both `a`
//! and `b` according to `compare`. A domain violating this may not terminate, so the
//! engine checks it with debug assertions at every merge it performs.
use std::{cmp::Ordering, fmt, marker::PhantomData};

pub mod flat;
pub mod map;
pub mod predicated;
pub mod set;

pub use flat::FlatValue;
pub use map::MapAbstractDomain;
pub use predicated::PredicatedAnalysisDataDomain;
pub use set::SetAbstractDomain;

/// The lattice operations of an analysis value type.
pub trait AbstractValueDomain<V> {
    /// Returns the value representing a lack of knowledge.
    fn unknown_or_may_be_value(&self) -> V;

    /// Returns the least element.
    fn bottom(&self) -> V;

    /// Computes an upper bound of two values.
    ///
    /// The operands are borrowed; implementations return a fresh value. Callers that own
    /// both operands and no longer need them may use [`merge_owned`](Self::merge_owned).
    fn merge(&self, value1: &V, value2: &V) -> V;

    /// Computes an upper bound of two owned values.
    fn merge_owned(&self, value1: V, value2: V) -> V {
        self.merge(&value1, &value2)
    }

    /// Orders `old` relative to `new`.
    ///
    /// Returns [`Ordering::Less`] if `old` is strictly more precise than `new`,
    /// [`Ordering::Equal`] if they are equal, and [`Ordering::Greater`] if `old` is less
    /// precise than `new` or the two are incomparable.
    fn compare(&self, old: &V, new: &V) -> Ordering;
}

impl<V, D: AbstractValueDomain<V> + ?Sized> AbstractValueDomain<V> for &D {
    fn unknown_or_may_be_value(&self) -> V {
        (**self).unknown_or_may_be_value()
    }

    fn bottom(&self) -> V {
        (**self).bottom()
    }

    fn merge(&self, value1: &V, value2: &V) -> V {
        (**self).merge(value1, value2)
    }

    fn merge_owned(&self, value1: V, value2: V) -> V {
        (**self).merge_owned(value1, value2)
    }

    fn compare(&self, old: &V, new: &V) -> Ordering {
        (**self).compare(old, new)
    }
}

/// Asserts in debug builds that `merged` is an upper bound of its inputs.
///
/// # Panics
/// Panics in debug builds if the domain is not monotonic for these values.
pub fn debug_assert_monotonic<V, D>(domain: &D, inputs: [&V; 2], merged: &V)
where
    V: fmt::Debug,
    D: AbstractValueDomain<V> + ?Sized,
{
    if cfg!(debug_assertions) {
        for input in inputs {
            assert!(
                domain.compare(input, merged) != Ordering::Greater,
                "Non-monotonic merge: {input:?} is not below the merged value {merged:?}"
            );
        }
    }
}

/// Merges two values and checks the result in debug builds.
pub fn merge_checked<V, D>(domain: &D, value1: &V, value2: &V) -> V
where
    V: fmt::Debug,
    D: AbstractValueDomain<V> + ?Sized,
{
    let merged = domain.merge(value1, value2);
    debug_assert_monotonic(domain, [value1, value2], &merged);
    merged
}

/// Merges a sequence of values, returning `None` if it is empty.
pub fn merge_all<V, D, I>(domain: &D, values: I) -> Option<V>
where
    D: AbstractValueDomain<V> + ?Sized,
    I: IntoIterator<Item = V>,
{
    values
        .into_iter()
        .reduce(|merged, value| domain.merge_owned(merged, value))
}

/// A join semi-lattice.
///
/// # Laws
///
/// Implementations must satisfy:
///
/// - **Idempotency**: `a.clone().join(a) == a`
/// - **Commutativity**: `a.join(b) == b.join(a)`
/// - **Associativity**: `a.join(b).join(c) == a.join(b.join(c))`
///
/// The [`PartialOrd`] implementation is the lattice ordering: `a <= a.join(b)`.
pub trait JoinSemiLattice: Clone + PartialOrd {
    /// Computes the least upper bound of two elements.
    ///
    /// Both operands are consumed so that implementations can reuse allocations.
    #[must_use]
    fn join(self, other: Self) -> Self;
}

/// A join semi-lattice with a least and a greatest element.
pub trait BoundedLattice: JoinSemiLattice {
    /// The least element.
    fn bottom() -> Self;

    /// The greatest element.
    fn top() -> Self;
}

/// Lifts `Option<T>` over a lattice, with `None` below every element.
impl<T: JoinSemiLattice> JoinSemiLattice for Option<T> {
    fn join(self, other: Self) -> Self {
        match (self, other) {
            (None, None) => None,
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (Some(a), Some(b)) => Some(a.join(b)),
        }
    }
}

/// The [`AbstractValueDomain`] of a [`BoundedLattice`].
///
/// The top element stands for the unknown value.
pub struct LatticeDomain<V>(PhantomData<fn() -> V>);

impl<V> LatticeDomain<V> {
    /// Creates the domain.
    #[must_use]
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<V> Default for LatticeDomain<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Clone for LatticeDomain<V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<V> Copy for LatticeDomain<V> {}

impl<V> fmt::Debug for LatticeDomain<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LatticeDomain")
    }
}

impl<V: BoundedLattice> AbstractValueDomain<V> for LatticeDomain<V> {
    fn unknown_or_may_be_value(&self) -> V {
        V::top()
    }

    fn bottom(&self) -> V {
        V::bottom()
    }

    fn merge(&self, value1: &V, value2: &V) -> V {
        value1.clone().join(value2.clone())
    }

    fn merge_owned(&self, value1: V, value2: V) -> V {
        value1.join(value2)
    }

    fn compare(&self, old: &V, new: &V) -> Ordering {
        match old.partial_cmp(new) {
            Some(Ordering::Less) => Ordering::Less,
            Some(Ordering::Equal) => Ordering::Equal,
            Some(Ordering::Greater) | None => Ordering::Greater,
        }
    }
}
