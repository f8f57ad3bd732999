//! The flat lattice over an arbitrary set of values.
use std::{cmp::Ordering, fmt};

use super::{BoundedLattice, JoinSemiLattice};

/// An element of the flat lattice over `T`.
///
/// Distinct [`FlatValue::Value`]s are incomparable and join to [`FlatValue::Top`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum FlatValue<T> {
    /// No value has been observed.
    Bottom,
    /// Exactly one value has been observed.
    Value(T),
    /// Any value.
    Top,
}

impl<T> FlatValue<T> {
    /// Returns the value if it is known.
    #[must_use]
    pub const fn as_value(&self) -> Option<&T> {
        match self {
            Self::Value(value) => Some(value),
            _ => None,
        }
    }
}

impl<T: PartialEq> PartialOrd for FlatValue<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Bottom, Self::Bottom) | (Self::Top, Self::Top) => Some(Ordering::Equal),
            (Self::Bottom, _) | (_, Self::Top) => Some(Ordering::Less),
            (_, Self::Bottom) | (Self::Top, _) => Some(Ordering::Greater),
            (Self::Value(a), Self::Value(b)) => (a == b).then_some(Ordering::Equal),
        }
    }
}

impl<T: Clone + PartialEq> JoinSemiLattice for FlatValue<T> {
    fn join(self, other: Self) -> Self {
        match (self, other) {
            (Self::Bottom, it) | (it, Self::Bottom) => it,
            (Self::Value(a), Self::Value(b)) if a == b => Self::Value(a),
            _ => Self::Top,
        }
    }
}

impl<T: Clone + PartialEq> BoundedLattice for FlatValue<T> {
    fn bottom() -> Self {
        Self::Bottom
    }

    fn top() -> Self {
        Self::Top
    }
}

impl<T: fmt::Display> fmt::Display for FlatValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bottom => write!(f, "⊥"),
            Self::Value(value) => write!(f, "{value}"),
            Self::Top => write!(f, "⊤"),
        }
    }
}
