//! Points-to values: the set of locations a reference may denote.
use std::{cmp::Ordering, collections::BTreeSet, fmt};

use itertools::Itertools;

use super::location::AbstractLocation;
use crate::analysis::domain::AbstractValueDomain;

/// Whether a reference may be null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum NullAbstractValue {
    /// The reference lies on an infeasible path.
    #[display("invalid")]
    Invalid,
    /// The reference is null.
    #[display("null")]
    Null,
    /// The reference is not null.
    #[display("not-null")]
    NotNull,
    /// The reference may or may not be null.
    #[display("maybe-null")]
    MaybeNull,
}

impl NullAbstractValue {
    /// Merges two null states.
    #[must_use]
    pub const fn merge(self, other: Self) -> Self {
        match (self, other) {
            (Self::Invalid, it) | (it, Self::Invalid) => it,
            (Self::Null, Self::Null) => Self::Null,
            (Self::NotNull, Self::NotNull) => Self::NotNull,
            _ => Self::MaybeNull,
        }
    }

    const fn rank(self) -> u8 {
        match self {
            Self::Invalid => 0,
            Self::Null | Self::NotNull => 1,
            Self::MaybeNull => 2,
        }
    }

    /// Orders two null states in the lattice.
    #[must_use]
    pub fn compare(self, new: Self) -> Ordering {
        if self == new {
            Ordering::Equal
        } else if self.rank() < new.rank() {
            Ordering::Less
        } else {
            Ordering::Greater
        }
    }
}

/// The locations a reference may denote.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PointsToAbstractValue {
    /// Nothing is known yet.
    Undefined,
    /// The reference lies on an infeasible path.
    Invalid,
    /// The reference denotes one of the given locations.
    Known {
        /// The locations.
        locations: BTreeSet<AbstractLocation>,
        /// Whether the reference may be null.
        null_state: NullAbstractValue,
    },
    /// The reference may denote any location.
    Unknown {
        /// Whether the reference may be null.
        null_state: NullAbstractValue,
    },
}

impl PointsToAbstractValue {
    /// Creates a value denoting exactly one location.
    #[must_use]
    pub fn location(location: AbstractLocation) -> Self {
        let null_state = match location {
            AbstractLocation::Null => NullAbstractValue::Null,
            AbstractLocation::NoLocation => NullAbstractValue::MaybeNull,
            _ => NullAbstractValue::NotNull,
        };
        Self::Known {
            locations: BTreeSet::from([location]),
            null_state,
        }
    }

    /// The value of the `null` literal.
    #[must_use]
    pub fn null() -> Self {
        Self::location(AbstractLocation::Null)
    }

    /// The value of storage that does not live at any address.
    #[must_use]
    pub fn no_location() -> Self {
        Self::location(AbstractLocation::NoLocation)
    }

    /// A reference that may denote anything.
    #[must_use]
    pub const fn unknown() -> Self {
        Self::Unknown {
            null_state: NullAbstractValue::MaybeNull,
        }
    }

    /// Returns the known locations.
    #[must_use]
    pub fn locations(&self) -> Option<&BTreeSet<AbstractLocation>> {
        match self {
            Self::Known { locations, .. } => Some(locations),
            _ => None,
        }
    }

    /// Returns the null state.
    #[must_use]
    pub const fn null_state(&self) -> NullAbstractValue {
        match self {
            Self::Undefined | Self::Invalid => NullAbstractValue::Invalid,
            Self::Known { null_state, .. } | Self::Unknown { null_state } => *null_state,
        }
    }

    /// Whether the value denotes some unknown location.
    #[must_use]
    pub const fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown { .. } | Self::Undefined)
    }

    /// Whether the locations of two values intersect.
    #[must_use]
    pub fn may_alias(&self, other: &Self) -> bool {
        match (self.locations(), other.locations()) {
            (Some(a), Some(b)) => a
                .iter()
                .filter(|it| !it.is_null())
                .any(|it| b.contains(it)),
            _ => self.is_unknown() || other.is_unknown(),
        }
    }

    /// Merges two values.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::Undefined, it) | (it, Self::Undefined) => it.clone(),
            (Self::Invalid, it) | (it, Self::Invalid) => it.clone(),
            (
                Self::Known {
                    locations: a,
                    null_state: na,
                },
                Self::Known {
                    locations: b,
                    null_state: nb,
                },
            ) => Self::Known {
                locations: a.union(b).cloned().collect(),
                null_state: na.merge(*nb),
            },
            (a, b) => Self::Unknown {
                null_state: a.null_state().merge(b.null_state()),
            },
        }
    }

    const fn rank(&self) -> u8 {
        match self {
            Self::Undefined => 0,
            Self::Invalid => 1,
            Self::Known { .. } => 2,
            Self::Unknown { .. } => 3,
        }
    }
}

impl fmt::Display for PointsToAbstractValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => write!(f, "undefined"),
            Self::Invalid => write!(f, "invalid"),
            Self::Known {
                locations,
                null_state,
            } => write!(f, "{{{}}} ({null_state})", locations.iter().join(", ")),
            Self::Unknown { null_state } => write!(f, "unknown ({null_state})"),
        }
    }
}

/// The [`AbstractValueDomain`] of [`PointsToAbstractValue`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct PointsToAbstractValueDomain;

impl AbstractValueDomain<PointsToAbstractValue> for PointsToAbstractValueDomain {
    fn unknown_or_may_be_value(&self) -> PointsToAbstractValue {
        PointsToAbstractValue::unknown()
    }

    fn bottom(&self) -> PointsToAbstractValue {
        PointsToAbstractValue::Undefined
    }

    fn merge(
        &self,
        value1: &PointsToAbstractValue,
        value2: &PointsToAbstractValue,
    ) -> PointsToAbstractValue {
        value1.merge(value2)
    }

    fn compare(&self, old: &PointsToAbstractValue, new: &PointsToAbstractValue) -> Ordering {
        use PointsToAbstractValue::{Known, Unknown};
        if old == new {
            return Ordering::Equal;
        }
        match (old, new) {
            (
                Known {
                    locations: a,
                    null_state: na,
                },
                Known {
                    locations: b,
                    null_state: nb,
                },
            ) => {
                if a.is_subset(b) && na.compare(*nb) != Ordering::Greater {
                    Ordering::Less
                } else {
                    Ordering::Greater
                }
            }
            (Unknown { null_state: na }, Unknown { null_state: nb }) => na.compare(*nb),
            (Known { null_state: na, .. }, Unknown { null_state: nb }) => {
                if na.compare(*nb) == Ordering::Greater {
                    Ordering::Greater
                } else {
                    Ordering::Less
                }
            }
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::{
        analysis::{domain::merge_checked, entity::location::CallStack},
        ir::{CfgId, OperationId, OperationKey},
    };

    fn allocation(op: u32) -> AbstractLocation {
        AbstractLocation::Allocation {
            creation: OperationKey {
                cfg: CfgId::from(0),
                operation: OperationId::from(op),
            },
            ty: None,
            call_stack: CallStack::empty(),
        }
    }

    fn arb_points_to() -> impl Strategy<Value = PointsToAbstractValue> {
        prop_oneof![
            Just(PointsToAbstractValue::Undefined),
            Just(PointsToAbstractValue::Invalid),
            any::<NullAbstractValue>()
                .prop_map(|null_state| PointsToAbstractValue::Unknown { null_state }),
            (
                prop::collection::btree_set(0u32..4, 1..3),
                any::<NullAbstractValue>()
            )
                .prop_map(|(ops, null_state)| PointsToAbstractValue::Known {
                    locations: ops.into_iter().map(allocation).collect(),
                    null_state,
                }),
        ]
    }

    #[test]
    fn null_literal() {
        let null = PointsToAbstractValue::null();
        assert_eq!(null.null_state(), NullAbstractValue::Null);
        let merged = null.merge(&PointsToAbstractValue::location(allocation(1)));
        assert_eq!(merged.null_state(), NullAbstractValue::MaybeNull);
        assert_eq!(merged.locations().map(BTreeSet::len), Some(2));
    }

    #[test]
    fn aliasing() {
        let a = PointsToAbstractValue::location(allocation(1));
        let b = PointsToAbstractValue::location(allocation(1)).merge(&PointsToAbstractValue::null());
        let c = PointsToAbstractValue::location(allocation(2));
        assert!(a.may_alias(&b));
        assert!(!a.may_alias(&c));
        assert!(!PointsToAbstractValue::null().may_alias(&PointsToAbstractValue::null()));
        assert!(a.may_alias(&PointsToAbstractValue::unknown()));
    }

    proptest! {
        #[test]
        fn merge_is_monotonic(a in arb_points_to(), b in arb_points_to()) {
            let domain = PointsToAbstractValueDomain;
            let merged = merge_checked(&domain, &a, &b);
            prop_assert_eq!(merged.clone(), b.merge(&a));
            prop_assert_eq!(domain.compare(&merged, &merged), Ordering::Equal);
        }
    }
}
