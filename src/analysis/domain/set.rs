//! The powerset domain.
use std::{cmp::Ordering, collections::BTreeSet, fmt, marker::PhantomData};

use super::AbstractValueDomain;

/// Sets ordered by inclusion, merged by union.
///
/// The empty set is the bottom element. A set has no natural unknown value, so
/// [`unknown_or_may_be_value`](AbstractValueDomain::unknown_or_may_be_value) is also the
/// empty set; analyses needing a top element wrap sets in their own value type.
pub struct SetAbstractDomain<T>(PhantomData<fn() -> T>);

impl<T> SetAbstractDomain<T> {
    /// Creates the domain.
    #[must_use]
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for SetAbstractDomain<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for SetAbstractDomain<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SetAbstractDomain")
    }
}

impl<T: Ord + Clone> AbstractValueDomain<BTreeSet<T>> for SetAbstractDomain<T> {
    fn unknown_or_may_be_value(&self) -> BTreeSet<T> {
        BTreeSet::new()
    }

    fn bottom(&self) -> BTreeSet<T> {
        BTreeSet::new()
    }

    fn merge(&self, value1: &BTreeSet<T>, value2: &BTreeSet<T>) -> BTreeSet<T> {
        value1.union(value2).cloned().collect()
    }

    fn merge_owned(&self, mut value1: BTreeSet<T>, mut value2: BTreeSet<T>) -> BTreeSet<T> {
        if value1.len() < value2.len() {
            std::mem::swap(&mut value1, &mut value2);
        }
        value1.append(&mut value2);
        value1
    }

    fn compare(&self, old: &BTreeSet<T>, new: &BTreeSet<T>) -> Ordering {
        if old == new {
            Ordering::Equal
        } else if old.is_subset(new) {
            Ordering::Less
        } else {
            Ordering::Greater
        }
    }
}
