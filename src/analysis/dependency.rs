//! Results of prerequisite analyses consumed by an analysis.
//!
//! An analysis may use the points-to, copy and value-content results of analyses run
//! before it. They are consumed through the [`DependentResult`] trait, so any result
//! addressable by operation can be plugged in: a [`DataFlowAnalysisResult`] of an earlier
//! run sharing the same [`AnalysisSession`](super::AnalysisSession), or a
//! [`PrecomputedResult`] supplied by the caller.
//!
//! [`DataFlowAnalysisResult`]: super::DataFlowAnalysisResult
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    hash::{Hash, Hasher},
    rc::Rc,
};

use super::{
    entity::{EntityId, PointsToAbstractValue},
    result::PredicateValueKind,
};
use crate::ir::{Constant, OperationKey};

/// The result of an analysis, addressable by operation.
pub trait DependentResult<V>: fmt::Debug {
    /// Returns the value computed for an operation.
    fn value_of(&self, operation: OperationKey) -> Option<V>;

    /// Returns whether a condition is always true or always false.
    fn predicate_kind(&self, operation: OperationKey) -> PredicateValueKind {
        let _ = operation;
        PredicateValueKind::Unknown
    }
}

/// A shared handle to a [`DependentResult`].
///
/// Two handles are equal if they refer to the same result.
pub struct Dependent<V>(Rc<dyn DependentResult<V>>);

impl<V> Dependent<V> {
    /// Wraps a shared result.
    #[must_use]
    pub fn new(result: Rc<dyn DependentResult<V>>) -> Self {
        Self(result)
    }

    /// Returns the value computed for an operation.
    #[must_use]
    pub fn value_of(&self, operation: OperationKey) -> Option<V> {
        self.0.value_of(operation)
    }

    /// Returns whether a condition is always true or always false.
    #[must_use]
    pub fn predicate_kind(&self, operation: OperationKey) -> PredicateValueKind {
        self.0.predicate_kind(operation)
    }

    fn address(&self) -> *const () {
        Rc::as_ptr(&self.0).cast()
    }
}

impl<V, R: DependentResult<V> + 'static> From<Rc<R>> for Dependent<V> {
    fn from(result: Rc<R>) -> Self {
        Self(result)
    }
}

impl<V> Clone for Dependent<V> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<V> fmt::Debug for Dependent<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl<V> PartialEq for Dependent<V> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.address(), other.address())
    }
}

impl<V> Eq for Dependent<V> {}

impl<V> Hash for Dependent<V> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address().hash(state);
    }
}

/// Values supplied for individual operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecomputedResult<V> {
    values: BTreeMap<OperationKey, V>,
    predicates: BTreeMap<OperationKey, PredicateValueKind>,
}

impl<V> Default for PrecomputedResult<V> {
    fn default() -> Self {
        Self {
            values: BTreeMap::new(),
            predicates: BTreeMap::new(),
        }
    }
}

impl<V> PrecomputedResult<V> {
    /// Creates an empty result.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the value of an operation.
    #[must_use]
    pub fn with_value(mut self, operation: OperationKey, value: V) -> Self {
        self.values.insert(operation, value);
        self
    }

    /// Records the predicate kind of a condition.
    #[must_use]
    pub fn with_predicate_kind(mut self, operation: OperationKey, kind: PredicateValueKind) -> Self {
        self.predicates.insert(operation, kind);
        self
    }
}

impl<V: Clone + fmt::Debug> DependentResult<V> for PrecomputedResult<V> {
    fn value_of(&self, operation: OperationKey) -> Option<V> {
        self.values.get(&operation).cloned()
    }

    fn predicate_kind(&self, operation: OperationKey) -> PredicateValueKind {
        self.predicates
            .get(&operation)
            .copied()
            .unwrap_or_default()
    }
}

/// How the entities of a [`CopyAbstractValue`] relate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CopyValueKind {
    /// The entities hold copies of one value.
    KnownValueCopy,
    /// The entities hold one reference.
    KnownReferenceCopy,
    /// Nothing is known.
    Unknown,
}

/// A set of entities known to hold the same value.
///
/// The same shape describes the alias sets of address-shared entities, i.e. entities
/// bound to one storage location through `ref` parameters or `ref` locals.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CopyAbstractValue {
    /// The entities.
    pub entities: BTreeSet<EntityId>,
    /// How the entities relate.
    pub kind: CopyValueKind,
}

impl CopyAbstractValue {
    /// Creates the value of entities sharing one reference.
    #[must_use]
    pub fn references(entities: impl IntoIterator<Item = EntityId>) -> Self {
        Self {
            entities: entities.into_iter().collect(),
            kind: CopyValueKind::KnownReferenceCopy,
        }
    }

    /// Returns the union of two alias sets.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        let kind = if self.kind == other.kind {
            self.kind
        } else {
            CopyValueKind::Unknown
        };
        Self {
            entities: self.entities.union(&other.entities).copied().collect(),
            kind,
        }
    }
}

/// Whether an expression may have values other than the collected literals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NonLiteralState {
    /// Only literal values.
    No,
    /// Possibly other values.
    Maybe,
    /// Not literal values.
    Yes,
}

/// The literal values an expression may have.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ValueContentAbstractValue {
    /// The literals.
    pub literals: BTreeSet<Constant>,
    /// Whether other values are possible.
    pub non_literal_state: NonLiteralState,
}

impl ValueContentAbstractValue {
    /// The value of an expression known to be one literal.
    #[must_use]
    pub fn literal(constant: Constant) -> Self {
        Self {
            literals: BTreeSet::from([constant]),
            non_literal_state: NonLiteralState::No,
        }
    }

    /// Returns the boolean the expression always evaluates to.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        if self.non_literal_state != NonLiteralState::No || self.literals.len() != 1 {
            return None;
        }
        self.literals.first().and_then(Constant::as_bool)
    }
}

/// The prerequisite results available to an analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct DependentResults {
    /// Where references may point.
    pub points_to: Option<Dependent<PointsToAbstractValue>>,
    /// Which entities hold copies of the same value.
    pub copy: Option<Dependent<CopyAbstractValue>>,
    /// Which literals expressions may evaluate to.
    pub value_content: Option<Dependent<ValueContentAbstractValue>>,
}

impl DependentResults {
    /// Returns the points-to value of an operation.
    #[must_use]
    pub fn points_to(&self, operation: OperationKey) -> Option<PointsToAbstractValue> {
        self.points_to.as_ref()?.value_of(operation)
    }

    /// Returns the entities holding copies of the value of an operation.
    #[must_use]
    pub fn copies(&self, operation: OperationKey) -> Option<CopyAbstractValue> {
        self.copy.as_ref()?.value_of(operation)
    }

    /// Returns the boolean an operation always evaluates to.
    #[must_use]
    pub fn constant_bool(&self, operation: OperationKey) -> Option<bool> {
        self.value_content.as_ref()?.value_of(operation)?.as_bool()
    }

    /// Returns the predicate kind of a condition according to any prerequisite result.
    #[must_use]
    pub fn predicate_kind(&self, operation: OperationKey) -> PredicateValueKind {
        let kinds = [
            self.points_to.as_ref().map(|it| it.predicate_kind(operation)),
            self.copy.as_ref().map(|it| it.predicate_kind(operation)),
            self.value_content
                .as_ref()
                .map(|it| it.predicate_kind(operation)),
        ];
        kinds
            .into_iter()
            .flatten()
            .find(|it| *it != PredicateValueKind::Unknown)
            .unwrap_or_default()
    }
}
