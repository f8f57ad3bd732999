//! Interprocedural, lattice-based dataflow analyses over control flow graphs.
//!
//! A concrete analysis implements [`DataFlowAnalysis`], describing its abstract values and
//! how operations produce them. The engine takes care of the rest:
//!
//! - resolving operations to [`entity::AnalysisEntity`]s and tracking their values,
//! - refining the state on branch conditions and pruning infeasible branches,
//! - descending into the bodies of called methods, lambdas and local functions,
//! - propagating the state through `try`/`catch`/`finally` regions, and
//! - iterating until a fixed point is reached.
//!
//! Analyses are run with [`session::run`], yielding a [`DataFlowAnalysisResult`].
use std::{fmt, hash::Hash};

use crate::ir::{Constant, MethodRef, Operation, SymbolRef, SymbolTable, TypeRef};

pub mod context;
pub mod data;
pub mod dependency;
pub mod domain;
pub mod entity;
mod fixed_point;
pub mod result;
pub mod session;
mod visitor;

pub use context::{
    AnalysisConfig, AnalysisContext, AnalysisFlags, ArgumentInfo, InterproceduralAnalysisKind,
};
pub use data::{DictionaryAnalysisData, PredicatedAnalysisData};
pub use dependency::{Dependent, DependentResult, DependentResults, PrecomputedResult};
pub use domain::AbstractValueDomain;
pub use entity::{AnalysisEntity, EntityArena, EntityId, TrackedKey};
pub use result::{BlockResult, DataFlowAnalysisResult, PredicateValueKind};
pub use session::{AnalysisSession, CancellationToken, run};

/// The state of an analysis at a program point.
pub type AnalysisData<A> =
    PredicatedAnalysisData<<A as DataFlowAnalysis>::Key, <A as DataFlowAnalysis>::Value>;

/// An error aborting an analysis run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnalysisError {
    /// The run was cancelled through its [`CancellationToken`].
    #[error("The analysis was cancelled")]
    Cancelled,
    /// The analyzed method has no body.
    #[error("The method {0} does not have a body")]
    MissingBody(MethodRef),
}

/// The outcome of refining operand values on a branch condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refinement<V> {
    /// The refined value of the left (or only) operand.
    pub left: Option<V>,
    /// The refined value of the right operand.
    pub right: Option<V>,
    /// Whether the assumed outcome always or never happens.
    pub kind: PredicateValueKind,
}

impl<V> Refinement<V> {
    /// No refinement.
    #[must_use]
    pub const fn unknown() -> Self {
        Self {
            left: None,
            right: None,
            kind: PredicateValueKind::Unknown,
        }
    }

    /// Only reports whether the outcome always or never happens.
    #[must_use]
    pub const fn of_kind(kind: PredicateValueKind) -> Self {
        Self {
            left: None,
            right: None,
            kind,
        }
    }
}

/// A dataflow analysis plugged into the engine.
///
/// Every hook has a conservative default returning the unknown value of the domain, so a
/// minimal analysis only provides its domain and the values of the operations it
/// interprets.
pub trait DataFlowAnalysis: fmt::Debug {
    /// The name used in logs.
    const NAME: &'static str;

    /// What values are tracked for.
    type Key: TrackedKey;

    /// The abstract values.
    type Value: Clone + Eq + Hash + fmt::Debug;

    /// The lattice of the values.
    type Domain: AbstractValueDomain<Self::Value> + fmt::Debug;

    /// Returns the lattice of the values.
    fn domain(&self) -> &Self::Domain;

    /// Returns the value of storage of the given type that has not been assigned.
    fn default_value(&self, ty: Option<TypeRef>, symbols: &SymbolTable) -> Self::Value {
        let _ = (ty, symbols);
        self.domain().unknown_or_may_be_value()
    }

    /// Returns the value of a compile-time constant.
    fn value_for_constant(&self, constant: &Constant, ty: Option<TypeRef>) -> Self::Value {
        let _ = (constant, ty);
        self.domain().unknown_or_may_be_value()
    }

    /// Returns the value of a unary, binary or conversion operation given the values of
    /// its operands, in evaluation order.
    fn value_for_operation(&self, operation: &Operation, operands: &[Self::Value]) -> Self::Value {
        let _ = (operation, operands);
        self.domain().unknown_or_may_be_value()
    }

    /// Returns the value of a parameter on entry to the body.
    ///
    /// `argument` is present when the body is analyzed for a call site.
    fn value_for_parameter_on_entry(
        &self,
        parameter: SymbolRef,
        argument: Option<&ArgumentInfo<Self::Value>>,
        default: Self::Value,
    ) -> Self::Value {
        let _ = parameter;
        argument.map_or(default, |it| it.value.clone())
    }

    /// Returns the value a parameter escapes with on exit of the body, if any.
    fn escaped_value_for_parameter_on_exit(
        &self,
        parameter: SymbolRef,
        value: &Self::Value,
    ) -> Option<Self::Value> {
        let _ = (parameter, value);
        None
    }

    /// Returns the value of the receiver of an invocation after the call, if the call
    /// changes it.
    fn value_for_receiver_after_invocation(
        &self,
        invocation: &Operation,
        method: MethodRef,
        receiver: &Self::Value,
    ) -> Option<Self::Value> {
        let _ = (invocation, method, receiver);
        None
    }

    /// Returns the value of a `ref` or `out` argument after a call that was not analyzed.
    fn value_for_escaped_ref_argument(&self, ty: Option<TypeRef>) -> Self::Value {
        let _ = ty;
        self.domain().unknown_or_may_be_value()
    }

    /// Returns the value of an exception caught by a handler.
    fn value_for_caught_exception(&self, ty: Option<TypeRef>) -> Self::Value {
        let _ = ty;
        self.domain().unknown_or_may_be_value()
    }

    /// Returns the value stored into a value-copy target when copying a member of the
    /// assigned value.
    fn value_for_copy(&self, value: &Self::Value) -> Self::Value {
        value.clone()
    }

    /// Refines the value of an operand assuming it is (`is_null`) or is not null.
    fn refine_is_null(&self, operand: &Self::Value, is_null: bool) -> Refinement<Self::Value> {
        let _ = (operand, is_null);
        Refinement::unknown()
    }

    /// Refines the values of two operands assuming they are (`equals`) or are not equal.
    fn refine_equality(
        &self,
        left: &Self::Value,
        right: &Self::Value,
        equals: bool,
        is_reference_equality: bool,
    ) -> Refinement<Self::Value> {
        let _ = (left, right, equals, is_reference_equality);
        Refinement::unknown()
    }
}
