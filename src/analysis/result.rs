//! The outcome of an analysis run.
use std::{collections::BTreeMap, fmt, rc::Rc, sync::Arc};

use super::{AnalysisData, DataFlowAnalysis, dependency::DependentResult};
use crate::ir::{ControlFlowGraph, OperationId, OperationKey};

/// Whether a condition always holds, never holds, or depends on the execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum PredicateValueKind {
    /// The condition may or may not hold.
    #[default]
    Unknown,
    /// The condition always holds.
    AlwaysTrue,
    /// The condition never holds.
    AlwaysFalse,
}

impl PredicateValueKind {
    /// Returns the kind of the negated condition.
    #[must_use]
    pub const fn negate(self) -> Self {
        match self {
            Self::Unknown => Self::Unknown,
            Self::AlwaysTrue => Self::AlwaysFalse,
            Self::AlwaysFalse => Self::AlwaysTrue,
        }
    }

    /// Merges the kinds of a condition evaluated on two paths.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        if self == other { self } else { Self::Unknown }
    }

    /// Combines two independent verdicts about the same condition.
    ///
    /// A condition proven never to hold stays so.
    #[must_use]
    pub const fn combine(self, other: Self) -> Self {
        match (self, other) {
            (Self::AlwaysFalse, _) | (_, Self::AlwaysFalse) => Self::AlwaysFalse,
            (Self::AlwaysTrue, _) | (_, Self::AlwaysTrue) => Self::AlwaysTrue,
            (Self::Unknown, Self::Unknown) => Self::Unknown,
        }
    }
}

/// The state at the boundaries of a basic block.
pub struct BlockResult<A: DataFlowAnalysis> {
    /// The state before the first operation.
    pub entry: AnalysisData<A>,
    /// The state after the last operation.
    pub exit: AnalysisData<A>,
}

impl<A: DataFlowAnalysis> BlockResult<A> {
    /// Whether the block may be executed.
    #[must_use]
    pub fn is_reachable(&self) -> bool {
        self.entry.is_reachable()
    }
}

impl<A: DataFlowAnalysis> Clone for BlockResult<A> {
    fn clone(&self) -> Self {
        Self {
            entry: self.entry.clone(),
            exit: self.exit.clone(),
        }
    }
}

impl<A: DataFlowAnalysis> PartialEq for BlockResult<A> {
    fn eq(&self, other: &Self) -> bool {
        self.entry == other.entry && self.exit == other.exit
    }
}

impl<A: DataFlowAnalysis> fmt::Debug for BlockResult<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockResult")
            .field("entry", &self.entry)
            .field("exit", &self.exit)
            .finish()
    }
}

/// The fixed point computed by one analysis run over one control flow graph.
pub struct DataFlowAnalysisResult<A: DataFlowAnalysis> {
    pub(crate) cfg: Arc<ControlFlowGraph>,
    pub(crate) blocks: Vec<BlockResult<A>>,
    pub(crate) values: BTreeMap<OperationId, A::Value>,
    pub(crate) predicate_kinds: BTreeMap<OperationId, PredicateValueKind>,
    pub(crate) exceptional_exit: Option<AnalysisData<A>>,
    pub(crate) return_value: Option<A::Value>,
    pub(crate) return_predicate_kind: Option<PredicateValueKind>,
    pub(crate) interprocedural: BTreeMap<OperationId, Rc<DataFlowAnalysisResult<A>>>,
}

impl<A: DataFlowAnalysis> DataFlowAnalysisResult<A> {
    /// Returns the analyzed graph.
    #[must_use]
    pub fn cfg(&self) -> &Arc<ControlFlowGraph> {
        &self.cfg
    }

    /// Returns the value computed for an operation of the analyzed graph.
    #[must_use]
    pub fn value_of(&self, operation: OperationId) -> Option<&A::Value> {
        self.values.get(&operation)
    }

    /// Returns the value computed for an operation, or `default` for operations outside
    /// the analyzed body.
    #[must_use]
    pub fn value_or(&self, operation: OperationId, default: A::Value) -> A::Value {
        self.values.get(&operation).cloned().unwrap_or(default)
    }

    /// Returns the number of operations a value was computed for.
    #[must_use]
    pub fn operations_analyzed(&self) -> usize {
        self.values.len()
    }

    /// Returns the states at the boundaries of a block.
    #[must_use]
    pub fn block(&self, ordinal: usize) -> Option<&BlockResult<A>> {
        self.blocks.get(ordinal)
    }

    /// Returns the states of all blocks, in ordinal order.
    #[must_use]
    pub fn blocks(&self) -> &[BlockResult<A>] {
        &self.blocks
    }

    /// Returns the state after the entry block.
    #[must_use]
    pub fn entry_block_output(&self) -> Option<&AnalysisData<A>> {
        self.blocks.first().map(|it| &it.exit)
    }

    /// Returns the state at the exit of the body on normal completion.
    #[must_use]
    pub fn exit_block_output(&self) -> Option<&AnalysisData<A>> {
        self.blocks.last().map(|it| &it.exit)
    }

    /// Returns the merged state of the exceptions escaping the body, if exception paths
    /// were analyzed.
    #[must_use]
    pub fn exceptional_exit(&self) -> Option<&AnalysisData<A>> {
        self.exceptional_exit.as_ref()
    }

    /// Returns whether a condition of the analyzed graph always or never holds.
    #[must_use]
    pub fn predicate_kind(&self, operation: OperationId) -> PredicateValueKind {
        self.predicate_kinds
            .get(&operation)
            .copied()
            .unwrap_or_default()
    }

    /// Returns the merged value of the returned operations.
    #[must_use]
    pub fn return_value(&self) -> Option<&A::Value> {
        self.return_value.as_ref()
    }

    /// Returns whether the returned boolean always or never holds.
    #[must_use]
    pub fn return_predicate_kind(&self) -> Option<PredicateValueKind> {
        self.return_predicate_kind
    }

    /// Returns the result of analyzing the callee of a call site.
    #[must_use]
    pub fn interprocedural_result(&self, call: OperationId) -> Option<&Rc<Self>> {
        self.interprocedural.get(&call)
    }

    fn find<T>(&self, key: OperationKey, f: &impl Fn(&Self) -> Option<T>) -> Option<T> {
        if key.cfg == self.cfg.id() {
            return f(self);
        }
        self.interprocedural
            .values()
            .find_map(|result| result.find(key, f))
    }
}

impl<A: DataFlowAnalysis> DependentResult<A::Value> for DataFlowAnalysisResult<A> {
    fn value_of(&self, operation: OperationKey) -> Option<A::Value> {
        self.find(operation, &|result: &Self| {
            result.values.get(&operation.operation).cloned()
        })
    }

    fn predicate_kind(&self, operation: OperationKey) -> PredicateValueKind {
        self.find(operation, &|result: &Self| {
            result.predicate_kinds.get(&operation.operation).copied()
        })
        .unwrap_or_default()
    }
}

impl<A: DataFlowAnalysis> PartialEq for DataFlowAnalysisResult<A> {
    fn eq(&self, other: &Self) -> bool {
        self.cfg.id() == other.cfg.id()
            && self.blocks == other.blocks
            && self.values == other.values
            && self.predicate_kinds == other.predicate_kinds
            && self.exceptional_exit == other.exceptional_exit
            && self.return_value == other.return_value
            && self.return_predicate_kind == other.return_predicate_kind
            && self.interprocedural == other.interprocedural
    }
}

impl<A: DataFlowAnalysis> fmt::Debug for DataFlowAnalysisResult<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataFlowAnalysisResult")
            .field("analysis", &A::NAME)
            .field("cfg", &self.cfg.id())
            .field("blocks", &self.blocks)
            .field("values", &self.values)
            .field("predicate_kinds", &self.predicate_kinds)
            .field("return_value", &self.return_value)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn combine_prefers_infeasibility() {
        use PredicateValueKind::{AlwaysFalse, AlwaysTrue, Unknown};
        assert_eq!(AlwaysTrue.combine(AlwaysFalse), AlwaysFalse);
        assert_eq!(Unknown.combine(AlwaysTrue), AlwaysTrue);
        assert_eq!(AlwaysTrue.merge(AlwaysFalse), Unknown);
    }

    proptest! {
        #[test]
        fn negation_is_involutive(kind in any::<PredicateValueKind>()) {
            prop_assert_eq!(kind.negate().negate(), kind);
        }
    }
}
