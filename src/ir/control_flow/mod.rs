//! Control flow graphs of method bodies.
//!
//! A [`ControlFlowGraph`] is a sequence of [`BasicBlock`]s ordered by ordinal, the first
//! being the entry block and the last being the exit block. Structured exception handling
//! and lexical scopes are described by a tree of [`Region`]s.
use std::{collections::BTreeMap, sync::Arc};

use super::{
    operation::{CaptureId, Operation, OperationId},
    symbols::{MethodRef, SymbolRef, TypeRef},
};

mod builder;
#[cfg(feature = "petgraph")]
mod petgraph;

pub use builder::{CfgBuilder, CfgError};

/// Identifies a control flow graph.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    derive_more::From,
    derive_more::Into,
    derive_more::Display,
)]
#[display("cfg#{_0}")]
pub struct CfgId(u32);

/// Identifies a region within one control flow graph.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    derive_more::From,
    derive_more::Into,
    derive_more::Display,
)]
#[display("region#{_0}")]
pub struct RegionId(u32);

impl RegionId {
    /// The region spanning the whole graph.
    pub const ROOT: Self = Self(0);

    const fn index(self) -> usize {
        self.0 as usize
    }

    fn from_index(index: usize) -> Self {
        Self(u32::try_from(index).unwrap_or(u32::MAX))
    }
}

/// An operation in a specific control flow graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
#[display("{cfg}:{operation}")]
pub struct OperationKey {
    /// The graph owning the operation.
    pub cfg: CfgId,
    /// The operation.
    pub operation: OperationId,
}

/// The kind of a basic block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
    /// The unique entry block.
    Entry,
    /// The unique exit block.
    Exit,
    /// Any other block.
    Block,
}

/// When a conditional branch is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum ConditionKind {
    /// The branch is unconditional.
    #[default]
    None,
    /// Taken when the branch value is `true`.
    WhenTrue,
    /// Taken when the branch value is `false`.
    WhenFalse,
}

impl ConditionKind {
    /// Returns the opposite condition.
    #[must_use]
    pub const fn negate(self) -> Self {
        match self {
            Self::None => Self::None,
            Self::WhenTrue => Self::WhenFalse,
            Self::WhenFalse => Self::WhenTrue,
        }
    }
}

/// What happens when a branch is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BranchSemantics {
    /// Control flows to the destination.
    Regular,
    /// The method returns the branch value of the source block.
    Return,
    /// The branch value of the source block is thrown.
    Throw,
    /// The caught exception is rethrown.
    Rethrow,
    /// Control leaves a finally or filter region; the destination is determined at runtime.
    StructuredExceptionHandling,
    /// Control reaches the end of the graph.
    None,
}

/// An edge between two basic blocks.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Branch {
    /// The source block ordinal.
    pub source: usize,
    /// The destination block ordinal, if control stays within the graph.
    pub destination: Option<usize>,
    /// What happens when the branch is taken.
    pub semantics: BranchSemantics,
    /// Whether this is the conditional successor of the source.
    pub is_conditional: bool,
    /// Regions entered by the branch, outermost first.
    pub entering_regions: Vec<RegionId>,
    /// Regions left by the branch, innermost first.
    pub leaving_regions: Vec<RegionId>,
    /// Finally regions executed before reaching the destination, innermost first.
    pub finally_regions: Vec<RegionId>,
}

/// A maximal straight-line sequence of operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicBlock {
    /// The position of the block in the graph.
    pub ordinal: usize,
    /// The kind of the block.
    pub kind: BlockKind,
    /// The statements of the block.
    pub operations: Vec<OperationId>,
    /// The value tested by the conditional successor, returned or thrown.
    pub branch_value: Option<OperationId>,
    /// When the conditional successor is taken.
    pub condition_kind: ConditionKind,
    /// The successor taken when the condition does not hold, or the only successor.
    pub fall_through: Option<Branch>,
    /// The successor taken when the condition holds.
    pub conditional: Option<Branch>,
    /// The innermost region containing the block.
    pub region: RegionId,
    /// The ordinals of the blocks branching into this one.
    pub predecessors: Vec<usize>,
}

impl BasicBlock {
    /// Returns the outgoing branches, conditional successor first.
    pub fn successors(&self) -> impl Iterator<Item = &Branch> {
        self.conditional.iter().chain(&self.fall_through)
    }
}

/// The kind of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RegionKind {
    /// The region spanning the whole graph.
    Root,
    /// A lexical scope declaring locals or captures.
    LocalLifetime,
    /// The protected part of a `try` statement.
    Try,
    /// A try region together with its catch and filter handlers.
    TryAndCatch,
    /// A try region together with its finally handler.
    TryAndFinally,
    /// A catch handler.
    Catch,
    /// An exception filter.
    Filter,
    /// An exception filter together with its handler.
    FilterAndHandler,
    /// A finally handler.
    Finally,
}

/// A structured sub-range of basic blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    /// The kind of the region.
    pub kind: RegionKind,
    /// The ordinal of the first block.
    pub first_block: usize,
    /// The ordinal of the last block.
    pub last_block: usize,
    /// The enclosing region; `None` for the root.
    pub enclosing: Option<RegionId>,
    /// The directly nested regions in block order.
    pub nested: Vec<RegionId>,
    /// Locals whose lifetime is this region.
    pub locals: Vec<SymbolRef>,
    /// Flow captures whose lifetime is this region.
    pub captures: Vec<CaptureId>,
    /// The caught exception type of a catch or filter region; `None` catches everything.
    pub exception_type: Option<TypeRef>,
}

impl Region {
    /// Whether the block with the given ordinal lies in this region.
    #[must_use]
    pub const fn contains(&self, ordinal: usize) -> bool {
        self.first_block <= ordinal && ordinal <= self.last_block
    }
}

/// The control flow graph of a method, lambda or local function body.
#[derive(Debug, Clone)]
pub struct ControlFlowGraph {
    id: CfgId,
    blocks: Vec<BasicBlock>,
    regions: Vec<Region>,
    operations: Vec<Operation>,
    nested: BTreeMap<MethodRef, Arc<ControlFlowGraph>>,
}

impl PartialEq for ControlFlowGraph {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ControlFlowGraph {}

impl ControlFlowGraph {
    /// Returns the identifier of the graph.
    #[must_use]
    pub const fn id(&self) -> CfgId {
        self.id
    }

    /// Returns the blocks in ordinal order.
    #[must_use]
    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    /// Returns the block with the given ordinal.
    #[must_use]
    pub fn block(&self, ordinal: usize) -> Option<&BasicBlock> {
        self.blocks.get(ordinal)
    }

    /// Returns the entry block.
    #[must_use]
    pub fn entry(&self) -> &BasicBlock {
        &self.blocks[0]
    }

    /// Returns the exit block.
    #[must_use]
    pub fn exit(&self) -> &BasicBlock {
        &self.blocks[self.blocks.len() - 1]
    }

    /// Returns the operation with the given id.
    #[must_use]
    pub fn operation(&self, id: OperationId) -> Option<&Operation> {
        self.operations.get(id.index())
    }

    /// Returns all operations with their ids.
    pub fn operations(&self) -> impl Iterator<Item = (OperationId, &Operation)> {
        self.operations
            .iter()
            .enumerate()
            .map(|(index, op)| (OperationId::from_index(index), op))
    }

    /// Qualifies an operation of this graph.
    #[must_use]
    pub const fn key(&self, operation: OperationId) -> OperationKey {
        OperationKey {
            cfg: self.id,
            operation,
        }
    }

    /// Returns the region with the given id.
    #[must_use]
    pub fn region(&self, id: RegionId) -> Option<&Region> {
        self.regions.get(id.index())
    }

    /// Returns all regions with their ids, the root first.
    pub fn regions(&self) -> impl Iterator<Item = (RegionId, &Region)> {
        self.regions
            .iter()
            .enumerate()
            .map(|(index, region)| (RegionId::from_index(index), region))
    }

    /// Returns the regions enclosing a block, innermost first, ending with the root.
    pub fn enclosing_regions(&self, ordinal: usize) -> impl Iterator<Item = (RegionId, &Region)> {
        let start = self.block(ordinal).map(|it| it.region);
        std::iter::successors(start, |id| self.region(*id).and_then(|it| it.enclosing))
            .filter_map(|id| self.region(id).map(|region| (id, region)))
    }

    /// Returns the innermost region of the given kind starting at the block.
    #[must_use]
    pub fn region_starting_at(&self, ordinal: usize, kind: RegionKind) -> Option<RegionId> {
        self.enclosing_regions(ordinal)
            .find(|(_, region)| region.kind == kind && region.first_block == ordinal)
            .map(|(id, _)| id)
    }

    /// Returns the innermost region of the given kind ending at the block.
    #[must_use]
    pub fn region_ending_at(&self, ordinal: usize, kind: RegionKind) -> Option<RegionId> {
        self.enclosing_regions(ordinal)
            .find(|(_, region)| region.kind == kind && region.last_block == ordinal)
            .map(|(id, _)| id)
    }

    /// Returns the catch and filter handlers guarding a try region.
    ///
    /// For a filter the first block of the filter is returned, since exceptions reach the
    /// filter before its handler.
    #[must_use]
    pub fn handlers_of_try(&self, try_region: RegionId) -> Vec<RegionId> {
        let Some(parent) = self
            .region(try_region)
            .and_then(|it| it.enclosing)
            .and_then(|id| self.region(id))
        else {
            return Vec::new();
        };
        if parent.kind != RegionKind::TryAndCatch {
            return Vec::new();
        }
        parent
            .nested
            .iter()
            .filter_map(|id| self.region(*id).map(|region| (*id, region)))
            .filter_map(|(id, region)| match region.kind {
                RegionKind::Catch => Some(id),
                RegionKind::FilterAndHandler => region.nested.first().copied(),
                _ => None,
            })
            .collect()
    }

    /// Returns the finally handler of a try region.
    #[must_use]
    pub fn finally_of_try(&self, try_region: RegionId) -> Option<RegionId> {
        let parent = self.region(self.region(try_region)?.enclosing?)?;
        if parent.kind != RegionKind::TryAndFinally {
            return None;
        }
        parent
            .nested
            .iter()
            .copied()
            .find(|id| self.region(*id).is_some_and(|it| it.kind == RegionKind::Finally))
    }

    /// Returns the graph of a lambda or local function declared directly in this body.
    #[must_use]
    pub fn nested_graph(&self, method: MethodRef) -> Option<&Arc<ControlFlowGraph>> {
        self.nested.get(&method)
    }

    /// Returns the lambdas and local functions declared directly in this body.
    pub fn nested_graphs(&self) -> impl Iterator<Item = (MethodRef, &Arc<ControlFlowGraph>)> {
        self.nested.iter().map(|(method, cfg)| (*method, cfg))
    }

    /// Returns the outermost ancestor of an operation, i.e. the statement containing it.
    #[must_use]
    pub fn root_operation(&self, id: OperationId) -> OperationId {
        std::iter::successors(Some(id), |it| self.operation(*it).and_then(|op| op.parent))
            .last()
            .unwrap_or(id)
    }

    /// Returns the ancestors of an operation, innermost first, excluding the operation.
    pub fn ancestors(&self, id: OperationId) -> impl Iterator<Item = OperationId> + '_ {
        std::iter::successors(self.operation(id).and_then(|op| op.parent), |it| {
            self.operation(*it).and_then(|op| op.parent)
        })
    }

    /// Returns the ordinal of the block containing an operation.
    #[must_use]
    pub fn block_of(&self, id: OperationId) -> Option<usize> {
        let root = self.root_operation(id);
        self.blocks
            .iter()
            .find(|block| block.operations.contains(&root) || block.branch_value == Some(root))
            .map(|block| block.ordinal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::operation::{Constant, OperationKind};

    fn try_catch_finally() -> ControlFlowGraph {
        let mut builder = CfgBuilder::new(CfgId::from(0));
        let literal = builder.add_operation(Operation::literal(Constant::Int(1), None));
        let blocks = (0..6).map(|_| builder.add_block()).collect::<Vec<_>>();
        builder.push_statement(blocks[1], literal);
        builder.fall_through(blocks[0], blocks[1]);
        builder.fall_through(blocks[1], blocks[4]);
        builder.fall_through(blocks[2], blocks[4]);
        builder.structured_exception_handling(blocks[3]);
        builder.fall_through(blocks[4], blocks[5]);
        let try_and_finally = builder.add_region(RegionKind::TryAndFinally, 1, 3, None);
        let try_region = builder.add_region(RegionKind::Try, 1, 2, Some(try_and_finally));
        let try_and_catch = builder.add_region(RegionKind::TryAndCatch, 1, 2, Some(try_region));
        builder.add_region(RegionKind::Try, 1, 1, Some(try_and_catch));
        builder.add_region(RegionKind::Catch, 2, 2, Some(try_and_catch));
        builder.add_region(RegionKind::Finally, 3, 3, Some(try_and_finally));
        builder.build().expect("well-formed graph")
    }

    #[test]
    fn enclosing_regions_innermost_first() {
        let cfg = try_catch_finally();
        let kinds = cfg
            .enclosing_regions(1)
            .map(|(_, region)| region.kind)
            .collect::<Vec<_>>();
        assert_eq!(
            kinds,
            vec![
                RegionKind::Try,
                RegionKind::TryAndCatch,
                RegionKind::Try,
                RegionKind::TryAndFinally,
                RegionKind::Root
            ]
        );
    }

    #[test]
    fn handlers() {
        let cfg = try_catch_finally();
        let inner_try = cfg
            .region_starting_at(1, RegionKind::Try)
            .expect("inner try region");
        let handlers = cfg.handlers_of_try(inner_try);
        assert_eq!(handlers.len(), 1);
        let catch = cfg.region(handlers[0]).expect("catch region");
        assert_eq!(catch.kind, RegionKind::Catch);
        assert_eq!(catch.first_block, 2);
        assert!(cfg.finally_of_try(inner_try).is_none());
    }

    #[test]
    fn finally_of_outer_try() {
        let cfg = try_catch_finally();
        let outer_try = cfg
            .enclosing_regions(2)
            .filter(|(_, region)| region.kind == RegionKind::Try)
            .map(|(id, _)| id)
            .last()
            .expect("outer try region");
        let finally = cfg.finally_of_try(outer_try).expect("finally region");
        assert_eq!(cfg.region(finally).map(|it| it.first_block), Some(3));
    }

    #[test]
    fn branch_leaving_try_runs_finally() {
        let cfg = try_catch_finally();
        let branch = cfg
            .block(1)
            .and_then(|it| it.fall_through.clone())
            .expect("branch");
        let finally = cfg
            .region_starting_at(3, RegionKind::Finally)
            .expect("finally region");
        assert_eq!(branch.destination, Some(4));
        assert_eq!(branch.finally_regions, vec![finally]);
        assert_eq!(branch.leaving_regions.len(), 4);
        let branch = cfg
            .block(3)
            .and_then(|it| it.fall_through.clone())
            .expect("branch");
        assert_eq!(branch.semantics, BranchSemantics::StructuredExceptionHandling);
        assert_eq!(branch.destination, None);
    }

    #[test]
    fn operation_lookup() {
        let cfg = try_catch_finally();
        let (id, op) = cfg.operations().next().expect("one operation");
        assert_eq!(op.kind, OperationKind::Literal);
        assert_eq!(cfg.block_of(id), Some(1));
        assert_eq!(cfg.root_operation(id), id);
    }
}
