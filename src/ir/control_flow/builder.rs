use std::{collections::BTreeMap, sync::Arc};

use super::{
    BasicBlock, BlockKind, Branch, BranchSemantics, CfgId, ConditionKind, ControlFlowGraph, Region,
    RegionId, RegionKind,
};
use crate::ir::{
    operation::{CaptureId, Operation, OperationId},
    symbols::{MethodRef, SymbolRef, TypeRef},
};

/// An error raised when a control flow graph is malformed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CfgError {
    /// The graph lacks an entry or an exit block.
    #[error("A control flow graph needs at least an entry and an exit block")]
    TooFewBlocks,
    /// A block other than the exit has no successor.
    #[error("Block {0} has no fall-through successor")]
    MissingFallThrough(usize),
    /// The exit block has a successor.
    #[error("The exit block must not have successors")]
    ExitHasSuccessor,
    /// A branch targets a block that does not exist.
    #[error("Branch from block {from} targets non-existent block {to}")]
    InvalidDestination {
        /// The source block.
        from: usize,
        /// The missing destination.
        to: usize,
    },
    /// A conditional branch has no branch value.
    #[error("Block {0} branches conditionally without a branch value")]
    MissingBranchValue(usize),
    /// A region spans blocks outside the graph.
    #[error("Region {region} spans blocks {first}..={last} which is out of range")]
    InvalidRegionRange {
        /// The region.
        region: RegionId,
        /// The first block.
        first: usize,
        /// The last block.
        last: usize,
    },
    /// A region is not contained in its enclosing region.
    #[error("Region {0} is not nested in its enclosing region")]
    RegionNotNested(RegionId),
    /// Two sibling regions overlap.
    #[error("Regions {0} and {1} overlap")]
    OverlappingRegions(RegionId, RegionId),
    /// An operation id does not exist.
    #[error("Operation {0} is not defined")]
    UnknownOperation(OperationId),
    /// An operation was created before one of its children.
    #[error("Operation {child} must be created before its parent {parent}")]
    ChildAfterParent {
        /// The parent.
        parent: OperationId,
        /// The child.
        child: OperationId,
    },
    /// An operation is the child of two operations, or a child and a statement.
    #[error("Operation {0} has more than one parent")]
    SharedOperation(OperationId),
}

#[derive(Debug, Default)]
struct PendingBlock {
    operations: Vec<OperationId>,
    branch_value: Option<OperationId>,
    condition_kind: ConditionKind,
    fall_through: Option<(Option<usize>, BranchSemantics)>,
    conditional: Option<usize>,
}

/// Incrementally constructs a [`ControlFlowGraph`].
///
/// Blocks are numbered in creation order; the first block becomes the entry and the last
/// one the exit. Operations must be created after their children.
#[derive(Debug)]
pub struct CfgBuilder {
    id: CfgId,
    operations: Vec<Operation>,
    blocks: Vec<PendingBlock>,
    regions: Vec<Region>,
    nested: BTreeMap<MethodRef, Arc<ControlFlowGraph>>,
}

impl CfgBuilder {
    /// Creates an empty builder for the graph with the given id.
    #[must_use]
    pub fn new(id: CfgId) -> Self {
        let root = Region {
            kind: RegionKind::Root,
            first_block: 0,
            last_block: 0,
            enclosing: None,
            nested: Vec::new(),
            locals: Vec::new(),
            captures: Vec::new(),
            exception_type: None,
        };
        Self {
            id,
            operations: Vec::new(),
            blocks: Vec::new(),
            regions: vec![root],
            nested: BTreeMap::new(),
        }
    }

    /// Adds an operation and returns its id.
    pub fn add_operation(&mut self, operation: Operation) -> OperationId {
        self.operations.push(operation);
        OperationId::from_index(self.operations.len() - 1)
    }

    /// Adds a block and returns its ordinal.
    pub fn add_block(&mut self) -> usize {
        self.blocks.push(PendingBlock::default());
        self.blocks.len() - 1
    }

    /// Appends a statement to a block.
    pub fn push_statement(&mut self, block: usize, operation: OperationId) {
        if let Some(it) = self.blocks.get_mut(block) {
            it.operations.push(operation);
        }
    }

    /// Adds a regular fall-through branch.
    pub fn fall_through(&mut self, from: usize, to: usize) {
        self.set_fall_through(from, Some(to), BranchSemantics::Regular);
    }

    /// Adds a conditional branch taken when `value` matches `kind`.
    pub fn conditional(&mut self, from: usize, value: OperationId, kind: ConditionKind, to: usize) {
        if let Some(it) = self.blocks.get_mut(from) {
            it.branch_value = Some(value);
            it.condition_kind = kind;
            it.conditional = Some(to);
        }
    }

    /// Makes the block return, optionally with a value.
    ///
    /// The destination is the exit block.
    pub fn return_value(&mut self, from: usize, value: Option<OperationId>) {
        if let Some(it) = self.blocks.get_mut(from) {
            it.branch_value = value;
        }
        self.set_fall_through(from, None, BranchSemantics::Return);
    }

    /// Makes the block throw `value`.
    pub fn throw(&mut self, from: usize, value: OperationId) {
        if let Some(it) = self.blocks.get_mut(from) {
            it.branch_value = Some(value);
        }
        self.set_fall_through(from, None, BranchSemantics::Throw);
    }

    /// Makes the block rethrow the caught exception.
    pub fn rethrow(&mut self, from: usize) {
        self.set_fall_through(from, None, BranchSemantics::Rethrow);
    }

    /// Ends a finally or filter region.
    pub fn structured_exception_handling(&mut self, from: usize) {
        self.set_fall_through(from, None, BranchSemantics::StructuredExceptionHandling);
    }

    fn set_fall_through(&mut self, from: usize, to: Option<usize>, semantics: BranchSemantics) {
        if let Some(it) = self.blocks.get_mut(from) {
            it.fall_through = Some((to, semantics));
        }
    }

    /// Adds a region spanning `first..=last` inside `enclosing` (the root if `None`).
    pub fn add_region(
        &mut self,
        kind: RegionKind,
        first: usize,
        last: usize,
        enclosing: Option<RegionId>,
    ) -> RegionId {
        self.regions.push(Region {
            kind,
            first_block: first,
            last_block: last,
            enclosing: Some(enclosing.unwrap_or(RegionId::ROOT)),
            nested: Vec::new(),
            locals: Vec::new(),
            captures: Vec::new(),
            exception_type: None,
        });
        RegionId::from_index(self.regions.len() - 1)
    }

    /// Declares locals whose lifetime is the region.
    pub fn declare_locals(&mut self, region: RegionId, locals: impl IntoIterator<Item = SymbolRef>) {
        if let Some(it) = self.regions.get_mut(region.index()) {
            it.locals.extend(locals);
        }
    }

    /// Declares flow captures whose lifetime is the region.
    pub fn declare_captures(
        &mut self,
        region: RegionId,
        captures: impl IntoIterator<Item = CaptureId>,
    ) {
        if let Some(it) = self.regions.get_mut(region.index()) {
            it.captures.extend(captures);
        }
    }

    /// Sets the exception type caught by a catch or filter region.
    pub fn catch_type(&mut self, region: RegionId, ty: TypeRef) {
        if let Some(it) = self.regions.get_mut(region.index()) {
            it.exception_type = Some(ty);
        }
    }

    /// Attaches the graph of a lambda or local function declared in this body.
    pub fn add_nested_graph(&mut self, method: MethodRef, cfg: Arc<ControlFlowGraph>) {
        self.nested.insert(method, cfg);
    }

    /// Validates the graph and computes predecessors, parents and region crossings.
    ///
    /// # Errors
    /// Returns [`CfgError`] if the blocks, branches, regions or operations are malformed.
    pub fn build(self) -> Result<ControlFlowGraph, CfgError> {
        let Self {
            id,
            mut operations,
            blocks,
            mut regions,
            nested,
        } = self;
        if blocks.len() < 2 {
            return Err(CfgError::TooFewBlocks);
        }
        let exit = blocks.len() - 1;
        regions[0].last_block = exit;
        link_regions(&mut regions, blocks.len())?;
        link_operations(&mut operations, &blocks)?;

        let mut built = blocks
            .into_iter()
            .enumerate()
            .map(|(ordinal, pending)| {
                let kind = match ordinal {
                    0 => BlockKind::Entry,
                    it if it == exit => BlockKind::Exit,
                    _ => BlockKind::Block,
                };
                if kind == BlockKind::Exit {
                    if pending.fall_through.is_some() || pending.conditional.is_some() {
                        return Err(CfgError::ExitHasSuccessor);
                    }
                } else if pending.fall_through.is_none() {
                    return Err(CfgError::MissingFallThrough(ordinal));
                }
                if pending.conditional.is_some() && pending.branch_value.is_none() {
                    return Err(CfgError::MissingBranchValue(ordinal));
                }
                let region = innermost_region(&regions, ordinal);
                let fall_through = pending.fall_through.map(|(to, semantics)| {
                    let to = match semantics {
                        BranchSemantics::Return => Some(exit),
                        _ => to,
                    };
                    branch(&regions, ordinal, to, semantics, false)
                });
                let conditional = pending
                    .conditional
                    .map(|to| branch(&regions, ordinal, Some(to), BranchSemantics::Regular, true));
                Ok(BasicBlock {
                    ordinal,
                    kind,
                    operations: pending.operations,
                    branch_value: pending.branch_value,
                    condition_kind: pending.condition_kind,
                    fall_through,
                    conditional,
                    region,
                    predecessors: Vec::new(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut predecessors = vec![Vec::new(); built.len()];
        for block in &built {
            for branch in block.successors() {
                if let Some(to) = branch.destination {
                    let slot = predecessors.get_mut(to).ok_or(CfgError::InvalidDestination {
                        from: block.ordinal,
                        to,
                    })?;
                    if !slot.contains(&block.ordinal) {
                        slot.push(block.ordinal);
                    }
                }
            }
        }
        for (block, preds) in built.iter_mut().zip(predecessors) {
            block.predecessors = preds;
        }

        Ok(ControlFlowGraph {
            id,
            blocks: built,
            regions,
            operations,
            nested,
        })
    }
}

fn link_regions(regions: &mut [Region], block_count: usize) -> Result<(), CfgError> {
    for (index, region) in regions.iter().enumerate() {
        if region.first_block > region.last_block || region.last_block >= block_count {
            return Err(CfgError::InvalidRegionRange {
                region: RegionId::from_index(index),
                first: region.first_block,
                last: region.last_block,
            });
        }
    }
    let mut children: Vec<Vec<RegionId>> = vec![Vec::new(); regions.len()];
    for (index, region) in regions.iter().enumerate().skip(1) {
        let id = RegionId::from_index(index);
        let parent_id = region.enclosing.unwrap_or(RegionId::ROOT);
        let parent = regions
            .get(parent_id.index())
            .filter(|_| parent_id.index() < index)
            .ok_or(CfgError::RegionNotNested(id))?;
        if region.first_block < parent.first_block || region.last_block > parent.last_block {
            return Err(CfgError::RegionNotNested(id));
        }
        children[parent_id.index()].push(id);
    }
    for (index, mut nested) in children.into_iter().enumerate() {
        nested.sort_by_key(|it| regions[it.index()].first_block);
        for pair in nested.windows(2) {
            if regions[pair[0].index()].last_block >= regions[pair[1].index()].first_block {
                return Err(CfgError::OverlappingRegions(pair[0], pair[1]));
            }
        }
        regions[index].nested = nested;
    }
    Ok(())
}

fn link_operations(operations: &mut [Operation], blocks: &[PendingBlock]) -> Result<(), CfgError> {
    let count = operations.len();
    let mut parents: Vec<Option<OperationId>> = vec![None; count];
    let mut roots = vec![false; count];
    for (index, operation) in operations.iter().enumerate() {
        let parent = OperationId::from_index(index);
        for child in operation.kind.children() {
            if child.index() >= count {
                return Err(CfgError::UnknownOperation(child));
            }
            if child.index() >= index {
                return Err(CfgError::ChildAfterParent { parent, child });
            }
            if parents[child.index()].replace(parent).is_some() {
                return Err(CfgError::SharedOperation(child));
            }
        }
    }
    for block in blocks {
        for root in block.operations.iter().chain(&block.branch_value) {
            let slot = roots
                .get_mut(root.index())
                .ok_or(CfgError::UnknownOperation(*root))?;
            if *slot || parents[root.index()].is_some() {
                return Err(CfgError::SharedOperation(*root));
            }
            *slot = true;
        }
    }
    for (operation, parent) in operations.iter_mut().zip(parents) {
        operation.parent = parent;
    }
    Ok(())
}

fn innermost_region(regions: &[Region], ordinal: usize) -> RegionId {
    let mut current = RegionId::ROOT;
    while let Some(child) = regions[current.index()]
        .nested
        .iter()
        .copied()
        .find(|it| regions[it.index()].contains(ordinal))
    {
        current = child;
    }
    current
}

fn region_chain(regions: &[Region], ordinal: usize) -> Vec<RegionId> {
    std::iter::successors(Some(innermost_region(regions, ordinal)), |id| {
        regions[id.index()].enclosing
    })
    .collect()
}

fn branch(
    regions: &[Region],
    source: usize,
    destination: Option<usize>,
    semantics: BranchSemantics,
    is_conditional: bool,
) -> Branch {
    let (leaving_regions, entering_regions) = match destination {
        Some(to) => {
            let from_chain = region_chain(regions, source);
            let to_chain = region_chain(regions, to);
            let leaving = from_chain
                .iter()
                .copied()
                .filter(|id| !regions[id.index()].contains(to))
                .collect::<Vec<_>>();
            let mut entering = to_chain
                .iter()
                .copied()
                .filter(|id| !regions[id.index()].contains(source))
                .collect::<Vec<_>>();
            entering.reverse();
            (leaving, entering)
        }
        None => (Vec::new(), Vec::new()),
    };
    let finally_regions = leaving_regions
        .iter()
        .filter(|id| regions[id.index()].kind == RegionKind::Try)
        .filter_map(|id| {
            let parent = regions[id.index()].enclosing?;
            let parent = &regions[parent.index()];
            if parent.kind != RegionKind::TryAndFinally {
                return None;
            }
            parent
                .nested
                .iter()
                .copied()
                .find(|it| regions[it.index()].kind == RegionKind::Finally)
        })
        .collect();
    Branch {
        source,
        destination,
        semantics,
        is_conditional,
        entering_regions,
        leaving_regions,
        finally_regions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::operation::{Constant, OperationKind};

    fn straight_line(blocks: usize) -> CfgBuilder {
        let mut builder = CfgBuilder::new(CfgId::from(7));
        for _ in 0..blocks {
            builder.add_block();
        }
        for ordinal in 0..blocks.saturating_sub(1) {
            builder.fall_through(ordinal, ordinal + 1);
        }
        builder
    }

    #[test]
    fn too_few_blocks() {
        assert_eq!(
            straight_line(1).build().err(),
            Some(CfgError::TooFewBlocks)
        );
    }

    #[test]
    fn kinds_and_predecessors() {
        let cfg = straight_line(3).build().expect("valid graph");
        assert_eq!(cfg.entry().kind, BlockKind::Entry);
        assert_eq!(cfg.exit().kind, BlockKind::Exit);
        assert_eq!(cfg.blocks()[1].kind, BlockKind::Block);
        assert_eq!(cfg.exit().predecessors, vec![1]);
        assert_eq!(cfg.id(), CfgId::from(7));
    }

    #[test]
    fn missing_fall_through() {
        let mut builder = CfgBuilder::new(CfgId::from(0));
        builder.add_block();
        builder.add_block();
        assert_eq!(builder.build().err(), Some(CfgError::MissingFallThrough(0)));
    }

    #[test]
    fn invalid_destination() {
        let mut builder = straight_line(2);
        builder.fall_through(0, 5);
        assert_eq!(
            builder.build().err(),
            Some(CfgError::InvalidDestination { from: 0, to: 5 })
        );
    }

    #[test]
    fn return_targets_exit() {
        let mut builder = straight_line(3);
        let value = builder.add_operation(Operation::literal(Constant::Int(3), None));
        builder.return_value(1, Some(value));
        let cfg = builder.build().expect("valid graph");
        let branch = cfg.blocks()[1].fall_through.as_ref().expect("branch");
        assert_eq!(branch.semantics, BranchSemantics::Return);
        assert_eq!(branch.destination, Some(2));
        assert_eq!(cfg.blocks()[1].branch_value, Some(value));
    }

    #[test]
    fn region_not_nested() {
        let mut builder = straight_line(4);
        let outer = builder.add_region(RegionKind::LocalLifetime, 1, 1, None);
        builder.add_region(RegionKind::LocalLifetime, 1, 2, Some(outer));
        assert!(matches!(
            builder.build(),
            Err(CfgError::RegionNotNested(_))
        ));
    }

    #[test]
    fn overlapping_regions() {
        let mut builder = straight_line(4);
        builder.add_region(RegionKind::LocalLifetime, 1, 2, None);
        builder.add_region(RegionKind::LocalLifetime, 2, 2, None);
        assert!(matches!(
            builder.build(),
            Err(CfgError::OverlappingRegions(_, _))
        ));
    }

    #[test]
    fn region_out_of_range() {
        let mut builder = straight_line(3);
        builder.add_region(RegionKind::LocalLifetime, 1, 9, None);
        assert!(matches!(
            builder.build(),
            Err(CfgError::InvalidRegionRange { .. })
        ));
    }

    #[test]
    fn operation_parents() {
        let mut builder = straight_line(3);
        let left = builder.add_operation(Operation::literal(Constant::Int(1), None));
        let right = builder.add_operation(Operation::literal(Constant::Int(2), None));
        let sum = builder.add_operation(Operation::new(
            OperationKind::Binary {
                operator: crate::ir::operation::BinaryOperator::Add,
                left,
                right,
                operator_method: None,
            },
            None,
        ));
        builder.push_statement(1, sum);
        let cfg = builder.build().expect("valid graph");
        assert_eq!(cfg.operation(left).and_then(|it| it.parent), Some(sum));
        assert_eq!(cfg.root_operation(right), sum);
        assert_eq!(cfg.ancestors(left).collect::<Vec<_>>(), vec![sum]);
        assert_eq!(cfg.block_of(left), Some(1));
    }

    #[test]
    fn shared_operation() {
        let mut builder = straight_line(3);
        let literal = builder.add_operation(Operation::literal(Constant::Int(1), None));
        builder.push_statement(1, literal);
        builder.push_statement(1, literal);
        assert_eq!(
            builder.build().err(),
            Some(CfgError::SharedOperation(literal))
        );
    }

    #[test]
    fn child_after_parent() {
        let mut builder = straight_line(3);
        let parent = builder.add_operation(Operation::new(
            OperationKind::Parenthesized {
                operand: OperationId::from(1),
            },
            None,
        ));
        builder.add_operation(Operation::literal(Constant::Int(1), None));
        assert_eq!(
            builder.build().err(),
            Some(CfgError::ChildAfterParent {
                parent,
                child: OperationId::from(1)
            })
        );
    }

    #[test]
    fn entering_and_leaving_regions() {
        let mut builder = straight_line(4);
        let scope = builder.add_region(RegionKind::LocalLifetime, 1, 2, None);
        let cfg = builder.build().expect("valid graph");
        let into = cfg.blocks()[0].fall_through.as_ref().expect("branch");
        assert_eq!(into.entering_regions, vec![scope]);
        assert!(into.leaving_regions.is_empty());
        let out_of = cfg.blocks()[2].fall_through.as_ref().expect("branch");
        assert_eq!(out_of.leaving_regions, vec![scope]);
        assert_eq!(cfg.blocks()[1].region, scope);
    }
}
