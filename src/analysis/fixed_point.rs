//! The worklist algorithm computing the fixed point of an analysis over one graph.
//!
//! Blocks are taken from the worklist in ordinal order. The input of a block is the merge
//! of the states flowing into it along feasible branches, except that a block reached so
//! far only by one forward branch takes the latest state of that branch as is. Blocks that
//! are never reached are analyzed last, over unreachable states.
use std::collections::{BTreeMap, BTreeSet};

use log::{debug, trace};

use super::{
    AnalysisData, AnalysisError, DataFlowAnalysis,
    context::AnalysisContext,
    domain::{AbstractValueDomain, debug_assert_monotonic},
    result::{BlockResult, DataFlowAnalysisResult},
    session::AnalysisSession,
    visitor::OperationVisitor,
};
use crate::ir::{BasicBlock, Branch, BranchSemantics, ControlFlowGraph, RegionId, RegionKind};

/// Where the input of a block came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Unique(usize),
    Multiple,
}

/// Analyzes the graph of a context to its fixed point.
///
/// # Errors
/// Returns [`AnalysisError::Cancelled`] if the session is cancelled during the run.
pub(crate) fn analyze<A: DataFlowAnalysis>(
    analysis: &A,
    context: &AnalysisContext<A>,
    session: &mut AnalysisSession,
) -> Result<DataFlowAnalysisResult<A>, AnalysisError> {
    let mut fixed_point = FixedPoint::new(analysis, context, session);
    let visits = fixed_point.iterate()?;
    fixed_point.flow_unreachable_blocks();
    // Callees analyzed at the exit block may have observed a cancellation.
    fixed_point.visitor.session.check_cancelled()?;
    debug!(
        "{} reached a fixed point over {} after {visits} block visits",
        A::NAME,
        context.cfg().id()
    );
    Ok(fixed_point.into_result())
}

struct FixedPoint<'a, A: DataFlowAnalysis> {
    cfg: &'a ControlFlowGraph,
    visitor: OperationVisitor<'a, A>,
    inputs: Vec<Option<AnalysisData<A>>>,
    outputs: Vec<Option<AnalysisData<A>>>,
    sources: Vec<Option<Source>>,
    /// States along branches whose condition cannot hold, by destination.
    infeasible: BTreeMap<usize, AnalysisData<A>>,
    /// Where control goes after a finally region completes normally.
    finally_destinations: BTreeMap<RegionId, BTreeSet<usize>>,
    /// Finally regions entered by an escaping exception, which rethrow at their end.
    exceptional_finallies: BTreeSet<RegionId>,
    /// The block ranges spanned by back edges.
    loops: Vec<(usize, usize)>,
    worklist: BTreeSet<usize>,
}

impl<'a, A: DataFlowAnalysis> FixedPoint<'a, A> {
    fn new(
        analysis: &'a A,
        context: &'a AnalysisContext<A>,
        session: &'a mut AnalysisSession,
    ) -> Self {
        let cfg: &'a ControlFlowGraph = context.cfg();
        let count = cfg.blocks().len();
        let mut loops = Vec::new();
        for block in cfg.blocks() {
            for destination in block.successors().filter_map(|it| it.destination) {
                if destination <= block.ordinal {
                    loops.push((destination, block.ordinal));
                }
            }
        }
        let mut inputs: Vec<_> = (0..count).map(|_| None).collect();
        if let Some(entry) = inputs.first_mut() {
            *entry = Some(
                context
                    .interprocedural()
                    .map(|it| it.initial_data.clone())
                    .unwrap_or_default(),
            );
        }
        Self {
            cfg,
            visitor: OperationVisitor::new(analysis, context, session),
            inputs,
            outputs: (0..count).map(|_| None).collect(),
            sources: vec![None; count],
            infeasible: BTreeMap::new(),
            finally_destinations: BTreeMap::new(),
            exceptional_finallies: BTreeSet::new(),
            loops,
            worklist: BTreeSet::from([0]),
        }
    }

    fn in_loop(&self, ordinal: usize) -> bool {
        self.loops
            .iter()
            .any(|(first, last)| (*first..=*last).contains(&ordinal))
    }

    /// Runs the worklist until no block input changes, returning the number of visits.
    fn iterate(&mut self) -> Result<usize, AnalysisError> {
        let mut visits = 0;
        while let Some(ordinal) = self.worklist.pop_first() {
            self.visitor.session.check_cancelled()?;
            let cfg = self.cfg;
            let (Some(block), Some(input)) = (cfg.block(ordinal), self.inputs[ordinal].clone())
            else {
                continue;
            };
            visits += 1;
            trace!("Visiting block {ordinal} of {}", cfg.id());
            let output = self.visitor.flow_block(ordinal, input);
            self.rethrow_from_finally(ordinal, &output);
            self.flow_successors(block, &output);
            self.flow_into_protecting_handlers(ordinal, &output);
            self.outputs[ordinal] = Some(output);
            self.flow_thrown_exceptions();
        }
        Ok(visits)
    }

    fn flow_successors(&mut self, block: &'a BasicBlock, output: &AnalysisData<A>) {
        let cfg = self.cfg;
        let mut contributions: BTreeMap<usize, AnalysisData<A>> = BTreeMap::new();
        for branch in block.successors() {
            let (data, feasible) = self.visitor.flow_branch(block, branch, output.clone());
            let mut destinations = self.destinations(block, branch);
            if !feasible {
                trace!(
                    "Branch {} -> {:?} of {} is infeasible",
                    block.ordinal,
                    branch.destination,
                    cfg.id()
                );
                for destination in destinations {
                    self.record_infeasible(destination, &data);
                }
                continue;
            }
            for region in &branch.entering_regions {
                if cfg.region(*region).is_some_and(|it| it.kind == RegionKind::Try) {
                    destinations.extend(self.handler_blocks(*region, true));
                }
            }
            for destination in destinations {
                let contribution = match contributions.remove(&destination) {
                    Some(existing) => self.visitor.merge_data(&existing, &data),
                    None => data.clone(),
                };
                contributions.insert(destination, contribution);
            }
        }
        for (destination, data) in contributions {
            self.flow_into(Some(block.ordinal), destination, data);
        }
    }

    /// Returns the blocks control reaches next along a branch.
    ///
    /// A branch leaving try regions with finally handlers goes through the handlers first;
    /// the end of a finally region goes to every destination recorded for it.
    fn destinations(&mut self, block: &BasicBlock, branch: &Branch) -> Vec<usize> {
        let cfg = self.cfg;
        if let Some(destination) = branch.destination {
            let Some(first) = branch.finally_regions.first() else {
                return vec![destination];
            };
            let hops: Vec<usize> = branch
                .finally_regions
                .iter()
                .skip(1)
                .filter_map(|it| cfg.region(*it))
                .map(|it| it.first_block)
                .chain([destination])
                .collect();
            for (finally, next) in branch.finally_regions.iter().zip(hops) {
                self.record_finally_destination(*finally, next);
            }
            return cfg
                .region(*first)
                .map(|it| vec![it.first_block])
                .unwrap_or_default();
        }
        if branch.semantics != BranchSemantics::StructuredExceptionHandling {
            return Vec::new();
        }
        if let Some(finally) = cfg.region_ending_at(block.ordinal, RegionKind::Finally) {
            return self
                .finally_destinations
                .get(&finally)
                .map(|it| it.iter().copied().collect())
                .unwrap_or_default();
        }
        cfg.region_ending_at(block.ordinal, RegionKind::Filter)
            .and_then(|filter| {
                let parent = cfg.region(cfg.region(filter)?.enclosing?)?;
                let handler = parent
                    .nested
                    .iter()
                    .skip_while(|it| **it != filter)
                    .nth(1)?;
                cfg.region(*handler)
            })
            .map(|it| vec![it.first_block])
            .unwrap_or_default()
    }

    fn record_finally_destination(&mut self, finally: RegionId, destination: usize) {
        if !self
            .finally_destinations
            .entry(finally)
            .or_default()
            .insert(destination)
        {
            return;
        }
        if let Some(region) = self.cfg.region(finally)
            && self
                .inputs
                .get(region.last_block)
                .is_some_and(Option::is_some)
        {
            self.worklist.insert(region.last_block);
        }
    }

    /// Returns the first blocks of the handlers guarding a try region: its finally, and its
    /// catch and filter handlers if `catches`.
    fn handler_blocks(&self, try_region: RegionId, catches: bool) -> Vec<usize> {
        let cfg = self.cfg;
        let catch = if catches {
            cfg.handlers_of_try(try_region)
        } else {
            Vec::new()
        };
        catch
            .into_iter()
            .chain(cfg.finally_of_try(try_region))
            .filter_map(|it| cfg.region(it))
            .map(|it| it.first_block)
            .collect()
    }

    /// Flows the output of a block into the handlers of the try regions containing it.
    ///
    /// Finally handlers may run after any point of their try region. Catch handlers
    /// receive the states of throwing operations when exception paths are tracked, and
    /// the output of every protected block otherwise.
    fn flow_into_protecting_handlers(&mut self, ordinal: usize, output: &AnalysisData<A>) {
        let catches = !self.visitor.context.config().exception_paths();
        let tries: Vec<RegionId> = self
            .cfg
            .enclosing_regions(ordinal)
            .filter(|(_, region)| region.kind == RegionKind::Try)
            .map(|(id, _)| id)
            .collect();
        for try_region in tries {
            for handler in self.handler_blocks(try_region, catches) {
                self.flow_into(None, handler, output.clone());
            }
        }
    }

    /// Lets the exceptions that entered a finally region escape further once it completes.
    fn rethrow_from_finally(&mut self, ordinal: usize, output: &AnalysisData<A>) {
        if !output.is_reachable() {
            return;
        }
        if let Some(finally) = self.cfg.region_ending_at(ordinal, RegionKind::Finally)
            && self.exceptional_finallies.contains(&finally)
        {
            self.visitor.record_thrown_state(None, output);
        }
    }

    fn flow_thrown_exceptions(&mut self) {
        for handler in self.visitor.take_dirty_handlers() {
            let Some(region) = self.cfg.region(handler) else {
                continue;
            };
            if region.kind == RegionKind::Finally
                && self.exceptional_finallies.insert(handler)
                && self
                    .inputs
                    .get(region.last_block)
                    .is_some_and(Option::is_some)
            {
                self.worklist.insert(region.last_block);
            }
            if let Some(state) = self.visitor.thrown_to(Some(handler)) {
                self.flow_into(None, region.first_block, state);
            }
        }
    }

    /// Merges `data` into the input of `destination`, scheduling it if the input changed.
    ///
    /// `source` is the block the state flows from, or `None` for exceptional flow.
    fn flow_into(&mut self, source: Option<usize>, destination: usize, data: AnalysisData<A>) {
        let Some(previous) = self.inputs.get(destination).cloned() else {
            return;
        };
        let incoming = source.map_or(Source::Multiple, Source::Unique);
        let (input, origin) = match (previous, self.sources[destination]) {
            (None, _) => (data, incoming),
            (Some(_), Some(Source::Unique(only)))
                if source == Some(only) && only < destination && !self.in_loop(destination) =>
            {
                (data, incoming)
            }
            (Some(previous), _) => {
                let merged = self.visitor.merge_data(&previous, &data);
                debug_assert_monotonic(&self.visitor.data_domain(), [&previous, &data], &merged);
                (merged, Source::Multiple)
            }
        };
        self.sources[destination] = Some(origin);
        if self.inputs[destination].as_ref() != Some(&input) {
            self.inputs[destination] = Some(input);
            if self.worklist.insert(destination) {
                trace!("Scheduling block {destination} of {}", self.cfg.id());
            }
        }
    }

    fn record_infeasible(&mut self, destination: usize, data: &AnalysisData<A>) {
        let state = match self.infeasible.remove(&destination) {
            Some(existing) => self.visitor.merge_data(&existing, data),
            None => data.clone(),
        };
        self.infeasible.insert(destination, state);
    }

    /// Analyzes the blocks the worklist never reached, in ordinal order.
    ///
    /// Their input is the state along the infeasible branches into them, marked
    /// unreachable; they pass their output on to later unreached blocks.
    fn flow_unreachable_blocks(&mut self) {
        for ordinal in 0..self.inputs.len() {
            if self.inputs[ordinal].is_some() {
                continue;
            }
            let Some(block) = self.cfg.block(ordinal) else {
                continue;
            };
            let mut input = self
                .infeasible
                .remove(&ordinal)
                .unwrap_or_else(|| self.visitor.data_domain().bottom());
            input.set_reachable(false);
            trace!("Block {ordinal} of {} is unreachable", self.cfg.id());
            let output = self.visitor.flow_block(ordinal, input.clone());
            let later: Vec<usize> = block
                .successors()
                .filter_map(|it| it.destination)
                .filter(|it| *it > ordinal && self.inputs.get(*it).is_some_and(Option::is_none))
                .collect();
            for destination in later {
                self.record_infeasible(destination, &output);
            }
            self.inputs[ordinal] = Some(input);
            self.outputs[ordinal] = Some(output);
        }
    }

    fn into_result(mut self) -> DataFlowAnalysisResult<A> {
        let exceptional_exit = if self.visitor.context.config().exception_paths() {
            self.visitor.thrown_to(None)
        } else {
            None
        };
        let bottom = self.visitor.data_domain().bottom();
        let blocks = self
            .inputs
            .into_iter()
            .zip(self.outputs)
            .map(|(entry, exit)| BlockResult {
                entry: entry.unwrap_or_else(|| bottom.clone()),
                exit: exit.unwrap_or_else(|| bottom.clone()),
            })
            .collect();
        self.visitor.into_result(blocks, exceptional_exit)
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::{
        analysis::{CancellationToken, domain::FlatValue},
        tests::{ConstantPropagation, Fixture, assign_and_return, context},
    };

    #[test]
    fn straight_line_reaches_exit() {
        let mut fixture = Fixture::new();
        let (cfg, _, read) = assign_and_return(&mut fixture, 7);
        let context = context(fixture, cfg);
        let mut session = AnalysisSession::new();
        let result = analyze(&ConstantPropagation, &context, &mut session).expect("not cancelled");
        assert_eq!(result.return_value(), Some(&FlatValue::Value(7)));
        assert_eq!(result.value_of(read), Some(&FlatValue::Value(7)));
        assert!(result.blocks().iter().all(BlockResult::is_reachable));
        assert_eq!(result.exceptional_exit(), None);
    }

    #[test]
    fn cancellation_aborts_the_run() {
        let mut fixture = Fixture::new();
        let (cfg, _, _) = assign_and_return(&mut fixture, 1);
        let context = context(fixture, cfg);
        let token = CancellationToken::new();
        let mut session = AnalysisSession::with_cancellation(token.clone());
        token.cancel();
        assert_eq!(
            analyze(&ConstantPropagation, &context, &mut session).err(),
            Some(AnalysisError::Cancelled)
        );
    }
}
