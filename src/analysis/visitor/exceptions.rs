//! Exception paths: the states at throwing operations, routed to the handlers that may
//! catch them.
use std::{collections::BTreeSet, mem};

use super::OperationVisitor;
use crate::{
    analysis::{AnalysisData, DataFlowAnalysis},
    ir::{Region, RegionId, RegionKind, TypeRef},
};

/// Where a thrown exception goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct ThrownException {
    /// The catch or filter region; `None` if the exception leaves the body.
    pub handler: Option<RegionId>,
    /// The type of the exception, if known.
    pub ty: Option<TypeRef>,
}

impl<'a, A: DataFlowAnalysis> OperationVisitor<'a, A> {
    /// Records the current state as the state of an exception thrown in the current block.
    pub(crate) fn record_thrown(&mut self, ty: Option<TypeRef>) {
        if !self.context.config().exception_paths() || !self.current.is_reachable() {
            return;
        }
        let state = self.current.clone();
        self.record_thrown_state(ty, &state);
    }

    pub(crate) fn record_thrown_state(&mut self, ty: Option<TypeRef>, state: &AnalysisData<A>) {
        for handler in self.handlers_for(self.block, ty) {
            let key = ThrownException { handler, ty };
            let merged = match self.thrown.get(&key).cloned() {
                Some(existing) => self.merge_data(&existing, state),
                None => state.clone(),
            };
            if self.thrown.get(&key) == Some(&merged) {
                continue;
            }
            self.thrown.insert(key, merged);
            if let Some(handler) = handler {
                self.dirty_handlers.insert(handler);
            }
        }
    }

    /// Returns the handlers an exception thrown in a block may reach, innermost first.
    ///
    /// `None` stands for leaving the body; it is included unless some handler catches
    /// the exception for sure. An exception escaping a try region with a finally handler
    /// goes to the finally instead, which rethrows it once it completes.
    fn handlers_for(&self, ordinal: usize, ty: Option<TypeRef>) -> Vec<Option<RegionId>> {
        let cfg = self.cfg();
        let symbols = self.symbols();
        let root = symbols.well_known().exception;
        let mut handlers = Vec::new();
        for (id, region) in cfg.enclosing_regions(ordinal) {
            if region.kind != RegionKind::Try {
                continue;
            }
            for handler in cfg.handlers_of_try(id) {
                let Some(region) = cfg.region(handler) else {
                    continue;
                };
                let (definitely, maybe) = match (region.kind, region.exception_type, ty) {
                    (RegionKind::Filter, ..) => (false, true),
                    (_, None, _) => (true, true),
                    (_, Some(caught), Some(thrown)) => (
                        symbols.is_subtype_of(thrown, caught),
                        symbols.is_subtype_of(caught, thrown),
                    ),
                    (_, Some(caught), None) => (symbols.is_subtype_of(root, caught), true),
                };
                if definitely {
                    handlers.push(Some(handler));
                    return handlers;
                }
                if maybe {
                    handlers.push(Some(handler));
                }
            }
            if let Some(finally) = cfg.finally_of_try(id) {
                handlers.push(Some(finally));
                return handlers;
            }
        }
        handlers.push(None);
        handlers
    }

    /// Returns the innermost catch or filter region enclosing the current block.
    pub(crate) fn enclosing_handler(&self) -> Option<&'a Region> {
        self.cfg()
            .enclosing_regions(self.block)
            .map(|(_, region)| region)
            .find(|region| matches!(region.kind, RegionKind::Catch | RegionKind::Filter))
    }

    /// Takes the handlers whose incoming exception states changed.
    pub(crate) fn take_dirty_handlers(&mut self) -> BTreeSet<RegionId> {
        mem::take(&mut self.dirty_handlers)
    }

    /// Returns the merged state of the exceptions reaching a handler.
    pub(crate) fn thrown_to(&mut self, handler: Option<RegionId>) -> Option<AnalysisData<A>> {
        let states: Vec<_> = self
            .thrown
            .iter()
            .filter(|(key, _)| key.handler == handler)
            .map(|(_, state)| state.clone())
            .collect();
        states
            .into_iter()
            .reduce(|merged, state| self.merge_data(&merged, &state))
    }
}
