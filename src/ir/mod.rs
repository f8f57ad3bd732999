//! The program representation consumed by the analyses.
//!
//! A front end lowers method bodies into [`ControlFlowGraph`]s whose blocks hold trees of
//! [`Operation`]s, and resolves every declaration into a [`SymbolTable`]. Both are immutable
//! once handed to an analysis.
use std::{collections::BTreeMap, sync::Arc};

pub mod control_flow;
pub mod operation;
pub mod symbols;

pub use control_flow::{
    BasicBlock, BlockKind, Branch, BranchSemantics, CfgBuilder, CfgError, CfgId, ConditionKind,
    ControlFlowGraph, OperationKey, Region, RegionId, RegionKind,
};
pub use operation::{CaptureId, Constant, Operation, OperationId, OperationKind};
pub use symbols::{MethodRef, SymbolRef, SymbolTable, TypeRef};

/// A resolved program: its symbols and the bodies of its methods.
#[derive(Debug, Clone, Default)]
pub struct Program {
    symbols: SymbolTable,
    bodies: BTreeMap<MethodRef, Arc<ControlFlowGraph>>,
}

impl Program {
    /// Creates a program without method bodies.
    #[must_use]
    pub fn new(symbols: SymbolTable) -> Self {
        Self {
            symbols,
            bodies: BTreeMap::new(),
        }
    }

    /// Returns the symbol table.
    #[must_use]
    pub const fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// Attaches the body of a method.
    pub fn add_body(&mut self, method: MethodRef, cfg: ControlFlowGraph) -> Arc<ControlFlowGraph> {
        let cfg = Arc::new(cfg);
        self.bodies.insert(method, Arc::clone(&cfg));
        cfg
    }

    /// Returns the body of a method, if it is available in source.
    #[must_use]
    pub fn body(&self, method: MethodRef) -> Option<&Arc<ControlFlowGraph>> {
        self.bodies.get(&method)
    }
}
