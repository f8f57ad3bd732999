//! What an analysis run is about and how it is configured.
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    hash::{Hash, Hasher},
    rc::Rc,
    sync::Arc,
};

use bitflags::bitflags;

use super::{
    AnalysisData, AnalysisError, DataFlowAnalysis,
    dependency::{CopyAbstractValue, Dependent, DependentResults, ValueContentAbstractValue},
    entity::{CallStack, EntityId, PointsToAbstractValue},
};
use crate::ir::{
    CfgId, ControlFlowGraph, MethodRef, OperationKey, Program, SymbolRef, SymbolTable,
    symbols::RefKind,
};

bitflags! {
    /// Toggles of an analysis run.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AnalysisFlags: u8 {
        /// Calls that are not analyzed may modify anything reachable from their receiver
        /// and arguments.
        const PESSIMISTIC = 1 << 0;
        /// Refine the state on branch conditions.
        const PREDICATE_ANALYSIS = 1 << 1;
        /// Track the state flowing along exceptional paths.
        const EXCEPTION_PATHS = 1 << 2;
    }
}

impl Default for AnalysisFlags {
    fn default() -> Self {
        Self::PESSIMISTIC | Self::PREDICATE_ANALYSIS
    }
}

/// How calls are analyzed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum InterproceduralAnalysisKind {
    /// Calls are opaque. Lambdas and local functions are still analyzed.
    None,
    /// Callees are analyzed without the caller's state, for their return value only.
    NonContextSensitive,
    /// Callees are analyzed with the caller's state at the call site.
    #[default]
    ContextSensitive,
}

/// The configuration of an analysis run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AnalysisConfig {
    /// The toggles.
    pub flags: AnalysisFlags,
    /// How calls are analyzed.
    pub interprocedural: InterproceduralAnalysisKind,
    /// The maximum number of nested method calls analyzed.
    pub max_method_call_chain: usize,
    /// The maximum number of nested lambda and local function calls analyzed.
    pub max_lambda_call_chain: usize,
    /// Methods whose calls are always treated as opaque.
    pub skipped_methods: BTreeSet<MethodRef>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            flags: AnalysisFlags::default(),
            interprocedural: InterproceduralAnalysisKind::default(),
            max_method_call_chain: 3,
            max_lambda_call_chain: 3,
            skipped_methods: BTreeSet::new(),
        }
    }
}

impl AnalysisConfig {
    /// Replaces the toggles.
    #[must_use]
    pub fn with_flags(mut self, flags: AnalysisFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Sets how calls are analyzed.
    #[must_use]
    pub fn with_interprocedural(mut self, kind: InterproceduralAnalysisKind) -> Self {
        self.interprocedural = kind;
        self
    }

    /// Sets the maximum number of nested method calls analyzed.
    #[must_use]
    pub fn with_max_method_call_chain(mut self, max: usize) -> Self {
        self.max_method_call_chain = max;
        self
    }

    /// Sets the maximum number of nested lambda and local function calls analyzed.
    #[must_use]
    pub fn with_max_lambda_call_chain(mut self, max: usize) -> Self {
        self.max_lambda_call_chain = max;
        self
    }

    /// Treats calls to a method as opaque.
    #[must_use]
    pub fn with_skipped_method(mut self, method: MethodRef) -> Self {
        self.skipped_methods.insert(method);
        self
    }

    /// Whether unanalyzed calls reset the state they may modify.
    #[must_use]
    pub const fn is_pessimistic(&self) -> bool {
        self.flags.contains(AnalysisFlags::PESSIMISTIC)
    }

    /// Whether branch conditions refine the state.
    #[must_use]
    pub const fn predicate_analysis(&self) -> bool {
        self.flags.contains(AnalysisFlags::PREDICATE_ANALYSIS)
    }

    /// Whether exceptional paths are tracked.
    #[must_use]
    pub const fn exception_paths(&self) -> bool {
        self.flags.contains(AnalysisFlags::EXCEPTION_PATHS)
    }
}

/// What a callee knows about an argument of its call site.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArgumentInfo<V> {
    /// The argument operation in the caller.
    pub operation: OperationKey,
    /// The entity passed, if the argument is a reference to one.
    pub entity: Option<EntityId>,
    /// Where the argument may point.
    pub points_to: PointsToAbstractValue,
    /// The value of the argument.
    pub value: V,
    /// How the argument is passed.
    pub ref_kind: RefKind,
}

/// A body being analyzed for a call site, used to detect recursion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct ContextKey {
    pub method: Option<MethodRef>,
    pub cfg: CfgId,
}

/// The state handed to the analysis of a callee.
pub(crate) struct InterproceduralAnalysisData<A: DataFlowAnalysis> {
    pub initial_data: AnalysisData<A>,
    pub arguments: BTreeMap<SymbolRef, ArgumentInfo<A::Value>>,
    pub captured_variables: BTreeMap<SymbolRef, EntityId>,
    pub invocation_instance: Option<(Option<EntityId>, PointsToAbstractValue)>,
    pub address_shared: BTreeMap<EntityId, CopyAbstractValue>,
    pub call_stack: CallStack,
    pub caller_cfgs: Vec<Arc<ControlFlowGraph>>,
    pub active: Vec<ContextKey>,
    pub method_chain: usize,
    pub lambda_chain: usize,
}

impl<A: DataFlowAnalysis> fmt::Debug for InterproceduralAnalysisData<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterproceduralAnalysisData")
            .field("call_stack", &self.call_stack)
            .field("arguments", &self.arguments)
            .field("method_chain", &self.method_chain)
            .field("lambda_chain", &self.lambda_chain)
            .finish_non_exhaustive()
    }
}

/// The body an analysis runs over, together with everything the run depends on.
///
/// Two contexts are equal if they share the program, analyze the same graph of the same
/// method with the same configuration, and depend on the same prerequisite results.
pub struct AnalysisContext<A: DataFlowAnalysis> {
    program: Arc<Program>,
    cfg: Arc<ControlFlowGraph>,
    method: Option<MethodRef>,
    config: AnalysisConfig,
    dependencies: DependentResults,
    interprocedural: Option<Rc<InterproceduralAnalysisData<A>>>,
}

impl<A: DataFlowAnalysis> AnalysisContext<A> {
    /// Creates the context of a graph that is not the body of a method, e.g. an
    /// initializer.
    #[must_use]
    pub fn new(program: Arc<Program>, cfg: Arc<ControlFlowGraph>) -> Self {
        Self {
            program,
            cfg,
            method: None,
            config: AnalysisConfig::default(),
            dependencies: DependentResults::default(),
            interprocedural: None,
        }
    }

    /// Creates the context of the body of a method.
    ///
    /// # Errors
    /// Returns [`AnalysisError::MissingBody`] if the program has no body for the method.
    pub fn for_method(program: Arc<Program>, method: MethodRef) -> Result<Self, AnalysisError> {
        let cfg = program
            .body(method)
            .cloned()
            .ok_or(AnalysisError::MissingBody(method))?;
        Ok(Self {
            method: Some(method),
            ..Self::new(program, cfg)
        })
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn with_config(mut self, config: AnalysisConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces all prerequisite results.
    #[must_use]
    pub fn with_dependencies(mut self, dependencies: DependentResults) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Uses a points-to result.
    #[must_use]
    pub fn with_points_to(mut self, result: Dependent<PointsToAbstractValue>) -> Self {
        self.dependencies.points_to = Some(result);
        self
    }

    /// Uses a copy result.
    #[must_use]
    pub fn with_copy(mut self, result: Dependent<CopyAbstractValue>) -> Self {
        self.dependencies.copy = Some(result);
        self
    }

    /// Uses a value-content result.
    #[must_use]
    pub fn with_value_content(mut self, result: Dependent<ValueContentAbstractValue>) -> Self {
        self.dependencies.value_content = Some(result);
        self
    }

    /// Returns the analyzed program.
    #[must_use]
    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    /// Returns the symbol table of the program.
    #[must_use]
    pub fn symbols(&self) -> &SymbolTable {
        self.program.symbols()
    }

    /// Returns the analyzed graph.
    #[must_use]
    pub fn cfg(&self) -> &Arc<ControlFlowGraph> {
        &self.cfg
    }

    /// Returns the method owning the graph.
    #[must_use]
    pub const fn method(&self) -> Option<MethodRef> {
        self.method
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Returns the prerequisite results.
    #[must_use]
    pub const fn dependencies(&self) -> &DependentResults {
        &self.dependencies
    }

    /// Whether the graph is analyzed for a call site.
    #[must_use]
    pub const fn is_interprocedural(&self) -> bool {
        self.interprocedural.is_some()
    }

    /// Returns the call sites leading to this analysis.
    #[must_use]
    pub fn call_stack(&self) -> CallStack {
        self.interprocedural
            .as_ref()
            .map(|it| it.call_stack.clone())
            .unwrap_or_default()
    }

    pub(crate) fn interprocedural(&self) -> Option<&InterproceduralAnalysisData<A>> {
        self.interprocedural.as_deref()
    }

    pub(crate) fn key(&self) -> ContextKey {
        ContextKey {
            method: self.method,
            cfg: self.cfg.id(),
        }
    }

    /// Creates the context of a callee analyzed for a call site of this context.
    pub(crate) fn fork_for_callee(
        &self,
        cfg: Arc<ControlFlowGraph>,
        method: MethodRef,
        data: InterproceduralAnalysisData<A>,
    ) -> Self {
        Self {
            program: Arc::clone(&self.program),
            cfg,
            method: Some(method),
            config: self.config.clone(),
            dependencies: self.dependencies.clone(),
            interprocedural: Some(Rc::new(data)),
        }
    }
}

impl<A: DataFlowAnalysis> Clone for AnalysisContext<A> {
    fn clone(&self) -> Self {
        Self {
            program: Arc::clone(&self.program),
            cfg: Arc::clone(&self.cfg),
            method: self.method,
            config: self.config.clone(),
            dependencies: self.dependencies.clone(),
            interprocedural: self.interprocedural.clone(),
        }
    }
}

impl<A: DataFlowAnalysis> fmt::Debug for AnalysisContext<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisContext")
            .field("cfg", &self.cfg.id())
            .field("method", &self.method)
            .field("config", &self.config)
            .field("dependencies", &self.dependencies)
            .field("interprocedural", &self.interprocedural)
            .finish_non_exhaustive()
    }
}

impl<A: DataFlowAnalysis> PartialEq for AnalysisContext<A> {
    fn eq(&self, other: &Self) -> bool {
        let same_frame = match (&self.interprocedural, &other.interprocedural) {
            (None, None) => true,
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            _ => false,
        };
        Arc::ptr_eq(&self.program, &other.program)
            && self.cfg.id() == other.cfg.id()
            && self.method == other.method
            && self.config == other.config
            && self.dependencies == other.dependencies
            && same_frame
    }
}

impl<A: DataFlowAnalysis> Eq for AnalysisContext<A> {}

impl<A: DataFlowAnalysis> Hash for AnalysisContext<A> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.program).hash(state);
        self.cfg.id().hash(state);
        self.method.hash(state);
        self.config.hash(state);
        self.dependencies.hash(state);
        self.interprocedural.as_ref().map(Rc::as_ptr).hash(state);
    }
}
