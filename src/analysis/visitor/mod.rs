//! Transfer functions: how every operation and branch changes the state.
use std::{
    collections::{BTreeMap, BTreeSet},
    mem,
    rc::Rc,
};

use log::trace;

use super::{
    AnalysisData, DataFlowAnalysis,
    context::AnalysisContext,
    dependency::CopyAbstractValue,
    domain::{AbstractValueDomain, PredicatedAnalysisDataDomain},
    entity::{
        AbstractIndex, AbstractLocation, EntityArena, EntityFactory, EntityId, PointsToAbstractValue,
        TrackedKey,
    },
    result::{BlockResult, DataFlowAnalysisResult, PredicateValueKind},
    session::AnalysisSession,
};
use crate::ir::{
    BasicBlock, BlockKind, Branch, BranchSemantics, ConditionKind, ControlFlowGraph, MethodRef,
    Operation, OperationId, OperationKind, RegionId, SymbolTable, TypeRef,
    symbols::TypeKind,
};

mod address_shared;
mod assignment;
mod exceptions;
mod interprocedural;
mod predicate;

pub(crate) use exceptions::ThrownException;

/// The state domain of an analysis.
pub(crate) type DataDomain<'a, A> = PredicatedAnalysisDataDomain<
    <A as DataFlowAnalysis>::Key,
    <A as DataFlowAnalysis>::Value,
    &'a <A as DataFlowAnalysis>::Domain,
>;

fn instance_members_only_in<A: DataFlowAnalysis>(
    this: &AnalysisData<A>,
    other: &AnalysisData<A>,
    arena: &EntityArena,
) -> Vec<(EntityId, A::Value)> {
    this.iter()
        .filter(|(key, _)| !other.contains_key(key))
        .filter_map(|(key, value)| Some((key.entity()?, value.clone())))
        .filter(|(entity, _)| arena[*entity].is_instance_member)
        .collect()
}

/// Interprets the operations of one body for one analysis run.
///
/// The visitor owns the state of the block being analyzed in `current`, and accumulates
/// what the run reports beyond block states: operation values, predicate kinds, the
/// returned value and the results of analyzed callees.
pub(crate) struct OperationVisitor<'a, A: DataFlowAnalysis> {
    pub(crate) analysis: &'a A,
    pub(crate) context: &'a AnalysisContext<A>,
    pub(crate) session: &'a mut AnalysisSession,
    pub(crate) factory: EntityFactory,
    pub(crate) current: AnalysisData<A>,
    pub(crate) block: usize,
    pub(crate) values: BTreeMap<OperationId, A::Value>,
    pub(crate) predicate_kinds: BTreeMap<OperationId, PredicateValueKind>,
    pub(crate) interprocedural_results: BTreeMap<OperationId, Rc<DataFlowAnalysisResult<A>>>,
    pub(crate) return_value: Option<A::Value>,
    pub(crate) return_predicate_kind: Option<PredicateValueKind>,
    pub(crate) address_shared: BTreeMap<EntityId, CopyAbstractValue>,
    pub(crate) thrown: BTreeMap<ThrownException, AnalysisData<A>>,
    pub(crate) dirty_handlers: BTreeSet<RegionId>,
    pub(crate) lambdas: BTreeMap<MethodRef, OperationId>,
    pub(crate) invoked_lambdas: BTreeSet<MethodRef>,
}

impl<'a, A: DataFlowAnalysis> OperationVisitor<'a, A> {
    pub(crate) fn new(
        analysis: &'a A,
        context: &'a AnalysisContext<A>,
        session: &'a mut AnalysisSession,
    ) -> Self {
        let factory = EntityFactory::new(context, &mut session.entities);
        let address_shared = context
            .interprocedural()
            .map(|it| it.address_shared.clone())
            .unwrap_or_default();
        Self {
            analysis,
            context,
            session,
            factory,
            current: AnalysisData::<A>::default(),
            block: 0,
            values: BTreeMap::new(),
            predicate_kinds: BTreeMap::new(),
            interprocedural_results: BTreeMap::new(),
            return_value: None,
            return_predicate_kind: None,
            address_shared,
            thrown: BTreeMap::new(),
            dirty_handlers: BTreeSet::new(),
            lambdas: BTreeMap::new(),
            invoked_lambdas: BTreeSet::new(),
        }
    }

    pub(crate) fn cfg(&self) -> &'a ControlFlowGraph {
        let context: &'a AnalysisContext<A> = self.context;
        context.cfg()
    }

    pub(crate) fn symbols(&self) -> &'a SymbolTable {
        let context: &'a AnalysisContext<A> = self.context;
        context.symbols()
    }

    pub(crate) fn domain(&self) -> &'a A::Domain {
        let analysis: &'a A = self.analysis;
        analysis.domain()
    }

    pub(crate) fn data_domain(&self) -> DataDomain<'a, A> {
        PredicatedAnalysisDataDomain::new(self.domain())
    }

    pub(crate) fn unknown(&self) -> A::Value {
        self.domain().unknown_or_may_be_value()
    }

    fn operation(&self, id: OperationId) -> Option<&'a Operation> {
        self.cfg().operation(id)
    }

    fn type_of(&self, id: OperationId) -> Option<TypeRef> {
        self.operation(id).and_then(|it| it.ty)
    }

    /// Skips conversions without operator methods and parentheses.
    pub(crate) fn skip_conversions(&self, mut id: OperationId) -> OperationId {
        loop {
            match self.operation(id).map(|it| &it.kind) {
                Some(
                    OperationKind::Conversion {
                        operand,
                        operator_method: None,
                    }
                    | OperationKind::Parenthesized { operand },
                ) => id = *operand,
                _ => return id,
            }
        }
    }

    pub(crate) fn entity_of(&mut self, operation: OperationId) -> Option<EntityId> {
        self.factory
            .try_create(operation, &mut self.session.entities)
    }

    pub(crate) fn points_to(&self, operation: OperationId) -> Option<PointsToAbstractValue> {
        self.factory.points_to(operation)
    }

    /// Returns the keys holding the value of an entity read or written by `operation`.
    pub(crate) fn keys_of(&self, entity: EntityId, operation: Option<OperationId>) -> Vec<A::Key> {
        if A::Key::TRACKS_ENTITIES && self.session.entities[entity].has_unknown_instance_location()
        {
            return Vec::new();
        }
        let points_to = operation.and_then(|it| self.points_to(it));
        A::Key::keys_for_entity(entity, points_to.as_ref())
    }

    pub(crate) fn default_for_key(&self, key: &A::Key) -> A::Value {
        let ty = match key.entity() {
            Some(entity) => Some(self.session.entities[entity].ty),
            None => match key.location() {
                Some(
                    AbstractLocation::Allocation { ty, .. } | AbstractLocation::ThisOrMe { ty, .. },
                ) => *ty,
                _ => None,
            },
        };
        self.analysis.default_value(ty, self.symbols())
    }

    /// Returns the value of an entity, seeding untracked keys with the default value of
    /// the entity's type.
    pub(crate) fn value_of_entity(
        &mut self,
        entity: EntityId,
        operation: Option<OperationId>,
    ) -> A::Value {
        let default = self
            .analysis
            .default_value(Some(self.session.entities[entity].ty), self.symbols());
        let domain = self.domain();
        let mut merged: Option<A::Value> = None;
        for key in self.keys_of(entity, operation) {
            let value = if let Some(value) = self.current.get(&key) {
                value.clone()
            } else {
                if A::Key::TRACKS_ENTITIES {
                    self.current.seed(key, default.clone());
                }
                default.clone()
            };
            merged = Some(match merged {
                Some(merged) => domain.merge_owned(merged, value),
                None => value,
            });
        }
        merged.unwrap_or(default)
    }

    /// Writes the value of an entity, ignoring entities whose storage is unknown.
    pub(crate) fn set_value(
        &mut self,
        entity: EntityId,
        operation: Option<OperationId>,
        value: &A::Value,
    ) {
        for key in self.keys_of(entity, operation) {
            self.current.insert(key, value.clone());
        }
    }

    /// Writes the value of the objects an operation may point to.
    fn set_allocation_value(&mut self, creation: OperationId, value: &A::Value) {
        let Some(locations) = self
            .points_to(creation)
            .and_then(|it| it.locations().cloned())
        else {
            return;
        };
        for location in &locations {
            if let Some(key) = A::Key::key_for_location(location) {
                self.current.insert(key, value.clone());
            }
        }
    }

    /// Merges two states, filling keys tracked on one side only with their default value.
    pub(crate) fn merge_data(
        &mut self,
        left: &AnalysisData<A>,
        right: &AnalysisData<A>,
    ) -> AnalysisData<A> {
        let domain = self.data_domain();
        if !(left.is_reachable() && right.is_reachable()) {
            return domain.merge(left, right);
        }
        let mut filled_left = left.clone();
        let mut filled_right = right.clone();
        for (key, _) in left.iter() {
            if !right.contains_key(key) {
                filled_right.seed(key.clone(), self.default_for_key(key));
            }
        }
        for (key, _) in right.iter() {
            if !left.contains_key(key) {
                filled_left.seed(key.clone(), self.default_for_key(key));
            }
        }
        let mut merged = domain.merge(&filled_left, &filled_right);
        if A::Key::TRACKS_ENTITIES {
            self.merge_relocated_entities(left, right, &mut merged);
        }
        merged
    }

    /// Tracks members found under distinct instance locations on the two sides under the
    /// union of the locations.
    fn merge_relocated_entities(
        &mut self,
        left: &AnalysisData<A>,
        right: &AnalysisData<A>,
        merged: &mut AnalysisData<A>,
    ) {
        let only_left = instance_members_only_in::<A>(left, right, &self.session.entities);
        if only_left.is_empty() {
            return;
        }
        let only_right = instance_members_only_in::<A>(right, left, &self.session.entities);
        let domain = self.domain();
        for (left_entity, left_value) in &only_left {
            for (right_entity, right_value) in &only_right {
                let arena = &mut self.session.entities;
                if !arena.equals_ignoring_instance_location(*left_entity, *right_entity) {
                    continue;
                }
                let location = arena[*right_entity].instance_location.clone();
                let relocated = arena.with_merged_instance_location(*left_entity, &location);
                let value = domain.merge(left_value, right_value);
                for key in A::Key::keys_for_entity(relocated, None) {
                    merged.insert(key, value.clone());
                }
            }
        }
    }

    /// Runs the operations of a block over its input state.
    pub(crate) fn flow_block(&mut self, ordinal: usize, input: AnalysisData<A>) -> AnalysisData<A> {
        let cfg = self.cfg();
        self.current = input;
        self.block = ordinal;
        let Some(block) = cfg.block(ordinal) else {
            return mem::take(&mut self.current);
        };
        if block.kind == BlockKind::Entry {
            self.on_entry();
        }
        for operation in &block.operations {
            self.visit(*operation);
        }
        if let Some(value) = block.branch_value {
            self.visit(value);
        }
        if block.kind == BlockKind::Exit {
            self.on_exit();
        }
        mem::take(&mut self.current)
    }

    /// Computes the state flowing along a branch out of a block, and whether the branch
    /// may be taken.
    pub(crate) fn flow_branch(
        &mut self,
        block: &BasicBlock,
        branch: &Branch,
        output: AnalysisData<A>,
    ) -> (AnalysisData<A>, bool) {
        self.current = output;
        self.block = block.ordinal;
        let mut feasible = true;
        if block.condition_kind != ConditionKind::None
            && let Some(condition) = block.branch_value
        {
            let kind = if branch.is_conditional {
                block.condition_kind
            } else {
                block.condition_kind.negate()
            };
            feasible = self.flow_condition(condition, kind);
        }
        match branch.semantics {
            BranchSemantics::Return => {
                if let Some(value) = block.branch_value
                    && self.current.is_reachable()
                {
                    self.merge_return_value(value);
                }
            }
            BranchSemantics::Throw => {
                let ty = block.branch_value.and_then(|it| self.type_of(it));
                self.record_thrown(ty);
            }
            BranchSemantics::Rethrow => {
                let ty = self.enclosing_handler().and_then(|it| it.exception_type);
                self.record_thrown(ty);
            }
            _ => {}
        }
        if feasible {
            self.on_leaving_regions(&branch.leaving_regions);
        }
        (mem::take(&mut self.current), feasible)
    }

    fn merge_return_value(&mut self, operation: OperationId) {
        let value = self
            .values
            .get(&operation)
            .cloned()
            .unwrap_or_else(|| self.unknown());
        self.return_value = Some(match self.return_value.take() {
            Some(returned) => self.domain().merge_owned(returned, value),
            None => value,
        });
        let symbols = self.symbols();
        if !self
            .type_of(operation)
            .is_some_and(|it| symbols.is_boolean_or_nullable_boolean(it))
        {
            return;
        }
        let kind = match self.operation(operation).and_then(|it| it.constant.as_ref()) {
            Some(constant) => match constant.as_bool() {
                Some(true) => PredicateValueKind::AlwaysTrue,
                Some(false) => PredicateValueKind::AlwaysFalse,
                None => PredicateValueKind::Unknown,
            },
            None => self
                .predicate_kinds
                .get(&operation)
                .copied()
                .unwrap_or_default(),
        };
        self.return_predicate_kind = Some(match self.return_predicate_kind {
            Some(previous) => previous.merge(kind),
            None => kind,
        });
    }

    /// Evaluates an operation tree, recording the value of every operation.
    pub(crate) fn visit(&mut self, id: OperationId) -> A::Value {
        let Some(operation) = self.operation(id) else {
            return self.unknown();
        };
        let value = match &operation.kind {
            OperationKind::Literal | OperationKind::DefaultValue => match &operation.constant {
                Some(constant) => self.analysis.value_for_constant(constant, operation.ty),
                None => self.analysis.default_value(operation.ty, self.symbols()),
            },
            OperationKind::LocalReference { .. }
            | OperationKind::ParameterReference { .. }
            | OperationKind::InstanceReference { .. }
            | OperationKind::FlowCaptureReference { .. }
            | OperationKind::FieldReference { .. }
            | OperationKind::EventReference { .. }
            | OperationKind::PropertyReference { .. }
            | OperationKind::ArrayElementReference { .. } => {
                for child in operation.kind.children() {
                    self.visit(child);
                }
                self.visit_reference(id, operation)
            }
            OperationKind::DynamicMemberReference { instance } => {
                if let Some(instance) = instance {
                    self.visit(*instance);
                }
                self.unknown()
            }
            OperationKind::MethodReference { instance, .. } => {
                if let Some(instance) = instance {
                    self.visit(*instance);
                }
                self.analysis.value_for_operation(operation, &[])
            }
            OperationKind::FlowCapture { value, .. } => self.visit_flow_capture(id, *value),
            OperationKind::SimpleAssignment {
                target,
                value,
                is_ref,
            } => self.visit_simple_assignment(*target, *value, *is_ref),
            OperationKind::CompoundAssignment { target, value, .. } => {
                let target_value = self.visit(*target);
                let value = self.visit(*value);
                let result = self
                    .analysis
                    .value_for_operation(operation, &[target_value, value]);
                self.assign(*target, None, &result);
                result
            }
            OperationKind::Increment { target, .. } => {
                let target_value = self.visit(*target);
                let result = self.analysis.value_for_operation(operation, &[target_value]);
                self.assign(*target, None, &result);
                result
            }
            OperationKind::DeconstructionAssignment { target, value } => {
                self.visit_deconstruction(*target, *value)
            }
            OperationKind::Tuple { elements } | OperationKind::ArrayInitializer { elements } => {
                let operands: Vec<_> = elements.iter().map(|it| self.visit(*it)).collect();
                self.analysis.value_for_operation(operation, &operands)
            }
            OperationKind::ArrayCreation {
                dimensions,
                initializer,
            } => self.visit_array_creation(id, operation, dimensions, *initializer),
            OperationKind::ObjectCreation {
                constructor,
                arguments,
                initializer,
            } => self.visit_object_creation(id, operation, *constructor, arguments, *initializer),
            OperationKind::ObjectOrCollectionInitializer { initializers } => {
                for initializer in initializers {
                    self.visit(*initializer);
                }
                self.unknown()
            }
            OperationKind::Invocation {
                method,
                instance,
                arguments,
            } => self.visit_invocation(id, operation, *method, *instance, arguments),
            OperationKind::Argument { value, .. } => self.visit(*value),
            OperationKind::Parenthesized { operand } => self.visit(*operand),
            OperationKind::Conversion { operand, .. }
            | OperationKind::Unary { operand, .. }
            | OperationKind::IsNull { operand }
            | OperationKind::IsType { operand, .. } => {
                let operand = self.visit(*operand);
                self.analysis.value_for_operation(operation, &[operand])
            }
            OperationKind::Binary { left, right, .. } => {
                let left = self.visit(*left);
                let right = self.visit(*right);
                self.analysis.value_for_operation(operation, &[left, right])
            }
            OperationKind::AnonymousFunction { method } => {
                self.lambdas.entry(*method).or_insert(id);
                let value = self.analysis.value_for_operation(operation, &[]);
                self.set_allocation_value(id, &value);
                value
            }
            OperationKind::DelegateCreation { target } => {
                let target = self.visit(*target);
                let value = self.analysis.value_for_operation(operation, &[target]);
                self.set_allocation_value(id, &value);
                value
            }
            OperationKind::CaughtException => {
                let ty = self.enclosing_handler().and_then(|it| it.exception_type);
                self.analysis.value_for_caught_exception(ty)
            }
            OperationKind::Throw { exception } => {
                if let Some(exception) = exception {
                    self.visit(*exception);
                }
                let ty = exception.and_then(|it| self.type_of(it));
                self.record_thrown(ty);
                self.unknown()
            }
            OperationKind::Other { children } => {
                let operands: Vec<_> = children.iter().map(|it| self.visit(*it)).collect();
                self.analysis.value_for_operation(operation, &operands)
            }
        };
        trace!("{id} ({operation}) evaluates to {value:?}");
        self.values.insert(id, value.clone());
        value
    }

    fn visit_reference(&mut self, id: OperationId, operation: &Operation) -> A::Value {
        match self.entity_of(id) {
            Some(entity) => self.value_of_entity(entity, Some(id)),
            None => self.analysis.default_value(operation.ty, self.symbols()),
        }
    }

    fn visit_flow_capture(&mut self, id: OperationId, captured: OperationId) -> A::Value {
        let value = self.visit(captured);
        let Some(capture) = self.entity_of(id) else {
            return value;
        };
        self.set_entity_value(capture, Some(captured), &value);
        value
    }

    fn visit_simple_assignment(
        &mut self,
        target: OperationId,
        value: OperationId,
        is_ref: bool,
    ) -> A::Value {
        self.visit(target);
        let assigned = self.visit(value);
        self.assign(target, Some(value), &assigned);
        if is_ref
            && let Some(target) = self.entity_of(target)
            && let Some(source) = self.entity_of(value)
        {
            self.share_address(target, source);
        }
        assigned
    }

    fn visit_array_creation(
        &mut self,
        id: OperationId,
        operation: &Operation,
        dimensions: &[OperationId],
        initializer: Option<OperationId>,
    ) -> A::Value {
        let operands: Vec<_> = dimensions.iter().map(|it| self.visit(*it)).collect();
        if let Some(initializer) = initializer {
            self.visit(initializer);
            let symbols = self.symbols();
            let element_type = operation
                .ty
                .and_then(|it| symbols.type_info(it))
                .and_then(|it| match it.kind {
                    TypeKind::Array { element } => Some(element),
                    _ => None,
                })
                .unwrap_or(symbols.well_known().object);
            if let Some(OperationKind::ArrayInitializer { elements }) =
                self.operation(initializer).map(|it| &it.kind)
            {
                for (position, element) in elements.iter().enumerate() {
                    let Some(entity) = self.factory.create_for_array_element_initializer(
                        id,
                        vec![AbstractIndex::position(position)],
                        element_type,
                        &mut self.session.entities,
                    ) else {
                        continue;
                    };
                    let value = self
                        .values
                        .get(element)
                        .cloned()
                        .unwrap_or_else(|| self.unknown());
                    self.set_entity_value(entity, Some(*element), &value);
                }
            }
        }
        let value = self.analysis.value_for_operation(operation, &operands);
        self.set_allocation_value(id, &value);
        value
    }

    fn visit_object_creation(
        &mut self,
        id: OperationId,
        operation: &Operation,
        constructor: Option<MethodRef>,
        arguments: &[OperationId],
        initializer: Option<OperationId>,
    ) -> A::Value {
        let operands: Vec<_> = arguments.iter().map(|it| self.visit(*it)).collect();
        if let Some(constructor) = constructor {
            self.visit_call(id, constructor, Some(id), arguments);
        }
        let value = self.analysis.value_for_operation(operation, &operands);
        self.set_allocation_value(id, &value);
        if let Some(initializer) = initializer {
            self.visit(initializer);
        }
        self.record_thrown(None);
        value
    }

    fn visit_invocation(
        &mut self,
        id: OperationId,
        operation: &Operation,
        method: MethodRef,
        instance: Option<OperationId>,
        arguments: &[OperationId],
    ) -> A::Value {
        let mut operands = Vec::with_capacity(arguments.len() + 1);
        if let Some(instance) = instance {
            operands.push(self.visit(instance));
        }
        operands.extend(arguments.iter().map(|it| self.visit(*it)));
        let returned = self.visit_call(id, method, instance, arguments);
        if let Some(instance) = instance
            && let Some(receiver) = self.values.get(&instance).cloned()
            && let Some(updated) =
                self.analysis
                    .value_for_receiver_after_invocation(operation, method, &receiver)
            && let Some(entity) = self.entity_of(instance)
        {
            self.set_value(entity, Some(instance), &updated);
        }
        self.record_thrown(None);
        returned.unwrap_or_else(|| self.analysis.value_for_operation(operation, &operands))
    }

    /// Seeds the parameters of the analyzed method.
    fn on_entry(&mut self) {
        let symbols = self.symbols();
        let Some(method) = self.context.method().and_then(|it| symbols.method(it)) else {
            return;
        };
        let context: &'a AnalysisContext<A> = self.context;
        let interprocedural = context.interprocedural();
        for parameter in &method.parameters {
            let Some(entity) = self
                .factory
                .create_for_symbol_declaration(*parameter, &mut self.session.entities)
            else {
                continue;
            };
            let default = self
                .analysis
                .default_value(symbols.symbol_type(*parameter), symbols);
            let argument = interprocedural.and_then(|it| it.arguments.get(parameter));
            let value = self
                .analysis
                .value_for_parameter_on_entry(*parameter, argument, default);
            if let Some(argument) = argument
                && let Some(source) = argument.entity
            {
                if argument.ref_kind.is_writable_reference() {
                    self.share_address(entity, source);
                }
                if symbols.has_value_copy_semantics(self.session.entities[entity].ty) {
                    self.copy_descendants(source, entity);
                }
            }
            self.set_value(entity, None, &value);
        }
    }

    /// Lets parameters escape, or stops tracking them when returning to a caller.
    fn on_exit(&mut self) {
        self.analyze_standalone_lambdas();
        let symbols = self.symbols();
        let Some(method) = self.context.method().and_then(|it| symbols.method(it)) else {
            return;
        };
        let is_interprocedural = self.context.is_interprocedural();
        for parameter in &method.parameters {
            let Some(entity) = self
                .factory
                .create_for_symbol_declaration(*parameter, &mut self.session.entities)
            else {
                continue;
            };
            let is_writable = symbols
                .symbol(*parameter)
                .is_some_and(|it| it.ref_kind().is_writable_reference());
            if is_interprocedural && !is_writable {
                self.stop_tracking_entity(entity);
                continue;
            }
            let value = self.value_of_entity(entity, None);
            if let Some(escaped) = self
                .analysis
                .escaped_value_for_parameter_on_exit(*parameter, &value)
            {
                self.write_shared(entity, &escaped);
            }
        }
    }

    /// Stops tracking the captures and locals of regions a branch leaves.
    fn on_leaving_regions(&mut self, regions: &[RegionId]) {
        if regions.is_empty() || !A::Key::TRACKS_ENTITIES {
            return;
        }
        let cfg = self.cfg();
        for region in regions.iter().filter_map(|it| cfg.region(*it)) {
            for local in &region.locals {
                if let Some(entity) = self
                    .factory
                    .create_for_symbol_declaration(*local, &mut self.session.entities)
                {
                    self.stop_tracking_entity(entity);
                }
            }
            if region.captures.is_empty() {
                continue;
            }
            let arena = &self.session.entities;
            let captures: Vec<EntityId> = self
                .current
                .iter()
                .filter_map(|(key, _)| key.entity())
                .filter(|entity| {
                    arena[*entity].capture().is_some_and(|capture| {
                        capture.cfg == cfg.id() && region.captures.contains(&capture.capture)
                    })
                })
                .collect();
            for capture in captures {
                self.stop_tracking_entity(capture);
            }
        }
    }

    /// Drops the values of an entity and its descendants.
    pub(crate) fn stop_tracking_entity(&mut self, entity: EntityId) {
        let arena = &self.session.entities;
        self.current.retain_keys(|key| {
            key.entity()
                .is_none_or(|it| it != entity && !arena.has_ancestor(it, entity))
        });
        self.current.stop_tracking_predicated_data(entity);
    }

    /// Assembles the result of the run.
    pub(crate) fn into_result(
        self,
        blocks: Vec<BlockResult<A>>,
        exceptional_exit: Option<AnalysisData<A>>,
    ) -> DataFlowAnalysisResult<A> {
        DataFlowAnalysisResult {
            cfg: std::sync::Arc::clone(self.context.cfg()),
            blocks,
            values: self.values,
            predicate_kinds: self.predicate_kinds,
            exceptional_exit,
            return_value: self.return_value,
            return_predicate_kind: self.return_predicate_kind,
            interprocedural: self.interprocedural_results,
        }
    }
}
