//! Descending into the bodies of called methods, lambdas and local functions.
use std::{
    collections::{BTreeMap, BTreeSet},
    mem,
    rc::Rc,
    sync::Arc,
};

use log::debug;

use super::OperationVisitor;
use crate::{
    analysis::{
        AnalysisData, DataFlowAnalysis, InterproceduralAnalysisKind,
        context::{AnalysisContext, ArgumentInfo, ContextKey, InterproceduralAnalysisData},
        domain::AbstractValueDomain,
        entity::{AbstractLocation, CallStack, EntityArena, EntityId, PointsToAbstractValue, TrackedKey},
        fixed_point,
        result::DataFlowAnalysisResult,
    },
    ir::{
        CfgId, ControlFlowGraph, MethodRef, OperationId, OperationKind, SymbolRef,
        symbols::{MethodFlags, MethodKind, RefKind, Symbol},
    },
};

/// Whether a key only exists in the frame identified by `call_stack`.
fn is_frame_local<K: TrackedKey>(key: &K, arena: &EntityArena, call_stack: &CallStack) -> bool {
    let in_frame = |location: &AbstractLocation| match location {
        AbstractLocation::Symbol {
            call_stack: frame, ..
        }
        | AbstractLocation::FlowCapture {
            call_stack: frame, ..
        }
        | AbstractLocation::ThisOrMe {
            call_stack: frame, ..
        } => frame == call_stack,
        _ => false,
    };
    match key.entity() {
        Some(entity) => {
            let root = &arena[arena.ancestors(entity).last().unwrap_or(entity)];
            !root.is_instance_member
                && root
                    .instance_location
                    .locations()
                    .is_some_and(|it| !it.is_empty() && it.iter().all(in_frame))
        }
        None => key.location().is_some_and(in_frame),
    }
}

/// Returns the lambda or method a delegate-producing operation refers to.
fn lambda_of(cfg: &ControlFlowGraph, operation: OperationId) -> Option<MethodRef> {
    match &cfg.operation(operation)?.kind {
        OperationKind::AnonymousFunction { method } | OperationKind::MethodReference { method, .. } => {
            Some(*method)
        }
        OperationKind::DelegateCreation { target }
        | OperationKind::Conversion {
            operand: target,
            operator_method: None,
        }
        | OperationKind::Parenthesized { operand: target } => lambda_of(cfg, *target),
        _ => None,
    }
}

impl<'a, A: DataFlowAnalysis> OperationVisitor<'a, A> {
    /// Applies the effects of a call.
    ///
    /// Returns the value returned by the callees if every possible callee was analyzed.
    pub(crate) fn visit_call(
        &mut self,
        call: OperationId,
        method: MethodRef,
        receiver: Option<OperationId>,
        arguments: &[OperationId],
    ) -> Option<A::Value> {
        if !self.current.is_reachable() {
            return None;
        }
        let symbols = self.symbols();
        let is_delegate_invoke = symbols
            .method(method)
            .is_some_and(|it| it.kind == MethodKind::DelegateInvoke);
        let (targets, callee_receiver) = if is_delegate_invoke {
            let targets = receiver
                .map(|it| self.resolve_delegate_targets(it))
                .unwrap_or_default();
            (targets, None)
        } else {
            (vec![method], receiver)
        };

        let before = self.current.clone();
        let mut outcomes = Vec::with_capacity(targets.len());
        for target in &targets {
            self.current = before.clone();
            let Some(returned) = self.analyze_callee(call, *target, callee_receiver, arguments)
            else {
                outcomes.clear();
                break;
            };
            outcomes.push((mem::take(&mut self.current), returned));
        }
        if outcomes.is_empty() {
            self.current = before;
            self.apply_opaque_call(method, receiver, arguments, is_delegate_invoke);
            return None;
        }
        for target in &targets {
            if symbols
                .method(*target)
                .is_some_and(|it| it.is_lambda_or_local_function())
            {
                self.invoked_lambdas.insert(*target);
            }
        }

        let domain = self.domain();
        let mut outcomes = outcomes.into_iter();
        let (mut state, mut returned) = outcomes.next()?;
        for (other_state, other_returned) in outcomes {
            state = self.merge_data(&state, &other_state);
            returned = match (returned, other_returned) {
                (Some(a), Some(b)) => Some(domain.merge_owned(a, b)),
                (a, b) => a.or(b),
            };
        }
        self.current = state;
        returned
    }

    /// Analyzes one callee for a call site, leaving the state after the call in
    /// `current`.
    ///
    /// Returns `None` if the callee is not analyzed; otherwise the value it returns.
    fn analyze_callee(
        &mut self,
        call: OperationId,
        target: MethodRef,
        receiver: Option<OperationId>,
        arguments: &[OperationId],
    ) -> Option<Option<A::Value>> {
        let context: &'a AnalysisContext<A> = self.context;
        let config = context.config();
        let info = self.symbols().method(target)?;
        let is_lambda = info.is_lambda_or_local_function();
        if config.interprocedural == InterproceduralAnalysisKind::None && !is_lambda {
            return None;
        }
        if config.skipped_methods.contains(&target)
            || info.is_overridable()
            || info
                .flags
                .intersects(MethodFlags::IMPLICIT | MethodFlags::EXTERN)
        {
            debug!("Not descending into {target}");
            return None;
        }
        let cfg = self.resolve_body(target, is_lambda)?;
        let key = ContextKey {
            method: Some(target),
            cfg: cfg.id(),
        };
        let caller = context.interprocedural();
        if context.key() == key || caller.is_some_and(|it| it.active.contains(&key)) {
            debug!("Not descending into the recursive call of {target}");
            return None;
        }
        let (method_chain, lambda_chain) =
            caller.map_or((0, 0), |it| (it.method_chain, it.lambda_chain));
        let exceeded = if is_lambda {
            lambda_chain >= config.max_lambda_call_chain
        } else {
            method_chain >= config.max_method_call_chain
        };
        if exceeded {
            debug!("Not descending into {target}: the call chain is too long");
            return None;
        }

        let context_sensitive =
            is_lambda || config.interprocedural == InterproceduralAnalysisKind::ContextSensitive;
        let arguments_info = self.argument_infos(target, arguments);
        let invocation_instance = if is_lambda {
            Some((
                Some(self.factory.create_this_or_me_instance()),
                self.factory.this_points_to().clone(),
            ))
        } else {
            receiver.map(|it| {
                (
                    self.entity_of(it),
                    self.points_to(it)
                        .unwrap_or_else(PointsToAbstractValue::unknown),
                )
            })
        };
        let captured_variables = if is_lambda {
            self.captured_variables()
        } else {
            BTreeMap::new()
        };
        let initial_data = if is_lambda {
            self.current.clone()
        } else if context_sensitive {
            self.callee_initial_data(&arguments_info, invocation_instance.as_ref())
        } else {
            AnalysisData::<A>::default()
        };
        let mut caller_cfgs = caller.map(|it| it.caller_cfgs.clone()).unwrap_or_default();
        caller_cfgs.push(Arc::clone(context.cfg()));
        let mut active = caller.map(|it| it.active.clone()).unwrap_or_default();
        active.push(context.key());
        let data = InterproceduralAnalysisData {
            initial_data,
            arguments: arguments_info,
            captured_variables,
            invocation_instance,
            address_shared: self.address_shared.clone(),
            call_stack: context.call_stack().push(self.cfg().key(call)),
            caller_cfgs,
            active,
            method_chain: method_chain + usize::from(!is_lambda),
            lambda_chain: lambda_chain + usize::from(is_lambda),
        };
        let callee_context = context.fork_for_callee(cfg, target, data);

        debug!("Analyzing {target} for {call} of {}", self.cfg().id());
        let result = match fixed_point::analyze(self.analysis, &callee_context, self.session) {
            Ok(result) => Rc::new(result),
            Err(error) => {
                // The driver of this body observes the cancellation through the session.
                debug!("Abandoning the analysis of {target}: {error}");
                return None;
            }
        };
        self.interprocedural_results.insert(call, Rc::clone(&result));
        if context_sensitive {
            self.apply_callee_exit(&result, &callee_context.call_stack());
        } else {
            self.apply_opaque_call(target, receiver, arguments, false);
        }
        Some(result.return_value().cloned())
    }

    fn resolve_body(&self, target: MethodRef, is_lambda: bool) -> Option<Arc<ControlFlowGraph>> {
        let context: &'a AnalysisContext<A> = self.context;
        if is_lambda
            && let Some(nested) = self.graphs().find_map(|it| it.nested_graph(target))
        {
            return Some(Arc::clone(nested));
        }
        context.program().body(target).cloned()
    }

    /// The analyzed graph followed by the graphs of its callers, innermost first.
    fn graphs(&self) -> impl Iterator<Item = &'a Arc<ControlFlowGraph>> {
        let context: &'a AnalysisContext<A> = self.context;
        std::iter::once(context.cfg()).chain(
            context
                .interprocedural()
                .into_iter()
                .flat_map(|it| it.caller_cfgs.iter().rev()),
        )
    }

    fn graph_by_id(&self, id: CfgId) -> Option<&'a ControlFlowGraph> {
        self.graphs()
            .find(|it| it.id() == id)
            .map(|it| &**it)
    }

    /// Returns the lambdas and methods a delegate may invoke, or nothing if any target is
    /// unknown.
    fn resolve_delegate_targets(&self, delegate: OperationId) -> Vec<MethodRef> {
        if let Some(method) = lambda_of(self.cfg(), delegate) {
            return vec![method];
        }
        let Some(points_to) = self.points_to(delegate) else {
            return Vec::new();
        };
        let Some(locations) = points_to.locations() else {
            return Vec::new();
        };
        let mut targets = BTreeSet::new();
        for location in locations.iter().filter(|it| !it.is_null()) {
            let Some(method) = location.creation().and_then(|creation| {
                lambda_of(self.graph_by_id(creation.cfg)?, creation.operation)
            }) else {
                return Vec::new();
            };
            targets.insert(method);
        }
        targets.into_iter().collect()
    }

    fn argument_infos(
        &mut self,
        target: MethodRef,
        arguments: &[OperationId],
    ) -> BTreeMap<SymbolRef, ArgumentInfo<A::Value>> {
        let symbols = self.symbols();
        let cfg = self.cfg();
        let parameters = symbols
            .method(target)
            .map(|it| it.parameters.as_slice())
            .unwrap_or_default();
        let mut infos = BTreeMap::new();
        for (position, argument) in arguments.iter().enumerate() {
            let explicit = match cfg.operation(*argument).map(|it| &it.kind) {
                Some(OperationKind::Argument { parameter, .. }) => *parameter,
                _ => None,
            };
            let Some(parameter) = explicit
                .filter(|it| parameters.contains(it))
                .or_else(|| symbols.parameter(target, position))
            else {
                continue;
            };
            let value = self.argument_value(*argument);
            let info = ArgumentInfo {
                operation: cfg.key(*argument),
                entity: self.entity_of(value),
                points_to: self
                    .points_to(value)
                    .unwrap_or_else(PointsToAbstractValue::unknown),
                value: self
                    .values
                    .get(argument)
                    .cloned()
                    .unwrap_or_else(|| self.unknown()),
                ref_kind: symbols
                    .symbol(parameter)
                    .map_or(RefKind::None, Symbol::ref_kind),
            };
            infos.insert(parameter, info);
        }
        infos
    }

    /// Returns the entities of the locals and parameters a lambda declared in this body
    /// may capture.
    fn captured_variables(&mut self) -> BTreeMap<SymbolRef, EntityId> {
        let context: &'a AnalysisContext<A> = self.context;
        let symbols = self.symbols();
        let mut captured = context
            .interprocedural()
            .map(|it| it.captured_variables.clone())
            .unwrap_or_default();
        let locals = self
            .cfg()
            .regions()
            .flat_map(|(_, region)| region.locals.iter().copied());
        let parameters = context
            .method()
            .and_then(|it| symbols.method(it))
            .map(|it| it.parameters.clone())
            .unwrap_or_default();
        for symbol in locals.chain(parameters) {
            if let Some(entity) = self
                .factory
                .create_for_symbol_declaration(symbol, &mut self.session.entities)
            {
                captured.entry(symbol).or_insert(entity);
            }
        }
        captured
    }

    /// Returns the part of the current state a callee may observe: the arguments, the
    /// receiver and what they point to, and static members.
    fn callee_initial_data(
        &self,
        arguments: &BTreeMap<SymbolRef, ArgumentInfo<A::Value>>,
        instance: Option<&(Option<EntityId>, PointsToAbstractValue)>,
    ) -> AnalysisData<A> {
        let arena = &self.session.entities;
        let symbols = self.symbols();
        let mut roots: BTreeSet<EntityId> = arguments.values().filter_map(|it| it.entity).collect();
        let mut locations: Vec<&PointsToAbstractValue> =
            arguments.values().map(|it| &it.points_to).collect();
        if let Some((entity, points_to)) = instance {
            roots.extend(*entity);
            locations.push(points_to);
        }
        locations.retain(|it| !it.is_unknown());
        let mut data = self.current.clone();
        data.retain_keys(|key| match key.entity() {
            Some(entity) => {
                let current = &arena[entity];
                roots.contains(&entity)
                    || roots.iter().any(|root| arena.has_ancestor(entity, *root))
                    || (current.is_instance_member
                        && locations
                            .iter()
                            .any(|it| current.instance_location.may_alias(it)))
                    || (!current.is_instance_member
                        && current
                            .symbol
                            .and_then(|it| symbols.symbol(it))
                            .is_some_and(|it| it.is_static))
            }
            None => key.location().is_some_and(|location| {
                locations
                    .iter()
                    .any(|it| it.locations().is_some_and(|set| set.contains(location)))
            }),
        });
        data
    }

    /// Overlays the exit state of an analyzed callee onto the current state.
    fn apply_callee_exit(&mut self, result: &DataFlowAnalysisResult<A>, callee_stack: &CallStack) {
        if let Some(exceptional) = result.exceptional_exit()
            && exceptional.is_reachable()
        {
            let state = self.overlay_callee_state(self.current.clone(), exceptional, callee_stack);
            self.record_thrown_state(None, &state);
        }
        let Some(exit) = result.exit_block_output() else {
            return;
        };
        if !exit.is_reachable() {
            self.current.set_reachable(false);
            return;
        }
        let current = mem::take(&mut self.current);
        self.current = self.overlay_callee_state(current, exit, callee_stack);
    }

    fn overlay_callee_state(
        &self,
        mut base: AnalysisData<A>,
        callee: &AnalysisData<A>,
        callee_stack: &CallStack,
    ) -> AnalysisData<A> {
        let arena = &self.session.entities;
        for (key, value) in callee.iter() {
            if is_frame_local(key, arena, callee_stack) || base.get(key) == Some(value) {
                continue;
            }
            base.insert(key.clone(), value.clone());
        }
        base
    }

    /// Applies the effects of a call whose callee was not analyzed.
    ///
    /// In pessimistic mode, whatever the callee may reach through its receiver and
    /// arguments becomes unknown, and an unresolved delegate invalidates everything.
    /// `ref` and `out` arguments always receive their escaped value.
    fn apply_opaque_call(
        &mut self,
        method: MethodRef,
        receiver: Option<OperationId>,
        arguments: &[OperationId],
        resets_everything: bool,
    ) {
        let symbols = self.symbols();
        let cfg = self.cfg();
        if self.context.config().is_pessimistic() {
            if resets_everything {
                let unknown = self.unknown();
                let keys: Vec<_> = self.current.iter().map(|(key, _)| key.clone()).collect();
                for key in keys {
                    self.current.insert(key, unknown.clone());
                }
            } else {
                if let Some(receiver) = receiver {
                    self.reset_escaped(receiver, true);
                }
                for argument in arguments {
                    let value = self.argument_value(*argument);
                    self.reset_escaped(value, false);
                }
            }
        }
        for (position, argument) in arguments.iter().enumerate() {
            let parameter = match cfg.operation(*argument).map(|it| &it.kind) {
                Some(OperationKind::Argument {
                    parameter: Some(parameter),
                    ..
                }) => Some(*parameter),
                _ => symbols.parameter(method, position),
            };
            let is_writable = parameter
                .and_then(|it| symbols.symbol(it))
                .is_some_and(|it| it.ref_kind().is_writable_reference());
            if !is_writable {
                continue;
            }
            let value = self.argument_value(*argument);
            let Some(entity) = self.entity_of(value) else {
                continue;
            };
            let escaped = self
                .analysis
                .value_for_escaped_ref_argument(cfg.operation(value).and_then(|it| it.ty));
            self.reset_descendants(entity);
            self.current.stop_tracking_predicated_data(entity);
            self.write_shared(entity, &escaped);
        }
    }

    /// Forgets what a callee may change through a receiver or a by-value argument.
    fn reset_escaped(&mut self, operation: OperationId, is_receiver: bool) {
        let symbols = self.symbols();
        match self.cfg().operation(operation).and_then(|it| it.ty) {
            Some(ty) if symbols.has_value_copy_semantics(ty) => {
                if is_receiver && let Some(entity) = self.entity_of(operation) {
                    self.reset_descendants(entity);
                }
            }
            _ => {
                if let Some(points_to) = self.points_to(operation) {
                    self.reset_instance_data(&points_to);
                }
            }
        }
    }

    /// Analyzes the lambdas created in this body that were never invoked, applying their
    /// effects as if they ran at the end of the body.
    pub(crate) fn analyze_standalone_lambdas(&mut self) {
        if !self.current.is_reachable() {
            return;
        }
        let pending: Vec<_> = self
            .lambdas
            .iter()
            .filter(|(method, _)| !self.invoked_lambdas.contains(method))
            .map(|(method, creation)| (*method, *creation))
            .collect();
        for (method, creation) in pending {
            let before = self.current.clone();
            if self.analyze_callee(creation, method, None, &[]).is_none() {
                self.current = before;
            }
        }
    }
}
