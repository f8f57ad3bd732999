//! Refining the state on branch conditions.
//!
//! Kinds computed here are relative to the assumed outcome of the analyzed condition:
//! [`PredicateValueKind::AlwaysFalse`] means the outcome cannot happen. Kinds recorded in
//! the result are relative to the condition evaluating to `true`.
use super::OperationVisitor;
use crate::{
    analysis::{
        AnalysisData, DataFlowAnalysis, DictionaryAnalysisData,
        entity::{EntityId, NullAbstractValue, TrackedKey},
        result::PredicateValueKind,
    },
    ir::{
        ConditionKind, Constant, MethodRef, Operation, OperationId, OperationKind,
        operation::{BinaryOperator, UnaryOperator},
        symbols::MethodFlags,
    },
};

fn changes<A: DataFlowAnalysis>(
    before: &AnalysisData<A>,
    after: &AnalysisData<A>,
) -> DictionaryAnalysisData<A::Key, A::Value> {
    after
        .iter()
        .filter(|(key, value)| before.get(key) != Some(*value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

impl<A: DataFlowAnalysis> OperationVisitor<'_, A> {
    /// Refines the current state assuming the condition evaluates as `kind` says.
    ///
    /// Returns `false` if that cannot happen.
    pub(crate) fn flow_condition(&mut self, condition: OperationId, kind: ConditionKind) -> bool {
        let outcome = kind == ConditionKind::WhenTrue;
        let key = self.cfg().key(condition);
        let dependencies = self.context.dependencies();
        let constant = self
            .cfg()
            .operation(condition)
            .and_then(|it| it.constant.as_ref())
            .and_then(Constant::as_bool)
            .or_else(|| dependencies.constant_bool(key));
        if let Some(constant) = constant {
            return constant == outcome;
        }
        let known = dependencies.predicate_kind(key);
        let mut predicted = if outcome { known } else { known.negate() };
        if self.context.config().predicate_analysis() && self.current.is_reachable() {
            predicted = predicted.combine(self.perform_predicate_analysis(condition, outcome));
        }
        predicted != PredicateValueKind::AlwaysFalse
    }

    /// Starts tracking the refinements implied by the two outcomes of a boolean value
    /// stored into `target`.
    pub(crate) fn capture_predicate(&mut self, target: EntityId, value: OperationId) {
        let inner = self.skip_conversions(value);
        let is_reference = self.cfg().operation(inner).is_some_and(|it| {
            matches!(
                it.kind,
                OperationKind::LocalReference { .. }
                    | OperationKind::ParameterReference { .. }
                    | OperationKind::FlowCaptureReference { .. }
            )
        });
        if is_reference {
            match self.entity_of(inner) {
                Some(source) if self.current.has_predicated_data_for(source) => {
                    self.current.transfer_predicated_data(source, target);
                }
                _ => self.current.stop_tracking_predicated_data(target),
            }
            return;
        }
        let snapshot = self.current.clone();
        let when_true_kind = self.perform_predicate_analysis(value, true);
        let when_true = changes::<A>(&snapshot, &self.current);
        self.current = snapshot.clone();
        let when_false_kind = self.perform_predicate_analysis(value, false);
        let when_false = changes::<A>(&snapshot, &self.current);
        self.current = snapshot;

        let when_true = (when_true_kind != PredicateValueKind::AlwaysFalse).then_some(when_true);
        let when_false = (when_false_kind != PredicateValueKind::AlwaysFalse).then_some(when_false);
        let learns_nothing = |side: &Option<DictionaryAnalysisData<A::Key, A::Value>>| {
            side.as_ref().is_some_and(DictionaryAnalysisData::is_empty)
        };
        if learns_nothing(&when_true) && learns_nothing(&when_false) {
            self.current.stop_tracking_predicated_data(target);
        } else {
            self.current
                .start_tracking_predicated_data(target, when_true, when_false);
        }
    }

    /// Refines the current state assuming `condition` evaluates to `outcome`.
    pub(crate) fn perform_predicate_analysis(
        &mut self,
        condition: OperationId,
        outcome: bool,
    ) -> PredicateValueKind {
        let Some(operation) = self.cfg().operation(condition) else {
            return PredicateValueKind::Unknown;
        };
        let symbols = self.symbols();
        let kind = match &operation.kind {
            OperationKind::LocalReference { .. }
            | OperationKind::ParameterReference { .. }
            | OperationKind::FlowCaptureReference { .. } => match self.entity_of(condition) {
                Some(entity) => self.current.apply_predicated_data(entity, outcome),
                None => PredicateValueKind::Unknown,
            },
            OperationKind::Conversion {
                operand,
                operator_method: None,
            }
            | OperationKind::Parenthesized { operand }
            | OperationKind::Argument { value: operand, .. } => {
                self.perform_predicate_analysis(*operand, outcome)
            }
            OperationKind::Unary {
                operator: UnaryOperator::Not,
                operand,
                operator_method: None,
            } => self.perform_predicate_analysis(*operand, !outcome),
            OperationKind::IsNull { operand } => self.refine_is_null(*operand, outcome),
            OperationKind::IsType {
                operand,
                is_negated,
                ..
            } => {
                if outcome != *is_negated
                    && self.refine_is_null(*operand, false) == PredicateValueKind::AlwaysFalse
                {
                    PredicateValueKind::AlwaysFalse
                } else {
                    PredicateValueKind::Unknown
                }
            }
            OperationKind::Binary {
                operator,
                left,
                right,
                operator_method,
            } if operator.is_equality() => {
                let equals = (*operator == BinaryOperator::Equals) == outcome;
                let is_reference_equality = operator_method.is_none()
                    && [*left, *right].iter().all(|it| {
                        self.cfg()
                            .operation(*it)
                            .and_then(|op| op.ty)
                            .is_some_and(|ty| symbols.is_reference_type(ty))
                    });
                self.refine_equality(*left, *right, equals, is_reference_equality)
            }
            OperationKind::Invocation {
                method,
                instance,
                arguments,
            } => self.invocation_predicate(condition, *method, *instance, arguments, outcome),
            _ => PredicateValueKind::Unknown,
        };
        let truth = if outcome { kind } else { kind.negate() };
        self.predicate_kinds.insert(condition, truth);
        kind
    }

    fn invocation_predicate(
        &mut self,
        invocation: OperationId,
        method: MethodRef,
        instance: Option<OperationId>,
        arguments: &[OperationId],
        outcome: bool,
    ) -> PredicateValueKind {
        let Some(info) = self.symbols().method(method) else {
            return PredicateValueKind::Unknown;
        };
        if info
            .flags
            .intersects(MethodFlags::OBJECT_EQUALS | MethodFlags::REFERENCE_EQUALS)
        {
            let is_reference_equality = info.flags.contains(MethodFlags::REFERENCE_EQUALS);
            let operands: Vec<_> = instance
                .into_iter()
                .chain(arguments.iter().map(|it| self.argument_value(*it)))
                .collect();
            return match operands[..] {
                [left, right] => self.refine_equality(left, right, outcome, is_reference_equality),
                _ => PredicateValueKind::Unknown,
            };
        }
        match self
            .interprocedural_results
            .get(&invocation)
            .and_then(|it| it.return_predicate_kind())
        {
            Some(kind) if outcome => kind,
            Some(kind) => kind.negate(),
            None => PredicateValueKind::Unknown,
        }
    }

    pub(crate) fn argument_value(&self, argument: OperationId) -> OperationId {
        match self.cfg().operation(argument).map(|it| &it.kind) {
            Some(OperationKind::Argument { value, .. }) => *value,
            _ => argument,
        }
    }

    /// Refines an operand assuming it is (`is_null`) or is not null.
    fn refine_is_null(&mut self, operand: OperationId, is_null: bool) -> PredicateValueKind {
        let kind = match self.points_to(operand).map(|it| it.null_state()) {
            Some(NullAbstractValue::NotNull) if is_null => PredicateValueKind::AlwaysFalse,
            Some(NullAbstractValue::Null) if !is_null => PredicateValueKind::AlwaysFalse,
            Some(NullAbstractValue::NotNull | NullAbstractValue::Null) => {
                PredicateValueKind::AlwaysTrue
            }
            _ => PredicateValueKind::Unknown,
        };
        let value = self
            .values
            .get(&operand)
            .cloned()
            .unwrap_or_else(|| self.unknown());
        let refinement = self.analysis.refine_is_null(&value, is_null);
        if let Some(refined) = refinement.left {
            self.write_refined(operand, &refined);
        }
        kind.combine(refinement.kind)
    }

    /// Refines two operands assuming they are (`equals`) or are not equal.
    fn refine_equality(
        &mut self,
        left: OperationId,
        right: OperationId,
        equals: bool,
        is_reference_equality: bool,
    ) -> PredicateValueKind {
        let cfg = self.cfg();
        let (left_inner, right_inner) = (self.skip_conversions(left), self.skip_conversions(right));
        let is_null = |id| cfg.operation(id).is_some_and(Operation::is_null_literal);
        match (is_null(left_inner), is_null(right_inner)) {
            (false, true) => return self.refine_is_null(left, equals),
            (true, false) => return self.refine_is_null(right, equals),
            _ => {}
        }
        let constant = |id| cfg.operation(id).and_then(|it| it.constant.as_ref());
        let mut kind = PredicateValueKind::Unknown;
        if let (Some(a), Some(b)) = (constant(left_inner), constant(right_inner)) {
            kind = if (a == b) == equals {
                PredicateValueKind::AlwaysTrue
            } else {
                PredicateValueKind::AlwaysFalse
            };
        } else if is_reference_equality
            && let (Some(l), Some(r)) = (self.points_to(left), self.points_to(right))
            && l.null_state() == NullAbstractValue::NotNull
            && r.null_state() == NullAbstractValue::NotNull
            && !l.may_alias(&r)
        {
            kind = if equals {
                PredicateValueKind::AlwaysFalse
            } else {
                PredicateValueKind::AlwaysTrue
            };
        }
        let unknown = self.unknown();
        let left_value = self.values.get(&left).cloned().unwrap_or_else(|| unknown.clone());
        let right_value = self.values.get(&right).cloned().unwrap_or(unknown);
        let refinement =
            self.analysis
                .refine_equality(&left_value, &right_value, equals, is_reference_equality);
        if let Some(refined) = refinement.left {
            self.write_refined(left, &refined);
        }
        if let Some(refined) = refinement.right {
            self.write_refined(right, &refined);
        }
        kind.combine(refinement.kind)
    }

    /// Stores a refined value into the entity of an operand and into its known copies.
    fn write_refined(&mut self, operand: OperationId, value: &A::Value) {
        if !A::Key::TRACKS_ENTITIES {
            return;
        }
        let entity = self.entity_of(operand);
        if let Some(entity) = entity {
            self.write_shared(entity, value);
        }
        let key = self.cfg().key(operand);
        if let Some(copies) = self.context.dependencies().copies(key) {
            for copy in copies.entities.into_iter().filter(|it| Some(*it) != entity) {
                self.set_value(copy, None, value);
            }
        }
    }
}
