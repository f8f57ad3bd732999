//! Resolves operations to [`AnalysisEntity`]s.
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use log::trace;

use super::{
    AbstractIndex, AbstractLocation, AnalysisEntity, CallStack, CaptureKey, EntityAnchor,
    EntityArena, EntityId, PointsToAbstractValue,
};
use crate::{
    analysis::{DataFlowAnalysis, context::AnalysisContext, dependency::DependentResults},
    ir::{
        CaptureId, ControlFlowGraph, OperationId, OperationKind, Program, SymbolRef, TypeRef,
        operation::InstanceReferenceKind,
        symbols::{SymbolKind, TypeKind},
    },
};

/// Creates the entities of the operations of one analyzed body.
///
/// The entity of an operation is computed once per run and cached.
#[derive(Debug)]
pub struct EntityFactory {
    cfg: Arc<ControlFlowGraph>,
    program: Arc<Program>,
    call_stack: CallStack,
    dependencies: DependentResults,
    captured_variables: BTreeMap<SymbolRef, EntityId>,
    this_instance: EntityId,
    this_points_to: PointsToAbstractValue,
    cache: HashMap<OperationId, Option<EntityId>>,
}

impl EntityFactory {
    pub(crate) fn new<A: DataFlowAnalysis>(
        context: &AnalysisContext<A>,
        arena: &mut EntityArena,
    ) -> Self {
        let symbols = context.symbols();
        let call_stack = context.call_stack();
        let containing_type = context
            .method()
            .and_then(|it| symbols.method(it))
            .and_then(|it| it.containing_type);
        let this_type = containing_type.unwrap_or(symbols.well_known().object);
        let interprocedural = context.interprocedural();
        let this_entity = |instance_location: PointsToAbstractValue| AnalysisEntity {
            symbol: None,
            indices: Vec::new(),
            anchor: None,
            instance_location,
            ty: this_type,
            parent: None,
            is_this_or_me: true,
            is_instance_member: false,
        };
        let (this_instance, this_points_to) =
            match interprocedural.and_then(|it| it.invocation_instance.clone()) {
                Some((Some(entity), points_to)) => (entity, points_to),
                Some((None, points_to)) => (arena.intern(this_entity(points_to.clone())), points_to),
                None => {
                    let points_to = PointsToAbstractValue::location(AbstractLocation::ThisOrMe {
                        ty: containing_type,
                        call_stack: call_stack.clone(),
                    });
                    (arena.intern(this_entity(points_to.clone())), points_to)
                }
            };
        Self {
            cfg: Arc::clone(context.cfg()),
            program: Arc::clone(context.program()),
            call_stack,
            dependencies: context.dependencies().clone(),
            captured_variables: interprocedural
                .map(|it| it.captured_variables.clone())
                .unwrap_or_default(),
            this_instance,
            this_points_to,
            cache: HashMap::new(),
        }
    }

    /// Returns the frame the entities are created in.
    #[must_use]
    pub const fn call_stack(&self) -> &CallStack {
        &self.call_stack
    }

    /// Returns the entity of `this`.
    #[must_use]
    pub const fn create_this_or_me_instance(&self) -> EntityId {
        self.this_instance
    }

    /// Returns where `this` points to.
    #[must_use]
    pub const fn this_points_to(&self) -> &PointsToAbstractValue {
        &self.this_points_to
    }

    /// Returns the entity denoted by an operation, if it denotes storage.
    pub fn try_create(&mut self, operation: OperationId, arena: &mut EntityArena) -> Option<EntityId> {
        if let Some(cached) = self.cache.get(&operation) {
            return *cached;
        }
        let entity = self.create(operation, arena);
        if let Some(entity) = entity {
            trace!("{operation} denotes {}", arena[entity]);
        }
        self.cache.insert(operation, entity);
        entity
    }

    fn create(&mut self, id: OperationId, arena: &mut EntityArena) -> Option<EntityId> {
        let cfg = Arc::clone(&self.cfg);
        let operation = cfg.operation(id)?;
        match &operation.kind {
            OperationKind::LocalReference { local: symbol, .. }
            | OperationKind::ParameterReference { parameter: symbol } => {
                self.create_for_symbol_declaration(*symbol, arena)
            }
            OperationKind::FieldReference {
                field: symbol,
                instance,
            }
            | OperationKind::EventReference {
                event: symbol,
                instance,
            } => self.create_for_member(Some(*symbol), Vec::new(), *instance, operation.ty, arena),
            OperationKind::PropertyReference {
                property,
                instance,
                arguments,
            } => {
                let indices = arguments
                    .iter()
                    .map(|it| self.index_of(*it, arena))
                    .collect();
                self.create_for_member(Some(*property), indices, *instance, operation.ty, arena)
            }
            OperationKind::ArrayElementReference { array, indices } => {
                let indices = indices.iter().map(|it| self.index_of(*it, arena)).collect();
                self.create_for_member(None, indices, Some(*array), operation.ty, arena)
            }
            OperationKind::InstanceReference {
                kind: InstanceReferenceKind::ContainingTypeInstance,
            } => Some(self.this_instance),
            OperationKind::InstanceReference {
                kind: InstanceReferenceKind::ImplicitReceiver,
            } => {
                let instance_location = self.points_to(id)?;
                let ty = operation
                    .ty
                    .unwrap_or(self.program.symbols().well_known().object);
                Some(arena.intern(AnalysisEntity {
                    symbol: None,
                    indices: Vec::new(),
                    anchor: Some(EntityAnchor::Instance(cfg.key(id))),
                    instance_location,
                    ty,
                    parent: None,
                    is_this_or_me: false,
                    is_instance_member: false,
                }))
            }
            OperationKind::FlowCapture { id: capture, .. }
            | OperationKind::FlowCaptureReference { id: capture } => {
                let ty = operation
                    .ty
                    .unwrap_or(self.program.symbols().well_known().object);
                Some(self.create_for_capture(*capture, ty, arena))
            }
            OperationKind::Conversion {
                operand,
                operator_method: None,
            }
            | OperationKind::Parenthesized { operand } => self.try_create(*operand, arena),
            _ => None,
        }
    }

    /// Returns the entity of a local or parameter, or of a static member.
    pub fn create_for_symbol_declaration(
        &self,
        symbol: SymbolRef,
        arena: &mut EntityArena,
    ) -> Option<EntityId> {
        if let Some(captured) = self.captured_variables.get(&symbol) {
            return Some(*captured);
        }
        let declaration = self.program.symbols().symbol(symbol)?;
        let call_stack = match declaration.kind {
            SymbolKind::Local | SymbolKind::Parameter { .. } => self.call_stack.clone(),
            SymbolKind::Field | SymbolKind::Property | SymbolKind::Event => CallStack::empty(),
        };
        Some(arena.intern(AnalysisEntity {
            symbol: Some(symbol),
            indices: Vec::new(),
            anchor: None,
            instance_location: PointsToAbstractValue::location(AbstractLocation::Symbol {
                symbol,
                call_stack,
            }),
            ty: declaration.ty,
            parent: None,
            is_this_or_me: false,
            is_instance_member: false,
        }))
    }

    /// Returns the entity of a flow capture of the analyzed body.
    pub fn create_for_capture(
        &self,
        capture: CaptureId,
        ty: TypeRef,
        arena: &mut EntityArena,
    ) -> EntityId {
        let capture = CaptureKey {
            cfg: self.cfg.id(),
            capture,
        };
        arena.intern(AnalysisEntity {
            symbol: None,
            indices: Vec::new(),
            anchor: Some(EntityAnchor::Capture(capture)),
            instance_location: PointsToAbstractValue::location(AbstractLocation::FlowCapture {
                capture,
                call_stack: self.call_stack.clone(),
            }),
            ty,
            parent: None,
            is_this_or_me: false,
            is_instance_member: false,
        })
    }

    fn create_for_member(
        &mut self,
        symbol: Option<SymbolRef>,
        indices: Vec<AbstractIndex>,
        instance: Option<OperationId>,
        ty: Option<TypeRef>,
        arena: &mut EntityArena,
    ) -> Option<EntityId> {
        let symbols = self.program.symbols();
        let declaration = symbol.and_then(|it| symbols.symbol(it));
        let ty = ty
            .or(declaration.map(|it| it.ty))
            .unwrap_or(symbols.well_known().object);
        let Some(instance) = instance.filter(|_| !declaration.is_some_and(|it| it.is_static))
        else {
            return symbol.and_then(|it| self.create_for_symbol_declaration(it, arena));
        };
        let instance_type = self.cfg.operation(instance).and_then(|it| it.ty);
        let (parent, instance_location) =
            if instance_type.is_some_and(|it| symbols.has_value_copy_semantics(it)) {
                let parent = self.try_create(instance, arena)?;
                (Some(parent), arena[parent].instance_location.clone())
            } else {
                (None, self.points_to(instance)?)
            };
        Some(arena.intern(AnalysisEntity {
            symbol,
            indices,
            anchor: None,
            instance_location,
            ty,
            parent,
            is_this_or_me: false,
            is_instance_member: true,
        }))
    }

    /// Returns the entities of the elements of a tuple entity.
    pub fn create_for_tuple_elements(
        &self,
        tuple: EntityId,
        arena: &mut EntityArena,
    ) -> Vec<EntityId> {
        let Some(TypeKind::Tuple { elements }) = self
            .program
            .symbols()
            .type_info(arena[tuple].ty)
            .map(|it| &it.kind)
        else {
            return Vec::new();
        };
        let instance_location = arena[tuple].instance_location.clone();
        elements
            .iter()
            .enumerate()
            .map(|(position, ty)| {
                arena.intern(AnalysisEntity {
                    symbol: None,
                    indices: vec![AbstractIndex::position(position)],
                    anchor: None,
                    instance_location: instance_location.clone(),
                    ty: *ty,
                    parent: Some(tuple),
                    is_this_or_me: false,
                    is_instance_member: true,
                })
            })
            .collect()
    }

    /// Returns the entity of an element initialized by an array creation.
    pub fn create_for_array_element_initializer(
        &self,
        creation: OperationId,
        indices: Vec<AbstractIndex>,
        element_type: TypeRef,
        arena: &mut EntityArena,
    ) -> Option<EntityId> {
        let instance_location = self.points_to(creation)?;
        Some(arena.intern(AnalysisEntity {
            symbol: None,
            indices,
            anchor: None,
            instance_location,
            ty: element_type,
            parent: None,
            is_this_or_me: false,
            is_instance_member: true,
        }))
    }

    /// Returns `entity` with its ancestor `old_root` replaced by `new_root`.
    ///
    /// Entities that do not descend from `old_root` are returned unchanged.
    pub fn create_with_new_instance_root(
        arena: &mut EntityArena,
        entity: EntityId,
        old_root: EntityId,
        new_root: EntityId,
    ) -> EntityId {
        if entity == old_root {
            return new_root;
        }
        let Some(parent) = arena[entity].parent else {
            return entity;
        };
        let rebuilt_parent = Self::create_with_new_instance_root(arena, parent, old_root, new_root);
        if rebuilt_parent == parent {
            return entity;
        }
        let mut rebuilt = arena[entity].clone();
        rebuilt.instance_location = arena[rebuilt_parent].instance_location.clone();
        rebuilt.parent = Some(rebuilt_parent);
        arena.intern(rebuilt)
    }

    /// Returns where the value of an operation may point.
    ///
    /// Falls back to the allocation of creation operations and to `this` when no points-to
    /// result is available.
    #[must_use]
    pub fn points_to(&self, operation: OperationId) -> Option<PointsToAbstractValue> {
        if let Some(points_to) = self.dependencies.points_to(self.cfg.key(operation)) {
            return Some(points_to);
        }
        let current = self.cfg.operation(operation)?;
        match &current.kind {
            OperationKind::ObjectCreation { .. }
            | OperationKind::ArrayCreation { .. }
            | OperationKind::AnonymousFunction { .. }
            | OperationKind::DelegateCreation { .. } => {
                Some(PointsToAbstractValue::location(self.allocation(operation)))
            }
            OperationKind::InstanceReference {
                kind: InstanceReferenceKind::ContainingTypeInstance,
            } => Some(self.this_points_to.clone()),
            OperationKind::InstanceReference {
                kind: InstanceReferenceKind::ImplicitReceiver,
            } => self
                .cfg
                .ancestors(operation)
                .find(|it| {
                    self.cfg.operation(*it).is_some_and(|op| {
                        matches!(op.kind, OperationKind::ObjectCreation { .. })
                    })
                })
                .and_then(|creation| self.points_to(creation)),
            OperationKind::Conversion {
                operand,
                operator_method: None,
            }
            | OperationKind::Parenthesized { operand } => self.points_to(*operand),
            OperationKind::Literal if current.is_null_literal() => {
                Some(PointsToAbstractValue::null())
            }
            _ => None,
        }
    }

    /// Returns the location of the objects created by an operation in this frame.
    #[must_use]
    pub fn allocation(&self, creation: OperationId) -> AbstractLocation {
        AbstractLocation::Allocation {
            creation: self.cfg.key(creation),
            ty: self.cfg.operation(creation).and_then(|it| it.ty),
            call_stack: self.call_stack.clone(),
        }
    }

    fn index_of(&mut self, operation: OperationId, arena: &mut EntityArena) -> AbstractIndex {
        let cfg = Arc::clone(&self.cfg);
        let Some(current) = cfg.operation(operation) else {
            return AbstractIndex::Operation(cfg.key(operation));
        };
        if let OperationKind::Argument { value, .. } = current.kind {
            return self.index_of(value, arena);
        }
        if current.constant.is_none()
            && let Some(entity) = self.try_create(operation, arena)
        {
            return AbstractIndex::Entity(entity);
        }
        AbstractIndex::for_operation(cfg.id(), operation, current)
    }
}
