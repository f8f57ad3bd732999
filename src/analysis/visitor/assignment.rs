//! Assignments, including the copy semantics of value-type entities.
use super::OperationVisitor;
use crate::{
    analysis::{
        DataFlowAnalysis,
        entity::{EntityFactory, EntityId, PointsToAbstractValue, TrackedKey},
    },
    ir::{OperationId, OperationKind},
};

impl<A: DataFlowAnalysis> OperationVisitor<'_, A> {
    /// Assigns a value to the storage denoted by `target`.
    ///
    /// `value` is the assigned operation, if any; it drives the copy of value-type members
    /// and the tracking of boolean predicates.
    pub(crate) fn assign(
        &mut self,
        target: OperationId,
        value: Option<OperationId>,
        assigned: &A::Value,
    ) {
        if let Some(entity) = self.entity_of(target) {
            self.set_entity_value(entity, value, assigned);
        }
    }

    pub(crate) fn set_entity_value(
        &mut self,
        target: EntityId,
        value: Option<OperationId>,
        assigned: &A::Value,
    ) {
        if !A::Key::TRACKS_ENTITIES {
            return;
        }
        let symbols = self.symbols();
        let ty = self.session.entities[target].ty;
        if symbols.has_value_copy_semantics(ty) {
            self.reset_descendants(target);
            if let Some(value) = value {
                if let Some(source) = self.entity_of(value).filter(|it| *it != target) {
                    self.copy_descendants(source, target);
                }
                self.assign_tuple_elements(target, value);
            }
        }
        match value {
            Some(value)
                if self.context.config().predicate_analysis()
                    && !self.session.entities[target].is_instance_member
                    && symbols.is_boolean_or_nullable_boolean(ty) =>
            {
                self.capture_predicate(target, value);
            }
            _ => self.current.stop_tracking_predicated_data(target),
        }
        self.write_shared(target, assigned);
    }

    /// Copies the tracked members of a value-type entity into another one.
    pub(crate) fn copy_descendants(&mut self, source: EntityId, target: EntityId) {
        let arena = &self.session.entities;
        let descendants: Vec<_> = self
            .current
            .iter()
            .filter_map(|(key, value)| {
                let entity = key.entity()?;
                arena
                    .has_ancestor(entity, source)
                    .then(|| (entity, value.clone()))
            })
            .collect();
        for (entity, value) in descendants {
            let copied = EntityFactory::create_with_new_instance_root(
                &mut self.session.entities,
                entity,
                source,
                target,
            );
            let value = self.analysis.value_for_copy(&value);
            self.set_value(copied, None, &value);
        }
    }

    /// Forgets the values of the members of a value-type entity.
    pub(crate) fn reset_descendants(&mut self, entity: EntityId) {
        let arena = &self.session.entities;
        let descendants: Vec<_> = self
            .current
            .iter()
            .map(|(key, _)| key)
            .filter(|key| key.entity().is_some_and(|it| arena.has_ancestor(it, entity)))
            .cloned()
            .collect();
        let unknown = self.unknown();
        for key in descendants {
            self.current.insert(key, unknown.clone());
        }
    }

    /// Forgets everything known about the objects at the given locations.
    pub(crate) fn reset_instance_data(&mut self, points_to: &PointsToAbstractValue) {
        let arena = &self.session.entities;
        let affected: Vec<_> = self
            .current
            .iter()
            .map(|(key, _)| key)
            .filter(|key| match key.entity() {
                Some(entity) => arena.is_child_of_location(entity, points_to),
                None => key.location().is_some_and(|location| {
                    points_to
                        .locations()
                        .map_or(points_to.is_unknown(), |it| it.contains(location))
                }),
            })
            .cloned()
            .collect();
        let unknown = self.unknown();
        for key in affected {
            self.current.insert(key, unknown.clone());
        }
    }

    /// Assigns the elements of a tuple literal to the element entities of `target`.
    fn assign_tuple_elements(&mut self, target: EntityId, value: OperationId) {
        let value = self.skip_conversions(value);
        let Some(OperationKind::Tuple { elements }) = self.cfg().operation(value).map(|it| &it.kind)
        else {
            return;
        };
        let targets = self
            .factory
            .create_for_tuple_elements(target, &mut self.session.entities);
        for (element, entity) in elements.iter().zip(targets) {
            let assigned = self
                .values
                .get(element)
                .cloned()
                .unwrap_or_else(|| self.unknown());
            self.set_entity_value(entity, Some(*element), &assigned);
        }
    }

    /// Evaluates `(a, b) = value`, assigning each element reference.
    pub(crate) fn visit_deconstruction(
        &mut self,
        target: OperationId,
        value: OperationId,
    ) -> A::Value {
        let deconstructed = self.visit(value);
        self.visit(target);
        let cfg = self.cfg();
        let Some(OperationKind::Tuple { elements: targets }) =
            cfg.operation(target).map(|it| &it.kind)
        else {
            return deconstructed;
        };
        let literal = match cfg.operation(self.skip_conversions(value)).map(|it| &it.kind) {
            Some(OperationKind::Tuple { elements }) => Some(elements),
            _ => None,
        };
        let sources = match (literal, self.entity_of(value)) {
            (None, Some(tuple)) => self
                .factory
                .create_for_tuple_elements(tuple, &mut self.session.entities),
            _ => Vec::new(),
        };
        for (position, element_target) in targets.iter().enumerate() {
            let (element, assigned) =
                if let Some(element) = literal.and_then(|it| it.get(position)) {
                    let assigned = self
                        .values
                        .get(element)
                        .cloned()
                        .unwrap_or_else(|| self.unknown());
                    (Some(*element), assigned)
                } else if let Some(source) = sources.get(position) {
                    (None, self.value_of_entity(*source, None))
                } else {
                    (None, self.unknown())
                };
            self.assign(*element_target, element, &assigned);
        }
        deconstructed
    }
}
