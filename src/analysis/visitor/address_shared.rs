//! Entities bound to one storage location through `ref` locals and `ref` parameters.
use super::OperationVisitor;
use crate::analysis::{DataFlowAnalysis, dependency::CopyAbstractValue, entity::EntityId};

impl<A: DataFlowAnalysis> OperationVisitor<'_, A> {
    /// Returns the entities sharing the storage of `entity`, including itself.
    pub(crate) fn aliases(&self, entity: EntityId) -> CopyAbstractValue {
        self.address_shared
            .get(&entity)
            .cloned()
            .unwrap_or_else(|| CopyAbstractValue::references([entity]))
    }

    /// Binds `entity` to the storage of `target`, releasing any earlier binding.
    pub(crate) fn share_address(&mut self, entity: EntityId, target: EntityId) {
        if entity == target {
            return;
        }
        self.unbind(entity);
        let shared = self
            .aliases(target)
            .union(&CopyAbstractValue::references([entity]));
        for member in &shared.entities {
            self.address_shared.insert(*member, shared.clone());
        }
    }

    fn unbind(&mut self, entity: EntityId) {
        let Some(shared) = self.address_shared.remove(&entity) else {
            return;
        };
        let remaining = CopyAbstractValue {
            entities: shared
                .entities
                .iter()
                .copied()
                .filter(|it| *it != entity)
                .collect(),
            kind: shared.kind,
        };
        for member in &remaining.entities {
            if remaining.entities.len() > 1 {
                self.address_shared.insert(*member, remaining.clone());
            } else {
                self.address_shared.remove(member);
            }
        }
    }

    /// Writes the value of an entity and of every entity sharing its storage.
    pub(crate) fn write_shared(&mut self, entity: EntityId, value: &A::Value) {
        for alias in self.aliases(entity).entities {
            self.set_value(alias, None, value);
        }
    }
}
