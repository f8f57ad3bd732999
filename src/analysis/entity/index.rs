//! Structural indices of composite entities.
use crate::ir::{CfgId, Constant, Operation, OperationId, OperationKey};

use super::EntityId;

/// An index of an array element, a tuple element or an indexer access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
pub enum AbstractIndex {
    /// A constant integer index.
    #[display("{_0}")]
    Constant(i64),
    /// An index computed by an operation.
    #[display("{_0}")]
    Operation(OperationKey),
    /// An index denoted by the value of an entity.
    #[display("{_0}")]
    Entity(EntityId),
}

impl AbstractIndex {
    /// Creates the index denoted by an index operation.
    #[must_use]
    pub fn for_operation(cfg: CfgId, id: OperationId, operation: &Operation) -> Self {
        match operation.constant.as_ref().and_then(Constant::as_int) {
            Some(value) => Self::Constant(value),
            None => Self::Operation(OperationKey { cfg, operation: id }),
        }
    }

    /// Returns the index of the `position`th element of a tuple or an initializer.
    #[must_use]
    pub fn position(position: usize) -> Self {
        Self::Constant(i64::try_from(position).unwrap_or(i64::MAX))
    }

    /// Returns the constant value of the index.
    #[must_use]
    pub const fn as_constant(&self) -> Option<i64> {
        match self {
            Self::Constant(value) => Some(*value),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::OperationKind;

    #[test]
    fn constant_indices_are_structural() {
        let cfg = CfgId::from(0);
        let literal = Operation::literal(Constant::Int(2), None);
        let computed = Operation::new(OperationKind::Other { children: vec![] }, None);
        assert_eq!(
            AbstractIndex::for_operation(cfg, OperationId::from(1), &literal),
            AbstractIndex::for_operation(cfg, OperationId::from(9), &literal)
        );
        assert_ne!(
            AbstractIndex::for_operation(cfg, OperationId::from(1), &computed),
            AbstractIndex::for_operation(cfg, OperationId::from(9), &computed)
        );
        assert_eq!(AbstractIndex::position(3).as_constant(), Some(3));
    }
}
