//! Analysis entities: symbolic descriptions of the storage an analysis tracks values for.
//!
//! Entities are interned in an [`EntityArena`] and handled through [`EntityId`]s, so
//! comparing two entities is comparing two integers.
use std::{collections::HashMap, fmt, ops::Index};

use itertools::Itertools;

use crate::ir::{SymbolRef, TypeRef};

pub mod factory;
pub mod index;
pub mod location;
pub mod points_to;

pub use factory::EntityFactory;
pub use index::AbstractIndex;
pub use location::{AbstractLocation, CallStack, CaptureKey};
pub use points_to::{NullAbstractValue, PointsToAbstractValue, PointsToAbstractValueDomain};

/// A handle to an [`AnalysisEntity`] interned in an [`EntityArena`].
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    derive_more::From,
    derive_more::Into,
    derive_more::Display,
)]
#[display("e{_0}")]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub struct EntityId(u32);

impl EntityId {
    const fn index(self) -> usize {
        self.0 as usize
    }
}

/// The syntax an entity without a declared symbol is anchored to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
pub enum EntityAnchor {
    /// An operation, e.g. an implicit receiver.
    #[display("{_0}")]
    Instance(crate::ir::OperationKey),
    /// A flow capture.
    #[display("{_0}")]
    Capture(CaptureKey),
}

/// A symbolic memory location.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AnalysisEntity {
    /// The declared symbol, if any.
    pub symbol: Option<SymbolRef>,
    /// The structural indices, e.g. of an array element.
    pub indices: Vec<AbstractIndex>,
    /// The syntax anchor of an entity without a symbol.
    pub anchor: Option<EntityAnchor>,
    /// The location of the instance containing the storage.
    pub instance_location: PointsToAbstractValue,
    /// The static type of the storage.
    pub ty: TypeRef,
    /// The containing entity, present when the container has value-copy semantics.
    pub parent: Option<EntityId>,
    /// Whether this is the `this` instance.
    pub is_this_or_me: bool,
    /// Whether the storage is a member or an element of an instance.
    pub is_instance_member: bool,
}

impl AnalysisEntity {
    /// Whether the instance containing the storage is not known.
    ///
    /// Values of such entities are not tracked.
    #[must_use]
    pub fn has_unknown_instance_location(&self) -> bool {
        match &self.instance_location {
            PointsToAbstractValue::Known { locations, .. } => locations.is_empty(),
            _ => true,
        }
    }

    /// Whether the entity is anchored to a flow capture.
    #[must_use]
    pub const fn capture(&self) -> Option<CaptureKey> {
        match self.anchor {
            Some(EntityAnchor::Capture(capture)) => Some(capture),
            _ => None,
        }
    }

    fn same_shape(&self, other: &Self) -> bool {
        self.symbol == other.symbol
            && self.indices == other.indices
            && self.anchor == other.anchor
            && self.ty == other.ty
            && self.is_this_or_me == other.is_this_or_me
            && self.is_instance_member == other.is_instance_member
    }
}

impl fmt::Display for AnalysisEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_this_or_me {
            write!(f, "this")?;
        } else if let Some(symbol) = self.symbol {
            write!(f, "{symbol}")?;
        } else if let Some(anchor) = self.anchor {
            write!(f, "{anchor}")?;
        }
        if !self.indices.is_empty() {
            write!(f, "[{}]", self.indices.iter().join(", "))?;
        }
        write!(f, " @ {}", self.instance_location)
    }
}

/// Interns [`AnalysisEntity`]s.
///
/// An arena lives as long as the analysis session owning it, so entities created by one
/// analysis can be used as keys by the analyses depending on it.
#[derive(Debug, Default, Clone)]
pub struct EntityArena {
    entities: Vec<AnalysisEntity>,
    ids: HashMap<AnalysisEntity, EntityId>,
}

impl EntityArena {
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the handle of an entity, interning it if necessary.
    pub fn intern(&mut self, entity: AnalysisEntity) -> EntityId {
        if let Some(id) = self.ids.get(&entity) {
            return *id;
        }
        let id = EntityId(u32::try_from(self.entities.len()).unwrap_or(u32::MAX));
        self.entities.push(entity.clone());
        self.ids.insert(entity, id);
        id
    }

    /// Returns the handle of an entity if it has been interned.
    #[must_use]
    pub fn lookup(&self, entity: &AnalysisEntity) -> Option<EntityId> {
        self.ids.get(entity).copied()
    }

    /// Returns the number of interned entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether no entity has been interned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Returns the chain of parents of an entity, innermost first.
    pub fn ancestors(&self, id: EntityId) -> impl Iterator<Item = EntityId> + '_ {
        std::iter::successors(self[id].parent, |it| self[*it].parent)
    }

    /// Whether `ancestor` is a (transitive) parent of `id`.
    #[must_use]
    pub fn has_ancestor(&self, id: EntityId, ancestor: EntityId) -> bool {
        self.ancestors(id).any(|it| it == ancestor)
    }

    /// Whether the entity is a member or element of an instance at `location`, directly or
    /// through value-type members.
    #[must_use]
    pub fn is_child_of_location(&self, id: EntityId, location: &PointsToAbstractValue) -> bool {
        let entity = &self[id];
        entity.is_instance_member && entity.instance_location.may_alias(location)
    }

    /// Whether two entities denote the same structural path, ignoring the instance
    /// locations they are rooted at.
    #[must_use]
    pub fn equals_ignoring_instance_location(&self, left: EntityId, right: EntityId) -> bool {
        if left == right {
            return true;
        }
        let (a, b) = (&self[left], &self[right]);
        if !a.same_shape(b) {
            return false;
        }
        match (a.parent, b.parent) {
            (None, None) => true,
            (Some(pa), Some(pb)) => self.equals_ignoring_instance_location(pa, pb),
            _ => false,
        }
    }

    /// Returns the entity rooted at the merge of its own instance location and `location`.
    pub fn with_merged_instance_location(
        &mut self,
        id: EntityId,
        location: &PointsToAbstractValue,
    ) -> EntityId {
        let entity = &self[id];
        let merged = entity.instance_location.merge(location);
        if merged == entity.instance_location {
            return id;
        }
        let mut entity = entity.clone();
        entity.instance_location = merged;
        self.intern(entity)
    }
}

impl Index<EntityId> for EntityArena {
    type Output = AnalysisEntity;

    fn index(&self, index: EntityId) -> &Self::Output {
        &self.entities[index.index()]
    }
}

/// The key type of the per-point state of an analysis.
///
/// Analyses either track a value per [`EntityId`] or per [`AbstractLocation`], in which
/// case an entity is mapped to the locations its reference may point to.
pub trait TrackedKey: Clone + Ord + std::hash::Hash + fmt::Debug {
    /// Whether assignments to entities update the state.
    const TRACKS_ENTITIES: bool;

    /// Returns the keys holding the value of an entity whose reference points to
    /// `points_to`.
    fn keys_for_entity(entity: EntityId, points_to: Option<&PointsToAbstractValue>) -> Vec<Self>;

    /// Returns the key of an allocated location.
    fn key_for_location(location: &AbstractLocation) -> Option<Self>;

    /// Returns the entity this key stands for.
    fn entity(&self) -> Option<EntityId>;

    /// Returns the location this key stands for.
    fn location(&self) -> Option<&AbstractLocation>;
}

impl TrackedKey for EntityId {
    const TRACKS_ENTITIES: bool = true;

    fn keys_for_entity(entity: EntityId, _: Option<&PointsToAbstractValue>) -> Vec<Self> {
        vec![entity]
    }

    fn key_for_location(_: &AbstractLocation) -> Option<Self> {
        None
    }

    fn entity(&self) -> Option<EntityId> {
        Some(*self)
    }

    fn location(&self) -> Option<&AbstractLocation> {
        None
    }
}

impl TrackedKey for AbstractLocation {
    const TRACKS_ENTITIES: bool = false;

    fn keys_for_entity(_: EntityId, points_to: Option<&PointsToAbstractValue>) -> Vec<Self> {
        points_to
            .and_then(PointsToAbstractValue::locations)
            .map(|locations| {
                locations
                    .iter()
                    .filter(|it| !it.is_null() && !it.is_no_location())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn key_for_location(location: &AbstractLocation) -> Option<Self> {
        (!location.is_null() && !location.is_no_location()).then(|| location.clone())
    }

    fn entity(&self) -> Option<EntityId> {
        None
    }

    fn location(&self) -> Option<&AbstractLocation> {
        Some(self)
    }
}
