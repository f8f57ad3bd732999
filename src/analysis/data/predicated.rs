//! Analysis state with data predicated on the value of boolean flow captures.
use std::collections::BTreeMap;

use super::DictionaryAnalysisData;
use crate::analysis::{entity::EntityId, result::PredicateValueKind};

/// The state refining the core data on each outcome of a predicate.
///
/// A `None` side stands for an outcome that cannot happen.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PredicatedOverlay<K, V> {
    /// The refinement when the predicate holds.
    pub when_true: Option<DictionaryAnalysisData<K, V>>,
    /// The refinement when the predicate does not hold.
    pub when_false: Option<DictionaryAnalysisData<K, V>>,
}

impl<K: Ord, V> PredicatedOverlay<K, V> {
    fn remove(&mut self, key: &K) {
        for side in [&mut self.when_true, &mut self.when_false]
            .into_iter()
            .flatten()
        {
            side.remove(key);
        }
    }

    fn is_empty(&self) -> bool {
        [&self.when_true, &self.when_false]
            .into_iter()
            .all(|side| side.as_ref().is_some_and(DictionaryAnalysisData::is_empty))
    }
}

/// The analysis state at a program point.
///
/// On top of the core map from keys to values, the state may hold overlays keyed by
/// predicate entities, i.e. flow captures of boolean conditions. Branching on such a
/// capture applies the overlay of the taken outcome to the core map.
///
/// Writing a key through [`insert`](Self::insert) or [`remove`](Self::remove) drops the
/// key from every overlay, since the refinements no longer describe its value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PredicatedAnalysisData<K, V> {
    core: DictionaryAnalysisData<K, V>,
    predicated: BTreeMap<EntityId, PredicatedOverlay<K, V>>,
    is_reachable: bool,
}

impl<K, V> Default for PredicatedAnalysisData<K, V> {
    fn default() -> Self {
        Self {
            core: DictionaryAnalysisData::default(),
            predicated: BTreeMap::new(),
            is_reachable: true,
        }
    }
}

impl<K: Ord + Clone, V: Clone> PredicatedAnalysisData<K, V> {
    /// Creates an empty, reachable state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a reachable state holding the given values.
    #[must_use]
    pub fn from_core(core: DictionaryAnalysisData<K, V>) -> Self {
        Self {
            core,
            ..Self::default()
        }
    }

    /// Whether the program point may be reached.
    #[must_use]
    pub const fn is_reachable(&self) -> bool {
        self.is_reachable
    }

    /// Marks the state as reached or not.
    pub fn set_reachable(&mut self, is_reachable: bool) {
        self.is_reachable = is_reachable;
    }

    /// Returns the core map.
    #[must_use]
    pub const fn core(&self) -> &DictionaryAnalysisData<K, V> {
        &self.core
    }

    /// Consumes the state, returning the core map.
    #[must_use]
    pub fn into_core(self) -> DictionaryAnalysisData<K, V> {
        self.core
    }

    /// Returns the value of a key.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<&V> {
        self.core.get(key)
    }

    /// Whether the key has a value.
    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        self.core.contains_key(key)
    }

    /// Sets the value of a key.
    pub fn insert(&mut self, key: K, value: V) {
        self.remove_from_overlays(&key);
        self.core.insert(key, value);
    }

    /// Records the value of a key that has none, leaving the overlays untouched.
    pub fn seed(&mut self, key: K, value: V) {
        if !self.core.contains_key(&key) {
            self.core.insert(key, value);
        }
    }

    /// Stops tracking a key.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.remove_from_overlays(key);
        self.core.remove(key)
    }

    /// Keeps the keys matching the predicate, in the core map and the overlays.
    pub fn retain_keys(&mut self, mut f: impl FnMut(&K) -> bool) {
        self.core.retain(|key, _| f(key));
        for overlay in self.predicated.values_mut() {
            for side in [&mut overlay.when_true, &mut overlay.when_false]
                .into_iter()
                .flatten()
            {
                side.retain(|key, _| f(key));
            }
        }
    }

    /// Iterates over the core entries.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.core.iter()
    }

    /// Returns the number of core entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.core.len()
    }

    /// Whether the core map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.core.is_empty()
    }

    /// Whether any overlay is installed.
    #[must_use]
    pub fn has_predicated_data(&self) -> bool {
        !self.predicated.is_empty()
    }

    /// Returns the overlays.
    #[must_use]
    pub const fn predicated(&self) -> &BTreeMap<EntityId, PredicatedOverlay<K, V>> {
        &self.predicated
    }

    /// Whether an overlay is installed for the predicate entity.
    #[must_use]
    pub fn has_predicated_data_for(&self, predicate: EntityId) -> bool {
        self.predicated.contains_key(&predicate)
    }

    /// Installs an overlay for a predicate entity, replacing any existing one.
    ///
    /// Both sides are taken by value.
    pub fn start_tracking_predicated_data(
        &mut self,
        predicate: EntityId,
        when_true: Option<DictionaryAnalysisData<K, V>>,
        when_false: Option<DictionaryAnalysisData<K, V>>,
    ) {
        let overlay = PredicatedOverlay {
            when_true,
            when_false,
        };
        if overlay.is_empty() {
            self.predicated.remove(&predicate);
        } else {
            self.predicated.insert(predicate, overlay);
        }
    }

    /// Removes the overlay of a predicate entity. The core map is left untouched.
    pub fn stop_tracking_predicated_data(&mut self, predicate: EntityId) {
        self.predicated.remove(&predicate);
    }

    /// Copies the overlay of one predicate entity to another.
    pub fn transfer_predicated_data(&mut self, from: EntityId, to: EntityId) {
        if let Some(overlay) = self.predicated.get(&from).cloned() {
            self.predicated.insert(to, overlay);
        }
    }

    /// Applies the overlay side of a predicate outcome to the core map.
    ///
    /// Returns [`PredicateValueKind::AlwaysFalse`] if the outcome cannot happen and
    /// [`PredicateValueKind::AlwaysTrue`] if the opposite outcome cannot happen.
    pub fn apply_predicated_data(&mut self, predicate: EntityId, outcome: bool) -> PredicateValueKind {
        let Some(overlay) = self.predicated.get(&predicate) else {
            return PredicateValueKind::Unknown;
        };
        let (taken, other) = if outcome {
            (&overlay.when_true, &overlay.when_false)
        } else {
            (&overlay.when_false, &overlay.when_true)
        };
        let Some(taken) = taken else {
            return PredicateValueKind::AlwaysFalse;
        };
        let kind = if other.is_none() {
            PredicateValueKind::AlwaysTrue
        } else {
            PredicateValueKind::Unknown
        };
        let refined = taken.clone();
        for (key, value) in refined {
            self.core.insert(key, value);
        }
        kind
    }

    /// Replaces the overlays.
    pub(crate) fn set_predicated(&mut self, predicated: BTreeMap<EntityId, PredicatedOverlay<K, V>>) {
        self.predicated = predicated;
    }

    fn remove_from_overlays(&mut self, key: &K) {
        if self.predicated.is_empty() {
            return;
        }
        for overlay in self.predicated.values_mut() {
            overlay.remove(key);
        }
        self.predicated.retain(|_, overlay| !overlay.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(entries: &[(u8, i32)]) -> DictionaryAnalysisData<u8, i32> {
        entries.iter().copied().collect()
    }

    #[test]
    fn stop_tracking_keeps_core() {
        let mut state = PredicatedAnalysisData::from_core(data(&[(1, 10)]));
        let predicate = EntityId::from(0);
        state.start_tracking_predicated_data(predicate, Some(data(&[(1, 11)])), Some(data(&[])));
        assert!(state.has_predicated_data_for(predicate));
        state.stop_tracking_predicated_data(predicate);
        assert!(!state.has_predicated_data());
        assert_eq!(state.get(&1), Some(&10));
    }

    #[test]
    fn apply_outcomes() {
        let predicate = EntityId::from(0);
        let mut state = PredicatedAnalysisData::from_core(data(&[(1, 10)]));
        state.start_tracking_predicated_data(predicate, Some(data(&[(1, 11)])), None);

        let mut when_true = state.clone();
        assert_eq!(
            when_true.apply_predicated_data(predicate, true),
            PredicateValueKind::AlwaysTrue
        );
        assert_eq!(when_true.get(&1), Some(&11));

        let mut when_false = state;
        assert_eq!(
            when_false.apply_predicated_data(predicate, false),
            PredicateValueKind::AlwaysFalse
        );
        assert_eq!(when_false.get(&1), Some(&10));
    }

    #[test]
    fn writes_invalidate_refinements() {
        let predicate = EntityId::from(0);
        let mut state = PredicatedAnalysisData::from_core(data(&[(1, 10), (2, 20)]));
        state.start_tracking_predicated_data(
            predicate,
            Some(data(&[(1, 11), (2, 21)])),
            Some(data(&[(1, 12)])),
        );
        state.insert(1, 13);
        let overlay = &state.predicated()[&predicate];
        assert_eq!(overlay.when_true, Some(data(&[(2, 21)])));
        assert_eq!(overlay.when_false, Some(data(&[])));
        state.insert(2, 22);
        assert!(!state.has_predicated_data());
    }
}
