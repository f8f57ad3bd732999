//! The domain of whole analysis states.
use std::{cmp::Ordering, collections::BTreeMap, fmt};

use super::{AbstractValueDomain, MapAbstractDomain};
use crate::analysis::data::{DictionaryAnalysisData, PredicatedAnalysisData, PredicatedOverlay};

/// Merges and orders [`PredicatedAnalysisData`].
///
/// Unreachable states are below reachable ones: merging a reachable state with an
/// unreachable one yields the reachable state. Overlays survive a merge only when both
/// states carry one for the same predicate.
pub struct PredicatedAnalysisDataDomain<K, V, D> {
    map: MapAbstractDomain<K, V, D>,
}

impl<K, V, D> PredicatedAnalysisDataDomain<K, V, D> {
    /// Creates the domain of states over the given value domain.
    #[must_use]
    pub const fn new(values: D) -> Self {
        Self {
            map: MapAbstractDomain::new(values),
        }
    }

    /// Returns the domain of the core maps.
    #[must_use]
    pub const fn map_domain(&self) -> &MapAbstractDomain<K, V, D> {
        &self.map
    }
}

impl<K, V, D: fmt::Debug> fmt::Debug for PredicatedAnalysisDataDomain<K, V, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredicatedAnalysisDataDomain")
            .field("map", &self.map)
            .finish()
    }
}

impl<K, V, D> PredicatedAnalysisDataDomain<K, V, D>
where
    K: Ord + Clone,
    V: Clone + fmt::Debug,
    D: AbstractValueDomain<V>,
{
    /// A missing side is an outcome that cannot happen on that path.
    fn merge_side(
        &self,
        side1: Option<&DictionaryAnalysisData<K, V>>,
        core1: &DictionaryAnalysisData<K, V>,
        side2: Option<&DictionaryAnalysisData<K, V>>,
        core2: &DictionaryAnalysisData<K, V>,
    ) -> Option<DictionaryAnalysisData<K, V>> {
        let (side1, side2) = match (side1, side2) {
            (None, None) => return None,
            (Some(side), None) | (None, Some(side)) => return Some(side.clone()),
            (Some(side1), Some(side2)) => (side1, side2),
        };
        let values = self.map.value_domain();
        let mut merged = DictionaryAnalysisData::new();
        for key in side1.keys().chain(side2.keys()) {
            if merged.contains_key(key) {
                continue;
            }
            let value1 = side1.get(key).or_else(|| core1.get(key));
            let value2 = side2.get(key).or_else(|| core2.get(key));
            let value = match (value1, value2) {
                (Some(a), Some(b)) => values.merge(a, b),
                (Some(it), None) | (None, Some(it)) => it.clone(),
                (None, None) => continue,
            };
            merged.insert(key.clone(), value);
        }
        Some(merged)
    }
}

impl<K, V, D> AbstractValueDomain<PredicatedAnalysisData<K, V>>
    for PredicatedAnalysisDataDomain<K, V, D>
where
    K: Ord + Clone,
    V: Clone + fmt::Debug,
    D: AbstractValueDomain<V>,
{
    fn unknown_or_may_be_value(&self) -> PredicatedAnalysisData<K, V> {
        PredicatedAnalysisData::new()
    }

    fn bottom(&self) -> PredicatedAnalysisData<K, V> {
        let mut data = PredicatedAnalysisData::new();
        data.set_reachable(false);
        data
    }

    fn merge(
        &self,
        value1: &PredicatedAnalysisData<K, V>,
        value2: &PredicatedAnalysisData<K, V>,
    ) -> PredicatedAnalysisData<K, V> {
        match (value1.is_reachable(), value2.is_reachable()) {
            (true, false) => return value1.clone(),
            (false, true) => return value2.clone(),
            _ => {}
        }
        let core = self.map.merge(value1.core(), value2.core());
        let predicated = value1
            .predicated()
            .iter()
            .filter_map(|(predicate, overlay1)| {
                let overlay2 = value2.predicated().get(predicate)?;
                let overlay = PredicatedOverlay {
                    when_true: self.merge_side(
                        overlay1.when_true.as_ref(),
                        value1.core(),
                        overlay2.when_true.as_ref(),
                        value2.core(),
                    ),
                    when_false: self.merge_side(
                        overlay1.when_false.as_ref(),
                        value1.core(),
                        overlay2.when_false.as_ref(),
                        value2.core(),
                    ),
                };
                Some((*predicate, overlay))
            })
            .collect::<BTreeMap<_, _>>();
        let mut merged = PredicatedAnalysisData::from_core(core);
        merged.set_predicated(predicated);
        merged.set_reachable(value1.is_reachable());
        merged
    }

    fn compare(
        &self,
        old: &PredicatedAnalysisData<K, V>,
        new: &PredicatedAnalysisData<K, V>,
    ) -> Ordering {
        match (old.is_reachable(), new.is_reachable()) {
            (false, true) => Ordering::Less,
            (true, false) => Ordering::Greater,
            _ => self.map.compare(old.core(), new.core()),
        }
    }
}
