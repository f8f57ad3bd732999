//! Per-point analysis state.
use std::collections::{BTreeMap, btree_map};

pub mod predicated;

pub use predicated::{PredicatedAnalysisData, PredicatedOverlay};

/// A map from tracked keys to abstract values.
///
/// Iteration follows the key order, so two runs building the same state produce equal
/// and identically ordered maps.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DictionaryAnalysisData<K, V> {
    values: BTreeMap<K, V>,
}

impl<K, V> Default for DictionaryAnalysisData<K, V> {
    fn default() -> Self {
        Self {
            values: BTreeMap::new(),
        }
    }
}

impl<K: Ord, V> DictionaryAnalysisData<K, V> {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value of a key.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<&V> {
        self.values.get(key)
    }

    /// Whether the key has a value.
    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        self.values.contains_key(key)
    }

    /// Sets the value of a key, returning the previous one.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.values.insert(key, value)
    }

    /// Removes a key.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.values.remove(key)
    }

    /// Keeps the entries matching the predicate.
    pub fn retain(&mut self, f: impl FnMut(&K, &mut V) -> bool) {
        self.values.retain(f);
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates over the entries in key order.
    pub fn iter(&self) -> btree_map::Iter<'_, K, V> {
        self.values.iter()
    }

    /// Iterates over the keys in key order.
    pub fn keys(&self) -> btree_map::Keys<'_, K, V> {
        self.values.keys()
    }

    /// Removes all entries.
    pub fn clear(&mut self) {
        self.values.clear();
    }
}

impl<K: Ord, V> FromIterator<(K, V)> for DictionaryAnalysisData<K, V> {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

impl<K: Ord, V> Extend<(K, V)> for DictionaryAnalysisData<K, V> {
    fn extend<T: IntoIterator<Item = (K, V)>>(&mut self, iter: T) {
        self.values.extend(iter);
    }
}

impl<K, V> IntoIterator for DictionaryAnalysisData<K, V> {
    type Item = (K, V);
    type IntoIter = btree_map::IntoIter<K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

impl<'a, K, V> IntoIterator for &'a DictionaryAnalysisData<K, V> {
    type Item = (&'a K, &'a V);
    type IntoIter = btree_map::Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}
