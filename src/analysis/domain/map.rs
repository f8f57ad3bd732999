//! The pointwise lifting of a value domain to maps.
use std::{cmp::Ordering, fmt, marker::PhantomData};

use super::{AbstractValueDomain, debug_assert_monotonic};
use crate::analysis::data::DictionaryAnalysisData;

/// Maps ordered pointwise.
///
/// A key missing from a map has not been assigned on that path, so the merge of two maps
/// holds the union of their keys. A map is below another if every key it holds is held by
/// the other with a value at least as large.
pub struct MapAbstractDomain<K, V, D> {
    values: D,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V, D> MapAbstractDomain<K, V, D> {
    /// Lifts a value domain.
    #[must_use]
    pub const fn new(values: D) -> Self {
        Self {
            values,
            _marker: PhantomData,
        }
    }

    /// Returns the domain of the values.
    #[must_use]
    pub const fn value_domain(&self) -> &D {
        &self.values
    }
}

impl<K, V, D: fmt::Debug> fmt::Debug for MapAbstractDomain<K, V, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MapAbstractDomain").field(&self.values).finish()
    }
}

impl<K, V, D: Clone> Clone for MapAbstractDomain<K, V, D> {
    fn clone(&self) -> Self {
        Self::new(self.values.clone())
    }
}

impl<K, V, D> AbstractValueDomain<DictionaryAnalysisData<K, V>> for MapAbstractDomain<K, V, D>
where
    K: Ord + Clone,
    V: Clone + fmt::Debug,
    D: AbstractValueDomain<V>,
{
    fn unknown_or_may_be_value(&self) -> DictionaryAnalysisData<K, V> {
        DictionaryAnalysisData::new()
    }

    fn bottom(&self) -> DictionaryAnalysisData<K, V> {
        DictionaryAnalysisData::new()
    }

    fn merge(
        &self,
        value1: &DictionaryAnalysisData<K, V>,
        value2: &DictionaryAnalysisData<K, V>,
    ) -> DictionaryAnalysisData<K, V> {
        let mut merged = value1.clone();
        for (key, value) in value2 {
            let entry = match value1.get(key) {
                Some(existing) => {
                    let result = self.values.merge(existing, value);
                    debug_assert_monotonic(&self.values, [existing, value], &result);
                    result
                }
                None => value.clone(),
            };
            merged.insert(key.clone(), entry);
        }
        merged
    }

    fn merge_owned(
        &self,
        mut value1: DictionaryAnalysisData<K, V>,
        value2: DictionaryAnalysisData<K, V>,
    ) -> DictionaryAnalysisData<K, V> {
        for (key, value) in value2 {
            let entry = match value1.remove(&key) {
                Some(existing) => {
                    let result = self.values.merge(&existing, &value);
                    debug_assert_monotonic(&self.values, [&existing, &value], &result);
                    result
                }
                None => value,
            };
            value1.insert(key, entry);
        }
        value1
    }

    fn compare(
        &self,
        old: &DictionaryAnalysisData<K, V>,
        new: &DictionaryAnalysisData<K, V>,
    ) -> Ordering {
        if old.len() > new.len() {
            return Ordering::Greater;
        }
        let mut is_less = old.len() < new.len();
        for (key, value) in old {
            let Some(other) = new.get(key) else {
                return Ordering::Greater;
            };
            match self.values.compare(value, other) {
                Ordering::Greater => return Ordering::Greater,
                Ordering::Less => is_less = true,
                Ordering::Equal => {}
            }
        }
        if is_less {
            Ordering::Less
        } else {
            Ordering::Equal
        }
    }
}
