use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::corpus::IndexReference;

/// What a pattern model stores per pattern.
pub trait OccurrenceData: Clone + Default + Send + Sync + Serialize + DeserializeOwned {
    /// Whether the occurrence references are kept.
    const INDEXED: bool;

    fn count(&self) -> u32;

    /// Records one occurrence.
    fn add(&mut self, r: IndexReference);

    fn merge(&mut self, other: Self);

    /// Occurrence references; empty for count-only data.
    fn references(&self) -> &[IndexReference];

    fn from_references(refs: Vec<IndexReference>) -> Self;

    /// Brings the data in canonical form once counting is done.
    fn finish(&mut self) {}
}

impl OccurrenceData for u32 {
    const INDEXED: bool = false;

    fn count(&self) -> u32 {
        *self
    }

    fn add(&mut self, _r: IndexReference) {
        *self += 1;
    }

    fn merge(&mut self, other: Self) {
        *self += other;
    }

    fn references(&self) -> &[IndexReference] {
        &[]
    }

    fn from_references(refs: Vec<IndexReference>) -> Self {
        refs.len() as u32
    }
}

/// Sorted, duplicate-free occurrence references of a pattern.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedData {
    refs: Vec<IndexReference>,
}

impl OccurrenceData for IndexedData {
    const INDEXED: bool = true;

    fn count(&self) -> u32 {
        self.refs.len() as u32
    }

    fn add(&mut self, r: IndexReference) {
        self.refs.push(r);
    }

    fn merge(&mut self, mut other: Self) {
        if other.refs.len() > self.refs.len() {
            std::mem::swap(&mut self.refs, &mut other.refs);
        }
        self.refs.extend(other.refs);
    }

    fn references(&self) -> &[IndexReference] {
        &self.refs
    }

    fn from_references(refs: Vec<IndexReference>) -> Self {
        let mut data = IndexedData { refs };
        data.finish();
        data
    }

    fn finish(&mut self) {
        self.refs.sort_unstable();
        self.refs.dedup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indexed_data() {
        let mut a = IndexedData::default();
        a.add(IndexReference::new(2, 0));
        a.add(IndexReference::new(0, 3));

        let mut b = IndexedData::default();
        b.add(IndexReference::new(0, 3));
        b.add(IndexReference::new(1, 1));
        b.add(IndexReference::new(0, 1));

        a.merge(b);
        a.finish();
        assert_eq!(
            a.references(),
            &[
                IndexReference::new(0, 1),
                IndexReference::new(0, 3),
                IndexReference::new(1, 1),
                IndexReference::new(2, 0)
            ]
        );
        assert_eq!(a.count(), 4);
        assert_eq!(u32::from_references(a.references().to_vec()), 4);
    }
}
