// Ordered sequence lookup shared by admission and pruning
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// An element with the searched key is at this index.
    Found(usize),
    /// No such element; inserting here keeps the sequence ordered.
    Insert(usize),
}

/// Binary search over a sequence ordered by `compare`, which returns how an
/// element relates to the searched key.
pub fn locate_by<T>(items: &[T], compare: impl FnMut(&T) -> Ordering) -> Slot {
    match items.binary_search_by(compare) {
        Ok(index) => Slot::Found(index),
        Err(index) => Slot::Insert(index),
    }
}

/// Binary search over a sequence ordered by the key `key_of` extracts.
pub fn locate<T, K: Ord>(items: &[T], key: &K, mut key_of: impl FnMut(&T) -> K) -> Slot {
    locate_by(items, |item| key_of(item).cmp(key))
}

/// Number of leading elements whose key is below `bound`.
pub fn count_below<T, K: Ord>(items: &[T], bound: &K, mut key_of: impl FnMut(&T) -> K) -> usize {
    items.partition_point(|item| key_of(item) < *bound)
}
