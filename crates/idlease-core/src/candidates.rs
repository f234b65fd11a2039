//! Randomized traversal order over an identifier range
//!
//! Concurrent allocators started at the same moment would collide on every
//! probe if they all walked the range in order. Each allocator instead draws
//! its own uniformly random permutation of the offsets `0..n`.
//!
//! The permutation is produced lazily with a sparse Fisher-Yates shuffle: only
//! positions that have been displaced are kept in a map, so memory grows with
//! the number of candidates consumed rather than with the range size.

use std::collections::HashMap;

use chrono::Utc;
use rand::{Rng, SeedableRng, rngs::StdRng};

/// Non-repeating random iterator over the offsets `0..len`
///
/// Finite and single-use: once every offset has been yielded the iterator is
/// exhausted for good.
#[derive(Debug)]
pub struct CandidateOrder {
    rng: StdRng,
    remaining: u64,
    displaced: HashMap<u64, u64>,
}

impl CandidateOrder {
    /// Permutation of `0..len` seeded from the current time in nanoseconds
    pub fn new(len: u64) -> Self {
        let seed = Utc::now().timestamp_nanos_opt().unwrap_or_default() as u64;
        Self::with_seed(len, seed)
    }

    /// Permutation of `0..len` from an explicit seed
    pub fn with_seed(len: u64, seed: u64) -> Self {
        Self { rng: StdRng::seed_from_u64(seed), remaining: len, displaced: HashMap::new() }
    }

    fn slot(&self, index: u64) -> u64 {
        self.displaced.get(&index).copied().unwrap_or(index)
    }
}

impl Iterator for CandidateOrder {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        if self.remaining == 0 {
            return None;
        }

        let last = self.remaining - 1;
        let pick = self.rng.random_range(0..self.remaining);
        let chosen = self.slot(pick);

        // Move the tail value into the hole left by the pick
        if pick != last {
            let tail = self.slot(last);
            self.displaced.insert(pick, tail);
        }
        self.displaced.remove(&last);
        self.remaining = last;

        Some(chosen)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = usize::try_from(self.remaining).unwrap_or(usize::MAX);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for CandidateOrder {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_yields_every_offset_once() {
        let order: Vec<u64> = CandidateOrder::new(1024).collect();

        assert_eq!(order.len(), 1024);
        let distinct: HashSet<u64> = order.iter().copied().collect();
        assert_eq!(distinct.len(), 1024);
        assert!(order.iter().all(|&o| o < 1024));
    }

    #[test]
    fn test_empty_and_single_ranges() {
        assert_eq!(CandidateOrder::new(0).next(), None);
        assert_eq!(CandidateOrder::new(1).collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn test_exhausted_iterator_stays_exhausted() {
        let mut order = CandidateOrder::with_seed(3, 7);
        assert_eq!(order.len(), 3);

        for _ in 0..3 {
            assert!(order.next().is_some());
        }
        assert_eq!(order.len(), 0);
        assert_eq!(order.next(), None);
        assert_eq!(order.next(), None);
    }

    #[test]
    fn test_same_seed_same_order() {
        let a: Vec<u64> = CandidateOrder::with_seed(64, 42).collect();
        let b: Vec<u64> = CandidateOrder::with_seed(64, 42).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_order_is_shuffled() {
        // 1/100! chance of a false failure per seed
        let identity: Vec<u64> = (0..100).collect();
        let shuffled: Vec<u64> = CandidateOrder::with_seed(100, 1).collect();
        assert_ne!(shuffled, identity);
    }

    #[test]
    fn test_first_pick_is_spread_across_range() {
        let firsts: HashSet<u64> =
            (0..200).filter_map(|seed| CandidateOrder::with_seed(16, seed).next()).collect();
        // With 200 draws from 16 values every value should show up
        assert_eq!(firsts.len(), 16);
    }
}
