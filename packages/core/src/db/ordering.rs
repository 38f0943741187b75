//! Dense sibling ordering
//!
//! Ordered groups (media blocks of a post, beads of a game, card faces) keep a
//! dense `0..n` sequence of order indexes. Historic data breaks this in several
//! ways: 1-based sequences, gaps left by deleted rows, duplicated positions and
//! raw timestamps used as positions. A single renumbering pass repairs all of
//! them.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;

/// Sort key of one group member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderKey {
    pub order_index: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub seq: u64,
}

impl OrderKey {
    /// Prior index first, then creation time, then insertion sequence
    pub fn compare(&self, other: &OrderKey) -> Ordering {
        let by_index = match (self.order_index, other.order_index) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_index
            .then_with(|| self.created_at.cmp(&other.created_at))
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

pub struct DenseOrderCalculator;

impl DenseOrderCalculator {
    /// Compute the new dense index of every member
    ///
    /// Returns, for each input position, the index it should receive.
    ///
    /// # Example
    /// Input:  [Some(1), Some(2), Some(2), Some(5)]
    /// Output: [0, 1, 2, 3]
    pub fn assign(keys: &[OrderKey]) -> Vec<i64> {
        let mut positions: Vec<usize> = (0..keys.len()).collect();
        positions.sort_by(|a, b| keys[*a].compare(&keys[*b]));

        let mut assigned = vec![0i64; keys.len()];
        for (dense, position) in positions.into_iter().enumerate() {
            assigned[position] = dense as i64;
        }
        assigned
    }

    /// Whether the indexes form exactly `{0, 1, ..., n-1}`
    pub fn is_dense(indexes: &[i64]) -> bool {
        let mut sorted = indexes.to_vec();
        sorted.sort_unstable();
        sorted
            .iter()
            .enumerate()
            .all(|(expected, actual)| *actual == expected as i64)
    }
}
