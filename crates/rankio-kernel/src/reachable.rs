//! Local × remote reachability weights.
//!
//! Path selection scores every (local endpoint, remote endpoint) pair and
//! stores the result here. Lower weight means preferred. The matrix starts
//! zeroed and owns its storage as a single allocation.

use std::ops::{Index, IndexMut};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReachableError {
    #[error("reachability matrix of {num_local} x {num_remote} overflows")]
    TooLarge { num_local: usize, num_remote: usize },

    #[error("cannot allocate reachability matrix of {num_local} x {num_remote}")]
    OutOfMemory { num_local: usize, num_remote: usize },
}

/// Dense row-major weight table, one row per local endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reachability {
    num_local: usize,
    num_remote: usize,
    weights: Box<[i32]>,
}

impl Reachability {
    /// Allocate a zeroed `num_local × num_remote` matrix.
    ///
    /// Fails rather than aborting when the size overflows or the allocator
    /// refuses.
    pub fn allocate(num_local: usize, num_remote: usize) -> Result<Self, ReachableError> {
        let len = num_local
            .checked_mul(num_remote)
            .filter(|len| len.checked_mul(size_of::<i32>()).is_some_and(|b| b <= isize::MAX as usize))
            .ok_or(ReachableError::TooLarge { num_local, num_remote })?;

        let mut weights = Vec::new();
        weights
            .try_reserve_exact(len)
            .map_err(|_| ReachableError::OutOfMemory { num_local, num_remote })?;
        weights.resize(len, 0);

        Ok(Self {
            num_local,
            num_remote,
            weights: weights.into_boxed_slice(),
        })
    }

    pub fn num_local(&self) -> usize {
        self.num_local
    }

    pub fn num_remote(&self) -> usize {
        self.num_remote
    }

    pub fn weight(&self, local: usize, remote: usize) -> Option<i32> {
        self.offset(local, remote).map(|i| self.weights[i])
    }

    /// Returns false when the index is out of range.
    pub fn set_weight(&mut self, local: usize, remote: usize, weight: i32) -> bool {
        match self.offset(local, remote) {
            Some(i) => {
                self.weights[i] = weight;
                true
            }
            None => false,
        }
    }

    pub fn row(&self, local: usize) -> Option<&[i32]> {
        (local < self.num_local).then(|| {
            let start = local * self.num_remote;
            &self.weights[start..start + self.num_remote]
        })
    }

    pub fn row_mut(&mut self, local: usize) -> Option<&mut [i32]> {
        if local >= self.num_local {
            return None;
        }
        let start = local * self.num_remote;
        Some(&mut self.weights[start..start + self.num_remote])
    }

    /// Iterate rows in local-endpoint order.
    pub fn rows(&self) -> impl Iterator<Item = &[i32]> + '_ {
        // Not chunks_exact: it panics on a zero-width row.
        (0..self.num_local).map(move |local| {
            let start = local * self.num_remote;
            &self.weights[start..start + self.num_remote]
        })
    }

    /// The lowest-weight remote for `local`, first one on ties.
    pub fn preferred_remote(&self, local: usize) -> Option<(usize, i32)> {
        self.row(local)?
            .iter()
            .copied()
            .enumerate()
            .min_by_key(|&(_, weight)| weight)
    }

    fn offset(&self, local: usize, remote: usize) -> Option<usize> {
        (local < self.num_local && remote < self.num_remote).then(|| local * self.num_remote + remote)
    }
}

impl Index<(usize, usize)> for Reachability {
    type Output = i32;

    fn index(&self, (local, remote): (usize, usize)) -> &i32 {
        assert!(
            local < self.num_local && remote < self.num_remote,
            "({local}, {remote}) out of range for {} x {} matrix",
            self.num_local,
            self.num_remote
        );
        &self.weights[local * self.num_remote + remote]
    }
}

impl IndexMut<(usize, usize)> for Reachability {
    fn index_mut(&mut self, (local, remote): (usize, usize)) -> &mut i32 {
        assert!(
            local < self.num_local && remote < self.num_remote,
            "({local}, {remote}) out of range for {} x {} matrix",
            self.num_local,
            self.num_remote
        );
        &mut self.weights[local * self.num_remote + remote]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_zeroed() {
        let m = Reachability::allocate(3, 4).unwrap();
        assert_eq!(m.num_local(), 3);
        assert_eq!(m.num_remote(), 4);
        assert!(m.rows().all(|row| row == [0, 0, 0, 0]));
        assert_eq!(m.rows().count(), 3);
    }

    #[test]
    fn rows_are_independent() {
        let mut m = Reachability::allocate(2, 3).unwrap();
        m[(0, 2)] = 7;
        m.row_mut(1).unwrap().copy_from_slice(&[1, 2, 3]);
        assert_eq!(m.row(0), Some(&[0, 0, 7][..]));
        assert_eq!(m.row(1), Some(&[1, 2, 3][..]));
        assert_eq!(m.weight(1, 1), Some(2));
    }

    #[test]
    fn out_of_range_access() {
        let mut m = Reachability::allocate(2, 2).unwrap();
        assert_eq!(m.weight(2, 0), None);
        assert_eq!(m.weight(0, 2), None);
        assert!(!m.set_weight(0, 5, 1));
        assert!(m.row(2).is_none());
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn index_panics_out_of_range() {
        let m = Reachability::allocate(1, 1).unwrap();
        let _ = m[(0, 1)];
    }

    #[test]
    fn empty_dimensions() {
        let m = Reachability::allocate(0, 5).unwrap();
        assert_eq!(m.rows().count(), 0);

        let m = Reachability::allocate(3, 0).unwrap();
        assert_eq!(m.rows().count(), 3);
        assert_eq!(m.preferred_remote(0), None);
    }

    #[test]
    fn preferred_remote_picks_lowest_then_first() {
        let mut m = Reachability::allocate(1, 4).unwrap();
        m.row_mut(0).unwrap().copy_from_slice(&[5, -1, 3, -1]);
        assert_eq!(m.preferred_remote(0), Some((1, -1)));
        assert_eq!(m.preferred_remote(1), None);
    }

    #[test]
    fn overflow_is_reported() {
        let err = Reachability::allocate(usize::MAX, 2).unwrap_err();
        assert_eq!(
            err,
            ReachableError::TooLarge {
                num_local: usize::MAX,
                num_remote: 2
            }
        );
    }

    #[test]
    fn oversized_allocation_is_reported() {
        // Fits isize once multiplied, but no allocator will hand it out.
        let err = Reachability::allocate(1 << 20, 1 << 40).unwrap_err();
        assert!(matches!(
            err,
            ReachableError::OutOfMemory { .. } | ReachableError::TooLarge { .. }
        ));
    }
}
