// RadioSweep: Parameter Sweeps and Result Consolidation for Emulated Radio Networks
// Copyright (C) 2024-2025 Roland Schmid <roschmi@ethz.ch> and Tibor Schneider <sctibor@ethz.ch>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//! Odometer over the four-dimensional parameter space of a sweep.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Number of dimensions of the parameter space.
pub const DIMENSIONS: usize = 4;

/// Indices into the parameter space: iteration, source node, message size and error rate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterVector([usize; DIMENSIONS]);

impl ParameterVector {
    pub fn new(indices: [usize; DIMENSIONS]) -> Self {
        Self(indices)
    }

    pub fn iteration(&self) -> usize {
        self.0[0]
    }

    /// 0-based index of the sender node.
    pub fn source_node(&self) -> usize {
        self.0[1]
    }

    pub fn message_size_index(&self) -> usize {
        self.0[2]
    }

    pub fn error_rate_index(&self) -> usize {
        self.0[3]
    }

    pub fn indices(&self) -> [usize; DIMENSIONS] {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|x| *x == 0)
    }

    /// Whether every index is below its maximum.
    pub fn fits(&self, maxima: &[usize; DIMENSIONS]) -> bool {
        self.0.iter().zip(maxima).all(|(x, max)| x < max)
    }
}

impl Display for ParameterVector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {}, {}, {}]",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

/// Result of advancing the enumerator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// The enumerator now points to the next vector.
    Next,
    /// The carry ran past the last dimension. The vector is back at all zeros.
    Complete,
}

#[derive(Debug, Clone)]
pub struct ParameterSweepEnumerator {
    current: ParameterVector,
    maxima: [usize; DIMENSIONS],
}

impl ParameterSweepEnumerator {
    /// Create an enumerator starting at the all-zero vector.
    pub fn new(maxima: [usize; DIMENSIONS]) -> Self {
        Self::starting_at(maxima, ParameterVector::default())
    }

    /// Create an enumerator that resumes the sweep at `start`.
    pub fn starting_at(maxima: [usize; DIMENSIONS], start: ParameterVector) -> Self {
        Self {
            current: start,
            maxima,
        }
    }

    pub fn current(&self) -> ParameterVector {
        self.current
    }

    pub fn maxima(&self) -> [usize; DIMENSIONS] {
        self.maxima
    }

    /// Number of vectors in the whole parameter space.
    pub fn total(&self) -> usize {
        self.maxima.iter().product()
    }

    /// Number of vectors enumerated before the current one.
    pub fn position(&self) -> usize {
        self.current
            .0
            .iter()
            .zip(self.maxima)
            .rev()
            .fold(0, |acc, (x, max)| acc * max + x)
    }

    /// Increment dimension 0, carrying into the next dimension on overflow.
    pub fn advance(&mut self) -> Advance {
        for (x, max) in self.current.0.iter_mut().zip(self.maxima) {
            *x += 1;
            if *x < max {
                return Advance::Next;
            }
            *x = 0;
        }
        Advance::Complete
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn completes_after_product_of_maxima() {
        for maxima in [[1, 1, 1, 1], [3, 1, 4, 5], [2, 2, 2, 2], [1, 7, 1, 3]] {
            let mut e = ParameterSweepEnumerator::new(maxima);
            let total = e.total();
            let mut seen = HashSet::new();
            for step in 1..=total {
                assert!(seen.insert(e.current()));
                assert_eq!(e.position(), step - 1);
                let advance = e.advance();
                if step < total {
                    assert_eq!(advance, Advance::Next, "{maxima:?} completed early at {step}");
                } else {
                    assert_eq!(advance, Advance::Complete);
                }
            }
            assert!(e.current().is_zero());
            assert_eq!(seen.len(), total);
        }
    }

    #[test]
    fn dimension_zero_moves_fastest() {
        let mut e = ParameterSweepEnumerator::new([2, 1, 3, 1]);
        e.advance();
        assert_eq!(e.current(), ParameterVector::new([1, 0, 0, 0]));
        e.advance();
        assert_eq!(e.current(), ParameterVector::new([0, 0, 1, 0]));
    }

    #[test]
    fn resume_from_vector() {
        let start = ParameterVector::new([1, 0, 1, 0]);
        let mut e = ParameterSweepEnumerator::starting_at([2, 1, 2, 1], start);
        assert_eq!(e.position(), 3);
        assert_eq!(e.advance(), Advance::Complete);
    }

    #[test]
    fn display_and_serde() {
        let v = ParameterVector::new([0, 1, 2, 3]);
        assert_eq!(v.to_string(), "[0, 1, 2, 3]");
        assert_eq!(serde_json::to_string(&v).unwrap(), "[0,1,2,3]");
        assert!(v.fits(&[1, 2, 3, 4]));
        assert!(!v.fits(&[1, 2, 3, 3]));
    }
}
