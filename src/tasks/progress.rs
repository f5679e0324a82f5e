//! # Task progress as completed/total unit counts.

use std::iter::Sum;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

/// Progress of a task, in implementation-defined units.
///
/// Addition is elementwise. `completed <= total` is a recommendation, not
/// an invariant: aggregation over a moving set of children can overshoot,
/// and consumers must tolerate it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    /// Number of units completed so far.
    pub completed: f64,
    /// Total number of units to complete the task.
    pub total: f64,
}

impl Progress {
    /// Creates a progress value.
    pub fn new(completed: f64, total: f64) -> Self {
        Self { completed, total }
    }
}

impl AddAssign for Progress {
    fn add_assign(&mut self, rhs: Self) {
        self.completed += rhs.completed;
        self.total += rhs.total;
    }
}

impl Add for Progress {
    type Output = Self;

    fn add(mut self, rhs: Self) -> Self {
        self += rhs;
        self
    }
}

impl Sum for Progress {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addition_is_elementwise() {
        let sum = Progress::new(1.0, 4.0) + Progress::new(2.5, 6.0);
        assert_eq!(sum, Progress::new(3.5, 10.0));
    }

    #[test]
    fn sum_over_iterator() {
        let total: Progress = [Progress::new(1.0, 1.0), Progress::new(0.0, 1.0)]
            .into_iter()
            .sum();
        assert_eq!(total, Progress::new(1.0, 2.0));
    }
}
