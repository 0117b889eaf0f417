//! Pareto dominance and non-dominated sorting.

use serde::{Deserialize, Serialize};

/// Optimization direction of one objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Lower is better
    Minimize,
    /// Higher is better
    Maximize,
}

impl Direction {
    /// Map a score so that lower is always better.
    #[must_use]
    pub fn oriented(self, score: f64) -> f64 {
        match self {
            Self::Minimize => score,
            Self::Maximize => -score,
        }
    }
}

/// `a` dominates `b`: no worse in every objective and strictly better in one.
#[must_use]
pub fn dominates(a: &[f64], b: &[f64], directions: &[Direction]) -> bool {
    let mut strictly_better = false;
    for ((x, y), direction) in a.iter().zip(b).zip(directions) {
        let (x, y) = (direction.oriented(*x), direction.oriented(*y));
        if x > y {
            return false;
        }
        if x < y {
            strictly_better = true;
        }
    }
    strictly_better
}

/// Non-domination rank of every point (0 = Pareto front).
#[must_use]
pub fn non_dominated_ranks(points: &[Vec<f64>], directions: &[Direction]) -> Vec<usize> {
    let n = points.len();
    let mut dominated_by = vec![0usize; n];
    let mut dominates_list: Vec<Vec<usize>> = vec![Vec::new(); n];
    for i in 0..n {
        for j in (i + 1)..n {
            if dominates(&points[i], &points[j], directions) {
                dominates_list[i].push(j);
                dominated_by[j] += 1;
            } else if dominates(&points[j], &points[i], directions) {
                dominates_list[j].push(i);
                dominated_by[i] += 1;
            }
        }
    }

    let mut ranks = vec![0usize; n];
    let mut front: Vec<usize> = (0..n).filter(|&i| dominated_by[i] == 0).collect();
    let mut rank = 0;
    while !front.is_empty() {
        let mut next = Vec::new();
        for &i in &front {
            ranks[i] = rank;
            for &j in &dominates_list[i] {
                dominated_by[j] -= 1;
                if dominated_by[j] == 0 {
                    next.push(j);
                }
            }
        }
        rank += 1;
        front = next;
    }
    ranks
}

/// Indices of the non-dominated points, in input order.
#[must_use]
pub fn pareto_front(points: &[Vec<f64>], directions: &[Direction]) -> Vec<usize> {
    non_dominated_ranks(points, directions)
        .into_iter()
        .enumerate()
        .filter(|(_, rank)| *rank == 0)
        .map(|(i, _)| i)
        .collect()
}
