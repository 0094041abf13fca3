//! # Communication Topology
//!
//! Follower-to-follower adjacency `A`, its Laplacian `L = D − A`, the leader
//! access (pinning) matrix `D_lead` and the augmented Laplacian
//! `H = L + D_lead`.
//!
//! ## Stability precondition
//!
//! The formation laws converge only when `H` is positive definite, which holds
//! when the follower graph is connected (undirected) and at least one follower
//! senses the leader. This is not enforced at construction;
//! [`Topology::is_stabilizable`] and [`Topology::min_augmented_eigenvalue`]
//! let callers check it.
//!
//! All public ids are 1-based.

use crate::error::{FormationError, Result};
use nalgebra::{DMatrix, DVector};
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq)]
pub struct Topology {
    n: usize,
    adjacency: DMatrix<f64>,
    leader_access: DMatrix<f64>,
    laplacian: DMatrix<f64>,
    augmented_laplacian: DMatrix<f64>,
}

impl Topology {
    /// Builds the topology for `n` followers.
    ///
    /// A missing adjacency means no follower links, a missing leader access
    /// vector means no follower senses the leader.
    pub fn new(n: usize, adjacency: Option<DMatrix<f64>>, leader_access: Option<&[f64]>) -> Result<Self> {
        let adjacency = match adjacency {
            Some(adj) => {
                if adj.shape() != (n, n) {
                    return Err(FormationError::shape("adjacency matrix", (n, n), adj.shape()));
                }
                adj
            }
            None => DMatrix::zeros(n, n),
        };

        let leader_access = match leader_access {
            Some(access) => {
                if access.len() != n {
                    return Err(FormationError::shape("leader access vector", (n, 1), (access.len(), 1)));
                }
                DMatrix::from_diagonal(&DVector::from_column_slice(access))
            }
            None => DMatrix::zeros(n, n),
        };

        let degree = DMatrix::from_diagonal(&row_sums(&adjacency));
        let laplacian = degree - &adjacency;
        let augmented_laplacian = &laplacian + &leader_access;

        Ok(Topology {
            n,
            adjacency,
            leader_access,
            laplacian,
            augmented_laplacian,
        })
    }

    /// Builds from row-major nested vectors.
    pub fn from_rows(n: usize, adjacency: &[Vec<f64>], leader_access: &[f64]) -> Result<Self> {
        let rows = adjacency.len();
        let cols = adjacency.first().map_or(0, Vec::len);
        if rows != n || adjacency.iter().any(|row| row.len() != cols) || cols != n {
            return Err(FormationError::shape("adjacency matrix", (n, n), (rows, cols)));
        }
        let flat: Vec<f64> = adjacency.iter().flatten().copied().collect();
        Topology::new(n, Some(DMatrix::from_row_slice(n, n, &flat)), Some(leader_access))
    }

    /// Undirected ring `1 – 2 – … – n – 1` with unit weights.
    pub fn cycle(n: usize, leader_access: &[f64]) -> Result<Self> {
        let mut adjacency = DMatrix::zeros(n, n);
        if n > 1 {
            for i in 0..n {
                let j = (i + 1) % n;
                if i != j {
                    adjacency[(i, j)] = 1.0;
                    adjacency[(j, i)] = 1.0;
                }
            }
        }
        Topology::new(n, Some(adjacency), Some(leader_access))
    }

    pub fn num_agents(&self) -> usize {
        self.n
    }

    pub fn adjacency(&self) -> &DMatrix<f64> {
        &self.adjacency
    }

    /// Diagonal `D_lead`.
    pub fn leader_access(&self) -> &DMatrix<f64> {
        &self.leader_access
    }

    pub fn degree(&self) -> DMatrix<f64> {
        DMatrix::from_diagonal(&row_sums(&self.adjacency))
    }

    pub fn laplacian(&self) -> &DMatrix<f64> {
        &self.laplacian
    }

    pub fn augmented_laplacian(&self) -> &DMatrix<f64> {
        &self.augmented_laplacian
    }

    /// Maps a 1-based id to its matrix slot.
    pub fn slot(&self, agent_id: usize) -> Result<usize> {
        if agent_id == 0 || agent_id > self.n {
            return Err(FormationError::IndexOutOfRange { id: agent_id, num_agents: self.n });
        }
        Ok(agent_id - 1)
    }

    /// Ids `j` with `A[i, j] > 0`, ascending.
    pub fn neighbors(&self, agent_id: usize) -> Result<Vec<usize>> {
        let i = self.slot(agent_id)?;
        Ok((0..self.n)
            .filter(|&j| self.adjacency[(i, j)] > 0.0)
            .map(|j| j + 1)
            .collect())
    }

    /// `a_ij` between two followers.
    pub fn weight(&self, agent_id: usize, other_id: usize) -> Result<f64> {
        Ok(self.adjacency[(self.slot(agent_id)?, self.slot(other_id)?)])
    }

    /// `b_i = D_lead[i, i]`.
    pub fn leader_weight(&self, agent_id: usize) -> Result<f64> {
        let i = self.slot(agent_id)?;
        Ok(self.leader_access[(i, i)])
    }

    pub fn sees_leader(&self, agent_id: usize) -> Result<bool> {
        Ok(self.leader_weight(agent_id)? > 0.0)
    }

    pub fn any_leader_link(&self) -> bool {
        self.leader_access.diagonal().iter().any(|&b| b > 0.0)
    }

    /// Connectivity of the follower graph, treating any positive weight as an
    /// edge in either direction.
    pub fn is_connected(&self) -> bool {
        if self.n == 0 {
            return false;
        }
        let mut visited = vec![false; self.n];
        let mut queue = VecDeque::from([0usize]);
        visited[0] = true;
        while let Some(i) = queue.pop_front() {
            for j in 0..self.n {
                let linked = self.adjacency[(i, j)] > 0.0 || self.adjacency[(j, i)] > 0.0;
                if linked && !visited[j] {
                    visited[j] = true;
                    queue.push_back(j);
                }
            }
        }
        visited.into_iter().all(|v| v)
    }

    /// Connected follower graph with at least one leader link.
    pub fn is_stabilizable(&self) -> bool {
        self.is_connected() && self.any_leader_link()
    }

    /// Smallest eigenvalue of the symmetric part of `H`. Positive iff `H` is
    /// positive definite (for symmetric adjacency).
    pub fn min_augmented_eigenvalue(&self) -> f64 {
        let h = &self.augmented_laplacian;
        let symmetric = (h + h.transpose()) * 0.5;
        symmetric
            .symmetric_eigenvalues()
            .iter()
            .copied()
            .fold(f64::INFINITY, f64::min)
    }
}

fn row_sums(m: &DMatrix<f64>) -> DVector<f64> {
    DVector::from_iterator(m.nrows(), m.row_iter().map(|row| row.sum()))
}

impl std::fmt::Display for Topology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Topology(n={}, leader_linked={})", self.n, self.any_leader_link())
    }
}
