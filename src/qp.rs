//! # Two-Variable Quadratic Programs
//!
//! The safety filter solves
//!
//! ```text
//! minimize   ½ uᵀ P u + qᵀ u
//! subject to G u ≤ h
//! ```
//!
//! for a 2-dimensional `u`. Solvers sit behind [`QpSolver`] so the filter has
//! no dependency on any particular one.
//!
//! - [`ClosedFormSolver`]: exact active-set enumeration. With two variables the
//!   optimum has at most two linearly independent active rows, so checking the
//!   unconstrained minimizer, every single-row projection and every two-row
//!   vertex is exhaustive. `O(m³)` in the number of rows, which is small here.
//! - [`OsqpSolver`]: the OSQP ADMM solver, for larger or stiffer problems.

use crate::error::QpError;
use nalgebra::{DMatrix, DVector, Matrix2, RowVector2, Vector2};
use osqp::{CscMatrix, Problem, Settings};
use std::borrow::Cow;

/// Feasibility slack used when checking candidate points.
const FEASIBILITY_TOL: f64 = 1e-9;
/// Below this a pair of rows is treated as parallel.
const SINGULAR_TOL: f64 = 1e-12;

/// Linear inequality rows `G u ≤ h`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintSet {
    g: DMatrix<f64>,
    h: DVector<f64>,
}

impl ConstraintSet {
    pub fn new(g: DMatrix<f64>, h: DVector<f64>) -> Result<Self, QpError> {
        if g.ncols() != 2 || g.nrows() != h.len() {
            return Err(QpError::ShapeMismatch {
                g_rows: g.nrows(),
                g_cols: g.ncols(),
                h_len: h.len(),
            });
        }
        Ok(ConstraintSet { g, h })
    }

    pub fn from_rows(rows: &[(RowVector2<f64>, f64)]) -> Self {
        let g = DMatrix::from_fn(rows.len(), 2, |r, c| rows[r].0[c]);
        let h = DVector::from_iterator(rows.len(), rows.iter().map(|(_, b)| *b));
        ConstraintSet { g, h }
    }

    pub fn g(&self) -> &DMatrix<f64> {
        &self.g
    }

    pub fn h(&self) -> &DVector<f64> {
        &self.h
    }

    pub fn len(&self) -> usize {
        self.h.len()
    }

    pub fn is_empty(&self) -> bool {
        self.h.is_empty()
    }

    pub fn row(&self, r: usize) -> (Vector2<f64>, f64) {
        (Vector2::new(self.g[(r, 0)], self.g[(r, 1)]), self.h[r])
    }

    /// Largest `g_r·u − h_r`; non-positive when `u` is feasible.
    pub fn max_violation(&self, u: &Vector2<f64>) -> f64 {
        (0..self.len())
            .map(|r| {
                let (g, h) = self.row(r);
                g.dot(u) - h
            })
            .fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn is_satisfied(&self, u: &Vector2<f64>, tol: f64) -> bool {
        self.is_empty() || self.max_violation(u) <= tol
    }
}

/// A solver for `min ½uᵀPu + qᵀu  s.t.  Gu ≤ h`, `P` symmetric positive definite.
pub trait QpSolver {
    fn solve(
        &self,
        p: &Matrix2<f64>,
        q: &Vector2<f64>,
        constraints: Option<&ConstraintSet>,
    ) -> Result<Vector2<f64>, QpError>;
}

/// Exact solver exploiting the two-dimensional decision variable.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClosedFormSolver;

impl QpSolver for ClosedFormSolver {
    fn solve(
        &self,
        p: &Matrix2<f64>,
        q: &Vector2<f64>,
        constraints: Option<&ConstraintSet>,
    ) -> Result<Vector2<f64>, QpError> {
        let p_inv = p
            .try_inverse()
            .ok_or_else(|| QpError::SolverFailure("cost matrix is singular".to_string()))?;
        let unconstrained = -(p_inv * q);

        let set = match constraints {
            Some(set) if !set.is_empty() => set,
            _ => return Ok(unconstrained),
        };

        let tol = |h: f64| FEASIBILITY_TOL * (1.0 + h.abs());
        let feasible = |u: &Vector2<f64>| {
            (0..set.len()).all(|r| {
                let (g, h) = set.row(r);
                g.dot(u) - h <= tol(h)
            })
        };
        let cost = |u: &Vector2<f64>| 0.5 * u.dot(&(p * u)) + q.dot(u);

        if feasible(&unconstrained) {
            return Ok(unconstrained);
        }

        let mut best: Option<(f64, Vector2<f64>)> = None;
        let mut consider = |u: Vector2<f64>| {
            if u.iter().all(|v| v.is_finite()) && feasible(&u) {
                let c = cost(&u);
                if best.map_or(true, |(best_cost, _)| c < best_cost) {
                    best = Some((c, u));
                }
            }
        };

        // One active row: minimize on the line g·u = h.
        for r in 0..set.len() {
            let (g, h) = set.row(r);
            let p_inv_g = p_inv * g;
            let curvature = g.dot(&p_inv_g);
            if curvature <= SINGULAR_TOL {
                continue;
            }
            let lambda = (g.dot(&unconstrained) - h) / curvature;
            consider(unconstrained - p_inv_g * lambda);
        }

        // Two active rows: their intersection.
        for r in 0..set.len() {
            for s in (r + 1)..set.len() {
                let (g1, h1) = set.row(r);
                let (g2, h2) = set.row(s);
                let det = g1.x * g2.y - g1.y * g2.x;
                if det.abs() <= SINGULAR_TOL * g1.norm() * g2.norm() {
                    continue;
                }
                consider(Vector2::new(
                    (h1 * g2.y - h2 * g1.y) / det,
                    (g1.x * h2 - g2.x * h1) / det,
                ));
            }
        }

        best.map(|(_, u)| u).ok_or(QpError::Infeasible)
    }
}

/// OSQP-backed solver.
#[derive(Debug, Clone)]
pub struct OsqpSolver {
    eps_abs: f64,
    eps_rel: f64,
    max_iter: u32,
}

impl Default for OsqpSolver {
    fn default() -> Self {
        OsqpSolver {
            eps_abs: 1e-7,
            eps_rel: 1e-7,
            max_iter: 10_000,
        }
    }
}

impl OsqpSolver {
    pub fn eps_abs(mut self, eps: f64) -> Self {
        self.eps_abs = eps;
        self
    }

    pub fn eps_rel(mut self, eps: f64) -> Self {
        self.eps_rel = eps;
        self
    }

    pub fn max_iter(mut self, max_iter: u32) -> Self {
        self.max_iter = max_iter;
        self
    }

    fn settings(&self) -> Settings {
        Settings::default()
            .verbose(false)
            .eps_abs(self.eps_abs)
            .eps_rel(self.eps_rel)
            .max_iter(self.max_iter)
            .polishing(true)
    }
}

impl QpSolver for OsqpSolver {
    fn solve(
        &self,
        p: &Matrix2<f64>,
        q: &Vector2<f64>,
        constraints: Option<&ConstraintSet>,
    ) -> Result<Vector2<f64>, QpError> {
        // OSQP wants at least one row; an empty set becomes a free row.
        let (g, lower, upper) = match constraints {
            Some(set) if !set.is_empty() => (
                set.g().clone(),
                vec![f64::NEG_INFINITY; set.len()],
                set.h().iter().copied().collect::<Vec<_>>(),
            ),
            _ => (DMatrix::from_row_slice(1, 2, &[1.0, 0.0]), vec![f64::NEG_INFINITY], vec![f64::INFINITY]),
        };

        // Upper triangle of P, column by column.
        let p_matrix = CscMatrix {
            nrows: 2,
            ncols: 2,
            indptr: Cow::Borrowed(&[0, 1, 3]),
            indices: Cow::Borrowed(&[0, 0, 1]),
            data: Cow::Owned(vec![p[(0, 0)], p[(0, 1)], p[(1, 1)]]),
        };
        let a_matrix = csc_from_dense(&g);

        let mut problem = Problem::new(p_matrix, q.as_slice(), a_matrix, &lower, &upper, &self.settings())
            .map_err(|_| QpError::SolverFailure("OSQP setup failed".to_string()))?;

        let maybe_solution = match problem.solve() {
            osqp::Status::Solved(sol) => Ok(Vector2::new(sol.x()[0], sol.x()[1])),
            osqp::Status::SolvedInaccurate(sol) => Ok(Vector2::new(sol.x()[0], sol.x()[1])),
            osqp::Status::PrimalInfeasible(_) | osqp::Status::PrimalInfeasibleInaccurate(_) => Err(QpError::Infeasible),
            osqp::Status::MaxIterationsReached(_) => {
                Err(QpError::SolverFailure("maximum iterations reached".to_string()))
            }
            _ => Err(QpError::SolverFailure("OSQP did not return a solution".to_string())),
        };
        let u = maybe_solution?;

        // Reject answers that miss the constraints by more than the solver tolerance.
        if let Some(set) = constraints {
            let slack = 10.0 * (self.eps_abs + self.eps_rel * set.h().amax());
            if !set.is_satisfied(&u, slack.max(1e-6)) {
                return Err(QpError::Infeasible);
            }
        }
        Ok(u)
    }
}

/// Column-major sparse copy of a dense matrix, skipping exact zeros.
fn csc_from_dense(m: &DMatrix<f64>) -> CscMatrix<'static> {
    let mut data = Vec::new();
    let mut indices = Vec::new();
    let mut indptr = vec![0];
    for c in 0..m.ncols() {
        for r in 0..m.nrows() {
            let v = m[(r, c)];
            if v != 0.0 {
                data.push(v);
                indices.push(r);
            }
        }
        indptr.push(data.len());
    }
    CscMatrix {
        nrows: m.nrows(),
        ncols: m.ncols(),
        indptr: Cow::Owned(indptr),
        indices: Cow::Owned(indices),
        data: Cow::Owned(data),
    }
}
