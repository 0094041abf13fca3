//! # CBF-QP Safety Filter
//!
//! Wraps a nominal command in a quadratic program that returns the closest
//! command keeping every nearby pair of followers outside the safety distance.
//!
//! ## Barrier
//!
//! For followers `i` and `k` with `Δp = p_i − p_k`, `Δv = v_i − v_k`:
//!
//! ```text
//! b_ik = ‖Δp‖² − d_min²
//! ```
//!
//! `b_ik` shrinks as the pair approaches and vanishes on the safety boundary.
//! Under double-integrator dynamics the acceleration first shows up in `b̈`,
//! so `ḃ ≥ −γ·b` is enforced through the second-order condition
//! `b̈ + 2γ·ḃ + γ²·b ≥ 0`, which is linear in the command:
//!
//! ```text
//! −Δpᵀ u_i ≤ ρ · ( ‖Δv‖² + γ·ḃ + ½γ²·b )
//! ```
//!
//! `ρ` is the share of the pairwise constraint enforced by `i`; with the
//! default `ρ = ½` both followers of a pair carry half.
//!
//! The guarantee holds for pairs that enter the considered radius with
//! `ḃ + γ·b ≥ 0`, so the radius should comfortably exceed the distance at
//! which followers can close at speed.
//!
//! ## QP
//!
//! `minimize ‖u − u_nom‖²  s.t.  G u ≤ h`, i.e. `P = I₂`, `q = −u_nom`.
//!
//! - No rows: `u_nom` is returned untouched.
//! - Infeasible rows: `u_nom` is returned, flagged as a fallback and logged.
//!
//! ## Variants
//!
//! - [`CentralizedCbf`]: global pairwise distance table, every follower within
//!   `risk_radius`.
//! - [`DistributedCbf`]: only followers within `sensing_radius`, nearest first,
//!   optionally capped at `max_neighbors`.

use crate::agent::FollowerState;
use crate::consensus::check_agent_order;
use crate::controller::NominalController;
use crate::error::{FormationError, QpError, Result};
use crate::qp::{ClosedFormSolver, ConstraintSet, QpSolver};
use crate::topology::Topology;
use nalgebra::{DMatrix, Matrix2, RowVector2, Vector2, Vector4};
use ordered_float::OrderedFloat;
use priority_queue::PriorityQueue;
use std::cmp::Reverse;
use tracing::{debug, warn};

/// Separation below which a pair has no usable normal direction.
const EPSILON: f64 = 1e-10;

/// Tuning of the barrier constraints.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CbfSettings {
    safety_distance: f64,
    gamma: f64,
    risk_radius: Option<f64>,
    sensing_radius: f64,
    max_neighbors: Option<usize>,
    responsibility: f64,
}

impl Default for CbfSettings {
    fn default() -> Self {
        CbfSettings {
            safety_distance: 0.5,
            gamma: 1.0,
            risk_radius: None,
            sensing_radius: 5.0,
            max_neighbors: None,
            responsibility: 0.5,
        }
    }
}

impl CbfSettings {
    /// `d_min`, shared by every pair.
    pub fn safety_distance(mut self, d_min: f64) -> Self {
        self.safety_distance = d_min;
        self
    }

    /// Class-K gain of the barrier condition.
    pub fn gamma(mut self, gamma: f64) -> Self {
        self.gamma = gamma;
        self
    }

    /// Pairs farther apart are ignored by [`CentralizedCbf`]. Unbounded by default.
    pub fn risk_radius(mut self, radius: f64) -> Self {
        self.risk_radius = Some(radius);
        self
    }

    /// Pairs farther apart are invisible to [`DistributedCbf`].
    pub fn sensing_radius(mut self, radius: f64) -> Self {
        self.sensing_radius = radius;
        self
    }

    pub fn max_neighbors(mut self, max_neighbors: Option<usize>) -> Self {
        self.max_neighbors = max_neighbors;
        self
    }

    /// Share `ρ` of each pairwise constraint enforced by the filtered agent.
    pub fn responsibility(mut self, share: f64) -> Self {
        self.responsibility = share;
        self
    }
}

/// How the filter arrived at its command.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterStatus {
    /// No constraint applied; the nominal command passed through.
    Unconstrained,
    /// The QP was solved with this many rows.
    Optimized { constraints: usize },
    /// The QP had no solution; the nominal command was kept.
    Fallback { constraints: usize, reason: QpError },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterOutcome {
    pub agent_id: usize,
    pub nominal: Vector2<f64>,
    pub command: Vector2<f64>,
    pub status: FilterStatus,
}

impl FilterOutcome {
    pub fn is_fallback(&self) -> bool {
        matches!(self.status, FilterStatus::Fallback { .. })
    }

    /// `‖u_safe − u_nom‖`.
    pub fn correction(&self) -> f64 {
        (self.command - self.nominal).norm()
    }
}

/// A safety filter: architecture-specific constraint generation over a shared
/// QP core.
pub trait SafetyFilter {
    type Solver: QpSolver;

    fn solver(&self) -> &Self::Solver;

    /// Barrier rows `(G, h)` for `agent_id`, or `None` when nothing is at risk.
    fn generate_constraints<A: FollowerState>(
        &self,
        agent_id: usize,
        agents: &[A],
    ) -> Result<Option<ConstraintSet>>;

    /// Closest command to `u_nom` that satisfies the barrier rows.
    fn filter<A: FollowerState>(
        &self,
        u_nom: &Vector2<f64>,
        agent_id: usize,
        agents: &[A],
    ) -> Result<FilterOutcome> {
        let constraints = self.generate_constraints(agent_id, agents)?;
        solve_cbf_qp(self.solver(), u_nom, agent_id, constraints)
    }

    /// Filters every follower against the same snapshot, index `k` belonging
    /// to id `k + 1`.
    fn filter_all<A: FollowerState>(
        &self,
        nominal: &[Vector2<f64>],
        agents: &[A],
    ) -> Result<Vec<FilterOutcome>> {
        check_batch(nominal, agents)?;
        nominal
            .iter()
            .enumerate()
            .map(|(slot, u_nom)| self.filter(u_nom, slot + 1, agents))
            .collect()
    }

    /// Nominal command from `controller`, then filtered.
    fn compute_safe_control<C: NominalController, A: FollowerState>(
        &self,
        controller: &C,
        agent_id: usize,
        agents: &[A],
        topology: &Topology,
        leader_state: Option<&Vector4<f64>>,
    ) -> Result<FilterOutcome> {
        let u_nom = controller.compute_nominal(agent_id, agents, topology, leader_state)?;
        self.filter(&u_nom, agent_id, agents)
    }
}

/// Shared QP core: `P = I`, `q = −u_nom`.
///
/// Infeasibility (and any other solver failure) degrades to `u_nom`; only a
/// malformed constraint set is an error.
pub fn solve_cbf_qp<S: QpSolver + ?Sized>(
    solver: &S,
    u_nom: &Vector2<f64>,
    agent_id: usize,
    constraints: Option<ConstraintSet>,
) -> Result<FilterOutcome> {
    let constraints = match constraints {
        Some(set) if !set.is_empty() => set,
        _ => {
            return Ok(FilterOutcome {
                agent_id,
                nominal: *u_nom,
                command: *u_nom,
                status: FilterStatus::Unconstrained,
            })
        }
    };

    let p = Matrix2::identity();
    let q = -u_nom;
    let rows = constraints.len();
    match solver.solve(&p, &q, Some(&constraints)) {
        Ok(command) => {
            debug!(agent_id, constraints = rows, correction = (command - u_nom).norm(), "CBF-QP solved");
            Ok(FilterOutcome {
                agent_id,
                nominal: *u_nom,
                command,
                status: FilterStatus::Optimized { constraints: rows },
            })
        }
        Err(QpError::ShapeMismatch { g_rows, g_cols, h_len }) => {
            Err(FormationError::shape("constraint set", (h_len, 2), (g_rows, g_cols)))
        }
        Err(reason) => {
            warn!(agent_id, constraints = rows, %reason, "CBF-QP failed, keeping nominal command");
            Ok(FilterOutcome {
                agent_id,
                nominal: *u_nom,
                command: *u_nom,
                status: FilterStatus::Fallback { constraints: rows, reason },
            })
        }
    }
}

/// Barrier row `(g, h)` of follower `agent` against `other`, `None` when the
/// two coincide.
pub fn pairwise_constraint(
    agent: &Vector4<f64>,
    other: &Vector4<f64>,
    settings: &CbfSettings,
) -> Option<(RowVector2<f64>, f64)> {
    let dp = Vector2::new(agent[0] - other[0], agent[1] - other[1]);
    let dv = Vector2::new(agent[2] - other[2], agent[3] - other[3]);
    if dp.norm() < EPSILON {
        return None;
    }

    let gamma = settings.gamma;
    let barrier = dp.norm_squared() - settings.safety_distance * settings.safety_distance;
    let barrier_rate = 2.0 * dp.dot(&dv);
    let bound = dv.norm_squared() + gamma * barrier_rate + 0.5 * gamma * gamma * barrier;

    Some((-dp.transpose(), settings.responsibility * bound))
}

fn rows_against<A: FollowerState>(
    agent_id: usize,
    agents: &[A],
    others: impl IntoIterator<Item = usize>,
    settings: &CbfSettings,
) -> Option<ConstraintSet> {
    let state = agents[agent_id - 1].state();
    let mut rows = Vec::new();
    for slot in others {
        match pairwise_constraint(&state, &agents[slot].state(), settings) {
            Some(row) => rows.push(row),
            None => warn!(agent_id, other_id = slot + 1, "co-located followers, pair skipped"),
        }
    }
    if rows.is_empty() {
        None
    } else {
        Some(ConstraintSet::from_rows(&rows))
    }
}

fn check_batch<A: FollowerState>(nominal: &[Vector2<f64>], agents: &[A]) -> Result<()> {
    if nominal.len() != agents.len() {
        return Err(FormationError::shape("nominal commands", (agents.len(), 2), (nominal.len(), 2)));
    }
    check_agent_order(agents, agents.len())
}

fn within(distance: f64, radius: Option<f64>) -> bool {
    radius.map_or(true, |r| distance < r)
}

fn check_id<A: FollowerState>(agent_id: usize, agents: &[A]) -> Result<()> {
    if agent_id == 0 || agent_id > agents.len() {
        return Err(FormationError::IndexOutOfRange { id: agent_id, num_agents: agents.len() });
    }
    check_agent_order(agents, agents.len())
}

/// Symmetric table of planar distances between every pair of followers.
pub fn pairwise_distances<A: FollowerState>(agents: &[A]) -> DMatrix<f64> {
    let n = agents.len();
    let positions: Vec<Vector2<f64>> = agents
        .iter()
        .map(|a| {
            let s = a.state();
            Vector2::new(s[0], s[1])
        })
        .collect();
    let mut table = DMatrix::zeros(n, n);
    for i in 0..n {
        for j in (i + 1)..n {
            let d = (positions[i] - positions[j]).norm();
            table[(i, j)] = d;
            table[(j, i)] = d;
        }
    }
    table
}

/// Filter with global knowledge of every pairwise distance.
#[derive(Debug, Clone)]
pub struct CentralizedCbf<S = ClosedFormSolver> {
    settings: CbfSettings,
    solver: S,
}

impl CentralizedCbf<ClosedFormSolver> {
    pub fn new(settings: CbfSettings) -> Self {
        CentralizedCbf::with_solver(settings, ClosedFormSolver)
    }
}

impl<S: QpSolver> CentralizedCbf<S> {
    pub fn with_solver(settings: CbfSettings, solver: S) -> Self {
        CentralizedCbf { settings, solver }
    }

    fn constraints_from_table<A: FollowerState>(
        &self,
        agent_id: usize,
        agents: &[A],
        distances: &DMatrix<f64>,
    ) -> Option<ConstraintSet> {
        let i = agent_id - 1;
        let at_risk = (0..agents.len()).filter(|&j| j != i && within(distances[(i, j)], self.settings.risk_radius));
        rows_against(agent_id, agents, at_risk, &self.settings)
    }
}

impl<S: QpSolver> SafetyFilter for CentralizedCbf<S> {
    type Solver = S;

    fn solver(&self) -> &S {
        &self.solver
    }

    fn generate_constraints<A: FollowerState>(
        &self,
        agent_id: usize,
        agents: &[A],
    ) -> Result<Option<ConstraintSet>> {
        check_id(agent_id, agents)?;
        let distances = pairwise_distances(agents);
        Ok(self.constraints_from_table(agent_id, agents, &distances))
    }

    /// One distance table for the whole batch.
    fn filter_all<A: FollowerState>(
        &self,
        nominal: &[Vector2<f64>],
        agents: &[A],
    ) -> Result<Vec<FilterOutcome>> {
        check_batch(nominal, agents)?;
        let distances = pairwise_distances(agents);
        let outcomes = nominal
            .iter()
            .enumerate()
            .map(|(slot, u_nom)| {
                let constraints = self.constraints_from_table(slot + 1, agents, &distances);
                solve_cbf_qp(&self.solver, u_nom, slot + 1, constraints)
            })
            .collect::<Result<Vec<_>>>()?;
        let fallbacks = outcomes.iter().filter(|o| o.is_fallback()).count();
        debug!(agents = agents.len(), fallbacks, "centralized CBF batch filtered");
        Ok(outcomes)
    }
}

/// Filter restricted to what the follower can sense around itself.
#[derive(Debug, Clone)]
pub struct DistributedCbf<S = ClosedFormSolver> {
    settings: CbfSettings,
    solver: S,
}

impl DistributedCbf<ClosedFormSolver> {
    pub fn new(settings: CbfSettings) -> Self {
        DistributedCbf::with_solver(settings, ClosedFormSolver)
    }
}

impl<S: QpSolver> DistributedCbf<S> {
    pub fn with_solver(settings: CbfSettings, solver: S) -> Self {
        DistributedCbf { settings, solver }
    }

    /// Slots of sensed followers, nearest first.
    fn sensed<A: FollowerState>(&self, agent_id: usize, agents: &[A]) -> Vec<usize> {
        let i = agent_id - 1;
        let own = agents[i].state();
        let mut nearby = PriorityQueue::new();
        for (j, other) in agents.iter().enumerate() {
            if j == i {
                continue;
            }
            let s = other.state();
            let d = ((own[0] - s[0]).powi(2) + (own[1] - s[1]).powi(2)).sqrt();
            if d < self.settings.sensing_radius {
                nearby.push(j, Reverse(OrderedFloat(d)));
            }
        }

        let limit = self.settings.max_neighbors.unwrap_or(usize::MAX);
        let mut sensed = Vec::new();
        while let Some((j, _)) = nearby.pop() {
            if sensed.len() >= limit {
                break;
            }
            sensed.push(j);
        }
        sensed
    }
}

impl<S: QpSolver> SafetyFilter for DistributedCbf<S> {
    type Solver = S;

    fn solver(&self) -> &S {
        &self.solver
    }

    fn generate_constraints<A: FollowerState>(
        &self,
        agent_id: usize,
        agents: &[A],
    ) -> Result<Option<ConstraintSet>> {
        check_id(agent_id, agents)?;
        let sensed = self.sensed(agent_id, agents);
        Ok(rows_against(agent_id, agents, sensed, &self.settings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use crate::controller::FormationGains;
    use crate::distributed::DistributedFormation;
    use crate::qp::OsqpSolver;
    use approx::assert_abs_diff_eq;
    use nalgebra::DVector;

    fn agent(id: usize, x: f64, y: f64, vx: f64, vy: f64) -> Agent {
        Agent::new(id, Vector4::new(x, y, vx, vy), Vector4::zeros())
    }

    /// Two followers closing head-on, slightly off axis.
    fn closing_pair() -> Vec<Agent> {
        vec![agent(1, 0.0, 0.0, 1.0, 0.0), agent(2, 1.0, 0.2, -1.0, 0.0)]
    }

    /// Follower 1 squeezed between two fast followers closing from both sides.
    fn squeezed_triple() -> Vec<Agent> {
        vec![
            agent(1, 0.0, 0.0, 0.0, 0.0),
            agent(2, 0.6, 0.0, -3.0, 0.0),
            agent(3, -0.6, 0.0, 3.0, 0.0),
        ]
    }

    /// Always returns `u_x ≤ -1` and `-u_x ≤ -1`.
    struct Contradictory;

    impl SafetyFilter for Contradictory {
        type Solver = ClosedFormSolver;

        fn solver(&self) -> &ClosedFormSolver {
            &ClosedFormSolver
        }

        fn generate_constraints<A: FollowerState>(&self, _: usize, _: &[A]) -> Result<Option<ConstraintSet>> {
            Ok(Some(ConstraintSet::from_rows(&[
                (RowVector2::new(1.0, 0.0), -1.0),
                (RowVector2::new(-1.0, 0.0), -1.0),
            ])))
        }
    }

    #[test]
    fn test_pairwise_constraint_values() {
        let agents = closing_pair();
        let settings = CbfSettings::default();
        let (g, h) = pairwise_constraint(&agents[0].state, &agents[1].state, &settings).unwrap();

        // Δp = (-1, -0.2), Δv = (2, 0): b = 0.79, ḃ = -4, bound = 4 - 4 + 0.395.
        assert_abs_diff_eq!(g, RowVector2::new(1.0, 0.2), epsilon = 1e-12);
        assert_abs_diff_eq!(h, 0.5 * 0.395, epsilon = 1e-12);
    }

    #[test]
    fn test_pairwise_constraint_is_reciprocal() {
        let agents = closing_pair();
        let settings = CbfSettings::default();
        let (g_ij, h_ij) = pairwise_constraint(&agents[0].state, &agents[1].state, &settings).unwrap();
        let (g_ji, h_ji) = pairwise_constraint(&agents[1].state, &agents[0].state, &settings).unwrap();
        assert_abs_diff_eq!(g_ij, -g_ji, epsilon = 1e-12);
        assert_abs_diff_eq!(h_ij, h_ji, epsilon = 1e-12);
    }

    #[test]
    fn test_barrier_bound_grows_with_separation() {
        let settings = CbfSettings::default();
        let near = pairwise_constraint(&Vector4::zeros(), &Vector4::new(0.6, 0.0, 0.0, 0.0), &settings).unwrap();
        let far = pairwise_constraint(&Vector4::zeros(), &Vector4::new(2.0, 0.0, 0.0, 0.0), &settings).unwrap();
        assert!(far.1 > near.1);
    }

    #[test]
    fn test_colocated_pair_is_skipped() {
        assert!(pairwise_constraint(&Vector4::zeros(), &Vector4::new(0.0, 0.0, 1.0, 0.0), &CbfSettings::default()).is_none());

        let agents = vec![agent(1, 0.0, 0.0, 0.0, 0.0), agent(2, 0.0, 0.0, 1.0, 0.0)];
        let filter = DistributedCbf::new(CbfSettings::default());
        assert_eq!(filter.generate_constraints(1, &agents).unwrap(), None);
    }

    #[test]
    fn test_no_constraints_is_exact_pass_through() {
        let agents = vec![agent(1, 0.0, 0.0, 1.0, 0.0), agent(2, 50.0, 0.0, -1.0, 0.0)];
        let filter = DistributedCbf::new(CbfSettings::default());
        let u_nom = Vector2::new(0.123456789, -9.87654321);

        assert_eq!(filter.generate_constraints(1, &agents).unwrap(), None);
        let outcome = filter.filter(&u_nom, 1, &agents).unwrap();
        assert_eq!(outcome.command, u_nom);
        assert_eq!(outcome.status, FilterStatus::Unconstrained);
        assert_eq!(outcome.correction(), 0.0);
    }

    #[test]
    fn test_active_constraint_is_satisfied() {
        let agents = closing_pair();
        let u_nom = Vector2::new(1.0, 0.0);

        let closed_form = DistributedCbf::new(CbfSettings::default());
        let osqp = DistributedCbf::with_solver(CbfSettings::default(), OsqpSolver::default());
        let constraints = closed_form.generate_constraints(1, &agents).unwrap().unwrap();
        assert!(!constraints.is_satisfied(&u_nom, 0.0), "nominal command should be unsafe");

        let exact = closed_form.filter(&u_nom, 1, &agents).unwrap();
        assert_eq!(exact.status, FilterStatus::Optimized { constraints: 1 });
        assert!(constraints.is_satisfied(&exact.command, 1e-9));
        // Projection onto g·u = h: u_nom - g (g·u_nom - h) / ‖g‖².
        assert_abs_diff_eq!(exact.command, Vector2::new(0.228365384615, -0.154326923077), epsilon = 1e-9);

        let iterative = osqp.filter(&u_nom, 1, &agents).unwrap();
        assert!(!iterative.is_fallback());
        assert!(constraints.is_satisfied(&iterative.command, 1e-5));
        assert_abs_diff_eq!(iterative.command, exact.command, epsilon = 1e-4);
    }

    #[test]
    fn test_filtered_command_is_minimum_deviation() {
        // Any other feasible point on a small circle around the answer is farther from u_nom.
        let agents = closing_pair();
        let u_nom = Vector2::new(1.0, 0.0);
        let filter = DistributedCbf::new(CbfSettings::default());
        let constraints = filter.generate_constraints(1, &agents).unwrap().unwrap();
        let outcome = filter.filter(&u_nom, 1, &agents).unwrap();

        for k in 0..32 {
            let angle = k as f64 * std::f64::consts::PI / 16.0;
            let candidate = outcome.command + Vector2::new(angle.cos(), angle.sin()) * 0.05;
            if constraints.is_satisfied(&candidate, 0.0) {
                assert!((candidate - u_nom).norm() >= outcome.correction() - 1e-12);
            }
        }
    }

    #[test]
    fn test_infeasible_rows_fall_back_to_nominal() {
        let agents = closing_pair();
        let u_nom = Vector2::new(0.3, -0.7);
        let outcome = Contradictory.filter(&u_nom, 1, &agents).unwrap();

        assert_eq!(outcome.command, u_nom);
        assert!(outcome.is_fallback());
        assert_eq!(
            outcome.status,
            FilterStatus::Fallback { constraints: 2, reason: QpError::Infeasible }
        );
    }

    #[test]
    fn test_squeezed_agent_falls_back() {
        let agents = squeezed_triple();
        let settings = CbfSettings::default().gamma(5.0);
        let u_nom = Vector2::new(0.2, 0.1);

        for outcome in [
            DistributedCbf::new(settings.clone()).filter(&u_nom, 1, &agents).unwrap(),
            CentralizedCbf::new(settings.clone()).filter(&u_nom, 1, &agents).unwrap(),
        ] {
            assert!(outcome.is_fallback());
            assert_eq!(outcome.command, u_nom);
        }
    }

    #[test]
    fn test_malformed_constraints_are_an_error() {
        struct Broken;
        impl QpSolver for Broken {
            fn solve(&self, _: &Matrix2<f64>, _: &Vector2<f64>, _: Option<&ConstraintSet>) -> std::result::Result<Vector2<f64>, QpError> {
                Err(QpError::ShapeMismatch { g_rows: 2, g_cols: 3, h_len: 2 })
            }
        }
        let set = ConstraintSet::new(DMatrix::zeros(1, 2), DVector::zeros(1)).unwrap();
        let err = solve_cbf_qp(&Broken, &Vector2::zeros(), 1, Some(set)).unwrap_err();
        assert!(matches!(err, FormationError::ShapeMismatch { what: "constraint set", .. }));
    }

    #[test]
    fn test_sensing_radius_limits_distributed_rows() {
        let agents = vec![
            agent(1, 0.0, 0.0, 0.0, 0.0),
            agent(2, 1.0, 0.0, 0.0, 0.0),
            agent(3, 0.0, 4.0, 0.0, 0.0),
        ];
        let filter = DistributedCbf::new(CbfSettings::default().sensing_radius(2.0));
        let rows = filter.generate_constraints(1, &agents).unwrap().unwrap();
        assert_eq!(rows.len(), 1);
        assert_abs_diff_eq!(rows.row(0).0, Vector2::new(1.0, 0.0), epsilon = 1e-12);

        let centralized = CentralizedCbf::new(CbfSettings::default());
        assert_eq!(centralized.generate_constraints(1, &agents).unwrap().unwrap().len(), 2);
    }

    #[test]
    fn test_max_neighbors_keeps_nearest() {
        let agents = vec![
            agent(1, 0.0, 0.0, 0.0, 0.0),
            agent(2, 3.0, 0.0, 0.0, 0.0),
            agent(3, 0.0, 1.0, 0.0, 0.0),
            agent(4, -2.0, 0.0, 0.0, 0.0),
        ];
        let filter = DistributedCbf::new(CbfSettings::default().max_neighbors(Some(2)));
        let rows = filter.generate_constraints(1, &agents).unwrap().unwrap();

        // Nearest are follower 3 (d = 1) then follower 4 (d = 2); g = -Δp = p_k - p_i.
        assert_eq!(rows.len(), 2);
        assert_abs_diff_eq!(rows.row(0).0, Vector2::new(0.0, 1.0), epsilon = 1e-12);
        assert_abs_diff_eq!(rows.row(1).0, Vector2::new(-2.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn test_risk_radius_limits_centralized_rows() {
        let agents = vec![
            agent(1, 0.0, 0.0, 0.0, 0.0),
            agent(2, 1.0, 0.0, 0.0, 0.0),
            agent(3, 10.0, 0.0, 0.0, 0.0),
        ];
        let filter = CentralizedCbf::new(CbfSettings::default().risk_radius(5.0));
        assert_eq!(filter.generate_constraints(1, &agents).unwrap().unwrap().len(), 1);
        assert_eq!(filter.generate_constraints(3, &agents).unwrap(), None);

        // Unbounded by default.
        let unbounded = CentralizedCbf::new(CbfSettings::default());
        assert_eq!(unbounded.generate_constraints(1, &agents).unwrap().unwrap().len(), 2);
        assert_eq!(unbounded.generate_constraints(3, &agents).unwrap().unwrap().len(), 2);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_settings_json_round_trip() {
        for settings in [
            CbfSettings::default(),
            CbfSettings::default().risk_radius(2.5).max_neighbors(Some(3)).gamma(4.0),
        ] {
            let json = serde_json::to_string(&settings).unwrap();
            let back: CbfSettings = serde_json::from_str(&json).unwrap();
            assert_eq!(back, settings, "round trip through {}", json);
        }
    }

    #[test]
    fn test_centralized_and_distributed_agree_when_all_visible() {
        let agents = vec![
            agent(1, 0.0, 0.0, 0.5, 0.1),
            agent(2, 0.9, 0.3, -0.8, 0.0),
            agent(3, -0.4, 0.8, 0.2, -0.6),
            agent(4, 0.2, -0.9, 0.0, 0.7),
        ];
        let nominal: Vec<Vector2<f64>> = (0..4).map(|k| Vector2::new(1.0 - k as f64, 0.5 * k as f64)).collect();
        let centralized = CentralizedCbf::new(CbfSettings::default());
        let distributed = DistributedCbf::new(CbfSettings::default());

        let batch = centralized.filter_all(&nominal, &agents).unwrap();
        for (slot, u_nom) in nominal.iter().enumerate() {
            let single = distributed.filter(u_nom, slot + 1, &agents).unwrap();
            assert_abs_diff_eq!(single.command, batch[slot].command, epsilon = 1e-9);
            let rows = distributed.generate_constraints(slot + 1, &agents).unwrap().unwrap();
            if !batch[slot].is_fallback() {
                assert!(rows.is_satisfied(&batch[slot].command, 1e-9));
            }
        }
    }

    #[test]
    fn test_filter_all_checks_lengths() {
        let agents = closing_pair();
        let filter = CentralizedCbf::new(CbfSettings::default());
        assert!(matches!(
            filter.filter_all(&[Vector2::zeros()], &agents),
            Err(FormationError::ShapeMismatch { what: "nominal commands", .. })
        ));
        assert!(DistributedCbf::new(CbfSettings::default()).filter_all(&[], &agents).is_err());
    }

    #[test]
    fn test_batch_filter_matches_single_agent_filter() {
        let agents = squeezed_triple();
        let nominal = vec![Vector2::new(0.2, 0.1), Vector2::new(-1.0, 0.5), Vector2::new(0.0, -0.3)];
        let settings = CbfSettings::default().gamma(5.0);
        let centralized = CentralizedCbf::new(settings.clone());
        let distributed = DistributedCbf::new(settings);

        for batch in [
            centralized.filter_all(&nominal, &agents).unwrap(),
            distributed.filter_all(&nominal, &agents).unwrap(),
        ] {
            assert_eq!(batch.len(), 3);
            for (slot, outcome) in batch.iter().enumerate() {
                let single = centralized.filter(&nominal[slot], slot + 1, &agents).unwrap();
                assert_eq!(outcome.agent_id, slot + 1);
                assert_eq!(outcome.status, single.status);
                assert_abs_diff_eq!(outcome.command, single.command, epsilon = 1e-9);
            }
            assert!(batch[0].is_fallback());
            assert!(!batch[1].is_fallback());
        }
    }

    #[test]
    fn test_unknown_agent_id() {
        let agents = closing_pair();
        let filter = DistributedCbf::new(CbfSettings::default());
        assert_eq!(
            filter.generate_constraints(3, &agents),
            Err(FormationError::IndexOutOfRange { id: 3, num_agents: 2 })
        );
        assert!(filter.filter(&Vector2::zeros(), 0, &agents).is_err());
    }

    #[test]
    fn test_compute_safe_control_chains_nominal_and_filter() {
        // Two pinned followers without follower links, told to swap sides.
        let topology = Topology::new(2, None, Some(&[1.0, 1.0])).unwrap();
        let agents = vec![
            Agent::new(1, Vector4::new(-0.4, 0.05, 1.0, 0.0), Vector4::new(2.0, 0.0, 0.0, 0.0)),
            Agent::new(2, Vector4::new(0.4, -0.05, -1.0, 0.0), Vector4::new(-2.0, 0.0, 0.0, 0.0)),
        ];
        let controller = DistributedFormation::new(FormationGains::pd(1.0, 1.5));
        let filter = DistributedCbf::new(CbfSettings::default());

        let u_nom = controller.compute_nominal(1, &agents, &topology, None).unwrap();
        let outcome = filter.compute_safe_control(&controller, 1, &agents, &topology, None).unwrap();
        assert_eq!(outcome.nominal, u_nom);
        assert_eq!(outcome.agent_id, 1);
        assert!(outcome.correction() > 0.0);
    }
}
