//! # Centralized Formation Control
//!
//! Computes every follower's command in one shot from the stacked system:
//!
//! ```text
//! E     = X_all − F_all − 1_N ⊗ x_L
//! U_all = −(H ⊗ K)·E + (I_N ⊗ K')·F_all
//! ```
//!
//! where `H` is the augmented Laplacian. `U_all` (2N) is reshaped so that row
//! `i` holds the command of follower `i + 1`.

use crate::agent::FollowerState;
use crate::consensus::{check_agent_order, stack_offsets, stack_states};
use crate::controller::{leader_or_origin, Architecture, FormationGains, NominalController};
use crate::error::{FormationError, Result};
use crate::topology::Topology;
use nalgebra::{DMatrix, DVector, Matrix2x4, Vector2, Vector4};
use tracing::trace;

#[derive(Debug, Clone)]
pub struct CentralizedFormation {
    name: String,
    gains: FormationGains,
}

impl CentralizedFormation {
    pub fn new(gains: FormationGains) -> Self {
        CentralizedFormation {
            name: "CentralizedFormation".to_string(),
            gains,
        }
    }

    /// Shape-checked construction; `K` and `K'` must be 2×4.
    pub fn try_new(k: &DMatrix<f64>, k_prime: Option<&DMatrix<f64>>) -> Result<Self> {
        Ok(CentralizedFormation::new(FormationGains::try_from_dynamic(k, k_prime)?))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn gains(&self) -> &FormationGains {
        &self.gains
    }

    /// The `N×2` command matrix for the whole formation.
    pub fn compute_batch<A: FollowerState>(
        &self,
        agents: &[A],
        topology: &Topology,
        leader_state: Option<&Vector4<f64>>,
    ) -> Result<DMatrix<f64>> {
        let n = agents.len();
        let h = topology.augmented_laplacian();
        if h.shape() != (n, n) {
            return Err(FormationError::shape("augmented Laplacian", (n, n), h.shape()));
        }
        check_agent_order(agents, n)?;

        let x_all = stack_states(agents);
        let f_all = stack_offsets(agents);
        let leader = leader_or_origin(leader_state);
        let x_leader_all = DVector::from_fn(4 * n, |r, _| leader[r % 4]);

        let error_all = &x_all - &f_all - x_leader_all;

        let h_kron_k = h.kronecker(&dynamic(&self.gains.k));
        let mut u_all = -(h_kron_k * error_all);
        if self.gains.has_feedforward() {
            let i_kron_k_prime = DMatrix::<f64>::identity(n, n).kronecker(&dynamic(&self.gains.k_prime));
            u_all += i_kron_k_prime * f_all;
        }

        let commands = DMatrix::from_fn(n, 2, |i, c| u_all[2 * i + c]);
        trace!(agents = n, "centralized formation batch computed");
        Ok(commands)
    }
}

fn dynamic(m: &Matrix2x4<f64>) -> DMatrix<f64> {
    DMatrix::from_column_slice(2, 4, m.as_slice())
}

impl NominalController for CentralizedFormation {
    fn name(&self) -> &str {
        &self.name
    }

    fn architecture(&self) -> Architecture {
        Architecture::Centralized
    }

    fn compute_nominal<A: FollowerState>(
        &self,
        agent_id: usize,
        agents: &[A],
        topology: &Topology,
        leader_state: Option<&Vector4<f64>>,
    ) -> Result<Vector2<f64>> {
        let i = topology.slot(agent_id)?;
        let batch = self.compute_batch(agents, topology, leader_state)?;
        Ok(Vector2::new(batch[(i, 0)], batch[(i, 1)]))
    }

    fn compute_all<A: FollowerState>(
        &self,
        agents: &[A],
        topology: &Topology,
        leader_state: Option<&Vector4<f64>>,
    ) -> Result<Vec<Vector2<f64>>> {
        let batch = self.compute_batch(agents, topology, leader_state)?;
        Ok(batch
            .row_iter()
            .map(|row| Vector2::new(row[0], row[1]))
            .collect())
    }
}
