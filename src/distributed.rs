//! # Distributed Formation Control
//!
//! Consensus protocol evaluated on board follower `i`, using only its own
//! state and offset, its neighbors' states and offsets, and its own leader
//! link weight `b_i`:
//!
//! ```text
//! u_i = −K·[ Σ_{j∈N_i} a_ij·((x_i − f_i) − (x_j − f_j)) + b_i·(x_i − f_i − x_L) ] + K'·f_i
//! ```
//!
//! The neighbor sum comes from [`neighbor_error_sum`], whose `j − i`
//! orientation is why it enters with a positive sign below.

use crate::agent::FollowerState;
use crate::consensus::{check_agent_order, neighbor_error_sum, tracking_error};
use crate::controller::{leader_or_origin, Architecture, FormationGains, NominalController};
use crate::error::Result;
use crate::topology::Topology;
use nalgebra::{DMatrix, Vector2, Vector4};
use tracing::trace;

#[derive(Debug, Clone)]
pub struct DistributedFormation {
    name: String,
    gains: FormationGains,
}

impl DistributedFormation {
    pub fn new(gains: FormationGains) -> Self {
        DistributedFormation {
            name: "DistributedFormation".to_string(),
            gains,
        }
    }

    pub fn try_new(k: &DMatrix<f64>, k_prime: Option<&DMatrix<f64>>) -> Result<Self> {
        Ok(DistributedFormation::new(FormationGains::try_from_dynamic(k, k_prime)?))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn gains(&self) -> &FormationGains {
        &self.gains
    }
}

impl NominalController for DistributedFormation {
    fn name(&self) -> &str {
        &self.name
    }

    fn architecture(&self) -> Architecture {
        Architecture::Distributed
    }

    fn compute_nominal<A: FollowerState>(
        &self,
        agent_id: usize,
        agents: &[A],
        topology: &Topology,
        leader_state: Option<&Vector4<f64>>,
    ) -> Result<Vector2<f64>> {
        let i = topology.slot(agent_id)?;
        check_agent_order(agents, topology.num_agents())?;
        let agent = &agents[i];
        let leader = leader_or_origin(leader_state);

        let consensus = neighbor_error_sum(agent_id, agents, topology)?;
        let b_i = topology.leader_weight(agent_id)?;
        let leader_error = tracking_error(agent, &leader);

        let k = &self.gains.k;
        let u = k * consensus - k * leader_error * b_i + self.gains.k_prime * agent.offset();
        trace!(agent_id, ux = u.x, uy = u.y, "distributed nominal command");
        Ok(u)
    }

    fn compute_all<A: FollowerState>(
        &self,
        agents: &[A],
        topology: &Topology,
        leader_state: Option<&Vector4<f64>>,
    ) -> Result<Vec<Vector2<f64>>> {
        (1..=agents.len())
            .map(|id| self.compute_nominal(id, agents, topology, leader_state))
            .collect()
    }
}
