//! # Consensus Error Primitives
//!
//! Shared by both nominal controllers so that their sign conventions cannot
//! drift apart.
//!
//! With `ξ_i = x_i − f_i` the formation error of follower `i`,
//! [`neighbor_error_sum`] returns
//!
//! ```text
//! Σ_{j ∈ N_i} a_ij (ξ_j − ξ_i)
//! ```
//!
//! which is exactly row block `i` of `−(L ⊗ I₄)·(X − F)`. The leader-pinned
//! consensus law is therefore
//!
//! ```text
//! u_i = K·Σ_j a_ij (ξ_j − ξ_i) − b_i·K·(ξ_i − x_L) + K'·f_i
//!     = [−(H ⊗ K)(X − F − 1⊗x_L) + (I ⊗ K')F]_i
//! ```

use crate::agent::FollowerState;
use crate::error::{FormationError, Result};
use crate::topology::Topology;
use nalgebra::{DVector, Vector4};

/// `ξ_i = x_i − f_i`.
pub fn formation_error<A: FollowerState>(agent: &A) -> Vector4<f64> {
    agent.state() - agent.offset()
}

/// `e_i = x_i − f_i − x_L`.
pub fn tracking_error<A: FollowerState>(agent: &A, leader_state: &Vector4<f64>) -> Vector4<f64> {
    formation_error(agent) - leader_state
}

/// `Σ_{j ∈ N_i} a_ij [(x_j − f_j) − (x_i − f_i)]` for the 1-based `agent_id`.
pub fn neighbor_error_sum<A: FollowerState>(
    agent_id: usize,
    agents: &[A],
    topology: &Topology,
) -> Result<Vector4<f64>> {
    let i = topology.slot(agent_id)?;
    let agent = agents
        .get(i)
        .ok_or(FormationError::IndexOutOfRange { id: agent_id, num_agents: agents.len() })?;
    let xi_i = formation_error(agent);

    let mut sum = Vector4::zeros();
    for j in topology.neighbors(agent_id)? {
        let neighbor = agents
            .get(j - 1)
            .ok_or(FormationError::IndexOutOfRange { id: j, num_agents: agents.len() })?;
        let a_ij = topology.adjacency()[(i, j - 1)];
        sum += (formation_error(neighbor) - xi_i) * a_ij;
    }
    Ok(sum)
}

/// Checks the id ↔ slot bijection: `len == n` and `agents[k].id() == k + 1`.
pub fn check_agent_order<A: FollowerState>(agents: &[A], n: usize) -> Result<()> {
    if agents.len() != n {
        return Err(FormationError::shape("agent set", (n, 1), (agents.len(), 1)));
    }
    for (slot, agent) in agents.iter().enumerate() {
        if agent.id() != slot + 1 {
            return Err(FormationError::AgentOrder { slot, id: agent.id() });
        }
    }
    Ok(())
}

/// `X_all`, the 4N stacked state vector.
pub fn stack_states<A: FollowerState>(agents: &[A]) -> DVector<f64> {
    stack(agents, |a| a.state())
}

/// `F_all`, the 4N stacked offset vector.
pub fn stack_offsets<A: FollowerState>(agents: &[A]) -> DVector<f64> {
    stack(agents, |a| a.offset())
}

fn stack<A: FollowerState>(agents: &[A], part: impl Fn(&A) -> Vector4<f64>) -> DVector<f64> {
    let mut stacked = DVector::zeros(agents.len() * 4);
    for (k, agent) in agents.iter().enumerate() {
        stacked.fixed_rows_mut::<4>(4 * k).copy_from(&part(agent));
    }
    stacked
}
