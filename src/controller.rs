//! # Nominal Formation Control
//!
//! A nominal controller turns the pre-step snapshot of every follower into an
//! unconstrained acceleration command. Two architectures implement the same
//! law:
//!
//! - [`CentralizedFormation`](crate::centralized::CentralizedFormation):
//!   one Kronecker-structured matrix product for the whole formation.
//! - [`DistributedFormation`](crate::distributed::DistributedFormation):
//!   one follower at a time from locally visible information.
//!
//! Given identical inputs and gains both produce the same commands.

use crate::agent::FollowerState;
use crate::error::{FormationError, Result};
use crate::topology::Topology;
use nalgebra::{DMatrix, Matrix2x4, Vector2, Vector4};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture {
    Centralized,
    Distributed,
}

/// Capability shared by both nominal controllers.
pub trait NominalController {
    fn name(&self) -> &str;

    fn architecture(&self) -> Architecture;

    /// Command `[ax, ay]` for the follower with 1-based `agent_id`.
    ///
    /// `leader_state` defaults to the zero vector.
    fn compute_nominal<A: FollowerState>(
        &self,
        agent_id: usize,
        agents: &[A],
        topology: &Topology,
        leader_state: Option<&Vector4<f64>>,
    ) -> Result<Vector2<f64>>;

    /// Commands for every follower, index `k` belonging to id `k + 1`.
    fn compute_all<A: FollowerState>(
        &self,
        agents: &[A],
        topology: &Topology,
        leader_state: Option<&Vector4<f64>>,
    ) -> Result<Vec<Vector2<f64>>>;
}

/// Feedback gain `K` and formation feed-forward gain `K'`, both 2×4.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FormationGains {
    pub k: Matrix2x4<f64>,
    pub k_prime: Matrix2x4<f64>,
}

impl FormationGains {
    /// Feedback only, `K' = 0`.
    pub fn new(k: Matrix2x4<f64>) -> Self {
        FormationGains { k, k_prime: Matrix2x4::zeros() }
    }

    pub fn with_feedforward(k: Matrix2x4<f64>, k_prime: Matrix2x4<f64>) -> Self {
        FormationGains { k, k_prime }
    }

    /// Decoupled PD gain `K = [kp·I₂  kd·I₂]`.
    pub fn pd(kp: f64, kd: f64) -> Self {
        FormationGains::new(Matrix2x4::new(
            kp, 0.0, kd, 0.0,
            0.0, kp, 0.0, kd,
        ))
    }

    /// Shape-checked construction from dynamically sized matrices.
    pub fn try_from_dynamic(k: &DMatrix<f64>, k_prime: Option<&DMatrix<f64>>) -> Result<Self> {
        let k = fixed_gain("K", k)?;
        let k_prime = match k_prime {
            Some(kp) => fixed_gain("K'", kp)?,
            None => Matrix2x4::zeros(),
        };
        Ok(FormationGains { k, k_prime })
    }

    pub fn has_feedforward(&self) -> bool {
        self.k_prime.iter().any(|&v| v != 0.0)
    }
}

fn fixed_gain(what: &'static str, m: &DMatrix<f64>) -> Result<Matrix2x4<f64>> {
    if m.shape() != (2, 4) {
        return Err(FormationError::shape(what, (2, 4), m.shape()));
    }
    Ok(Matrix2x4::from_iterator(m.iter().copied()))
}

pub(crate) fn leader_or_origin(leader_state: Option<&Vector4<f64>>) -> Vector4<f64> {
    leader_state.copied().unwrap_or_else(Vector4::zeros)
}
