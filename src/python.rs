//! Python bindings, enabled with the `python` feature.
//!
//! Matrices cross the boundary as row-major nested lists, states as
//! `[x, y, vx, vy]` and commands as `[ax, ay]`.

use crate::agent::{Agent, FollowerState};
use crate::cbf::{CbfSettings, CentralizedCbf, DistributedCbf, FilterOutcome, SafetyFilter};
use crate::centralized::CentralizedFormation;
use crate::controller::NominalController;
use crate::distributed::DistributedFormation;
use crate::error::FormationError;
use crate::topology::Topology;
use nalgebra::{DMatrix, Vector2, Vector4};
use pyo3::exceptions::{PyIndexError, PyValueError};
use pyo3::prelude::*;

impl From<FormationError> for PyErr {
    fn from(err: FormationError) -> PyErr {
        match err {
            FormationError::IndexOutOfRange { .. } => PyIndexError::new_err(err.to_string()),
            _ => PyValueError::new_err(err.to_string()),
        }
    }
}

/// Double-integrator follower.
#[pyclass(name = "Agent")]
#[derive(Clone)]
pub struct PyAgent {
    inner: Agent,
}

#[pymethods]
impl PyAgent {
    #[new]
    fn new(id: usize, state: [f64; 4], offset: [f64; 4]) -> Self {
        PyAgent { inner: Agent::new(id, Vector4::from(state), Vector4::from(offset)) }
    }

    #[getter]
    fn id(&self) -> usize {
        self.inner.id
    }

    #[getter]
    fn state(&self) -> [f64; 4] {
        self.inner.state.into()
    }

    #[getter]
    fn offset(&self) -> [f64; 4] {
        self.inner.offset.into()
    }

    fn update_physics(&mut self, u: [f64; 2], dt: f64) {
        self.inner.update_physics(&Vector2::from(u), dt);
    }

    fn history(&self) -> Vec<[f64; 4]> {
        self.inner.history().iter().map(|&x| x.into()).collect()
    }

    fn __str__(&self) -> String {
        let s = self.inner.state;
        format!("Agent({}, p=({:.3}, {:.3}), v=({:.3}, {:.3}))", self.inner.id, s[0], s[1], s[2], s[3])
    }
}

fn to_dense(what: &'static str, rows: &[Vec<f64>], shape: (usize, usize)) -> Result<DMatrix<f64>, FormationError> {
    let actual = (rows.len(), rows.first().map_or(0, Vec::len));
    if actual != shape || rows.iter().any(|r| r.len() != shape.1) {
        return Err(FormationError::shape(what, shape, actual));
    }
    let flat: Vec<f64> = rows.iter().flatten().copied().collect();
    Ok(DMatrix::from_row_slice(shape.0, shape.1, &flat))
}

fn to_rows(m: &DMatrix<f64>) -> Vec<Vec<f64>> {
    m.row_iter().map(|row| row.iter().copied().collect()).collect()
}

fn build_topology(
    n: usize,
    adjacency: Option<Vec<Vec<f64>>>,
    leader_access: Option<Vec<f64>>,
) -> Result<Topology, FormationError> {
    let adjacency = adjacency
        .map(|rows| to_dense("adjacency matrix", &rows, (n, n)))
        .transpose()?;
    Topology::new(n, adjacency, leader_access.as_deref())
}

fn build_agents(states: &[[f64; 4]], offsets: &[[f64; 4]]) -> Result<Vec<Agent>, FormationError> {
    if states.len() != offsets.len() {
        return Err(FormationError::shape("offsets", (states.len(), 4), (offsets.len(), 4)));
    }
    Ok(states
        .iter()
        .zip(offsets)
        .enumerate()
        .map(|(slot, (&x, &f))| Agent::new(slot + 1, Vector4::from(x), Vector4::from(f)))
        .collect())
}

fn gains(k: Vec<Vec<f64>>, k_prime: Option<Vec<Vec<f64>>>) -> Result<(DMatrix<f64>, Option<DMatrix<f64>>), FormationError> {
    let k = to_dense("K", &k, (2, 4))?;
    let k_prime = k_prime.map(|rows| to_dense("K'", &rows, (2, 4))).transpose()?;
    Ok((k, k_prime))
}

/// Returns `(L, D_lead, H)` for `n` followers.
#[pyfunction]
#[pyo3(signature = (n, adjacency=None, leader_access=None))]
fn topology_matrices(
    n: usize,
    adjacency: Option<Vec<Vec<f64>>>,
    leader_access: Option<Vec<f64>>,
) -> PyResult<(Vec<Vec<f64>>, Vec<Vec<f64>>, Vec<Vec<f64>>)> {
    let topology = build_topology(n, adjacency, leader_access)?;
    Ok((
        to_rows(topology.laplacian()),
        to_rows(topology.leader_access()),
        to_rows(topology.augmented_laplacian()),
    ))
}

#[pyfunction]
#[pyo3(signature = (states, offsets, k, adjacency=None, leader_access=None, k_prime=None, leader_state=None))]
fn centralized_control(
    states: Vec<[f64; 4]>,
    offsets: Vec<[f64; 4]>,
    k: Vec<Vec<f64>>,
    adjacency: Option<Vec<Vec<f64>>>,
    leader_access: Option<Vec<f64>>,
    k_prime: Option<Vec<Vec<f64>>>,
    leader_state: Option<[f64; 4]>,
) -> PyResult<Vec<[f64; 2]>> {
    let agents = build_agents(&states, &offsets)?;
    let topology = build_topology(agents.len(), adjacency, leader_access)?;
    let (k, k_prime) = gains(k, k_prime)?;
    let controller = CentralizedFormation::try_new(&k, k_prime.as_ref())?;
    let leader = leader_state.map(Vector4::from);
    let commands = controller.compute_all(&agents, &topology, leader.as_ref())?;
    Ok(commands.into_iter().map(Into::into).collect())
}

#[pyfunction]
#[pyo3(signature = (agent_id, states, offsets, k, adjacency=None, leader_access=None, k_prime=None, leader_state=None))]
#[allow(clippy::too_many_arguments)]
fn distributed_control(
    agent_id: usize,
    states: Vec<[f64; 4]>,
    offsets: Vec<[f64; 4]>,
    k: Vec<Vec<f64>>,
    adjacency: Option<Vec<Vec<f64>>>,
    leader_access: Option<Vec<f64>>,
    k_prime: Option<Vec<Vec<f64>>>,
    leader_state: Option<[f64; 4]>,
) -> PyResult<[f64; 2]> {
    let agents = build_agents(&states, &offsets)?;
    let topology = build_topology(agents.len(), adjacency, leader_access)?;
    let (k, k_prime) = gains(k, k_prime)?;
    let controller = DistributedFormation::try_new(&k, k_prime.as_ref())?;
    let leader = leader_state.map(Vector4::from);
    let u = controller.compute_nominal(agent_id, &agents, &topology, leader.as_ref())?;
    Ok(u.into())
}

/// Filters `u_nom` for `agent_id`. Returns `(command, fell_back)`.
///
/// With a `sensing_radius` the distributed filter is used, otherwise every
/// follower is considered.
#[pyfunction]
#[pyo3(signature = (agent_id, u_nom, states, safety_distance=0.5, gamma=1.0, sensing_radius=None))]
fn safe_control(
    agent_id: usize,
    u_nom: [f64; 2],
    states: Vec<[f64; 4]>,
    safety_distance: f64,
    gamma: f64,
    sensing_radius: Option<f64>,
) -> PyResult<([f64; 2], bool)> {
    let agents = build_agents(&states, &vec![[0.0; 4]; states.len()])?;
    let settings = CbfSettings::default().safety_distance(safety_distance).gamma(gamma);
    let u_nom = Vector2::from(u_nom);
    let outcome: FilterOutcome = match sensing_radius {
        Some(radius) => DistributedCbf::new(settings.sensing_radius(radius)).filter(&u_nom, agent_id, &agents)?,
        None => CentralizedCbf::new(settings).filter(&u_nom, agent_id, &agents)?,
    };
    Ok((outcome.command.into(), outcome.is_fallback()))
}

/// Separation between two agents, for quick checks from Python.
#[pyfunction]
fn separation(a: &PyAgent, b: &PyAgent) -> f64 {
    let (sa, sb) = (a.inner.state(), b.inner.state());
    ((sa[0] - sb[0]).powi(2) + (sa[1] - sb[1]).powi(2)).sqrt()
}

#[pymodule]
fn safety_formation(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyAgent>()?;

    m.add_function(wrap_pyfunction!(topology_matrices, m)?)?;
    m.add_function(wrap_pyfunction!(centralized_control, m)?)?;
    m.add_function(wrap_pyfunction!(distributed_control, m)?)?;
    m.add_function(wrap_pyfunction!(safe_control, m)?)?;
    m.add_function(wrap_pyfunction!(separation, m)?)?;

    Ok(())
}
