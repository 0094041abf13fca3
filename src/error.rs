//! # Error Types
//!
//! Two families of failure exist in the control stack:
//!
//! - [`FormationError`]: misconfiguration (wrong matrix shapes, unknown agent
//!   ids, agent slices out of id order). These abort the offending call.
//! - [`QpError`]: outcomes of a single safety-filter QP solve. Infeasibility is
//!   recoverable and is absorbed by the filter, which falls back to the nominal
//!   command for that step.

use thiserror::Error;

/// Fatal configuration errors raised by topology, controllers and filters.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FormationError {
    #[error("{what} must have shape {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: (usize, usize),
        actual: (usize, usize),
    },
    #[error("agent id {id} is outside 1..={num_agents}")]
    IndexOutOfRange { id: usize, num_agents: usize },
    #[error("agent at slot {slot} has id {id}, expected {}", slot + 1)]
    AgentOrder { slot: usize, id: usize },
}

impl FormationError {
    pub(crate) fn shape(what: &'static str, expected: (usize, usize), actual: (usize, usize)) -> Self {
        FormationError::ShapeMismatch { what, expected, actual }
    }
}

/// Failures reported by a [`QpSolver`](crate::qp::QpSolver).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QpError {
    #[error("quadratic program is infeasible")]
    Infeasible,
    #[error("constraint matrix has {g_rows} rows and {g_cols} columns but bound vector has {h_len} entries")]
    ShapeMismatch {
        g_rows: usize,
        g_cols: usize,
        h_len: usize,
    },
    #[error("solver failed: {0}")]
    SolverFailure(String),
}

pub type Result<T> = std::result::Result<T, FormationError>;
