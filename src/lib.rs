//! # Safety Formation
//!
//! Leader-follower formation control for planar double-integrator agents, with
//! a control-barrier-function safety filter keeping followers apart.
//!
//! ## Layers
//!
//! - **Topology**: adjacency, Laplacian and augmented Laplacian `H = L + D_lead`.
//! - **Nominal control**: the same consensus law in two architectures,
//!   centralized (Kronecker products over the stacked system) and distributed
//!   (per-follower from local information).
//! - **Safety filter**: a small QP per follower that minimally modifies the
//!   nominal command to satisfy pairwise barrier constraints, falling back to
//!   the nominal command when the constraints cannot be met.
//!
//! ## Usage
//!
//! ```no_run
//! use nalgebra::Vector2;
//! use safety_formation::{
//!     Agent, CbfSettings, DistributedCbf, DistributedFormation, ErrorTracker, Formation,
//!     FormationGains, Topology,
//! };
//!
//! let topology = Topology::cycle(3, &[1.0, 0.0, 0.0])?;
//! let agents = vec![
//!     Agent::at(1, Vector2::new(0.0, 0.0), Vector2::new(1.0, 0.0)),
//!     Agent::at(2, Vector2::new(0.5, 0.5), Vector2::new(-0.5, 0.8)),
//!     Agent::at(3, Vector2::new(-0.5, 0.5), Vector2::new(-0.5, -0.8)),
//! ];
//! let controller = DistributedFormation::new(FormationGains::pd(1.0, 2.0));
//! let mut formation = Formation::new(agents, topology, controller)?
//!     .with_filter(DistributedCbf::new(CbfSettings::default()));
//!
//! let mut tracker = ErrorTracker::new();
//! formation.run(200, 0.05, &mut tracker)?;
//! # Ok::<(), safety_formation::FormationError>(())
//! ```
//!
//! Python bindings are available behind the `python` feature.

pub mod agent;
pub mod cbf;
pub mod centralized;
pub mod consensus;
pub mod controller;
pub mod distributed;
pub mod error;
pub mod metric;
pub mod qp;
pub mod simulation;
pub mod topology;

#[cfg(feature = "python")]
mod python;

pub use agent::{system_matrices, Agent, FollowerState};
pub use cbf::{
    pairwise_constraint, solve_cbf_qp, CbfSettings, CentralizedCbf, DistributedCbf, FilterOutcome,
    FilterStatus, SafetyFilter,
};
pub use centralized::CentralizedFormation;
pub use controller::{Architecture, FormationGains, NominalController};
pub use distributed::DistributedFormation;
pub use error::{FormationError, QpError, Result};
pub use metric::{ErrorSample, ErrorTracker};
pub use qp::{ClosedFormSolver, ConstraintSet, OsqpSolver, QpSolver};
pub use simulation::{Formation, StepReport};
pub use topology::Topology;
