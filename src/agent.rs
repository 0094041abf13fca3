//! # Follower Agents
//!
//! The control laws only ever *read* follower state. [`FollowerState`] is the
//! accessor they consume; [`Agent`] is a concrete double-integrator follower
//! that owns its state and integrates one step at a time.
//!
//! State vector: `x = [x, y, vx, vy]`, control input: `u = [ax, ay]`.

use nalgebra::{Matrix4, Matrix4x2, Vector2, Vector4};

/// Read-only view of a follower as seen by the controllers.
///
/// Ids are 1-based. Slices handed to controllers must be ordered so that
/// `agents[k].id() == k + 1`.
pub trait FollowerState {
    fn id(&self) -> usize;
    fn state(&self) -> Vector4<f64>;
    fn offset(&self) -> Vector4<f64>;
}

/// Double-integrator follower: `ẋ = A x + B u`.
#[derive(Debug, Clone, PartialEq)]
pub struct Agent {
    pub id: usize,
    pub state: Vector4<f64>,
    /// Desired offset relative to the leader, fixed for the agent's lifetime.
    pub offset: Vector4<f64>,
    history: Vec<Vector4<f64>>,
}

impl Agent {
    pub fn new(id: usize, x0: Vector4<f64>, offset: Vector4<f64>) -> Self {
        Agent {
            id,
            state: x0,
            offset,
            history: Vec::new(),
        }
    }

    /// Agent whose offset is a planar position `[fx, fy, 0, 0]`.
    pub fn at(id: usize, position: Vector2<f64>, formation_position: Vector2<f64>) -> Self {
        Agent::new(
            id,
            Vector4::new(position.x, position.y, 0.0, 0.0),
            Vector4::new(formation_position.x, formation_position.y, 0.0, 0.0),
        )
    }

    pub fn position(&self) -> Vector2<f64> {
        self.state.fixed_rows::<2>(0).into_owned()
    }

    pub fn velocity(&self) -> Vector2<f64> {
        self.state.fixed_rows::<2>(2).into_owned()
    }

    /// Advances the state by `dt` holding `u` constant over the step.
    ///
    /// Uses the exact zero-order-hold discretisation of the double integrator,
    /// so position responds to the command within the same step.
    pub fn update_physics(&mut self, u: &Vector2<f64>, dt: f64) {
        let position = self.position() + self.velocity() * dt + u * (0.5 * dt * dt);
        let velocity = self.velocity() + u * dt;
        self.state = Vector4::new(position.x, position.y, velocity.x, velocity.y);
        self.history.push(self.state);
    }

    /// States recorded after each call to [`Agent::update_physics`].
    pub fn history(&self) -> &[Vector4<f64>] {
        &self.history
    }

    pub fn distance_to(&self, other: &Agent) -> f64 {
        (self.position() - other.position()).norm()
    }
}

impl FollowerState for Agent {
    fn id(&self) -> usize {
        self.id
    }

    fn state(&self) -> Vector4<f64> {
        self.state
    }

    fn offset(&self) -> Vector4<f64> {
        self.offset
    }
}

/// Continuous-time `(A, B)` of the planar double integrator.
pub fn system_matrices() -> (Matrix4<f64>, Matrix4x2<f64>) {
    let a = Matrix4::new(
        0.0, 0.0, 1.0, 0.0,
        0.0, 0.0, 0.0, 1.0,
        0.0, 0.0, 0.0, 0.0,
        0.0, 0.0, 0.0, 0.0,
    );
    let b = Matrix4x2::new(
        0.0, 0.0,
        0.0, 0.0,
        1.0, 0.0,
        0.0, 1.0,
    );
    (a, b)
}
