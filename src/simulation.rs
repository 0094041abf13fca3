//! # Formation Step Driver
//!
//! Couples a nominal controller, an optional safety filter and a set of
//! double-integrator followers. Every step evaluates all commands against the
//! same pre-step snapshot before any follower moves, then advances the leader
//! at constant velocity.

use crate::agent::Agent;
use crate::cbf::{DistributedCbf, FilterOutcome, SafetyFilter};
use crate::consensus::check_agent_order;
use crate::controller::NominalController;
use crate::error::Result;
use crate::metric::ErrorTracker;
use crate::topology::Topology;
use nalgebra::{Vector2, Vector4};
use tracing::debug;

/// What happened during one call to [`Formation::step`].
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub time: f64,
    pub nominal: Vec<Vector2<f64>>,
    /// Commands actually applied, index `k` belonging to follower `k + 1`.
    pub commands: Vec<Vector2<f64>>,
    pub fallbacks: usize,
}

pub struct Formation<C, F = DistributedCbf> {
    agents: Vec<Agent>,
    topology: Topology,
    controller: C,
    filter: Option<F>,
    leader_state: Vector4<f64>,
    time: f64,
    fallback_count: usize,
}

impl<C: NominalController, F: SafetyFilter> Formation<C, F> {
    /// Unfiltered formation with the leader at rest at the origin.
    pub fn new(agents: Vec<Agent>, topology: Topology, controller: C) -> Result<Self> {
        check_agent_order(&agents, topology.num_agents())?;
        Ok(Formation {
            agents,
            topology,
            controller,
            filter: None,
            leader_state: Vector4::zeros(),
            time: 0.0,
            fallback_count: 0,
        })
    }

    pub fn with_filter(mut self, filter: F) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn set_leader_state(&mut self, leader_state: Vector4<f64>) {
        self.leader_state = leader_state;
    }

    pub fn leader_state(&self) -> &Vector4<f64> {
        &self.leader_state
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    /// Total number of filter fallbacks since construction.
    pub fn fallback_count(&self) -> usize {
        self.fallback_count
    }

    /// Smallest planar distance between any two followers.
    pub fn min_separation(&self) -> f64 {
        let mut min = f64::INFINITY;
        for (k, a) in self.agents.iter().enumerate() {
            for b in &self.agents[k + 1..] {
                min = min.min(a.distance_to(b));
            }
        }
        min
    }

    pub fn step(&mut self, dt: f64) -> Result<StepReport> {
        let nominal = self
            .controller
            .compute_all(&self.agents, &self.topology, Some(&self.leader_state))?;

        let (commands, fallbacks) = match &self.filter {
            Some(filter) => {
                let outcomes: Vec<FilterOutcome> = filter.filter_all(&nominal, &self.agents)?;
                let fallbacks = outcomes.iter().filter(|o| o.is_fallback()).count();
                self.fallback_count += fallbacks;
                (outcomes.into_iter().map(|o| o.command).collect::<Vec<_>>(), fallbacks)
            }
            None => (nominal.clone(), 0),
        };

        for (agent, u) in self.agents.iter_mut().zip(&commands) {
            agent.update_physics(u, dt);
        }
        let leader_velocity = Vector2::new(self.leader_state[2], self.leader_state[3]);
        self.leader_state[0] += leader_velocity.x * dt;
        self.leader_state[1] += leader_velocity.y * dt;
        self.time += dt;

        debug!(
            time = self.time,
            controller = self.controller.name(),
            fallbacks,
            "formation step"
        );
        Ok(StepReport { time: self.time, nominal, commands, fallbacks })
    }

    /// Records the current error, then steps `steps` times recording after each.
    pub fn run(&mut self, steps: usize, dt: f64, tracker: &mut ErrorTracker) -> Result<()> {
        tracker.step(&self.agents, &self.leader_state);
        for _ in 0..steps {
            self.step(dt)?;
            tracker.step(&self.agents, &self.leader_state);
        }
        Ok(())
    }
}
