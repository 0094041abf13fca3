//! Tracking-error bookkeeping over a simulation run.

use crate::agent::FollowerState;
use crate::consensus::tracking_error;
use nalgebra::{Vector2, Vector4};

/// Tracking error of the whole formation at one instant.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ErrorSample {
    /// `|x_i − f_i − x_L|` for every follower, stacked in id order (length `4N`).
    pub abs_errors: Vec<f64>,
    pub mean_abs: f64,
    pub max_abs: f64,
    /// `mean_i ‖p_i − f_i^p − p_L‖`.
    pub mean_position: f64,
}

impl ErrorSample {
    pub fn measure<A: FollowerState>(agents: &[A], leader_state: &Vector4<f64>) -> Self {
        let mut abs_errors = Vec::with_capacity(4 * agents.len());
        let mut position_sum = 0.0;
        for agent in agents {
            let e = tracking_error(agent, leader_state);
            abs_errors.extend(e.iter().map(|v| v.abs()));
            position_sum += Vector2::new(e[0], e[1]).norm();
        }

        if agents.is_empty() {
            return ErrorSample { abs_errors, mean_abs: 0.0, max_abs: 0.0, mean_position: 0.0 };
        }

        let mean_abs = abs_errors.iter().sum::<f64>() / abs_errors.len() as f64;
        let max_abs = abs_errors.iter().copied().fold(0.0, f64::max);
        ErrorSample {
            abs_errors,
            mean_abs,
            max_abs,
            mean_position: position_sum / agents.len() as f64,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ErrorTracker {
    samples: Vec<ErrorSample>,
}

impl ErrorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the error of `agents` against `leader_state`.
    pub fn step<A: FollowerState>(&mut self, agents: &[A], leader_state: &Vector4<f64>) -> &ErrorSample {
        self.samples.push(ErrorSample::measure(agents, leader_state));
        &self.samples[self.samples.len() - 1]
    }

    pub fn samples(&self) -> &[ErrorSample] {
        &self.samples
    }

    pub fn mean_history(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.mean_abs).collect()
    }

    pub fn max_history(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.max_abs).collect()
    }

    pub fn position_history(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.mean_position).collect()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use approx::assert_relative_eq;

    #[test]
    fn test_sample_values() {
        let agents = vec![
            Agent::new(1, Vector4::new(1.0, 0.0, 0.0, 0.0), Vector4::zeros()),
            Agent::new(2, Vector4::new(3.0, 4.0, -2.0, 0.0), Vector4::new(0.0, 0.0, 0.0, 0.0)),
        ];
        let sample = ErrorSample::measure(&agents, &Vector4::zeros());

        assert_eq!(sample.abs_errors, vec![1.0, 0.0, 0.0, 0.0, 3.0, 4.0, 2.0, 0.0]);
        assert_relative_eq!(sample.mean_abs, 10.0 / 8.0);
        assert_relative_eq!(sample.max_abs, 4.0);
        assert_relative_eq!(sample.mean_position, (1.0 + 5.0) / 2.0);
    }

    #[test]
    fn test_leader_and_offset_are_subtracted() {
        let leader = Vector4::new(1.0, 1.0, 0.5, 0.0);
        let offset = Vector4::new(-2.0, 0.0, 0.0, 0.0);
        let agents = vec![Agent::new(1, leader + offset, offset)];
        let sample = ErrorSample::measure(&agents, &leader);
        assert_eq!(sample.max_abs, 0.0);
        assert_eq!(sample.mean_position, 0.0);
    }

    #[test]
    fn test_histories() {
        let mut tracker = ErrorTracker::new();
        assert!(tracker.is_empty());

        let mut agents = vec![Agent::new(1, Vector4::new(2.0, 0.0, 0.0, -1.0), Vector4::zeros())];
        tracker.step(&agents, &Vector4::zeros());
        agents[0].state = Vector4::new(1.0, 0.0, 0.0, 0.0);
        let latest = tracker.step(&agents, &Vector4::zeros());
        assert_relative_eq!(latest.mean_position, 1.0);

        assert_eq!(tracker.len(), 2);
        assert_eq!(tracker.mean_history(), vec![0.75, 0.25]);
        assert_eq!(tracker.max_history(), vec![2.0, 1.0]);
        assert_eq!(tracker.position_history(), vec![2.0, 1.0]);
        assert_eq!(tracker.samples()[0].abs_errors.len(), 4);
    }

    #[test]
    fn test_empty_formation() {
        let agents: Vec<Agent> = Vec::new();
        let sample = ErrorSample::measure(&agents, &Vector4::zeros());
        assert!(sample.abs_errors.is_empty());
        assert_eq!(sample.mean_abs, 0.0);
    }
}
