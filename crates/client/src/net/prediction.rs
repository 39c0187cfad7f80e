use std::collections::VecDeque;

use glam::Vec3;

use super::config::ClientConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalMovementRecord {
    pub position: Vec3,
    pub timestamp: f64,
    pub input: Vec3,
}

/// Outcome of comparing predicted history against an authoritative position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reconciliation {
    /// No local record at or before the server timestamp.
    NoHistory,
    Accepted { error: f32 },
    Corrected { error: f32 },
}

#[derive(Debug)]
pub struct ClientPrediction {
    history: VecDeque<LocalMovementRecord>,
    position: Vec3,
    velocity: Vec3,
    move_speed: f32,
    correction_threshold: f32,
    max_history: usize,
}

impl ClientPrediction {
    pub fn new(move_speed: f32, correction_threshold: f32, max_history: usize) -> Self {
        let max_history = max_history.max(1);
        Self {
            history: VecDeque::with_capacity(max_history),
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            move_speed,
            correction_threshold,
            max_history,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(
            config.move_speed,
            config.correction_threshold,
            config.max_local_history,
        )
    }

    /// Moves the predicted position immediately and records the result for
    /// later reconciliation. Inputs longer than one unit are clamped.
    pub fn apply_input(&mut self, input: Vec3, dt: f32, timestamp: f64) -> Vec3 {
        let input = input.clamp_length_max(1.0);
        self.velocity = input * self.move_speed;
        self.position += self.velocity * dt.max(0.0);

        self.history.push_back(LocalMovementRecord {
            position: self.position,
            timestamp,
            input,
        });
        while self.history.len() > self.max_history {
            self.history.pop_front();
        }

        self.position
    }

    pub fn reconcile(&mut self, server_position: Vec3, server_timestamp: f64) -> Reconciliation {
        let mut acknowledged = None;
        while self
            .history
            .front()
            .is_some_and(|record| record.timestamp <= server_timestamp)
        {
            acknowledged = self.history.pop_front();
        }

        let Some(record) = acknowledged else {
            return Reconciliation::NoHistory;
        };

        let error = record.position.distance(server_position);
        if error > self.correction_threshold {
            log::debug!(
                "Prediction off by {:.3}, snapping to {:?}",
                error,
                server_position
            );
            self.position = server_position;
            self.history.clear();
            Reconciliation::Corrected { error }
        } else {
            Reconciliation::Accepted { error }
        }
    }

    /// Places the player without going through prediction, e.g. on spawn.
    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        self.velocity = Vec3::ZERO;
        self.history.clear();
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn velocity(&self) -> Vec3 {
        self.velocity
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn history(&self) -> impl Iterator<Item = &LocalMovementRecord> {
        self.history.iter()
    }

    pub fn reset(&mut self) {
        self.set_position(Vec3::ZERO);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prediction_at_five() -> ClientPrediction {
        let mut prediction = ClientPrediction::new(5.0, 0.5, 60);
        prediction.apply_input(Vec3::X, 1.0, 1.0);
        assert_eq!(prediction.position(), Vec3::new(5.0, 0.0, 0.0));
        prediction
    }

    #[test]
    fn test_apply_input_moves_immediately() {
        let mut prediction = ClientPrediction::new(5.0, 0.5, 60);
        let position = prediction.apply_input(Vec3::new(0.0, 0.0, 1.0), 0.1, 0.1);

        assert!((position - Vec3::new(0.0, 0.0, 0.5)).length() < 1e-6);
        assert_eq!(prediction.velocity(), Vec3::new(0.0, 0.0, 5.0));
        assert_eq!(prediction.history_len(), 1);
    }

    #[test]
    fn test_diagonal_input_is_clamped() {
        let mut prediction = ClientPrediction::new(5.0, 0.5, 60);
        prediction.apply_input(Vec3::new(1.0, 0.0, 1.0), 1.0, 1.0);
        assert!((prediction.velocity().length() - 5.0).abs() < 1e-5);
    }

    #[test]
    fn test_history_is_capped() {
        let mut prediction = ClientPrediction::new(5.0, 0.5, 60);
        for i in 0..75 {
            prediction.apply_input(Vec3::X, 1.0 / 60.0, i as f64 / 60.0);
        }
        assert_eq!(prediction.history_len(), 60);
        let oldest = prediction.history().next().unwrap();
        assert!((oldest.timestamp - 15.0 / 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_large_error_snaps_and_clears_history() {
        let mut prediction = prediction_at_five();
        prediction.apply_input(Vec3::X, 0.1, 1.1);

        let result = prediction.reconcile(Vec3::new(5.6, 0.0, 0.0), 1.0);

        assert!(matches!(result, Reconciliation::Corrected { error } if (error - 0.6).abs() < 1e-4));
        assert_eq!(prediction.position(), Vec3::new(5.6, 0.0, 0.0));
        assert_eq!(prediction.history_len(), 0);
    }

    #[test]
    fn test_small_error_is_accepted() {
        let mut prediction = prediction_at_five();

        let result = prediction.reconcile(Vec3::new(5.3, 0.0, 0.0), 1.0);

        assert!(matches!(result, Reconciliation::Accepted { error } if (error - 0.3).abs() < 1e-4));
        assert_eq!(prediction.position(), Vec3::new(5.0, 0.0, 0.0));
        assert_eq!(prediction.history_len(), 0);
    }

    #[test]
    fn test_newer_records_survive_accepted_reconcile() {
        let mut prediction = prediction_at_five();
        prediction.apply_input(Vec3::X, 0.1, 1.1);
        prediction.apply_input(Vec3::X, 0.1, 1.2);

        prediction.reconcile(Vec3::new(5.0, 0.0, 0.0), 1.0);
        assert_eq!(prediction.history_len(), 2);
        assert!((prediction.position().x - 6.0).abs() < 1e-5);
    }

    #[test]
    fn test_reconcile_without_history() {
        let mut prediction = ClientPrediction::new(5.0, 0.5, 60);
        assert_eq!(
            prediction.reconcile(Vec3::new(100.0, 0.0, 0.0), 10.0),
            Reconciliation::NoHistory
        );

        // Records newer than the authoritative timestamp are not consumed.
        prediction.apply_input(Vec3::X, 1.0, 2.0);
        assert_eq!(
            prediction.reconcile(Vec3::ZERO, 1.0),
            Reconciliation::NoHistory
        );
        assert_eq!(prediction.history_len(), 1);
    }
}
