//! Smoothing for entities the server reports on behalf of other clients.
//!
//! Snapshot timestamps are local arrival times on the client's motion clock
//! (seconds). The sender's own timestamp is only used to reject reordered
//! updates.

use std::collections::{HashMap, VecDeque};

use glam::Vec3;

use super::config::ClientConfig;

const MOVING_EPSILON: f32 = 0.01;

#[derive(Debug, Clone)]
pub struct InterpolationConfig {
    pub interpolation_rate: f32,
    pub extrapolation_limit: f64,
    pub max_snapshots: usize,
    pub snapshot_max_age: f64,
}

impl Default for InterpolationConfig {
    fn default() -> Self {
        Self {
            interpolation_rate: 10.0,
            extrapolation_limit: 0.5,
            max_snapshots: 10,
            snapshot_max_age: 2.0,
        }
    }
}

impl From<&ClientConfig> for InterpolationConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            interpolation_rate: config.interpolation_rate,
            extrapolation_limit: config.extrapolation_limit_secs as f64,
            max_snapshots: config.max_snapshots.max(1),
            snapshot_max_age: config.snapshot_max_age_secs as f64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovementSnapshot {
    pub position: Vec3,
    pub velocity: Vec3,
    pub timestamp: f64,
}

#[derive(Debug, Clone)]
pub struct RemoteEntity {
    snapshots: VecDeque<MovementSnapshot>,
    position: Vec3,
    velocity: Vec3,
    last_sender_timestamp: f64,
}

impl RemoteEntity {
    fn new(first: MovementSnapshot, sender_timestamp: f64) -> Self {
        let mut snapshots = VecDeque::new();
        snapshots.push_back(first);
        Self {
            snapshots,
            position: first.position,
            velocity: Vec3::ZERO,
            last_sender_timestamp: sender_timestamp,
        }
    }

    /// Where the entity should be at `now`: the latest position, pushed
    /// forward along its velocity while the data is fresh enough to trust.
    pub fn target_position(&self, now: f64, extrapolation_limit: f64) -> Vec3 {
        let Some(latest) = self.snapshots.back() else {
            return self.position;
        };
        if self.snapshots.len() < 2 {
            return latest.position;
        }

        let network_delay = now - latest.timestamp;
        if network_delay > 0.0 && network_delay < extrapolation_limit {
            latest.position + latest.velocity * network_delay as f32
        } else {
            latest.position
        }
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    /// Displacement per second over the last update.
    pub fn velocity(&self) -> Vec3 {
        self.velocity
    }

    pub fn is_moving(&self) -> bool {
        self.velocity.length() > MOVING_EPSILON
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }

    pub fn snapshots(&self) -> impl Iterator<Item = &MovementSnapshot> {
        self.snapshots.iter()
    }

    fn purge(&mut self, now: f64, max_age: f64) {
        while self
            .snapshots
            .front()
            .is_some_and(|s| now - s.timestamp > max_age)
        {
            self.snapshots.pop_front();
        }
    }
}

#[derive(Debug, Default)]
pub struct InterpolationEngine {
    config: InterpolationConfig,
    entities: HashMap<String, RemoteEntity>,
    reordered_dropped: u64,
}

impl InterpolationEngine {
    pub fn new(config: InterpolationConfig) -> Self {
        Self {
            config,
            entities: HashMap::new(),
            reordered_dropped: 0,
        }
    }

    /// Buffers a position report. Returns false when it was older than one
    /// already accepted for the same entity.
    pub fn push_snapshot(
        &mut self,
        id: &str,
        position: Vec3,
        velocity: Vec3,
        sender_timestamp: f64,
        now: f64,
    ) -> bool {
        let snapshot = MovementSnapshot {
            position,
            velocity,
            timestamp: now,
        };

        let Some(entity) = self.entities.get_mut(id) else {
            log::debug!("Tracking remote entity {}", id);
            self.entities
                .insert(id.to_string(), RemoteEntity::new(snapshot, sender_timestamp));
            return true;
        };

        if sender_timestamp < entity.last_sender_timestamp {
            self.reordered_dropped += 1;
            return false;
        }
        entity.last_sender_timestamp = sender_timestamp;

        entity.snapshots.push_back(snapshot);
        while entity.snapshots.len() > self.config.max_snapshots {
            entity.snapshots.pop_front();
        }
        true
    }

    /// Advances every entity one frame. Entities that have not been heard
    /// from within the snapshot age limit are dropped.
    pub fn update(&mut self, now: f64, dt: f32) {
        let alpha = 1.0 - (-self.config.interpolation_rate * dt).exp();
        let max_age = self.config.snapshot_max_age;

        self.entities.retain(|id, entity| {
            entity.purge(now, max_age);
            if entity.snapshots.is_empty() {
                log::debug!("Remote entity {} went silent, dropping it", id);
                return false;
            }
            true
        });

        for entity in self.entities.values_mut() {
            let target = entity.target_position(now, self.config.extrapolation_limit);
            let previous = entity.position;
            entity.position = previous.lerp(target, alpha);
            entity.velocity = if dt > 0.0 {
                (entity.position - previous) / dt
            } else {
                Vec3::ZERO
            };
        }
    }

    pub fn get(&self, id: &str) -> Option<&RemoteEntity> {
        self.entities.get(id)
    }

    pub fn entities(&self) -> impl Iterator<Item = (&str, &RemoteEntity)> {
        self.entities.iter().map(|(id, e)| (id.as_str(), e))
    }

    pub fn remove(&mut self, id: &str) -> Option<RemoteEntity> {
        self.entities.remove(id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn reordered_dropped(&self) -> u64 {
        self.reordered_dropped
    }

    pub fn reset(&mut self) {
        self.entities.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_snapshot_places_entity() {
        let mut engine = InterpolationEngine::default();
        engine.push_snapshot("a", Vec3::new(3.0, 0.0, 1.0), Vec3::ZERO, 0.0, 0.0);

        let entity = engine.get("a").unwrap();
        assert_eq!(entity.position(), Vec3::new(3.0, 0.0, 1.0));
        assert!(!entity.is_moving());
    }

    #[test]
    fn test_buffer_keeps_newest_ten() {
        let mut engine = InterpolationEngine::default();
        for i in 0..11 {
            let t = i as f64 * 0.05;
            engine.push_snapshot("a", Vec3::new(i as f32, 0.0, 0.0), Vec3::ZERO, t, t);
        }

        let entity = engine.get("a").unwrap();
        assert_eq!(entity.snapshot_count(), 10);
        assert_eq!(entity.snapshots().next().unwrap().position.x, 1.0);
    }

    #[test]
    fn test_stale_snapshots_purged_when_not_full() {
        let mut engine = InterpolationEngine::default();
        engine.push_snapshot("a", Vec3::ZERO, Vec3::ZERO, 0.0, 0.0);
        engine.push_snapshot("a", Vec3::X, Vec3::ZERO, 1.0, 1.0);

        engine.update(2.5, 1.0 / 60.0);

        let entity = engine.get("a").unwrap();
        assert_eq!(entity.snapshot_count(), 1);
        assert_eq!(entity.snapshots().next().unwrap().timestamp, 1.0);
    }

    #[test]
    fn test_extrapolates_from_latest_velocity() {
        let mut engine = InterpolationEngine::default();
        engine.push_snapshot("a", Vec3::ZERO, Vec3::X, 0.0, 0.0);
        engine.push_snapshot("a", Vec3::new(0.1, 0.0, 0.0), Vec3::X, 0.1, 0.1);

        let target = engine.get("a").unwrap().target_position(0.15, 0.5);
        assert!((target - Vec3::new(0.15, 0.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn test_no_extrapolation_past_limit() {
        let mut engine = InterpolationEngine::default();
        engine.push_snapshot("a", Vec3::ZERO, Vec3::X, 0.0, 0.0);
        engine.push_snapshot("a", Vec3::new(0.1, 0.0, 0.0), Vec3::X, 0.1, 0.1);

        let target = engine.get("a").unwrap().target_position(0.7, 0.5);
        assert_eq!(target, Vec3::new(0.1, 0.0, 0.0));
    }

    #[test]
    fn test_single_snapshot_is_not_extrapolated() {
        let mut engine = InterpolationEngine::default();
        engine.push_snapshot("a", Vec3::ZERO, Vec3::X, 0.0, 0.0);

        let target = engine.get("a").unwrap().target_position(0.2, 0.5);
        assert_eq!(target, Vec3::ZERO);
    }

    #[test]
    fn test_update_converges_toward_target() {
        let mut engine = InterpolationEngine::default();
        engine.push_snapshot("a", Vec3::ZERO, Vec3::ZERO, 0.0, 0.0);
        engine.push_snapshot("a", Vec3::new(1.0, 0.0, 0.0), Vec3::ZERO, 0.1, 0.1);

        let dt = 1.0 / 60.0;
        engine.update(0.1, dt);
        let first = engine.get("a").unwrap().position().x;
        let alpha = 1.0 - (-10.0f32 * dt).exp();
        assert!((first - alpha).abs() < 1e-5);
        assert!(engine.get("a").unwrap().is_moving());

        let mut t = 0.1;
        for _ in 0..90 {
            t += dt as f64;
            engine.update(t, dt);
        }
        let entity = engine.get("a").unwrap();
        assert!((entity.position().x - 1.0).abs() < 1e-3);
        assert!(!entity.is_moving());
    }

    #[test]
    fn test_reordered_updates_dropped() {
        let mut engine = InterpolationEngine::default();
        assert!(engine.push_snapshot("a", Vec3::X, Vec3::ZERO, 5.0, 0.0));
        assert!(!engine.push_snapshot("a", Vec3::ZERO, Vec3::ZERO, 4.0, 0.1));

        assert_eq!(engine.get("a").unwrap().snapshot_count(), 1);
        assert_eq!(engine.reordered_dropped(), 1);
    }

    #[test]
    fn test_silent_entities_are_evicted() {
        let mut engine = InterpolationEngine::default();
        for i in 0..50 {
            engine.push_snapshot(&format!("visitor-{}", i), Vec3::X, Vec3::ZERO, 0.0, 0.0);
        }
        engine.push_snapshot("regular", Vec3::Y, Vec3::ZERO, 0.0, 0.0);
        engine.push_snapshot("regular", Vec3::Y, Vec3::ZERO, 1.5, 1.5);

        engine.update(1.0, 1.0 / 60.0);
        assert_eq!(engine.len(), 51);

        engine.update(2.5, 1.0 / 60.0);
        assert_eq!(engine.len(), 1);
        assert_eq!(engine.get("regular").unwrap().snapshot_count(), 1);

        engine.update(600.0, 1.0 / 60.0);
        assert!(engine.is_empty());
    }

    #[test]
    fn test_entities_tracked_independently() {
        let mut engine = InterpolationEngine::default();
        engine.push_snapshot("a", Vec3::X, Vec3::ZERO, 0.0, 0.0);
        engine.push_snapshot("b", Vec3::Y, Vec3::ZERO, 0.0, 0.0);
        assert_eq!(engine.len(), 2);

        assert!(engine.remove("a").is_some());
        assert!(engine.get("a").is_none());
        assert_eq!(engine.get("b").unwrap().position(), Vec3::Y);
    }
}
