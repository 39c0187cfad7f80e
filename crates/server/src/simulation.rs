use glam::Vec3;

/// Axis-aligned box the server keeps every reported position inside.
#[derive(Debug, Clone, Copy)]
pub struct WorldBounds {
    min: Vec3,
    max: Vec3,
}

impl WorldBounds {
    pub fn new(half_extent: f32) -> Self {
        let half_extent = half_extent.abs();
        Self {
            min: Vec3::new(-half_extent, 0.0, -half_extent),
            max: Vec3::new(half_extent, half_extent, half_extent),
        }
    }

    pub fn clamp(&self, position: Vec3) -> Vec3 {
        if !position.is_finite() {
            return Vec3::ZERO;
        }
        position.clamp(self.min, self.max)
    }

    pub fn contains(&self, position: Vec3) -> bool {
        position.cmpge(self.min).all() && position.cmple(self.max).all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_keeps_inside_positions() {
        let bounds = WorldBounds::new(10.0);
        let inside = Vec3::new(3.0, 1.0, -4.0);
        assert!(bounds.contains(inside));
        assert_eq!(bounds.clamp(inside), inside);
    }

    #[test]
    fn test_clamp_pulls_outside_positions_to_edge() {
        let bounds = WorldBounds::new(10.0);
        assert_eq!(
            bounds.clamp(Vec3::new(25.0, -3.0, -11.0)),
            Vec3::new(10.0, 0.0, -10.0)
        );
        assert_eq!(bounds.clamp(Vec3::new(f32::NAN, 0.0, 0.0)), Vec3::ZERO);
    }
}
