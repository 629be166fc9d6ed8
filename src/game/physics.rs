//! Arena geometry: bounds, clamping and straight-line motion

use crate::config::GameConfig;

/// Physics system for positions inside the arena
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// Clamp a tank position to the arena minus the edge margin
    pub fn clamp_to_arena(x: f32, y: f32, config: &GameConfig) -> (f32, f32) {
        let margin = config.edge_margin;
        (
            x.clamp(margin, config.arena_width - margin),
            y.clamp(margin, config.arena_height - margin),
        )
    }

    /// Check if a point lies inside `[0, width] x [0, height]`
    pub fn in_arena(x: f32, y: f32, config: &GameConfig) -> bool {
        (0.0..=config.arena_width).contains(&x) && (0.0..=config.arena_height).contains(&y)
    }

    /// Move `speed` units along a heading given in degrees
    pub fn step(x: f32, y: f32, angle_degrees: f32, speed: f32) -> (f32, f32) {
        let radians = angle_degrees.to_radians();
        (x + speed * radians.cos(), y + speed * radians.sin())
    }

    pub fn distance(x1: f32, y1: f32, x2: f32, y2: f32) -> f32 {
        let dx = x2 - x1;
        let dy = y2 - y1;
        (dx * dx + dy * dy).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamping_is_idempotent() {
        let config = GameConfig::default();
        let samples = [
            (-50.0, -50.0),
            (0.0, 0.0),
            (20.0, 580.0),
            (400.0, 300.0),
            (799.9, 12.0),
            (10_000.0, 10_000.0),
        ];

        for (x, y) in samples {
            let once = PhysicsSystem::clamp_to_arena(x, y, &config);
            let twice = PhysicsSystem::clamp_to_arena(once.0, once.1, &config);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn clamp_keeps_margin() {
        let config = GameConfig::default();
        assert_eq!(PhysicsSystem::clamp_to_arena(0.0, 0.0, &config), (20.0, 20.0));
        assert_eq!(
            PhysicsSystem::clamp_to_arena(900.0, 700.0, &config),
            (780.0, 580.0)
        );
    }

    #[test]
    fn arena_edges_are_inside() {
        let config = GameConfig::default();
        assert!(PhysicsSystem::in_arena(0.0, 0.0, &config));
        assert!(PhysicsSystem::in_arena(800.0, 600.0, &config));
        assert!(!PhysicsSystem::in_arena(800.1, 300.0, &config));
        assert!(!PhysicsSystem::in_arena(400.0, -0.1, &config));
    }

    #[test]
    fn step_follows_heading_in_degrees() {
        let (x, y) = PhysicsSystem::step(100.0, 100.0, 90.0, 10.0);
        assert!((x - 100.0).abs() < 1e-4);
        assert!((y - 110.0).abs() < 1e-4);

        let (x, y) = PhysicsSystem::step(100.0, 100.0, 180.0, 10.0);
        assert!((x - 90.0).abs() < 1e-4);
        assert!((y - 100.0).abs() < 1e-4);
    }
}
