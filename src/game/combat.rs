//! Combat system - projectiles, damage, hit detection

use crate::config::GameConfig;

use super::physics::PhysicsSystem;
use super::PlayerId;

/// Active projectile in the game
#[derive(Debug, Clone, PartialEq)]
pub struct Projectile {
    pub owner_id: PlayerId,
    pub x: f32,
    pub y: f32,
    /// Heading in degrees
    pub angle: f32,
    pub speed: f32,
}

impl Projectile {
    /// Create a new projectile at the muzzle (the tank centre)
    pub fn new(owner_id: PlayerId, x: f32, y: f32, angle: f32, config: &GameConfig) -> Self {
        Self {
            owner_id,
            x,
            y,
            angle,
            speed: config.bullet_speed,
        }
    }

    /// Advance one tick, returns false once the projectile has left the arena
    pub fn update(&mut self, config: &GameConfig) -> bool {
        let (x, y) = PhysicsSystem::step(self.x, self.y, self.angle, self.speed);
        self.x = x;
        self.y = y;
        PhysicsSystem::in_arena(x, y, config)
    }

    /// Check collision with a tank centred at `(target_x, target_y)`
    pub fn check_hit(&self, target_x: f32, target_y: f32, hit_radius: f32) -> bool {
        PhysicsSystem::distance(self.x, self.y, target_x, target_y) < hit_radius
    }
}

/// Combat rules
pub struct CombatSystem;

impl CombatSystem {
    pub fn can_fire(ammo: i32) -> bool {
        ammo > 0
    }

    /// Apply damage to health, returns (new_health, is_dead)
    pub fn apply_damage(current_health: i32, damage: i32) -> (i32, bool) {
        let new_health = (current_health - damage).max(0);
        (new_health, new_health <= 0)
    }

    /// End-of-match score
    pub fn score(stats: &CombatStats, final_hp: i32) -> i32 {
        (stats.damage_dealt * 2) as i32 + (stats.shots_hit * 10) as i32 + final_hp
    }
}

/// Per-player counters for the match report
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CombatStats {
    pub damage_dealt: u32,
    pub shots_fired: u32,
    pub shots_hit: u32,
    pub reloads: u32,
    /// Unix millis at which the player was destroyed or left
    pub eliminated_at: Option<u64>,
}

/// Hit result from collision resolution
#[derive(Debug, Clone)]
pub struct HitResult {
    pub shooter_id: PlayerId,
    pub target_id: PlayerId,
    pub damage: i32,
    pub target_health: i32,
    pub target_killed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projectile_leaves_arena() {
        let config = GameConfig::default();
        let mut projectile = Projectile::new(PlayerId::from("1"), 795.0, 300.0, 0.0, &config);
        assert!(!projectile.update(&config));
        assert!(projectile.x > config.arena_width);
    }

    #[test]
    fn hit_radius_is_exclusive() {
        let config = GameConfig::default();
        let projectile = Projectile::new(PlayerId::from("1"), 100.0, 100.0, 0.0, &config);
        assert!(projectile.check_hit(124.9, 100.0, config.hit_radius));
        assert!(!projectile.check_hit(125.0, 100.0, config.hit_radius));
    }

    #[test]
    fn damage_floors_at_zero() {
        assert_eq!(CombatSystem::apply_damage(100, 25), (75, false));
        assert_eq!(CombatSystem::apply_damage(25, 25), (0, true));
        assert_eq!(CombatSystem::apply_damage(10, 25), (0, true));
    }

    #[test]
    fn score_weights_damage_hits_and_health() {
        let stats = CombatStats {
            damage_dealt: 100,
            shots_hit: 4,
            ..Default::default()
        };
        assert_eq!(CombatSystem::score(&stats, 50), 200 + 40 + 50);
    }
}
