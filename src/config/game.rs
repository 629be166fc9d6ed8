//! Protocol constants shared with the clients
//!
//! Both ends must agree on every value here. Bump `protocol_version` whenever
//! one of them changes so mismatched clients are refused at login.

use std::time::Duration;

use serde::Serialize;

/// Version of the constants below and of the wire formats in `net::protocol`
pub const PROTOCOL_VERSION: u32 = 1;

/// Versioned gameplay/protocol configuration
#[derive(Debug, Clone, Serialize)]
pub struct GameConfig {
    pub protocol_version: u32,

    /// Arena width in arena units
    pub arena_width: f32,
    /// Arena height in arena units
    pub arena_height: f32,
    /// Distance kept between a tank and the arena edge
    pub edge_margin: f32,
    /// Horizontal distance of the spawn points from the side walls
    pub spawn_inset: f32,

    pub max_players: usize,

    /// Minimum time between shots (enforced client side)
    pub fire_cooldown_secs: f32,
    /// Reload animation length (enforced client side)
    pub reload_duration_secs: f32,
    pub max_ammo: i32,
    pub starting_health: i32,

    /// Projectile travel per tick
    pub bullet_speed: f32,
    pub bullet_damage: i32,
    /// A projectile closer than this to a tank centre is a hit
    pub hit_radius: f32,

    /// Simulation and broadcast rate in Hz
    pub tick_rate: u32,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            arena_width: 800.0,
            arena_height: 600.0,
            edge_margin: 20.0,
            spawn_inset: 100.0,
            max_players: 2,
            fire_cooldown_secs: 0.5,
            reload_duration_secs: 7.0,
            max_ammo: 10,
            starting_health: 100,
            bullet_speed: 10.0,
            bullet_damage: 25,
            hit_radius: 25.0,
            tick_rate: 60,
        }
    }
}

impl GameConfig {
    /// Duration of one simulation tick
    pub fn tick_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.tick_rate.max(1)))
    }

    /// Spawn position for a join slot: slot 0 on the left wall, every other
    /// slot on the right wall, both vertically centred.
    pub fn spawn_point(&self, slot: usize) -> (f32, f32) {
        let y = self.arena_height / 2.0;
        if slot == 0 {
            (self.spawn_inset, y)
        } else {
            (self.arena_width - self.spawn_inset, y)
        }
    }
}
