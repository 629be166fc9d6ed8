//! Snapshot building and size-bounded encoding

use std::collections::BTreeMap;

use tracing::warn;

use crate::net::protocol::{PlayerView, ProjectileView, ProtocolError, StateSnapshot};

use super::combat::Projectile;
use super::{Player, PlayerId};

/// Builds snapshots for network transmission
pub struct SnapshotBuilder;

impl SnapshotBuilder {
    /// Build a snapshot message
    pub fn build<'a>(
        players: impl Iterator<Item = &'a Player>,
        projectiles: &[Projectile],
        game_over: bool,
        winner_id: Option<&PlayerId>,
        map_id: u32,
    ) -> StateSnapshot {
        let players: BTreeMap<String, PlayerView> = players
            .map(|p| {
                (
                    p.id.to_string(),
                    PlayerView {
                        x: p.x,
                        y: p.y,
                        angle: p.angle,
                        hp: p.health,
                        ammo: p.ammo,
                        name: p.display_name.clone(),
                        ready: p.ready,
                    },
                )
            })
            .collect();

        let projectiles = projectiles
            .iter()
            .map(|p| ProjectileView {
                x: p.x,
                y: p.y,
                angle: p.angle,
            })
            .collect();

        StateSnapshot {
            players,
            projectiles,
            game_over,
            winner_id: winner_id.map(|id| id.to_string()),
            map_id,
        }
    }

    /// Encode a snapshot into at most `limit` bytes.
    ///
    /// Oldest projectiles are dropped first until the datagram fits. Fails
    /// only when the players alone exceed the limit.
    pub fn encode_bounded(
        snapshot: &StateSnapshot,
        limit: usize,
    ) -> Result<Vec<u8>, ProtocolError> {
        let encoded = serde_json::to_vec(snapshot)?;
        if encoded.len() <= limit {
            return Ok(encoded);
        }

        let mut trimmed = snapshot.clone();
        let total = trimmed.projectiles.len();
        while !trimmed.projectiles.is_empty() {
            let drop_count = (trimmed.projectiles.len() / 4).max(1);
            trimmed.projectiles.drain(..drop_count);

            let encoded = serde_json::to_vec(&trimmed)?;
            if encoded.len() <= limit {
                warn!(
                    dropped = total - trimmed.projectiles.len(),
                    bytes = encoded.len(),
                    limit,
                    "Snapshot trimmed to fit datagram limit"
                );
                return Ok(encoded);
            }
        }

        Err(ProtocolError::Oversized {
            bytes: serde_json::to_vec(&trimmed)?.len(),
            limit,
        })
    }
}

/// Snapshot traffic stats for debugging
#[derive(Debug, Default)]
pub struct SnapshotStats {
    pub total_snapshots: u64,
    pub total_bytes: u64,
    pub failed_sends: u64,
    pub avg_bytes_per_snapshot: f32,
}

impl SnapshotStats {
    pub fn record(&mut self, bytes: usize, failed_sends: usize) {
        self.total_snapshots += 1;
        self.total_bytes += bytes as u64;
        self.failed_sends += failed_sends as u64;

        // Running average
        let n = self.total_snapshots as f32;
        self.avg_bytes_per_snapshot =
            self.avg_bytes_per_snapshot * ((n - 1.0) / n) + (bytes as f32 / n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;

    fn snapshot_with_projectiles(count: usize) -> StateSnapshot {
        let config = GameConfig::default();
        let projectiles: Vec<Projectile> = (0..count)
            .map(|i| Projectile::new(PlayerId::from("1"), i as f32, 300.0, 45.0, &config))
            .collect();
        SnapshotBuilder::build(std::iter::empty(), &projectiles, false, None, 2)
    }

    #[test]
    fn small_snapshot_is_untouched() {
        let snapshot = snapshot_with_projectiles(3);
        let bytes = SnapshotBuilder::encode_bounded(&snapshot, 1400).unwrap();
        let decoded: StateSnapshot = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded.projectiles.len(), 3);
        assert_eq!(decoded.map_id, 2);
    }

    #[test]
    fn oversized_snapshot_drops_oldest_projectiles() {
        let snapshot = snapshot_with_projectiles(200);
        let bytes = SnapshotBuilder::encode_bounded(&snapshot, 1400).unwrap();
        assert!(bytes.len() <= 1400);

        let decoded: StateSnapshot = serde_json::from_slice(&bytes).unwrap();
        assert!(!decoded.projectiles.is_empty());
        assert!(decoded.projectiles.len() < 200);
        // Newest projectile survives
        assert_eq!(decoded.projectiles.last().unwrap().x, 199.0);
    }

    #[test]
    fn impossible_limit_is_an_error() {
        let snapshot = snapshot_with_projectiles(5);
        let result = SnapshotBuilder::encode_bounded(&snapshot, 8);
        assert!(matches!(result, Err(ProtocolError::Oversized { .. })));
    }
}
