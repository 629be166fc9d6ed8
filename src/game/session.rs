//! Session store: connected players, live projectiles and lobby votes

use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;

use tokio::sync::mpsc;
use tracing::debug;

use crate::config::GameConfig;
use crate::net::protocol::ControlMsg;

use super::combat::{CombatStats, Projectile};
use super::PlayerId;

/// Outbound side of a player's control connection.
///
/// Sends never wait: a full or closed queue drops the message.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    tx: mpsc::Sender<ControlMsg>,
}

impl ControlHandle {
    pub fn new(tx: mpsc::Sender<ControlMsg>) -> Self {
        Self { tx }
    }

    /// Queue a control message, returns false if it was dropped
    pub fn notify(&self, msg: ControlMsg) -> bool {
        self.tx.try_send(msg).is_ok()
    }
}

/// Transport endpoints bound to a player
#[derive(Debug, Clone)]
pub struct PlayerLink {
    pub control: ControlHandle,
    /// Where state datagrams go; rebound to the latest observed source address
    pub endpoint: SocketAddr,
}

/// Player state in a session (authoritative)
#[derive(Debug, Clone)]
pub struct Player {
    pub id: PlayerId,
    pub display_name: String,
    /// Join slot, decides the spawn side
    pub slot: usize,

    pub x: f32,
    pub y: f32,
    /// Facing in degrees, never normalized
    pub angle: f32,

    pub health: i32,
    pub ammo: i32,
    pub ready: bool,

    pub link: PlayerLink,
    pub stats: CombatStats,
}

impl Player {
    pub fn new(
        id: PlayerId,
        display_name: String,
        slot: usize,
        link: PlayerLink,
        config: &GameConfig,
    ) -> Self {
        let (x, y) = config.spawn_point(slot);
        Self {
            id,
            display_name,
            slot,
            x,
            y,
            angle: 0.0,
            health: config.starting_health,
            ammo: config.max_ammo,
            ready: false,
            link,
            stats: CombatStats::default(),
        }
    }

    /// Back to spawn with full health and magazine
    pub fn reset(&mut self, config: &GameConfig) {
        let (x, y) = config.spawn_point(self.slot);
        self.x = x;
        self.y = y;
        self.angle = 0.0;
        self.health = config.starting_health;
        self.ammo = config.max_ammo;
        self.ready = false;
        self.stats = CombatStats::default();
    }
}

/// In-memory store owned by the match engine
#[derive(Debug, Default)]
pub struct SessionStore {
    players: BTreeMap<PlayerId, Player>,
    pub(crate) projectiles: Vec<Projectile>,
    ready_votes: BTreeSet<PlayerId>,
    restart_votes: BTreeSet<PlayerId>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn contains(&self, id: &PlayerId) -> bool {
        self.players.contains_key(id)
    }

    pub fn get(&self, id: &PlayerId) -> Option<&Player> {
        self.players.get(id)
    }

    pub fn get_mut(&mut self, id: &PlayerId) -> Option<&mut Player> {
        self.players.get_mut(id)
    }

    /// Players in ascending id order
    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn players_mut(&mut self) -> impl Iterator<Item = &mut Player> {
        self.players.values_mut()
    }

    pub fn ids(&self) -> BTreeSet<PlayerId> {
        self.players.keys().cloned().collect()
    }

    /// Lowest join slot not taken by a connected player
    pub fn free_slot(&self) -> usize {
        (0..)
            .find(|slot| self.players.values().all(|p| p.slot != *slot))
            .unwrap_or(0)
    }

    pub fn insert(&mut self, player: Player) -> Result<(), SessionError> {
        if self.players.contains_key(&player.id) {
            return Err(SessionError::AlreadyConnected(player.id));
        }
        self.players.insert(player.id.clone(), player);
        Ok(())
    }

    /// Remove a player together with their votes and in-flight projectiles
    pub fn remove(&mut self, id: &PlayerId) -> Option<Player> {
        let player = self.players.remove(id)?;
        self.ready_votes.remove(id);
        self.restart_votes.remove(id);
        self.projectiles.retain(|p| &p.owner_id != id);
        Some(player)
    }

    pub fn projectiles(&self) -> &[Projectile] {
        &self.projectiles
    }

    pub fn spawn_projectile(&mut self, projectile: Projectile) {
        self.projectiles.push(projectile);
    }

    pub fn clear_projectiles(&mut self) {
        self.projectiles.clear();
    }

    pub fn vote_ready(&mut self, id: &PlayerId) {
        if let Some(player) = self.players.get_mut(id) {
            player.ready = true;
            self.ready_votes.insert(id.clone());
        }
    }

    pub fn vote_restart(&mut self, id: &PlayerId) {
        if self.players.contains_key(id) {
            self.restart_votes.insert(id.clone());
        }
    }

    /// Every connected player has voted ready
    pub fn all_ready(&self) -> bool {
        self.players.keys().eq(self.ready_votes.iter())
    }

    /// Every connected player has voted restart (and someone is connected)
    pub fn restart_quorum(&self) -> bool {
        !self.players.is_empty() && self.players.keys().eq(self.restart_votes.iter())
    }

    pub fn has_restart_votes(&self) -> bool {
        !self.restart_votes.is_empty()
    }

    pub fn clear_ready_votes(&mut self) {
        self.ready_votes.clear();
        for player in self.players.values_mut() {
            player.ready = false;
        }
    }

    pub fn clear_restart_votes(&mut self) {
        self.restart_votes.clear();
    }

    /// State-channel endpoints of every connected player
    pub fn endpoints(&self) -> Vec<SocketAddr> {
        self.players.values().map(|p| p.link.endpoint).collect()
    }

    /// Queue a control message for one player
    pub fn notify(&self, id: &PlayerId, msg: ControlMsg) -> bool {
        match self.players.get(id) {
            Some(player) => player.link.control.notify(msg),
            None => false,
        }
    }

    /// Queue a control message for every player, returns how many accepted it
    pub fn broadcast(&self, msg: ControlMsg) -> usize {
        let mut delivered = 0;
        for player in self.players.values() {
            if player.link.control.notify(msg) {
                delivered += 1;
            } else {
                debug!(player_id = %player.id, message = msg.as_str(), "Control queue full or closed");
            }
        }
        delivered
    }
}

/// Session bookkeeping errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Server is full")]
    ServerFull,

    #[error("Player {0} is already connected")]
    AlreadyConnected(PlayerId),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(id: &str, slot: usize) -> (Player, mpsc::Receiver<ControlMsg>) {
        let (tx, rx) = mpsc::channel(4);
        let link = PlayerLink {
            control: ControlHandle::new(tx),
            endpoint: "127.0.0.1:9000".parse().unwrap(),
        };
        let config = GameConfig::default();
        (
            Player::new(PlayerId::from(id), id.to_string(), slot, link, &config),
            rx,
        )
    }

    #[test]
    fn removal_purges_votes_and_projectiles() {
        let config = GameConfig::default();
        let mut store = SessionStore::new();
        let (a, _rx_a) = player("a", 0);
        let (b, _rx_b) = player("b", 1);
        store.insert(a).unwrap();
        store.insert(b).unwrap();

        let a_id = PlayerId::from("a");
        store.vote_ready(&a_id);
        store.vote_restart(&a_id);
        store.spawn_projectile(Projectile::new(a_id.clone(), 1.0, 1.0, 0.0, &config));

        store.remove(&a_id);
        assert!(store.projectiles().is_empty());
        assert!(!store.has_restart_votes());
        assert!(!store.all_ready());
    }

    #[test]
    fn duplicate_ids_are_refused() {
        let mut store = SessionStore::new();
        let (a, _rx) = player("a", 0);
        let (a_again, _rx_again) = player("a", 1);
        store.insert(a).unwrap();
        assert!(matches!(
            store.insert(a_again),
            Err(SessionError::AlreadyConnected(_))
        ));
    }

    #[test]
    fn free_slot_reuses_vacated_slot() {
        let mut store = SessionStore::new();
        let (a, _rx_a) = player("a", 0);
        let (b, _rx_b) = player("b", 1);
        store.insert(a).unwrap();
        store.insert(b).unwrap();
        assert_eq!(store.free_slot(), 2);

        store.remove(&PlayerId::from("a"));
        assert_eq!(store.free_slot(), 0);
    }

    #[test]
    fn broadcast_skips_closed_queues() {
        let mut store = SessionStore::new();
        let (a, mut rx_a) = player("a", 0);
        let (b, rx_b) = player("b", 1);
        store.insert(a).unwrap();
        store.insert(b).unwrap();
        drop(rx_b);

        assert_eq!(store.broadcast(ControlMsg::GameStart), 1);
        assert_eq!(rx_a.try_recv().unwrap(), ControlMsg::GameStart);
    }
}
