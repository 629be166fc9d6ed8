//! Match state machine and authoritative simulation step

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::GameConfig;
use crate::net::protocol::{ControlMsg, StateSnapshot};
use crate::util::time::{unix_millis, whole_secs_between};

use super::combat::{CombatSystem, HitResult, Projectile};
use super::physics::PhysicsSystem;
use super::session::{Player, PlayerLink, SessionError, SessionStore};
use super::snapshot::SnapshotBuilder;
use super::{PlayerId, PlayerInput};

/// The engine behind the single lock every task goes through
pub type SharedEngine = Arc<Mutex<MatchEngine>>;

/// Match phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPhase {
    /// Waiting for players to connect and ready up
    Lobby,
    /// Simulation running
    Playing,
    /// Someone won or the match was abandoned; waiting for restart votes
    Over,
}

/// Result of a READY vote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyOutcome {
    /// Vote recorded, still waiting for others
    Waiting,
    /// This vote completed the quorum and the match is now playing
    Started,
    /// Not in the lobby or unknown player
    Ignored,
}

/// Result of a RESTART vote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartOutcome {
    /// Vote recorded, still waiting for others
    Accepted,
    /// Quorum reached, the session is back in the lobby
    Restarted,
    /// Unknown player
    Ignored,
}

/// What happened to the match when a player left
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Departure {
    /// The departure ended a running match
    pub ended_match: bool,
    /// The remaining voters now formed a restart quorum
    pub restarted: bool,
}

/// Per-player line of a match report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayerReport {
    pub player_id: PlayerId,
    pub final_hp: i32,
    pub damage_dealt: u32,
    pub shots_fired: u32,
    pub shots_hit: u32,
    pub reloads: u32,
    pub survival_secs: u32,
    pub score: i32,
}

/// End-of-match summary handed to the stats collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchReport {
    pub map_id: u32,
    pub winner_id: Option<PlayerId>,
    pub duration_secs: u32,
    /// Participants in join order
    pub players: Vec<PlayerReport>,
}

/// Lobby overview for the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub phase: MatchPhase,
    pub map_id: u32,
    pub winner_id: Option<PlayerId>,
    pub tick: u64,
    pub players: Vec<PlayerStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlayerStatus {
    pub id: PlayerId,
    pub name: String,
    pub ready: bool,
    pub hp: i32,
}

/// The authoritative match: lobby votes, input application and the tick
pub struct MatchEngine {
    config: Arc<GameConfig>,
    session: SessionStore,
    phase: MatchPhase,
    tick: u64,
    map_count: u32,
    map_id: u32,
    winner_id: Option<PlayerId>,
    started_at: Option<u64>,
    rng: ChaCha8Rng,
    pending_report: Option<MatchReport>,
    /// Accounts between a successful login and registration
    login_claims: BTreeSet<PlayerId>,
}

impl MatchEngine {
    /// Create an engine in the lobby with a freshly drawn map
    pub fn new(config: Arc<GameConfig>, map_count: u32, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let map_count = map_count.max(1);
        let map_id = rng.gen_range(0..map_count);

        Self {
            config,
            session: SessionStore::new(),
            phase: MatchPhase::Lobby,
            tick: 0,
            map_count,
            map_id,
            winner_id: None,
            started_at: None,
            rng,
            pending_report: None,
            login_claims: BTreeSet::new(),
        }
    }

    /// Wrap the engine in the shared lock
    pub fn shared(self) -> SharedEngine {
        Arc::new(Mutex::new(self))
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn phase(&self) -> MatchPhase {
        self.phase
    }

    pub fn is_started(&self) -> bool {
        self.phase == MatchPhase::Playing
    }

    pub fn is_game_over(&self) -> bool {
        self.phase == MatchPhase::Over
    }

    pub fn winner_id(&self) -> Option<&PlayerId> {
        self.winner_id.as_ref()
    }

    pub fn map_id(&self) -> u32 {
        self.map_id
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn player_count(&self) -> usize {
        self.session.len()
    }

    pub fn is_full(&self) -> bool {
        self.session.len() >= self.config.max_players
    }

    pub fn contains(&self, id: &PlayerId) -> bool {
        self.session.contains(id)
    }

    pub fn player(&self, id: &PlayerId) -> Option<&Player> {
        self.session.get(id)
    }

    pub fn projectiles(&self) -> &[Projectile] {
        self.session.projectiles()
    }

    pub fn endpoints(&self) -> Vec<SocketAddr> {
        self.session.endpoints()
    }

    /// Queue a control message for every connected player
    pub fn broadcast_control(&self, msg: ControlMsg) -> usize {
        self.session.broadcast(msg)
    }

    /// Queue a control message for one player
    pub fn notify(&self, id: &PlayerId, msg: ControlMsg) -> bool {
        self.session.notify(id, msg)
    }

    /// Hand over the report of the last finished match, once
    pub fn take_report(&mut self) -> Option<MatchReport> {
        self.pending_report.take()
    }

    /// Reserve an account for a login in progress. Fails if the account is
    /// connected or another login already holds it.
    pub fn claim_login(&mut self, id: &PlayerId) -> bool {
        !self.session.contains(id) && self.login_claims.insert(id.clone())
    }

    pub fn release_login(&mut self, id: &PlayerId) {
        self.login_claims.remove(id);
    }

    /// Register an authenticated player in the next free join slot
    pub fn add_player(
        &mut self,
        id: PlayerId,
        display_name: String,
        link: PlayerLink,
    ) -> Result<&Player, SessionError> {
        if self.session.contains(&id) {
            return Err(SessionError::AlreadyConnected(id));
        }
        if self.is_full() {
            return Err(SessionError::ServerFull);
        }

        let slot = self.session.free_slot();
        let player = Player::new(id.clone(), display_name, slot, link, &self.config);
        self.session.insert(player)?;

        info!(
            player_id = %id,
            slot,
            player_count = self.session.len(),
            "Player joined session"
        );

        self.session
            .get(&id)
            .ok_or(SessionError::AlreadyConnected(id))
    }

    /// Remove a player. A running match ends with the remaining player (if
    /// exactly one) as winner.
    pub fn remove_player(&mut self, id: &PlayerId) -> Option<Departure> {
        if !self.session.contains(id) {
            return None;
        }

        let mut departure = Departure::default();

        if self.phase == MatchPhase::Playing {
            let now = unix_millis();
            if let Some(leaver) = self.session.get_mut(id) {
                leaver.stats.eliminated_at.get_or_insert(now);
            }

            let remaining: Vec<PlayerId> = self
                .session
                .players()
                .filter(|p| &p.id != id)
                .map(|p| p.id.clone())
                .collect();
            let winner = match remaining.as_slice() {
                [survivor] => Some(survivor.clone()),
                _ => None,
            };

            self.end_match(winner, now);
            departure.ended_match = true;
        }

        self.session.remove(id);
        info!(
            player_id = %id,
            player_count = self.session.len(),
            "Player left session"
        );

        if self.phase == MatchPhase::Over
            && self.session.has_restart_votes()
            && self.session.restart_quorum()
        {
            self.restart();
            departure.restarted = true;
        }

        Some(departure)
    }

    /// Record a READY vote; starts the match once every connected player
    /// (at least two) is ready.
    pub fn mark_ready(&mut self, id: &PlayerId) -> ReadyOutcome {
        if self.phase != MatchPhase::Lobby || !self.session.contains(id) {
            debug!(player_id = %id, phase = ?self.phase, "Ignoring ready vote");
            return ReadyOutcome::Ignored;
        }

        self.session.vote_ready(id);
        info!(player_id = %id, "Player is ready");

        if self.session.len() >= 2 && self.session.all_ready() {
            self.start();
            ReadyOutcome::Started
        } else {
            ReadyOutcome::Waiting
        }
    }

    /// Record a RESTART vote; restarts once every connected player voted
    pub fn vote_restart(&mut self, id: &PlayerId) -> RestartOutcome {
        if !self.session.contains(id) {
            return RestartOutcome::Ignored;
        }

        self.session.vote_restart(id);
        info!(player_id = %id, "Player requested restart");

        if self.session.restart_quorum() {
            self.restart();
            RestartOutcome::Restarted
        } else {
            RestartOutcome::Accepted
        }
    }

    /// Point a player's state channel at the latest observed source address
    pub fn rebind_endpoint(&mut self, id: &PlayerId, addr: SocketAddr) -> bool {
        match self.session.get_mut(id) {
            Some(player) if player.link.endpoint != addr => {
                debug!(player_id = %id, old = %player.link.endpoint, new = %addr, "Rebinding state endpoint");
                player.link.endpoint = addr;
                true
            }
            _ => false,
        }
    }

    /// Apply one input; returns whether it changed anything.
    ///
    /// Inputs only count while playing; fire/reload outside a match are no-ops.
    pub fn apply_input(&mut self, id: &PlayerId, input: PlayerInput) -> bool {
        if self.phase != MatchPhase::Playing {
            return false;
        }

        let config = Arc::clone(&self.config);
        let Some(player) = self.session.get_mut(id) else {
            return false;
        };

        match input {
            PlayerInput::PositionUpdate { x, y, angle } => {
                // Movement speed is not validated against the previous position
                let (x, y) = PhysicsSystem::clamp_to_arena(x, y, &config);
                player.x = x;
                player.y = y;
                player.angle = angle;
                true
            }
            PlayerInput::FireRequest => {
                if !CombatSystem::can_fire(player.ammo) {
                    return false;
                }
                player.ammo -= 1;
                player.stats.shots_fired += 1;
                let projectile =
                    Projectile::new(id.clone(), player.x, player.y, player.angle, &config);
                self.session.spawn_projectile(projectile);
                true
            }
            PlayerInput::ReloadRequest => {
                player.ammo = config.max_ammo;
                player.stats.reloads += 1;
                true
            }
            PlayerInput::AmmoCorrection(ammo) => {
                // Client hint, kept inside the magazine bounds
                player.ammo = ammo.clamp(0, config.max_ammo);
                true
            }
        }
    }

    /// One fixed-rate step. Simulates only while playing, always returns a
    /// fresh snapshot.
    pub fn tick(&mut self) -> StateSnapshot {
        self.tick += 1;

        if self.phase == MatchPhase::Playing {
            self.advance_projectiles();
            self.resolve_collisions();
        }

        self.snapshot()
    }

    /// Current state as sent over the state channel
    pub fn snapshot(&self) -> StateSnapshot {
        SnapshotBuilder::build(
            self.session.players(),
            self.session.projectiles(),
            self.phase == MatchPhase::Over,
            self.winner_id.as_ref(),
            self.map_id,
        )
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            phase: self.phase,
            map_id: self.map_id,
            winner_id: self.winner_id.clone(),
            tick: self.tick,
            players: self
                .session
                .players()
                .map(|p| PlayerStatus {
                    id: p.id.clone(),
                    name: p.display_name.clone(),
                    ready: p.ready,
                    hp: p.health,
                })
                .collect(),
        }
    }

    /// Move every projectile and drop the ones that left the arena
    fn advance_projectiles(&mut self) {
        let config = &self.config;
        self.session.projectiles.retain_mut(|p| p.update(config));
    }

    /// Hit detection. Players are tested in ascending id order so the first
    /// lethal hit of a tick is reproducible.
    fn resolve_collisions(&mut self) {
        let config = Arc::clone(&self.config);
        let mut idx = 0;

        while idx < self.session.projectiles.len() {
            let projectile = &self.session.projectiles[idx];

            // Owner gone: nothing to credit, discard
            if !self.session.contains(&projectile.owner_id) {
                self.session.projectiles.remove(idx);
                continue;
            }

            let target_id = self
                .session
                .players()
                .filter(|p| p.id != projectile.owner_id)
                .find(|p| projectile.check_hit(p.x, p.y, config.hit_radius))
                .map(|p| p.id.clone());

            let Some(target_id) = target_id else {
                idx += 1;
                continue;
            };

            let projectile = self.session.projectiles.remove(idx);
            let Some(hit) = self.apply_hit(projectile.owner_id, target_id, config.bullet_damage)
            else {
                continue;
            };

            debug!(
                shooter_id = %hit.shooter_id,
                target_id = %hit.target_id,
                damage = hit.damage,
                target_health = hit.target_health,
                "Projectile hit"
            );

            if hit.target_killed {
                self.end_match(Some(hit.shooter_id), unix_millis());
                break;
            }
        }
    }

    fn apply_hit(&mut self, shooter_id: PlayerId, target_id: PlayerId, damage: i32) -> Option<HitResult> {
        let target = self.session.get_mut(&target_id)?;
        let (new_health, killed) = CombatSystem::apply_damage(target.health, damage);
        target.health = new_health;
        if killed {
            target.stats.eliminated_at = Some(unix_millis());
        }

        if let Some(shooter) = self.session.get_mut(&shooter_id) {
            shooter.stats.damage_dealt += damage as u32;
            shooter.stats.shots_hit += 1;
        }

        Some(HitResult {
            shooter_id,
            target_id,
            damage,
            target_health: new_health,
            target_killed: killed,
        })
    }

    /// Lobby -> Playing
    fn start(&mut self) {
        self.phase = MatchPhase::Playing;
        self.session.clear_restart_votes();
        self.session.clear_projectiles();
        self.winner_id = None;
        self.started_at = Some(unix_millis());
        for player in self.session.players_mut() {
            player.stats = Default::default();
        }

        info!(
            map_id = self.map_id,
            player_count = self.session.len(),
            "Match started"
        );
    }

    /// Playing -> Over
    fn end_match(&mut self, winner_id: Option<PlayerId>, now: u64) {
        if self.phase != MatchPhase::Playing {
            return;
        }

        self.phase = MatchPhase::Over;
        self.winner_id = winner_id;
        self.pending_report = Some(self.build_report(now));

        match &self.winner_id {
            Some(winner) => info!(winner_id = %winner, "Match over"),
            None => info!("Match over without a winner"),
        }
    }

    /// Any phase -> Lobby, keeping connected players in their slots
    fn restart(&mut self) {
        let config = Arc::clone(&self.config);

        self.phase = MatchPhase::Lobby;
        self.session.clear_projectiles();
        self.session.clear_ready_votes();
        self.session.clear_restart_votes();
        self.winner_id = None;
        self.started_at = None;
        for player in self.session.players_mut() {
            player.reset(&config);
        }

        let previous = self.map_id;
        self.map_id = self.next_map(previous);

        info!(map_id = self.map_id, previous_map_id = previous, "Session restarted");
    }

    /// Draw a map id, never repeating `previous` when there is a choice
    fn next_map(&mut self, previous: u32) -> u32 {
        if self.map_count <= 1 {
            return 0;
        }
        let drawn = self.rng.gen_range(0..self.map_count - 1);
        if drawn >= previous {
            drawn + 1
        } else {
            drawn
        }
    }

    fn build_report(&self, now: u64) -> MatchReport {
        let started_at = self.started_at.unwrap_or(now);

        let mut participants: Vec<&Player> = self.session.players().collect();
        participants.sort_by_key(|p| p.slot);

        let players = participants
            .into_iter()
            .map(|p| PlayerReport {
                player_id: p.id.clone(),
                final_hp: p.health,
                damage_dealt: p.stats.damage_dealt,
                shots_fired: p.stats.shots_fired,
                shots_hit: p.stats.shots_hit,
                reloads: p.stats.reloads,
                survival_secs: whole_secs_between(
                    started_at,
                    p.stats.eliminated_at.unwrap_or(now),
                ),
                score: CombatSystem::score(&p.stats, p.health),
            })
            .collect();

        MatchReport {
            map_id: self.map_id,
            winner_id: self.winner_id.clone(),
            duration_secs: whole_secs_between(started_at, now),
            players,
        }
    }
}
