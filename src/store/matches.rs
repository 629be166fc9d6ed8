//! Match history: session records, results and per-player stats

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::game::{MatchReport, PlayerId, PlayerReport};

use super::supabase::{row_id, SupabaseClient, SupabaseError};

/// Identifier of a stored match record
pub type SessionId = String;

/// Result row of a finished match
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchResult {
    pub winner_id: Option<PlayerId>,
    pub duration_secs: u32,
    pub player1_score: i32,
    pub player2_score: i32,
}

/// Everything recorded about one match
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordedMatch {
    pub session_id: SessionId,
    pub session_code: String,
    pub player1_id: PlayerId,
    pub player2_id: PlayerId,
    pub map_id: u32,
    pub result: Option<MatchResult>,
    pub player_stats: Vec<PlayerReport>,
}

/// Stats collaborator, selected at startup
#[derive(Clone)]
pub enum MatchRecorder {
    Memory(MemoryMatches),
    Supabase(SupabaseMatches),
}

impl MatchRecorder {
    pub fn memory() -> Self {
        Self::Memory(MemoryMatches::default())
    }

    pub fn supabase(client: SupabaseClient) -> Self {
        Self::Supabase(SupabaseMatches { client })
    }

    pub async fn create_match_record(
        &self,
        player1: &PlayerId,
        player2: &PlayerId,
        map_id: u32,
    ) -> Result<SessionId, StoreError> {
        match self {
            Self::Memory(store) => Ok(store.create(player1, player2, map_id)),
            Self::Supabase(store) => store.create(player1, player2, map_id).await,
        }
    }

    pub async fn record_result(
        &self,
        session_id: &SessionId,
        result: &MatchResult,
    ) -> Result<(), StoreError> {
        match self {
            Self::Memory(store) => store.set_result(session_id, result),
            Self::Supabase(store) => store.set_result(session_id, result).await,
        }
    }

    pub async fn record_player_stats(
        &self,
        session_id: &SessionId,
        stats: &PlayerReport,
    ) -> Result<(), StoreError> {
        match self {
            Self::Memory(store) => store.add_stats(session_id, stats),
            Self::Supabase(store) => store.add_stats(session_id, stats).await,
        }
    }

    /// Persist a finished match: record, result, then one stats row per player
    pub async fn record_report(&self, report: &MatchReport) -> Result<SessionId, StoreError> {
        let [first, second] = report.players.as_slice() else {
            return Err(StoreError::NotEnoughPlayers(report.players.len()));
        };

        let session_id = self
            .create_match_record(&first.player_id, &second.player_id, report.map_id)
            .await?;

        let result = MatchResult {
            winner_id: report.winner_id.clone(),
            duration_secs: report.duration_secs,
            player1_score: first.score,
            player2_score: second.score,
        };
        self.record_result(&session_id, &result).await?;

        for stats in &report.players {
            if let Err(e) = self.record_player_stats(&session_id, stats).await {
                warn!(session_id = %session_id, player_id = %stats.player_id, error = %e, "Failed to record player stats");
            }
        }

        info!(
            session_id = %session_id,
            map_id = report.map_id,
            duration_secs = report.duration_secs,
            "Match recorded"
        );
        Ok(session_id)
    }
}

/// Process-local match log
#[derive(Clone, Default)]
pub struct MemoryMatches {
    records: Arc<Mutex<Vec<RecordedMatch>>>,
}

impl MemoryMatches {
    /// Copy of every recorded match, oldest first
    pub fn records(&self) -> Vec<RecordedMatch> {
        self.records.lock().clone()
    }

    fn create(&self, player1: &PlayerId, player2: &PlayerId, map_id: u32) -> SessionId {
        let mut records = self.records.lock();
        let session_id = (records.len() + 1).to_string();
        records.push(RecordedMatch {
            session_id: session_id.clone(),
            session_code: session_code(),
            player1_id: player1.clone(),
            player2_id: player2.clone(),
            map_id,
            result: None,
            player_stats: Vec::new(),
        });
        session_id
    }

    fn with_record<F>(&self, session_id: &SessionId, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut RecordedMatch),
    {
        let mut records = self.records.lock();
        let record = records
            .iter_mut()
            .find(|r| &r.session_id == session_id)
            .ok_or_else(|| StoreError::UnknownSession(session_id.clone()))?;
        f(record);
        Ok(())
    }

    fn set_result(&self, session_id: &SessionId, result: &MatchResult) -> Result<(), StoreError> {
        self.with_record(session_id, |r| r.result = Some(result.clone()))
    }

    fn add_stats(&self, session_id: &SessionId, stats: &PlayerReport) -> Result<(), StoreError> {
        self.with_record(session_id, |r| r.player_stats.push(stats.clone()))
    }
}

/// Match history in the Supabase `game_sessions` / `player_stats` tables
#[derive(Clone)]
pub struct SupabaseMatches {
    client: SupabaseClient,
}

#[derive(Debug, Serialize)]
struct NewSessionRow<'a> {
    session_code: String,
    player1_id: &'a str,
    player2_id: &'a str,
    map_id: u32,
}

#[derive(Debug, Deserialize)]
struct SessionRow {
    id: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct SessionResultRow<'a> {
    winner_id: Option<&'a str>,
    duration_seconds: u32,
    player1_score: i32,
    player2_score: i32,
}

#[derive(Debug, Serialize)]
struct PlayerStatsRow<'a> {
    player_id: &'a str,
    game_session_id: &'a str,
    final_hp: i32,
    damage_dealt: u32,
    shots_fired: u32,
    shots_hit: u32,
    reloads_count: u32,
    survival_time: u32,
}

impl SupabaseMatches {
    async fn create(
        &self,
        player1: &PlayerId,
        player2: &PlayerId,
        map_id: u32,
    ) -> Result<SessionId, StoreError> {
        let row = NewSessionRow {
            session_code: session_code(),
            player1_id: player1.as_str(),
            player2_id: player2.as_str(),
            map_id,
        };
        let created: SessionRow = self.client.insert("game_sessions", &row).await?;
        Ok(row_id(&created.id))
    }

    async fn set_result(&self, session_id: &SessionId, result: &MatchResult) -> Result<(), StoreError> {
        let row = SessionResultRow {
            winner_id: result.winner_id.as_ref().map(PlayerId::as_str),
            duration_seconds: result.duration_secs,
            player1_score: result.player1_score,
            player2_score: result.player2_score,
        };
        self.client
            .update("game_sessions", &format!("id=eq.{session_id}"), &row)
            .await?;
        Ok(())
    }

    async fn add_stats(&self, session_id: &SessionId, stats: &PlayerReport) -> Result<(), StoreError> {
        let row = PlayerStatsRow {
            player_id: stats.player_id.as_str(),
            game_session_id: session_id,
            final_hp: stats.final_hp,
            damage_dealt: stats.damage_dealt,
            shots_fired: stats.shots_fired,
            shots_hit: stats.shots_hit,
            reloads_count: stats.reloads,
            survival_time: stats.survival_secs,
        };
        let _: serde_json::Value = self.client.insert("player_stats", &row).await?;
        Ok(())
    }
}

/// Short human-readable match code
fn session_code() -> String {
    Uuid::new_v4().simple().to_string()[..10].to_uppercase()
}

/// Match history errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Match report needs two players, got {0}")]
    NotEnoughPlayers(usize),

    #[error("Unknown match session {0}")]
    UnknownSession(SessionId),

    #[error(transparent)]
    Supabase(#[from] SupabaseError),
}
