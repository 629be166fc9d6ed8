//! Game simulation modules

pub mod combat;
pub mod r#match;
pub mod physics;
pub mod session;
pub mod snapshot;

pub use r#match::{
    Departure, MatchEngine, MatchPhase, MatchReport, PlayerReport, PlayerStatus, ReadyOutcome,
    RestartOutcome, SessionStatus, SharedEngine,
};
pub use session::{ControlHandle, Player, PlayerLink, SessionError, SessionStore};

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable player identifier (the authenticated account id)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(String);

impl PlayerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlayerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PlayerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// One decoded player intent, received over either channel.
///
/// Position and ammo values are client-reported hints: the server clamps them
/// to the arena / magazine but does not check them against physics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlayerInput {
    /// Client-side movement result (trusted apart from bounds clamping)
    PositionUpdate { x: f32, y: f32, angle: f32 },
    FireRequest,
    ReloadRequest,
    /// Client's own view of its magazine
    AmmoCorrection(i32),
}
