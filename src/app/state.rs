//! Application state shared across tasks and routes

use std::sync::Arc;

use rand::Rng;
use tracing::info;

use crate::config::{Config, GameConfig};
use crate::game::{MatchEngine, SharedEngine};
use crate::store::{self, AccountStore, MatchRecorder};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub game: Arc<GameConfig>,
    pub engine: SharedEngine,
    pub accounts: AccountStore,
    pub recorder: MatchRecorder,
}

impl AppState {
    /// Build state with the backends selected by the configuration
    pub fn new(config: Config) -> Self {
        let (accounts, recorder) = store::from_config(&config);
        Self::with_stores(config, accounts, recorder)
    }

    /// Build state around explicit collaborators
    pub fn with_stores(config: Config, accounts: AccountStore, recorder: MatchRecorder) -> Self {
        let game = Arc::new(config.game.clone());
        let seed = config
            .rng_seed
            .unwrap_or_else(|| rand::thread_rng().gen());

        let engine = MatchEngine::new(Arc::clone(&game), config.map_count, seed).shared();

        info!(
            accounts = accounts.backend_name(),
            map_count = config.map_count,
            seed,
            "Match engine initialized"
        );

        Self {
            config: Arc::new(config),
            game,
            engine,
            accounts,
            recorder,
        }
    }
}
