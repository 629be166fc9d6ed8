//! Account and match-history collaborators (in-memory or Supabase)

pub mod accounts;
pub mod matches;
pub mod supabase;

pub use accounts::{Account, AccountStore, AuthError};
pub use matches::{MatchRecorder, MatchResult, RecordedMatch, SessionId, StoreError};
pub use supabase::{SupabaseClient, SupabaseError};

use crate::config::Config;

/// Pick the collaborator backends from the configuration
pub fn from_config(config: &Config) -> (AccountStore, MatchRecorder) {
    match &config.supabase {
        Some(supabase) => {
            let client = SupabaseClient::new(supabase);
            (
                AccountStore::supabase(client.clone()),
                MatchRecorder::supabase(client),
            )
        }
        None => (AccountStore::memory(), MatchRecorder::memory()),
    }
}
