//! Player accounts: registration and password authentication

use std::sync::Arc;

use dashmap::{mapref::entry::Entry, DashMap};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::game::PlayerId;

use super::supabase::{row_id, SupabaseClient, SupabaseError};

const MIN_USERNAME_LEN: usize = 3;
const MAX_USERNAME_LEN: usize = 32;
const MAX_DISPLAY_NAME_LEN: usize = 32;

/// An authenticated account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: PlayerId,
    pub username: String,
    pub display_name: String,
}

/// Account service, selected at startup
#[derive(Clone)]
pub enum AccountStore {
    Memory(MemoryAccounts),
    Supabase(SupabaseAccounts),
}

impl AccountStore {
    pub fn memory() -> Self {
        Self::Memory(MemoryAccounts::default())
    }

    pub fn supabase(client: SupabaseClient) -> Self {
        Self::Supabase(SupabaseAccounts { client })
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Supabase(_) => "supabase",
        }
    }

    /// Check credentials and return the account
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<Account, AuthError> {
        match self {
            Self::Memory(store) => store.authenticate(username, password),
            Self::Supabase(store) => store.authenticate(username, password).await,
        }
    }

    /// Create an account; the display name defaults to the username
    pub async fn register(
        &self,
        username: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<(), AuthError> {
        validate_username(username)?;
        if password.is_empty() {
            return Err(AuthError::EmptyPassword);
        }
        let display_name = display_name_or_default(display_name, username);

        match self {
            Self::Memory(store) => store.register(username, password, &display_name),
            Self::Supabase(store) => store.register(username, password, &display_name).await,
        }
    }
}

/// Process-local accounts, lost on restart
#[derive(Clone, Default)]
pub struct MemoryAccounts {
    by_username: Arc<DashMap<String, StoredAccount>>,
}

#[derive(Clone)]
struct StoredAccount {
    id: PlayerId,
    display_name: String,
    password_hash: String,
}

impl MemoryAccounts {
    fn authenticate(&self, username: &str, password: &str) -> Result<Account, AuthError> {
        let stored = self
            .by_username
            .get(username)
            .ok_or(AuthError::UnknownPlayer)?;

        if !verify_password(password, &stored.password_hash) {
            return Err(AuthError::WrongPassword);
        }

        Ok(Account {
            id: stored.id.clone(),
            username: username.to_string(),
            display_name: stored.display_name.clone(),
        })
    }

    fn register(&self, username: &str, password: &str, display_name: &str) -> Result<(), AuthError> {
        match self.by_username.entry(username.to_string()) {
            Entry::Occupied(_) => Err(AuthError::UsernameTaken),
            Entry::Vacant(slot) => {
                slot.insert(StoredAccount {
                    id: PlayerId::new(Uuid::new_v4().to_string()),
                    display_name: display_name.to_string(),
                    password_hash: hash_password(password),
                });
                debug!(username, "Account registered");
                Ok(())
            }
        }
    }
}

/// Accounts in the Supabase `players` table
#[derive(Clone)]
pub struct SupabaseAccounts {
    client: SupabaseClient,
}

#[derive(Debug, Deserialize)]
struct PlayerRow {
    id: serde_json::Value,
    username: String,
    name: Option<String>,
    password_hash: String,
}

#[derive(Debug, Serialize)]
struct NewPlayerRow<'a> {
    username: &'a str,
    name: &'a str,
    password_hash: String,
}

#[derive(Debug, Serialize)]
struct LastLogin {
    last_login: chrono::DateTime<chrono::Utc>,
}

impl SupabaseAccounts {
    async fn find(&self, username: &str) -> Result<Option<PlayerRow>, AuthError> {
        // Usernames are validated to URL-safe characters before they get here
        let query = format!("select=id,username,name,password_hash&username=eq.{username}");
        Ok(self.client.get_one("players", &query).await?)
    }

    async fn authenticate(&self, username: &str, password: &str) -> Result<Account, AuthError> {
        validate_username(username).map_err(|_| AuthError::UnknownPlayer)?;
        let row = self.find(username).await?.ok_or(AuthError::UnknownPlayer)?;

        if !verify_password(password, &row.password_hash) {
            return Err(AuthError::WrongPassword);
        }

        let id = row_id(&row.id);
        let stamp = LastLogin {
            last_login: chrono::Utc::now(),
        };
        if let Err(e) = self
            .client
            .update("players", &format!("id=eq.{id}"), &stamp)
            .await
        {
            warn!(error = %e, username, "Failed to update last_login");
        }

        Ok(Account {
            id: PlayerId::new(id),
            display_name: row.name.unwrap_or_else(|| row.username.clone()),
            username: row.username,
        })
    }

    async fn register(&self, username: &str, password: &str, display_name: &str) -> Result<(), AuthError> {
        if self.find(username).await?.is_some() {
            return Err(AuthError::UsernameTaken);
        }

        let row = NewPlayerRow {
            username,
            name: display_name,
            password_hash: hash_password(password),
        };
        let _: serde_json::Value = self.client.insert("players", &row).await?;
        Ok(())
    }
}

/// `salt$hex(sha256(salt + password))` with a random 16-byte hex salt
pub fn hash_password(password: &str) -> String {
    let salt = hex::encode(rand::thread_rng().gen::<[u8; 16]>());
    format!("{salt}${}", salted_digest(&salt, password))
}

pub fn verify_password(password: &str, stored: &str) -> bool {
    match stored.split_once('$') {
        Some((salt, digest)) => salted_digest(salt, password) == digest,
        None => false,
    }
}

fn salted_digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Usernames are 3-32 characters of `[A-Za-z0-9_.-]`
pub fn validate_username(username: &str) -> Result<(), AuthError> {
    let valid_len = (MIN_USERNAME_LEN..=MAX_USERNAME_LEN).contains(&username.len());
    let valid_chars = username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));

    if valid_len && valid_chars {
        Ok(())
    } else {
        Err(AuthError::InvalidUsername)
    }
}

fn display_name_or_default(display_name: Option<&str>, username: &str) -> String {
    let name = display_name.map(str::trim).filter(|n| !n.is_empty()).unwrap_or(username);
    name.chars().take(MAX_DISPLAY_NAME_LEN).collect()
}

/// Account errors; the display text is sent to the client
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Player not found")]
    UnknownPlayer,

    #[error("Invalid password")]
    WrongPassword,

    #[error("Username already exists")]
    UsernameTaken,

    #[error("Username must be 3-32 characters of letters, digits, '_', '.' or '-'")]
    InvalidUsername,

    #[error("Password must not be empty")]
    EmptyPassword,

    #[error("Account service unavailable")]
    Backend(#[from] SupabaseError),
}
