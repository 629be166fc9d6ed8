//! Configuration module - environment variable parsing

mod game;

pub use game::GameConfig;

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Output format for the tracing subscriber
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Credentials for the Supabase-backed account and stats tables
#[derive(Clone, Debug)]
pub struct SupabaseConfig {
    /// Supabase project URL
    pub url: String,
    /// Supabase service role key (bypasses RLS - server only!)
    pub service_role_key: String,
}

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Reliable (control) channel binding address
    pub tcp_addr: SocketAddr,
    /// Unreliable (state) channel binding address
    pub udp_addr: SocketAddr,
    /// Status endpoint binding address, `None` when disabled
    pub http_addr: Option<SocketAddr>,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    pub log_format: LogFormat,

    /// Number of arena maps the clients ship with
    pub map_count: u32,
    /// Fixed seed for map rotation, random when absent
    pub rng_seed: Option<u64>,

    /// Deadline for the auth + UDP port exchange
    pub handshake_timeout: Duration,
    /// Idle deadline on the control read loop
    pub control_idle_timeout: Duration,
    /// Deadline for a single control write
    pub write_timeout: Duration,
    /// Upper bound for one state datagram
    pub max_datagram_bytes: usize,

    /// Remote persistence, in-memory collaborators when absent
    pub supabase: Option<SupabaseConfig>,

    /// Protocol constants shared with the clients
    pub game: GameConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tcp_addr: SocketAddr::from(([0, 0, 0, 0], 5555)),
            udp_addr: SocketAddr::from(([0, 0, 0, 0], 5556)),
            http_addr: Some(SocketAddr::from(([0, 0, 0, 0], 8080))),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            map_count: 3,
            rng_seed: None,
            handshake_timeout: Duration::from_secs(30),
            control_idle_timeout: Duration::from_secs(900),
            write_timeout: Duration::from_secs(5),
            max_datagram_bytes: 1400,
            supabase: None,
            game: GameConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let http_addr = match env::var("HTTP_ADDR") {
            Ok(raw) if raw.eq_ignore_ascii_case("off") => None,
            Ok(raw) => Some(
                raw.trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidAddress("HTTP_ADDR"))?,
            ),
            Err(_) => defaults.http_addr,
        };

        let log_format = match env::var("LOG_FORMAT") {
            Ok(raw) if raw.eq_ignore_ascii_case("json") => LogFormat::Json,
            Ok(raw) if raw.eq_ignore_ascii_case("pretty") => LogFormat::Pretty,
            Ok(_) => return Err(ConfigError::Invalid("LOG_FORMAT")),
            Err(_) => defaults.log_format,
        };

        let map_count: u32 = parse_var("MAP_COUNT", defaults.map_count)?;
        if map_count == 0 {
            return Err(ConfigError::Invalid("MAP_COUNT"));
        }

        let rng_seed = match env::var("RNG_SEED") {
            Ok(raw) => Some(
                raw.trim()
                    .parse()
                    .map_err(|_| ConfigError::Invalid("RNG_SEED"))?,
            ),
            Err(_) => None,
        };

        // Both keys or neither
        let supabase = match (env::var("SUPABASE_URL"), env::var("SUPABASE_SERVICE_ROLE_KEY")) {
            (Ok(url), Ok(service_role_key)) => Some(SupabaseConfig {
                url,
                service_role_key,
            }),
            (Ok(_), Err(_)) => return Err(ConfigError::Missing("SUPABASE_SERVICE_ROLE_KEY")),
            (Err(_), Ok(_)) => return Err(ConfigError::Missing("SUPABASE_URL")),
            (Err(_), Err(_)) => None,
        };

        Ok(Self {
            tcp_addr: parse_addr("TCP_ADDR", defaults.tcp_addr)?,
            udp_addr: parse_addr("UDP_ADDR", defaults.udp_addr)?,
            http_addr,
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_format,
            map_count,
            rng_seed,
            handshake_timeout: Duration::from_secs(parse_var(
                "HANDSHAKE_TIMEOUT_SECS",
                defaults.handshake_timeout.as_secs(),
            )?),
            control_idle_timeout: Duration::from_secs(parse_var(
                "CONTROL_IDLE_TIMEOUT_SECS",
                defaults.control_idle_timeout.as_secs(),
            )?),
            write_timeout: Duration::from_secs(parse_var(
                "WRITE_TIMEOUT_SECS",
                defaults.write_timeout.as_secs(),
            )?),
            max_datagram_bytes: parse_var("MAX_DATAGRAM_BYTES", defaults.max_datagram_bytes)?,
            supabase,
            game: GameConfig::default(),
        })
    }
}

/// Read an optional variable, falling back to `default` when unset
fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

fn parse_addr(name: &'static str, default: SocketAddr) -> Result<SocketAddr, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid socket address in {0}")]
    InvalidAddress(&'static str),
}
