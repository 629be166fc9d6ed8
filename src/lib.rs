//! Tank Battle Server - authoritative session server for two-player tank battles
//!
//! Control events travel over TCP, world state over UDP, and a fixed-rate
//! loop owns the simulation. A small HTTP surface exposes health, session
//! status and the protocol constants.

pub mod app;
pub mod config;
pub mod game;
pub mod http;
pub mod net;
pub mod store;
pub mod util;

pub use app::{AppState, GameServer};
pub use config::{Config, GameConfig};
