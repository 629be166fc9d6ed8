//! Application wiring: shared state and the server tasks

pub mod server;
pub mod state;

pub use server::{GameServer, LocalAddrs};
pub use state::AppState;
