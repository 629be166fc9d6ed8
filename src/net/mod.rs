//! Network layer: TCP control channel, UDP state channel and the wire codec

pub mod broadcast;
pub mod datagram;
pub mod handler;
pub mod protocol;

pub use protocol::{ControlMsg, StateSnapshot};
