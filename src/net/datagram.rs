//! State-channel receiver: decodes client input datagrams and applies them

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, trace};

use crate::game::SharedEngine;
use crate::net::protocol::decode_input;
use crate::util::rate_limit::InputRateLimiter;

/// Largest client datagram read; longer ones are truncated and fail to decode
pub const MAX_INPUT_DATAGRAM: usize = 2048;

/// Datagrams between sweeps of idle rate-limiter keys
const LIMITER_SWEEP_EVERY: u64 = 4096;

/// What happened to one inbound datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatagramOutcome {
    Applied,
    Malformed,
    RateLimited,
    UnknownPlayer,
}

/// Receive input datagrams until shutdown
pub async fn run_receiver(
    engine: SharedEngine,
    socket: Arc<UdpSocket>,
    mut shutdown: watch::Receiver<bool>,
) {
    let limiter = InputRateLimiter::default();
    let mut buf = vec![0u8; MAX_INPUT_DATAGRAM];
    let mut received: u64 = 0;

    loop {
        let (len, addr) = tokio::select! {
            result = socket.recv_from(&mut buf) => match result {
                Ok(received) => received,
                Err(e) => {
                    // ICMP port-unreachable from a departed client surfaces here on some platforms
                    debug!(error = %e, "UDP receive error");
                    continue;
                }
            },
            _ = shutdown.changed() => break,
        };

        received += 1;
        if received % LIMITER_SWEEP_EVERY == 0 {
            limiter.retain_recent();
        }

        let outcome = handle_datagram(&engine, &limiter, &buf[..len], addr);
        trace!(source = %addr, bytes = len, outcome = ?outcome, "Input datagram");
    }

    info!("UDP receiver stopped");
}

/// Decode one datagram, rebind the sender's endpoint and apply its inputs
pub fn handle_datagram(
    engine: &SharedEngine,
    limiter: &InputRateLimiter,
    bytes: &[u8],
    source: SocketAddr,
) -> DatagramOutcome {
    let (player_id, inputs) = match decode_input(bytes) {
        Ok(decoded) => decoded,
        Err(e) => {
            debug!(source = %source, error = %e, "Dropping malformed datagram");
            return DatagramOutcome::Malformed;
        }
    };

    let mut engine = engine.lock();
    if !engine.contains(&player_id) {
        return DatagramOutcome::UnknownPlayer;
    }

    if !limiter.check(&player_id, source) {
        return DatagramOutcome::RateLimited;
    }

    engine.rebind_endpoint(&player_id, source);
    for input in inputs {
        engine.apply_input(&player_id, input);
    }
    DatagramOutcome::Applied
}
