//! Fixed-rate driver: tick the engine, fan the snapshot out over UDP

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::app::AppState;
use crate::game::snapshot::{SnapshotBuilder, SnapshotStats};
use crate::game::MatchReport;
use crate::store::MatchRecorder;

/// Ticks between traffic summaries (one minute at 60 Hz)
const STATS_LOG_EVERY: u64 = 3600;

/// Run the tick loop until shutdown
pub async fn run_broadcast_loop(
    state: AppState,
    socket: Arc<UdpSocket>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(state.game.tick_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let max_bytes = state.config.max_datagram_bytes;
    let mut stats = SnapshotStats::default();

    info!(tick_rate = state.game.tick_rate, "Broadcast loop started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        let (snapshot, endpoints, report) = {
            let mut engine = state.engine.lock();
            let snapshot = engine.tick();
            (snapshot, engine.endpoints(), engine.take_report())
        };

        if let Some(report) = report {
            spawn_report(state.recorder.clone(), report);
        }

        if endpoints.is_empty() {
            continue;
        }

        let bytes = match SnapshotBuilder::encode_bounded(&snapshot, max_bytes) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Skipping snapshot");
                continue;
            }
        };

        let failed = fan_out(&socket, &bytes, &endpoints);
        stats.record(bytes.len(), failed);

        if stats.total_snapshots % STATS_LOG_EVERY == 0 {
            debug!(
                snapshots = stats.total_snapshots,
                avg_bytes = stats.avg_bytes_per_snapshot,
                failed_sends = stats.failed_sends,
                "Snapshot traffic"
            );
        }
    }

    info!("Broadcast loop stopped");
}

/// Send one datagram to every endpoint without waiting; returns the failures
pub fn fan_out(socket: &UdpSocket, bytes: &[u8], endpoints: &[SocketAddr]) -> usize {
    let mut failed = 0;
    for endpoint in endpoints {
        match socket.try_send_to(bytes, *endpoint) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                failed += 1;
            }
            Err(e) => {
                failed += 1;
                debug!(endpoint = %endpoint, error = %e, "Snapshot send failed");
            }
        }
    }
    failed
}

/// Record a finished match off the tick path
fn spawn_report(recorder: MatchRecorder, report: MatchReport) {
    if report.players.len() < 2 {
        debug!(players = report.players.len(), "Match report skipped, not enough participants");
        return;
    }

    tokio::spawn(async move {
        if let Err(e) = recorder.record_report(&report).await {
            warn!(error = %e, map_id = report.map_id, "Failed to record match");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fan_out_survives_unreachable_endpoint() {
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.writable().await.unwrap();

        // An address no datagram can be sent to, ahead of a live receiver
        let endpoints = [
            SocketAddr::from(([0, 0, 0, 0], 0)),
            receiver.local_addr().unwrap(),
        ];
        let failed = fan_out(&sender, b"{}", &endpoints);
        assert!(failed <= 1);

        let mut buf = [0u8; 16];
        let (len, _) = receiver.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"{}");
    }
}
