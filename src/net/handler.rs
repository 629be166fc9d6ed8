//! Control-channel connection handler: handshake, control loop, teardown

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::app::AppState;
use crate::game::{
    ControlHandle, PlayerId, PlayerInput, PlayerLink, ReadyOutcome, RestartOutcome, SessionError,
    SharedEngine,
};
use crate::net::protocol::{parse_udp_port, ClientEnvelope, ControlMsg, ProtocolError, ServerEnvelope};
use crate::store::Account;
use crate::util::rate_limit::ControlRateLimiter;

/// Outbound control messages buffered per connection
pub const CONTROL_QUEUE_CAPACITY: usize = 32;

/// Longest accepted control line, terminator included
const MAX_LINE_BYTES: u64 = 4096;

type LineReader = BufReader<OwnedReadHalf>;

/// Connection-level failures; each one tears down only its own connection
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Handshake timed out")]
    HandshakeTimeout,

    #[error("Write timed out")]
    WriteTimeout,

    #[error("Peer closed the connection")]
    Closed,

    #[error("Control line is not UTF-8 or too long")]
    UnreadableLine,

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Server shutting down")]
    Shutdown,
}

/// Serve one control connection until it closes, errors or the server stops
pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    state: AppState,
    mut shutdown: watch::Receiver<bool>,
) {
    let _ = stream.set_nodelay(true);
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let write_timeout = state.config.write_timeout;

    let is_full = state.engine.lock().is_full();
    if is_full {
        info!(peer = %peer, "Refusing connection, server full");
        let _ = write_line(&mut write_half, &ControlMsg::ServerFull.to_line(), write_timeout).await;
        let _ = write_half.shutdown().await;
        return;
    }

    let handshake_result = tokio::select! {
        result = timeout(
            state.config.handshake_timeout,
            handshake(&mut reader, &mut write_half, peer, &state),
        ) => result.unwrap_or(Err(ConnectionError::HandshakeTimeout)),
        _ = shutdown.changed() => Err(ConnectionError::Shutdown),
    };

    let (account, endpoint, claim) = match handshake_result {
        Ok(joined) => joined,
        Err(e) => {
            info!(peer = %peer, error = %e, "Handshake failed");
            let _ = write_half.shutdown().await;
            return;
        }
    };

    let player_id = account.id.clone();
    let (tx, rx) = mpsc::channel(CONTROL_QUEUE_CAPACITY);
    let handle = ControlHandle::new(tx);
    let mut writer = tokio::spawn(run_writer(write_half, rx, write_timeout, player_id.clone()));

    let link = PlayerLink {
        control: handle.clone(),
        endpoint,
    };
    let registered = state
        .engine
        .lock()
        .add_player(player_id.clone(), account.display_name.clone(), link)
        .map(|_| ());
    drop(claim);

    if let Err(e) = registered {
        info!(peer = %peer, player_id = %player_id, error = %e, "Registration refused");
        if matches!(e, SessionError::ServerFull) {
            handle.notify(ControlMsg::ServerFull);
        }
        drop(handle);
        let _ = writer.await;
        return;
    }

    info!(
        peer = %peer,
        player_id = %player_id,
        name = %account.display_name,
        endpoint = %endpoint,
        "Player connected"
    );
    handle.notify(ControlMsg::WaitingForPlayers);

    let writer_finished =
        control_loop(&mut reader, &player_id, &state, &mut writer, &mut shutdown).await;

    leave(&state, &player_id);
    drop(handle);
    if !writer_finished {
        let _ = writer.await;
    }

    info!(peer = %peer, player_id = %player_id, "Player disconnected");
}

/// Auth envelope, reply, then `UDP_PORT:<n>`
async fn handshake(
    reader: &mut LineReader,
    writer: &mut OwnedWriteHalf,
    peer: SocketAddr,
    state: &AppState,
) -> Result<(Account, SocketAddr, LoginClaim), ConnectionError> {
    let write_timeout = state.config.write_timeout;

    // Unreadable or undecodable envelopes get a failure reply; EOF and I/O errors do not
    let decoded = match read_text(reader).await {
        Ok(line) => ClientEnvelope::decode(&line).map_err(ConnectionError::from),
        Err(ConnectionError::UnreadableLine) => Err(ConnectionError::UnreadableLine),
        Err(e) => return Err(e),
    };
    let envelope = match decoded {
        Ok(envelope) => envelope,
        Err(e) => {
            reject(writer, "Invalid auth request", write_timeout).await?;
            return Err(e);
        }
    };

    let (account, claim) = match authenticate(&envelope, state).await {
        Ok(claimed) => claimed,
        Err(message) => {
            debug!(peer = %peer, username = envelope.username(), message = %message, "Auth rejected");
            reject(writer, &message, write_timeout).await?;
            return Err(ConnectionError::AuthFailed(message));
        }
    };

    let reply = ServerEnvelope::auth_ok(&account.id, "Authentication successful").to_line()?;
    write_line(writer, &reply, write_timeout).await?;

    let line = read_text(reader).await?;
    let port = parse_udp_port(&line)?;

    Ok((account, SocketAddr::new(peer.ip(), port), claim))
}

/// Run the login or register flow, returning the client-facing failure text
async fn authenticate(
    envelope: &ClientEnvelope,
    state: &AppState,
) -> Result<(Account, LoginClaim), String> {
    if let Some(version) = envelope.protocol_version() {
        if version != state.game.protocol_version {
            return Err(format!(
                "Protocol version mismatch: server {}, client {}",
                state.game.protocol_version, version
            ));
        }
    }

    let (username, password) = match envelope {
        ClientEnvelope::Login {
            username, password, ..
        } => (username, password),
        ClientEnvelope::Register {
            username,
            password,
            name,
            ..
        } => {
            state
                .accounts
                .register(username, password, name.as_deref())
                .await
                .map_err(|e| e.to_string())?;
            (username, password)
        }
    };

    let account = state
        .accounts
        .authenticate(username, password)
        .await
        .map_err(|e| e.to_string())?;

    let claim = LoginClaim::acquire(&state.engine, &account.id)
        .ok_or_else(|| "Player already connected".to_string())?;

    Ok((account, claim))
}

/// Holds an account's login slot from authentication until registration,
/// so a concurrent login for the same account is refused up front.
/// Released on drop, including when the handshake is cancelled.
struct LoginClaim {
    engine: SharedEngine,
    id: PlayerId,
}

impl LoginClaim {
    fn acquire(engine: &SharedEngine, id: &PlayerId) -> Option<Self> {
        engine.lock().claim_login(id).then(|| Self {
            engine: Arc::clone(engine),
            id: id.clone(),
        })
    }
}

impl Drop for LoginClaim {
    fn drop(&mut self) {
        self.engine.lock().release_login(&self.id);
    }
}

async fn reject(
    writer: &mut OwnedWriteHalf,
    message: &str,
    write_timeout: Duration,
) -> Result<(), ConnectionError> {
    let reply = ServerEnvelope::auth_failed(message).to_line()?;
    write_line(writer, &reply, write_timeout).await
}

/// Relay control tokens until EOF, error, idle expiry, writer failure or
/// shutdown. Returns whether the writer task already finished.
async fn control_loop(
    reader: &mut LineReader,
    player_id: &PlayerId,
    state: &AppState,
    writer: &mut JoinHandle<()>,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    let idle_timeout = state.config.control_idle_timeout;
    let limiter = ControlRateLimiter::new();

    loop {
        let line = tokio::select! {
            read = timeout(idle_timeout, read_line(reader)) => read,
            _ = &mut *writer => {
                debug!(player_id = %player_id, "Control writer stopped");
                return true;
            }
            _ = shutdown.changed() => return false,
        };

        let line = match line {
            Ok(Ok(Some(Line::Text(line)))) => line,
            Ok(Ok(Some(unreadable))) => {
                warn!(player_id = %player_id, line = ?unreadable, "Dropping unreadable control line");
                continue;
            }
            Ok(Ok(None)) => {
                debug!(player_id = %player_id, "Control channel closed by peer");
                return false;
            }
            Ok(Err(e)) => {
                debug!(player_id = %player_id, error = %e, "Control read failed");
                return false;
            }
            Err(_) => {
                info!(player_id = %player_id, "Control channel idle, closing");
                return false;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        if !limiter.check() {
            warn!(player_id = %player_id, "Rate limited control message");
            continue;
        }

        match ControlMsg::parse(&line) {
            Ok(msg) => dispatch(state, player_id, msg),
            Err(e) => warn!(player_id = %player_id, error = %e, "Dropping control message"),
        }
    }
}

/// Apply one inbound control token
fn dispatch(state: &AppState, player_id: &PlayerId, msg: ControlMsg) {
    let mut engine = state.engine.lock();

    match msg {
        ControlMsg::Ready => {
            if engine.mark_ready(player_id) == ReadyOutcome::Started {
                engine.broadcast_control(ControlMsg::GameStart);
            }
        }
        ControlMsg::Restart => match engine.vote_restart(player_id) {
            RestartOutcome::Restarted => {
                engine.broadcast_control(ControlMsg::Restart);
            }
            RestartOutcome::Accepted => {
                engine.notify(player_id, ControlMsg::RestartAccepted);
            }
            RestartOutcome::Ignored => {}
        },
        ControlMsg::Reload => {
            engine.apply_input(player_id, PlayerInput::ReloadRequest);
        }
        other => {
            debug!(player_id = %player_id, message = other.as_str(), "Ignoring server-only token");
        }
    }
}

/// Remove the player and announce a restart their departure completed
fn leave(state: &AppState, player_id: &PlayerId) {
    let mut engine = state.engine.lock();
    if let Some(departure) = engine.remove_player(player_id) {
        if departure.restarted {
            engine.broadcast_control(ControlMsg::Restart);
        }
    }
}

/// Drain the outbound queue onto the socket
async fn run_writer(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::Receiver<ControlMsg>,
    write_timeout: Duration,
    player_id: PlayerId,
) {
    while let Some(msg) = rx.recv().await {
        if let Err(e) = write_line(&mut writer, &msg.to_line(), write_timeout).await {
            warn!(player_id = %player_id, message = msg.as_str(), error = %e, "Control write failed");
            break;
        }
    }
    let _ = writer.shutdown().await;
}

async fn write_line(
    writer: &mut OwnedWriteHalf,
    line: &str,
    write_timeout: Duration,
) -> Result<(), ConnectionError> {
    timeout(write_timeout, writer.write_all(line.as_bytes()))
        .await
        .map_err(|_| ConnectionError::WriteTimeout)??;
    Ok(())
}

/// One framed control line
#[derive(Debug, PartialEq, Eq)]
enum Line {
    Text(String),
    /// Not valid UTF-8
    Undecodable,
    /// Hit `MAX_LINE_BYTES` before a terminator; the rest was discarded
    Overlong,
}

/// Read one `\n`-terminated line. `None` on clean EOF.
async fn read_line(reader: &mut LineReader) -> io::Result<Option<Line>> {
    let mut buf = Vec::new();
    let read = (&mut *reader)
        .take(MAX_LINE_BYTES)
        .read_until(b'\n', &mut buf)
        .await?;

    if read == 0 {
        return Ok(None);
    }
    if !buf.ends_with(b"\n") && read as u64 >= MAX_LINE_BYTES {
        discard_line(reader).await?;
        return Ok(Some(Line::Overlong));
    }

    Ok(Some(match String::from_utf8(buf) {
        Ok(text) => Line::Text(text),
        Err(_) => Line::Undecodable,
    }))
}

/// Skip input up to and including the next `\n` without buffering it
async fn discard_line(reader: &mut LineReader) -> io::Result<()> {
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(());
        }
        match available.iter().position(|b| *b == b'\n') {
            Some(end) => {
                reader.consume(end + 1);
                return Ok(());
            }
            None => {
                let len = available.len();
                reader.consume(len);
            }
        }
    }
}

/// Handshake lines must be text; anything else fails the handshake
async fn read_text(reader: &mut LineReader) -> Result<String, ConnectionError> {
    match read_line(reader).await? {
        Some(Line::Text(text)) => Ok(text),
        Some(_) => Err(ConnectionError::UnreadableLine),
        None => Err(ConnectionError::Closed),
    }
}
