//! Wire protocol definitions
//! Control plane: newline-terminated tokens plus the JSON auth envelope.
//! State plane: one JSON object per datagram.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::game::{PlayerId, PlayerInput};

/// Prefix of the line announcing the client's UDP port
pub const UDP_PORT_PREFIX: &str = "UDP_PORT:";

/// Control tokens exchanged over TCP
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMsg {
    /// Client -> server: ready for the match to start
    Ready,
    /// Both directions: restart vote (client) / restart executed (server)
    Restart,
    /// Client -> server: refill the magazine
    Reload,
    GameStart,
    WaitingForPlayers,
    ServerFull,
    RestartAccepted,
}

impl ControlMsg {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "READY",
            Self::Restart => "RESTART",
            Self::Reload => "RELOAD",
            Self::GameStart => "GAME_START",
            Self::WaitingForPlayers => "WAITING_FOR_PLAYERS",
            Self::ServerFull => "SERVER_FULL",
            Self::RestartAccepted => "RESTART_ACCEPTED",
        }
    }

    /// Parse one inbound line; surrounding whitespace is ignored
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        match line.trim() {
            "READY" => Ok(Self::Ready),
            "RESTART" => Ok(Self::Restart),
            "RELOAD" => Ok(Self::Reload),
            "GAME_START" => Ok(Self::GameStart),
            "WAITING_FOR_PLAYERS" => Ok(Self::WaitingForPlayers),
            "SERVER_FULL" => Ok(Self::ServerFull),
            "RESTART_ACCEPTED" => Ok(Self::RestartAccepted),
            other => Err(ProtocolError::UnknownToken(truncate(other))),
        }
    }

    /// The token with its line terminator
    pub fn to_line(self) -> String {
        format!("{}\n", self.as_str())
    }
}

/// Auth envelope sent by the client right after connecting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEnvelope {
    Login {
        username: String,
        password: String,
        #[serde(default, rename = "protocolVersion")]
        protocol_version: Option<u32>,
    },
    Register {
        username: String,
        password: String,
        /// Display name, defaults to the username
        #[serde(default)]
        name: Option<String>,
        #[serde(default, rename = "protocolVersion")]
        protocol_version: Option<u32>,
    },
}

impl ClientEnvelope {
    pub fn decode(line: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(line.trim())?)
    }

    pub fn username(&self) -> &str {
        match self {
            Self::Login { username, .. } | Self::Register { username, .. } => username,
        }
    }

    pub fn protocol_version(&self) -> Option<u32> {
        match self {
            Self::Login {
                protocol_version, ..
            }
            | Self::Register {
                protocol_version, ..
            } => *protocol_version,
        }
    }
}

/// Envelopes sent by the server over the control channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEnvelope {
    AuthResponse {
        success: bool,
        #[serde(rename = "playerId", skip_serializing_if = "Option::is_none", default)]
        player_id: Option<String>,
        message: String,
    },
}

impl ServerEnvelope {
    pub fn auth_ok(player_id: &PlayerId, message: impl Into<String>) -> Self {
        Self::AuthResponse {
            success: true,
            player_id: Some(player_id.to_string()),
            message: message.into(),
        }
    }

    pub fn auth_failed(message: impl Into<String>) -> Self {
        Self::AuthResponse {
            success: false,
            player_id: None,
            message: message.into(),
        }
    }

    /// JSON object followed by the line terminator
    pub fn to_line(&self) -> Result<String, ProtocolError> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Parse `UDP_PORT:<n>`
pub fn parse_udp_port(line: &str) -> Result<u16, ProtocolError> {
    let line = line.trim();
    let port = line
        .strip_prefix(UDP_PORT_PREFIX)
        .ok_or_else(|| ProtocolError::InvalidPort(truncate(line)))?;

    match port.trim().parse::<u16>() {
        Ok(0) | Err(_) => Err(ProtocolError::InvalidPort(truncate(line))),
        Ok(port) => Ok(port),
    }
}

/// Client datagram as it appears on the wire
#[derive(Debug, Deserialize)]
struct RawInput {
    id: PlayerId,
    x: Option<f32>,
    y: Option<f32>,
    angle: Option<f32>,
    #[serde(default)]
    fire: bool,
    #[serde(default)]
    reload: bool,
    ammo_update: Option<i32>,
}

/// Decode a client datagram into the sender id and its inputs, in the order
/// they are applied: position, fire, reload, ammo hint.
pub fn decode_input(bytes: &[u8]) -> Result<(PlayerId, Vec<PlayerInput>), ProtocolError> {
    let raw: RawInput = serde_json::from_slice(bytes)?;
    let mut inputs = Vec::with_capacity(4);

    // A partial position is ignored rather than half-applied
    if let (Some(x), Some(y), Some(angle)) = (raw.x, raw.y, raw.angle) {
        if x.is_finite() && y.is_finite() && angle.is_finite() {
            inputs.push(PlayerInput::PositionUpdate { x, y, angle });
        }
    }
    if raw.fire {
        inputs.push(PlayerInput::FireRequest);
    }
    if raw.reload {
        inputs.push(PlayerInput::ReloadRequest);
    }
    if let Some(ammo) = raw.ammo_update {
        inputs.push(PlayerInput::AmmoCorrection(ammo));
    }

    Ok((raw.id, inputs))
}

/// State datagram, server -> client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub players: BTreeMap<String, PlayerView>,
    pub projectiles: Vec<ProjectileView>,
    pub game_over: bool,
    pub winner_id: Option<String>,
    pub map_id: u32,
}

/// Per-player entry of a state datagram
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerView {
    pub x: f32,
    pub y: f32,
    pub angle: f32,
    pub hp: i32,
    pub ammo: i32,
    pub name: String,
    pub ready: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectileView {
    pub x: f32,
    pub y: f32,
    pub angle: f32,
}

/// Codec errors
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Unknown control token: {0}")]
    UnknownToken(String),

    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid UDP port line: {0}")]
    InvalidPort(String),

    #[error("Encoded snapshot is {bytes} bytes, limit is {limit}")]
    Oversized { bytes: usize, limit: usize },
}

/// Keep peer-supplied text short enough to log
fn truncate(text: &str) -> String {
    text.chars().take(64).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_tokens_parse_with_whitespace() {
        assert_eq!(ControlMsg::parse("READY\r\n").unwrap(), ControlMsg::Ready);
        assert_eq!(ControlMsg::parse("  RESTART ").unwrap(), ControlMsg::Restart);
        assert!(matches!(
            ControlMsg::parse("ready"),
            Err(ProtocolError::UnknownToken(_))
        ));
    }

    #[test]
    fn tokens_are_newline_terminated() {
        assert_eq!(ControlMsg::GameStart.to_line(), "GAME_START\n");
        for msg in [
            ControlMsg::Ready,
            ControlMsg::Restart,
            ControlMsg::Reload,
            ControlMsg::WaitingForPlayers,
            ControlMsg::ServerFull,
            ControlMsg::RestartAccepted,
        ] {
            assert_eq!(ControlMsg::parse(msg.as_str()).unwrap(), msg);
        }
    }

    #[test]
    fn register_envelope_name_is_optional() {
        let envelope =
            ClientEnvelope::decode(r#"{"type":"register","username":"ann","password":"pw"}"#)
                .unwrap();
        assert_eq!(
            envelope,
            ClientEnvelope::Register {
                username: "ann".into(),
                password: "pw".into(),
                name: None,
                protocol_version: None,
            }
        );
    }

    #[test]
    fn login_envelope_carries_protocol_version() {
        let envelope = ClientEnvelope::decode(
            r#"{"type":"login","username":"ann","password":"pw","protocolVersion":1}"#,
        )
        .unwrap();
        assert_eq!(envelope.protocol_version(), Some(1));
        assert_eq!(envelope.username(), "ann");
    }

    #[test]
    fn unknown_envelope_type_is_rejected() {
        assert!(ClientEnvelope::decode(r#"{"type":"logout"}"#).is_err());
        assert!(ClientEnvelope::decode("READY").is_err());
    }

    #[test]
    fn auth_response_shape() {
        let ok = ServerEnvelope::auth_ok(&PlayerId::from("42"), "Login successful")
            .to_line()
            .unwrap();
        assert!(ok.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(ok.trim()).unwrap();
        assert_eq!(value["type"], "auth_response");
        assert_eq!(value["success"], true);
        assert_eq!(value["playerId"], "42");

        let failed = ServerEnvelope::auth_failed("nope").to_line().unwrap();
        let value: serde_json::Value = serde_json::from_str(failed.trim()).unwrap();
        assert_eq!(value["success"], false);
        assert!(value.get("playerId").is_none());
    }

    #[test]
    fn udp_port_line() {
        assert_eq!(parse_udp_port("UDP_PORT:40000\n").unwrap(), 40000);
        assert!(parse_udp_port("UDP_PORT:0").is_err());
        assert!(parse_udp_port("UDP_PORT:70000").is_err());
        assert!(parse_udp_port("PORT:1").is_err());
    }

    #[test]
    fn input_requires_full_position() {
        let (id, inputs) = decode_input(br#"{"id":"a","x":10.0,"y":20.0}"#).unwrap();
        assert_eq!(id, PlayerId::from("a"));
        assert!(inputs.is_empty());

        let (_, inputs) =
            decode_input(br#"{"id":"a","x":10,"y":20,"angle":-450,"fire":true}"#).unwrap();
        assert_eq!(
            inputs,
            vec![
                PlayerInput::PositionUpdate {
                    x: 10.0,
                    y: 20.0,
                    angle: -450.0
                },
                PlayerInput::FireRequest,
            ]
        );
    }

    #[test]
    fn input_order_is_position_fire_reload_ammo() {
        let (_, inputs) = decode_input(
            br#"{"id":"b","ammo_update":3,"reload":true,"fire":true,"x":1,"y":2,"angle":3}"#,
        )
        .unwrap();
        assert!(matches!(inputs[0], PlayerInput::PositionUpdate { .. }));
        assert_eq!(inputs[1], PlayerInput::FireRequest);
        assert_eq!(inputs[2], PlayerInput::ReloadRequest);
        assert_eq!(inputs[3], PlayerInput::AmmoCorrection(3));
    }

    #[test]
    fn input_without_id_is_malformed() {
        assert!(matches!(
            decode_input(br#"{"fire":true}"#),
            Err(ProtocolError::Json(_))
        ));
        assert!(decode_input(b"\xff\xfe").is_err());
    }

    #[test]
    fn snapshot_uses_camel_case() {
        let snapshot = StateSnapshot {
            players: BTreeMap::new(),
            projectiles: vec![],
            game_over: true,
            winner_id: None,
            map_id: 1,
        };
        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["gameOver"], true);
        assert!(value["winnerId"].is_null());
        assert_eq!(value["mapId"], 1);
    }
}
