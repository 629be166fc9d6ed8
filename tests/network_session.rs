//! Loopback tests against a real server: handshake, lobby tokens and the
//! UDP state stream

use std::net::SocketAddr;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use tank_battle_server::app::LocalAddrs;
use tank_battle_server::store::{AccountStore, MatchRecorder};
use tank_battle_server::{AppState, Config, GameServer};

const WAIT: Duration = Duration::from_secs(5);

struct TestServer {
    addrs: LocalAddrs,
    recorder: MatchRecorder,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    async fn start() -> Self {
        let loopback = SocketAddr::from(([127, 0, 0, 1], 0));
        let config = Config {
            tcp_addr: loopback,
            udp_addr: loopback,
            http_addr: None,
            rng_seed: Some(11),
            ..Config::default()
        };

        let recorder = MatchRecorder::memory();
        let state = AppState::with_stores(config, AccountStore::memory(), recorder.clone());
        let server = GameServer::bind(state).await.unwrap();
        let addrs = server.local_addrs().unwrap();

        let (shutdown, rx) = watch::channel(false);
        let task = tokio::spawn(server.run(rx));

        Self {
            addrs,
            recorder,
            shutdown,
            task,
        }
    }

    async fn stop(self) {
        self.shutdown.send(true).unwrap();
        timeout(WAIT, self.task).await.unwrap().unwrap().unwrap();
    }
}

struct Client {
    id: String,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    udp: UdpSocket,
}

impl Client {
    async fn send_line(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\n").as_bytes())
            .await
            .unwrap();
    }

    async fn expect_line(&mut self, expected: &str) {
        assert_eq!(read_line(&mut self.reader).await.as_deref(), Some(expected));
    }

    async fn send_input(&self, server: SocketAddr, input: Value) {
        let mut input = input;
        input["id"] = json!(self.id);
        self.udp
            .send_to(input.to_string().as_bytes(), server)
            .await
            .unwrap();
    }

    /// Read snapshots until one satisfies `pred`
    async fn wait_for_snapshot(&self, pred: impl Fn(&Value) -> bool) -> Value {
        let mut buf = vec![0u8; 2048];
        timeout(WAIT, async {
            loop {
                let (len, _) = self.udp.recv_from(&mut buf).await.unwrap();
                let snapshot: Value = serde_json::from_slice(&buf[..len]).unwrap();
                if pred(&snapshot) {
                    return snapshot;
                }
            }
        })
        .await
        .unwrap()
    }
}

async fn read_line(reader: &mut BufReader<OwnedReadHalf>) -> Option<String> {
    let mut line = String::new();
    let read = timeout(WAIT, reader.read_line(&mut line))
        .await
        .unwrap()
        .unwrap();
    (read > 0).then(|| line.trim_end().to_string())
}

async fn open(addrs: &LocalAddrs) -> (BufReader<OwnedReadHalf>, OwnedWriteHalf) {
    let stream = TcpStream::connect(addrs.tcp).await.unwrap();
    let (read_half, write_half) = stream.into_split();
    (BufReader::new(read_half), write_half)
}

/// Send an auth envelope and return the server's reply
async fn auth(
    reader: &mut BufReader<OwnedReadHalf>,
    writer: &mut OwnedWriteHalf,
    envelope: Value,
) -> Value {
    writer
        .write_all(format!("{envelope}\n").as_bytes())
        .await
        .unwrap();
    serde_json::from_str(&read_line(reader).await.unwrap()).unwrap()
}

async fn announce_udp_port(writer: &mut OwnedWriteHalf, udp: &UdpSocket) {
    let port = udp.local_addr().unwrap().port();
    writer
        .write_all(format!("UDP_PORT:{port}\n").as_bytes())
        .await
        .unwrap();
}

/// Register, log in and announce a UDP port
async fn join(addrs: &LocalAddrs, username: &str) -> Client {
    let (mut reader, mut writer) = open(addrs).await;

    let envelope = json!({
        "type": "register",
        "username": username,
        "password": "secret",
        "protocolVersion": 1,
    });
    let reply = auth(&mut reader, &mut writer, envelope).await;
    assert_eq!(reply["type"], "auth_response");
    assert_eq!(reply["success"], true, "auth failed: {reply}");
    let id = reply["playerId"].as_str().unwrap().to_string();

    let udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    announce_udp_port(&mut writer, &udp).await;

    let mut client = Client {
        id,
        reader,
        writer,
        udp,
    };
    client.expect_line("WAITING_FOR_PLAYERS").await;
    client
}

async fn start_match(server: &TestServer) -> (Client, Client) {
    let mut a = join(&server.addrs, "alpha").await;
    let mut b = join(&server.addrs, "bravo").await;

    a.send_line("READY").await;
    b.send_line("READY").await;
    a.expect_line("GAME_START").await;
    b.expect_line("GAME_START").await;
    (a, b)
}

#[tokio::test]
async fn two_players_start_and_see_each_other_move() {
    let server = TestServer::start().await;
    let (a, b) = start_match(&server).await;

    a.send_input(server.addrs.udp, json!({"x": 150.0, "y": 320.0, "angle": 45.0}))
        .await;

    let a_id = a.id.clone();
    let snapshot = b
        .wait_for_snapshot(|s| s["players"][&a_id]["x"] == json!(150.0))
        .await;

    assert_eq!(snapshot["gameOver"], false);
    assert!(snapshot["winnerId"].is_null());
    assert_eq!(snapshot["players"].as_object().unwrap().len(), 2);
    assert_eq!(snapshot["players"][&a_id]["name"], "alpha");
    assert_eq!(snapshot["players"][&a_id]["hp"], 100);
    assert!(snapshot["mapId"].as_u64().unwrap() < 3);

    server.stop().await;
}

#[tokio::test]
async fn third_connection_is_turned_away() {
    let server = TestServer::start().await;
    let _a = join(&server.addrs, "alpha").await;
    let _b = join(&server.addrs, "bravo").await;

    let (mut reader, _writer) = open(&server.addrs).await;
    assert_eq!(read_line(&mut reader).await.as_deref(), Some("SERVER_FULL"));
    assert_eq!(read_line(&mut reader).await, None);

    server.stop().await;
}

#[tokio::test]
async fn bad_credentials_are_refused_and_closed() {
    let server = TestServer::start().await;
    let _a = join(&server.addrs, "alpha").await;

    let (mut reader, mut writer) = open(&server.addrs).await;
    let login = json!({"type": "login", "username": "alpha", "password": "wrong"});
    writer
        .write_all(format!("{login}\n").as_bytes())
        .await
        .unwrap();

    let reply: Value = serde_json::from_str(&read_line(&mut reader).await.unwrap()).unwrap();
    assert_eq!(reply["success"], false);
    assert_eq!(reply["message"], "Invalid password");
    assert!(reply.get("playerId").is_none());
    assert_eq!(read_line(&mut reader).await, None);

    server.stop().await;
}

#[tokio::test]
async fn protocol_mismatch_is_an_auth_failure() {
    let server = TestServer::start().await;

    let (mut reader, mut writer) = open(&server.addrs).await;
    let login = json!({
        "type": "register",
        "username": "oldclient",
        "password": "pw",
        "protocolVersion": 99,
    });
    writer
        .write_all(format!("{login}\n").as_bytes())
        .await
        .unwrap();

    let reply: Value = serde_json::from_str(&read_line(&mut reader).await.unwrap()).unwrap();
    assert_eq!(reply["success"], false);
    assert!(reply["message"]
        .as_str()
        .unwrap()
        .contains("Protocol version mismatch"));

    server.stop().await;
}

#[tokio::test]
async fn login_racing_an_unfinished_handshake_is_refused() {
    let server = TestServer::start().await;

    let (mut first_reader, mut first_writer) = open(&server.addrs).await;
    let register = json!({"type": "register", "username": "alpha", "password": "secret"});
    let reply = auth(&mut first_reader, &mut first_writer, register).await;
    assert_eq!(reply["success"], true);

    // Same account while the first connection has not announced its port yet
    let (mut second_reader, mut second_writer) = open(&server.addrs).await;
    let login = json!({"type": "login", "username": "alpha", "password": "secret"});
    let reply = auth(&mut second_reader, &mut second_writer, login).await;
    assert_eq!(reply["success"], false);
    assert_eq!(reply["message"], "Player already connected");
    assert_eq!(read_line(&mut second_reader).await, None);

    // The first login completes normally
    let udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    announce_udp_port(&mut first_writer, &udp).await;
    assert_eq!(
        read_line(&mut first_reader).await.as_deref(),
        Some("WAITING_FOR_PLAYERS")
    );

    server.stop().await;
}

#[tokio::test]
async fn abandoned_handshake_frees_the_account() {
    let server = TestServer::start().await;

    let (mut reader, mut writer) = open(&server.addrs).await;
    let register = json!({"type": "register", "username": "alpha", "password": "secret"});
    assert_eq!(auth(&mut reader, &mut writer, register).await["success"], true);
    drop((reader, writer));

    let login = json!({"type": "login", "username": "alpha", "password": "secret"});
    let reply = timeout(WAIT, async {
        loop {
            let (mut reader, mut writer) = open(&server.addrs).await;
            let reply = auth(&mut reader, &mut writer, login.clone()).await;
            if reply["success"] == json!(true) {
                return reply;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();
    assert!(reply["playerId"].is_string());

    server.stop().await;
}

#[tokio::test]
async fn unreadable_control_lines_do_not_drop_the_player() {
    let server = TestServer::start().await;
    let mut a = join(&server.addrs, "alpha").await;
    let mut b = join(&server.addrs, "bravo").await;

    a.writer.write_all(b"\xff\xfe\n").await.unwrap();
    let mut overlong = vec![b'R'; 10_000];
    overlong.push(b'\n');
    a.writer.write_all(&overlong).await.unwrap();

    a.send_line("READY").await;
    b.send_line("READY").await;
    a.expect_line("GAME_START").await;
    b.expect_line("GAME_START").await;

    server.stop().await;
}

#[tokio::test]
async fn restart_needs_both_votes() {
    let server = TestServer::start().await;
    let (mut a, mut b) = start_match(&server).await;

    a.send_line("RESTART").await;
    a.expect_line("RESTART_ACCEPTED").await;

    b.send_line("RESTART").await;
    a.expect_line("RESTART").await;
    b.expect_line("RESTART").await;

    // Unknown tokens are ignored without closing the connection
    a.send_line("DANCE").await;
    a.send_line("READY").await;
    b.send_line("READY").await;
    a.expect_line("GAME_START").await;

    server.stop().await;
}

#[tokio::test]
async fn disconnect_mid_match_ends_it_and_records_the_result() {
    let server = TestServer::start().await;
    let (a, b) = start_match(&server).await;
    let a_id = a.id.clone();

    drop(b);

    let snapshot = a
        .wait_for_snapshot(|s| s["gameOver"] == json!(true))
        .await;
    assert_eq!(snapshot["winnerId"], json!(a_id));
    assert_eq!(snapshot["players"].as_object().unwrap().len(), 1);

    let MatchRecorder::Memory(store) = &server.recorder else {
        panic!("memory recorder expected");
    };
    let records = timeout(WAIT, async {
        loop {
            let records = store.records();
            if records.first().is_some_and(|r| r.player_stats.len() == 2) {
                return records;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    let result = records[0].result.as_ref().unwrap();
    assert_eq!(result.winner_id.as_ref().map(|id| id.to_string()), Some(a_id));

    server.stop().await;
}
