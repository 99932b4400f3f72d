//! Discord gateway session delivering slash-command interactions.
//!
//! ```text
//!  connect ──▶ Hello(10) ──▶ Identify(2) / Resume(6)
//!                │
//!                ├─ heartbeat every interval (1) ◀── ACK (11)
//!                └─ Dispatch(0): READY, RESUMED, INTERACTION_CREATE ──▶ mpsc
//! ```
//!
//! The loop reconnects with exponential backoff and resumes the previous
//! session when it can. Close codes that no reconnect can fix (bad token,
//! disallowed intents...) stop the loop, which closes the channel.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::interaction::Interaction;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

pub const OP_DISPATCH: u8 = 0;
pub const OP_HEARTBEAT: u8 = 1;
pub const OP_IDENTIFY: u8 = 2;
pub const OP_RESUME: u8 = 6;
pub const OP_RECONNECT: u8 = 7;
pub const OP_INVALID_SESSION: u8 = 9;
pub const OP_HELLO: u8 = 10;
pub const OP_HEARTBEAT_ACK: u8 = 11;

pub const INTENT_GUILDS: u64 = 1 << 0;
pub const INTENT_GUILD_MESSAGES: u64 = 1 << 9;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Gateway protocol error: {0}")]
    Protocol(String),

    #[error("Gateway closed the connection with code {code}: {reason}")]
    Fatal { code: u16, reason: String },

    #[error("Interaction consumer has shut down")]
    ConsumerClosed,
}

/// Connection settings for the gateway task.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// e.g. `wss://gateway.discord.gg/?v=10&encoding=json`
    pub url: String,
    pub token: String,
    pub intents: u64,
}

impl GatewayConfig {
    pub fn new(url: &str, token: &str) -> Self {
        GatewayConfig {
            url: url.to_string(),
            token: token.to_string(),
            intents: INTENT_GUILDS | INTENT_GUILD_MESSAGES,
        }
    }
}

/// A raw gateway frame.
#[derive(Debug, Deserialize)]
pub struct GatewayPayload {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
    #[serde(default)]
    pub s: Option<u64>,
    #[serde(default)]
    pub t: Option<String>,
}

/// What survives a reconnect.
#[derive(Debug, Default)]
struct Session {
    id: Option<String>,
    resume_url: Option<String>,
    sequence: Option<u64>,
}

impl Session {
    fn can_resume(&self) -> bool {
        self.id.is_some() && self.resume_url.is_some()
    }

    fn clear(&mut self) {
        *self = Session::default();
    }
}

/// How a single connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disconnect {
    /// Reconnect and resume the session.
    Resume,
    /// Reconnect with a fresh Identify.
    Reidentify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseAction {
    Resume,
    Reidentify,
    Fatal,
}

fn close_action(code: u16) -> CloseAction {
    match code {
        // authentication failed, invalid shard, sharding required,
        // invalid API version, invalid intents, disallowed intents
        4004 | 4010 | 4011 | 4012 | 4013 | 4014 => CloseAction::Fatal,
        // invalid seq, session timed out
        4007 | 4009 => CloseAction::Reidentify,
        _ => CloseAction::Resume,
    }
}

/// Spawn the gateway task and return the stream of command interactions.
///
/// The channel closes when the gateway hits a fatal close code.
pub fn start_gateway(config: GatewayConfig) -> mpsc::Receiver<Interaction> {
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(async move {
        if let Err(e) = gateway_loop(&config, tx).await {
            error!("[Gateway] Stopped: {}", e);
        }
    });
    rx
}

/// Persistent gateway connection loop with auto-reconnect, exponential
/// backoff and jitter.
async fn gateway_loop(
    config: &GatewayConfig,
    tx: mpsc::Sender<Interaction>,
) -> Result<(), GatewayError> {
    let mut backoff_secs = 1u64;
    let max_backoff = 30u64;
    let mut session = Session::default();

    loop {
        let url = match (&session.resume_url, session.can_resume()) {
            (Some(resume_url), true) => with_base_query(resume_url, &config.url),
            _ => config.url.clone(),
        };
        info!("[Gateway] Connecting to {}", url);

        match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((ws_stream, _response)) => {
                info!("[Gateway] WebSocket connected");
                backoff_secs = 1;

                match run_session(config, ws_stream, &mut session, &tx).await {
                    Ok(Disconnect::Resume) => {}
                    Ok(Disconnect::Reidentify) => session.clear(),
                    Err(e @ (GatewayError::Fatal { .. } | GatewayError::ConsumerClosed)) => {
                        return Err(e)
                    }
                    Err(e) => error!("[Gateway] Connection error: {}", e),
                }
            }
            Err(e) => {
                error!("[Gateway] WebSocket connection failed: {}", e);
            }
        }

        let jitter_ms = rand::thread_rng().gen_range(0..1000);
        let delay = Duration::from_secs(backoff_secs) + Duration::from_millis(jitter_ms);
        warn!("[Gateway] Reconnecting in {:.1}s...", delay.as_secs_f64());
        tokio::time::sleep(delay).await;
        backoff_secs = (backoff_secs * 2).min(max_backoff);
    }
}

/// Drive one connection from Hello until it drops.
async fn run_session(
    config: &GatewayConfig,
    ws_stream: WsStream,
    session: &mut Session,
    tx: &mpsc::Sender<Interaction>,
) -> Result<Disconnect, GatewayError> {
    let (mut write, mut read) = ws_stream.split();

    let heartbeat_ms = wait_for_hello(&mut read).await?;
    let period = Duration::from_millis(heartbeat_ms);
    debug!("[Gateway] Hello received, heartbeat every {}ms", heartbeat_ms);

    if let (true, Some(id)) = (session.can_resume(), session.id.as_deref()) {
        info!("[Gateway] Resuming session {}", id);
        send_json(
            &mut write,
            &resume_payload(&config.token, id, session.sequence),
        )
        .await?;
    } else {
        send_json(&mut write, &identify_payload(&config.token, config.intents)).await?;
    }

    let first_beat = period.mul_f64(rand::thread_rng().gen::<f64>());
    let mut heartbeat = tokio::time::interval_at(Instant::now() + first_beat, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut awaiting_ack = false;

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let payload: GatewayPayload = match serde_json::from_str(&text) {
                            Ok(p) => p,
                            Err(e) => {
                                warn!("[Gateway] Ignoring malformed payload: {}", e);
                                continue;
                            }
                        };
                        if let Some(seq) = payload.s {
                            session.sequence = Some(seq);
                        }

                        let op = payload.op;
                        match op {
                            OP_DISPATCH => handle_dispatch(payload, session, tx).await?,
                            OP_HEARTBEAT => {
                                send_json(&mut write, &heartbeat_payload(session.sequence)).await?;
                            }
                            OP_HEARTBEAT_ACK => awaiting_ack = false,
                            OP_RECONNECT => {
                                info!("[Gateway] Server requested reconnect");
                                return Ok(Disconnect::Resume);
                            }
                            OP_INVALID_SESSION => {
                                let resumable = payload.d.as_bool().unwrap_or(false);
                                warn!("[Gateway] Invalid session (resumable: {})", resumable);
                                return Ok(if resumable {
                                    Disconnect::Resume
                                } else {
                                    Disconnect::Reidentify
                                });
                            }
                            other => debug!("[Gateway] Ignoring op {}", other),
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (u16::from(f.code), f.reason.to_string()))
                            .unwrap_or((1000, String::new()));
                        warn!("[Gateway] Server closed WebSocket: {} {}", code, reason);
                        return match close_action(code) {
                            CloseAction::Fatal => Err(GatewayError::Fatal { code, reason }),
                            CloseAction::Reidentify => Ok(Disconnect::Reidentify),
                            CloseAction::Resume => Ok(Disconnect::Resume),
                        };
                    }
                    Some(Err(e)) => return Err(e.into()),
                    None => {
                        warn!("[Gateway] WebSocket stream ended");
                        return Ok(Disconnect::Resume);
                    }
                    _ => {}
                }
            }
            _ = heartbeat.tick() => {
                if awaiting_ack {
                    warn!("[Gateway] No heartbeat ACK, connection looks dead");
                    return Ok(Disconnect::Resume);
                }
                send_json(&mut write, &heartbeat_payload(session.sequence)).await?;
                awaiting_ack = true;
            }
        }
    }
}

async fn wait_for_hello(read: &mut WsRead) -> Result<u64, GatewayError> {
    while let Some(msg) = read.next().await {
        if let Message::Text(text) = msg? {
            let payload: GatewayPayload = serde_json::from_str(&text)
                .map_err(|e| GatewayError::Protocol(format!("bad Hello: {}", e)))?;
            if payload.op != OP_HELLO {
                return Err(GatewayError::Protocol(format!(
                    "expected Hello, got op {}",
                    payload.op
                )));
            }
            return payload.d["heartbeat_interval"]
                .as_u64()
                .filter(|ms| *ms > 0)
                .ok_or_else(|| GatewayError::Protocol("Hello without heartbeat_interval".into()));
        }
    }
    Err(GatewayError::Protocol("stream ended before Hello".into()))
}

async fn handle_dispatch(
    payload: GatewayPayload,
    session: &mut Session,
    tx: &mpsc::Sender<Interaction>,
) -> Result<(), GatewayError> {
    match payload.t.as_deref() {
        Some("READY") => {
            session.id = payload.d["session_id"].as_str().map(str::to_string);
            session.resume_url = payload.d["resume_gateway_url"].as_str().map(str::to_string);
            let user = &payload.d["user"];
            info!(
                "🤖 Logged in as {}#{}",
                user["username"].as_str().unwrap_or("unknown"),
                user["discriminator"].as_str().unwrap_or("0")
            );
        }
        Some("RESUMED") => info!("[Gateway] Session resumed"),
        Some("INTERACTION_CREATE") => match serde_json::from_value::<Interaction>(payload.d) {
            Ok(interaction) if interaction.is_command() => {
                tx.send(interaction)
                    .await
                    .map_err(|_| GatewayError::ConsumerClosed)?;
            }
            Ok(interaction) => debug!("[Gateway] Ignoring interaction type {}", interaction.kind),
            Err(e) => warn!("[Gateway] Malformed interaction: {}", e),
        },
        Some(other) => debug!("[Gateway] Ignoring event {}", other),
        None => {}
    }
    Ok(())
}

async fn send_json(write: &mut WsWrite, payload: &Value) -> Result<(), GatewayError> {
    write.send(Message::Text(payload.to_string())).await?;
    Ok(())
}

fn identify_payload(token: &str, intents: u64) -> Value {
    json!({
        "op": OP_IDENTIFY,
        "d": {
            "token": token,
            "intents": intents,
            "properties": {
                "os": std::env::consts::OS,
                "browser": "scoreboard-bot",
                "device": "scoreboard-bot",
            },
        },
    })
}

fn resume_payload(token: &str, session_id: &str, sequence: Option<u64>) -> Value {
    json!({
        "op": OP_RESUME,
        "d": { "token": token, "session_id": session_id, "seq": sequence },
    })
}

fn heartbeat_payload(sequence: Option<u64>) -> Value {
    json!({ "op": OP_HEARTBEAT, "d": sequence })
}

/// Carry the version/encoding query of the configured URL over to the
/// resume URL Discord hands out in READY.
fn with_base_query(resume_url: &str, base_url: &str) -> String {
    let (Ok(mut resume), Ok(base)) = (url::Url::parse(resume_url), url::Url::parse(base_url)) else {
        return base_url.to_string();
    };
    resume.set_query(base.query());
    resume.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hello_and_dispatch_frames() {
        let hello: GatewayPayload =
            serde_json::from_str(r#"{"op":10,"d":{"heartbeat_interval":41250},"s":null,"t":null}"#)
                .unwrap();
        assert_eq!(hello.op, OP_HELLO);
        assert_eq!(hello.d["heartbeat_interval"], 41250);

        let ack: GatewayPayload = serde_json::from_str(r#"{"op":11}"#).unwrap();
        assert!(ack.d.is_null());
        assert!(ack.s.is_none());

        let dispatch: GatewayPayload =
            serde_json::from_str(r#"{"op":0,"d":{},"s":42,"t":"RESUMED"}"#).unwrap();
        assert_eq!(dispatch.s, Some(42));
        assert_eq!(dispatch.t.as_deref(), Some("RESUMED"));
    }

    #[test]
    fn identify_carries_token_and_intents() {
        let payload = identify_payload("tok", INTENT_GUILDS | INTENT_GUILD_MESSAGES);
        assert_eq!(payload["op"], 2);
        assert_eq!(payload["d"]["token"], "tok");
        assert_eq!(payload["d"]["intents"], 513);
    }

    #[test]
    fn resume_and_heartbeat_carry_sequence() {
        let resume = resume_payload("tok", "sess", Some(7));
        assert_eq!(resume["op"], 6);
        assert_eq!(resume["d"]["session_id"], "sess");
        assert_eq!(resume["d"]["seq"], 7);

        assert_eq!(heartbeat_payload(Some(3)), json!({"op": 1, "d": 3}));
        assert_eq!(heartbeat_payload(None), json!({"op": 1, "d": null}));
    }

    #[test]
    fn close_codes() {
        assert_eq!(close_action(4004), CloseAction::Fatal);
        assert_eq!(close_action(4014), CloseAction::Fatal);
        assert_eq!(close_action(4009), CloseAction::Reidentify);
        assert_eq!(close_action(4000), CloseAction::Resume);
        assert_eq!(close_action(1006), CloseAction::Resume);
    }

    #[test]
    fn resume_url_keeps_version_query() {
        assert_eq!(
            with_base_query(
                "wss://gateway-us-east1-b.discord.gg",
                "wss://gateway.discord.gg/?v=10&encoding=json"
            ),
            "wss://gateway-us-east1-b.discord.gg/?v=10&encoding=json"
        );
        assert_eq!(
            with_base_query("not a url", "wss://gateway.discord.gg/?v=10"),
            "wss://gateway.discord.gg/?v=10"
        );
    }

    #[tokio::test]
    async fn ready_records_session_and_interactions_are_forwarded() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut session = Session::default();

        let ready: GatewayPayload = serde_json::from_value(json!({
            "op": 0, "s": 1, "t": "READY",
            "d": {
                "session_id": "abc",
                "resume_gateway_url": "wss://resume.discord.gg",
                "user": { "username": "scoreboard", "discriminator": "0" }
            }
        }))
        .unwrap();
        handle_dispatch(ready, &mut session, &tx).await.unwrap();
        assert!(session.can_resume());
        assert_eq!(session.id.as_deref(), Some("abc"));

        let autocomplete: GatewayPayload = serde_json::from_value(json!({
            "op": 0, "s": 2, "t": "INTERACTION_CREATE",
            "d": { "id": "1", "type": 4, "token": "t", "channel_id": "c" }
        }))
        .unwrap();
        handle_dispatch(autocomplete, &mut session, &tx).await.unwrap();

        let command: GatewayPayload = serde_json::from_value(json!({
            "op": 0, "s": 3, "t": "INTERACTION_CREATE",
            "d": {
                "id": "2", "type": 2, "token": "t", "guild_id": "g", "channel_id": "c",
                "data": { "name": "ping" }
            }
        }))
        .unwrap();
        handle_dispatch(command, &mut session, &tx).await.unwrap();

        let forwarded = rx.try_recv().unwrap();
        assert_eq!(forwarded.id, "2");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_consumer_is_reported() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let mut session = Session::default();
        let command: GatewayPayload = serde_json::from_value(json!({
            "op": 0, "t": "INTERACTION_CREATE",
            "d": { "id": "2", "type": 2, "token": "t", "channel_id": "c", "data": { "name": "ping" } }
        }))
        .unwrap();
        let err = handle_dispatch(command, &mut session, &tx).await.unwrap_err();
        assert!(matches!(err, GatewayError::ConsumerClosed));
    }

    mod session {
        use super::*;
        use tokio::net::TcpListener;
        use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
        use tokio_tungstenite::tungstenite::protocol::CloseFrame;

        type ServerWs = WebSocketStream<TcpStream>;

        async fn local_gateway() -> (TcpListener, String) {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let url = format!("ws://{}", listener.local_addr().unwrap());
            (listener, url)
        }

        async fn accept(listener: &TcpListener) -> ServerWs {
            let (stream, _) = listener.accept().await.unwrap();
            tokio_tungstenite::accept_async(stream).await.unwrap()
        }

        async fn connect(url: &str) -> WsStream {
            tokio_tungstenite::connect_async(url).await.unwrap().0
        }

        async fn send_frame(ws: &mut ServerWs, frame: Value) {
            ws.send(Message::Text(frame.to_string())).await.unwrap();
        }

        async fn hello(ws: &mut ServerWs, heartbeat_ms: u64) {
            send_frame(ws, json!({ "op": OP_HELLO, "d": { "heartbeat_interval": heartbeat_ms } }))
                .await;
        }

        /// Next client frame with `op`, skipping heartbeats.
        async fn expect_op(ws: &mut ServerWs, op: u8) -> Value {
            loop {
                let msg = ws.next().await.unwrap().unwrap();
                if let Message::Text(text) = msg {
                    let frame: Value = serde_json::from_str(&text).unwrap();
                    if frame["op"] == op {
                        return frame;
                    }
                    assert_eq!(frame["op"], OP_HEARTBEAT, "unexpected frame {}", frame);
                }
            }
        }

        #[tokio::test]
        async fn identifies_then_resumes_after_reconnect_request() {
            let (listener, url) = local_gateway().await;
            let config = GatewayConfig::new(&url, "tok");
            let (tx, mut rx) = mpsc::channel(4);

            let server = tokio::spawn(async move {
                let mut ws = accept(&listener).await;
                hello(&mut ws, 45_000).await;
                let identify = expect_op(&mut ws, OP_IDENTIFY).await;
                send_frame(&mut ws, json!({
                    "op": 0, "s": 1, "t": "READY",
                    "d": {
                        "session_id": "sess-1",
                        "resume_gateway_url": "ws://resume.invalid",
                        "user": { "username": "scoreboard", "discriminator": "0" }
                    }
                }))
                .await;
                send_frame(&mut ws, json!({
                    "op": 0, "s": 2, "t": "INTERACTION_CREATE",
                    "d": {
                        "id": "i1", "type": 2, "token": "t", "guild_id": "g1",
                        "channel_id": "c1", "data": { "name": "ping" }
                    }
                }))
                .await;
                send_frame(&mut ws, json!({ "op": OP_RECONNECT, "d": null })).await;

                let mut ws = accept(&listener).await;
                hello(&mut ws, 45_000).await;
                let resume = expect_op(&mut ws, OP_RESUME).await;
                send_frame(&mut ws, json!({ "op": OP_RECONNECT, "d": null })).await;
                (identify, resume)
            });

            let mut session = Session::default();
            let first = run_session(&config, connect(&url).await, &mut session, &tx)
                .await
                .unwrap();
            assert_eq!(first, Disconnect::Resume);
            assert!(session.can_resume());
            assert_eq!(session.sequence, Some(2));
            assert_eq!(rx.try_recv().unwrap().id, "i1");

            let second = run_session(&config, connect(&url).await, &mut session, &tx)
                .await
                .unwrap();
            assert_eq!(second, Disconnect::Resume);

            let (identify, resume) = server.await.unwrap();
            assert_eq!(identify["d"]["token"], "tok");
            assert_eq!(identify["d"]["intents"], 513);
            assert_eq!(resume["d"]["session_id"], "sess-1");
            assert_eq!(resume["d"]["seq"], 2);
        }

        #[tokio::test]
        async fn missing_heartbeat_ack_drops_the_connection() {
            let (listener, url) = local_gateway().await;
            let config = GatewayConfig::new(&url, "tok");
            let (tx, _rx) = mpsc::channel(1);

            let server = tokio::spawn(async move {
                let mut ws = accept(&listener).await;
                hello(&mut ws, 50).await;
                expect_op(&mut ws, OP_IDENTIFY).await;

                // acknowledge the first beat only
                let mut beats = 0;
                while let Some(Ok(msg)) = ws.next().await {
                    if let Message::Text(text) = msg {
                        let frame: Value = serde_json::from_str(&text).unwrap();
                        assert_eq!(frame["op"], OP_HEARTBEAT);
                        beats += 1;
                        if beats == 1 {
                            send_frame(&mut ws, json!({ "op": OP_HEARTBEAT_ACK })).await;
                        }
                    }
                }
                beats
            });

            let mut session = Session::default();
            let outcome = tokio::time::timeout(
                Duration::from_secs(5),
                run_session(&config, connect(&url).await, &mut session, &tx),
            )
            .await
            .unwrap()
            .unwrap();
            assert_eq!(outcome, Disconnect::Resume);
            assert_eq!(server.await.unwrap(), 2);
        }

        #[tokio::test]
        async fn authentication_failure_is_fatal() {
            let (listener, url) = local_gateway().await;
            let config = GatewayConfig::new(&url, "bad-token");
            let (tx, _rx) = mpsc::channel(1);

            let server = tokio::spawn(async move {
                let mut ws = accept(&listener).await;
                hello(&mut ws, 45_000).await;
                expect_op(&mut ws, OP_IDENTIFY).await;
                ws.send(Message::Close(Some(CloseFrame {
                    code: CloseCode::from(4004),
                    reason: "Authentication failed.".into(),
                })))
                .await
                .unwrap();
            });

            let mut session = Session::default();
            let err = run_session(&config, connect(&url).await, &mut session, &tx)
                .await
                .unwrap_err();
            assert!(matches!(err, GatewayError::Fatal { code: 4004, .. }));
            server.await.unwrap();
        }

        #[tokio::test]
        async fn non_resumable_invalid_session_reidentifies() {
            let (listener, url) = local_gateway().await;
            let config = GatewayConfig::new(&url, "tok");
            let (tx, _rx) = mpsc::channel(1);

            tokio::spawn(async move {
                let mut ws = accept(&listener).await;
                hello(&mut ws, 45_000).await;
                expect_op(&mut ws, OP_IDENTIFY).await;
                send_frame(&mut ws, json!({ "op": OP_INVALID_SESSION, "d": false })).await;
                // hold the socket open until the client leaves
                while let Some(Ok(_)) = ws.next().await {}
            });

            let mut session = Session::default();
            let outcome = run_session(&config, connect(&url).await, &mut session, &tx)
                .await
                .unwrap();
            assert_eq!(outcome, Disconnect::Reidentify);
        }
    }
}
