//! Channel Client (C6) – typed wrapper over the realtime room channel:
//! connect, register inbound handling, expose outbound publish helpers, treat
//! disconnects as fatal.
//!
//! Deliberately surfaces inbound events as a typed `mpsc` stream for the
//! caller's own `select!` loop (see `BotSimulator::run`) rather than taking
//! `Fn` callbacks driven from a separately spawned task: a single
//! cooperatively-scheduled task per runner with no locking around the
//! handler is the whole point of the concurrency model here.

use crate::error::{GhostRunnerError, Result};
use crate::protocol;
use futures_util::{SinkExt, StreamExt};
use log::{debug, warn};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type WsSink = futures_util::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Inbound events the simulator's main loop reacts to.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Command {
        bot_id: String,
        command_type: String,
        waypoint: Option<String>,
    },
    HubRefresh(Value),
    /// A previously-absent presence key appeared in this sync.
    PresenceJoin {
        session_key: String,
    },
    /// The socket closed or errored after join — transport-fatal.
    Fatal(String),
}

/// Outbound channel operations `BotSimulator` depends on, decoupled from the
/// WebSocket transport the same way `RunnerSpawner` decouples the supervisor
/// from the OS process table — a fake implementation lets the simulator's
/// reconciliation, walking, and resync logic be driven end-to-end in tests
/// without a live socket.
pub trait ChannelPort {
    /// This client's own session id, recorded as the network owner on
    /// Create/Update payloads.
    fn session_id(&self) -> &str;

    /// Fire-and-forget create/remove event. `payload` is already serialized
    /// so the trait stays object-agnostic about the NAF envelope's generic
    /// data type.
    async fn publish_naf(&self, payload: Value) -> Result<()>;

    /// Reliable incremental update, wrapped so the transport treats it as
    /// such.
    async fn publish_nafr(&self, payload: Value) -> Result<()>;

    /// Leave the channel; used during clean shutdown.
    async fn leave(&self);
}

pub struct ChannelClient {
    write: Mutex<WsSink>,
    next_ref: AtomicU64,
    pub hub_sid: String,
    pub session_id: String,
    /// The room's scene model URL, discovered from the join response.
    pub scene_model_url: String,
    /// `hubs[0].user_data`, if present in the join response — the starting
    /// point for `BotsConfig` before any `hub_refresh` event arrives.
    pub initial_user_data: Value,
}

impl ChannelClient {
    /// Join `hub:<hub_sid>` and return the client plus a stream of inbound
    /// events. The process should exit non-zero if this fails.
    pub async fn connect(
        base_url: &str,
        hub_sid: &str,
        bot_access_key: Option<&str>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ChannelEvent>)> {
        let ws_url = to_socket_url(base_url);
        let (ws_stream, _) = tokio_tungstenite::connect_async(ws_url)
            .await
            .map_err(GhostRunnerError::Ws)?;
        let (mut write, mut read) = ws_stream.split();

        let topic = format!("hub:{}", hub_sid);
        let mut join_payload = json!({
            "profile": {"displayName": "bot-runner", "avatarId": ""},
            "context": {"mobile": false, "embed": false, "hmd": false, "bot_runner": true},
        });
        if let Some(key) = bot_access_key {
            join_payload["bot_access_key"] = json!(key);
        }

        send_frame(&mut write, &topic, "phx_join", join_payload, Some("1")).await?;

        // Wait for the join reply, skipping any unrelated frames that may
        // race ahead of it (there shouldn't be any before join, but a
        // defensively-written client doesn't assume that).
        let join_response = loop {
            let Some(msg) = read.next().await else {
                return Err(GhostRunnerError::JoinFailed);
            };
            let Ok(msg) = msg else {
                return Err(GhostRunnerError::JoinFailed);
            };
            let Some(frame) = parse_incoming_frame(&msg) else {
                continue;
            };
            if frame.event == "phx_reply" {
                break frame.payload;
            }
        };

        let response = join_response.get("response").cloned().unwrap_or(Value::Null);
        let hubs = response.get("hubs").and_then(|h| h.as_array());
        let session_id = response.get("session_id").and_then(|s| s.as_str());
        let (Some(hubs), Some(session_id)) = (hubs, session_id) else {
            return Err(GhostRunnerError::JoinFailed);
        };
        let Some(hub0) = hubs.first() else {
            return Err(GhostRunnerError::JoinFailed);
        };

        let scene_model_url = hub0
            .get("scene")
            .and_then(|s| s.get("model_url"))
            .and_then(|u| u.as_str())
            .unwrap_or("")
            .to_string();
        let initial_user_data = hub0.get("user_data").cloned().unwrap_or(Value::Null);

        let (tx, rx) = mpsc::unbounded_channel();
        let session_id = session_id.to_string();
        let own_session = session_id.clone();

        tokio::spawn(read_loop(read, tx, own_session));

        Ok((
            Self {
                write: Mutex::new(write),
                next_ref: AtomicU64::new(2),
                hub_sid: hub_sid.to_string(),
                session_id,
                scene_model_url,
                initial_user_data,
            },
            rx,
        ))
    }

    fn topic(&self) -> String {
        format!("hub:{}", self.hub_sid)
    }

    fn next_ref(&self) -> String {
        self.next_ref.fetch_add(1, Ordering::Relaxed).to_string()
    }
}

impl ChannelPort for ChannelClient {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn publish_naf(&self, payload: Value) -> Result<()> {
        let topic = self.topic();
        let r#ref = self.next_ref();
        let mut write = self.write.lock().await;
        send_frame(&mut write, &topic, "naf", payload, Some(&r#ref)).await
    }

    async fn publish_nafr(&self, payload: Value) -> Result<()> {
        let topic = self.topic();
        let r#ref = self.next_ref();
        let wrapped = json!({ "naf": payload.to_string() });
        let mut write = self.write.lock().await;
        send_frame(&mut write, &topic, "nafr", wrapped, Some(&r#ref)).await
    }

    async fn leave(&self) {
        let topic = self.topic();
        let r#ref = self.next_ref();
        let mut write = self.write.lock().await;
        let _ = send_frame(&mut write, &topic, "phx_leave", json!({}), Some(&r#ref)).await;
        let _ = write.close().await;
    }
}

struct IncomingFrame {
    event: String,
    payload: Value,
}

fn parse_incoming_frame(msg: &Message) -> Option<IncomingFrame> {
    let Message::Text(text) = msg else { return None };
    let value: Value = serde_json::from_str(text).ok()?;
    let event = value.get("event")?.as_str()?.to_string();
    let payload = value.get("payload").cloned().unwrap_or(Value::Null);
    Some(IncomingFrame { event, payload })
}

async fn send_frame(
    write: &mut WsSink,
    topic: &str,
    event: &str,
    payload: Value,
    r#ref: Option<&str>,
) -> Result<()> {
    let frame = json!({
        "topic": topic,
        "event": event,
        "payload": payload,
        "ref": r#ref,
    });
    write
        .send(Message::Text(frame.to_string().into()))
        .await
        .map_err(GhostRunnerError::Ws)
}

async fn read_loop(
    mut read: futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>,
    tx: mpsc::UnboundedSender<ChannelEvent>,
    own_session_id: String,
) {
    let mut previously_present: HashSet<String> = HashSet::new();

    while let Some(msg) = read.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                let _ = tx.send(ChannelEvent::Fatal(e.to_string()));
                return;
            }
        };
        if msg.is_close() {
            let _ = tx.send(ChannelEvent::Fatal("channel closed".into()));
            return;
        }
        let Some(frame) = parse_incoming_frame(&msg) else {
            continue;
        };

        match frame.event.as_str() {
            "message" => {
                if frame.payload.get("type").and_then(|t| t.as_str()) != Some(protocol::BOT_COMMAND)
                {
                    continue;
                }
                let Some(body) = frame.payload.get("body") else {
                    continue;
                };
                let (Some(bot_id), Some(command_type)) = (
                    body.get("bot_id").and_then(|v| v.as_str()),
                    body.get("type").and_then(|v| v.as_str()),
                ) else {
                    debug!("ignoring malformed bot_command body");
                    continue;
                };
                let waypoint = body.get("waypoint").and_then(|v| v.as_str()).map(str::to_string);
                let _ = tx.send(ChannelEvent::Command {
                    bot_id: bot_id.to_string(),
                    command_type: command_type.to_string(),
                    waypoint,
                });
            }
            "hub_refresh" => {
                let Some(hubs) = frame.payload.get("hubs").and_then(|h| h.as_array()) else {
                    continue;
                };
                let Some(user_data) = hubs.first().and_then(|h| h.get("user_data")) else {
                    continue;
                };
                let _ = tx.send(ChannelEvent::HubRefresh(user_data.clone()));
            }
            "presence_state" | "presence_diff" => {
                for key in apply_presence_event(
                    frame.event.as_str(),
                    &frame.payload,
                    &own_session_id,
                    &mut previously_present,
                ) {
                    let _ = tx.send(ChannelEvent::PresenceJoin { session_key: key });
                }
            }
            other => {
                debug!("ignoring unhandled channel event {:?}", other);
            }
        }
    }
    // Stream ended without an explicit close frame — still fatal.
    let _ = tx.send(ChannelEvent::Fatal("channel stream ended".into()));
}

/// Fold one `presence_state`/`presence_diff` payload into `previously_present`,
/// returning the session keys that are newly present as a result.
///
/// `presence_state` is a full snapshot keyed directly by session id;
/// `presence_diff` is incremental, shaped `{joins:{...}, leaves:{...}}` —
/// the two are not interchangeable, so each gets its own parse.
fn apply_presence_event(
    event: &str,
    payload: &Value,
    own_session_id: &str,
    previously_present: &mut HashSet<String>,
) -> Vec<String> {
    let mut newly_joined = Vec::new();
    match event {
        "presence_state" => {
            let Some(obj) = payload.as_object() else {
                return newly_joined;
            };
            let current: HashSet<String> = obj
                .keys()
                .filter(|k| k.as_str() != own_session_id)
                .cloned()
                .collect();
            newly_joined.extend(current.difference(&*previously_present).cloned());
            *previously_present = current;
        }
        "presence_diff" => {
            if let Some(joins) = payload.get("joins").and_then(|v| v.as_object()) {
                for key in joins.keys() {
                    if key == own_session_id {
                        continue;
                    }
                    if previously_present.insert(key.clone()) {
                        newly_joined.push(key.clone());
                    }
                }
            }
            if let Some(leaves) = payload.get("leaves").and_then(|v| v.as_object()) {
                for key in leaves.keys() {
                    previously_present.remove(key);
                }
            }
        }
        _ => {}
    }
    newly_joined
}

fn to_socket_url(base_url: &str) -> String {
    let (scheme, rest) = if let Some(rest) = base_url.strip_prefix("https://") {
        ("wss", rest)
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        ("ws", rest)
    } else {
        ("wss", base_url)
    };
    let rest = rest.trim_end_matches('/');
    format!("{}://{}/socket", scheme, rest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_https_to_wss() {
        assert_eq!(to_socket_url("https://meta-hubs.org"), "wss://meta-hubs.org/socket");
    }

    #[test]
    fn converts_http_to_ws_and_trims_trailing_slash() {
        assert_eq!(to_socket_url("http://localhost:4000/"), "ws://localhost:4000/socket");
    }

    #[test]
    fn presence_state_reports_only_newly_present_keys() {
        let mut present = HashSet::new();
        present.insert("already-here".to_string());
        let payload = json!({"already-here": {}, "new-peer": {}, "me": {}});
        let joined = apply_presence_event("presence_state", &payload, "me", &mut present);
        assert_eq!(joined, vec!["new-peer".to_string()]);
        assert!(present.contains("new-peer"));
    }

    #[test]
    fn presence_diff_reads_joins_and_leaves_instead_of_flattening() {
        let mut present = HashSet::new();
        present.insert("stale-peer".to_string());
        let payload = json!({
            "joins": {"new-peer": {}, "me": {}},
            "leaves": {"stale-peer": {}}
        });
        let joined = apply_presence_event("presence_diff", &payload, "me", &mut present);
        assert_eq!(joined, vec!["new-peer".to_string()]);
        assert!(!present.contains("stale-peer"));
        assert!(present.contains("new-peer"));
    }

    #[test]
    fn presence_diff_does_not_reemit_an_already_joined_peer() {
        let mut present = HashSet::new();
        let payload = json!({"joins": {"peer-a": {}}});
        let first = apply_presence_event("presence_diff", &payload, "me", &mut present);
        assert_eq!(first, vec!["peer-a".to_string()]);
        let second = apply_presence_event("presence_diff", &payload, "me", &mut present);
        assert!(second.is_empty());
    }
}
