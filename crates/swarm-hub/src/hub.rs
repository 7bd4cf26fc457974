use crate::blackboard::{Blackboard, BoardError, Outbound};
use crate::config::Config;
use crate::rooms::RoomMembership;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use swarm_core::wire::{
    decode_envelope, encode_msg, event, Envelope, ErrorPayload, WireMsg, DEFAULT_MAX_FRAME_BYTES,
    HUB_SENDER_ID,
};

const CLOSE_POLICY: u16 = 1008;
const CLOSE_GOING_AWAY: u16 = 1001;
use swarm_core::LogPayload;
use tokio::sync::{mpsc, Mutex as AsyncMutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct Client {
    conn_id: String,
    remote: SocketAddr,
    sender: mpsc::Sender<Message>,
    last_seen: AsyncMutex<Instant>,
}

impl Client {
    async fn touch(&self) {
        let mut last = self.last_seen.lock().await;
        *last = Instant::now();
    }

    async fn last_seen(&self) -> Instant {
        *self.last_seen.lock().await
    }

    async fn send_text(&self, text: &str) -> bool {
        self.sender.send(Message::Text(text.to_string())).await.is_ok()
    }

    async fn close(&self, code: u16, reason: &str) {
        let _ = self
            .sender
            .send(Message::Close(Some(CloseFrame {
                code,
                reason: reason.to_string().into(),
            })))
            .await;
    }
}

/// Shared hub state: live sockets, their rooms and the blackboard.
pub struct HubState {
    config: Config,
    conn_counter: AtomicU64,
    clients: RwLock<HashMap<String, Arc<Client>>>,
    rooms: RwLock<RoomMembership>,
    board: AsyncMutex<Blackboard>,
}

impl HubState {
    pub fn new(config: Config) -> Self {
        Self {
            conn_counter: AtomicU64::new(0),
            clients: RwLock::new(HashMap::new()),
            rooms: RwLock::new(RoomMembership::default()),
            board: AsyncMutex::new(Blackboard::with_auto_trigger(config.auto_trigger)),
            config,
        }
    }

    fn next_conn_id(&self) -> String {
        let id = self.conn_counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("conn-{id}")
    }

    /// Run a blackboard mutation and publish what it emitted.
    ///
    /// The board lock is held until publishing finishes so every socket sees
    /// events in the order the board produced them.
    pub async fn mutate<T, F>(&self, apply: F) -> Result<T, BoardError>
    where
        F: FnOnce(&mut Blackboard) -> Result<(T, Vec<Outbound>), BoardError>,
    {
        let mut board = self.board.lock().await;
        let (value, events) = apply(&mut board)?;
        self.publish(&events).await;
        Ok(value)
    }

    /// Read-only access to the blackboard.
    pub async fn read<T>(&self, view: impl FnOnce(&Blackboard) -> T) -> T {
        let board = self.board.lock().await;
        view(&board)
    }

    async fn register_client(&self, client: Arc<Client>) {
        self.clients
            .write()
            .await
            .insert(client.conn_id.clone(), client.clone());
        info!(
            event = "client_connected",
            conn_id = %client.conn_id,
            remote = %client.remote
        );
    }

    async fn remove_client(&self, client: &Client, reason: &str) {
        let removed = self.clients.write().await.remove(&client.conn_id).is_some();
        if !removed {
            return;
        }
        let code = if reason == "shutdown" {
            CLOSE_GOING_AWAY
        } else {
            CLOSE_POLICY
        };
        client.close(code, reason).await;
        let room = self.rooms.write().await.forget(&client.conn_id);
        info!(
            event = "client_disconnected",
            conn_id = %client.conn_id,
            room = room.as_deref().unwrap_or(""),
            reason = reason
        );
    }

    async fn publish(&self, events: &[Outbound]) {
        for out in events {
            let frame = match encode_msg(Some(HUB_SENDER_ID), out.msg.clone()) {
                Ok(frame) => frame,
                Err(err) => {
                    warn!(event = "encode_error", kind = out.msg.event_name(), error = %err);
                    continue;
                }
            };
            let targets = self.snapshot_targets(out).await;
            debug!(
                event = "publish",
                kind = out.msg.event_name(),
                targets = targets.len()
            );
            for client in targets {
                if !client.send_text(&frame).await {
                    warn!(event = "send_error", conn_id = %client.conn_id);
                    self.remove_client(&client, "send_error").await;
                }
            }
        }
    }

    async fn snapshot_targets(&self, out: &Outbound) -> Vec<Arc<Client>> {
        let clients = self.clients.read().await;
        let rooms = self.rooms.read().await;
        rooms
            .targets(&out.route, clients.keys().map(String::as_str))
            .into_iter()
            .filter_map(|conn_id| clients.get(&conn_id).cloned())
            .collect()
    }

    async fn send_error(&self, client: &Client, code: &str, message: &str) {
        let msg = WireMsg::Error(ErrorPayload {
            code: code.to_string(),
            message: message.to_string(),
        });
        if let Ok(frame) = encode_msg(Some(HUB_SENDER_ID), msg) {
            let _ = client.send_text(&frame).await;
        }
    }

    /// Publish an Orchestrator notice.
    pub async fn announce(&self, message: &str) {
        let _ = self
            .mutate(|board| Ok(((), vec![board.service_log(message)])))
            .await;
    }

    /// Say goodbye and close every socket so clients start reconnecting.
    pub async fn shutdown(&self) {
        self.announce("Service stopped.").await;
        let clients = self
            .clients
            .read()
            .await
            .values()
            .cloned()
            .collect::<Vec<_>>();
        info!(event = "hub_shutdown", clients = clients.len());
        for client in clients {
            self.remove_client(&client, "shutdown").await;
        }
    }

    pub fn start_stale_reaper(self: Arc<Self>) -> Option<JoinHandle<()>> {
        if self.config.stale_seconds == 0 {
            return None;
        }
        let stale_after = Duration::from_secs(self.config.stale_seconds);
        let interval = stale_after / 2;
        let hub = self.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let clients = hub
                    .clients
                    .read()
                    .await
                    .values()
                    .cloned()
                    .collect::<Vec<_>>();
                for client in clients {
                    let last_seen = client.last_seen().await;
                    if Instant::now().duration_since(last_seen) > stale_after {
                        warn!(event = "stale_close", conn_id = %client.conn_id);
                        hub.remove_client(&client, "stale").await;
                    }
                }
            }
        });
        Some(task)
    }

    pub fn start_dispatch(self: Arc<Self>) -> Option<JoinHandle<()>> {
        if self.config.dispatch_interval.is_zero() {
            return None;
        }
        let interval = self.config.dispatch_interval;
        let hub = self.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let _ = hub.mutate(|board| Ok(((), board.dispatch()))).await;
            }
        });
        Some(task)
    }

    fn start_ping(self: Arc<Self>, client: Arc<Client>) {
        if self.config.ping_interval.is_zero() {
            return;
        }
        let interval = self.config.ping_interval;
        let hub = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if !hub.clients.read().await.contains_key(&client.conn_id) {
                    return;
                }
                if client.sender.send(Message::Ping(Vec::new())).await.is_err() {
                    hub.remove_client(&client, "ping_failed").await;
                    return;
                }
            }
        });
    }

    async fn handle_message(&self, client: &Client, envelope: &Envelope) {
        match envelope.event.as_str() {
            event::JOIN_AGENT_ROOM
            | event::DASHBOARD_STREAM
            | event::TOGGLE_AUTO_TRIGGER
            | event::AGENT_LOG => {}
            other => {
                warn!(event = "event_rejected", conn_id = %client.conn_id, kind = other);
                self.send_error(
                    client,
                    "unsupported_event",
                    &format!("clients may not emit {other}"),
                )
                .await;
                return;
            }
        }
        let msg = match envelope.decode_msg() {
            Ok(msg) => msg,
            Err(err) => {
                warn!(event = "payload_invalid", conn_id = %client.conn_id, error = %err);
                self.send_error(client, "invalid_payload", &err.to_string()).await;
                return;
            }
        };
        match msg {
            WireMsg::JoinAgentRoom(payload) => {
                if payload.agent_id.trim().is_empty() {
                    self.send_error(client, "invalid_payload", "agent_id must not be empty")
                        .await;
                    return;
                }
                let previous = self
                    .rooms
                    .write()
                    .await
                    .join(&client.conn_id, &payload.agent_id);
                info!(
                    event = "room_joined",
                    conn_id = %client.conn_id,
                    agent_id = %payload.agent_id,
                    previous = previous.as_deref().unwrap_or("")
                );
            }
            WireMsg::DashboardStream(payload) => {
                self.rooms
                    .write()
                    .await
                    .set_dashboard(&client.conn_id, payload.enabled);
                info!(
                    event = "dashboard_stream",
                    conn_id = %client.conn_id,
                    enabled = payload.enabled
                );
            }
            WireMsg::ToggleAutoTrigger(payload) => {
                let _ = self
                    .mutate(|board| Ok(((), board.set_auto_trigger(payload.enabled))))
                    .await;
            }
            WireMsg::AgentLog(payload) => self.relay_log(payload).await,
            _ => {}
        }
    }

    async fn relay_log(&self, payload: LogPayload) {
        let _ = self
            .mutate(|board| Ok(((), vec![board.add_log(payload)])))
            .await;
    }

    pub async fn handle_socket(self: Arc<Self>, socket: WebSocket, remote: SocketAddr) {
        let (mut ws_sender, mut ws_receiver) = socket.split();
        let (tx, mut rx) = mpsc::channel::<Message>(256);
        let write_timeout = self.config.write_timeout;
        let write_task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                let send = ws_sender.send(msg);
                match tokio::time::timeout(write_timeout, send).await {
                    Ok(Ok(())) if !closing => {}
                    _ => return,
                }
            }
        });

        let client = Arc::new(Client {
            conn_id: self.next_conn_id(),
            remote,
            sender: tx.clone(),
            last_seen: AsyncMutex::new(Instant::now()),
        });
        self.register_client(client.clone()).await;
        self.clone().start_ping(client.clone());

        while let Some(result) = ws_receiver.next().await {
            let msg = match result {
                Ok(value) => value,
                Err(err) => {
                    warn!(event = "read_error", conn_id = %client.conn_id, error = %err);
                    break;
                }
            };
            let data = match msg {
                Message::Text(text) => text.into_bytes(),
                Message::Binary(bytes) => bytes,
                Message::Close(_) => {
                    info!(event = "client_close", conn_id = %client.conn_id);
                    break;
                }
                Message::Ping(_) | Message::Pong(_) => {
                    client.touch().await;
                    continue;
                }
            };
            if data.len() > DEFAULT_MAX_FRAME_BYTES {
                warn!(event = "message_too_large", conn_id = %client.conn_id, size = data.len());
                continue;
            }
            client.touch().await;
            if self.config.debug {
                debug!(event = "message_received", conn_id = %client.conn_id, raw = %String::from_utf8_lossy(&data));
            }
            let envelope = match decode_envelope(&data) {
                Ok(value) => value,
                Err(err) => {
                    warn!(event = "message_invalid", conn_id = %client.conn_id, error = %err);
                    continue;
                }
            };
            self.handle_message(&client, &envelope).await;
        }

        self.remove_client(&client, "disconnect").await;
        drop(tx);
        let _ = write_task.await;
    }
}
