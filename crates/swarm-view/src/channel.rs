//! Process-wide event channel over the hub websocket.
//!
//! One background task owns the socket. Views talk to it through a
//! [`ViewScope`], which registers handlers under `(event, view id)`, asserts
//! at most one room and may ask for the unscoped dashboard stream. Dropping
//! the scope releases all three.

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use swarm_core::wire::{
    decode_envelope, encode_msg, Envelope, JoinRoomPayload, ProtocolVersion, TogglePayload,
    WireMsg,
};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

/// Pseudo-event delivered when the connection comes up.
pub const CONNECT: &str = "connect";
/// Pseudo-event delivered when the connection drops.
pub const DISCONNECT: &str = "disconnect";

/// Handlers run on the connection task, one frame at a time. They must not
/// block and must not register or remove handlers themselves. A panicking
/// handler is logged and skipped.
pub type Handler = Box<dyn FnMut(&Envelope) + Send>;

type HandlerKey = (String, u64);

struct Shared {
    handlers: Mutex<BTreeMap<HandlerKey, Handler>>,
    rooms: Mutex<BTreeMap<u64, String>>,
    dashboards: Mutex<BTreeSet<u64>>,
    outbound: mpsc::UnboundedSender<String>,
    connected: AtomicBool,
    next_view: AtomicU64,
}

/// Cheap, cloneable handle to the shared connection.
#[derive(Clone)]
pub struct EventChannel {
    shared: Arc<Shared>,
}

impl EventChannel {
    fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let channel = Self {
            shared: Arc::new(Shared {
                handlers: Mutex::new(BTreeMap::new()),
                rooms: Mutex::new(BTreeMap::new()),
                dashboards: Mutex::new(BTreeSet::new()),
                outbound,
                connected: AtomicBool::new(false),
                next_view: AtomicU64::new(0),
            }),
        };
        (channel, rx)
    }

    /// Spawn the connection task. Must be called inside a tokio runtime; the
    /// task lives for the rest of the process.
    pub fn connect(url: Url) -> Self {
        let (channel, rx) = Self::new();
        tokio::spawn(connection_loop(channel.clone(), url, rx));
        channel
    }

    pub fn scope(&self) -> ViewScope {
        let view_id = self.shared.next_view.fetch_add(1, Ordering::SeqCst) + 1;
        ViewScope {
            channel: self.clone(),
            view_id,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    pub fn handler_count(&self) -> usize {
        lock(&self.shared.handlers).len()
    }

    fn send_frame(&self, msg: WireMsg) {
        if !self.is_connected() {
            debug!(event = "emit_dropped", kind = msg.event_name(), reason = "disconnected");
            return;
        }
        match encode_msg(None, msg) {
            Ok(frame) => {
                let _ = self.shared.outbound.send(frame);
            }
            Err(err) => warn!(event = "emit_encode_error", error = %err),
        }
    }

    /// Distinct rooms currently asserted by live views.
    fn asserted_rooms(&self) -> Vec<String> {
        let rooms = lock(&self.shared.rooms);
        let mut out: Vec<String> = rooms.values().cloned().collect();
        out.sort();
        out.dedup();
        out
    }

    fn wants_dashboard_stream(&self) -> bool {
        !lock(&self.shared.dashboards).is_empty()
    }

    /// Frames that restore this process's server-side state on a new socket.
    fn reassertions(&self) -> Vec<WireMsg> {
        let mut msgs: Vec<WireMsg> = self
            .asserted_rooms()
            .into_iter()
            .map(|agent_id| WireMsg::JoinAgentRoom(JoinRoomPayload { agent_id }))
            .collect();
        if self.wants_dashboard_stream() {
            msgs.push(WireMsg::DashboardStream(TogglePayload { enabled: true }));
        }
        msgs
    }

    fn set_connected(&self, connected: bool) {
        let was = self.shared.connected.swap(connected, Ordering::SeqCst);
        if was == connected {
            return;
        }
        let name = if connected { CONNECT } else { DISCONNECT };
        self.dispatch(&Envelope {
            version: ProtocolVersion::CURRENT,
            event: name.to_string(),
            timestamp: None,
            sender_id: None,
            payload: Value::Null,
        });
    }

    fn dispatch_frame(&self, data: &[u8]) {
        match decode_envelope(data) {
            Ok(envelope) => self.dispatch(&envelope),
            Err(err) => warn!(event = "frame_dropped", error = %err),
        }
    }

    fn dispatch(&self, envelope: &Envelope) {
        let mut handlers = lock(&self.shared.handlers);
        let start = (envelope.event.clone(), 0);
        let end = (envelope.event.clone(), u64::MAX);
        for ((_, view_id), handler) in handlers.range_mut(start..=end) {
            if panic::catch_unwind(AssertUnwindSafe(|| handler(envelope))).is_err() {
                warn!(event = "handler_panicked", kind = %envelope.event, view_id = *view_id);
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        warn!(event = "lock_poisoned");
        poisoned.into_inner()
    })
}

/// A view's registration on the shared channel.
pub struct ViewScope {
    channel: EventChannel,
    view_id: u64,
}

impl ViewScope {
    pub fn view_id(&self) -> u64 {
        self.view_id
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_connected()
    }

    /// Register `handler` for `event`, replacing this view's previous one.
    pub fn on<F>(&self, event: &str, handler: F)
    where
        F: FnMut(&Envelope) + Send + 'static,
    {
        lock(&self.channel.shared.handlers)
            .insert((event.to_string(), self.view_id), Box::new(handler));
    }

    /// Forward every listed event into one inbox, in arrival order.
    pub fn subscribe(&self, events: &[&str]) -> mpsc::UnboundedReceiver<Envelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        for name in events {
            let tx = tx.clone();
            self.on(name, move |envelope: &Envelope| {
                let _ = tx.send(envelope.clone());
            });
        }
        rx
    }

    pub fn off(&self, event: &str) {
        lock(&self.channel.shared.handlers).remove(&(event.to_string(), self.view_id));
    }

    /// Assert membership of `agent_id`'s room. Re-sent on every reconnect.
    pub fn join_room(&self, agent_id: &str) {
        lock(&self.channel.shared.rooms).insert(self.view_id, agent_id.to_string());
        self.channel.send_frame(WireMsg::JoinAgentRoom(JoinRoomPayload {
            agent_id: agent_id.to_string(),
        }));
    }

    /// Keep receiving the unscoped stream even when another view on this
    /// channel has joined a room. Re-sent on every reconnect.
    pub fn watch_all(&self) {
        lock(&self.channel.shared.dashboards).insert(self.view_id);
        self.channel
            .send_frame(WireMsg::DashboardStream(TogglePayload { enabled: true }));
    }

    pub fn emit(&self, msg: WireMsg) {
        self.channel.send_frame(msg);
    }
}

impl Drop for ViewScope {
    fn drop(&mut self) {
        let view_id = self.view_id;
        lock(&self.channel.shared.handlers).retain(|(_, owner), _| *owner != view_id);
        lock(&self.channel.shared.rooms).remove(&view_id);
        let released = {
            let mut dashboards = lock(&self.channel.shared.dashboards);
            dashboards.remove(&view_id) && dashboards.is_empty()
        };
        if released {
            self.channel
                .send_frame(WireMsg::DashboardStream(TogglePayload { enabled: false }));
        }
    }
}

async fn connection_loop(
    channel: EventChannel,
    url: Url,
    mut outbound: mpsc::UnboundedReceiver<String>,
) {
    let mut backoff = Duration::from_secs(1);
    loop {
        let (ws, _) = match connect_async(url.as_str()).await {
            Ok(value) => value,
            Err(err) => {
                warn!(event = "hub_connect_error", url = %url, error = %err);
                tokio::time::sleep(backoff).await;
                backoff = next_backoff(backoff);
                continue;
            }
        };
        backoff = Duration::from_secs(1);
        info!(event = "hub_connected", url = %url);

        let (mut sink, mut stream) = ws.split();
        channel.set_connected(true);
        let mut healthy = true;
        for msg in channel.reassertions() {
            let Ok(frame) = encode_msg(None, msg) else {
                continue;
            };
            if sink.send(Message::Text(frame)).await.is_err() {
                healthy = false;
                break;
            }
        }

        while healthy {
            tokio::select! {
                msg = stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => channel.dispatch_frame(text.as_bytes()),
                    Some(Ok(Message::Binary(bytes))) => channel.dispatch_frame(&bytes),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(event = "hub_read_error", error = %err);
                        break;
                    }
                },
                Some(frame) = outbound.recv() => {
                    if sink.send(Message::Text(frame)).await.is_err() {
                        break;
                    }
                }
            }
        }

        channel.set_connected(false);
        let mut dropped = 0usize;
        while outbound.try_recv().is_ok() {
            dropped += 1;
        }
        info!(event = "hub_disconnected", dropped = dropped);
        tokio::time::sleep(backoff).await;
        backoff = next_backoff(backoff);
    }
}

fn next_backoff(current: Duration) -> Duration {
    let next = current + current;
    if next > Duration::from_secs(10) {
        Duration::from_secs(10)
    } else {
        next
    }
}
