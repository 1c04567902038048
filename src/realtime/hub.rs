//! WebSocket connection hub. Each accepted socket gets a reader loop and one
//! writer task draining a bounded outbound queue, so a slow client never
//! blocks a broadcast; when its queue fills, frames are dropped for that
//! client alone.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};

use super::broadcast::{MessageSink, SendError};
use super::protocol::{ClientMessage, ControlMessage, PongReply};
use super::registry::SubscriptionRegistry;
use crate::auth::TokenValidator;
use crate::document::new_id;

/// How often the sweeper wakes to ping live connections and reap dead ones.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
/// A connection silent for this long is force-closed.
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);
const OUTBOUND_QUEUE: usize = 64;

#[derive(Debug, Clone)]
pub struct HubOptions {
    pub heartbeat_interval: Duration,
    pub client_timeout: Duration,
    pub outbound_queue: usize,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval: HEARTBEAT_INTERVAL,
            client_timeout: CLIENT_TIMEOUT,
            outbound_queue: OUTBOUND_QUEUE,
        }
    }
}

#[derive(Debug)]
enum Outbound {
    Text(String),
    Ping,
    Close,
}

struct ConnectionEntry {
    tx: mpsc::Sender<Outbound>,
    user_id: Option<String>,
    connected_at: DateTime<Utc>,
    last_heartbeat: Instant,
}

pub struct ConnectionHub {
    connections: RwLock<HashMap<String, ConnectionEntry>>,
    registry: Arc<SubscriptionRegistry>,
    validator: Arc<dyn TokenValidator>,
    options: HubOptions,
}

impl ConnectionHub {
    #[must_use]
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        validator: Arc<dyn TokenValidator>,
        options: HubOptions,
    ) -> Self {
        Self { connections: RwLock::new(HashMap::new()), registry, validator, options }
    }

    /// Accepts sockets forever. The caller binds the listener, so a busy
    /// port fails there rather than silently inside the loop; per-socket
    /// accept errors are logged and the loop keeps going.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        let sweeper = Arc::clone(&self);
        tokio::spawn(sweeper.run_heartbeat());
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let hub = Arc::clone(&self);
                    tokio::spawn(hub.handle_socket(stream, peer));
                }
                Err(e) => {
                    log::warn!("accept failed: {e}");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    /// Queues `message` on one connection's outbound queue without blocking.
    ///
    /// # Errors
    /// `UnknownConnection` for an unregistered id, `QueueFull` when the
    /// client is too slow to drain its queue, `Closed` mid-teardown.
    pub fn send(&self, connection_id: &str, message: &str) -> Result<(), SendError> {
        let connections = self.connections.read();
        let entry =
            connections.get(connection_id).ok_or(SendError::UnknownConnection)?;
        entry.tx.try_send(Outbound::Text(message.to_string())).map_err(|e| match e {
            TrySendError::Full(_) => SendError::QueueFull,
            TrySendError::Closed(_) => SendError::Closed,
        })
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Force-closes a connection: a close frame is queued for the writer,
    /// then the entry and all its subscriptions are dropped. Idempotent, so
    /// the reader's own teardown can race it safely.
    pub fn close(&self, connection_id: &str) {
        let entry = self.connections.write().remove(connection_id);
        if let Some(entry) = entry {
            let _ = entry.tx.try_send(Outbound::Close);
            let dropped = self.registry.remove_all(connection_id);
            let age = Utc::now().signed_duration_since(entry.connected_at).num_seconds();
            log::info!(
                "connection {connection_id} closed after {age}s, {dropped} subscriptions dropped"
            );
        }
    }

    async fn handle_socket(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let mut token = None;
        let ws = match tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
            token = extract_token(req);
            Ok(resp)
        })
        .await
        {
            Ok(ws) => ws,
            Err(e) => {
                log::debug!("websocket handshake from {peer} failed: {e}");
                return;
            }
        };

        // A bad token downgrades to anonymous rather than refusing the socket.
        let user_id = token.as_deref().and_then(|t| match self.validator.validate(t) {
            Some(claims) => Some(claims.subject_id),
            None => {
                log::warn!("invalid token from {peer}; continuing anonymously");
                None
            }
        });

        let connection_id = new_id();
        let (out_tx, out_rx) = mpsc::channel(self.options.outbound_queue);
        self.register(&connection_id, out_tx, user_id);
        log::info!("connection {connection_id} opened from {peer}");

        let (sink, mut frames) = ws.split();
        let writer = tokio::spawn(drain_outbound(out_rx, sink));
        self.reply(
            &connection_id,
            &ControlMessage::Welcome {
                connection_id: connection_id.clone(),
                timestamp: Utc::now(),
            },
        );

        while let Some(frame) = frames.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    self.touch(&connection_id);
                    self.handle_frame(&connection_id, &text);
                }
                // any traffic proves the peer alive; pings are answered by
                // the protocol layer underneath
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_)) => {
                    self.touch(&connection_id);
                }
                Ok(Message::Close(_)) => break,
                Ok(Message::Frame(_)) => {}
                Err(e) => {
                    log::debug!("connection {connection_id} read error: {e}");
                    break;
                }
            }
        }

        self.close(&connection_id);
        let _ = writer.await;
    }

    /// Dispatches one inbound text frame. A malformed frame earns an error
    /// reply but never closes the connection.
    fn handle_frame(&self, connection_id: &str, text: &str) {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(ClientMessage::Subscribe { collection, document_id, query }) => {
                let user_id = self.user_of(connection_id);
                let subscription = self.registry.add(
                    connection_id,
                    &collection,
                    document_id.as_deref(),
                    query,
                    user_id.as_deref(),
                );
                log::debug!(
                    "connection {connection_id} subscribed to {collection}{}",
                    subscription.document_id.as_deref().map(|d| format!(":{d}")).unwrap_or_default()
                );
                self.reply(
                    connection_id,
                    &ControlMessage::Subscribed {
                        subscription_id: subscription.id,
                        collection: subscription.collection,
                        document_id: subscription.document_id,
                    },
                );
            }
            Ok(ClientMessage::Unsubscribe { collection, document_id }) => {
                self.registry.remove(connection_id, &collection, document_id.as_deref());
                self.reply(connection_id, &ControlMessage::Unsubscribed);
            }
            Ok(ClientMessage::Ping) => self.reply(connection_id, &PongReply::Pong),
            Err(e) => {
                log::debug!("connection {connection_id} sent an unreadable frame: {e}");
                self.reply(
                    connection_id,
                    &ControlMessage::Error { message: format!("unrecognized message: {e}") },
                );
            }
        }
    }

    /// Pings every live connection and reaps the ones silent past the
    /// timeout. Returns the ids that were closed.
    fn sweep_idle(&self) -> Vec<String> {
        let now = Instant::now();
        let mut idle = Vec::new();
        {
            let connections = self.connections.read();
            for (id, entry) in connections.iter() {
                if now.duration_since(entry.last_heartbeat) > self.options.client_timeout {
                    idle.push(id.clone());
                } else if let Err(e) = entry.tx.try_send(Outbound::Ping) {
                    log::debug!("heartbeat ping to {id} not queued: {e}");
                }
            }
        }
        for id in &idle {
            log::warn!("connection {id} timed out without a heartbeat");
            self.close(id);
        }
        idle
    }

    async fn run_heartbeat(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.options.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.sweep_idle();
        }
    }

    fn register(&self, connection_id: &str, tx: mpsc::Sender<Outbound>, user_id: Option<String>) {
        self.connections.write().insert(
            connection_id.to_string(),
            ConnectionEntry { tx, user_id, connected_at: Utc::now(), last_heartbeat: Instant::now() },
        );
    }

    fn touch(&self, connection_id: &str) {
        if let Some(entry) = self.connections.write().get_mut(connection_id) {
            entry.last_heartbeat = Instant::now();
        }
    }

    fn user_of(&self, connection_id: &str) -> Option<String> {
        self.connections.read().get(connection_id).and_then(|e| e.user_id.clone())
    }

    fn reply<T: Serialize>(&self, connection_id: &str, message: &T) {
        match serde_json::to_string(message) {
            Ok(wire) => {
                if let Err(e) = self.send(connection_id, &wire) {
                    log::debug!("reply to {connection_id} not delivered: {e}");
                }
            }
            Err(e) => log::error!("reply serialization failed: {e}"),
        }
    }
}

impl MessageSink for ConnectionHub {
    fn send(&self, connection_id: &str, message: &str) -> Result<(), SendError> {
        ConnectionHub::send(self, connection_id, message)
    }
}

async fn drain_outbound(
    mut rx: mpsc::Receiver<Outbound>,
    mut sink: SplitSink<WebSocketStream<TcpStream>, Message>,
) {
    while let Some(out) = rx.recv().await {
        let result = match out {
            Outbound::Text(text) => sink.send(Message::Text(text)).await,
            Outbound::Ping => sink.send(Message::Ping(Vec::new())).await,
            Outbound::Close => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        };
        if result.is_err() {
            break;
        }
    }
    let _ = sink.close().await;
}

fn extract_token(request: &Request) -> Option<String> {
    if let Some(query) = request.uri().query() {
        for pair in query.split('&') {
            if let Some(value) = pair.strip_prefix("token=") {
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }
    let header = request.headers().get("authorization")?.to_str().ok()?;
    header.strip_prefix("Bearer ").map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::NullValidator;

    fn hub() -> (Arc<ConnectionHub>, Arc<SubscriptionRegistry>) {
        let registry = Arc::new(SubscriptionRegistry::new());
        let hub = Arc::new(ConnectionHub::new(
            Arc::clone(&registry),
            Arc::new(NullValidator),
            HubOptions::default(),
        ));
        (hub, registry)
    }

    #[test]
    fn token_comes_from_query_param_or_bearer_header() {
        let request =
            Request::builder().uri("ws://localhost/ws?foo=1&token=abc").body(()).unwrap();
        assert_eq!(extract_token(&request).as_deref(), Some("abc"));

        let request = Request::builder()
            .uri("ws://localhost/ws")
            .header("Authorization", "Bearer xyz")
            .body(())
            .unwrap();
        assert_eq!(extract_token(&request).as_deref(), Some("xyz"));

        let request = Request::builder().uri("ws://localhost/ws").body(()).unwrap();
        assert!(extract_token(&request).is_none());
    }

    #[tokio::test]
    async fn send_to_unknown_connection_fails() {
        let (hub, _registry) = hub();
        assert_eq!(hub.send("ghost", "x"), Err(SendError::UnknownConnection));
    }

    #[tokio::test]
    async fn full_outbound_queue_reports_backpressure() {
        let (hub, _registry) = hub();
        let (tx, _rx) = mpsc::channel(1);
        hub.register("conn-a", tx, None);
        assert!(hub.send("conn-a", "one").is_ok());
        assert_eq!(hub.send("conn-a", "two"), Err(SendError::QueueFull));
    }

    #[tokio::test]
    async fn subscribe_frame_registers_and_acks() {
        let (hub, registry) = hub();
        let (tx, mut rx) = mpsc::channel(8);
        hub.register("conn-a", tx, Some("user-1".to_string()));

        hub.handle_frame("conn-a", r#"{"action":"subscribe","collection":"products"}"#);
        assert_eq!(registry.len(), 1);
        let Ok(Outbound::Text(ack)) = rx.try_recv() else { panic!("no ack queued") };
        let ack: serde_json::Value = serde_json::from_str(&ack).unwrap();
        assert_eq!(ack["type"], "subscribed");
        assert_eq!(ack["collection"], "products");
    }

    #[tokio::test]
    async fn malformed_frame_gets_an_error_reply_and_keeps_the_connection() {
        let (hub, registry) = hub();
        let (tx, mut rx) = mpsc::channel(8);
        hub.register("conn-a", tx, None);

        hub.handle_frame("conn-a", r#"{"action":"warp"}"#);
        assert!(registry.is_empty());
        let Ok(Outbound::Text(reply)) = rx.try_recv() else { panic!("no reply queued") };
        let reply: serde_json::Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(reply["type"], "error");
        assert_eq!(hub.connection_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_connections_are_swept_and_unsubscribed() {
        let (hub, registry) = hub();
        let (tx, mut rx) = mpsc::channel(8);
        hub.register("conn-a", tx, None);
        registry.add("conn-a", "products", None, None, None);

        tokio::time::advance(Duration::from_secs(61)).await;
        let closed = hub.sweep_idle();
        assert_eq!(closed, vec!["conn-a".to_string()]);
        assert_eq!(hub.connection_count(), 0);
        assert!(registry.is_empty());
        assert!(matches!(rx.try_recv(), Ok(Outbound::Close)));
    }

    #[tokio::test(start_paused = true)]
    async fn live_connections_get_pinged_not_closed() {
        let (hub, _registry) = hub();
        let (tx, mut rx) = mpsc::channel(8);
        hub.register("conn-a", tx, None);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(hub.sweep_idle().is_empty());
        assert!(matches!(rx.try_recv(), Ok(Outbound::Ping)));
        assert_eq!(hub.connection_count(), 1);
    }
}
