// Sync channel client: transport abstraction and connection manager.
//
// Manages a client's connection to the relay for one canvas topic:
// the hello handshake, subscription (which doubles as the snapshot
// request closing any reconnection gap), event mapping, reconnection
// backoff, and a bounded queue of mutations published while offline.
//
// Transport is abstracted via `SyncTransport` for testability; the
// tokio-tungstenite implementation lives in `ws`.

pub mod ws;

use std::collections::VecDeque;
use std::net::IpAddr;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info};
use url::Url;

use easel_common::error::SyncError;
use easel_common::mutation::ShapeMutation;
use easel_common::presence::PresenceRecord;
use easel_common::protocol::{WsMessage, CURRENT_PROTOCOL_VERSION};
use easel_common::types::{Shape, TimestampMs};

/// Queue bound for mutations buffered while disconnected.
const MAX_PENDING_MUTATIONS: usize = 10_000;

/// Connection parameters for one canvas topic.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Relay WebSocket URL (e.g. "wss://relay.example.com/v1/ws").
    pub ws_url: String,
    pub canvas_id: String,
    pub user_id: String,
    pub display_name: String,
}

/// Reconnection parameters.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
            max_attempts: u32::MAX, // retry indefinitely
        }
    }
}

/// Current state of the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events surfaced to the canvas session.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Successfully connected and subscribed.
    Connected,
    /// Full shape set for the canvas (join or reconnection gap).
    Snapshot { canvas_id: String, shapes: Vec<Shape>, last_updated: TimestampMs },
    /// A remote shape mutation.
    RemoteMutation { canvas_id: String, mutation: ShapeMutation },
    /// A remote presence update.
    RemotePresence { canvas_id: String, record: PresenceRecord },
    /// A user left the canvas.
    PresenceLeft { canvas_id: String, user_id: String },
    /// Connection lost; the caller decides when to reconnect.
    Disconnected { reason: String },
    /// A protocol error from the relay.
    ProtocolError { code: String, message: String, retryable: bool },
}

/// Abstraction over the socket for testability.
///
/// In production this is the tokio-tungstenite transport in [`ws`]; in
/// tests it is a mock that records sent frames and replays queued ones.
#[allow(async_fn_in_trait)]
pub trait SyncTransport {
    /// Open the socket.
    async fn connect(&mut self, ws_url: &str) -> Result<()>;
    /// Send one message.
    async fn send(&mut self, message: &WsMessage) -> Result<()>;
    /// Receive the next message. `None` on clean close.
    async fn recv(&mut self) -> Result<Option<WsMessage>>;
    /// Close the socket.
    async fn close(&mut self);
}

/// Manages the relay connection lifecycle for one canvas.
pub struct SyncConnection<T: SyncTransport> {
    config: ChannelConfig,
    reconnect_policy: ReconnectPolicy,
    transport: T,
    state: ConnectionState,
    pending: VecDeque<ShapeMutation>,
    pending_capacity: usize,
    consecutive_failures: u32,
}

impl<T: SyncTransport> SyncConnection<T> {
    pub fn new(config: ChannelConfig, transport: T) -> Self {
        Self {
            config,
            reconnect_policy: ReconnectPolicy::default(),
            transport,
            state: ConnectionState::Disconnected,
            pending: VecDeque::new(),
            pending_capacity: MAX_PENDING_MUTATIONS,
            consecutive_failures: 0,
        }
    }

    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect_policy = policy;
        self
    }

    /// Override the offline queue bound (for testing backpressure).
    pub fn with_pending_capacity(mut self, capacity: usize) -> Self {
        self.pending_capacity = capacity;
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Attempt to connect (or reconnect) to the relay.
    ///
    /// On success the canvas subscription is re-established — the relay
    /// answers a subscribe with a fresh snapshot, closing any
    /// reconnection gap — and mutations queued while offline are
    /// replayed in order.
    pub async fn connect(&mut self) -> Result<ChannelEvent> {
        validate_ws_url(&self.config.ws_url)?;
        self.state = ConnectionState::Connecting;

        if let Err(error) = self.transport.connect(&self.config.ws_url).await {
            return Ok(self.fail(format!("websocket connection failed: {error}")));
        }

        let hello = WsMessage::Hello {
            protocol: CURRENT_PROTOCOL_VERSION.to_string(),
            user_id: self.config.user_id.clone(),
            display_name: self.config.display_name.clone(),
        };
        if let Err(error) = self.transport.send(&hello).await {
            self.transport.close().await;
            return Ok(self.fail(format!("failed to send hello: {error}")));
        }

        match self.transport.recv().await {
            Ok(Some(WsMessage::HelloAck { .. })) => {}
            Ok(Some(WsMessage::Error { code, message, .. })) => {
                self.transport.close().await;
                return Ok(self.fail(format!("hello rejected: {code}: {message}")));
            }
            Ok(Some(_)) => {
                self.transport.close().await;
                return Ok(self.fail("unexpected message in response to hello".to_string()));
            }
            Ok(None) => {
                return Ok(self.fail("connection closed during handshake".to_string()));
            }
            Err(error) => {
                self.transport.close().await;
                return Ok(self.fail(format!("error during handshake: {error}")));
            }
        }

        let subscribe = WsMessage::Subscribe { canvas_id: self.config.canvas_id.clone() };
        if let Err(error) = self.transport.send(&subscribe).await {
            self.transport.close().await;
            return Ok(self.fail(format!("failed to subscribe: {error}")));
        }

        // Replay mutations queued while offline, oldest first.
        while let Some(mutation) = self.pending.pop_front() {
            let message = WsMessage::Mutation {
                canvas_id: self.config.canvas_id.clone(),
                mutation: mutation.clone(),
            };
            if let Err(error) = self.transport.send(&message).await {
                self.pending.push_front(mutation);
                self.transport.close().await;
                return Ok(self.fail(format!("failed to replay queued mutation: {error}")));
            }
        }

        self.state = ConnectionState::Connected;
        self.consecutive_failures = 0;
        info!(canvas_id = %self.config.canvas_id, "sync channel connected");
        Ok(ChannelEvent::Connected)
    }

    /// Publish a mutation. While offline the mutation is queued for
    /// replay; only queue exhaustion is an error.
    pub async fn publish(&mut self, mutation: ShapeMutation) -> Result<(), SyncError> {
        if self.state != ConnectionState::Connected {
            return self.enqueue(mutation);
        }

        let message = WsMessage::Mutation {
            canvas_id: self.config.canvas_id.clone(),
            mutation: mutation.clone(),
        };
        if let Err(error) = self.transport.send(&message).await {
            debug!(?error, "publish failed, queueing for replay");
            self.state = ConnectionState::Disconnected;
            self.consecutive_failures += 1;
            return self.enqueue(mutation);
        }
        Ok(())
    }

    /// Publish presence, fire-and-forget: dropped silently while offline,
    /// never queued.
    pub async fn publish_presence(&mut self, record: PresenceRecord) {
        if self.state != ConnectionState::Connected {
            return;
        }
        let message =
            WsMessage::Presence { canvas_id: self.config.canvas_id.clone(), record };
        if let Err(error) = self.transport.send(&message).await {
            debug!(?error, "presence publish failed");
            self.state = ConnectionState::Disconnected;
            self.consecutive_failures += 1;
        }
    }

    /// Explicitly request a fresh snapshot.
    pub async fn request_snapshot(&mut self) -> Result<()> {
        let message = WsMessage::SnapshotRequest { canvas_id: self.config.canvas_id.clone() };
        self.transport.send(&message).await
    }

    /// Await the next event from the relay.
    pub async fn recv_event(&mut self) -> Result<Option<ChannelEvent>> {
        if self.state != ConnectionState::Connected {
            anyhow::bail!("cannot receive: not connected");
        }

        match self.transport.recv().await {
            Ok(Some(WsMessage::Snapshot { canvas_id, shapes, last_updated })) => {
                Ok(Some(ChannelEvent::Snapshot { canvas_id, shapes, last_updated }))
            }
            Ok(Some(WsMessage::Mutation { canvas_id, mutation })) => {
                Ok(Some(ChannelEvent::RemoteMutation { canvas_id, mutation }))
            }
            Ok(Some(WsMessage::Presence { canvas_id, record })) => {
                Ok(Some(ChannelEvent::RemotePresence { canvas_id, record }))
            }
            Ok(Some(WsMessage::PresenceLeave { canvas_id, user_id })) => {
                Ok(Some(ChannelEvent::PresenceLeft { canvas_id, user_id }))
            }
            Ok(Some(WsMessage::Error { code, message, retryable })) => {
                Ok(Some(ChannelEvent::ProtocolError { code, message, retryable }))
            }
            Ok(Some(_)) => {
                // Ignore unexpected message types.
                Ok(None)
            }
            Ok(None) => {
                self.state = ConnectionState::Disconnected;
                self.consecutive_failures += 1;
                Ok(Some(ChannelEvent::Disconnected {
                    reason: "connection closed by server".to_string(),
                }))
            }
            Err(error) => {
                self.state = ConnectionState::Disconnected;
                self.consecutive_failures += 1;
                Ok(Some(ChannelEvent::Disconnected { reason: error.to_string() }))
            }
        }
    }

    /// Clean shutdown: explicit presence removal, then close.
    pub async fn disconnect(&mut self) {
        if self.state == ConnectionState::Connected {
            let leave = WsMessage::PresenceLeave {
                canvas_id: self.config.canvas_id.clone(),
                user_id: self.config.user_id.clone(),
            };
            let _ = self.transport.send(&leave).await;
        }
        self.transport.close().await;
        self.state = ConnectionState::Disconnected;
    }

    /// Compute the backoff delay for the next reconnection attempt.
    pub fn reconnect_delay(&self) -> Duration {
        let exp = self.consecutive_failures.min(7);
        let delay =
            DurationSaturatingMul::saturating_mul(self.reconnect_policy.base_delay, 1u64 << exp);
        delay.min(self.reconnect_policy.max_delay)
    }

    /// Whether another reconnection attempt is allowed.
    pub fn should_reconnect(&self) -> bool {
        self.consecutive_failures < self.reconnect_policy.max_attempts
    }

    fn enqueue(&mut self, mutation: ShapeMutation) -> Result<(), SyncError> {
        if self.pending.len() >= self.pending_capacity {
            return Err(SyncError::ChannelUnavailable {
                reason: format!("offline queue full ({} mutations)", self.pending.len()),
            });
        }
        self.pending.push_back(mutation);
        Ok(())
    }

    fn fail(&mut self, reason: String) -> ChannelEvent {
        self.state = ConnectionState::Disconnected;
        self.consecutive_failures += 1;
        ChannelEvent::Disconnected { reason }
    }
}

fn validate_ws_url(value: &str) -> Result<()> {
    let parsed =
        Url::parse(value).map_err(|error| anyhow::anyhow!("invalid ws_url `{value}`: {error}"))?;
    match parsed.scheme() {
        "wss" => Ok(()),
        "ws" if is_loopback_host(parsed.host_str()) => Ok(()),
        _ => anyhow::bail!("ws_url must use wss (ws is allowed only for localhost testing)"),
    }
}

fn is_loopback_host(host: Option<&str>) -> bool {
    let Some(host) = host else {
        return false;
    };
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    host.parse::<IpAddr>().is_ok_and(|addr| addr.is_loopback())
}

// ── Backoff helper (for Duration::saturating_mul with u64) ──────────

trait DurationSaturatingMul {
    fn saturating_mul(self, rhs: u64) -> Self;
}

impl DurationSaturatingMul for Duration {
    fn saturating_mul(self, rhs: u64) -> Self {
        let nanos = self.as_nanos().saturating_mul(rhs as u128);
        if nanos > u64::MAX as u128 {
            Duration::from_secs(u64::MAX)
        } else {
            Duration::from_nanos(nanos as u64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use easel_common::patch::ShapePatch;
    use easel_common::types::{Shape, ShapeKind};
    use std::collections::VecDeque;

    // ── Mock transport ──────────────────────────────────────────────

    #[derive(Debug, Default)]
    struct MockTransport {
        /// Responses returned by recv() in order.
        recv_queue: VecDeque<Option<WsMessage>>,
        /// Messages sent via send().
        sent: Vec<WsMessage>,
        /// Whether connect was called.
        connected: bool,
        /// If set, connect returns this error.
        connect_error: Option<String>,
        /// Fail the Nth send (0-based) once.
        fail_send_at: Option<usize>,
        closed: bool,
    }

    impl MockTransport {
        fn with_hello_ack() -> Self {
            let mut transport = Self::default();
            transport.queue_recv(WsMessage::HelloAck { server_time: 1 });
            transport
        }

        fn queue_recv(&mut self, message: WsMessage) {
            self.recv_queue.push_back(Some(message));
        }

        fn queue_close(&mut self) {
            self.recv_queue.push_back(None);
        }
    }

    impl SyncTransport for MockTransport {
        async fn connect(&mut self, _ws_url: &str) -> Result<()> {
            if let Some(error) = &self.connect_error {
                anyhow::bail!("{error}");
            }
            self.connected = true;
            Ok(())
        }

        async fn send(&mut self, message: &WsMessage) -> Result<()> {
            if self.fail_send_at == Some(self.sent.len()) {
                self.fail_send_at = None;
                anyhow::bail!("send failed");
            }
            self.sent.push(message.clone());
            Ok(())
        }

        async fn recv(&mut self) -> Result<Option<WsMessage>> {
            Ok(self.recv_queue.pop_front().flatten())
        }

        async fn close(&mut self) {
            self.closed = true;
            self.connected = false;
        }
    }

    fn test_config() -> ChannelConfig {
        ChannelConfig {
            ws_url: "ws://127.0.0.1:8080/v1/ws".to_string(),
            canvas_id: "canvas-1".to_string(),
            user_id: "alice".to_string(),
            display_name: "Alice".to_string(),
        }
    }

    fn move_mutation(timestamp: i64) -> ShapeMutation {
        ShapeMutation::Update {
            shape_id: "s1".into(),
            fields: ShapePatch::position(1.0, 2.0),
            user_id: "alice".into(),
            timestamp,
        }
    }

    // ── Connection lifecycle ────────────────────────────────────────

    #[tokio::test]
    async fn connect_happy_path_sends_hello_then_subscribe() {
        let transport = MockTransport::with_hello_ack();
        let mut connection = SyncConnection::new(test_config(), transport);

        let event = connection.connect().await.expect("connect should succeed");
        assert_eq!(event, ChannelEvent::Connected);
        assert_eq!(connection.state(), ConnectionState::Connected);

        let sent = &connection.transport.sent;
        assert!(matches!(&sent[0], WsMessage::Hello { user_id, .. } if user_id == "alice"));
        assert!(matches!(&sent[1], WsMessage::Subscribe { canvas_id } if canvas_id == "canvas-1"));
    }

    #[tokio::test]
    async fn connect_rejects_plain_ws_off_loopback() {
        let mut config = test_config();
        config.ws_url = "ws://relay.example.com/v1/ws".to_string();
        let mut connection = SyncConnection::new(config, MockTransport::with_hello_ack());

        let error = connection.connect().await.expect_err("insecure url should be rejected");
        assert!(error.to_string().contains("must use wss"));
    }

    #[tokio::test]
    async fn wss_is_accepted_for_remote_hosts() {
        let mut config = test_config();
        config.ws_url = "wss://relay.example.com/v1/ws".to_string();
        let mut connection = SyncConnection::new(config, MockTransport::with_hello_ack());
        let event = connection.connect().await.expect("connect should succeed");
        assert_eq!(event, ChannelEvent::Connected);
    }

    #[tokio::test]
    async fn connect_failure_reports_disconnected_event() {
        let mut transport = MockTransport::default();
        transport.connect_error = Some("refused".to_string());
        let mut connection = SyncConnection::new(test_config(), transport);

        match connection.connect().await.expect("connect should return an event") {
            ChannelEvent::Disconnected { reason } => {
                assert!(reason.contains("websocket connection failed"));
            }
            other => panic!("expected disconnected event, got {other:?}"),
        }
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn hello_rejection_disconnects() {
        let mut transport = MockTransport::default();
        transport.queue_recv(WsMessage::Error {
            code: "SYNC_PROTOCOL_UNSUPPORTED".into(),
            message: "bad protocol".into(),
            retryable: false,
        });
        let mut connection = SyncConnection::new(test_config(), transport);

        match connection.connect().await.expect("connect should return an event") {
            ChannelEvent::Disconnected { reason } => assert!(reason.contains("hello rejected")),
            other => panic!("expected disconnected event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn close_during_handshake_disconnects() {
        let mut transport = MockTransport::default();
        transport.queue_close();
        let mut connection = SyncConnection::new(test_config(), transport);

        match connection.connect().await.expect("connect should return an event") {
            ChannelEvent::Disconnected { reason } => {
                assert!(reason.contains("closed during handshake"));
            }
            other => panic!("expected disconnected event, got {other:?}"),
        }
    }

    // ── Offline queue ───────────────────────────────────────────────

    #[tokio::test]
    async fn publish_while_offline_queues_for_replay() {
        let mut connection = SyncConnection::new(test_config(), MockTransport::with_hello_ack());

        connection.publish(move_mutation(1)).await.expect("offline publish should queue");
        connection.publish(move_mutation(2)).await.expect("offline publish should queue");
        assert_eq!(connection.pending_len(), 2);

        connection.connect().await.expect("connect should succeed");
        assert_eq!(connection.pending_len(), 0);

        // Hello, subscribe, then the two queued mutations in order.
        let sent = &connection.transport.sent;
        assert_eq!(sent.len(), 4);
        match (&sent[2], &sent[3]) {
            (
                WsMessage::Mutation { mutation: first, .. },
                WsMessage::Mutation { mutation: second, .. },
            ) => {
                assert_eq!(first.timestamp(), 1);
                assert_eq!(second.timestamp(), 2);
            }
            other => panic!("expected queued mutations to replay, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn offline_queue_overflow_is_channel_unavailable() {
        let mut connection = SyncConnection::new(test_config(), MockTransport::default())
            .with_pending_capacity(2);

        connection.publish(move_mutation(1)).await.expect("first queues");
        connection.publish(move_mutation(2)).await.expect("second queues");
        let error = connection.publish(move_mutation(3)).await.expect_err("third overflows");
        assert!(matches!(error, SyncError::ChannelUnavailable { .. }));
    }

    #[tokio::test]
    async fn failed_send_requeues_the_mutation() {
        let mut transport = MockTransport::with_hello_ack();
        transport.fail_send_at = Some(2); // hello + subscribe succeed, next send fails
        let mut connection = SyncConnection::new(test_config(), transport);
        connection.connect().await.expect("connect should succeed");

        connection.publish(move_mutation(5)).await.expect("failed publish should queue");
        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert_eq!(connection.pending_len(), 1);
    }

    #[tokio::test]
    async fn presence_is_dropped_while_offline() {
        let mut connection = SyncConnection::new(test_config(), MockTransport::default());
        connection.publish_presence(PresenceRecord::new("alice", "Alice", 1)).await;
        assert!(connection.transport.sent.is_empty());
        assert_eq!(connection.pending_len(), 0);
    }

    // ── Event mapping ───────────────────────────────────────────────

    #[tokio::test]
    async fn recv_event_maps_protocol_messages() {
        let mut transport = MockTransport::with_hello_ack();
        transport.queue_recv(WsMessage::Snapshot {
            canvas_id: "canvas-1".into(),
            shapes: vec![Shape::new("s1", ShapeKind::Rectangle, "bob", 1)],
            last_updated: 1,
        });
        transport.queue_recv(WsMessage::Mutation {
            canvas_id: "canvas-1".into(),
            mutation: move_mutation(9),
        });
        transport.queue_recv(WsMessage::PresenceLeave {
            canvas_id: "canvas-1".into(),
            user_id: "bob".into(),
        });
        transport.queue_close();

        let mut connection = SyncConnection::new(test_config(), transport);
        connection.connect().await.expect("connect should succeed");

        assert!(matches!(
            connection.recv_event().await.expect("snapshot event"),
            Some(ChannelEvent::Snapshot { ref shapes, .. }) if shapes.len() == 1
        ));
        assert!(matches!(
            connection.recv_event().await.expect("mutation event"),
            Some(ChannelEvent::RemoteMutation { .. })
        ));
        assert!(matches!(
            connection.recv_event().await.expect("leave event"),
            Some(ChannelEvent::PresenceLeft { ref user_id, .. }) if user_id == "bob"
        ));
        match connection.recv_event().await.expect("close event") {
            Some(ChannelEvent::Disconnected { .. }) => {}
            other => panic!("expected disconnected, got {other:?}"),
        }
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }

    // ── Backoff ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn reconnect_delay_doubles_and_caps() {
        let mut transport = MockTransport::default();
        transport.connect_error = Some("refused".to_string());
        let mut connection = SyncConnection::new(test_config(), transport);

        assert_eq!(connection.reconnect_delay(), Duration::from_millis(250));

        connection.connect().await.expect("attempt 1");
        assert_eq!(connection.reconnect_delay(), Duration::from_millis(500));

        connection.connect().await.expect("attempt 2");
        assert_eq!(connection.reconnect_delay(), Duration::from_millis(1_000));

        for _ in 0..10 {
            connection.connect().await.expect("attempt");
        }
        assert_eq!(connection.reconnect_delay(), Duration::from_secs(30));
        assert!(connection.should_reconnect());
    }

    #[tokio::test]
    async fn successful_connect_resets_backoff() {
        let mut transport = MockTransport::default();
        transport.connect_error = Some("refused".to_string());
        let mut connection = SyncConnection::new(test_config(), transport);
        connection.connect().await.expect("failed attempt");
        assert!(connection.reconnect_delay() > Duration::from_millis(250));

        connection.transport.connect_error = None;
        connection.transport.queue_recv(WsMessage::HelloAck { server_time: 1 });
        connection.connect().await.expect("successful attempt");
        assert_eq!(connection.reconnect_delay(), Duration::from_millis(250));
    }

    // ── Clean shutdown ──────────────────────────────────────────────

    #[tokio::test]
    async fn disconnect_publishes_presence_leave() {
        let mut connection = SyncConnection::new(test_config(), MockTransport::with_hello_ack());
        connection.connect().await.expect("connect should succeed");

        connection.disconnect().await;

        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert!(connection.transport.closed);
        assert!(matches!(
            connection.transport.sent.last(),
            Some(WsMessage::PresenceLeave { user_id, .. }) if user_id == "alice"
        ));
    }
}
