//! In-memory server side for driving a `RealtimeChannel` in tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use archive_client::ws::{ChannelStatus, Connector, ReconnectPolicy, Transport};
use archive_client::{ChannelConfig, DesiredTopics, HandlerRegistry, RealtimeChannel, TransportError};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

/// Upper bound for any wait. Tests run on a paused clock, so this only
/// matters when something is actually stuck.
pub const WAIT: Duration = Duration::from_secs(120);

pub fn test_config() -> ChannelConfig {
    ChannelConfig::new("ws://mock/ws").with_reconnect(ReconnectPolicy {
        delay: Duration::from_secs(1),
        max_attempts: 10,
    })
}

pub fn mock_pair() -> (MockConnector, MockServer) {
    let (connections, incoming) = mpsc::unbounded_channel();
    let attempts = Arc::new(AtomicUsize::new(0));
    let refuse = Arc::new(AtomicBool::new(false));
    (
        MockConnector {
            connections,
            attempts: Arc::clone(&attempts),
            refuse: Arc::clone(&refuse),
        },
        MockServer {
            incoming,
            attempts,
            refuse,
        },
    )
}

pub struct MockConnector {
    connections: mpsc::UnboundedSender<ServerEnd>,
    attempts: Arc<AtomicUsize>,
    refuse: Arc<AtomicBool>,
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::Connect("connection refused".into()));
        }

        let (to_server, from_client) = mpsc::unbounded_channel();
        let (to_client, from_server) = mpsc::unbounded_channel();
        self.connections
            .send(ServerEnd {
                inbound: from_client,
                outbound: to_client,
            })
            .map_err(|_| TransportError::Connect("mock server gone".into()))?;

        Ok(Box::new(MockTransport {
            outbound: to_server,
            inbound: from_server,
        }))
    }
}

struct MockTransport {
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.outbound
            .send(text)
            .map_err(|_| TransportError::Send("peer gone".into()))
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.inbound.close();
        Ok(())
    }
}

pub struct MockServer {
    incoming: mpsc::UnboundedReceiver<ServerEnd>,
    attempts: Arc<AtomicUsize>,
    refuse: Arc<AtomicBool>,
}

impl MockServer {
    pub async fn accept(&mut self) -> ServerEnd {
        tokio::time::timeout(WAIT, self.incoming.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("connector dropped")
    }

    pub fn try_accept(&mut self) -> Option<ServerEnd> {
        self.incoming.try_recv().ok()
    }

    /// Connection attempts seen so far, refused ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

/// Server half of one mock connection. Dropping it closes the connection.
pub struct ServerEnd {
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: mpsc::UnboundedSender<String>,
}

impl ServerEnd {
    pub async fn next_frame(&mut self) -> Value {
        let text = tokio::time::timeout(WAIT, self.inbound.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client closed the connection");
        serde_json::from_str(&text).expect("client sent invalid JSON")
    }

    /// Assert the client sends nothing for a while.
    pub async fn expect_silence(&mut self) {
        if let Ok(Some(text)) =
            tokio::time::timeout(Duration::from_millis(500), self.inbound.recv()).await
        {
            panic!("unexpected client frame: {text}");
        }
    }

    /// Resolves once the client has dropped its side.
    pub async fn closed_by_client(&mut self) {
        loop {
            match tokio::time::timeout(WAIT, self.inbound.recv()).await {
                Ok(Some(_)) => continue,
                Ok(None) => return,
                Err(_) => panic!("client never closed the connection"),
            }
        }
    }

    pub fn push(&self, frame: Value) {
        self.push_raw(&frame.to_string());
    }

    pub fn push_raw(&self, text: &str) {
        let _ = self.outbound.send(text.to_string());
    }

    /// Consume the `authenticate` frame and answer it.
    pub async fn answer_auth(&mut self, success: bool) -> String {
        let frame = self.next_frame().await;
        assert_eq!(frame["type"], "authenticate", "expected authenticate, got {frame}");
        self.push(json!({ "type": "authenticated", "success": success }));
        frame["token"].as_str().unwrap_or_default().to_string()
    }
}

pub fn subscribe(groups: &[&str]) -> Value {
    json!({ "type": "subscribe", "groupIds": groups })
}

pub fn unsubscribe(groups: &[&str]) -> Value {
    json!({ "type": "unsubscribe", "groupIds": groups })
}

pub async fn wait_for_status(
    channel: &RealtimeChannel,
    mut pred: impl FnMut(&ChannelStatus) -> bool,
) -> ChannelStatus {
    let mut rx = channel.watch_status();
    let status = tokio::time::timeout(WAIT, rx.wait_for(|s| pred(s)))
        .await
        .expect("timed out waiting for status")
        .expect("channel driver stopped")
        .clone();
    status
}

/// A channel wired to a mock server.
pub struct Harness {
    pub channel: RealtimeChannel,
    pub server: MockServer,
    pub desired: DesiredTopics,
    pub registry: HandlerRegistry,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_groups(&[])
    }

    pub fn with_groups(groups: &[&str]) -> Self {
        let (connector, server) = mock_pair();
        let desired: DesiredTopics = groups.iter().copied().collect();
        let registry = HandlerRegistry::new();
        let channel = RealtimeChannel::new(test_config(), connector, registry.clone(), &desired);
        Self {
            channel,
            server,
            desired,
            registry,
        }
    }

    pub fn spawn_connect(
        &self,
        token: &str,
    ) -> tokio::task::JoinHandle<Result<(), archive_client::ChannelError>> {
        let channel = self.channel.clone();
        let token = token.to_string();
        tokio::spawn(async move { channel.connect(token).await })
    }

    /// Connect with a good token and return the live server end.
    pub async fn establish(&mut self) -> ServerEnd {
        let connecting = self.spawn_connect("abc");
        let mut conn = self.server.accept().await;
        assert_eq!(conn.answer_auth(true).await, "abc");
        connecting
            .await
            .expect("connect task panicked")
            .expect("connect failed");
        conn
    }

    /// Answer the next (re)connection and wait for Ready.
    pub async fn reauthenticate(&mut self) -> ServerEnd {
        let mut conn = self.server.accept().await;
        conn.answer_auth(true).await;
        wait_for_status(&self.channel, |s| s.state.is_ready()).await;
        conn
    }
}
