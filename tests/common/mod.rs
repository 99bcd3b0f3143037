#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use direct_chat::error::ServiceError;
use direct_chat::events::{ClientEvent, ServerEvent};
use direct_chat::models::{Message, RecentConversation, Session};
use direct_chat::services::HistoryService;

/// Minimal in-process websocket server: forwards every client event to
/// `inbound`, broadcasts pushed server events to all live connections,
/// and can drop connections on demand to simulate an outage.
pub struct TestServer {
    pub url: String,
    pub inbound: mpsc::UnboundedReceiver<ClientEvent>,
    outbound: broadcast::Sender<ServerEvent>,
    close: broadcast::Sender<()>,
    connections: Arc<AtomicUsize>,
    accept: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub async fn spawn() -> TestServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind test server");
        let addr = listener.local_addr().expect("local addr");
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let (outbound, _) = broadcast::channel(64);
        let (close, _) = broadcast::channel(4);
        let connections = Arc::new(AtomicUsize::new(0));

        let accept_outbound = outbound.clone();
        let accept_close = close.clone();
        let accept_connections = Arc::clone(&connections);
        let accept = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(ws) = accept_async(stream).await else {
                    continue;
                };
                accept_connections.fetch_add(1, Ordering::SeqCst);
                let (mut ws_tx, mut ws_rx) = ws.split();
                let inbound_tx = inbound_tx.clone();
                let mut pushes = accept_outbound.subscribe();
                let mut closes = accept_close.subscribe();
                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            incoming = ws_rx.next() => {
                                match incoming {
                                    Some(Ok(WsMessage::Text(text))) => {
                                        if let Ok(event) =
                                            serde_json::from_str::<ClientEvent>(text.as_str())
                                        {
                                            let _ = inbound_tx.send(event);
                                        }
                                    }
                                    Some(Ok(_)) => {}
                                    _ => break,
                                }
                            }
                            pushed = pushes.recv() => {
                                let Ok(event) = pushed else { break };
                                let payload =
                                    serde_json::to_string(&event).expect("serialize event");
                                if ws_tx.send(WsMessage::text(payload)).await.is_err() {
                                    break;
                                }
                            }
                            _ = closes.recv() => break,
                        }
                    }
                });
            }
        });

        TestServer {
            url: format!("ws://{addr}/chat"),
            inbound,
            outbound,
            close,
            connections,
            accept,
        }
    }

    pub fn push(&self, event: ServerEvent) {
        let _ = self.outbound.send(event);
    }

    /// Severs every live connection, as a network outage would.
    pub fn drop_connections(&self) {
        let _ = self.close.send(());
    }

    /// Takes the server offline permanently: severs live connections and
    /// releases the listening port, so reconnect attempts are refused.
    pub fn stop(&self) {
        self.accept.abort();
        self.drop_connections();
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

pub async fn recv_event(
    receiver: &mut mpsc::UnboundedReceiver<ClientEvent>,
    wait: Duration,
) -> Option<ClientEvent> {
    tokio::time::timeout(wait, receiver.recv()).await.ok().flatten()
}

/// Collects every client event arriving within `window`.
pub async fn drain_for(
    receiver: &mut mpsc::UnboundedReceiver<ClientEvent>,
    window: Duration,
) -> Vec<ClientEvent> {
    let mut events = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    loop {
        let now = tokio::time::Instant::now();
        if now >= deadline {
            break;
        }
        match tokio::time::timeout(deadline - now, receiver.recv()).await {
            Ok(Some(event)) => events.push(event),
            _ => break,
        }
    }
    events
}

pub fn session(self_id: &str, self_username: &str) -> Session {
    Session {
        token: "test-token".to_string(),
        self_id: self_id.to_string(),
        self_username: self_username.to_string(),
    }
}

pub fn message(id: &str, content: &str, sender_id: &str, receiver_id: &str) -> Message {
    Message {
        id: id.to_string(),
        content: content.to_string(),
        sender_id: sender_id.to_string(),
        receiver_id: receiver_id.to_string(),
        created_at: "2026-08-30T12:00:00Z".to_string(),
        sender_username: String::new(),
        receiver_username: String::new(),
    }
}

/// History service stub with per-partner canned responses, optional
/// response delays and failure injection.
#[derive(Default)]
pub struct FakeHistory {
    responses: Mutex<HashMap<String, Vec<Message>>>,
    delays: Mutex<HashMap<String, Duration>>,
    failing: Mutex<HashSet<String>>,
    mark_read_calls: Mutex<Vec<String>>,
}

impl FakeHistory {
    pub fn new() -> Self {
        FakeHistory::default()
    }

    pub async fn set_history(&self, partner_id: &str, messages: Vec<Message>) {
        self.responses.lock().await.insert(partner_id.to_string(), messages);
    }

    pub async fn set_delay(&self, partner_id: &str, delay: Duration) {
        self.delays.lock().await.insert(partner_id.to_string(), delay);
    }

    pub async fn set_failing(&self, partner_id: &str) {
        self.failing.lock().await.insert(partner_id.to_string());
    }

    pub async fn mark_read_calls(&self) -> Vec<String> {
        self.mark_read_calls.lock().await.clone()
    }
}

#[async_trait]
impl HistoryService for FakeHistory {
    async fn get_history(&self, partner_id: &str) -> Result<Vec<Message>, ServiceError> {
        let delay = self.delays.lock().await.get(partner_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().await.contains(partner_id) {
            return Err(ServiceError::Status(500));
        }
        Ok(self
            .responses
            .lock()
            .await
            .get(partner_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn recent_conversations(&self) -> Result<Vec<RecentConversation>, ServiceError> {
        Ok(Vec::new())
    }

    async fn mark_read(&self, partner_id: &str) -> Result<(), ServiceError> {
        self.mark_read_calls.lock().await.push(partner_id.to_string());
        Ok(())
    }
}
