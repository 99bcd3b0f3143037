use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::ConnectError;
use crate::events::{ClientEvent, EventKind, ServerEvent};
use crate::models::Session;

pub const CONNECT_ATTEMPTS: u32 = 5;
pub const RETRY_DELAY: Duration = Duration::from_millis(1000);
pub const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);
pub const RESYNC_DELAY: Duration = Duration::from_millis(500);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Subscribers = HashMap<EventKind, Vec<(u64, mpsc::UnboundedSender<ServerEvent>)>>;

/// Handle returned by [`ConnectionManager::subscribe`]. The receiver gets a
/// copy of every matching event; drop it or call `unsubscribe` with the
/// token to stop delivery.
pub struct Subscription {
    pub kind: EventKind,
    pub token: u64,
    pub receiver: mpsc::UnboundedReceiver<ServerEvent>,
}

struct Transport {
    outbound: mpsc::UnboundedSender<WsMessage>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

struct Shared {
    url: String,
    endpoint: Mutex<Option<String>>,
    transport: Mutex<Option<Transport>>,
    subscribers: Mutex<Subscribers>,
    ready: AtomicBool,
    // Bumped on every connect/disconnect. Tasks spawned for an older epoch
    // must not touch state belonging to a newer one.
    epoch: AtomicU64,
    next_token: AtomicU64,
}

/// Owns the websocket transport: dials with a bounded retry budget,
/// reconnects transparently after mid-session drops, and fans inbound
/// events out to per-kind subscribers. Cheap to clone; all clones share
/// the same transport.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    pub fn new(url: impl Into<String>) -> Self {
        ConnectionManager {
            shared: Arc::new(Shared {
                url: url.into(),
                endpoint: Mutex::new(None),
                transport: Mutex::new(None),
                subscribers: Mutex::new(HashMap::new()),
                ready: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
                next_token: AtomicU64::new(0),
            }),
        }
    }

    /// Establishes the connection, resolving once the websocket handshake
    /// completes. Calling while already connected tears the old transport
    /// down first. Fails only after the retry budget is exhausted.
    pub async fn connect(&self, session: &Session) -> Result<(), ConnectError> {
        let epoch = self.shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.teardown().await;

        let separator = if self.shared.url.contains('?') { '&' } else { '?' };
        let endpoint = format!("{}{}token={}", self.shared.url, separator, session.token);
        *self.shared.endpoint.lock().await = Some(endpoint.clone());

        let stream = dial(&self.shared, &endpoint, epoch).await?;
        install(&self.shared, stream, epoch).await;
        log::info!("connected to {}", self.shared.url);
        Ok(())
    }

    /// Tears down the transport if present. Safe to call repeatedly or
    /// before any connect.
    pub async fn disconnect(&self) {
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);
        self.teardown().await;
    }

    /// Best-effort logout notification followed by teardown.
    pub async fn logout(&self) {
        self.send(ClientEvent::Logout).await;
        self.disconnect().await;
    }

    pub fn is_ready(&self) -> bool {
        self.shared.ready.load(Ordering::SeqCst)
    }

    /// Fire-and-forget send. Dropped (and logged) when the transport is not
    /// ready; callers must not assume delivery.
    pub async fn send(&self, event: ClientEvent) {
        if !self.is_ready() {
            log::warn!("transport not ready, dropping {event:?}");
            return;
        }
        let payload = match serde_json::to_string(&event) {
            Ok(payload) => payload,
            Err(err) => {
                log::warn!("failed to serialize {event:?}: {err}");
                return;
            }
        };
        let transport = self.shared.transport.lock().await;
        match transport.as_ref() {
            Some(transport) => {
                if transport.outbound.send(WsMessage::text(payload)).is_err() {
                    log::warn!("writer task gone, dropping {event:?}");
                }
            }
            None => log::warn!("transport not ready, dropping {event:?}"),
        }
    }

    /// Registers a subscriber for one event kind. Subscriptions are not
    /// transport-scoped: they survive reconnects and must be removed by
    /// their owner on teardown.
    pub async fn subscribe(&self, kind: EventKind) -> Subscription {
        let token = self.shared.next_token.fetch_add(1, Ordering::SeqCst);
        let (tx, receiver) = mpsc::unbounded_channel();
        self.shared
            .subscribers
            .lock()
            .await
            .entry(kind)
            .or_default()
            .push((token, tx));
        Subscription {
            kind,
            token,
            receiver,
        }
    }

    pub async fn unsubscribe(&self, kind: EventKind, token: u64) {
        if let Some(entries) = self.shared.subscribers.lock().await.get_mut(&kind) {
            entries.retain(|(existing, _)| *existing != token);
        }
    }

    async fn teardown(&self) {
        // Ready flips only under the transport lock, so a teardown and an
        // in-flight install cannot leave the flag and the transport
        // disagreeing.
        let mut transport = self.shared.transport.lock().await;
        self.shared.ready.store(false, Ordering::SeqCst);
        if let Some(old) = transport.take() {
            old.reader.abort();
            old.writer.abort();
        }
    }
}

async fn dial(shared: &Arc<Shared>, endpoint: &str, epoch: u64) -> Result<WsStream, ConnectError> {
    let mut last_error = String::from("no attempt made");
    for attempt in 1..=CONNECT_ATTEMPTS {
        if shared.epoch.load(Ordering::SeqCst) != epoch {
            return Err(ConnectError::Superseded);
        }
        match tokio::time::timeout(ATTEMPT_TIMEOUT, connect_async(endpoint)).await {
            Ok(Ok((stream, _response))) => return Ok(stream),
            Ok(Err(err)) => {
                log::warn!("connect attempt {attempt}/{CONNECT_ATTEMPTS} failed: {err}");
                last_error = err.to_string();
            }
            Err(_) => {
                log::warn!("connect attempt {attempt}/{CONNECT_ATTEMPTS} timed out");
                last_error = format!("handshake timed out after {ATTEMPT_TIMEOUT:?}");
            }
        }
        if attempt < CONNECT_ATTEMPTS {
            tokio::time::sleep(RETRY_DELAY).await;
        }
    }
    Err(ConnectError::Exhausted {
        attempts: CONNECT_ATTEMPTS,
        last_error,
    })
}

async fn install(shared: &Arc<Shared>, stream: WsStream, epoch: u64) {
    if shared.epoch.load(Ordering::SeqCst) != epoch {
        return;
    }
    let (mut ws_tx, mut ws_rx) = stream.split();
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<WsMessage>();

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if let Err(err) = ws_tx.send(message).await {
                log::warn!("websocket send failed: {err}");
                break;
            }
        }
    });

    let reader_shared = Arc::clone(shared);
    let reader = tokio::spawn(async move {
        while let Some(result) = ws_rx.next().await {
            match result {
                Ok(WsMessage::Text(text)) => {
                    match serde_json::from_str::<ServerEvent>(text.as_str()) {
                        Ok(event) => dispatch(&reader_shared, event).await,
                        Err(err) => log::warn!("discarding unparseable server event: {err}"),
                    }
                }
                Ok(WsMessage::Close(_)) => break,
                Ok(_) => {}
                Err(err) => {
                    log::warn!("websocket read error: {err}");
                    break;
                }
            }
        }
        // Reconnection runs in its own task so this (dying) one can be
        // aborted safely while the replacement transport is installed.
        tokio::spawn(handle_drop(reader_shared, epoch));
    });

    let mut transport = shared.transport.lock().await;
    // Re-checked under the lock: a connect or disconnect may have bumped
    // the epoch after the entry check, and its teardown must win. The
    // freshly spawned pumps belong to a dead epoch then.
    if shared.epoch.load(Ordering::SeqCst) != epoch {
        reader.abort();
        writer.abort();
        return;
    }
    if let Some(old) = transport.take() {
        old.reader.abort();
        old.writer.abort();
    }
    *transport = Some(Transport {
        outbound,
        reader,
        writer,
    });
    shared.ready.store(true, Ordering::SeqCst);
}

/// Mid-session drop: retried transparently with the same budget as the
/// initial connect. Exhaustion only clears the ready flag; there is no
/// pending caller to fail at this point.
fn handle_drop(
    shared: Arc<Shared>,
    epoch: u64,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
    Box::pin(async move {
    if shared.epoch.load(Ordering::SeqCst) != epoch {
        return;
    }
    shared.ready.store(false, Ordering::SeqCst);
    log::warn!("connection dropped, attempting reconnect");

    let endpoint = match shared.endpoint.lock().await.clone() {
        Some(endpoint) => endpoint,
        None => return,
    };
    match dial(&shared, &endpoint, epoch).await {
        Ok(stream) => {
            install(&shared, stream, epoch).await;
            log::info!("reconnected");
            // Incremental presence events lost during the outage are not
            // recoverable; nudge dependents to request a fresh snapshot.
            let resync_shared = Arc::clone(&shared);
            tokio::spawn(async move {
                tokio::time::sleep(RESYNC_DELAY).await;
                if resync_shared.epoch.load(Ordering::SeqCst) == epoch {
                    dispatch(&resync_shared, ServerEvent::PresenceResync).await;
                }
            });
        }
        Err(ConnectError::Superseded) => {}
        Err(err) => log::error!("reconnect budget exhausted, connection stays down: {err}"),
    }
    })
}

async fn dispatch(shared: &Shared, event: ServerEvent) {
    let kind = event.kind();
    let mut subscribers = shared.subscribers.lock().await;
    if let Some(entries) = subscribers.get_mut(&kind) {
        entries.retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }
}
