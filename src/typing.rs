use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::connection::ConnectionManager;
use crate::events::{ClientEvent, EventKind, ServerEvent};

pub const IDLE_TIMEOUT: Duration = Duration::from_millis(1000);

struct TypingState {
    active_peer: Option<String>,
    // True while we have signalled typing-start for the active peer and
    // not yet stopped; keeps a keystroke burst down to one start event.
    signaling: bool,
    idle_timer: Option<JoinHandle<()>>,
    remote: HashMap<String, bool>,
}

struct TypingInner {
    connection: ConnectionManager,
    state: Mutex<TypingState>,
    active: AtomicBool,
    pump: Mutex<Option<JoinHandle<()>>>,
    tokens: Mutex<Vec<(EventKind, u64)>>,
}

/// Debounces local keystrokes into rate-limited typing start/stop signals
/// and tracks remote peers' typing flags. The stop signal from a remote
/// peer is trusted as-is; there is no watchdog timeout on remote flags.
#[derive(Clone)]
pub struct TypingIndicatorController {
    inner: Arc<TypingInner>,
}

impl TypingIndicatorController {
    pub fn new(connection: ConnectionManager) -> Self {
        TypingIndicatorController {
            inner: Arc::new(TypingInner {
                connection,
                state: Mutex::new(TypingState {
                    active_peer: None,
                    signaling: false,
                    idle_timer: None,
                    remote: HashMap::new(),
                }),
                active: AtomicBool::new(true),
                pump: Mutex::new(None),
                tokens: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Switches the conversation the local input belongs to. Cancels the
    /// outgoing peer's pending idle timer without emitting anything for
    /// the newly selected peer.
    pub async fn set_active_peer(&self, peer_id: Option<String>) {
        let mut state = self.inner.state.lock().await;
        if let Some(timer) = state.idle_timer.take() {
            timer.abort();
        }
        state.signaling = false;
        state.active_peer = peer_id;
    }

    /// Called on every change of the local input field for the active
    /// conversation.
    pub async fn input_changed(&self, content: &str) {
        if !self.is_active() {
            return;
        }
        let (peer, emit) = {
            let mut state = self.inner.state.lock().await;
            let Some(peer) = state.active_peer.clone() else {
                return;
            };
            if let Some(timer) = state.idle_timer.take() {
                timer.abort();
            }
            if content.trim().is_empty() {
                state.signaling = false;
                (peer, Emit::Stop)
            } else {
                let emit = if state.signaling { Emit::Nothing } else { Emit::Start };
                state.signaling = true;
                state.idle_timer = Some(self.spawn_idle_timer(peer.clone()));
                (peer, emit)
            }
        };
        match emit {
            Emit::Start => {
                self.inner
                    .connection
                    .send(ClientEvent::TypingStart { receiver_id: peer })
                    .await;
            }
            Emit::Stop => {
                self.inner
                    .connection
                    .send(ClientEvent::TypingStop { receiver_id: peer })
                    .await;
            }
            Emit::Nothing => {}
        }
    }

    /// Dispatching a message ends the typing signal immediately.
    pub async fn message_sent(&self) {
        if !self.is_active() {
            return;
        }
        let peer = {
            let mut state = self.inner.state.lock().await;
            let Some(peer) = state.active_peer.clone() else {
                return;
            };
            if let Some(timer) = state.idle_timer.take() {
                timer.abort();
            }
            if !state.signaling {
                return;
            }
            state.signaling = false;
            peer
        };
        self.inner
            .connection
            .send(ClientEvent::TypingStop { receiver_id: peer })
            .await;
    }

    pub async fn on_typing_start(&self, user_id: &str) {
        if !self.is_active() {
            return;
        }
        let mut state = self.inner.state.lock().await;
        state.remote.insert(user_id.to_string(), true);
    }

    pub async fn on_typing_stop(&self, user_id: &str) {
        if !self.is_active() {
            return;
        }
        let mut state = self.inner.state.lock().await;
        state.remote.insert(user_id.to_string(), false);
    }

    pub async fn is_typing(&self, user_id: &str) -> bool {
        let state = self.inner.state.lock().await;
        state.remote.get(user_id).copied().unwrap_or(false)
    }

    /// Subscribes to remote typing events and starts the pump.
    pub async fn attach(&self) {
        let mut starts = self.inner.connection.subscribe(EventKind::TypingStart).await;
        let mut stops = self.inner.connection.subscribe(EventKind::TypingStop).await;
        {
            let mut tokens = self.inner.tokens.lock().await;
            tokens.push((starts.kind, starts.token));
            tokens.push((stops.kind, stops.token));
        }

        let controller = self.clone();
        let pump = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(event) = starts.receiver.recv() => {
                        if let ServerEvent::TypingStart { user_id, .. } = event {
                            controller.on_typing_start(&user_id).await;
                        }
                    }
                    Some(event) = stops.receiver.recv() => {
                        if let ServerEvent::TypingStop { user_id, .. } = event {
                            controller.on_typing_stop(&user_id).await;
                        }
                    }
                    else => break,
                }
            }
        });
        *self.inner.pump.lock().await = Some(pump);
    }

    pub async fn shutdown(&self) {
        self.inner.active.store(false, Ordering::SeqCst);
        if let Some(pump) = self.inner.pump.lock().await.take() {
            pump.abort();
        }
        {
            let mut state = self.inner.state.lock().await;
            if let Some(timer) = state.idle_timer.take() {
                timer.abort();
            }
            state.signaling = false;
        }
        for (kind, token) in self.inner.tokens.lock().await.drain(..) {
            self.inner.connection.unsubscribe(kind, token).await;
        }
    }

    fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    fn spawn_idle_timer(&self, peer: String) -> JoinHandle<()> {
        let controller = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(IDLE_TIMEOUT).await;
            if !controller.is_active() {
                return;
            }
            {
                let mut state = controller.inner.state.lock().await;
                state.idle_timer = None;
                state.signaling = false;
            }
            controller
                .inner
                .connection
                .send(ClientEvent::TypingStop { receiver_id: peer })
                .await;
        })
    }
}

enum Emit {
    Start,
    Stop,
    Nothing,
}
