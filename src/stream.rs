use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::connection::ConnectionManager;
use crate::error::StreamError;
use crate::events::{ClientEvent, EventKind, ServerEvent};
use crate::models::{Message, OnlineUser, Session};
use crate::services::HistoryService;

struct StreamState {
    selected: Option<OnlineUser>,
    view: Vec<Message>,
    // Fences history fetches: a response is applied only if no newer
    // selection happened while it was in flight.
    fetch_epoch: u64,
}

struct StreamInner {
    connection: ConnectionManager,
    history: Arc<dyn HistoryService>,
    session: Session,
    state: Mutex<StreamState>,
    active: AtomicBool,
    pump: Mutex<Option<JoinHandle<()>>>,
    tokens: Mutex<Vec<(EventKind, u64)>>,
}

/// Owns the ordered conversation view for the currently selected peer,
/// merging the history fetch with live sent/received events. The view is
/// a log: messages are appended in arrival order, never re-sorted.
#[derive(Clone)]
pub struct MessageStream {
    inner: Arc<StreamInner>,
}

impl MessageStream {
    pub fn new(
        connection: ConnectionManager,
        history: Arc<dyn HistoryService>,
        session: Session,
    ) -> Self {
        MessageStream {
            inner: Arc::new(StreamInner {
                connection,
                history,
                session,
                state: Mutex::new(StreamState {
                    selected: None,
                    view: Vec::new(),
                    fetch_epoch: 0,
                }),
                active: AtomicBool::new(true),
                pump: Mutex::new(None),
                tokens: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Switches the conversation to `peer` and loads its history. On a
    /// fetch failure the previous view is kept, so a failed switch never
    /// blanks an existing conversation. A response that lost the race to
    /// a newer selection is discarded.
    pub async fn select_peer(&self, peer: OnlineUser) -> Result<(), StreamError> {
        let epoch = {
            let mut state = self.inner.state.lock().await;
            state.fetch_epoch += 1;
            state.selected = Some(peer.clone());
            state.fetch_epoch
        };

        let history = self.inner.history.get_history(&peer.id).await?;
        {
            let mut state = self.inner.state.lock().await;
            if state.fetch_epoch == epoch {
                state.view = history
                    .into_iter()
                    .map(|message| self.resolve_usernames(message, &peer))
                    .collect();
            }
        }
        if let Err(err) = self.inner.history.mark_read(&peer.id).await {
            log::debug!("mark-read for {} failed: {err}", peer.id);
        }
        Ok(())
    }

    pub async fn clear_selection(&self) {
        let mut state = self.inner.state.lock().await;
        state.fetch_epoch += 1;
        state.selected = None;
        state.view.clear();
    }

    /// Appends the echo of one of our own messages, if it belongs to the
    /// selected conversation.
    pub async fn on_message_sent(&self, message: Message) {
        self.append_if_selected(message).await;
    }

    pub async fn on_message_received(&self, message: Message) {
        self.append_if_selected(message).await;
    }

    /// Delegates to the connection; the view is only updated when the
    /// server echoes the message back, so a dropped send stays visibly
    /// absent instead of being shown optimistically.
    pub async fn send_message(&self, content: &str) -> Result<(), StreamError> {
        if content.trim().is_empty() {
            return Err(StreamError::EmptyContent);
        }
        let peer = {
            let state = self.inner.state.lock().await;
            state.selected.clone().ok_or(StreamError::NoPeerSelected)?
        };
        self.inner
            .connection
            .send(ClientEvent::SendMessage {
                receiver_id: peer.id,
                content: content.to_string(),
            })
            .await;
        Ok(())
    }

    pub async fn view(&self) -> Vec<Message> {
        self.inner.state.lock().await.view.clone()
    }

    pub async fn selected_peer(&self) -> Option<OnlineUser> {
        self.inner.state.lock().await.selected.clone()
    }

    /// Returns the message with its display labels resolved against the
    /// current selection, unchanged when it falls outside the selected
    /// conversation. Lets display code render live messages with the same
    /// labels the view holds.
    pub async fn with_labels(&self, message: Message) -> Message {
        let peer = {
            let state = self.inner.state.lock().await;
            match state.selected.as_ref() {
                Some(peer) if message.sender_id == peer.id || message.receiver_id == peer.id => {
                    peer.clone()
                }
                _ => return message,
            }
        };
        self.resolve_usernames(message, &peer)
    }

    /// Subscribes to live message events and starts the pump.
    pub async fn attach(&self) {
        let mut received = self.inner.connection.subscribe(EventKind::MessageReceived).await;
        let mut acked = self.inner.connection.subscribe(EventKind::MessageSentAck).await;
        {
            let mut tokens = self.inner.tokens.lock().await;
            tokens.push((received.kind, received.token));
            tokens.push((acked.kind, acked.token));
        }

        let stream = self.clone();
        let pump = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(event) = received.receiver.recv() => {
                        if let ServerEvent::MessageReceived(message) = event {
                            stream.on_message_received(message).await;
                        }
                    }
                    Some(event) = acked.receiver.recv() => {
                        if let ServerEvent::MessageSentAck(message) = event {
                            stream.on_message_sent(message).await;
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
        for (kind, token) in self.inner.tokens.lock().await.drain(..) {
            self.inner.connection.unsubscribe(kind, token).await;
        }
    }

    async fn append_if_selected(&self, message: Message) {
        if !self.inner.active.load(Ordering::SeqCst) {
            return;
        }
        let mut state = self.inner.state.lock().await;
        let Some(peer) = state.selected.clone() else {
            return;
        };
        if message.sender_id != peer.id && message.receiver_id != peer.id {
            return;
        }
        let message = self.resolve_usernames(message, &peer);
        state.view.push(message);
    }

    // The wire carries bare ids for one direction; labels are derived
    // from the session and the selected peer at merge time.
    fn resolve_usernames(&self, mut message: Message, peer: &OnlineUser) -> Message {
        let session = &self.inner.session;
        message.sender_username = if message.sender_id == session.self_id {
            session.self_username.clone()
        } else {
            peer.username.clone()
        };
        message.receiver_username = if message.receiver_id == session.self_id {
            session.self_username.clone()
        } else {
            peer.username.clone()
        };
        message
    }
}
