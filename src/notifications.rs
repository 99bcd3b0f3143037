use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::presence::PresenceChange;

pub const DEDUP_WINDOW: Duration = Duration::from_millis(2000);
pub const NOTIFICATION_TTL: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Joined,
    Left,
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub id: String,
    pub text: String,
    pub kind: NotificationKind,
    pub created_at: Instant,
}

struct NotifyState {
    live: Vec<Notification>,
    ttl_timers: HashMap<String, JoinHandle<()>>,
    pump: Option<JoinHandle<()>>,
}

struct NotifyInner {
    state: Mutex<NotifyState>,
    active: AtomicBool,
}

/// Converts raw presence transitions into deduplicated, time-limited
/// user-visible notifications. The dedup window only suppresses creation;
/// it never extends an existing notification's life.
#[derive(Clone)]
pub struct NotificationDeduplicator {
    inner: Arc<NotifyInner>,
}

impl NotificationDeduplicator {
    pub fn new() -> Self {
        NotificationDeduplicator {
            inner: Arc::new(NotifyInner {
                state: Mutex::new(NotifyState {
                    live: Vec::new(),
                    ttl_timers: HashMap::new(),
                    pump: None,
                }),
                active: AtomicBool::new(true),
            }),
        }
    }

    /// Creates a notification unless an identical live one was created
    /// inside the dedup window. Returns the new id, or `None` when
    /// suppressed.
    pub async fn add(&self, text: impl Into<String>, kind: NotificationKind) -> Option<String> {
        if !self.inner.active.load(Ordering::SeqCst) {
            return None;
        }
        let text = text.into();
        let now = Instant::now();
        let mut state = self.inner.state.lock().await;
        let duplicate = state.live.iter().any(|existing| {
            existing.kind == kind
                && existing.text == text
                && now.duration_since(existing.created_at) < DEDUP_WINDOW
        });
        if duplicate {
            return None;
        }

        let id = Uuid::new_v4().to_string();
        log::info!("notification: {text}");
        state.live.push(Notification {
            id: id.clone(),
            text,
            kind,
            created_at: now,
        });

        let hub = self.clone();
        let expiring = id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(NOTIFICATION_TTL).await;
            hub.expire(&expiring).await;
        });
        state.ttl_timers.insert(id.clone(), timer);
        Some(id)
    }

    /// Dismisses a notification immediately; unknown ids are ignored.
    pub async fn remove(&self, id: &str) {
        let mut state = self.inner.state.lock().await;
        state.live.retain(|notification| notification.id != id);
        if let Some(timer) = state.ttl_timers.remove(id) {
            timer.abort();
        }
    }

    pub async fn active(&self) -> Vec<Notification> {
        self.inner.state.lock().await.live.clone()
    }

    /// Consumes presence changes and turns them into join/leave notices.
    pub async fn watch_presence(&self, mut changes: mpsc::UnboundedReceiver<PresenceChange>) {
        let hub = self.clone();
        let pump = tokio::spawn(async move {
            while let Some(change) = changes.recv().await {
                match change {
                    PresenceChange::Joined(user) => {
                        hub.add(format!("{} joined", user.username), NotificationKind::Joined)
                            .await;
                    }
                    PresenceChange::Left(user) => {
                        hub.add(format!("{} left", user.username), NotificationKind::Left)
                            .await;
                    }
                }
            }
        });
        let mut state = self.inner.state.lock().await;
        if let Some(old) = state.pump.replace(pump) {
            old.abort();
        }
    }

    pub async fn shutdown(&self) {
        self.inner.active.store(false, Ordering::SeqCst);
        let mut state = self.inner.state.lock().await;
        for (_, timer) in state.ttl_timers.drain() {
            timer.abort();
        }
        if let Some(pump) = state.pump.take() {
            pump.abort();
        }
        state.live.clear();
    }

    // TTL expiry; the timer handle has already run its course, so it is
    // only unregistered, not aborted.
    async fn expire(&self, id: &str) {
        let mut state = self.inner.state.lock().await;
        state.live.retain(|notification| notification.id != id);
        state.ttl_timers.remove(id);
    }
}

impl Default for NotificationDeduplicator {
    fn default() -> Self {
        NotificationDeduplicator::new()
    }
}
