use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::connection::ConnectionManager;
use crate::events::{ClientEvent, EventKind, PresenceStatus, ServerEvent};
use crate::models::OnlineUser;

pub const PERIODIC_RESYNC: Duration = Duration::from_secs(15);
pub const POST_DELTA_RESYNC: Duration = Duration::from_secs(1);

/// A single observed presence transition, emitted towards the
/// notification layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceChange {
    Joined(OnlineUser),
    Left(OnlineUser),
}

struct PresenceState {
    online: HashMap<String, OnlineUser>,
    // One pending post-delta resync at most; a second delta arriving
    // inside the window must not schedule another.
    resync_pending: bool,
    resync_timer: Option<JoinHandle<()>>,
}

struct PresenceInner {
    connection: ConnectionManager,
    self_id: String,
    periodic_resync: Duration,
    state: Mutex<PresenceState>,
    changes: mpsc::UnboundedSender<PresenceChange>,
    active: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    tokens: Mutex<Vec<(EventKind, u64)>>,
}

/// Reconciles the online-peer set from snapshots and incremental deltas.
/// Deltas make steady-state presence feel instant; the periodic snapshot
/// is the correctness backstop, since a delta can be lost in a reconnect
/// gap. Cheap to clone.
#[derive(Clone)]
pub struct PresenceTracker {
    inner: Arc<PresenceInner>,
}

impl PresenceTracker {
    pub fn new(
        connection: ConnectionManager,
        self_id: impl Into<String>,
        changes: mpsc::UnboundedSender<PresenceChange>,
    ) -> Self {
        Self::with_periodic_resync(connection, self_id, changes, PERIODIC_RESYNC)
    }

    /// Like [`new`](Self::new) with a custom periodic resync cadence.
    pub fn with_periodic_resync(
        connection: ConnectionManager,
        self_id: impl Into<String>,
        changes: mpsc::UnboundedSender<PresenceChange>,
        periodic_resync: Duration,
    ) -> Self {
        PresenceTracker {
            inner: Arc::new(PresenceInner {
                connection,
                self_id: self_id.into(),
                periodic_resync,
                state: Mutex::new(PresenceState {
                    online: HashMap::new(),
                    resync_pending: false,
                    resync_timer: None,
                }),
                changes,
                active: AtomicBool::new(true),
                tasks: Mutex::new(Vec::new()),
                tokens: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Asks the server for a full snapshot. The answer arrives
    /// asynchronously as an `online-snapshot` event.
    pub async fn request_snapshot(&self) {
        if !self.is_active() {
            return;
        }
        self.inner.connection.send(ClientEvent::RequestOnline).await;
    }

    /// Authoritative reconciliation: replaces the whole set with the
    /// snapshot membership minus ourselves, regardless of prior deltas.
    pub async fn on_snapshot(&self, users: Vec<OnlineUser>) {
        if !self.is_active() {
            return;
        }
        let mut state = self.inner.state.lock().await;
        state.online = users
            .into_iter()
            .filter(|user| user.id != self.inner.self_id)
            .map(|user| (user.id.clone(), user))
            .collect();
    }

    pub async fn on_status_delta(&self, user_id: &str, username: &str, status: PresenceStatus) {
        if !self.is_active() {
            return;
        }
        let change = {
            let mut state = self.inner.state.lock().await;
            match status {
                PresenceStatus::Online => {
                    if user_id == self.inner.self_id || state.online.contains_key(user_id) {
                        return;
                    }
                    let user = OnlineUser {
                        id: user_id.to_string(),
                        username: username.to_string(),
                    };
                    state.online.insert(user_id.to_string(), user.clone());
                    PresenceChange::Joined(user)
                }
                PresenceStatus::Offline => match state.online.remove(user_id) {
                    Some(user) => PresenceChange::Left(user),
                    None => return,
                },
            }
        };
        if self.inner.changes.send(change).is_err() {
            log::debug!("presence change dropped, no consumer attached");
        }
        self.schedule_post_delta_resync().await;
    }

    pub async fn online_users(&self) -> Vec<OnlineUser> {
        let state = self.inner.state.lock().await;
        let mut users: Vec<OnlineUser> = state.online.values().cloned().collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        users
    }

    pub async fn is_online(&self, user_id: &str) -> bool {
        self.inner.state.lock().await.online.contains_key(user_id)
    }

    /// Subscribes to snapshot, delta and resync events, starts the pump
    /// and the periodic resync timer, and requests the initial snapshot.
    pub async fn attach(&self) {
        let mut snapshots = self.inner.connection.subscribe(EventKind::OnlineSnapshot).await;
        let mut deltas = self.inner.connection.subscribe(EventKind::StatusDelta).await;
        let mut resyncs = self.inner.connection.subscribe(EventKind::PresenceResync).await;
        {
            let mut tokens = self.inner.tokens.lock().await;
            tokens.push((snapshots.kind, snapshots.token));
            tokens.push((deltas.kind, deltas.token));
            tokens.push((resyncs.kind, resyncs.token));
        }

        let tracker = self.clone();
        let pump = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(event) = snapshots.receiver.recv() => {
                        if let ServerEvent::OnlineSnapshot { users } = event {
                            tracker.on_snapshot(users).await;
                        }
                    }
                    Some(event) = deltas.receiver.recv() => {
                        if let ServerEvent::StatusDelta { user_id, username, status } = event {
                            tracker.on_status_delta(&user_id, &username, status).await;
                        }
                    }
                    Some(_) = resyncs.receiver.recv() => {
                        tracker.request_snapshot().await;
                    }
                    else => break,
                }
            }
        });

        let tracker = self.clone();
        let periodic = tokio::spawn(async move {
            let mut ticks = tokio::time::interval(tracker.inner.periodic_resync);
            ticks.tick().await; // the immediate first tick
            loop {
                ticks.tick().await;
                if !tracker.is_active() {
                    break;
                }
                tracker.request_snapshot().await;
            }
        });

        {
            let mut tasks = self.inner.tasks.lock().await;
            tasks.push(pump);
            tasks.push(periodic);
        }
        self.request_snapshot().await;
    }

    /// Stops timers and event delivery. Any callback arriving afterwards
    /// is ignored.
    pub async fn shutdown(&self) {
        self.inner.active.store(false, Ordering::SeqCst);
        for task in self.inner.tasks.lock().await.drain(..) {
            task.abort();
        }
        {
            let mut state = self.inner.state.lock().await;
            if let Some(timer) = state.resync_timer.take() {
                timer.abort();
            }
            state.resync_pending = false;
        }
        for (kind, token) in self.inner.tokens.lock().await.drain(..) {
            self.inner.connection.unsubscribe(kind, token).await;
        }
    }

    fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// One extra snapshot shortly after a burst of join/leave activity,
    /// coalesced so overlapping deltas share a single timer.
    async fn schedule_post_delta_resync(&self) {
        let mut state = self.inner.state.lock().await;
        if state.resync_pending {
            return;
        }
        state.resync_pending = true;
        let tracker = self.clone();
        state.resync_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(POST_DELTA_RESYNC).await;
            {
                let mut state = tracker.inner.state.lock().await;
                state.resync_pending = false;
                state.resync_timer = None;
            }
            tracker.request_snapshot().await;
        }));
    }
}
