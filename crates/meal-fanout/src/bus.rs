use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use futures_util::Stream;
use meal_schemas::{ResolvedDelivery, ResolvedDietChart};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// BusMsg
// ---------------------------------------------------------------------------

/// Events pushed to every connected dashboard.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "record", rename_all = "camelCase")]
pub enum BusMsg {
    NewDelivery(ResolvedDelivery),
    DeliveryUpdated(ResolvedDelivery),
    DietChartUpdated(ResolvedDietChart),
    #[serde(rename_all = "camelCase")]
    Heartbeat { ts_millis: i64 },
}

impl BusMsg {
    pub fn heartbeat_now() -> Self {
        BusMsg::Heartbeat {
            ts_millis: Utc::now().timestamp_millis(),
        }
    }

    /// SSE event name.
    pub fn event_name(&self) -> &'static str {
        match self {
            BusMsg::NewDelivery(_) => "newDelivery",
            BusMsg::DeliveryUpdated(_) => "deliveryUpdated",
            BusMsg::DietChartUpdated(_) => "dietChartUpdated",
            BusMsg::Heartbeat { .. } => "heartbeat",
        }
    }

    /// SSE data line: the record itself, without the envelope.
    pub fn payload_json(&self) -> serde_json::Result<String> {
        match self {
            BusMsg::NewDelivery(d) | BusMsg::DeliveryUpdated(d) => serde_json::to_string(d),
            BusMsg::DietChartUpdated(c) => serde_json::to_string(c),
            BusMsg::Heartbeat { ts_millis } => {
                serde_json::to_string(&serde_json::json!({ "tsMillis": ts_millis }))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

pub type SessionId = u64;

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: SessionId,
    pub label: String,
    pub connected_at: DateTime<Utc>,
}

type Registry = Arc<Mutex<BTreeMap<SessionId, SessionInfo>>>;

/// Session registry plus broadcast channel. Create one per daemon and share
/// it behind an `Arc`.
pub struct FanOut {
    bus: broadcast::Sender<BusMsg>,
    sessions: Registry,
    next_id: AtomicU64,
}

impl FanOut {
    /// `capacity` is the per-session backlog before a slow session starts
    /// losing events.
    pub fn new(capacity: usize) -> Self {
        let (bus, _rx) = broadcast::channel(capacity.max(1));
        Self {
            bus,
            sessions: Arc::new(Mutex::new(BTreeMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn connect(&self, label: impl Into<String>) -> Session {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let info = SessionInfo {
            id,
            label: label.into(),
            connected_at: Utc::now(),
        };
        debug!(session = id, label = %info.label, "fanout session connected");

        // Subscribe before registering so a session counted in the registry
        // never misses an event published after `connect` returns.
        let rx = self.bus.subscribe();
        lock(&self.sessions).insert(id, info);

        Session {
            id,
            rx,
            guard: SessionGuard {
                id,
                sessions: Arc::clone(&self.sessions),
            },
        }
    }

    pub fn session_count(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        lock(&self.sessions).values().cloned().collect()
    }

    /// Send to every connected session. Returns the number of sessions
    /// reached; zero when nobody is listening.
    pub fn publish(&self, msg: BusMsg) -> usize {
        let event = msg.event_name();
        match self.bus.send(msg) {
            Ok(n) => {
                debug!(event, sessions = n, "fanout publish");
                n
            }
            Err(_) => 0,
        }
    }
}

fn lock(
    sessions: &Mutex<BTreeMap<SessionId, SessionInfo>>,
) -> std::sync::MutexGuard<'_, BTreeMap<SessionId, SessionInfo>> {
    // A panic while holding this lock cannot leave the map half-written.
    sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

struct SessionGuard {
    id: SessionId,
    sessions: Registry,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        lock(&self.sessions).remove(&self.id);
        debug!(session = self.id, "fanout session disconnected");
    }
}

/// One connected client. Dropping it unregisters the session.
pub struct Session {
    id: SessionId,
    rx: broadcast::Receiver<BusMsg>,
    guard: SessionGuard,
}

impl Session {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Next buffered event, or `None` if nothing is pending.
    pub fn try_recv(&mut self) -> Option<BusMsg> {
        loop {
            match self.rx.try_recv() {
                Ok(msg) => return Some(msg),
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    warn!(session = self.id, missed, "fanout session lagged; events dropped");
                }
                Err(_) => return None,
            }
        }
    }

    /// Wait for the next event. `None` once the fan-out is gone.
    pub async fn recv(&mut self) -> Option<BusMsg> {
        loop {
            match self.rx.recv().await {
                Ok(msg) => return Some(msg),
                Err(RecvError::Lagged(missed)) => {
                    warn!(session = self.id, missed, "fanout session lagged; events dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn into_stream(self) -> SessionStream {
        SessionStream {
            id: self.id,
            inner: BroadcastStream::new(self.rx),
            _guard: self.guard,
        }
    }
}

/// [`Session`] as a `Stream`; lagged gaps are skipped with a warning.
pub struct SessionStream {
    id: SessionId,
    inner: BroadcastStream<BusMsg>,
    _guard: SessionGuard,
}

impl Stream for SessionStream {
    type Item = BusMsg;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<BusMsg>> {
        let id = self.id;
        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(msg))) => return Poll::Ready(Some(msg)),
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(missed)))) => {
                    warn!(session = id, missed, "fanout session lagged; events dropped");
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
