//! Session Registry
//!
//! Maps transport connections to sessions and their optional room binding.
//! The registry has its own lock, finer-grained than room locks; the lock
//! order everywhere is session registry first, room second, and no lock is
//! held across an emit.
//!
//! Outbound delivery is push-only and best-effort: each session owns a
//! bounded send buffer and a slow consumer is closed rather than awaited.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, Notify, RwLock};
use tracing::warn;

use crate::network::protocol::{GameType, ServerEvent};
use crate::room::code::RoomCode;

/// Opaque server-generated session id, stable for the connection's lifetime.
pub type Sid = String;

/// Per-session outbound buffer capacity. A full buffer marks the session
/// unhealthy and closes it.
pub const SEND_BUFFER: usize = 256;

/// Current unix time in whole seconds.
pub fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Frames queued for a connection's sender task.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    /// A serialized `{event, data}` JSON text frame.
    Event(String),
    /// Transport-level ping for idle detection.
    Ping,
}

/// Handle to a session's outbound channel.
///
/// Cloned into player slots so room broadcasts never touch the session
/// registry while holding a room lock.
#[derive(Debug, Clone)]
pub struct OutboundHandle {
    tx: mpsc::Sender<OutboundFrame>,
    kill: Arc<Notify>,
}

impl OutboundHandle {
    /// Create a handle and the receiver its connection task drains.
    pub fn pair() -> (Self, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(SEND_BUFFER);
        (
            Self {
                tx,
                kill: Arc::new(Notify::new()),
            },
            rx,
        )
    }

    /// Enqueue an event frame. Never blocks: a full buffer closes the
    /// session instead.
    pub fn emit(&self, event: &ServerEvent) {
        match self.tx.try_send(OutboundFrame::Event(event.to_frame())) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("outbound buffer full, closing session");
                self.kill.notify_one();
            }
            // Receiver gone: the connection is already tearing down.
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Enqueue a transport ping, best-effort.
    pub fn ping(&self) {
        let _ = self.tx.try_send(OutboundFrame::Ping);
    }

    /// Ask the connection task to close this session.
    pub fn close(&self) {
        self.kill.notify_one();
    }

    /// Notify handle the connection task selects on.
    pub fn killed(&self) -> Arc<Notify> {
        self.kill.clone()
    }
}

/// A session's room binding.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub game_type: GameType,
    pub code: RoomCode,
    /// Seat at bind time. The room's slot map stays authoritative (seats
    /// move on team swap); this mirror exists for the admin snapshot.
    pub position: u8,
}

/// A connected session.
#[derive(Debug)]
pub struct Session {
    pub sid: Sid,
    pub ip: IpAddr,
    pub connected_at: u64,
    pub last_activity: u64,
    pub binding: Option<Binding>,
    pub handle: OutboundHandle,
}

/// Read-only view used by the admin snapshot.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub sid: Sid,
    pub ip: IpAddr,
    pub connected_at: u64,
    pub last_activity: u64,
    pub binding: Option<Binding>,
}

/// Process-wide sid -> Session map.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    inner: RwLock<HashMap<Sid, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, session: Session) {
        let mut inner = self.inner.write().await;
        inner.insert(session.sid.clone(), session);
    }

    pub async fn remove(&self, sid: &str) -> Option<Session> {
        let mut inner = self.inner.write().await;
        inner.remove(sid)
    }

    /// Bind a session to a room seat. Returns false if the session is gone
    /// (disconnected between matchmaking drain and attach).
    pub async fn bind(&self, sid: &str, binding: Binding) -> bool {
        let mut inner = self.inner.write().await;
        match inner.get_mut(sid) {
            Some(session) => {
                session.binding = Some(binding);
                true
            }
            None => false,
        }
    }

    pub async fn unbind(&self, sid: &str) {
        let mut inner = self.inner.write().await;
        if let Some(session) = inner.get_mut(sid) {
            session.binding = None;
        }
    }

    /// Refresh the mirrored seat after a team swap.
    pub async fn set_position(&self, sid: &str, position: u8) {
        let mut inner = self.inner.write().await;
        if let Some(session) = inner.get_mut(sid) {
            if let Some(binding) = session.binding.as_mut() {
                binding.position = position;
            }
        }
    }

    pub async fn binding(&self, sid: &str) -> Option<Binding> {
        let inner = self.inner.read().await;
        inner.get(sid).and_then(|s| s.binding.clone())
    }

    pub async fn handle(&self, sid: &str) -> Option<OutboundHandle> {
        let inner = self.inner.read().await;
        inner.get(sid).map(|s| s.handle.clone())
    }

    /// Stamp activity for the idle reaper and admin snapshot.
    pub async fn touch(&self, sid: &str) {
        let mut inner = self.inner.write().await;
        if let Some(session) = inner.get_mut(sid) {
            session.last_activity = now_unix();
        }
    }

    pub async fn count(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn snapshot(&self) -> Vec<SessionInfo> {
        let inner = self.inner.read().await;
        inner
            .values()
            .map(|s| SessionInfo {
                sid: s.sid.clone(),
                ip: s.ip,
                connected_at: s.connected_at,
                last_activity: s.last_activity,
                binding: s.binding.clone(),
            })
            .collect()
    }

    /// Health probe: the registry is responsive if its lock can be taken
    /// within the deadline.
    pub async fn responsive(&self, deadline: Duration) -> bool {
        tokio::time::timeout(deadline, self.inner.read())
            .await
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoordError;

    fn test_session(sid: &str) -> (Session, mpsc::Receiver<OutboundFrame>) {
        let (handle, rx) = OutboundHandle::pair();
        (
            Session {
                sid: sid.to_string(),
                ip: "127.0.0.1".parse().unwrap(),
                connected_at: now_unix(),
                last_activity: now_unix(),
                binding: None,
                handle,
            },
            rx,
        )
    }

    #[tokio::test]
    async fn test_insert_lookup_remove() {
        let registry = SessionRegistry::new();
        let (session, _rx) = test_session("s1");

        registry.insert(session).await;
        assert_eq!(registry.count().await, 1);
        assert!(registry.handle("s1").await.is_some());

        let removed = registry.remove("s1").await;
        assert!(removed.is_some());
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn test_bind_and_unbind() {
        let registry = SessionRegistry::new();
        let (session, _rx) = test_session("s1");
        registry.insert(session).await;

        let code = crate::room::code::RoomCode::parse("ABCDEF").unwrap();
        let bound = registry
            .bind(
                "s1",
                Binding {
                    game_type: GameType::DhihaEi,
                    code: code.clone(),
                    position: 0,
                },
            )
            .await;
        assert!(bound);
        assert_eq!(registry.binding("s1").await.unwrap().code, code);

        registry.unbind("s1").await;
        assert!(registry.binding("s1").await.is_none());

        // Binding a missing session reports failure.
        assert!(
            !registry
                .bind(
                    "ghost",
                    Binding {
                        game_type: GameType::Digu,
                        code,
                        position: 1,
                    },
                )
                .await
        );
    }

    #[tokio::test]
    async fn test_emit_delivers_frame() {
        let (handle, mut rx) = OutboundHandle::pair();
        handle.emit(&ServerEvent::error(CoordError::NotHost));

        match rx.try_recv().unwrap() {
            OutboundFrame::Event(text) => assert!(text.contains("not_host")),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_overflow_kills_session() {
        let (handle, _rx) = OutboundHandle::pair();
        let killed = handle.killed();

        for _ in 0..(SEND_BUFFER + 1) {
            handle.emit(&ServerEvent::error(CoordError::Internal));
        }

        // notify_one stores a permit, so the kill is observable after the fact.
        tokio::time::timeout(Duration::from_millis(10), killed.notified())
            .await
            .expect("session should be marked for close");
    }

    #[tokio::test]
    async fn test_responsive_probe() {
        let registry = SessionRegistry::new();
        assert!(registry.responsive(Duration::from_millis(50)).await);
    }
}
