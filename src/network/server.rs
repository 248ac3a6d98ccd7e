//! WebSocket Coordination Server
//!
//! Hosts the event-framed WebSocket transport plus the two plain HTTP
//! surfaces (health probe at `/`, admin snapshot at `/admin/state`) on one
//! listener. Each connection gets a session id, a bounded sender task and an
//! idle-ping loop; on disconnect the session's seat survives for a grace
//! window before host migration runs.

use axum::extract::connect_info::ConnectInfo;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::admin::{
    AdminSnapshot, Counters, QueuesSummary, RoomSummary, SessionSummary,
};
use crate::admission::Admission;
use crate::config::ServerConfig;
use crate::error::CoordError;
use crate::matchmaking::MatchQueues;
use crate::network::dispatcher;
use crate::network::protocol::{self, ConnectedData, GameType, ServerEvent};
use crate::room::code::RoomCode;
use crate::room::registry::RoomRegistry;
use crate::room::RoomStatus;
use crate::session::{
    now_unix, OutboundFrame, OutboundHandle, Session, SessionRegistry, Sid,
};
use crate::{
    FINISHED_ROOM_TTL, GRACE_WINDOW, HEALTH_LOCK_TIMEOUT, PING_INTERVAL, READ_IDLE_TIMEOUT,
    SWEEP_INTERVAL, WAITING_ROOM_TTL,
};

/// Server startup errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind or serve.
    #[error("server io error: {0}")]
    Io(#[from] std::io::Error),
}

/// The in-memory multiplayer coordinator: every room, queue and session
/// binding lives here, and everything is volatile by design.
pub struct Coordinator {
    pub config: ServerConfig,
    pub admission: Admission,
    pub sessions: SessionRegistry,
    pub rooms: RoomRegistry,
    pub queues: MatchQueues,
    pub counters: Counters,
    pub started_at: Instant,
}

impl Coordinator {
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let admission = Admission::new(
            config.max_connections_per_ip,
            config.connection_rate_limit,
        );
        Arc::new(Self {
            config,
            admission,
            sessions: SessionRegistry::new(),
            rooms: RoomRegistry::new(),
            queues: MatchQueues::new(),
            counters: Counters::new(),
            started_at: Instant::now(),
        })
    }

    /// Bind the listener, spawn the sweeper and serve until shutdown.
    pub async fn run(self: Arc<Self>) -> Result<(), ServerError> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "listening");

        let sweeper = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                sweep_rooms(&sweeper).await;
            }
        });

        let app = router(self.clone());
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;
        Ok(())
    }
}

fn router(coord: Arc<Coordinator>) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/ws", get(ws_upgrade))
        .route("/admin/state", get(admin_state))
        .with_state(coord)
}

/// Client IP, honouring a proxy's X-Forwarded-For.
fn client_ip(headers: &HeaderMap, addr: SocketAddr) -> IpAddr {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|first| first.trim().parse().ok())
        .unwrap_or_else(|| addr.ip())
}

async fn ws_upgrade(
    State(coord): State<Arc<Coordinator>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let ip = client_ip(&headers, addr);

    // Admission runs before the upgrade completes; a refused connection
    // never gets a session.
    if let Err(err) = coord.admission.admit(ip) {
        warn!(%ip, reason = err.wire_label(), "connection refused");
        return (StatusCode::TOO_MANY_REQUESTS, err.wire_label()).into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(coord, socket, ip))
}

async fn handle_socket(coord: Arc<Coordinator>, socket: WebSocket, ip: IpAddr) {
    let sid: Sid = Uuid::new_v4().to_string();
    let (handle, mut rx) = OutboundHandle::pair();
    let kill = handle.killed();

    Counters::bump(&coord.counters.connections_total);
    coord
        .sessions
        .insert(Session {
            sid: sid.clone(),
            ip,
            connected_at: now_unix(),
            last_activity: now_unix(),
            binding: None,
            handle: handle.clone(),
        })
        .await;
    info!(
        %sid,
        %ip,
        connections_from_ip = coord.admission.connections_for(ip),
        "client connected"
    );

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Sender task: the only writer to the socket. Outbound frames are
    // enqueued by handlers and drained here in order.
    let sender_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let message = match frame {
                OutboundFrame::Event(text) => Message::Text(text),
                OutboundFrame::Ping => Message::Ping(Vec::new()),
            };
            if ws_tx.send(message).await.is_err() {
                break;
            }
        }
    });

    handle.emit(&ServerEvent::Connected(ConnectedData { sid: sid.clone() }));

    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_frame = Instant::now();

    loop {
        tokio::select! {
            incoming = ws_rx.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    last_frame = Instant::now();
                    coord.sessions.touch(&sid).await;
                    dispatcher::dispatch(&coord, &sid, &handle, &text).await;
                }
                Some(Ok(Message::Binary(_))) => {
                    last_frame = Instant::now();
                    handle.emit(&ServerEvent::error(CoordError::InvalidPayload));
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    last_frame = Instant::now();
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(err)) => {
                    debug!(%sid, %err, "websocket error");
                    break;
                }
            },
            _ = ping.tick() => {
                if last_frame.elapsed() > READ_IDLE_TIMEOUT {
                    handle.emit(&ServerEvent::error(CoordError::Timeout));
                    break;
                }
                handle.ping();
            }
            _ = kill.notified() => break,
        }
    }

    sender_task.abort();
    disconnect_session(&coord, &sid).await;
    info!(%sid, "client disconnected");
}

/// Tear down a departed transport: free its admission slot, drop it from
/// any queue, and start the grace window for its room seat.
pub(crate) async fn disconnect_session(coord: &Arc<Coordinator>, sid: &str) {
    let Some(session) = coord.sessions.remove(sid).await else {
        return;
    };
    coord.admission.release(session.ip);
    coord.admission.forget_session(sid);

    let updates = coord.queues.remove_everywhere(sid).await;
    crate::network::handlers::broadcast_queue_updates(&updates);

    let Some(binding) = session.binding else {
        return;
    };
    let Some(room_arc) = coord.rooms.get(binding.game_type, &binding.code).await else {
        return;
    };

    let marked = room_arc.lock().await.mark_disconnected(sid);
    if marked.is_none() {
        return;
    }
    debug!(%sid, room = %binding.code, "seat held for grace window");

    let coord = coord.clone();
    let sid = sid.to_string();
    tokio::spawn(async move {
        tokio::time::sleep(GRACE_WINDOW).await;
        expire_seat(&coord, binding.game_type, &binding.code, &sid).await;
    });
}

/// Grace expiry: if the seat was not reattached, remove it, migrate the
/// host, tell the room, and delete the room once empty.
pub(crate) async fn expire_seat(
    coord: &Arc<Coordinator>,
    game: GameType,
    code: &RoomCode,
    sid: &str,
) {
    let Some(room_arc) = coord.rooms.get(game, code).await else {
        return;
    };
    let delete = {
        let mut room = room_arc.lock().await;
        let Some(position) = room.expire_grace(sid) else {
            return;
        };
        info!(room = %code, position, "grace window lapsed, seat removed");
        if room.is_empty() {
            true
        } else {
            let players = room.players_snapshot();
            room.broadcast(&protocol::player_disconnected(game, position, players));
            false
        }
    };
    if delete {
        coord.rooms.remove(game, code).await;
        info!(room = %code, "room deleted (empty)");
    }
}

/// Garbage-collect stale rooms: waiting over an hour with fewer than two
/// connected players, or finished rooms past their teardown delay.
pub(crate) async fn sweep_rooms(coord: &Arc<Coordinator>) {
    for game in [GameType::DhihaEi, GameType::Digu] {
        for (code, room_arc) in coord.rooms.all(game).await {
            let mut doomed = Vec::new();
            let delete = {
                let room = room_arc.lock().await;
                let stale_waiting = room.status == RoomStatus::Waiting
                    && room.created.elapsed() > WAITING_ROOM_TTL
                    && room.connected_count() < 2;
                let stale_finished = room.status == RoomStatus::Finished
                    && room
                        .finished_at
                        .map(|at| at.elapsed() > FINISHED_ROOM_TTL)
                        .unwrap_or(false);
                if stale_waiting || stale_finished {
                    for slot in room.players.values() {
                        doomed.push(slot.oder_id.clone());
                    }
                    room.broadcast(&ServerEvent::error(CoordError::Timeout));
                    true
                } else {
                    false
                }
            };
            if delete {
                coord.rooms.remove(game, &code).await;
                for sid in doomed {
                    coord.sessions.unbind(&sid).await;
                }
                info!(room = %code, ?game, "stale room swept");
            }
        }
    }
}

// =============================================================================
// HTTP SURFACES
// =============================================================================

/// Cheap liveness probe: an allocation and a bounded lock-try against the
/// session registry.
async fn health(State(coord): State<Arc<Coordinator>>) -> Response {
    // Allocation probe: if the allocator is wedged this fails first.
    let probe = vec![0u8; 64];
    drop(probe);

    if !coord.sessions.responsive(HEALTH_LOCK_TIMEOUT).await {
        return (StatusCode::SERVICE_UNAVAILABLE, "unavailable").into_response();
    }
    (StatusCode::OK, "ok").into_response()
}

/// Read-only snapshot guarded by the shared secret. Unauthorized requests
/// get a 401 with no body.
async fn admin_state(
    State(coord): State<Arc<Coordinator>>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let supplied = params.get("password").map(String::as_str).or_else(|| {
        headers
            .get("x-admin-password")
            .and_then(|value| value.to_str().ok())
    });
    if supplied != Some(coord.config.admin_password.as_str()) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    Json(build_snapshot(&coord).await).into_response()
}

pub(crate) async fn build_snapshot(coord: &Arc<Coordinator>) -> AdminSnapshot {
    let mut rooms = Vec::new();
    for game in [GameType::DhihaEi, GameType::Digu] {
        for (_, room_arc) in coord.rooms.all(game).await {
            let room = room_arc.lock().await;
            rooms.push(RoomSummary::from_room(&room));
        }
    }

    let sessions = coord
        .sessions
        .snapshot()
        .await
        .into_iter()
        .map(|info| {
            SessionSummary::new(
                info.sid,
                info.ip.to_string(),
                info.connected_at,
                info.last_activity,
                info.binding.as_ref(),
            )
        })
        .collect();

    AdminSnapshot {
        rooms,
        sessions,
        queues: QueuesSummary {
            dhiha_ei: coord.queues.len(GameType::DhihaEi).await,
            digu: coord.queues.len(GameType::Digu).await,
        },
        unique_ips: coord.admission.unique_ips(),
        uptime: coord.started_at.elapsed().as_secs(),
        counters: coord.counters.snapshot(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    fn test_coordinator() -> Arc<Coordinator> {
        Coordinator::new(ServerConfig::default())
    }

    async fn connect(coord: &Arc<Coordinator>, sid: &str) -> mpsc::Receiver<OutboundFrame> {
        let (handle, rx) = OutboundHandle::pair();
        coord
            .sessions
            .insert(Session {
                sid: sid.to_string(),
                ip: "203.0.113.7".parse().unwrap(),
                connected_at: now_unix(),
                last_activity: now_unix(),
                binding: None,
                handle,
            })
            .await;
        rx
    }

    async fn send(coord: &Arc<Coordinator>, sid: &str, text: &str) {
        let handle = coord.sessions.handle(sid).await.unwrap();
        dispatcher::dispatch(coord, sid, &handle, text).await;
    }

    fn drain(rx: &mut mpsc::Receiver<OutboundFrame>) -> Vec<Value> {
        let mut events = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            if let OutboundFrame::Event(text) = frame {
                events.push(serde_json::from_str(&text).unwrap());
            }
        }
        events
    }

    fn find<'a>(events: &'a [Value], name: &str) -> Option<&'a Value> {
        events.iter().find(|e| e["event"] == name)
    }

    /// Build a four-seat room via the dispatcher and return its code.
    async fn lobby(coord: &Arc<Coordinator>) -> (String, Vec<mpsc::Receiver<OutboundFrame>>) {
        let mut receivers = Vec::new();
        for i in 0..4 {
            receivers.push(connect(coord, &format!("s{i}")).await);
        }
        send(
            coord,
            "s0",
            &json!({"event": "create_room", "data": {"playerName": "Host"}}).to_string(),
        )
        .await;
        let events = drain(&mut receivers[0]);
        let room_id = find(&events, "room_created").unwrap()["data"]["roomId"]
            .as_str()
            .unwrap()
            .to_string();
        for i in 1..4 {
            send(
                coord,
                &format!("s{i}"),
                &json!({"event": "join_room", "data": {"roomId": room_id, "playerName": format!("P{i}")}})
                    .to_string(),
            )
            .await;
        }
        for rx in receivers.iter_mut() {
            drain(rx);
        }
        (room_id, receivers)
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_within_grace_window_keeps_seat() {
        let coord = test_coordinator();
        let (room_id, mut receivers) = lobby(&coord).await;

        disconnect_session(&coord, "s1").await;
        // Just inside the 30 s window.
        tokio::time::sleep(GRACE_WINDOW - std::time::Duration::from_millis(100)).await;

        let mut new_rx = connect(&coord, "s1-reborn").await;
        send(
            &coord,
            "s1-reborn",
            &json!({"event": "reattach", "data": {"roomId": room_id, "previousOderId": "s1"}})
                .to_string(),
        )
        .await;

        let events = drain(&mut new_rx);
        let joined = find(&events, "room_joined").expect("reattach succeeds in-window");
        assert_eq!(joined["data"]["position"], 1);

        // Grace expiry later is a no-op; the seat stays.
        tokio::time::sleep(GRACE_WINDOW).await;
        let code = RoomCode::parse(&room_id).unwrap();
        let room_arc = coord.rooms.get(GameType::DhihaEi, &code).await.unwrap();
        let room = room_arc.lock().await;
        assert_eq!(room.players.len(), 4);
        assert!(room.players[&1].connected);
        drop(room);

        // No player_disconnected was broadcast.
        for rx in receivers.iter_mut() {
            let events = drain(rx);
            assert!(find(&events, "player_disconnected").is_none());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_expiry_removes_seat_and_migrates_host() {
        let coord = test_coordinator();
        let (room_id, mut receivers) = lobby(&coord).await;

        // The host (position 0) drops and never comes back.
        disconnect_session(&coord, "s0").await;
        tokio::time::sleep(GRACE_WINDOW + std::time::Duration::from_millis(100)).await;

        let code = RoomCode::parse(&room_id).unwrap();
        let room_arc = coord.rooms.get(GameType::DhihaEi, &code).await.unwrap();
        let room = room_arc.lock().await;
        assert_eq!(room.players.len(), 3);
        // Host migrated to the smallest remaining position.
        assert_eq!(room.host_position(), Some(1));
        drop(room);

        // Remaining members hear player_disconnected with the vacated seat.
        for rx in receivers.iter_mut().skip(1) {
            let events = drain(rx);
            let gone = find(&events, "player_disconnected").unwrap();
            assert_eq!(gone["data"]["position"], 0);
            assert!(gone["data"]["players"].get("0").is_none());
        }

        // A late reattach is refused.
        let mut new_rx = connect(&coord, "s0-late").await;
        send(
            &coord,
            "s0-late",
            &json!({"event": "reattach", "data": {"roomId": room_id, "previousOderId": "s0"}})
                .to_string(),
        )
        .await;
        let events = drain(&mut new_rx);
        assert_eq!(find(&events, "error").unwrap()["data"]["message"], "timeout");
    }

    #[tokio::test(start_paused = true)]
    async fn test_digu_reattach_found_in_second_namespace() {
        // The reattach scan tries dhiha-ei first; a digu room's code is not
        // there, so the handler must keep looking instead of giving up.
        let coord = test_coordinator();
        let mut rx0 = connect(&coord, "d0").await;
        let _rx1 = connect(&coord, "d1").await;

        send(
            &coord,
            "d0",
            &json!({"event": "create_digu_room", "data": {"playerName": "A", "maxPlayers": 2}})
                .to_string(),
        )
        .await;
        let events = drain(&mut rx0);
        let room_id = find(&events, "digu_room_created").unwrap()["data"]["roomId"]
            .as_str()
            .unwrap()
            .to_string();
        send(
            &coord,
            "d1",
            &json!({"event": "join_digu_room", "data": {"roomId": room_id, "playerName": "B"}})
                .to_string(),
        )
        .await;

        disconnect_session(&coord, "d1").await;
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;

        let mut new_rx = connect(&coord, "d1-reborn").await;
        send(
            &coord,
            "d1-reborn",
            &json!({"event": "reattach", "data": {"roomId": room_id, "previousOderId": "d1"}})
                .to_string(),
        )
        .await;

        let events = drain(&mut new_rx);
        let joined = find(&events, "digu_room_joined").expect("digu seat reclaimed");
        assert_eq!(joined["data"]["position"], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_seat_expiry_deletes_room() {
        let coord = test_coordinator();
        let mut rx = connect(&coord, "solo").await;
        send(
            &coord,
            "solo",
            &json!({"event": "create_room", "data": {"playerName": "Solo"}}).to_string(),
        )
        .await;
        let events = drain(&mut rx);
        let room_id = find(&events, "room_created").unwrap()["data"]["roomId"]
            .as_str()
            .unwrap()
            .to_string();

        disconnect_session(&coord, "solo").await;
        tokio::time::sleep(GRACE_WINDOW + std::time::Duration::from_millis(100)).await;

        let code = RoomCode::parse(&room_id).unwrap();
        assert!(coord.rooms.get(GameType::DhihaEi, &code).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_collects_stale_waiting_room() {
        let coord = test_coordinator();
        let mut rx = connect(&coord, "solo").await;
        send(
            &coord,
            "solo",
            &json!({"event": "create_room", "data": {"playerName": "Solo"}}).to_string(),
        )
        .await;
        let events = drain(&mut rx);
        let room_id = find(&events, "room_created").unwrap()["data"]["roomId"]
            .as_str()
            .unwrap()
            .to_string();
        let code = RoomCode::parse(&room_id).unwrap();

        // Under an hour: survives the sweep.
        tokio::time::sleep(WAITING_ROOM_TTL / 2).await;
        sweep_rooms(&coord).await;
        assert!(coord.rooms.get(GameType::DhihaEi, &code).await.is_some());

        tokio::time::sleep(WAITING_ROOM_TTL).await;
        sweep_rooms(&coord).await;
        assert!(coord.rooms.get(GameType::DhihaEi, &code).await.is_none());
        assert!(coord.sessions.binding("solo").await.is_none());

        let events = drain(&mut rx);
        assert_eq!(find(&events, "error").unwrap()["data"]["message"], "timeout");
    }

    #[tokio::test]
    async fn test_admin_snapshot_contents() {
        let coord = test_coordinator();
        let (_room_id, _receivers) = lobby(&coord).await;

        let snapshot = build_snapshot(&coord).await;
        assert_eq!(snapshot.rooms.len(), 1);
        assert_eq!(snapshot.rooms[0].player_count, 4);
        assert_eq!(snapshot.sessions.len(), 4);
        assert_eq!(snapshot.queues.dhiha_ei, 0);
        // Test sessions bypass admission, so no IPs are counted live.
        assert_eq!(snapshot.unique_ips, 0);
        assert!(snapshot.counters.rooms_created >= 1);

        // The serialized snapshot never includes hands or game state.
        let value = serde_json::to_value(&snapshot).unwrap();
        assert!(value["rooms"][0].get("hands").is_none());
        assert!(value["rooms"][0].get("gameState").is_none());
    }

    #[tokio::test]
    async fn test_client_ip_prefers_forwarded_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "198.51.100.4, 10.0.0.1".parse().unwrap());
        let addr: SocketAddr = "192.0.2.1:9999".parse().unwrap();
        assert_eq!(
            client_ip(&headers, addr),
            "198.51.100.4".parse::<IpAddr>().unwrap()
        );

        let empty = HeaderMap::new();
        assert_eq!(client_ip(&empty, addr), addr.ip());
    }
}
