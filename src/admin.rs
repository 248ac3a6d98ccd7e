//! Admin Surface
//!
//! A read-only JSON snapshot of rooms, sessions and queues, guarded by the
//! shared admin secret. Rooms in the snapshot omit `hands` and `gameState`
//! to keep payloads bounded. Counters are process-lifetime atomics; all
//! state is volatile by design.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::network::protocol::{GameType, PlayerMap};
use crate::room::{Room, RoomStatus};
use crate::session::Binding;

/// Process-lifetime event counters.
#[derive(Debug, Default)]
pub struct Counters {
    pub connections_total: AtomicU64,
    pub frames_in: AtomicU64,
    pub events_dispatched: AtomicU64,
    pub errors_emitted: AtomicU64,
    pub rooms_created: AtomicU64,
    pub matches_made: AtomicU64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            frames_in: self.frames_in.load(Ordering::Relaxed),
            events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
            errors_emitted: self.errors_emitted.load(Ordering::Relaxed),
            rooms_created: self.rooms_created.load(Ordering::Relaxed),
            matches_made: self.matches_made.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CountersSnapshot {
    pub connections_total: u64,
    pub frames_in: u64,
    pub events_dispatched: u64,
    pub errors_emitted: u64,
    pub rooms_created: u64,
    pub matches_made: u64,
}

/// One room in the snapshot; hands and game state are deliberately absent.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub room_id: String,
    pub game_type: GameType,
    pub status: RoomStatus,
    pub max_players: u8,
    pub player_count: usize,
    pub connected_count: usize,
    pub players: PlayerMap,
    pub created_at: u64,
}

impl RoomSummary {
    pub fn from_room(room: &Room) -> Self {
        Self {
            room_id: room.code.to_string(),
            game_type: room.game_type,
            status: room.status,
            max_players: room.max_players,
            player_count: room.players.len(),
            connected_count: room.connected_count(),
            players: room.players_snapshot(),
            created_at: room.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub sid: String,
    pub ip: String,
    pub connected_at: u64,
    pub last_activity: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game_type: Option<GameType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<u8>,
}

impl SessionSummary {
    pub fn new(
        sid: String,
        ip: String,
        connected_at: u64,
        last_activity: u64,
        binding: Option<&Binding>,
    ) -> Self {
        Self {
            sid,
            ip,
            connected_at,
            last_activity,
            game_type: binding.map(|b| b.game_type),
            room_id: binding.map(|b| b.code.to_string()),
            position: binding.map(|b| b.position),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuesSummary {
    pub dhiha_ei: usize,
    pub digu: usize,
}

/// The full `/admin/state` response body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminSnapshot {
    pub rooms: Vec<RoomSummary>,
    pub sessions: Vec<SessionSummary>,
    pub queues: QueuesSummary,
    /// Distinct IPs with live connections.
    pub unique_ips: usize,
    /// Seconds since process start.
    pub uptime: u64,
    pub counters: CountersSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::code::RoomCode;
    use crate::session::OutboundHandle;

    #[test]
    fn test_room_summary_omits_state_and_hands() {
        let code = RoomCode::parse("ABCDEF").unwrap();
        let mut room = Room::new(code, GameType::DhihaEi, 4);
        let (handle, _rx) = OutboundHandle::pair();
        room.seat_player("s0".into(), "Host".into(), handle).unwrap();
        room.game_state = serde_json::json!({"secret": true});
        room.hands.insert("0".into(), serde_json::json!(["ace"]));

        let summary = RoomSummary::from_room(&room);
        let value = serde_json::to_value(&summary).unwrap();

        assert_eq!(value["roomId"], "ABCDEF");
        assert_eq!(value["gameType"], "dhiha-ei");
        assert_eq!(value["status"], "waiting");
        assert_eq!(value["playerCount"], 1);
        assert!(value.get("gameState").is_none());
        assert!(value.get("hands").is_none());
    }

    #[test]
    fn test_counters_snapshot() {
        let counters = Counters::new();
        Counters::bump(&counters.frames_in);
        Counters::bump(&counters.frames_in);
        Counters::bump(&counters.rooms_created);

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.frames_in, 2);
        assert_eq!(snapshot.rooms_created, 1);
        assert_eq!(snapshot.errors_emitted, 0);
    }
}
