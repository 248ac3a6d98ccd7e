//! Room State Machine
//!
//! A room moves through `waiting` (players joining, toggling ready),
//! `playing` (turn events relayed) and `finished` (terminal, awaiting
//! cleanup). The server stores `gameState` and `hands` as uninterpreted
//! structured data: full game-rule logic lives on the client and the server
//! acts as an authoritative relay with turn-ownership checks.
//!
//! Each room is owned by its own async mutex; nothing in this module takes
//! any other lock. Player slots carry the member's outbound handle so room
//! broadcasts stay inside the room lock.

pub mod code;
pub mod registry;

use rand::seq::SliceRandom;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tokio::time::Instant;

use crate::error::CoordError;
use crate::network::protocol::{GameType, HandMap, PlayerMap, ServerEvent};
use crate::session::{now_unix, OutboundHandle, Sid};
use self::code::RoomCode;

/// Room lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Waiting,
    Playing,
    Finished,
}

/// Digu turn phases: a player first draws, then discards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiguPhase {
    Draw,
    Discard,
}

/// A seated player. The `oderId` field name is part of the wire protocol.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSlot {
    pub oder_id: Sid,
    pub name: String,
    pub ready: bool,
    pub connected: bool,
    pub last_seen_at: u64,
    #[serde(skip)]
    pub handle: OutboundHandle,
}

impl PlayerSlot {
    pub fn new(sid: Sid, name: String, handle: OutboundHandle) -> Self {
        Self {
            oder_id: sid,
            name,
            ready: false,
            connected: true,
            last_seen_at: now_unix(),
            handle,
        }
    }
}

/// Result of a host-initiated team swap.
#[derive(Debug, Clone)]
pub struct SwapOutcome {
    pub from_position: u8,
    pub to_position: u8,
    /// Sessions whose seat changed, with their new position.
    pub moved: Vec<(Sid, u8)>,
}

/// One game room. Position indices anchor player identity independent of the
/// transport session id.
#[derive(Debug)]
pub struct Room {
    pub code: RoomCode,
    pub game_type: GameType,
    pub status: RoomStatus,
    pub max_players: u8,
    pub players: BTreeMap<u8, PlayerSlot>,
    pub created_at: u64,
    pub created: Instant,
    /// Opaque client-owned state, stored and relayed untouched.
    pub game_state: Value,
    /// Per-position dealt hands, stored and forwarded but not interpreted.
    pub hands: HandMap,
    /// Mirror of `gameState.currentPlayerIndex` / `currentTurn`.
    pub current_turn: Option<u8>,
    /// Seat count the turn wraps over, fixed at game start.
    turn_players: u8,
    /// Digu turn phase.
    pub phase: DiguPhase,
    /// Server-held digu stock pile (drawn from the front).
    pub stock_pile: Vec<Value>,
    /// Server-held digu discard pile (drawn from the top).
    pub discard_pile: Vec<Value>,
    /// Positions that reported ready for the next round.
    ready_for_round: BTreeSet<u8>,
    pub finished_at: Option<Instant>,
}

/// Read the turn index out of an opaque game-state blob.
pub fn extract_turn(state: &Value) -> Option<u8> {
    state
        .get("currentPlayerIndex")
        .or_else(|| state.get("currentTurn"))
        .and_then(Value::as_u64)
        .map(|v| v as u8)
}

impl Room {
    pub fn new(code: RoomCode, game_type: GameType, max_players: u8) -> Self {
        Self {
            code,
            game_type,
            status: RoomStatus::Waiting,
            max_players,
            players: BTreeMap::new(),
            created_at: now_unix(),
            created: Instant::now(),
            game_state: Value::Null,
            hands: HandMap::new(),
            current_turn: None,
            turn_players: max_players,
            phase: DiguPhase::Draw,
            stock_pile: Vec::new(),
            discard_pile: Vec::new(),
            ready_for_round: BTreeSet::new(),
            finished_at: None,
        }
    }

    // -------------------------------------------------------------------------
    // Membership
    // -------------------------------------------------------------------------

    /// Seat a player at the lowest free position.
    pub fn seat_player(
        &mut self,
        sid: Sid,
        name: String,
        handle: OutboundHandle,
    ) -> Result<u8, CoordError> {
        if self.status != RoomStatus::Waiting {
            return Err(CoordError::GameInProgress);
        }
        let position = (0..self.max_players)
            .find(|p| !self.players.contains_key(p))
            .ok_or(CoordError::RoomFull)?;
        self.players
            .insert(position, PlayerSlot::new(sid, name, handle));
        Ok(position)
    }

    /// Seat a player at a specific position (matchmaking attach).
    pub fn seat_at(&mut self, position: u8, sid: Sid, name: String, handle: OutboundHandle) {
        self.players
            .insert(position, PlayerSlot::new(sid, name, handle));
    }

    pub fn position_of(&self, sid: &str) -> Option<u8> {
        self.players
            .iter()
            .find(|(_, slot)| slot.oder_id == sid)
            .map(|(pos, _)| *pos)
    }

    /// The host is always the occupant of the smallest occupied position.
    pub fn host_position(&self) -> Option<u8> {
        self.players.keys().next().copied()
    }

    pub fn remove_player(&mut self, position: u8) -> Option<PlayerSlot> {
        self.ready_for_round.remove(&position);
        self.players.remove(&position)
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn connected_count(&self) -> usize {
        self.players.values().filter(|p| p.connected).count()
    }

    pub fn players_snapshot(&self) -> PlayerMap {
        self.players.clone()
    }

    // -------------------------------------------------------------------------
    // Lobby
    // -------------------------------------------------------------------------

    pub fn set_ready(&mut self, position: u8, ready: bool) {
        if let Some(slot) = self.players.get_mut(&position) {
            slot.ready = ready;
        }
    }

    fn all_ready(&self) -> bool {
        self.players.values().all(|p| p.ready)
    }

    /// Relocate a slot to the teammate-opposite position. Team A is
    /// positions {0, 2}, team B is {1, 3}. Moves into a free opposite slot
    /// when one exists, otherwise exchanges with the first occupied slot on
    /// the opposite team.
    pub fn swap(&mut self, from_position: u8) -> Result<SwapOutcome, CoordError> {
        let moving = self
            .players
            .remove(&from_position)
            .ok_or(CoordError::InvalidPayload)?;

        let target_positions: [u8; 2] = if from_position % 2 == 0 {
            [1, 3]
        } else {
            [0, 2]
        };

        let free_target = target_positions
            .iter()
            .copied()
            .find(|p| !self.players.contains_key(p));

        let outcome = match free_target {
            Some(to) => {
                let moved = vec![(moving.oder_id.clone(), to)];
                self.players.insert(to, moving);
                SwapOutcome {
                    from_position,
                    to_position: to,
                    moved,
                }
            }
            None => {
                let to = target_positions[0];
                // No free opposite slot means both opposite seats are taken.
                let displaced = self.players.remove(&to).expect("opposite seats occupied");
                let moved = vec![
                    (moving.oder_id.clone(), to),
                    (displaced.oder_id.clone(), from_position),
                ];
                self.players.insert(to, moving);
                self.players.insert(from_position, displaced);
                SwapOutcome {
                    from_position,
                    to_position: to,
                    moved,
                }
            }
        };

        Ok(outcome)
    }

    // -------------------------------------------------------------------------
    // Game lifecycle
    // -------------------------------------------------------------------------

    /// Transition waiting -> playing. All slots must be occupied and ready.
    pub fn start(&mut self, game_state: Value, hands: HandMap) -> Result<(), CoordError> {
        if self.status != RoomStatus::Waiting {
            return Err(CoordError::GameInProgress);
        }
        if self.players.len() != self.max_players as usize || !self.all_ready() {
            return Err(CoordError::InvalidPayload);
        }
        self.turn_players = self.players.len() as u8;
        self.apply_deal(game_state, hands);
        Ok(())
    }

    /// Re-deal for the next round of a running game. Rooms still forming go
    /// through [`Room::start`], which enforces fullness and readiness.
    pub fn redeal(&mut self, game_state: Value, hands: HandMap) -> Result<(), CoordError> {
        if self.status != RoomStatus::Playing {
            return Err(CoordError::InvalidPayload);
        }
        self.apply_deal(game_state, hands);
        Ok(())
    }

    /// Re-deal for a rematch. Allowed from `finished` so a table can play
    /// again without re-forming, but never from `waiting`.
    pub fn rematch(&mut self, game_state: Value, hands: HandMap) -> Result<(), CoordError> {
        if self.status == RoomStatus::Waiting {
            return Err(CoordError::InvalidPayload);
        }
        self.apply_deal(game_state, hands);
        Ok(())
    }

    fn apply_deal(&mut self, game_state: Value, hands: HandMap) {
        self.current_turn = Some(extract_turn(&game_state).unwrap_or(0));
        self.phase = DiguPhase::Draw;
        self.game_state = game_state;
        self.hands = hands;
        self.status = RoomStatus::Playing;
        self.finished_at = None;
    }

    /// The addressee's own dealt hand; other positions are never leaked
    /// through the start broadcast.
    pub fn hand_for(&self, position: u8) -> Value {
        self.hands
            .get(&position.to_string())
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// Replace the stored opaque state and refresh the turn mirror.
    pub fn replace_game_state(&mut self, game_state: Value) {
        if let Some(turn) = extract_turn(&game_state) {
            self.current_turn = Some(turn);
        }
        self.game_state = game_state;
    }

    pub fn advance_turn(&mut self, from: u8) -> u8 {
        let next = (from + 1) % self.turn_players.max(1);
        self.current_turn = Some(next);
        next
    }

    pub fn set_turn(&mut self, position: u8) {
        self.current_turn = Some(position);
    }

    pub fn mark_finished(&mut self) {
        self.status = RoomStatus::Finished;
        self.finished_at = Some(Instant::now());
    }

    /// Record a seat as ready for the next round. Returns true once every
    /// seat has reported, clearing the tally.
    pub fn ready_for_round(&mut self, position: u8) -> bool {
        self.ready_for_round.insert(position);
        if self.ready_for_round.len() >= self.max_players as usize {
            self.ready_for_round.clear();
            return true;
        }
        false
    }

    // -------------------------------------------------------------------------
    // Digu piles
    // -------------------------------------------------------------------------

    /// Pop the next stock card, reshuffling the discard pile into the stock
    /// when the stock is exhausted. Returns the card and whether a reshuffle
    /// happened.
    pub fn draw_from_stock(&mut self) -> Result<(Value, bool), CoordError> {
        let mut reshuffled = false;
        if self.stock_pile.is_empty() {
            if self.discard_pile.is_empty() {
                return Err(CoordError::InvalidPayload);
            }
            self.reshuffle_discard_into_stock();
            reshuffled = true;
        }
        // Stock is drawn from the front.
        let card = self.stock_pile.remove(0);
        Ok((card, reshuffled))
    }

    /// Pop the top discard card, if any.
    pub fn draw_from_discard(&mut self) -> Option<Value> {
        self.discard_pile.pop()
    }

    pub fn push_discard(&mut self, card: Value) {
        self.discard_pile.push(card);
    }

    /// After a discard, refill an empty stock so the next player can draw.
    pub fn maybe_reshuffle(&mut self) -> bool {
        if self.stock_pile.is_empty() && !self.discard_pile.is_empty() {
            self.reshuffle_discard_into_stock();
            return true;
        }
        false
    }

    fn reshuffle_discard_into_stock(&mut self) {
        let mut cards = std::mem::take(&mut self.discard_pile);
        cards.shuffle(&mut rand::thread_rng());
        self.stock_pile = cards;
    }

    // -------------------------------------------------------------------------
    // Presence
    // -------------------------------------------------------------------------

    /// Clear the connected flag for a departing transport, keeping the seat
    /// for the grace window. Returns the affected position.
    pub fn mark_disconnected(&mut self, sid: &str) -> Option<u8> {
        let position = self.position_of(sid)?;
        let slot = self.players.get_mut(&position)?;
        slot.connected = false;
        slot.last_seen_at = now_unix();
        Some(position)
    }

    /// Inherit a disconnected seat within the grace window. The slot's
    /// `oderId` moves to the new session.
    pub fn reattach(&mut self, previous_sid: &str, sid: Sid, handle: OutboundHandle) -> Option<u8> {
        let position = self
            .players
            .iter()
            .find(|(_, slot)| slot.oder_id == previous_sid && !slot.connected)
            .map(|(pos, _)| *pos)?;
        let slot = self.players.get_mut(&position)?;
        slot.oder_id = sid;
        slot.connected = true;
        slot.last_seen_at = now_unix();
        slot.handle = handle;
        Some(position)
    }

    /// Remove a seat whose grace window lapsed. A no-op if the seat was
    /// reattached (oderId changed or connected again) or already vacated.
    pub fn expire_grace(&mut self, sid: &str) -> Option<u8> {
        let position = self
            .players
            .iter()
            .find(|(_, slot)| slot.oder_id == sid && !slot.connected)
            .map(|(pos, _)| *pos)?;
        self.remove_player(position);
        Some(position)
    }

    // -------------------------------------------------------------------------
    // Fan-out
    // -------------------------------------------------------------------------

    /// Emit to every connected member.
    pub fn broadcast(&self, event: &ServerEvent) {
        for slot in self.players.values() {
            if slot.connected {
                slot.handle.emit(event);
            }
        }
    }

    /// Emit to every connected member except one seat (senders do not
    /// receive echoes of their own moves).
    pub fn broadcast_except(&self, position: u8, event: &ServerEvent) {
        for (pos, slot) in &self.players {
            if *pos != position && slot.connected {
                slot.handle.emit(event);
            }
        }
    }

    /// Emit to a single seat.
    pub fn send_to(&self, position: u8, event: &ServerEvent) {
        if let Some(slot) = self.players.get(&position) {
            if slot.connected {
                slot.handle.emit(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::OutboundFrame;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn test_room(game_type: GameType, max_players: u8) -> Room {
        let code = RoomCode::parse("ABCDEF").unwrap();
        Room::new(code, game_type, max_players)
    }

    fn seat(room: &mut Room, sid: &str, name: &str) -> (u8, mpsc::Receiver<OutboundFrame>) {
        let (handle, rx) = OutboundHandle::pair();
        let position = room
            .seat_player(sid.to_string(), name.to_string(), handle)
            .unwrap();
        (position, rx)
    }

    fn fill_ready(room: &mut Room) -> Vec<mpsc::Receiver<OutboundFrame>> {
        let mut receivers = Vec::new();
        for i in 0..room.max_players {
            let (pos, rx) = seat(room, &format!("s{i}"), &format!("P{i}"));
            room.set_ready(pos, true);
            receivers.push(rx);
        }
        receivers
    }

    fn recv_event(rx: &mut mpsc::Receiver<OutboundFrame>) -> Value {
        match rx.try_recv().unwrap() {
            OutboundFrame::Event(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_join_assigns_lowest_free_position() {
        let mut room = test_room(GameType::DhihaEi, 4);
        let (p0, _r0) = seat(&mut room, "a", "A");
        let (p1, _r1) = seat(&mut room, "b", "B");
        assert_eq!((p0, p1), (0, 1));

        // Vacating position 0 makes it the next assignment.
        room.remove_player(0);
        let (p, _r) = seat(&mut room, "c", "C");
        assert_eq!(p, 0);
    }

    #[test]
    fn test_join_full_room() {
        let mut room = test_room(GameType::Digu, 2);
        let _receivers = fill_ready(&mut room);

        let (handle, _rx) = OutboundHandle::pair();
        let err = room
            .seat_player("late".into(), "Late".into(), handle)
            .unwrap_err();
        assert_eq!(err, CoordError::RoomFull);
    }

    #[test]
    fn test_join_while_playing() {
        let mut room = test_room(GameType::DhihaEi, 4);
        let _receivers = fill_ready(&mut room);
        room.start(json!({}), HandMap::new()).unwrap();

        let (handle, _rx) = OutboundHandle::pair();
        let err = room
            .seat_player("late".into(), "Late".into(), handle)
            .unwrap_err();
        assert_eq!(err, CoordError::GameInProgress);
    }

    #[test]
    fn test_set_ready_is_idempotent() {
        let mut room = test_room(GameType::DhihaEi, 4);
        let (pos, _rx) = seat(&mut room, "a", "A");
        room.set_ready(pos, true);
        room.set_ready(pos, true);
        assert!(room.players[&pos].ready);
    }

    #[test]
    fn test_host_is_min_occupied_position() {
        let mut room = test_room(GameType::DhihaEi, 4);
        let _receivers = fill_ready(&mut room);
        assert_eq!(room.host_position(), Some(0));

        room.remove_player(0);
        assert_eq!(room.host_position(), Some(1));

        room.remove_player(1);
        room.remove_player(2);
        assert_eq!(room.host_position(), Some(3));
    }

    #[test]
    fn test_swap_moves_to_free_opposite_slot() {
        let mut room = test_room(GameType::DhihaEi, 4);
        let (_p0, _r0) = seat(&mut room, "a", "A"); // 0, team A
        let (_p1, _r1) = seat(&mut room, "b", "B"); // 1, team B

        // Team B's free slot is position 3 (1 is occupied).
        let outcome = room.swap(0).unwrap();
        assert_eq!(outcome.to_position, 3);
        assert_eq!(outcome.moved, vec![("a".to_string(), 3)]);
        assert!(room.players.contains_key(&3));
        assert!(!room.players.contains_key(&0));
    }

    #[test]
    fn test_swap_exchanges_when_opposite_team_full() {
        // Scenario: four players at 0..3, host swaps fromPosition 2. Team B
        // occupies {1, 3} with no free slot, so slots 2 and 1 exchange.
        let mut room = test_room(GameType::DhihaEi, 4);
        let _receivers = fill_ready(&mut room);

        let outcome = room.swap(2).unwrap();
        assert_eq!(outcome.from_position, 2);
        assert_eq!(outcome.to_position, 1);
        assert_eq!(room.players[&1].oder_id, "s2");
        assert_eq!(room.players[&2].oder_id, "s1");
        // Slots 0 and 3 untouched.
        assert_eq!(room.players[&0].oder_id, "s0");
        assert_eq!(room.players[&3].oder_id, "s3");
    }

    #[test]
    fn test_swap_unoccupied_position() {
        let mut room = test_room(GameType::DhihaEi, 4);
        let (_p0, _r0) = seat(&mut room, "a", "A");
        assert_eq!(room.swap(2).unwrap_err(), CoordError::InvalidPayload);
    }

    #[test]
    fn test_start_requires_full_and_ready() {
        let mut room = test_room(GameType::DhihaEi, 4);
        let (p0, _r0) = seat(&mut room, "a", "A");
        room.set_ready(p0, true);
        assert_eq!(
            room.start(json!({}), HandMap::new()).unwrap_err(),
            CoordError::InvalidPayload
        );

        let mut room = test_room(GameType::DhihaEi, 4);
        let mut receivers = Vec::new();
        for i in 0..4 {
            let (_, rx) = seat(&mut room, &format!("s{i}"), &format!("P{i}"));
            receivers.push(rx);
        }
        assert_eq!(
            room.start(json!({}), HandMap::new()).unwrap_err(),
            CoordError::InvalidPayload
        );
    }

    #[test]
    fn test_start_twice_is_game_in_progress() {
        let mut room = test_room(GameType::DhihaEi, 4);
        let _receivers = fill_ready(&mut room);
        room.start(json!({}), HandMap::new()).unwrap();
        assert_eq!(
            room.start(json!({}), HandMap::new()).unwrap_err(),
            CoordError::GameInProgress
        );
    }

    #[test]
    fn test_start_reads_turn_from_game_state() {
        let mut room = test_room(GameType::DhihaEi, 4);
        let _receivers = fill_ready(&mut room);
        room.start(json!({"currentPlayerIndex": 2}), HandMap::new())
            .unwrap();
        assert_eq!(room.current_turn, Some(2));

        let mut room = test_room(GameType::DhihaEi, 4);
        let _receivers = fill_ready(&mut room);
        room.start(json!({"currentTurn": 3}), HandMap::new()).unwrap();
        assert_eq!(room.current_turn, Some(3));

        let mut room = test_room(GameType::DhihaEi, 4);
        let _receivers = fill_ready(&mut room);
        room.start(json!({}), HandMap::new()).unwrap();
        assert_eq!(room.current_turn, Some(0));
    }

    #[test]
    fn test_redeal_requires_running_game() {
        // A forming room cannot be pushed into playing through a re-deal;
        // only start() moves waiting -> playing.
        let mut room = test_room(GameType::DhihaEi, 4);
        let (_p0, _r0) = seat(&mut room, "a", "A");
        assert_eq!(
            room.redeal(json!({}), HandMap::new()).unwrap_err(),
            CoordError::InvalidPayload
        );
        assert_eq!(room.status, RoomStatus::Waiting);

        let mut room = test_room(GameType::DhihaEi, 4);
        let _receivers = fill_ready(&mut room);
        room.start(json!({}), HandMap::new()).unwrap();
        room.redeal(json!({"currentPlayerIndex": 2}), HandMap::new())
            .unwrap();
        assert_eq!(room.current_turn, Some(2));

        // Finished games re-deal through rematch(), not redeal().
        room.mark_finished();
        assert_eq!(
            room.redeal(json!({}), HandMap::new()).unwrap_err(),
            CoordError::InvalidPayload
        );
    }

    #[test]
    fn test_rematch_allowed_from_finished_only_after_start() {
        let mut room = test_room(GameType::Digu, 2);
        let (_p0, _r0) = seat(&mut room, "a", "A");
        assert_eq!(
            room.rematch(json!({}), HandMap::new()).unwrap_err(),
            CoordError::InvalidPayload
        );
        assert_eq!(room.status, RoomStatus::Waiting);

        let mut room = test_room(GameType::Digu, 2);
        let _receivers = fill_ready(&mut room);
        room.start(json!({}), HandMap::new()).unwrap();
        room.mark_finished();

        room.rematch(json!({}), HandMap::new()).unwrap();
        assert_eq!(room.status, RoomStatus::Playing);
        assert!(room.finished_at.is_none());
    }

    #[test]
    fn test_hand_for_returns_own_position_only() {
        let mut room = test_room(GameType::DhihaEi, 4);
        let _receivers = fill_ready(&mut room);
        let mut hands = HandMap::new();
        for i in 0..4 {
            hands.insert(i.to_string(), json!([format!("card-{i}")]));
        }
        room.start(json!({}), hands).unwrap();

        assert_eq!(room.hand_for(1), json!(["card-1"]));
        assert_eq!(room.hand_for(7), Value::Null);
    }

    #[test]
    fn test_advance_turn_wraps() {
        let mut room = test_room(GameType::Digu, 3);
        let _receivers = fill_ready(&mut room);
        room.start(json!({}), HandMap::new()).unwrap();

        assert_eq!(room.advance_turn(0), 1);
        assert_eq!(room.advance_turn(2), 0);
    }

    #[test]
    fn test_replace_game_state_refreshes_turn() {
        let mut room = test_room(GameType::DhihaEi, 4);
        let _receivers = fill_ready(&mut room);
        room.start(json!({"currentPlayerIndex": 0}), HandMap::new())
            .unwrap();

        room.replace_game_state(json!({"currentPlayerIndex": 3, "scores": [0, 0]}));
        assert_eq!(room.current_turn, Some(3));

        // A blob without a turn key keeps the previous mirror.
        room.replace_game_state(json!({"scores": [1, 0]}));
        assert_eq!(room.current_turn, Some(3));
    }

    #[test]
    fn test_disconnect_grace_and_reattach() {
        let mut room = test_room(GameType::DhihaEi, 4);
        let _receivers = fill_ready(&mut room);

        let position = room.mark_disconnected("s1").unwrap();
        assert_eq!(position, 1);
        assert!(!room.players[&1].connected);
        // The seat survives the disconnect.
        assert_eq!(room.players.len(), 4);

        let (handle, _rx) = OutboundHandle::pair();
        let reattached = room.reattach("s1", "s1-new".into(), handle).unwrap();
        assert_eq!(reattached, 1);
        assert!(room.players[&1].connected);
        assert_eq!(room.players[&1].oder_id, "s1-new");

        // Expiry is a no-op after reattachment.
        assert_eq!(room.expire_grace("s1"), None);
    }

    #[test]
    fn test_expire_grace_removes_seat() {
        let mut room = test_room(GameType::DhihaEi, 4);
        let _receivers = fill_ready(&mut room);

        room.mark_disconnected("s0").unwrap();
        let position = room.expire_grace("s0").unwrap();
        assert_eq!(position, 0);
        assert_eq!(room.players.len(), 3);
        // Host migrated to the smallest remaining position.
        assert_eq!(room.host_position(), Some(1));
    }

    #[test]
    fn test_expire_grace_ignores_connected_seat() {
        let mut room = test_room(GameType::DhihaEi, 4);
        let _receivers = fill_ready(&mut room);
        assert_eq!(room.expire_grace("s0"), None);
        assert_eq!(room.players.len(), 4);
    }

    #[test]
    fn test_ready_for_round_tally() {
        let mut room = test_room(GameType::DhihaEi, 4);
        let _receivers = fill_ready(&mut room);
        assert!(!room.ready_for_round(0));
        assert!(!room.ready_for_round(1));
        assert!(!room.ready_for_round(2));
        // Repeats do not double-count.
        assert!(!room.ready_for_round(2));
        assert!(room.ready_for_round(3));
        // Tally resets for the following round.
        assert!(!room.ready_for_round(0));
    }

    #[test]
    fn test_draw_from_stock_front() {
        let mut room = test_room(GameType::Digu, 2);
        room.stock_pile = vec![json!("first"), json!("second")];

        let (card, reshuffled) = room.draw_from_stock().unwrap();
        assert_eq!(card, json!("first"));
        assert!(!reshuffled);
        assert_eq!(room.stock_pile.len(), 1);
    }

    #[test]
    fn test_draw_reshuffles_empty_stock() {
        let mut room = test_room(GameType::Digu, 2);
        room.discard_pile = vec![json!("x"), json!("y"), json!("z")];

        let (_, reshuffled) = room.draw_from_stock().unwrap();
        assert!(reshuffled);
        assert!(room.discard_pile.is_empty());
        assert_eq!(room.stock_pile.len(), 2);
    }

    #[test]
    fn test_draw_with_no_cards_anywhere() {
        let mut room = test_room(GameType::Digu, 2);
        assert_eq!(room.draw_from_stock().unwrap_err(), CoordError::InvalidPayload);
    }

    #[test]
    fn test_discard_then_auto_reshuffle() {
        let mut room = test_room(GameType::Digu, 2);
        room.push_discard(json!("a"));
        assert!(room.maybe_reshuffle());
        assert!(room.discard_pile.is_empty());
        assert_eq!(room.stock_pile, vec![json!("a")]);

        // Non-empty stock is left alone.
        room.push_discard(json!("b"));
        assert!(!room.maybe_reshuffle());
    }

    #[test]
    fn test_broadcast_except_skips_sender_and_disconnected() {
        let mut room = test_room(GameType::DhihaEi, 4);
        let mut receivers = fill_ready(&mut room);
        room.mark_disconnected("s3").unwrap();

        room.broadcast_except(0, &ServerEvent::AllReadyForRound(Default::default()));

        assert!(receivers[0].try_recv().is_err());
        assert_eq!(recv_event(&mut receivers[1])["event"], "all_ready_for_round");
        assert_eq!(recv_event(&mut receivers[2])["event"], "all_ready_for_round");
        assert!(receivers[3].try_recv().is_err());
    }

    #[test]
    fn test_player_slot_wire_shape() {
        let (handle, _rx) = OutboundHandle::pair();
        let slot = PlayerSlot::new("sid-1".into(), "Ahmed".into(), handle);
        let value = serde_json::to_value(&slot).unwrap();

        assert_eq!(value["oderId"], "sid-1");
        assert_eq!(value["name"], "Ahmed");
        assert_eq!(value["ready"], false);
        assert_eq!(value["connected"], true);
        assert!(value.get("handle").is_none());
        assert!(value.get("lastSeenAt").is_some());
    }
}
