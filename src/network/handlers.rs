//! Event Handlers
//!
//! The dispatcher resolves the session, the room and every predicate
//! (membership, host, turn) before these run, so handlers never re-check
//! them. Room handlers execute synchronously under the room's lock and only
//! enqueue outbound frames; registry writes they need (room deletion,
//! session unbinding, seat rebinds) are returned in a [`RoomOutcome`] and
//! applied by the dispatcher after the lock is released.

use rand::seq::SliceRandom;
use std::sync::Arc;
use tracing::{debug, info};

use crate::admin::Counters;
use crate::error::CoordError;
use crate::matchmaking::{QueueEntry, QueueStatus};
use crate::network::protocol::{
    self, ClientEvent, DiguCardDiscardedData, DiguCardDrawnData, DiguDeclareData,
    DiguGameOverData, DiguMatchStartedData, DiguStockReshuffledData, DiguTurnChangedData,
    DrawSource, GameStartedData, GameType, MatchmakingMatchedData, PositionChangedData,
    QueueStatusData, RemoteCardPlayedData, RoomCreatedData, RoomJoinedData, RoundStartedData,
    ServerEvent, TrickWinnerSetData, TurnChangedData, GameStateData,
};
use crate::network::server::Coordinator;
use crate::room::{code::RoomCode, DiguPhase, Room, RoomStatus};
use crate::session::{Binding, OutboundHandle, Sid};

/// Registry-level follow-ups a room handler requests.
#[derive(Debug, Default)]
pub(crate) struct RoomOutcome {
    pub delete_room: bool,
    pub unbind: Vec<Sid>,
    /// Seat mirror refreshes after a team swap.
    pub set_positions: Vec<(Sid, u8)>,
}

// =============================================================================
// GLOBAL HANDLERS (no room lock held on entry)
// =============================================================================

pub(crate) async fn handle_global(
    coord: &Arc<Coordinator>,
    sid: &str,
    handle: &OutboundHandle,
    event: ClientEvent,
) -> Result<(), CoordError> {
    match event {
        ClientEvent::CreateRoom(payload) => {
            create_room(coord, sid, handle, payload.player_name, GameType::DhihaEi, 4).await
        }
        ClientEvent::CreateDiguRoom(payload) => {
            let max_players = protocol::clamp_digu_players(payload.max_players);
            create_room(
                coord,
                sid,
                handle,
                payload.player_name,
                GameType::Digu,
                max_players,
            )
            .await
        }
        ClientEvent::JoinRoom(payload) => {
            join_room(coord, sid, handle, payload, GameType::DhihaEi).await
        }
        ClientEvent::JoinDiguRoom(payload) => {
            join_room(coord, sid, handle, payload, GameType::Digu).await
        }
        ClientEvent::JoinQueue(payload) => join_queue(coord, sid, handle, payload).await,
        ClientEvent::LeaveQueue(_) => leave_queue(coord, sid, handle).await,
        ClientEvent::Reattach(payload) => reattach(coord, sid, handle, payload).await,
        ClientEvent::PingKeepalive(_) => {
            // Receipt alone counts as liveness; the connection loop already
            // stamped activity.
            Ok(())
        }
        other => {
            debug!(event = other.name(), "room-scoped event reached global handler");
            Err(CoordError::Internal)
        }
    }
}

/// A session may hold at most one room binding; creating, joining or
/// queueing while bound is a contract violation.
async fn ensure_unbound(coord: &Coordinator, sid: &str) -> Result<(), CoordError> {
    if coord.sessions.binding(sid).await.is_some() {
        return Err(CoordError::InvalidPayload);
    }
    Ok(())
}

async fn create_room(
    coord: &Arc<Coordinator>,
    sid: &str,
    handle: &OutboundHandle,
    player_name: String,
    game: GameType,
    max_players: u8,
) -> Result<(), CoordError> {
    ensure_unbound(coord, sid).await?;
    let name = protocol::validate_player_name(&player_name)?;

    let (code, room_arc) = coord.rooms.create(game, max_players).await;
    Counters::bump(&coord.counters.rooms_created);

    let (position, players) = {
        let mut room = room_arc.lock().await;
        let position = room.seat_player(sid.to_string(), name.clone(), handle.clone())?;
        (position, room.players_snapshot())
    };

    coord
        .sessions
        .bind(
            sid,
            Binding {
                game_type: game,
                code: code.clone(),
                position,
            },
        )
        .await;

    info!(room = %code, player = %name, game = ?game, "room created");

    let data = RoomCreatedData {
        room_id: code.to_string(),
        position,
        players,
        max_players: match game {
            GameType::DhihaEi => None,
            GameType::Digu => Some(max_players),
        },
    };
    handle.emit(&match game {
        GameType::DhihaEi => ServerEvent::RoomCreated(data),
        GameType::Digu => ServerEvent::DiguRoomCreated(data),
    });
    Ok(())
}

async fn join_room(
    coord: &Arc<Coordinator>,
    sid: &str,
    handle: &OutboundHandle,
    payload: protocol::JoinRoom,
    game: GameType,
) -> Result<(), CoordError> {
    ensure_unbound(coord, sid).await?;
    let name = protocol::validate_player_name(&payload.player_name)?;
    let code = RoomCode::parse(&payload.room_id)?;

    let room_arc = coord
        .rooms
        .get(game, &code)
        .await
        .ok_or(CoordError::RoomNotFound)?;

    let (position, players, max_players) = {
        let mut room = room_arc.lock().await;
        let position = room.seat_player(sid.to_string(), name.clone(), handle.clone())?;
        let players = room.players_snapshot();
        room.broadcast_except(position, &protocol::players_changed(game, players.clone()));
        (position, players, room.max_players)
    };

    coord
        .sessions
        .bind(
            sid,
            Binding {
                game_type: game,
                code: code.clone(),
                position,
            },
        )
        .await;

    info!(room = %code, player = %name, position, game = ?game, "player joined");

    handle.emit(&protocol::room_joined(
        game,
        RoomJoinedData {
            room_id: code.to_string(),
            position,
            players,
            max_players,
        },
    ));
    Ok(())
}

async fn join_queue(
    coord: &Arc<Coordinator>,
    sid: &str,
    handle: &OutboundHandle,
    payload: protocol::JoinQueue,
) -> Result<(), CoordError> {
    ensure_unbound(coord, sid).await?;
    let name = protocol::validate_player_name(&payload.player_name)?;
    let game = payload.game_type;
    let target = game.queue_target(payload.max_players);

    // A session sits in at most one queue; switching game types drops the
    // old entry and tells that lane's waiters.
    let stale = coord.queues.remove_everywhere(sid).await;
    broadcast_queue_updates(&stale);

    let outcome = coord
        .queues
        .enqueue(game, sid.to_string(), name.clone(), target, handle.clone())
        .await;

    info!(player = %name, game = ?game, queue = outcome.players_in_queue, "joined queue");

    handle.emit(&ServerEvent::QueueJoined(QueueStatusData {
        players_in_queue: outcome.players_in_queue,
        players_needed: outcome.players_needed,
    }));
    broadcast_queue_updates(&outcome.waiting);

    if let Some(batch) = outcome.matched {
        attach_match(coord, game, batch).await;
    }
    Ok(())
}

async fn leave_queue(
    coord: &Arc<Coordinator>,
    sid: &str,
    handle: &OutboundHandle,
) -> Result<(), CoordError> {
    let updates = coord.queues.remove_everywhere(sid).await;
    handle.emit(&ServerEvent::QueueLeft(Default::default()));
    broadcast_queue_updates(&updates);
    Ok(())
}

pub(crate) fn broadcast_queue_updates(waiting: &[QueueStatus]) {
    for status in waiting {
        status.handle.emit(&ServerEvent::QueueUpdate(QueueStatusData {
            players_in_queue: status.players_in_queue,
            players_needed: status.players_needed,
        }));
    }
}

/// Synthesize a room from a drained queue batch and attach every session.
/// Dhiha-ei seats are shuffled so teams are random; digu seats are dealt in
/// queue order.
pub(crate) async fn attach_match(coord: &Arc<Coordinator>, game: GameType, batch: Vec<QueueEntry>) {
    let max_players = match game {
        GameType::DhihaEi => 4,
        GameType::Digu => batch
            .first()
            .map(|e| e.desired_max_players)
            .unwrap_or(4),
    };

    let (code, room_arc) = coord.rooms.create(game, max_players).await;
    Counters::bump(&coord.counters.rooms_created);
    Counters::bump(&coord.counters.matches_made);

    let mut positions: Vec<u8> = (0..max_players).collect();
    if game == GameType::DhihaEi {
        positions.shuffle(&mut rand::thread_rng());
    }

    let seated: Vec<(QueueEntry, u8)> = batch.into_iter().zip(positions).collect();

    {
        let mut room = room_arc.lock().await;
        for (entry, position) in &seated {
            room.seat_at(
                *position,
                entry.sid.clone(),
                entry.player_name.clone(),
                entry.handle.clone(),
            );
        }
    }

    // A session can vanish between the queue drain and the attach; drop its
    // seat rather than leaving a dead slot in a fresh room.
    let mut lost = Vec::new();
    for (entry, position) in &seated {
        let bound = coord
            .sessions
            .bind(
                &entry.sid,
                Binding {
                    game_type: game,
                    code: code.clone(),
                    position: *position,
                },
            )
            .await;
        if !bound {
            lost.push(*position);
        }
    }

    if !lost.is_empty() {
        let mut room = room_arc.lock().await;
        for position in &lost {
            room.remove_player(*position);
        }
        if room.is_empty() {
            drop(room);
            coord.rooms.remove(game, &code).await;
            return;
        }
    }

    let players = room_arc.lock().await.players_snapshot();
    info!(room = %code, players = players.len(), game = ?game, "match made");

    for (entry, position) in &seated {
        if lost.contains(position) {
            continue;
        }
        entry.handle.emit(&ServerEvent::MatchmakingMatched(
            MatchmakingMatchedData {
                room_id: code.to_string(),
                position: *position,
                players: players.clone(),
            },
        ));
    }
}

async fn reattach(
    coord: &Arc<Coordinator>,
    sid: &str,
    handle: &OutboundHandle,
    payload: protocol::Reattach,
) -> Result<(), CoordError> {
    ensure_unbound(coord, sid).await?;
    let code = RoomCode::parse(&payload.room_id)?;

    // The namespaces generate codes independently, so the same code can
    // exist in both; only a missing seat in BOTH rooms means the grace
    // window lapsed.
    let mut room_seen = false;
    for game in [GameType::DhihaEi, GameType::Digu] {
        let Some(room_arc) = coord.rooms.get(game, &code).await else {
            continue;
        };
        room_seen = true;

        let claimed = {
            let mut room = room_arc.lock().await;
            room.reattach(&payload.previous_oder_id, sid.to_string(), handle.clone())
                .map(|position| {
                    let players = room.players_snapshot();
                    room.broadcast_except(
                        position,
                        &protocol::players_changed(game, players.clone()),
                    );
                    (position, players, room.max_players)
                })
        };
        let Some((position, players, max_players)) = claimed else {
            continue;
        };

        coord
            .sessions
            .bind(
                sid,
                Binding {
                    game_type: game,
                    code: code.clone(),
                    position,
                },
            )
            .await;

        info!(room = %code, position, "session reattached");

        handle.emit(&protocol::room_joined(
            game,
            RoomJoinedData {
                room_id: code.to_string(),
                position,
                players,
                max_players,
            },
        ));
        return Ok(());
    }

    if room_seen {
        // A room with that code exists but no seat matched: the grace
        // window lapsed or the seat was never theirs.
        Err(CoordError::Timeout)
    } else {
        Err(CoordError::RoomNotFound)
    }
}

// =============================================================================
// ROOM HANDLERS (run under the room's lock)
// =============================================================================

pub(crate) fn handle_room(
    sid: &str,
    handle: &OutboundHandle,
    event: ClientEvent,
    room: &mut Room,
    position: u8,
) -> Result<RoomOutcome, CoordError> {
    match event {
        ClientEvent::LeaveRoom(_) | ClientEvent::LeaveDiguRoom(_) => {
            leave_room(sid, handle, room, position)
        }
        ClientEvent::SetReady(payload) | ClientEvent::DiguSetReady(payload) => {
            room.set_ready(position, payload.ready);
            let players = room.players_snapshot();
            room.broadcast(&protocol::players_changed(room.game_type, players));
            Ok(RoomOutcome::default())
        }
        ClientEvent::SwapPlayer(payload) => swap_player(room, payload.from_position),
        ClientEvent::StartGame(payload) => {
            room.start(payload.game_state, payload.hands)?;
            broadcast_game_started(room);
            Ok(RoomOutcome::default())
        }
        ClientEvent::StartDiguGame(payload) => {
            room.start(payload.game_state, payload.hands)?;
            room.stock_pile = payload.stock_pile;
            room.discard_pile = payload.discard_pile;
            broadcast_game_started(room);
            Ok(RoomOutcome::default())
        }
        ClientEvent::CardPlayed(payload) => card_played(room, position, payload),
        ClientEvent::TrickCompleted(payload) => trick_completed(room, payload.winner),
        ClientEvent::UpdateGameState(payload) | ClientEvent::DiguUpdateState(payload) => {
            room.replace_game_state(payload.game_state.clone());
            let data = GameStateData {
                game_state: payload.game_state,
            };
            let event = match room.game_type {
                GameType::DhihaEi => ServerEvent::GameStateUpdated(data),
                GameType::Digu => ServerEvent::DiguStateUpdated(data),
            };
            room.broadcast_except(position, &event);
            Ok(RoomOutcome::default())
        }
        ClientEvent::NewRound(payload) => {
            room.redeal(payload.game_state, payload.hands)?;
            room.broadcast(&ServerEvent::RoundStarted(RoundStartedData {
                game_state: room.game_state.clone(),
                hands: room.hands.clone(),
                current_player_index: room.current_turn.unwrap_or(0),
            }));
            Ok(RoomOutcome::default())
        }
        ClientEvent::ReadyForRound(_) => {
            if room.ready_for_round(position) {
                room.broadcast(&ServerEvent::AllReadyForRound(Default::default()));
            }
            Ok(RoomOutcome::default())
        }
        ClientEvent::DiguDrawCard(payload) => digu_draw(room, position, payload.source),
        ClientEvent::DiguDiscardCard(payload) => digu_discard(room, position, payload.card),
        ClientEvent::DiguDeclare(payload) => {
            room.broadcast_except(
                position,
                &ServerEvent::DiguRemoteDeclare(DiguDeclareData {
                    position,
                    melds: payload.melds,
                    is_valid: payload.is_valid,
                }),
            );
            Ok(RoomOutcome::default())
        }
        ClientEvent::DiguGameOver(payload) => {
            room.mark_finished();
            room.broadcast_except(
                position,
                &ServerEvent::DiguRemoteGameOver(DiguGameOverData {
                    results: payload.results,
                    declared_by: position,
                }),
            );
            Ok(RoomOutcome::default())
        }
        ClientEvent::DiguNewMatch(payload) => {
            room.rematch(payload.game_state, payload.hands)?;
            room.stock_pile = payload.stock_pile;
            room.discard_pile = payload.discard_pile;
            room.broadcast(&ServerEvent::DiguMatchStarted(DiguMatchStartedData {
                game_state: room.game_state.clone(),
                hands: room.hands.clone(),
                current_player_index: room.current_turn.unwrap_or(0),
                game_phase: room.phase,
            }));
            Ok(RoomOutcome::default())
        }
        other => {
            debug!(event = other.name(), "global event reached room handler");
            Err(CoordError::Internal)
        }
    }
}

fn leave_room(
    sid: &str,
    handle: &OutboundHandle,
    room: &mut Room,
    position: u8,
) -> Result<RoomOutcome, CoordError> {
    let game = room.game_type;
    let was_playing = room.status == RoomStatus::Playing;
    room.remove_player(position);

    let mut outcome = RoomOutcome {
        unbind: vec![sid.to_string()],
        ..Default::default()
    };

    if room.is_empty() {
        outcome.delete_room = true;
    } else {
        let players = room.players_snapshot();
        // A departure mid-game keeps the room playing with a vacant seat;
        // the remaining clients decide how to proceed.
        let event = if was_playing {
            protocol::player_disconnected(game, position, players)
        } else {
            protocol::players_changed(game, players)
        };
        room.broadcast(&event);
    }

    handle.emit(&protocol::left_room(game));
    Ok(outcome)
}

fn swap_player(room: &mut Room, from_position: u8) -> Result<RoomOutcome, CoordError> {
    let swap = room.swap(from_position)?;
    let players = room.players_snapshot();

    room.broadcast(&protocol::players_changed(room.game_type, players.clone()));
    room.broadcast(&ServerEvent::PositionChanged(PositionChangedData {
        from_position: swap.from_position,
        to_position: swap.to_position,
        players,
    }));

    Ok(RoomOutcome {
        set_positions: swap.moved,
        ..Default::default()
    })
}

/// Per-recipient start broadcast: `gameState` goes out in full, `hands` is
/// stripped to the addressee's own position.
fn broadcast_game_started(room: &Room) {
    let game = room.game_type;
    let players = room.players_snapshot();
    let turn = room.current_turn.unwrap_or(0);

    for (&position, slot) in &room.players {
        if !slot.connected {
            continue;
        }
        slot.handle.emit(&protocol::game_started(
            game,
            GameStartedData {
                game_state: room.game_state.clone(),
                hand: room.hand_for(position),
                position,
                players: players.clone(),
                current_player_index: turn,
            },
        ));
    }
}

fn card_played(
    room: &mut Room,
    position: u8,
    payload: protocol::CardPlayed,
) -> Result<RoomOutcome, CoordError> {
    let next = room.advance_turn(position);

    room.broadcast_except(
        position,
        &ServerEvent::RemoteCardPlayed(RemoteCardPlayedData {
            card: payload.card,
            position,
            current_player_index: next,
        }),
    );
    room.send_to(
        position,
        &ServerEvent::TurnChanged(TurnChangedData {
            current_player_index: next,
        }),
    );
    Ok(RoomOutcome::default())
}

fn trick_completed(room: &mut Room, winner: u8) -> Result<RoomOutcome, CoordError> {
    if winner >= room.max_players {
        return Err(CoordError::InvalidPayload);
    }
    // The trick winner leads the next trick.
    room.set_turn(winner);

    room.broadcast(&ServerEvent::TrickWinnerSet(TrickWinnerSetData {
        winner,
        current_player_index: winner,
    }));
    Ok(RoomOutcome::default())
}

fn digu_draw(
    room: &mut Room,
    position: u8,
    source: DrawSource,
) -> Result<RoomOutcome, CoordError> {
    let card = match source {
        DrawSource::Stock => {
            let (card, reshuffled) = room.draw_from_stock()?;
            if reshuffled {
                // Count as of the reshuffle, before this draw came off it.
                room.broadcast(&ServerEvent::DiguStockReshuffled(DiguStockReshuffledData {
                    stock_count: room.stock_pile.len() + 1,
                }));
            }
            card
        }
        DrawSource::Discard => match room.draw_from_discard() {
            Some(card) => card,
            None => {
                debug!(room = %room.code, "draw from empty discard ignored");
                return Ok(RoomOutcome::default());
            }
        },
    };

    room.phase = DiguPhase::Discard;

    // Everyone, including the drawer, learns the popped card: with the
    // server holding the piles the drawer cannot know it in advance.
    room.broadcast(&ServerEvent::DiguCardDrawn(DiguCardDrawnData {
        source,
        card,
        position,
        current_player_index: room.current_turn.unwrap_or(position),
        game_phase: room.phase,
        stock_count: room.stock_pile.len(),
        discard_count: room.discard_pile.len(),
    }));
    Ok(RoomOutcome::default())
}

fn digu_discard(
    room: &mut Room,
    position: u8,
    card: serde_json::Value,
) -> Result<RoomOutcome, CoordError> {
    room.push_discard(card.clone());
    let next = room.advance_turn(position);
    room.phase = DiguPhase::Draw;
    let reshuffled = room.maybe_reshuffle();

    room.broadcast_except(
        position,
        &ServerEvent::DiguRemoteCardDiscarded(DiguCardDiscardedData {
            card,
            position,
            current_player_index: next,
            game_phase: room.phase,
        }),
    );
    room.send_to(
        position,
        &ServerEvent::DiguTurnChanged(DiguTurnChangedData {
            current_player_index: next,
            game_phase: room.phase,
        }),
    );
    if reshuffled {
        room.broadcast(&ServerEvent::DiguStockReshuffled(DiguStockReshuffledData {
            stock_count: room.stock_pile.len(),
        }));
    }
    Ok(RoomOutcome::default())
}
