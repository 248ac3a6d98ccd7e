//! Event Dispatcher
//!
//! Single routing table keyed by event name. Each entry declares whether the
//! event needs a room binding, host rights or turn ownership, and which game
//! namespace it belongs to; the dispatcher performs those checks before the
//! handler runs, holding the target room's lock for the whole mutation.
//!
//! Handler panics are caught here, logged with the sid and event name, and
//! converted to `error: "internal"` for the caller only.

use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, warn};

use crate::admin::Counters;
use crate::error::CoordError;
use crate::network::handlers;
use crate::network::protocol::{ClientEvent, Frame, GameType, ServerEvent, MAX_FRAME_BYTES};
use crate::network::server::Coordinator;
use crate::session::OutboundHandle;
use crate::SLOW_HANDLER;

/// Predicate flags for one routing-table entry.
struct EventSpec {
    requires_room: bool,
    requires_host: bool,
    requires_turn: bool,
    /// Namespace a room-scoped event must be bound into.
    game: Option<GameType>,
}

fn spec_for(event: &ClientEvent) -> EventSpec {
    use ClientEvent::*;
    // (requires_room, requires_host, requires_turn, game)
    let (room, host, turn, game) = match event {
        CreateRoom(_) | JoinRoom(_) | CreateDiguRoom(_) | JoinDiguRoom(_) | JoinQueue(_)
        | LeaveQueue(_) | Reattach(_) | PingKeepalive(_) => (false, false, false, None),

        LeaveRoom(_) | SetReady(_) | TrickCompleted(_) | UpdateGameState(_)
        | ReadyForRound(_) => (true, false, false, Some(GameType::DhihaEi)),
        SwapPlayer(_) | StartGame(_) | NewRound(_) => {
            (true, true, false, Some(GameType::DhihaEi))
        }
        CardPlayed(_) => (true, false, true, Some(GameType::DhihaEi)),

        LeaveDiguRoom(_) | DiguSetReady(_) | DiguDeclare(_) | DiguUpdateState(_)
        | DiguGameOver(_) => (true, false, false, Some(GameType::Digu)),
        StartDiguGame(_) | DiguNewMatch(_) => (true, true, false, Some(GameType::Digu)),
        DiguDrawCard(_) | DiguDiscardCard(_) => (true, false, true, Some(GameType::Digu)),
    };
    EventSpec {
        requires_room: room,
        requires_host: host,
        requires_turn: turn,
        game,
    }
}

/// Entry point for every inbound text frame.
pub async fn dispatch(coord: &Arc<Coordinator>, sid: &str, handle: &OutboundHandle, text: &str) {
    Counters::bump(&coord.counters.frames_in);

    let event = match decode_frame(coord, sid, text) {
        Ok(event) => event,
        Err(err) => {
            reject(coord, handle, err);
            return;
        }
    };
    let event_name = event.name();
    Counters::bump(&coord.counters.events_dispatched);

    let started = Instant::now();
    let result = AssertUnwindSafe(route(coord, sid, handle, event))
        .catch_unwind()
        .await;
    let elapsed = started.elapsed();
    if elapsed > SLOW_HANDLER {
        warn!(sid, event = event_name, ?elapsed, "slow handler");
    }

    match result {
        Ok(Ok(())) => {}
        Ok(Err(err)) => reject(coord, handle, err),
        Err(_panic) => {
            error!(sid, event = event_name, "handler panicked");
            reject(coord, handle, CoordError::Internal);
        }
    }
}

fn reject(coord: &Coordinator, handle: &OutboundHandle, err: CoordError) {
    Counters::bump(&coord.counters.errors_emitted);
    handle.emit(&ServerEvent::error(err));
}

/// Size check, envelope parse, per-event rate limit, typed decode and
/// payload contract validation, in that order. Nothing here touches rooms.
fn decode_frame(coord: &Coordinator, sid: &str, text: &str) -> Result<ClientEvent, CoordError> {
    if text.len() > MAX_FRAME_BYTES {
        return Err(CoordError::InvalidPayload);
    }
    let frame: Frame = serde_json::from_str(text).map_err(|_| CoordError::InvalidPayload)?;
    coord.admission.check_event(sid, &frame.event)?;
    let event = frame.decode()?;
    event.validate()?;
    Ok(event)
}

async fn route(
    coord: &Arc<Coordinator>,
    sid: &str,
    handle: &OutboundHandle,
    event: ClientEvent,
) -> Result<(), CoordError> {
    let spec = spec_for(&event);
    if !spec.requires_room {
        return handlers::handle_global(coord, sid, handle, event).await;
    }

    let binding = coord
        .sessions
        .binding(sid)
        .await
        .ok_or(CoordError::NotInRoom)?;
    if spec.game != Some(binding.game_type) {
        return Err(CoordError::NotInRoom);
    }

    let room_arc = coord
        .rooms
        .get(binding.game_type, &binding.code)
        .await
        .ok_or(CoordError::RoomNotFound)?;

    let outcome = {
        let mut room = room_arc.lock().await;
        let position = room.position_of(sid).ok_or(CoordError::NotInRoom)?;
        if spec.requires_host && room.host_position() != Some(position) {
            return Err(CoordError::NotHost);
        }
        if spec.requires_turn && room.current_turn != Some(position) {
            return Err(CoordError::NotYourTurn);
        }
        handlers::handle_room(sid, handle, event, &mut room, position)?
    };

    if outcome.delete_room {
        coord.rooms.remove(binding.game_type, &binding.code).await;
    }
    for sid in &outcome.unbind {
        coord.sessions.unbind(sid).await;
    }
    for (sid, position) in &outcome.set_positions {
        coord.sessions.set_position(sid, *position).await;
    }
    Ok(())
}
