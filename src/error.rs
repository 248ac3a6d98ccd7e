//! Coordinator Errors
//!
//! Every client-visible failure maps onto a fixed wire label. Errors are
//! reported to the offending session only, as an `error { message }` event;
//! room state is never mutated on the error path and errors are never
//! broadcast.

use thiserror::Error;

/// Errors surfaced to clients over the wire.
///
/// The `Display` form of each variant is the exact wire label the existing
/// browser client matches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CoordError {
    /// Malformed frame or schema mismatch; the handler was never invoked.
    #[error("invalid_payload")]
    InvalidPayload,

    /// Room-scoped event from a session with no room binding.
    #[error("not_in_room")]
    NotInRoom,

    /// Turn-scoped event from a session whose position is not the current turn.
    #[error("not_your_turn")]
    NotYourTurn,

    /// Host-only event from a non-host member.
    #[error("not_host")]
    NotHost,

    /// Join or operate on a room code that does not exist.
    #[error("room_not_found")]
    RoomNotFound,

    /// Join against a waiting room with no free slots.
    #[error("room_full")]
    RoomFull,

    /// Join or start against a room that is already playing.
    #[error("game_in_progress")]
    GameInProgress,

    /// Per-IP concurrent connection cap exceeded.
    #[error("too_many_connections")]
    TooManyConnections,

    /// Connect-rate or per-event rate limit exceeded.
    #[error("rate_limited")]
    RateLimited,

    /// Server-enforced inactivity close (idle transport, expired grace).
    #[error("timeout")]
    Timeout,

    /// Handler panic or other unexpected server-side failure.
    #[error("internal")]
    Internal,
}

impl CoordError {
    /// The wire label carried in the `error { message }` event.
    pub fn wire_label(&self) -> &'static str {
        match self {
            CoordError::InvalidPayload => "invalid_payload",
            CoordError::NotInRoom => "not_in_room",
            CoordError::NotYourTurn => "not_your_turn",
            CoordError::NotHost => "not_host",
            CoordError::RoomNotFound => "room_not_found",
            CoordError::RoomFull => "room_full",
            CoordError::GameInProgress => "game_in_progress",
            CoordError::TooManyConnections => "too_many_connections",
            CoordError::RateLimited => "rate_limited",
            CoordError::Timeout => "timeout",
            CoordError::Internal => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_labels_match_display() {
        let all = [
            CoordError::InvalidPayload,
            CoordError::NotInRoom,
            CoordError::NotYourTurn,
            CoordError::NotHost,
            CoordError::RoomNotFound,
            CoordError::RoomFull,
            CoordError::GameInProgress,
            CoordError::TooManyConnections,
            CoordError::RateLimited,
            CoordError::Timeout,
            CoordError::Internal,
        ];
        for err in all {
            assert_eq!(err.to_string(), err.wire_label());
        }
    }
}
