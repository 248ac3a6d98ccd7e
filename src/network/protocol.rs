//! Protocol Events
//!
//! Wire format for client-server communication over WebSocket. Every frame
//! is a JSON text message of the form `{ "event": string, "data": object }`,
//! matching the existing browser client. The enums below are adjacently
//! tagged so serde produces and consumes exactly that envelope.
//!
//! Payload field names are camelCase on the wire (`roomId`, `playerName`,
//! `oderId`) because that is what the client already speaks.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::CoordError;
use crate::room::{DiguPhase, PlayerSlot};

/// Maximum inbound frame size in bytes. Larger frames are rejected with
/// `invalid_payload` before any parsing.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Hands keyed by position (JSON object keys are strings).
pub type HandMap = BTreeMap<String, Value>;

/// Player slots keyed by position.
pub type PlayerMap = BTreeMap<u8, PlayerSlot>;

/// The two game namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GameType {
    DhihaEi,
    Digu,
}

impl GameType {
    /// Seats at a matchmade table for this game type.
    pub fn queue_target(&self, desired: Option<u8>) -> u8 {
        match self {
            GameType::DhihaEi => 4,
            GameType::Digu => clamp_digu_players(desired.unwrap_or(4)),
        }
    }
}

/// Digu table sizes are clamped server-side.
pub fn clamp_digu_players(requested: u8) -> u8 {
    requested.clamp(2, 4)
}

/// Player display names are trimmed and bounded.
pub fn validate_player_name(raw: &str) -> Result<String, CoordError> {
    let name = raw.trim();
    if name.is_empty() || name.chars().count() > 24 {
        return Err(CoordError::InvalidPayload);
    }
    Ok(name.to_string())
}

/// A dhiha-ei card must at least carry suit and rank strings; anything else
/// the client attaches is relayed untouched.
pub fn validate_card(card: &Value) -> Result<(), CoordError> {
    let obj = card.as_object().ok_or(CoordError::InvalidPayload)?;
    if obj.get("suit").and_then(Value::as_str).is_none()
        || obj.get("rank").and_then(Value::as_str).is_none()
    {
        return Err(CoordError::InvalidPayload);
    }
    Ok(())
}

// =============================================================================
// CLIENT -> SERVER EVENTS
// =============================================================================

/// Raw frame envelope, used to recover the event name for rate limiting and
/// to normalize a missing `data` member before typed decoding.
#[derive(Debug, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    /// Decode the envelope into a typed event. Unknown event names and
    /// payloads that fail their contract are both `invalid_payload`.
    pub fn decode(self) -> Result<ClientEvent, CoordError> {
        let data = if self.data.is_null() {
            Value::Object(serde_json::Map::new())
        } else {
            self.data
        };
        let normalized = serde_json::json!({ "event": self.event, "data": data });
        serde_json::from_value(normalized).map_err(|_| CoordError::InvalidPayload)
    }
}

/// Events sent from client to server.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    // Dhiha Ei rooms.
    CreateRoom(CreateRoom),
    JoinRoom(JoinRoom),
    LeaveRoom(Empty),
    SetReady(SetReady),
    SwapPlayer(SwapPlayer),
    StartGame(StartDeal),
    CardPlayed(CardPlayed),
    TrickCompleted(TrickCompleted),
    UpdateGameState(UpdateGameState),
    NewRound(StartDeal),
    ReadyForRound(Empty),

    // Digu rooms.
    CreateDiguRoom(CreateDiguRoom),
    JoinDiguRoom(JoinRoom),
    LeaveDiguRoom(Empty),
    DiguSetReady(SetReady),
    StartDiguGame(StartDiguDeal),
    DiguDrawCard(DiguDrawCard),
    DiguDiscardCard(DiguDiscardCard),
    DiguDeclare(DiguDeclare),
    DiguUpdateState(UpdateGameState),
    DiguGameOver(DiguGameOver),
    DiguNewMatch(StartDiguDeal),

    // Matchmaking.
    JoinQueue(JoinQueue),
    LeaveQueue(Empty),

    // Presence.
    Reattach(Reattach),
    PingKeepalive(Empty),
}

impl ClientEvent {
    /// Name used for rate limiting and logging.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::CreateRoom(_) => "create_room",
            ClientEvent::JoinRoom(_) => "join_room",
            ClientEvent::LeaveRoom(_) => "leave_room",
            ClientEvent::SetReady(_) => "set_ready",
            ClientEvent::SwapPlayer(_) => "swap_player",
            ClientEvent::StartGame(_) => "start_game",
            ClientEvent::CardPlayed(_) => "card_played",
            ClientEvent::TrickCompleted(_) => "trick_completed",
            ClientEvent::UpdateGameState(_) => "update_game_state",
            ClientEvent::NewRound(_) => "new_round",
            ClientEvent::ReadyForRound(_) => "ready_for_round",
            ClientEvent::CreateDiguRoom(_) => "create_digu_room",
            ClientEvent::JoinDiguRoom(_) => "join_digu_room",
            ClientEvent::LeaveDiguRoom(_) => "leave_digu_room",
            ClientEvent::DiguSetReady(_) => "digu_set_ready",
            ClientEvent::StartDiguGame(_) => "start_digu_game",
            ClientEvent::DiguDrawCard(_) => "digu_draw_card",
            ClientEvent::DiguDiscardCard(_) => "digu_discard_card",
            ClientEvent::DiguDeclare(_) => "digu_declare",
            ClientEvent::DiguUpdateState(_) => "digu_update_state",
            ClientEvent::DiguGameOver(_) => "digu_game_over",
            ClientEvent::DiguNewMatch(_) => "digu_new_match",
            ClientEvent::JoinQueue(_) => "join_queue",
            ClientEvent::LeaveQueue(_) => "leave_queue",
            ClientEvent::Reattach(_) => "reattach",
            ClientEvent::PingKeepalive(_) => "ping_keepalive",
        }
    }

    /// Payload contracts beyond what the derive enforces. Digu cards stay
    /// opaque; only the dhiha-ei trick card has a fixed shape.
    pub fn validate(&self) -> Result<(), CoordError> {
        match self {
            ClientEvent::CardPlayed(payload) => validate_card(&payload.card),
            _ => Ok(()),
        }
    }
}

/// Empty `{}` payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Empty {}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoom {
    pub player_name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDiguRoom {
    pub player_name: String,
    #[serde(default = "default_digu_players")]
    pub max_players: u8,
}

fn default_digu_players() -> u8 {
    4
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoom {
    pub room_id: String,
    pub player_name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetReady {
    #[serde(default)]
    pub ready: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapPlayer {
    pub from_position: u8,
}

/// Deal payload for `start_game` and `new_round`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartDeal {
    #[serde(default)]
    pub game_state: Value,
    #[serde(default)]
    pub hands: HandMap,
}

/// Deal payload for `start_digu_game` and `digu_new_match`; the server holds
/// the stock and discard piles for synchronization.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartDiguDeal {
    #[serde(default)]
    pub game_state: Value,
    #[serde(default)]
    pub hands: HandMap,
    #[serde(default)]
    pub stock_pile: Vec<Value>,
    #[serde(default)]
    pub discard_pile: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardPlayed {
    pub card: Value,
    /// Client-reported seat; the server trusts the session binding instead.
    #[serde(default)]
    pub position: Option<u8>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrickCompleted {
    pub winner: u8,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateGameState {
    #[serde(default)]
    pub game_state: Value,
}

/// Where a digu draw comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrawSource {
    Stock,
    Discard,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiguDrawCard {
    pub source: DrawSource,
    #[serde(default)]
    pub card: Option<Value>,
    #[serde(default)]
    pub position: Option<u8>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiguDiscardCard {
    pub card: Value,
    #[serde(default)]
    pub position: Option<u8>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiguDeclare {
    #[serde(default)]
    pub melds: Value,
    #[serde(default)]
    pub is_valid: bool,
    #[serde(default)]
    pub position: Option<u8>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiguGameOver {
    #[serde(default)]
    pub results: Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinQueue {
    pub game_type: GameType,
    pub player_name: String,
    #[serde(default)]
    pub max_players: Option<u8>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reattach {
    pub room_id: String,
    pub previous_oder_id: String,
}

// =============================================================================
// SERVER -> CLIENT EVENTS
// =============================================================================

/// Events pushed from server to client. There is no request/response
/// correlation beyond event-name pairing.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    Connected(ConnectedData),

    // Dhiha Ei rooms.
    RoomCreated(RoomCreatedData),
    RoomJoined(RoomJoinedData),
    PlayersChanged(PlayersData),
    PositionChanged(PositionChangedData),
    GameStarted(GameStartedData),
    RemoteCardPlayed(RemoteCardPlayedData),
    TurnChanged(TurnChangedData),
    TrickWinnerSet(TrickWinnerSetData),
    GameStateUpdated(GameStateData),
    RoundStarted(RoundStartedData),
    AllReadyForRound(EmptyData),
    PlayerDisconnected(PlayerGoneData),
    LeftRoom(EmptyData),

    // Digu rooms.
    DiguRoomCreated(RoomCreatedData),
    DiguRoomJoined(RoomJoinedData),
    DiguPlayersChanged(PlayersData),
    DiguGameStarted(GameStartedData),
    DiguCardDrawn(DiguCardDrawnData),
    DiguRemoteCardDiscarded(DiguCardDiscardedData),
    DiguTurnChanged(DiguTurnChangedData),
    DiguStockReshuffled(DiguStockReshuffledData),
    DiguRemoteDeclare(DiguDeclareData),
    DiguStateUpdated(GameStateData),
    DiguMatchStarted(DiguMatchStartedData),
    DiguRemoteGameOver(DiguGameOverData),
    DiguPlayerDisconnected(PlayerGoneData),
    DiguLeftRoom(EmptyData),

    // Matchmaking.
    QueueJoined(QueueStatusData),
    QueueUpdate(QueueStatusData),
    QueueLeft(EmptyData),
    MatchmakingMatched(MatchmakingMatchedData),

    Error(ErrorData),
}

impl ServerEvent {
    /// Build an `error { message }` event from a wire label.
    pub fn error(err: CoordError) -> Self {
        ServerEvent::Error(ErrorData {
            message: err.wire_label().to_string(),
        })
    }

    /// Serialize to the JSON text frame sent over the socket.
    pub fn to_frame(&self) -> String {
        // ServerEvent payloads are plain data; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| {
            "{\"event\":\"error\",\"data\":{\"message\":\"internal\"}}".to_string()
        })
    }
}

/// Serializes as `{}`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EmptyData {}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedData {
    pub sid: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomCreatedData {
    pub room_id: String,
    pub position: u8,
    pub players: PlayerMap,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_players: Option<u8>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomJoinedData {
    pub room_id: String,
    pub position: u8,
    pub players: PlayerMap,
    pub max_players: u8,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayersData {
    pub players: PlayerMap,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionChangedData {
    pub from_position: u8,
    pub to_position: u8,
    pub players: PlayerMap,
}

/// Per-recipient start payload: `hand` holds only the addressee's own cards.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStartedData {
    pub game_state: Value,
    pub hand: Value,
    pub position: u8,
    pub players: PlayerMap,
    pub current_player_index: u8,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCardPlayedData {
    pub card: Value,
    pub position: u8,
    pub current_player_index: u8,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnChangedData {
    pub current_player_index: u8,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrickWinnerSetData {
    pub winner: u8,
    pub current_player_index: u8,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStateData {
    pub game_state: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundStartedData {
    pub game_state: Value,
    pub hands: HandMap,
    pub current_player_index: u8,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerGoneData {
    pub position: u8,
    pub players: PlayerMap,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiguCardDrawnData {
    pub source: DrawSource,
    pub card: Value,
    pub position: u8,
    pub current_player_index: u8,
    pub game_phase: DiguPhase,
    pub stock_count: usize,
    pub discard_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiguCardDiscardedData {
    pub card: Value,
    pub position: u8,
    pub current_player_index: u8,
    pub game_phase: DiguPhase,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiguTurnChangedData {
    pub current_player_index: u8,
    pub game_phase: DiguPhase,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiguStockReshuffledData {
    pub stock_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiguDeclareData {
    pub position: u8,
    pub melds: Value,
    pub is_valid: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiguMatchStartedData {
    pub game_state: Value,
    pub hands: HandMap,
    pub current_player_index: u8,
    pub game_phase: DiguPhase,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiguGameOverData {
    pub results: Value,
    pub declared_by: u8,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatusData {
    pub players_in_queue: usize,
    pub players_needed: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchmakingMatchedData {
    pub room_id: String,
    pub position: u8,
    pub players: PlayerMap,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorData {
    pub message: String,
}

// Game-type-aware constructors: the digu event stream mirrors the dhiha-ei
// one under a `digu_` prefix.

pub fn players_changed(game: GameType, players: PlayerMap) -> ServerEvent {
    let data = PlayersData { players };
    match game {
        GameType::DhihaEi => ServerEvent::PlayersChanged(data),
        GameType::Digu => ServerEvent::DiguPlayersChanged(data),
    }
}

pub fn player_disconnected(game: GameType, position: u8, players: PlayerMap) -> ServerEvent {
    let data = PlayerGoneData { position, players };
    match game {
        GameType::DhihaEi => ServerEvent::PlayerDisconnected(data),
        GameType::Digu => ServerEvent::DiguPlayerDisconnected(data),
    }
}

pub fn room_joined(game: GameType, data: RoomJoinedData) -> ServerEvent {
    match game {
        GameType::DhihaEi => ServerEvent::RoomJoined(data),
        GameType::Digu => ServerEvent::DiguRoomJoined(data),
    }
}

pub fn left_room(game: GameType) -> ServerEvent {
    match game {
        GameType::DhihaEi => ServerEvent::LeftRoom(EmptyData {}),
        GameType::Digu => ServerEvent::DiguLeftRoom(EmptyData {}),
    }
}

pub fn game_started(game: GameType, data: GameStartedData) -> ServerEvent {
    match game {
        GameType::DhihaEi => ServerEvent::GameStarted(data),
        GameType::Digu => ServerEvent::DiguGameStarted(data),
    }
}
