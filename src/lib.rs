//! # Thaasbai Coordination Server
//!
//! Realtime coordinator for two Maldivian card games: Dhiha Ei (four-player
//! partnership trick-taking) and Digu (2-4 player rummy-style draw/discard).
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      THAASBAI SERVER                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │  admission.rs   - Per-IP caps, connect ring, event limits     │
//! │  session.rs     - sid -> session map, bounded send buffers    │
//! │  room/          - Room state machine                          │
//! │  ├── code.rs    - Six-char join tokens, reduced alphabet      │
//! │  ├── mod.rs     - Lifecycle, teams, grace windows, fan-out    │
//! │  └── registry.rs- Per-game-type namespaces, read-mostly map   │
//! │  matchmaking.rs - FIFO queues with atomic drain-to-room       │
//! │  network/       - Transport and routing                       │
//! │  ├── protocol.rs- {event, data} frames, payload contracts     │
//! │  ├── dispatcher.rs - Routing table, predicate checks          │
//! │  ├── handlers.rs- Room and matchmaking mutations              │
//! │  └── server.rs  - WebSocket loop, grace tasks, HTTP surfaces  │
//! │  admin.rs       - Counters and the read-only snapshot         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Trust model
//!
//! The server stores `gameState` and `hands` as uninterpreted data: clients
//! run the game rules, the server enforces turn ownership, room membership
//! and protocol well-formedness, then fans events out. The one
//! privacy-sensitive filter it performs is stripping the start-of-game
//! `hands` payload down to each recipient's own position.
//!
//! ## Concurrency
//!
//! Parallel workers with per-room serialization: every room owns an
//! exclusive lock, the registry on top of them is read-mostly, and the
//! session registry has its own finer lock. Locks are acquired in the order
//! session registry -> room, and emission is non-blocking into bounded
//! per-session buffers.

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod admin;
pub mod admission;
pub mod config;
pub mod error;
pub mod matchmaking;
pub mod network;
pub mod room;
pub mod session;

use std::time::Duration;

// Re-export commonly used types
pub use config::ServerConfig;
pub use error::CoordError;
pub use network::server::Coordinator;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How long a disconnected player's seat is preserved for reattachment.
pub const GRACE_WINDOW: Duration = Duration::from_secs(30);

/// Server-side idle ping cadence.
pub const PING_INTERVAL: Duration = Duration::from_secs(25);

/// Transport read-idle beyond this closes the connection.
pub const READ_IDLE_TIMEOUT: Duration = Duration::from_secs(45);

/// Handler executions slower than this are logged, not cancelled.
pub const SLOW_HANDLER: Duration = Duration::from_secs(1);

/// Waiting rooms idle this long with fewer than two connected players are
/// garbage-collected.
pub const WAITING_ROOM_TTL: Duration = Duration::from_secs(60 * 60);

/// Finished rooms are destroyed this long after the game ended.
pub const FINISHED_ROOM_TTL: Duration = Duration::from_secs(5 * 60);

/// Cadence of the stale-room sweeper.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Lock-try budget for the health probe.
pub const HEALTH_LOCK_TIMEOUT: Duration = Duration::from_millis(50);
