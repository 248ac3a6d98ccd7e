//! Network Layer
//!
//! WebSocket transport, event routing and the HTTP surfaces. Everything
//! stateful lives behind the [`server::Coordinator`]; this layer decodes
//! frames, checks predicates and fans results back out.

pub mod dispatcher;
pub mod handlers;
pub mod protocol;
pub mod server;

pub use protocol::{ClientEvent, GameType, ServerEvent};
pub use server::{Coordinator, ServerError};
