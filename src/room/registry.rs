//! Room Registry
//!
//! Two disjoint namespaces (one per game type), each mapping room code to a
//! room behind its own lock. The top-level maps are read-mostly: lookups
//! take a shared lock, creation and deletion an exclusive one. Individual
//! rooms are opaque to other rooms' handlers.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use super::code::RoomCode;
use super::Room;
use crate::network::protocol::GameType;

type RoomTable = RwLock<HashMap<RoomCode, Arc<Mutex<Room>>>>;

#[derive(Default)]
pub struct RoomRegistry {
    dhiha_ei: RoomTable,
    digu: RoomTable,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, game: GameType) -> &RoomTable {
        match game {
            GameType::DhihaEi => &self.dhiha_ei,
            GameType::Digu => &self.digu,
        }
    }

    /// Create a room with a fresh unique code. Collisions on generation are
    /// resolved by re-rolling under the exclusive lock.
    pub async fn create(&self, game: GameType, max_players: u8) -> (RoomCode, Arc<Mutex<Room>>) {
        let mut table = self.table(game).write().await;
        let code = loop {
            let candidate = RoomCode::generate(&mut rand::thread_rng());
            if !table.contains_key(&candidate) {
                break candidate;
            }
        };
        let room = Arc::new(Mutex::new(Room::new(code.clone(), game, max_players)));
        table.insert(code.clone(), room.clone());
        (code, room)
    }

    pub async fn get(&self, game: GameType, code: &RoomCode) -> Option<Arc<Mutex<Room>>> {
        let table = self.table(game).read().await;
        table.get(code).cloned()
    }

    /// Returns true if the room existed.
    pub async fn remove(&self, game: GameType, code: &RoomCode) -> bool {
        let mut table = self.table(game).write().await;
        table.remove(code).is_some()
    }

    pub async fn count(&self, game: GameType) -> usize {
        self.table(game).read().await.len()
    }

    /// Snapshot of every room in a namespace, for sweeps and the admin view.
    pub async fn all(&self, game: GameType) -> Vec<(RoomCode, Arc<Mutex<Room>>)> {
        let table = self.table(game).read().await;
        table
            .iter()
            .map(|(code, room)| (code.clone(), room.clone()))
            .collect()
    }
}
