//! Matchmaking Queues
//!
//! One FIFO queue per game type. Dhiha Ei matches exactly four; digu entries
//! carry the table size they asked for (clamped 2..=4) and only match
//! against entries wanting the same size. The pop happens inside the queue
//! lock, so a session can never be drained into two rooms; room synthesis
//! and session binding happen after the drained batch leaves the lock.

use tokio::sync::Mutex;

use crate::network::protocol::GameType;
use crate::session::{now_unix, OutboundHandle, Sid};

/// A waiting player.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub sid: Sid,
    pub player_name: String,
    pub joined_at: u64,
    /// Target table size (always 4 for dhiha-ei).
    pub desired_max_players: u8,
    pub handle: OutboundHandle,
}

/// Queue position report for one still-waiting entry.
#[derive(Debug, Clone)]
pub struct QueueStatus {
    pub handle: OutboundHandle,
    pub players_in_queue: usize,
    pub players_needed: usize,
}

/// What happened on an enqueue: the caller's own status, an optional drained
/// match batch, and updates for everyone left waiting.
#[derive(Debug)]
pub struct EnqueueOutcome {
    pub players_in_queue: usize,
    pub players_needed: usize,
    pub matched: Option<Vec<QueueEntry>>,
    pub waiting: Vec<QueueStatus>,
}

#[derive(Default)]
pub struct MatchQueues {
    dhiha_ei: Mutex<Vec<QueueEntry>>,
    digu: Mutex<Vec<QueueEntry>>,
}

impl MatchQueues {
    pub fn new() -> Self {
        Self::default()
    }

    fn lane(&self, game: GameType) -> &Mutex<Vec<QueueEntry>> {
        match game {
            GameType::DhihaEi => &self.dhiha_ei,
            GameType::Digu => &self.digu,
        }
    }

    /// Append a session (re-joining replaces the old entry) and drain a
    /// match batch if the target size was reached.
    pub async fn enqueue(
        &self,
        game: GameType,
        sid: Sid,
        player_name: String,
        desired_max_players: u8,
        handle: OutboundHandle,
    ) -> EnqueueOutcome {
        let mut queue = self.lane(game).lock().await;
        queue.retain(|e| e.sid != sid);
        queue.push(QueueEntry {
            sid,
            player_name,
            joined_at: now_unix(),
            desired_max_players,
            handle,
        });

        let group_size = group_count(&queue, desired_max_players);
        let players_in_queue = queue.len();
        let players_needed = (desired_max_players as usize).saturating_sub(group_size);

        let matched = drain_batch(game, &mut queue);
        let waiting = waiting_statuses(&queue);

        EnqueueOutcome {
            players_in_queue,
            players_needed,
            matched,
            waiting,
        }
    }

    /// Best-effort removal; always succeeds. Returns whether the session was
    /// present plus updates for the entries left behind.
    pub async fn remove(&self, game: GameType, sid: &str) -> (bool, Vec<QueueStatus>) {
        let mut queue = self.lane(game).lock().await;
        let before = queue.len();
        queue.retain(|e| e.sid != sid);
        let was_present = queue.len() < before;
        let waiting = if was_present {
            waiting_statuses(&queue)
        } else {
            Vec::new()
        };
        (was_present, waiting)
    }

    /// Remove a disconnected session from both lanes.
    pub async fn remove_everywhere(&self, sid: &str) -> Vec<QueueStatus> {
        let mut updates = Vec::new();
        for game in [GameType::DhihaEi, GameType::Digu] {
            let (was_present, waiting) = self.remove(game, sid).await;
            if was_present {
                updates.extend(waiting);
            }
        }
        updates
    }

    pub async fn len(&self, game: GameType) -> usize {
        self.lane(game).lock().await.len()
    }

    pub async fn contains(&self, game: GameType, sid: &str) -> bool {
        self.lane(game).lock().await.iter().any(|e| e.sid == sid)
    }
}

fn group_count(queue: &[QueueEntry], desired: u8) -> usize {
    queue
        .iter()
        .filter(|e| e.desired_max_players == desired)
        .count()
}

/// Pop the head entries of the first size-group that reached its target.
/// Must be called with the lane lock held.
fn drain_batch(game: GameType, queue: &mut Vec<QueueEntry>) -> Option<Vec<QueueEntry>> {
    match game {
        GameType::DhihaEi => {
            if queue.len() >= 4 {
                Some(queue.drain(..4).collect())
            } else {
                None
            }
        }
        GameType::Digu => {
            let mut target = None;
            for i in 0..queue.len() {
                let want = queue[i].desired_max_players;
                if group_count(queue, want) >= want as usize {
                    target = Some(want);
                    break;
                }
            }
            let want = target?;

            let mut batch = Vec::new();
            let mut kept = Vec::new();
            for entry in queue.drain(..) {
                if entry.desired_max_players == want && batch.len() < want as usize {
                    batch.push(entry);
                } else {
                    kept.push(entry);
                }
            }
            *queue = kept;
            Some(batch)
        }
    }
}

fn waiting_statuses(queue: &[QueueEntry]) -> Vec<QueueStatus> {
    queue
        .iter()
        .map(|entry| {
            let same = group_count(queue, entry.desired_max_players);
            QueueStatus {
                handle: entry.handle.clone(),
                players_in_queue: queue.len(),
                players_needed: (entry.desired_max_players as usize).saturating_sub(same),
            }
        })
        .collect()
}
