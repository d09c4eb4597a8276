//! In-process live channel: one room per user id, one unbounded queue per
//! connected socket.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;
use trellis_core::model::notification::LiveEvent;
use trellis_core::notify::{LiveChannel, PushError};

struct Subscriber {
    id: u64,
    tx: UnboundedSender<String>,
}

/// A joined connection. Frames arrive on `rx` as encoded JSON text.
pub struct Subscription {
    pub id: u64,
    pub user_id: i64,
    pub rx: UnboundedReceiver<String>,
}

#[derive(Default)]
pub struct LiveRegistry {
    rooms: RwLock<HashMap<i64, Vec<Subscriber>>>,
    next_id: AtomicU64,
}

impl LiveRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the room of `user_id`.
    pub fn join(&self, user_id: i64) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.rooms
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(user_id)
            .or_default()
            .push(Subscriber { id, tx });
        debug!(user_id, subscription = id, "joined live room");
        Subscription { id, user_id, rx }
    }

    /// Leave the room; an empty room is dropped.
    pub fn leave(&self, subscription: &Subscription) {
        let mut rooms = self.rooms.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(room) = rooms.get_mut(&subscription.user_id) {
            room.retain(|subscriber| subscriber.id != subscription.id);
            if room.is_empty() {
                rooms.remove(&subscription.user_id);
            }
        }
        debug!(
            user_id = subscription.user_id,
            subscription = subscription.id,
            "left live room"
        );
    }

    /// Open connections for `user_id`.
    #[must_use]
    pub fn connections(&self, user_id: i64) -> usize {
        self.rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&user_id)
            .map_or(0, Vec::len)
    }
}

impl LiveChannel for LiveRegistry {
    fn push(&self, recipient_id: i64, event: &LiveEvent) -> Result<usize, PushError> {
        let frame = serde_json::to_string(event)?;
        let rooms = self.rooms.read().unwrap_or_else(PoisonError::into_inner);
        let Some(room) = rooms.get(&recipient_id) else {
            return Ok(0);
        };

        let reached = room
            .iter()
            .filter(|subscriber| subscriber.tx.send(frame.clone()).is_ok())
            .count();
        if reached == 0 && !room.is_empty() {
            return Err(PushError::Closed { recipient_id });
        }
        Ok(reached)
    }
}
