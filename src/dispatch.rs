//! Event fan-out. Every live connection registers an unbounded sender here,
//! tagged with its display name and current room; room-scoped events go to
//! the sessions whose tag matches, room-list changes go to everyone.
//! Receivers that have gone away are pruned on the next send that hits them.

use std::collections::HashMap;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::ServerEvent;
use crate::session::ANONYMOUS;

pub type EventSender = mpsc::UnboundedSender<ServerEvent>;

struct Subscriber {
    username: Option<String>,
    room: Option<String>,
    tx: EventSender,
}

/// What a session left behind when it unregistered.
#[derive(Debug)]
pub struct Departed {
    pub username: Option<String>,
    pub room: Option<String>,
}

#[derive(Default)]
pub struct Dispatcher {
    sessions: HashMap<Uuid, Subscriber>,
}

impl Dispatcher {
    pub fn register(&mut self, id: Uuid, tx: EventSender) {
        self.sessions.insert(
            id,
            Subscriber {
                username: None,
                room: None,
                tx,
            },
        );
    }

    pub fn unregister(&mut self, id: Uuid) -> Option<Departed> {
        self.sessions.remove(&id).map(|sub| Departed {
            username: sub.username,
            room: sub.room,
        })
    }

    pub fn set_username(&mut self, id: Uuid, name: &str) {
        if let Some(sub) = self.sessions.get_mut(&id) {
            sub.username = Some(name.to_owned());
        }
    }

    pub fn set_room(&mut self, id: Uuid, room: Option<String>) {
        if let Some(sub) = self.sessions.get_mut(&id) {
            sub.room = room;
        }
    }

    pub fn username(&self, id: Uuid) -> Option<&str> {
        self.sessions.get(&id)?.username.as_deref()
    }

    /// True if any registered session under `name` is currently in `room`.
    /// Presence collapses connections by display name, so the last one out
    /// is the one that clears the entry. Unnamed sessions count under the
    /// anonymous fallback, the same name they joined presence with.
    pub fn name_in_room(&self, name: &str, room: &str) -> bool {
        self.sessions.values().any(|sub| {
            sub.username.as_deref().unwrap_or(ANONYMOUS) == name
                && sub.room.as_deref() == Some(room)
        })
    }

    /// Detach every session that believes it is in `room` (used after a
    /// delete so stale sends stop resolving to the dead room).
    pub fn clear_room(&mut self, room: &str) {
        for sub in self.sessions.values_mut() {
            if sub.room.as_deref() == Some(room) {
                sub.room = None;
            }
        }
    }

    pub fn to_room(&mut self, room: &str, event: &ServerEvent) {
        self.sessions.retain(|_, sub| {
            if sub.room.as_deref() != Some(room) {
                return true;
            }
            sub.tx.send(event.clone()).is_ok()
        });
    }

    pub fn to_all(&mut self, event: &ServerEvent) {
        self.sessions
            .retain(|_, sub| sub.tx.send(event.clone()).is_ok());
    }
}
