//! Live presence: room name → display names currently joined. In-memory
//! only — the registry starts empty on every boot and is mutated solely by
//! the coordinator. Names are kept in join order and deduplicated, so two
//! connections under one display name collapse to a single entry.

use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct PresenceRegistry {
    rooms: HashMap<String, Vec<String>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `name` to `room`. Returns false if it was already present.
    pub fn add(&mut self, room: &str, name: &str) -> bool {
        let users = self.rooms.entry(room.to_owned()).or_default();
        if users.iter().any(|u| u == name) {
            return false;
        }
        users.push(name.to_owned());
        true
    }

    /// Removes `name` from `room`, dropping the entry once empty.
    /// Returns false if the name was not present.
    pub fn remove(&mut self, room: &str, name: &str) -> bool {
        let Some(users) = self.rooms.get_mut(room) else {
            return false;
        };
        let Some(pos) = users.iter().position(|u| u == name) else {
            return false;
        };
        users.remove(pos);
        if users.is_empty() {
            self.rooms.remove(room);
        }
        true
    }

    /// Removes `name` from every room except `keep`, returning the rooms it
    /// actually vacated. A display name lives in at most one room, so this
    /// is what makes a join a membership migration.
    pub fn remove_elsewhere(&mut self, name: &str, keep: &str) -> Vec<String> {
        let vacated: Vec<String> = self
            .rooms
            .iter()
            .filter(|(room, users)| room.as_str() != keep && users.iter().any(|u| u == name))
            .map(|(room, _)| room.clone())
            .collect();
        for room in &vacated {
            self.remove(room, name);
        }
        vacated
    }

    pub fn users(&self, room: &str) -> Vec<String> {
        self.rooms.get(room).cloned().unwrap_or_default()
    }

    pub fn clear_room(&mut self, room: &str) {
        self.rooms.remove(room);
    }
}
