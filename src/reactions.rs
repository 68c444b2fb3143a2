//! Reaction ledger: toggles a user on an emoji's reactor list and persists
//! the updated map. A toggle is its own inverse — a name is never recorded
//! twice for one emoji, and toggling it back off restores the prior state.
//! Un-reacted emojis keep their (empty) entry so clients see `"👍": []`
//! rather than the key vanishing.

use crate::error::RelayResult;
use crate::protocol::ReactionMap;
use crate::store::Store;

pub struct ReactionLedger {
    store: Store,
}

impl ReactionLedger {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Returns the message's room and updated map for broadcast, or `None`
    /// when the message no longer exists (a reaction racing a room delete
    /// is a benign no-op).
    pub async fn toggle(
        &self,
        message_id: &str,
        emoji: &str,
        username: &str,
    ) -> RelayResult<Option<(String, ReactionMap)>> {
        let Some(mut msg) = self.store.find_message(message_id).await? else {
            return Ok(None);
        };

        let reactors = msg.reactions.entry(emoji.to_owned()).or_default();
        match reactors.iter().position(|name| name == username) {
            Some(pos) => {
                reactors.remove(pos);
            }
            None => reactors.push(username.to_owned()),
        }

        self.store.update_reactions(message_id, &msg.reactions).await?;
        Ok(Some((msg.room_name, msg.reactions)))
    }
}
