//! Room coordinator: the single writer of both the durable room state and
//! the in-memory registry. Joins validate access (creating the room on
//! first use), migrate membership, load history, and fan events out;
//! deletes tear down the room everywhere a session could still see it.
//!
//! Create/delete for one room name are serialized behind a per-name mutex
//! so an existence check and the write it justifies never straddle a stale
//! answer. Sends and reaction toggles skip that guard — they only touch
//! rows that already exist and last-write-wins is acceptable there.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::dispatch::EventSender;
use crate::error::{RelayError, RelayResult};
use crate::protocol::{ServerEvent, WireMessage};
use crate::reactions::ReactionLedger;
use crate::session::ANONYMOUS;
use crate::state::RelayState;
use crate::store::{RoomInsert, Store, StoredMessage};
use crate::utils::secret;

pub type SharedCoordinator = Arc<RoomCoordinator>;

/// Successful join ack payload: history oldest-first plus live presence.
#[derive(Debug)]
pub struct JoinOk {
    pub messages: Vec<WireMessage>,
    pub users: Vec<String>,
}

pub struct RoomCoordinator {
    store: Store,
    reactions: ReactionLedger,
    state: Mutex<RelayState>,
    room_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl RoomCoordinator {
    pub fn new(store: Store) -> SharedCoordinator {
        Arc::new(Self {
            reactions: ReactionLedger::new(store.clone()),
            store,
            state: Mutex::new(RelayState::default()),
            room_locks: Mutex::new(HashMap::new()),
        })
    }

    pub async fn connect(&self, session: Uuid, tx: EventSender) {
        self.state.lock().await.roster.register(session, tx);
    }

    pub async fn set_username(&self, session: Uuid, name: &str) {
        self.state.lock().await.roster.set_username(session, name);
    }

    pub async fn join(
        &self,
        session: Uuid,
        room_name: &str,
        password: &str,
    ) -> RelayResult<JoinOk> {
        let room_name = room_name.trim();
        if room_name.is_empty() {
            return Err(RelayError::MissingField("room name"));
        }
        if password.is_empty() {
            return Err(RelayError::MissingField("password"));
        }

        let requester = self.username_of(session).await;

        let guard = self.room_guard(room_name).await;
        let _serialized = guard.lock().await;

        let mut created = false;
        let existing = match self.store.find_room(room_name).await? {
            Some(room) => Some(room),
            None => {
                match self
                    .store
                    .create_room(room_name, &secret::seal(password), &requester)
                    .await?
                {
                    RoomInsert::Created => {
                        created = true;
                        None
                    }
                    // Lost the unique-name race to another process: re-read
                    // and fall through to the password check against the row
                    // that won.
                    RoomInsert::Exists => Some(
                        self.store
                            .find_room(room_name)
                            .await?
                            .ok_or(RelayError::NotFound("Room"))?,
                    ),
                }
            }
        };

        if let Some(room) = existing {
            if !secret::verify(&room.password, password) {
                return Err(RelayError::WrongPassword);
            }
        }

        let messages: Vec<WireMessage> = self
            .store
            .messages_for_room(room_name)
            .await?
            .into_iter()
            .map(StoredMessage::into_wire)
            .collect();

        // Membership migration is one indivisible step: the name leaves
        // every other room before it shows up in this one.
        let users = {
            let mut st = self.state.lock().await;
            for vacated in st.presence.remove_elsewhere(&requester, room_name) {
                let users = st.presence.users(&vacated);
                st.roster.to_room(&vacated, &ServerEvent::RoomUsers { users });
            }
            st.presence.add(room_name, &requester);
            st.roster.set_room(session, Some(room_name.to_owned()));
            let users = st.presence.users(room_name);
            st.roster
                .to_room(room_name, &ServerEvent::RoomUsers { users: users.clone() });
            users
        };

        tracing::info!(room = room_name, user = %requester, created, "joined room");

        if created {
            self.broadcast_room_list().await;
        }

        Ok(JoinOk { messages, users })
    }

    pub async fn delete_room(&self, room_name: &str, password: &str) -> RelayResult<()> {
        let room_name = room_name.trim();
        if room_name.is_empty() {
            return Err(RelayError::MissingField("room name"));
        }
        if password.is_empty() {
            return Err(RelayError::MissingField("password"));
        }

        let guard = self.room_guard(room_name).await;
        let _serialized = guard.lock().await;

        let room = self
            .store
            .find_room(room_name)
            .await?
            .ok_or(RelayError::NotFound("Room"))?;
        if !secret::verify(&room.password, password) {
            return Err(RelayError::WrongPassword);
        }

        self.store.delete_room(room_name).await?;

        {
            let mut st = self.state.lock().await;
            st.presence.clear_room(room_name);
            // sessions that still think they are here must stop resolving
            // to the dead room
            st.roster.clear_room(room_name);
        }

        tracing::info!(room = room_name, "room deleted");
        self.broadcast_room_list().await;
        Ok(())
    }

    pub async fn list_rooms(&self) -> RelayResult<Vec<String>> {
        self.store.list_rooms().await
    }

    /// Fire-and-forget by contract: empty sends and sends racing a room
    /// delete are no-ops, not errors.
    pub async fn send_message(
        &self,
        session: Uuid,
        room_name: &str,
        text: &str,
    ) -> RelayResult<()> {
        let text = text.trim();
        if text.is_empty() || self.store.find_room(room_name).await?.is_none() {
            return Ok(());
        }

        let author = self.username_of(session).await;
        let msg = self.store.insert_message(room_name, &author, text).await?;
        self.state.lock().await.roster.to_room(
            room_name,
            &ServerEvent::ReceiveMessage {
                message: msg.into_wire(),
            },
        );
        Ok(())
    }

    pub async fn typing(&self, room_name: &str, username: &str) {
        self.state.lock().await.roster.to_room(
            room_name,
            &ServerEvent::UserTyping {
                username: username.to_owned(),
            },
        );
    }

    pub async fn stop_typing(&self, room_name: &str, username: &str) {
        self.state.lock().await.roster.to_room(
            room_name,
            &ServerEvent::UserStopTyping {
                username: username.to_owned(),
            },
        );
    }

    pub async fn toggle_reaction(
        &self,
        session: Uuid,
        message_id: &str,
        emoji: &str,
    ) -> RelayResult<()> {
        let username = self.username_of(session).await;
        let Some((room, reactions)) = self.reactions.toggle(message_id, emoji, &username).await?
        else {
            return Ok(());
        };
        self.state.lock().await.roster.to_room(
            &room,
            &ServerEvent::ReactionUpdated {
                message_id: message_id.to_owned(),
                reactions,
            },
        );
        Ok(())
    }

    /// Transport-level disconnect: immediate and unconditional. The name
    /// leaves presence only when no other live connection under it is still
    /// in the room.
    pub async fn disconnect(&self, session: Uuid) {
        let mut st = self.state.lock().await;
        let Some(departed) = st.roster.unregister(session) else {
            return;
        };
        let Some(room) = departed.room else {
            return;
        };
        let name = departed.username.unwrap_or_else(|| ANONYMOUS.to_owned());
        if st.roster.name_in_room(&name, &room) {
            return;
        }
        if st.presence.remove(&room, &name) {
            let users = st.presence.users(&room);
            st.roster.to_room(&room, &ServerEvent::RoomUsers { users });
        }
    }

    async fn username_of(&self, session: Uuid) -> String {
        self.state
            .lock()
            .await
            .roster
            .username(session)
            .unwrap_or(ANONYMOUS)
            .to_owned()
    }

    async fn room_guard(&self, name: &str) -> Arc<Mutex<()>> {
        // guards are retained for the process lifetime; the name set is small
        let mut locks = self.room_locks.lock().await;
        locks.entry(name.to_owned()).or_default().clone()
    }

    async fn broadcast_room_list(&self) {
        match self.store.list_rooms().await {
            Ok(rooms) => self
                .state
                .lock()
                .await
                .roster
                .to_all(&ServerEvent::RoomsUpdated { rooms }),
            // the write already committed; clients converge on their next
            // get_rooms
            Err(err) => tracing::warn!(error = ?err, "room list broadcast skipped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory_store;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    async fn coordinator() -> (Store, SharedCoordinator) {
        let store = memory_store().await;
        (store.clone(), RoomCoordinator::new(store))
    }

    async fn connect(
        co: &SharedCoordinator,
        name: &str,
    ) -> (Uuid, UnboundedReceiver<ServerEvent>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        co.connect(id, tx).await;
        if !name.is_empty() {
            co.set_username(id, name).await;
        }
        (id, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    fn received_texts(events: &[ServerEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|ev| match ev {
                ServerEvent::ReceiveMessage { message } => Some(message.text.clone()),
                _ => None,
            })
            .collect()
    }

    fn last_room_users(events: &[ServerEvent]) -> Option<Vec<String>> {
        events
            .iter()
            .filter_map(|ev| match ev {
                ServerEvent::RoomUsers { users } => Some(users.clone()),
                _ => None,
            })
            .last()
    }

    #[tokio::test]
    async fn general_room_scenario() {
        let (_, co) = coordinator().await;
        let (alice, mut alice_rx) = connect(&co, "alice").await;
        let (bob, _bob_rx) = connect(&co, "bob").await;

        let ack = co.join(alice, "general", "pw1").await.unwrap();
        assert!(ack.messages.is_empty());
        assert_eq!(ack.users, vec!["alice"]);

        drain(&mut alice_rx);
        let err = co.join(bob, "general", "pw2").await.unwrap_err();
        assert!(matches!(err, RelayError::WrongPassword));
        // the rejected join must not touch presence
        assert!(last_room_users(&drain(&mut alice_rx)).is_none());

        let ack = co.join(bob, "general", "pw1").await.unwrap();
        assert_eq!(ack.users, vec!["alice", "bob"]);
        assert_eq!(
            last_room_users(&drain(&mut alice_rx)),
            Some(vec!["alice".into(), "bob".into()])
        );
    }

    #[tokio::test]
    async fn empty_fields_are_rejected_before_the_store() {
        let (store, co) = coordinator().await;
        let (alice, _rx) = connect(&co, "alice").await;

        assert!(matches!(
            co.join(alice, "", "pw").await.unwrap_err(),
            RelayError::MissingField("room name")
        ));
        assert!(matches!(
            co.join(alice, "   ", "pw").await.unwrap_err(),
            RelayError::MissingField("room name")
        ));
        assert!(matches!(
            co.join(alice, "general", "").await.unwrap_err(),
            RelayError::MissingField("password")
        ));
        assert!(store.list_rooms().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn racing_first_joiners_converge_on_one_room() {
        let (store, co) = coordinator().await;
        let (a, _rx_a) = connect(&co, "alice").await;
        let (b, _rx_b) = connect(&co, "bob").await;

        let (ra, rb) = tokio::join!(co.join(a, "fresh", "pw1"), co.join(b, "fresh", "pw2"));
        // different secrets: whoever committed first owns the password, the
        // other is re-validated as a joiner and rejected
        assert_eq!(ra.is_ok() as usize + rb.is_ok() as usize, 1);
        let loser = if ra.is_err() { ra } else { rb };
        assert!(matches!(loser.unwrap_err(), RelayError::WrongPassword));
        assert_eq!(store.list_rooms().await.unwrap(), vec!["fresh"]);
    }

    #[tokio::test]
    async fn racing_first_joiners_with_one_secret_both_enter() {
        let (store, co) = coordinator().await;
        let (a, _rx_a) = connect(&co, "alice").await;
        let (b, _rx_b) = connect(&co, "bob").await;

        let (ra, rb) = tokio::join!(co.join(a, "fresh", "pw"), co.join(b, "fresh", "pw"));
        let (ra, rb) = (ra.unwrap(), rb.unwrap());
        assert_eq!(store.list_rooms().await.unwrap(), vec!["fresh"]);
        // the later join of the two saw both names
        let longest = if ra.users.len() >= rb.users.len() {
            ra.users
        } else {
            rb.users
        };
        assert_eq!(longest.len(), 2);
    }

    #[tokio::test]
    async fn joining_a_second_room_migrates_membership() {
        let (_, co) = coordinator().await;
        let (alice, _alice_rx) = connect(&co, "alice").await;
        let (bob, mut bob_rx) = connect(&co, "bob").await;

        co.join(alice, "a", "pw").await.unwrap();
        co.join(bob, "a", "pw").await.unwrap();
        drain(&mut bob_rx);

        let ack = co.join(alice, "b", "pw").await.unwrap();
        assert_eq!(ack.users, vec!["alice"]);
        // bob, still in room a, saw alice leave
        assert_eq!(last_room_users(&drain(&mut bob_rx)), Some(vec!["bob".into()]));
    }

    #[tokio::test]
    async fn message_and_reaction_fan_out() {
        let (_, co) = coordinator().await;
        let (alice, mut alice_rx) = connect(&co, "alice").await;
        let (bob, mut bob_rx) = connect(&co, "bob").await;
        co.join(alice, "general", "pw").await.unwrap();
        co.join(bob, "general", "pw").await.unwrap();
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        co.send_message(alice, "general", "hi").await.unwrap();
        let alice_events = drain(&mut alice_rx);
        assert_eq!(received_texts(&alice_events), vec!["hi"]);
        let bob_events = drain(&mut bob_rx);
        assert_eq!(received_texts(&bob_events), vec!["hi"]);

        let ServerEvent::ReceiveMessage { message } = &bob_events[0] else {
            panic!("expected receive_message");
        };
        assert!(message.reactions.is_empty());
        assert_eq!(message.username, "alice");

        co.toggle_reaction(bob, &message.id, "👍").await.unwrap();
        for rx in [&mut alice_rx, &mut bob_rx] {
            let events = drain(rx);
            let Some(ServerEvent::ReactionUpdated { reactions, .. }) = events.last() else {
                panic!("expected reaction_updated");
            };
            assert_eq!(reactions.get("👍").unwrap(), &vec!["bob".to_string()]);
        }

        // toggling again retracts bob and leaves the empty entry visible
        co.toggle_reaction(bob, &message.id, "👍").await.unwrap();
        let events = drain(&mut alice_rx);
        let Some(ServerEvent::ReactionUpdated { reactions, .. }) = events.last() else {
            panic!("expected reaction_updated");
        };
        assert!(reactions.get("👍").unwrap().is_empty());
    }

    #[tokio::test]
    async fn history_is_returned_oldest_first() {
        let (_, co) = coordinator().await;
        let (alice, _rx) = connect(&co, "alice").await;
        co.join(alice, "general", "pw").await.unwrap();
        co.send_message(alice, "general", "one").await.unwrap();
        co.send_message(alice, "general", "two").await.unwrap();

        let (bob, _bob_rx) = connect(&co, "bob").await;
        let ack = co.join(bob, "general", "pw").await.unwrap();
        let texts: Vec<&str> = ack.messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn empty_or_blank_sends_are_dropped() {
        let (store, co) = coordinator().await;
        let (alice, mut alice_rx) = connect(&co, "alice").await;
        co.join(alice, "general", "pw").await.unwrap();
        drain(&mut alice_rx);

        co.send_message(alice, "general", "   ").await.unwrap();
        co.send_message(alice, "no-such-room", "hi").await.unwrap();
        assert!(received_texts(&drain(&mut alice_rx)).is_empty());
        assert!(store.messages_for_room("general").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_room_tears_down_everything() {
        let (store, co) = coordinator().await;
        let (alice, mut alice_rx) = connect(&co, "alice").await;
        co.join(alice, "general", "pw").await.unwrap();
        co.send_message(alice, "general", "hi").await.unwrap();

        assert!(matches!(
            co.delete_room("nope", "pw").await.unwrap_err(),
            RelayError::NotFound("Room")
        ));
        assert!(matches!(
            co.delete_room("general", "wrong").await.unwrap_err(),
            RelayError::WrongPassword
        ));

        co.delete_room("general", "pw").await.unwrap();
        assert!(co.list_rooms().await.unwrap().is_empty());
        assert!(store.messages_for_room("general").await.unwrap().is_empty());

        // a send still in flight toward the dead room is a no-op
        drain(&mut alice_rx);
        co.send_message(alice, "general", "late").await.unwrap();
        assert!(received_texts(&drain(&mut alice_rx)).is_empty());
        assert!(store.messages_for_room("general").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn recreating_a_deleted_name_starts_clean() {
        let (_, co) = coordinator().await;
        let (alice, _rx) = connect(&co, "alice").await;
        co.join(alice, "general", "old-pw").await.unwrap();
        co.send_message(alice, "general", "hi").await.unwrap();
        co.delete_room("general", "old-pw").await.unwrap();

        // the old password died with the room
        let ack = co.join(alice, "general", "new-pw").await.unwrap();
        assert!(ack.messages.is_empty());
        assert_eq!(ack.users, vec!["alice"]);
    }

    #[tokio::test]
    async fn disconnect_clears_presence_immediately() {
        let (_, co) = coordinator().await;
        let (alice, _alice_rx) = connect(&co, "alice").await;
        let (bob, mut bob_rx) = connect(&co, "bob").await;
        co.join(alice, "general", "pw").await.unwrap();
        co.join(bob, "general", "pw").await.unwrap();
        drain(&mut bob_rx);

        co.disconnect(alice).await;
        assert_eq!(last_room_users(&drain(&mut bob_rx)), Some(vec!["bob".into()]));
    }

    #[tokio::test]
    async fn same_name_twice_collapses_until_the_last_leaves() {
        let (_, co) = coordinator().await;
        let (alice1, _rx1) = connect(&co, "alice").await;
        let (alice2, _rx2) = connect(&co, "alice").await;
        let (bob, mut bob_rx) = connect(&co, "bob").await;
        co.join(alice1, "general", "pw").await.unwrap();
        co.join(alice2, "general", "pw").await.unwrap();
        let ack = co.join(bob, "general", "pw").await.unwrap();
        assert_eq!(ack.users, vec!["alice", "bob"]);
        drain(&mut bob_rx);

        co.disconnect(alice1).await;
        // alice is still connected once, presence must not change
        assert!(last_room_users(&drain(&mut bob_rx)).is_none());

        co.disconnect(alice2).await;
        assert_eq!(last_room_users(&drain(&mut bob_rx)), Some(vec!["bob".into()]));
    }

    #[tokio::test]
    async fn unnamed_sessions_author_as_anonymous() {
        let (_, co) = coordinator().await;
        let (ghost, mut ghost_rx) = connect(&co, "").await;
        let ack = co.join(ghost, "general", "pw").await.unwrap();
        assert_eq!(ack.users, vec![ANONYMOUS]);

        drain(&mut ghost_rx);
        co.send_message(ghost, "general", "boo").await.unwrap();
        let events = drain(&mut ghost_rx);
        let ServerEvent::ReceiveMessage { message } = &events[0] else {
            panic!("expected receive_message");
        };
        assert_eq!(message.username, ANONYMOUS);
    }

    #[tokio::test]
    async fn new_room_announces_the_room_list_globally() {
        let (_, co) = coordinator().await;
        let (alice, _alice_rx) = connect(&co, "alice").await;
        let (_lurker, mut lurker_rx) = connect(&co, "lurker").await;

        co.join(alice, "general", "pw").await.unwrap();
        let events = drain(&mut lurker_rx);
        assert!(events.iter().any(|ev| matches!(
            ev,
            ServerEvent::RoomsUpdated { rooms } if rooms == &vec!["general".to_string()]
        )));

        // a plain re-join of an existing room is not a list change
        co.join(alice, "general", "pw").await.unwrap();
        assert!(drain(&mut lurker_rx)
            .iter()
            .all(|ev| !matches!(ev, ServerEvent::RoomsUpdated { .. })));
    }
}
