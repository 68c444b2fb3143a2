//! Wire protocol: one JSON text frame per event, internally tagged with
//! `"type"`. Event names and payload shapes follow the socket.io surface the
//! browser client already speaks; the open-ended callback dispatch becomes
//! two closed variant sets so the compiler checks the protocol surface.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// emoji → distinct reacting display names, in first-reaction order.
pub type ReactionMap = BTreeMap<String, Vec<String>>;

/// A message as it travels to clients and as history entries in a join ack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub id: String,
    pub username: String,
    pub text: String,
    pub time: DateTime<Utc>,
    pub reactions: ReactionMap,
}

/// Identity payload of `set_username`. Early client iterations sent the bare
/// display name, later ones an `{email, displayName}` object; both are live.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Identity {
    Name(String),
    Account {
        #[serde(default)]
        email: Option<String>,
        #[serde(rename = "displayName")]
        display_name: String,
    },
}

impl Identity {
    pub fn display_name(&self) -> &str {
        match self {
            Identity::Name(name) => name,
            Identity::Account { display_name, .. } => display_name,
        }
    }

    pub fn email(&self) -> Option<&str> {
        match self {
            Identity::Name(_) => None,
            Identity::Account { email, .. } => email.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    SetUsername {
        username: Identity,
    },
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        room_name: String,
        password: String,
    },
    #[serde(rename_all = "camelCase")]
    DeleteRoom {
        room_name: String,
        password: String,
    },
    GetRooms,
    #[serde(rename_all = "camelCase")]
    SendMessage {
        room_name: String,
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    Typing {
        room_name: String,
    },
    #[serde(rename_all = "camelCase")]
    StopTyping {
        room_name: String,
    },
    #[serde(rename_all = "camelCase")]
    AddReaction {
        message_id: String,
        reaction: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Ack for `join_room`; `messages` are oldest-first.
    JoinResult {
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        messages: Option<Vec<WireMessage>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        users: Option<Vec<String>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Ack for `delete_room`.
    DeleteResult {
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Ack for `get_rooms`.
    Rooms { rooms: Vec<String> },
    ReceiveMessage {
        #[serde(flatten)]
        message: WireMessage,
    },
    RoomUsers { users: Vec<String> },
    UserTyping { username: String },
    UserStopTyping { username: String },
    RoomsUpdated { rooms: Vec<String> },
    #[serde(rename_all = "camelCase")]
    ReactionUpdated {
        message_id: String,
        reactions: ReactionMap,
    },
    /// Fire-and-forget operations have no ack; their store failures land here.
    Error { message: String },
}

impl ServerEvent {
    pub fn join_success(messages: Vec<WireMessage>, users: Vec<String>) -> Self {
        ServerEvent::JoinResult {
            ok: true,
            messages: Some(messages),
            users: Some(users),
            message: None,
        }
    }

    pub fn join_failure(message: String) -> Self {
        ServerEvent::JoinResult {
            ok: false,
            messages: None,
            users: None,
            message: Some(message),
        }
    }
}
