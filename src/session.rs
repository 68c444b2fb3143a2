//! Per-connection state owned by the connection's task. The current room
//! lives in the dispatcher roster (the coordinator migrates it); what stays
//! here is the identity used for authorship and the typing deadline the
//! connection loop polls.

use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

/// Authorship fallback until `set_username` arrives.
pub const ANONYMOUS: &str = "Anonymous";

/// How long a typing indicator survives without another keystroke before
/// the relay retracts it on the client's behalf.
pub const TYPING_TTL: Duration = Duration::from_secs(3);

#[derive(Debug)]
pub struct Session {
    pub id: Uuid,
    username: Option<String>,
    typing: Option<Typing>,
}

#[derive(Debug)]
struct Typing {
    room: String,
    deadline: Instant,
}

impl Session {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            username: None,
            typing: None,
        }
    }

    /// Idempotent per connection; resending replaces the name used for
    /// events sent afterwards.
    pub fn set_username(&mut self, name: String) {
        self.username = Some(name);
    }

    pub fn display_name(&self) -> &str {
        self.username.as_deref().unwrap_or(ANONYMOUS)
    }

    /// Arms (or re-arms) the typing timeout for `room`.
    pub fn arm_typing(&mut self, room: String) {
        self.typing = Some(Typing {
            room,
            deadline: Instant::now() + TYPING_TTL,
        });
    }

    /// Clears the typing timeout, returning the room an indicator is still
    /// live in — the caller owes that room a stop-typing event.
    pub fn disarm_typing(&mut self) -> Option<String> {
        self.typing.take().map(|t| t.room)
    }

    pub fn typing_deadline(&self) -> Option<Instant> {
        self.typing.as_ref().map(|t| t.deadline)
    }
}
