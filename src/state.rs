//! The live, in-memory half of the relay. Everything here is rebuilt empty
//! at process start; durable truth lives in the store. One lock guards both
//! halves so a membership migration (presence + roster) is a single
//! indivisible step — no join/leave/delete interleaves its mutations with
//! another's.

use crate::dispatch::Dispatcher;
use crate::presence::PresenceRegistry;

#[derive(Default)]
pub struct RelayState {
    pub presence: PresenceRegistry,
    pub roster: Dispatcher,
}
