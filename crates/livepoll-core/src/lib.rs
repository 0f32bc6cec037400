//! Domain model for a single-room live poll: one teacher publishes a poll,
//! students answer it once each, everybody sees the tally.
//!
//! Everything here is synchronous and owned by the caller; the server crate
//! wraps it in an actor.

pub mod errors;
pub mod ids;
pub mod ledger;
pub mod poll;
pub mod protocol;
pub mod results;
pub mod resync;
pub mod roster;

pub use errors::{ErrorKind, PollError};
pub use ids::{ConnectionId, PollId, StudentId};
pub use ledger::{Answer, AnswerLedger};
pub use poll::{Poll, PollDraft, PollStatus};
pub use protocol::{AckFrame, InboundEvent, InboundFrame, ServerEvent, ServerMessage};
pub use results::{aggregate, PollResults};
pub use resync::{resync, Resync};
pub use roster::{ConnectionRegistry, JoinOutcome, Registration, Role, RosterEntry, Student};
