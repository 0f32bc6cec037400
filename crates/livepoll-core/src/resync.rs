//! Remaining-time recomputation for participants that join or reconnect.
//!
//! The countdown is always derived from the server's `createdAt` and
//! `timeLimit`, never from a locally persisted value. A poll whose
//! countdown has run out but that the server still reports as active is
//! not treated as closed: the client waits for the server's `poll:closed`.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::poll::{Poll, PollStatus};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resync {
    /// No poll has been published yet.
    Idle,
    /// The poll is active and accepts answers for `remaining`.
    Counting { remaining: Duration },
    /// The countdown reached zero but the server has not closed the poll.
    AwaitingClose,
    Closed,
}

impl Resync {
    pub fn accepts_answers(self) -> bool {
        matches!(self, Self::Counting { .. } | Self::AwaitingClose)
    }

    /// Whole seconds to display; zero unless counting.
    pub fn display_seconds(self) -> u64 {
        match self {
            Self::Counting { remaining } => remaining.as_secs(),
            _ => 0,
        }
    }
}

/// `max(0, timeLimit - (now - createdAt))`.
pub fn remaining(poll: &Poll, now: DateTime<Utc>) -> Duration {
    (poll.deadline() - now).to_std().unwrap_or(Duration::ZERO)
}

pub fn resync(poll: Option<&Poll>, now: DateTime<Utc>) -> Resync {
    let Some(poll) = poll else {
        return Resync::Idle;
    };
    match poll.status {
        PollStatus::Closed => Resync::Closed,
        PollStatus::Active => {
            let remaining = remaining(poll, now);
            if remaining.is_zero() {
                Resync::AwaitingClose
            } else {
                Resync::Counting { remaining }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poll::PollDraft;
    use chrono::Duration as ChronoDuration;

    fn poll_created_at(created_at: DateTime<Utc>) -> Poll {
        Poll::open(PollDraft::new("Q", &["A", "B"], "A", 30), created_at).unwrap()
    }

    #[test]
    fn no_poll_is_idle() {
        assert_eq!(resync(None, Utc::now()), Resync::Idle);
    }

    #[test]
    fn late_join_counts_from_server_origin() {
        let created = Utc::now();
        let poll = poll_created_at(created);
        let now = created + ChronoDuration::seconds(12);
        assert_eq!(
            resync(Some(&poll), now),
            Resync::Counting {
                remaining: Duration::from_secs(18)
            }
        );
        assert_eq!(resync(Some(&poll), now).display_seconds(), 18);
    }

    #[test]
    fn expired_but_active_waits_for_server() {
        let created = Utc::now();
        let poll = poll_created_at(created);
        let now = created + ChronoDuration::seconds(45);
        let state = resync(Some(&poll), now);
        assert_eq!(state, Resync::AwaitingClose);
        assert!(state.accepts_answers());
        assert_eq!(state.display_seconds(), 0);
    }

    #[test]
    fn closed_poll_is_closed_regardless_of_clock() {
        let created = Utc::now();
        let mut poll = poll_created_at(created);
        let _ = poll.close();
        assert_eq!(resync(Some(&poll), created), Resync::Closed);
        assert!(!Resync::Closed.accepts_answers());
    }

    #[test]
    fn client_clock_behind_server_origin() {
        let created = Utc::now();
        let poll = poll_created_at(created);
        // Client clock 5 s behind the server origin.
        let now = created - ChronoDuration::seconds(5);
        assert_eq!(remaining(&poll, now), Duration::from_secs(35));
    }

    #[test]
    fn remaining_never_negative() {
        let created = Utc::now();
        let poll = poll_created_at(created);
        assert_eq!(remaining(&poll, created + ChronoDuration::hours(1)), Duration::ZERO);
    }
}
