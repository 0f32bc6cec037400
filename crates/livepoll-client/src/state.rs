//! Client-side mirror of the server's poll state.
//!
//! Only server events change the mirror; the countdown is derived from the
//! poll's `createdAt` on demand so a reconnecting client picks up where the
//! server is, not where it left off.

use chrono::{DateTime, Utc};
use livepoll_core::ids::StudentId;
use livepoll_core::poll::{Poll, PollStatus};
use livepoll_core::protocol::{ErrorNotice, ServerEvent};
use livepoll_core::results::PollResults;
use livepoll_core::resync::{resync, Resync};
use livepoll_core::roster::RosterEntry;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StudentIdentity {
    pub id: StudentId,
    pub name: String,
}

#[derive(Clone, Debug, Default)]
pub struct ClientState {
    /// Persistent identity; cleared when the teacher kicks this student.
    pub identity: Option<StudentIdentity>,
    pub poll: Option<Poll>,
    pub results: Option<PollResults>,
    pub roster: Vec<RosterEntry>,
    pub has_answered: bool,
    /// Message from the last `student:kicked`.
    pub kicked: Option<String>,
    pub last_error: Option<ErrorNotice>,
}

impl ClientState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn student(id: StudentId, name: impl Into<String>) -> Self {
        Self {
            identity: Some(StudentIdentity {
                id,
                name: name.into(),
            }),
            ..Self::default()
        }
    }

    pub fn apply(&mut self, event: &ServerEvent) {
        match event {
            ServerEvent::NewPoll(poll) => {
                self.poll = Some(poll.clone());
                self.results = None;
                self.has_answered = false;
            }
            ServerEvent::CurrentPoll(poll) => {
                let same = self.poll.as_ref().map(|p| &p.id) == poll.as_ref().map(|p| &p.id);
                if !same {
                    self.results = None;
                    self.has_answered = false;
                }
                self.poll = poll.clone();
            }
            ServerEvent::Results(results) => {
                if self.is_current(results) {
                    self.results = Some(results.clone());
                }
            }
            ServerEvent::Closed(results) => {
                if let Some(poll) = self.poll.as_mut().filter(|p| p.id == results.poll_id) {
                    poll.status = PollStatus::Closed;
                }
                if self.is_current(results) {
                    self.results = Some(results.clone());
                }
            }
            ServerEvent::StudentList(roster) => {
                self.roster = roster.clone();
                if let Some(ref me) = self.identity {
                    if let Some(entry) = roster.iter().find(|e| e.id == me.id) {
                        self.has_answered = entry.has_answered;
                    }
                }
            }
            ServerEvent::StudentKicked(notice) => {
                self.identity = None;
                self.has_answered = false;
                self.kicked = Some(notice.message.clone());
            }
            ServerEvent::Error(notice) => self.last_error = Some(notice.clone()),
            ServerEvent::AnswerNew(_)
            | ServerEvent::StudentJoined(_)
            | ServerEvent::StudentLeft(_) => {}
        }
    }

    /// Record a successful `poll:answer` acknowledgement.
    pub fn mark_answered(&mut self) {
        self.has_answered = true;
    }

    pub fn resync(&self, now: DateTime<Utc>) -> Resync {
        resync(self.poll.as_ref(), now)
    }

    pub fn can_answer(&self, now: DateTime<Utc>) -> bool {
        self.identity.is_some() && !self.has_answered && self.resync(now).accepts_answers()
    }

    fn is_current(&self, results: &PollResults) -> bool {
        self.poll.as_ref().map_or(true, |p| p.id == results.poll_id)
    }
}
