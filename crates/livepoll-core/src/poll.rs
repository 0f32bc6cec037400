//! The poll entity and its `active -> closed` lifecycle.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::PollError;
use crate::ids::PollId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollStatus {
    Active,
    Closed,
}

impl PollStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }
}

/// Teacher-supplied fields of a poll, before validation.
///
/// Every field defaults so that a missing field becomes a validation error
/// with a useful message instead of a generic decode failure.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PollDraft {
    pub question: String,
    pub options: Vec<String>,
    pub correct_answer: Option<String>,
    pub time_limit: Option<u64>,
}

impl PollDraft {
    pub fn new(question: &str, options: &[&str], correct_answer: &str, time_limit: u64) -> Self {
        Self {
            question: question.to_string(),
            options: options.iter().map(|o| (*o).to_string()).collect(),
            correct_answer: Some(correct_answer.to_string()),
            time_limit: Some(time_limit),
        }
    }

    pub fn validate(&self) -> Result<(), PollError> {
        if self.question.trim().is_empty() {
            return Err(PollError::validation("Question must not be empty"));
        }
        if self.options.len() < 2 {
            return Err(PollError::validation("A poll needs at least two options"));
        }
        let Some(ref correct) = self.correct_answer else {
            return Err(PollError::validation("Missing correct answer"));
        };
        if !self.options.iter().any(|o| o == correct) {
            return Err(PollError::validation("Correct answer must be one of the options"));
        }
        match self.time_limit {
            Some(secs) if secs > 0 => Ok(()),
            _ => Err(PollError::validation("Time limit must be a positive number of seconds")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Poll {
    pub id: PollId,
    pub question: String,
    pub options: Vec<String>,
    pub correct_answer: String,
    /// Seconds.
    pub time_limit: u64,
    pub created_at: DateTime<Utc>,
    pub status: PollStatus,
}

impl Poll {
    /// Validate a draft and open it as a fresh, active poll.
    pub fn open(draft: PollDraft, now: DateTime<Utc>) -> Result<Self, PollError> {
        draft.validate()?;
        let PollDraft {
            question,
            options,
            correct_answer,
            time_limit,
        } = draft;
        Ok(Self {
            id: PollId::new(),
            question,
            options,
            correct_answer: correct_answer.unwrap_or_default(),
            time_limit: time_limit.unwrap_or_default(),
            created_at: now,
            status: PollStatus::Active,
        })
    }

    pub fn is_active(&self) -> bool {
        self.status == PollStatus::Active
    }

    /// Returns false if the poll was already closed.
    pub fn close(&mut self) -> bool {
        if self.is_active() {
            self.status = PollStatus::Closed;
            true
        } else {
            false
        }
    }

    pub fn is_correct(&self, answer: &str) -> bool {
        answer == self.correct_answer
    }

    pub fn time_limit(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.time_limit)
    }

    /// The instant the server timer is due to close the poll.
    pub fn deadline(&self) -> DateTime<Utc> {
        i64::try_from(self.time_limit)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|limit| self.created_at.checked_add_signed(limit))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
