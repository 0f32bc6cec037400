//! Answers recorded for the current poll generation.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::PollError;
use crate::ids::{PollId, StudentId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub student_id: StudentId,
    pub student_name: String,
    pub answer: String,
    pub is_correct: bool,
    pub timestamp: DateTime<Utc>,
}

/// At most one answer per student for the poll generation it was reset to.
#[derive(Debug, Default)]
pub struct AnswerLedger {
    poll_id: Option<PollId>,
    answers: HashMap<StudentId, Answer>,
}

impl AnswerLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new generation. Every previous answer is dropped.
    pub fn reset(&mut self, poll_id: PollId) {
        self.poll_id = Some(poll_id);
        self.answers.clear();
    }

    pub fn poll_id(&self) -> Option<&PollId> {
        self.poll_id.as_ref()
    }

    pub fn record(&mut self, answer: Answer) -> Result<&Answer, PollError> {
        use std::collections::hash_map::Entry;
        match self.answers.entry(answer.student_id.clone()) {
            Entry::Occupied(_) => Err(PollError::DuplicateAnswer),
            Entry::Vacant(slot) => Ok(slot.insert(answer)),
        }
    }

    pub fn has_answered(&self, student_id: &StudentId) -> bool {
        self.answers.contains_key(student_id)
    }

    pub fn remove(&mut self, student_id: &StudentId) -> Option<Answer> {
        self.answers.remove(student_id)
    }

    pub fn len(&self) -> usize {
        self.answers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Answer> {
        self.answers.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answer(student: &str, text: &str, correct: bool) -> Answer {
        Answer {
            student_id: StudentId::from_raw(student),
            student_name: student.to_uppercase(),
            answer: text.into(),
            is_correct: correct,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn first_answer_recorded_second_rejected() {
        let mut ledger = AnswerLedger::new();
        ledger.reset(PollId::new());

        let stored = ledger.record(answer("s1", "A", true)).unwrap();
        assert_eq!(stored.answer, "A");

        let err = ledger.record(answer("s1", "B", false)).unwrap_err();
        assert_eq!(err, PollError::DuplicateAnswer);
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.iter().next().unwrap().answer, "A");
    }

    #[test]
    fn reset_starts_new_generation() {
        let mut ledger = AnswerLedger::new();
        let first = PollId::new();
        ledger.reset(first.clone());
        let _ = ledger.record(answer("s1", "A", true)).unwrap();

        let second = PollId::new();
        ledger.reset(second.clone());
        assert!(ledger.is_empty());
        assert_eq!(ledger.poll_id(), Some(&second));
        assert!(ledger.record(answer("s1", "B", false)).is_ok());
    }

    #[test]
    fn remove_allows_no_further_lookup() {
        let mut ledger = AnswerLedger::new();
        ledger.reset(PollId::new());
        let _ = ledger.record(answer("s1", "A", true)).unwrap();
        let _ = ledger.record(answer("s2", "B", false)).unwrap();

        let removed = ledger.remove(&StudentId::from_raw("s1")).unwrap();
        assert_eq!(removed.answer, "A");
        assert!(!ledger.has_answered(&StudentId::from_raw("s1")));
        assert!(ledger.has_answered(&StudentId::from_raw("s2")));
        assert_eq!(ledger.len(), 1);
    }
}
