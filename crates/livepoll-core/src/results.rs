//! Results aggregation.
//!
//! Results are recomputed from the poll, the ledger and the roster size on
//! every change rather than tracked incrementally, so the tally can never
//! drift from the recorded answers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::PollId;
use crate::ledger::AnswerLedger;
use crate::poll::{Poll, PollStatus};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResults {
    pub poll_id: PollId,
    pub question: String,
    pub options: Vec<String>,
    pub total_votes: usize,
    pub total_students: usize,
    /// Every declared option is present, answers outside the options are not.
    #[serde(rename = "votes")]
    pub per_option_votes: BTreeMap<String, usize>,
    pub status: PollStatus,
    pub correct_answer: String,
    #[serde(rename = "correctAnswers")]
    pub correct_answer_count: usize,
    pub correct_percentage: u32,
}

pub fn aggregate(poll: &Poll, ledger: &AnswerLedger, total_students: usize) -> PollResults {
    let mut per_option_votes: BTreeMap<String, usize> =
        poll.options.iter().map(|o| (o.clone(), 0)).collect();
    let mut correct_answer_count = 0;

    for answer in ledger.iter() {
        if let Some(count) = per_option_votes.get_mut(&answer.answer) {
            *count += 1;
        }
        if answer.is_correct {
            correct_answer_count += 1;
        }
    }

    let total_votes = ledger.len();
    PollResults {
        poll_id: poll.id.clone(),
        question: poll.question.clone(),
        options: poll.options.clone(),
        total_votes,
        total_students,
        per_option_votes,
        status: poll.status,
        correct_answer: poll.correct_answer.clone(),
        correct_answer_count,
        correct_percentage: percentage(correct_answer_count, total_votes),
    }
}

fn percentage(part: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    ((part as f64 / total as f64) * 100.0).round() as u32
}

impl PollResults {
    pub fn tallied_votes(&self) -> usize {
        self.per_option_votes.values().sum()
    }
}
