//! Wire protocol shared by the server and the client.
//!
//! Client → server: `{"event": "poll:answer", "data": {...}, "id": 7}`. The
//! optional `id` asks for an acknowledgement.
//!
//! Server → client: either an event `{"event": "poll:results", "data": {...}}`
//! or an acknowledgement `{"ack": 7, "data": {"success": true, ...}}` /
//! `{"ack": 7, "data": {"error": "...", "code": "..."}}`.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::PollError;
use crate::ids::{PollId, StudentId};
use crate::poll::{Poll, PollDraft};
use crate::results::PollResults;
use crate::roster::RosterEntry;

pub const TEACHER_JOIN: &str = "teacher:join";
pub const STUDENT_JOIN: &str = "student:join";
pub const POLL_CREATE: &str = "poll:create";
pub const POLL_CLOSE: &str = "poll:close";
pub const TEACHER_KICK: &str = "teacher:kick";
pub const POLL_ANSWER: &str = "poll:answer";

/// Raw client frame, before the event name is resolved.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InboundFrame {
    pub event: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundEvent {
    TeacherJoin,
    StudentJoin {
        student_id: StudentId,
        student_name: String,
    },
    CreatePoll(PollDraft),
    ClosePoll,
    Kick {
        student_id: StudentId,
    },
    Answer {
        answer: String,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct StudentJoinParams {
    student_id: Option<String>,
    student_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct KickParams {
    student_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AnswerParams {
    answer: Option<String>,
}

fn params<T: DeserializeOwned + Default>(data: &Value) -> Result<T, PollError> {
    if data.is_null() {
        return Ok(T::default());
    }
    T::deserialize(data).map_err(|e| PollError::validation(format!("Malformed event data: {e}")))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl InboundEvent {
    pub fn parse(event: &str, data: &Value) -> Result<Self, PollError> {
        match event {
            TEACHER_JOIN => Ok(Self::TeacherJoin),
            STUDENT_JOIN => {
                let p: StudentJoinParams = params(data)?;
                match (non_blank(p.student_id), non_blank(p.student_name)) {
                    (Some(id), Some(name)) => Ok(Self::StudentJoin {
                        student_id: StudentId::from_raw(id),
                        student_name: name,
                    }),
                    _ => Err(PollError::validation("Invalid student data")),
                }
            }
            POLL_CREATE => Ok(Self::CreatePoll(params(data)?)),
            POLL_CLOSE => Ok(Self::ClosePoll),
            TEACHER_KICK => {
                let p: KickParams = params(data)?;
                non_blank(p.student_id)
                    .map(|id| Self::Kick {
                        student_id: StudentId::from_raw(id),
                    })
                    .ok_or_else(|| PollError::validation("Missing studentId"))
            }
            POLL_ANSWER => {
                let p: AnswerParams = params(data)?;
                p.answer
                    .map(|answer| Self::Answer { answer })
                    .ok_or_else(|| PollError::validation("Missing answer"))
            }
            other => Err(PollError::validation(format!("Unknown event: {other}"))),
        }
    }

    pub fn from_frame(frame: &InboundFrame) -> Result<Self, PollError> {
        Self::parse(&frame.event, &frame.data)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::TeacherJoin => TEACHER_JOIN,
            Self::StudentJoin { .. } => STUDENT_JOIN,
            Self::CreatePoll(_) => POLL_CREATE,
            Self::ClosePoll => POLL_CLOSE,
            Self::Kick { .. } => TEACHER_KICK,
            Self::Answer { .. } => POLL_ANSWER,
        }
    }

    pub fn into_frame(self, id: Option<u64>) -> InboundFrame {
        let event = self.name().to_string();
        let data = match self {
            Self::TeacherJoin | Self::ClosePoll => Value::Null,
            Self::StudentJoin {
                student_id,
                student_name,
            } => serde_json::json!({ "studentId": student_id, "studentName": student_name }),
            Self::CreatePoll(draft) => serde_json::to_value(draft).unwrap_or_default(),
            Self::Kick { student_id } => serde_json::json!({ "studentId": student_id }),
            Self::Answer { answer } => serde_json::json!({ "answer": answer }),
        };
        InboundFrame { event, data, id }
    }
}

/// Individual answer, only ever sent to teachers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerNotice {
    pub poll_id: PollId,
    pub student_id: StudentId,
    pub student_name: String,
    pub answer: String,
    pub is_correct: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentNotice {
    pub id: StudentId,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KickNotice {
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNotice {
    pub error: String,
    pub code: String,
}

impl From<&PollError> for ErrorNotice {
    fn from(err: &PollError) -> Self {
        Self {
            error: err.to_string(),
            code: err.code().to_string(),
        }
    }
}

/// Server-pushed events.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "poll:new")]
    NewPoll(Poll),
    /// Late-join catch-up. `None` when no poll exists yet.
    #[serde(rename = "poll:current")]
    CurrentPoll(Option<Poll>),
    #[serde(rename = "poll:results")]
    Results(PollResults),
    #[serde(rename = "poll:closed")]
    Closed(PollResults),
    #[serde(rename = "poll:answer:new")]
    AnswerNew(AnswerNotice),
    #[serde(rename = "student:list")]
    StudentList(Vec<RosterEntry>),
    #[serde(rename = "student:joined")]
    StudentJoined(StudentNotice),
    #[serde(rename = "student:left")]
    StudentLeft(StudentNotice),
    #[serde(rename = "student:kicked")]
    StudentKicked(KickNotice),
    #[serde(rename = "poll:error")]
    Error(ErrorNotice),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::NewPoll(_) => "poll:new",
            Self::CurrentPoll(_) => "poll:current",
            Self::Results(_) => "poll:results",
            Self::Closed(_) => "poll:closed",
            Self::AnswerNew(_) => "poll:answer:new",
            Self::StudentList(_) => "student:list",
            Self::StudentJoined(_) => "student:joined",
            Self::StudentLeft(_) => "student:left",
            Self::StudentKicked(_) => "student:kicked",
            Self::Error(_) => "poll:error",
        }
    }
}

/// Acknowledgement of a client frame that carried an `id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AckFrame {
    pub ack: u64,
    pub data: Value,
}

impl AckFrame {
    /// `extra` fields (if an object) are merged next to `success: true`.
    pub fn success(id: u64, extra: Value) -> Self {
        let mut body = serde_json::Map::new();
        let _ = body.insert("success".into(), Value::Bool(true));
        if let Value::Object(fields) = extra {
            body.extend(fields);
        }
        Self {
            ack: id,
            data: Value::Object(body),
        }
    }

    pub fn error(id: u64, err: &PollError) -> Self {
        Self {
            ack: id,
            data: serde_json::to_value(ErrorNotice::from(err)).unwrap_or_default(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.data.get("success").and_then(Value::as_bool) == Some(true)
    }

    pub fn error_message(&self) -> Option<&str> {
        self.data.get("error").and_then(Value::as_str)
    }

    pub fn error_code(&self) -> Option<&str> {
        self.data.get("code").and_then(Value::as_str)
    }
}

/// Anything the server writes to a connection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    Ack(AckFrame),
    Event(ServerEvent),
}
