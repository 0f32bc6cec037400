/// Broad class of a domain error, used for logging and metrics labels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    State,
    NotFound,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::State => "state",
            Self::NotFound => "not_found",
        }
    }
}

/// Errors surfaced to the connection that issued the failing event.
/// None of them are fatal to the session.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PollError {
    // Validation
    #[error("{0}")]
    Validation(String),

    // State
    #[error("No active poll to answer")]
    NoActivePoll,
    #[error("You have already answered this poll")]
    DuplicateAnswer,
    #[error("Only the teacher can {0}")]
    TeacherOnly(&'static str),

    // Not found
    #[error("Student not found")]
    UnknownStudent,
}

impl PollError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NoActivePoll | Self::DuplicateAnswer | Self::TeacherOnly(_) => ErrorKind::State,
            Self::UnknownStudent => ErrorKind::NotFound,
        }
    }

    /// Stable wire code sent alongside the human-readable message.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NoActivePoll => "NO_ACTIVE_POLL",
            Self::DuplicateAnswer => "DUPLICATE_ANSWER",
            Self::TeacherOnly(_) => "TEACHER_ONLY",
            Self::UnknownStudent => "UNKNOWN_STUDENT",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_classification() {
        assert_eq!(PollError::validation("bad").kind(), ErrorKind::Validation);
        assert_eq!(PollError::NoActivePoll.kind(), ErrorKind::State);
        assert_eq!(PollError::DuplicateAnswer.kind(), ErrorKind::State);
        assert_eq!(PollError::TeacherOnly("kick students").kind(), ErrorKind::State);
        assert_eq!(PollError::UnknownStudent.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(PollError::validation("x").code(), "VALIDATION_ERROR");
        assert_eq!(PollError::NoActivePoll.code(), "NO_ACTIVE_POLL");
        assert_eq!(PollError::DuplicateAnswer.code(), "DUPLICATE_ANSWER");
        assert_eq!(PollError::TeacherOnly("create polls").code(), "TEACHER_ONLY");
        assert_eq!(PollError::UnknownStudent.code(), "UNKNOWN_STUDENT");
    }

    #[test]
    fn messages() {
        assert_eq!(PollError::NoActivePoll.to_string(), "No active poll to answer");
        assert_eq!(
            PollError::TeacherOnly("kick students").to_string(),
            "Only the teacher can kick students"
        );
        assert_eq!(
            PollError::validation("Invalid student data").to_string(),
            "Invalid student data"
        );
    }

    #[test]
    fn kind_strings() {
        assert_eq!(ErrorKind::Validation.as_str(), "validation");
        assert_eq!(ErrorKind::NotFound.as_str(), "not_found");
    }
}
