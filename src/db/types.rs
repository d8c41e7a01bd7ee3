use serde::{Deserialize, Serialize};
use sqlx::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "userrole", rename_all = "lowercase")]
pub(crate) enum UserRole {
    Admin,
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "questiontype", rename_all = "snake_case")]
pub(crate) enum QuestionType {
    MultipleChoice,
    TrueFalse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "difficultylevel", rename_all = "lowercase")]
pub(crate) enum DifficultyLevel {
    Easy,
    Medium,
    Hard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "examstatus", rename_all = "lowercase")]
pub(crate) enum ExamStatus {
    Draft,
    Active,
    Completed,
    Archived,
}

impl ExamStatus {
    /// Draft and active exams still accept structural edits and new assignments.
    pub(crate) fn is_editable(self) -> bool {
        matches!(self, Self::Draft | Self::Active)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "attemptstatus", rename_all = "lowercase")]
pub(crate) enum AttemptStatus {
    Assigned,
    Started,
    Completed,
}

impl Default for QuestionType {
    fn default() -> Self {
        Self::MultipleChoice
    }
}

impl Default for DifficultyLevel {
    fn default() -> Self {
        Self::Medium
    }
}
