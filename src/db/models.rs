use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use time::PrimitiveDateTime;

use crate::db::types::{AttemptStatus, DifficultyLevel, ExamStatus, QuestionType, UserRole};
use crate::services::grading::GradedAnswer;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct User {
    pub(crate) id: String,
    pub(crate) username: String,
    pub(crate) email: String,
    pub(crate) hashed_password: String,
    pub(crate) full_name: String,
    pub(crate) role: UserRole,
    pub(crate) is_active: bool,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
    pub(crate) deleted_at: Option<PrimitiveDateTime>,
}

impl User {
    pub(crate) fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

/// One selectable answer. `is_correct` is the answer key and never leaves the server
/// for non-admin readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct QuestionOption {
    pub(crate) id: String,
    pub(crate) text: String,
    #[serde(default)]
    pub(crate) is_correct: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Question {
    pub(crate) id: String,
    pub(crate) title: String,
    pub(crate) content: String,
    pub(crate) question_type: QuestionType,
    pub(crate) difficulty: DifficultyLevel,
    pub(crate) options: Json<Vec<QuestionOption>>,
    pub(crate) tags: Json<Vec<String>>,
    pub(crate) points: i32,
    pub(crate) time_limit: i32,
    pub(crate) explanation: Option<String>,
    pub(crate) is_active: bool,
    pub(crate) created_by: String,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
    pub(crate) deleted_at: Option<PrimitiveDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Exam {
    pub(crate) id: String,
    pub(crate) title: String,
    pub(crate) description: Option<String>,
    pub(crate) duration_minutes: i32,
    pub(crate) pass_score: i32,
    pub(crate) status: ExamStatus,
    pub(crate) start_time: Option<PrimitiveDateTime>,
    pub(crate) end_time: Option<PrimitiveDateTime>,
    pub(crate) is_active: bool,
    pub(crate) created_by: String,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
    pub(crate) deleted_at: Option<PrimitiveDateTime>,
}

impl Exam {
    pub(crate) fn is_assignable(&self) -> bool {
        self.is_active && self.deleted_at.is_none() && self.status.is_editable()
    }

    pub(crate) fn duration_seconds(&self) -> i64 {
        i64::from(self.duration_minutes) * 60
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct ExamQuestion {
    pub(crate) id: String,
    pub(crate) exam_id: String,
    pub(crate) question_id: String,
    pub(crate) position: i32,
    pub(crate) points: i32,
    pub(crate) created_at: PrimitiveDateTime,
}

/// An exam question joined with its catalog entry, in exam order.
#[derive(Debug, Clone, FromRow)]
pub(crate) struct ExamQuestionEntry {
    pub(crate) position: i32,
    pub(crate) exam_points: i32,
    #[sqlx(flatten)]
    pub(crate) question: Question,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct UserExam {
    pub(crate) id: String,
    pub(crate) user_id: String,
    pub(crate) exam_id: String,
    pub(crate) status: AttemptStatus,
    pub(crate) started_at: Option<PrimitiveDateTime>,
    pub(crate) completed_at: Option<PrimitiveDateTime>,
    pub(crate) expires_at: Option<PrimitiveDateTime>,
    pub(crate) attempt_count: i32,
    pub(crate) max_attempts: i32,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct ExamResult {
    pub(crate) id: String,
    pub(crate) user_id: String,
    pub(crate) exam_id: String,
    pub(crate) user_exam_id: String,
    pub(crate) score: f64,
    pub(crate) earned_points: i32,
    pub(crate) max_points: i32,
    pub(crate) passed: bool,
    pub(crate) late: bool,
    pub(crate) answers: Json<Vec<GradedAnswer>>,
    pub(crate) started_at: PrimitiveDateTime,
    pub(crate) ended_at: PrimitiveDateTime,
    pub(crate) duration_seconds: i32,
    pub(crate) created_at: PrimitiveDateTime,
}
