use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use validator::Validate;

use crate::core::time::{format_primitive, primitive_now_utc};
use crate::db::models::UserExam;
use crate::db::types::AttemptStatus;
use crate::schemas::exam::{deserialize_option_offset_datetime_flexible, ExamQuestionResponse};
use crate::schemas::result::ResultResponse;
use crate::services::exam_attempts::{AssignmentOutcome, AssignmentReport};
use crate::services::grading::SubmittedAnswer;

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct ExamAssign {
    #[serde(alias = "userIds")]
    #[validate(length(min = 1, message = "user_ids must not be empty"))]
    pub(crate) user_ids: Vec<String>,
    #[serde(
        default,
        alias = "expiresAt",
        deserialize_with = "deserialize_option_offset_datetime_flexible"
    )]
    pub(crate) expires_at: Option<OffsetDateTime>,
    #[serde(default = "default_max_attempts")]
    #[serde(alias = "maxAttempts")]
    #[validate(range(min = 1, message = "max_attempts must be positive"))]
    pub(crate) max_attempts: i32,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ExamSubmit {
    #[serde(default)]
    pub(crate) answers: Vec<SubmittedAnswer>,
}

#[derive(Debug, Serialize)]
pub(crate) struct AttemptResponse {
    pub(crate) id: String,
    pub(crate) user_id: String,
    pub(crate) exam_id: String,
    pub(crate) status: AttemptStatus,
    pub(crate) started_at: Option<String>,
    pub(crate) completed_at: Option<String>,
    pub(crate) expires_at: Option<String>,
    pub(crate) attempt_count: i32,
    pub(crate) max_attempts: i32,
    pub(crate) can_start: bool,
    pub(crate) can_submit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) time_left: Option<i64>,
}

impl AttemptResponse {
    pub(crate) fn from_db(attempt: UserExam, time_left: Option<i64>) -> Self {
        let state = attempt.state();
        let now = primitive_now_utc();
        Self {
            id: attempt.id,
            user_id: attempt.user_id,
            exam_id: attempt.exam_id,
            status: attempt.status,
            started_at: attempt.started_at.map(format_primitive),
            completed_at: attempt.completed_at.map(format_primitive),
            expires_at: attempt.expires_at.map(format_primitive),
            attempt_count: attempt.attempt_count,
            max_attempts: attempt.max_attempts,
            can_start: state.can_start(now),
            can_submit: state.can_submit(now),
            time_left,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct AssignmentItem {
    pub(crate) user_id: String,
    pub(crate) outcome: AssignmentOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) attempt: Option<AttemptResponse>,
}

impl From<AssignmentReport> for AssignmentItem {
    fn from(report: AssignmentReport) -> Self {
        Self {
            user_id: report.user_id,
            outcome: report.outcome,
            attempt: report.attempt.map(|attempt| AttemptResponse::from_db(attempt, None)),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct AssignResponse {
    pub(crate) exam_id: String,
    pub(crate) results: Vec<AssignmentItem>,
}

#[derive(Debug, Serialize)]
pub(crate) struct StartResponse {
    pub(crate) exam_id: String,
    pub(crate) attempt: AttemptResponse,
    pub(crate) questions: Vec<ExamQuestionResponse>,
    pub(crate) time_left: i64,
}

#[derive(Debug, Serialize)]
pub(crate) struct SubmitResponse {
    pub(crate) result: ResultResponse,
}

fn default_max_attempts() -> i32 {
    1
}
