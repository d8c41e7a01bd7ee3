use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use time::{
    format_description::well_known::Rfc3339, macros::format_description, OffsetDateTime,
    PrimitiveDateTime,
};
use validator::Validate;

use crate::api::pagination::default_limit;
use crate::core::time::format_primitive;
use crate::db::models::{Exam, ExamQuestionEntry};
use crate::db::types::ExamStatus;
use crate::schemas::attempt::AttemptResponse;
use crate::schemas::question::QuestionResponse;

#[derive(Debug, Clone, Deserialize, Validate)]
pub(crate) struct ExamQuestionItem {
    #[serde(alias = "questionId")]
    #[validate(length(min = 1, message = "question_id must not be empty"))]
    pub(crate) question_id: String,
    #[serde(default = "default_points")]
    #[validate(range(min = 1, max = 1000, message = "points must be between 1 and 1000"))]
    pub(crate) points: i32,
    #[serde(default, alias = "position")]
    #[validate(range(min = 0, message = "order must be non-negative"))]
    pub(crate) order: i32,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct ExamCreate {
    #[validate(length(min = 1, max = 200, message = "title must be 1-200 characters"))]
    pub(crate) title: String,
    #[serde(default)]
    pub(crate) description: Option<String>,
    #[serde(alias = "durationMinutes", alias = "duration")]
    #[validate(range(min = 1, message = "duration_minutes must be positive"))]
    pub(crate) duration_minutes: i32,
    #[serde(default = "default_pass_score")]
    #[serde(alias = "passScore")]
    #[validate(range(min = 0, max = 100, message = "pass_score must be between 0 and 100"))]
    pub(crate) pass_score: i32,
    #[serde(default = "default_status")]
    pub(crate) status: ExamStatus,
    #[serde(
        default,
        alias = "startTime",
        deserialize_with = "deserialize_option_offset_datetime_flexible"
    )]
    pub(crate) start_time: Option<OffsetDateTime>,
    #[serde(
        default,
        alias = "endTime",
        deserialize_with = "deserialize_option_offset_datetime_flexible"
    )]
    pub(crate) end_time: Option<OffsetDateTime>,
    #[serde(default)]
    #[validate(nested)]
    pub(crate) questions: Vec<ExamQuestionItem>,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct ExamUpdate {
    #[serde(default)]
    #[validate(length(min = 1, max = 200, message = "title must be 1-200 characters"))]
    pub(crate) title: Option<String>,
    #[serde(default)]
    pub(crate) description: Option<String>,
    #[serde(default, alias = "durationMinutes", alias = "duration")]
    #[validate(range(min = 1, message = "duration_minutes must be positive"))]
    pub(crate) duration_minutes: Option<i32>,
    #[serde(default, alias = "passScore")]
    #[validate(range(min = 0, max = 100, message = "pass_score must be between 0 and 100"))]
    pub(crate) pass_score: Option<i32>,
    #[serde(default)]
    pub(crate) status: Option<ExamStatus>,
    #[serde(
        default,
        alias = "startTime",
        deserialize_with = "deserialize_option_offset_datetime_flexible"
    )]
    pub(crate) start_time: Option<OffsetDateTime>,
    #[serde(
        default,
        alias = "endTime",
        deserialize_with = "deserialize_option_offset_datetime_flexible"
    )]
    pub(crate) end_time: Option<OffsetDateTime>,
    #[serde(default, alias = "isActive")]
    pub(crate) is_active: Option<bool>,
    #[serde(default)]
    #[validate(nested)]
    pub(crate) questions: Option<Vec<ExamQuestionItem>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ExamListQuery {
    #[serde(default)]
    pub(crate) skip: i64,
    #[serde(default = "default_limit")]
    pub(crate) limit: i64,
    #[serde(default)]
    pub(crate) status: Option<ExamStatus>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ExamQuestionResponse {
    pub(crate) order: i32,
    pub(crate) points: i32,
    pub(crate) question: QuestionResponse,
}

impl ExamQuestionResponse {
    pub(crate) fn from_entry(entry: ExamQuestionEntry, with_key: bool) -> Self {
        Self {
            order: entry.position,
            points: entry.exam_points,
            question: QuestionResponse::from_db(entry.question, with_key),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ExamResponse {
    pub(crate) id: String,
    pub(crate) title: String,
    pub(crate) description: Option<String>,
    pub(crate) duration_minutes: i32,
    pub(crate) pass_score: i32,
    pub(crate) total_points: i64,
    pub(crate) question_count: i64,
    pub(crate) status: ExamStatus,
    pub(crate) start_time: Option<String>,
    pub(crate) end_time: Option<String>,
    pub(crate) is_active: bool,
    pub(crate) created_by: String,
    pub(crate) created_at: String,
    pub(crate) updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) questions: Option<Vec<ExamQuestionResponse>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) attempt: Option<AttemptResponse>,
}

impl ExamResponse {
    pub(crate) fn from_db(exam: Exam, question_count: i64, total_points: i64) -> Self {
        Self {
            id: exam.id,
            title: exam.title,
            description: exam.description,
            duration_minutes: exam.duration_minutes,
            pass_score: exam.pass_score,
            total_points,
            question_count,
            status: exam.status,
            start_time: exam.start_time.map(format_primitive),
            end_time: exam.end_time.map(format_primitive),
            is_active: exam.is_active,
            created_by: exam.created_by,
            created_at: format_primitive(exam.created_at),
            updated_at: format_primitive(exam.updated_at),
            questions: None,
            attempt: None,
        }
    }

    /// Builds the response with its question list; totals are derived from the entries.
    pub(crate) fn with_questions(
        exam: Exam,
        entries: Vec<ExamQuestionEntry>,
        with_key: bool,
    ) -> Self {
        let total_points = entries.iter().map(|entry| i64::from(entry.exam_points)).sum();
        let mut response = Self::from_db(exam, entries.len() as i64, total_points);
        response.questions = Some(
            entries
                .into_iter()
                .map(|entry| ExamQuestionResponse::from_entry(entry, with_key))
                .collect(),
        );
        response
    }
}

fn default_points() -> i32 {
    1
}

fn default_pass_score() -> i32 {
    60
}

fn default_status() -> ExamStatus {
    ExamStatus::Draft
}

fn parse_offset_datetime_flexible(raw: &str) -> Option<OffsetDateTime> {
    if let Ok(value) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Some(value);
    }

    // datetime-local inputs arrive without a zone; treat them as UTC.
    if let Ok(value) =
        PrimitiveDateTime::parse(raw, &format_description!("[year]-[month]-[day]T[hour]:[minute]"))
    {
        return Some(value.assume_utc());
    }
    if let Ok(value) = PrimitiveDateTime::parse(
        raw,
        &format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
    ) {
        return Some(value.assume_utc());
    }

    None
}

pub(crate) fn deserialize_option_offset_datetime_flexible<'de, D>(
    deserializer: D,
) -> Result<Option<OffsetDateTime>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw {
        Some(value) => parse_offset_datetime_flexible(&value)
            .ok_or_else(|| D::Error::custom(format!("invalid datetime: {value}")))
            .map(Some),
        None => Ok(None),
    }
}
