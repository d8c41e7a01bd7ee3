use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::api::pagination::default_limit;
use crate::core::time::format_primitive;
use crate::db::models::{Question, QuestionOption};
use crate::db::types::{DifficultyLevel, QuestionType};

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct QuestionPayload {
    #[validate(length(min = 1, max = 200, message = "title must be 1-200 characters"))]
    pub(crate) title: String,
    #[validate(length(min = 1, message = "content must not be empty"))]
    pub(crate) content: String,
    #[serde(default, rename = "type", alias = "question_type")]
    pub(crate) question_type: QuestionType,
    #[serde(default)]
    pub(crate) difficulty: DifficultyLevel,
    pub(crate) options: Vec<QuestionOption>,
    #[serde(default)]
    pub(crate) tags: Vec<String>,
    #[serde(default = "default_points")]
    #[validate(range(min = 1, max = 1000, message = "points must be between 1 and 1000"))]
    pub(crate) points: i32,
    #[serde(default = "default_time_limit")]
    #[serde(alias = "timeLimit")]
    #[validate(range(min = 0, message = "time_limit must be non-negative"))]
    pub(crate) time_limit: i32,
    #[serde(default)]
    pub(crate) explanation: Option<String>,
    #[serde(default = "default_true")]
    #[serde(alias = "isActive")]
    pub(crate) is_active: bool,
}

impl QuestionPayload {
    /// Trimmed, de-duplicated tags in first-seen order.
    pub(crate) fn normalized_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = Vec::with_capacity(self.tags.len());
        for tag in &self.tags {
            let tag = tag.trim();
            if !tag.is_empty() && !tags.iter().any(|existing| existing == tag) {
                tags.push(tag.to_string());
            }
        }
        tags
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct QuestionListQuery {
    #[serde(default)]
    pub(crate) skip: i64,
    #[serde(default = "default_limit")]
    pub(crate) limit: i64,
    #[serde(default)]
    pub(crate) difficulty: Option<DifficultyLevel>,
    #[serde(default, rename = "type")]
    pub(crate) question_type: Option<QuestionType>,
    #[serde(default)]
    pub(crate) tag: Option<String>,
    #[serde(default)]
    pub(crate) search: Option<String>,
    #[serde(default)]
    #[serde(alias = "isActive")]
    pub(crate) is_active: Option<bool>,
}

#[derive(Debug, Serialize)]
pub(crate) struct OptionResponse {
    pub(crate) id: String,
    pub(crate) text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) is_correct: Option<bool>,
}

#[derive(Debug, Serialize)]
pub(crate) struct QuestionResponse {
    pub(crate) id: String,
    pub(crate) title: String,
    pub(crate) content: String,
    #[serde(rename = "type")]
    pub(crate) question_type: QuestionType,
    pub(crate) difficulty: DifficultyLevel,
    pub(crate) options: Vec<OptionResponse>,
    pub(crate) tags: Vec<String>,
    pub(crate) points: i32,
    pub(crate) time_limit: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) explanation: Option<String>,
    pub(crate) is_active: bool,
    pub(crate) created_by: String,
    pub(crate) created_at: String,
    pub(crate) updated_at: String,
}

impl QuestionResponse {
    /// `with_key` exposes option correctness and the explanation; only admins get it.
    pub(crate) fn from_db(question: Question, with_key: bool) -> Self {
        let options = question
            .options
            .0
            .into_iter()
            .map(|option| OptionResponse {
                id: option.id,
                text: option.text,
                is_correct: with_key.then_some(option.is_correct),
            })
            .collect();

        Self {
            id: question.id,
            title: question.title,
            content: question.content,
            question_type: question.question_type,
            difficulty: question.difficulty,
            options,
            tags: question.tags.0,
            points: question.points,
            time_limit: question.time_limit,
            explanation: if with_key { question.explanation } else { None },
            is_active: question.is_active,
            created_by: question.created_by,
            created_at: format_primitive(question.created_at),
            updated_at: format_primitive(question.updated_at),
        }
    }
}

fn default_points() -> i32 {
    1
}

fn default_time_limit() -> i32 {
    60
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sqlx::types::Json;
    use time::macros::datetime;

    fn sample_question() -> Question {
        Question {
            id: "q1".to_string(),
            title: "Capital".to_string(),
            content: "Capital of France?".to_string(),
            question_type: QuestionType::MultipleChoice,
            difficulty: DifficultyLevel::Easy,
            options: Json(vec![
                QuestionOption { id: "a".into(), text: "Paris".into(), is_correct: true },
                QuestionOption { id: "b".into(), text: "Rome".into(), is_correct: false },
            ]),
            tags: Json(vec!["geo".to_string()]),
            points: 1,
            time_limit: 60,
            explanation: Some("Paris is the capital".to_string()),
            is_active: true,
            created_by: "admin".to_string(),
            created_at: datetime!(2025-01-01 00:00:00),
            updated_at: datetime!(2025-01-01 00:00:00),
            deleted_at: None,
        }
    }

    #[test]
    fn reader_view_hides_answer_key() {
        let value = serde_json::to_value(QuestionResponse::from_db(sample_question(), false))
            .expect("serialize");

        assert!(value["options"][0].get("is_correct").is_none());
        assert!(value.get("explanation").is_none());
        assert_eq!(value["type"], "multiple_choice");
    }

    #[test]
    fn admin_view_includes_answer_key() {
        let value = serde_json::to_value(QuestionResponse::from_db(sample_question(), true))
            .expect("serialize");

        assert_eq!(value["options"][0]["is_correct"], true);
        assert_eq!(value["options"][1]["is_correct"], false);
        assert_eq!(value["explanation"], "Paris is the capital");
    }

    #[test]
    fn payload_defaults_and_tag_normalization() {
        let payload: QuestionPayload = serde_json::from_value(json!({
            "title": "T",
            "content": "C",
            "options": [{"id": "a", "text": "A", "is_correct": true}, {"id": "b", "text": "B"}],
            "tags": [" rust ", "rust", "", "sql"]
        }))
        .expect("payload");

        assert_eq!(payload.question_type, QuestionType::MultipleChoice);
        assert_eq!(payload.difficulty, DifficultyLevel::Medium);
        assert_eq!(payload.points, 1);
        assert_eq!(payload.time_limit, 60);
        assert!(payload.is_active);
        assert!(!payload.options[1].is_correct);
        assert_eq!(payload.normalized_tags(), vec!["rust".to_string(), "sql".to_string()]);
    }

    #[test]
    fn payload_caps_points() {
        let payload: QuestionPayload = serde_json::from_value(json!({
            "title": "T",
            "content": "C",
            "options": [{"id": "a", "text": "A", "is_correct": true}, {"id": "b", "text": "B"}],
            "points": 1001
        }))
        .expect("payload");

        assert!(payload.validate().is_err());
    }
}
