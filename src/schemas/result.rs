use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::api::pagination::default_limit;
use crate::core::time::format_primitive;
use crate::db::models::ExamResult;
use crate::repositories::statistics::{
    ExamStatistics, OverallStatistics, QuestionStatistics, UserStatistics,
};
use crate::services::answer_key::AnswerKey;

#[derive(Debug, Deserialize)]
pub(crate) struct ResultListQuery {
    #[serde(default)]
    pub(crate) skip: i64,
    #[serde(default = "default_limit")]
    pub(crate) limit: i64,
    #[serde(default, alias = "examId")]
    pub(crate) exam_id: Option<String>,
    #[serde(default)]
    pub(crate) passed: Option<bool>,
}

#[derive(Debug, Serialize)]
pub(crate) struct AnswerResponse {
    pub(crate) question_id: String,
    pub(crate) selected_options: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) correct_options: Option<Vec<String>>,
    pub(crate) is_correct: bool,
    pub(crate) points: i32,
    pub(crate) time_spent: i32,
}

#[derive(Debug, Serialize)]
pub(crate) struct ResultResponse {
    pub(crate) id: String,
    pub(crate) user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) username: Option<String>,
    pub(crate) exam_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) exam_title: Option<String>,
    pub(crate) score: f64,
    pub(crate) earned_points: i32,
    pub(crate) max_points: i32,
    pub(crate) passed: bool,
    pub(crate) late: bool,
    pub(crate) started_at: String,
    pub(crate) ended_at: String,
    pub(crate) duration_seconds: i32,
    pub(crate) created_at: String,
    pub(crate) answers: Vec<AnswerResponse>,
}

impl ResultResponse {
    pub(crate) fn from_db(result: ExamResult) -> Self {
        let answers = result
            .answers
            .0
            .into_iter()
            .map(|answer| AnswerResponse {
                question_id: answer.question_id,
                selected_options: answer.selected_options,
                correct_options: None,
                is_correct: answer.is_correct,
                points: answer.points,
                time_spent: answer.time_spent,
            })
            .collect();

        Self {
            id: result.id,
            user_id: result.user_id,
            username: None,
            exam_id: result.exam_id,
            exam_title: None,
            score: result.score,
            earned_points: result.earned_points,
            max_points: result.max_points,
            passed: result.passed,
            late: result.late,
            started_at: format_primitive(result.started_at),
            ended_at: format_primitive(result.ended_at),
            duration_seconds: result.duration_seconds,
            created_at: format_primitive(result.created_at),
            answers,
        }
    }

    pub(crate) fn with_names(mut self, exam_title: String, username: String) -> Self {
        self.exam_title = Some(exam_title);
        self.username = Some(username);
        self
    }

    /// Attaches the correct option ids to every answer whose question is in `keys`.
    pub(crate) fn reveal_keys(mut self, keys: &HashMap<String, AnswerKey>) -> Self {
        for answer in &mut self.answers {
            answer.correct_options = keys.get(&answer.question_id).map(AnswerKey::reveal);
        }
        self
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct StatisticsResponse {
    pub(crate) overall: OverallStatistics,
    pub(crate) exams: Vec<ExamStatistics>,
    pub(crate) users: Vec<UserStatistics>,
    pub(crate) questions: Vec<QuestionStatistics>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::QuestionOption;
    use crate::services::grading::GradedAnswer;
    use sqlx::types::Json;
    use time::macros::datetime;

    fn sample_result() -> ExamResult {
        ExamResult {
            id: "r1".to_string(),
            user_id: "u1".to_string(),
            exam_id: "e1".to_string(),
            user_exam_id: "ue1".to_string(),
            score: 50.0,
            earned_points: 5,
            max_points: 10,
            passed: false,
            late: false,
            answers: Json(vec![
                GradedAnswer {
                    question_id: "q1".to_string(),
                    selected_options: vec!["a".to_string()],
                    is_correct: true,
                    points: 5,
                    time_spent: 12,
                },
                GradedAnswer {
                    question_id: "q2".to_string(),
                    selected_options: vec!["a".to_string()],
                    is_correct: false,
                    points: 0,
                    time_spent: 3,
                },
            ]),
            started_at: datetime!(2025-01-01 10:00:00),
            ended_at: datetime!(2025-01-01 10:05:00),
            duration_seconds: 300,
            created_at: datetime!(2025-01-01 10:05:00),
        }
    }

    #[test]
    fn correct_options_hidden_unless_revealed() {
        let value =
            serde_json::to_value(ResultResponse::from_db(sample_result())).expect("serialize");
        assert!(value["answers"][0].get("correct_options").is_none());
        assert!(value.get("exam_title").is_none());
    }

    #[test]
    fn reveal_keys_fills_known_questions() {
        let mut keys = HashMap::new();
        keys.insert(
            "q2".to_string(),
            AnswerKey::from_options(&[
                QuestionOption { id: "a".into(), text: "A".into(), is_correct: false },
                QuestionOption { id: "b".into(), text: "B".into(), is_correct: true },
            ]),
        );

        let response = ResultResponse::from_db(sample_result()).reveal_keys(&keys);
        assert_eq!(response.answers[0].correct_options, None);
        assert_eq!(response.answers[1].correct_options, Some(vec!["b".to_string()]));
    }
}
