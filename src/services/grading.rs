use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::services::answer_key::AnswerKey;

/// One exam question as seen by the grader.
#[derive(Debug, Clone)]
pub(crate) struct GradingItem {
    pub(crate) question_id: String,
    pub(crate) points: i32,
    pub(crate) key: AnswerKey,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct SubmittedAnswer {
    pub(crate) question_id: String,
    #[serde(default)]
    pub(crate) selected_options: Vec<String>,
    #[serde(default)]
    pub(crate) time_spent: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct GradedAnswer {
    pub(crate) question_id: String,
    pub(crate) selected_options: Vec<String>,
    pub(crate) is_correct: bool,
    pub(crate) points: i32,
    pub(crate) time_spent: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Grade {
    pub(crate) answers: Vec<GradedAnswer>,
    pub(crate) earned_points: i32,
    pub(crate) max_points: i32,
    pub(crate) score: f64,
    pub(crate) passed: bool,
}

/// Grades a submission against the exam's questions, in exam order.
///
/// Unanswered questions score zero, answers for questions outside the exam are ignored,
/// and when a question is answered twice the last answer counts.
pub(crate) fn grade(items: &[GradingItem], submitted: &[SubmittedAnswer], pass_score: i32) -> Grade {
    let by_question: HashMap<&str, &SubmittedAnswer> =
        submitted.iter().map(|answer| (answer.question_id.as_str(), answer)).collect();

    let mut earned_points: i64 = 0;
    let mut max_points: i64 = 0;
    let mut answers = Vec::with_capacity(items.len());

    for item in items {
        max_points = max_points.saturating_add(i64::from(item.points.max(0)));

        let graded = match by_question.get(item.question_id.as_str()) {
            Some(answer) => {
                let is_correct = item.key.accepts(answer.selected_options.as_slice());
                GradedAnswer {
                    question_id: item.question_id.clone(),
                    selected_options: answer.selected_options.clone(),
                    is_correct,
                    points: if is_correct { item.points.max(0) } else { 0 },
                    time_spent: answer.time_spent.max(0),
                }
            }
            None => GradedAnswer {
                question_id: item.question_id.clone(),
                selected_options: Vec::new(),
                is_correct: false,
                points: 0,
                time_spent: 0,
            },
        };

        earned_points = earned_points.saturating_add(i64::from(graded.points));
        answers.push(graded);
    }

    let score = percentage(earned_points, max_points);
    Grade {
        answers,
        earned_points: clamp_points(earned_points),
        max_points: clamp_points(max_points),
        score,
        passed: score >= f64::from(pass_score),
    }
}

/// Narrows a tally to the stored column width.
fn clamp_points(total: i64) -> i32 {
    i32::try_from(total).unwrap_or(i32::MAX)
}

fn percentage(earned: i64, max: i64) -> f64 {
    if max <= 0 {
        return 0.0;
    }
    earned as f64 * 100.0 / max as f64
}
