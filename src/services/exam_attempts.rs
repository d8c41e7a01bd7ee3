use std::collections::HashSet;

use serde::Serialize;
use sqlx::PgPool;
use thiserror::Error;
use time::PrimitiveDateTime;
use uuid::Uuid;

use crate::core::time::{primitive_now_utc, unix_seconds};
use crate::db::models::{Exam, ExamQuestionEntry, ExamResult, UserExam};
use crate::db::types::AttemptStatus;
use crate::repositories;
use crate::services::attempt_state::{AttemptEvent, TransitionError};
use crate::services::grading::{self, GradingItem, SubmittedAnswer};
use crate::services::session_guard::{GuardVerdict, SessionGuard};

#[derive(Debug, Error)]
pub(crate) enum AttemptError {
    #[error("exam not found")]
    ExamNotFound,
    #[error("exam is not assigned to this user")]
    NotAssigned,
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    #[error("database error: {0}")]
    Persistence(#[from] sqlx::Error),
}

#[derive(Debug, Clone)]
pub(crate) struct AssignRequest {
    pub(crate) user_ids: Vec<String>,
    pub(crate) expires_at: Option<PrimitiveDateTime>,
    pub(crate) max_attempts: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum AssignmentOutcome {
    Assigned,
    Reassigned,
    Skipped,
    Failed,
}

#[derive(Debug, Clone)]
pub(crate) struct AssignmentReport {
    pub(crate) user_id: String,
    pub(crate) outcome: AssignmentOutcome,
    pub(crate) attempt: Option<UserExam>,
}

#[derive(Debug, Clone)]
pub(crate) struct StartedAttempt {
    pub(crate) exam: Exam,
    pub(crate) attempt: UserExam,
    pub(crate) questions: Vec<ExamQuestionEntry>,
    pub(crate) time_left: i64,
}

#[derive(Debug, Clone)]
pub(crate) struct AttemptSnapshot {
    pub(crate) attempt: UserExam,
    pub(crate) time_left: Option<i64>,
}

/// Coordinates assignment, start, submission and reset of exam attempts.
#[derive(Clone)]
pub(crate) struct ExamAttemptService {
    db: PgPool,
    guard: SessionGuard,
}

impl ExamAttemptService {
    pub(crate) fn new(db: PgPool, guard: SessionGuard) -> Self {
        Self { db, guard }
    }

    pub(crate) async fn assign(
        &self,
        exam_id: &str,
        request: AssignRequest,
    ) -> Result<Vec<AssignmentReport>, AttemptError> {
        let exam = repositories::exams::find_by_id(&self.db, exam_id)
            .await?
            .filter(Exam::is_assignable)
            .ok_or(AttemptError::ExamNotFound)?;

        if request.max_attempts < 1 {
            return Err(AttemptError::Validation("max_attempts must be at least 1".to_string()));
        }

        let now = primitive_now_utc();
        if request.expires_at.is_some_and(|deadline| deadline <= now) {
            return Err(AttemptError::Validation("expires_at must be in the future".to_string()));
        }

        let mut seen = HashSet::new();
        let user_ids: Vec<String> = request
            .user_ids
            .into_iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty() && seen.insert(id.clone()))
            .collect();
        if user_ids.is_empty() {
            return Err(AttemptError::Validation("user_ids must not be empty".to_string()));
        }

        let active = repositories::users::count_active_by_ids(&self.db, &user_ids).await?;
        if active != user_ids.len() as i64 {
            return Err(AttemptError::Validation(
                "some users do not exist or are inactive".to_string(),
            ));
        }

        let mut reports = Vec::with_capacity(user_ids.len());
        for user_id in user_ids {
            let id = Uuid::new_v4().to_string();
            let outcome = repositories::attempts::upsert_assignment(
                &self.db,
                repositories::attempts::AssignAttempt {
                    id: &id,
                    user_id: &user_id,
                    exam_id: &exam.id,
                    expires_at: request.expires_at,
                    max_attempts: request.max_attempts,
                    now,
                },
            )
            .await;

            let report = match outcome {
                Ok(Some(attempt)) => AssignmentReport {
                    user_id,
                    outcome: if attempt.id == id {
                        AssignmentOutcome::Assigned
                    } else {
                        AssignmentOutcome::Reassigned
                    },
                    attempt: Some(attempt),
                },
                Ok(None) => AssignmentReport {
                    user_id,
                    outcome: AssignmentOutcome::Skipped,
                    attempt: None,
                },
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        exam_id = %exam.id,
                        user_id = %user_id,
                        "Failed to assign exam to user"
                    );
                    AssignmentReport { user_id, outcome: AssignmentOutcome::Failed, attempt: None }
                }
            };
            reports.push(report);
        }

        tracing::info!(
            exam_id = %exam.id,
            assigned = reports.iter().filter(|r| r.outcome == AssignmentOutcome::Assigned).count(),
            reassigned = reports.iter().filter(|r| r.outcome == AssignmentOutcome::Reassigned).count(),
            skipped = reports.iter().filter(|r| r.outcome == AssignmentOutcome::Skipped).count(),
            failed = reports.iter().filter(|r| r.outcome == AssignmentOutcome::Failed).count(),
            "Exam assigned"
        );

        Ok(reports)
    }

    pub(crate) async fn start(
        &self,
        exam_id: &str,
        user_id: &str,
    ) -> Result<StartedAttempt, AttemptError> {
        let attempt = repositories::attempts::find_for_user_exam(&self.db, user_id, exam_id)
            .await?
            .ok_or(AttemptError::NotAssigned)?;
        let exam = repositories::exams::find_by_id(&self.db, exam_id)
            .await?
            .ok_or(AttemptError::ExamNotFound)?;

        let now = primitive_now_utc();
        attempt.state().check(AttemptEvent::Start, now)?;

        let Some(started) = repositories::attempts::start(&self.db, &attempt.id, now).await? else {
            // Lost a race with a concurrent start; report from the row as it is now.
            let current = repositories::attempts::find_for_user_exam(&self.db, user_id, exam_id)
                .await?
                .ok_or(AttemptError::NotAssigned)?;
            current.state().check(AttemptEvent::Start, now)?;
            return Err(TransitionError::CannotStart.into());
        };

        let questions = repositories::exams::list_questions(&self.db, exam_id).await?;

        let duration = exam.duration_seconds();
        let started_unix = unix_seconds(started.started_at.unwrap_or(now));
        if let Err(err) = self.guard.open(user_id, exam_id, started_unix, duration).await {
            metrics::counter!("exam_session_guard_failures_total", "op" => "open").increment(1);
            tracing::warn!(error = %err, exam_id, user_id, "Failed to record exam session");
        }

        metrics::counter!("exam_attempts_started_total").increment(1);
        tracing::info!(
            exam_id,
            user_id,
            attempt = started.attempt_count,
            max_attempts = started.max_attempts,
            "Exam started"
        );

        Ok(StartedAttempt { exam, attempt: started, questions, time_left: duration })
    }

    pub(crate) async fn submit(
        &self,
        exam_id: &str,
        user_id: &str,
        answers: &[SubmittedAnswer],
    ) -> Result<ExamResult, AttemptError> {
        let attempt = repositories::attempts::find_for_user_exam(&self.db, user_id, exam_id)
            .await?
            .ok_or(AttemptError::NotAssigned)?;
        attempt.state().check(AttemptEvent::Submit, primitive_now_utc())?;

        let verdict = self
            .guard
            .check(user_id, exam_id, unix_seconds(primitive_now_utc()))
            .await;
        match verdict {
            GuardVerdict::Late { elapsed, allowed } => {
                metrics::counter!("exam_late_submissions_total").increment(1);
                tracing::warn!(
                    exam_id,
                    user_id,
                    elapsed,
                    allowed,
                    "Exam submitted after its duration elapsed"
                );
            }
            GuardVerdict::Missing => {
                tracing::warn!(exam_id, user_id, "No exam session record found at submission");
            }
            GuardVerdict::Unavailable => {
                metrics::counter!("exam_session_guard_failures_total", "op" => "check")
                    .increment(1);
            }
            GuardVerdict::OnTime { .. } => {}
        }

        let mut tx = self.db.begin().await?;

        let attempt = repositories::attempts::lock_for_user_exam(&mut tx, user_id, exam_id)
            .await?
            .ok_or(AttemptError::NotAssigned)?;
        let mut completed = attempt.state();
        completed.apply(AttemptEvent::Submit, primitive_now_utc())?;
        let ended_at = completed.completed_at.unwrap_or_else(primitive_now_utc);

        let exam = repositories::exams::find_by_id(&mut *tx, exam_id)
            .await?
            .ok_or(AttemptError::ExamNotFound)?;
        let items: Vec<GradingItem> = repositories::exams::list_questions(&mut *tx, exam_id)
            .await?
            .into_iter()
            .map(|entry| GradingItem {
                key: entry.question.answer_key(),
                question_id: entry.question.id,
                points: entry.exam_points,
            })
            .collect();

        let grade = grading::grade(&items, answers, exam.pass_score);
        let started_at = completed.started_at.unwrap_or(ended_at);
        let duration_seconds =
            (ended_at - started_at).whole_seconds().clamp(0, i64::from(i32::MAX)) as i32;

        let result = repositories::results::insert(
            &mut tx,
            repositories::results::NewResult {
                id: &Uuid::new_v4().to_string(),
                user_id,
                exam_id,
                user_exam_id: &attempt.id,
                score: grade.score,
                earned_points: grade.earned_points,
                max_points: grade.max_points,
                passed: grade.passed,
                late: verdict.is_late(),
                answers: &grade.answers,
                started_at,
                ended_at,
                duration_seconds,
            },
        )
        .await?
        .ok_or(TransitionError::CannotSubmit)?;

        repositories::attempts::complete(&mut tx, &attempt.id, ended_at)
            .await?
            .ok_or(TransitionError::CannotSubmit)?;

        tx.commit().await?;

        if let Err(err) = self.guard.close(user_id, exam_id).await {
            metrics::counter!("exam_session_guard_failures_total", "op" => "close").increment(1);
            tracing::warn!(error = %err, exam_id, user_id, "Failed to clear exam session");
        }

        metrics::counter!(
            "exam_submissions_total",
            "passed" => if result.passed { "true" } else { "false" }
        )
        .increment(1);
        tracing::info!(
            exam_id,
            user_id,
            score = result.score,
            passed = result.passed,
            late = result.late,
            "Exam submitted"
        );

        Ok(result)
    }

    pub(crate) async fn snapshot(
        &self,
        exam: &Exam,
        user_id: &str,
    ) -> Result<AttemptSnapshot, AttemptError> {
        let attempt = repositories::attempts::find_for_user_exam(&self.db, user_id, &exam.id)
            .await?
            .ok_or(AttemptError::NotAssigned)?;
        let time_left = attempt.state().time_left(exam.duration_seconds(), primitive_now_utc());
        Ok(AttemptSnapshot { attempt, time_left })
    }

    pub(crate) async fn reset(&self, exam_id: &str, user_id: &str) -> Result<UserExam, AttemptError> {
        repositories::exams::find_by_id(&self.db, exam_id)
            .await?
            .ok_or(AttemptError::ExamNotFound)?;
        let attempt = repositories::attempts::find_for_user_exam(&self.db, user_id, exam_id)
            .await?
            .ok_or(AttemptError::NotAssigned)?;

        match attempt.status {
            AttemptStatus::Assigned => return Ok(attempt),
            AttemptStatus::Completed => {
                return Err(AttemptError::Conflict(
                    "completed attempts cannot be reset".to_string(),
                ));
            }
            AttemptStatus::Started => {}
        }

        let reset = repositories::attempts::reset(&self.db, &attempt.id, primitive_now_utc())
            .await?
            .ok_or_else(|| {
                AttemptError::Conflict("attempt changed state during reset".to_string())
            })?;

        if let Err(err) = self.guard.close(user_id, exam_id).await {
            metrics::counter!("exam_session_guard_failures_total", "op" => "close").increment(1);
            tracing::warn!(error = %err, exam_id, user_id, "Failed to clear exam session on reset");
        }

        tracing::info!(exam_id, user_id, attempt_count = reset.attempt_count, "Attempt reset");
        Ok(reset)
    }
}
