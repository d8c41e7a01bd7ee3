use sqlx::{PgPool, Postgres, Transaction};
use time::PrimitiveDateTime;

use crate::db::models::UserExam;
use crate::db::types::AttemptStatus;

pub(crate) const COLUMNS: &str = "\
    id, user_id, exam_id, status, started_at, completed_at, expires_at, attempt_count, \
    max_attempts, created_at, updated_at";

pub(crate) async fn find_for_user_exam(
    executor: impl sqlx::PgExecutor<'_>,
    user_id: &str,
    exam_id: &str,
) -> Result<Option<UserExam>, sqlx::Error> {
    sqlx::query_as::<_, UserExam>(&format!(
        "SELECT {COLUMNS} FROM user_exams WHERE user_id = $1 AND exam_id = $2"
    ))
    .bind(user_id)
    .bind(exam_id)
    .fetch_optional(executor)
    .await
}

/// Same as [`find_for_user_exam`] but holds a row lock until the transaction ends.
pub(crate) async fn lock_for_user_exam(
    tx: &mut Transaction<'_, Postgres>,
    user_id: &str,
    exam_id: &str,
) -> Result<Option<UserExam>, sqlx::Error> {
    sqlx::query_as::<_, UserExam>(&format!(
        "SELECT {COLUMNS} FROM user_exams WHERE user_id = $1 AND exam_id = $2 FOR UPDATE"
    ))
    .bind(user_id)
    .bind(exam_id)
    .fetch_optional(&mut **tx)
    .await
}

pub(crate) async fn list_for_user(
    pool: &PgPool,
    user_id: &str,
    exam_ids: &[String],
) -> Result<Vec<UserExam>, sqlx::Error> {
    if exam_ids.is_empty() {
        return Ok(Vec::new());
    }

    sqlx::query_as::<_, UserExam>(&format!(
        "SELECT {COLUMNS} FROM user_exams WHERE user_id = $1 AND exam_id = ANY($2)"
    ))
    .bind(user_id)
    .bind(exam_ids)
    .fetch_all(pool)
    .await
}

/// Whether anyone is currently sitting the exam.
pub(crate) async fn any_in_progress(
    executor: impl sqlx::PgExecutor<'_>,
    exam_id: &str,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM user_exams WHERE exam_id = $1 AND status = $2)",
    )
    .bind(exam_id)
    .bind(AttemptStatus::Started)
    .fetch_one(executor)
    .await
}

pub(crate) struct AssignAttempt<'a> {
    pub(crate) id: &'a str,
    pub(crate) user_id: &'a str,
    pub(crate) exam_id: &'a str,
    pub(crate) expires_at: Option<PrimitiveDateTime>,
    pub(crate) max_attempts: i32,
    pub(crate) now: PrimitiveDateTime,
}

/// Inserts the assignment or refreshes an untouched one.
///
/// Returns `None` when an attempt already exists and has moved past `assigned`.
/// A returned row whose id equals `params.id` was freshly inserted.
pub(crate) async fn upsert_assignment(
    pool: &PgPool,
    params: AssignAttempt<'_>,
) -> Result<Option<UserExam>, sqlx::Error> {
    sqlx::query_as::<_, UserExam>(&format!(
        "INSERT INTO user_exams (
            id, user_id, exam_id, status, expires_at, attempt_count, max_attempts,
            created_at, updated_at
         ) VALUES ($1,$2,$3,$4,$5,0,$6,$7,$7)
         ON CONFLICT (user_id, exam_id) DO UPDATE SET
            expires_at = EXCLUDED.expires_at,
            max_attempts = GREATEST(EXCLUDED.max_attempts, user_exams.attempt_count),
            updated_at = EXCLUDED.updated_at
         WHERE user_exams.status = $4
         RETURNING {COLUMNS}"
    ))
    .bind(params.id)
    .bind(params.user_id)
    .bind(params.exam_id)
    .bind(AttemptStatus::Assigned)
    .bind(params.expires_at)
    .bind(params.max_attempts)
    .bind(params.now)
    .fetch_optional(pool)
    .await
}

/// Moves an assigned attempt to started when every start condition still holds.
pub(crate) async fn start(
    pool: &PgPool,
    id: &str,
    now: PrimitiveDateTime,
) -> Result<Option<UserExam>, sqlx::Error> {
    sqlx::query_as::<_, UserExam>(&format!(
        "UPDATE user_exams SET
            status = $1,
            started_at = $2,
            completed_at = NULL,
            attempt_count = attempt_count + 1,
            updated_at = $2
         WHERE id = $3
           AND status = $4
           AND (expires_at IS NULL OR expires_at >= $2)
           AND attempt_count < max_attempts
         RETURNING {COLUMNS}"
    ))
    .bind(AttemptStatus::Started)
    .bind(now)
    .bind(id)
    .bind(AttemptStatus::Assigned)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn complete(
    tx: &mut Transaction<'_, Postgres>,
    id: &str,
    now: PrimitiveDateTime,
) -> Result<Option<UserExam>, sqlx::Error> {
    sqlx::query_as::<_, UserExam>(&format!(
        "UPDATE user_exams SET status = $1, completed_at = $2, updated_at = $2
         WHERE id = $3 AND status = $4
         RETURNING {COLUMNS}"
    ))
    .bind(AttemptStatus::Completed)
    .bind(now)
    .bind(id)
    .bind(AttemptStatus::Started)
    .fetch_optional(&mut **tx)
    .await
}

/// Puts a started attempt back to assigned. `attempt_count` is kept.
pub(crate) async fn reset(
    pool: &PgPool,
    id: &str,
    now: PrimitiveDateTime,
) -> Result<Option<UserExam>, sqlx::Error> {
    sqlx::query_as::<_, UserExam>(&format!(
        "UPDATE user_exams SET status = $1, started_at = NULL, updated_at = $2
         WHERE id = $3 AND status = $4
         RETURNING {COLUMNS}"
    ))
    .bind(AttemptStatus::Assigned)
    .bind(now)
    .bind(id)
    .bind(AttemptStatus::Started)
    .fetch_optional(pool)
    .await
}
