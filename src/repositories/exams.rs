use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use time::PrimitiveDateTime;
use uuid::Uuid;

use crate::db::models::{Exam, ExamQuestionEntry};
use crate::db::types::ExamStatus;
use crate::repositories::{qualified, questions};

pub(crate) const COLUMNS: &str = "\
    id, title, description, duration_minutes, pass_score, status, start_time, end_time, \
    is_active, created_by, created_at, updated_at, deleted_at";

pub(crate) async fn find_by_id(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
) -> Result<Option<Exam>, sqlx::Error> {
    sqlx::query_as::<_, Exam>(&format!(
        "SELECT {COLUMNS} FROM exams WHERE id = $1 AND deleted_at IS NULL"
    ))
    .bind(id)
    .fetch_optional(executor)
    .await
}

pub(crate) struct ExamFields<'a> {
    pub(crate) title: &'a str,
    pub(crate) description: Option<&'a str>,
    pub(crate) duration_minutes: i32,
    pub(crate) pass_score: i32,
    pub(crate) status: ExamStatus,
    pub(crate) start_time: Option<PrimitiveDateTime>,
    pub(crate) end_time: Option<PrimitiveDateTime>,
    pub(crate) is_active: bool,
}

pub(crate) struct ExamQuestionInput {
    pub(crate) question_id: String,
    pub(crate) points: i32,
    pub(crate) position: i32,
}

pub(crate) async fn create(
    tx: &mut Transaction<'_, Postgres>,
    id: &str,
    created_by: &str,
    fields: ExamFields<'_>,
    now: PrimitiveDateTime,
) -> Result<Exam, sqlx::Error> {
    sqlx::query_as::<_, Exam>(&format!(
        "INSERT INTO exams (
            id, title, description, duration_minutes, pass_score, status, start_time, end_time,
            is_active, created_by, created_at, updated_at
         ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$11)
         RETURNING {COLUMNS}"
    ))
    .bind(id)
    .bind(fields.title)
    .bind(fields.description)
    .bind(fields.duration_minutes)
    .bind(fields.pass_score)
    .bind(fields.status)
    .bind(fields.start_time)
    .bind(fields.end_time)
    .bind(fields.is_active)
    .bind(created_by)
    .bind(now)
    .fetch_one(&mut **tx)
    .await
}

pub(crate) async fn update(
    tx: &mut Transaction<'_, Postgres>,
    id: &str,
    fields: ExamFields<'_>,
    now: PrimitiveDateTime,
) -> Result<Option<Exam>, sqlx::Error> {
    sqlx::query_as::<_, Exam>(&format!(
        "UPDATE exams SET
            title = $1,
            description = $2,
            duration_minutes = $3,
            pass_score = $4,
            status = $5,
            start_time = $6,
            end_time = $7,
            is_active = $8,
            updated_at = $9
         WHERE id = $10 AND deleted_at IS NULL
         RETURNING {COLUMNS}"
    ))
    .bind(fields.title)
    .bind(fields.description)
    .bind(fields.duration_minutes)
    .bind(fields.pass_score)
    .bind(fields.status)
    .bind(fields.start_time)
    .bind(fields.end_time)
    .bind(fields.is_active)
    .bind(now)
    .bind(id)
    .fetch_optional(&mut **tx)
    .await
}

/// Replaces the exam's question list. Runs inside the caller's transaction.
pub(crate) async fn replace_questions(
    tx: &mut Transaction<'_, Postgres>,
    exam_id: &str,
    items: &[ExamQuestionInput],
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM exam_questions WHERE exam_id = $1")
        .bind(exam_id)
        .execute(&mut **tx)
        .await?;

    for item in items {
        sqlx::query(
            "INSERT INTO exam_questions (id, exam_id, question_id, position, points, created_at)
             VALUES ($1,$2,$3,$4,$5,$6)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(exam_id)
        .bind(&item.question_id)
        .bind(item.position)
        .bind(item.points)
        .bind(now)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

/// Exam questions with their catalog entries, in exam order.
pub(crate) async fn list_questions(
    executor: impl sqlx::PgExecutor<'_>,
    exam_id: &str,
) -> Result<Vec<ExamQuestionEntry>, sqlx::Error> {
    sqlx::query_as::<_, ExamQuestionEntry>(&format!(
        "SELECT eq.position, eq.points AS exam_points, {}
         FROM exam_questions eq
         JOIN questions q ON q.id = eq.question_id
         WHERE eq.exam_id = $1
         ORDER BY eq.position, eq.created_at",
        qualified("q", questions::COLUMNS)
    ))
    .bind(exam_id)
    .fetch_all(executor)
    .await
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ExamTotals {
    pub(crate) exam_id: String,
    pub(crate) question_count: i64,
    pub(crate) total_points: i64,
}

pub(crate) async fn totals_for(
    pool: &PgPool,
    exam_ids: &[String],
) -> Result<Vec<ExamTotals>, sqlx::Error> {
    if exam_ids.is_empty() {
        return Ok(Vec::new());
    }

    sqlx::query_as::<_, ExamTotals>(
        "SELECT exam_id,
                COUNT(*) AS question_count,
                COALESCE(SUM(points), 0)::BIGINT AS total_points
         FROM exam_questions
         WHERE exam_id = ANY($1)
         GROUP BY exam_id",
    )
    .bind(exam_ids)
    .fetch_all(pool)
    .await
}

pub(crate) async fn has_results(
    executor: impl sqlx::PgExecutor<'_>,
    exam_id: &str,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM results WHERE exam_id = $1)")
        .bind(exam_id)
        .fetch_one(executor)
        .await
}

pub(crate) async fn soft_delete(
    pool: &PgPool,
    id: &str,
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE exams SET is_active = FALSE, deleted_at = $1, updated_at = $1
         WHERE id = $2 AND deleted_at IS NULL",
    )
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub(crate) struct ListExams {
    pub(crate) status: Option<ExamStatus>,
    pub(crate) skip: i64,
    pub(crate) limit: i64,
}

pub(crate) async fn list(pool: &PgPool, params: &ListExams) -> Result<(Vec<Exam>, i64), sqlx::Error> {
    let mut count =
        QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM exams WHERE deleted_at IS NULL");
    if let Some(status) = params.status {
        count.push(" AND status = ");
        count.push_bind(status);
    }
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    let mut builder = QueryBuilder::<Postgres>::new(format!(
        "SELECT {COLUMNS} FROM exams WHERE deleted_at IS NULL"
    ));
    if let Some(status) = params.status {
        builder.push(" AND status = ");
        builder.push_bind(status);
    }
    builder.push(" ORDER BY created_at DESC OFFSET ");
    builder.push_bind(params.skip);
    builder.push(" LIMIT ");
    builder.push_bind(params.limit);

    let exams = builder.build_query_as::<Exam>().fetch_all(pool).await?;
    Ok((exams, total))
}

/// Live exams assigned to `user_id`, newest assignment first.
pub(crate) async fn list_assigned(
    pool: &PgPool,
    user_id: &str,
    skip: i64,
    limit: i64,
) -> Result<(Vec<Exam>, i64), sqlx::Error> {
    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*)
         FROM user_exams ue
         JOIN exams e ON e.id = ue.exam_id
         WHERE ue.user_id = $1 AND e.deleted_at IS NULL",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    let exams = sqlx::query_as::<_, Exam>(&format!(
        "SELECT {}
         FROM user_exams ue
         JOIN exams e ON e.id = ue.exam_id
         WHERE ue.user_id = $1 AND e.deleted_at IS NULL
         ORDER BY ue.created_at DESC
         OFFSET $2
         LIMIT $3",
        qualified("e", COLUMNS)
    ))
    .bind(user_id)
    .bind(skip)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok((exams, total))
}
