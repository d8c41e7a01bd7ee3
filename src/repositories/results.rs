use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use time::PrimitiveDateTime;

use crate::db::models::ExamResult;
use crate::repositories::qualified;
use crate::services::grading::GradedAnswer;

pub(crate) const COLUMNS: &str = "\
    id, user_id, exam_id, user_exam_id, score, earned_points, max_points, passed, late, \
    answers, started_at, ended_at, duration_seconds, created_at";

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ResultRow {
    #[sqlx(flatten)]
    pub(crate) result: ExamResult,
    pub(crate) exam_title: String,
    pub(crate) username: String,
}

pub(crate) struct NewResult<'a> {
    pub(crate) id: &'a str,
    pub(crate) user_id: &'a str,
    pub(crate) exam_id: &'a str,
    pub(crate) user_exam_id: &'a str,
    pub(crate) score: f64,
    pub(crate) earned_points: i32,
    pub(crate) max_points: i32,
    pub(crate) passed: bool,
    pub(crate) late: bool,
    pub(crate) answers: &'a [GradedAnswer],
    pub(crate) started_at: PrimitiveDateTime,
    pub(crate) ended_at: PrimitiveDateTime,
    pub(crate) duration_seconds: i32,
}

/// Inserts the result for an attempt. Returns `None` if that attempt already has one.
pub(crate) async fn insert(
    tx: &mut Transaction<'_, Postgres>,
    params: NewResult<'_>,
) -> Result<Option<ExamResult>, sqlx::Error> {
    sqlx::query_as::<_, ExamResult>(&format!(
        "INSERT INTO results (
            id, user_id, exam_id, user_exam_id, score, earned_points, max_points, passed, late,
            answers, started_at, ended_at, duration_seconds, created_at
         ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$12)
         ON CONFLICT (user_exam_id) DO NOTHING
         RETURNING {COLUMNS}"
    ))
    .bind(params.id)
    .bind(params.user_id)
    .bind(params.exam_id)
    .bind(params.user_exam_id)
    .bind(params.score)
    .bind(params.earned_points)
    .bind(params.max_points)
    .bind(params.passed)
    .bind(params.late)
    .bind(Json(params.answers))
    .bind(params.started_at)
    .bind(params.ended_at)
    .bind(params.duration_seconds)
    .fetch_optional(&mut **tx)
    .await
}

pub(crate) async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<ResultRow>, sqlx::Error> {
    sqlx::query_as::<_, ResultRow>(&format!(
        "SELECT {}, e.title AS exam_title, u.username
         FROM results r
         JOIN exams e ON e.id = r.exam_id
         JOIN users u ON u.id = r.user_id
         WHERE r.id = $1",
        qualified("r", COLUMNS)
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub(crate) struct ListResults {
    pub(crate) user_id: Option<String>,
    pub(crate) exam_id: Option<String>,
    pub(crate) passed: Option<bool>,
    pub(crate) skip: i64,
    pub(crate) limit: i64,
}

pub(crate) async fn list(
    pool: &PgPool,
    params: &ListResults,
) -> Result<(Vec<ResultRow>, i64), sqlx::Error> {
    let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM results r WHERE TRUE");
    push_filters(&mut count, params);
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    let mut builder = QueryBuilder::<Postgres>::new(format!(
        "SELECT {}, e.title AS exam_title, u.username
         FROM results r
         JOIN exams e ON e.id = r.exam_id
         JOIN users u ON u.id = r.user_id
         WHERE TRUE",
        qualified("r", COLUMNS)
    ));
    push_filters(&mut builder, params);
    builder.push(" ORDER BY r.created_at DESC OFFSET ");
    builder.push_bind(params.skip);
    builder.push(" LIMIT ");
    builder.push_bind(params.limit);

    let rows = builder.build_query_as::<ResultRow>().fetch_all(pool).await?;
    Ok((rows, total))
}

fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, params: &ListResults) {
    if let Some(user_id) = params.user_id.as_ref() {
        builder.push(" AND r.user_id = ");
        builder.push_bind(user_id.clone());
    }
    if let Some(exam_id) = params.exam_id.as_ref() {
        builder.push(" AND r.exam_id = ");
        builder.push_bind(exam_id.clone());
    }
    if let Some(passed) = params.passed {
        builder.push(" AND r.passed = ");
        builder.push_bind(passed);
    }
}
