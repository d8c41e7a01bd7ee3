use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use time::PrimitiveDateTime;

use crate::db::models::{Question, QuestionOption};
use crate::db::types::{DifficultyLevel, QuestionType};

pub(crate) const COLUMNS: &str = "\
    id, title, content, question_type, difficulty, options, tags, points, time_limit, \
    explanation, is_active, created_by, created_at, updated_at, deleted_at";

pub(crate) async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<Question>, sqlx::Error> {
    sqlx::query_as::<_, Question>(&format!(
        "SELECT {COLUMNS} FROM questions WHERE id = $1 AND deleted_at IS NULL"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn find_by_ids(
    pool: &PgPool,
    ids: &[String],
) -> Result<Vec<Question>, sqlx::Error> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    sqlx::query_as::<_, Question>(&format!("SELECT {COLUMNS} FROM questions WHERE id = ANY($1)"))
        .bind(ids)
        .fetch_all(pool)
        .await
}

/// Number of ids in `ids` that reference live, active questions.
pub(crate) async fn count_active_by_ids(
    executor: impl sqlx::PgExecutor<'_>,
    ids: &[String],
) -> Result<i64, sqlx::Error> {
    if ids.is_empty() {
        return Ok(0);
    }

    sqlx::query_scalar(
        "SELECT COUNT(*) FROM questions
         WHERE id = ANY($1) AND is_active = TRUE AND deleted_at IS NULL",
    )
    .bind(ids)
    .fetch_one(executor)
    .await
}

pub(crate) struct QuestionFields<'a> {
    pub(crate) title: &'a str,
    pub(crate) content: &'a str,
    pub(crate) question_type: QuestionType,
    pub(crate) difficulty: DifficultyLevel,
    pub(crate) options: &'a [QuestionOption],
    pub(crate) tags: &'a [String],
    pub(crate) points: i32,
    pub(crate) time_limit: i32,
    pub(crate) explanation: Option<&'a str>,
    pub(crate) is_active: bool,
}

pub(crate) async fn create(
    pool: &PgPool,
    id: &str,
    created_by: &str,
    fields: QuestionFields<'_>,
    now: PrimitiveDateTime,
) -> Result<Question, sqlx::Error> {
    sqlx::query_as::<_, Question>(&format!(
        "INSERT INTO questions (
            id, title, content, question_type, difficulty, options, tags, points, time_limit,
            explanation, is_active, created_by, created_at, updated_at
         ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$13)
         RETURNING {COLUMNS}"
    ))
    .bind(id)
    .bind(fields.title)
    .bind(fields.content)
    .bind(fields.question_type)
    .bind(fields.difficulty)
    .bind(Json(fields.options))
    .bind(Json(fields.tags))
    .bind(fields.points)
    .bind(fields.time_limit)
    .bind(fields.explanation)
    .bind(fields.is_active)
    .bind(created_by)
    .bind(now)
    .fetch_one(pool)
    .await
}

pub(crate) async fn update(
    pool: &PgPool,
    id: &str,
    fields: QuestionFields<'_>,
    now: PrimitiveDateTime,
) -> Result<Option<Question>, sqlx::Error> {
    sqlx::query_as::<_, Question>(&format!(
        "UPDATE questions SET
            title = $1,
            content = $2,
            question_type = $3,
            difficulty = $4,
            options = $5,
            tags = $6,
            points = $7,
            time_limit = $8,
            explanation = $9,
            is_active = $10,
            updated_at = $11
         WHERE id = $12 AND deleted_at IS NULL
         RETURNING {COLUMNS}"
    ))
    .bind(fields.title)
    .bind(fields.content)
    .bind(fields.question_type)
    .bind(fields.difficulty)
    .bind(Json(fields.options))
    .bind(Json(fields.tags))
    .bind(fields.points)
    .bind(fields.time_limit)
    .bind(fields.explanation)
    .bind(fields.is_active)
    .bind(now)
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn is_used_by_live_exam(pool: &PgPool, id: &str) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(
            SELECT 1
            FROM exam_questions eq
            JOIN exams e ON e.id = eq.exam_id
            WHERE eq.question_id = $1
              AND e.deleted_at IS NULL
              AND e.status IN ('draft', 'active')
         )",
    )
    .bind(id)
    .fetch_one(pool)
    .await
}

pub(crate) async fn soft_delete(
    pool: &PgPool,
    id: &str,
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE questions SET is_active = FALSE, deleted_at = $1, updated_at = $1
         WHERE id = $2 AND deleted_at IS NULL",
    )
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub(crate) async fn list_tags(pool: &PgPool) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>(
        "SELECT DISTINCT tag
         FROM questions, jsonb_array_elements_text(tags) AS tag
         WHERE deleted_at IS NULL
         ORDER BY tag",
    )
    .fetch_all(pool)
    .await
}

#[derive(Debug, Default)]
pub(crate) struct ListQuestions {
    pub(crate) difficulty: Option<DifficultyLevel>,
    pub(crate) question_type: Option<QuestionType>,
    pub(crate) tag: Option<String>,
    pub(crate) search: Option<String>,
    pub(crate) is_active: Option<bool>,
    pub(crate) skip: i64,
    pub(crate) limit: i64,
}

pub(crate) async fn list(
    pool: &PgPool,
    params: &ListQuestions,
) -> Result<(Vec<Question>, i64), sqlx::Error> {
    let mut count =
        QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM questions WHERE deleted_at IS NULL");
    push_filters(&mut count, params);
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    let mut builder = QueryBuilder::<Postgres>::new(format!(
        "SELECT {COLUMNS} FROM questions WHERE deleted_at IS NULL"
    ));
    push_filters(&mut builder, params);
    builder.push(" ORDER BY created_at DESC OFFSET ");
    builder.push_bind(params.skip);
    builder.push(" LIMIT ");
    builder.push_bind(params.limit);

    let questions = builder.build_query_as::<Question>().fetch_all(pool).await?;
    Ok((questions, total))
}

fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, params: &ListQuestions) {
    if let Some(difficulty) = params.difficulty {
        builder.push(" AND difficulty = ");
        builder.push_bind(difficulty);
    }
    if let Some(question_type) = params.question_type {
        builder.push(" AND question_type = ");
        builder.push_bind(question_type);
    }
    if let Some(tag) = params.tag.as_ref() {
        builder.push(" AND tags ? ");
        builder.push_bind(tag.clone());
    }
    if let Some(search) = params.search.as_ref() {
        let pattern = format!("%{}%", search.to_lowercase());
        builder.push(" AND (LOWER(title) LIKE ");
        builder.push_bind(pattern.clone());
        builder.push(" OR LOWER(content) LIKE ");
        builder.push_bind(pattern);
        builder.push(")");
    }
    if let Some(is_active) = params.is_active {
        builder.push(" AND is_active = ");
        builder.push_bind(is_active);
    }
}
