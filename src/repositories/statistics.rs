use serde::Serialize;
use sqlx::PgPool;

#[derive(Debug, Serialize, sqlx::FromRow)]
pub(crate) struct ExamStatistics {
    pub(crate) exam_id: String,
    pub(crate) exam_title: String,
    pub(crate) total_attempts: i64,
    pub(crate) passed_attempts: i64,
    pub(crate) failed_attempts: i64,
    pub(crate) pass_rate: f64,
    pub(crate) average_score: f64,
    pub(crate) highest_score: f64,
    pub(crate) lowest_score: f64,
    pub(crate) average_duration: f64,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub(crate) struct UserStatistics {
    pub(crate) user_id: String,
    pub(crate) username: String,
    pub(crate) total_exams: i64,
    pub(crate) passed_exams: i64,
    pub(crate) failed_exams: i64,
    pub(crate) pass_rate: f64,
    pub(crate) average_score: f64,
    pub(crate) highest_score: f64,
    pub(crate) lowest_score: f64,
    pub(crate) total_time_spent: i64,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub(crate) struct QuestionStatistics {
    pub(crate) question_id: String,
    pub(crate) question_title: String,
    pub(crate) total_attempts: i64,
    pub(crate) correct_attempts: i64,
    pub(crate) wrong_attempts: i64,
    pub(crate) success_rate: f64,
    pub(crate) average_time_spent: f64,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub(crate) struct OverallStatistics {
    pub(crate) total_exams: i64,
    pub(crate) total_users: i64,
    pub(crate) total_attempts: i64,
    pub(crate) average_score: f64,
    pub(crate) pass_rate: f64,
    pub(crate) total_time_spent: i64,
    pub(crate) average_duration: f64,
}

pub(crate) async fn exam_statistics(pool: &PgPool) -> Result<Vec<ExamStatistics>, sqlx::Error> {
    sqlx::query_as::<_, ExamStatistics>(
        "SELECT e.id AS exam_id,
                e.title AS exam_title,
                COUNT(r.id) AS total_attempts,
                COUNT(r.id) FILTER (WHERE r.passed) AS passed_attempts,
                COUNT(r.id) FILTER (WHERE NOT r.passed) AS failed_attempts,
                COALESCE(AVG(CASE WHEN r.passed THEN 1.0 ELSE 0.0 END) * 100, 0)::FLOAT8 AS pass_rate,
                COALESCE(AVG(r.score), 0)::FLOAT8 AS average_score,
                COALESCE(MAX(r.score), 0)::FLOAT8 AS highest_score,
                COALESCE(MIN(r.score), 0)::FLOAT8 AS lowest_score,
                COALESCE(AVG(r.duration_seconds), 0)::FLOAT8 AS average_duration
         FROM exams e
         LEFT JOIN results r ON r.exam_id = e.id
         WHERE e.deleted_at IS NULL
         GROUP BY e.id, e.title
         ORDER BY total_attempts DESC, e.title",
    )
    .fetch_all(pool)
    .await
}

pub(crate) async fn user_statistics(pool: &PgPool) -> Result<Vec<UserStatistics>, sqlx::Error> {
    sqlx::query_as::<_, UserStatistics>(
        "SELECT u.id AS user_id,
                u.username,
                COUNT(r.id) AS total_exams,
                COUNT(r.id) FILTER (WHERE r.passed) AS passed_exams,
                COUNT(r.id) FILTER (WHERE NOT r.passed) AS failed_exams,
                COALESCE(AVG(CASE WHEN r.passed THEN 1.0 ELSE 0.0 END) * 100, 0)::FLOAT8 AS pass_rate,
                COALESCE(AVG(r.score), 0)::FLOAT8 AS average_score,
                COALESCE(MAX(r.score), 0)::FLOAT8 AS highest_score,
                COALESCE(MIN(r.score), 0)::FLOAT8 AS lowest_score,
                COALESCE(SUM(r.duration_seconds), 0)::BIGINT AS total_time_spent
         FROM users u
         JOIN results r ON r.user_id = u.id
         WHERE u.role = 'user'
         GROUP BY u.id, u.username
         ORDER BY total_exams DESC, u.username
         LIMIT 50",
    )
    .fetch_all(pool)
    .await
}

pub(crate) async fn question_statistics(
    pool: &PgPool,
) -> Result<Vec<QuestionStatistics>, sqlx::Error> {
    sqlx::query_as::<_, QuestionStatistics>(
        "SELECT q.id AS question_id,
                q.title AS question_title,
                COUNT(*) AS total_attempts,
                COUNT(*) FILTER (WHERE a.is_correct) AS correct_attempts,
                COUNT(*) FILTER (WHERE NOT a.is_correct) AS wrong_attempts,
                COALESCE(AVG(CASE WHEN a.is_correct THEN 1.0 ELSE 0.0 END) * 100, 0)::FLOAT8 AS success_rate,
                COALESCE(AVG(a.time_spent), 0)::FLOAT8 AS average_time_spent
         FROM questions q
         JOIN (
             SELECT answer->>'question_id' AS question_id,
                    (answer->>'is_correct')::BOOLEAN AS is_correct,
                    COALESCE((answer->>'time_spent')::INT, 0) AS time_spent
             FROM results r, jsonb_array_elements(r.answers) AS answer
         ) a ON a.question_id = q.id
         WHERE q.deleted_at IS NULL
         GROUP BY q.id, q.title
         ORDER BY total_attempts DESC, q.title
         LIMIT 100",
    )
    .fetch_all(pool)
    .await
}

pub(crate) async fn overall_statistics(pool: &PgPool) -> Result<OverallStatistics, sqlx::Error> {
    sqlx::query_as::<_, OverallStatistics>(
        "SELECT (SELECT COUNT(*) FROM exams WHERE deleted_at IS NULL) AS total_exams,
                (SELECT COUNT(*) FROM users WHERE role = 'user' AND deleted_at IS NULL) AS total_users,
                COUNT(r.id) AS total_attempts,
                COALESCE(AVG(r.score), 0)::FLOAT8 AS average_score,
                COALESCE(AVG(CASE WHEN r.passed THEN 1.0 ELSE 0.0 END) * 100, 0)::FLOAT8 AS pass_rate,
                COALESCE(SUM(r.duration_seconds), 0)::BIGINT AS total_time_spent,
                COALESCE(AVG(r.duration_seconds), 0)::FLOAT8 AS average_duration
         FROM results r",
    )
    .fetch_one(pool)
    .await
}
