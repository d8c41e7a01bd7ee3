use sqlx::Row;

fn database_url() -> Option<String> {
    // Load .env so POSTGRES_* from .env are available (integration tests don't use app config)
    dotenvy::dotenv().ok();

    if let Ok(url) = std::env::var("DATABASE_URL") {
        if !url.trim().is_empty() {
            return Some(url);
        }
    }

    let server = std::env::var("POSTGRES_SERVER").unwrap_or_else(|_| "localhost".into());
    let port = std::env::var("POSTGRES_PORT").unwrap_or_else(|_| "5432".into());
    let user = std::env::var("POSTGRES_USER").unwrap_or_else(|_| "exam".into());
    let password = std::env::var("POSTGRES_PASSWORD").unwrap_or_default();
    let db = std::env::var("POSTGRES_DB").unwrap_or_else(|_| "exam_db".into());

    Some(format!("postgresql://{user}:{password}@{server}:{port}/{db}"))
}

async fn migrated_pool() -> anyhow::Result<sqlx::PgPool> {
    let database_url = match database_url() {
        Some(url) => url,
        None => {
            anyhow::bail!("DATABASE_URL and POSTGRES_* are not set");
        }
    };

    let pool =
        sqlx::postgres::PgPoolOptions::new().max_connections(1).connect(&database_url).await?;

    let migrations_dir =
        std::env::var("EXAM_MIGRATIONS_DIR").unwrap_or_else(|_| "migrations".to_string());
    let migrator = sqlx::migrate::Migrator::new(std::path::Path::new(&migrations_dir)).await?;
    migrator.run(&pool).await?;
    Ok(pool)
}

#[tokio::test]
async fn migrations_apply_and_tables_exist() -> anyhow::Result<()> {
    let pool = migrated_pool().await?;

    let tables = ["users", "questions", "exams", "exam_questions", "user_exams", "results"];

    for table in tables {
        let row = sqlx::query("SELECT to_regclass($1)::text").bind(table).fetch_one(&pool).await?;
        let regclass: Option<String> = row.try_get(0)?;
        assert!(regclass.is_some(), "expected table {table} to exist after migrations");
    }

    Ok(())
}

#[tokio::test]
async fn attempt_and_result_uniqueness_is_enforced() -> anyhow::Result<()> {
    let pool = migrated_pool().await?;

    let constraints = [
        ("user_exams", "uq_user_exams_user_exam"),
        ("results", "uq_results_user_exam"),
        ("exam_questions", "uq_exam_questions_exam_question"),
    ];

    for (table, constraint) in constraints {
        let row = sqlx::query(
            "SELECT COUNT(*) FROM pg_constraint c
             JOIN pg_class t ON t.oid = c.conrelid
             WHERE t.relname = $1 AND c.conname = $2 AND c.contype = 'u'",
        )
        .bind(table)
        .bind(constraint)
        .fetch_one(&pool)
        .await?;
        let count: i64 = row.try_get(0)?;
        assert_eq!(count, 1, "expected unique constraint {constraint} on {table}");
    }

    Ok(())
}

#[tokio::test]
async fn soft_delete_columns_exist() -> anyhow::Result<()> {
    let pool = migrated_pool().await?;

    for table in ["users", "questions", "exams"] {
        let row = sqlx::query(
            "SELECT COUNT(*) FROM information_schema.columns
             WHERE table_name = $1 AND column_name = 'deleted_at'",
        )
        .bind(table)
        .fetch_one(&pool)
        .await?;
        let count: i64 = row.try_get(0)?;
        assert_eq!(count, 1, "expected {table}.deleted_at");
    }

    Ok(())
}
