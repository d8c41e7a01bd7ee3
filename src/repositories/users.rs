use sqlx::{PgPool, Postgres, QueryBuilder};
use time::PrimitiveDateTime;

use crate::db::models::User;
use crate::db::types::UserRole;

const COLUMNS: &str = "\
    id, username, email, hashed_password, full_name, role, is_active, created_at, updated_at, \
    deleted_at";

pub(crate) async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(&format!(
        "SELECT {COLUMNS} FROM users WHERE id = $1 AND deleted_at IS NULL"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Includes soft-deleted accounts.
pub(crate) async fn find_by_username(
    pool: &PgPool,
    username: &str,
) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(&format!("SELECT {COLUMNS} FROM users WHERE username = $1"))
        .bind(username)
        .fetch_optional(pool)
        .await
}

/// Login identity: either the username or the (case-insensitive) email.
pub(crate) async fn find_by_login(
    pool: &PgPool,
    identity: &str,
) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(&format!(
        "SELECT {COLUMNS} FROM users \
         WHERE (username = $1 OR LOWER(email) = LOWER($1)) AND deleted_at IS NULL LIMIT 1"
    ))
    .bind(identity)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn exists_by_username_or_email(
    pool: &PgPool,
    username: &str,
    email: &str,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM users WHERE username = $1 OR LOWER(email) = LOWER($2))",
    )
    .bind(username)
    .bind(email)
    .fetch_one(pool)
    .await
}

/// Whether another account (deleted ones included) already uses `email`.
pub(crate) async fn email_taken(
    pool: &PgPool,
    email: &str,
    except_id: &str,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM users WHERE LOWER(email) = LOWER($1) AND id <> $2)",
    )
    .bind(email)
    .bind(except_id)
    .fetch_one(pool)
    .await
}

/// Number of ids in `ids` that belong to active users.
pub(crate) async fn count_active_by_ids(pool: &PgPool, ids: &[String]) -> Result<i64, sqlx::Error> {
    if ids.is_empty() {
        return Ok(0);
    }

    sqlx::query_scalar("SELECT COUNT(*) FROM users \
         WHERE id = ANY($1) AND is_active = TRUE AND deleted_at IS NULL")
        .bind(ids)
        .fetch_one(pool)
        .await
}

pub(crate) struct CreateUser<'a> {
    pub id: &'a str,
    pub username: &'a str,
    pub email: &'a str,
    pub hashed_password: String,
    pub full_name: &'a str,
    pub role: UserRole,
    pub is_active: bool,
    pub created_at: PrimitiveDateTime,
    pub updated_at: PrimitiveDateTime,
}

pub(crate) async fn create(pool: &PgPool, params: CreateUser<'_>) -> Result<User, sqlx::Error> {
    sqlx::query_as::<_, User>(&format!(
        "INSERT INTO users (
            id, username, email, hashed_password, full_name, role, is_active, created_at, updated_at
        ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
        RETURNING {COLUMNS}",
    ))
    .bind(params.id)
    .bind(params.username)
    .bind(params.email)
    .bind(params.hashed_password)
    .bind(params.full_name)
    .bind(params.role)
    .bind(params.is_active)
    .bind(params.created_at)
    .bind(params.updated_at)
    .fetch_one(pool)
    .await
}

pub(crate) struct UpdateUser {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub role: Option<UserRole>,
    pub is_active: Option<bool>,
    pub hashed_password: Option<String>,
    pub updated_at: PrimitiveDateTime,
}

pub(crate) async fn update(
    pool: &PgPool,
    id: &str,
    params: UpdateUser,
) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(&format!(
        "UPDATE users SET
            full_name = COALESCE($1, full_name),
            role = COALESCE($2, role),
            is_active = COALESCE($3, is_active),
            hashed_password = COALESCE($4, hashed_password),
            email = COALESCE($5, email),
            updated_at = $6
         WHERE id = $7 AND deleted_at IS NULL
         RETURNING {COLUMNS}"
    ))
    .bind(params.full_name)
    .bind(params.role)
    .bind(params.is_active)
    .bind(params.hashed_password)
    .bind(params.email)
    .bind(params.updated_at)
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Undoes [`soft_delete`]. The account stays inactive until updated.
pub(crate) async fn restore(pool: &PgPool, id: &str) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE users SET deleted_at = NULL WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Deactivates the account and hides it from lookups. The row stays for exam history.
pub(crate) async fn soft_delete(
    pool: &PgPool,
    id: &str,
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE users SET is_active = FALSE, deleted_at = $1, updated_at = $1 \
         WHERE id = $2 AND deleted_at IS NULL",
    )
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub(crate) struct ListUsers {
    pub(crate) search: Option<String>,
    pub(crate) role: Option<UserRole>,
    pub(crate) is_active: Option<bool>,
    pub(crate) skip: i64,
    pub(crate) limit: i64,
}

pub(crate) async fn list(
    pool: &PgPool,
    params: &ListUsers,
) -> Result<(Vec<User>, i64), sqlx::Error> {
    let mut count =
        QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM users WHERE deleted_at IS NULL");
    push_filters(&mut count, params);
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    let mut builder =
        QueryBuilder::<Postgres>::new(format!("SELECT {COLUMNS} FROM users WHERE deleted_at IS NULL"));
    push_filters(&mut builder, params);
    builder.push(" ORDER BY created_at DESC OFFSET ");
    builder.push_bind(params.skip);
    builder.push(" LIMIT ");
    builder.push_bind(params.limit);

    let users = builder.build_query_as::<User>().fetch_all(pool).await?;
    Ok((users, total))
}

fn push_filters<'a>(builder: &mut QueryBuilder<'a, Postgres>, params: &'a ListUsers) {
    if let Some(search) = params.search.as_deref() {
        let pattern = format!("%{}%", search.to_lowercase());
        builder.push(" AND (LOWER(username) LIKE ");
        builder.push_bind(pattern.clone());
        builder.push(" OR LOWER(email) LIKE ");
        builder.push_bind(pattern.clone());
        builder.push(" OR LOWER(full_name) LIKE ");
        builder.push_bind(pattern);
        builder.push(")");
    }
    if let Some(role) = params.role {
        builder.push(" AND role = ");
        builder.push_bind(role);
    }
    if let Some(is_active) = params.is_active {
        builder.push(" AND is_active = ");
        builder.push_bind(is_active);
    }
}
