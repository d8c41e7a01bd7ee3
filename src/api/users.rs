use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use serde::Deserialize;
use validator::Validate;

use crate::api::errors::ApiError;
use crate::api::guards::{CurrentAdmin, CurrentUser};
use crate::api::pagination::{default_limit, normalize, PaginatedResponse};
use crate::api::validation::validate_password_len;
use crate::core::security;
use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::db::types::UserRole;
use crate::repositories;
use crate::schemas::user::{AdminUserUpdate, PasswordChange, ProfileUpdate, UserResponse};
use crate::services::refresh_tokens;

#[derive(Debug, Deserialize)]
pub(crate) struct UserListQuery {
    #[serde(default)]
    skip: i64,
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    search: Option<String>,
    #[serde(default)]
    role: Option<UserRole>,
    #[serde(default)]
    #[serde(alias = "isActive")]
    is_active: Option<bool>,
}

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_users))
        .route("/me", get(get_profile).put(update_profile))
        .route("/me/password", put(change_password))
        .route("/:user_id", get(get_user).patch(update_user).delete(delete_user))
}

async fn list_users(
    Query(params): Query<UserListQuery>,
    CurrentAdmin(_admin): CurrentAdmin,
    State(state): State<AppState>,
) -> Result<Json<PaginatedResponse<UserResponse>>, ApiError> {
    let (skip, limit) = normalize(params.skip, params.limit);
    let search = params.search.map(|value| value.trim().to_string()).filter(|v| !v.is_empty());

    let (users, total_count) = repositories::users::list(
        state.db(),
        &repositories::users::ListUsers {
            search,
            role: params.role,
            is_active: params.is_active,
            skip,
            limit,
        },
    )
    .await
    .map_err(|e| ApiError::internal(e, "Failed to list users"))?;

    Ok(Json(PaginatedResponse {
        items: users.into_iter().map(UserResponse::from_db).collect(),
        total_count,
        skip,
        limit,
    }))
}

async fn get_user(
    Path(user_id): Path<String>,
    CurrentAdmin(_admin): CurrentAdmin,
    State(state): State<AppState>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = repositories::users::find_by_id(state.db(), &user_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch user"))?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    Ok(Json(UserResponse::from_db(user)))
}

async fn update_user(
    Path(user_id): Path<String>,
    CurrentAdmin(admin): CurrentAdmin,
    State(state): State<AppState>,
    Json(payload): Json<AdminUserUpdate>,
) -> Result<Json<UserResponse>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    if admin.id == user_id
        && (payload.is_active == Some(false) || payload.role.is_some_and(|r| r != UserRole::Admin))
    {
        return Err(ApiError::BadRequest(
            "Admins cannot deactivate or demote themselves".to_string(),
        ));
    }

    let user = repositories::users::update(
        state.db(),
        &user_id,
        repositories::users::UpdateUser {
            full_name: payload.full_name.map(|name| name.trim().to_string()),
            email: None,
            role: payload.role,
            is_active: payload.is_active,
            hashed_password: None,
            updated_at: primitive_now_utc(),
        },
    )
    .await
    .map_err(|e| ApiError::internal(e, "Failed to update user"))?
    .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    tracing::info!(admin_id = %admin.id, user_id = %user.id, "User updated");

    Ok(Json(UserResponse::from_db(user)))
}

/// Soft delete. The account disappears from lookups and can no longer sign in; its exam
/// history stays.
async fn delete_user(
    Path(user_id): Path<String>,
    CurrentAdmin(admin): CurrentAdmin,
    State(state): State<AppState>,
) -> Result<StatusCode, ApiError> {
    if admin.id == user_id {
        return Err(ApiError::BadRequest("Admins cannot delete themselves".to_string()));
    }

    let deleted = repositories::users::soft_delete(state.db(), &user_id, primitive_now_utc())
        .await
        .map_err(|e| ApiError::internal(e, "Failed to delete user"))?;
    if !deleted {
        return Err(ApiError::NotFound("User not found".to_string()));
    }

    if let Err(err) = refresh_tokens::revoke(state.redis(), &user_id).await {
        tracing::warn!(error = %err, user_id = %user_id, "Refresh token not revoked");
    }

    tracing::info!(admin_id = %admin.id, user_id = %user_id, "User deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn get_profile(CurrentUser(user): CurrentUser) -> Json<UserResponse> {
    Json(UserResponse::from_db(user))
}

async fn update_profile(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Json(payload): Json<ProfileUpdate>,
) -> Result<Json<UserResponse>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let email = payload.email.map(|email| email.trim().to_lowercase());
    if let Some(email) = email.as_deref() {
        let taken = repositories::users::email_taken(state.db(), email, &user.id)
            .await
            .map_err(|e| ApiError::internal(e, "Failed to check email"))?;
        if taken {
            return Err(ApiError::Conflict("Email is already in use".to_string()));
        }
    }

    let updated = repositories::users::update(
        state.db(),
        &user.id,
        repositories::users::UpdateUser {
            full_name: payload.full_name.map(|name| name.trim().to_string()),
            email,
            role: None,
            is_active: None,
            hashed_password: None,
            updated_at: primitive_now_utc(),
        },
    )
    .await
    .map_err(|e| ApiError::internal(e, "Failed to update profile"))?
    .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    tracing::info!(user_id = %updated.id, "Profile updated");
    Ok(Json(UserResponse::from_db(updated)))
}

/// Requires the current password. Signs the user out of other sessions by revoking the
/// refresh token.
async fn change_password(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Json(payload): Json<PasswordChange>,
) -> Result<StatusCode, ApiError> {
    validate_password_len(&payload.new_password)?;

    let verified = security::verify_password(&payload.current_password, &user.hashed_password)
        .map_err(|e| ApiError::internal(e, "Failed to verify password"))?;
    if !verified {
        return Err(ApiError::BadRequest("Current password is incorrect".to_string()));
    }

    let hashed_password = security::hash_password(&payload.new_password)
        .map_err(|e| ApiError::internal(e, "Failed to hash password"))?;
    repositories::users::update(
        state.db(),
        &user.id,
        repositories::users::UpdateUser {
            full_name: None,
            email: None,
            role: None,
            is_active: None,
            hashed_password: Some(hashed_password),
            updated_at: primitive_now_utc(),
        },
    )
    .await
    .map_err(|e| ApiError::internal(e, "Failed to change password"))?
    .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    if let Err(err) = refresh_tokens::revoke(state.redis(), &user.id).await {
        tracing::warn!(error = %err, user_id = %user.id, "Refresh token not revoked");
    }

    tracing::info!(user_id = %user.id, "Password changed");
    Ok(StatusCode::NO_CONTENT)
}
