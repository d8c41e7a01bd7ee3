use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;
use validator::Validate;

use crate::api::errors::ApiError;
use crate::api::guards::CurrentUser;
use crate::api::validation::{validate_password_len, validate_username};
use crate::core::security;
use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::db::models::User;
use crate::db::types::UserRole;
use crate::repositories;
use crate::services::refresh_tokens;
use crate::schemas::auth::{RefreshRequest, TokenResponse};
use crate::schemas::user::{UserCreate, UserLogin, UserResponse};

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/refresh", post(refresh))
        .route("/logout", post(logout))
        .route("/me", get(me))
}

async fn register(
    State(state): State<AppState>,
    Json(payload): Json<UserCreate>,
) -> Result<(StatusCode, Json<TokenResponse>), ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;
    validate_username(&payload.username)?;
    validate_password_len(&payload.password)?;

    let email = payload.email.trim().to_lowercase();
    let taken =
        repositories::users::exists_by_username_or_email(state.db(), &payload.username, &email)
            .await
            .map_err(|e| ApiError::internal(e, "Failed to check existing user"))?;
    if taken {
        return Err(ApiError::Conflict(
            "User with this username or email already exists".to_string(),
        ));
    }

    let hashed_password = security::hash_password(&payload.password)
        .map_err(|e| ApiError::internal(e, "Failed to hash password"))?;
    let now = primitive_now_utc();

    let user = repositories::users::create(
        state.db(),
        repositories::users::CreateUser {
            id: &Uuid::new_v4().to_string(),
            username: &payload.username,
            email: &email,
            hashed_password,
            full_name: payload.full_name.trim(),
            role: UserRole::User,
            is_active: true,
            created_at: now,
            updated_at: now,
        },
    )
    .await
    .map_err(|e| ApiError::internal(e, "Failed to create user"))?;

    tracing::info!(user_id = %user.id, username = %user.username, "User registered");

    Ok((StatusCode::CREATED, Json(token_response(&state, user).await?)))
}

async fn login(
    State(state): State<AppState>,
    Json(payload): Json<UserLogin>,
) -> Result<Json<TokenResponse>, ApiError> {
    let identity = payload.username.trim().to_lowercase();
    if identity.is_empty() {
        return Err(ApiError::BadRequest("Username is required".to_string()));
    }

    let limits = state.settings().rate_limit();
    let allowed = state
        .redis()
        .rate_limit(&format!("rl:login:{identity}"), limits.login_limit, limits.window_seconds)
        .await
        .unwrap_or(true);
    if !allowed {
        return Err(ApiError::TooManyRequests("Too many login attempts, try again later"));
    }

    let user = repositories::users::find_by_login(state.db(), payload.username.trim())
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load user"))?
        .ok_or(ApiError::Unauthorized("Incorrect username or password"))?;

    let verified = security::verify_password(&payload.password, &user.hashed_password)
        .map_err(|_| ApiError::Unauthorized("Incorrect username or password"))?;
    if !verified {
        return Err(ApiError::Unauthorized("Incorrect username or password"));
    }

    if !user.is_active {
        return Err(ApiError::BadRequest("Inactive user".to_string()));
    }

    Ok(Json(token_response(&state, user).await?))
}

/// Trades a live refresh token for a new token pair. The presented token stops working.
async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let claims = state
        .tokens()
        .verify_refresh(payload.refresh_token.trim())
        .map_err(|_| invalid_refresh_token())?;

    let user = repositories::users::find_by_id(state.db(), &claims.sub)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load user"))?
        .filter(|user| user.is_active)
        .ok_or_else(invalid_refresh_token)?;

    let tokens = state.tokens();
    let access_token =
        tokens.issue(&user.id).map_err(|e| ApiError::internal(e, "Failed to create access token"))?;
    let refresh_token = tokens
        .issue_refresh(&user.id)
        .map_err(|e| ApiError::internal(e, "Failed to create refresh token"))?;

    let rotated = refresh_tokens::rotate(
        state.redis(),
        &user.id,
        payload.refresh_token.trim(),
        &refresh_token,
        tokens.refresh_expires_in_seconds().max(1) as u64,
    )
    .await
    .map_err(|e| {
        tracing::warn!(error = %e, user_id = %user.id, "Refresh token store unavailable");
        ApiError::ServiceUnavailable("Token store unavailable".to_string())
    })?;
    if !rotated {
        tracing::info!(user_id = %user.id, "Refresh with a revoked or superseded token");
        return Err(invalid_refresh_token());
    }

    Ok(Json(TokenResponse {
        access_token,
        token_type: "bearer".to_string(),
        expires_in: tokens.expires_in_seconds(),
        refresh_token: Some(refresh_token),
        user: UserResponse::from_db(user),
    }))
}

async fn logout(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<StatusCode, ApiError> {
    refresh_tokens::revoke(state.redis(), &user.id).await.map_err(|e| {
        tracing::warn!(error = %e, user_id = %user.id, "Refresh token store unavailable");
        ApiError::ServiceUnavailable("Token store unavailable".to_string())
    })?;

    tracing::info!(user_id = %user.id, "User logged out");
    Ok(StatusCode::NO_CONTENT)
}

async fn me(CurrentUser(user): CurrentUser) -> Json<UserResponse> {
    Json(UserResponse::from_db(user))
}

fn invalid_refresh_token() -> ApiError {
    ApiError::coded(
        StatusCode::UNAUTHORIZED,
        "INVALID_REFRESH_TOKEN",
        "Invalid or expired refresh token",
    )
}

/// Access token plus, when Redis accepts it, a refresh token. Sign-in still succeeds without
/// the store; the client just has to log in again once the access token expires.
async fn token_response(state: &AppState, user: User) -> Result<TokenResponse, ApiError> {
    let tokens = state.tokens();
    let access_token =
        tokens.issue(&user.id).map_err(|e| ApiError::internal(e, "Failed to create access token"))?;
    let candidate = tokens
        .issue_refresh(&user.id)
        .map_err(|e| ApiError::internal(e, "Failed to create refresh token"))?;

    let ttl = tokens.refresh_expires_in_seconds().max(1) as u64;
    let refresh_token = match refresh_tokens::remember(state.redis(), &user.id, &candidate, ttl)
        .await
    {
        Ok(()) => Some(candidate),
        Err(err) => {
            tracing::warn!(error = %err, user_id = %user.id, "Refresh token not stored");
            None
        }
    };

    Ok(TokenResponse {
        access_token,
        token_type: "bearer".to_string(),
        expires_in: tokens.expires_in_seconds(),
        refresh_token,
        user: UserResponse::from_db(user),
    })
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::test_support;

    #[tokio::test]
    async fn register_then_login_with_email() {
        let ctx = test_support::setup_test_context().await;

        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::POST,
                "/api/v1/auth/register",
                None,
                Some(json!({
                    "username": "alice",
                    "email": "Alice@Example.com",
                    "password": "correct-horse",
                    "full_name": "Alice Liddell"
                })),
            ))
            .await
            .expect("register");

        let status = response.status();
        let body = test_support::read_json(response).await;
        assert_eq!(status, StatusCode::CREATED, "response: {body}");
        assert_eq!(body["token_type"], "bearer");
        assert_eq!(body["user"]["role"], "user");
        assert_eq!(body["user"]["email"], "alice@example.com");
        assert!(body["refresh_token"].is_string(), "response: {body}");
        let token = body["access_token"].as_str().expect("token").to_string();

        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::POST,
                "/api/v1/auth/login",
                None,
                Some(json!({ "username": "alice@example.com", "password": "correct-horse" })),
            ))
            .await
            .expect("login");
        let status = response.status();
        let body = test_support::read_json(response).await;
        assert_eq!(status, StatusCode::OK, "response: {body}");
        assert_eq!(body["user"]["username"], "alice");

        let response = ctx
            .app
            .oneshot(test_support::json_request(Method::GET, "/api/v1/auth/me", Some(&token), None))
            .await
            .expect("me");
        let status = response.status();
        let body = test_support::read_json(response).await;
        assert_eq!(status, StatusCode::OK, "response: {body}");
        assert_eq!(body["full_name"], "Alice Liddell");
    }

    async fn post_refresh(ctx: &test_support::TestContext, token: &str) -> (StatusCode, Value) {
        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::POST,
                "/api/v1/auth/refresh",
                None,
                Some(json!({ "refresh_token": token })),
            ))
            .await
            .expect("refresh");
        let status = response.status();
        (status, test_support::read_json(response).await)
    }

    #[tokio::test]
    async fn refresh_rotates_and_logout_revokes() {
        let ctx = test_support::setup_test_context().await;
        test_support::insert_user(ctx.state.db(), "gina", "Gina", "gina-password").await;

        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::POST,
                "/api/v1/auth/login",
                None,
                Some(json!({ "username": "gina", "password": "gina-password" })),
            ))
            .await
            .expect("login");
        let body = test_support::read_json(response).await;
        let access = body["access_token"].as_str().expect("access token").to_string();
        let first = body["refresh_token"].as_str().expect("refresh token").to_string();

        // An access token is not a refresh token.
        let (status, body) = post_refresh(&ctx, &access).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "response: {body}");
        assert_eq!(body["code"], "INVALID_REFRESH_TOKEN");

        let (status, body) = post_refresh(&ctx, &first).await;
        assert_eq!(status, StatusCode::OK, "response: {body}");
        assert_eq!(body["user"]["username"], "gina");
        let second = body["refresh_token"].as_str().expect("rotated token").to_string();
        assert_ne!(first, second);
        let fresh_access = body["access_token"].as_str().expect("access token").to_string();

        let (status, body) = post_refresh(&ctx, &first).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "response: {body}");
        assert_eq!(body["code"], "INVALID_REFRESH_TOKEN");

        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::POST,
                "/api/v1/auth/logout",
                Some(&fresh_access),
                None,
            ))
            .await
            .expect("logout");
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let (status, body) = post_refresh(&ctx, &second).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "response: {body}");
    }

    #[tokio::test]
    async fn refresh_is_refused_for_deactivated_users() {
        let ctx = test_support::setup_test_context().await;
        let user = test_support::insert_user(ctx.state.db(), "hank", "Hank", "hank-password").await;

        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::POST,
                "/api/v1/auth/login",
                None,
                Some(json!({ "username": "hank", "password": "hank-password" })),
            ))
            .await
            .expect("login");
        let body = test_support::read_json(response).await;
        let refresh = body["refresh_token"].as_str().expect("refresh token").to_string();

        test_support::deactivate_user(ctx.state.db(), &user.id).await;

        let (status, body) = post_refresh(&ctx, &refresh).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "response: {body}");
        assert_eq!(body["code"], "INVALID_REFRESH_TOKEN");
    }

    #[tokio::test]
    async fn logout_requires_a_bearer_token() {
        let ctx = test_support::setup_test_context().await;

        let response = ctx
            .app
            .oneshot(test_support::json_request(Method::POST, "/api/v1/auth/logout", None, None))
            .await
            .expect("logout");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn register_rejects_duplicates_and_short_passwords() {
        let ctx = test_support::setup_test_context().await;
        test_support::insert_user(ctx.state.db(), "bob", "Bob", "bob-password").await;

        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::POST,
                "/api/v1/auth/register",
                None,
                Some(json!({
                    "username": "bob",
                    "email": "other@example.com",
                    "password": "long-enough",
                    "full_name": "Bob Again"
                })),
            ))
            .await
            .expect("register duplicate");
        let status = response.status();
        let body = test_support::read_json(response).await;
        assert_eq!(status, StatusCode::CONFLICT, "response: {body}");
        assert_eq!(body["code"], "CONFLICT");

        let response = ctx
            .app
            .oneshot(test_support::json_request(
                Method::POST,
                "/api/v1/auth/register",
                None,
                Some(json!({
                    "username": "carol",
                    "email": "carol@example.com",
                    "password": "short",
                    "full_name": "Carol"
                })),
            ))
            .await
            .expect("register short password");
        let status = response.status();
        let body = test_support::read_json(response).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "response: {body}");
        assert!(body["detail"].as_str().unwrap_or("").contains("Password must be at least"));
    }

    #[tokio::test]
    async fn login_rejects_wrong_password_and_inactive_users() {
        let ctx = test_support::setup_test_context().await;
        let user = test_support::insert_user(ctx.state.db(), "dave", "Dave", "dave-password").await;

        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::POST,
                "/api/v1/auth/login",
                None,
                Some(json!({ "username": "dave", "password": "wrong-password" })),
            ))
            .await
            .expect("login");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        test_support::deactivate_user(ctx.state.db(), &user.id).await;

        let response = ctx
            .app
            .oneshot(test_support::json_request(
                Method::POST,
                "/api/v1/auth/login",
                None,
                Some(json!({ "username": "dave", "password": "dave-password" })),
            ))
            .await
            .expect("login inactive");
        let status = response.status();
        let body = test_support::read_json(response).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "response: {body}");
        assert_eq!(body["detail"], "Inactive user");
    }

    #[tokio::test]
    async fn login_is_rate_limited_per_identity() {
        let ctx = test_support::setup_test_context().await;
        let limit = ctx.state.settings().rate_limit().login_limit;

        for _ in 0..limit {
            let response = ctx
                .app
                .clone()
                .oneshot(test_support::json_request(
                    Method::POST,
                    "/api/v1/auth/login",
                    None,
                    Some(json!({ "username": "nobody", "password": "whatever-pass" })),
                ))
                .await
                .expect("login");
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }

        let response = ctx
            .app
            .oneshot(test_support::json_request(
                Method::POST,
                "/api/v1/auth/login",
                None,
                Some(json!({ "username": "nobody", "password": "whatever-pass" })),
            ))
            .await
            .expect("login over limit");
        let status = response.status();
        let body = test_support::read_json(response).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS, "response: {body}");
        assert_eq!(body["code"], "RATE_LIMITED");
    }
}
