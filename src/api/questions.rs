use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use uuid::Uuid;
use validator::Validate;

use crate::api::errors::ApiError;
use crate::api::guards::{CurrentAdmin, CurrentUser};
use crate::api::pagination::{normalize, PaginatedResponse};
use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::repositories;
use crate::repositories::questions::QuestionFields;
use crate::schemas::question::{QuestionListQuery, QuestionPayload, QuestionResponse};
use crate::services::answer_key::validate_options;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_questions).post(create_question))
        .route("/tags", get(list_tags))
        .route(
            "/:question_id",
            get(get_question).put(update_question).delete(delete_question),
        )
}

fn checked_fields<'a>(
    payload: &'a QuestionPayload,
    tags: &'a [String],
) -> Result<QuestionFields<'a>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;
    validate_options(payload.question_type, &payload.options)?;

    Ok(QuestionFields {
        title: payload.title.trim(),
        content: &payload.content,
        question_type: payload.question_type,
        difficulty: payload.difficulty,
        options: &payload.options,
        tags,
        points: payload.points,
        time_limit: payload.time_limit,
        explanation: payload.explanation.as_deref().filter(|text| !text.trim().is_empty()),
        is_active: payload.is_active,
    })
}

async fn create_question(
    CurrentAdmin(admin): CurrentAdmin,
    State(state): State<AppState>,
    Json(payload): Json<QuestionPayload>,
) -> Result<(StatusCode, Json<QuestionResponse>), ApiError> {
    let tags = payload.normalized_tags();
    let fields = checked_fields(&payload, &tags)?;

    let question = repositories::questions::create(
        state.db(),
        &Uuid::new_v4().to_string(),
        &admin.id,
        fields,
        primitive_now_utc(),
    )
    .await
    .map_err(|e| ApiError::internal(e, "Failed to create question"))?;

    tracing::info!(question_id = %question.id, admin_id = %admin.id, "Question created");

    Ok((StatusCode::CREATED, Json(QuestionResponse::from_db(question, true))))
}

async fn list_questions(
    Query(params): Query<QuestionListQuery>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<PaginatedResponse<QuestionResponse>>, ApiError> {
    let (skip, limit) = normalize(params.skip, params.limit);
    let is_admin = user.is_admin();

    let filters = repositories::questions::ListQuestions {
        difficulty: params.difficulty,
        question_type: params.question_type,
        tag: params.tag.filter(|tag| !tag.trim().is_empty()),
        search: params.search.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
        is_active: if is_admin { params.is_active } else { Some(true) },
        skip,
        limit,
    };

    let (questions, total_count) = repositories::questions::list(state.db(), &filters)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to list questions"))?;

    Ok(Json(PaginatedResponse {
        items: questions
            .into_iter()
            .map(|question| QuestionResponse::from_db(question, is_admin))
            .collect(),
        total_count,
        skip,
        limit,
    }))
}

async fn list_tags(
    CurrentUser(_user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<String>>, ApiError> {
    let tags = repositories::questions::list_tags(state.db())
        .await
        .map_err(|e| ApiError::internal(e, "Failed to list tags"))?;
    Ok(Json(tags))
}

async fn get_question(
    Path(question_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<QuestionResponse>, ApiError> {
    let question = repositories::questions::find_by_id(state.db(), &question_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch question"))?
        .filter(|question| question.is_active || user.is_admin())
        .ok_or_else(|| ApiError::NotFound("Question not found".to_string()))?;

    Ok(Json(QuestionResponse::from_db(question, user.is_admin())))
}

async fn update_question(
    Path(question_id): Path<String>,
    CurrentAdmin(admin): CurrentAdmin,
    State(state): State<AppState>,
    Json(payload): Json<QuestionPayload>,
) -> Result<Json<QuestionResponse>, ApiError> {
    let tags = payload.normalized_tags();
    let fields = checked_fields(&payload, &tags)?;

    let question = repositories::questions::update(
        state.db(),
        &question_id,
        fields,
        primitive_now_utc(),
    )
    .await
    .map_err(|e| ApiError::internal(e, "Failed to update question"))?
    .ok_or_else(|| ApiError::NotFound("Question not found".to_string()))?;

    tracing::info!(question_id = %question.id, admin_id = %admin.id, "Question updated");

    Ok(Json(QuestionResponse::from_db(question, true)))
}

async fn delete_question(
    Path(question_id): Path<String>,
    CurrentAdmin(admin): CurrentAdmin,
    State(state): State<AppState>,
) -> Result<StatusCode, ApiError> {
    let in_use = repositories::questions::is_used_by_live_exam(state.db(), &question_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to check question usage"))?;
    if in_use {
        return Err(ApiError::Conflict(
            "Question is used by a draft or active exam".to_string(),
        ));
    }

    let deleted = repositories::questions::soft_delete(state.db(), &question_id, primitive_now_utc())
        .await
        .map_err(|e| ApiError::internal(e, "Failed to delete question"))?;
    if !deleted {
        return Err(ApiError::NotFound("Question not found".to_string()));
    }

    tracing::info!(question_id = %question_id, admin_id = %admin.id, "Question deleted");

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;
    use tower::ServiceExt;

    use crate::test_support;

    fn question_body(title: &str) -> serde_json::Value {
        json!({
            "title": title,
            "content": "Pick the primes",
            "type": "multiple_choice",
            "difficulty": "easy",
            "options": [
                {"id": "a", "text": "2", "is_correct": true},
                {"id": "b", "text": "3", "is_correct": true},
                {"id": "c", "text": "4", "is_correct": false}
            ],
            "tags": ["math", "primes"],
            "points": 2,
            "explanation": "4 = 2 * 2"
        })
    }

    #[tokio::test]
    async fn admin_creates_question_and_user_sees_it_without_key() {
        let ctx = test_support::setup_test_context().await;
        let admin = test_support::insert_admin(ctx.state.db(), "admin", "Admin", "admin-pass").await;
        let user = test_support::insert_user(ctx.state.db(), "gina", "Gina", "gina-pass").await;
        let admin_token = test_support::bearer_token(&ctx.state, &admin.id);
        let user_token = test_support::bearer_token(&ctx.state, &user.id);

        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::POST,
                "/api/v1/questions",
                Some(&admin_token),
                Some(question_body("Primes")),
            ))
            .await
            .expect("create question");
        let status = response.status();
        let created = test_support::read_json(response).await;
        assert_eq!(status, StatusCode::CREATED, "response: {created}");
        assert_eq!(created["options"][0]["is_correct"], true);
        let question_id = created["id"].as_str().expect("id").to_string();

        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::GET,
                &format!("/api/v1/questions/{question_id}"),
                Some(&user_token),
                None,
            ))
            .await
            .expect("get question");
        let status = response.status();
        let fetched = test_support::read_json(response).await;
        assert_eq!(status, StatusCode::OK, "response: {fetched}");
        assert!(fetched["options"][0].get("is_correct").is_none());
        assert!(fetched.get("explanation").is_none());

        let response = ctx
            .app
            .oneshot(test_support::json_request(
                Method::GET,
                "/api/v1/questions/tags",
                Some(&user_token),
                None,
            ))
            .await
            .expect("list tags");
        let tags = test_support::read_json(response).await;
        assert_eq!(tags, json!(["math", "primes"]));
    }

    #[tokio::test]
    async fn create_rejects_question_without_correct_option() {
        let ctx = test_support::setup_test_context().await;
        let admin = test_support::insert_admin(ctx.state.db(), "admin", "Admin", "admin-pass").await;
        let token = test_support::bearer_token(&ctx.state, &admin.id);

        let response = ctx
            .app
            .oneshot(test_support::json_request(
                Method::POST,
                "/api/v1/questions",
                Some(&token),
                Some(json!({
                    "title": "Broken",
                    "content": "No answer",
                    "options": [{"id": "a", "text": "A"}, {"id": "b", "text": "B"}]
                })),
            ))
            .await
            .expect("create question");
        let status = response.status();
        let body = test_support::read_json(response).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "response: {body}");
        assert_eq!(body["code"], "INVALID_QUESTION_OPTIONS");
    }

    #[tokio::test]
    async fn list_filters_by_tag_and_difficulty() {
        let ctx = test_support::setup_test_context().await;
        let admin = test_support::insert_admin(ctx.state.db(), "admin", "Admin", "admin-pass").await;
        test_support::insert_question(ctx.state.db(), &admin.id, "Plain", &["a"]).await;
        let token = test_support::bearer_token(&ctx.state, &admin.id);

        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::POST,
                "/api/v1/questions",
                Some(&token),
                Some(question_body("Tagged")),
            ))
            .await
            .expect("create question");
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = ctx
            .app
            .oneshot(test_support::json_request(
                Method::GET,
                "/api/v1/questions?tag=math&difficulty=easy",
                Some(&token),
                None,
            ))
            .await
            .expect("list questions");
        let status = response.status();
        let body = test_support::read_json(response).await;
        assert_eq!(status, StatusCode::OK, "response: {body}");
        assert_eq!(body["total_count"], 1);
        assert_eq!(body["items"][0]["title"], "Tagged");
    }

    #[tokio::test]
    async fn delete_refused_while_used_by_live_exam() {
        let ctx = test_support::setup_test_context().await;
        let admin = test_support::insert_admin(ctx.state.db(), "admin", "Admin", "admin-pass").await;
        let question =
            test_support::insert_question(ctx.state.db(), &admin.id, "Used", &["a"]).await;
        let spare = test_support::insert_question(ctx.state.db(), &admin.id, "Spare", &["b"]).await;
        test_support::insert_exam(ctx.state.db(), &admin.id, 10, 60, &[(&question.id, 1)]).await;
        let token = test_support::bearer_token(&ctx.state, &admin.id);

        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::DELETE,
                &format!("/api/v1/questions/{}", question.id),
                Some(&token),
                None,
            ))
            .await
            .expect("delete used");
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::DELETE,
                &format!("/api/v1/questions/{}", spare.id),
                Some(&token),
                None,
            ))
            .await
            .expect("delete spare");
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = ctx
            .app
            .oneshot(test_support::json_request(
                Method::GET,
                &format!("/api/v1/questions/{}", spare.id),
                Some(&token),
                None,
            ))
            .await
            .expect("get deleted");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
