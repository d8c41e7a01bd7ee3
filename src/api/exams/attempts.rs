use axum::{
    extract::{Path, State},
    Json,
};
use validator::Validate;

use crate::api::errors::ApiError;
use crate::api::guards::{CurrentAdmin, CurrentUser};
use crate::core::state::AppState;
use crate::core::time::to_primitive_utc;
use crate::schemas::attempt::{
    AssignResponse, AttemptResponse, ExamAssign, ExamSubmit, StartResponse, SubmitResponse,
};
use crate::schemas::exam::ExamQuestionResponse;
use crate::schemas::result::ResultResponse;
use crate::services::exam_attempts::AssignRequest;

pub(crate) async fn assign_exam(
    Path(exam_id): Path<String>,
    CurrentAdmin(admin): CurrentAdmin,
    State(state): State<AppState>,
    Json(payload): Json<ExamAssign>,
) -> Result<Json<AssignResponse>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let reports = state
        .attempts()
        .assign(
            &exam_id,
            AssignRequest {
                user_ids: payload.user_ids,
                expires_at: payload.expires_at.map(to_primitive_utc),
                max_attempts: payload.max_attempts,
            },
        )
        .await?;

    tracing::debug!(
        exam_id = %exam_id,
        admin_id = %admin.id,
        users = reports.len(),
        "Assign request handled"
    );

    Ok(Json(AssignResponse { exam_id, results: reports.into_iter().map(Into::into).collect() }))
}

pub(crate) async fn start_exam(
    Path(exam_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<StartResponse>, ApiError> {
    let started = state.attempts().start(&exam_id, &user.id).await?;

    Ok(Json(StartResponse {
        exam_id: started.exam.id,
        attempt: AttemptResponse::from_db(started.attempt, Some(started.time_left)),
        questions: started
            .questions
            .into_iter()
            .map(|entry| ExamQuestionResponse::from_entry(entry, false))
            .collect(),
        time_left: started.time_left,
    }))
}

pub(crate) async fn submit_exam(
    Path(exam_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Json(payload): Json<ExamSubmit>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let limits = state.settings().rate_limit();
    let allowed = state
        .redis()
        .rate_limit(&format!("rl:submit:{}", user.id), limits.submit_limit, limits.window_seconds)
        .await
        .unwrap_or(true);
    if !allowed {
        return Err(ApiError::TooManyRequests("Too many submissions, try again later"));
    }

    let result = state.attempts().submit(&exam_id, &user.id, &payload.answers).await?;

    Ok(Json(SubmitResponse { result: ResultResponse::from_db(result) }))
}

pub(crate) async fn reset_attempt(
    Path((exam_id, user_id)): Path<(String, String)>,
    CurrentAdmin(admin): CurrentAdmin,
    State(state): State<AppState>,
) -> Result<Json<AttemptResponse>, ApiError> {
    let attempt = state.attempts().reset(&exam_id, &user_id).await?;

    tracing::info!(
        exam_id = %exam_id,
        user_id = %user_id,
        admin_id = %admin.id,
        "Attempt reset by admin"
    );

    Ok(Json(AttemptResponse::from_db(attempt, None)))
}
