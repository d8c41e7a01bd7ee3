use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};

use crate::api::errors::ApiError;
use crate::api::guards::{CurrentAdmin, CurrentUser};
use crate::api::pagination::{normalize, PaginatedResponse};
use crate::core::state::AppState;
use crate::repositories;
use crate::repositories::results::ResultRow;
use crate::schemas::result::{ResultListQuery, ResultResponse, StatisticsResponse};
use crate::services::answer_key::AnswerKey;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_results))
        .route("/statistics", get(statistics))
        .route("/:result_id", get(get_result))
}

async fn list_results(
    Query(params): Query<ResultListQuery>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<PaginatedResponse<ResultResponse>>, ApiError> {
    let (skip, limit) = normalize(params.skip, params.limit);
    let user_filter = if user.is_admin() { None } else { Some(user.id.clone()) };

    let (rows, total_count) = repositories::results::list(
        state.db(),
        &repositories::results::ListResults {
            user_id: user_filter,
            exam_id: params.exam_id,
            passed: params.passed,
            skip,
            limit,
        },
    )
    .await
    .map_err(|e| ApiError::internal(e, "Failed to list results"))?;

    Ok(Json(PaginatedResponse {
        items: rows.into_iter().map(into_response).collect(),
        total_count,
        skip,
        limit,
    }))
}

async fn get_result(
    Path(result_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<ResultResponse>, ApiError> {
    let row = repositories::results::find_by_id(state.db(), &result_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch result"))?
        .ok_or_else(|| ApiError::NotFound("Result not found".to_string()))?;

    if !user.is_admin() && row.result.user_id != user.id {
        return Err(ApiError::Forbidden("Not allowed to view this result"));
    }

    if !user.is_admin() {
        return Ok(Json(into_response(row)));
    }

    let question_ids: Vec<String> =
        row.result.answers.0.iter().map(|answer| answer.question_id.clone()).collect();
    let keys: HashMap<String, AnswerKey> =
        repositories::questions::find_by_ids(state.db(), &question_ids)
            .await
            .map_err(|e| ApiError::internal(e, "Failed to load answer keys"))?
            .into_iter()
            .map(|question| {
                let key = question.answer_key();
                (question.id, key)
            })
            .collect();

    Ok(Json(into_response(row).reveal_keys(&keys)))
}

async fn statistics(
    CurrentAdmin(_admin): CurrentAdmin,
    State(state): State<AppState>,
) -> Result<Json<StatisticsResponse>, ApiError> {
    let db = state.db();
    let (overall, exams, users, questions) = tokio::try_join!(
        repositories::statistics::overall_statistics(db),
        repositories::statistics::exam_statistics(db),
        repositories::statistics::user_statistics(db),
        repositories::statistics::question_statistics(db),
    )
    .map_err(|e| ApiError::internal(e, "Failed to compute statistics"))?;

    Ok(Json(StatisticsResponse { overall, exams, users, questions }))
}

fn into_response(row: ResultRow) -> ResultResponse {
    ResultResponse::from_db(row.result).with_names(row.exam_title, row.username)
}
