use std::collections::{HashMap, HashSet};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use sqlx::{Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;
use validator::Validate;

use crate::api::errors::ApiError;
use crate::api::guards::{CurrentAdmin, CurrentUser};
use crate::api::pagination::{normalize, PaginatedResponse};
use crate::core::state::AppState;
use crate::core::time::{primitive_now_utc, to_primitive_utc};
use crate::db::models::{Exam, User};
use crate::db::types::AttemptStatus;
use crate::repositories;
use crate::repositories::exams::{ExamFields, ExamQuestionInput};
use crate::schemas::attempt::AttemptResponse;
use crate::schemas::exam::{ExamCreate, ExamListQuery, ExamQuestionItem, ExamResponse, ExamUpdate};
use crate::services::exam_attempts::AttemptError;

pub(crate) async fn create_exam(
    CurrentAdmin(admin): CurrentAdmin,
    State(state): State<AppState>,
    Json(payload): Json<ExamCreate>,
) -> Result<(StatusCode, Json<ExamResponse>), ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;
    check_window(payload.start_time, payload.end_time)?;
    let items = question_inputs(&payload.questions)?;

    let mut tx = state
        .db()
        .begin()
        .await
        .map_err(|e| ApiError::internal(e, "Failed to start transaction"))?;
    ensure_questions_active(&mut tx, &items).await?;

    let now = primitive_now_utc();
    let exam = repositories::exams::create(
        &mut tx,
        &Uuid::new_v4().to_string(),
        &admin.id,
        ExamFields {
            title: payload.title.trim(),
            description: payload.description.as_deref(),
            duration_minutes: payload.duration_minutes,
            pass_score: payload.pass_score,
            status: payload.status,
            start_time: payload.start_time.map(to_primitive_utc),
            end_time: payload.end_time.map(to_primitive_utc),
            is_active: true,
        },
        now,
    )
    .await
    .map_err(|e| ApiError::internal(e, "Failed to create exam"))?;

    repositories::exams::replace_questions(&mut tx, &exam.id, &items, now)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to attach exam questions"))?;
    let entries = repositories::exams::list_questions(&mut *tx, &exam.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load exam questions"))?;

    tx.commit().await.map_err(|e| ApiError::internal(e, "Failed to commit exam"))?;

    tracing::info!(
        exam_id = %exam.id,
        admin_id = %admin.id,
        questions = entries.len(),
        "Exam created"
    );

    Ok((StatusCode::CREATED, Json(ExamResponse::with_questions(exam, entries, true))))
}

pub(crate) async fn list_exams(
    Query(params): Query<ExamListQuery>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<PaginatedResponse<ExamResponse>>, ApiError> {
    let (skip, limit) = normalize(params.skip, params.limit);

    let (exams, total_count) = if user.is_admin() {
        repositories::exams::list(
            state.db(),
            &repositories::exams::ListExams { status: params.status, skip, limit },
        )
        .await
    } else {
        repositories::exams::list_assigned(state.db(), &user.id, skip, limit).await
    }
    .map_err(|e| ApiError::internal(e, "Failed to list exams"))?;

    let exam_ids: Vec<String> = exams.iter().map(|exam| exam.id.clone()).collect();
    let totals: HashMap<String, (i64, i64)> = repositories::exams::totals_for(state.db(), &exam_ids)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load exam totals"))?
        .into_iter()
        .map(|row| (row.exam_id, (row.question_count, row.total_points)))
        .collect();

    let mut attempts = if user.is_admin() {
        HashMap::new()
    } else {
        repositories::attempts::list_for_user(state.db(), &user.id, &exam_ids)
            .await
            .map_err(|e| ApiError::internal(e, "Failed to load attempts"))?
            .into_iter()
            .map(|attempt| (attempt.exam_id.clone(), attempt))
            .collect()
    };

    let now = primitive_now_utc();
    let items = exams
        .into_iter()
        .map(|exam| {
            let (question_count, total_points) = totals.get(&exam.id).copied().unwrap_or((0, 0));
            let duration = exam.duration_seconds();
            let attempt = attempts.remove(&exam.id);
            let mut response = ExamResponse::from_db(exam, question_count, total_points);
            response.attempt = attempt.map(|attempt| {
                let time_left = attempt.state().time_left(duration, now);
                AttemptResponse::from_db(attempt, time_left)
            });
            response
        })
        .collect();

    Ok(Json(PaginatedResponse { items, total_count, skip, limit }))
}

pub(crate) async fn get_exam(
    Path(exam_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<ExamResponse>, ApiError> {
    let exam = load_exam(&state, &exam_id).await?;

    if user.is_admin() {
        let entries = repositories::exams::list_questions(state.db(), &exam.id)
            .await
            .map_err(|e| ApiError::internal(e, "Failed to load exam questions"))?;
        return Ok(Json(ExamResponse::with_questions(exam, entries, true)));
    }

    user_view(&state, exam, &user).await.map(Json)
}

async fn user_view(state: &AppState, exam: Exam, user: &User) -> Result<ExamResponse, ApiError> {
    let snapshot = match state.attempts().snapshot(&exam, &user.id).await {
        Ok(snapshot) => snapshot,
        Err(AttemptError::NotAssigned) => {
            return Err(ApiError::coded(
                StatusCode::FORBIDDEN,
                "EXAM_NOT_ASSIGNED",
                "Exam is not assigned to this user",
            ));
        }
        Err(err) => return Err(err.into()),
    };

    let entries = repositories::exams::list_questions(state.db(), &exam.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load exam questions"))?;

    let in_progress = snapshot.attempt.status == AttemptStatus::Started;
    let mut response = if in_progress {
        ExamResponse::with_questions(exam, entries, false)
    } else {
        let total_points = entries.iter().map(|entry| i64::from(entry.exam_points)).sum();
        ExamResponse::from_db(exam, entries.len() as i64, total_points)
    };
    response.attempt = Some(AttemptResponse::from_db(snapshot.attempt, snapshot.time_left));
    Ok(response)
}

pub(crate) async fn update_exam(
    Path(exam_id): Path<String>,
    CurrentAdmin(admin): CurrentAdmin,
    State(state): State<AppState>,
    Json(payload): Json<ExamUpdate>,
) -> Result<Json<ExamResponse>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let mut tx = state
        .db()
        .begin()
        .await
        .map_err(|e| ApiError::internal(e, "Failed to start transaction"))?;

    let exam = repositories::exams::find_by_id(&mut *tx, &exam_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch exam"))?
        .ok_or_else(|| ApiError::NotFound("Exam not found".to_string()))?;

    if !exam.status.is_editable() && !is_status_only(&payload) {
        return Err(ApiError::coded(
            StatusCode::CONFLICT,
            "EXAM_NOT_EDITABLE",
            "Only draft or active exams can be edited",
        ));
    }

    let reshapes_attempts = payload.questions.is_some()
        || payload.duration_minutes.is_some_and(|minutes| minutes != exam.duration_minutes);
    if reshapes_attempts {
        let in_progress = repositories::attempts::any_in_progress(&mut *tx, &exam.id)
            .await
            .map_err(|e| ApiError::internal(e, "Failed to check running attempts"))?;
        if in_progress {
            return Err(ApiError::coded(
                StatusCode::CONFLICT,
                "EXAM_IN_PROGRESS",
                "Questions and duration cannot change while an attempt is running",
            ));
        }
    }

    let start_time = payload.start_time.map(to_primitive_utc).or(exam.start_time);
    let end_time = payload.end_time.map(to_primitive_utc).or(exam.end_time);
    if let (Some(start), Some(end)) = (start_time, end_time) {
        if end <= start {
            return Err(ApiError::BadRequest("end_time must be after start_time".to_string()));
        }
    }

    let now = primitive_now_utc();
    let title = payload.title.as_deref().map(str::trim).unwrap_or(&exam.title);
    let description = payload.description.as_deref().or(exam.description.as_deref());
    let updated = repositories::exams::update(
        &mut tx,
        &exam.id,
        ExamFields {
            title,
            description,
            duration_minutes: payload.duration_minutes.unwrap_or(exam.duration_minutes),
            pass_score: payload.pass_score.unwrap_or(exam.pass_score),
            status: payload.status.unwrap_or(exam.status),
            start_time,
            end_time,
            is_active: payload.is_active.unwrap_or(exam.is_active),
        },
        now,
    )
    .await
    .map_err(|e| ApiError::internal(e, "Failed to update exam"))?
    .ok_or_else(|| ApiError::NotFound("Exam not found".to_string()))?;

    if let Some(questions) = payload.questions.as_ref() {
        let has_results = repositories::exams::has_results(&mut *tx, &exam.id)
            .await
            .map_err(|e| ApiError::internal(e, "Failed to check exam results"))?;
        if has_results {
            return Err(ApiError::coded(
                StatusCode::CONFLICT,
                "EXAM_HAS_RESULTS",
                "Questions cannot be changed after results were recorded",
            ));
        }

        let items = question_inputs(questions)?;
        ensure_questions_active(&mut tx, &items).await?;
        repositories::exams::replace_questions(&mut tx, &exam.id, &items, now)
            .await
            .map_err(|e| ApiError::internal(e, "Failed to replace exam questions"))?;
    }

    let entries = repositories::exams::list_questions(&mut *tx, &exam.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load exam questions"))?;

    tx.commit().await.map_err(|e| ApiError::internal(e, "Failed to commit exam update"))?;

    tracing::info!(exam_id = %updated.id, admin_id = %admin.id, "Exam updated");

    Ok(Json(ExamResponse::with_questions(updated, entries, true)))
}

pub(crate) async fn delete_exam(
    Path(exam_id): Path<String>,
    CurrentAdmin(admin): CurrentAdmin,
    State(state): State<AppState>,
) -> Result<StatusCode, ApiError> {
    let exam = load_exam(&state, &exam_id).await?;

    let has_results = repositories::exams::has_results(state.db(), &exam.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to check exam results"))?;
    if has_results {
        return Err(ApiError::coded(
            StatusCode::CONFLICT,
            "EXAM_HAS_RESULTS",
            "Exams with recorded results cannot be deleted",
        ));
    }

    let deleted = repositories::exams::soft_delete(state.db(), &exam.id, primitive_now_utc())
        .await
        .map_err(|e| ApiError::internal(e, "Failed to delete exam"))?;
    if !deleted {
        return Err(ApiError::NotFound("Exam not found".to_string()));
    }

    tracing::info!(exam_id = %exam.id, admin_id = %admin.id, "Exam deleted");

    Ok(StatusCode::NO_CONTENT)
}

async fn load_exam(state: &AppState, exam_id: &str) -> Result<Exam, ApiError> {
    repositories::exams::find_by_id(state.db(), exam_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch exam"))?
        .ok_or_else(|| ApiError::coded(StatusCode::NOT_FOUND, "EXAM_NOT_FOUND", "Exam not found"))
}

fn check_window(
    start: Option<OffsetDateTime>,
    end: Option<OffsetDateTime>,
) -> Result<(), ApiError> {
    match (start, end) {
        (Some(start), Some(end)) if end <= start => {
            Err(ApiError::BadRequest("end_time must be after start_time".to_string()))
        }
        _ => Ok(()),
    }
}

fn is_status_only(payload: &ExamUpdate) -> bool {
    payload.title.is_none()
        && payload.description.is_none()
        && payload.duration_minutes.is_none()
        && payload.pass_score.is_none()
        && payload.start_time.is_none()
        && payload.end_time.is_none()
        && payload.is_active.is_none()
        && payload.questions.is_none()
}

/// Orders items by their requested position and rejects repeated questions.
fn question_inputs(items: &[ExamQuestionItem]) -> Result<Vec<ExamQuestionInput>, ApiError> {
    let mut seen = HashSet::new();
    let mut inputs = Vec::with_capacity(items.len());
    for item in items {
        let question_id = item.question_id.trim();
        if !seen.insert(question_id) {
            return Err(ApiError::BadRequest(format!(
                "Question {question_id} is listed more than once"
            )));
        }
        inputs.push(ExamQuestionInput {
            question_id: question_id.to_string(),
            points: item.points,
            position: item.order,
        });
    }
    inputs.sort_by_key(|input| input.position);
    Ok(inputs)
}

async fn ensure_questions_active(
    tx: &mut Transaction<'_, Postgres>,
    items: &[ExamQuestionInput],
) -> Result<(), ApiError> {
    if items.is_empty() {
        return Ok(());
    }

    let ids: Vec<String> = items.iter().map(|item| item.question_id.clone()).collect();
    let active = repositories::questions::count_active_by_ids(&mut **tx, &ids)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to check questions"))?;
    if active != ids.len() as i64 {
        return Err(ApiError::BadRequest(
            "Some questions do not exist or are inactive".to_string(),
        ));
    }
    Ok(())
}
