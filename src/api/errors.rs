use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::services::answer_key::QuestionError;
use crate::services::attempt_state::TransitionError;
use crate::services::exam_attempts::AttemptError;

pub(crate) const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ErrorBody {
    pub(crate) status: u16,
    pub(crate) code: &'static str,
    pub(crate) detail: String,
    pub(crate) request_id: Option<String>,
}

#[derive(Debug)]
pub(crate) enum ApiError {
    Unauthorized(&'static str),
    Forbidden(&'static str),
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    TooManyRequests(&'static str),
    ServiceUnavailable(String),
    Internal(String),
    /// Domain failure with its own machine-readable code.
    Coded { status: StatusCode, code: &'static str, detail: String },
}

impl ApiError {
    /// Log the underlying error with context and return an `Internal` variant.
    pub(crate) fn internal(err: impl std::fmt::Display, context: &str) -> Self {
        tracing::error!(error = %err, "{context}");
        Self::Internal(context.to_string())
    }

    pub(crate) fn coded(status: StatusCode, code: &'static str, detail: impl Into<String>) -> Self {
        Self::Coded { status, code, detail: detail.into() }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Coded { status, .. } => *status,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::TooManyRequests(_) => "RATE_LIMITED",
            Self::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Coded { code, .. } => code,
        }
    }
}

impl From<AttemptError> for ApiError {
    fn from(err: AttemptError) -> Self {
        match err {
            AttemptError::ExamNotFound => {
                Self::coded(StatusCode::NOT_FOUND, "EXAM_NOT_FOUND", "Exam not found")
            }
            AttemptError::NotAssigned => Self::coded(
                StatusCode::NOT_FOUND,
                "EXAM_NOT_ASSIGNED",
                "Exam is not assigned to this user",
            ),
            AttemptError::Transition(TransitionError::CannotStart) => Self::coded(
                StatusCode::FORBIDDEN,
                "EXAM_CANNOT_START",
                "Exam cannot be started",
            ),
            AttemptError::Transition(TransitionError::CannotSubmit) => Self::coded(
                StatusCode::FORBIDDEN,
                "EXAM_CANNOT_SUBMIT",
                "Exam cannot be submitted",
            ),
            AttemptError::Transition(TransitionError::AttemptsExhausted) => Self::coded(
                StatusCode::FORBIDDEN,
                "EXAM_ATTEMPTS_EXHAUSTED",
                "No attempts left for this exam",
            ),
            AttemptError::Validation(detail) => {
                Self::coded(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", detail)
            }
            AttemptError::Conflict(detail) => {
                Self::coded(StatusCode::CONFLICT, "ATTEMPT_CONFLICT", detail)
            }
            AttemptError::Persistence(err) => {
                Self::internal(err, "Failed to process exam attempt")
            }
        }
    }
}

impl From<QuestionError> for ApiError {
    fn from(err: QuestionError) -> Self {
        Self::coded(StatusCode::BAD_REQUEST, "INVALID_QUESTION_OPTIONS", err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let detail = match self {
            Self::Unauthorized(message)
            | Self::Forbidden(message)
            | Self::TooManyRequests(message) => message.to_string(),
            Self::ServiceUnavailable(message) => {
                tracing::error!(error = %message, "Service unavailable");
                message
            }
            Self::Internal(message) => {
                tracing::error!(error = %message, "Internal server error");
                message
            }
            Self::BadRequest(message) | Self::NotFound(message) | Self::Conflict(message) => {
                message
            }
            Self::Coded { detail, .. } => detail,
        };

        let body = ErrorBody { status: status.as_u16(), code, detail, request_id: None };
        let mut response = (status, Json(body.clone())).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response.extensions_mut().insert(body);
        response
    }
}

/// Re-renders error bodies with the request's correlation id.
pub(crate) async fn attach_request_id(request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(&REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    let mut response = next.run(request).await;
    let Some(request_id) = request_id else {
        return response;
    };

    if let Some(mut body) = response.extensions_mut().remove::<ErrorBody>() {
        body.request_id = Some(request_id);
        if let Ok(bytes) = serde_json::to_vec(&body) {
            response.headers_mut().remove(header::CONTENT_LENGTH);
            *response.body_mut() = Body::from(bytes);
        }
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_of(error: ApiError) -> (StatusCode, serde_json::Value) {
        let response = error.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        (status, serde_json::from_slice(&bytes).expect("json"))
    }

    #[tokio::test]
    async fn attempt_errors_carry_stable_codes() {
        let (status, body) = body_of(AttemptError::NotAssigned.into()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "EXAM_NOT_ASSIGNED");
        assert_eq!(body["status"], 404);
        assert!(body["request_id"].is_null());

        let (status, body) =
            body_of(AttemptError::Transition(TransitionError::AttemptsExhausted).into()).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "EXAM_ATTEMPTS_EXHAUSTED");
    }

    #[tokio::test]
    async fn internal_errors_hide_the_cause() {
        let (status, body) =
            body_of(AttemptError::Persistence(sqlx::Error::RowNotFound).into()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["code"], "INTERNAL_ERROR");
        assert_eq!(body["detail"], "Failed to process exam attempt");
    }

    #[test]
    fn unauthorized_sets_bearer_challenge() {
        let response = ApiError::Unauthorized("nope").into_response();
        assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Bearer");
    }
}
