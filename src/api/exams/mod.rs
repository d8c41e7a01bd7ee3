mod attempts;
mod handlers;

use axum::{routing::get, routing::post, Router};

use crate::core::state::AppState;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(handlers::create_exam).get(handlers::list_exams))
        .route(
            "/:exam_id",
            get(handlers::get_exam).put(handlers::update_exam).delete(handlers::delete_exam),
        )
        .route("/:exam_id/assign", post(attempts::assign_exam))
        .route("/:exam_id/start", post(attempts::start_exam))
        .route("/:exam_id/submit", post(attempts::submit_exam))
        .route("/:exam_id/attempts/:user_id/reset", post(attempts::reset_attempt))
}
