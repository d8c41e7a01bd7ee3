pub(crate) mod answer_key;
pub(crate) mod attempt_state;
pub(crate) mod exam_attempts;
pub(crate) mod grading;
pub(crate) mod refresh_tokens;
pub(crate) mod session_guard;
