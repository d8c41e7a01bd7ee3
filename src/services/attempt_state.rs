use thiserror::Error;
use time::PrimitiveDateTime;

use crate::db::models::UserExam;
use crate::db::types::AttemptStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AttemptEvent {
    Start,
    Submit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub(crate) enum TransitionError {
    #[error("exam cannot be started")]
    CannotStart,
    #[error("exam cannot be submitted")]
    CannotSubmit,
    #[error("no attempts left for this exam")]
    AttemptsExhausted,
}

/// Lifecycle of one user's assignment to one exam.
///
/// `Expired` is never stored: an attempt whose `expires_at` has passed refuses every
/// transition whatever its status says.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AttemptState {
    pub(crate) status: AttemptStatus,
    pub(crate) started_at: Option<PrimitiveDateTime>,
    pub(crate) completed_at: Option<PrimitiveDateTime>,
    pub(crate) expires_at: Option<PrimitiveDateTime>,
    pub(crate) attempt_count: i32,
    pub(crate) max_attempts: i32,
}

impl AttemptState {
    pub(crate) fn is_expired(&self, now: PrimitiveDateTime) -> bool {
        self.expires_at.is_some_and(|deadline| now > deadline)
    }

    pub(crate) fn can_start(&self, now: PrimitiveDateTime) -> bool {
        self.check(AttemptEvent::Start, now).is_ok()
    }

    pub(crate) fn can_submit(&self, now: PrimitiveDateTime) -> bool {
        self.check(AttemptEvent::Submit, now).is_ok()
    }

    pub(crate) fn check(
        &self,
        event: AttemptEvent,
        now: PrimitiveDateTime,
    ) -> Result<(), TransitionError> {
        match event {
            AttemptEvent::Start => {
                if self.status != AttemptStatus::Assigned || self.is_expired(now) {
                    return Err(TransitionError::CannotStart);
                }
                if self.attempt_count >= self.max_attempts {
                    return Err(TransitionError::AttemptsExhausted);
                }
                Ok(())
            }
            AttemptEvent::Submit => {
                if self.status != AttemptStatus::Started || self.is_expired(now) {
                    return Err(TransitionError::CannotSubmit);
                }
                Ok(())
            }
        }
    }

    /// Applies `event` in place. A refused transition leaves the state untouched.
    pub(crate) fn apply(
        &mut self,
        event: AttemptEvent,
        now: PrimitiveDateTime,
    ) -> Result<(), TransitionError> {
        self.check(event, now)?;
        match event {
            AttemptEvent::Start => {
                self.status = AttemptStatus::Started;
                self.started_at = Some(now);
                self.attempt_count += 1;
            }
            AttemptEvent::Submit => {
                self.status = AttemptStatus::Completed;
                self.completed_at = Some(now);
            }
        }
        Ok(())
    }

    /// Seconds remaining on the exam timer, only while the attempt is running.
    pub(crate) fn time_left(&self, duration_seconds: i64, now: PrimitiveDateTime) -> Option<i64> {
        if self.status != AttemptStatus::Started {
            return None;
        }
        let started_at = self.started_at?;
        let elapsed = (now - started_at).whole_seconds();
        Some((duration_seconds - elapsed).max(0))
    }
}

impl UserExam {
    pub(crate) fn state(&self) -> AttemptState {
        AttemptState {
            status: self.status,
            started_at: self.started_at,
            completed_at: self.completed_at,
            expires_at: self.expires_at,
            attempt_count: self.attempt_count,
            max_attempts: self.max_attempts,
        }
    }
}
