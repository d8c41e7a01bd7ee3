use std::sync::Arc;

use sqlx::PgPool;

use crate::core::security::{SecurityError, TokenService};
use crate::core::{config::Settings, redis::RedisHandle};
use crate::services::exam_attempts::ExamAttemptService;
use crate::services::session_guard::{SessionGuard, SessionGuardStore};

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    db: PgPool,
    redis: RedisHandle,
    tokens: TokenService,
    attempts: ExamAttemptService,
}

impl AppState {
    /// Builds the state with the Redis handle doubling as the exam session store.
    pub(crate) fn new(
        settings: Settings,
        db: PgPool,
        redis: RedisHandle,
    ) -> Result<Self, SecurityError> {
        let store: Arc<dyn SessionGuardStore> = Arc::new(redis.clone());
        Self::with_session_store(settings, db, redis, store)
    }

    pub(crate) fn with_session_store(
        settings: Settings,
        db: PgPool,
        redis: RedisHandle,
        store: Arc<dyn SessionGuardStore>,
    ) -> Result<Self, SecurityError> {
        let tokens = TokenService::from_settings(&settings)?;
        let attempts = ExamAttemptService::new(db.clone(), SessionGuard::new(store));
        Ok(Self { inner: Arc::new(InnerState { settings, db, redis, tokens, attempts }) })
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn db(&self) -> &PgPool {
        &self.inner.db
    }

    pub(crate) fn redis(&self) -> &RedisHandle {
        &self.inner.redis
    }

    pub(crate) fn tokens(&self) -> &TokenService {
        &self.inner.tokens
    }

    pub(crate) fn attempts(&self) -> &ExamAttemptService {
        &self.inner.attempts
    }
}
