use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::redis::RedisHandle;

#[derive(Debug, Error)]
pub(crate) enum GuardError {
    #[error("session store error: {0}")]
    Store(String),
    #[error("malformed session record: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Key-value store with per-key expiry backing the exam timer.
#[async_trait]
pub(crate) trait SessionGuardStore: Send + Sync {
    async fn put(&self, key: &str, value: String, ttl_seconds: u64) -> Result<(), GuardError>;
    async fn get(&self, key: &str) -> Result<Option<String>, GuardError>;
    async fn delete(&self, key: &str) -> Result<(), GuardError>;
}

#[async_trait]
impl SessionGuardStore for RedisHandle {
    async fn put(&self, key: &str, value: String, ttl_seconds: u64) -> Result<(), GuardError> {
        self.set_with_ttl(key, &value, ttl_seconds)
            .await
            .map_err(|err| GuardError::Store(err.to_string()))
    }

    async fn get(&self, key: &str) -> Result<Option<String>, GuardError> {
        RedisHandle::get(self, key).await.map_err(|err| GuardError::Store(err.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), GuardError> {
        RedisHandle::delete(self, key).await.map_err(|err| GuardError::Store(err.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct SessionRecord {
    pub(crate) started_at: i64,
    pub(crate) duration: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GuardVerdict {
    OnTime { elapsed: i64 },
    Late { elapsed: i64, allowed: i64 },
    Missing,
    Unavailable,
}

impl GuardVerdict {
    pub(crate) fn is_late(self) -> bool {
        matches!(self, Self::Late { .. })
    }
}

/// Extra lifetime on a session record so a late submission still finds it.
const LATE_GRACE_SECONDS: i64 = 300;

/// Server-side record of when an attempt started, checked again at submission.
///
/// Every failure here is reported to the caller as a verdict or error and never blocks
/// the attempt itself.
#[derive(Clone)]
pub(crate) struct SessionGuard {
    store: Arc<dyn SessionGuardStore>,
}

impl SessionGuard {
    pub(crate) fn new(store: Arc<dyn SessionGuardStore>) -> Self {
        Self { store }
    }

    pub(crate) fn key(user_id: &str, exam_id: &str) -> String {
        format!("exam_session:{user_id}:{exam_id}")
    }

    pub(crate) async fn open(
        &self,
        user_id: &str,
        exam_id: &str,
        started_at: i64,
        duration_seconds: i64,
    ) -> Result<(), GuardError> {
        let record = SessionRecord { started_at, duration: duration_seconds };
        let payload = serde_json::to_string(&record)?;
        let ttl = duration_seconds.max(1).saturating_add(LATE_GRACE_SECONDS) as u64;
        self.store.put(&Self::key(user_id, exam_id), payload, ttl).await
    }

    pub(crate) async fn check(&self, user_id: &str, exam_id: &str, now: i64) -> GuardVerdict {
        let key = Self::key(user_id, exam_id);
        let raw = match self.store.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return GuardVerdict::Missing,
            Err(err) => {
                tracing::warn!(error = %err, user_id, exam_id, "Session guard lookup failed");
                return GuardVerdict::Unavailable;
            }
        };

        let record = match serde_json::from_str::<SessionRecord>(&raw) {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(error = %err, user_id, exam_id, "Session guard record unreadable");
                return GuardVerdict::Unavailable;
            }
        };

        let elapsed = now - record.started_at;
        if elapsed > record.duration {
            GuardVerdict::Late { elapsed, allowed: record.duration }
        } else {
            GuardVerdict::OnTime { elapsed }
        }
    }

    pub(crate) async fn close(&self, user_id: &str, exam_id: &str) -> Result<(), GuardError> {
        self.store.delete(&Self::key(user_id, exam_id)).await
    }
}
