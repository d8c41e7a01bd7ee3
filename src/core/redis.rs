use std::sync::Arc;

use redis::aio::ConnectionManager;
use redis::{cmd, Client, ErrorKind, RedisError};
use tokio::sync::RwLock;

#[derive(Clone)]
pub(crate) struct RedisHandle {
    url: String,
    manager: Arc<RwLock<Option<ConnectionManager>>>,
}

#[derive(Debug, Clone)]
pub(crate) enum RedisHealth {
    Healthy,
    Disconnected,
    Unhealthy(String),
}

impl RedisHandle {
    pub(crate) fn new(url: String) -> Self {
        Self { url, manager: Arc::new(RwLock::new(None)) }
    }

    pub(crate) async fn connect(&self) -> Result<(), RedisError> {
        let client = Client::open(self.url.clone())?;
        let manager = ConnectionManager::new(client).await?;
        let mut guard = self.manager.write().await;
        *guard = Some(manager);
        Ok(())
    }

    pub(crate) async fn disconnect(&self) {
        let mut guard = self.manager.write().await;
        *guard = None;
    }

    pub(crate) async fn health(&self) -> RedisHealth {
        let Some(mut manager) = self.manager().await else {
            return RedisHealth::Disconnected;
        };

        match cmd("PING").query_async::<_, String>(&mut manager).await {
            Ok(_) => RedisHealth::Healthy,
            Err(err) => RedisHealth::Unhealthy(err.to_string()),
        }
    }

    /// Fixed-window counter. Allows everything while Redis is disconnected.
    pub(crate) async fn rate_limit(
        &self,
        key: &str,
        limit: u64,
        window_seconds: u64,
    ) -> Result<bool, RedisError> {
        let Some(mut manager) = self.manager().await else {
            return Ok(true);
        };

        let script = redis::Script::new(
            r#"
            local current = redis.call("INCR", KEYS[1])
            if current == 1 then
                redis.call("EXPIRE", KEYS[1], ARGV[1])
            end
            return current
        "#,
        );

        let current: i64 =
            script.key(key).arg(window_seconds as i64).invoke_async(&mut manager).await?;

        Ok(current <= limit as i64)
    }

    pub(crate) async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
    ) -> Result<(), RedisError> {
        let mut manager = self.connected().await?;
        cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_seconds.max(1))
            .query_async::<_, ()>(&mut manager)
            .await
    }

    /// Replaces the value at `key` only while it still equals `expected`. Returns whether the
    /// swap happened.
    pub(crate) async fn swap_if_equal(
        &self,
        key: &str,
        expected: &str,
        value: &str,
        ttl_seconds: u64,
    ) -> Result<bool, RedisError> {
        let mut manager = self.connected().await?;
        let script = redis::Script::new(
            r#"
            if redis.call("GET", KEYS[1]) == ARGV[1] then
                redis.call("SET", KEYS[1], ARGV[2], "EX", ARGV[3])
                return 1
            end
            return 0
        "#,
        );

        let swapped: i64 = script
            .key(key)
            .arg(expected)
            .arg(value)
            .arg(ttl_seconds.max(1) as i64)
            .invoke_async(&mut manager)
            .await?;
        Ok(swapped == 1)
    }

    pub(crate) async fn get(&self, key: &str) -> Result<Option<String>, RedisError> {
        let mut manager = self.connected().await?;
        cmd("GET").arg(key).query_async::<_, Option<String>>(&mut manager).await
    }

    pub(crate) async fn delete(&self, key: &str) -> Result<(), RedisError> {
        let mut manager = self.connected().await?;
        cmd("DEL").arg(key).query_async::<_, i64>(&mut manager).await.map(|_| ())
    }

    async fn manager(&self) -> Option<ConnectionManager> {
        self.manager.read().await.clone()
    }

    async fn connected(&self) -> Result<ConnectionManager, RedisError> {
        self.manager()
            .await
            .ok_or_else(|| RedisError::from((ErrorKind::IoError, "redis is not connected")))
    }
}

#[cfg(test)]
mod tests {
    use super::RedisHandle;
    use crate::core::config::Settings;
    use crate::test_support;
    use uuid::Uuid;

    #[tokio::test]
    async fn rate_limit_enforces_limit() {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();

        let settings = Settings::load().expect("settings");
        test_support::reset_redis(settings.redis().redis_url()).await.expect("redis reset");

        let redis = RedisHandle::new(settings.redis().redis_url());
        redis.connect().await.expect("redis connect");

        let key = format!("rate-limit:{}", Uuid::new_v4());
        let first = redis.rate_limit(&key, 1, 5).await.expect("rate limit");
        let second = redis.rate_limit(&key, 1, 5).await.expect("rate limit");

        assert!(first);
        assert!(!second);
    }

    #[tokio::test]
    async fn values_expire_and_can_be_deleted() {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();

        let settings = Settings::load().expect("settings");
        let redis = RedisHandle::new(settings.redis().redis_url());
        redis.connect().await.expect("redis connect");

        let key = format!("kv:{}", Uuid::new_v4());
        redis.set_with_ttl(&key, "payload", 30).await.expect("set");
        assert_eq!(redis.get(&key).await.expect("get").as_deref(), Some("payload"));

        redis.delete(&key).await.expect("delete");
        assert_eq!(redis.get(&key).await.expect("get"), None);
    }

    #[tokio::test]
    async fn swap_only_replaces_the_expected_value() {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();

        let settings = Settings::load().expect("settings");
        let redis = RedisHandle::new(settings.redis().redis_url());
        redis.connect().await.expect("redis connect");

        let key = format!("swap:{}", Uuid::new_v4());
        redis.set_with_ttl(&key, "first", 30).await.expect("set");

        assert!(!redis.swap_if_equal(&key, "stale", "second", 30).await.expect("swap"));
        assert_eq!(redis.get(&key).await.expect("get").as_deref(), Some("first"));

        assert!(redis.swap_if_equal(&key, "first", "second", 30).await.expect("swap"));
        assert_eq!(redis.get(&key).await.expect("get").as_deref(), Some("second"));

        let missing = format!("swap:{}", Uuid::new_v4());
        assert!(!redis.swap_if_equal(&missing, "first", "second", 30).await.expect("swap"));
        assert_eq!(redis.get(&missing).await.expect("get"), None);
    }

    #[tokio::test]
    async fn disconnected_handle_reports_errors_but_allows_rate_limit() {
        let redis = RedisHandle::new("redis://127.0.0.1:1/0".to_string());

        assert!(redis.rate_limit("rl:any", 1, 5).await.expect("rate limit"));
        assert!(redis.get("missing").await.is_err());
        assert!(redis.set_with_ttl("missing", "v", 5).await.is_err());
    }
}
