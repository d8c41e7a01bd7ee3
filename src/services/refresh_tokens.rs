//! Server-side record of the single live refresh token per user.
//!
//! Redis holds `refresh_token:{user_id}` with the token itself as the value. Issuing a new token
//! overwrites the previous one, so logging in elsewhere invalidates older refresh tokens.

use redis::RedisError;

use crate::core::redis::RedisHandle;

pub(crate) fn key(user_id: &str) -> String {
    format!("refresh_token:{user_id}")
}

pub(crate) async fn remember(
    redis: &RedisHandle,
    user_id: &str,
    token: &str,
    ttl_seconds: u64,
) -> Result<(), RedisError> {
    redis.set_with_ttl(&key(user_id), token, ttl_seconds).await
}

/// Atomically replaces `presented` with `replacement`. `false` means `presented` was not the
/// live token (already rotated, revoked or expired).
pub(crate) async fn rotate(
    redis: &RedisHandle,
    user_id: &str,
    presented: &str,
    replacement: &str,
    ttl_seconds: u64,
) -> Result<bool, RedisError> {
    redis.swap_if_equal(&key(user_id), presented, replacement, ttl_seconds).await
}

pub(crate) async fn revoke(redis: &RedisHandle, user_id: &str) -> Result<(), RedisError> {
    redis.delete(&key(user_id)).await
}
