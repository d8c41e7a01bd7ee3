use serde::{Deserialize, Serialize};

use crate::schemas::user::UserResponse;

#[derive(Debug, Serialize)]
pub(crate) struct TokenResponse {
    pub(crate) access_token: String,
    pub(crate) token_type: String,
    pub(crate) expires_in: i64,
    /// Absent when the token store could not record it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) refresh_token: Option<String>,
    pub(crate) user: UserResponse,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RefreshRequest {
    #[serde(alias = "refreshToken")]
    pub(crate) refresh_token: String,
}
