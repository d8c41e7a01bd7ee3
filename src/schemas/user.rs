use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core::time::format_primitive;
use crate::db::models::User;
use crate::db::types::UserRole;

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct UserCreate {
    #[validate(length(min = 3, max = 50, message = "username must be 3-50 characters"))]
    pub(crate) username: String,
    #[validate(email(message = "email is not valid"))]
    pub(crate) email: String,
    pub(crate) password: String,
    #[serde(alias = "fullName")]
    #[validate(length(min = 1, max = 100, message = "full_name must be 1-100 characters"))]
    pub(crate) full_name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UserLogin {
    /// Username or email.
    pub(crate) username: String,
    pub(crate) password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct AdminUserUpdate {
    #[serde(default)]
    #[serde(alias = "fullName")]
    #[validate(length(min = 1, max = 100, message = "full_name must be 1-100 characters"))]
    pub(crate) full_name: Option<String>,
    #[serde(default)]
    pub(crate) role: Option<UserRole>,
    #[serde(default)]
    #[serde(alias = "isActive")]
    pub(crate) is_active: Option<bool>,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct ProfileUpdate {
    #[serde(default)]
    #[serde(alias = "fullName")]
    #[validate(length(min = 1, max = 100, message = "full_name must be 1-100 characters"))]
    pub(crate) full_name: Option<String>,
    #[serde(default)]
    #[validate(email(message = "email is not valid"))]
    pub(crate) email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PasswordChange {
    #[serde(alias = "currentPassword")]
    pub(crate) current_password: String,
    #[serde(alias = "newPassword")]
    pub(crate) new_password: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct UserResponse {
    pub(crate) id: String,
    pub(crate) username: String,
    pub(crate) email: String,
    pub(crate) full_name: String,
    pub(crate) role: UserRole,
    pub(crate) is_active: bool,
    pub(crate) created_at: String,
    pub(crate) updated_at: String,
}

impl UserResponse {
    pub(crate) fn from_db(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            full_name: user.full_name,
            role: user.role,
            is_active: user.is_active,
            created_at: format_primitive(user.created_at),
            updated_at: format_primitive(user.updated_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn user_create_rejects_bad_email() {
        let payload: UserCreate = serde_json::from_value(json!({
            "username": "alice",
            "email": "not-an-email",
            "password": "long-enough",
            "full_name": "Alice"
        }))
        .expect("payload");

        let errors = payload.validate().expect_err("invalid email");
        assert!(errors.to_string().contains("email"));
    }

    #[test]
    fn profile_update_checks_only_present_fields() {
        let empty: ProfileUpdate = serde_json::from_value(json!({})).expect("payload");
        assert!(empty.validate().is_ok());

        let bad: ProfileUpdate =
            serde_json::from_value(json!({ "email": "nope", "fullName": "" })).expect("payload");
        let errors = bad.validate().expect_err("invalid profile");
        assert!(errors.to_string().contains("email"));
        assert!(errors.to_string().contains("full_name"));
    }

    #[test]
    fn user_create_accepts_camel_case_name() {
        let payload: UserCreate = serde_json::from_value(json!({
            "username": "alice",
            "email": "alice@example.com",
            "password": "long-enough",
            "fullName": "Alice Liddell"
        }))
        .expect("payload");

        assert!(payload.validate().is_ok());
        assert_eq!(payload.full_name, "Alice Liddell");
    }
}
