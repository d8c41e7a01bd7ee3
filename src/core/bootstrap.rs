use uuid::Uuid;

use crate::core::security;
use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::db::types::UserRole;
use crate::repositories;

/// Makes sure the configured first superuser exists, is active and holds the admin role.
pub(crate) async fn ensure_superuser(state: &AppState) -> anyhow::Result<()> {
    let admin = state.settings().admin();
    if admin.first_superuser_password.is_empty() {
        tracing::warn!("FIRST_SUPERUSER_PASSWORD not configured; skipping superuser creation");
        return Ok(());
    }

    let username = admin.first_superuser_username.as_str();
    let now = primitive_now_utc();

    if let Some(user) = repositories::users::find_by_username(state.db(), username).await? {
        let password_matches =
            security::verify_password(&admin.first_superuser_password, &user.hashed_password)
                .unwrap_or(false);

        if password_matches && user.is_admin() && user.is_active && user.deleted_at.is_none() {
            tracing::info!(username, "Default superuser already up to date");
            return Ok(());
        }

        if user.deleted_at.is_some() {
            repositories::users::restore(state.db(), &user.id).await?;
        }

        let hashed_password = if password_matches {
            None
        } else {
            Some(security::hash_password(&admin.first_superuser_password)?)
        };

        repositories::users::update(
            state.db(),
            &user.id,
            repositories::users::UpdateUser {
                full_name: None,
                email: None,
                role: Some(UserRole::Admin),
                is_active: Some(true),
                hashed_password,
                updated_at: now,
            },
        )
        .await?;

        tracing::info!(username, "Updated default superuser");
        return Ok(());
    }

    let hashed_password = security::hash_password(&admin.first_superuser_password)?;
    repositories::users::create(
        state.db(),
        repositories::users::CreateUser {
            id: &Uuid::new_v4().to_string(),
            username,
            email: &admin.first_superuser_email,
            hashed_password,
            full_name: "Administrator",
            role: UserRole::Admin,
            is_active: true,
            created_at: now,
            updated_at: now,
        },
    )
    .await?;

    tracing::info!(username, "Created default superuser");
    Ok(())
}
