//! 管理员账户管理

use crate::{
    auth::{guard::Realm, middleware::AuthContext},
    error::AppError,
    middleware::{AppState, Payload},
    models::{AccountResponse, RegisterRequest, Role},
};
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use std::sync::Arc;

/// POST /admin/admins
/// 仅 super_admin 可创建后台账户
pub async fn create_admin(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Payload(req): Payload<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    if auth.account.role() != Role::SuperAdmin {
        tracing::warn!(
            account_id = %auth.account.id,
            role = %auth.account.role,
            "Admin creation denied"
        );
        return Err(AppError::Forbidden);
    }

    let role = parse_admin_role(req.role.as_deref())?;
    let account = state.auth(Realm::Admin).register(req, role).await?;

    tracing::info!(
        created_by = %auth.account.id,
        account_id = %account.id,
        "Admin account created"
    );

    Ok((StatusCode::CREATED, Json(AccountResponse::from(account))))
}

/// 后台角色，缺省为 admin
fn parse_admin_role(role: Option<&str>) -> Result<Role, AppError> {
    match role.map(str::trim) {
        None | Some("") => Ok(Role::Admin),
        Some(raw) => match Role::from(raw.to_string()) {
            Role::User => Err(AppError::validation("role", "The selected role is invalid.")),
            role => Ok(role),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_admin_role() {
        assert_eq!(parse_admin_role(None).unwrap(), Role::Admin);
        assert_eq!(parse_admin_role(Some("editor")).unwrap(), Role::Editor);
        assert_eq!(parse_admin_role(Some("super_admin")).unwrap(), Role::SuperAdmin);
        assert!(parse_admin_role(Some("user")).is_err());
        assert!(parse_admin_role(Some("root")).is_err());
    }
}
