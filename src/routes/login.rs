// routes/login.rs
// POST /login { "username": "...", "code": "123456" } -> { "ok": true, "redirect_url": ... }

use std::sync::Arc;

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header::SET_COOKIE},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::models::UserRole;
use crate::session::SESSION_COOKIE_NAME;
use crate::state::{AppState, SESSION_TTL_SECONDS, create_session, find_user, record_login};
use crate::totp::verify_code;

use super::helpers::JsonOrForm;

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub code: String,
}

/// Landing page after login.
pub fn landing_path(role: UserRole) -> &'static str {
    match role {
        UserRole::Agent => "/sales-close",
        UserRole::Manager => "/manager-close",
        UserRole::Admin => "/admin-close",
        UserRole::Executive => "/executive-close",
        UserRole::Accounting => "/accounting/profit-loss",
        UserRole::Hr => "/hr/payroll",
        UserRole::Unknown => "/",
    }
}

fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Verifies the current TOTP code (±1 step of skew) and opens a server-side session.
pub async fn login(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    JsonOrForm(body): JsonOrForm<LoginRequest>,
) -> AppResult<Response> {
    let username = body.username.trim().to_lowercase();
    if username.is_empty() || body.code.trim().is_empty() {
        return Err(AppError::validation("Username and code are required."));
    }
    let ip = client_ip(&headers);
    let user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let user = find_user(&st, &username).await?;
    let verified = match &user {
        Some(user) if user.role != UserRole::Unknown => {
            verify_code(&user.username, &user.secret, body.code.trim()).unwrap_or_else(|err| {
                tracing::warn!(username = %user.username, error = ?err, "stored TOTP secret unusable");
                false
            })
        }
        _ => false,
    };

    let user_id = user.as_ref().and_then(|u| u.id);
    record_login(&st, &username, user_id, verified, ip, user_agent).await;

    let (Some(user), Some(user_id), true) = (user, user_id, verified) else {
        tracing::info!(username = %username, "login rejected");
        return Ok((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "ok": false, "message": "Invalid username or code." })),
        )
            .into_response());
    };

    let token = create_session(&st, &user_id).await?;
    tracing::info!(username = %user.username, role = user.role.as_str(), "login succeeded");

    let mut response = (
        StatusCode::OK,
        Json(json!({
            "ok": true,
            "role": user.role.as_str(),
            "redirect_url": landing_path(user.role),
        })),
    )
        .into_response();
    if let Ok(header_value) = HeaderValue::from_str(&format!(
        "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={SESSION_TTL_SECONDS}"
    )) {
        response.headers_mut().append(SET_COOKIE, header_value);
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwarded_ip_takes_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1, 172.16.0.2"));
        assert_eq!(client_ip(&headers).as_deref(), Some("10.0.0.1"));
        assert_eq!(client_ip(&HeaderMap::new()), None);
    }

    #[test]
    fn every_role_lands_somewhere() {
        assert_eq!(landing_path(UserRole::Manager), "/manager-close");
        assert_eq!(landing_path(UserRole::Hr), "/hr/payroll");
    }
}
