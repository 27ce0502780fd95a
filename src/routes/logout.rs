// routes/logout.rs
// POST /logout -> removes the session row and expires the cookie.

use std::sync::Arc;

use axum::{
    Json,
    extract::State,
    http::{HeaderValue, StatusCode, header::SET_COOKIE},
    response::{IntoResponse, Response},
};

use crate::session::{SESSION_COOKIE_NAME, SessionUser};
use crate::state::{AppState, delete_session};

pub async fn logout(State(st): State<Arc<AppState>>, session: SessionUser) -> Response {
    let (status, body) = match delete_session(&st, session.token()).await {
        Ok(()) => (StatusCode::OK, serde_json::json!({ "ok": true })),
        Err(err) => {
            tracing::warn!(user = %session.user().username, error = ?err, "session delete failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "ok": false, "message": "Session could not be closed." }),
            )
        }
    };

    // The cookie is cleared either way.
    let mut response = (status, Json(body)).into_response();
    if let Ok(header_value) = HeaderValue::from_str(&format!(
        "{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0"
    )) {
        response.headers_mut().append(SET_COOKIE, header_value);
    }
    response
}
