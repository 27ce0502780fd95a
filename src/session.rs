// session.rs
// Session middleware guarding the back-office routes and the extractor handlers use
// to reach the logged-in user and check roles.

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, header::COOKIE, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures::future::BoxFuture;
use mongodb::bson::oid::ObjectId;

use crate::error::AppError;
use crate::ledger::Actor;
use crate::models::{User, UserRole};
use crate::state::{AppState, find_user_by_session};

pub const SESSION_COOKIE_NAME: &str = "session";

#[derive(Clone)]
pub struct SessionData {
    pub user: User,
    pub user_id: ObjectId,
    pub token: String,
}

pub async fn require_session(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, Response> {
    let tokens = extract_cookies(request.headers(), SESSION_COOKIE_NAME);
    if tokens.is_empty() {
        return Err(unauthorized_response());
    }

    // Browsers may send stale duplicates; the first live one wins.
    let mut found = None;
    for token in tokens {
        match find_user_by_session(&state, &token).await {
            Ok(Some(user)) => {
                found = Some((user, token));
                break;
            }
            Ok(None) => continue,
            Err(err) => return Err(AppError::Internal(err).into_response()),
        }
    }

    match found {
        Some((user, token)) => {
            let Some(user_id) = user.id else {
                return Err(unauthorized_response());
            };
            request.extensions_mut().insert(SessionData {
                user,
                user_id,
                token,
            });
            Ok(next.run(request).await)
        }
        None => Err(unauthorized_response()),
    }
}

pub struct SessionUser(pub SessionData);

impl SessionUser {
    pub fn user(&self) -> &User {
        &self.0.user
    }

    pub fn token(&self) -> &str {
        &self.0.token
    }

    pub fn user_id(&self) -> &ObjectId {
        &self.0.user_id
    }

    pub fn id_hex(&self) -> String {
        self.0.user_id.to_hex()
    }

    pub fn role(&self) -> UserRole {
        self.0.user.role
    }

    pub fn has_any(&self, roles: &[UserRole]) -> bool {
        roles.contains(&self.0.user.role)
    }

    /// 403 unless the user holds one of `roles`.
    pub fn require_any(&self, roles: &[UserRole]) -> Result<(), AppError> {
        if self.has_any(roles) {
            Ok(())
        } else {
            Err(AppError::forbidden(
                "You do not have access to this page.",
            ))
        }
    }

    /// Identity stamped on ledger audit entries and transfer intents.
    pub fn actor(&self) -> Actor {
        Actor {
            id: self.id_hex(),
            name: self.0.user.display_name(),
            role: self.0.user.role.as_str().to_string(),
        }
    }
}

#[allow(refining_impl_trait)]
impl<S> FromRequestParts<S> for SessionUser
where
    S: Send + Sync,
{
    type Rejection = Response;

    fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> BoxFuture<'static, Result<Self, Self::Rejection>> {
        let data = parts
            .extensions
            .get::<SessionData>()
            .cloned()
            .ok_or_else(unauthorized_response);

        Box::pin(async move { data.map(SessionUser) })
    }
}

pub fn unauthorized_response() -> Response {
    AppError::Unauthorized.into_response()
}

pub(crate) fn extract_cookies(headers: &HeaderMap, name: &str) -> Vec<String> {
    headers
        .get_all(COOKIE)
        .into_iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| {
            let mut split = pair.trim().splitn(2, '=');
            let key = split.next()?.trim();
            let value = split.next()?.trim();
            if key == name && !value.is_empty() {
                Some(value.to_owned())
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn cookies_are_collected_across_headers() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("theme=dark; session=abc"));
        headers.append(COOKIE, HeaderValue::from_static("session=def; session="));
        assert_eq!(
            extract_cookies(&headers, SESSION_COOKIE_NAME),
            vec!["abc".to_string(), "def".to_string()]
        );
        assert!(extract_cookies(&headers, "missing").is_empty());
    }
}
