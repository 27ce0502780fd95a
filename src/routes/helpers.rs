// routes/helpers.rs
// Pieces shared by every handler module: template rendering, JSON-or-form bodies, clock.

use askama::Template;
use axum::{
    Form, Json,
    extract::{FromRequest, Request},
    http::header::CONTENT_TYPE,
    response::{Html, IntoResponse, Response},
};
use chrono::{NaiveDateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Deserializer, de::DeserializeOwned};

use crate::error::{AppError, AppResult};
use crate::models::UserRole;
use crate::session::SessionUser;
use crate::state::{AppState, parse_oid, team_agents};

pub(crate) fn render<T: Template>(tpl: T) -> AppResult<Html<String>> {
    tpl.render()
        .map(Html)
        .map_err(|err| AppError::Internal(anyhow::anyhow!("template render failed: {err}")))
}

/// Request body accepted either as JSON or as an urlencoded form.
pub(crate) struct JsonOrForm<T>(pub T);

impl<S, T> FromRequest<S> for JsonOrForm<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Send,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("application/json"));

        if is_json {
            let Json(body) = Json::<T>::from_request(req, state)
                .await
                .map_err(|rej| AppError::validation(rej.body_text()).into_response())?;
            Ok(JsonOrForm(body))
        } else {
            let Form(body) = Form::<T>::from_request(req, state)
                .await
                .map_err(|rej| AppError::validation(rej.body_text()).into_response())?;
            Ok(JsonOrForm(body))
        }
    }
}

/// Wall clock used for "today" and audit times (UTC).
pub(crate) fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

pub(crate) fn today_str() -> String {
    now().format("%Y-%m-%d").to_string()
}

pub(crate) fn time_str() -> String {
    now().format("%H:%M:%S").to_string()
}

pub(crate) fn require_oid(raw: &str, what: &str) -> AppResult<ObjectId> {
    parse_oid(raw).ok_or_else(|| AppError::validation(format!("Invalid {what} id.")))
}

/// Trimmed non-empty text or None.
pub(crate) fn non_empty(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Checkbox-style flag: JSON booleans or form values such as "yes", "on", "1", "true".
pub(crate) fn de_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }
    Ok(match Option::<Flag>::deserialize(deserializer)? {
        Some(Flag::Bool(b)) => b,
        Some(Flag::Text(s)) => matches!(
            s.trim().to_lowercase().as_str(),
            "yes" | "on" | "1" | "true"
        ),
        None => false,
    })
}

/// Agent ids whose records the user may see: `Some(ids)` for agents and managers,
/// `None` (everything) for back-office roles.
pub(crate) async fn scoped_agent_ids(
    state: &AppState,
    session: &SessionUser,
) -> AppResult<Option<Vec<String>>> {
    match session.role() {
        UserRole::Agent => Ok(Some(vec![session.id_hex()])),
        UserRole::Manager => Ok(Some(
            team_agents(state, session.user_id())
                .await?
                .iter()
                .map(|a| a.id_hex())
                .collect(),
        )),
        UserRole::Admin | UserRole::Executive | UserRole::Accounting => Ok(None),
        UserRole::Hr | UserRole::Unknown => {
            Err(AppError::forbidden("You do not have access to this page."))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Toggle {
        #[serde(default, deserialize_with = "de_flag")]
        force: bool,
    }

    #[test]
    fn flags_accept_json_and_form_values() {
        let t: Toggle = serde_json::from_str(r#"{"force": true}"#).unwrap();
        assert!(t.force);
        let t: Toggle = serde_json::from_str(r#"{"force": "yes"}"#).unwrap();
        assert!(t.force);
        let t: Toggle = serde_json::from_str(r#"{"force": "no"}"#).unwrap();
        assert!(!t.force);
        let t: Toggle = serde_json::from_str("{}").unwrap();
        assert!(!t.force);
    }

    #[test]
    fn blank_text_becomes_none() {
        assert_eq!(non_empty(Some("  ")), None);
        assert_eq!(non_empty(Some(" Accra ")), Some("Accra".to_string()));
        assert_eq!(non_empty(None), None);
    }
}
