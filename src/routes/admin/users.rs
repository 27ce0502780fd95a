use std::sync::Arc;

use askama::Template;
use axum::{
    Json,
    extract::{Path, Query, State},
    response::{Html, Response},
};
use serde::Deserialize;
use serde_json::{Value, json};

#[allow(unused_imports)]
use crate::filters;

use crate::{
    error::{AppError, AppResult},
    models::{User, UserRole},
    routes::{
        helpers::{JsonOrForm, non_empty, render, require_oid},
        qrcode::enrollment_png_response,
    },
    session::SessionUser,
    state::{
        AppState, NewUser, create_user, find_user, get_user_by_id, list_users, reset_user_secret,
    },
    totp::generate_secret,
};

const USER_ADMINS: [UserRole; 2] = [UserRole::Admin, UserRole::Executive];

const ROLE_CHOICES: [UserRole; 6] = [
    UserRole::Agent,
    UserRole::Manager,
    UserRole::Admin,
    UserRole::Executive,
    UserRole::Accounting,
    UserRole::Hr,
];

#[derive(Template)]
#[template(path = "admin/users/index.html")]
struct UsersIndexTemplate {
    users: Vec<UserRow>,
    managers: Vec<ManagerOption>,
    roles: Vec<RoleOption>,
    role_filter: String,
}

struct UserRow {
    id: String,
    username: String,
    name: String,
    role: String,
    phone: String,
    branch: String,
    manager: String,
    is_self: bool,
}

struct ManagerOption {
    id: String,
    name: String,
}

struct RoleOption {
    value: &'static str,
    selected: bool,
}

#[derive(Deserialize, Default)]
pub struct UsersQuery {
    #[serde(default)]
    role: Option<String>,
}

#[derive(Deserialize)]
pub struct UserFormData {
    username: String,
    name: String,
    role: String,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    manager_id: Option<String>,
    #[serde(default)]
    branch_id: Option<String>,
    #[serde(default)]
    branch_name: Option<String>,
}

pub async fn users_index(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Query(q): Query<UsersQuery>,
) -> AppResult<Html<String>> {
    session_user.require_any(&USER_ADMINS)?;

    let role_filter = q.role.as_deref().and_then(UserRole::parse);
    let everyone = list_users(&state, None).await?;
    let names: std::collections::HashMap<_, _> = everyone
        .iter()
        .filter_map(|u| u.id.map(|id| (id, u.display_name())))
        .collect();

    let managers = everyone
        .iter()
        .filter(|u| u.role == UserRole::Manager)
        .map(|u| ManagerOption {
            id: u.id_hex(),
            name: u.display_name(),
        })
        .collect();

    let users = everyone
        .iter()
        .filter(|u| role_filter.is_none_or(|r| u.role == r))
        .map(|u| UserRow {
            id: u.id_hex(),
            username: u.username.clone(),
            name: u.display_name(),
            role: u.role.as_str().to_string(),
            phone: u.phone.clone().unwrap_or_default(),
            branch: u.branch_name.clone().unwrap_or_default(),
            manager: u
                .manager_id
                .and_then(|id| names.get(&id).cloned())
                .unwrap_or_default(),
            is_self: u.id.as_ref() == Some(session_user.user_id()),
        })
        .collect();

    render(UsersIndexTemplate {
        users,
        managers,
        roles: ROLE_CHOICES
            .iter()
            .map(|r| RoleOption {
                value: r.as_str(),
                selected: role_filter == Some(*r),
            })
            .collect(),
        role_filter: role_filter.map(|r| r.as_str().to_string()).unwrap_or_default(),
    })
}

/// Agents must report to an existing manager and inherit its branch unless one is given.
async fn resolve_manager(
    state: &AppState,
    role: UserRole,
    manager_id: Option<&str>,
) -> AppResult<Option<User>> {
    let Some(raw) = manager_id.map(str::trim).filter(|s| !s.is_empty()) else {
        if role == UserRole::Agent {
            return Err(AppError::validation("Agents need a manager."));
        }
        return Ok(None);
    };
    let oid = require_oid(raw, "manager")?;
    let manager = get_user_by_id(state, &oid)
        .await?
        .filter(|m| m.role == UserRole::Manager)
        .ok_or_else(|| AppError::validation("Manager not found."))?;
    Ok(Some(manager))
}

pub async fn users_create(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    JsonOrForm(form): JsonOrForm<UserFormData>,
) -> AppResult<Json<Value>> {
    session_user.require_any(&USER_ADMINS)?;

    let username = form.username.trim().to_lowercase();
    if username.is_empty() || form.name.trim().is_empty() {
        return Err(AppError::validation("Username and name are required."));
    }
    if username.chars().any(char::is_whitespace) {
        return Err(AppError::validation("Username cannot contain spaces."));
    }
    let role = UserRole::parse(&form.role).ok_or_else(|| AppError::validation("Unknown role."))?;
    if role == UserRole::Executive && session_user.role() != UserRole::Executive {
        return Err(AppError::forbidden("Only an executive can create executives."));
    }
    if find_user(&state, &username).await?.is_some() {
        return Err(AppError::conflict("Username already taken."));
    }

    let manager = resolve_manager(&state, role, form.manager_id.as_deref()).await?;
    let branch_id = non_empty(form.branch_id.as_deref())
        .or_else(|| manager.as_ref().and_then(|m| m.branch_id.clone()));
    let branch_name = non_empty(form.branch_name.as_deref())
        .or_else(|| manager.as_ref().and_then(|m| m.branch_name.clone()));

    let secret = generate_secret();
    let id = create_user(
        &state,
        NewUser {
            username: username.clone(),
            name: form.name,
            phone: non_empty(form.phone.as_deref()),
            role,
            manager_id: manager.and_then(|m| m.id),
            branch_id,
            branch_name,
            secret: secret.clone(),
        },
    )
    .await?;

    tracing::info!(user = %id, username = %username, role = role.as_str(), by = %session_user.user().username, "user created");
    Ok(Json(json!({
        "ok": true,
        "id": id.to_hex(),
        "username": username,
        "secret": secret,
        "qrcode_url": format!("/admin/users/{}/qrcode", id.to_hex()),
    })))
}

pub async fn users_qrcode(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Response> {
    session_user.require_any(&USER_ADMINS)?;
    let oid = require_oid(&id, "user")?;
    let user = get_user_by_id(&state, &oid)
        .await?
        .ok_or_else(|| AppError::not_found("User not found."))?;
    enrollment_png_response(&user)
}

/// Issues a fresh secret; existing sessions of that user are dropped.
pub async fn users_reset_secret(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    session_user.require_any(&USER_ADMINS)?;
    let oid = require_oid(&id, "user")?;
    let secret = generate_secret();
    if !reset_user_secret(&state, &oid, &secret).await? {
        return Err(AppError::not_found("User not found."));
    }
    tracing::info!(user = %oid, by = %session_user.user().username, "TOTP secret reset");
    Ok(Json(json!({
        "ok": true,
        "secret": secret,
        "qrcode_url": format!("/admin/users/{id}/qrcode"),
    })))
}
