use anyhow::{Context, Result};
use data_encoding::BASE32_NOPAD;
use futures::stream::TryStreamExt;
use mongodb::bson::{DateTime, Document, doc, oid::ObjectId};
use rand::RngCore;
use std::time::{Duration, SystemTime};

use crate::models::{LoginLog, Session, User, UserRole};

use super::{AppState, SESSION_TTL_SECONDS};

pub struct NewUser {
    pub username: String,
    pub name: String,
    pub phone: Option<String>,
    pub role: UserRole,
    pub manager_id: Option<ObjectId>,
    pub branch_id: Option<String>,
    pub branch_name: Option<String>,
    pub secret: String,
}

pub async fn find_user(state: &AppState, username: &str) -> Result<Option<User>> {
    let username = username.trim().to_lowercase();
    Ok(state.users.find_one(doc! { "username": username }).await?)
}

pub async fn get_user_by_id(state: &AppState, id: &ObjectId) -> Result<Option<User>> {
    Ok(state.users.find_one(doc! { "_id": id }).await?)
}

/// Users by id string; invalid ids are ignored.
pub async fn users_by_ids(state: &AppState, ids: &[String]) -> Result<Vec<User>> {
    let oids: Vec<ObjectId> = ids.iter().filter_map(|s| super::parse_oid(s)).collect();
    if oids.is_empty() {
        return Ok(Vec::new());
    }
    collect_users(state, doc! { "_id": { "$in": oids } }).await
}

pub async fn list_users(state: &AppState, role: Option<UserRole>) -> Result<Vec<User>> {
    let filter = match role {
        Some(role) => doc! { "role": role.as_str() },
        None => doc! {},
    };
    collect_users(state, filter).await
}

pub async fn list_users_by_roles(state: &AppState, roles: &[UserRole]) -> Result<Vec<User>> {
    let roles: Vec<&str> = roles.iter().map(|r| r.as_str()).collect();
    collect_users(state, doc! { "role": { "$in": roles } }).await
}

/// Agents whose manager is `manager_id`.
pub async fn team_agents(state: &AppState, manager_id: &ObjectId) -> Result<Vec<User>> {
    collect_users(
        state,
        doc! { "role": UserRole::Agent.as_str(), "manager_id": manager_id },
    )
    .await
}

async fn collect_users(state: &AppState, filter: Document) -> Result<Vec<User>> {
    let mut cursor = state.users.find(filter).sort(doc! { "name": 1 }).await?;
    let mut users = Vec::new();
    while let Some(user) = cursor.try_next().await? {
        users.push(user);
    }
    Ok(users)
}

pub async fn create_user(state: &AppState, new: NewUser) -> Result<ObjectId> {
    let res = state
        .users
        .insert_one(User {
            id: None,
            username: new.username.trim().to_lowercase(),
            name: new.name.trim().to_string(),
            phone: new.phone,
            role: new.role,
            manager_id: new.manager_id,
            branch_id: new.branch_id,
            branch_name: new.branch_name,
            secret: new.secret,
            created_at: Some(DateTime::now()),
        })
        .await?;
    res.inserted_id
        .as_object_id()
        .context("user insert missing _id")
}

pub async fn reset_user_secret(state: &AppState, id: &ObjectId, secret: &str) -> Result<bool> {
    let res = state
        .users
        .update_one(doc! { "_id": id }, doc! { "$set": { "secret": secret } })
        .await?;
    // Old sessions stay valid only until they expire; drop them now.
    let _ = state.sessions.delete_many(doc! { "user_id": id }).await;
    Ok(res.matched_count == 1)
}

pub async fn create_session(state: &AppState, user_id: &ObjectId) -> Result<String> {
    let _ = state
        .sessions
        .delete_many(doc! { "user_id": user_id })
        .await;

    let mut token_bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut token_bytes);
    let token = BASE32_NOPAD.encode(&token_bytes);

    let expires_at =
        DateTime::from_system_time(SystemTime::now() + Duration::from_secs(SESSION_TTL_SECONDS));

    state
        .sessions
        .insert_one(Session {
            id: None,
            token: token.clone(),
            user_id: *user_id,
            expires_at,
        })
        .await?;

    Ok(token)
}

pub async fn find_user_by_session(state: &AppState, token: &str) -> Result<Option<User>> {
    if let Some(session) = state.sessions.find_one(doc! { "token": token }).await? {
        let expires_at = session.expires_at.to_system_time();
        if expires_at <= SystemTime::now() {
            let _ = state.sessions.delete_one(doc! { "token": token }).await;
            return Ok(None);
        }
        get_user_by_id(state, &session.user_id).await
    } else {
        Ok(None)
    }
}

pub async fn delete_session(state: &AppState, token: &str) -> Result<()> {
    let _ = state.sessions.delete_one(doc! { "token": token }).await?;
    Ok(())
}

/// Best-effort: a failed login-log write never blocks a login.
pub async fn record_login(
    state: &AppState,
    username: &str,
    user_id: Option<ObjectId>,
    success: bool,
    ip: Option<String>,
    user_agent: Option<String>,
) {
    let log = LoginLog {
        id: None,
        username: username.trim().to_lowercase(),
        user_id,
        success,
        ip,
        user_agent,
        at: DateTime::now(),
    };
    if let Err(err) = state.login_logs.insert_one(log).await {
        tracing::warn!(error = %err, "login log write failed");
    }
}

pub async fn list_login_logs(
    state: &AppState,
    page: u64,
    per_page: u64,
) -> Result<(Vec<LoginLog>, u64)> {
    let total = state.login_logs.count_documents(doc! {}).await?;
    let mut cursor = state
        .login_logs
        .find(doc! {})
        .sort(doc! { "at": -1 })
        .skip((page - 1) * per_page)
        .limit(per_page as i64)
        .await?;
    let mut logs = Vec::new();
    while let Some(log) = cursor.try_next().await? {
        logs.push(log);
    }
    Ok((logs, total))
}
