use std::sync::Arc;

use askama::Template;
use axum::{
    extract::{Query, State},
    response::Html,
};
use serde::Deserialize;

#[allow(unused_imports)]
use crate::filters;

use crate::{
    error::AppResult,
    models::UserRole,
    routes::helpers::render,
    session::SessionUser,
    state::{AppState, list_login_logs, page_bounds},
};

#[derive(Template)]
#[template(path = "admin/login_logs.html")]
struct LoginLogsTemplate {
    logs: Vec<LogRow>,
    page: u64,
    pages: u64,
    total: u64,
    per_page: u64,
}

struct LogRow {
    at: String,
    username: String,
    success: bool,
    ip: String,
    user_agent: String,
}

#[derive(Deserialize, Default)]
pub struct LogsQuery {
    page: Option<u64>,
    per_page: Option<u64>,
}

pub async fn login_logs_index(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Query(q): Query<LogsQuery>,
) -> AppResult<Html<String>> {
    session_user.require_any(&[UserRole::Admin, UserRole::Executive])?;

    let (page, per_page) = page_bounds(q.page, q.per_page);
    let (logs, total) = list_login_logs(&state, page, per_page).await?;

    render(LoginLogsTemplate {
        logs: logs
            .into_iter()
            .map(|log| LogRow {
                at: log.at.to_chrono().format("%Y-%m-%d %H:%M:%S").to_string(),
                username: log.username,
                success: log.success,
                ip: log.ip.unwrap_or_default(),
                user_agent: log.user_agent.unwrap_or_default(),
            })
            .collect(),
        page,
        pages: total.div_ceil(per_page).max(1),
        total,
        per_page,
    })
}
