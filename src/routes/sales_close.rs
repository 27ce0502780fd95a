// routes/sales_close.rs
// Sales-close ledger pages. One router per withdraw scope (manager, admin, executive)
// plus the agent/manager range summary under /sales-close.

use std::{collections::HashMap, sync::Arc};

use askama::Template;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    response::Html,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};

#[allow(unused_imports)]
use crate::filters;

use crate::{
    error::{AppError, AppResult},
    ledger::{LedgerStore, WithdrawRequest, withdraw},
    models::{TransferStatus, User, UserRole},
    money::{de_amount, format_money, round2},
    period::parse_date,
    routes::helpers::{JsonOrForm, non_empty, render, require_oid, time_str, today_str},
    session::SessionUser,
    state::{
        AppState, MongoLedger, collections_for_day, get_user_by_id, list_users,
        list_users_by_roles, team_agents,
    },
};

/// Who may withdraw from whom, and into whose ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseScope {
    Manager,
    Admin,
    Executive,
}

impl CloseScope {
    pub fn allowed(self) -> &'static [UserRole] {
        match self {
            CloseScope::Manager => &[UserRole::Manager, UserRole::Admin, UserRole::Executive],
            CloseScope::Admin => &[UserRole::Admin, UserRole::Executive],
            CloseScope::Executive => &[UserRole::Executive],
        }
    }

    pub fn target_roles(self) -> &'static [UserRole] {
        match self {
            CloseScope::Manager => &[UserRole::Agent],
            CloseScope::Admin => &[UserRole::Manager],
            CloseScope::Executive => &[UserRole::Agent, UserRole::Manager, UserRole::Admin],
        }
    }

    fn title(self) -> &'static str {
        match self {
            CloseScope::Manager => "Manager Close",
            CloseScope::Admin => "Admin Close",
            CloseScope::Executive => "Executive Close",
        }
    }

    fn prefix(self) -> &'static str {
        match self {
            CloseScope::Manager => "/manager-close",
            CloseScope::Admin => "/admin-close",
            CloseScope::Executive => "/executive-close",
        }
    }

    fn credited_label(self) -> &'static str {
        match self {
            CloseScope::Manager => "manager",
            CloseScope::Admin => "admin",
            CloseScope::Executive => "executive",
        }
    }

    /// Users this requester may withdraw from. Also the unclose aggregate.
    async fn members(self, state: &AppState, requester: &SessionUser) -> AppResult<Vec<User>> {
        let users = match self {
            CloseScope::Manager => team_agents(state, requester.user_id()).await?,
            CloseScope::Admin => list_users(state, Some(UserRole::Manager)).await?,
            CloseScope::Executive => list_users_by_roles(state, self.target_roles()).await?,
        };
        Ok(users
            .into_iter()
            .filter(|u| u.id.as_ref() != Some(requester.user_id()))
            .collect())
    }

    /// The target if it belongs to this requester's scope.
    async fn target(
        self,
        state: &AppState,
        requester: &SessionUser,
        raw_id: &str,
    ) -> AppResult<User> {
        let not_found = || AppError::not_found("User not found or not in your scope.");
        let oid = require_oid(raw_id, "user")?;
        if &oid == requester.user_id() {
            return Err(not_found());
        }
        let user = get_user_by_id(state, &oid).await?.ok_or_else(not_found)?;
        if !self.target_roles().contains(&user.role) {
            return Err(not_found());
        }
        if self == CloseScope::Manager && user.manager_id.as_ref() != Some(requester.user_id()) {
            return Err(not_found());
        }
        Ok(user)
    }
}

pub fn close_routes(scope: CloseScope) -> Router<Arc<AppState>> {
    let router = Router::new()
        .route(
            "/",
            get(move |user: SessionUser, st: State<Arc<AppState>>| close_page(scope, user, st)),
        )
        .route(
            "/summary",
            get(move |user: SessionUser, st: State<Arc<AppState>>| close_summary(scope, user, st)),
        )
        .route(
            "/withdraw",
            post(
                move |user: SessionUser,
                      st: State<Arc<AppState>>,
                      body: JsonOrForm<WithdrawForm>| close_withdraw(scope, user, st, body),
            ),
        )
        .route(
            "/user/{id}/withdrawals",
            get(
                move |user: SessionUser, st: State<Arc<AppState>>, id: Path<String>| {
                    user_withdrawals(scope, user, st, id)
                },
            ),
        );

    if scope == CloseScope::Executive {
        router
            .route("/transfers", get(transfers_index))
            .route("/transfers/{id}/replay", post(transfers_replay))
    } else {
        router
    }
}

struct MemberBalance {
    id: String,
    name: String,
    phone: String,
    role: String,
    available: f64,
}

struct Board {
    members: Vec<MemberBalance>,
    unclose_total: f64,
    close_total: f64,
}

async fn board(scope: CloseScope, state: &AppState, requester: &SessionUser) -> AppResult<Board> {
    let members = scope.members(state, requester).await?;
    let ids: Vec<String> = members.iter().map(User::id_hex).collect();
    let ledger = MongoLedger::new(state);
    let totals = ledger.totals_by_owner(&ids).await?;

    let mut rows: Vec<MemberBalance> = members
        .iter()
        .map(|u| MemberBalance {
            id: u.id_hex(),
            name: u.display_name(),
            phone: u.phone.clone().unwrap_or_default(),
            role: u.role.as_str().to_string(),
            available: totals.get(&u.id_hex()).copied().unwrap_or(0.0),
        })
        .collect();
    rows.sort_by(|a, b| b.available.total_cmp(&a.available));

    let unclose_total = round2(rows.iter().map(|r| r.available).sum());
    let close_total = round2(ledger.total(&requester.id_hex()).await?);
    Ok(Board {
        members: rows,
        unclose_total,
        close_total,
    })
}

#[derive(Template)]
#[template(path = "sales_close/dashboard.html")]
struct CloseDashboardTemplate {
    title: &'static str,
    prefix: &'static str,
    requester_name: String,
    today: String,
    unclose_total: f64,
    close_total: f64,
    members: Vec<MemberBalance>,
    show_transfers: bool,
}

async fn close_page(
    scope: CloseScope,
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Html<String>> {
    session_user.require_any(scope.allowed())?;
    let board = board(scope, &state, &session_user).await?;
    render(CloseDashboardTemplate {
        title: scope.title(),
        prefix: scope.prefix(),
        requester_name: session_user.user().display_name(),
        today: today_str(),
        unclose_total: board.unclose_total,
        close_total: board.close_total,
        members: board.members,
        show_transfers: scope == CloseScope::Executive,
    })
}

async fn close_summary(
    scope: CloseScope,
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<Value>> {
    session_user.require_any(scope.allowed())?;
    let board = board(scope, &state, &session_user).await?;
    let members: Vec<Value> = board
        .members
        .iter()
        .map(|m| {
            json!({
                "_id": m.id,
                "name": m.name,
                "phone": m.phone,
                "role": m.role,
                "available": format_money(m.available),
                "available_num": m.available,
            })
        })
        .collect();
    Ok(Json(json!({
        "ok": true,
        "today": today_str(),
        "unclose_total": format_money(board.unclose_total),
        "close_total": format_money(board.close_total),
        "members": members,
    })))
}

#[derive(Deserialize)]
pub struct WithdrawForm {
    #[serde(default, alias = "agent_id", alias = "manager_id", alias = "user_id")]
    target_id: String,
    #[serde(default, deserialize_with = "de_amount")]
    amount: f64,
    #[serde(default)]
    note: Option<String>,
}

async fn close_withdraw(
    scope: CloseScope,
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    JsonOrForm(form): JsonOrForm<WithdrawForm>,
) -> AppResult<Json<Value>> {
    session_user.require_any(scope.allowed())?;
    if form.target_id.trim().is_empty() || !form.amount.is_finite() || form.amount <= 0.0 {
        return Err(AppError::validation(
            "Target and a positive amount are required.",
        ));
    }
    let target = scope.target(&state, &session_user, &form.target_id).await?;
    let target_id = target.id_hex();

    let ledger = MongoLedger::new(&state);
    let request = WithdrawRequest {
        source_id: target_id.clone(),
        destination_id: session_user.id_hex(),
        amount: form.amount,
        note: non_empty(form.note.as_deref()).unwrap_or_default(),
        actor: session_user.actor(),
        today: today_str(),
        time: time_str(),
    };
    let outcome = withdraw(&ledger, &request).await?;

    // Fresh reads after the move, never derived from the pre-withdraw numbers.
    let available = ledger.total(&target_id).await?;
    let board = board(scope, &state, &session_user).await?;

    Ok(Json(json!({
        "ok": true,
        "message": format!(
            "Withdrew GHS {} across {} day(s) and credited {} account.",
            format_money(outcome.debited),
            outcome.breakdown.len(),
            scope.credited_label()
        ),
        "requested": format_money(outcome.requested),
        "debited": format_money(outcome.debited),
        "debited_breakdown": outcome
            .breakdown
            .iter()
            .map(|line| json!({ "date": line.date, "amount": format_money(line.amount) }))
            .collect::<Vec<_>>(),
        "target_id": target_id,
        "target_role": target.role.as_str(),
        "available": format_money(available),
        "unclose_total": format_money(board.unclose_total),
        "close_total": format_money(board.close_total),
        "transfer_id": outcome.transfer_id,
    })))
}

async fn user_withdrawals(
    scope: CloseScope,
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    session_user.require_any(scope.allowed())?;
    let target = scope.target(&state, &session_user, &id).await?;
    let history = MongoLedger::new(&state)
        .withdrawal_history(&target.id_hex())
        .await?;
    Ok(Json(json!({
        "ok": true,
        "user": {
            "_id": target.id_hex(),
            "name": target.display_name(),
            "phone": target.phone.clone().unwrap_or_default(),
            "role": target.role.as_str(),
        },
        "withdrawals": history,
    })))
}

#[derive(Deserialize, Default)]
pub struct TransfersQuery {
    status: Option<String>,
    limit: Option<i64>,
}

pub async fn transfers_index(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Query(q): Query<TransfersQuery>,
) -> AppResult<Json<Value>> {
    session_user.require_any(&[UserRole::Executive])?;
    let status = match non_empty(q.status.as_deref()) {
        Some(raw) => Some(
            TransferStatus::parse(&raw)
                .ok_or_else(|| AppError::validation("Unknown transfer status."))?,
        ),
        None => None,
    };
    let limit = q.limit.unwrap_or(100).clamp(1, 500);
    let transfers = MongoLedger::new(&state).list_transfers(status, limit).await?;
    Ok(Json(json!({ "ok": true, "transfers": transfers })))
}

/// Re-applies the destination credit of a transfer whose credit step failed.
pub async fn transfers_replay(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    session_user.require_any(&[UserRole::Executive])?;
    require_oid(&id, "transfer")?;
    let transfer = MongoLedger::new(&state)
        .replay_transfer(&id)
        .await?
        .ok_or_else(|| AppError::not_found("No failed transfer with that id."))?;
    tracing::info!(transfer = %id, by = %session_user.user().username, "transfer replay requested");
    Ok(Json(json!({
        "ok": true,
        "message": format!(
            "Credited GHS {} to {}.",
            format_money(transfer.debited),
            transfer.destination_id
        ),
        "transfer": transfer,
    })))
}

// ---------- /sales-close ----------

#[derive(Deserialize, Default)]
pub struct RangeQuery {
    start: Option<String>,
    end: Option<String>,
}

struct RangeSummary {
    range_total: f64,
    range_count: i64,
    today_total: f64,
    today_count: i64,
    agents_count: usize,
    start: String,
    end: String,
}

/// Agents see their own ledger, managers their team's.
async fn range_summary(
    state: &AppState,
    session_user: &SessionUser,
    q: &RangeQuery,
) -> AppResult<RangeSummary> {
    session_user.require_any(&[UserRole::Agent, UserRole::Manager])?;
    let agent_ids: Vec<String> = match session_user.role() {
        UserRole::Agent => vec![session_user.id_hex()],
        _ => team_agents(state, session_user.user_id())
            .await?
            .iter()
            .map(User::id_hex)
            .collect(),
    };

    let day = |raw: &Option<String>| -> AppResult<Option<String>> {
        match non_empty(raw.as_deref()) {
            Some(d) => parse_date(&d)
                .map(|d| Some(d.format("%Y-%m-%d").to_string()))
                .ok_or_else(|| AppError::validation("Dates must be YYYY-MM-DD.")),
            None => Ok(None),
        }
    };
    let start = day(&q.start)?;
    let end = day(&q.end)?;

    let (range_total, range_count) = if agent_ids.is_empty() {
        (0.0, 0)
    } else {
        MongoLedger::new(state)
            .range_totals(&agent_ids, start.as_deref(), end.as_deref())
            .await?
    };
    let today: HashMap<String, (f64, i64)> = if agent_ids.is_empty() {
        HashMap::new()
    } else {
        collections_for_day(state, &agent_ids, &today_str()).await?
    };
    let today_total = round2(today.values().map(|(t, _)| t).sum());
    let today_count = today.values().map(|(_, c)| c).sum();

    Ok(RangeSummary {
        range_total,
        range_count,
        today_total,
        today_count,
        agents_count: agent_ids.len(),
        start: start.unwrap_or_default(),
        end: end.unwrap_or_default(),
    })
}

#[derive(Template)]
#[template(path = "sales_close/summary.html")]
struct SalesCloseTemplate {
    role: String,
    summary: RangeSummary,
}

pub async fn sales_close_page(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Query(q): Query<RangeQuery>,
) -> AppResult<Html<String>> {
    let summary = range_summary(&state, &session_user, &q).await?;
    render(SalesCloseTemplate {
        role: session_user.role().as_str().to_string(),
        summary,
    })
}

pub async fn sales_close_summary(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Query(q): Query<RangeQuery>,
) -> AppResult<Json<Value>> {
    let s = range_summary(&state, &session_user, &q).await?;
    Ok(Json(json!({
        "ok": true,
        "range_total": format_money(s.range_total),
        "range_count": s.range_count,
        "today_total": format_money(s.today_total),
        "today_count": s.today_count,
        "agents_count": s.agents_count,
        "start": s.start,
        "end": s.end,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scopes_nest_strictly() {
        assert!(CloseScope::Manager.allowed().contains(&UserRole::Executive));
        assert!(!CloseScope::Admin.allowed().contains(&UserRole::Manager));
        assert_eq!(CloseScope::Executive.allowed(), &[UserRole::Executive]);
        assert_eq!(CloseScope::Admin.target_roles(), &[UserRole::Manager]);
        assert!(!CloseScope::Executive.target_roles().contains(&UserRole::Executive));
    }

    #[test]
    fn withdraw_form_accepts_legacy_field_names() {
        let form: WithdrawForm =
            serde_json::from_str(r#"{"agent_id": "abc", "amount": "1,250.50"}"#).unwrap();
        assert_eq!(form.target_id, "abc");
        assert_eq!(form.amount, 1250.5);
        assert!(form.note.is_none());
    }
}
