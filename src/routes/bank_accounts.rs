// routes/bank_accounts.rs
// Bank, mobile money and cash accounts with manager deposits, withdrawals and reconciliation.

use std::sync::Arc;

use askama::Template;
use axum::{
    Json,
    extract::{Path, State},
    response::{Html, Response},
};
use serde::Deserialize;
use serde_json::{Value, json};

#[allow(unused_imports)]
use crate::filters;
use crate::{
    csv_export::{BANK_ACCOUNTS_HEADER, csv_response, render_csv},
    error::{AppError, AppResult},
    models::UserRole,
    money::{de_amount, round2},
    period::parse_date,
    routes::helpers::{JsonOrForm, non_empty, now, render, require_oid},
    session::SessionUser,
    state::{
        AppState, BankAccountRow, NewBankAccount, WITHDRAWAL_PURPOSES, create_bank_account,
        get_bank_account, list_bank_accounts, reconcile_bank_account, record_bank_withdrawal,
        record_manager_deposit,
    },
};

const TREASURY: [UserRole; 2] = [UserRole::Accounting, UserRole::Executive];

#[derive(Template)]
#[template(path = "bank_accounts/index.html")]
pub struct BankAccountsTemplate {
    pub rows: Vec<BankAccountRow>,
    pub purposes: Vec<&'static str>,
    pub total_live: f64,
    pub can_manage: bool,
}

pub async fn bank_accounts_page(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Html<String>> {
    session_user.require_any(&[UserRole::Accounting, UserRole::Executive, UserRole::Manager])?;
    let rows = list_bank_accounts(&state).await?;
    let total_live = round2(rows.iter().map(|r| r.live_balance).sum());
    render(BankAccountsTemplate {
        rows,
        purposes: WITHDRAWAL_PURPOSES.to_vec(),
        total_live,
        can_manage: session_user.has_any(&TREASURY),
    })
}

pub async fn bank_accounts_index(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<Value>> {
    session_user.require_any(&[UserRole::Accounting, UserRole::Executive, UserRole::Manager])?;
    let rows = list_bank_accounts(&state).await?;
    Ok(Json(json!({ "ok": true, "accounts": rows })))
}

#[derive(Deserialize)]
pub struct BankAccountForm {
    #[serde(default)]
    account_type: String,
    #[serde(default)]
    account_name: String,
    #[serde(default)]
    bank_name: String,
    #[serde(default)]
    network: String,
    #[serde(default)]
    account_no: String,
    #[serde(default)]
    currency: String,
    #[serde(default, deserialize_with = "de_amount")]
    opening_balance: f64,
}

impl From<BankAccountForm> for NewBankAccount {
    fn from(f: BankAccountForm) -> Self {
        NewBankAccount {
            account_type: f.account_type,
            account_name: f.account_name,
            bank_name: f.bank_name,
            network: f.network,
            account_no: f.account_no,
            currency: f.currency,
            opening_balance: f.opening_balance,
        }
    }
}

pub async fn bank_account_create(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    JsonOrForm(form): JsonOrForm<BankAccountForm>,
) -> AppResult<Json<Value>> {
    session_user.require_any(&TREASURY)?;
    let new = NewBankAccount::from(form);
    new.validate().map_err(AppError::validation)?;
    let id = create_bank_account(&state, &new).await?;
    tracing::info!(account = %id, by = %session_user.user().username, "bank account created");
    Ok(Json(json!({ "ok": true, "id": id.to_hex() })))
}

#[derive(Deserialize)]
pub struct DepositForm {
    #[serde(deserialize_with = "de_amount")]
    amount: f64,
    #[serde(default)]
    note: String,
    #[serde(default)]
    date: Option<String>,
}

fn flow_date(raw: Option<&str>) -> AppResult<chrono::NaiveDate> {
    match non_empty(raw) {
        Some(raw) => parse_date(&raw).ok_or_else(|| AppError::validation("Invalid date.")),
        None => Ok(now().date()),
    }
}

async fn existing_account(state: &AppState, raw: &str) -> AppResult<mongodb::bson::oid::ObjectId> {
    let id = require_oid(raw, "account")?;
    get_bank_account(state, &id)
        .await?
        .ok_or_else(|| AppError::not_found("Account not found."))?;
    Ok(id)
}

/// A manager banking collected cash.
pub async fn bank_deposit_create(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    JsonOrForm(form): JsonOrForm<DepositForm>,
) -> AppResult<Json<Value>> {
    session_user.require_any(&[UserRole::Manager])?;
    let amount = round2(form.amount);
    if amount <= 0.0 {
        return Err(AppError::validation("A positive amount is required."));
    }
    let date = flow_date(form.date.as_deref())?;
    let bank_id = existing_account(&state, &id).await?;
    let deposit = record_manager_deposit(
        &state,
        &bank_id,
        session_user.user_id(),
        amount,
        &form.note,
        date,
    )
    .await?;
    Ok(Json(json!({ "ok": true, "id": deposit.to_hex() })))
}

#[derive(Deserialize)]
pub struct WithdrawalForm {
    #[serde(deserialize_with = "de_amount")]
    amount: f64,
    purpose: String,
    #[serde(default)]
    date: Option<String>,
}

pub async fn bank_withdrawal_create(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    JsonOrForm(form): JsonOrForm<WithdrawalForm>,
) -> AppResult<Json<Value>> {
    session_user.require_any(&TREASURY)?;
    let amount = round2(form.amount);
    if amount <= 0.0 {
        return Err(AppError::validation("A positive amount is required."));
    }
    let purpose = form.purpose.trim().to_lowercase();
    if !WITHDRAWAL_PURPOSES.contains(&purpose.as_str()) {
        return Err(AppError::validation(format!(
            "Purpose must be one of: {}.",
            WITHDRAWAL_PURPOSES.join(", ")
        )));
    }
    let date = flow_date(form.date.as_deref())?;
    let bank_id = existing_account(&state, &id).await?;
    let withdrawal =
        record_bank_withdrawal(&state, &bank_id, amount, &purpose, session_user.user_id(), date)
            .await?;
    if purpose == "drawings" {
        state.report_cache.clear();
    }
    Ok(Json(json!({ "ok": true, "id": withdrawal.to_hex() })))
}

#[derive(Deserialize)]
pub struct ReconcileForm {
    #[serde(deserialize_with = "de_amount")]
    balance: f64,
}

pub async fn bank_account_reconcile(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    JsonOrForm(form): JsonOrForm<ReconcileForm>,
) -> AppResult<Json<Value>> {
    session_user.require_any(&TREASURY)?;
    let oid = require_oid(&id, "account")?;
    if !reconcile_bank_account(&state, &oid, form.balance).await? {
        return Err(AppError::not_found("Account not found."));
    }
    Ok(Json(json!({ "ok": true, "reconciled_balance": round2(form.balance) })))
}

pub async fn bank_accounts_export(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Response> {
    session_user.require_any(&TREASURY)?;
    let rows = list_bank_accounts(&state).await?;
    let bytes = render_csv(&BANK_ACCOUNTS_HEADER, rows.iter().map(BankAccountRow::csv_record))?;
    Ok(csv_response("bank_accounts.csv", bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mobile_money_form_needs_network() {
        let form: BankAccountForm = serde_json::from_str(
            r#"{"account_type":"mobile_money","account_name":"Till 2","opening_balance":"150"}"#,
        )
        .unwrap();
        let new = NewBankAccount::from(form);
        assert_eq!(new.opening_balance, 150.0);
        assert!(new.validate().unwrap_err().contains("Network"));
    }
}
