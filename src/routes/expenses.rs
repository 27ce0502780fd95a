// routes/expenses.rs
// Manager expense claims and their review, plus the accounting journal forms
// (expenses, stock purchases, returns, other income).

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{
    error::{AppError, AppResult},
    models::{ExpenseStatus, ManagerExpense, UserRole},
    money::{de_amount, format_money, round2},
    period::{PeriodQuery, parse_date, parse_period},
    routes::helpers::{JsonOrForm, non_empty, now, require_oid, time_str},
    session::SessionUser,
    state::{
        AppState, BranchRef, ExpenseFilter, create_accounting_expense, create_income_entry,
        create_manager_expense, create_return_inward, create_return_outward, create_stock_entry,
        get_user_by_id, list_accounting_expenses, list_manager_expenses, manager_expense_stats,
        review_manager_expense,
    },
};

const REVIEWERS: [UserRole; 3] = [UserRole::Admin, UserRole::Executive, UserRole::Accounting];
const JOURNAL: [UserRole; 2] = [UserRole::Accounting, UserRole::Executive];

fn entry_date(raw: Option<&str>) -> AppResult<NaiveDate> {
    match non_empty(raw) {
        Some(raw) => parse_date(&raw).ok_or_else(|| AppError::validation("Invalid date.")),
        None => Ok(now().date()),
    }
}

fn positive(amount: f64) -> AppResult<f64> {
    let amount = round2(amount);
    if amount <= 0.0 {
        return Err(AppError::validation("A positive amount is required."));
    }
    Ok(amount)
}

fn expense_json(e: &ManagerExpense) -> Value {
    json!({
        "_id": e.id.map(|id| id.to_hex()).unwrap_or_default(),
        "manager_id": e.manager_id.to_hex(),
        "category": e.category,
        "amount": e.amount,
        "status": e.status.as_str(),
        "description": e.description,
        "date": e.date,
        "time": e.time,
    })
}

#[derive(Deserialize)]
pub struct ManagerExpenseForm {
    category: String,
    #[serde(deserialize_with = "de_amount")]
    amount: f64,
    #[serde(default)]
    description: String,
    #[serde(default)]
    date: Option<String>,
}

pub async fn manager_expense_create(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    JsonOrForm(form): JsonOrForm<ManagerExpenseForm>,
) -> AppResult<Json<Value>> {
    session_user.require_any(&[UserRole::Manager])?;
    let category = non_empty(Some(&form.category))
        .ok_or_else(|| AppError::validation("Category is required."))?;
    let amount = positive(form.amount)?;
    let date = entry_date(form.date.as_deref())?;
    let id = create_manager_expense(
        &state,
        session_user.user_id(),
        date,
        &time_str(),
        &category,
        amount,
        &form.description,
    )
    .await?;
    Ok(Json(json!({
        "ok": true,
        "id": id.to_hex(),
        "status": ExpenseStatus::Unapproved.as_str(),
    })))
}

#[derive(Deserialize, Default)]
pub struct ExpensesQuery {
    manager_id: Option<String>,
    status: Option<String>,
    #[serde(flatten)]
    period: PeriodQuery,
}

impl ExpensesQuery {
    fn filter(&self, session: &SessionUser) -> AppResult<ExpenseFilter> {
        let manager_ids = match session.role() {
            UserRole::Manager => Some(vec![*session.user_id()]),
            UserRole::Admin | UserRole::Executive | UserRole::Accounting => {
                match non_empty(self.manager_id.as_deref()) {
                    Some(raw) => Some(vec![require_oid(&raw, "manager")?]),
                    None => None,
                }
            }
            _ => return Err(AppError::forbidden("You do not have access to this page.")),
        };
        let status = match non_empty(self.status.as_deref()) {
            Some(raw) => Some(
                ExpenseStatus::parse(&raw)
                    .ok_or_else(|| AppError::validation("Unknown expense status."))?,
            ),
            None => None,
        };
        let period = parse_period(&self.period, now());
        Ok(ExpenseFilter {
            manager_ids,
            status,
            start: Some(period.start),
            end: Some(period.end),
        })
    }
}

pub async fn manager_expenses_index(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Query(q): Query<ExpensesQuery>,
) -> AppResult<Json<Value>> {
    let filter = q.filter(&session_user)?;
    let rows = list_manager_expenses(&state, &filter).await?;
    let (total, by_category) = manager_expense_stats(&state, &filter).await?;
    Ok(Json(json!({
        "ok": true,
        "expenses": rows.iter().map(expense_json).collect::<Vec<_>>(),
        "total": total,
        "total_display": format_money(total),
        "by_category": by_category,
    })))
}

async fn review(
    session_user: SessionUser,
    state: Arc<AppState>,
    id: String,
    decision: ExpenseStatus,
) -> AppResult<Json<Value>> {
    session_user.require_any(&REVIEWERS)?;
    let oid = require_oid(&id, "expense")?;
    if !review_manager_expense(&state, &oid, decision, session_user.user()).await? {
        return Err(AppError::conflict(
            "Expense not found or it can no longer change to that status.",
        ));
    }
    state.report_cache.clear();
    Ok(Json(json!({ "ok": true, "status": decision.as_str() })))
}

pub async fn manager_expense_approve(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    review(session_user, state, id, ExpenseStatus::Approved).await
}

pub async fn manager_expense_reject(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    review(session_user, state, id, ExpenseStatus::Rejected).await
}

/// Branch fields sent with the accounting forms.
#[derive(Deserialize, Default)]
pub struct BranchFields {
    #[serde(default)]
    branch_id: Option<String>,
    #[serde(default)]
    branch_name: Option<String>,
}

impl BranchFields {
    fn into_ref(self) -> BranchRef {
        BranchRef {
            branch_id: non_empty(self.branch_id.as_deref()),
            branch_name: non_empty(self.branch_name.as_deref()),
        }
    }
}

#[derive(Deserialize)]
pub struct AccountingExpenseForm {
    category: String,
    #[serde(deserialize_with = "de_amount")]
    amount: f64,
    #[serde(default)]
    description: String,
    /// Manager whose branch the expense is booked against.
    #[serde(default)]
    manager_id: Option<String>,
    #[serde(default)]
    date: Option<String>,
}

pub async fn accounting_expense_create(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    JsonOrForm(form): JsonOrForm<AccountingExpenseForm>,
) -> AppResult<Json<Value>> {
    session_user.require_any(&JOURNAL)?;
    let category = non_empty(Some(&form.category))
        .ok_or_else(|| AppError::validation("Category is required."))?;
    let amount = positive(form.amount)?;
    let date = entry_date(form.date.as_deref())?;
    let branch = match non_empty(form.manager_id.as_deref()) {
        Some(raw) => {
            let oid = require_oid(&raw, "manager")?;
            Some(
                get_user_by_id(&state, &oid)
                    .await?
                    .ok_or_else(|| AppError::not_found("Manager not found."))?,
            )
        }
        None => None,
    };
    let id = create_accounting_expense(
        &state,
        &category,
        amount,
        &form.description,
        branch.as_ref(),
        date,
    )
    .await?;
    state.report_cache.clear();
    Ok(Json(json!({ "ok": true, "id": id.to_hex() })))
}

pub async fn accounting_expenses_index(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Query(q): Query<PeriodQuery>,
) -> AppResult<Json<Value>> {
    session_user.require_any(&REVIEWERS)?;
    let period = parse_period(&q, now());
    let rows = list_accounting_expenses(&state, period.start, period.end).await?;
    let total = round2(rows.iter().map(|r| r.amount).sum());
    Ok(Json(json!({
        "ok": true,
        "label": period.label,
        "from": period.from,
        "to": period.to,
        "expenses": rows.iter().map(|e| json!({
            "_id": e.id.map(|id| id.to_hex()).unwrap_or_default(),
            "category": e.category,
            "amount": e.amount,
            "description": e.description,
            "branch_name": e.branch_name,
            "date": e.date_dt.to_chrono().format("%Y-%m-%d").to_string(),
        })).collect::<Vec<_>>(),
        "total": total,
    })))
}

#[derive(Deserialize)]
pub struct StockEntryForm {
    product_name: String,
    #[serde(deserialize_with = "de_amount")]
    quantity: f64,
    #[serde(deserialize_with = "de_amount")]
    unit_price: f64,
    #[serde(default)]
    date: Option<String>,
    #[serde(flatten)]
    branch: BranchFields,
}

/// Stock purchase; feeds purchases in the cost of sales.
pub async fn stock_entry_create(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    JsonOrForm(form): JsonOrForm<StockEntryForm>,
) -> AppResult<Json<Value>> {
    session_user.require_any(&JOURNAL)?;
    let product = non_empty(Some(&form.product_name))
        .ok_or_else(|| AppError::validation("Product name is required."))?;
    if form.quantity <= 0.0 || form.unit_price < 0.0 {
        return Err(AppError::validation(
            "Quantity must be positive and unit price cannot be negative.",
        ));
    }
    let date = entry_date(form.date.as_deref())?;
    let id = create_stock_entry(
        &state,
        &product,
        form.quantity,
        form.unit_price,
        form.branch.into_ref(),
        date,
    )
    .await?;
    state.report_cache.clear();
    Ok(Json(json!({
        "ok": true,
        "id": id.to_hex(),
        "total_cost": round2(form.quantity * form.unit_price),
    })))
}

#[derive(Deserialize)]
pub struct ReturnInwardForm {
    #[serde(deserialize_with = "de_amount")]
    amount: f64,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    date: Option<String>,
    #[serde(flatten)]
    branch: BranchFields,
}

pub async fn return_inward_create(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    JsonOrForm(form): JsonOrForm<ReturnInwardForm>,
) -> AppResult<Json<Value>> {
    session_user.require_any(&JOURNAL)?;
    let amount = positive(form.amount)?;
    let date = entry_date(form.date.as_deref())?;
    let id = create_return_inward(&state, amount, &form.reason, form.branch.into_ref(), date).await?;
    state.report_cache.clear();
    Ok(Json(json!({ "ok": true, "id": id.to_hex() })))
}

#[derive(Deserialize)]
pub struct ReturnOutwardForm {
    #[serde(deserialize_with = "de_amount")]
    total_cost: f64,
    #[serde(default)]
    supplier: String,
    #[serde(default)]
    date: Option<String>,
    #[serde(flatten)]
    branch: BranchFields,
}

pub async fn return_outward_create(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    JsonOrForm(form): JsonOrForm<ReturnOutwardForm>,
) -> AppResult<Json<Value>> {
    session_user.require_any(&JOURNAL)?;
    let amount = positive(form.total_cost)?;
    let date = entry_date(form.date.as_deref())?;
    let id =
        create_return_outward(&state, amount, &form.supplier, form.branch.into_ref(), date).await?;
    state.report_cache.clear();
    Ok(Json(json!({ "ok": true, "id": id.to_hex() })))
}

#[derive(Deserialize)]
pub struct IncomeForm {
    category: String,
    #[serde(deserialize_with = "de_amount")]
    amount: f64,
    #[serde(default)]
    date: Option<String>,
    #[serde(flatten)]
    branch: BranchFields,
}

/// Other income: interest, rent or any other category.
pub async fn income_entry_create(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    JsonOrForm(form): JsonOrForm<IncomeForm>,
) -> AppResult<Json<Value>> {
    session_user.require_any(&JOURNAL)?;
    let category = non_empty(Some(&form.category))
        .ok_or_else(|| AppError::validation("Category is required."))?;
    let amount = positive(form.amount)?;
    let date = entry_date(form.date.as_deref())?;
    let id = create_income_entry(&state, &category, amount, form.branch.into_ref(), date).await?;
    state.report_cache.clear();
    Ok(Json(json!({ "ok": true, "id": id.to_hex() })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_date_defaults_to_today() {
        assert_eq!(entry_date(None).unwrap(), now().date());
        assert_eq!(
            entry_date(Some("2024-03-09")).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 9).unwrap()
        );
        assert!(entry_date(Some("09/03/2024")).is_err());
    }

    #[test]
    fn amounts_must_be_positive() {
        assert_eq!(positive(12.345).unwrap(), 12.35);
        assert!(positive(0.0).is_err());
        assert!(positive(-3.0).is_err());
    }

    #[test]
    fn branch_fields_drop_blanks() {
        let f: StockEntryForm = serde_json::from_str(
            r#"{"product_name":"Rice","quantity":"4","unit_price":"12.5","branch_name":" Kumasi ","branch_id":""}"#,
        )
        .unwrap();
        let branch = f.branch.into_ref();
        assert_eq!(branch.branch_name.as_deref(), Some("Kumasi"));
        assert_eq!(branch.branch_id, None);
    }
}
