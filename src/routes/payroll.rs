// routes/payroll.rs
// Monthly payroll: records per employee, deductions, adjustments and the CSV sheet.

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
    csv_export::{csv_response, render_csv},
    error::{AppError, AppResult},
    models::{AdjustmentKind, PayrollRecord, UserRole},
    money::{de_amount, format_plain, round2},
    payroll::PayrollTotals,
    period::normalize_month,
    routes::helpers::{JsonOrForm, non_empty, now, render, require_oid, today_str},
    session::SessionUser,
    state::{
        AppState, PayrollInput, add_adjustment, add_deduction, employee_records, get_user_by_id,
        list_month, recompute_record, upsert_record,
    },
};

const PAYROLL_ROLES: [UserRole; 3] = [UserRole::Hr, UserRole::Executive, UserRole::Accounting];
/// Roles allowed to change payroll; accounting reads only.
const PAYROLL_EDITORS: [UserRole; 2] = [UserRole::Hr, UserRole::Executive];

const CSV_HEADER: [&str; 16] = [
    "Employee",
    "Role",
    "Branch",
    "Month",
    "Basic Salary",
    "Allowances",
    "Gross",
    "SSF Employee",
    "Taxable",
    "PAYE",
    "Deductions",
    "Net Pay",
    "Adjust Add",
    "Adjust Deduct",
    "Final Net",
    "Employer 13%",
];

fn month_or_current(raw: Option<&str>) -> AppResult<String> {
    match non_empty(raw) {
        Some(m) => normalize_month(&m).map_err(AppError::validation),
        None => Ok(now().format("%Y-%m").to_string()),
    }
}

#[derive(Deserialize, Default)]
pub struct MonthQuery {
    month: Option<String>,
    q: Option<String>,
}

#[derive(Template)]
#[template(path = "payroll/index.html")]
pub struct PayrollTemplate {
    pub month: String,
    pub search: String,
    pub records: Vec<PayrollRecord>,
    pub totals: PayrollTotals,
    pub can_edit: bool,
}

pub async fn payroll_page(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Query(q): Query<MonthQuery>,
) -> AppResult<Html<String>> {
    session_user.require_any(&PAYROLL_ROLES)?;
    let month = month_or_current(q.month.as_deref())?;
    let records = list_month(&state, &month, q.q.as_deref()).await?;
    let totals = PayrollTotals::from_records(&records);
    render(PayrollTemplate {
        month,
        search: q.q.unwrap_or_default(),
        records,
        totals,
        can_edit: session_user.has_any(&PAYROLL_EDITORS),
    })
}

pub async fn payroll_records(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Query(q): Query<MonthQuery>,
) -> AppResult<Json<Value>> {
    session_user.require_any(&PAYROLL_ROLES)?;
    let month = month_or_current(q.month.as_deref())?;
    let records = list_month(&state, &month, q.q.as_deref()).await?;
    let totals = PayrollTotals::from_records(&records);
    Ok(Json(json!({
        "ok": true,
        "month": month,
        "records": records,
        "totals": totals,
    })))
}

#[derive(Deserialize)]
pub struct RecordForm {
    employee_id: String,
    month: String,
    #[serde(default, deserialize_with = "de_amount")]
    basic_salary: f64,
    #[serde(default, deserialize_with = "de_amount")]
    allowances: f64,
    #[serde(default, deserialize_with = "de_amount")]
    paye: f64,
    #[serde(default)]
    employee_name: Option<String>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    branch: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    note: Option<String>,
}

impl RecordForm {
    fn into_input(self) -> AppResult<PayrollInput> {
        if self.basic_salary < 0.0 || self.allowances < 0.0 || self.paye < 0.0 {
            return Err(AppError::validation("Salary figures cannot be negative."));
        }
        Ok(PayrollInput {
            employee_id: self.employee_id.trim().to_string(),
            month: normalize_month(&self.month).map_err(AppError::validation)?,
            basic_salary: self.basic_salary,
            allowances: self.allowances,
            paye: self.paye,
            employee_name: self.employee_name,
            role: self.role,
            branch: self.branch,
            status: self.status,
            note: self.note,
        })
    }
}

pub async fn payroll_upsert(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    JsonOrForm(form): JsonOrForm<RecordForm>,
) -> AppResult<Json<Value>> {
    session_user.require_any(&PAYROLL_EDITORS)?;
    let input = form.into_input()?;
    let oid = require_oid(&input.employee_id, "employee")?;
    if get_user_by_id(&state, &oid).await?.is_none() {
        return Err(AppError::not_found("Employee not found."));
    }
    let record = upsert_record(&state, &input).await?;
    state.report_cache.clear();
    Ok(Json(json!({ "ok": true, "record": record })))
}

pub async fn payroll_recompute(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Path((employee_id, month)): Path<(String, String)>,
) -> AppResult<Json<Value>> {
    session_user.require_any(&PAYROLL_EDITORS)?;
    let month = normalize_month(&month).map_err(AppError::validation)?;
    let record = recompute_record(&state, &employee_id, &month)
        .await?
        .ok_or_else(|| AppError::not_found("Payroll record not found."))?;
    state.report_cache.clear();
    Ok(Json(json!({ "ok": true, "record": record })))
}

#[derive(Deserialize)]
pub struct DeductionForm {
    employee_id: String,
    month: String,
    #[serde(deserialize_with = "de_amount")]
    amount: f64,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    date: Option<String>,
}

pub async fn payroll_add_deduction(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    JsonOrForm(form): JsonOrForm<DeductionForm>,
) -> AppResult<Json<Value>> {
    session_user.require_any(&PAYROLL_EDITORS)?;
    let month = normalize_month(&form.month).map_err(AppError::validation)?;
    let amount = round2(form.amount);
    if amount <= 0.0 {
        return Err(AppError::validation("A positive amount is required."));
    }
    if form.reason.trim().is_empty() {
        return Err(AppError::validation("A reason is required."));
    }
    let date = non_empty(form.date.as_deref()).unwrap_or_else(today_str);
    let (deduction_id, record) = add_deduction(
        &state,
        form.employee_id.trim(),
        &month,
        amount,
        &form.reason,
        &date,
    )
    .await?
    .ok_or_else(|| AppError::not_found("Employee not found."))?;
    state.report_cache.clear();
    Ok(Json(json!({
        "ok": true,
        "deduction_id": deduction_id,
        "record": record,
    })))
}

#[derive(Deserialize)]
pub struct AdjustmentForm {
    employee_id: String,
    month: String,
    #[serde(rename = "type")]
    kind: AdjustmentKind,
    #[serde(deserialize_with = "de_amount")]
    amount: f64,
    #[serde(default)]
    reason: String,
}

pub async fn payroll_add_adjustment(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    JsonOrForm(form): JsonOrForm<AdjustmentForm>,
) -> AppResult<Json<Value>> {
    session_user.require_any(&PAYROLL_EDITORS)?;
    let month = normalize_month(&form.month).map_err(AppError::validation)?;
    let amount = round2(form.amount);
    if amount <= 0.0 {
        return Err(AppError::validation("A positive amount is required."));
    }
    if form.reason.trim().is_empty() {
        return Err(AppError::validation("A reason is required."));
    }
    let record = add_adjustment(
        &state,
        form.employee_id.trim(),
        &month,
        form.kind,
        amount,
        &form.reason,
        &session_user.user().username,
    )
    .await?
    .ok_or_else(|| AppError::not_found("Employee not found."))?;
    state.report_cache.clear();
    Ok(Json(json!({ "ok": true, "record": record })))
}

pub async fn payroll_employee(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    session_user.require_any(&PAYROLL_ROLES)?;
    let oid = require_oid(&id, "employee")?;
    let records = employee_records(&state, &oid).await?;
    Ok(Json(json!({
        "ok": true,
        "employee_id": id,
        "records": records,
    })))
}

fn csv_row(r: &PayrollRecord) -> Vec<String> {
    vec![
        r.employee_name.clone(),
        r.role.clone(),
        r.branch.clone(),
        r.month.clone(),
        format_plain(r.basic_salary),
        format_plain(r.allowances),
        format_plain(r.gross),
        format_plain(r.ssf_employee),
        format_plain(r.taxable),
        format_plain(r.paye),
        format_plain(r.deductions_total),
        format_plain(r.net_pay),
        format_plain(r.adjust_add),
        format_plain(r.adjust_deduct),
        format_plain(r.final_net),
        format_plain(r.employer_13),
    ]
}

pub async fn payroll_export(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Query(q): Query<MonthQuery>,
) -> AppResult<Response> {
    session_user.require_any(&PAYROLL_ROLES)?;
    let month = month_or_current(q.month.as_deref())?;
    let records = list_month(&state, &month, q.q.as_deref()).await?;
    let bytes = render_csv(&CSV_HEADER, records.iter().map(csv_row))?;
    Ok(csv_response(&format!("payroll_{month}.csv"), bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_form_validates_month() {
        let form: RecordForm = serde_json::from_str(
            r#"{"employee_id":"abc","month":"2024-13","basic_salary":"1000"}"#,
        )
        .unwrap();
        assert!(form.into_input().is_err());

        let form: RecordForm = serde_json::from_str(
            r#"{"employee_id":" abc ","month":"2024-05","basic_salary":"1,000","allowances":200}"#,
        )
        .unwrap();
        let input = form.into_input().unwrap();
        assert_eq!(input.employee_id, "abc");
        assert_eq!(input.basic_salary, 1000.0);
        assert_eq!(input.allowances, 200.0);
    }

    #[test]
    fn adjustment_type_is_lowercase() {
        let form: AdjustmentForm = serde_json::from_str(
            r#"{"employee_id":"a","month":"2024-05","type":"deduct","amount":"50","reason":"advance"}"#,
        )
        .unwrap();
        assert_eq!(form.kind, AdjustmentKind::Deduct);
    }

    #[test]
    fn csv_row_matches_header() {
        let mut r = PayrollRecord::blank("e1", "2024-05");
        r.employee_name = "Ama".into();
        r.basic_salary = 1000.0;
        let row = csv_row(&r);
        assert_eq!(row.len(), CSV_HEADER.len());
        assert_eq!(row[4], "1000.00");
    }
}
