use std::collections::HashMap;

use anyhow::{Context, Result};
use futures::stream::TryStreamExt;
use mongodb::bson::{self, DateTime, Document, doc, oid::ObjectId};

use crate::models::{
    AdjustmentKind, DeductionLine, PayrollAdjustment, PayrollAudit, PayrollDeduction,
    PayrollRecord, User,
};
use crate::money::round2;
use crate::payroll::{PayrollFigures, sum_deductions};

use super::{AppState, get_user_by_id, list_users, parse_oid};

#[derive(Debug, Clone, Default)]
pub struct PayrollInput {
    pub employee_id: String,
    pub month: String,
    pub basic_salary: f64,
    pub allowances: f64,
    pub paye: f64,
    pub employee_name: Option<String>,
    pub role: Option<String>,
    pub branch: Option<String>,
    pub status: Option<String>,
    pub note: Option<String>,
}

/// Best-effort audit row; failures are logged.
pub async fn audit_payroll(state: &AppState, action: &str, entity_id: &str, meta: Document) {
    let row = PayrollAudit {
        id: None,
        action: action.to_string(),
        entity: "payroll_record".to_string(),
        entity_id: entity_id.to_string(),
        meta,
        created_at: DateTime::now(),
    };
    if let Err(err) = state.payroll_audit.insert_one(row).await {
        tracing::warn!(action, entity_id, error = %err, "payroll audit write failed");
    }
}

fn entity_key(employee_id: &str, month: &str) -> String {
    format!("{employee_id}:{month}")
}

pub async fn load_deductions(
    state: &AppState,
    employee_id: &str,
    month: &str,
) -> Result<Vec<DeductionLine>> {
    let mut cursor = state
        .payroll_deductions
        .find(doc! { "employee_id": employee_id, "month": month })
        .sort(doc! { "created_at": 1 })
        .await?;
    let mut lines = Vec::new();
    while let Some(d) = cursor.try_next().await? {
        lines.push(DeductionLine {
            deduction_id: d.id.map(|id| id.to_hex()).unwrap_or_default(),
            amount: round2(d.amount),
            reason: d.reason,
            date: d.date,
        });
    }
    Ok(lines)
}

pub async fn find_record(
    state: &AppState,
    employee_id: &str,
    month: &str,
) -> Result<Option<PayrollRecord>> {
    Ok(state
        .payroll_records
        .find_one(doc! { "employee_id": employee_id, "month": month })
        .await?)
}

async fn employee(state: &AppState, employee_id: &str) -> Result<Option<User>> {
    match parse_oid(employee_id) {
        Some(oid) => get_user_by_id(state, &oid).await,
        None => Ok(None),
    }
}

fn figures_document(figures: &PayrollFigures, deductions: &[DeductionLine]) -> Result<Document> {
    let mut set = bson::to_document(figures)?;
    set.insert("deductions", bson::to_bson(deductions)?);
    set.insert("updated_at", DateTime::now());
    Ok(set)
}

/// Saves the inputs for (employee, month) and recomputes every figure.
/// Deductions and earlier adjustments are carried into the computation.
pub async fn upsert_record(state: &AppState, input: &PayrollInput) -> Result<PayrollRecord> {
    let existing = find_record(state, &input.employee_id, &input.month).await?;
    let user = employee(state, &input.employee_id).await?;
    let deductions = load_deductions(state, &input.employee_id, &input.month).await?;
    let adjustments = existing
        .as_ref()
        .map(|r| r.adjustments.clone())
        .unwrap_or_default();

    let figures = PayrollFigures::compute(
        input.basic_salary,
        input.allowances,
        input.paye,
        sum_deductions(&deductions),
        &adjustments,
    );

    let pick = |given: &Option<String>, from_existing: Option<&str>, from_user: Option<String>| {
        given
            .clone()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| from_existing.map(str::to_string).filter(|s| !s.is_empty()))
            .or(from_user)
            .unwrap_or_default()
    };
    let name = pick(
        &input.employee_name,
        existing.as_ref().map(|r| r.employee_name.as_str()),
        user.as_ref().map(|u| u.display_name()),
    );
    let role = pick(
        &input.role,
        existing.as_ref().map(|r| r.role.as_str()),
        user.as_ref().map(|u| u.role.as_str().to_string()),
    );
    let branch = pick(
        &input.branch,
        existing.as_ref().map(|r| r.branch.as_str()),
        user.as_ref().and_then(|u| u.branch_name.clone()),
    );
    let status = pick(&input.status, existing.as_ref().map(|r| r.status.as_str()), None);
    let note = pick(&input.note, existing.as_ref().map(|r| r.note.as_str()), None);

    let mut set = figures_document(&figures, &deductions)?;
    set.insert("employee_id", input.employee_id.as_str());
    set.insert("month", input.month.as_str());
    set.insert("employee_name", name.trim());
    set.insert("role", role.trim());
    set.insert("branch", branch.trim());
    set.insert("status", status.trim());
    set.insert("note", note.trim());

    state
        .payroll_records
        .update_one(
            doc! { "employee_id": &input.employee_id, "month": &input.month },
            doc! { "$set": set, "$setOnInsert": { "created_at": DateTime::now(), "adjustments": [] } },
        )
        .upsert(true)
        .await?;

    let key = entity_key(&input.employee_id, &input.month);
    audit_payroll(
        state,
        "payroll_created",
        &key,
        doc! { "basic_salary": figures.basic_salary, "final_net": figures.final_net },
    )
    .await;
    tracing::info!(record = %key, gross = figures.gross, final_net = figures.final_net, "payroll record saved");

    find_record(state, &input.employee_id, &input.month)
        .await?
        .context("payroll record missing after upsert")
}

/// Creates a zeroed record for a known employee. Returns None when neither a record
/// nor the employee exists.
pub async fn ensure_record(
    state: &AppState,
    employee_id: &str,
    month: &str,
) -> Result<Option<PayrollRecord>> {
    if let Some(rec) = find_record(state, employee_id, month).await? {
        return Ok(Some(rec));
    }
    let Some(user) = employee(state, employee_id).await? else {
        return Ok(None);
    };
    let mut rec = PayrollRecord::blank(employee_id, month);
    rec.employee_name = user.display_name();
    rec.role = user.role.as_str().to_string();
    rec.branch = user.branch_name.clone().unwrap_or_default();
    rec.created_at = Some(DateTime::now());
    rec.updated_at = rec.created_at;

    match state.payroll_records.insert_one(rec).await {
        Ok(_) => audit_payroll(state, "payroll_created", &entity_key(employee_id, month), doc! {}).await,
        // Lost a race with another writer; the unique index kept one record.
        Err(err) if err.to_string().contains("E11000") => {}
        Err(err) => return Err(err.into()),
    }
    find_record(state, employee_id, month).await
}

/// Reloads deductions and recomputes every figure from the stored inputs.
pub async fn recompute_record(
    state: &AppState,
    employee_id: &str,
    month: &str,
) -> Result<Option<PayrollRecord>> {
    let Some(mut rec) = find_record(state, employee_id, month).await? else {
        return Ok(None);
    };
    let deductions = load_deductions(state, employee_id, month).await?;
    let figures = PayrollFigures::compute(
        rec.basic_salary,
        rec.allowances,
        rec.paye,
        sum_deductions(&deductions),
        &rec.adjustments,
    );
    let set = figures_document(&figures, &deductions)?;
    state
        .payroll_records
        .update_one(
            doc! { "employee_id": employee_id, "month": month },
            doc! { "$set": set },
        )
        .await?;

    figures.apply_to(&mut rec);
    rec.deductions = deductions;
    tracing::debug!(employee_id, month, final_net = rec.final_net, "payroll recomputed");
    Ok(Some(rec))
}

/// Appends a deduction and recomputes. Returns None when the employee is unknown.
pub async fn add_deduction(
    state: &AppState,
    employee_id: &str,
    month: &str,
    amount: f64,
    reason: &str,
    date: &str,
) -> Result<Option<(String, PayrollRecord)>> {
    if ensure_record(state, employee_id, month).await?.is_none() {
        return Ok(None);
    }
    let res = state
        .payroll_deductions
        .insert_one(PayrollDeduction {
            id: None,
            employee_id: employee_id.to_string(),
            month: month.to_string(),
            amount: round2(amount),
            reason: reason.trim().to_string(),
            date: date.to_string(),
            created_at: DateTime::now(),
        })
        .await?;
    let deduction_id = res
        .inserted_id
        .as_object_id()
        .map(|id| id.to_hex())
        .context("deduction insert missing _id")?;

    let rec = recompute_record(state, employee_id, month)
        .await?
        .context("payroll record vanished during deduction")?;
    audit_payroll(
        state,
        "deduction_added",
        &entity_key(employee_id, month),
        doc! { "deduction_id": &deduction_id, "amount": round2(amount), "reason": reason.trim() },
    )
    .await;
    Ok(Some((deduction_id, rec)))
}

pub async fn add_adjustment(
    state: &AppState,
    employee_id: &str,
    month: &str,
    kind: AdjustmentKind,
    amount: f64,
    reason: &str,
    by: &str,
) -> Result<Option<PayrollRecord>> {
    if ensure_record(state, employee_id, month).await?.is_none() {
        return Ok(None);
    }
    let adjustment = PayrollAdjustment {
        kind,
        amount: round2(amount),
        reason: reason.trim().to_string(),
        by: by.to_string(),
        at: Some(DateTime::now()),
    };
    state
        .payroll_records
        .update_one(
            doc! { "employee_id": employee_id, "month": month },
            doc! { "$push": { "adjustments": bson::to_bson(&adjustment)? } },
        )
        .await?;
    let rec = recompute_record(state, employee_id, month).await?;
    audit_payroll(
        state,
        "adjustment_added",
        &entity_key(employee_id, month),
        doc! { "type": bson::to_bson(&kind)?, "amount": adjustment.amount, "reason": &adjustment.reason },
    )
    .await;
    Ok(rec)
}

/// Month listing: every user (with a zeroed row when unpaid) plus records of users
/// no longer in the directory, sorted by name.
pub async fn list_month(
    state: &AppState,
    month: &str,
    search: Option<&str>,
) -> Result<Vec<PayrollRecord>> {
    let mut by_employee: HashMap<String, PayrollRecord> = records_for_months(state, &[month.to_string()])
        .await?
        .into_iter()
        .map(|r| (r.employee_id.clone(), r))
        .collect();

    let needle = search.map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty());
    let matches = |name: &str, role: &str, branch: &str| match &needle {
        Some(n) => [name, role, branch].iter().any(|f| f.to_lowercase().contains(n.as_str())),
        None => true,
    };

    let mut rows = Vec::new();
    for user in list_users(state, None).await? {
        let uid = user.id_hex();
        let rec = by_employee.remove(&uid).unwrap_or_else(|| {
            let mut blank = PayrollRecord::blank(&uid, month);
            blank.employee_name = user.display_name();
            blank.role = user.role.as_str().to_string();
            blank.branch = user.branch_name.clone().unwrap_or_default();
            blank
        });
        if matches(&rec.employee_name, &rec.role, &rec.branch) {
            rows.push(rec);
        }
    }
    rows.extend(
        by_employee
            .into_values()
            .filter(|r| matches(&r.employee_name, &r.role, &r.branch)),
    );
    rows.sort_by_key(|r| r.employee_name.to_lowercase());
    Ok(rows)
}

pub async fn records_for_months(state: &AppState, months: &[String]) -> Result<Vec<PayrollRecord>> {
    let mut cursor = state
        .payroll_records
        .find(doc! { "month": { "$in": months } })
        .await?;
    let mut rows = Vec::new();
    while let Some(r) = cursor.try_next().await? {
        rows.push(r);
    }
    Ok(rows)
}

pub async fn employee_records(state: &AppState, employee_id: &ObjectId) -> Result<Vec<PayrollRecord>> {
    let mut cursor = state
        .payroll_records
        .find(doc! { "employee_id": employee_id.to_hex() })
        .sort(doc! { "month": -1 })
        .await?;
    let mut rows = Vec::new();
    while let Some(r) = cursor.try_next().await? {
        rows.push(r);
    }
    Ok(rows)
}
