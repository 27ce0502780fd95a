// routes/payments.rs
// Agents record customer payments; listings and exports follow the caller's scope.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{
    csv_export::{csv_response, render_csv},
    error::{AppError, AppResult},
    models::{Customer, Payment, PaymentType, UserRole},
    money::{de_amount, format_plain, round2},
    period::parse_date,
    routes::helpers::{
        JsonOrForm, de_flag, non_empty, now, require_oid, scoped_agent_ids, time_str,
    },
    session::SessionUser,
    sms::{SmsStatus, first_name},
    state::{
        AppState, NewPayment, PaymentFilter, all_payments, customer_paid_total,
        find_duplicate_payments, get_agent_customer, list_payments, page_bounds, record_payment,
    },
};

#[derive(Deserialize)]
pub struct PaymentForm {
    customer_id: String,
    #[serde(deserialize_with = "de_amount")]
    amount: f64,
    #[serde(default)]
    payment_type: Option<String>,
    #[serde(default, deserialize_with = "de_flag")]
    is_susu: bool,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    product_name: Option<String>,
    #[serde(default, deserialize_with = "de_flag")]
    send_sms: bool,
    #[serde(default, deserialize_with = "de_flag")]
    force: bool,
}

#[derive(Deserialize, Default)]
pub struct PaymentsQuery {
    agent_id: Option<String>,
    payment_type: Option<String>,
    from: Option<String>,
    to: Option<String>,
    page: Option<u64>,
    per_page: Option<u64>,
}

impl PaymentForm {
    fn kind(&self) -> AppResult<PaymentType> {
        match self.payment_type.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => {
                PaymentType::parse(raw).ok_or_else(|| AppError::validation("Unknown payment type."))
            }
            None if self.is_susu => Ok(PaymentType::Susu),
            None => Ok(PaymentType::Product),
        }
    }
}

fn receipt_message(
    customer: &Customer,
    kind: PaymentType,
    amount: f64,
    total_paid: f64,
) -> String {
    let name = first_name(&customer.name);
    match kind {
        PaymentType::Susu => format!(
            "Dear {name}, we received GHS {amount:.2} for your SUSU savings. Total saved: GHS {total_paid:.2}."
        ),
        PaymentType::Product => format!(
            "Dear {name}, we received GHS {amount:.2} for your order. Total paid: GHS {total_paid:.2}. For inquiries, visit our office."
        ),
        PaymentType::Withdrawal => format!(
            "Dear {name}, GHS {amount:.2} has been paid out from your SUSU savings. Balance: GHS {total_paid:.2}."
        ),
    }
}

/// SUSU balance a customer can still withdraw.
async fn susu_balance(state: &AppState, customer_id: &mongodb::bson::oid::ObjectId) -> AppResult<f64> {
    let saved = customer_paid_total(state, customer_id, PaymentType::Susu, None).await?;
    let withdrawn = customer_paid_total(state, customer_id, PaymentType::Withdrawal, None).await?;
    Ok(round2(saved - withdrawn))
}

pub async fn payments_create(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    JsonOrForm(form): JsonOrForm<PaymentForm>,
) -> AppResult<Response> {
    session_user.require_any(&[UserRole::Agent])?;

    let kind = form.kind()?;
    let amount = round2(form.amount);
    if amount <= 0.0 {
        return Err(AppError::validation("A positive amount is required."));
    }
    let product_name = non_empty(form.product_name.as_deref());
    if kind == PaymentType::Product && product_name.is_none() {
        return Err(AppError::validation("Select the product being paid for."));
    }
    let date = match form.date.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => parse_date(raw).ok_or_else(|| AppError::validation("Invalid date."))?,
        None => now().date(),
    };
    let date_str = date.format("%Y-%m-%d").to_string();

    let customer_oid = require_oid(&form.customer_id, "customer")?;
    let customer = get_agent_customer(&state, &customer_oid, &session_user.id_hex())
        .await?
        .ok_or_else(|| AppError::not_found("Customer not found."))?;

    if kind == PaymentType::Withdrawal {
        let balance = susu_balance(&state, &customer_oid).await?;
        if amount > balance {
            return Err(AppError::Conflict {
                message: format!("Withdrawal exceeds SUSU balance of GHS {balance:.2}."),
                available: Some(balance),
            });
        }
    }

    let scope_product = if kind == PaymentType::Product {
        product_name.as_deref()
    } else {
        None
    };
    let dup = find_duplicate_payments(&state, &customer_oid, &date_str, kind, scope_product).await?;
    if dup.count > 0 && !form.force {
        return Ok((
            StatusCode::CONFLICT,
            Json(json!({
                "ok": false,
                "needs_confirm": true,
                "existing_count": dup.count,
                "existing_total": dup.total,
                "scope": dup.scope,
                "message": format!(
                    "You already recorded {} payment(s) totaling GHS {:.2} for this {} on {}. Proceed anyway?",
                    dup.count, dup.total, dup.scope, date_str
                ),
            })),
        )
            .into_response());
    }

    let payment_id = record_payment(
        &state,
        NewPayment {
            customer: customer.clone(),
            agent_id: *session_user.user_id(),
            manager_id: session_user.user().manager_id,
            amount,
            payment_type: kind,
            method: non_empty(form.method.as_deref()).unwrap_or_else(|| "cash".to_string()),
            date,
            time: time_str(),
            product_name: scope_product.map(str::to_string),
        },
    )
    .await?;
    state.report_cache.clear();

    let sms_status = if form.send_sms {
        let total = match kind {
            PaymentType::Withdrawal => susu_balance(&state, &customer_oid).await?,
            _ => customer_paid_total(&state, &customer_oid, kind, scope_product).await?,
        };
        let message = receipt_message(&customer, kind, amount, total);
        Some(state.sms.send(&customer.phone_number, &message).await)
    } else {
        None
    };

    Ok(Json(json!({
        "ok": true,
        "id": payment_id.to_hex(),
        "sms_status": sms_status,
        "message": sms_status.unwrap_or(SmsStatus::Disabled).payment_message(),
    }))
    .into_response())
}

impl PaymentsQuery {
    async fn filter(&self, state: &AppState, session: &SessionUser) -> AppResult<PaymentFilter> {
        let scope = scoped_agent_ids(state, session).await?;
        let agent_ids = match non_empty(self.agent_id.as_deref()) {
            Some(agent) => match scope {
                Some(ids) if !ids.contains(&agent) => {
                    return Err(AppError::forbidden("Agent is outside your team."));
                }
                _ => Some(vec![agent]),
            },
            None => scope,
        };
        let payment_type = match non_empty(self.payment_type.as_deref()) {
            Some(raw) => Some(
                PaymentType::parse(&raw)
                    .ok_or_else(|| AppError::validation("Unknown payment type."))?,
            ),
            None => None,
        };
        let date = |raw: &Option<String>| -> AppResult<Option<String>> {
            match non_empty(raw.as_deref()) {
                Some(d) => parse_date(&d)
                    .map(|d| Some(d.format("%Y-%m-%d").to_string()))
                    .ok_or_else(|| AppError::validation("Dates must be YYYY-MM-DD.")),
                None => Ok(None),
            }
        };
        Ok(PaymentFilter {
            agent_ids,
            payment_type,
            from: date(&self.from)?,
            to: date(&self.to)?,
        })
    }
}

fn payment_json(p: &Payment) -> Value {
    json!({
        "_id": p.id.map(|id| id.to_hex()).unwrap_or_default(),
        "customer_id": p.customer_id.to_hex(),
        "agent_id": p.agent_id,
        "amount": p.amount,
        "payment_type": p.payment_type.as_str(),
        "method": p.method,
        "date": p.date,
        "time": p.time,
        "product_name": p.product_name,
    })
}

pub async fn payments_index(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Query(q): Query<PaymentsQuery>,
) -> AppResult<Json<Value>> {
    let filter = q.filter(&state, &session_user).await?;
    let (page, per_page) = page_bounds(q.page, q.per_page);
    let (payments, total) = list_payments(&state, &filter, page, per_page).await?;
    Ok(Json(json!({
        "ok": true,
        "payments": payments.iter().map(payment_json).collect::<Vec<_>>(),
        "page": page,
        "per_page": per_page,
        "total": total,
    })))
}

pub async fn payments_export(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Query(q): Query<PaymentsQuery>,
) -> AppResult<Response> {
    let filter = q.filter(&state, &session_user).await?;
    let payments = all_payments(&state, &filter).await?;
    let bytes = render_csv(
        &[
            "Date", "Time", "Customer ID", "Agent ID", "Type", "Method", "Product", "Amount",
        ],
        payments.iter().map(|p| {
            vec![
                p.date.clone(),
                p.time.clone(),
                p.customer_id.to_hex(),
                p.agent_id.clone(),
                p.payment_type.as_str().to_string(),
                p.method.clone(),
                p.product_name.clone().unwrap_or_default(),
                format_plain(p.amount),
            ]
        }),
    )?;
    Ok(csv_response("payments.csv", bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(json: &str) -> PaymentForm {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn payment_kind_from_type_or_susu_flag() {
        let f = form(r#"{"customer_id": "x", "amount": "20", "is_susu": "yes"}"#);
        assert_eq!(f.kind().unwrap(), PaymentType::Susu);
        assert_eq!(f.amount, 20.0);
        let f = form(r#"{"customer_id": "x", "amount": 5, "payment_type": "withdrawal"}"#);
        assert_eq!(f.kind().unwrap(), PaymentType::Withdrawal);
        let f = form(r#"{"customer_id": "x", "amount": 5}"#);
        assert_eq!(f.kind().unwrap(), PaymentType::Product);
        let f = form(r#"{"customer_id": "x", "amount": 5, "payment_type": "cheque"}"#);
        assert!(f.kind().is_err());
    }

    #[test]
    fn receipt_uses_first_name() {
        let customer = Customer {
            id: None,
            name: "Akosua Mensah".into(),
            phone_number: "0241234567".into(),
            agent_id: "a".into(),
            manager_id: None,
            created_at: None,
        };
        let msg = receipt_message(&customer, PaymentType::Susu, 20.0, 140.5);
        assert_eq!(
            msg,
            "Dear Akosua, we received GHS 20.00 for your SUSU savings. Total saved: GHS 140.50."
        );
    }
}
