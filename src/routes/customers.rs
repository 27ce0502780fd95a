// routes/customers.rs
// Customer directory: agents register customers, everyone else reads within their scope.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
    response::Response,
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{
    csv_export::{csv_response, render_csv},
    error::{AppError, AppResult},
    models::{Customer, UserRole},
    routes::helpers::{JsonOrForm, scoped_agent_ids},
    session::SessionUser,
    sms::normalize_phone,
    state::{AppState, CustomerFilter, all_customers, create_customer, list_customers, page_bounds},
};

#[derive(Deserialize, Default)]
pub struct CustomersQuery {
    q: Option<String>,
    page: Option<u64>,
    per_page: Option<u64>,
}

#[derive(Deserialize)]
pub struct CustomerForm {
    name: String,
    #[serde(default)]
    phone_number: String,
}

fn customer_json(c: &Customer) -> Value {
    json!({
        "_id": c.id.map(|id| id.to_hex()).unwrap_or_default(),
        "name": c.name,
        "phone_number": c.phone_number,
        "agent_id": c.agent_id,
        "created_at": c.created_at.and_then(|d| d.try_to_rfc3339_string().ok()),
    })
}

pub async fn customers_index(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Query(q): Query<CustomersQuery>,
) -> AppResult<Json<Value>> {
    let filter = CustomerFilter {
        agent_ids: scoped_agent_ids(&state, &session_user).await?,
        q: q.q,
    };
    let (page, per_page) = page_bounds(q.page, q.per_page);
    let (customers, total) = list_customers(&state, &filter, page, per_page).await?;
    Ok(Json(json!({
        "ok": true,
        "customers": customers.iter().map(customer_json).collect::<Vec<_>>(),
        "page": page,
        "per_page": per_page,
        "total": total,
    })))
}

pub async fn customers_create(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    JsonOrForm(form): JsonOrForm<CustomerForm>,
) -> AppResult<Json<Value>> {
    session_user.require_any(&[UserRole::Agent])?;
    if form.name.trim().is_empty() {
        return Err(AppError::validation("Customer name is required."));
    }
    let phone = form.phone_number.trim();
    if !phone.is_empty() && normalize_phone(phone).is_none() {
        return Err(AppError::validation("Phone number is not valid."));
    }

    let agent = session_user.user();
    let id = create_customer(
        &state,
        &form.name,
        phone,
        session_user.user_id(),
        agent.manager_id,
    )
    .await?;
    tracing::info!(customer = %id, agent = %agent.username, "customer created");
    Ok(Json(json!({ "ok": true, "id": id.to_hex() })))
}

pub async fn customers_export(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Query(q): Query<CustomersQuery>,
) -> AppResult<Response> {
    let filter = CustomerFilter {
        agent_ids: scoped_agent_ids(&state, &session_user).await?,
        q: q.q,
    };
    let customers = all_customers(&state, &filter).await?;
    let bytes = render_csv(
        &["Customer ID", "Name", "Phone", "Agent ID", "Created"],
        customers.iter().map(|c| {
            vec![
                c.id.map(|id| id.to_hex()).unwrap_or_default(),
                c.name.clone(),
                c.phone_number.clone(),
                c.agent_id.clone(),
                c.created_at
                    .map(|d| d.to_chrono().format("%Y-%m-%d").to_string())
                    .unwrap_or_default(),
            ]
        }),
    )?;
    Ok(csv_response("customers.csv", bytes))
}
