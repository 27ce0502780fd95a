// routes/inventory.rs
// Manager stock: items, instant sales, owner drawings and the year-end snapshot.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{
    error::{AppError, AppResult},
    models::{InventoryItem, UserRole},
    money::{de_amount, de_opt_amount, format_money, round2},
    period::parse_date,
    routes::helpers::{JsonOrForm, non_empty, now, require_oid},
    session::SessionUser,
    state::{
        AppState, ClosingOutcome, StockMove, bson_date, create_item, create_stock_closing,
        goods_drawn, instant_sale, list_items, parse_oid, set_item_qty,
    },
};

const STOCK_ADMINS: [UserRole; 3] = [UserRole::Admin, UserRole::Executive, UserRole::Accounting];

fn item_json(item: &InventoryItem) -> Value {
    json!({
        "_id": item.id.map(|id| id.to_hex()).unwrap_or_default(),
        "manager_id": item.manager_id.to_hex(),
        "name": item.name,
        "qty": item.qty,
        "cost_price": item.cost_price,
        "selling_price": item.selling_price,
        "stock_value": round2(item.qty.max(0.0) * item.cost_price),
        "branch_name": item.branch_name,
    })
}

fn stock_move_result(outcome: StockMove, what: &str) -> AppResult<(InventoryItem, f64, f64)> {
    match outcome {
        StockMove::Done { item, qty, value } => Ok((item, qty, value)),
        StockMove::NotFound => Err(AppError::not_found("Product not found.")),
        StockMove::Insufficient { available } => Err(AppError::Conflict {
            message: format!("Not enough stock for this {what}. Available: {available}"),
            available: Some(available),
        }),
    }
}

#[derive(Deserialize, Default)]
pub struct ItemsQuery {
    manager_id: Option<String>,
}

pub async fn items_index(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Query(q): Query<ItemsQuery>,
) -> AppResult<Json<Value>> {
    let manager = match session_user.role() {
        UserRole::Manager => Some(*session_user.user_id()),
        UserRole::Admin | UserRole::Executive | UserRole::Accounting => {
            non_empty(q.manager_id.as_deref()).and_then(|raw| parse_oid(&raw))
        }
        _ => return Err(AppError::forbidden("You do not have access to this page.")),
    };
    let items = list_items(&state, manager.as_ref()).await?;
    let total_value = round2(items.iter().map(|i| i.qty.max(0.0) * i.cost_price).sum());
    Ok(Json(json!({
        "ok": true,
        "items": items.iter().map(item_json).collect::<Vec<_>>(),
        "total_value": format_money(total_value),
    })))
}

#[derive(Deserialize)]
pub struct ItemForm {
    name: String,
    #[serde(default, deserialize_with = "de_amount")]
    qty: f64,
    #[serde(default, deserialize_with = "de_amount")]
    cost_price: f64,
    #[serde(default, deserialize_with = "de_amount")]
    selling_price: f64,
}

pub async fn items_create(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    JsonOrForm(form): JsonOrForm<ItemForm>,
) -> AppResult<Json<Value>> {
    session_user.require_any(&[UserRole::Manager])?;
    if form.name.trim().is_empty() {
        return Err(AppError::validation("Product name is required."));
    }
    if form.qty < 0.0 || form.cost_price < 0.0 || form.selling_price < 0.0 {
        return Err(AppError::validation("Quantities and prices cannot be negative."));
    }
    let id = create_item(
        &state,
        session_user.user(),
        &form.name,
        form.qty,
        form.cost_price,
        form.selling_price,
    )
    .await?;
    state.report_cache.clear();
    Ok(Json(json!({ "ok": true, "id": id.to_hex() })))
}

#[derive(Deserialize)]
pub struct QtyForm {
    #[serde(deserialize_with = "de_amount")]
    qty: f64,
}

pub async fn items_set_qty(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    JsonOrForm(form): JsonOrForm<QtyForm>,
) -> AppResult<Json<Value>> {
    let owner = match session_user.role() {
        UserRole::Manager => Some(*session_user.user_id()),
        UserRole::Admin | UserRole::Executive => None,
        _ => return Err(AppError::forbidden("You do not have access to this page.")),
    };
    if form.qty < 0.0 {
        return Err(AppError::validation("Quantity cannot be negative."));
    }
    let oid = require_oid(&id, "product")?;
    if !set_item_qty(&state, &oid, owner.as_ref(), form.qty).await? {
        return Err(AppError::not_found("Product not found."));
    }
    state.report_cache.clear();
    Ok(Json(json!({ "ok": true, "qty": form.qty })))
}

#[derive(Deserialize)]
pub struct SaleForm {
    product_id: String,
    #[serde(deserialize_with = "de_amount")]
    qty: f64,
    #[serde(default, deserialize_with = "de_opt_amount")]
    unit_price: Option<f64>,
}

pub async fn instant_sale_create(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    JsonOrForm(form): JsonOrForm<SaleForm>,
) -> AppResult<Json<Value>> {
    session_user.require_any(&[UserRole::Manager])?;
    if form.qty <= 0.0 {
        return Err(AppError::validation("A positive quantity is required."));
    }
    let product_id = require_oid(&form.product_id, "product")?;
    let outcome = instant_sale(
        &state,
        session_user.user(),
        &product_id,
        form.qty,
        form.unit_price,
    )
    .await?;
    let (item, qty, value) = stock_move_result(outcome, "sale")?;
    state.report_cache.clear();
    Ok(Json(json!({
        "ok": true,
        "message": format!("Sold {qty} x {} for GHS {}.", item.name, format_money(value)),
        "remaining_qty": item.qty,
        "total_amount": value,
    })))
}

#[derive(Deserialize)]
pub struct GoodsDrawnForm {
    product_id: String,
    #[serde(deserialize_with = "de_amount")]
    qty: f64,
    #[serde(default, deserialize_with = "de_opt_amount")]
    unit_cost: Option<f64>,
    #[serde(default)]
    memo: Option<String>,
    #[serde(default)]
    date: Option<String>,
}

/// Owner drawing of goods, valued at cost.
pub async fn goods_drawn_create(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    JsonOrForm(form): JsonOrForm<GoodsDrawnForm>,
) -> AppResult<Json<Value>> {
    session_user.require_any(&STOCK_ADMINS)?;
    if form.qty <= 0.0 {
        return Err(AppError::validation("A positive quantity is required."));
    }
    let date = match non_empty(form.date.as_deref()) {
        Some(raw) => parse_date(&raw).ok_or_else(|| AppError::validation("Invalid date."))?,
        None => now().date(),
    };
    let product_id = require_oid(&form.product_id, "product")?;
    let outcome = goods_drawn(
        &state,
        &product_id,
        form.qty,
        form.unit_cost.filter(|c| *c >= 0.0),
        form.memo.as_deref().unwrap_or_default(),
        bson_date(date),
    )
    .await?;
    let (item, qty, value) = stock_move_result(outcome, "drawing")?;
    state.report_cache.clear();
    tracing::info!(product = %product_id, qty, value, by = %session_user.user().username, "goods drawn");
    Ok(Json(json!({
        "ok": true,
        "message": format!("Recorded {qty} x {} drawn at GHS {}.", item.name, format_money(value)),
        "remaining_qty": item.qty,
        "amount": value,
    })))
}

#[derive(Deserialize)]
pub struct ClosingForm {
    year: i32,
}

pub async fn stock_closing_create(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    JsonOrForm(form): JsonOrForm<ClosingForm>,
) -> AppResult<Json<Value>> {
    session_user.require_any(&[UserRole::Executive, UserRole::Accounting])?;
    if !(2000..=2100).contains(&form.year) {
        return Err(AppError::validation("Year must be between 2000 and 2100."));
    }
    match create_stock_closing(&state, form.year).await? {
        ClosingOutcome::AlreadyClosed => Err(AppError::conflict(format!(
            "Stock for {} is already closed.",
            form.year
        ))),
        ClosingOutcome::Created { total, lines } => {
            state.report_cache.clear();
            Ok(Json(json!({
                "ok": true,
                "year": form.year,
                "total_closing_cost_value": total,
                "lines": lines,
            })))
        }
    }
}
