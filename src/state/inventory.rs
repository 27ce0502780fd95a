use std::collections::{BTreeMap, HashMap};

use anyhow::{Context, Result};
use futures::stream::TryStreamExt;
use mongodb::{
    bson::{DateTime, doc, oid::ObjectId},
    options::ReturnDocument,
};

use crate::models::{
    BranchClosingTotal, InstantSale, InventoryItem, OutflowProduct, OutflowRecord,
    PrivateLedgerEntry, StockClosing, StockClosingLine, User,
};
use crate::money::round2;

use super::{AppState, list_users};

/// Result of a guarded stock decrement.
#[derive(Debug, Clone)]
pub enum StockMove {
    Done {
        item: InventoryItem,
        qty: f64,
        value: f64,
    },
    NotFound,
    Insufficient {
        available: f64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClosingOutcome {
    Created { total: f64, lines: usize },
    AlreadyClosed,
}

pub async fn create_item(
    state: &AppState,
    manager: &User,
    name: &str,
    qty: f64,
    cost_price: f64,
    selling_price: f64,
) -> Result<ObjectId> {
    let manager_id = manager.id.context("manager missing _id")?;
    let res = state
        .inventory
        .insert_one(InventoryItem {
            id: None,
            manager_id,
            name: name.trim().to_string(),
            qty,
            cost_price: round2(cost_price),
            selling_price: round2(selling_price),
            branch_name: manager.branch_name.clone(),
            updated_at: Some(DateTime::now()),
        })
        .await?;
    res.inserted_id
        .as_object_id()
        .context("inventory insert missing _id")
}

pub async fn list_items(state: &AppState, manager_id: Option<&ObjectId>) -> Result<Vec<InventoryItem>> {
    let filter = match manager_id {
        Some(id) => doc! { "manager_id": id },
        None => doc! {},
    };
    let mut cursor = state.inventory.find(filter).sort(doc! { "name": 1 }).await?;
    let mut items = Vec::new();
    while let Some(item) = cursor.try_next().await? {
        items.push(item);
    }
    Ok(items)
}

/// Sets an item's quantity. `manager_id` restricts the update to that manager's stock.
pub async fn set_item_qty(
    state: &AppState,
    id: &ObjectId,
    manager_id: Option<&ObjectId>,
    qty: f64,
) -> Result<bool> {
    let mut filter = doc! { "_id": id };
    if let Some(manager_id) = manager_id {
        filter.insert("manager_id", manager_id);
    }
    let res = state
        .inventory
        .update_one(
            filter,
            doc! { "$set": { "qty": qty, "updated_at": DateTime::now() } },
        )
        .await?;
    Ok(res.matched_count == 1)
}

/// Decrements `qty` only while enough stock remains. Concurrent sellers cannot drive it negative.
async fn take_stock(
    state: &AppState,
    id: &ObjectId,
    manager_id: Option<&ObjectId>,
    qty: f64,
) -> Result<Result<InventoryItem, StockMove>> {
    let mut filter = doc! { "_id": id, "qty": { "$gte": qty } };
    if let Some(manager_id) = manager_id {
        filter.insert("manager_id", manager_id);
    }
    let updated = state
        .inventory
        .find_one_and_update(
            filter,
            doc! {
                "$inc": { "qty": -qty },
                "$set": { "updated_at": DateTime::now() },
            },
        )
        .return_document(ReturnDocument::After)
        .await?;
    if let Some(item) = updated {
        return Ok(Ok(item));
    }

    let mut lookup = doc! { "_id": id };
    if let Some(manager_id) = manager_id {
        lookup.insert("manager_id", manager_id);
    }
    Ok(Err(match state.inventory.find_one(lookup).await? {
        Some(item) => StockMove::Insufficient { available: item.qty },
        None => StockMove::NotFound,
    }))
}

/// Sells from a manager's stock: decrement, `instant_sales` row, outflow row.
pub async fn instant_sale(
    state: &AppState,
    manager: &User,
    product_id: &ObjectId,
    qty: f64,
    unit_price: Option<f64>,
) -> Result<StockMove> {
    let manager_id = manager.id.context("manager missing _id")?;
    let item = match take_stock(state, product_id, Some(&manager_id), qty).await? {
        Ok(item) => item,
        Err(outcome) => return Ok(outcome),
    };

    let unit_price = unit_price.filter(|p| *p > 0.0).unwrap_or(item.selling_price);
    let total = round2(unit_price * qty);
    let now = DateTime::now();

    let recorded = async {
        state
            .instant_sales
            .insert_one(InstantSale {
                id: None,
                manager_id,
                branch_id: manager.branch_id.clone(),
                branch_name: manager.branch_name.clone(),
                product_id: *product_id,
                product_name: item.name.clone(),
                qty,
                unit_price,
                total_amount: Some(total),
                grand_total: None,
                amount: None,
                date_dt: now,
            })
            .await?;
        state
            .outflows
            .insert_one(OutflowRecord {
                source: Some("instant_sale".to_string()),
                manager_id: Some(manager_id),
                branch_id: manager.branch_id.clone(),
                product_id: Some(*product_id),
                selected_qty: Some(qty),
                unit_cost_price: Some(item.cost_price),
                selected_product: Some(OutflowProduct {
                    quantity: Some(qty),
                    qty: None,
                    cost_price: Some(item.cost_price),
                }),
                created_at: Some(now),
                ..Default::default()
            })
            .await?;
        anyhow::Ok(())
    }
    .await;

    if let Err(err) = recorded {
        tracing::error!(
            product = %product_id,
            qty,
            error = ?err,
            "stock decremented but sale rows not written"
        );
        return Err(err);
    }

    tracing::info!(manager = %manager_id, product = %product_id, qty, total, "instant sale recorded");
    Ok(StockMove::Done {
        item,
        qty,
        value: total,
    })
}

/// Owner drawing of goods: decrement and a posted private-ledger entry at cost.
pub async fn goods_drawn(
    state: &AppState,
    product_id: &ObjectId,
    qty: f64,
    unit_cost: Option<f64>,
    memo: &str,
    date_dt: DateTime,
) -> Result<StockMove> {
    let item = match take_stock(state, product_id, None, qty).await? {
        Ok(item) => item,
        Err(outcome) => return Ok(outcome),
    };

    let unit_cost = unit_cost.unwrap_or(item.cost_price);
    let value = round2(qty * unit_cost);
    let entry = PrivateLedgerEntry {
        id: None,
        entry_type: "goods_drawn".to_string(),
        status: "posted".to_string(),
        amount: value,
        product_id: Some(*product_id),
        purpose_text: Some(format!("Goods drawn: {} x {}", item.name, qty)),
        memo: Some(memo.trim().to_string()).filter(|m| !m.is_empty()),
        manager_id: Some(item.manager_id),
        branch_id: None,
        date_dt,
    };
    if let Err(err) = state.private_ledger.insert_one(entry).await {
        tracing::error!(
            product = %product_id,
            qty,
            error = %err,
            "stock decremented but goods-drawn entry not written"
        );
        return Err(err.into());
    }

    Ok(StockMove::Done { item, qty, value })
}

/// Current stock value (`qty × cost_price`) per manager.
pub async fn inventory_value_by_manager(state: &AppState) -> Result<HashMap<ObjectId, f64>> {
    let mut by_manager: HashMap<ObjectId, f64> = HashMap::new();
    for item in list_items(state, None).await? {
        *by_manager.entry(item.manager_id).or_insert(0.0) += item.qty.max(0.0) * item.cost_price;
    }
    Ok(by_manager)
}

/// Writes the year-end snapshot: one line per manager and a header with branch totals.
pub async fn create_stock_closing(state: &AppState, year: i32) -> Result<ClosingOutcome> {
    if state
        .stock_closings
        .find_one(doc! { "closing_year": year, "status": "completed" })
        .await?
        .is_some()
    {
        return Ok(ClosingOutcome::AlreadyClosed);
    }

    let values = inventory_value_by_manager(state).await?;
    let managers: HashMap<ObjectId, User> = list_users(state, None)
        .await?
        .into_iter()
        .filter_map(|u| u.id.map(|id| (id, u)))
        .collect();

    let mut lines = Vec::new();
    let mut branches: BTreeMap<String, (Option<String>, f64)> = BTreeMap::new();
    for (manager_id, value) in values {
        let manager = managers.get(&manager_id);
        let branch_name = manager
            .and_then(|m| m.branch_name.clone())
            .unwrap_or_default();
        let branch_id = manager.and_then(|m| m.branch_id.clone());
        let value = round2(value);
        let entry = branches.entry(branch_name.clone()).or_insert((branch_id.clone(), 0.0));
        entry.1 += value;
        lines.push(StockClosingLine {
            id: None,
            closing_year: year,
            manager_id: Some(manager_id),
            manager_name: manager.map(|m| m.display_name()).unwrap_or_default(),
            branch_id,
            branch_name,
            closing_cost_value: value,
        });
    }

    let total = round2(lines.iter().map(|l| l.closing_cost_value).sum());
    let line_count = lines.len();
    if !lines.is_empty() {
        state.stock_closing_lines.insert_many(lines).await?;
    }
    state
        .stock_closings
        .insert_one(StockClosing {
            id: None,
            closing_year: year,
            status: "completed".to_string(),
            total_closing_cost_value: Some(total),
            branch_totals: branches
                .into_iter()
                .map(|(name, (branch_id, value))| BranchClosingTotal {
                    branch_id,
                    branch_name: Some(name).filter(|n| !n.is_empty()),
                    closing_cost_value: round2(value),
                })
                .collect(),
            created_at: Some(DateTime::now()),
        })
        .await?;

    tracing::info!(year, total, lines = line_count, "stock closing snapshot written");
    Ok(ClosingOutcome::Created {
        total,
        lines: line_count,
    })
}
