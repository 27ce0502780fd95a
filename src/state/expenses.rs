use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use futures::stream::TryStreamExt;
use mongodb::bson::{DateTime, Document, doc, oid::ObjectId};

use crate::models::{
    AccountingExpense, ExpenseStatus, IncomeEntry, ManagerExpense, ReturnInward, ReturnOutward,
    StockEntry, User,
};
use crate::money::round2;
use crate::profit_loss::{CategoryAmount, sorted_categories};

use super::{AppState, bson_date, bson_datetime, bson_f64, to_double};

#[derive(Debug, Clone, Default)]
pub struct ExpenseFilter {
    pub manager_ids: Option<Vec<ObjectId>>,
    pub status: Option<ExpenseStatus>,
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
}

impl ExpenseFilter {
    fn to_document(&self) -> Document {
        let mut filter = doc! {};
        if let Some(ids) = &self.manager_ids {
            filter.insert("manager_id", doc! { "$in": ids.clone() });
        }
        if let Some(status) = self.status {
            filter.insert("status", status.as_str());
        }
        let mut range = doc! {};
        if let Some(start) = self.start {
            range.insert("$gte", bson_datetime(start));
        }
        if let Some(end) = self.end {
            range.insert("$lte", bson_datetime(end));
        }
        if !range.is_empty() {
            filter.insert("date_dt", range);
        }
        filter
    }
}

/// Manager expenses start Unapproved.
pub async fn create_manager_expense(
    state: &AppState,
    manager_id: &ObjectId,
    date: NaiveDate,
    time: &str,
    category: &str,
    amount: f64,
    description: &str,
) -> Result<ObjectId> {
    let res = state
        .manager_expenses
        .insert_one(ManagerExpense {
            id: None,
            manager_id: *manager_id,
            category: category.trim().to_string(),
            amount: round2(amount),
            status: ExpenseStatus::Unapproved,
            description: description.trim().to_string(),
            date: date.format("%Y-%m-%d").to_string(),
            date_dt: bson_date(date),
            reviewed_by: None,
            reviewed_at: None,
            time: time.to_string(),
            created_at: Some(DateTime::now()),
        })
        .await?;
    res.inserted_id
        .as_object_id()
        .context("expense insert missing _id")
}

pub async fn list_manager_expenses(
    state: &AppState,
    filter: &ExpenseFilter,
) -> Result<Vec<ManagerExpense>> {
    let mut cursor = state
        .manager_expenses
        .find(filter.to_document())
        .sort(doc! { "status": 1, "date_dt": -1 })
        .await?;
    let mut rows = Vec::new();
    while let Some(row) = cursor.try_next().await? {
        rows.push(row);
    }
    Ok(rows)
}

/// Approves (from Unapproved or Rejected) or rejects (from Unapproved only).
/// Returns false when the expense is missing or already in a final state.
pub async fn review_manager_expense(
    state: &AppState,
    id: &ObjectId,
    decision: ExpenseStatus,
    reviewer: &User,
) -> Result<bool> {
    let allowed_from: Vec<&str> = match decision {
        ExpenseStatus::Approved => vec![
            ExpenseStatus::Unapproved.as_str(),
            ExpenseStatus::Rejected.as_str(),
        ],
        ExpenseStatus::Rejected => vec![ExpenseStatus::Unapproved.as_str()],
        ExpenseStatus::Unapproved => return Ok(false),
    };
    let res = state
        .manager_expenses
        .update_one(
            doc! { "_id": id, "status": { "$in": allowed_from } },
            doc! { "$set": {
                "status": decision.as_str(),
                "reviewed_by": reviewer.id,
                "reviewed_at": DateTime::now(),
            }},
        )
        .await?;
    if res.modified_count == 1 {
        tracing::info!(expense = %id, status = decision.as_str(), by = %reviewer.username, "expense reviewed");
    }
    Ok(res.modified_count == 1)
}

/// Totals per category for a filter, largest first.
pub async fn manager_expense_stats(
    state: &AppState,
    filter: &ExpenseFilter,
) -> Result<(f64, Vec<CategoryAmount>)> {
    let mut cursor = state
        .manager_expenses
        .aggregate(vec![
            doc! { "$match": filter.to_document() },
            doc! { "$group": { "_id": "$category", "total": { "$sum": to_double("$amount") } } },
        ])
        .await?;
    let mut totals = std::collections::HashMap::new();
    while let Some(row) = cursor.try_next().await? {
        let category = row.get_str("_id").unwrap_or("Miscellaneous").to_string();
        *totals.entry(category).or_insert(0.0) += bson_f64(row.get("total"));
    }
    let rows = sorted_categories(&totals);
    let total = round2(rows.iter().map(|r| r.amount).sum());
    Ok((total, rows))
}

pub async fn create_accounting_expense(
    state: &AppState,
    category: &str,
    amount: f64,
    description: &str,
    branch: Option<&User>,
    date: NaiveDate,
) -> Result<ObjectId> {
    let res = state
        .expenses
        .insert_one(AccountingExpense {
            id: None,
            category: category.trim().to_string(),
            amount: round2(amount),
            description: description.trim().to_string(),
            branch_id: branch.and_then(|b| b.branch_id.clone()),
            branch_name: branch.and_then(|b| b.branch_name.clone()),
            date_dt: bson_date(date),
        })
        .await?;
    res.inserted_id
        .as_object_id()
        .context("expense insert missing _id")
}

pub async fn list_accounting_expenses(
    state: &AppState,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Result<Vec<AccountingExpense>> {
    let mut cursor = state
        .expenses
        .find(doc! { "date_dt": { "$gte": bson_datetime(start), "$lte": bson_datetime(end) } })
        .sort(doc! { "date_dt": -1 })
        .await?;
    let mut rows = Vec::new();
    while let Some(row) = cursor.try_next().await? {
        rows.push(row);
    }
    Ok(rows)
}

/// Branch fields shared by the accounting entry forms.
#[derive(Debug, Clone, Default)]
pub struct BranchRef {
    pub branch_id: Option<String>,
    pub branch_name: Option<String>,
}

pub async fn create_stock_entry(
    state: &AppState,
    product_name: &str,
    quantity: f64,
    unit_price: f64,
    branch: BranchRef,
    date: NaiveDate,
) -> Result<ObjectId> {
    let res = state
        .stock_entries
        .insert_one(StockEntry {
            id: None,
            product_name: product_name.trim().to_string(),
            quantity: Some(quantity),
            unit_price: Some(round2(unit_price)),
            total_cost: Some(round2(quantity * unit_price)),
            branch_id: branch.branch_id,
            branch_name: branch.branch_name,
            purchased_at: bson_date(date),
        })
        .await?;
    res.inserted_id
        .as_object_id()
        .context("stock entry insert missing _id")
}

/// Returns recorded by accounting are approved on entry.
pub async fn create_return_inward(
    state: &AppState,
    amount: f64,
    reason: &str,
    branch: BranchRef,
    date: NaiveDate,
) -> Result<ObjectId> {
    let res = state
        .returns_inwards
        .insert_one(ReturnInward {
            id: None,
            status: "Approved".to_string(),
            sales_reduction_amount: round2(amount),
            reason: reason.trim().to_string(),
            branch_id: branch.branch_id,
            branch_name: branch.branch_name,
            return_date_dt: bson_date(date),
        })
        .await?;
    res.inserted_id
        .as_object_id()
        .context("return insert missing _id")
}

pub async fn create_return_outward(
    state: &AppState,
    total_cost: f64,
    supplier: &str,
    branch: BranchRef,
    date: NaiveDate,
) -> Result<ObjectId> {
    let res = state
        .returns_outwards
        .insert_one(ReturnOutward {
            id: None,
            status: "posted".to_string(),
            total_cost: round2(total_cost),
            supplier: supplier.trim().to_string(),
            branch_id: branch.branch_id,
            branch_name: branch.branch_name,
            date_dt: bson_date(date),
        })
        .await?;
    res.inserted_id
        .as_object_id()
        .context("return insert missing _id")
}

pub async fn create_income_entry(
    state: &AppState,
    category: &str,
    amount: f64,
    branch: BranchRef,
    date: NaiveDate,
) -> Result<ObjectId> {
    let res = state
        .income_entries
        .insert_one(IncomeEntry {
            id: None,
            status: "posted".to_string(),
            category: category.trim().to_string(),
            amount: round2(amount),
            branch_id: branch.branch_id,
            branch_name: branch.branch_name,
            date_dt: bson_date(date),
        })
        .await?;
    res.inserted_id
        .as_object_id()
        .context("income insert missing _id")
}
