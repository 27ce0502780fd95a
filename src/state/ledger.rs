use std::collections::HashMap;

use anyhow::{Context, Result};
use futures::stream::TryStreamExt;
use mongodb::{
    Collection,
    bson::{self, DateTime, Document, doc, oid::ObjectId},
    options::ReturnDocument,
};
use serde::Serialize;

use crate::ledger::{DayBalance, DebitLine, LedgerStore, TransferIntent};
use crate::models::{LedgerDay, LedgerTransfer, TransferStatus, WithdrawalEntry};
use crate::money::round2;

use super::{AppState, bson_f64, bson_i64, parse_oid, to_double};

/// `LedgerStore` over the `sales_close` and `ledger_transfers` collections.
#[derive(Clone)]
pub struct MongoLedger {
    days: Collection<LedgerDay>,
    transfers: Collection<LedgerTransfer>,
}

/// One withdrawal as shown in a user's history.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub amount: f64,
    pub date: String,
    pub time: String,
    pub note: String,
    pub by_id: String,
    pub by_name: String,
    pub at_iso: String,
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    err.to_string().contains("E11000")
}

impl MongoLedger {
    pub fn new(state: &AppState) -> Self {
        MongoLedger {
            days: state.sales_close.clone(),
            transfers: state.ledger_transfers.clone(),
        }
    }

    /// Upserts (owner, date) and adds `amount` to it, tolerating legacy string balances.
    /// Two concurrent first writers race on the unique index; the loser retries once
    /// against the now-existing document.
    async fn add_to_day(
        &self,
        owner: &str,
        manager_id: Option<ObjectId>,
        date: &str,
        amount: f64,
        touch: &str,
    ) -> Result<()> {
        let now = DateTime::now();
        let mut set = doc! {
            "agent_id": owner,
            "date": date,
            "total_amount": { "$add": [to_double("$total_amount"), amount] },
            "count": { "$add": [{ "$ifNull": ["$count", 0] }, 1] },
            "created_at": { "$ifNull": ["$created_at", now] },
            "updated_at": now,
        };
        set.insert(touch, now);
        if let Some(manager_id) = manager_id {
            set.insert("manager_id", doc! { "$ifNull": ["$manager_id", manager_id] });
        }
        let pipeline = vec![doc! { "$set": set }];

        for attempt in 0..2 {
            match self
                .days
                .update_one(doc! { "agent_id": owner, "date": date }, pipeline.clone())
                .upsert(true)
                .await
            {
                Ok(_) => return Ok(()),
                Err(err) if attempt == 0 && is_duplicate_key(&err) => {
                    tracing::debug!(owner, date, "concurrent day insert, retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    /// Payment roll-up into the agent's day-document.
    pub async fn record_collection(
        &self,
        owner: &str,
        manager_id: Option<ObjectId>,
        date: &str,
        amount: f64,
    ) -> Result<()> {
        self.add_to_day(owner, manager_id, date, amount, "last_payment_at")
            .await
    }

    /// Ledger totals for many owners in one aggregation. Owners without documents map to 0.
    pub async fn totals_by_owner(&self, owners: &[String]) -> Result<HashMap<String, f64>> {
        let mut out: HashMap<String, f64> = owners.iter().map(|o| (o.clone(), 0.0)).collect();
        if owners.is_empty() {
            return Ok(out);
        }
        let mut cursor = self
            .days
            .aggregate(vec![
                doc! { "$match": { "agent_id": { "$in": owners } } },
                doc! { "$group": { "_id": "$agent_id", "total": { "$sum": to_double("$total_amount") } } },
            ])
            .await?;
        while let Some(row) = cursor.try_next().await? {
            if let Ok(owner) = row.get_str("_id") {
                out.insert(owner.to_string(), round2(bson_f64(row.get("total"))));
            }
        }
        Ok(out)
    }

    /// Sum of balances and counts over `owners`, optionally within a date range.
    pub async fn range_totals(
        &self,
        owners: &[String],
        from: Option<&str>,
        to: Option<&str>,
    ) -> Result<(f64, i64)> {
        let mut filter = doc! { "agent_id": { "$in": owners } };
        let mut range = Document::new();
        if let Some(from) = from {
            range.insert("$gte", from);
        }
        if let Some(to) = to {
            range.insert("$lte", to);
        }
        if !range.is_empty() {
            filter.insert("date", range);
        }
        let mut cursor = self
            .days
            .aggregate(vec![
                doc! { "$match": filter },
                doc! { "$group": {
                    "_id": null,
                    "total": { "$sum": to_double("$total_amount") },
                    "count": { "$sum": { "$ifNull": ["$count", 0] } },
                }},
            ])
            .await?;
        Ok(match cursor.try_next().await? {
            Some(row) => (round2(bson_f64(row.get("total"))), bson_i64(row.get("count"))),
            None => (0.0, 0),
        })
    }

    /// Withdrawals recorded against `owner`, newest first.
    pub async fn withdrawal_history(&self, owner: &str) -> Result<Vec<HistoryEntry>> {
        let mut cursor = self.days.find(doc! { "agent_id": owner }).await?;
        let mut entries = Vec::new();
        while let Some(day) = cursor.try_next().await? {
            for w in day.withdrawals {
                let at_iso = w
                    .at
                    .and_then(|at| at.try_to_rfc3339_string().ok())
                    .unwrap_or_else(|| format!("{}T{}", w.date, w.time));
                entries.push(HistoryEntry {
                    amount: round2(w.amount),
                    date: w.date,
                    time: w.time,
                    note: w.note,
                    by_id: w.by_id,
                    by_name: w.by_name,
                    at_iso,
                });
            }
        }
        entries.sort_by(|a, b| b.at_iso.cmp(&a.at_iso));
        Ok(entries)
    }

    pub async fn list_transfers(
        &self,
        status: Option<TransferStatus>,
        limit: i64,
    ) -> Result<Vec<LedgerTransfer>> {
        let filter = match status {
            Some(s) => doc! { "status": s.as_str() },
            None => doc! {},
        };
        let mut cursor = self
            .transfers
            .find(filter)
            .sort(doc! { "created_at": -1 })
            .limit(limit)
            .await?;
        let mut rows = Vec::new();
        while let Some(t) = cursor.try_next().await? {
            rows.push(t);
        }
        Ok(rows)
    }

    /// Re-applies the destination credit of a `credit_failed` transfer.
    /// The transfer is claimed first so two replays cannot both credit.
    /// Returns None when no such failed transfer exists.
    pub async fn replay_transfer(&self, id: &str) -> Result<Option<LedgerTransfer>> {
        let oid = parse_oid(id).context("invalid transfer id")?;
        let claimed = self
            .transfers
            .find_one_and_update(
                doc! { "_id": oid, "status": TransferStatus::CreditFailed.as_str() },
                doc! { "$set": {
                    "status": TransferStatus::Replayed.as_str(),
                    "updated_at": DateTime::now(),
                }},
            )
            .return_document(ReturnDocument::After)
            .await?;
        let Some(transfer) = claimed else {
            return Ok(None);
        };

        if let Err(err) = self
            .credit_day(&transfer.destination_id, &transfer.day, transfer.debited)
            .await
        {
            if let Err(revert) = self
                .transfers
                .update_one(
                    doc! { "_id": oid },
                    doc! { "$set": {
                        "status": TransferStatus::CreditFailed.as_str(),
                        "error": err.to_string(),
                        "updated_at": DateTime::now(),
                    }},
                )
                .await
            {
                tracing::warn!(transfer = id, error = %revert, "transfer status revert failed");
            }
            return Err(err);
        }

        tracing::info!(
            transfer = id,
            destination = %transfer.destination_id,
            amount = transfer.debited,
            "replayed transfer credit"
        );
        Ok(Some(transfer))
    }
}

impl LedgerStore for MongoLedger {
    async fn total(&self, owner: &str) -> Result<f64> {
        let totals = self.totals_by_owner(&[owner.to_string()]).await?;
        Ok(totals.get(owner).copied().unwrap_or(0.0))
    }

    async fn positive_days(&self, owner: &str) -> Result<Vec<DayBalance>> {
        let mut cursor = self
            .days
            .aggregate(vec![
                doc! { "$match": { "agent_id": owner } },
                doc! { "$project": { "date": 1, "balance": to_double("$total_amount") } },
                doc! { "$match": { "balance": { "$gt": 0 } } },
            ])
            .await?;
        let mut days = Vec::new();
        while let Some(row) = cursor.try_next().await? {
            let date = row.get_str("date").unwrap_or_default().to_string();
            if date.is_empty() {
                continue;
            }
            days.push(DayBalance {
                date,
                balance: round2(bson_f64(row.get("balance"))),
            });
        }
        Ok(days)
    }

    async fn debit_day(
        &self,
        owner: &str,
        date: &str,
        amount: f64,
        entry: WithdrawalEntry,
    ) -> Result<bool> {
        let now = DateTime::now();
        let entry = bson::to_document(&entry)?;
        let pipeline = vec![doc! { "$set": {
            "total_amount": { "$subtract": [to_double("$total_amount"), amount] },
            "withdrawals": { "$concatArrays": [
                { "$ifNull": ["$withdrawals", []] },
                [{ "$literal": entry }],
            ]},
            "updated_at": now,
            "last_withdrawal_at": now,
        }}];
        let res = self
            .days
            .update_one(
                doc! {
                    "agent_id": owner,
                    "date": date,
                    "$expr": { "$gte": [to_double("$total_amount"), amount] },
                },
                pipeline,
            )
            .await?;
        Ok(res.modified_count == 1)
    }

    async fn credit_day(&self, owner: &str, date: &str, amount: f64) -> Result<()> {
        let manager_id = parse_oid(owner);
        self.add_to_day(owner, manager_id, date, amount, "last_payment_at")
            .await
    }

    async fn open_transfer(&self, intent: &TransferIntent) -> Result<String> {
        let res = self
            .transfers
            .insert_one(LedgerTransfer {
                id: None,
                source_id: intent.source_id.clone(),
                destination_id: intent.destination_id.clone(),
                by_id: intent.by_id.clone(),
                by_role: intent.by_role.clone(),
                day: intent.day.clone(),
                requested: intent.requested,
                debited: 0.0,
                breakdown: Vec::new(),
                status: TransferStatus::Pending,
                error: None,
                created_at: DateTime::now(),
                updated_at: None,
            })
            .await?;
        let id = res
            .inserted_id
            .as_object_id()
            .context("transfer insert missing _id")?;
        Ok(id.to_hex())
    }

    async fn mark_transfer(
        &self,
        id: &str,
        status: TransferStatus,
        debited: f64,
        breakdown: &[DebitLine],
        error: Option<String>,
    ) -> Result<()> {
        let oid = parse_oid(id).context("invalid transfer id")?;
        let mut set = doc! {
            "status": status.as_str(),
            "debited": debited,
            "breakdown": bson::to_bson(breakdown)?,
            "updated_at": DateTime::now(),
        };
        if let Some(error) = error {
            set.insert("error", error);
        }
        self.transfers
            .update_one(doc! { "_id": oid }, doc! { "$set": set })
            .await?;
        Ok(())
    }
}
