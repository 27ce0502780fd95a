use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use futures::stream::TryStreamExt;
use mongodb::{
    Collection,
    bson::{DateTime, Document, doc, oid::ObjectId},
};
use serde::Serialize;

use crate::models::{BankAccount, BankAccountType, BankWithdrawal, ManagerDeposit, PrivateLedgerEntry};
use crate::money::{format_plain, round2};

use super::{AppState, bson_date, bson_f64, to_double};

pub const WITHDRAWAL_PURPOSES: [&str; 4] = ["drawings", "asset", "expense", "other"];

#[derive(Debug, Clone, Default)]
pub struct NewBankAccount {
    pub account_type: String,
    pub account_name: String,
    pub bank_name: String,
    pub network: String,
    pub account_no: String,
    pub currency: String,
    pub opening_balance: f64,
}

impl NewBankAccount {
    /// Checks required fields; all problems are reported together.
    pub fn validate(&self) -> std::result::Result<BankAccountType, String> {
        let kind = BankAccountType::parse(&self.account_type).unwrap_or(BankAccountType::Bank);
        let mut errors = Vec::new();
        if self.account_name.trim().is_empty() {
            errors.push("Account name is required.");
        }
        if kind == BankAccountType::Bank && self.bank_name.trim().is_empty() {
            errors.push("Bank name is required for a bank account.");
        }
        if kind == BankAccountType::MobileMoney && self.network.trim().is_empty() {
            errors.push("Network is required for a mobile money wallet.");
        }
        if errors.is_empty() {
            Ok(kind)
        } else {
            Err(errors.join("; "))
        }
    }
}

/// An account with its flows and live balance.
#[derive(Debug, Clone, Serialize)]
pub struct BankAccountRow {
    pub id: String,
    pub account: BankAccount,
    pub deposits: f64,
    pub withdrawals: f64,
    pub net_flow: f64,
    pub live_balance: f64,
}

impl BankAccountRow {
    pub fn new(account: BankAccount, deposits: f64, withdrawals: f64) -> Self {
        let net_flow = round2(deposits - withdrawals);
        BankAccountRow {
            id: account.id.map(|id| id.to_hex()).unwrap_or_default(),
            live_balance: round2(account.opening_balance + net_flow),
            account,
            deposits: round2(deposits),
            withdrawals: round2(withdrawals),
            net_flow,
        }
    }

    pub fn csv_record(&self) -> Vec<String> {
        let a = &self.account;
        let currency = if a.currency.trim().is_empty() {
            "GHS".to_string()
        } else {
            a.currency.to_uppercase()
        };
        vec![
            a.account_type.label().to_string(),
            a.bank_name.clone(),
            a.account_name.clone(),
            a.account_no.clone(),
            currency,
            format_plain(a.opening_balance),
            format_plain(self.deposits),
            format_plain(self.withdrawals),
            format_plain(self.net_flow),
            format_plain(self.live_balance),
            a.last_reconciled
                .map(|d| d.to_chrono().format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
        ]
    }
}

pub async fn create_bank_account(state: &AppState, new: &NewBankAccount) -> Result<ObjectId> {
    let kind = new
        .validate()
        .map_err(anyhow::Error::msg)
        .context("invalid bank account")?;
    let bank_name = match kind {
        BankAccountType::MobileMoney => new.network.trim().to_string(),
        _ => new.bank_name.trim().to_string(),
    };
    let currency = match new.currency.trim() {
        "" => state.config.currency.clone(),
        c => c.to_uppercase(),
    };
    let res = state
        .bank_accounts
        .insert_one(BankAccount {
            id: None,
            account_type: kind,
            bank_name,
            account_name: new.account_name.trim().to_string(),
            account_no: new.account_no.trim().to_string(),
            currency,
            opening_balance: round2(new.opening_balance),
            last_reconciled: None,
            reconciled_balance: None,
            created_at: Some(DateTime::now()),
        })
        .await?;
    res.inserted_id
        .as_object_id()
        .context("bank account insert missing _id")
}

pub async fn get_bank_account(state: &AppState, id: &ObjectId) -> Result<Option<BankAccount>> {
    Ok(state.bank_accounts.find_one(doc! { "_id": id }).await?)
}

async fn sums_by_bank<T: Send + Sync>(
    coll: &Collection<T>,
    filter: Document,
) -> Result<HashMap<ObjectId, f64>> {
    let mut cursor = coll
        .aggregate(vec![
            doc! { "$match": filter },
            doc! { "$group": { "_id": "$bank_id", "total": { "$sum": to_double("$amount") } } },
        ])
        .await?;
    let mut out = HashMap::new();
    while let Some(row) = cursor.try_next().await? {
        if let Ok(id) = row.get_object_id("_id") {
            out.insert(id, bson_f64(row.get("total")));
        }
    }
    Ok(out)
}

pub async fn list_bank_accounts(state: &AppState) -> Result<Vec<BankAccountRow>> {
    let deposits = sums_by_bank(&state.manager_deposits, doc! {}).await?;
    let withdrawals = sums_by_bank(&state.bank_withdrawals, doc! { "status": "posted" }).await?;

    let mut cursor = state
        .bank_accounts
        .find(doc! {})
        .sort(doc! { "bank_name": 1 })
        .await?;
    let mut rows = Vec::new();
    while let Some(account) = cursor.try_next().await? {
        let id = account.id;
        let dep = id.and_then(|id| deposits.get(&id).copied()).unwrap_or(0.0);
        let wd = id.and_then(|id| withdrawals.get(&id).copied()).unwrap_or(0.0);
        rows.push(BankAccountRow::new(account, dep, wd));
    }
    Ok(rows)
}

pub async fn record_manager_deposit(
    state: &AppState,
    bank_id: &ObjectId,
    manager_id: &ObjectId,
    amount: f64,
    note: &str,
    date: NaiveDate,
) -> Result<ObjectId> {
    let res = state
        .manager_deposits
        .insert_one(ManagerDeposit {
            id: None,
            bank_id: *bank_id,
            manager_id: *manager_id,
            amount: round2(amount),
            note: note.trim().to_string(),
            date_dt: bson_date(date),
        })
        .await?;
    res.inserted_id
        .as_object_id()
        .context("deposit insert missing _id")
}

/// Posts a withdrawal out of an account. Drawings also land in the private ledger.
pub async fn record_bank_withdrawal(
    state: &AppState,
    bank_id: &ObjectId,
    amount: f64,
    purpose: &str,
    created_by: &ObjectId,
    date: NaiveDate,
) -> Result<ObjectId> {
    let date_dt = bson_date(date);
    let res = state
        .bank_withdrawals
        .insert_one(BankWithdrawal {
            id: None,
            bank_id: *bank_id,
            amount: round2(amount),
            purpose: purpose.to_string(),
            status: "posted".to_string(),
            created_by: *created_by,
            date_dt,
        })
        .await?;
    let id = res
        .inserted_id
        .as_object_id()
        .context("withdrawal insert missing _id")?;

    if purpose == "drawings" {
        let entry = PrivateLedgerEntry {
            id: None,
            entry_type: "cash_drawing".to_string(),
            status: "posted".to_string(),
            amount: round2(amount),
            product_id: None,
            purpose_text: Some("Cash drawing".to_string()),
            memo: None,
            manager_id: None,
            branch_id: None,
            date_dt,
        };
        if let Err(err) = state.private_ledger.insert_one(entry).await {
            tracing::warn!(withdrawal = %id, error = %err, "drawing not posted to private ledger");
        }
    }
    Ok(id)
}

pub async fn reconcile_bank_account(
    state: &AppState,
    id: &ObjectId,
    reconciled_balance: f64,
) -> Result<bool> {
    let res = state
        .bank_accounts
        .update_one(
            doc! { "_id": id },
            doc! { "$set": {
                "last_reconciled": DateTime::now(),
                "reconciled_balance": round2(reconciled_balance),
            }},
        )
        .await?;
    Ok(res.matched_count == 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(opening: f64) -> BankAccount {
        BankAccount {
            id: None,
            account_type: BankAccountType::MobileMoney,
            bank_name: "MTN".into(),
            account_name: "Till".into(),
            account_no: "0241234567".into(),
            currency: "ghs".into(),
            opening_balance: opening,
            last_reconciled: None,
            reconciled_balance: None,
            created_at: None,
        }
    }

    #[test]
    fn live_balance_is_opening_plus_net_flow() {
        let row = BankAccountRow::new(account(100.0), 250.5, 50.25);
        assert_eq!(row.net_flow, 200.25);
        assert_eq!(row.live_balance, 300.25);
        let rec = row.csv_record();
        assert_eq!(rec[0], "Mobile Money");
        assert_eq!(rec[4], "GHS");
        assert_eq!(rec[9], "300.25");
        assert_eq!(rec[10], "");
    }

    #[test]
    fn validation_collects_all_errors() {
        let new = NewBankAccount {
            account_type: "mobile_money".into(),
            ..Default::default()
        };
        assert_eq!(
            new.validate().unwrap_err(),
            "Account name is required.; Network is required for a mobile money wallet."
        );
        let cash = NewBankAccount {
            account_type: "cash".into(),
            account_name: "Petty cash".into(),
            ..Default::default()
        };
        assert_eq!(cash.validate(), Ok(BankAccountType::Cash));
    }
}
