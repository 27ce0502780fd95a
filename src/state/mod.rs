// state module: AppState, initialization, and re-exports of submodules.

use std::sync::Arc;

use anyhow::Result;
use mongodb::{
    Client, Collection, Database,
    bson::{Bson, oid::ObjectId},
};

use crate::cache::ReportCache;
use crate::config::AppConfig;
use crate::models::{
    AccountingExpense, BankAccount, BankWithdrawal, Customer, IncomeEntry, InstantSale,
    InventoryItem, LedgerDay, LedgerTransfer, LoginLog, ManagerDeposit, ManagerExpense,
    OutflowRecord, Payment, PayrollAudit, PayrollDeduction, PayrollRecord, PrivateLedgerEntry,
    ReturnInward, ReturnOutward, Session, StockClosing, StockClosingLine, StockEntry, User,
};
use crate::sms::SmsClient;

mod bank_accounts;
mod customers;
mod expenses;
mod inventory;
mod ledger;
mod payments;
mod payroll;
mod profit_loss;
mod seed;
mod users;

pub use bank_accounts::*;
pub use customers::*;
pub use expenses::*;
pub use inventory::*;
pub use ledger::*;
pub use payments::*;
pub use payroll::*;
pub use profit_loss::*;
pub use users::*;

pub const SESSION_TTL_SECONDS: u64 = 60 * 60 * 24; // 1 day
pub const DEFAULT_PAGE_SIZE: u64 = 50;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub db: Database,
    pub users: Collection<User>,
    pub sessions: Collection<Session>,
    pub login_logs: Collection<LoginLog>,
    pub customers: Collection<Customer>,
    pub payments: Collection<Payment>,
    pub sales_close: Collection<LedgerDay>,
    pub ledger_transfers: Collection<LedgerTransfer>,
    pub inventory: Collection<InventoryItem>,
    pub instant_sales: Collection<InstantSale>,
    pub outflows: Collection<OutflowRecord>,
    pub private_ledger: Collection<PrivateLedgerEntry>,
    pub manager_expenses: Collection<ManagerExpense>,
    pub expenses: Collection<AccountingExpense>,
    pub stock_entries: Collection<StockEntry>,
    pub returns_inwards: Collection<ReturnInward>,
    pub returns_outwards: Collection<ReturnOutward>,
    pub income_entries: Collection<IncomeEntry>,
    pub stock_closings: Collection<StockClosing>,
    pub stock_closing_lines: Collection<StockClosingLine>,
    pub payroll_records: Collection<PayrollRecord>,
    pub payroll_deductions: Collection<PayrollDeduction>,
    pub payroll_audit: Collection<PayrollAudit>,
    pub bank_accounts: Collection<BankAccount>,
    pub manager_deposits: Collection<ManagerDeposit>,
    pub bank_withdrawals: Collection<BankWithdrawal>,
    pub report_cache: Arc<ReportCache<Arc<ProfitLossReport>>>,
    pub sms: SmsClient,
}

pub async fn init_state() -> Result<AppState> {
    init_state_with(AppConfig::from_env()?).await
}

pub async fn init_state_with(config: AppConfig) -> Result<AppState> {
    let client = Client::with_uri_str(&config.mongodb_uri).await?;
    let db = client.database(&config.mongodb_db);

    seed::ensure_indexes(&db).await;

    // Only seed when there are no users yet.
    if seed::is_database_empty(&db).await? {
        match seed::load_seed_users(&config.users_file) {
            Ok(users) => seed::seed_users(&db, &users).await?,
            Err(err) => tracing::warn!(file = %config.users_file, error = ?err, "seed users not loaded"),
        }
    }

    let report_cache = Arc::new(ReportCache::new(
        config.report_cache_ttl,
        config.report_cache_max_entries,
    ));
    let sms = SmsClient::new(config.sms.clone())?;

    Ok(AppState {
        users: db.collection("users"),
        sessions: db.collection("sessions"),
        login_logs: db.collection("login_logs"),
        customers: db.collection("customers"),
        payments: db.collection("payments"),
        sales_close: db.collection("sales_close"),
        ledger_transfers: db.collection("ledger_transfers"),
        inventory: db.collection("inventory"),
        instant_sales: db.collection("instant_sales"),
        outflows: db.collection("inventory_products_outflow"),
        private_ledger: db.collection("private_ledger_entries"),
        manager_expenses: db.collection("manager_expenses"),
        expenses: db.collection("expenses"),
        stock_entries: db.collection("stock_entries"),
        returns_inwards: db.collection("returns_inwards"),
        returns_outwards: db.collection("returns_outwards"),
        income_entries: db.collection("income_entries"),
        stock_closings: db.collection("stock_closings"),
        stock_closing_lines: db.collection("stock_closing_lines"),
        payroll_records: db.collection("payroll_records"),
        payroll_deductions: db.collection("payroll_deductions"),
        payroll_audit: db.collection("payroll_audit_logs"),
        bank_accounts: db.collection("bank_accounts"),
        manager_deposits: db.collection("manager_deposits"),
        bank_withdrawals: db.collection("bank_withdrawals"),
        report_cache,
        sms,
        config,
        db,
    })
}

/// Midnight UTC of `date` as a BSON datetime.
pub fn bson_date(date: chrono::NaiveDate) -> mongodb::bson::DateTime {
    mongodb::bson::DateTime::from_millis(
        crate::period::start_of_day(date).and_utc().timestamp_millis(),
    )
}

pub fn bson_datetime(at: chrono::NaiveDateTime) -> mongodb::bson::DateTime {
    mongodb::bson::DateTime::from_millis(at.and_utc().timestamp_millis())
}

pub fn parse_oid(raw: &str) -> Option<ObjectId> {
    ObjectId::parse_str(raw.trim()).ok()
}

/// Reads an aggregation number regardless of its BSON numeric type.
pub(crate) fn bson_f64(value: Option<&Bson>) -> f64 {
    match value {
        Some(Bson::Double(v)) => *v,
        Some(Bson::Int32(v)) => *v as f64,
        Some(Bson::Int64(v)) => *v as f64,
        Some(Bson::String(s)) => crate::money::parse_amount(s).unwrap_or(0.0),
        Some(Bson::Decimal128(d)) => d.to_string().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

pub(crate) fn bson_i64(value: Option<&Bson>) -> i64 {
    match value {
        Some(Bson::Int32(v)) => *v as i64,
        Some(Bson::Int64(v)) => *v,
        Some(Bson::Double(v)) => *v as i64,
        _ => 0,
    }
}

/// Mongo expression converting a field to double; missing, null or unparseable values become 0.
pub(crate) fn to_double(field: &str) -> mongodb::bson::Document {
    mongodb::bson::doc! {
        "$convert": { "input": field, "to": "double", "onError": 0.0, "onNull": 0.0 }
    }
}

/// Page number (1-based) and size from optional query values.
pub fn page_bounds(page: Option<u64>, per_page: Option<u64>) -> (u64, u64) {
    let per_page = per_page.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, 500);
    let page = page.unwrap_or(1).max(1);
    (page, per_page)
}
