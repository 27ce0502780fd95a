// models.rs
// Documents stored in MongoDB plus the seed format read from users.json.
// Monetary fields go through `money::de_amount` so legacy string amounts still load.

use mongodb::bson::{DateTime, Document, oid::ObjectId};
use serde::{Deserialize, Serialize};

use crate::ledger::DebitLine;
use crate::money::{de_amount, de_opt_amount};

/// Roles carried by every user account.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Agent,
    Manager,
    Admin,
    Executive,
    Accounting,
    Hr,
    #[serde(other)]
    Unknown,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Agent => "agent",
            UserRole::Manager => "manager",
            UserRole::Admin => "admin",
            UserRole::Executive => "executive",
            UserRole::Accounting => "accounting",
            UserRole::Hr => "hr",
            UserRole::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "agent" => Some(UserRole::Agent),
            "manager" => Some(UserRole::Manager),
            "admin" => Some(UserRole::Admin),
            "executive" => Some(UserRole::Executive),
            "accounting" => Some(UserRole::Accounting),
            "hr" => Some(UserRole::Hr),
            _ => None,
        }
    }

    pub fn default_agent() -> Self {
        UserRole::Agent
    }
}

/// User definition as stored in users.json (manager referenced by username).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedUser {
    pub username: String,
    pub name: String,
    #[serde(default = "UserRole::default_agent")]
    pub role: UserRole,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub manager: Option<String>,
    #[serde(default)]
    pub branch_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub username: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub role: UserRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manager_id: Option<ObjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
    #[serde(default)]
    pub secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime>,
}

impl User {
    pub fn display_name(&self) -> String {
        if self.name.trim().is_empty() {
            self.username.clone()
        } else {
            self.name.clone()
        }
    }

    pub fn id_hex(&self) -> String {
        self.id.map(|id| id.to_hex()).unwrap_or_default()
    }
}

/// Session document linking a cookie token to a user until expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub token: String,
    pub user_id: ObjectId,
    pub expires_at: DateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginLog {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub username: String,
    #[serde(default)]
    pub user_id: Option<ObjectId>,
    pub success: bool,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    pub at: DateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub name: String,
    #[serde(default)]
    pub phone_number: String,
    pub agent_id: String,
    #[serde(default)]
    pub manager_id: Option<ObjectId>,
    #[serde(default)]
    pub created_at: Option<DateTime>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentType {
    Product,
    Susu,
    Withdrawal,
}

impl PaymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentType::Product => "PRODUCT",
            PaymentType::Susu => "SUSU",
            PaymentType::Withdrawal => "WITHDRAWAL",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_uppercase().as_str() {
            "PRODUCT" => Some(PaymentType::Product),
            "SUSU" => Some(PaymentType::Susu),
            "WITHDRAWAL" => Some(PaymentType::Withdrawal),
            _ => None,
        }
    }

    /// Withdrawals reverse savings; they never count as collections.
    pub fn counts_as_collection(&self) -> bool {
        !matches!(self, PaymentType::Withdrawal)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub customer_id: ObjectId,
    pub agent_id: String,
    #[serde(default)]
    pub manager_id: Option<ObjectId>,
    #[serde(default, deserialize_with = "de_amount")]
    pub amount: f64,
    pub payment_type: PaymentType,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub status: Option<String>,
    pub date: String,
    #[serde(default)]
    pub date_dt: Option<DateTime>,
    #[serde(default)]
    pub time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime>,
}

/// Audit entry pushed onto a ledger day-document on every debit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WithdrawalEntry {
    #[serde(default, deserialize_with = "de_amount")]
    pub amount: f64,
    #[serde(default)]
    pub by_id: String,
    #[serde(default)]
    pub by_name: String,
    #[serde(default)]
    pub by_role: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub at: Option<DateTime>,
}

/// `sales_close` day-document: one per (owner, calendar day).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerDay {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    #[serde(rename = "agent_id")]
    pub owner_id: String,
    pub date: String,
    #[serde(default, deserialize_with = "de_amount")]
    pub total_amount: f64,
    #[serde(default, deserialize_with = "de_amount")]
    pub count: f64,
    #[serde(default)]
    pub withdrawals: Vec<WithdrawalEntry>,
    #[serde(default)]
    pub updated_at: Option<DateTime>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    Debited,
    Completed,
    CreditFailed,
    Replayed,
    Abandoned,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Debited => "debited",
            TransferStatus::Completed => "completed",
            TransferStatus::CreditFailed => "credit_failed",
            TransferStatus::Replayed => "replayed",
            TransferStatus::Abandoned => "abandoned",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(TransferStatus::Pending),
            "debited" => Some(TransferStatus::Debited),
            "completed" => Some(TransferStatus::Completed),
            "credit_failed" => Some(TransferStatus::CreditFailed),
            "replayed" => Some(TransferStatus::Replayed),
            "abandoned" => Some(TransferStatus::Abandoned),
            _ => None,
        }
    }
}

/// Intent row written around every multi-document withdraw.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerTransfer {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub source_id: String,
    pub destination_id: String,
    pub by_id: String,
    pub by_role: String,
    pub day: String,
    #[serde(default, deserialize_with = "de_amount")]
    pub requested: f64,
    #[serde(default, deserialize_with = "de_amount")]
    pub debited: f64,
    #[serde(default)]
    pub breakdown: Vec<DebitLine>,
    pub status: TransferStatus,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime,
    #[serde(default)]
    pub updated_at: Option<DateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryItem {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub manager_id: ObjectId,
    pub name: String,
    #[serde(default, deserialize_with = "de_amount")]
    pub qty: f64,
    #[serde(default, deserialize_with = "de_amount")]
    pub cost_price: f64,
    #[serde(default, deserialize_with = "de_amount")]
    pub selling_price: f64,
    #[serde(default)]
    pub branch_name: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstantSale {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub manager_id: ObjectId,
    #[serde(default)]
    pub branch_id: Option<String>,
    #[serde(default)]
    pub branch_name: Option<String>,
    pub product_id: ObjectId,
    pub product_name: String,
    #[serde(default, deserialize_with = "de_amount")]
    pub qty: f64,
    #[serde(default, deserialize_with = "de_amount")]
    pub unit_price: f64,
    #[serde(default, deserialize_with = "de_opt_amount")]
    pub total_amount: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_amount")]
    pub grand_total: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_amount")]
    pub amount: Option<f64>,
    pub date_dt: DateTime,
}

impl InstantSale {
    /// First positive of total_amount, grand_total, amount.
    pub fn sale_value(&self) -> f64 {
        [self.total_amount, self.grand_total, self.amount]
            .into_iter()
            .flatten()
            .find(|v| *v > 0.0)
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutflowProduct {
    #[serde(default, deserialize_with = "de_opt_amount")]
    pub quantity: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_amount")]
    pub qty: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_amount")]
    pub cost_price: Option<f64>,
}

/// Line-level inventory outflow (sales, deliveries, card closures).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutflowRecord {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub manager_id: Option<ObjectId>,
    #[serde(default)]
    pub branch_id: Option<String>,
    #[serde(default)]
    pub product_id: Option<ObjectId>,
    #[serde(default, deserialize_with = "de_opt_amount")]
    pub qty: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_amount")]
    pub quantity: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_amount")]
    pub selected_qty: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_amount")]
    pub package_qty: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_amount")]
    pub unit_cost_price: Option<f64>,
    #[serde(default)]
    pub selected_product: Option<OutflowProduct>,
    #[serde(default)]
    pub packaged_product: Option<OutflowProduct>,
    #[serde(default)]
    pub closed_product: Option<OutflowProduct>,
    #[serde(default)]
    pub created_at: Option<DateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivateLedgerEntry {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub entry_type: String,
    pub status: String,
    #[serde(default, deserialize_with = "de_amount")]
    pub amount: f64,
    #[serde(default)]
    pub product_id: Option<ObjectId>,
    #[serde(default)]
    pub purpose_text: Option<String>,
    #[serde(default)]
    pub memo: Option<String>,
    #[serde(default)]
    pub manager_id: Option<ObjectId>,
    #[serde(default)]
    pub branch_id: Option<String>,
    pub date_dt: DateTime,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExpenseStatus {
    #[serde(alias = "Pending")]
    Unapproved,
    Approved,
    Rejected,
}

impl ExpenseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpenseStatus::Unapproved => "Unapproved",
            ExpenseStatus::Approved => "Approved",
            ExpenseStatus::Rejected => "Rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "unapproved" | "pending" => Some(ExpenseStatus::Unapproved),
            "approved" => Some(ExpenseStatus::Approved),
            "rejected" => Some(ExpenseStatus::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerExpense {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub manager_id: ObjectId,
    pub category: String,
    #[serde(default, deserialize_with = "de_amount")]
    pub amount: f64,
    pub status: ExpenseStatus,
    #[serde(default)]
    pub description: String,
    pub date: String,
    pub date_dt: DateTime,
    #[serde(default)]
    pub reviewed_by: Option<ObjectId>,
    #[serde(default)]
    pub reviewed_at: Option<DateTime>,
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub created_at: Option<DateTime>,
}

/// Expense entered by accounting (not tied to a manager).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountingExpense {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub category: String,
    #[serde(default, deserialize_with = "de_amount")]
    pub amount: f64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub branch_id: Option<String>,
    #[serde(default)]
    pub branch_name: Option<String>,
    pub date_dt: DateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockEntry {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub product_name: String,
    #[serde(default, deserialize_with = "de_opt_amount")]
    pub quantity: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_amount")]
    pub unit_price: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_amount")]
    pub total_cost: Option<f64>,
    #[serde(default)]
    pub branch_id: Option<String>,
    #[serde(default)]
    pub branch_name: Option<String>,
    pub purchased_at: DateTime,
}

impl StockEntry {
    pub fn cost(&self) -> f64 {
        match self.total_cost {
            Some(total) => total,
            None => self.quantity.unwrap_or(0.0) * self.unit_price.unwrap_or(0.0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnInward {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub status: String,
    #[serde(default, deserialize_with = "de_amount")]
    pub sales_reduction_amount: f64,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub branch_id: Option<String>,
    #[serde(default)]
    pub branch_name: Option<String>,
    pub return_date_dt: DateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnOutward {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub status: String,
    #[serde(default, deserialize_with = "de_amount")]
    pub total_cost: f64,
    #[serde(default)]
    pub supplier: String,
    #[serde(default)]
    pub branch_id: Option<String>,
    #[serde(default)]
    pub branch_name: Option<String>,
    pub date_dt: DateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomeEntry {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub status: String,
    pub category: String,
    #[serde(default, deserialize_with = "de_amount")]
    pub amount: f64,
    #[serde(default)]
    pub branch_id: Option<String>,
    #[serde(default)]
    pub branch_name: Option<String>,
    pub date_dt: DateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchClosingTotal {
    #[serde(default)]
    pub branch_id: Option<String>,
    #[serde(default)]
    pub branch_name: Option<String>,
    #[serde(default, deserialize_with = "de_amount")]
    pub closing_cost_value: f64,
}

/// Yearly stock closing snapshot header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockClosing {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub closing_year: i32,
    pub status: String,
    #[serde(default, deserialize_with = "de_opt_amount")]
    pub total_closing_cost_value: Option<f64>,
    #[serde(default)]
    pub branch_totals: Vec<BranchClosingTotal>,
    #[serde(default)]
    pub created_at: Option<DateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockClosingLine {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub closing_year: i32,
    #[serde(default)]
    pub manager_id: Option<ObjectId>,
    #[serde(default)]
    pub manager_name: String,
    #[serde(default)]
    pub branch_id: Option<String>,
    #[serde(default)]
    pub branch_name: String,
    #[serde(default, deserialize_with = "de_amount")]
    pub closing_cost_value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeductionLine {
    pub deduction_id: String,
    #[serde(default, deserialize_with = "de_amount")]
    pub amount: f64,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub date: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AdjustmentKind {
    Add,
    Deduct,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PayrollAdjustment {
    #[serde(rename = "type")]
    pub kind: AdjustmentKind,
    #[serde(default, deserialize_with = "de_amount")]
    pub amount: f64,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub by: String,
    #[serde(default)]
    pub at: Option<DateTime>,
}

/// One record per (employee, month); figures are recomputed explicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayrollRecord {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub employee_id: String,
    #[serde(default)]
    pub employee_name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub branch: String,
    pub month: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub note: String,
    #[serde(default, deserialize_with = "de_amount")]
    pub basic_salary: f64,
    #[serde(default, deserialize_with = "de_amount")]
    pub allowances: f64,
    #[serde(default, deserialize_with = "de_amount")]
    pub gross: f64,
    #[serde(default, deserialize_with = "de_amount")]
    pub ssf_employee: f64,
    #[serde(default, deserialize_with = "de_amount")]
    pub taxable: f64,
    #[serde(default, deserialize_with = "de_amount")]
    pub paye: f64,
    #[serde(default, deserialize_with = "de_amount")]
    pub deductions_total: f64,
    #[serde(default, deserialize_with = "de_amount")]
    pub net_pay: f64,
    #[serde(default, deserialize_with = "de_amount")]
    pub adjust_add: f64,
    #[serde(default, deserialize_with = "de_amount")]
    pub adjust_deduct: f64,
    #[serde(default, deserialize_with = "de_amount")]
    pub final_net: f64,
    #[serde(default, deserialize_with = "de_amount")]
    pub employer_13: f64,
    #[serde(default, deserialize_with = "de_amount")]
    pub total_staff_cost: f64,
    #[serde(default, deserialize_with = "de_amount")]
    pub tier1: f64,
    #[serde(default, deserialize_with = "de_amount")]
    pub tier2: f64,
    #[serde(default)]
    pub deductions: Vec<DeductionLine>,
    #[serde(default)]
    pub adjustments: Vec<PayrollAdjustment>,
    #[serde(default)]
    pub created_at: Option<DateTime>,
    #[serde(default)]
    pub updated_at: Option<DateTime>,
}

impl PayrollRecord {
    /// Zeroed record for an employee and month.
    pub fn blank(employee_id: &str, month: &str) -> Self {
        PayrollRecord {
            id: None,
            employee_id: employee_id.to_string(),
            employee_name: String::new(),
            role: String::new(),
            branch: String::new(),
            month: month.to_string(),
            status: String::new(),
            note: String::new(),
            basic_salary: 0.0,
            allowances: 0.0,
            gross: 0.0,
            ssf_employee: 0.0,
            taxable: 0.0,
            paye: 0.0,
            deductions_total: 0.0,
            net_pay: 0.0,
            adjust_add: 0.0,
            adjust_deduct: 0.0,
            final_net: 0.0,
            employer_13: 0.0,
            total_staff_cost: 0.0,
            tier1: 0.0,
            tier2: 0.0,
            deductions: Vec::new(),
            adjustments: Vec::new(),
            created_at: None,
            updated_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayrollDeduction {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub employee_id: String,
    pub month: String,
    #[serde(default, deserialize_with = "de_amount")]
    pub amount: f64,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub date: String,
    pub created_at: DateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayrollAudit {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub action: String,
    pub entity: String,
    pub entity_id: String,
    #[serde(default)]
    pub meta: Document,
    pub created_at: DateTime,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BankAccountType {
    Bank,
    MobileMoney,
    Cash,
}

impl BankAccountType {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "bank" => Some(BankAccountType::Bank),
            "mobile_money" => Some(BankAccountType::MobileMoney),
            "cash" => Some(BankAccountType::Cash),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BankAccountType::Bank => "Bank",
            BankAccountType::MobileMoney => "Mobile Money",
            BankAccountType::Cash => "Cash",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankAccount {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub account_type: BankAccountType,
    pub bank_name: String,
    #[serde(default)]
    pub account_name: String,
    #[serde(default)]
    pub account_no: String,
    #[serde(default)]
    pub currency: String,
    #[serde(default, deserialize_with = "de_amount")]
    pub opening_balance: f64,
    #[serde(default)]
    pub last_reconciled: Option<DateTime>,
    #[serde(default, deserialize_with = "de_opt_amount")]
    pub reconciled_balance: Option<f64>,
    #[serde(default)]
    pub created_at: Option<DateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerDeposit {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub bank_id: ObjectId,
    pub manager_id: ObjectId,
    #[serde(default, deserialize_with = "de_amount")]
    pub amount: f64,
    #[serde(default)]
    pub note: String,
    pub date_dt: DateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankWithdrawal {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub bank_id: ObjectId,
    #[serde(default, deserialize_with = "de_amount")]
    pub amount: f64,
    #[serde(default)]
    pub purpose: String,
    pub status: String,
    pub created_by: ObjectId,
    pub date_dt: DateTime,
}
