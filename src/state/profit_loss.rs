// Gathers the Trading / Profit & Loss inputs from every source collection.
// Missing branch linkage or missing snapshots degrade into `todo_notes`, never errors.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::Result;
use chrono::Datelike;
use futures::stream::TryStreamExt;
use mongodb::{
    Collection,
    bson::{self, Bson, DateTime, Document, doc, oid::ObjectId},
};
use serde::Serialize;

use crate::models::{OutflowRecord, PayrollRecord};
use crate::money::round2;
use crate::period::Period;
use crate::profit_loss::{
    CategoryAmount, CogsSummary, IncomeKind, Statement, StatementInputs, accounting_category,
    classify_payroll, compute_statement, income_kind, legacy_cogs_differs, manager_opex_category,
    sorted_categories, sum_by_keywords, summarize_cogs,
};

use super::{AppState, bson_datetime, bson_f64, to_double};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelAmount {
    pub label: String,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountedLine {
    pub label: String,
    pub amount: f64,
    pub count: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SalesInfo {
    pub sales_total: f64,
    pub payments_total: f64,
    pub payments_count: u64,
    pub instant_sales_total: f64,
    pub instant_sales_count: u64,
    pub breakdown: Vec<LabelAmount>,
    pub excluded_counts: BTreeMap<String, u64>,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManagerStockLine {
    pub manager_name: String,
    pub branch_name: String,
    pub amount: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StockPosition {
    pub year: i32,
    pub amount: f64,
    pub source: String,
    pub breakdown: Vec<ManagerStockLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CarriageLine {
    pub manager_id: String,
    pub manager_name: String,
    pub branch: String,
    pub amount: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfitLossReport {
    pub label: String,
    pub from: String,
    pub to: String,
    pub branch_id: Option<String>,
    pub statement: Statement,
    pub sales_info: SalesInfo,
    pub returns_inwards_count: u64,
    pub opening_stock: StockPosition,
    pub closing_stock: StockPosition,
    pub purchases_breakdown: Vec<CountedLine>,
    pub returns_outwards_count: u64,
    pub carriage_inwards_breakdown: Vec<CarriageLine>,
    pub carriage_inwards_count: u64,
    pub goods_drawn_breakdown: Vec<CountedLine>,
    pub goods_drawn_count: u64,
    pub cogs: CogsSummary,
    pub wages_source: String,
    pub salaries: f64,
    pub income_count: u64,
    pub manager_opex_total: f64,
    pub manager_opex: Vec<CategoryAmount>,
    pub manager_opex_count: u64,
    pub accounting_opex_total: f64,
    pub accounting_opex_count: u64,
    pub opex_breakdown: Vec<CategoryAmount>,
    pub todo_notes: Vec<String>,
}

/// Cache key for a report: the normalised period bounds plus the branch.
pub fn report_cache_key(period: &Period, branch_id: Option<&str>) -> String {
    format!("{}|{}|{}", period.from, period.to, branch_id.unwrap_or(""))
}

/// Cached report for a period. `debug` bypasses the cache and logs degraded sources.
pub async fn profit_loss_report(
    state: &AppState,
    period: &Period,
    branch_id: Option<&str>,
    debug: bool,
) -> Result<Arc<ProfitLossReport>> {
    let branch_id = branch_id.map(str::trim).filter(|b| !b.is_empty());
    let key = report_cache_key(period, branch_id);
    if !debug {
        if let Some(hit) = state.report_cache.get(&key) {
            tracing::debug!(key = %key, "profit & loss served from cache");
            return Ok(hit);
        }
    }

    let report = Arc::new(gather_report(state, period, branch_id).await?);
    if debug && !report.todo_notes.is_empty() {
        tracing::warn!(notes = %report.todo_notes.join("; "), "profit & loss degraded sources");
    }
    state.report_cache.insert(key, report.clone());
    Ok(report)
}

#[derive(Debug, Clone, PartialEq)]
struct BranchFilter {
    raw: String,
    oid: Option<ObjectId>,
}

impl BranchFilter {
    fn parse(raw: Option<&str>) -> Option<Self> {
        let raw = raw?.trim();
        if raw.is_empty() {
            return None;
        }
        Some(BranchFilter {
            raw: raw.to_string(),
            oid: ObjectId::parse_str(raw).ok(),
        })
    }

    /// Matches a stored `branch_id` written either as an ObjectId or as text.
    fn id_match(&self) -> Bson {
        match self.oid {
            Some(oid) => Bson::Document(doc! { "$in": [oid, self.raw.as_str()] }),
            None => Bson::String(self.raw.clone()),
        }
    }

    fn matches_entry(&self, entry: &Document) -> bool {
        match entry.get("branch_id") {
            Some(Bson::ObjectId(id)) if Some(*id) == self.oid => return true,
            Some(Bson::String(s)) if *s == self.raw => return true,
            _ => {}
        }
        matches!(entry.get("branch_name"), Some(Bson::String(s)) if *s == self.raw)
    }
}

enum BranchScope {
    All,
    Filter(Document),
    Unavailable,
}

fn raw<T: Send + Sync>(coll: &Collection<T>) -> Collection<Document> {
    coll.clone_with_type::<Document>()
}

fn keyed(key: &str, value: impl Into<Bson>) -> Document {
    let mut d = Document::new();
    d.insert(key, value);
    d
}

fn merge(filter: &mut Document, extra: Document) {
    for (k, v) in extra {
        filter.insert(k, v);
    }
}

fn amount(doc: &Document, key: &str) -> f64 {
    bson_f64(doc.get(key))
}

fn text<'d>(doc: &'d Document, key: &str) -> Option<&'d str> {
    doc.get_str(key).ok().map(str::trim).filter(|s| !s.is_empty())
}

/// Hex for ObjectIds, the text itself for strings.
fn id_key(value: Option<&Bson>) -> Option<String> {
    match value {
        Some(Bson::ObjectId(id)) => Some(id.to_hex()),
        Some(Bson::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

fn dedup_notes(notes: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(notes.len());
    for note in notes {
        if !out.contains(&note) {
            out.push(note);
        }
    }
    out
}

fn by_amount_desc(totals: HashMap<String, (f64, u64)>) -> Vec<CountedLine> {
    let mut rows: Vec<CountedLine> = totals
        .into_iter()
        .map(|(label, (amount, count))| CountedLine {
            label,
            amount: round2(amount),
            count,
        })
        .collect();
    rows.sort_by(|a, b| b.amount.total_cmp(&a.amount).then_with(|| a.label.cmp(&b.label)));
    rows
}

struct Gatherer<'a> {
    state: &'a AppState,
    start: DateTime,
    end: DateTime,
    from: String,
    to: String,
    branch: Option<BranchFilter>,
    notes: Vec<String>,
}

impl Gatherer<'_> {
    async fn field_exists(&self, coll: &Collection<Document>, field: &str) -> bool {
        match coll
            .find_one(keyed(field, doc! { "$exists": true }))
            .projection(keyed(field, 1))
            .await
        {
            Ok(found) => found.is_some(),
            Err(err) => {
                tracing::warn!(collection = coll.name(), field, error = %err, "field probe failed");
                false
            }
        }
    }

    fn dt_range(&self) -> Document {
        doc! { "$gte": self.start, "$lte": self.end }
    }

    /// Prefers `date_dt`, then the `date` string, then `created_at`.
    async fn date_match(&self, coll: &Collection<Document>) -> (Document, &'static str) {
        if self.field_exists(coll, "date_dt").await {
            return (doc! { "date_dt": self.dt_range() }, "date_dt range");
        }
        if self.field_exists(coll, "date").await {
            return (
                doc! { "date": { "$gte": self.from.as_str(), "$lte": self.to.as_str() } },
                "date string range",
            );
        }
        (doc! { "created_at": self.dt_range() }, "created_at range")
    }

    /// `$or` over whichever of branch_id / branch_name the collection carries.
    async fn branch_any(&self, coll: &Collection<Document>) -> BranchScope {
        let Some(branch) = &self.branch else {
            return BranchScope::All;
        };
        let mut ors = Vec::new();
        if self.field_exists(coll, "branch_id").await {
            ors.push(doc! { "branch_id": branch.id_match() });
        }
        if self.field_exists(coll, "branch_name").await {
            ors.push(doc! { "branch_name": branch.raw.as_str() });
        }
        if ors.is_empty() {
            BranchScope::Unavailable
        } else {
            BranchScope::Filter(doc! { "$or": ors })
        }
    }

    /// branch_id when present, otherwise branch_name.
    async fn branch_first(&self, coll: &Collection<Document>) -> BranchScope {
        let Some(branch) = &self.branch else {
            return BranchScope::All;
        };
        if self.field_exists(coll, "branch_id").await {
            BranchScope::Filter(doc! { "branch_id": branch.id_match() })
        } else if self.field_exists(coll, "branch_name").await {
            BranchScope::Filter(doc! { "branch_name": branch.raw.as_str() })
        } else {
            BranchScope::Unavailable
        }
    }

    fn apply(&mut self, filter: &mut Document, scope: BranchScope, unavailable: Option<&str>) {
        match scope {
            BranchScope::All => {}
            BranchScope::Filter(extra) => merge(filter, extra),
            BranchScope::Unavailable => {
                if let Some(note) = unavailable {
                    self.notes.push(note.to_string());
                }
            }
        }
    }

    /// Manager ids (as ObjectId and as hex text) belonging to the branch filter.
    async fn branch_managers(&mut self, context: &str) -> Result<Vec<Bson>> {
        let Some(branch) = self.branch.clone() else {
            return Ok(Vec::new());
        };
        let users = raw(&self.state.users);
        let mut ors = Vec::new();
        if self.field_exists(&users, "branch_id").await {
            ors.push(doc! { "branch_id": branch.id_match() });
        }
        if self.field_exists(&users, "branch_name").await {
            ors.push(doc! { "branch_name": branch.raw.as_str() });
        }
        if self.field_exists(&users, "branch").await {
            ors.push(doc! { "branch": branch.raw.as_str() });
        }
        if ors.is_empty() {
            self.notes.push(format!(
                "Branch filter ignored for {context}; users branch fields unavailable"
            ));
            return Ok(Vec::new());
        }

        let mut cursor = users
            .find(doc! { "role": "manager", "$or": ors })
            .projection(doc! { "_id": 1 })
            .await?;
        let mut ids = Vec::new();
        while let Some(user) = cursor.try_next().await? {
            if let Ok(oid) = user.get_object_id("_id") {
                ids.push(Bson::ObjectId(oid));
                ids.push(Bson::String(oid.to_hex()));
            }
        }
        if ids.is_empty() {
            self.notes.push(format!(
                "Branch filter applied for {context} returned no managers"
            ));
        }
        Ok(ids)
    }

    /// Approved manager expenses in range, restricted to the branch's managers.
    async fn manager_expense_match(&mut self, context: &str) -> Result<Document> {
        let coll = raw(&self.state.manager_expenses);
        let (mut filter, how) = self.date_match(&coll).await;
        self.notes.push(format!("manager expenses filtered via {how}"));
        if self.field_exists(&coll, "status").await {
            filter.insert("status", "Approved");
        }
        if self.branch.is_some() {
            let ids = self.branch_managers(context).await?;
            if ids.is_empty() {
                filter.insert("manager_id", "__none__");
            } else {
                filter.insert("manager_id", doc! { "$in": ids });
            }
        }
        Ok(filter)
    }

    async fn sales(&mut self) -> Result<SalesInfo> {
        let payments = raw(&self.state.payments);
        let mut info = SalesInfo::default();

        let (mut filter, how) = self.date_match(&payments).await;
        info.notes.push(format!("payments filtered via {how}"));
        if self.field_exists(&payments, "status").await {
            filter.insert("status", "confirmed");
        } else {
            info.notes
                .push("payments.status not found; sales uses all payment rows".to_string());
        }
        let scope = self.branch_first(&payments).await;
        self.apply(&mut filter, scope, None);
        let base = filter.clone();
        filter.insert("payment_type", doc! { "$ne": "WITHDRAWAL" });

        let mut by_method: HashMap<String, f64> = HashMap::new();
        let mut cursor = payments
            .find(filter)
            .projection(doc! { "amount": 1, "method": 1 })
            .await?;
        while let Some(row) = cursor.try_next().await? {
            let amt = amount(&row, "amount");
            if amt <= 0.0 {
                continue;
            }
            info.payments_total += amt;
            info.payments_count += 1;
            let method = text(&row, "method").unwrap_or("Other").to_string();
            *by_method.entry(method).or_insert(0.0) += amt;
        }
        info.breakdown = sorted_categories(&by_method)
            .into_iter()
            .map(|c| LabelAmount {
                label: c.category,
                amount: round2(c.amount),
            })
            .collect();

        let instant = raw(&self.state.instant_sales);
        let (mut inst_filter, _) = self.date_match(&instant).await;
        let scope = self.branch_first(&instant).await;
        self.apply(&mut inst_filter, scope, None);
        let mut cursor = instant
            .find(inst_filter)
            .projection(doc! { "total_amount": 1, "grand_total": 1, "amount": 1 })
            .await?;
        while let Some(row) = cursor.try_next().await? {
            let amt = ["total_amount", "grand_total", "amount"]
                .iter()
                .map(|k| amount(&row, k))
                .find(|v| *v > 0.0);
            if let Some(amt) = amt {
                info.instant_sales_total += amt;
                info.instant_sales_count += 1;
            }
        }

        for excluded in ["SUSU", "WITHDRAWAL"] {
            let mut q = base.clone();
            q.insert("payment_type", excluded);
            let n = payments.count_documents(q).await?;
            info.excluded_counts.insert(excluded.to_lowercase(), n);
        }

        info.payments_total = round2(info.payments_total);
        info.instant_sales_total = round2(info.instant_sales_total);
        info.sales_total = round2(info.payments_total + info.instant_sales_total);
        Ok(info)
    }

    async fn returns_inwards(&mut self) -> Result<(f64, u64)> {
        let coll = raw(&self.state.returns_inwards);
        let mut filter = doc! { "status": "Approved", "return_date_dt": self.dt_range() };
        let scope = self.branch_any(&coll).await;
        self.apply(
            &mut filter,
            scope,
            Some("returns_inwards branch filter ignored; branch fields not found"),
        );
        self.sum_positive(&coll, filter, "sales_reduction_amount").await
    }

    async fn sum_positive(
        &self,
        coll: &Collection<Document>,
        filter: Document,
        field: &str,
    ) -> Result<(f64, u64)> {
        let mut cursor = coll.find(filter).projection(keyed(field, 1)).await?;
        let (mut total, mut count) = (0.0, 0);
        while let Some(row) = cursor.try_next().await? {
            let amt = amount(&row, field);
            if amt > 0.0 {
                total += amt;
                count += 1;
            }
        }
        Ok((round2(total), count))
    }

    async fn stock_entry_purchases(&mut self) -> Result<(f64, u64)> {
        let coll = raw(&self.state.stock_entries);
        let mut filter = doc! { "purchased_at": self.dt_range() };
        let scope = self.branch_first(&coll).await;
        self.apply(
            &mut filter,
            scope,
            Some("Purchases branch filter not available on stock_entries; missing branch fields."),
        );
        let mut cursor = coll
            .find(filter)
            .projection(doc! { "total_cost": 1, "quantity": 1, "unit_price": 1 })
            .await?;
        let (mut total, mut count) = (0.0, 0);
        while let Some(row) = cursor.try_next().await? {
            total += match row.get("total_cost") {
                Some(Bson::Null) | None => amount(&row, "quantity") * amount(&row, "unit_price"),
                Some(_) => amount(&row, "total_cost"),
            };
            count += 1;
        }
        Ok((round2(total), count))
    }

    async fn stock_mini_purchases(&mut self) -> Result<(f64, u64)> {
        let mut filter = self.manager_expense_match("manager stock (mini)").await?;
        filter.insert("category", doc! { "$regex": r"^Stock\s*\(mini\)$", "$options": "i" });
        let coll = raw(&self.state.manager_expenses);
        self.sum_positive(&coll, filter, "amount").await
    }

    async fn returns_outwards(&mut self) -> Result<(f64, u64)> {
        let coll = raw(&self.state.returns_outwards);
        let mut filter = doc! { "status": "posted", "date_dt": self.dt_range() };
        let scope = self.branch_first(&coll).await;
        self.apply(
            &mut filter,
            scope,
            Some("Returns outwards branch filter unavailable; branch fields missing."),
        );
        self.sum_positive(&coll, filter, "total_cost").await
    }

    async fn goods_drawn(&mut self) -> Result<(f64, u64, Vec<CountedLine>)> {
        let coll = raw(&self.state.private_ledger);
        let mut filter = doc! {
            "entry_type": "goods_drawn",
            "status": "posted",
            "date_dt": self.dt_range(),
        };
        if let Some(branch) = self.branch.clone() {
            if self.field_exists(&coll, "branch_id").await {
                filter.insert("branch_id", branch.id_match());
            } else {
                let ids = self.branch_managers("goods drawn").await?;
                if ids.is_empty() {
                    self.notes.push(
                        "Goods drawn branch filter not available; no managers found for branch."
                            .to_string(),
                    );
                } else {
                    let mut ors = Vec::new();
                    for field in ["created_by", "manager_id", "agent_id"] {
                        if self.field_exists(&coll, field).await {
                            ors.push(keyed(field, doc! { "$in": ids.clone() }));
                        }
                    }
                    if ors.is_empty() {
                        self.notes.push(
                            "Goods drawn branch filter not available; missing linkage fields on private ledger."
                                .to_string(),
                        );
                    } else {
                        filter.insert("$or", ors);
                    }
                }
            }
        }

        let mut cursor = coll
            .find(filter)
            .projection(doc! { "product_id": 1, "purpose_text": 1, "memo": 1, "amount": 1 })
            .await?;
        let (mut total, mut count) = (0.0, 0);
        let mut groups: HashMap<String, (Option<ObjectId>, String, f64, u64)> = HashMap::new();
        while let Some(row) = cursor.try_next().await? {
            let amt = amount(&row, "amount");
            if amt <= 0.0 {
                continue;
            }
            total += amt;
            count += 1;
            let memo = text(&row, "purpose_text")
                .or_else(|| text(&row, "memo"))
                .unwrap_or("")
                .to_string();
            let product = id_key(row.get("product_id"));
            let key = product
                .clone()
                .unwrap_or_else(|| if memo.is_empty() { "Goods Drawn".to_string() } else { memo.clone() });
            let entry = groups.entry(key).or_insert_with(|| {
                (product.as_deref().and_then(|p| ObjectId::parse_str(p).ok()), memo, 0.0, 0)
            });
            entry.2 += amt;
            entry.3 += 1;
        }

        let product_ids: Vec<ObjectId> = groups.values().filter_map(|g| g.0).collect();
        let mut names: HashMap<ObjectId, String> = HashMap::new();
        if !product_ids.is_empty() {
            let mut cursor = raw(&self.state.inventory)
                .find(doc! { "_id": { "$in": product_ids } })
                .projection(doc! { "name": 1 })
                .await?;
            while let Some(item) = cursor.try_next().await? {
                if let (Ok(id), Some(name)) = (item.get_object_id("_id"), text(&item, "name")) {
                    names.insert(id, name.to_string());
                }
            }
        }

        let mut labelled: HashMap<String, (f64, u64)> = HashMap::new();
        for (product, memo, amt, n) in groups.into_values() {
            let fallback = if memo.is_empty() { "Goods Drawn".to_string() } else { memo };
            let label = product
                .and_then(|id| names.get(&id).cloned())
                .unwrap_or(fallback);
            let slot = labelled.entry(label).or_insert((0.0, 0));
            slot.0 += amt;
            slot.1 += n;
        }
        Ok((round2(total), count, by_amount_desc(labelled)))
    }

    async fn income(&mut self) -> Result<(f64, f64, f64, u64)> {
        let coll = raw(&self.state.income_entries);
        let mut filter = doc! { "status": "posted", "date_dt": self.dt_range() };
        let scope = self.branch_any(&coll).await;
        self.apply(
            &mut filter,
            scope,
            Some("Income branch filter ignored; missing branch_id/branch_name"),
        );

        let mut cursor = coll
            .find(filter)
            .projection(doc! { "category": 1, "amount": 1 })
            .await?;
        let (mut discount, mut investment, mut other, mut count) = (0.0, 0.0, 0.0, 0);
        while let Some(row) = cursor.try_next().await? {
            count += 1;
            let amt = amount(&row, "amount");
            if amt <= 0.0 {
                continue;
            }
            match row.get_str("category").ok().and_then(income_kind) {
                Some(IncomeKind::DiscountReceived) => discount += amt,
                Some(IncomeKind::InvestmentIncome) => investment += amt,
                Some(IncomeKind::OtherIncomes) => other += amt,
                None => {}
            }
        }
        Ok((round2(discount), round2(investment), round2(other), count))
    }

    async fn carriage_inwards(&mut self) -> Result<(f64, u64, Vec<CarriageLine>)> {
        let mut filter = self.manager_expense_match("carriage inwards").await?;
        filter.insert("category", doc! { "$regex": r"^Carriage\s+Inwards$", "$options": "i" });

        let mut cursor = raw(&self.state.manager_expenses)
            .find(filter)
            .projection(doc! { "manager_id": 1, "amount": 1 })
            .await?;
        let mut totals: HashMap<String, f64> = HashMap::new();
        let mut count = 0;
        while let Some(row) = cursor.try_next().await? {
            let amt = amount(&row, "amount");
            if amt <= 0.0 {
                continue;
            }
            let key = id_key(row.get("manager_id")).unwrap_or_else(|| "unknown".to_string());
            *totals.entry(key).or_insert(0.0) += amt;
            count += 1;
        }

        let oids: Vec<ObjectId> = totals
            .keys()
            .filter_map(|k| ObjectId::parse_str(k).ok())
            .collect();
        let mut info: HashMap<String, (String, String)> = HashMap::new();
        if !oids.is_empty() {
            let mut cursor = raw(&self.state.users)
                .find(doc! { "_id": { "$in": oids } })
                .projection(doc! { "name": 1, "branch": 1, "branch_name": 1 })
                .await?;
            while let Some(user) = cursor.try_next().await? {
                if let Ok(id) = user.get_object_id("_id") {
                    let name = text(&user, "name").unwrap_or("Manager").to_string();
                    let branch = text(&user, "branch")
                        .or_else(|| text(&user, "branch_name"))
                        .unwrap_or("")
                        .to_string();
                    info.insert(id.to_hex(), (name, branch));
                }
            }
        }

        let mut rows: Vec<CarriageLine> = totals
            .into_iter()
            .map(|(manager_id, amt)| {
                let (manager_name, branch) = info
                    .get(&manager_id)
                    .cloned()
                    .unwrap_or_else(|| ("Manager".to_string(), String::new()));
                CarriageLine {
                    manager_id,
                    manager_name,
                    branch,
                    amount: round2(amt),
                }
            })
            .collect();
        rows.sort_by(|a, b| b.amount.total_cmp(&a.amount));
        let total = round2(rows.iter().map(|r| r.amount).sum());
        Ok((total, count, rows))
    }

    async fn manager_opex(&mut self) -> Result<(HashMap<String, f64>, u64)> {
        let filter = self.manager_expense_match("manager expenses").await?;
        let mut cursor = raw(&self.state.manager_expenses)
            .find(filter)
            .projection(doc! { "amount": 1, "category": 1 })
            .await?;
        let mut totals = HashMap::new();
        let mut count = 0;
        while let Some(row) = cursor.try_next().await? {
            let amt = amount(&row, "amount");
            if amt <= 0.0 {
                continue;
            }
            if let Some(cat) = manager_opex_category(row.get_str("category").unwrap_or("")) {
                *totals.entry(cat).or_insert(0.0) += amt;
                count += 1;
            }
        }
        Ok((totals, count))
    }

    async fn accounting_opex(&mut self) -> Result<(HashMap<String, f64>, u64)> {
        let coll = raw(&self.state.expenses);
        let (mut filter, how) = self.date_match(&coll).await;
        self.notes
            .push(format!("accounting expenses filtered via {how}"));
        let scope = self.branch_any(&coll).await;
        self.apply(
            &mut filter,
            scope,
            Some("Accounting expenses branch filter ignored; branch fields missing."),
        );

        let mut cursor = coll
            .find(filter)
            .projection(doc! { "amount": 1, "category": 1 })
            .await?;
        let mut totals = HashMap::new();
        let mut count = 0;
        while let Some(row) = cursor.try_next().await? {
            let amt = amount(&row, "amount");
            if amt <= 0.0 {
                continue;
            }
            let cat = accounting_category(row.get_str("category").unwrap_or(""));
            *totals.entry(cat).or_insert(0.0) += amt;
            count += 1;
        }
        Ok((totals, count))
    }

    /// (wages, salaries) from payroll records of the period's months; None when there are none.
    async fn payroll(&mut self, months: &[String]) -> Result<Option<(f64, f64)>> {
        if months.is_empty() {
            return Ok(None);
        }
        let coll = raw(&self.state.payroll_records);
        let mut filter = doc! { "month": { "$in": months } };
        if let Some(branch) = self.branch.clone() {
            if self.field_exists(&coll, "branch_id").await {
                filter.insert("branch_id", branch.id_match());
            } else if self.field_exists(&coll, "branch").await {
                filter.insert("branch", branch.raw.as_str());
            } else if self.field_exists(&coll, "branch_name").await {
                filter.insert("branch_name", branch.raw.as_str());
            }
        }

        let mut cursor = coll
            .find(filter)
            .projection(doc! { "total_staff_cost": 1, "basic_salary": 1, "allowances": 1, "role": 1 })
            .await?;
        let mut records = Vec::new();
        while let Some(row) = cursor.try_next().await? {
            let mut rec = PayrollRecord::blank("", "");
            rec.role = row.get_str("role").unwrap_or("").to_string();
            rec.total_staff_cost = amount(&row, "total_staff_cost");
            rec.basic_salary = amount(&row, "basic_salary");
            rec.allowances = amount(&row, "allowances");
            records.push(rec);
        }
        if records.is_empty() {
            return Ok(None);
        }
        let (wages, salaries) = classify_payroll(&records);
        Ok(Some((round2(wages), round2(salaries))))
    }

    async fn snapshot_total(&self, year: i32) -> Result<Option<(f64, String)>> {
        let header = raw(&self.state.stock_closings)
            .find_one(doc! { "closing_year": year, "status": "completed" })
            .await?;
        if let Some(header) = header {
            match &self.branch {
                Some(branch) => {
                    let entries = header.get_array("branch_totals").map(|a| a.as_slice()).unwrap_or(&[]);
                    for entry in entries.iter().filter_map(Bson::as_document) {
                        if branch.matches_entry(entry) {
                            let name = text(entry, "branch_name").unwrap_or(branch.raw.as_str());
                            return Ok(Some((
                                amount(entry, "closing_cost_value"),
                                format!("Snapshot {year} closing ({name})"),
                            )));
                        }
                    }
                }
                None => {
                    if !matches!(header.get("total_closing_cost_value"), None | Some(Bson::Null)) {
                        return Ok(Some((
                            amount(&header, "total_closing_cost_value"),
                            format!("Snapshot {year} closing"),
                        )));
                    }
                }
            }
        }

        let lines = raw(&self.state.stock_closing_lines);
        let mut filter = doc! { "closing_year": year };
        if let BranchScope::Filter(extra) = self.branch_any(&lines).await {
            merge(&mut filter, extra);
        }
        let mut cursor = lines
            .find(filter)
            .projection(doc! { "closing_cost_value": 1 })
            .await?;
        let mut total = 0.0;
        while let Some(line) = cursor.try_next().await? {
            total += amount(&line, "closing_cost_value");
        }
        if total == 0.0 {
            return Ok(None);
        }
        let mut source = format!("Snapshot {year} closing (line details)");
        if self.branch.is_some() {
            source.push_str(" (filtered branch)");
        }
        Ok(Some((round2(total), source)))
    }

    async fn snapshot_breakdown(&self, year: i32) -> Result<Vec<ManagerStockLine>> {
        let lines = raw(&self.state.stock_closing_lines);
        let mut filter = doc! { "closing_year": year };
        if let BranchScope::Filter(extra) = self.branch_any(&lines).await {
            merge(&mut filter, extra);
        }
        let mut cursor = lines.find(filter).await?;
        let mut totals: HashMap<(String, String, String), f64> = HashMap::new();
        while let Some(line) = cursor.try_next().await? {
            let manager_name = text(&line, "manager_name").unwrap_or("Unknown manager").to_string();
            let branch_name = text(&line, "branch_name").unwrap_or("Unknown branch").to_string();
            let manager_key = id_key(line.get("manager_id")).unwrap_or_else(|| manager_name.clone());
            *totals
                .entry((manager_key, manager_name, branch_name))
                .or_insert(0.0) += amount(&line, "closing_cost_value");
        }
        let mut rows: Vec<ManagerStockLine> = totals
            .into_iter()
            .map(|((_, manager_name, branch_name), amt)| ManagerStockLine {
                manager_name,
                branch_name,
                amount: round2(amt),
            })
            .collect();
        rows.sort_by(|a, b| b.amount.total_cmp(&a.amount));
        Ok(rows)
    }

    async fn live_inventory_value(&self) -> Result<f64> {
        let mut cursor = self
            .state
            .inventory
            .aggregate(vec![doc! { "$group": {
                "_id": null,
                "total": { "$sum": { "$multiply": [to_double("$qty"), to_double("$cost_price")] } },
            }}])
            .await?;
        Ok(match cursor.try_next().await? {
            Some(row) => round2(bson_f64(row.get("total"))),
            None => 0.0,
        })
    }

    async fn cogs(&mut self) -> Result<CogsSummary> {
        let coll = raw(&self.state.outflows);
        let mut filter = doc! { "created_at": self.dt_range() };
        if let Some(branch) = self.branch.clone() {
            if self.field_exists(&coll, "branch_id").await {
                filter.insert("branch_id", branch.id_match());
            } else {
                let ids = self.branch_managers("outflow cogs").await?;
                if ids.is_empty() {
                    self.notes
                        .push("branch filter applied for outflow cogs returned no managers".to_string());
                } else {
                    let mut ors = Vec::new();
                    for field in ["manager_id", "by_user", "agent.id"] {
                        if self.field_exists(&coll, field).await {
                            ors.push(keyed(field, doc! { "$in": ids.clone() }));
                        }
                    }
                    if ors.is_empty() {
                        self.notes
                            .push("branch filter ignored for outflow cogs; missing linkage fields".to_string());
                    } else {
                        filter.insert("$or", ors);
                    }
                }
            }
        }

        let mut cursor = coll.find(filter).await?;
        let mut records = Vec::new();
        let mut unreadable = 0usize;
        while let Some(row) = cursor.try_next().await? {
            match bson::from_document::<OutflowRecord>(row) {
                Ok(rec) => records.push(rec),
                Err(err) => {
                    tracing::debug!(error = %err, "outflow record skipped");
                    unreadable += 1;
                }
            }
        }
        let mut summary = summarize_cogs(&records);
        summary.count += unreadable;
        summary.missing_cost_count += unreadable;
        summary.total = round2(summary.total);
        for v in summary.by_source.values_mut() {
            *v = round2(*v);
        }
        Ok(summary)
    }
}

pub async fn gather_report(
    state: &AppState,
    period: &Period,
    branch_id: Option<&str>,
) -> Result<ProfitLossReport> {
    let mut g = Gatherer {
        state,
        start: bson_datetime(period.start),
        end: bson_datetime(period.end),
        from: period.from.clone(),
        to: period.to.clone(),
        branch: BranchFilter::parse(branch_id),
        notes: Vec::new(),
    };

    let sales_info = g.sales().await?;
    let (returns_inwards, returns_inwards_count) = g.returns_inwards().await?;
    let (stock_entries_total, stock_entries_count) = g.stock_entry_purchases().await?;
    let (stock_mini_total, stock_mini_count) = g.stock_mini_purchases().await?;
    let (returns_outwards, returns_outwards_count) = g.returns_outwards().await?;
    let (goods_drawn, goods_drawn_count, goods_drawn_breakdown) = g.goods_drawn().await?;
    let (discount_received, investment_income, other_incomes, income_count) = g.income().await?;
    let (carriage_inwards, carriage_inwards_count, carriage_inwards_breakdown) =
        g.carriage_inwards().await?;
    let (manager_totals, manager_opex_count) = g.manager_opex().await?;
    let (accounting_totals, accounting_opex_count) = g.accounting_opex().await?;

    let manager_opex = sorted_categories(&manager_totals);
    let manager_opex_total = round2(manager_totals.values().sum());
    let accounting_opex_total = round2(accounting_totals.values().sum());
    let mut opex_totals = accounting_totals;
    for (cat, amt) in &manager_totals {
        *opex_totals.entry(cat.clone()).or_insert(0.0) += amt;
    }
    let expense_map: BTreeMap<String, f64> =
        opex_totals.iter().map(|(k, v)| (k.clone(), *v)).collect();
    let opex_breakdown = sorted_categories(&opex_totals)
        .into_iter()
        .map(|c| CategoryAmount {
            amount: round2(c.amount),
            ..c
        })
        .collect();

    let (wages, salaries, wages_source) = match g.payroll(&period.months()).await? {
        Some((wages, salaries)) => {
            if sum_by_keywords(&expense_map, &["salary", "salaries", "wages"]) > 0.0 {
                g.notes.push(
                    "Payroll used for wages/salaries; salary-related expense categories excluded to avoid double count"
                        .to_string(),
                );
            }
            (wages, salaries, "payroll_records")
        }
        None => {
            g.notes.push(
                "Payroll records missing for period; wages/salaries derived from expense categories"
                    .to_string(),
            );
            (
                round2(sum_by_keywords(&expense_map, &["wages", "direct labor", "direct labour"])),
                round2(sum_by_keywords(&expense_map, &["salary", "salaries"])),
                "expense_categories",
            )
        }
    };

    let opening_year = period.start.year() - 1;
    let closing_year = period.start.year();

    let (opening_amount, opening_source) = match g.snapshot_total(opening_year).await? {
        Some(found) => found,
        None => {
            g.notes
                .push("Opening stock snapshot missing; opening_stock set to 0".to_string());
            (0.0, format!("No snapshot found for {opening_year}"))
        }
    };
    let (closing_amount, closing_source) = match g.snapshot_total(closing_year).await? {
        Some(found) => found,
        None => {
            g.notes
                .push("Closing stock snapshot missing; used live inventory valuation".to_string());
            (g.live_inventory_value().await?, "Live inventory valuation".to_string())
        }
    };
    let opening_stock = StockPosition {
        year: opening_year,
        amount: opening_amount,
        source: opening_source,
        breakdown: g.snapshot_breakdown(opening_year).await?,
    };
    let closing_stock = StockPosition {
        year: closing_year,
        amount: closing_amount,
        source: closing_source,
        breakdown: g.snapshot_breakdown(closing_year).await?,
    };

    let cogs = g.cogs().await?;
    if cogs.missing_cost_count > 0 {
        g.notes
            .push(format!("{} outflow records missing cost", cogs.missing_cost_count));
    }

    let statement = compute_statement(&StatementInputs {
        sales: sales_info.sales_total,
        returns_inwards,
        opening_stock: opening_stock.amount,
        purchases: round2(stock_entries_total + stock_mini_total),
        returns_outwards,
        goods_drawn,
        carriage_inwards,
        closing_stock: closing_stock.amount,
        cost_goods_sold: cogs.total,
        wages,
        discount_received,
        investment_income,
        other_incomes,
        total_expenses: round2(manager_opex_total + accounting_opex_total),
    });
    if legacy_cogs_differs(&statement) {
        g.notes
            .push("COGS differs from legacy opening+net-closing calculation".to_string());
    }

    let purchases_breakdown = vec![
        CountedLine {
            label: "Executive Stock Entries".to_string(),
            amount: stock_entries_total,
            count: stock_entries_count,
        },
        CountedLine {
            label: "Manager Stock (mini) (Approved)".to_string(),
            amount: stock_mini_total,
            count: stock_mini_count,
        },
    ];

    let todo_notes = dedup_notes(g.notes);
    tracing::debug!(
        period = %period.label,
        branch = branch_id.unwrap_or(""),
        net_profit = statement.net_profit,
        notes = todo_notes.len(),
        "profit & loss gathered"
    );

    Ok(ProfitLossReport {
        label: period.label.clone(),
        from: period.from.clone(),
        to: period.to.clone(),
        branch_id: branch_id.map(str::to_string),
        statement,
        sales_info,
        returns_inwards_count,
        opening_stock,
        closing_stock,
        purchases_breakdown,
        returns_outwards_count,
        carriage_inwards_breakdown,
        carriage_inwards_count,
        goods_drawn_breakdown,
        goods_drawn_count,
        cogs,
        wages_source: wages_source.to_string(),
        salaries,
        income_count,
        manager_opex_total,
        manager_opex,
        manager_opex_count,
        accounting_opex_total,
        accounting_opex_count,
        opex_breakdown,
        todo_notes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_filter_matches_id_or_name() {
        let oid = ObjectId::new();
        let by_id = BranchFilter::parse(Some(&oid.to_hex())).unwrap();
        assert!(by_id.matches_entry(&doc! { "branch_id": oid }));
        assert!(by_id.matches_entry(&doc! { "branch_id": oid.to_hex() }));
        assert!(!by_id.matches_entry(&doc! { "branch_name": "Kasoa" }));

        let by_name = BranchFilter::parse(Some(" Kasoa ")).unwrap();
        assert_eq!(by_name.oid, None);
        assert!(by_name.matches_entry(&doc! { "branch_name": "Kasoa" }));
        assert_eq!(by_name.id_match(), Bson::String("Kasoa".into()));

        assert_eq!(BranchFilter::parse(Some("  ")), None);
        assert_eq!(BranchFilter::parse(None), None);
    }

    #[test]
    fn notes_keep_first_occurrence_order() {
        let notes = dedup_notes(vec![
            "manager expenses filtered via date_dt range".into(),
            "Opening stock snapshot missing; opening_stock set to 0".into(),
            "manager expenses filtered via date_dt range".into(),
        ]);
        assert_eq!(notes.len(), 2);
        assert!(notes[1].starts_with("Opening stock"));
    }

    #[test]
    fn id_keys_accept_oids_and_text() {
        let oid = ObjectId::new();
        assert_eq!(id_key(Some(&Bson::ObjectId(oid))), Some(oid.to_hex()));
        assert_eq!(id_key(Some(&Bson::String(" m1 ".into()))), Some("m1".into()));
        assert_eq!(id_key(Some(&Bson::Null)), None);
        assert_eq!(id_key(None), None);
    }

    #[test]
    fn cache_key_normalises_branch() {
        let period = crate::period::parse_period(
            &crate::period::PeriodQuery {
                range: Some("year".into()),
                year: Some("2024".into()),
                ..Default::default()
            },
            chrono::NaiveDate::from_ymd_opt(2024, 6, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
        );
        assert_eq!(report_cache_key(&period, None), "2024-01-01|2024-12-31|");
        assert_eq!(report_cache_key(&period, Some("b1")), "2024-01-01|2024-12-31|b1");
    }
}
