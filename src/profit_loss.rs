// profit_loss.rs
// Trading / Profit & Loss statement: classification rules and the final arithmetic.
// Gathering from the collections lives in `state::profit_loss`.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::models::{OutflowRecord, PayrollRecord};

pub const WAGE_ROLE_KEYWORDS: [&str; 7] = [
    "warehouse",
    "inventory",
    "production",
    "factory",
    "labor",
    "labour",
    "operations",
];

/// Categories a manager may file an expense under.
pub const MANAGER_EXPENSE_CATEGORIES: [&str; 20] = [
    "Vehicle servicing",
    "Transportation",
    "Carriage Inwards",
    "Creditors",
    "Eggs",
    "Delievery",
    "Fuel",
    "SUSU Withdrawal",
    "Marketing (Activations)",
    "Stock (mini)",
    "Airtime",
    "Pre Paid light",
    "Serving",
    "Utilities",
    "Miscellaneous",
    "Salary (Monthly)",
    "Salaries",
    "Police Arrest",
    "AMA",
    "Rewards (commisions)",
];

/// Manager categories booked elsewhere (purchases, carriage, savings payouts).
pub const MANAGER_EXPENSE_EXCLUDED: [&str; 3] = ["carriage inwards", "stock (mini)", "susu withdrawal"];

pub const INCOME_CATEGORIES: [(&str, IncomeKind); 3] = [
    ("Discount Received", IncomeKind::DiscountReceived),
    ("Investment Income", IncomeKind::InvestmentIncome),
    ("Other Incomes", IncomeKind::OtherIncomes),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncomeKind {
    DiscountReceived,
    InvestmentIncome,
    OtherIncomes,
}

pub fn income_kind(category: &str) -> Option<IncomeKind> {
    INCOME_CATEGORIES
        .iter()
        .find(|(name, _)| *name == category.trim())
        .map(|(_, kind)| *kind)
}

pub fn is_manager_category(category: &str) -> bool {
    MANAGER_EXPENSE_CATEGORIES.contains(&category.trim())
}

/// Maps a manager expense category onto its operating-expense bucket.
/// Returns None for categories that are not operating expenses.
pub fn manager_opex_category(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let raw = if raw.is_empty() { "Miscellaneous" } else { raw };
    if MANAGER_EXPENSE_EXCLUDED.contains(&raw.to_lowercase().as_str()) {
        return None;
    }
    if is_manager_category(raw) {
        Some(raw.to_string())
    } else {
        Some("Miscellaneous".to_string())
    }
}

pub fn accounting_category(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        "Uncategorized".to_string()
    } else {
        raw.to_string()
    }
}

pub fn is_wage_role(role: &str) -> bool {
    let role = role.to_lowercase();
    !role.is_empty() && WAGE_ROLE_KEYWORDS.iter().any(|k| role.contains(k))
}

/// Splits payroll cost into (wages, salaries) by role keywords.
/// Records without a staff cost fall back to basic + allowances.
pub fn classify_payroll(records: &[PayrollRecord]) -> (f64, f64) {
    let mut wages = 0.0;
    let mut salaries = 0.0;
    for r in records {
        let cost = if r.total_staff_cost > 0.0 {
            r.total_staff_cost
        } else {
            r.basic_salary + r.allowances
        };
        if is_wage_role(&r.role) {
            wages += cost;
        } else {
            salaries += cost;
        }
    }
    (wages, salaries)
}

pub fn sum_by_keywords(totals: &BTreeMap<String, f64>, keywords: &[&str]) -> f64 {
    totals
        .iter()
        .filter(|(cat, _)| {
            let cat = cat.to_lowercase();
            keywords.iter().any(|k| cat.contains(k))
        })
        .map(|(_, amount)| *amount)
        .sum()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutflowSource {
    InstantSale,
    AgentDeliveries,
    CloseCard,
    Other,
}

impl OutflowSource {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_lowercase()).as_deref() {
            Some("instant_sale") => OutflowSource::InstantSale,
            Some("agent_deliveries") => OutflowSource::AgentDeliveries,
            Some("close_card") => OutflowSource::CloseCard,
            _ => OutflowSource::Other,
        }
    }
}

fn positive(v: Option<f64>) -> Option<f64> {
    v.filter(|x| *x > 0.0)
}

/// Cost of one outflow line, or None when no unit cost is recorded.
pub fn outflow_cost(rec: &OutflowRecord) -> (OutflowSource, Option<f64>) {
    let source = OutflowSource::parse(rec.source.as_deref());
    let selected = rec.selected_product.clone().unwrap_or_default();
    let packaged = rec.packaged_product.clone().unwrap_or_default();
    let closed = rec.closed_product.clone().unwrap_or_default();

    let (qty, unit_cost) = match source {
        OutflowSource::InstantSale => (
            positive(rec.selected_qty).or(positive(selected.quantity)),
            positive(rec.unit_cost_price).or(positive(selected.cost_price)),
        ),
        OutflowSource::AgentDeliveries => (
            positive(rec.package_qty).or(positive(packaged.quantity)),
            positive(rec.unit_cost_price)
                .or(positive(packaged.cost_price))
                .or(positive(selected.cost_price)),
        ),
        OutflowSource::CloseCard => (
            positive(selected.qty)
                .or(positive(selected.quantity))
                .or(positive(closed.quantity)),
            positive(selected.cost_price).or(positive(rec.unit_cost_price)),
        ),
        OutflowSource::Other => (
            positive(rec.qty).or(positive(rec.quantity)),
            positive(rec.unit_cost_price),
        ),
    };

    let qty = qty.unwrap_or(1.0).max(1.0);
    (source, unit_cost.map(|cost| cost * qty))
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CogsSummary {
    pub total: f64,
    pub count: usize,
    pub by_source: BTreeMap<OutflowSource, f64>,
    pub missing_cost_count: usize,
    pub missing_cost_examples: Vec<String>,
}

pub fn summarize_cogs(records: &[OutflowRecord]) -> CogsSummary {
    let mut summary = CogsSummary::default();
    for source in [
        OutflowSource::InstantSale,
        OutflowSource::AgentDeliveries,
        OutflowSource::CloseCard,
        OutflowSource::Other,
    ] {
        summary.by_source.insert(source, 0.0);
    }
    for rec in records {
        summary.count += 1;
        match outflow_cost(rec) {
            (source, Some(line_total)) => {
                summary.total += line_total;
                *summary.by_source.entry(source).or_insert(0.0) += line_total;
            }
            (_, None) => {
                summary.missing_cost_count += 1;
                if summary.missing_cost_examples.len() < 20 {
                    summary
                        .missing_cost_examples
                        .push(rec.id.map(|id| id.to_hex()).unwrap_or_default());
                }
            }
        }
    }
    summary
}

/// Category totals sorted by amount, largest first.
pub fn sorted_categories(totals: &HashMap<String, f64>) -> Vec<CategoryAmount> {
    let mut rows: Vec<CategoryAmount> = totals
        .iter()
        .map(|(category, amount)| CategoryAmount {
            category: category.clone(),
            amount: *amount,
        })
        .collect();
    rows.sort_by(|a, b| {
        b.amount
            .partial_cmp(&a.amount)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.category.cmp(&b.category))
    });
    rows
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryAmount {
    pub category: String,
    pub amount: f64,
}

/// Figures gathered for a period; everything the statement arithmetic needs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StatementInputs {
    pub sales: f64,
    pub returns_inwards: f64,
    pub opening_stock: f64,
    pub purchases: f64,
    pub returns_outwards: f64,
    pub goods_drawn: f64,
    pub carriage_inwards: f64,
    pub closing_stock: f64,
    pub cost_goods_sold: f64,
    pub wages: f64,
    pub discount_received: f64,
    pub investment_income: f64,
    pub other_incomes: f64,
    pub total_expenses: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Statement {
    pub sales: f64,
    pub returns_inwards: f64,
    pub net_sales: f64,
    pub opening_stock: f64,
    pub purchases: f64,
    pub returns_outwards: f64,
    pub carriage_inwards: f64,
    pub goods_drawn: f64,
    pub net_purchases: f64,
    pub cost_goods_available: f64,
    pub closing_stock: f64,
    pub cost_goods_sold: f64,
    pub cost_goods_sold_legacy: f64,
    pub wages: f64,
    pub cost_of_sales: f64,
    pub gross_profit: f64,
    pub discount_received: f64,
    pub investment_income: f64,
    pub other_incomes: f64,
    pub other_income: f64,
    pub total_expenses: f64,
    pub operating_profit: f64,
    pub net_profit: f64,
}

pub fn compute_statement(i: &StatementInputs) -> Statement {
    let net_sales = i.sales - i.returns_inwards;
    let net_purchases = i.purchases - i.returns_outwards - i.goods_drawn + i.carriage_inwards;
    let cost_goods_available = i.opening_stock + net_purchases;
    let cost_of_sales = i.cost_goods_sold + i.wages;
    let gross_profit = net_sales - cost_of_sales;
    let other_income = i.discount_received + i.investment_income + i.other_incomes;
    let net_profit = gross_profit + other_income - i.total_expenses;

    Statement {
        sales: i.sales,
        returns_inwards: i.returns_inwards,
        net_sales,
        opening_stock: i.opening_stock,
        purchases: i.purchases,
        returns_outwards: i.returns_outwards,
        carriage_inwards: i.carriage_inwards,
        goods_drawn: i.goods_drawn,
        net_purchases,
        cost_goods_available,
        closing_stock: i.closing_stock,
        cost_goods_sold: i.cost_goods_sold,
        cost_goods_sold_legacy: cost_goods_available - i.closing_stock,
        wages: i.wages,
        cost_of_sales,
        gross_profit,
        discount_received: i.discount_received,
        investment_income: i.investment_income,
        other_incomes: i.other_incomes,
        other_income,
        total_expenses: i.total_expenses,
        operating_profit: gross_profit - i.total_expenses,
        net_profit,
    }
}

/// True when the stock-movement COGS and the outflow COGS disagree by more than 1.
pub fn legacy_cogs_differs(s: &Statement) -> bool {
    s.cost_goods_sold_legacy != 0.0 && (s.cost_goods_sold_legacy - s.cost_goods_sold).abs() > 1.0
}

/// Line items of the CSV / PDF export, in statement order.
pub fn line_items(s: &Statement) -> Vec<(&'static str, f64)> {
    vec![
        ("Sales", s.sales),
        ("Returns Inwards", s.returns_inwards),
        ("Net Sales", s.net_sales),
        ("Opening Stock", s.opening_stock),
        ("Purchases", s.purchases),
        ("Returns Outwards", s.returns_outwards),
        ("Carriage Inwards", s.carriage_inwards),
        ("Goods Drawn", s.goods_drawn),
        ("Net Purchases", s.net_purchases),
        ("Cost Goods Available", s.cost_goods_available),
        ("Closing Stock", s.closing_stock),
        ("COGS", s.cost_goods_sold),
        ("Wages", s.wages),
        ("Cost of Sales", s.cost_of_sales),
        ("Gross Profit", s.gross_profit),
        ("Discount Received", s.discount_received),
        ("Investment Income", s.investment_income),
        ("Other Incomes", s.other_incomes),
        ("Total Expenses", s.total_expenses),
        ("Net Profit", s.net_profit),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OutflowProduct;

    #[test]
    fn all_zero_inputs_give_zero_profit() {
        let s = compute_statement(&StatementInputs::default());
        assert_eq!(s.net_profit, 0.0);
        assert_eq!(s.gross_profit, 0.0);
        assert!(!legacy_cogs_differs(&s));
    }

    #[test]
    fn statement_identities() {
        let inputs = StatementInputs {
            sales: 10_000.0,
            returns_inwards: 500.0,
            opening_stock: 2_000.0,
            purchases: 4_000.0,
            returns_outwards: 250.0,
            goods_drawn: 100.0,
            carriage_inwards: 150.0,
            closing_stock: 1_800.0,
            cost_goods_sold: 3_900.0,
            wages: 600.0,
            discount_received: 20.0,
            investment_income: 30.0,
            other_incomes: 50.0,
            total_expenses: 1_200.0,
        };
        let s = compute_statement(&inputs);
        assert_eq!(s.net_sales, 9_500.0);
        assert_eq!(s.net_purchases, 3_800.0);
        assert_eq!(s.cost_goods_available, 5_800.0);
        assert_eq!(s.cost_of_sales, 4_500.0);
        assert_eq!(s.gross_profit, 5_000.0);
        assert_eq!(s.other_income, 100.0);
        assert_eq!(s.net_profit, 3_900.0);
        assert_eq!(s.cost_goods_sold_legacy, 4_000.0);
        assert!(legacy_cogs_differs(&s));
    }

    #[test]
    fn manager_categories_are_bucketed() {
        assert_eq!(manager_opex_category("Fuel").as_deref(), Some("Fuel"));
        assert_eq!(manager_opex_category("Office chairs").as_deref(), Some("Miscellaneous"));
        assert_eq!(manager_opex_category("").as_deref(), Some("Miscellaneous"));
        assert_eq!(manager_opex_category("Carriage Inwards"), None);
        assert_eq!(manager_opex_category("stock (mini)"), None);
        assert_eq!(manager_opex_category("SUSU Withdrawal"), None);
    }

    #[test]
    fn payroll_roles_split_wages_and_salaries() {
        let rec = |role: &str, cost: f64, basic: f64| PayrollRecord {
            role: role.into(),
            basic_salary: basic,
            total_staff_cost: cost,
            ..PayrollRecord::blank("e", "2024-01")
        };
        let (wages, salaries) = classify_payroll(&[
            rec("Warehouse Assistant", 500.0, 0.0),
            rec("Operations lead", 0.0, 300.0),
            rec("accounting", 900.0, 0.0),
            rec("", 100.0, 0.0),
        ]);
        assert_eq!(wages, 800.0);
        assert_eq!(salaries, 1000.0);
    }

    #[test]
    fn outflow_costs_by_source() {
        let instant = OutflowRecord {
            source: Some("instant_sale".into()),
            selected_qty: Some(3.0),
            unit_cost_price: Some(12.5),
            ..Default::default()
        };
        let delivery = OutflowRecord {
            source: Some("agent_deliveries".into()),
            packaged_product: Some(OutflowProduct {
                quantity: Some(2.0),
                qty: None,
                cost_price: Some(40.0),
            }),
            ..Default::default()
        };
        let card = OutflowRecord {
            source: Some("close_card".into()),
            selected_product: Some(OutflowProduct {
                quantity: None,
                qty: Some(0.5),
                cost_price: Some(80.0),
            }),
            ..Default::default()
        };
        let missing = OutflowRecord {
            source: Some("mystery".into()),
            qty: Some(4.0),
            ..Default::default()
        };

        let summary = summarize_cogs(&[instant, delivery, card, missing]);
        assert_eq!(summary.count, 4);
        assert_eq!(summary.total, 37.5 + 80.0 + 80.0);
        assert_eq!(summary.by_source[&OutflowSource::CloseCard], 80.0);
        assert_eq!(summary.by_source[&OutflowSource::Other], 0.0);
        assert_eq!(summary.missing_cost_count, 1);
    }

    #[test]
    fn income_and_keyword_helpers() {
        assert_eq!(income_kind("Investment Income"), Some(IncomeKind::InvestmentIncome));
        assert_eq!(income_kind("Gift"), None);

        let mut totals = BTreeMap::new();
        totals.insert("Staff Salaries".to_string(), 100.0);
        totals.insert("Direct Labour".to_string(), 40.0);
        totals.insert("Fuel".to_string(), 10.0);
        assert_eq!(sum_by_keywords(&totals, &["salary", "salaries"]), 100.0);
        assert_eq!(sum_by_keywords(&totals, &["wages", "direct labour"]), 40.0);
    }

    #[test]
    fn export_lines_follow_statement_order() {
        let s = compute_statement(&StatementInputs::default());
        let items = line_items(&s);
        assert_eq!(items.len(), 20);
        assert_eq!(items.first().unwrap().0, "Sales");
        assert_eq!(items.last().unwrap().0, "Net Profit");
    }
}
