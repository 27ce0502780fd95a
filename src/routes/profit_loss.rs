// routes/profit_loss.rs
// Trading / profit & loss page, its section APIs and the CSV / PDF exports.
// Every endpoint for a period reads the same cached report.

use std::sync::Arc;

use askama::Template;
use axum::{
    Json,
    body::Body,
    extract::{Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{Value, json};

#[allow(unused_imports)]
use crate::filters;
use crate::{
    csv_export::{csv_response, profit_loss_csv},
    error::{AppError, AppResult},
    models::UserRole,
    period::{Period, PeriodQuery, parse_period},
    profit_loss::{legacy_cogs_differs, line_items},
    routes::{
        helpers::{non_empty, now, render},
        pdf::{compile_typst, statement_source},
    },
    session::SessionUser,
    state::{AppState, ProfitLossReport, profit_loss_report},
};

const REPORT_READERS: [UserRole; 3] = [UserRole::Accounting, UserRole::Executive, UserRole::Admin];

#[derive(Deserialize, Default)]
pub struct ReportQuery {
    #[serde(flatten)]
    period: PeriodQuery,
    #[serde(default)]
    branch_id: Option<String>,
    #[serde(default)]
    debug_sources: Option<String>,
}

impl ReportQuery {
    fn debug(&self) -> bool {
        matches!(
            self.debug_sources.as_deref().map(str::trim),
            Some("1" | "true" | "yes")
        )
    }
}

async fn load(
    session_user: &SessionUser,
    state: &AppState,
    q: &ReportQuery,
) -> AppResult<(Period, Arc<ProfitLossReport>)> {
    session_user.require_any(&REPORT_READERS)?;
    let period = parse_period(&q.period, now());
    let branch = non_empty(q.branch_id.as_deref());
    let report = profit_loss_report(state, &period, branch.as_deref(), q.debug()).await?;
    Ok((period, report))
}

pub struct StatementLine {
    pub label: &'static str,
    pub amount: f64,
}

#[derive(Template)]
#[template(path = "profit_loss/index.html")]
pub struct ProfitLossTemplate {
    pub label: String,
    pub from: String,
    pub to: String,
    pub branch_id: String,
    pub currency: String,
    pub lines: Vec<StatementLine>,
    pub opex: Vec<crate::profit_loss::CategoryAmount>,
    pub notes: Vec<String>,
    pub export_query: String,
}

fn export_query(period: &Period, branch: Option<&str>) -> String {
    let mut q = format!("range=custom&from={}&to={}", period.from, period.to);
    if let Some(b) = branch {
        q.push_str("&branch_id=");
        q.push_str(&b.replace(['&', '=', ' ', '#'], ""));
    }
    q
}

pub async fn profit_loss_page(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Query(q): Query<ReportQuery>,
) -> AppResult<Html<String>> {
    let (period, report) = load(&session_user, &state, &q).await?;
    let lines = line_items(&report.statement)
        .into_iter()
        .map(|(label, amount)| StatementLine { label, amount })
        .collect();
    render(ProfitLossTemplate {
        label: report.label.clone(),
        from: report.from.clone(),
        to: report.to.clone(),
        branch_id: report.branch_id.clone().unwrap_or_default(),
        currency: state.config.currency.clone(),
        lines,
        opex: report.opex_breakdown.clone(),
        notes: report.todo_notes.clone(),
        export_query: export_query(&period, report.branch_id.as_deref()),
    })
}

fn header(report: &ProfitLossReport) -> Value {
    json!({
        "label": report.label,
        "from": report.from,
        "to": report.to,
        "branch_id": report.branch_id,
    })
}

pub async fn profit_loss_summary(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Query(q): Query<ReportQuery>,
) -> AppResult<Json<Value>> {
    let (_, report) = load(&session_user, &state, &q).await?;
    Ok(Json(json!({
        "ok": true,
        "period": header(&report),
        "statement": report.statement,
        "todo_notes": report.todo_notes,
    })))
}

pub async fn profit_loss_sales(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Query(q): Query<ReportQuery>,
) -> AppResult<Json<Value>> {
    let (_, report) = load(&session_user, &state, &q).await?;
    let s = &report.statement;
    Ok(Json(json!({
        "ok": true,
        "period": header(&report),
        "sales": s.sales,
        "returns_inwards": s.returns_inwards,
        "returns_inwards_count": report.returns_inwards_count,
        "net_sales": s.net_sales,
        "sales_info": report.sales_info,
    })))
}

pub async fn profit_loss_cost_of_sales(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Query(q): Query<ReportQuery>,
) -> AppResult<Json<Value>> {
    let (_, report) = load(&session_user, &state, &q).await?;
    let s = &report.statement;
    Ok(Json(json!({
        "ok": true,
        "period": header(&report),
        "opening_stock": report.opening_stock,
        "purchases": s.purchases,
        "purchases_breakdown": report.purchases_breakdown,
        "returns_outwards": s.returns_outwards,
        "returns_outwards_count": report.returns_outwards_count,
        "carriage_inwards": s.carriage_inwards,
        "carriage_inwards_breakdown": report.carriage_inwards_breakdown,
        "carriage_inwards_count": report.carriage_inwards_count,
        "goods_drawn": s.goods_drawn,
        "goods_drawn_breakdown": report.goods_drawn_breakdown,
        "goods_drawn_count": report.goods_drawn_count,
        "net_purchases": s.net_purchases,
        "cost_goods_available": s.cost_goods_available,
        "closing_stock": report.closing_stock,
        "cost_goods_sold": s.cost_goods_sold,
        "cogs": report.cogs,
        "cost_goods_sold_legacy": s.cost_goods_sold_legacy,
        "legacy_differs": legacy_cogs_differs(s),
        "wages": s.wages,
        "wages_source": report.wages_source,
        "cost_of_sales": s.cost_of_sales,
        "gross_profit": s.gross_profit,
    })))
}

pub async fn profit_loss_income(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Query(q): Query<ReportQuery>,
) -> AppResult<Json<Value>> {
    let (_, report) = load(&session_user, &state, &q).await?;
    let s = &report.statement;
    Ok(Json(json!({
        "ok": true,
        "period": header(&report),
        "discount_received": s.discount_received,
        "investment_income": s.investment_income,
        "other_incomes": s.other_incomes,
        "other_income": s.other_income,
        "income_count": report.income_count,
    })))
}

pub async fn profit_loss_opex(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Query(q): Query<ReportQuery>,
) -> AppResult<Json<Value>> {
    let (_, report) = load(&session_user, &state, &q).await?;
    Ok(Json(json!({
        "ok": true,
        "period": header(&report),
        "total_expenses": report.statement.total_expenses,
        "breakdown": report.opex_breakdown,
        "salaries": report.salaries,
        "manager_opex_total": report.manager_opex_total,
        "manager_opex": report.manager_opex,
        "manager_opex_count": report.manager_opex_count,
        "accounting_opex_total": report.accounting_opex_total,
        "accounting_opex_count": report.accounting_opex_count,
    })))
}

pub async fn profit_loss_export_csv(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Query(q): Query<ReportQuery>,
) -> AppResult<Response> {
    let (period, report) = load(&session_user, &state, &q).await?;
    let bytes = profit_loss_csv(&report.statement, &period, &state.config.currency)?;
    Ok(csv_response("profit_loss_export.csv", bytes))
}

pub async fn profit_loss_export_pdf(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Query(q): Query<ReportQuery>,
) -> AppResult<Response> {
    let (_, report) = load(&session_user, &state, &q).await?;
    let source = statement_source(&report, &state.config.currency);
    let typst_bin = state.config.typst_bin.clone();
    let pdf = tokio::task::spawn_blocking(move || compile_typst(&typst_bin, &source))
        .await
        .map_err(|err| AppError::Internal(anyhow::anyhow!("pdf task failed: {err}")))?
        .map_err(|err| {
            tracing::warn!(error = %err, "profit & loss pdf export failed");
            AppError::Internal(anyhow::anyhow!("PDF export failed: {err}"))
        })?;
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/pdf")),
            (
                header::CONTENT_DISPOSITION,
                HeaderValue::from_static("attachment; filename=\"profit_loss.pdf\""),
            ),
        ],
        Body::from(pdf),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn debug_flag_values() {
        let q: ReportQuery = serde_json::from_str(r#"{"debug_sources":"1"}"#).unwrap();
        assert!(q.debug());
        let q: ReportQuery = serde_json::from_str(r#"{"range":"year","year":"2024"}"#).unwrap();
        assert!(!q.debug());
    }

    #[test]
    fn export_links_pin_the_period() {
        let q = PeriodQuery {
            range: Some("this_month".into()),
            ..Default::default()
        };
        let now = NaiveDate::from_ymd_opt(2024, 3, 15)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        let period = parse_period(&q, now);
        assert_eq!(
            export_query(&period, Some("b 1")),
            "range=custom&from=2024-03-01&to=2024-03-15&branch_id=b1"
        );
    }
}
