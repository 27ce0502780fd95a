// lib.rs
// Router assembly. `main` only loads configuration and serves what `build_app` returns.

use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post},
};

pub mod cache;
pub mod config;
pub mod csv_export;
pub mod error;
pub mod filters;
pub mod ledger;
pub mod models;
pub mod money;
pub mod payroll;
pub mod period;
pub mod profit_loss;
pub mod routes;
pub mod session;
pub mod sms;
pub mod state;
pub mod totp;

use routes::CloseScope;
use state::AppState;

pub fn build_app(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/logout", post(routes::logout))
        // users and login audit
        .route(
            "/admin/users",
            get(routes::users_index).post(routes::users_create),
        )
        .route("/admin/users/{id}/qrcode", get(routes::users_qrcode))
        .route(
            "/admin/users/{id}/reset-secret",
            post(routes::users_reset_secret),
        )
        .route("/admin/login-logs", get(routes::login_logs_index))
        // customers and payments
        .route(
            "/customers",
            get(routes::customers_index).post(routes::customers_create),
        )
        .route("/customers/export.csv", get(routes::customers_export))
        .route(
            "/payments",
            get(routes::payments_index).post(routes::payments_create),
        )
        .route("/payments/export.csv", get(routes::payments_export))
        // sales close
        .route("/sales-close", get(routes::sales_close_page))
        .route("/sales-close/summary", get(routes::sales_close_summary))
        .nest("/manager-close", routes::close_routes(CloseScope::Manager))
        .nest("/admin-close", routes::close_routes(CloseScope::Admin))
        .nest("/executive-close", routes::close_routes(CloseScope::Executive))
        // inventory
        .route(
            "/inventory/items",
            get(routes::items_index).post(routes::items_create),
        )
        .route("/inventory/items/{id}/qty", post(routes::items_set_qty))
        .route("/inventory/instant-sale", post(routes::instant_sale_create))
        .route("/inventory/goods-drawn", post(routes::goods_drawn_create))
        .route("/inventory/stock-closing", post(routes::stock_closing_create))
        // expenses and accounting entries
        .route(
            "/expenses/manager",
            get(routes::manager_expenses_index).post(routes::manager_expense_create),
        )
        .route(
            "/expenses/manager/{id}/approve",
            post(routes::manager_expense_approve),
        )
        .route(
            "/expenses/manager/{id}/reject",
            post(routes::manager_expense_reject),
        )
        .route(
            "/expenses/accounting",
            get(routes::accounting_expenses_index).post(routes::accounting_expense_create),
        )
        .route("/expenses/stock-entries", post(routes::stock_entry_create))
        .route("/expenses/returns-inwards", post(routes::return_inward_create))
        .route("/expenses/returns-outwards", post(routes::return_outward_create))
        .route("/expenses/income", post(routes::income_entry_create))
        // bank accounts
        .route(
            "/accounting/bank-accounts",
            get(routes::bank_accounts_page).post(routes::bank_account_create),
        )
        .route(
            "/accounting/bank-accounts/api",
            get(routes::bank_accounts_index),
        )
        .route(
            "/accounting/bank-accounts/export.csv",
            get(routes::bank_accounts_export),
        )
        .route(
            "/accounting/bank-accounts/{id}/deposit",
            post(routes::bank_deposit_create),
        )
        .route(
            "/accounting/bank-accounts/{id}/withdraw",
            post(routes::bank_withdrawal_create),
        )
        .route(
            "/accounting/bank-accounts/{id}/reconcile",
            post(routes::bank_account_reconcile),
        )
        // profit & loss
        .route("/accounting/profit-loss", get(routes::profit_loss_page))
        .route(
            "/accounting/profit-loss/api/summary",
            get(routes::profit_loss_summary),
        )
        .route(
            "/accounting/profit-loss/api/sales",
            get(routes::profit_loss_sales),
        )
        .route(
            "/accounting/profit-loss/api/cost-of-sales",
            get(routes::profit_loss_cost_of_sales),
        )
        .route(
            "/accounting/profit-loss/api/income",
            get(routes::profit_loss_income),
        )
        .route(
            "/accounting/profit-loss/api/opex",
            get(routes::profit_loss_opex),
        )
        .route(
            "/accounting/profit-loss/export.csv",
            get(routes::profit_loss_export_csv),
        )
        .route(
            "/accounting/profit-loss/export.pdf",
            get(routes::profit_loss_export_pdf),
        )
        // payroll
        .route("/hr/payroll", get(routes::payroll_page))
        .route(
            "/hr/payroll/records",
            get(routes::payroll_records).post(routes::payroll_upsert),
        )
        .route(
            "/hr/payroll/records/{employee_id}/{month}/recompute",
            post(routes::payroll_recompute),
        )
        .route("/hr/payroll/deductions", post(routes::payroll_add_deduction))
        .route("/hr/payroll/adjustments", post(routes::payroll_add_adjustment))
        .route("/hr/payroll/employee/{id}", get(routes::payroll_employee))
        .route("/hr/payroll/export.csv", get(routes::payroll_export))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            session::require_session,
        ));

    Router::new()
        .route("/", get(routes::home))
        .route("/login", post(routes::login))
        .merge(protected)
        .with_state(state)
}
