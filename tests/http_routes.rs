#[path = "common/mod.rs"]
mod common;

use axum::http::{StatusCode, header};
use chrono::Local;
use serde_json::json;
use tower::ServiceExt;

use common::{get, post_json, send, setup_state, teardown};
use salesdesk::{
    state::{MongoLedger, find_user},
    totp::build_totp,
};

#[tokio::test]
async fn home_page_is_public() {
    let ctx = setup_state().await;
    let Some(c) = ctx.as_ref() else { return };

    let (status, _) = send(c.app(), get("/", None)).await;
    assert_eq!(status, StatusCode::OK);

    teardown(ctx).await;
}

#[tokio::test]
async fn protected_routes_need_a_session() {
    let ctx = setup_state().await;
    let Some(c) = ctx.as_ref() else { return };

    let (status, body) = send(c.app(), get("/sales-close", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["ok"], json!(false));

    let (status, _) = send(c.app(), get("/customers", Some("not-a-token"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    teardown(ctx).await;
}

#[tokio::test]
async fn login_with_totp_sets_cookie() {
    let ctx = setup_state().await;
    let Some(c) = ctx.as_ref() else { return };

    let (status, body) = send(
        c.app(),
        post_json("/login", None, json!({ "username": "exec", "code": "000000x" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["ok"], json!(false));

    let code = build_totp("exec", "JBSWY3DPEHPK3PXPJBSWY3DPEHPK3PXP")
        .unwrap()
        .generate_current()
        .unwrap();
    let res = c
        .app()
        .oneshot(post_json(
            "/login",
            None,
            json!({ "username": "exec", "code": code }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let cookie = res
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    assert!(cookie.starts_with("session="));

    teardown(ctx).await;
}

#[tokio::test]
async fn roles_are_enforced_per_route() {
    let ctx = setup_state().await;
    let Some(c) = ctx.as_ref() else { return };

    let hr = c.login_as("hr").await;
    let (status, _) = send(c.app(), get("/customers", Some(&hr))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let agent = c.login_as("ama").await;
    let (status, _) = send(
        c.app(),
        get("/accounting/profit-loss/api/summary", Some(&agent)),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(c.app(), get("/hr/payroll/records", Some(&hr))).await;
    assert_eq!(status, StatusCode::OK);

    teardown(ctx).await;
}

#[tokio::test]
async fn empty_books_report_zero_profit() {
    let ctx = setup_state().await;
    let Some(c) = ctx.as_ref() else { return };

    let accounts = c.login_as("accounts").await;
    let (status, body) = send(
        c.app(),
        get(
            "/accounting/profit-loss/api/summary?range=year&year=2024",
            Some(&accounts),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], json!(true));
    assert_eq!(body["statement"]["net_profit"].as_f64(), Some(0.0));
    assert_eq!(body["period"]["from"], json!("2024-01-01"));
    let notes: Vec<&str> = body["todo_notes"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|n| n.as_str())
        .collect();
    assert!(notes.contains(&"Opening stock snapshot missing; opening_stock set to 0"));

    let (status, body) = send(
        c.app(),
        get(
            "/accounting/profit-loss/api/cost-of-sales?range=year&year=2024",
            Some(&accounts),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["opening_stock"]["amount"].as_f64(), Some(0.0));
    assert_eq!(body["cost_of_sales"].as_f64(), Some(0.0));

    teardown(ctx).await;
}

#[tokio::test]
async fn admin_close_withdraw_moves_manager_balance() {
    let ctx = setup_state().await;
    let Some(c) = ctx.as_ref() else { return };

    let manager = find_user(&c.state, "kumasi.mgr").await.unwrap().unwrap();
    let manager_id = manager.id.unwrap().to_hex();
    let today = Local::now().date_naive().format("%Y-%m-%d").to_string();
    MongoLedger::new(&c.state)
        .record_collection(&manager_id, None, &today, 200.0)
        .await
        .unwrap();

    let admin = c.login_as("admin").await;
    let (status, body) = send(
        c.app(),
        post_json(
            "/admin-close/withdraw",
            Some(&admin),
            json!({ "target_id": manager_id, "amount": "50", "note": "banking" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(
        body["debited_breakdown"],
        json!([{ "date": today, "amount": "50.00" }])
    );
    assert_eq!(body["available"], json!("150.00"));
    assert_eq!(body["close_total"], json!("50.00"));

    let (status, body) = send(
        c.app(),
        post_json(
            "/admin-close/withdraw",
            Some(&admin),
            json!({ "target_id": manager_id, "amount": 500 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["ok"], json!(false));

    teardown(ctx).await;
}

#[tokio::test]
async fn new_payment_shows_in_cached_report() {
    let ctx = setup_state().await;
    let Some(c) = ctx.as_ref() else { return };

    let accounts = c.login_as("accounts").await;
    let summary = "/accounting/profit-loss/api/summary";
    let (status, body) = send(c.app(), get(summary, Some(&accounts))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["statement"]["sales"].as_f64(), Some(0.0));

    let agent = c.login_as("ama").await;
    let (status, body) = send(
        c.app(),
        post_json(
            "/customers",
            Some(&agent),
            json!({ "name": "Akosua Mensah", "phone_number": "0241234567" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let customer_id = body["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        c.app(),
        post_json(
            "/payments",
            Some(&agent),
            json!({ "customer_id": customer_id, "amount": "100", "product_name": "Rice" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (_, body) = send(c.app(), get(summary, Some(&accounts))).await;
    assert_eq!(body["statement"]["sales"].as_f64(), Some(100.0));

    teardown(ctx).await;
}
