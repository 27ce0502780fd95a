#![allow(dead_code)]

use std::{
    sync::{Arc, Mutex, MutexGuard, OnceLock},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use mongodb::{Client, bson::doc, options::ClientOptions};
use serde_json::Value;
use tower::ServiceExt;

use salesdesk::{
    build_app,
    config::AppConfig,
    session::SESSION_COOKIE_NAME,
    state::{AppState, create_session, find_user, init_state_with},
};

/// Integration tests share one MongoDB server; run them one at a time.
static TEST_DB_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

pub struct TestContext {
    pub state: Arc<AppState>,
    pub db_name: String,
    _guard: MutexGuard<'static, ()>,
}

impl TestContext {
    pub fn app(&self) -> Router {
        build_app(self.state.clone())
    }

    /// Session token for a seeded user.
    pub async fn login_as(&self, username: &str) -> String {
        let user = find_user(&self.state, username)
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("seed user {username} missing"));
        create_session(&self.state, &user.id.unwrap()).await.unwrap()
    }
}

/// Fresh database seeded from `data/users.json`, or None when MongoDB is unreachable.
pub async fn setup_state() -> Option<TestContext> {
    let guard = TEST_DB_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|p| p.into_inner());

    let mut config = AppConfig::from_env().expect("config from env");
    let db_name = format!(
        "salesdesk_test_{}",
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis()
    );
    config.mongodb_db = db_name.clone();
    config.sms.api_key = None;

    let mut options = match ClientOptions::parse(&config.mongodb_uri).await {
        Ok(o) => o,
        Err(err) => {
            eprintln!("Skipping test; bad MongoDB URI: {err:?}");
            return None;
        }
    };
    options.server_selection_timeout = Some(Duration::from_secs(2));
    let client = Client::with_options(options).ok()?;
    if let Err(err) = client
        .database("admin")
        .run_command(doc! { "ping": 1 })
        .await
    {
        eprintln!("Skipping test; cannot reach MongoDB: {err:?}");
        return None;
    }

    match init_state_with(config).await {
        Ok(state) => Some(TestContext {
            state: Arc::new(state),
            db_name,
            _guard: guard,
        }),
        Err(err) => {
            eprintln!("Skipping test; init_state failed: {err:?}");
            None
        }
    }
}

pub async fn teardown(ctx: Option<TestContext>) {
    if let Some(ctx) = ctx {
        if let Err(err) = ctx.state.db.drop().await {
            eprintln!("could not drop {}: {err:?}", ctx.db_name);
        }
    }
}

pub async fn send(app: Router, req: Request<Body>) -> (StatusCode, Value) {
    let res = app.oneshot(req).await.expect("request failed");
    let status = res.status();
    let bytes = to_bytes(res.into_body(), 1024 * 1024)
        .await
        .expect("body read failed");
    let body = serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).to_string()));
    (status, body)
}

pub fn get(path: &str, token: Option<&str>) -> Request<Body> {
    let mut req = Request::builder().method("GET").uri(path);
    if let Some(token) = token {
        req = req.header(header::COOKIE, format!("{SESSION_COOKIE_NAME}={token}"));
    }
    req.body(Body::empty()).unwrap()
}

pub fn post_json(path: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut req = Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        req = req.header(header::COOKIE, format!("{SESSION_COOKIE_NAME}={token}"));
    }
    req.body(Body::from(body.to_string())).unwrap()
}
