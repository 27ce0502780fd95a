use anyhow::{Context, Result};
use mongodb::{
    Database, IndexModel,
    bson::{DateTime, Document, doc, oid::ObjectId},
    options::IndexOptions,
};
use std::{collections::HashMap, fs, time::Duration};

use crate::models::{SeedUser, User};
use crate::totp;

pub(super) async fn is_database_empty(db: &Database) -> Result<bool> {
    let users_coll = db.collection::<User>("users");
    let count = users_coll.estimated_document_count().await?;
    Ok(count == 0)
}

pub(super) fn load_seed_users(path: &str) -> Result<Vec<SeedUser>> {
    let users_json = fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    let users = serde_json::from_str::<Vec<SeedUser>>(&users_json)?;
    Ok(users)
}

/// Inserts seed users. Users without a manager go first so `manager` usernames resolve.
pub(super) async fn seed_users(db: &Database, users: &[SeedUser]) -> Result<()> {
    let users_coll = db.collection::<User>("users");
    let mut ids: HashMap<String, ObjectId> = HashMap::new();

    let mut ordered: Vec<&SeedUser> = users.iter().filter(|u| u.manager.is_none()).collect();
    ordered.extend(users.iter().filter(|u| u.manager.is_some()));

    for seed in ordered {
        let username = seed.username.trim().to_lowercase();
        if username.is_empty() || ids.contains_key(&username) {
            tracing::warn!(username = %seed.username, "skipping empty or duplicate seed user");
            continue;
        }
        let manager_id = match seed.manager.as_deref() {
            Some(manager) => {
                let id = ids.get(&manager.trim().to_lowercase()).copied();
                if id.is_none() {
                    tracing::warn!(username = %username, manager, "seed manager not found");
                }
                id
            }
            None => None,
        };
        let secret = match seed.secret.as_deref().map(str::trim) {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => {
                tracing::info!(username = %username, "generated TOTP secret for seed user");
                totp::generate_secret()
            }
        };

        let res = users_coll
            .insert_one(User {
                id: None,
                username: username.clone(),
                name: seed.name.clone(),
                phone: seed.phone.clone(),
                role: seed.role,
                manager_id,
                branch_id: None,
                branch_name: seed.branch_name.clone(),
                secret,
                created_at: Some(DateTime::now()),
            })
            .await?;
        let id = res
            .inserted_id
            .as_object_id()
            .context("user insert missing _id")?;
        ids.insert(username, id);
    }

    tracing::info!(count = ids.len(), "seeded users");
    Ok(())
}

/// Creates the indexes the write paths rely on. Failures are logged, never fatal.
pub(super) async fn ensure_indexes(db: &Database) {
    let unique = || IndexOptions::builder().unique(true).build();
    let specs: Vec<(&str, Document, Option<IndexOptions>)> = vec![
        ("users", doc! { "username": 1 }, Some(unique())),
        ("sessions", doc! { "token": 1 }, Some(unique())),
        (
            "sessions",
            doc! { "expires_at": 1 },
            Some(
                IndexOptions::builder()
                    .expire_after(Duration::from_secs(0))
                    .build(),
            ),
        ),
        ("sales_close", doc! { "agent_id": 1, "date": 1 }, Some(unique())),
        ("payments", doc! { "customer_id": 1, "date": 1, "payment_type": 1 }, None),
        ("payments", doc! { "agent_id": 1, "date": 1 }, None),
        ("payments", doc! { "date_dt": 1 }, None),
        ("ledger_transfers", doc! { "status": 1, "created_at": -1 }, None),
        ("payroll_records", doc! { "employee_id": 1, "month": 1 }, Some(unique())),
        ("payroll_deductions", doc! { "employee_id": 1, "month": 1 }, None),
        ("manager_expenses", doc! { "status": 1, "date_dt": 1 }, None),
        ("stock_closings", doc! { "closing_year": 1 }, None),
    ];

    for (collection, keys, options) in specs {
        let model = IndexModel::builder().keys(keys).options(options).build();
        if let Err(err) = db
            .collection::<Document>(collection)
            .create_index(model)
            .await
        {
            tracing::warn!(collection, error = %err, "index creation failed");
        }
    }
}
