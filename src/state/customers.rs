use anyhow::{Context, Result};
use futures::stream::TryStreamExt;
use mongodb::bson::{DateTime, Document, Regex, doc, oid::ObjectId};

use crate::models::Customer;

use super::AppState;

/// Which agents' customers a listing may see; `None` means all.
#[derive(Debug, Clone, Default)]
pub struct CustomerFilter {
    pub agent_ids: Option<Vec<String>>,
    pub q: Option<String>,
}

impl CustomerFilter {
    fn to_document(&self) -> Document {
        let mut filter = doc! {};
        if let Some(ids) = &self.agent_ids {
            filter.insert("agent_id", doc! { "$in": ids.clone() });
        }
        if let Some(q) = self.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            let pattern = Regex {
                pattern: escape_regex(q),
                options: "i".to_string(),
            };
            filter.insert(
                "$or",
                vec![
                    doc! { "name": pattern.clone() },
                    doc! { "phone_number": pattern },
                ],
            );
        }
        filter
    }
}

fn escape_regex(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if "\\.+*?()|[]{}^$".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

pub async fn create_customer(
    state: &AppState,
    name: &str,
    phone_number: &str,
    agent_id: &ObjectId,
    manager_id: Option<ObjectId>,
) -> Result<ObjectId> {
    let res = state
        .customers
        .insert_one(Customer {
            id: None,
            name: name.trim().to_string(),
            phone_number: phone_number.trim().to_string(),
            agent_id: agent_id.to_hex(),
            manager_id,
            created_at: Some(DateTime::now()),
        })
        .await?;
    res.inserted_id
        .as_object_id()
        .context("customer insert missing _id")
}

pub async fn get_customer(state: &AppState, id: &ObjectId) -> Result<Option<Customer>> {
    Ok(state.customers.find_one(doc! { "_id": id }).await?)
}

/// Customer owned by `agent_id`, or None.
pub async fn get_agent_customer(
    state: &AppState,
    id: &ObjectId,
    agent_id: &str,
) -> Result<Option<Customer>> {
    Ok(state
        .customers
        .find_one(doc! { "_id": id, "agent_id": agent_id })
        .await?)
}

pub async fn list_customers(
    state: &AppState,
    filter: &CustomerFilter,
    page: u64,
    per_page: u64,
) -> Result<(Vec<Customer>, u64)> {
    let filter = filter.to_document();
    let total = state.customers.count_documents(filter.clone()).await?;
    let mut cursor = state
        .customers
        .find(filter)
        .sort(doc! { "name": 1 })
        .skip((page - 1) * per_page)
        .limit(per_page as i64)
        .await?;
    let mut customers = Vec::new();
    while let Some(c) = cursor.try_next().await? {
        customers.push(c);
    }
    Ok((customers, total))
}

/// Every matching customer, for exports.
pub async fn all_customers(state: &AppState, filter: &CustomerFilter) -> Result<Vec<Customer>> {
    let mut cursor = state
        .customers
        .find(filter.to_document())
        .sort(doc! { "name": 1 })
        .await?;
    let mut customers = Vec::new();
    while let Some(c) = cursor.try_next().await? {
        customers.push(c);
    }
    Ok(customers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_terms_are_escaped() {
        assert_eq!(escape_regex("a.b(c)"), "a\\.b\\(c\\)");
        let filter = CustomerFilter {
            agent_ids: Some(vec!["x".into()]),
            q: Some("  ".into()),
        }
        .to_document();
        assert!(filter.contains_key("agent_id"));
        assert!(!filter.contains_key("$or"));
    }
}
