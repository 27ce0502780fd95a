use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use futures::stream::TryStreamExt;
use mongodb::bson::{DateTime, Document, doc, oid::ObjectId};

use crate::models::{Customer, Payment, PaymentType};
use crate::money::round2;

use super::{AppState, MongoLedger, bson_date, bson_f64, bson_i64, to_double};

/// Payments already recorded for the same customer, day and scope.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateInfo {
    pub count: i64,
    pub total: f64,
    pub scope: String,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub customer: Customer,
    pub agent_id: ObjectId,
    pub manager_id: Option<ObjectId>,
    pub amount: f64,
    pub payment_type: PaymentType,
    pub method: String,
    pub date: NaiveDate,
    pub time: String,
    pub product_name: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PaymentFilter {
    pub agent_ids: Option<Vec<String>>,
    pub payment_type: Option<PaymentType>,
    pub from: Option<String>,
    pub to: Option<String>,
}

impl PaymentFilter {
    fn to_document(&self) -> Document {
        let mut filter = doc! {};
        if let Some(ids) = &self.agent_ids {
            filter.insert("agent_id", doc! { "$in": ids.clone() });
        }
        if let Some(t) = self.payment_type {
            filter.insert("payment_type", t.as_str());
        }
        let mut date = doc! {};
        if let Some(from) = &self.from {
            date.insert("$gte", from.clone());
        }
        if let Some(to) = &self.to {
            date.insert("$lte", to.clone());
        }
        if !date.is_empty() {
            filter.insert("date", date);
        }
        filter
    }
}

pub async fn find_duplicate_payments(
    state: &AppState,
    customer_id: &ObjectId,
    date: &str,
    payment_type: PaymentType,
    product_name: Option<&str>,
) -> Result<DuplicateInfo> {
    let mut filter = doc! {
        "customer_id": customer_id,
        "date": date,
        "payment_type": payment_type.as_str(),
    };
    let mut scope = payment_type.as_str().to_string();
    if payment_type == PaymentType::Product {
        if let Some(name) = product_name {
            filter.insert("product_name", name);
            scope = format!("PRODUCT: {name}");
        }
    }

    let mut cursor = state
        .payments
        .aggregate(vec![
            doc! { "$match": filter },
            doc! { "$group": {
                "_id": null,
                "count": { "$sum": 1 },
                "total": { "$sum": to_double("$amount") },
            }},
        ])
        .await?;
    let (count, total) = match cursor.try_next().await? {
        Some(row) => (bson_i64(row.get("count")), bson_f64(row.get("total"))),
        None => (0, 0.0),
    };
    Ok(DuplicateInfo {
        count,
        total: round2(total),
        scope,
    })
}

/// Inserts the payment and, for collections, rolls it into the agent's sales-close day.
pub async fn record_payment(state: &AppState, new: NewPayment) -> Result<ObjectId> {
    let customer_id = new.customer.id.context("customer missing _id")?;
    let date = new.date.format("%Y-%m-%d").to_string();
    let date_dt = bson_date(new.date);
    let agent_hex = new.agent_id.to_hex();

    let res = state
        .payments
        .insert_one(Payment {
            id: None,
            customer_id,
            agent_id: agent_hex.clone(),
            manager_id: new.manager_id,
            amount: round2(new.amount),
            payment_type: new.payment_type,
            method: new.method,
            status: Some("confirmed".to_string()),
            date: date.clone(),
            date_dt: Some(date_dt),
            time: new.time,
            product_name: new.product_name,
            created_at: Some(DateTime::now()),
        })
        .await?;
    let payment_id = res
        .inserted_id
        .as_object_id()
        .context("payment insert missing _id")?;

    if new.payment_type.counts_as_collection() {
        MongoLedger::new(state)
            .record_collection(&agent_hex, new.manager_id, &date, round2(new.amount))
            .await?;
    }

    tracing::info!(
        payment = %payment_id,
        agent = %agent_hex,
        amount = new.amount,
        kind = new.payment_type.as_str(),
        "payment recorded"
    );
    Ok(payment_id)
}

/// Lifetime total paid by a customer for one payment type (and product, when given).
pub async fn customer_paid_total(
    state: &AppState,
    customer_id: &ObjectId,
    payment_type: PaymentType,
    product_name: Option<&str>,
) -> Result<f64> {
    let mut filter = doc! { "customer_id": customer_id, "payment_type": payment_type.as_str() };
    if let Some(name) = product_name {
        filter.insert("product_name", name);
    }
    let mut cursor = state
        .payments
        .aggregate(vec![
            doc! { "$match": filter },
            doc! { "$group": { "_id": null, "total": { "$sum": to_double("$amount") } } },
        ])
        .await?;
    Ok(match cursor.try_next().await? {
        Some(row) => round2(bson_f64(row.get("total"))),
        None => 0.0,
    })
}

pub async fn list_payments(
    state: &AppState,
    filter: &PaymentFilter,
    page: u64,
    per_page: u64,
) -> Result<(Vec<Payment>, u64)> {
    let filter = filter.to_document();
    let total = state.payments.count_documents(filter.clone()).await?;
    let mut cursor = state
        .payments
        .find(filter)
        .sort(doc! { "date": -1, "time": -1 })
        .skip((page - 1) * per_page)
        .limit(per_page as i64)
        .await?;
    let mut payments = Vec::new();
    while let Some(p) = cursor.try_next().await? {
        payments.push(p);
    }
    Ok((payments, total))
}

pub async fn all_payments(state: &AppState, filter: &PaymentFilter) -> Result<Vec<Payment>> {
    let mut cursor = state
        .payments
        .find(filter.to_document())
        .sort(doc! { "date": -1, "time": -1 })
        .await?;
    let mut payments = Vec::new();
    while let Some(p) = cursor.try_next().await? {
        payments.push(p);
    }
    Ok(payments)
}

/// Collections (withdrawals excluded) per agent for one day.
pub async fn collections_for_day(
    state: &AppState,
    agent_ids: &[String],
    date: &str,
) -> Result<HashMap<String, (f64, i64)>> {
    let mut cursor = state
        .payments
        .aggregate(vec![
            doc! { "$match": {
                "agent_id": { "$in": agent_ids },
                "date": date,
                "payment_type": { "$ne": PaymentType::Withdrawal.as_str() },
            }},
            doc! { "$group": {
                "_id": "$agent_id",
                "total": { "$sum": to_double("$amount") },
                "count": { "$sum": 1 },
            }},
        ])
        .await?;
    let mut out = HashMap::new();
    while let Some(row) = cursor.try_next().await? {
        if let Ok(agent) = row.get_str("_id") {
            out.insert(
                agent.to_string(),
                (round2(bson_f64(row.get("total"))), bson_i64(row.get("count"))),
            );
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_builds_date_range() {
        let f = PaymentFilter {
            agent_ids: None,
            payment_type: Some(PaymentType::Susu),
            from: Some("2024-01-01".into()),
            to: None,
        }
        .to_document();
        assert_eq!(f.get_str("payment_type").unwrap(), "SUSU");
        assert_eq!(
            f.get_document("date").unwrap().get_str("$gte").unwrap(),
            "2024-01-01"
        );
        assert!(!f.get_document("date").unwrap().contains_key("$lte"));
    }
}
