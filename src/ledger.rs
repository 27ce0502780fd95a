// ledger.rs
// Sales-close ledger: per-owner per-day balances and the greedy multi-day withdraw.
//
// Storage goes through `LedgerStore` so the algorithm runs unchanged against
// MongoDB (`state::MongoLedger`) and against the in-memory store used by the tests.

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::models::{TransferStatus, WithdrawalEntry};
use crate::money::{EPSILON, format_money, round2};

/// One debited day in a withdraw breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebitLine {
    pub date: String,
    pub amount: f64,
}

/// Positive balance of one day-document, as seen when candidates are listed.
#[derive(Debug, Clone, PartialEq)]
pub struct DayBalance {
    pub date: String,
    pub balance: f64,
}

#[derive(Debug, Clone)]
pub struct Actor {
    pub id: String,
    pub name: String,
    pub role: String,
}

#[derive(Debug, Clone)]
pub struct WithdrawRequest {
    pub source_id: String,
    pub destination_id: String,
    pub amount: f64,
    pub note: String,
    pub actor: Actor,
    /// Calendar day of the request, `YYYY-MM-DD`.
    pub today: String,
    /// Wall-clock time of the request, `HH:MM:SS`.
    pub time: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WithdrawOutcome {
    pub requested: f64,
    pub debited: f64,
    pub breakdown: Vec<DebitLine>,
    pub transfer_id: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("A positive amount is required.")]
    InvalidAmount,
    #[error("Insufficient balance. Total across all days: GHS {}", money(.available))]
    InsufficientBalance { available: f64 },
    #[error("Insufficient balance due to concurrent changes. Current total: GHS {}", money(.available))]
    ConcurrentModification { available: f64 },
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

fn money(value: &f64) -> String {
    format_money(*value)
}

/// Intent row opened before any debit is applied.
#[derive(Debug, Clone)]
pub struct TransferIntent {
    pub source_id: String,
    pub destination_id: String,
    pub by_id: String,
    pub by_role: String,
    pub day: String,
    pub requested: f64,
}

pub trait LedgerStore: Send + Sync {
    /// Sum of `total_amount` over every day-document of `owner`.
    fn total(&self, owner: &str) -> impl Future<Output = anyhow::Result<f64>> + Send;

    /// Day-documents of `owner` with a positive balance, in any order.
    fn positive_days(
        &self,
        owner: &str,
    ) -> impl Future<Output = anyhow::Result<Vec<DayBalance>>> + Send;

    /// Debits `amount` from one day only if its balance still covers it.
    /// Returns false when the guard fails.
    fn debit_day(
        &self,
        owner: &str,
        date: &str,
        amount: f64,
        entry: WithdrawalEntry,
    ) -> impl Future<Output = anyhow::Result<bool>> + Send;

    /// Upserts the owner's day-document and increments it by `amount`.
    fn credit_day(
        &self,
        owner: &str,
        date: &str,
        amount: f64,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;

    fn open_transfer(
        &self,
        intent: &TransferIntent,
    ) -> impl Future<Output = anyhow::Result<String>> + Send;

    fn mark_transfer(
        &self,
        id: &str,
        status: TransferStatus,
        debited: f64,
        breakdown: &[DebitLine],
        error: Option<String>,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Today first, then most recent day first.
pub fn order_candidates(days: &mut [DayBalance], today: &str) {
    days.sort_by(|a, b| {
        let a_today = a.date == today;
        let b_today = b.date == today;
        b_today.cmp(&a_today).then_with(|| b.date.cmp(&a.date))
    });
}

/// Moves up to `amount` from the source owner to the destination owner's today document.
///
/// Each source day is debited with a guarded single-document update. A guard that
/// fails (the day changed underneath us) skips that day without retrying, so the
/// outcome may cover less than requested. A store error during the debits stops
/// the loop; whatever was already debited is still credited and logged. The
/// destination is credited only with what was actually debited.
pub async fn withdraw<S: LedgerStore>(
    store: &S,
    req: &WithdrawRequest,
) -> Result<WithdrawOutcome, LedgerError> {
    if !req.amount.is_finite() || req.amount <= 0.0 {
        return Err(LedgerError::InvalidAmount);
    }
    let amount = round2(req.amount);
    if amount <= 0.0 {
        return Err(LedgerError::InvalidAmount);
    }

    let total = round2(store.total(&req.source_id).await?);
    if amount > total + 1e-9 {
        return Err(LedgerError::InsufficientBalance { available: total });
    }

    let mut candidates: Vec<DayBalance> = store
        .positive_days(&req.source_id)
        .await?
        .into_iter()
        .filter(|d| d.balance > 0.0)
        .collect();
    order_candidates(&mut candidates, &req.today);

    let transfer_id = store
        .open_transfer(&TransferIntent {
            source_id: req.source_id.clone(),
            destination_id: req.destination_id.clone(),
            by_id: req.actor.id.clone(),
            by_role: req.actor.role.clone(),
            day: req.today.clone(),
            requested: amount,
        })
        .await?;

    let mut remaining = amount;
    let mut breakdown = Vec::new();
    let mut debit_error: Option<anyhow::Error> = None;
    for day in &candidates {
        if remaining < EPSILON {
            break;
        }
        let take = round2(day.balance.min(remaining));
        if take <= 0.0 {
            continue;
        }
        let entry = WithdrawalEntry {
            amount: take,
            by_id: req.actor.id.clone(),
            by_name: req.actor.name.clone(),
            by_role: req.actor.role.clone(),
            date: day.date.clone(),
            time: req.time.clone(),
            note: req.note.clone(),
            at: Some(mongodb::bson::DateTime::now()),
        };
        match store
            .debit_day(&req.source_id, &day.date, take, entry)
            .await
        {
            Ok(true) => {
                breakdown.push(DebitLine {
                    date: day.date.clone(),
                    amount: take,
                });
                remaining = round2(remaining - take);
            }
            Ok(false) => {
                tracing::debug!(
                    source = %req.source_id,
                    date = %day.date,
                    take,
                    "day changed concurrently, skipping"
                );
            }
            Err(err) => {
                tracing::warn!(
                    transfer = %transfer_id,
                    source = %req.source_id,
                    date = %day.date,
                    debited_so_far = round2(amount - remaining),
                    error = ?err,
                    "debit failed, settling what was already debited"
                );
                debit_error = Some(err);
                break;
            }
        }
    }

    let debited = round2(amount - remaining);
    if debited <= 0.0 {
        let error = debit_error.as_ref().map(|e| e.to_string());
        mark_logged(store, &transfer_id, TransferStatus::Abandoned, 0.0, &[], error).await;
        if let Some(err) = debit_error {
            return Err(LedgerError::Store(err));
        }
        let available = round2(store.total(&req.source_id).await?);
        return Err(LedgerError::ConcurrentModification { available });
    }

    mark_logged(store, &transfer_id, TransferStatus::Debited, debited, &breakdown, None).await;

    if let Err(err) = store
        .credit_day(&req.destination_id, &req.today, debited)
        .await
    {
        tracing::error!(
            transfer = %transfer_id,
            destination = %req.destination_id,
            debited,
            error = ?err,
            "destination credit failed after debit"
        );
        mark_logged(
            store,
            &transfer_id,
            TransferStatus::CreditFailed,
            debited,
            &breakdown,
            Some(err.to_string()),
        )
        .await;
        return Err(LedgerError::Store(err));
    }

    let partial_error = debit_error.map(|e| format!("debits stopped early: {e}"));
    mark_logged(
        store,
        &transfer_id,
        TransferStatus::Completed,
        debited,
        &breakdown,
        partial_error,
    )
    .await;

    tracing::info!(
        source = %req.source_id,
        destination = %req.destination_id,
        by = %req.actor.id,
        requested = amount,
        debited,
        days = breakdown.len(),
        "withdrawal completed"
    );

    Ok(WithdrawOutcome {
        requested: amount,
        debited,
        breakdown,
        transfer_id: Some(transfer_id),
    })
}

async fn mark_logged<S: LedgerStore>(
    store: &S,
    id: &str,
    status: TransferStatus,
    debited: f64,
    breakdown: &[DebitLine],
    error: Option<String>,
) {
    if let Err(err) = store
        .mark_transfer(id, status, debited, breakdown, error)
        .await
    {
        tracing::warn!(transfer = %id, status = status.as_str(), error = ?err, "transfer log update failed");
    }
}

#[cfg(test)]
pub(crate) mod memory {
    //! In-memory `LedgerStore` with hooks to simulate concurrent writers and failures.

    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct Day {
        pub balance: f64,
        pub withdrawals: Vec<WithdrawalEntry>,
    }

    #[derive(Default)]
    pub struct MemoryLedger {
        pub days: Mutex<BTreeMap<(String, String), Day>>,
        pub transfers: Mutex<Vec<(TransferStatus, f64, Option<String>)>>,
        /// Balance drained from a day right before its guarded debit runs.
        pub interfere: Mutex<Option<(String, String, f64)>>,
        pub fail_credit: Mutex<bool>,
        /// 1-based `debit_day` call that returns a store error.
        pub fail_debit_call: Mutex<Option<usize>>,
        pub debit_calls: Mutex<usize>,
    }

    impl MemoryLedger {
        pub fn with_days(owner: &str, days: &[(&str, f64)]) -> Self {
            let store = MemoryLedger::default();
            {
                let mut map = store.days.lock().unwrap();
                for (date, balance) in days {
                    map.insert(
                        (owner.to_string(), date.to_string()),
                        Day {
                            balance: *balance,
                            withdrawals: Vec::new(),
                        },
                    );
                }
            }
            store
        }

        pub fn balance(&self, owner: &str, date: &str) -> f64 {
            self.days
                .lock()
                .unwrap()
                .get(&(owner.to_string(), date.to_string()))
                .map(|d| d.balance)
                .unwrap_or(0.0)
        }

        pub fn owner_total(&self, owner: &str) -> f64 {
            round2(
                self.days
                    .lock()
                    .unwrap()
                    .iter()
                    .filter(|((o, _), _)| o == owner)
                    .map(|(_, d)| d.balance)
                    .sum(),
            )
        }

        pub fn last_status(&self) -> Option<TransferStatus> {
            self.transfers.lock().unwrap().last().map(|t| t.0)
        }
    }

    impl LedgerStore for MemoryLedger {
        async fn total(&self, owner: &str) -> anyhow::Result<f64> {
            Ok(self.owner_total(owner))
        }

        async fn positive_days(&self, owner: &str) -> anyhow::Result<Vec<DayBalance>> {
            Ok(self
                .days
                .lock()
                .unwrap()
                .iter()
                .filter(|((o, _), d)| o == owner && d.balance > 0.0)
                .map(|((_, date), d)| DayBalance {
                    date: date.clone(),
                    balance: d.balance,
                })
                .collect())
        }

        async fn debit_day(
            &self,
            owner: &str,
            date: &str,
            amount: f64,
            entry: WithdrawalEntry,
        ) -> anyhow::Result<bool> {
            let call = {
                let mut calls = self.debit_calls.lock().unwrap();
                *calls += 1;
                *calls
            };
            if *self.fail_debit_call.lock().unwrap() == Some(call) {
                anyhow::bail!("connection reset");
            }
            let mut days = self.days.lock().unwrap();
            if let Some((o, d, drain)) = self.interfere.lock().unwrap().take() {
                if let Some(day) = days.get_mut(&(o, d)) {
                    day.balance = round2(day.balance - drain);
                }
            }
            match days.get_mut(&(owner.to_string(), date.to_string())) {
                Some(day) if day.balance + 1e-9 >= amount => {
                    day.balance = round2(day.balance - amount);
                    day.withdrawals.push(entry);
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn credit_day(&self, owner: &str, date: &str, amount: f64) -> anyhow::Result<()> {
            if *self.fail_credit.lock().unwrap() {
                anyhow::bail!("store unavailable");
            }
            let mut days = self.days.lock().unwrap();
            let day = days
                .entry((owner.to_string(), date.to_string()))
                .or_default();
            day.balance = round2(day.balance + amount);
            Ok(())
        }

        async fn open_transfer(&self, _intent: &TransferIntent) -> anyhow::Result<String> {
            let mut transfers = self.transfers.lock().unwrap();
            transfers.push((TransferStatus::Pending, 0.0, None));
            Ok((transfers.len() - 1).to_string())
        }

        async fn mark_transfer(
            &self,
            id: &str,
            status: TransferStatus,
            debited: f64,
            _breakdown: &[DebitLine],
            error: Option<String>,
        ) -> anyhow::Result<()> {
            let idx: usize = id.parse()?;
            let mut transfers = self.transfers.lock().unwrap();
            if let Some(row) = transfers.get_mut(idx) {
                *row = (status, debited, error);
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryLedger;
    use super::*;

    const TODAY: &str = "2024-05-10";

    fn request(amount: f64) -> WithdrawRequest {
        WithdrawRequest {
            source_id: "agent-1".into(),
            destination_id: "manager-1".into(),
            amount,
            note: "end of day".into(),
            actor: Actor {
                id: "manager-1".into(),
                name: "Ama".into(),
                role: "manager".into(),
            },
            today: TODAY.into(),
            time: "17:45:00".into(),
        }
    }

    #[tokio::test]
    async fn single_day_withdrawal() {
        let store = MemoryLedger::with_days("agent-1", &[(TODAY, 200.0)]);
        let out = withdraw(&store, &request(50.0)).await.unwrap();

        assert_eq!(out.requested, 50.0);
        assert_eq!(out.debited, 50.0);
        assert_eq!(
            out.breakdown,
            vec![DebitLine {
                date: TODAY.into(),
                amount: 50.0
            }]
        );
        assert_eq!(store.balance("agent-1", TODAY), 150.0);
        assert_eq!(store.balance("manager-1", TODAY), 50.0);
        assert_eq!(store.last_status(), Some(TransferStatus::Completed));
    }

    #[tokio::test]
    async fn spans_days_today_first_then_newest() {
        let store = MemoryLedger::with_days(
            "agent-1",
            &[("2024-05-01", 40.0), ("2024-05-08", 30.0), (TODAY, 20.0)],
        );
        let out = withdraw(&store, &request(75.0)).await.unwrap();

        let dates: Vec<_> = out.breakdown.iter().map(|d| d.date.as_str()).collect();
        assert_eq!(dates, vec![TODAY, "2024-05-08", "2024-05-01"]);
        assert_eq!(out.breakdown[2].amount, 25.0);
        assert_eq!(store.balance("agent-1", "2024-05-01"), 15.0);
        assert_eq!(store.owner_total("agent-1"), 15.0);
        assert_eq!(store.owner_total("manager-1"), 75.0);
    }

    #[tokio::test]
    async fn conserves_money_across_owners() {
        let store = MemoryLedger::with_days(
            "agent-1",
            &[("2024-04-30", 10.1), ("2024-05-02", 33.33), (TODAY, 5.57)],
        );
        let before = store.owner_total("agent-1") + store.owner_total("manager-1");
        let out = withdraw(&store, &request(49.0)).await.unwrap();
        let after = store.owner_total("agent-1") + store.owner_total("manager-1");

        assert_eq!(out.debited, 49.0);
        assert!((before - after).abs() < EPSILON);
    }

    #[tokio::test]
    async fn rejects_more_than_total_without_mutation() {
        let store = MemoryLedger::with_days("agent-1", &[(TODAY, 20.0), ("2024-05-01", 10.0)]);
        let err = withdraw(&store, &request(30.01)).await.unwrap_err();

        match err {
            LedgerError::InsufficientBalance { available } => assert_eq!(available, 30.0),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(store.owner_total("agent-1"), 30.0);
        assert_eq!(store.owner_total("manager-1"), 0.0);
        assert!(store.transfers.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejects_non_positive_amounts() {
        let store = MemoryLedger::with_days("agent-1", &[(TODAY, 20.0)]);
        for amount in [0.0, -5.0, f64::NAN, f64::INFINITY, 0.001] {
            assert!(matches!(
                withdraw(&store, &request(amount)).await,
                Err(LedgerError::InvalidAmount)
            ));
        }
    }

    #[tokio::test]
    async fn skips_day_changed_concurrently() {
        let store = MemoryLedger::with_days("agent-1", &[(TODAY, 50.0), ("2024-05-01", 50.0)]);
        *store.interfere.lock().unwrap() = Some(("agent-1".into(), TODAY.into(), 45.0));

        let out = withdraw(&store, &request(60.0)).await.unwrap();

        assert_eq!(out.debited, 50.0);
        assert_eq!(out.breakdown.len(), 1);
        assert_eq!(out.breakdown[0].date, "2024-05-01");
        assert_eq!(store.balance("agent-1", TODAY), 5.0);
        assert_eq!(store.balance("manager-1", TODAY), 50.0);
    }

    #[tokio::test]
    async fn nothing_debited_reports_fresh_total() {
        let store = MemoryLedger::with_days("agent-1", &[(TODAY, 10.0)]);
        *store.interfere.lock().unwrap() = Some(("agent-1".into(), TODAY.into(), 8.0));

        match withdraw(&store, &request(10.0)).await {
            Err(LedgerError::ConcurrentModification { available }) => assert_eq!(available, 2.0),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(store.owner_total("manager-1"), 0.0);
        assert_eq!(store.last_status(), Some(TransferStatus::Abandoned));
    }

    #[tokio::test]
    async fn failed_credit_is_logged_for_replay() {
        let store = MemoryLedger::with_days("agent-1", &[(TODAY, 100.0)]);
        *store.fail_credit.lock().unwrap() = true;

        let err = withdraw(&store, &request(40.0)).await.unwrap_err();
        assert!(matches!(err, LedgerError::Store(_)));

        let transfers = store.transfers.lock().unwrap();
        let (status, debited, error) = transfers.last().cloned().unwrap();
        assert_eq!(status, TransferStatus::CreditFailed);
        assert_eq!(debited, 40.0);
        assert!(error.unwrap().contains("store unavailable"));
    }

    #[tokio::test]
    async fn failed_debit_settles_days_already_debited() {
        let store = MemoryLedger::with_days("agent-1", &[(TODAY, 30.0), ("2024-05-01", 50.0)]);
        *store.fail_debit_call.lock().unwrap() = Some(2);

        let out = withdraw(&store, &request(60.0)).await.unwrap();

        assert_eq!(out.debited, 30.0);
        assert_eq!(out.breakdown.len(), 1);
        assert_eq!(store.owner_total("agent-1"), 50.0);
        assert_eq!(store.owner_total("manager-1"), 30.0);
        let (status, debited, error) = store.transfers.lock().unwrap().last().cloned().unwrap();
        assert_eq!(status, TransferStatus::Completed);
        assert_eq!(debited, 30.0);
        assert!(error.unwrap().contains("connection reset"));
    }

    #[tokio::test]
    async fn failed_debit_then_failed_credit_is_replayable() {
        let store = MemoryLedger::with_days("agent-1", &[(TODAY, 30.0), ("2024-05-01", 50.0)]);
        *store.fail_debit_call.lock().unwrap() = Some(2);
        *store.fail_credit.lock().unwrap() = true;

        assert!(matches!(
            withdraw(&store, &request(60.0)).await,
            Err(LedgerError::Store(_))
        ));
        let (status, debited, _) = store.transfers.lock().unwrap().last().cloned().unwrap();
        assert_eq!(status, TransferStatus::CreditFailed);
        assert_eq!(debited, 30.0);
    }

    #[tokio::test]
    async fn failed_first_debit_moves_nothing() {
        let store = MemoryLedger::with_days("agent-1", &[(TODAY, 30.0)]);
        *store.fail_debit_call.lock().unwrap() = Some(1);

        assert!(matches!(
            withdraw(&store, &request(20.0)).await,
            Err(LedgerError::Store(_))
        ));
        assert_eq!(store.owner_total("agent-1"), 30.0);
        let (status, _, error) = store.transfers.lock().unwrap().last().cloned().unwrap();
        assert_eq!(status, TransferStatus::Abandoned);
        assert!(error.unwrap().contains("connection reset"));
    }

    #[test]
    fn candidate_order() {
        let mut days = vec![
            DayBalance { date: "2024-01-02".into(), balance: 1.0 },
            DayBalance { date: TODAY.into(), balance: 1.0 },
            DayBalance { date: "2024-03-09".into(), balance: 1.0 },
        ];
        order_candidates(&mut days, TODAY);
        let dates: Vec<_> = days.iter().map(|d| d.date.as_str()).collect();
        assert_eq!(dates, vec![TODAY, "2024-03-09", "2024-01-02"]);
    }

    #[test]
    fn insufficient_message_carries_total() {
        let err = LedgerError::InsufficientBalance { available: 1234.5 };
        assert_eq!(
            err.to_string(),
            "Insufficient balance. Total across all days: GHS 1,234.50"
        );
    }
}
