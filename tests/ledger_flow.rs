#[path = "common/mod.rs"]
mod common;

use chrono::Local;

use common::{setup_state, teardown};
use salesdesk::{
    ledger::{Actor, DebitLine, LedgerError, LedgerStore, WithdrawRequest, withdraw},
    models::TransferStatus,
    state::{MongoLedger, find_user},
};

#[tokio::test]
async fn manager_withdraws_to_admin() {
    let ctx = setup_state().await;
    let Some(c) = ctx.as_ref() else { return };

    let manager = find_user(&c.state, "kumasi.mgr").await.unwrap().unwrap();
    let admin = find_user(&c.state, "admin").await.unwrap().unwrap();
    let manager_id = manager.id.unwrap().to_hex();
    let admin_id = admin.id.unwrap().to_hex();
    let today = Local::now().date_naive().format("%Y-%m-%d").to_string();

    let store = MongoLedger::new(&c.state);
    store
        .record_collection(&manager_id, None, &today, 200.0)
        .await
        .unwrap();

    let request = |amount: f64| WithdrawRequest {
        source_id: manager_id.clone(),
        destination_id: admin_id.clone(),
        amount,
        note: "end of day".into(),
        actor: Actor {
            id: admin_id.clone(),
            name: admin.name.clone(),
            role: "admin".into(),
        },
        today: today.clone(),
        time: "18:00:00".into(),
    };

    let outcome = withdraw(&store, &request(50.0)).await.unwrap();
    assert_eq!(outcome.debited, 50.0);
    assert_eq!(
        outcome.breakdown,
        vec![DebitLine {
            date: today.clone(),
            amount: 50.0
        }]
    );
    assert_eq!(store.total(&manager_id).await.unwrap(), 150.0);
    assert_eq!(store.total(&admin_id).await.unwrap(), 50.0);

    let transfers = store
        .list_transfers(Some(TransferStatus::Completed), 10)
        .await
        .unwrap();
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].source_id, manager_id);

    let err = withdraw(&store, &request(500.0)).await.unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InsufficientBalance { available } if available == 150.0
    ));
    assert_eq!(store.total(&manager_id).await.unwrap(), 150.0);

    teardown(ctx).await;
}
