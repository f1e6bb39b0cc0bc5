//! Integration tests for the atomic transfer transaction.
//!
//! These tests require a running PostgreSQL instance and are ignored by
//! default. Set TEST_DATABASE_URL and run with:
//!
//!     cargo test -- --ignored

mod common;

use bank_service::models::{Currency, TransferTxParams};
use common::{create_account_with, TestApp};
use service_core::error::AppError;
use std::collections::HashSet;

#[tokio::test]
#[ignore]
async fn transfer_tx_moves_money_between_accounts() {
    let app = TestApp::spawn().await;

    let account1 = create_account_with(&app.db, Currency::Usd, 1000).await;
    let account2 = create_account_with(&app.db, Currency::Usd, 500).await;

    let amount = 10_i64;
    let result = app
        .db
        .transfer_tx(TransferTxParams {
            from_account_id: account1.id,
            to_account_id: account2.id,
            amount,
        })
        .await
        .expect("Transfer failed");

    // Transfer record
    assert!(result.transfer.id > 0);
    assert_eq!(result.transfer.from_account_id, account1.id);
    assert_eq!(result.transfer.to_account_id, account2.id);
    assert_eq!(result.transfer.amount, amount);

    // Entries: one debit on the source, one credit on the destination
    assert_eq!(result.from_entry.account_id, account1.id);
    assert_eq!(result.from_entry.amount, -amount);
    assert!(result.from_entry.is_debit());
    assert_eq!(result.to_entry.account_id, account2.id);
    assert_eq!(result.to_entry.amount, amount);
    assert!(result.to_entry.is_credit());

    // Balances in the returned snapshots
    assert_eq!(result.from_account.id, account1.id);
    assert_eq!(result.from_account.balance, account1.balance - amount);
    assert_eq!(result.to_account.id, account2.id);
    assert_eq!(result.to_account.balance, account2.balance + amount);

    // Everything was persisted, and re-reading returns the same rows
    let stored_transfer = app
        .db
        .get_transfer(result.transfer.id)
        .await
        .expect("Transfer was not persisted");
    assert_eq!(stored_transfer.id, result.transfer.id);
    assert_eq!(stored_transfer.from_account_id, result.transfer.from_account_id);
    assert_eq!(stored_transfer.to_account_id, result.transfer.to_account_id);
    assert_eq!(stored_transfer.amount, result.transfer.amount);
    assert_eq!(stored_transfer.created_at, result.transfer.created_at);

    let stored_from_entry = app
        .db
        .get_entry(result.from_entry.id)
        .await
        .expect("Source entry was not persisted");
    assert_eq!(stored_from_entry.id, result.from_entry.id);
    assert_eq!(stored_from_entry.account_id, result.from_entry.account_id);
    assert_eq!(stored_from_entry.amount, result.from_entry.amount);
    assert_eq!(stored_from_entry.created_at, result.from_entry.created_at);

    let stored_to_entry = app
        .db
        .get_entry(result.to_entry.id)
        .await
        .expect("Destination entry was not persisted");
    assert_eq!(stored_to_entry.id, result.to_entry.id);
    assert_eq!(stored_to_entry.account_id, result.to_entry.account_id);
    assert_eq!(stored_to_entry.amount, result.to_entry.amount);
    assert_eq!(stored_to_entry.created_at, result.to_entry.created_at);

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn concurrent_transfers_serialize_balance_updates() {
    let app = TestApp::spawn().await;

    let account1 = create_account_with(&app.db, Currency::Usd, 1000).await;
    let account2 = create_account_with(&app.db, Currency::Usd, 500).await;

    let n = 5;
    let amount = 10_i64;

    let (sender, mut receiver) = tokio::sync::mpsc::channel(n);
    for _ in 0..n {
        let db = app.db.clone();
        let sender = sender.clone();
        let params = TransferTxParams {
            from_account_id: account1.id,
            to_account_id: account2.id,
            amount,
        };
        tokio::spawn(async move {
            let result = db.transfer_tx(params).await;
            sender.send(result).await.ok();
        });
    }
    drop(sender);

    // Each committed transfer must observe a distinct intermediate step:
    // the k-th to finish sees exactly k*amount moved so far.
    let mut seen_steps = HashSet::new();
    while let Some(result) = receiver.recv().await {
        let result = result.expect("Concurrent transfer failed");

        assert_eq!(result.transfer.from_account_id, account1.id);
        assert_eq!(result.transfer.to_account_id, account2.id);
        assert_eq!(result.transfer.amount, amount);
        assert!(result.transfer.id > 0);

        assert_eq!(result.from_entry.account_id, account1.id);
        assert_eq!(result.from_entry.amount, -amount);
        assert_eq!(result.to_entry.account_id, account2.id);
        assert_eq!(result.to_entry.amount, amount);

        app.db
            .get_transfer(result.transfer.id)
            .await
            .expect("Transfer was not persisted");

        assert_eq!(result.from_account.id, account1.id);
        assert_eq!(result.to_account.id, account2.id);

        let out_diff = account1.balance - result.from_account.balance;
        let in_diff = result.to_account.balance - account2.balance;
        assert_eq!(out_diff, in_diff);
        assert!(out_diff > 0);
        assert_eq!(out_diff % amount, 0);

        let k = out_diff / amount;
        assert!(k >= 1 && k <= n as i64);
        assert!(seen_steps.insert(k), "duplicate intermediate step {}", k);
    }
    assert_eq!(seen_steps.len(), n);

    // Final balances reflect all n transfers
    let updated1 = app
        .db
        .get_account(account1.id)
        .await
        .expect("Failed to get source account");
    let updated2 = app
        .db
        .get_account(account2.id)
        .await
        .expect("Failed to get destination account");

    assert_eq!(updated1.balance, account1.balance - n as i64 * amount);
    assert_eq!(updated2.balance, account2.balance + n as i64 * amount);

    // Five transfer rows and one entry per side per transfer
    let transfers = app
        .db
        .list_transfers(account1.id, account2.id, 20, 0)
        .await
        .expect("Failed to list transfers");
    assert_eq!(transfers.len(), n);

    let entries1 = app
        .db
        .list_entries(account1.id, 20, 0)
        .await
        .expect("Failed to list entries");
    let entries2 = app
        .db
        .list_entries(account2.id, 20, 0)
        .await
        .expect("Failed to list entries");
    assert_eq!(entries1.len(), n);
    assert_eq!(entries2.len(), n);

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn opposing_transfers_do_not_deadlock() {
    let app = TestApp::spawn().await;

    let account1 = create_account_with(&app.db, Currency::Usd, 1000).await;
    let account2 = create_account_with(&app.db, Currency::Usd, 500).await;

    let n = 10;
    let amount = 10_i64;

    // Half the transfers run in each direction, concurrently. With balance
    // updates always applied in ascending account-id order no pair of
    // transactions can wait on each other's row locks.
    let (sender, mut receiver) = tokio::sync::mpsc::channel(n);
    for i in 0..n {
        let db = app.db.clone();
        let sender = sender.clone();
        let (from_id, to_id) = if i % 2 == 1 {
            (account2.id, account1.id)
        } else {
            (account1.id, account2.id)
        };
        tokio::spawn(async move {
            let result = db
                .transfer_tx(TransferTxParams {
                    from_account_id: from_id,
                    to_account_id: to_id,
                    amount,
                })
                .await;
            sender.send(result).await.ok();
        });
    }
    drop(sender);

    while let Some(result) = receiver.recv().await {
        result.expect("Transfer deadlocked or failed");
    }

    // Equal traffic in both directions nets to zero
    let updated1 = app
        .db
        .get_account(account1.id)
        .await
        .expect("Failed to get account");
    let updated2 = app
        .db
        .get_account(account2.id)
        .await
        .expect("Failed to get account");

    assert_eq!(updated1.balance, account1.balance);
    assert_eq!(updated2.balance, account2.balance);

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn failed_transfer_rolls_back_all_writes() {
    let app = TestApp::spawn().await;

    let account = create_account_with(&app.db, Currency::Usd, 1000).await;

    // Destination does not exist, so the transfer insert violates its
    // foreign key and the whole transaction must roll back.
    let result = app
        .db
        .transfer_tx(TransferTxParams {
            from_account_id: account.id,
            to_account_id: i64::MAX,
            amount: 10,
        })
        .await;
    assert!(result.is_err());

    let unchanged = app
        .db
        .get_account(account.id)
        .await
        .expect("Failed to get account");
    assert_eq!(unchanged.balance, account.balance);

    let entries = app
        .db
        .list_entries(account.id, 10, 0)
        .await
        .expect("Failed to list entries");
    assert!(entries.is_empty());

    let transfers = app
        .db
        .list_transfers(account.id, account.id, 10, 0)
        .await
        .expect("Failed to list transfers");
    assert!(transfers.is_empty());

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn transfer_of_unrepresentable_amount_is_rejected() {
    let app = TestApp::spawn().await;

    let account = create_account_with(&app.db, Currency::Usd, 100).await;

    // i64::MIN has no i64 negation, so no debit entry can be written for it.
    let result = app
        .db
        .transfer_tx(TransferTxParams {
            from_account_id: account.id,
            to_account_id: account.id,
            amount: i64::MIN,
        })
        .await;
    assert!(matches!(result, Err(AppError::BadRequest(_))));

    let unchanged = app
        .db
        .get_account(account.id)
        .await
        .expect("Failed to get account");
    assert_eq!(unchanged.balance, account.balance);

    let entries = app
        .db
        .list_entries(account.id, 10, 0)
        .await
        .expect("Failed to list entries");
    assert!(entries.is_empty());

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn self_transfer_nets_to_zero() {
    let app = TestApp::spawn().await;

    let account = create_account_with(&app.db, Currency::Usd, 100).await;

    let result = app
        .db
        .transfer_tx(TransferTxParams {
            from_account_id: account.id,
            to_account_id: account.id,
            amount: 25,
        })
        .await
        .expect("Self transfer failed");

    assert_eq!(result.transfer.from_account_id, account.id);
    assert_eq!(result.transfer.to_account_id, account.id);
    assert_eq!(result.from_entry.amount, -25);
    assert_eq!(result.to_entry.amount, 25);

    let updated = app
        .db
        .get_account(account.id)
        .await
        .expect("Failed to get account");
    assert_eq!(updated.balance, account.balance);

    let entries = app
        .db
        .list_entries(account.id, 10, 0)
        .await
        .expect("Failed to list entries");
    assert_eq!(entries.len(), 2);

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn entries_and_transfers_are_listable_after_transfers() {
    let app = TestApp::spawn().await;

    let account1 = create_account_with(&app.db, Currency::Usd, 1000).await;
    let account2 = create_account_with(&app.db, Currency::Usd, 500).await;

    for _ in 0..3 {
        app.db
            .transfer_tx(TransferTxParams {
                from_account_id: account1.id,
                to_account_id: account2.id,
                amount: 10,
            })
            .await
            .expect("Transfer failed");
    }

    let entries1 = app
        .db
        .list_entries(account1.id, 10, 0)
        .await
        .expect("Failed to list entries");
    assert_eq!(entries1.len(), 3);
    assert!(entries1.iter().all(|e| e.amount == -10));

    let entries2 = app
        .db
        .list_entries(account2.id, 10, 0)
        .await
        .expect("Failed to list entries");
    assert_eq!(entries2.len(), 3);
    assert!(entries2.iter().all(|e| e.amount == 10));

    let transfers = app
        .db
        .list_transfers(account1.id, account2.id, 10, 0)
        .await
        .expect("Failed to list transfers");
    assert_eq!(transfers.len(), 3);
    for transfer in &transfers {
        assert_eq!(transfer.from_account_id, account1.id);
        assert_eq!(transfer.to_account_id, account2.id);
        assert_eq!(transfer.amount, 10);
    }

    app.cleanup().await;
}
