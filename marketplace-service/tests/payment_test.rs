//! Payment engine integration tests.
//!
//! Run with: TEST_DATABASE_URL=postgres://... cargo test -- --ignored

mod common;

use common::{dec, place_order, settle_order, spawn_app, Parties};
use marketplace_service::error::EngineError;
use marketplace_service::models::{NewLineItem, OrderStatus, PaymentStatus};
use marketplace_service::services::ledger;
use uuid::Uuid;

/// subtotal 100.00 at 20% tax and 20% fee: tax 20.00, fee 24.00, total
/// 144.00, net 96.00.
#[tokio::test]
#[ignore]
async fn initiate_produces_the_worked_breakdown() {
    let app = spawn_app().await;
    let parties = Parties::new();
    let order = place_order(&app, &parties, "100.00").await;

    let initiated = app
        .payments
        .initiate(order.order_id, parties.buyer_id)
        .await
        .expect("Failed to initiate payment");

    let payment = &initiated.payment;
    assert_eq!(payment.subtotal, dec("100.00"));
    assert_eq!(payment.tax, dec("20.00"));
    assert_eq!(payment.platform_fee, dec("24.00"));
    assert_eq!(payment.total, dec("144.00"));
    assert_eq!(payment.net_amount, dec("96.00"));
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert!(!initiated.client_secret.is_empty());

    // The order now points at the pending payment.
    let order = app.orders.get(order.order_id).await.unwrap().unwrap();
    assert_eq!(order.payment_id, Some(payment.payment_id));
    assert_eq!(order.order_status, OrderStatus::Processing);
}

/// A 9.99 order is below the 10.00 minimum: AmountTooLow and no payment row.
#[tokio::test]
#[ignore]
async fn initiate_rejects_totals_below_the_minimum() {
    let app = spawn_app().await;
    let parties = Parties::new();
    let order = place_order(&app, &parties, "9.99").await;

    let err = app
        .payments
        .initiate(order.order_id, parties.buyer_id)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::AmountTooLow { .. }), "{err}");

    let attempts = app.payments.history_for_order(order.order_id).await.unwrap();
    assert!(attempts.is_empty());
}

#[tokio::test]
#[ignore]
async fn initiate_rejects_orders_spanning_sellers() {
    let app = spawn_app().await;
    let buyer_id = Uuid::new_v4();
    let order = app
        .orders
        .create(
            buyer_id,
            vec![
                NewLineItem {
                    product_id: Uuid::new_v4(),
                    seller_id: Uuid::new_v4(),
                    unit_price: dec("30.00"),
                    quantity: 1,
                },
                NewLineItem {
                    product_id: Uuid::new_v4(),
                    seller_id: Uuid::new_v4(),
                    unit_price: dec("20.00"),
                    quantity: 1,
                },
            ],
            dec("50.00"),
        )
        .await
        .unwrap();

    let err = app.payments.initiate(order.order_id, buyer_id).await.unwrap_err();
    assert!(matches!(err, EngineError::MultipleSellers), "{err}");
}

/// Success settles both credits atomically and ships the order.
#[tokio::test]
#[ignore]
async fn confirm_success_settles_seller_and_platform() {
    let app = spawn_app().await;
    let parties = Parties::new();
    let (order, payment) = settle_order(&app, &parties, "100.00").await;

    assert_eq!(payment.status, PaymentStatus::Succeeded);
    assert_eq!(order.order_status, OrderStatus::Shipped);
    assert_eq!(common::seller_balance(&app, parties.seller_id).await, dec("96.00"));

    // Exactly one settlement and one commission entry for this payment.
    let amounts: Vec<(String, rust_decimal::Decimal)> = sqlx::query_as(
        "SELECT reason, amount FROM ledger_entries WHERE payment_id = $1 ORDER BY reason",
    )
    .bind(payment.payment_id)
    .fetch_all(app.db.pool())
    .await
    .unwrap();
    assert_eq!(
        amounts,
        vec![
            ("commission".to_string(), dec("24.00")),
            ("settlement".to_string(), dec("96.00")),
        ]
    );
}

/// A second gateway callback for the same transaction is a no-op.
#[tokio::test]
#[ignore]
async fn confirm_success_is_idempotent() {
    let app = spawn_app().await;
    let parties = Parties::new();
    let (_, payment) = settle_order(&app, &parties, "100.00").await;

    let replay = app
        .payments
        .confirm_success(&payment.transaction_id)
        .await
        .expect("Replayed callback must succeed");
    assert_eq!(replay.payment_id, payment.payment_id);
    assert_eq!(replay.status, PaymentStatus::Succeeded);

    // No duplicated credits.
    let entries: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM ledger_entries WHERE payment_id = $1")
            .bind(payment.payment_id)
            .fetch_one(app.db.pool())
            .await
            .unwrap();
    assert_eq!(entries, 2);
    assert_eq!(common::seller_balance(&app, parties.seller_id).await, dec("96.00"));
}

/// Failure leaves the order payable and moves no money.
#[tokio::test]
#[ignore]
async fn confirm_failure_keeps_the_order_payable() {
    let app = spawn_app().await;
    let parties = Parties::new();
    let order = place_order(&app, &parties, "100.00").await;
    let initiated = app
        .payments
        .initiate(order.order_id, parties.buyer_id)
        .await
        .unwrap();

    let failed = app
        .payments
        .confirm_failure(&initiated.payment.transaction_id, "card_declined")
        .await
        .unwrap();
    assert_eq!(failed.status, PaymentStatus::Failed);
    assert_eq!(failed.failure_reason.as_deref(), Some("card_declined"));

    let order = app.orders.get(order.order_id).await.unwrap().unwrap();
    assert_eq!(order.order_status, OrderStatus::Processing);

    // A success callback for a failed transaction is a state conflict.
    let err = app
        .payments
        .confirm_success(&initiated.payment.transaction_id)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::PaymentNotInState { .. }), "{err}");

    // Retry: a fresh attempt on the same order goes through.
    let retried = app
        .payments
        .initiate(order.order_id, parties.buyer_id)
        .await
        .unwrap();
    app.payments
        .confirm_success(&retried.payment.transaction_id)
        .await
        .unwrap();

    let attempts = app.payments.history_for_order(order.order_id).await.unwrap();
    assert_eq!(attempts.len(), 2);
}

#[tokio::test]
#[ignore]
async fn initiate_rejects_non_processing_orders() {
    let app = spawn_app().await;
    let parties = Parties::new();
    let (order, _) = settle_order(&app, &parties, "100.00").await;

    let err = app
        .payments
        .initiate(order.order_id, parties.buyer_id)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::OrderNotPayable { .. }), "{err}");
}

/// The stored balance must always equal the balance replayed from the
/// append-only audit trail.
#[tokio::test]
#[ignore]
async fn stored_balance_matches_the_replayed_trail() {
    let app = spawn_app().await;
    let parties = Parties::new();
    settle_order(&app, &parties, "100.00").await;
    settle_order(&app, &parties, "33.33").await;

    let account_id = common::seller_account_id(&app, parties.seller_id).await;
    let mut conn = app.db.pool().acquire().await.unwrap();
    let stored = ledger::balance(&mut conn, account_id).await.unwrap();
    let replayed = ledger::replay_balance(&mut conn, account_id).await.unwrap();
    assert_eq!(stored, replayed);
}
