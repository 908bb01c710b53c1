//! Order lifecycle integration tests.
//!
//! Run with: TEST_DATABASE_URL=postgres://... cargo test -- --ignored

mod common;

use common::{dec, deliver_order, place_order, seller_balance, settle_order, spawn_app, Parties};
use marketplace_service::error::EngineError;
use marketplace_service::models::{NewLineItem, OrderStatus, PaymentStatus};
use marketplace_service::services::notifications::EventType;
use uuid::Uuid;

#[tokio::test]
#[ignore]
async fn create_rejects_an_empty_cart() {
    let app = spawn_app().await;
    let err = app
        .orders
        .create(Uuid::new_v4(), vec![], dec("0.00"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::EmptyCart), "{err}");
}

#[tokio::test]
#[ignore]
async fn create_rejects_a_total_that_disagrees_with_the_items() {
    let app = spawn_app().await;
    let err = app
        .orders
        .create(
            Uuid::new_v4(),
            vec![NewLineItem {
                product_id: Uuid::new_v4(),
                seller_id: Uuid::new_v4(),
                unit_price: dec("25.00"),
                quantity: 2,
            }],
            dec("49.99"),
        )
        .await
        .unwrap_err();
    match err {
        EngineError::PriceMismatch { supplied, computed } => {
            assert_eq!(supplied, dec("49.99"));
            assert_eq!(computed, dec("50.00"));
        }
        other => panic!("expected PriceMismatch, got {other}"),
    }
}

#[tokio::test]
#[ignore]
async fn create_snapshots_line_items_in_order() {
    let app = spawn_app().await;
    let parties = Parties::new();
    let order = app
        .orders
        .create(
            parties.buyer_id,
            vec![
                NewLineItem {
                    product_id: Uuid::new_v4(),
                    seller_id: parties.seller_id,
                    unit_price: dec("30.00"),
                    quantity: 2,
                },
                NewLineItem {
                    product_id: Uuid::new_v4(),
                    seller_id: parties.seller_id,
                    unit_price: dec("40.00"),
                    quantity: 1,
                },
            ],
            dec("100.00"),
        )
        .await
        .unwrap();

    assert_eq!(order.order_status, OrderStatus::Processing);
    let items = app.orders.items(order.order_id).await.unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].position, 0);
    assert_eq!(items[0].unit_price, dec("30.00"));
    assert_eq!(items[1].position, 1);

    let events = app.dispatcher.events();
    assert!(events.contains(&EventType::OrderPlaced));
}

#[tokio::test]
#[ignore]
async fn illegal_edges_are_rejected() {
    let app = spawn_app().await;
    let parties = Parties::new();
    let order = place_order(&app, &parties, "100.00").await;

    // Processing cannot jump straight to Delivered.
    let err = app
        .orders
        .transition(order.order_id, OrderStatus::Delivered)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }), "{err}");

    // Delivered orders cannot be cancelled.
    let (delivered, _) = deliver_order(&app, &Parties::new(), "100.00").await;
    let err = app
        .orders
        .transition(delivered.order_id, OrderStatus::Cancelled)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::OrderAlreadyDelivered), "{err}");
}

#[tokio::test]
#[ignore]
async fn delivery_stamps_the_timestamp() {
    let app = spawn_app().await;
    let parties = Parties::new();
    let (order, _) = settle_order(&app, &parties, "100.00").await;

    let delivered = app
        .orders
        .transition(order.order_id, OrderStatus::Delivered)
        .await
        .unwrap();
    assert_eq!(delivered.order_status, OrderStatus::Delivered);
    assert!(delivered.delivered_utc.is_some());
}

/// Cancelling a processing order has no payment to unwind.
#[tokio::test]
#[ignore]
async fn cancelling_before_payment_moves_no_money() {
    let app = spawn_app().await;
    let parties = Parties::new();
    let order = place_order(&app, &parties, "100.00").await;

    let cancelled = app
        .orders
        .transition(order.order_id, OrderStatus::Cancelled)
        .await
        .unwrap();
    assert_eq!(cancelled.order_status, OrderStatus::Cancelled);

    let entries: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM ledger_entries WHERE order_id = $1")
            .bind(order.order_id)
            .fetch_one(app.db.pool())
            .await
            .unwrap();
    assert_eq!(entries, 0);
}

/// Cancel-refund round trip: seller loses exactly net, platform exactly the
/// fee, payment flips to refunded, order to Cancelled.
#[tokio::test]
#[ignore]
async fn cancelling_a_shipped_order_reverses_the_settlement() {
    let app = spawn_app().await;
    let parties = Parties::new();
    let (order, payment) = settle_order(&app, &parties, "100.00").await;
    assert_eq!(seller_balance(&app, parties.seller_id).await, dec("96.00"));

    let cancelled = app
        .orders
        .transition(order.order_id, OrderStatus::Cancelled)
        .await
        .unwrap();
    assert_eq!(cancelled.order_status, OrderStatus::Cancelled);
    assert_eq!(seller_balance(&app, parties.seller_id).await, dec("0.00"));

    let payment = app.payments.get(payment.payment_id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Refunded);
    assert!(payment.refunded_utc.is_some());

    // Settlement, commission, and both reversals: four entries, no more.
    let reasons: Vec<String> = sqlx::query_scalar(
        "SELECT reason FROM ledger_entries WHERE payment_id = $1 ORDER BY posted_utc, reason",
    )
    .bind(payment.payment_id)
    .fetch_all(app.db.pool())
    .await
    .unwrap();
    assert_eq!(reasons.len(), 4);
    assert!(reasons.contains(&"refund_reversal".to_string()));
    assert!(reasons.contains(&"fee_reversal".to_string()));

    let events = app.dispatcher.events();
    assert!(events.contains(&EventType::RefundIssued));
    assert!(events.contains(&EventType::OrderCancelled));
}
