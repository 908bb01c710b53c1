//! Common test utilities for marketplace-service integration tests.
//!
//! Run with: TEST_DATABASE_URL=postgres://... cargo test -- --ignored

use async_trait::async_trait;
use marketplace_service::config::FeePolicy;
use marketplace_service::error::EngineError;
use marketplace_service::models::{NewLineItem, Order, OrderStatus, Payment};
use marketplace_service::services::database::Database;
use marketplace_service::services::gateway::{CreateIntent, PaymentGateway, PaymentIntent};
use marketplace_service::services::notifications::{
    EventType, Notification, NotificationDispatcher,
};
use marketplace_service::services::orders::OrderEngine;
use marketplace_service::services::payments::PaymentEngine;
use marketplace_service::services::returns::ReturnEngine;
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex, Once};
use uuid::Uuid;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        service_core::observability::init_tracing("info,marketplace_service=debug,sqlx=warn");
    });
}

pub fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

/// Gateway double: every intent is accepted with a fresh transaction id.
pub struct AcceptingGateway;

#[async_trait]
impl PaymentGateway for AcceptingGateway {
    async fn create_intent(&self, _request: CreateIntent) -> Result<PaymentIntent, EngineError> {
        let intent_id = format!("pi_test_{}", Uuid::new_v4().simple());
        Ok(PaymentIntent {
            client_secret: format!("{}_secret", intent_id),
            intent_id,
        })
    }
}

/// Dispatcher double that records every delivered notification.
#[derive(Default)]
pub struct RecordingDispatcher {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingDispatcher {
    pub fn events(&self) -> Vec<EventType> {
        self.sent.lock().unwrap().iter().map(|n| n.event_type).collect()
    }

    pub fn sent_to(&self, recipient_id: Uuid) -> Vec<Notification> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.recipient_id == recipient_id)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn notify(&self, notification: Notification) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(notification);
        Ok(())
    }
}

/// The full engine stack wired against the test database.
pub struct TestApp {
    pub db: Database,
    pub orders: OrderEngine,
    pub payments: PaymentEngine,
    pub returns: ReturnEngine,
    pub dispatcher: Arc<RecordingDispatcher>,
}

/// Build the engines against TEST_DATABASE_URL with migrations applied.
pub async fn spawn_app() -> TestApp {
    init_tracing();

    let database_url = std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must be set to run integration tests");

    let db = Database::new(&database_url, 5, 1)
        .await
        .expect("Failed to connect to test database");
    db.run_migrations().await.expect("Failed to run migrations");

    let dispatcher = Arc::new(RecordingDispatcher::default());
    let orders = OrderEngine::new(db.clone(), dispatcher.clone());
    let payments = PaymentEngine::new(
        db.clone(),
        Arc::new(AcceptingGateway),
        dispatcher.clone(),
        FeePolicy::default(),
    );
    let returns = ReturnEngine::new(db.clone(), dispatcher.clone());

    TestApp {
        db,
        orders,
        payments,
        returns,
        dispatcher,
    }
}

/// Ids for one buyer/seller pair, fresh per test.
pub struct Parties {
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
}

impl Parties {
    pub fn new() -> Self {
        Self {
            buyer_id: Uuid::new_v4(),
            seller_id: Uuid::new_v4(),
        }
    }
}

/// Place a single-item order whose line items sum to `subtotal`.
pub async fn place_order(app: &TestApp, parties: &Parties, subtotal: &str) -> Order {
    app.orders
        .create(
            parties.buyer_id,
            vec![NewLineItem {
                product_id: Uuid::new_v4(),
                seller_id: parties.seller_id,
                unit_price: dec(subtotal),
                quantity: 1,
            }],
            dec(subtotal),
        )
        .await
        .expect("Failed to create order")
}

/// Place an order and drive it through initiate + confirm_success, leaving it
/// Shipped with a succeeded payment and both settlement credits posted.
pub async fn settle_order(app: &TestApp, parties: &Parties, subtotal: &str) -> (Order, Payment) {
    let order = place_order(app, parties, subtotal).await;
    let initiated = app
        .payments
        .initiate(order.order_id, parties.buyer_id)
        .await
        .expect("Failed to initiate payment");
    let payment = app
        .payments
        .confirm_success(&initiated.payment.transaction_id)
        .await
        .expect("Failed to confirm payment");
    let order = app
        .orders
        .get(order.order_id)
        .await
        .expect("Failed to re-fetch order")
        .expect("Order vanished");
    assert_eq!(order.order_status, OrderStatus::Shipped);
    (order, payment)
}

/// Settle an order and mark it delivered, the precondition for returns.
pub async fn deliver_order(app: &TestApp, parties: &Parties, subtotal: &str) -> (Order, Payment) {
    let (order, payment) = settle_order(app, parties, subtotal).await;
    let order = app
        .orders
        .transition(order.order_id, OrderStatus::Delivered)
        .await
        .expect("Failed to deliver order");
    (order, payment)
}

/// Stored balance of a seller's ledger account.
pub async fn seller_balance(app: &TestApp, seller_id: Uuid) -> Decimal {
    let balance: Option<Decimal> = sqlx::query_scalar(
        "SELECT balance FROM ledger_accounts WHERE kind = 'seller' AND owner_id = $1",
    )
    .bind(seller_id)
    .fetch_optional(app.db.pool())
    .await
    .expect("Failed to read seller balance");
    balance.expect("Seller has no ledger account")
}

/// The seller's ledger account id.
pub async fn seller_account_id(app: &TestApp, seller_id: Uuid) -> Uuid {
    sqlx::query_scalar(
        "SELECT account_id FROM ledger_accounts WHERE kind = 'seller' AND owner_id = $1",
    )
    .bind(seller_id)
    .fetch_one(app.db.pool())
    .await
    .expect("Seller has no ledger account")
}
