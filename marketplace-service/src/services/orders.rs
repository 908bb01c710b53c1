//! Order aggregate: checkout creation and the status state machine.
//!
//! Cancelling a shipped order is the one transition with ledger effect: the
//! payment flips to refunded and both settlement credits are reversed in the
//! same transaction as the status change.

use crate::error::EngineError;
use crate::models::{
    Correlation, EntryReason, LineItem, NewLineItem, Order, OrderStatus, Payment, PaymentStatus,
};
use crate::services::database::Database;
use crate::services::ledger;
use crate::services::metrics::{DB_QUERY_DURATION, PAYMENTS_TOTAL};
use crate::services::notifications::{EventType, NotificationDispatcher, Outbox, RecipientKind};
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Order engine.
#[derive(Clone)]
pub struct OrderEngine {
    db: Database,
    dispatcher: Arc<dyn NotificationDispatcher>,
}

impl OrderEngine {
    pub fn new(db: Database, dispatcher: Arc<dyn NotificationDispatcher>) -> Self {
        Self { db, dispatcher }
    }

    /// Create an order at checkout. Line items are the immutable price
    /// snapshot; their sum must equal the supplied total exactly.
    #[instrument(skip(self, line_items), fields(buyer_id = %buyer_id, item_count = line_items.len()))]
    pub async fn create(
        &self,
        buyer_id: Uuid,
        line_items: Vec<NewLineItem>,
        total_price: Decimal,
    ) -> Result<Order, EngineError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_order"])
            .start_timer();

        if line_items.is_empty() {
            return Err(EngineError::EmptyCart);
        }
        for item in &line_items {
            if item.quantity < 1 {
                return Err(EngineError::InvalidAmount {
                    amount: Decimal::from(item.quantity),
                });
            }
            if item.unit_price < Decimal::ZERO {
                return Err(EngineError::InvalidAmount {
                    amount: item.unit_price,
                });
            }
        }

        let computed: Decimal = line_items.iter().map(|item| item.line_total()).sum();
        if computed != total_price {
            return Err(EngineError::PriceMismatch {
                supplied: total_price,
                computed,
            });
        }

        let order_id = Uuid::new_v4();
        let mut tx = self.db.pool().begin().await?;

        let order = sqlx::query_as::<_, Order>(
            r#"
            INSERT INTO orders (order_id, buyer_id, total_price, order_status)
            VALUES ($1, $2, $3, 'processing')
            RETURNING order_id, buyer_id, total_price, order_status, payment_id, created_utc, delivered_utc
            "#,
        )
        .bind(order_id)
        .bind(buyer_id)
        .bind(total_price)
        .fetch_one(&mut *tx)
        .await?;

        for (position, item) in line_items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_items
                    (item_id, order_id, position, product_id, seller_id, unit_price, quantity)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(order_id)
            .bind(position as i32)
            .bind(item.product_id)
            .bind(item.seller_id)
            .bind(item.unit_price)
            .bind(item.quantity)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        timer.observe_duration();

        let mut outbox = Outbox::new();
        let sellers: BTreeSet<Uuid> = line_items.iter().map(|item| item.seller_id).collect();
        for seller_id in sellers {
            outbox.push(
                seller_id,
                RecipientKind::Seller,
                EventType::OrderPlaced,
                serde_json::json!({ "order_id": order_id, "total_price": total_price }),
            );
        }
        outbox.dispatch(self.dispatcher.as_ref()).await;

        info!(order_id = %order.order_id, total_price = %order.total_price, "Order created");

        Ok(order)
    }

    /// Drive the order status machine.
    ///
    /// Legal edges: Processing -> Shipped -> Delivered, plus Cancelled from
    /// Processing or Shipped. Cancelling a shipped order also refunds the
    /// payment and reverses both settlement credits atomically.
    #[instrument(skip(self), fields(order_id = %order_id, new_status = %new_status))]
    pub async fn transition(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<Order, EngineError> {
        let mut tx = self.db.pool().begin().await?;

        // Row lock: transitions on the same order serialize here, and the
        // settlement path takes the same lock through its own status CAS.
        let order = sqlx::query_as::<_, Order>(
            r#"
            SELECT order_id, buyer_id, total_price, order_status, payment_id, created_utc, delivered_utc
            FROM orders
            WHERE order_id = $1
            FOR UPDATE
            "#,
        )
        .bind(order_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(EngineError::OrderNotFound(order_id))?;

        let from = order.order_status;
        if !from.can_transition_to(new_status) {
            return Err(
                if from == OrderStatus::Delivered && new_status == OrderStatus::Cancelled {
                    EngineError::OrderAlreadyDelivered
                } else {
                    EngineError::InvalidTransition {
                        from,
                        to: new_status,
                    }
                },
            );
        }

        let updated = sqlx::query_as::<_, Order>(
            r#"
            UPDATE orders
            SET order_status = $3,
                delivered_utc = CASE WHEN $3 = 'delivered' THEN now() ELSE delivered_utc END
            WHERE order_id = $1 AND order_status = $2
            RETURNING order_id, buyer_id, total_price, order_status, payment_id, created_utc, delivered_utc
            "#,
        )
        .bind(order_id)
        .bind(from.as_str())
        .bind(new_status.as_str())
        .fetch_one(&mut *tx)
        .await?;

        let mut outbox = Outbox::new();

        match new_status {
            OrderStatus::Cancelled if from == OrderStatus::Shipped => {
                let refunded = self
                    .reverse_settlement(&mut tx, &updated, &mut outbox)
                    .await?;
                PAYMENTS_TOTAL.with_label_values(&["refunded"]).inc();
                info!(
                    order_id = %order_id,
                    payment_id = %refunded.payment_id,
                    "Shipped order cancelled and settlement reversed"
                );
            }
            OrderStatus::Cancelled => {
                outbox.push(
                    updated.buyer_id,
                    RecipientKind::Customer,
                    EventType::OrderCancelled,
                    serde_json::json!({ "order_id": order_id }),
                );
            }
            OrderStatus::Shipped => {
                outbox.push(
                    updated.buyer_id,
                    RecipientKind::Customer,
                    EventType::OrderShipped,
                    serde_json::json!({ "order_id": order_id }),
                );
            }
            OrderStatus::Delivered => {
                outbox.push(
                    updated.buyer_id,
                    RecipientKind::Customer,
                    EventType::OrderDelivered,
                    serde_json::json!({ "order_id": order_id }),
                );
            }
            OrderStatus::Processing => {}
        }

        tx.commit().await?;
        outbox.dispatch(self.dispatcher.as_ref()).await;

        info!(order_id = %order_id, from = %from, to = %new_status, "Order transitioned");

        Ok(updated)
    }

    /// Refund path for cancelling a shipped order: payment -> refunded,
    /// seller debited by net amount, platform debited by its fee. Runs inside
    /// the caller's transaction.
    async fn reverse_settlement(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        order: &Order,
        outbox: &mut Outbox,
    ) -> Result<Payment, EngineError> {
        let payment_id = order
            .payment_id
            .ok_or_else(|| EngineError::PaymentNotFound(format!("order {}", order.order_id)))?;

        let payment = sqlx::query_as::<_, Payment>(
            r#"
            UPDATE payments
            SET status = 'refunded', refunded_utc = now(), updated_utc = now()
            WHERE payment_id = $1 AND status = 'succeeded'
            RETURNING payment_id, transaction_id, order_id, customer_id, seller_id,
                      subtotal, tax, platform_fee, total, net_amount, currency,
                      status, failure_reason, refunded_utc, created_utc, updated_utc
            "#,
        )
        .bind(payment_id)
        .fetch_optional(&mut **tx)
        .await?;

        let payment = match payment {
            Some(payment) => payment,
            None => {
                let status: Option<PaymentStatus> =
                    sqlx::query_scalar("SELECT status FROM payments WHERE payment_id = $1")
                        .bind(payment_id)
                        .fetch_optional(&mut **tx)
                        .await?;
                return Err(match status {
                    Some(status) => EngineError::PaymentNotInState {
                        status,
                        expected: PaymentStatus::Succeeded,
                    },
                    None => EngineError::PaymentNotFound(payment_id.to_string()),
                });
            }
        };

        let correlation = Correlation::for_payment(order.order_id, payment.payment_id);
        let seller_account =
            ledger::seller_account(&mut **tx, payment.seller_id, &payment.currency).await?;
        let platform_account = ledger::platform_account(&mut **tx, &payment.currency).await?;

        ledger::debit(
            &mut **tx,
            seller_account.account_id,
            payment.net_amount,
            EntryReason::RefundReversal,
            correlation,
        )
        .await?;
        ledger::debit(
            &mut **tx,
            platform_account.account_id,
            payment.platform_fee,
            EntryReason::FeeReversal,
            correlation,
        )
        .await?;

        outbox.push(
            payment.customer_id,
            RecipientKind::Customer,
            EventType::RefundIssued,
            serde_json::json!({
                "order_id": order.order_id,
                "amount": payment.total,
                "currency": payment.currency,
            }),
        );
        outbox.push(
            payment.seller_id,
            RecipientKind::Seller,
            EventType::OrderCancelled,
            serde_json::json!({
                "order_id": order.order_id,
                "reversed_amount": payment.net_amount,
            }),
        );

        Ok(payment)
    }

    /// Get an order by id.
    pub async fn get(&self, order_id: Uuid) -> Result<Option<Order>, EngineError> {
        self.db.get_order(order_id).await
    }

    /// An order's line items in checkout order.
    pub async fn items(&self, order_id: Uuid) -> Result<Vec<LineItem>, EngineError> {
        self.db.get_order_items(order_id).await
    }

    /// A buyer's orders, most recent first.
    pub async fn list_by_buyer(&self, buyer_id: Uuid) -> Result<Vec<Order>, EngineError> {
        self.db.list_orders_by_buyer(buyer_id).await
    }

    /// Orders containing at least one item from the given seller.
    pub async fn list_by_seller(&self, seller_id: Uuid) -> Result<Vec<Order>, EngineError> {
        self.db.list_orders_by_seller(seller_id).await
    }
}
