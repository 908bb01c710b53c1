//! Payment engine: intent initiation, asynchronous confirmation, settlement.
//!
//! Money only moves on confirmed success. `initiate` talks to the gateway
//! and persists a pending payment without touching any ledger account; the
//! settlement credits happen inside `confirm_success`, in the same
//! transaction as the payment and order status flips.

use crate::config::FeePolicy;
use crate::error::EngineError;
use crate::models::{
    Breakdown, Correlation, EntryReason, Order, OrderStatus, Payment, PaymentStatus,
};
use crate::services::database::Database;
use crate::services::gateway::{to_minor_units, CreateIntent, PaymentGateway};
use crate::services::ledger;
use crate::services::metrics::PAYMENTS_TOTAL;
use crate::services::notifications::{EventType, NotificationDispatcher, Outbox, RecipientKind};
use rust_decimal::{Decimal, RoundingStrategy};
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

/// Result of a successful `initiate`.
#[derive(Debug, Clone)]
pub struct InitiatedPayment {
    pub payment: Payment,
    /// Gateway client secret, handed to the buyer's client.
    pub client_secret: String,
}

/// Compute the fee breakdown for a subtotal under the given policy.
///
/// tax = subtotal x tax_rate; platform_fee = (subtotal + tax) x fee_rate;
/// total = subtotal + tax + platform_fee. Components are rounded to cents
/// half-up before summing, so the figures always add up exactly.
pub fn compute_breakdown(subtotal: Decimal, fees: &FeePolicy) -> Breakdown {
    let round = |d: Decimal| d.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);

    let tax = round(subtotal * fees.tax_rate);
    let platform_fee = round((subtotal + tax) * fees.fee_rate);
    let total = subtotal + tax + platform_fee;

    Breakdown {
        subtotal,
        tax,
        platform_fee,
        total,
    }
}

/// Payment engine.
#[derive(Clone)]
pub struct PaymentEngine {
    db: Database,
    gateway: Arc<dyn PaymentGateway>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    fees: FeePolicy,
}

impl PaymentEngine {
    pub fn new(
        db: Database,
        gateway: Arc<dyn PaymentGateway>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        fees: FeePolicy,
    ) -> Self {
        Self {
            db,
            gateway,
            dispatcher,
            fees,
        }
    }

    /// Initiate payment for an order.
    ///
    /// Recomputes the breakdown from the line-item snapshot (a client-supplied
    /// breakdown is never trusted), creates the gateway intent, and persists a
    /// pending payment attached to the order. No ledger account is touched,
    /// and the gateway call happens outside any database transaction.
    #[instrument(skip(self), fields(order_id = %order_id, customer_id = %customer_id))]
    pub async fn initiate(
        &self,
        order_id: Uuid,
        customer_id: Uuid,
    ) -> Result<InitiatedPayment, EngineError> {
        let order = self
            .db
            .get_order(order_id)
            .await?
            .ok_or(EngineError::OrderNotFound(order_id))?;

        if order.order_status != OrderStatus::Processing {
            return Err(EngineError::OrderNotPayable {
                status: order.order_status,
            });
        }

        if order.total_price < self.fees.minimum_charge {
            return Err(EngineError::AmountTooLow {
                total: order.total_price,
                minimum: self.fees.minimum_charge,
            });
        }

        let items = self.db.get_order_items(order_id).await?;
        if items.is_empty() {
            return Err(EngineError::EmptyCart);
        }

        // One payment per order means one seller per order, for now.
        let seller_id = items[0].seller_id;
        if items.iter().any(|item| item.seller_id != seller_id) {
            return Err(EngineError::MultipleSellers);
        }

        let subtotal: Decimal = items.iter().map(|item| item.line_total()).sum();

        if subtotal != order.total_price {
            // Structural drift between the stored total and the snapshot it
            // was derived from. Never auto-corrected.
            error!(
                order_id = %order_id,
                order_total = %order.total_price,
                computed = %subtotal,
                "Amount mismatch between order total and recomputed line-item sum"
            );
            return Err(EngineError::AmountMismatch {
                order_total: order.total_price,
                computed: subtotal,
            });
        }

        let breakdown = compute_breakdown(subtotal, &self.fees);

        let intent = self
            .gateway
            .create_intent(CreateIntent {
                amount_minor: to_minor_units(breakdown.total)?,
                currency: self.fees.currency.clone(),
                metadata: serde_json::json!({
                    "order_id": order_id.to_string(),
                    "customer_id": customer_id.to_string(),
                    "platform_fee": breakdown.platform_fee.to_string(),
                }),
            })
            .await?;

        let payment_id = Uuid::new_v4();
        let mut tx = self.db.pool().begin().await?;

        let payment = sqlx::query_as::<_, Payment>(
            r#"
            INSERT INTO payments
                (payment_id, transaction_id, order_id, customer_id, seller_id,
                 subtotal, tax, platform_fee, total, net_amount, currency, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 'pending')
            RETURNING payment_id, transaction_id, order_id, customer_id, seller_id,
                      subtotal, tax, platform_fee, total, net_amount, currency,
                      status, failure_reason, refunded_utc, created_utc, updated_utc
            "#,
        )
        .bind(payment_id)
        .bind(&intent.intent_id)
        .bind(order_id)
        .bind(customer_id)
        .bind(seller_id)
        .bind(breakdown.subtotal)
        .bind(breakdown.tax)
        .bind(breakdown.platform_fee)
        .bind(breakdown.total)
        .bind(breakdown.net_amount())
        .bind(&self.fees.currency)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE orders SET payment_id = $2 WHERE order_id = $1")
            .bind(order_id)
            .bind(payment_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        PAYMENTS_TOTAL.with_label_values(&["initiated"]).inc();
        info!(
            payment_id = %payment.payment_id,
            transaction_id = %payment.transaction_id,
            total = %payment.total,
            "Payment initiated"
        );

        Ok(InitiatedPayment {
            payment,
            client_secret: intent.client_secret,
        })
    }

    /// Confirm a successful charge reported by the gateway. Idempotent: a
    /// second callback for an already-succeeded payment is a no-op.
    ///
    /// Payment status, order status, and both ledger credits are one atomic
    /// unit; if any piece fails the payment stays pending.
    #[instrument(skip(self), fields(transaction_id = %transaction_id))]
    pub async fn confirm_success(&self, transaction_id: &str) -> Result<Payment, EngineError> {
        let mut tx = self.db.pool().begin().await?;

        // The status predicate is the idempotency and ordering guard: only
        // one caller can move pending -> succeeded.
        let claimed = sqlx::query_as::<_, Payment>(
            r#"
            UPDATE payments
            SET status = 'succeeded', updated_utc = now()
            WHERE transaction_id = $1 AND status = 'pending'
            RETURNING payment_id, transaction_id, order_id, customer_id, seller_id,
                      subtotal, tax, platform_fee, total, net_amount, currency,
                      status, failure_reason, refunded_utc, created_utc, updated_utc
            "#,
        )
        .bind(transaction_id)
        .fetch_optional(&mut *tx)
        .await?;

        let payment = match claimed {
            Some(payment) => payment,
            None => {
                tx.rollback().await.ok();
                let existing = self
                    .db
                    .get_payment_by_transaction(transaction_id)
                    .await?
                    .ok_or_else(|| EngineError::PaymentNotFound(transaction_id.to_string()))?;
                return match existing.status {
                    PaymentStatus::Succeeded => Ok(existing),
                    status => Err(EngineError::PaymentNotInState {
                        status,
                        expected: PaymentStatus::Pending,
                    }),
                };
            }
        };

        // Order moves Processing -> Shipped in the same unit of work.
        let shipped: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE orders
            SET order_status = 'shipped'
            WHERE order_id = $1 AND order_status = 'processing'
            RETURNING order_id
            "#,
        )
        .bind(payment.order_id)
        .fetch_optional(&mut *tx)
        .await?;

        if shipped.is_none() {
            let status: Option<OrderStatus> =
                sqlx::query_scalar("SELECT order_status FROM orders WHERE order_id = $1")
                    .bind(payment.order_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            return Err(match status {
                Some(from) => EngineError::InvalidTransition {
                    from,
                    to: OrderStatus::Shipped,
                },
                None => EngineError::OrderNotFound(payment.order_id),
            });
        }

        let correlation = Correlation::for_payment(payment.order_id, payment.payment_id);
        let seller_account =
            ledger::seller_account(&mut *tx, payment.seller_id, &payment.currency).await?;
        let platform_account = ledger::platform_account(&mut *tx, &payment.currency).await?;

        ledger::credit(
            &mut *tx,
            seller_account.account_id,
            payment.net_amount,
            EntryReason::Settlement,
            correlation,
        )
        .await?;
        ledger::credit(
            &mut *tx,
            platform_account.account_id,
            payment.platform_fee,
            EntryReason::Commission,
            correlation,
        )
        .await?;

        tx.commit().await?;

        let mut outbox = Outbox::new();
        outbox.push(
            payment.customer_id,
            RecipientKind::Customer,
            EventType::PaymentSucceeded,
            serde_json::json!({
                "order_id": payment.order_id,
                "total": payment.total,
                "currency": payment.currency,
            }),
        );
        outbox.push(
            payment.seller_id,
            RecipientKind::Seller,
            EventType::SellerCredited,
            serde_json::json!({
                "order_id": payment.order_id,
                "net_amount": payment.net_amount,
            }),
        );
        outbox.push(
            platform_account.account_id,
            RecipientKind::Admin,
            EventType::CommissionCollected,
            serde_json::json!({
                "order_id": payment.order_id,
                "platform_fee": payment.platform_fee,
            }),
        );
        outbox.dispatch(self.dispatcher.as_ref()).await;

        PAYMENTS_TOTAL.with_label_values(&["succeeded"]).inc();
        info!(
            payment_id = %payment.payment_id,
            net_amount = %payment.net_amount,
            platform_fee = %payment.platform_fee,
            "Payment settled"
        );

        Ok(payment)
    }

    /// Record a failed charge. The order stays in Processing so the buyer can
    /// retry checkout; no ledger account is touched.
    #[instrument(skip(self), fields(transaction_id = %transaction_id))]
    pub async fn confirm_failure(
        &self,
        transaction_id: &str,
        reason: &str,
    ) -> Result<Payment, EngineError> {
        let failed = sqlx::query_as::<_, Payment>(
            r#"
            UPDATE payments
            SET status = 'failed', failure_reason = $2, updated_utc = now()
            WHERE transaction_id = $1 AND status = 'pending'
            RETURNING payment_id, transaction_id, order_id, customer_id, seller_id,
                      subtotal, tax, platform_fee, total, net_amount, currency,
                      status, failure_reason, refunded_utc, created_utc, updated_utc
            "#,
        )
        .bind(transaction_id)
        .bind(reason)
        .fetch_optional(self.db.pool())
        .await?;

        let payment = match failed {
            Some(payment) => payment,
            None => {
                let existing = self
                    .db
                    .get_payment_by_transaction(transaction_id)
                    .await?
                    .ok_or_else(|| EngineError::PaymentNotFound(transaction_id.to_string()))?;
                return match existing.status {
                    PaymentStatus::Failed => Ok(existing),
                    status => Err(EngineError::PaymentNotInState {
                        status,
                        expected: PaymentStatus::Pending,
                    }),
                };
            }
        };

        let mut outbox = Outbox::new();
        outbox.push(
            payment.customer_id,
            RecipientKind::Customer,
            EventType::PaymentFailed,
            serde_json::json!({
                "order_id": payment.order_id,
                "reason": reason,
            }),
        );
        outbox.dispatch(self.dispatcher.as_ref()).await;

        PAYMENTS_TOTAL.with_label_values(&["failed"]).inc();
        info!(
            payment_id = %payment.payment_id,
            reason = reason,
            "Payment failed"
        );

        Ok(payment)
    }

    /// Get a payment by id.
    pub async fn get(&self, payment_id: Uuid) -> Result<Option<Payment>, EngineError> {
        self.db.get_payment(payment_id).await
    }

    /// Ordered history of every payment attempt for an order.
    pub async fn history_for_order(&self, order_id: Uuid) -> Result<Vec<Payment>, EngineError> {
        self.db.list_payments_for_order(order_id).await
    }

    /// A seller's payments, most recent first.
    pub async fn list_by_seller(&self, seller_id: Uuid) -> Result<Vec<Payment>, EngineError> {
        self.db.list_payments_by_seller(seller_id).await
    }

    /// Every payment, most recent first (admin view).
    pub async fn list_all(&self, limit: i64) -> Result<Vec<Payment>, EngineError> {
        self.db.list_payments(limit).await
    }

    /// The order a payment belongs to.
    pub async fn order_for(&self, payment: &Payment) -> Result<Option<Order>, EngineError> {
        self.db.get_order(payment.order_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn policy() -> FeePolicy {
        FeePolicy::default()
    }

    #[test]
    fn breakdown_matches_the_worked_example() {
        // subtotal 100.00 at 20% tax and 20% fee.
        let b = compute_breakdown(dec("100.00"), &policy());
        assert_eq!(b.subtotal, dec("100.00"));
        assert_eq!(b.tax, dec("20.00"));
        assert_eq!(b.platform_fee, dec("24.00"));
        assert_eq!(b.total, dec("144.00"));
        assert_eq!(b.net_amount(), dec("96.00"));
    }

    #[test]
    fn breakdown_components_always_sum_to_total() {
        for subtotal in ["0.01", "9.99", "10.00", "33.33", "1234.56", "99999.99"] {
            let b = compute_breakdown(dec(subtotal), &policy());
            assert_eq!(b.subtotal + b.tax + b.platform_fee, b.total, "{}", subtotal);
            // net = subtotal + tax - fee, so net + 2*fee = total identically.
            assert_eq!(
                b.net_amount() + b.platform_fee + b.platform_fee,
                b.total,
                "{}",
                subtotal
            );
        }
    }

    #[test]
    fn settlement_credits_total_less_one_fee() {
        // The ledger credits net to the seller and one fee to the platform:
        // together subtotal + tax, i.e. the captured total less the fee the
        // buyer paid on top.
        let b = compute_breakdown(dec("100.00"), &policy());
        assert_eq!(b.net_amount() + b.platform_fee, b.subtotal + b.tax);
        assert_eq!(b.net_amount() + b.platform_fee, b.total - b.platform_fee);
    }

    #[test]
    fn breakdown_rounds_half_up_to_cents() {
        // subtotal 33.33: tax = 6.666 -> 6.67; fee = (33.33+6.67)*0.2 = 8.00
        let b = compute_breakdown(dec("33.33"), &policy());
        assert_eq!(b.tax, dec("6.67"));
        assert_eq!(b.platform_fee, dec("8.00"));
        assert_eq!(b.total, dec("48.00"));
    }
}
