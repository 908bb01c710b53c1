//! Return/refund engine.
//!
//! A return is requested by the buyer against a delivered, settled order and
//! decided by the seller. Approval debits the seller's ledger account in the
//! same transaction as the status flip, so "approved but not debited" (or the
//! reverse) cannot exist. The seller-balance check is the load-bearing
//! invariant: money that was withdrawn or never settled cannot be refunded.

use crate::error::EngineError;
use crate::models::{
    Correlation, EntryReason, NewReturnRequest, OrderStatus, Payment, PaymentStatus,
    ReturnDecision, ReturnRequest, ReturnStatus,
};
use crate::services::database::Database;
use crate::services::ledger;
use crate::services::metrics::{PAYMENTS_TOTAL, RETURNS_TOTAL};
use crate::services::notifications::{EventType, NotificationDispatcher, Outbox, RecipientKind};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

const SUPPORT_CONTACT: &str = "support@marketplace.example";

/// Return/refund engine.
#[derive(Clone)]
pub struct ReturnEngine {
    db: Database,
    dispatcher: Arc<dyn NotificationDispatcher>,
}

impl ReturnEngine {
    pub fn new(db: Database, dispatcher: Arc<dyn NotificationDispatcher>) -> Self {
        Self { db, dispatcher }
    }

    /// File a return request against a delivered order.
    #[instrument(skip(self, input), fields(order_id = %input.order_id, kind = %input.kind))]
    pub async fn request(&self, input: NewReturnRequest) -> Result<ReturnRequest, EngineError> {
        let order = self
            .db
            .get_order(input.order_id)
            .await?
            .ok_or(EngineError::OrderNotFound(input.order_id))?;

        if order.buyer_id != input.customer_id {
            return Err(EngineError::Unauthorized);
        }
        if order.order_status != OrderStatus::Delivered {
            return Err(EngineError::NotDelivered {
                status: order.order_status,
            });
        }

        let payment_id = order
            .payment_id
            .ok_or_else(|| EngineError::PaymentNotFound(format!("order {}", order.order_id)))?;
        let payment = self
            .db
            .get_payment(payment_id)
            .await?
            .ok_or_else(|| EngineError::PaymentNotFound(payment_id.to_string()))?;

        if payment.status != PaymentStatus::Succeeded {
            return Err(EngineError::PaymentNotInState {
                status: payment.status,
                expected: PaymentStatus::Succeeded,
            });
        }

        if input.kind.requires_amount() {
            let amount = input.requested_amount.ok_or(EngineError::MissingAmount {
                kind: input.kind,
            })?;
            if amount <= Decimal::ZERO {
                return Err(EngineError::InvalidAmount { amount });
            }
            if amount > payment.total {
                return Err(EngineError::AmountExceedsPayment {
                    requested: amount,
                    paid: payment.total,
                });
            }
        }

        let request = sqlx::query_as::<_, ReturnRequest>(
            r#"
            INSERT INTO return_requests
                (return_id, order_id, customer_id, payment_id, kind, requested_amount,
                 reason, evidence, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending')
            RETURNING return_id, order_id, customer_id, payment_id, kind, requested_amount,
                      reason, evidence, status, created_utc, updated_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.order_id)
        .bind(input.customer_id)
        .bind(payment.payment_id)
        .bind(input.kind.as_str())
        .bind(input.requested_amount)
        .bind(&input.reason)
        .bind(serde_json::json!(input.evidence))
        .fetch_one(self.db.pool())
        .await?;

        let mut outbox = Outbox::new();
        outbox.push(
            payment.seller_id,
            RecipientKind::Seller,
            EventType::ReturnRequested,
            serde_json::json!({
                "return_id": request.return_id,
                "order_id": request.order_id,
                "kind": request.kind,
                "reason": request.reason,
                "requested_amount": request.requested_amount,
            }),
        );
        outbox.dispatch(self.dispatcher.as_ref()).await;

        RETURNS_TOTAL.with_label_values(&["requested"]).inc();
        info!(return_id = %request.return_id, kind = %request.kind, "Return requested");

        Ok(request)
    }

    /// Approve or reject a pending return. Only the seller on the referenced
    /// order may decide. Approval debits the seller's balance and marks the
    /// payment refunded in the same transaction as the status flip.
    #[instrument(skip(self), fields(return_id = %return_id, seller_id = %acting_seller_id))]
    pub async fn process(
        &self,
        return_id: Uuid,
        acting_seller_id: Uuid,
        decision: ReturnDecision,
    ) -> Result<ReturnRequest, EngineError> {
        let mut tx = self.db.pool().begin().await?;

        let (request, payment) = self.lock_pending(&mut tx, return_id, acting_seller_id).await?;

        let mut outbox = Outbox::new();

        let updated = match decision {
            ReturnDecision::Approve => {
                if request.kind.requires_amount() {
                    // Validated at request time; absence here is structural.
                    let amount =
                        request
                            .requested_amount
                            .ok_or(EngineError::MissingAmount {
                                kind: request.kind,
                            })?;

                    let correlation = Correlation::for_return(
                        request.order_id,
                        payment.payment_id,
                        request.return_id,
                    );
                    let seller_account =
                        ledger::seller_account(&mut *tx, payment.seller_id, &payment.currency)
                            .await?;
                    ledger::debit(
                        &mut *tx,
                        seller_account.account_id,
                        amount,
                        EntryReason::ReturnRefund,
                        correlation,
                    )
                    .await?;

                    sqlx::query(
                        r#"
                        UPDATE payments
                        SET status = 'refunded', refunded_utc = now(), updated_utc = now()
                        WHERE payment_id = $1 AND status = 'succeeded'
                        "#,
                    )
                    .bind(payment.payment_id)
                    .execute(&mut *tx)
                    .await?;
                }

                let updated = self
                    .set_status(&mut tx, return_id, ReturnStatus::Approved)
                    .await?;

                outbox.push(
                    updated.customer_id,
                    RecipientKind::Customer,
                    EventType::ReturnApproved,
                    serde_json::json!({
                        "return_id": updated.return_id,
                        "refunded_amount": updated.requested_amount,
                        "date": chrono::Utc::now(),
                    }),
                );

                updated
            }
            ReturnDecision::Reject => {
                let updated = self
                    .set_status(&mut tx, return_id, ReturnStatus::Rejected)
                    .await?;

                outbox.push(
                    updated.customer_id,
                    RecipientKind::Customer,
                    EventType::ReturnRejected,
                    serde_json::json!({
                        "return_id": updated.return_id,
                        "reason": updated.reason,
                        "support_contact": SUPPORT_CONTACT,
                    }),
                );

                updated
            }
        };

        tx.commit().await?;
        outbox.dispatch(self.dispatcher.as_ref()).await;

        let outcome = match decision {
            ReturnDecision::Approve => "approved",
            ReturnDecision::Reject => "rejected",
        };
        RETURNS_TOTAL.with_label_values(&[outcome]).inc();
        if decision == ReturnDecision::Approve && updated.kind.requires_amount() {
            PAYMENTS_TOTAL.with_label_values(&["refunded"]).inc();
        }
        info!(return_id = %return_id, outcome = outcome, "Return processed");

        Ok(updated)
    }

    /// Escalate a pending return to admin review. No transition out of
    /// admin_review is modeled; it parks the request for a product-level
    /// decision.
    #[instrument(skip(self), fields(return_id = %return_id, seller_id = %acting_seller_id))]
    pub async fn escalate(
        &self,
        return_id: Uuid,
        acting_seller_id: Uuid,
    ) -> Result<ReturnRequest, EngineError> {
        let mut tx = self.db.pool().begin().await?;

        let (_, payment) = self.lock_pending(&mut tx, return_id, acting_seller_id).await?;
        let platform_account = ledger::platform_account(&mut *tx, &payment.currency).await?;

        let updated = self
            .set_status(&mut tx, return_id, ReturnStatus::AdminReview)
            .await?;

        tx.commit().await?;

        let mut outbox = Outbox::new();
        outbox.push(
            platform_account.account_id,
            RecipientKind::Admin,
            EventType::ReturnEscalated,
            serde_json::json!({
                "return_id": updated.return_id,
                "order_id": updated.order_id,
                "requested_amount": updated.requested_amount,
            }),
        );
        outbox.dispatch(self.dispatcher.as_ref()).await;

        RETURNS_TOTAL.with_label_values(&["escalated"]).inc();
        info!(return_id = %return_id, "Return escalated to admin review");

        Ok(updated)
    }

    /// Get a return request by id.
    pub async fn get(&self, return_id: Uuid) -> Result<Option<ReturnRequest>, EngineError> {
        self.db.get_return(return_id).await
    }

    /// Lock the return row, authorize the acting seller against the payment's
    /// seller, and require pending status.
    async fn lock_pending(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        return_id: Uuid,
        acting_seller_id: Uuid,
    ) -> Result<(ReturnRequest, Payment), EngineError> {
        let request = sqlx::query_as::<_, ReturnRequest>(
            r#"
            SELECT return_id, order_id, customer_id, payment_id, kind, requested_amount,
                   reason, evidence, status, created_utc, updated_utc
            FROM return_requests
            WHERE return_id = $1
            FOR UPDATE
            "#,
        )
        .bind(return_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(EngineError::ReturnNotFound(return_id))?;

        let payment = sqlx::query_as::<_, Payment>(
            r#"
            SELECT payment_id, transaction_id, order_id, customer_id, seller_id,
                   subtotal, tax, platform_fee, total, net_amount, currency,
                   status, failure_reason, refunded_utc, created_utc, updated_utc
            FROM payments
            WHERE payment_id = $1
            "#,
        )
        .bind(request.payment_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| EngineError::PaymentNotFound(request.payment_id.to_string()))?;

        if payment.seller_id != acting_seller_id {
            return Err(EngineError::Unauthorized);
        }
        if request.status != ReturnStatus::Pending {
            return Err(EngineError::AlreadyProcessed {
                status: request.status,
            });
        }

        Ok((request, payment))
    }

    async fn set_status(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        return_id: Uuid,
        status: ReturnStatus,
    ) -> Result<ReturnRequest, EngineError> {
        let updated = sqlx::query_as::<_, ReturnRequest>(
            r#"
            UPDATE return_requests
            SET status = $2, updated_utc = now()
            WHERE return_id = $1 AND status = 'pending'
            RETURNING return_id, order_id, customer_id, payment_id, kind, requested_amount,
                      reason, evidence, status, created_utc, updated_utc
            "#,
        )
        .bind(return_id)
        .bind(status.as_str())
        .fetch_one(&mut **tx)
        .await?;

        Ok(updated)
    }
}
