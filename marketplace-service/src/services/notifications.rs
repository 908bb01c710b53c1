//! Notification dispatch boundary.
//!
//! Delivery (email, in-app) is an external collaborator. The engines queue
//! notifications into an `Outbox` while their transaction is open and the
//! outbox is drained only after the commit, so a delivery failure can never
//! roll back financial state: it is logged and left to out-of-band retry.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

/// Notification audience.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecipientKind {
    Customer,
    Seller,
    Admin,
}

impl RecipientKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Seller => "seller",
            Self::Admin => "admin",
        }
    }
}

/// Event catalog for the transaction engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    OrderPlaced,
    PaymentSucceeded,
    PaymentFailed,
    SellerCredited,
    CommissionCollected,
    OrderShipped,
    OrderDelivered,
    OrderCancelled,
    RefundIssued,
    ReturnRequested,
    ReturnApproved,
    ReturnRejected,
    ReturnEscalated,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OrderPlaced => "order_placed",
            Self::PaymentSucceeded => "payment_succeeded",
            Self::PaymentFailed => "payment_failed",
            Self::SellerCredited => "seller_credited",
            Self::CommissionCollected => "commission_collected",
            Self::OrderShipped => "order_shipped",
            Self::OrderDelivered => "order_delivered",
            Self::OrderCancelled => "order_cancelled",
            Self::RefundIssued => "refund_issued",
            Self::ReturnRequested => "return_requested",
            Self::ReturnApproved => "return_approved",
            Self::ReturnRejected => "return_rejected",
            Self::ReturnEscalated => "return_escalated",
        }
    }
}

/// One queued notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub recipient_id: Uuid,
    pub recipient_kind: RecipientKind,
    pub event_type: EventType,
    pub payload: serde_json::Value,
}

/// Best-effort delivery capability.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn notify(&self, notification: Notification) -> anyhow::Result<()>;
}

/// Post-commit notification queue.
///
/// `push` while the transaction is open; `dispatch` strictly after commit.
#[derive(Debug, Default)]
pub struct Outbox {
    queued: Vec<Notification>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &mut self,
        recipient_id: Uuid,
        recipient_kind: RecipientKind,
        event_type: EventType,
        payload: serde_json::Value,
    ) {
        self.queued.push(Notification {
            recipient_id,
            recipient_kind,
            event_type,
            payload,
        });
    }

    pub fn len(&self) -> usize {
        self.queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    /// Drain the queue through the dispatcher. Failures are logged, never
    /// surfaced: the owning transaction has already committed.
    pub async fn dispatch(self, dispatcher: &dyn NotificationDispatcher) {
        for notification in self.queued {
            let event = notification.event_type;
            let recipient = notification.recipient_id;
            if let Err(e) = dispatcher.notify(notification).await {
                warn!(
                    event = event.as_str(),
                    recipient = %recipient,
                    error = %e,
                    "Notification delivery failed; left to out-of-band retry"
                );
            }
        }
    }
}

/// Default dispatcher: structured log lines only. Real delivery lives in a
/// separate notification service.
#[derive(Debug, Clone, Default)]
pub struct LoggingDispatcher;

#[async_trait]
impl NotificationDispatcher for LoggingDispatcher {
    async fn notify(&self, notification: Notification) -> anyhow::Result<()> {
        info!(
            recipient = %notification.recipient_id,
            recipient_kind = notification.recipient_kind.as_str(),
            event = notification.event_type.as_str(),
            payload = %notification.payload,
            "notification"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingDispatcher {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl NotificationDispatcher for FailingDispatcher {
        async fn notify(&self, _notification: Notification) -> anyhow::Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("smtp down")
        }
    }

    #[tokio::test]
    async fn dispatch_swallows_delivery_failures() {
        let mut outbox = Outbox::new();
        outbox.push(
            Uuid::new_v4(),
            RecipientKind::Customer,
            EventType::PaymentSucceeded,
            serde_json::json!({ "total": "144.00" }),
        );
        outbox.push(
            Uuid::new_v4(),
            RecipientKind::Seller,
            EventType::SellerCredited,
            serde_json::json!({ "net_amount": "96.00" }),
        );

        let dispatcher = FailingDispatcher {
            attempts: AtomicUsize::new(0),
        };
        // Every queued notification is attempted and no error escapes.
        outbox.dispatch(&dispatcher).await;
        assert_eq!(dispatcher.attempts.load(Ordering::SeqCst), 2);
    }
}
