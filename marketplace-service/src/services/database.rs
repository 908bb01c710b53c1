//! Database service for marketplace-service.

use crate::error::EngineError;
use crate::models::{LedgerAccount, LineItem, Order, Payment, ReturnRequest};
use crate::services::metrics::DB_QUERY_DURATION;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "marketplace-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, EngineError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Wrap an existing pool (used by the test harness).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), EngineError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), EngineError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| EngineError::Database(sqlx::Error::Migrate(Box::new(e))))?;
        info!("Database migrations completed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Order reads
    // -------------------------------------------------------------------------

    /// Get an order by id.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>, EngineError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_order"])
            .start_timer();

        let order = sqlx::query_as::<_, Order>(
            r#"
            SELECT order_id, buyer_id, total_price, order_status, payment_id, created_utc, delivered_utc
            FROM orders
            WHERE order_id = $1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();

        Ok(order)
    }

    /// Get an order's line items in checkout order.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_order_items(&self, order_id: Uuid) -> Result<Vec<LineItem>, EngineError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_order_items"])
            .start_timer();

        let items = sqlx::query_as::<_, LineItem>(
            r#"
            SELECT item_id, order_id, position, product_id, seller_id, unit_price, quantity
            FROM order_items
            WHERE order_id = $1
            ORDER BY position
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        timer.observe_duration();

        Ok(items)
    }

    /// List a buyer's orders, most recent first.
    #[instrument(skip(self), fields(buyer_id = %buyer_id))]
    pub async fn list_orders_by_buyer(&self, buyer_id: Uuid) -> Result<Vec<Order>, EngineError> {
        let orders = sqlx::query_as::<_, Order>(
            r#"
            SELECT order_id, buyer_id, total_price, order_status, payment_id, created_utc, delivered_utc
            FROM orders
            WHERE buyer_id = $1
            ORDER BY created_utc DESC
            "#,
        )
        .bind(buyer_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(orders)
    }

    /// List orders containing at least one item from the given seller.
    #[instrument(skip(self), fields(seller_id = %seller_id))]
    pub async fn list_orders_by_seller(&self, seller_id: Uuid) -> Result<Vec<Order>, EngineError> {
        let orders = sqlx::query_as::<_, Order>(
            r#"
            SELECT DISTINCT o.order_id, o.buyer_id, o.total_price, o.order_status,
                   o.payment_id, o.created_utc, o.delivered_utc
            FROM orders o
            JOIN order_items i ON i.order_id = o.order_id
            WHERE i.seller_id = $1
            ORDER BY o.created_utc DESC
            "#,
        )
        .bind(seller_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(orders)
    }

    // -------------------------------------------------------------------------
    // Payment reads
    // -------------------------------------------------------------------------

    /// Get a payment by id.
    #[instrument(skip(self), fields(payment_id = %payment_id))]
    pub async fn get_payment(&self, payment_id: Uuid) -> Result<Option<Payment>, EngineError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_payment"])
            .start_timer();

        let payment = sqlx::query_as::<_, Payment>(
            r#"
            SELECT payment_id, transaction_id, order_id, customer_id, seller_id,
                   subtotal, tax, platform_fee, total, net_amount, currency,
                   status, failure_reason, refunded_utc, created_utc, updated_utc
            FROM payments
            WHERE payment_id = $1
            "#,
        )
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();

        Ok(payment)
    }

    /// Get a payment by the gateway transaction id.
    #[instrument(skip(self), fields(transaction_id = %transaction_id))]
    pub async fn get_payment_by_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Option<Payment>, EngineError> {
        let payment = sqlx::query_as::<_, Payment>(
            r#"
            SELECT payment_id, transaction_id, order_id, customer_id, seller_id,
                   subtotal, tax, platform_fee, total, net_amount, currency,
                   status, failure_reason, refunded_utc, created_utc, updated_utc
            FROM payments
            WHERE transaction_id = $1
            "#,
        )
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(payment)
    }

    /// Ordered history of every payment attempt attached to an order.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn list_payments_for_order(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<Payment>, EngineError> {
        let payments = sqlx::query_as::<_, Payment>(
            r#"
            SELECT payment_id, transaction_id, order_id, customer_id, seller_id,
                   subtotal, tax, platform_fee, total, net_amount, currency,
                   status, failure_reason, refunded_utc, created_utc, updated_utc
            FROM payments
            WHERE order_id = $1
            ORDER BY created_utc
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(payments)
    }

    /// List a seller's payments, most recent first.
    #[instrument(skip(self), fields(seller_id = %seller_id))]
    pub async fn list_payments_by_seller(
        &self,
        seller_id: Uuid,
    ) -> Result<Vec<Payment>, EngineError> {
        let payments = sqlx::query_as::<_, Payment>(
            r#"
            SELECT payment_id, transaction_id, order_id, customer_id, seller_id,
                   subtotal, tax, platform_fee, total, net_amount, currency,
                   status, failure_reason, refunded_utc, created_utc, updated_utc
            FROM payments
            WHERE seller_id = $1
            ORDER BY created_utc DESC
            "#,
        )
        .bind(seller_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(payments)
    }

    /// List every payment, most recent first (admin view).
    #[instrument(skip(self))]
    pub async fn list_payments(&self, limit: i64) -> Result<Vec<Payment>, EngineError> {
        let payments = sqlx::query_as::<_, Payment>(
            r#"
            SELECT payment_id, transaction_id, order_id, customer_id, seller_id,
                   subtotal, tax, platform_fee, total, net_amount, currency,
                   status, failure_reason, refunded_utc, created_utc, updated_utc
            FROM payments
            ORDER BY created_utc DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(payments)
    }

    // -------------------------------------------------------------------------
    // Return reads
    // -------------------------------------------------------------------------

    /// Get a return request by id.
    #[instrument(skip(self), fields(return_id = %return_id))]
    pub async fn get_return(&self, return_id: Uuid) -> Result<Option<ReturnRequest>, EngineError> {
        let request = sqlx::query_as::<_, ReturnRequest>(
            r#"
            SELECT return_id, order_id, customer_id, payment_id, kind, requested_amount,
                   reason, evidence, status, created_utc, updated_utc
            FROM return_requests
            WHERE return_id = $1
            "#,
        )
        .bind(return_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(request)
    }

    // -------------------------------------------------------------------------
    // Ledger reads
    // -------------------------------------------------------------------------

    /// Get a ledger account by id.
    #[instrument(skip(self), fields(account_id = %account_id))]
    pub async fn get_account(
        &self,
        account_id: Uuid,
    ) -> Result<Option<LedgerAccount>, EngineError> {
        let account = sqlx::query_as::<_, LedgerAccount>(
            r#"
            SELECT account_id, kind, owner_id, balance, currency, created_utc
            FROM ledger_accounts
            WHERE account_id = $1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }
}
