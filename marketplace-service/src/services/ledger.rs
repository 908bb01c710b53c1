//! Ledger primitives: atomic credit/debit composable inside a caller's
//! transaction.
//!
//! Every function takes a `&mut PgConnection` so the balance mutation commits
//! or rolls back together with whatever order/payment/return writes the
//! caller has in flight. The balance guard and the write are a single UPDATE,
//! so the row lock serializes concurrent mutations per account and a debit
//! can never observe a stale balance.

use crate::error::EngineError;
use crate::models::{AccountKind, Correlation, Direction, EntryReason, LedgerAccount, LedgerEntry};
use rust_decimal::Decimal;
use sqlx::PgConnection;
use tracing::instrument;
use uuid::Uuid;

/// Credit an account. Returns the balance after the credit.
#[instrument(skip(conn), fields(account_id = %account_id, amount = %amount))]
pub async fn credit(
    conn: &mut PgConnection,
    account_id: Uuid,
    amount: Decimal,
    reason: EntryReason,
    correlation: Correlation,
) -> Result<Decimal, EngineError> {
    if amount <= Decimal::ZERO {
        return Err(EngineError::InvalidAmount { amount });
    }

    let balance: Option<Decimal> = sqlx::query_scalar(
        r#"
        UPDATE ledger_accounts
        SET balance = balance + $2
        WHERE account_id = $1
        RETURNING balance
        "#,
    )
    .bind(account_id)
    .bind(amount)
    .fetch_optional(&mut *conn)
    .await?;

    let balance = balance.ok_or(EngineError::AccountNotFound(account_id))?;

    append_entry(conn, account_id, amount, Direction::Credit, reason, correlation).await?;

    Ok(balance)
}

/// Debit an account, failing with `InsufficientFunds` if the debit would
/// drive the balance below zero. Returns the balance after the debit.
#[instrument(skip(conn), fields(account_id = %account_id, amount = %amount))]
pub async fn debit(
    conn: &mut PgConnection,
    account_id: Uuid,
    amount: Decimal,
    reason: EntryReason,
    correlation: Correlation,
) -> Result<Decimal, EngineError> {
    if amount <= Decimal::ZERO {
        return Err(EngineError::InvalidAmount { amount });
    }

    // Guard and write in one statement: the row lock taken by the UPDATE
    // serializes concurrent mutations of this account.
    let balance: Option<Decimal> = sqlx::query_scalar(
        r#"
        UPDATE ledger_accounts
        SET balance = balance - $2
        WHERE account_id = $1 AND balance >= $2
        RETURNING balance
        "#,
    )
    .bind(account_id)
    .bind(amount)
    .fetch_optional(&mut *conn)
    .await?;

    let balance = match balance {
        Some(b) => b,
        None => {
            let current: Option<Decimal> =
                sqlx::query_scalar("SELECT balance FROM ledger_accounts WHERE account_id = $1")
                    .bind(account_id)
                    .fetch_optional(&mut *conn)
                    .await?;
            return match current {
                Some(current) => Err(EngineError::InsufficientFunds {
                    balance: current,
                    requested: amount,
                }),
                None => Err(EngineError::AccountNotFound(account_id)),
            };
        }
    };

    append_entry(conn, account_id, amount, Direction::Debit, reason, correlation).await?;

    Ok(balance)
}

/// Get or create the ledger account for a seller.
#[instrument(skip(conn), fields(seller_id = %seller_id))]
pub async fn seller_account(
    conn: &mut PgConnection,
    seller_id: Uuid,
    currency: &str,
) -> Result<LedgerAccount, EngineError> {
    sqlx::query(
        r#"
        INSERT INTO ledger_accounts (account_id, kind, owner_id, currency)
        VALUES ($1, 'seller', $2, $3)
        ON CONFLICT (kind, owner_id) WHERE owner_id IS NOT NULL DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(seller_id)
    .bind(currency)
    .execute(&mut *conn)
    .await?;

    let account = sqlx::query_as::<_, LedgerAccount>(
        r#"
        SELECT account_id, kind, owner_id, balance, currency, created_utc
        FROM ledger_accounts
        WHERE kind = 'seller' AND owner_id = $1
        "#,
    )
    .bind(seller_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(account)
}

/// Get or create the platform singleton account, resolved by kind.
#[instrument(skip(conn))]
pub async fn platform_account(
    conn: &mut PgConnection,
    currency: &str,
) -> Result<LedgerAccount, EngineError> {
    sqlx::query(
        r#"
        INSERT INTO ledger_accounts (account_id, kind, owner_id, currency)
        VALUES ($1, 'platform', NULL, $2)
        ON CONFLICT (kind) WHERE kind = 'platform' DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(currency)
    .execute(&mut *conn)
    .await?;

    let account = sqlx::query_as::<_, LedgerAccount>(
        r#"
        SELECT account_id, kind, owner_id, balance, currency, created_utc
        FROM ledger_accounts
        WHERE kind = 'platform'
        "#,
    )
    .fetch_one(&mut *conn)
    .await?;

    Ok(account)
}

/// Current stored balance.
pub async fn balance(conn: &mut PgConnection, account_id: Uuid) -> Result<Decimal, EngineError> {
    let balance: Option<Decimal> =
        sqlx::query_scalar("SELECT balance FROM ledger_accounts WHERE account_id = $1")
            .bind(account_id)
            .fetch_optional(&mut *conn)
            .await?;

    balance.ok_or(EngineError::AccountNotFound(account_id))
}

/// Reconstruct a balance from the audit trail alone. Must always agree with
/// the stored balance; the reconciliation tests assert exactly that.
#[instrument(skip(conn), fields(account_id = %account_id))]
pub async fn replay_balance(
    conn: &mut PgConnection,
    account_id: Uuid,
) -> Result<Decimal, EngineError> {
    let replayed: Option<Decimal> = sqlx::query_scalar(
        r#"
        SELECT COALESCE(
            SUM(CASE WHEN direction = 'credit' THEN amount ELSE -amount END),
            0
        )
        FROM ledger_entries
        WHERE account_id = $1
        "#,
    )
    .bind(account_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(replayed.unwrap_or(Decimal::ZERO))
}

/// Audit entries for an account in posting order.
pub async fn entries(
    conn: &mut PgConnection,
    account_id: Uuid,
) -> Result<Vec<LedgerEntry>, EngineError> {
    let entries = sqlx::query_as::<_, LedgerEntry>(
        r#"
        SELECT entry_id, account_id, amount, direction, reason,
               order_id, payment_id, return_id, posted_utc
        FROM ledger_entries
        WHERE account_id = $1
        ORDER BY posted_utc, entry_id
        "#,
    )
    .bind(account_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(entries)
}

async fn append_entry(
    conn: &mut PgConnection,
    account_id: Uuid,
    amount: Decimal,
    direction: Direction,
    reason: EntryReason,
    correlation: Correlation,
) -> Result<(), EngineError> {
    sqlx::query(
        r#"
        INSERT INTO ledger_entries
            (entry_id, account_id, amount, direction, reason, order_id, payment_id, return_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(account_id)
    .bind(amount)
    .bind(direction.as_str())
    .bind(reason.as_str())
    .bind(correlation.order_id)
    .bind(correlation.payment_id)
    .bind(correlation.return_id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}
