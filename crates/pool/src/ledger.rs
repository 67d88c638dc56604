//! Pool ledger - balance, transaction log, idempotent event application

use crate::error::PoolError;
use cbi_core::Amount;
use cbi_ledger::{EventKey, EventKind, LoanId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{Row, SqlitePool};
use std::path::Path;
use strum_macros::{Display, EnumString};

/// Pool transaction type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum PoolTxType {
    Deposit,
    Loan,
    Repayment,
}

/// One row of the append-only transaction log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolTransaction {
    pub id: i64,
    pub tx_type: PoolTxType,
    pub amount: Decimal,
    pub loan_id: Option<LoanId>,
    pub created_at: DateTime<Utc>,
}

/// Result of applying a lifecycle event to the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolApply {
    /// Balance moved and transaction logged.
    Applied,
    /// Event already applied earlier; nothing changed.
    Duplicate,
}

/// The pool's balance and transaction ledger.
///
/// All balance mutations run inside a single SQLite transaction, which
/// serializes concurrent debit/credit attempts and makes the idempotency
/// mark atomic with the balance change.
pub struct PoolLedger {
    pool: SqlitePool,
}

impl PoolLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (or create) the pool database at the given path.
    pub async fn connect(db_path: impl AsRef<Path>) -> Result<Self, PoolError> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());
        let pool = SqlitePool::connect(&db_url).await?;
        let ledger = Self::new(pool);
        ledger.init().await?;
        Ok(ledger)
    }

    /// Initialize the schema and seed the singleton balance row.
    pub async fn init(&self) -> Result<(), PoolError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pool (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                balance TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tx_type TEXT NOT NULL,
                amount TEXT NOT NULL,
                loan_id INTEGER,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS applied_events (
                loan_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                applied_at TEXT NOT NULL,
                PRIMARY KEY (loan_id, kind)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("INSERT OR IGNORE INTO pool (id, balance) VALUES (1, '0')")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Credit a deposit to the pool. Fails on non-positive amounts.
    pub async fn deposit(&self, amount: Decimal) -> Result<(), PoolError> {
        if amount <= Decimal::ZERO {
            return Err(PoolError::InvalidAmount(amount));
        }

        let mut tx = self.pool.begin().await?;
        let balance = Self::balance_in(&mut tx).await?;
        let new_balance = balance + amount;

        Self::write_balance(&mut tx, new_balance).await?;
        Self::log_transaction(&mut tx, PoolTxType::Deposit, amount, None).await?;
        tx.commit().await?;

        tracing::info!(%amount, %new_balance, "deposit credited to pool");
        Ok(())
    }

    /// Debit the pool for an issued loan. Exactly once per loan id.
    ///
    /// On insufficient balance the debit is skipped WITHOUT marking the
    /// event applied, so a redelivery after fresh deposits can still land.
    pub async fn on_loan_issued(
        &self,
        loan_id: LoanId,
        amount: Amount,
    ) -> Result<PoolApply, PoolError> {
        let mut tx = self.pool.begin().await?;

        if !Self::mark_applied(&mut tx, loan_id, EventKind::Requested).await? {
            return Ok(PoolApply::Duplicate);
        }

        let balance = Self::balance_in(&mut tx).await?;
        if balance < amount.value() {
            // Transaction dropped here, rolling back the idempotency mark.
            return Err(PoolError::InsufficientBalance {
                available: balance,
                required: amount.value(),
            });
        }

        let new_balance = balance - amount.value();
        Self::write_balance(&mut tx, new_balance).await?;
        Self::log_transaction(&mut tx, PoolTxType::Loan, amount.value(), Some(loan_id)).await?;
        tx.commit().await?;

        tracing::info!(loan_id, %amount, %new_balance, "pool debited for loan");
        Ok(PoolApply::Applied)
    }

    /// Credit the pool for a repayment. Exactly once per loan id.
    pub async fn on_repayment_received(
        &self,
        loan_id: LoanId,
        amount: Amount,
    ) -> Result<PoolApply, PoolError> {
        let mut tx = self.pool.begin().await?;

        if !Self::mark_applied(&mut tx, loan_id, EventKind::Repaid).await? {
            return Ok(PoolApply::Duplicate);
        }

        let balance = Self::balance_in(&mut tx).await?;
        let new_balance = balance + amount.value();

        Self::write_balance(&mut tx, new_balance).await?;
        Self::log_transaction(&mut tx, PoolTxType::Repayment, amount.value(), Some(loan_id))
            .await?;
        tx.commit().await?;

        tracing::info!(loan_id, %amount, %new_balance, "pool credited by repayment");
        Ok(PoolApply::Applied)
    }

    /// Current pool balance.
    pub async fn balance(&self) -> Result<Decimal, PoolError> {
        let row = sqlx::query("SELECT balance FROM pool WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        parse_decimal(row.get("balance"))
    }

    /// Recent transactions, newest first.
    pub async fn transactions(&self, limit: u32) -> Result<Vec<PoolTransaction>, PoolError> {
        let rows = sqlx::query(
            r#"
            SELECT id, tx_type, amount, loan_id, created_at
            FROM transactions
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut transactions = Vec::with_capacity(rows.len());
        for row in rows {
            let tx_type: String = row.get("tx_type");
            let tx_type = tx_type
                .parse::<PoolTxType>()
                .map_err(|_| PoolError::Corrupt(format!("tx_type {tx_type:?}")))?;
            let created_at: String = row.get("created_at");
            let created_at = created_at
                .parse::<DateTime<Utc>>()
                .map_err(|_| PoolError::Corrupt(format!("created_at {created_at:?}")))?;

            transactions.push(PoolTransaction {
                id: row.get("id"),
                tx_type,
                amount: parse_decimal(row.get("amount"))?,
                loan_id: row.get::<Option<i64>, _>("loan_id").map(|id| id as LoanId),
                created_at,
            });
        }

        Ok(transactions)
    }

    /// Whether an event key was already applied to the pool.
    pub async fn is_applied(&self, key: &EventKey) -> Result<bool, PoolError> {
        let row = sqlx::query("SELECT 1 FROM applied_events WHERE loan_id = ? AND kind = ?")
            .bind(key.loan_id as i64)
            .bind(key.kind.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    // Returns false when the (loan_id, kind) key was already present.
    async fn mark_applied(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        loan_id: LoanId,
        kind: EventKind,
    ) -> Result<bool, PoolError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO applied_events (loan_id, kind, applied_at) VALUES (?, ?, ?)",
        )
        .bind(loan_id as i64)
        .bind(kind.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn balance_in(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    ) -> Result<Decimal, PoolError> {
        let row = sqlx::query("SELECT balance FROM pool WHERE id = 1")
            .fetch_one(&mut **tx)
            .await?;
        parse_decimal(row.get("balance"))
    }

    async fn write_balance(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        balance: Decimal,
    ) -> Result<(), PoolError> {
        sqlx::query("UPDATE pool SET balance = ? WHERE id = 1")
            .bind(balance.to_string())
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn log_transaction(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        tx_type: PoolTxType,
        amount: Decimal,
        loan_id: Option<LoanId>,
    ) -> Result<(), PoolError> {
        sqlx::query(
            "INSERT INTO transactions (tx_type, amount, loan_id, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(tx_type.to_string())
        .bind(amount.to_string())
        .bind(loan_id.map(|id| id as i64))
        .bind(Utc::now().to_rfc3339())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

fn parse_decimal(value: String) -> Result<Decimal, PoolError> {
    value
        .parse::<Decimal>()
        .map_err(|_| PoolError::Corrupt(format!("decimal {value:?}")))
}
