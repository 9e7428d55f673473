use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::domain::{
    Account, Card, CardBrand, Cents, PinResetToken, Transaction, TransactionKind,
    TransactionStatus,
};

use super::{DbTransaction, MIGRATION_001_INITIAL};

const ACCOUNT_COLUMNS: &str = "id, username, full_name, pin_salt, pin_hash, account_number, card_brand, card_number_masked, card_valid_thru, card_cvv, balance_cents, opening_balance_cents, created_at";

const TRANSACTION_COLUMNS: &str = "id, sequence, username, kind, amount_cents, balance_after_cents, status, reference, description, counterparty, timestamp";

/// Aggregate counters over the whole ledger.
#[derive(Debug, Clone, Copy)]
pub struct LedgerStats {
    pub account_count: i64,
    pub total_balance: Cents,
    pub transaction_count: i64,
    pub failed_count: i64,
}

/// Repository for persisting accounts and their transaction history.
///
/// Reads go through the pool. Writes that must land together take a
/// connection from [`Repository::begin`] and use the associated functions
/// that accept a `&mut SqliteConnection`.
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Run database migrations. Safe to run more than once.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        Ok(())
    }

    /// Initialize a database (connect + migrate).
    pub async fn init(database_url: &str) -> Result<Self> {
        let repo = Self::connect(database_url).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    /// Start a write transaction. Dropping it without commit rolls back.
    ///
    /// `BEGIN IMMEDIATE` takes the write lock up front; other writers wait on
    /// the busy timeout.
    pub async fn begin(&self) -> Result<DbTransaction> {
        self.pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .context("Failed to begin database transaction")
    }

    // ========================
    // Accounts
    // ========================

    pub async fn save_account(&self, account: &Account) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO accounts ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            ACCOUNT_COLUMNS
        ))
        .bind(account.id.to_string())
        .bind(&account.username)
        .bind(&account.full_name)
        .bind(&account.pin_salt)
        .bind(&account.pin_hash)
        .bind(&account.account_number)
        .bind(account.card.brand.as_str())
        .bind(&account.card.number_masked)
        .bind(&account.card.valid_thru)
        .bind(&account.card.cvv)
        .bind(account.balance_cents)
        .bind(account.opening_balance_cents)
        .bind(account.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to save account")?;
        Ok(())
    }

    /// Look up an account by its (already normalized) username.
    pub async fn get_account(&self, username: &str) -> Result<Option<Account>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM accounts WHERE username = ?",
            ACCOUNT_COLUMNS
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch account")?;

        row.as_ref().map(Self::row_to_account).transpose()
    }

    pub async fn list_accounts(&self) -> Result<Vec<Account>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM accounts ORDER BY username",
            ACCOUNT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list accounts")?;

        rows.iter().map(Self::row_to_account).collect()
    }

    /// Current balance, read on the given connection.
    pub async fn fetch_balance(conn: &mut SqliteConnection, username: &str) -> Result<Option<Cents>> {
        let row = sqlx::query("SELECT balance_cents FROM accounts WHERE username = ?")
            .bind(username)
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to fetch balance")?;

        Ok(row.map(|r| r.get("balance_cents")))
    }

    /// Compare-and-set a balance. Returns false if the stored balance is no longer
    /// `expected`, in which case nothing is written.
    pub async fn update_balance(
        conn: &mut SqliteConnection,
        username: &str,
        expected: Cents,
        new_balance: Cents,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE accounts SET balance_cents = ? WHERE username = ? AND balance_cents = ?",
        )
        .bind(new_balance)
        .bind(username)
        .bind(expected)
        .execute(&mut *conn)
        .await
        .context("Failed to update balance")?;

        Ok(result.rows_affected() == 1)
    }

    /// Replace an account's PIN salt and hash. Returns false if the account is gone.
    pub async fn update_pin(
        conn: &mut SqliteConnection,
        username: &str,
        pin_salt: &str,
        pin_hash: &str,
    ) -> Result<bool> {
        let result = sqlx::query("UPDATE accounts SET pin_salt = ?, pin_hash = ? WHERE username = ?")
            .bind(pin_salt)
            .bind(pin_hash)
            .bind(username)
            .execute(&mut *conn)
            .await
            .context("Failed to update PIN")?;

        Ok(result.rows_affected() == 1)
    }

    // ========================
    // PIN reset tokens
    // ========================

    pub async fn save_reset_token(&self, token: &PinResetToken) -> Result<()> {
        sqlx::query(
            "INSERT INTO pin_reset_tokens (token, username, created_at, expires_at, used) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&token.token)
        .bind(&token.username)
        .bind(token.created_at.to_rfc3339())
        .bind(token.expires_at.to_rfc3339())
        .bind(token.used)
        .execute(&self.pool)
        .await
        .context("Failed to save PIN reset token")?;
        Ok(())
    }

    pub async fn get_reset_token(conn: &mut SqliteConnection, token: &str) -> Result<Option<PinResetToken>> {
        let row = sqlx::query(
            "SELECT token, username, created_at, expires_at, used FROM pin_reset_tokens WHERE token = ?",
        )
        .bind(token)
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to fetch PIN reset token")?;

        row.as_ref().map(Self::row_to_reset_token).transpose()
    }

    /// Mark a token used. Returns false if it was already used.
    pub async fn consume_reset_token(conn: &mut SqliteConnection, token: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE pin_reset_tokens SET used = 1 WHERE token = ? AND used = 0")
            .bind(token)
            .execute(&mut *conn)
            .await
            .context("Failed to mark PIN reset token used")?;

        Ok(result.rows_affected() == 1)
    }

    fn row_to_reset_token(row: &SqliteRow) -> Result<PinResetToken> {
        let created_at_str: String = row.get("created_at");
        let expires_at_str: String = row.get("expires_at");

        Ok(PinResetToken {
            token: row.get("token"),
            username: row.get("username"),
            created_at: DateTime::parse_from_rfc3339(&created_at_str)
                .context("Invalid token created_at")?
                .with_timezone(&Utc),
            expires_at: DateTime::parse_from_rfc3339(&expires_at_str)
                .context("Invalid token expires_at")?
                .with_timezone(&Utc),
            used: row.get("used"),
        })
    }

    fn row_to_account(row: &SqliteRow) -> Result<Account> {
        let id_str: String = row.get("id");
        let brand_str: String = row.get("card_brand");
        let created_at_str: String = row.get("created_at");

        Ok(Account {
            id: Uuid::parse_str(&id_str).context("Invalid account ID")?,
            username: row.get("username"),
            full_name: row.get("full_name"),
            pin_salt: row.get("pin_salt"),
            pin_hash: row.get("pin_hash"),
            account_number: row.get("account_number"),
            card: Card {
                brand: CardBrand::from_str(&brand_str)
                    .ok_or_else(|| anyhow::anyhow!("Invalid card brand: {}", brand_str))?,
                number_masked: row.get("card_number_masked"),
                valid_thru: row.get("card_valid_thru"),
                cvv: row.get("card_cvv"),
            },
            balance_cents: row.get("balance_cents"),
            opening_balance_cents: row.get("opening_balance_cents"),
            created_at: DateTime::parse_from_rfc3339(&created_at_str)
                .context("Invalid created_at timestamp")?
                .with_timezone(&Utc),
        })
    }

    // ========================
    // Transactions
    // ========================

    /// Append a transaction row on the given connection.
    /// Assigns the next sequence number to `tx`.
    pub async fn insert_transaction(conn: &mut SqliteConnection, tx: &mut Transaction) -> Result<()> {
        tx.sequence = Self::next_sequence(conn).await?;

        sqlx::query(&format!(
            "INSERT INTO transactions ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            TRANSACTION_COLUMNS
        ))
        .bind(tx.id.to_string())
        .bind(tx.sequence)
        .bind(&tx.username)
        .bind(tx.kind.as_str())
        .bind(tx.amount_cents)
        .bind(tx.balance_after_cents)
        .bind(tx.status.as_str())
        .bind(&tx.reference)
        .bind(&tx.description)
        .bind(&tx.counterparty)
        .bind(tx.timestamp.to_rfc3339())
        .execute(&mut *conn)
        .await
        .context("Failed to save transaction")?;

        Ok(())
    }

    /// Append a single transaction row in its own database transaction.
    pub async fn record_transaction(&self, tx: &mut Transaction) -> Result<()> {
        let mut db_tx = self.begin().await?;
        Self::insert_transaction(&mut *db_tx, tx).await?;
        db_tx.commit().await.context("Failed to commit transaction row")?;
        Ok(())
    }

    async fn next_sequence(conn: &mut SqliteConnection) -> Result<i64> {
        let row = sqlx::query(
            r#"
            UPDATE sequence_counter
            SET value = value + 1
            WHERE name = 'transaction_sequence'
            RETURNING value
            "#,
        )
        .fetch_one(&mut *conn)
        .await
        .context("Failed to get next sequence number")?;

        Ok(row.get("value"))
    }

    /// Most recent rows for an account, newest first.
    pub async fn recent_transactions(&self, username: &str, limit: usize) -> Result<Vec<Transaction>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(&format!(
            "SELECT {} FROM transactions WHERE username = ? ORDER BY sequence DESC LIMIT ?",
            TRANSACTION_COLUMNS
        ))
        .bind(username)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list recent transactions")?;

        rows.iter().map(Self::row_to_transaction).collect()
    }

    /// Most recent rows across all accounts, newest first.
    pub async fn latest_transactions(&self, limit: usize) -> Result<Vec<Transaction>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(&format!(
            "SELECT {} FROM transactions ORDER BY sequence DESC LIMIT ?",
            TRANSACTION_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list latest transactions")?;

        rows.iter().map(Self::row_to_transaction).collect()
    }

    /// Full history, oldest first. Optionally restricted to one account.
    pub async fn list_transactions(&self, username: Option<&str>) -> Result<Vec<Transaction>> {
        let rows = match username {
            Some(username) => {
                sqlx::query(&format!(
                    "SELECT {} FROM transactions WHERE username = ? ORDER BY sequence",
                    TRANSACTION_COLUMNS
                ))
                .bind(username)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM transactions ORDER BY sequence",
                    TRANSACTION_COLUMNS
                ))
                .fetch_all(&self.pool)
                .await
            }
        }
        .context("Failed to list transactions")?;

        rows.iter().map(Self::row_to_transaction).collect()
    }

    /// Both rows of a transfer (or any rows sharing a reference), oldest first.
    pub async fn transactions_by_reference(&self, reference: &str) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM transactions WHERE reference = ? ORDER BY sequence",
            TRANSACTION_COLUMNS
        ))
        .bind(reference)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch transactions by reference")?;

        rows.iter().map(Self::row_to_transaction).collect()
    }

    pub async fn get_stats(&self) -> Result<LedgerStats> {
        let accounts = sqlx::query(
            "SELECT COUNT(*) as count, COALESCE(SUM(balance_cents), 0) as total FROM accounts",
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to count accounts")?;

        let transactions = sqlx::query(
            r#"
            SELECT
                COUNT(*) as count,
                COALESCE(SUM(CASE WHEN status = 'FAILED' THEN 1 ELSE 0 END), 0) as failed
            FROM transactions
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to count transactions")?;

        Ok(LedgerStats {
            account_count: accounts.get("count"),
            total_balance: accounts.get("total"),
            transaction_count: transactions.get("count"),
            failed_count: transactions.get("failed"),
        })
    }

    fn row_to_transaction(row: &SqliteRow) -> Result<Transaction> {
        let id_str: String = row.get("id");
        let kind_str: String = row.get("kind");
        let status_str: String = row.get("status");
        let timestamp_str: String = row.get("timestamp");

        Ok(Transaction {
            id: Uuid::parse_str(&id_str).context("Invalid transaction ID")?,
            sequence: row.get("sequence"),
            username: row.get("username"),
            kind: TransactionKind::from_str(&kind_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid transaction kind: {}", kind_str))?,
            amount_cents: row.get("amount_cents"),
            balance_after_cents: row.get("balance_after_cents"),
            status: TransactionStatus::from_str(&status_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid transaction status: {}", status_str))?,
            reference: row.get("reference"),
            description: row.get("description"),
            counterparty: row.get("counterparty"),
            timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                .context("Invalid timestamp")?
                .with_timezone(&Utc),
        })
    }
}
