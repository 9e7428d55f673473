use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::domain::{
    Account, Cents, IntegrityReport, Pin, PinResetToken, Transaction, TransactionKind,
    apply_deposit, apply_withdrawal, build_integrity_report, format_money, generate_reference,
    hash_pin, new_pin_salt, normalize_username, plan_transfer, validate_amount,
};
use crate::storage::{DbTransaction, LedgerStats, Repository, is_busy, is_unique_violation};

use super::{AppError, LedgerConfig};

/// Accounts created by [`LedgerService::seed_demo_accounts`]: username, PIN, balance.
pub const DEMO_ACCOUNTS: &[(&str, &str, Cents)] = &[
    ("anna", "1234", 150000),
    ("bamby", "4321", 75000),
    ("guest", "1111", 10000),
    ("sample", "2222", 10000),
];

/// Application service providing the ledger operations.
/// This is the primary interface for any client (CLI, tests, a future web layer).
pub struct LedgerService {
    repo: Repository,
    config: LedgerConfig,
}

/// Result of a deposit or withdrawal.
#[derive(Debug, Clone)]
pub struct OperationReceipt {
    pub transaction: Transaction,
    pub previous_balance: Cents,
    pub new_balance: Cents,
    pub message: String,
}

impl OperationReceipt {
    pub fn reference(&self) -> &str {
        &self.transaction.reference
    }
}

/// Result of a transfer: one history row per side, sharing a reference.
#[derive(Debug, Clone)]
pub struct TransferReceipt {
    pub outgoing: Transaction,
    pub incoming: Transaction,
    pub sender: String,
    pub recipient: String,
    pub amount_cents: Cents,
    pub sender_previous_balance: Cents,
    pub sender_new_balance: Cents,
    pub message: String,
}

impl TransferReceipt {
    pub fn reference(&self) -> &str {
        &self.outgoing.reference
    }
}

/// Result of a balance inquiry.
#[derive(Debug, Clone)]
pub struct BalanceReceipt {
    pub transaction: Transaction,
    pub balance: Cents,
    pub message: String,
}

/// Ledger-wide counters plus the latest history rows.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    pub stats: LedgerStats,
    pub recent: Vec<Transaction>,
}

impl LedgerService {
    pub fn new(repo: Repository, config: LedgerConfig) -> Self {
        Self { repo, config }
    }

    /// Initialize (create if missing) a database at the given path.
    pub async fn init(database_path: &str, config: LedgerConfig) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}?mode=rwc", database_path);
        let repo = Repository::init(&db_url).await?;
        Ok(Self::new(repo, config))
    }

    /// Connect to an existing database.
    pub async fn connect(database_path: &str, config: LedgerConfig) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}", database_path);
        let repo = Repository::connect(&db_url).await?;
        Ok(Self::new(repo, config))
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    fn money(&self, cents: Cents) -> String {
        format_money(cents, &self.config.currency)
    }

    fn reference(&self, kind: TransactionKind, at: DateTime<Utc>) -> String {
        generate_reference(&self.config.reference_prefix, kind, at)
    }

    /// Lock contention on `username` becomes `ConcurrentUpdate`; anything else stays a database error.
    fn contended(err: anyhow::Error, username: &str) -> AppError {
        if is_busy(&err) {
            warn!(username = %username, "write lost to a concurrent update");
            AppError::ConcurrentUpdate(username.to_string())
        } else {
            AppError::Database(err)
        }
    }

    async fn begin_write(&self, username: &str) -> Result<DbTransaction, AppError> {
        self.repo
            .begin()
            .await
            .map_err(|e| Self::contended(e, username))
    }

    async fn commit_write(db_tx: DbTransaction, username: &str) -> Result<(), AppError> {
        db_tx
            .commit()
            .await
            .map_err(|e| Self::contended(e.into(), username))
    }

    // ========================
    // Accounts
    // ========================

    /// Register a new account. The e-mail address becomes the (lower-cased) username.
    pub async fn register(
        &self,
        full_name: Option<String>,
        email: &str,
        pin: &str,
    ) -> Result<Account, AppError> {
        let username = normalize_username(email);
        if username.is_empty() {
            return Err(AppError::InvalidUsername);
        }
        let pin = Pin::parse(pin).map_err(|_| {
            warn!(username = %username, "registration rejected: malformed PIN");
            AppError::InvalidPin
        })?;

        if self.config.opening_balance < 0 {
            return Err(AppError::InvalidAmount(
                "Opening balance must not be negative".to_string(),
            ));
        }

        if self.repo.get_account(&username).await?.is_some() {
            warn!(username = %username, "registration rejected: duplicate user");
            return Err(AppError::AccountAlreadyExists(username));
        }

        let mut account = {
            let mut rng = rand::thread_rng();
            Account::new(&username, &pin, self.config.opening_balance, &mut rng)
        };
        if let Some(name) = full_name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()) {
            account = account.with_full_name(name);
        }

        if let Err(err) = self.repo.save_account(&account).await {
            if is_unique_violation(&err) {
                warn!(username = %account.username, "registration rejected: duplicate user");
                return Err(AppError::AccountAlreadyExists(account.username));
            }
            return Err(err.into());
        }
        info!(username = %account.username, "account registered");
        Ok(account)
    }

    /// Log in with username and PIN. Unknown users and wrong PINs fail the same way.
    pub async fn authenticate(&self, username: &str, pin: &str) -> Result<Account, AppError> {
        let username = normalize_username(username);
        let account = match (Pin::parse(pin), self.repo.get_account(&username).await?) {
            (Ok(pin), Some(account)) if account.verify_pin(&pin) => account,
            _ => {
                warn!(username = %username, "authentication failed");
                return Err(AppError::AuthenticationFailed);
            }
        };
        debug!(username = %account.username, "authenticated");
        Ok(account)
    }

    pub async fn get_account(&self, username: &str) -> Result<Account, AppError> {
        let username = normalize_username(username);
        let account = self.repo.get_account(&username).await?;
        account.ok_or(AppError::AccountNotFound(username))
    }

    pub async fn list_accounts(&self) -> Result<Vec<Account>, AppError> {
        Ok(self.repo.list_accounts().await?)
    }

    /// Create the demo accounts that do not exist yet. Returns the ones created.
    pub async fn seed_demo_accounts(&self) -> Result<Vec<Account>, AppError> {
        let mut created = Vec::new();
        for &(username, pin, balance) in DEMO_ACCOUNTS {
            if self.repo.get_account(username).await?.is_some() {
                continue;
            }
            let pin = Pin::parse(pin).map_err(|_| AppError::InvalidPin)?;
            let account = {
                let mut rng = rand::thread_rng();
                Account::new(username, &pin, balance, &mut rng)
            };
            self.repo.save_account(&account).await?;
            created.push(account);
        }
        info!(count = created.len(), "demo accounts seeded");
        Ok(created)
    }

    // ========================
    // PIN reset
    // ========================

    /// Issue a single-use token for setting a new PIN. Delivering it to the
    /// account holder is up to the caller.
    pub async fn request_pin_reset(&self, username: &str) -> Result<PinResetToken, AppError> {
        let account = self.get_account(username).await?;
        let token = PinResetToken::issue(&account.username, Utc::now(), self.config.pin_reset_ttl);
        self.repo.save_reset_token(&token).await?;
        info!(username = %account.username, expires_at = %token.expires_at, "PIN reset token issued");
        Ok(token)
    }

    /// Set a new PIN with a valid token. The token is consumed only when the PIN is accepted.
    pub async fn reset_pin(&self, token: &str, new_pin: &str) -> Result<(), AppError> {
        let token = token.trim();
        let mut db_tx = self.repo.begin().await?;

        let reset = match Repository::get_reset_token(&mut db_tx, token).await? {
            Some(reset) if reset.is_valid_at(Utc::now()) => reset,
            _ => {
                warn!("PIN reset rejected: invalid token");
                return Err(AppError::InvalidResetToken);
            }
        };
        let pin = Pin::parse(new_pin).map_err(|_| {
            warn!(username = %reset.username, "PIN reset rejected: malformed PIN");
            AppError::InvalidPin
        })?;

        let pin_salt = new_pin_salt();
        let pin_hash = hash_pin(&pin_salt, &pin);
        if !Repository::update_pin(&mut db_tx, &reset.username, &pin_salt, &pin_hash).await? {
            return Err(AppError::AccountNotFound(reset.username));
        }
        if !Repository::consume_reset_token(&mut db_tx, token).await? {
            return Err(AppError::InvalidResetToken);
        }
        Self::commit_write(db_tx, &reset.username).await?;

        info!(username = %reset.username, "PIN reset");
        Ok(())
    }

    // ========================
    // Ledger operations
    // ========================

    /// Current balance of the account inside an open database transaction.
    async fn locked_balance(db_tx: &mut DbTransaction, username: &str) -> Result<Cents, AppError> {
        Repository::fetch_balance(db_tx, username)
            .await?
            .ok_or_else(|| AppError::AccountNotFound(username.to_string()))
    }

    /// Write a FAILED row for a rejected attempt, commit it, and hand back the rejection.
    async fn reject(&self, mut db_tx: DbTransaction, mut failed: Transaction, err: AppError) -> AppError {
        warn!(
            username = %failed.username,
            kind = failed.kind.as_str(),
            amount = failed.amount_cents,
            reference = %failed.reference,
            error = %err,
            "operation rejected"
        );
        if let Err(e) = Repository::insert_transaction(&mut db_tx, &mut failed).await {
            return AppError::Database(e);
        }
        if let Err(e) = db_tx.commit().await {
            return AppError::Database(e.into());
        }
        err
    }

    /// Deposit into an authenticated account.
    pub async fn deposit(&self, account: &Account, amount_cents: Cents) -> Result<OperationReceipt, AppError> {
        self.apply_single(account, TransactionKind::Deposit, amount_cents)
            .await
    }

    /// Withdraw from an authenticated account. The balance never goes negative.
    pub async fn withdraw(&self, account: &Account, amount_cents: Cents) -> Result<OperationReceipt, AppError> {
        self.apply_single(account, TransactionKind::Withdrawal, amount_cents)
            .await
    }

    async fn apply_single(
        &self,
        account: &Account,
        kind: TransactionKind,
        amount_cents: Cents,
    ) -> Result<OperationReceipt, AppError> {
        let username = account.username.as_str();
        let now = Utc::now();
        let reference = self.reference(kind, now);

        let mut db_tx = self.begin_write(username).await?;
        let balance = Self::locked_balance(&mut db_tx, username).await?;

        let outcome = match kind {
            TransactionKind::Withdrawal => apply_withdrawal(balance, amount_cents),
            _ => apply_deposit(balance, amount_cents),
        };
        let new_balance = match outcome {
            Ok(new_balance) => new_balance,
            Err(err) => {
                let failed =
                    Transaction::new(username, kind, amount_cents, balance, &reference, now).failed();
                return Err(self
                    .reject(db_tx, failed, AppError::from_ledger(err, username))
                    .await);
            }
        };

        let updated = Repository::update_balance(&mut db_tx, username, balance, new_balance)
            .await
            .map_err(|e| Self::contended(e, username))?;
        if !updated {
            return Err(AppError::ConcurrentUpdate(username.to_string()));
        }
        let mut transaction = Transaction::new(username, kind, amount_cents, new_balance, reference, now);
        Repository::insert_transaction(&mut db_tx, &mut transaction).await?;
        Self::commit_write(db_tx, username).await?;

        info!(
            username = %username,
            kind = kind.as_str(),
            amount = amount_cents,
            balance = new_balance,
            reference = %transaction.reference,
            "operation applied"
        );

        let message = format!(
            "{} successful. New balance: {}",
            kind.label(),
            self.money(new_balance)
        );
        Ok(OperationReceipt {
            transaction,
            previous_balance: balance,
            new_balance,
            message,
        })
    }

    /// Move money from an authenticated account to another user.
    ///
    /// Both balance updates and both history rows commit in one database
    /// transaction, so a transfer is never half applied. Rejections are checked
    /// in order: amount, recipient, self-transfer, funds.
    pub async fn transfer(
        &self,
        from: &Account,
        to_username: &str,
        amount_cents: Cents,
    ) -> Result<TransferReceipt, AppError> {
        let sender = from.username.as_str();
        let recipient = normalize_username(to_username);
        let now = Utc::now();
        let reference = self.reference(TransactionKind::TransferOut, now);

        let mut db_tx = self.begin_write(sender).await?;
        let sender_balance = Self::locked_balance(&mut db_tx, sender).await?;

        let failed_row = || {
            Transaction::new(
                sender,
                TransactionKind::TransferOut,
                amount_cents,
                sender_balance,
                &reference,
                now,
            )
            .with_counterparty(recipient.as_str())
            .failed()
        };

        if let Err(err) = validate_amount(amount_cents) {
            return Err(self
                .reject(db_tx, failed_row(), AppError::from_ledger(err, sender))
                .await);
        }

        let recipient_balance = match Repository::fetch_balance(&mut db_tx, &recipient).await? {
            Some(balance) => balance,
            None => {
                let err = AppError::RecipientNotFound(to_username.trim().to_string());
                return Err(self.reject(db_tx, failed_row(), err).await);
            }
        };

        let plan = match plan_transfer(sender, sender_balance, &recipient, recipient_balance, amount_cents) {
            Ok(plan) => plan,
            Err(err) => {
                return Err(self
                    .reject(db_tx, failed_row(), AppError::from_ledger(err, sender))
                    .await);
            }
        };

        let sender_updated =
            Repository::update_balance(&mut db_tx, sender, sender_balance, plan.sender_balance_after)
                .await
                .map_err(|e| Self::contended(e, sender))?;
        if !sender_updated {
            return Err(AppError::ConcurrentUpdate(sender.to_string()));
        }
        let recipient_updated = Repository::update_balance(
            &mut db_tx,
            &recipient,
            recipient_balance,
            plan.recipient_balance_after,
        )
        .await
        .map_err(|e| Self::contended(e, &recipient))?;
        if !recipient_updated {
            return Err(AppError::ConcurrentUpdate(recipient));
        }

        let mut outgoing = Transaction::new(
            sender,
            TransactionKind::TransferOut,
            plan.amount_cents,
            plan.sender_balance_after,
            &reference,
            now,
        )
        .with_counterparty(recipient.as_str());
        let mut incoming = Transaction::new(
            &recipient,
            TransactionKind::TransferIn,
            plan.amount_cents,
            plan.recipient_balance_after,
            &reference,
            now,
        )
        .with_counterparty(sender);

        Repository::insert_transaction(&mut db_tx, &mut outgoing).await?;
        Repository::insert_transaction(&mut db_tx, &mut incoming).await?;
        Self::commit_write(db_tx, sender).await?;

        info!(
            from = %sender,
            to = %recipient,
            amount = plan.amount_cents,
            reference = %reference,
            "transfer applied"
        );

        let message = format!(
            "Transfer of {} to {} successful. New balance: {}",
            self.money(plan.amount_cents),
            recipient,
            self.money(plan.sender_balance_after)
        );
        Ok(TransferReceipt {
            outgoing,
            incoming,
            sender: sender.to_string(),
            recipient,
            amount_cents: plan.amount_cents,
            sender_previous_balance: sender_balance,
            sender_new_balance: plan.sender_balance_after,
            message,
        })
    }

    /// Read the current balance and log the inquiry in the account's history.
    pub async fn check_balance(&self, account: &Account) -> Result<BalanceReceipt, AppError> {
        let username = account.username.as_str();
        let now = Utc::now();

        let mut db_tx = self.begin_write(username).await?;
        let balance = Self::locked_balance(&mut db_tx, username).await?;
        let mut transaction = Transaction::new(
            username,
            TransactionKind::BalanceInquiry,
            0,
            balance,
            self.reference(TransactionKind::BalanceInquiry, now),
            now,
        );
        Repository::insert_transaction(&mut db_tx, &mut transaction).await?;
        Self::commit_write(db_tx, username).await?;

        debug!(username = %username, balance, "balance checked");

        let message = format!(
            "Hello, {}! Your current balance is {}.",
            account.display_name(),
            self.money(balance)
        );
        Ok(BalanceReceipt {
            transaction,
            balance,
            message,
        })
    }

    // ========================
    // History
    // ========================

    /// Append a row to the history as-is. The owning account must exist and
    /// the amount must not be negative.
    pub async fn record_transaction(&self, transaction: &mut Transaction) -> Result<(), AppError> {
        if transaction.amount_cents < 0 {
            return Err(AppError::InvalidAmount(
                "Recorded amount must not be negative".to_string(),
            ));
        }
        transaction.username = normalize_username(&transaction.username);
        if self.repo.get_account(&transaction.username).await?.is_none() {
            return Err(AppError::AccountNotFound(transaction.username.clone()));
        }
        self.repo.record_transaction(transaction).await?;
        Ok(())
    }

    /// The most recent `limit` rows for a user, newest first.
    /// Unknown users simply have no history.
    pub async fn recent_transactions(&self, username: &str, limit: usize) -> Result<Vec<Transaction>, AppError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let username = normalize_username(username);
        Ok(self.repo.recent_transactions(&username, limit).await?)
    }

    /// Recent history using the configured default limit.
    pub async fn history(&self, username: &str) -> Result<Vec<Transaction>, AppError> {
        self.recent_transactions(username, self.config.history_limit)
            .await
    }

    /// Full history in sequence order, for one user or everyone.
    pub async fn list_transactions(&self, username: Option<&str>) -> Result<Vec<Transaction>, AppError> {
        let username = username.map(normalize_username);
        Ok(self.repo.list_transactions(username.as_deref()).await?)
    }

    /// All rows sharing a reference code, e.g. both sides of a transfer.
    pub async fn find_by_reference(&self, reference: &str) -> Result<Vec<Transaction>, AppError> {
        Ok(self.repo.transactions_by_reference(reference.trim()).await?)
    }

    // ========================
    // Maintenance
    // ========================

    pub async fn diagnostics(&self, recent_limit: usize) -> Result<Diagnostics, AppError> {
        let stats = self.repo.get_stats().await?;
        let recent = self.repo.latest_transactions(recent_limit).await?;
        debug!(accounts = stats.account_count, "diagnostics viewed");
        Ok(Diagnostics { stats, recent })
    }

    /// Replay every account's history and cross-check transfers.
    pub async fn check_integrity(&self) -> Result<IntegrityReport, AppError> {
        let accounts = self.repo.list_accounts().await?;
        let transactions = self.repo.list_transactions(None).await?;
        let report = build_integrity_report(&accounts, &transactions);
        if !report.is_ok() {
            warn!(issues = report.issues.len(), "ledger integrity issues found");
        }
        Ok(report)
    }
}
