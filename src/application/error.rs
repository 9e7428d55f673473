use thiserror::Error;

use crate::domain::{Cents, LedgerError};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Account already exists: {0}")]
    AccountAlreadyExists(String),

    #[error("Username must not be empty")]
    InvalidUsername,

    #[error("PIN must be exactly 4 digits")]
    InvalidPin,

    #[error("Invalid username or PIN")]
    AuthenticationFailed,

    #[error("PIN reset token is invalid, expired or already used")]
    InvalidResetToken,

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Insufficient funds for {username}: balance {balance}, required {required}")]
    InsufficientFunds {
        username: String,
        balance: Cents,
        required: Cents,
    },

    #[error("Recipient not found: {0}")]
    RecipientNotFound(String),

    #[error("Cannot transfer to your own account")]
    SelfTransfer,

    #[error("Balance for {0} changed during the operation, please retry")]
    ConcurrentUpdate(String),

    #[error("Database error: {0}")]
    Database(#[from] anyhow::Error),
}

impl AppError {
    /// Translate a balance-rule violation for the account it happened on.
    pub fn from_ledger(err: LedgerError, username: &str) -> Self {
        match err {
            LedgerError::InvalidAmount(_) => {
                AppError::InvalidAmount("Amount must be greater than zero".to_string())
            }
            LedgerError::InsufficientFunds { balance, requested } => AppError::InsufficientFunds {
                username: username.to_string(),
                balance,
                required: requested,
            },
            LedgerError::SelfTransfer => AppError::SelfTransfer,
            LedgerError::BalanceOverflow => {
                AppError::InvalidAmount("Resulting balance is out of range".to_string())
            }
        }
    }
}
