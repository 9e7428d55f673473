use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Cents;

pub type TransactionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
    /// Outgoing side of a transfer (sender's row)
    TransferOut,
    /// Incoming side of a transfer (recipient's row)
    TransferIn,
    BalanceInquiry,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "deposit",
            TransactionKind::Withdrawal => "withdrawal",
            TransactionKind::TransferOut => "transfer_out",
            TransactionKind::TransferIn => "transfer_in",
            TransactionKind::BalanceInquiry => "balance_inquiry",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "deposit" => Some(TransactionKind::Deposit),
            "withdrawal" => Some(TransactionKind::Withdrawal),
            "transfer_out" => Some(TransactionKind::TransferOut),
            "transfer_in" => Some(TransactionKind::TransferIn),
            "balance_inquiry" => Some(TransactionKind::BalanceInquiry),
            _ => None,
        }
    }

    /// Short code used in reference strings.
    pub fn reference_code(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "DEP",
            TransactionKind::Withdrawal => "WDL",
            TransactionKind::TransferOut | TransactionKind::TransferIn => "TRF",
            TransactionKind::BalanceInquiry => "BAL",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "Deposit",
            TransactionKind::Withdrawal => "Withdrawal",
            TransactionKind::TransferOut => "Transfer out",
            TransactionKind::TransferIn => "Transfer in",
            TransactionKind::BalanceInquiry => "Balance inquiry",
        }
    }

    /// Signed effect of an applied transaction of this kind on the owner's balance.
    /// `None` if the amount cannot be negated.
    pub fn balance_effect(&self, amount_cents: Cents) -> Option<Cents> {
        match self {
            TransactionKind::Deposit | TransactionKind::TransferIn => Some(amount_cents),
            TransactionKind::Withdrawal | TransactionKind::TransferOut => amount_cents.checked_neg(),
            TransactionKind::BalanceInquiry => Some(0),
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionStatus {
    Ok,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Ok => "OK",
            TransactionStatus::Failed => "FAILED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "OK" => Some(TransactionStatus::Ok),
            "FAILED" => Some(TransactionStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Build a reference code such as "BB-DEP-1718000000000".
/// The trailing part is the timestamp in milliseconds since the Unix epoch.
pub fn generate_reference(prefix: &str, kind: TransactionKind, at: DateTime<Utc>) -> String {
    format!("{}-{}-{}", prefix, kind.reference_code(), at.timestamp_millis())
}

/// One immutable row in an account's history.
/// Rows are only ever appended; a failed attempt is recorded with the balance unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    /// Monotonically increasing; assigned by the repository
    pub sequence: i64,
    /// Owning account
    pub username: String,
    pub kind: TransactionKind,
    /// Amount as requested (positive for applied rows)
    pub amount_cents: Cents,
    /// Owner's balance once this row was applied (or left unchanged, if failed)
    pub balance_after_cents: Cents,
    pub status: TransactionStatus,
    pub reference: String,
    pub description: String,
    /// Other side of a transfer
    pub counterparty: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Transaction {
    /// Create a new transaction row. Sequence number must be assigned by the repository.
    pub fn new(
        username: impl Into<String>,
        kind: TransactionKind,
        amount_cents: Cents,
        balance_after_cents: Cents,
        reference: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence: 0,
            username: username.into(),
            kind,
            amount_cents,
            balance_after_cents,
            status: TransactionStatus::Ok,
            reference: reference.into(),
            description: kind.label().to_string(),
            counterparty: None,
            timestamp,
        }
    }

    /// Set the other party of a transfer and derive the matching description.
    pub fn with_counterparty(mut self, counterparty: impl Into<String>) -> Self {
        let counterparty = counterparty.into();
        self.description = match self.kind {
            TransactionKind::TransferOut => format!("Transfer to {}", counterparty),
            TransactionKind::TransferIn => format!("Transfer from {}", counterparty),
            _ => self.description,
        };
        self.counterparty = Some(counterparty);
        self
    }

    pub fn failed(mut self) -> Self {
        self.status = TransactionStatus::Failed;
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == TransactionStatus::Ok
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_reference_format() {
        let at = Utc.timestamp_millis_opt(1_718_000_000_123).unwrap();
        assert_eq!(
            generate_reference("BB", TransactionKind::Deposit, at),
            "BB-DEP-1718000000123"
        );
        assert_eq!(
            generate_reference("BB", TransactionKind::Withdrawal, at),
            "BB-WDL-1718000000123"
        );
        assert_eq!(
            generate_reference("XB", TransactionKind::TransferIn, at),
            "XB-TRF-1718000000123"
        );
        assert_eq!(
            generate_reference("BB", TransactionKind::BalanceInquiry, at),
            "BB-BAL-1718000000123"
        );
    }

    #[test]
    fn test_kind_roundtrip() {
        for kind in [
            TransactionKind::Deposit,
            TransactionKind::Withdrawal,
            TransactionKind::TransferOut,
            TransactionKind::TransferIn,
            TransactionKind::BalanceInquiry,
        ] {
            assert_eq!(TransactionKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(TransactionKind::from_str("refund"), None);
    }

    #[test]
    fn test_balance_effect() {
        assert_eq!(TransactionKind::Deposit.balance_effect(500), Some(500));
        assert_eq!(TransactionKind::TransferIn.balance_effect(500), Some(500));
        assert_eq!(TransactionKind::Withdrawal.balance_effect(500), Some(-500));
        assert_eq!(TransactionKind::TransferOut.balance_effect(500), Some(-500));
        assert_eq!(TransactionKind::BalanceInquiry.balance_effect(500), Some(0));
        assert_eq!(TransactionKind::Withdrawal.balance_effect(Cents::MIN), None);
    }

    #[test]
    fn test_transfer_descriptions() {
        let now = Utc::now();
        let out = Transaction::new("anna", TransactionKind::TransferOut, 20000, 120000, "BB-TRF-1", now)
            .with_counterparty("bamby");
        let incoming = Transaction::new("bamby", TransactionKind::TransferIn, 20000, 95000, "BB-TRF-1", now)
            .with_counterparty("anna");

        assert_eq!(out.description, "Transfer to bamby");
        assert_eq!(incoming.description, "Transfer from anna");
        assert_eq!(out.counterparty.as_deref(), Some("bamby"));
    }

    #[test]
    fn test_failed_status() {
        let tx = Transaction::new("anna", TransactionKind::Withdrawal, 160000, 150000, "BB-WDL-1", Utc::now())
            .failed();
        assert!(!tx.is_ok());
        assert_eq!(tx.status.as_str(), "FAILED");
        assert_eq!(TransactionStatus::from_str("FAILED"), Some(TransactionStatus::Failed));
    }
}
