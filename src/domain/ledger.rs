use std::collections::{BTreeMap, HashMap};

use super::{Account, Cents, Transaction, TransactionKind};

/// Rule violations raised while applying an operation to balances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Amount was zero or negative
    InvalidAmount(Cents),
    InsufficientFunds { balance: Cents, requested: Cents },
    SelfTransfer,
    BalanceOverflow,
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerError::InvalidAmount(amount) => {
                write!(f, "Amount must be greater than zero (got {} cents)", amount)
            }
            LedgerError::InsufficientFunds { balance, requested } => write!(
                f,
                "Insufficient funds: balance {} cents, requested {} cents",
                balance, requested
            ),
            LedgerError::SelfTransfer => write!(f, "Cannot transfer to your own account"),
            LedgerError::BalanceOverflow => write!(f, "Resulting balance is out of range"),
        }
    }
}

impl std::error::Error for LedgerError {}

pub fn validate_amount(amount_cents: Cents) -> Result<(), LedgerError> {
    if amount_cents <= 0 {
        return Err(LedgerError::InvalidAmount(amount_cents));
    }
    Ok(())
}

/// Balance after depositing `amount_cents`.
pub fn apply_deposit(balance: Cents, amount_cents: Cents) -> Result<Cents, LedgerError> {
    validate_amount(amount_cents)?;
    balance
        .checked_add(amount_cents)
        .ok_or(LedgerError::BalanceOverflow)
}

/// Balance after withdrawing `amount_cents`. Never goes below zero.
pub fn apply_withdrawal(balance: Cents, amount_cents: Cents) -> Result<Cents, LedgerError> {
    validate_amount(amount_cents)?;
    if amount_cents > balance {
        return Err(LedgerError::InsufficientFunds {
            balance,
            requested: amount_cents,
        });
    }
    Ok(balance - amount_cents)
}

/// Both resulting balances of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferPlan {
    pub amount_cents: Cents,
    pub sender_balance_after: Cents,
    pub recipient_balance_after: Cents,
}

/// Validate a transfer and compute both sides. Debit and credit always use the same amount.
/// Checks run in order: amount, self-transfer, funds.
pub fn plan_transfer(
    sender: &str,
    sender_balance: Cents,
    recipient: &str,
    recipient_balance: Cents,
    amount_cents: Cents,
) -> Result<TransferPlan, LedgerError> {
    validate_amount(amount_cents)?;
    if sender.eq_ignore_ascii_case(recipient) {
        return Err(LedgerError::SelfTransfer);
    }
    let sender_balance_after = apply_withdrawal(sender_balance, amount_cents)?;
    let recipient_balance_after = apply_deposit(recipient_balance, amount_cents)?;
    Ok(TransferPlan {
        amount_cents,
        sender_balance_after,
        recipient_balance_after,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityIssue {
    /// Stored balance disagrees with the replayed history
    BalanceMismatch {
        username: String,
        stored: Cents,
        replayed: Cents,
    },
    /// A row's recorded balance_after disagrees with the replay at that point
    RowBalanceMismatch {
        username: String,
        sequence: i64,
        recorded: Cents,
        expected: Cents,
    },
    NegativeBalance { username: String, balance: Cents },
    /// Applied transfer rows under this reference do not balance out
    UnpairedTransfer { reference: String },
    /// A row belongs to no known account
    OrphanTransaction { username: String, sequence: i64 },
    SequenceGap { after: i64, next: i64 },
    /// Applying this row's amount would overflow the balance
    AmountOutOfRange {
        username: String,
        sequence: i64,
        amount: Cents,
    },
}

impl std::fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntegrityIssue::BalanceMismatch {
                username,
                stored,
                replayed,
            } => write!(
                f,
                "{}: stored balance {} differs from history ({})",
                username, stored, replayed
            ),
            IntegrityIssue::RowBalanceMismatch {
                username,
                sequence,
                recorded,
                expected,
            } => write!(
                f,
                "{}: row #{} records balance {} but history gives {}",
                username, sequence, recorded, expected
            ),
            IntegrityIssue::NegativeBalance { username, balance } => {
                write!(f, "{}: negative balance {}", username, balance)
            }
            IntegrityIssue::UnpairedTransfer { reference } => {
                write!(f, "transfer {} has no matching other side", reference)
            }
            IntegrityIssue::OrphanTransaction { username, sequence } => {
                write!(f, "row #{} belongs to unknown account {}", sequence, username)
            }
            IntegrityIssue::SequenceGap { after, next } => {
                write!(f, "sequence jumps from {} to {}", after, next)
            }
            IntegrityIssue::AmountOutOfRange {
                username,
                sequence,
                amount,
            } => write!(
                f,
                "{}: row #{} amount {} is out of range",
                username, sequence, amount
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IntegrityReport {
    pub account_count: usize,
    pub transaction_count: usize,
    pub total_balance: Cents,
    pub issues: Vec<IntegrityIssue>,
}

impl IntegrityReport {
    pub fn is_ok(&self) -> bool {
        self.issues.is_empty()
    }
}

#[derive(Default)]
struct TransferSides {
    out_count: usize,
    in_count: usize,
    out_total: i128,
    in_total: i128,
}

/// Check every account against its own history and every transfer against its other side.
/// `transactions` must be ordered by sequence.
pub fn build_integrity_report(accounts: &[Account], transactions: &[Transaction]) -> IntegrityReport {
    let mut issues = Vec::new();

    let mut running: HashMap<&str, Cents> = accounts
        .iter()
        .map(|a| (a.username.as_str(), a.opening_balance_cents))
        .collect();

    for tx in transactions {
        let Some(balance) = running.get_mut(tx.username.as_str()) else {
            issues.push(IntegrityIssue::OrphanTransaction {
                username: tx.username.clone(),
                sequence: tx.sequence,
            });
            continue;
        };
        if tx.is_ok() {
            let applied = tx
                .kind
                .balance_effect(tx.amount_cents)
                .and_then(|effect| balance.checked_add(effect));
            match applied {
                Some(next) => *balance = next,
                None => issues.push(IntegrityIssue::AmountOutOfRange {
                    username: tx.username.clone(),
                    sequence: tx.sequence,
                    amount: tx.amount_cents,
                }),
            }
        }
        if tx.balance_after_cents != *balance {
            issues.push(IntegrityIssue::RowBalanceMismatch {
                username: tx.username.clone(),
                sequence: tx.sequence,
                recorded: tx.balance_after_cents,
                expected: *balance,
            });
        }
    }

    for account in accounts {
        let replayed = running
            .get(account.username.as_str())
            .copied()
            .unwrap_or(account.opening_balance_cents);
        if replayed != account.balance_cents {
            issues.push(IntegrityIssue::BalanceMismatch {
                username: account.username.clone(),
                stored: account.balance_cents,
                replayed,
            });
        }
        if account.balance_cents < 0 {
            issues.push(IntegrityIssue::NegativeBalance {
                username: account.username.clone(),
                balance: account.balance_cents,
            });
        }
    }

    // Several transfers may share a reference when they land in the same millisecond,
    // so sides are matched by count and total rather than one-to-one.
    let mut transfers: BTreeMap<&str, TransferSides> = BTreeMap::new();
    for tx in transactions.iter().filter(|tx| tx.is_ok()) {
        match tx.kind {
            TransactionKind::TransferOut => {
                let sides = transfers.entry(tx.reference.as_str()).or_default();
                sides.out_count += 1;
                sides.out_total += i128::from(tx.amount_cents);
            }
            TransactionKind::TransferIn => {
                let sides = transfers.entry(tx.reference.as_str()).or_default();
                sides.in_count += 1;
                sides.in_total += i128::from(tx.amount_cents);
            }
            _ => {}
        }
    }
    for (reference, sides) in transfers {
        if sides.out_count != sides.in_count || sides.out_total != sides.in_total {
            issues.push(IntegrityIssue::UnpairedTransfer {
                reference: reference.to_string(),
            });
        }
    }

    for pair in transactions.windows(2) {
        if pair[0].sequence.checked_add(1) != Some(pair[1].sequence) {
            issues.push(IntegrityIssue::SequenceGap {
                after: pair[0].sequence,
                next: pair[1].sequence,
            });
        }
    }

    IntegrityReport {
        account_count: accounts.len(),
        transaction_count: transactions.len(),
        total_balance: accounts
            .iter()
            .fold(0, |total: Cents, a| total.saturating_add(a.balance_cents)),
        issues,
    }
}
