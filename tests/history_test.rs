mod common;

use anyhow::Result;
use chrono::Utc;
use common::{login, seeded_service, test_service_with};
use teller::application::{AppError, LedgerConfig};
use teller::domain::{Cents, IntegrityIssue, Transaction, TransactionKind, TransactionStatus};
use teller::io::{Exporter, LedgerSnapshot};

#[tokio::test]
async fn test_recent_transactions_newest_first() -> Result<()> {
    let (service, _temp) = seeded_service().await?;
    let anna = login(&service, "anna", "1234").await?;

    for amount in [100, 200, 300, 400] {
        service.deposit(&anna, amount).await?;
    }

    let recent = service.recent_transactions("anna", 3).await?;
    let amounts: Vec<_> = recent.iter().map(|tx| tx.amount_cents).collect();
    assert_eq!(amounts, vec![400, 300, 200]);
    assert!(recent.windows(2).all(|w| w[0].sequence > w[1].sequence));

    let all = service.recent_transactions("anna", 50).await?;
    assert_eq!(all.len(), 4);

    assert!(service.recent_transactions("anna", 0).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_history_uses_configured_limit() -> Result<()> {
    let config = LedgerConfig::default().with_history_limit(2);
    let (service, _temp) = test_service_with(config).await?;
    service.seed_demo_accounts().await?;
    let guest = login(&service, "guest", "1111").await?;

    service.deposit(&guest, 100).await?;
    service.withdraw(&guest, 50).await?;
    service.check_balance(&guest).await?;

    let history = service.history("guest").await?;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].kind, TransactionKind::BalanceInquiry);
    assert_eq!(history[1].kind, TransactionKind::Withdrawal);

    Ok(())
}

#[tokio::test]
async fn test_history_of_unknown_user_is_empty() -> Result<()> {
    let (service, _temp) = seeded_service().await?;
    assert!(service.recent_transactions("nobody", 5).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_history_is_per_user() -> Result<()> {
    let (service, _temp) = seeded_service().await?;
    let anna = login(&service, "anna", "1234").await?;
    let bamby = login(&service, "bamby", "4321").await?;

    service.deposit(&anna, 100).await?;
    service.deposit(&bamby, 200).await?;
    service.transfer(&bamby, "anna", 300).await?;

    let anna_history = service.recent_transactions("anna", 10).await?;
    assert_eq!(anna_history.len(), 2);
    assert!(anna_history.iter().all(|tx| tx.username == "anna"));
    assert_eq!(anna_history[0].kind, TransactionKind::TransferIn);
    assert_eq!(anna_history[0].counterparty.as_deref(), Some("bamby"));

    let everything = service.list_transactions(None).await?;
    assert_eq!(everything.len(), 4);
    assert!(everything.windows(2).all(|w| w[0].sequence < w[1].sequence));

    Ok(())
}

#[tokio::test]
async fn test_record_transaction_appends_row() -> Result<()> {
    let (service, _temp) = seeded_service().await?;

    let mut tx = Transaction::new(
        "Sample",
        TransactionKind::BalanceInquiry,
        0,
        10000,
        "BB-BAL-1",
        Utc::now(),
    );
    service.record_transaction(&mut tx).await?;
    assert_eq!(tx.username, "sample");
    assert!(tx.sequence > 0);

    let recent = service.recent_transactions("sample", 1).await?;
    assert_eq!(recent[0].id, tx.id);
    assert_eq!(recent[0].reference, "BB-BAL-1");

    Ok(())
}

#[tokio::test]
async fn test_record_transaction_requires_account() -> Result<()> {
    let (service, _temp) = seeded_service().await?;

    let mut tx = Transaction::new("ghost", TransactionKind::Deposit, 100, 100, "BB-DEP-1", Utc::now());
    let err = service.record_transaction(&mut tx).await.unwrap_err();
    assert!(matches!(err, AppError::AccountNotFound(_)));
    assert!(service.list_transactions(None).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_record_transaction_rejects_negative_amount() -> Result<()> {
    let (service, _temp) = seeded_service().await?;

    let mut tx = Transaction::new("anna", TransactionKind::Deposit, -1, 150000, "BB-DEP-1", Utc::now());
    let err = service.record_transaction(&mut tx).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidAmount(_)));
    assert!(service.list_transactions(None).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_integrity_survives_huge_recorded_amount() -> Result<()> {
    let (service, _temp) = seeded_service().await?;

    let mut tx = Transaction::new(
        "anna",
        TransactionKind::Deposit,
        Cents::MAX,
        Cents::MAX,
        "BB-DEP-1",
        Utc::now(),
    );
    service.record_transaction(&mut tx).await?;

    let report = service.check_integrity().await?;
    assert!(!report.is_ok());
    assert!(report.issues.iter().any(|issue| matches!(
        issue,
        IntegrityIssue::AmountOutOfRange { username, sequence, .. }
            if username == "anna" && *sequence == tx.sequence
    )));

    Ok(())
}

#[tokio::test]
async fn test_diagnostics_counts() -> Result<()> {
    let (service, _temp) = seeded_service().await?;
    let anna = login(&service, "anna", "1234").await?;

    service.deposit(&anna, 5000).await?;
    service.withdraw(&anna, 999999).await.unwrap_err();
    service.transfer(&anna, "guest", 1000).await?;

    let diagnostics = service.diagnostics(2).await?;
    assert_eq!(diagnostics.stats.account_count, 4);
    assert_eq!(diagnostics.stats.total_balance, 245000 + 5000);
    assert_eq!(diagnostics.stats.transaction_count, 4);
    assert_eq!(diagnostics.stats.failed_count, 1);
    assert_eq!(diagnostics.recent.len(), 2);
    assert_eq!(diagnostics.recent[0].kind, TransactionKind::TransferIn);

    Ok(())
}

#[tokio::test]
async fn test_integrity_detects_tampered_row() -> Result<()> {
    let (service, _temp) = seeded_service().await?;
    let guest = login(&service, "guest", "1111").await?;
    service.deposit(&guest, 500).await?;

    // A deposit row that never touched the balance
    let mut forged = Transaction::new("guest", TransactionKind::Deposit, 700, 11200, "BB-DEP-1", Utc::now());
    service.record_transaction(&mut forged).await?;

    let report = service.check_integrity().await?;
    assert!(!report.is_ok());
    assert!(!report.issues.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_export_history_csv() -> Result<()> {
    let (service, _temp) = seeded_service().await?;
    let anna = login(&service, "anna", "1234").await?;
    service.deposit(&anna, 1050).await?;
    service.transfer(&anna, "bamby", 2000).await?;

    let exporter = Exporter::new(&service);

    let mut buffer = Vec::new();
    let count = exporter.export_history_csv(&mut buffer, Some("anna")).await?;
    assert_eq!(count, 2);

    let output = String::from_utf8(buffer)?;
    let mut lines = output.lines();
    assert!(lines.next().unwrap().starts_with("sequence,timestamp,username,type,status"));
    assert!(output.contains("10.50"));
    assert!(output.contains("Transfer to bamby"));
    assert!(!output.contains("Transfer from anna"));

    let mut buffer = Vec::new();
    let count = exporter.export_history_csv(&mut buffer, None).await?;
    assert_eq!(count, 3);

    Ok(())
}

#[tokio::test]
async fn test_export_accounts_csv_hides_secrets() -> Result<()> {
    let (service, _temp) = seeded_service().await?;
    let anna = service.get_account("anna").await?;

    let mut buffer = Vec::new();
    let count = Exporter::new(&service).export_accounts_csv(&mut buffer).await?;
    assert_eq!(count, 4);

    let output = String::from_utf8(buffer)?;
    assert!(output.contains("anna"));
    assert!(output.contains("1500.00"));
    assert!(output.contains(&anna.account_number));
    assert!(!output.contains(&anna.pin_hash));
    let header = output.lines().next().unwrap();
    assert!(!header.contains("cvv"));
    assert!(!header.contains("pin"));

    Ok(())
}

#[tokio::test]
async fn test_export_full_json() -> Result<()> {
    let (service, _temp) = seeded_service().await?;
    let bamby = login(&service, "bamby", "4321").await?;
    service.withdraw(&bamby, 2500).await?;

    let mut buffer = Vec::new();
    let snapshot = Exporter::new(&service).export_full_json(&mut buffer).await?;
    assert_eq!(snapshot.accounts.len(), 4);
    assert_eq!(snapshot.transactions.len(), 1);
    assert_eq!(snapshot.currency, "PHP");

    let json = String::from_utf8(buffer)?;
    assert!(!json.contains("pin_hash"));
    assert!(!json.contains("pin_salt"));
    assert!(!json.contains("cvv"));

    let parsed: LedgerSnapshot = serde_json::from_str(&json)?;
    assert_eq!(parsed.transactions[0].status, TransactionStatus::Ok);
    assert_eq!(parsed.transactions[0].balance_after_cents, 72500);

    Ok(())
}
