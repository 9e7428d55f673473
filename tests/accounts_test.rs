mod common;

use anyhow::Result;
use common::{login, test_service, test_service_with};
use chrono::Duration;
use teller::application::{AppError, LedgerConfig};
use teller::domain::{Pin, TransactionKind};

#[tokio::test]
async fn test_register_and_login() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let account = service
        .register(Some("Juan Dela Cruz".to_string()), "Juan@Example.com", "4826")
        .await?;
    assert_eq!(account.username, "juan@example.com");
    assert_eq!(account.balance_cents, 0);
    assert_eq!(account.display_name(), "Juan Dela Cruz");
    assert!(account.account_number.starts_with("1098"));
    assert_ne!(account.pin_hash, "4826");

    let logged_in = login(&service, "JUAN@example.com", "4826").await?;
    assert_eq!(logged_in.id, account.id);

    Ok(())
}

#[tokio::test]
async fn test_register_issues_card_and_account_number() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let account = service.register(None, "card@example.com", "1357").await?;

    let stored = service.get_account("card@example.com").await?;
    assert_eq!(stored.card, account.card);
    assert_eq!(stored.account_number, account.account_number);
    assert_eq!(stored.account_number.len(), 16);
    assert!(stored.card.number_masked.starts_with("**** **** **** "));
    assert_eq!(stored.card.cvv.len(), 3);
    assert!(stored.verify_pin(&Pin::parse("1357")?));

    Ok(())
}

#[tokio::test]
async fn test_register_rejects_duplicates_case_insensitively() -> Result<()> {
    let (service, _temp) = test_service().await?;
    service.register(None, "maria@example.com", "1111").await?;

    let err = service
        .register(None, "MARIA@example.com", "2222")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::AccountAlreadyExists(ref u) if u == "maria@example.com"));

    Ok(())
}

#[tokio::test]
async fn test_register_rejects_bad_input() -> Result<()> {
    let (service, _temp) = test_service().await?;

    for pin in ["", "123", "12345", "12a4"] {
        let err = service.register(None, "pin@example.com", pin).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidPin), "pin {:?} accepted", pin);
    }

    let err = service.register(None, "   ", "1234").await.unwrap_err();
    assert!(matches!(err, AppError::InvalidUsername));

    assert!(service.list_accounts().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_authentication_failures_look_the_same() -> Result<()> {
    let (service, _temp) = test_service().await?;
    service.seed_demo_accounts().await?;

    for (user, pin) in [("anna", "9999"), ("nobody", "1234"), ("anna", "12")] {
        let err = service.authenticate(user, pin).await.unwrap_err();
        assert!(matches!(err, AppError::AuthenticationFailed));
    }

    Ok(())
}

#[tokio::test]
async fn test_seed_demo_accounts_is_idempotent() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let created = service.seed_demo_accounts().await?;
    assert_eq!(created.len(), 4);
    let again = service.seed_demo_accounts().await?;
    assert!(again.is_empty());

    let accounts = service.list_accounts().await?;
    let balances: Vec<_> = accounts
        .iter()
        .map(|a| (a.username.as_str(), a.balance_cents))
        .collect();
    assert_eq!(balances.len(), 4);
    assert!(balances.contains(&("anna", 150000)));
    assert!(balances.contains(&("bamby", 75000)));
    assert!(balances.contains(&("guest", 10000)));
    assert!(balances.contains(&("sample", 10000)));

    Ok(())
}

#[tokio::test]
async fn test_opening_balance_from_config() -> Result<()> {
    let config = LedgerConfig::default().with_opening_balance(50000);
    let (service, _temp) = test_service_with(config).await?;

    let account = service.register(None, "rich@example.com", "8080").await?;
    assert_eq!(account.balance_cents, 50000);
    assert_eq!(account.opening_balance_cents, 50000);

    let report = service.check_integrity().await?;
    assert!(report.is_ok());

    Ok(())
}

#[tokio::test]
async fn test_check_balance_greets_and_records() -> Result<()> {
    let (service, _temp) = test_service().await?;
    service
        .register(Some("Ana Reyes".to_string()), "ana@example.com", "1234")
        .await?;
    let account = login(&service, "ana@example.com", "1234").await?;

    let receipt = service.check_balance(&account).await?;
    assert_eq!(receipt.balance, 0);
    assert_eq!(
        receipt.message,
        "Hello, Ana Reyes! Your current balance is PHP 0.00."
    );

    let history = service.history("ana@example.com").await?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].kind, TransactionKind::BalanceInquiry);
    assert_eq!(history[0].amount_cents, 0);

    Ok(())
}

#[tokio::test]
async fn test_get_unknown_account() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let err = service.get_account("ghost").await.unwrap_err();
    assert!(matches!(err, AppError::AccountNotFound(ref u) if u == "ghost"));
    Ok(())
}

#[tokio::test]
async fn test_racing_registrations_report_duplicate() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let (first, second) = tokio::join!(
        service.register(None, "twin@example.com", "1111"),
        service.register(None, "Twin@Example.com", "2222"),
    );

    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for result in results {
        if let Err(err) = result {
            assert!(
                matches!(err, AppError::AccountAlreadyExists(ref u) if u == "twin@example.com"),
                "unexpected error: {}",
                err
            );
        }
    }
    assert_eq!(service.list_accounts().await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_pin_reset_replaces_pin() -> Result<()> {
    let (service, _temp) = test_service().await?;
    service.seed_demo_accounts().await?;
    let before = service.get_account("anna").await?;

    let token = service.request_pin_reset("Anna").await?;
    assert_eq!(token.username, "anna");
    assert!(!token.used);
    assert_eq!(token.expires_at - token.created_at, Duration::minutes(30));

    service.reset_pin(&token.token, "9876").await?;

    let err = service.authenticate("anna", "1234").await.unwrap_err();
    assert!(matches!(err, AppError::AuthenticationFailed));
    login(&service, "anna", "9876").await?;

    let after = service.get_account("anna").await?;
    assert_ne!(after.pin_salt, before.pin_salt);
    assert_eq!(after.balance_cents, before.balance_cents);

    Ok(())
}

#[tokio::test]
async fn test_pin_reset_token_is_single_use() -> Result<()> {
    let (service, _temp) = test_service().await?;
    service.seed_demo_accounts().await?;

    let token = service.request_pin_reset("guest").await?;
    service.reset_pin(&token.token, "2468").await?;

    let err = service.reset_pin(&token.token, "1357").await.unwrap_err();
    assert!(matches!(err, AppError::InvalidResetToken));
    login(&service, "guest", "2468").await?;

    Ok(())
}

#[tokio::test]
async fn test_expired_pin_reset_token_rejected() -> Result<()> {
    let config = LedgerConfig::default().with_pin_reset_ttl(Duration::minutes(-1));
    let (service, _temp) = test_service_with(config).await?;
    service.seed_demo_accounts().await?;

    let token = service.request_pin_reset("bamby").await?;
    let err = service.reset_pin(&token.token, "1111").await.unwrap_err();
    assert!(matches!(err, AppError::InvalidResetToken));
    login(&service, "bamby", "4321").await?;

    Ok(())
}

#[tokio::test]
async fn test_malformed_pin_keeps_reset_token() -> Result<()> {
    let (service, _temp) = test_service().await?;
    service.seed_demo_accounts().await?;

    let token = service.request_pin_reset("sample").await?;
    for pin in ["", "12", "12345", "abcd"] {
        let err = service.reset_pin(&token.token, pin).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidPin), "pin {:?} accepted", pin);
    }
    login(&service, "sample", "2222").await?;

    service.reset_pin(&token.token, "0000").await?;
    login(&service, "sample", "0000").await?;

    Ok(())
}

#[tokio::test]
async fn test_pin_reset_unknown_user_or_token() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let err = service.request_pin_reset("ghost").await.unwrap_err();
    assert!(matches!(err, AppError::AccountNotFound(_)));

    let err = service.reset_pin("not-a-token", "1234").await.unwrap_err();
    assert!(matches!(err, AppError::InvalidResetToken));

    Ok(())
}
