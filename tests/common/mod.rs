// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use anyhow::Result;
use teller::application::{LedgerConfig, LedgerService};
use teller::domain::{Account, Cents};
use tempfile::TempDir;

/// Helper to create a test service with a temporary database
pub async fn test_service() -> Result<(LedgerService, TempDir)> {
    test_service_with(LedgerConfig::default()).await
}

pub async fn test_service_with(config: LedgerConfig) -> Result<(LedgerService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let service = LedgerService::init(db_path.to_str().unwrap(), config).await?;
    Ok((service, temp_dir))
}

/// Helper to create a test service holding the demo accounts
/// (anna 1500.00, bamby 750.00, guest 100.00, sample 100.00)
pub async fn seeded_service() -> Result<(LedgerService, TempDir)> {
    let (service, temp_dir) = test_service().await?;
    service.seed_demo_accounts().await?;
    Ok((service, temp_dir))
}

pub async fn login(service: &LedgerService, username: &str, pin: &str) -> Result<Account> {
    Ok(service.authenticate(username, pin).await?)
}

/// Stored balance, bypassing any stale `Account` snapshot held by the test
pub async fn balance_of(service: &LedgerService, username: &str) -> Result<Cents> {
    Ok(service.get_account(username).await?.balance_cents)
}
