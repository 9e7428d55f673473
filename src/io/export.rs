use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;

use crate::application::LedgerService;
use crate::domain::{Account, Transaction, format_cents};

/// Full ledger snapshot. Accounts serialize without their PIN material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub currency: String,
    pub accounts: Vec<Account>,
    pub transactions: Vec<Transaction>,
}

/// Exporter for converting ledger data to CSV or JSON
pub struct Exporter<'a> {
    service: &'a LedgerService,
}

impl<'a> Exporter<'a> {
    pub fn new(service: &'a LedgerService) -> Self {
        Self { service }
    }

    /// Export transaction history in sequence order, for one user or everyone.
    pub async fn export_history_csv<W: Write>(&self, writer: W, username: Option<&str>) -> Result<usize> {
        let transactions = self.service.list_transactions(username).await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "sequence",
            "timestamp",
            "username",
            "type",
            "status",
            "amount",
            "balance_after",
            "reference",
            "description",
            "counterparty",
        ])?;

        for tx in &transactions {
            csv_writer.write_record([
                tx.sequence.to_string(),
                tx.timestamp.to_rfc3339(),
                tx.username.clone(),
                tx.kind.as_str().to_string(),
                tx.status.as_str().to_string(),
                format_cents(tx.amount_cents),
                format_cents(tx.balance_after_cents),
                tx.reference.clone(),
                tx.description.clone(),
                tx.counterparty.clone().unwrap_or_default(),
            ])?;
        }

        csv_writer.flush()?;
        Ok(transactions.len())
    }

    /// Export accounts with their display fields. CVVs are left out.
    pub async fn export_accounts_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let accounts = self.service.list_accounts().await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "username",
            "full_name",
            "account_number",
            "card_brand",
            "card_number",
            "valid_thru",
            "balance",
            "created_at",
        ])?;

        for account in &accounts {
            let balance = format_cents(account.balance_cents);
            let created_at = account.created_at.to_rfc3339();
            csv_writer.write_record([
                account.username.as_str(),
                account.full_name.as_deref().unwrap_or(""),
                account.account_number.as_str(),
                account.card.brand.as_str(),
                account.card.number_masked.as_str(),
                account.card.valid_thru.as_str(),
                balance.as_str(),
                created_at.as_str(),
            ])?;
        }

        csv_writer.flush()?;
        Ok(accounts.len())
    }

    /// Export the whole ledger as a pretty-printed JSON snapshot
    pub async fn export_full_json<W: Write>(&self, mut writer: W) -> Result<LedgerSnapshot> {
        let snapshot = LedgerSnapshot {
            version: env!("CARGO_PKG_VERSION").to_string(),
            exported_at: Utc::now(),
            currency: self.service.config().currency.clone(),
            accounts: self.service.list_accounts().await?,
            transactions: self.service.list_transactions(None).await?,
        };

        let json = serde_json::to_string_pretty(&snapshot)?;
        writer.write_all(json.as_bytes())?;
        writer.flush()?;

        Ok(snapshot)
    }
}
