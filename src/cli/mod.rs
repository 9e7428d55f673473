use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use crate::application::{LedgerConfig, LedgerService};
use crate::domain::{Account, Cents, Transaction, format_cents, format_money, parse_cents};

/// Teller - a small bank-account ledger
#[derive(Parser)]
#[command(name = "teller")]
#[command(about = "Bank accounts with PIN login, deposits, withdrawals, transfers and history")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "teller.db")]
    pub database: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Prefix for generated reference codes
    #[arg(long, default_value = "BB", global = true)]
    pub prefix: String,

    /// Currency code shown next to amounts
    #[arg(long, default_value = "PHP", global = true)]
    pub currency: String,

    #[command(subcommand)]
    pub command: Commands,
}

/// Login for commands that act on an account
#[derive(Args)]
pub struct Credentials {
    /// Username (or registration e-mail)
    #[arg(short, long)]
    pub user: String,

    /// 4-digit PIN
    #[arg(short, long)]
    pub pin: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init {
        /// Also create the demo accounts
        #[arg(long)]
        seed: bool,
    },

    /// Register a new account; the e-mail becomes the username
    Register {
        #[arg(long)]
        email: String,

        /// 4-digit PIN
        #[arg(long)]
        pin: String,

        /// Full name of the account holder
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Issue a one-time token for setting a new PIN
    ForgotPin {
        #[arg(short, long)]
        user: String,
    },

    /// Set a new PIN using a token from forgot-pin
    ResetPin {
        #[arg(long)]
        token: String,

        /// New 4-digit PIN
        #[arg(long)]
        pin: String,
    },

    /// List accounts with their masked card details
    Accounts,

    /// Show the current balance
    Balance {
        #[command(flatten)]
        auth: Credentials,
    },

    /// Deposit money (e.g., "100.00" or "100")
    Deposit {
        #[arg(allow_hyphen_values = true)]
        amount: String,

        #[command(flatten)]
        auth: Credentials,
    },

    /// Withdraw money
    Withdraw {
        #[arg(allow_hyphen_values = true)]
        amount: String,

        #[command(flatten)]
        auth: Credentials,
    },

    /// Send money to another user
    Transfer {
        #[arg(allow_hyphen_values = true)]
        amount: String,

        /// Recipient username
        #[arg(long)]
        to: String,

        #[command(flatten)]
        auth: Credentials,
    },

    /// Show recent transactions, newest first
    History {
        #[command(flatten)]
        auth: Credentials,

        /// Maximum number of rows (defaults to 5)
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show every row carrying a reference code
    Show {
        reference: String,
    },

    /// Ledger totals and the latest activity
    Diagnostics {
        /// Number of recent rows to show
        #[arg(short, long, default_value = "5")]
        recent: usize,
    },

    /// Verify ledger integrity
    Check,

    /// Export data to CSV or JSON
    Export {
        /// What to export: history, accounts, full
        export_type: String,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,

        /// Restrict history export to one user
        #[arg(long)]
        user: Option<String>,
    },
}

impl Cli {
    fn config(&self) -> LedgerConfig {
        LedgerConfig::default()
            .with_reference_prefix(self.prefix.clone())
            .with_currency(self.currency.clone())
    }

    pub async fn run(self) -> Result<()> {
        let config = self.config();

        match self.command {
            Commands::Init { seed } => {
                let service = LedgerService::init(&self.database, config).await?;
                println!("Database initialized: {}", self.database);
                if seed {
                    let created = service.seed_demo_accounts().await?;
                    println!("Seeded {} demo account(s)", created.len());
                }
            }

            Commands::Register { email, pin, name } => {
                let service = LedgerService::connect(&self.database, config).await?;
                let account = service.register(name, &email, &pin).await?;
                println!("Registered account: {}", account.username);
                println!("  Account number: {}", account.account_number);
                println!(
                    "  Card:           {} {} (valid thru {})",
                    account.card.brand, account.card.number_masked, account.card.valid_thru
                );
                println!(
                    "  Balance:        {}",
                    format_money(account.balance_cents, &service.config().currency)
                );
            }

            Commands::ForgotPin { user } => {
                let service = LedgerService::connect(&self.database, config).await?;
                let token = service.request_pin_reset(&user).await?;
                println!("PIN reset token for {}: {}", token.username, token.token);
                println!(
                    "  Valid until: {}",
                    token.expires_at.format("%Y-%m-%d %H:%M:%S UTC")
                );
            }

            Commands::ResetPin { token, pin } => {
                let service = LedgerService::connect(&self.database, config).await?;
                service.reset_pin(&token, &pin).await?;
                println!("PIN updated. You can now log in with the new PIN.");
            }

            Commands::Accounts => {
                let service = LedgerService::connect(&self.database, config).await?;
                run_accounts_command(&service).await?;
            }

            Commands::Balance { auth } => {
                let service = LedgerService::connect(&self.database, config).await?;
                let account = login(&service, &auth).await?;
                let receipt = service.check_balance(&account).await?;
                println!("{}", receipt.message);
                println!("Reference: {}", receipt.transaction.reference);
            }

            Commands::Deposit { amount, auth } => {
                let service = LedgerService::connect(&self.database, config).await?;
                let account = login(&service, &auth).await?;
                let receipt = service.deposit(&account, parse_amount(&amount)?).await?;
                print_receipt(&service, &receipt.transaction, receipt.previous_balance, &receipt.message);
            }

            Commands::Withdraw { amount, auth } => {
                let service = LedgerService::connect(&self.database, config).await?;
                let account = login(&service, &auth).await?;
                let receipt = service.withdraw(&account, parse_amount(&amount)?).await?;
                print_receipt(&service, &receipt.transaction, receipt.previous_balance, &receipt.message);
            }

            Commands::Transfer { amount, to, auth } => {
                let service = LedgerService::connect(&self.database, config).await?;
                let account = login(&service, &auth).await?;
                let receipt = service
                    .transfer(&account, &to, parse_amount(&amount)?)
                    .await?;
                println!("{}", receipt.message);
                println!("  From:      {}", receipt.sender);
                println!("  To:        {}", receipt.recipient);
                println!(
                    "  Amount:    {}",
                    format_money(receipt.amount_cents, &service.config().currency)
                );
                println!("  Reference: {}", receipt.reference());
            }

            Commands::History { auth, limit } => {
                let service = LedgerService::connect(&self.database, config).await?;
                let account = login(&service, &auth).await?;
                let rows = match limit {
                    Some(limit) => service.recent_transactions(&account.username, limit).await?,
                    None => service.history(&account.username).await?,
                };
                print_transactions(&rows);
            }

            Commands::Show { reference } => {
                let service = LedgerService::connect(&self.database, config).await?;
                let rows = service.find_by_reference(&reference).await?;
                if rows.is_empty() {
                    anyhow::bail!("No transactions with reference '{}'", reference);
                }
                print_transactions(&rows);
            }

            Commands::Diagnostics { recent } => {
                let service = LedgerService::connect(&self.database, config).await?;
                run_diagnostics_command(&service, recent).await?;
            }

            Commands::Check => {
                let service = LedgerService::connect(&self.database, config).await?;
                run_check_command(&service).await?;
            }

            Commands::Export {
                export_type,
                output,
                user,
            } => {
                let service = LedgerService::connect(&self.database, config).await?;
                run_export_command(&service, &export_type, output.as_deref(), user.as_deref())
                    .await?;
            }
        }

        Ok(())
    }
}

async fn login(service: &LedgerService, auth: &Credentials) -> Result<Account> {
    Ok(service.authenticate(&auth.user, &auth.pin).await?)
}

fn parse_amount(amount: &str) -> Result<Cents> {
    parse_cents(amount).with_context(|| format!("Invalid amount '{}'. Use '100.00' or '100'", amount))
}

fn print_receipt(service: &LedgerService, tx: &Transaction, previous_balance: Cents, message: &str) {
    let currency = &service.config().currency;
    println!("{}", message);
    println!("  Old balance: {}", format_money(previous_balance, currency));
    println!("  Amount:      {}", format_money(tx.amount_cents, currency));
    println!("  New balance: {}", format_money(tx.balance_after_cents, currency));
    println!("  Reference:   {}", tx.reference);
    println!("  Date:        {}", tx.timestamp.format("%Y-%m-%d %H:%M:%S"));
}

fn print_transactions(rows: &[Transaction]) {
    if rows.is_empty() {
        println!("No transactions found.");
        return;
    }

    println!(
        "{:<20} {:<16} {:<7} {:>12} {:>12} {:<22} DESCRIPTION",
        "DATE", "TYPE", "STATUS", "AMOUNT", "BALANCE", "REFERENCE"
    );
    println!("{}", "-".repeat(110));
    for tx in rows {
        println!(
            "{:<20} {:<16} {:<7} {:>12} {:>12} {:<22} {}",
            tx.timestamp.format("%Y-%m-%d %H:%M:%S"),
            tx.kind.label(),
            tx.status.as_str(),
            format_cents(tx.amount_cents),
            format_cents(tx.balance_after_cents),
            tx.reference,
            truncate(&tx.description, 30)
        );
    }
}

async fn run_accounts_command(service: &LedgerService) -> Result<()> {
    let accounts = service.list_accounts().await?;
    if accounts.is_empty() {
        println!("No accounts found.");
        return Ok(());
    }

    println!(
        "{:<28} {:<18} {:<22} {:>12}",
        "USERNAME", "ACCOUNT NUMBER", "CARD", "BALANCE"
    );
    println!("{}", "-".repeat(83));
    for account in accounts {
        println!(
            "{:<28} {:<18} {:<22} {:>12}",
            truncate(&account.username, 28),
            account.account_number,
            account.card.number_masked,
            format_cents(account.balance_cents)
        );
    }
    Ok(())
}

async fn run_diagnostics_command(service: &LedgerService, recent: usize) -> Result<()> {
    let diagnostics = service.diagnostics(recent).await?;
    let stats = diagnostics.stats;

    println!("Accounts:             {}", stats.account_count);
    println!(
        "Total system balance: {}",
        format_money(stats.total_balance, &service.config().currency)
    );
    println!(
        "Transactions:         {} ({} failed)",
        stats.transaction_count, stats.failed_count
    );
    println!();
    println!("Recent activity:");
    for tx in &diagnostics.recent {
        println!(
            "  #{:<5} {:<20} {:<16} {:<7} {:>12} {}",
            tx.sequence,
            truncate(&tx.username, 20),
            tx.kind.label(),
            tx.status.as_str(),
            format_cents(tx.amount_cents),
            tx.reference
        );
    }
    Ok(())
}

async fn run_check_command(service: &LedgerService) -> Result<()> {
    println!("Checking ledger integrity...\n");

    let report = service.check_integrity().await?;

    println!("Accounts:     {}", report.account_count);
    println!("Transactions: {}", report.transaction_count);
    println!(
        "Total:        {}",
        format_money(report.total_balance, &service.config().currency)
    );
    println!();

    if report.is_ok() {
        println!("Ledger is consistent.");
        return Ok(());
    }

    println!("Found {} issue(s):", report.issues.len());
    for issue in &report.issues {
        println!("  - {}", issue);
    }
    anyhow::bail!("Ledger integrity check failed")
}

async fn run_export_command(
    service: &LedgerService,
    export_type: &str,
    output: Option<&str>,
    user: Option<&str>,
) -> Result<()> {
    use crate::io::Exporter;
    use std::fs::File;
    use std::io::{Write, stdout};

    let exporter = Exporter::new(service);

    let writer: Box<dyn Write> = match output {
        Some(path) => {
            let file =
                File::create(path).with_context(|| format!("Failed to create file '{}'", path))?;
            Box::new(file)
        }
        None => Box::new(stdout()),
    };

    match export_type {
        "history" => {
            let count = exporter.export_history_csv(writer, user).await?;
            if output.is_some() {
                eprintln!("Exported {} transactions", count);
            }
        }
        "accounts" => {
            let count = exporter.export_accounts_csv(writer).await?;
            if output.is_some() {
                eprintln!("Exported {} accounts", count);
            }
        }
        "full" => {
            let snapshot = exporter.export_full_json(writer).await?;
            if output.is_some() {
                eprintln!(
                    "Exported full ledger: {} accounts, {} transactions",
                    snapshot.accounts.len(),
                    snapshot.transactions.len()
                );
            }
        }
        _ => {
            anyhow::bail!(
                "Invalid export type '{}'. Valid types: history, accounts, full",
                export_type
            );
        }
    }

    Ok(())
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
