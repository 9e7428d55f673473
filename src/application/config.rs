use chrono::Duration;

use crate::domain::{Cents, PIN_RESET_TOKEN_TTL_MINUTES};

/// Runtime settings for [`super::LedgerService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Leading part of every reference code, as in "BB-DEP-1718000000000"
    pub reference_prefix: String,
    /// Currency code shown in messages and exports
    pub currency: String,
    /// Rows returned when a caller asks for recent history without a limit
    pub history_limit: usize,
    /// Balance given to newly registered accounts
    pub opening_balance: Cents,
    /// Lifetime of a PIN reset token
    pub pin_reset_ttl: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            reference_prefix: "BB".to_string(),
            currency: "PHP".to_string(),
            history_limit: 5,
            opening_balance: 0,
            pin_reset_ttl: Duration::minutes(PIN_RESET_TOKEN_TTL_MINUTES),
        }
    }
}

impl LedgerConfig {
    pub fn with_reference_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.reference_prefix = prefix.into();
        self
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn with_opening_balance(mut self, cents: Cents) -> Self {
        self.opening_balance = cents;
        self
    }

    pub fn with_pin_reset_ttl(mut self, ttl: Duration) -> Self {
        self.pin_reset_ttl = ttl;
        self
    }
}
