use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::{Card, CardBrand, Cents, generate_account_number};

pub type AccountId = Uuid;

/// Usernames are case-insensitive; the stored form is trimmed and lower-cased.
pub fn normalize_username(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// A 4-digit PIN as typed by the user. Only ever held transiently.
#[derive(Clone, PartialEq, Eq)]
pub struct Pin(String);

impl Pin {
    pub const LENGTH: usize = 4;

    pub fn parse(raw: &str) -> Result<Self, PinError> {
        let raw = raw.trim();
        if raw.len() != Self::LENGTH || !raw.chars().all(|c| c.is_ascii_digit()) {
            return Err(PinError::InvalidFormat);
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Pin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Pin(****)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinError {
    InvalidFormat,
}

impl std::fmt::Display for PinError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PinError::InvalidFormat => write!(f, "PIN must be exactly {} digits", Pin::LENGTH),
        }
    }
}

impl std::error::Error for PinError {}

/// Fresh random salt for a PIN hash.
pub fn new_pin_salt() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Salted SHA-256 digest of a PIN, hex encoded.
pub fn hash_pin(salt: &str, pin: &Pin) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(pin.as_str().as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    /// Login identity; an e-mail address for self-registered accounts
    pub username: String,
    pub full_name: Option<String>,
    #[serde(skip_serializing, default)]
    pub pin_salt: String,
    #[serde(skip_serializing, default)]
    pub pin_hash: String,
    pub account_number: String,
    pub card: Card,
    pub balance_cents: Cents,
    /// Balance the account was created with; history replays start here
    pub opening_balance_cents: Cents,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Create an account with freshly generated account and card numbers.
    /// `username` is normalized; the opening balance must not be negative.
    pub fn new<R: Rng>(
        username: &str,
        pin: &Pin,
        opening_balance_cents: Cents,
        rng: &mut R,
    ) -> Self {
        assert!(
            opening_balance_cents >= 0,
            "Opening balance must not be negative"
        );
        let pin_salt = new_pin_salt();
        let pin_hash = hash_pin(&pin_salt, pin);
        let brand = if rng.gen_bool(0.5) {
            CardBrand::Visa
        } else {
            CardBrand::Mastercard
        };
        Self {
            id: Uuid::new_v4(),
            username: normalize_username(username),
            full_name: None,
            pin_salt,
            pin_hash,
            account_number: generate_account_number(rng),
            card: Card::issue(brand, rng),
            balance_cents: opening_balance_cents,
            opening_balance_cents,
            created_at: Utc::now(),
        }
    }

    pub fn with_full_name(mut self, full_name: impl Into<String>) -> Self {
        self.full_name = Some(full_name.into());
        self
    }

    pub fn verify_pin(&self, pin: &Pin) -> bool {
        hash_pin(&self.pin_salt, pin) == self.pin_hash
    }

    /// Name to greet the user with: full name when known, username otherwise.
    pub fn display_name(&self) -> &str {
        self.full_name.as_deref().unwrap_or(&self.username)
    }
}
