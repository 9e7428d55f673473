use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How long a reset token stays valid unless configured otherwise.
pub const PIN_RESET_TOKEN_TTL_MINUTES: i64 = 30;

/// Single-use token that lets the holder set a new PIN for `username`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinResetToken {
    pub token: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
}

impl PinResetToken {
    pub fn issue(username: impl Into<String>, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            token: Uuid::new_v4().to_string(),
            username: username.into(),
            created_at: now,
            expires_at: now + ttl,
            used: false,
        }
    }

    /// Unused and not yet expired at `now`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.used && self.expires_at > now
    }
}
