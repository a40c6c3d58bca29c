//! Accounts, sessions, resolved actors and moderation flags.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{UnknownVariant, UserId};

/// Server-side role of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Regular event owner.
    User,
    /// Platform operator allowed to run overrides.
    SuperAdmin,
}

impl Role {
    /// Returns the persisted string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::SuperAdmin => "super_admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "super_admin" => Ok(Self::SuperAdmin),
            other => Err(UnknownVariant::new("role", other)),
        }
    }
}

/// A platform account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    /// Account identifier.
    pub id: UserId,
    /// Login e-mail.
    pub email: String,
    /// Role.
    pub role: Role,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// A login session, stored by token hash only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Hex SHA-256 of the bearer token.
    pub token_hash: String,
    /// Session owner.
    pub user_id: UserId,
    /// Hard expiry.
    pub expires_at: DateTime<Utc>,
    /// Set when the session was revoked.
    pub revoked_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Not revoked and not expired.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}

/// An authenticated caller. The role always comes from the server side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    /// Caller.
    pub user_id: UserId,
    /// Caller's role.
    pub role: Role,
}

impl Actor {
    /// Whether the caller may run privileged overrides.
    #[must_use]
    pub const fn is_super_admin(&self) -> bool {
        matches!(self.role, Role::SuperAdmin)
    }
}

/// Moderation and abuse state of one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountFlags {
    /// Account the flags belong to.
    pub user_id: UserId,
    /// Suspended by the kill switch.
    pub is_suspended: bool,
    /// Flagged for review (repeated expired payments).
    pub is_flagged: bool,
    /// Blocked from creating events.
    pub is_rate_limited: bool,
    /// Payment orders that lapsed unpaid.
    pub expired_payment_count: i32,
    /// Checkouts started.
    pub total_payment_attempts: i32,
    /// Append-only operator notes.
    pub admin_notes: String,
    /// When the suspension started.
    pub suspended_at: Option<DateTime<Utc>>,
    /// When the account was flagged.
    pub flagged_at: Option<DateTime<Utc>>,
    /// When the account was rate limited.
    pub rate_limited_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl AccountFlags {
    /// Clean flags for an account seen for the first time.
    #[must_use]
    pub fn new(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            is_suspended: false,
            is_flagged: false,
            is_rate_limited: false,
            expired_payment_count: 0,
            total_payment_attempts: 0,
            admin_notes: String::new(),
            suspended_at: None,
            flagged_at: None,
            rate_limited_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Appends a timestamped operator note. Existing notes are never edited.
    pub fn append_note(&mut self, author: UserId, note: &str, now: DateTime<Utc>) {
        if !self.admin_notes.is_empty() {
            self.admin_notes.push('\n');
        }
        self.admin_notes
            .push_str(&format!("[{}] {author}: {}", now.to_rfc3339(), note.trim()));
        self.updated_at = now;
    }
}
