//! Rate-limit dimensions and fixed-window rules.

use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// The key family that tripped a limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LimitDimension {
    /// Requester IP address.
    Ip,
    /// Target event (fan-in bound).
    Event,
    /// Identifying value such as a phone number.
    Identity,
    /// Account-level moderation block.
    Account,
}

impl LimitDimension {
    /// Returns the wire name of the dimension.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ip => "ip",
            Self::Event => "event",
            Self::Identity => "identity",
            Self::Account => "account",
        }
    }
}

impl fmt::Display for LimitDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fixed-window limit: at most `limit` hits per `window_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRule {
    /// Allowed hits per window.
    pub limit: u32,
    /// Window length in seconds.
    pub window_secs: u64,
}

impl RateLimitRule {
    /// Creates a rule.
    #[must_use]
    pub const fn new(limit: u32, window_secs: u64) -> Self {
        Self { limit, window_secs }
    }

    /// Window as a [`std::time::Duration`].
    #[must_use]
    pub const fn window(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.window_secs)
    }
}
