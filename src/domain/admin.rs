//! Privileged override commands and their reason requirements.

use super::audit::AdminActionKind;
use super::{EventId, UserId};

/// Minimum reason length for ordinary overrides.
pub const MIN_REASON_CHARS: usize = 1;

/// Minimum reason length for the kill switch.
pub const KILL_SWITCH_MIN_REASON_CHARS: usize = 10;

/// Minimum reason length for a purge.
pub const PURGE_MIN_REASON_CHARS: usize = 20;

/// A dispatched override. Matching on it is exhaustive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminCommand {
    /// Lift a suspension.
    RestoreUser {
        /// Target account.
        user_id: UserId,
    },
    /// Restore a disabled event.
    RestoreEvent {
        /// Target event.
        event_id: EventId,
    },
    /// Archive an event.
    ArchiveEvent {
        /// Target event.
        event_id: EventId,
    },
    /// Purge an event.
    PurgeEvent {
        /// Target event.
        event_id: EventId,
    },
    /// Clear moderation flags.
    UnflagUser {
        /// Target account.
        user_id: UserId,
    },
    /// Manually rate limit an account.
    RateLimitUser {
        /// Target account.
        user_id: UserId,
    },
    /// Disable an ended event once its cooldown elapsed.
    DisableEvent {
        /// Target event.
        event_id: EventId,
    },
}

impl AdminCommand {
    /// Audit kind of the command.
    #[must_use]
    pub const fn kind(&self) -> AdminActionKind {
        match self {
            Self::RestoreUser { .. } => AdminActionKind::RestoreUser,
            Self::RestoreEvent { .. } => AdminActionKind::RestoreEvent,
            Self::ArchiveEvent { .. } => AdminActionKind::ArchiveEvent,
            Self::PurgeEvent { .. } => AdminActionKind::PurgeEvent,
            Self::UnflagUser { .. } => AdminActionKind::UnflagUser,
            Self::RateLimitUser { .. } => AdminActionKind::RateLimitUser,
            Self::DisableEvent { .. } => AdminActionKind::DisableEvent,
        }
    }

    /// Minimum reason length in characters.
    #[must_use]
    pub const fn min_reason_chars(&self) -> usize {
        match self {
            Self::PurgeEvent { .. } => PURGE_MIN_REASON_CHARS,
            _ => MIN_REASON_CHARS,
        }
    }

    /// Targeted account, for user commands.
    #[must_use]
    pub const fn target_user(&self) -> Option<UserId> {
        match self {
            Self::RestoreUser { user_id }
            | Self::UnflagUser { user_id }
            | Self::RateLimitUser { user_id } => Some(*user_id),
            _ => None,
        }
    }

    /// Targeted event, for event commands.
    #[must_use]
    pub const fn target_event(&self) -> Option<EventId> {
        match self {
            Self::RestoreEvent { event_id }
            | Self::ArchiveEvent { event_id }
            | Self::PurgeEvent { event_id }
            | Self::DisableEvent { event_id } => Some(*event_id),
            _ => None,
        }
    }
}

/// Checks a reason against a minimum length, counting trimmed characters.
///
/// # Errors
///
/// Returns a message naming the required length.
pub fn validate_reason(reason: &str, min_chars: usize) -> Result<&str, String> {
    let trimmed = reason.trim();
    if trimmed.chars().count() < min_chars {
        return Err(format!("reason must be at least {min_chars} characters"));
    }
    Ok(trimmed)
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn purge_needs_twenty_characters() {
        let command = AdminCommand::PurgeEvent {
            event_id: EventId::new(),
        };
        assert!(validate_reason("too short", command.min_reason_chars()).is_err());
        assert!(
            validate_reason("spam campaign confirmed", command.min_reason_chars()).is_ok()
        );
    }

    #[test]
    fn whitespace_does_not_count() {
        assert!(validate_reason("   abc      ", KILL_SWITCH_MIN_REASON_CHARS).is_err());
        assert!(validate_reason("  ", MIN_REASON_CHARS).is_err());
    }

    #[test]
    fn commands_expose_their_target() {
        let user_id = UserId::new();
        let command = AdminCommand::UnflagUser { user_id };
        assert_eq!(command.target_user(), Some(user_id));
        assert_eq!(command.target_event(), None);
        assert_eq!(command.kind(), AdminActionKind::UnflagUser);
    }
}
