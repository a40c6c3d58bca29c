//! Guest RSVPs.

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use super::EventId;

/// Minimum digits in a normalised phone number.
pub const PHONE_MIN_DIGITS: usize = 7;

/// Maximum digits in a normalised phone number (E.164).
pub const PHONE_MAX_DIGITS: usize = 15;

/// A guest reply to an invitation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Rsvp {
    /// Row identifier.
    pub id: uuid::Uuid,
    /// Event replied to.
    #[schema(value_type = uuid::Uuid)]
    pub event_id: EventId,
    /// Guest name.
    pub name: String,
    /// Normalised phone digits; unique per event.
    pub phone: String,
    /// Whether the guest attends.
    pub attending: bool,
    /// Optional note to the host.
    pub message: Option<String>,
    /// Door check-in time.
    pub checked_in_at: Option<DateTime<Utc>>,
    /// Submission time.
    pub created_at: DateTime<Utc>,
}

impl Rsvp {
    /// Creates a not-yet-checked-in RSVP.
    #[must_use]
    pub fn new(
        event_id: EventId,
        name: String,
        phone: String,
        attending: bool,
        message: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            event_id,
            name,
            phone,
            attending,
            message,
            checked_in_at: None,
            created_at: now,
        }
    }
}

/// Strips formatting from a phone number and validates its length.
///
/// Returns `None` when the number has too few or too many digits.
#[must_use]
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    (PHONE_MIN_DIGITS..=PHONE_MAX_DIGITS)
        .contains(&digits.len())
        .then_some(digits)
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn phone_formatting_is_stripped() {
        assert_eq!(
            normalize_phone("+60 (12) 345-6789").as_deref(),
            Some("60123456789")
        );
    }

    #[test]
    fn phone_length_is_bounded() {
        assert_eq!(normalize_phone("12345"), None);
        assert_eq!(normalize_phone("1234567890123456"), None);
        assert!(normalize_phone("1234567").is_some());
    }
}
