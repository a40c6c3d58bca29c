//! DTOs for event, RSVP and usage endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::{Event, LifecycleState, PaymentState, Rsvp};
use crate::service::event_service::{NewEvent, RsvpSubmission};

/// Request body for `POST /api/v1/events`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateEventRequest {
    /// Display title, 1 to 200 characters.
    pub title: String,
    /// Event start (RFC 3339).
    #[serde(default)]
    pub starts_at: Option<DateTime<Utc>>,
    /// Event end (RFC 3339). Must be after the start.
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
}

impl From<CreateEventRequest> for NewEvent {
    fn from(req: CreateEventRequest) -> Self {
        Self {
            title: req.title,
            starts_at: req.starts_at,
            ends_at: req.ends_at,
        }
    }
}

/// An event as returned to its owner.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EventResponse {
    /// Event identifier.
    pub event_id: uuid::Uuid,
    /// Owning account.
    pub owner_id: uuid::Uuid,
    /// Display title.
    pub title: String,
    /// Custom public slug.
    pub slug: Option<String>,
    /// Publication stage.
    pub lifecycle_state: LifecycleState,
    /// Settlement status.
    pub payment_state: PaymentState,
    /// Event start.
    pub starts_at: Option<DateTime<Utc>>,
    /// Event end.
    pub ends_at: Option<DateTime<Utc>>,
    /// End of the post-event grace window.
    pub cooldown_until: Option<DateTime<Utc>>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification.
    pub updated_at: DateTime<Utc>,
}

impl From<Event> for EventResponse {
    fn from(event: Event) -> Self {
        Self {
            event_id: event.id.into(),
            owner_id: event.owner_id.into(),
            title: event.title,
            slug: event.slug,
            lifecycle_state: event.lifecycle_state,
            payment_state: event.payment_state,
            starts_at: event.starts_at,
            ends_at: event.ends_at,
            cooldown_until: event.cooldown_until,
            created_at: event.created_at,
            updated_at: event.updated_at,
        }
    }
}

/// Request body for `POST /api/v1/events/{id}/rsvps`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RsvpRequest {
    /// Guest name.
    pub name: String,
    /// Guest phone; formatting is stripped.
    pub phone: String,
    /// Whether the guest will attend.
    pub attending: bool,
    /// Optional note to the host.
    #[serde(default)]
    pub message: Option<String>,
}

impl From<RsvpRequest> for RsvpSubmission {
    fn from(req: RsvpRequest) -> Self {
        Self {
            name: req.name,
            phone: req.phone,
            attending: req.attending,
            message: req.message,
        }
    }
}

/// Request body for `POST /api/v1/events/{id}/checkins`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CheckInRequest {
    /// RSVP to mark as arrived.
    pub rsvp_id: uuid::Uuid,
}

/// Request body for `PUT /api/v1/events/{id}/slug`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SlugRequest {
    /// New slug, or `null` to clear it.
    pub slug: Option<String>,
}

/// Response for `GET /api/v1/events/{id}/export`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RsvpExportResponse {
    /// Number of replies.
    pub count: usize,
    /// Every reply, oldest first.
    pub rsvps: Vec<Rsvp>,
}

/// Response for `POST /api/v1/events/{id}/views`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ViewResponse {
    /// Views counted so far.
    pub views: i64,
    /// View quota of the package.
    pub max_views: i64,
}
