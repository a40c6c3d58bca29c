//! OpenAPI document for the REST surface.

use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::api::dto::{
    AdminActionName, AdminActionRequest, AuditListResponse, CheckInRequest, CheckoutRequest,
    CheckoutResponse, CreateEventRequest, EventResponse, KillSwitchRequest, RsvpExportResponse,
    RsvpRequest, SlugRequest, VerifyPaymentRequest, ViewResponse, WebhookResponse,
};
use crate::api::handlers::{admin, events, payments, system};
use crate::domain::{Entitlement, LifecycleState, PackageTier, PaymentOrder, PaymentState, Rsvp};
use crate::error::{ErrorBody, ErrorResponse};
use crate::service::admin_override::OverrideOutcome;
use crate::service::entitlement::PackageOffer;

/// Aggregated API description served at `/api-docs/openapi.json`.
#[derive(Debug, OpenApi)]
#[openapi(
    info(
        title = "invite-gateway",
        description = "Entitlement, lifecycle and abuse-protection engine for event invitations"
    ),
    paths(
        system::health_handler,
        system::packages_handler,
        events::create_event,
        events::get_event,
        events::submit_rsvp,
        events::record_view,
        events::check_in,
        events::export_rsvps,
        events::set_slug,
        events::get_entitlement,
        events::create_checkout,
        payments::payment_webhook,
        admin::run_action,
        admin::kill_switch,
        admin::verify_payment,
        admin::audit_entries,
    ),
    components(schemas(
        ErrorResponse,
        ErrorBody,
        CreateEventRequest,
        EventResponse,
        RsvpRequest,
        CheckInRequest,
        SlugRequest,
        RsvpExportResponse,
        ViewResponse,
        CheckoutRequest,
        CheckoutResponse,
        WebhookResponse,
        AdminActionName,
        AdminActionRequest,
        KillSwitchRequest,
        VerifyPaymentRequest,
        AuditListResponse,
        OverrideOutcome,
        PackageOffer,
        Entitlement,
        Rsvp,
        PaymentOrder,
        PackageTier,
        LifecycleState,
        PaymentState,
    )),
    modifiers(&BearerAuth),
    tags(
        (name = "System", description = "Health and catalogue"),
        (name = "Events", description = "Owner event management"),
        (name = "Guests", description = "Public guest endpoints"),
        (name = "Payments", description = "Checkout and gateway confirmation"),
        (name = "Admin", description = "Super-admin overrides and audit")
    )
)]
pub struct ApiDoc;

/// Registers the `bearer` session-token scheme.
#[derive(Debug)]
struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/health",
            "/config/packages",
            "/api/v1/events",
            "/api/v1/events/{id}/rsvps",
            "/api/v1/payments/webhook",
            "/api/v1/admin/kill-switch",
            "/api/v1/admin/audit",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
        let Some(components) = doc.components else {
            panic!("components missing");
        };
        assert!(components.security_schemes.contains_key("bearer"));
    }
}
