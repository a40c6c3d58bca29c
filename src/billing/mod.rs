//! Payment gateway collaborator: bill creation and webhook signatures.

pub mod client;
pub mod signature;

pub use client::{
    Bill, BillRequest, BillingError, HttpPaymentGateway, PaymentGateway, SandboxPaymentGateway,
};
pub use signature::{SIGNATURE_HEADER, SignatureError, WebhookVerifier};
