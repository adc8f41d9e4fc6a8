//! External collaborators: automation backend, payment provider, notifier
//! and verification issuers.
//!
//! Each collaborator is an object-safe async trait so services hold an
//! `Arc<dyn ...>`. The crate ships one implementation of each that works
//! without outside services; real integrations plug in at the same seams.
//!
//! Automation calls report failures as [`crate::error::ShopError::Retryable`],
//! [`crate::error::ShopError::Fatal`] or
//! [`crate::error::ShopError::InProgress`]; the scheduler decides whether to
//! try again from that kind alone.

pub mod automation;
pub mod notifier;
pub mod payment;
pub mod verification;

pub use automation::{
    AutomationProvider, InstanceStatus, ProvisionRequest, ProvisionedHost, ResizeTarget,
    SimulatedAutomation,
};
pub use notifier::{LogNotifier, Notifier, render_template};
pub use payment::{ManualPaymentProvider, PaymentCallback, PaymentInstructions, PaymentProvider};
pub use verification::{
    CaptchaChallenge, CaptchaIssuer, IssuedCode, StoreCaptchaIssuer, StoreVerificationIssuer,
    VerificationIssuer,
};
