//! Services module for business logic and integrations

pub mod callback_reconciler;
pub mod checkout_initiator;
pub mod diagnostic;
pub mod domain_events;
pub mod notification;
pub mod visit_payment;

pub use callback_reconciler::{CallbackReconciler, ReconcileResult};
pub use checkout_initiator::{CheckoutInitiator, InitiateResult, RetryPolicy};
pub use domain_events::DomainEventHook;
pub use visit_payment::VisitPaymentService;
