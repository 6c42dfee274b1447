// ============================================================================
// Payment - gateway client and reconciliation of verified outcomes
// ============================================================================

pub mod gateway;
pub mod paystack;
pub mod reconciliation;

pub use gateway::{GatewayError, GatewayReference, PaymentGateway, Verification};
pub use paystack::{PaystackClient, PaystackConfig};
pub use reconciliation::{PaymentReconciler, Reconciliation};
