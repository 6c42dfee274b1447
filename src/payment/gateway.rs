use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::order::OrderError;

// ============================================================================
// Payment Gateway Client contract
// ============================================================================

/// Handle returned when a payment is opened with the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayReference {
    pub reference: String,
    /// Where the customer completes the payment
    pub authorization_url: Option<String>,
    pub access_code: Option<String>,
}

/// What the gateway says about a payment when asked server-side.
#[derive(Debug, Clone, PartialEq)]
pub struct Verification {
    pub reference: String,
    /// True only when the gateway reports the charge as settled
    pub confirmed: bool,
    /// Gateway vocabulary, e.g. "success", "abandoned"
    pub status: String,
    /// Amount actually charged, in minor units
    pub amount_minor: u64,
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    /// Network failure, timeout, 5xx, or open circuit. Safe to retry later.
    #[error("Gateway unavailable: {0}")]
    Unavailable(String),

    #[error("Gateway rejected request: HTTP {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Unexpected gateway response: {0}")]
    Malformed(String),
}

impl From<GatewayError> for OrderError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Unavailable(msg) => OrderError::GatewayUnavailable(msg),
            GatewayError::Rejected { status: 404, message } => {
                OrderError::NotFound(format!("payment ({})", message))
            }
            GatewayError::Rejected { message, .. } => OrderError::Validation(message),
            GatewayError::Malformed(msg) => OrderError::GatewayUnavailable(msg),
        }
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Open a payment for `amount_minor` (smallest currency unit).
    async fn initialize(
        &self,
        amount_minor: u64,
        email: &str,
    ) -> Result<GatewayReference, GatewayError>;

    async fn verify(&self, reference: &str) -> Result<Verification, GatewayError>;
}
