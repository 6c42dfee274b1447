use super::value_objects::PaymentStatus;
use crate::storage::StoreError;
use crate::utils::IsTransient;

// ============================================================================
// Order Lifecycle Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OrderError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid payment transition: {from} -> {to}")]
    InvalidTransition {
        from: PaymentStatus,
        to: PaymentStatus,
    },

    #[error("Caller is not authorized for this operation")]
    Unauthorized,

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<StoreError> for OrderError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => OrderError::NotFound(what),
            StoreError::Unavailable(msg) => OrderError::StorageUnavailable(msg),
            other => OrderError::Storage(other.to_string()),
        }
    }
}

impl IsTransient for OrderError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            OrderError::StorageUnavailable(_) | OrderError::GatewayUnavailable(_)
        )
    }
}
