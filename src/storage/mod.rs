// ============================================================================
// Storage - durable home of the order projection and the tracking ledger
// ============================================================================
//
// Relations:
// - orders              one row per order, current projection (Order Store)
// - tracking_events     append-only, keyed by (order_id, sequence) (Tracking Ledger)
// - payment_references  every gateway reference issued for an order
//
// Every write goes through a `Transaction`, which implements both contracts,
// so "mutate projection + append ledger entry" commits or vanishes as a unit.
// Dropping a transaction without `commit` rolls it back.
//
// ============================================================================

mod memory;
mod postgres;

pub use memory::{FaultPoint, MemoryStorage};
pub use postgres::{PgStorage, PgStorageConfig};

use async_trait::async_trait;

use crate::domain::order::{
    Order, OrderId, OrderStatus, PaymentStatus, StatusUpdate, TrackingEvent, TrackingToken,
    ValidatedDraft,
};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Tracking token already issued")]
    DuplicateTrackingToken,

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Write attempted in a read-only transaction")]
    ReadOnly,

    #[error("Backend error: {0}")]
    Backend(String),
}

/// Current-state projection of orders.
#[async_trait]
pub trait OrderStore: Send {
    /// Insert a new order with `status = pending`, `payment_status = pending`.
    async fn create(
        &mut self,
        draft: &ValidatedDraft,
        token: &TrackingToken,
    ) -> Result<Order, StoreError>;

    /// In a write transaction this also locks the order until commit.
    async fn get_by_id(&mut self, id: OrderId) -> Result<Order, StoreError>;

    async fn get_by_tracking_token(&mut self, token: &TrackingToken) -> Result<Order, StoreError>;

    /// All orders, newest first.
    async fn list_all(&mut self) -> Result<Vec<Order>, StoreError>;

    /// Returns `false` when the order already had this status.
    async fn update_status(&mut self, id: OrderId, status: &OrderStatus)
        -> Result<bool, StoreError>;

    /// Returns `false` when the order already had this payment status.
    async fn update_payment_status(
        &mut self,
        id: OrderId,
        status: PaymentStatus,
    ) -> Result<bool, StoreError>;

    /// Make `reference` the order's current gateway reference. Every
    /// reference ever set stays on record for `payment_references`.
    async fn set_payment_reference(&mut self, id: OrderId, reference: &str)
        -> Result<(), StoreError>;

    /// Gateway references issued for this order, oldest first.
    async fn payment_references(&mut self, id: OrderId) -> Result<Vec<String>, StoreError>;
}

/// Append-only status history.
#[async_trait]
pub trait TrackingLedger: Send {
    /// Assigns the next per-order sequence number and a timestamp no earlier
    /// than the order's previous entry.
    async fn append(
        &mut self,
        order_id: OrderId,
        update: &StatusUpdate,
    ) -> Result<TrackingEvent, StoreError>;

    /// Most recent first.
    async fn list_for_order(&mut self, order_id: OrderId) -> Result<Vec<TrackingEvent>, StoreError>;
}

#[async_trait]
pub trait Transaction: OrderStore + TrackingLedger {
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// Process-wide store handle: opened at startup, closed at shutdown, shared
/// by every component.
#[async_trait]
pub trait Storage: Send + Sync {
    fn engine(&self) -> &'static str;

    /// Write transaction. Writers touching the same order are serialized.
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError>;

    /// Read-only transaction over a single committed snapshot.
    async fn begin_read(&self) -> Result<Box<dyn Transaction>, StoreError>;

    async fn close(&self);
}
