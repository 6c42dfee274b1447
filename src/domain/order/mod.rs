// ============================================================================
// Order Domain - lifecycle and tracking of a food order
// ============================================================================
//
// - Value objects (OrderId, TrackingToken, Money, OrderStatus, ...)
// - Tracking events (append-only ledger entries)
// - Projection (Order, the current state kept in step with the ledger)
// - Errors (OrderError)
// - Lifecycle manager (every mutation goes through here)
//
// ============================================================================

pub mod errors;
pub mod events;
pub mod lifecycle;
pub mod projection;
pub mod value_objects;

pub use errors::*;
pub use events::*;
pub use lifecycle::*;
pub use projection::*;
pub use value_objects::*;
