use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::value_objects::{OrderId, OrderStatus};

// ============================================================================
// Tracking Events - Append-only ledger entries
// ============================================================================

pub const ORDER_PLACED_LOCATION: &str = "Restaurant";
pub const ORDER_PLACED_MESSAGE: &str = "Your order has been received and is being prepared.";

/// One immutable status announcement for an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingEvent {
    pub order_id: OrderId,
    /// Per-order append position, starting at 1. Source of truth for "latest".
    pub sequence: i64,
    pub status: OrderStatus,
    pub location: String,
    pub message: String,
    pub recorded_at: DateTime<Utc>,
}

/// Status update as submitted by staff, before the ledger assigns a sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: OrderStatus,
    pub location: String,
    pub message: String,
}

impl StatusUpdate {
    pub fn new(
        status: OrderStatus,
        location: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status,
            location: location.into().trim().to_string(),
            message: message.into().trim().to_string(),
        }
    }

    pub fn order_placed() -> Self {
        Self::new(
            OrderStatus::order_placed(),
            ORDER_PLACED_LOCATION,
            ORDER_PLACED_MESSAGE,
        )
    }
}

/// The event that defines an order's current status: highest sequence wins,
/// regardless of timestamps.
pub fn current_event(events: &[TrackingEvent]) -> Option<&TrackingEvent> {
    events.iter().max_by_key(|e| e.sequence)
}

/// Display order: most recent first, ties broken by sequence.
pub fn sort_most_recent_first(events: &mut [TrackingEvent]) {
    events.sort_by(|a, b| {
        b.recorded_at
            .cmp(&a.recorded_at)
            .then_with(|| b.sequence.cmp(&a.sequence))
    });
}

// ============================================================================
// Unit Tests
// ============================================================================
