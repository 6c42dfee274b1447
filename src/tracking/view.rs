use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::order::{Money, Order, OrderStatus, PaymentStatus, TrackingEvent};

// ============================================================================
// Customer-facing views
// ============================================================================
//
// Whitelist of what the public tracking lookup may show. Internal ids,
// ledger sequence numbers and the gateway reference stay behind.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderSnapshot {
    pub tracking_token: String,
    pub customer_name: String,
    pub customer_email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_phone: Option<String>,
    pub items: String,
    pub total: Money,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub created_at: DateTime<Utc>,
}

impl From<Order> for OrderSnapshot {
    fn from(order: Order) -> Self {
        Self {
            tracking_token: order.tracking_token.as_str().to_string(),
            customer_name: order.customer.name,
            customer_email: order.customer.email,
            customer_phone: order.customer.phone,
            items: order.items,
            total: order.total,
            status: order.status,
            payment_status: order.payment_status,
            created_at: order.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub status: OrderStatus,
    pub location: String,
    pub message: String,
    pub recorded_at: DateTime<Utc>,
}

impl From<TrackingEvent> for HistoryEntry {
    fn from(event: TrackingEvent) -> Self {
        Self {
            status: event.status,
            location: event.location,
            message: event.message,
            recorded_at: event.recorded_at,
        }
    }
}

/// Order plus its full history, most recent first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackingView {
    pub order: OrderSnapshot,
    pub history: Vec<HistoryEntry>,
}
