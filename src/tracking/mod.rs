mod view;

pub use view::{HistoryEntry, OrderSnapshot, TrackingView};

use std::sync::Arc;

use crate::domain::order::{OrderError, TrackingToken};
use crate::storage::Storage;

// ============================================================================
// Tracking Query Service - public lookup by tracking token
// ============================================================================
//
// Read-only. Order and history come from one read transaction, so a lookup
// racing a status update sees the state either before or after it, never
// half of it.
//
// ============================================================================

pub struct TrackingQueryService {
    storage: Arc<dyn Storage>,
}

impl TrackingQueryService {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Unknown, blank and malformed tokens all answer `NotFound`.
    pub async fn lookup(&self, token: &str) -> Result<TrackingView, OrderError> {
        let token = TrackingToken::parse(token)
            .map_err(|_| OrderError::NotFound("tracking token".to_string()))?;

        let mut tx = self.storage.begin_read().await?;
        let order = tx.get_by_tracking_token(&token).await?;
        let events = tx.list_for_order(order.id).await?;
        drop(tx);

        tracing::debug!(
            tracking_token = %token,
            status = %order.status,
            events = events.len(),
            "Tracking lookup"
        );

        Ok(TrackingView {
            order: order.into(),
            history: events.into_iter().map(HistoryEntry::from).collect(),
        })
    }
}
