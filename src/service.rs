use std::sync::Arc;

use crate::domain::order::OrderLifecycleManager;
use crate::metrics::Metrics;
use crate::payment::{PaymentGateway, PaymentReconciler};
use crate::storage::Storage;
use crate::tracking::TrackingQueryService;

// ============================================================================
// Order Service - everything the transport layer talks to
// ============================================================================
//
// One storage handle, shared by every component, opened before this is
// built and closed through `shutdown`.
//
// ============================================================================

pub struct OrderService {
    storage: Arc<dyn Storage>,
    pub lifecycle: Arc<OrderLifecycleManager>,
    pub tracking: TrackingQueryService,
    /// Absent when no payment gateway is configured
    pub payments: Option<PaymentReconciler>,
}

impl OrderService {
    pub fn new(
        storage: Arc<dyn Storage>,
        metrics: Arc<Metrics>,
        gateway: Option<Arc<dyn PaymentGateway>>,
    ) -> Self {
        let lifecycle = Arc::new(OrderLifecycleManager::new(storage.clone(), metrics));
        let tracking = TrackingQueryService::new(storage.clone());
        let payments = gateway.map(|gateway| PaymentReconciler::new(lifecycle.clone(), gateway));

        tracing::info!(
            engine = storage.engine(),
            payments = payments.is_some(),
            "Order service assembled"
        );

        Self {
            storage,
            lifecycle,
            tracking,
            payments,
        }
    }

    pub fn engine(&self) -> &'static str {
        self.storage.engine()
    }

    /// Release the storage handle. Call once, after the transport has stopped.
    pub async fn shutdown(&self) {
        self.storage.close().await;
        tracing::info!(engine = self.storage.engine(), "Storage closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::OrderDraft;
    use crate::storage::MemoryStorage;

    #[tokio::test]
    async fn test_components_share_one_store() {
        let service = OrderService::new(
            Arc::new(MemoryStorage::new()),
            Arc::new(Metrics::new().unwrap()),
            None,
        );
        assert_eq!(service.engine(), "memory");
        assert!(service.payments.is_none());

        let order = service
            .lifecycle
            .create_order(OrderDraft {
                customer_name: "Ada".to_string(),
                customer_email: "a@x.com".to_string(),
                customer_phone: Some("+2348000000000".to_string()),
                items: "[]".to_string(),
                total_amount: "9.99".parse().unwrap(),
            })
            .await
            .unwrap();

        let view = service
            .tracking
            .lookup(order.tracking_token.as_str())
            .await
            .unwrap();
        assert_eq!(view.order.customer_phone.as_deref(), Some("+2348000000000"));

        service.shutdown().await;
    }
}
