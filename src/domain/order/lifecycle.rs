use std::sync::Arc;
use std::time::Instant;

use crate::auth::AdminGrant;
use crate::metrics::Metrics;
use crate::storage::{Storage, StoreError};

use super::errors::OrderError;
use super::events::{StatusUpdate, TrackingEvent};
use super::projection::{Order, OrderDraft, ValidatedDraft};
use super::value_objects::{OrderId, PaymentOutcome, PaymentStatus, TrackingToken};

// ============================================================================
// Order Lifecycle Manager
// ============================================================================
//
// Orchestrates: Draft → Order row + first ledger entry
//               Status update → ledger entry + projection update
//               Payment outcome → payment status
//
// Each operation is one storage transaction. The order row is read through
// the write transaction first, which locks it, so concurrent updates to the
// same order queue up and the last commit decides the current status.
//
// ============================================================================

/// Fresh tokens to draw before giving up on a create.
const TOKEN_ATTEMPTS: u32 = 3;

pub struct OrderLifecycleManager {
    storage: Arc<dyn Storage>,
    metrics: Arc<Metrics>,
}

impl OrderLifecycleManager {
    pub fn new(storage: Arc<dyn Storage>, metrics: Arc<Metrics>) -> Self {
        Self { storage, metrics }
    }

    /// Validate the draft, then insert the order together with its
    /// "Order Placed" entry.
    pub async fn create_order(&self, draft: OrderDraft) -> Result<Order, OrderError> {
        let started = Instant::now();

        let draft = draft.validate().inspect_err(|e| {
            tracing::debug!(error = %e, "Rejected order draft");
        })?;

        let result = self.insert_with_first_event(&draft).await;
        self.observe("create_order", started, &result);

        let order = result?;
        self.metrics.record_order_created();

        tracing::info!(
            order_id = %order.id,
            tracking_token = %order.tracking_token,
            total = %order.total,
            "✅ Order created"
        );

        Ok(order)
    }

    async fn insert_with_first_event(&self, draft: &ValidatedDraft) -> Result<Order, OrderError> {
        for attempt in 1..=TOKEN_ATTEMPTS {
            let token = TrackingToken::generate();
            let mut tx = self.storage.begin().await?;

            let order = match tx.create(draft, &token).await {
                Ok(order) => order,
                Err(StoreError::DuplicateTrackingToken) => {
                    tracing::warn!(attempt = attempt, "Tracking token collision, drawing again");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            tx.append(order.id, &StatusUpdate::order_placed()).await?;
            tx.commit().await?;

            return Ok(order);
        }

        Err(OrderError::Storage(format!(
            "no unique tracking token after {} attempts",
            TOKEN_ATTEMPTS
        )))
    }

    /// Append a status entry and move the order's status to match.
    ///
    /// Repeating the current status appends a new entry (a re-announcement)
    /// and leaves the order row as it is. Updates after a terminal status are
    /// accepted and logged.
    pub async fn record_status_update(
        &self,
        grant: &AdminGrant,
        order_id: OrderId,
        update: StatusUpdate,
    ) -> Result<TrackingEvent, OrderError> {
        let started = Instant::now();
        let result = self.append_and_project(order_id, &update).await;
        self.observe("record_status_update", started, &result);

        let event = result?;
        self.metrics.record_status_update(event.status.is_terminal());

        tracing::info!(
            order_id = %order_id,
            sequence = event.sequence,
            status = %event.status,
            location = %event.location,
            principal = ?grant.principal(),
            "Order status updated"
        );

        Ok(event)
    }

    async fn append_and_project(
        &self,
        order_id: OrderId,
        update: &StatusUpdate,
    ) -> Result<TrackingEvent, OrderError> {
        let mut tx = self.storage.begin().await?;

        // Locks the row until commit
        let order = tx.get_by_id(order_id).await?;
        if order.is_finished() {
            tracing::warn!(
                order_id = %order_id,
                current = %order.status,
                requested = %update.status,
                "Status update on an order that already reached a terminal status"
            );
        }

        let event = tx.append(order_id, update).await?;
        let changed = tx.update_status(order_id, &event.status.projected()).await?;
        tx.commit().await?;

        if !changed {
            tracing::debug!(
                order_id = %order_id,
                status = %event.status,
                "Status re-announced, projection unchanged"
            );
        }

        Ok(event)
    }

    /// Apply a verified payment outcome under the forward-only rule.
    ///
    /// Moving away from `paid` is refused with `InvalidTransition` and leaves
    /// the order untouched. Re-applying the current status is a no-op.
    pub async fn apply_payment_result(
        &self,
        order_id: OrderId,
        outcome: PaymentOutcome,
    ) -> Result<Order, OrderError> {
        let started = Instant::now();
        let result = self.transition_payment(order_id, outcome).await;
        self.observe("apply_payment_result", started, &result);

        match &result {
            Ok(order) => {
                self.metrics.record_payment_result(order.payment_status.as_str());
            }
            Err(OrderError::InvalidTransition { from, to }) => {
                self.metrics.record_rejected_transition();
                tracing::warn!(
                    order_id = %order_id,
                    from = %from,
                    to = %to,
                    "Refused payment status change"
                );
            }
            Err(_) => {}
        }

        result
    }

    async fn transition_payment(
        &self,
        order_id: OrderId,
        outcome: PaymentOutcome,
    ) -> Result<Order, OrderError> {
        let mut tx = self.storage.begin().await?;
        let mut order = tx.get_by_id(order_id).await?;

        let Some(next) = order.payment_transition(outcome)? else {
            tx.commit().await?;
            tracing::debug!(
                order_id = %order_id,
                payment_status = %order.payment_status,
                "Payment outcome already applied"
            );
            return Ok(order);
        };

        tx.update_payment_status(order_id, next).await?;
        tx.commit().await?;

        tracing::info!(
            order_id = %order_id,
            from = %order.payment_status,
            payment_status = %next,
            "💳 Payment status updated"
        );

        order.payment_status = next;
        Ok(order)
    }

    /// Remember a gateway reference issued for this order's payment. It
    /// becomes the current reference; earlier ones stay reconcilable.
    /// A paid order accepts no new reference.
    pub async fn attach_payment_reference(
        &self,
        order_id: OrderId,
        reference: &str,
    ) -> Result<Order, OrderError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(OrderError::Validation("payment reference cannot be empty".to_string()));
        }

        let mut tx = self.storage.begin().await?;
        let mut order = tx.get_by_id(order_id).await?;

        if order.payment_status == PaymentStatus::Paid {
            return Err(OrderError::Validation(format!(
                "order {} is already {}",
                order_id, order.payment_status
            )));
        }

        tx.set_payment_reference(order_id, reference).await?;
        tx.commit().await?;

        tracing::info!(order_id = %order_id, reference = %reference, "Payment reference recorded");

        order.payment_reference = Some(reference.to_string());
        Ok(order)
    }

    pub async fn get_order(&self, order_id: OrderId) -> Result<Order, OrderError> {
        let mut tx = self.storage.begin_read().await?;
        Ok(tx.get_by_id(order_id).await?)
    }

    /// Every gateway reference ever issued for the order, oldest first.
    pub async fn payment_references(&self, order_id: OrderId) -> Result<Vec<String>, OrderError> {
        let mut tx = self.storage.begin_read().await?;
        Ok(tx.payment_references(order_id).await?)
    }

    /// Every order, newest first.
    pub async fn list_orders(&self, grant: &AdminGrant) -> Result<Vec<Order>, OrderError> {
        let started = Instant::now();

        let result = async {
            let mut tx = self.storage.begin_read().await?;
            Ok::<_, OrderError>(tx.list_all().await?)
        }
        .await;
        self.observe("list_orders", started, &result);

        let orders = result?;
        tracing::debug!(
            count = orders.len(),
            principal = ?grant.principal(),
            "Listed orders"
        );

        Ok(orders)
    }

    fn observe<T>(&self, operation: &str, started: Instant, result: &Result<T, OrderError>) {
        self.metrics
            .observe_duration(operation, started.elapsed().as_secs_f64());

        let kind = match result {
            Err(OrderError::StorageUnavailable(_)) => "unavailable",
            Err(OrderError::Storage(_)) => "backend",
            _ => return,
        };

        self.metrics.record_store_failure(operation, kind);
        if let Err(e) = result {
            tracing::error!(operation = operation, error = %e, "Unit of work failed, nothing written");
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
