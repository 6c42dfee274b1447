use std::sync::Arc;

use crate::domain::order::{
    Order, OrderError, OrderId, OrderLifecycleManager, PaymentOutcome, PaymentStatus,
};

use super::gateway::{GatewayReference, PaymentGateway, Verification};

// ============================================================================
// Payment Reconciliation
// ============================================================================
//
// initiate:  order total → minor units → gateway.initialize → reference on order
// reconcile: reference check → gateway.verify → amount check → payment outcome
//
// A client never tells us a payment succeeded. We ask the gateway, and only
// about references we issued for that order. Every issued reference stays
// reconcilable: a customer who paid on the first checkout after a second
// one was opened still gets their payment applied. A failure reported for a
// superseded reference does not touch the order.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    /// Outcome applied; the order as it now stands
    Applied(Order),
    /// Gateway has no final answer yet ("ongoing", "pending", ...)
    StillPending(Order),
}

pub struct PaymentReconciler {
    lifecycle: Arc<OrderLifecycleManager>,
    gateway: Arc<dyn PaymentGateway>,
}

impl PaymentReconciler {
    pub fn new(lifecycle: Arc<OrderLifecycleManager>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { lifecycle, gateway }
    }

    /// Open a gateway payment for the order's total and remember its reference.
    /// Allowed while the order is unpaid, including after a failed attempt.
    pub async fn initiate(&self, order_id: OrderId) -> Result<GatewayReference, OrderError> {
        let order = self.lifecycle.get_order(order_id).await?;
        if order.payment_status == PaymentStatus::Paid {
            return Err(OrderError::Validation(format!(
                "order {} is already {}",
                order_id, order.payment_status
            )));
        }

        let amount_minor = order.total.to_minor_units();
        let reference = self
            .gateway
            .initialize(amount_minor, &order.customer.email)
            .await
            .inspect_err(|e| tracing::warn!(order_id = %order_id, error = %e, "Payment initialization failed"))?;

        self.lifecycle
            .attach_payment_reference(order_id, &reference.reference)
            .await?;

        tracing::info!(
            order_id = %order_id,
            reference = %reference.reference,
            amount_minor = amount_minor,
            "Payment initiated"
        );

        Ok(reference)
    }

    /// Ask the gateway about `reference` and apply the answer to the order.
    pub async fn reconcile(
        &self,
        order_id: OrderId,
        reference: &str,
    ) -> Result<Reconciliation, OrderError> {
        let reference = reference.trim();
        let order = self.lifecycle.get_order(order_id).await?;
        let issued = self.lifecycle.payment_references(order_id).await?;

        if !issued.iter().any(|r| r == reference) {
            tracing::warn!(
                order_id = %order_id,
                reference = %reference,
                "Payment reference does not belong to this order"
            );
            return Err(OrderError::Validation(
                "payment reference does not match this order".to_string(),
            ));
        }

        let verification = self.gateway.verify(reference).await.inspect_err(|e| {
            tracing::warn!(order_id = %order_id, error = %e, "Payment verification failed")
        })?;

        let Some(outcome) = outcome_for(&order, reference, &verification) else {
            tracing::debug!(
                order_id = %order_id,
                gateway_status = %verification.status,
                "Payment not settled yet"
            );
            return Ok(Reconciliation::StillPending(order));
        };

        let superseded = order.payment_reference.as_deref() != Some(reference);
        if outcome == PaymentOutcome::Failed && superseded {
            tracing::info!(
                order_id = %order_id,
                reference = %reference,
                "Failure on a superseded payment attempt, order left as is"
            );
            return Ok(Reconciliation::StillPending(order));
        }

        let order = self.lifecycle.apply_payment_result(order_id, outcome).await?;
        Ok(Reconciliation::Applied(order))
    }
}

/// Translate the gateway's verdict into ours. `None` means no decision yet.
fn outcome_for(
    order: &Order,
    reference: &str,
    verification: &Verification,
) -> Option<PaymentOutcome> {
    if verification.reference != reference {
        tracing::warn!(
            order_id = %order.id,
            verified = %verification.reference,
            "Gateway answered for a different reference"
        );
        return Some(PaymentOutcome::Failed);
    }

    match verification.status.to_ascii_lowercase().as_str() {
        "success" if verification.confirmed => {
            let expected = order.total.to_minor_units();
            if verification.amount_minor < expected {
                tracing::warn!(
                    order_id = %order.id,
                    expected_minor = expected,
                    charged_minor = verification.amount_minor,
                    "Charged amount below order total"
                );
                return Some(PaymentOutcome::Failed);
            }
            Some(PaymentOutcome::Paid)
        }
        "failed" | "abandoned" | "reversed" => Some(PaymentOutcome::Failed),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::OrderDraft;
    use crate::metrics::Metrics;
    use crate::payment::gateway::GatewayError;
    use crate::storage::MemoryStorage;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Hands out sequential references and replays scripted verify answers.
    #[derive(Default)]
    struct ScriptedGateway {
        initialized: Mutex<Vec<(u64, String)>>,
        verdicts: Mutex<VecDeque<Result<(String, u64), GatewayError>>>,
    }

    impl ScriptedGateway {
        fn answer(&self, status: &str, amount_minor: u64) {
            self.verdicts
                .lock()
                .unwrap()
                .push_back(Ok((status.to_string(), amount_minor)));
        }

        fn fail(&self, err: GatewayError) {
            self.verdicts.lock().unwrap().push_back(Err(err));
        }
    }

    #[async_trait]
    impl PaymentGateway for ScriptedGateway {
        async fn initialize(
            &self,
            amount_minor: u64,
            email: &str,
        ) -> Result<GatewayReference, GatewayError> {
            let mut calls = self.initialized.lock().unwrap();
            calls.push((amount_minor, email.to_string()));
            Ok(GatewayReference {
                reference: format!("ref_{}", calls.len()),
                authorization_url: None,
                access_code: None,
            })
        }

        async fn verify(&self, reference: &str) -> Result<Verification, GatewayError> {
            let (status, amount_minor) = self
                .verdicts
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(GatewayError::Unavailable("no script".to_string())))?;

            Ok(Verification {
                reference: reference.to_string(),
                confirmed: status == "success",
                status,
                amount_minor,
                raw: serde_json::Value::Null,
            })
        }
    }

    async fn setup() -> (PaymentReconciler, Arc<ScriptedGateway>, Arc<OrderLifecycleManager>, Order) {
        let lifecycle = Arc::new(OrderLifecycleManager::new(
            Arc::new(MemoryStorage::new()),
            Arc::new(Metrics::new().unwrap()),
        ));
        let gateway = Arc::new(ScriptedGateway::default());
        let reconciler = PaymentReconciler::new(lifecycle.clone(), gateway.clone());

        let order = lifecycle
            .create_order(OrderDraft {
                customer_name: "Ada".to_string(),
                customer_email: "a@x.com".to_string(),
                customer_phone: None,
                items: "[]".to_string(),
                total_amount: "25.50".parse().unwrap(),
            })
            .await
            .unwrap();

        (reconciler, gateway, lifecycle, order)
    }

    #[tokio::test]
    async fn test_initiate_sends_minor_units_and_records_reference() {
        let (reconciler, gateway, lifecycle, order) = setup().await;

        let reference = reconciler.initiate(order.id).await.unwrap();
        assert_eq!(reference.reference, "ref_1");
        assert_eq!(
            gateway.initialized.lock().unwrap().as_slice(),
            &[(2550, "a@x.com".to_string())]
        );

        let stored = lifecycle.get_order(order.id).await.unwrap();
        assert_eq!(stored.payment_reference.as_deref(), Some("ref_1"));
    }

    #[tokio::test]
    async fn test_successful_verification_marks_paid() {
        let (reconciler, gateway, _, order) = setup().await;
        reconciler.initiate(order.id).await.unwrap();

        gateway.answer("success", 2550);
        let result = reconciler.reconcile(order.id, "ref_1").await.unwrap();

        match result {
            Reconciliation::Applied(order) => assert_eq!(order.payment_status, PaymentStatus::Paid),
            other => panic!("expected applied, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_foreign_reference_refused_without_asking_gateway() {
        let (reconciler, gateway, lifecycle, order) = setup().await;
        reconciler.initiate(order.id).await.unwrap();

        gateway.answer("success", 2550);
        let result = reconciler.reconcile(order.id, "ref_someone_else").await;
        assert!(matches!(result, Err(OrderError::Validation(_))));

        // Script untouched, order untouched
        assert_eq!(gateway.verdicts.lock().unwrap().len(), 1);
        let stored = lifecycle.get_order(order.id).await.unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_underpaid_success_counts_as_failed() {
        let (reconciler, gateway, _, order) = setup().await;
        reconciler.initiate(order.id).await.unwrap();

        gateway.answer("success", 100);
        let result = reconciler.reconcile(order.id, "ref_1").await.unwrap();

        match result {
            Reconciliation::Applied(order) => assert_eq!(order.payment_status, PaymentStatus::Failed),
            other => panic!("expected applied, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ongoing_payment_left_pending() {
        let (reconciler, gateway, _, order) = setup().await;
        reconciler.initiate(order.id).await.unwrap();

        gateway.answer("ongoing", 0);
        let result = reconciler.reconcile(order.id, "ref_1").await.unwrap();
        assert!(matches!(result, Reconciliation::StillPending(_)));
    }

    #[tokio::test]
    async fn test_gateway_outage_surfaces_without_change() {
        let (reconciler, gateway, lifecycle, order) = setup().await;
        reconciler.initiate(order.id).await.unwrap();

        gateway.fail(GatewayError::Unavailable("connection reset".to_string()));
        let result = reconciler.reconcile(order.id, "ref_1").await;
        assert!(matches!(result, Err(OrderError::GatewayUnavailable(_))));

        let stored = lifecycle.get_order(order.id).await.unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_reversal_after_paid_is_invalid_transition() {
        let (reconciler, gateway, lifecycle, order) = setup().await;
        reconciler.initiate(order.id).await.unwrap();

        gateway.answer("success", 2550);
        reconciler.reconcile(order.id, "ref_1").await.unwrap();

        gateway.answer("reversed", 2550);
        let result = reconciler.reconcile(order.id, "ref_1").await;
        assert!(matches!(result, Err(OrderError::InvalidTransition { .. })));

        let stored = lifecycle.get_order(order.id).await.unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Paid);
    }

    #[tokio::test]
    async fn test_retry_after_failed_payment_ends_paid() {
        let (reconciler, gateway, lifecycle, order) = setup().await;
        reconciler.initiate(order.id).await.unwrap();

        gateway.answer("failed", 0);
        match reconciler.reconcile(order.id, "ref_1").await.unwrap() {
            Reconciliation::Applied(order) => assert_eq!(order.payment_status, PaymentStatus::Failed),
            other => panic!("expected applied, got {:?}", other),
        }

        let retry = reconciler.initiate(order.id).await.unwrap();
        assert_eq!(retry.reference, "ref_2");

        gateway.answer("success", 2550);
        match reconciler.reconcile(order.id, "ref_2").await.unwrap() {
            Reconciliation::Applied(order) => assert_eq!(order.payment_status, PaymentStatus::Paid),
            other => panic!("expected applied, got {:?}", other),
        }

        let stored = lifecycle.get_order(order.id).await.unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Paid);
        assert_eq!(stored.payment_reference.as_deref(), Some("ref_2"));
    }

    #[tokio::test]
    async fn test_payment_on_earlier_checkout_still_applies() {
        let (reconciler, gateway, lifecycle, order) = setup().await;
        reconciler.initiate(order.id).await.unwrap();
        reconciler.initiate(order.id).await.unwrap();

        gateway.answer("success", 2550);
        match reconciler.reconcile(order.id, "ref_1").await.unwrap() {
            Reconciliation::Applied(order) => assert_eq!(order.payment_status, PaymentStatus::Paid),
            other => panic!("expected applied, got {:?}", other),
        }

        let stored = lifecycle.get_order(order.id).await.unwrap();
        assert_eq!(stored.payment_reference.as_deref(), Some("ref_2"));
        assert_eq!(
            lifecycle.payment_references(order.id).await.unwrap(),
            vec!["ref_1".to_string(), "ref_2".to_string()]
        );
    }

    #[tokio::test]
    async fn test_abandoned_earlier_checkout_leaves_order_pending() {
        let (reconciler, gateway, lifecycle, order) = setup().await;
        reconciler.initiate(order.id).await.unwrap();
        reconciler.initiate(order.id).await.unwrap();

        gateway.answer("abandoned", 0);
        let result = reconciler.reconcile(order.id, "ref_1").await.unwrap();
        assert!(matches!(result, Reconciliation::StillPending(_)));

        let stored = lifecycle.get_order(order.id).await.unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_initiate_refused_once_paid() {
        let (reconciler, _, lifecycle, order) = setup().await;
        lifecycle
            .apply_payment_result(order.id, PaymentOutcome::Paid)
            .await
            .unwrap();

        assert!(matches!(
            reconciler.initiate(order.id).await,
            Err(OrderError::Validation(_))
        ));
    }
}
