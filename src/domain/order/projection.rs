use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::errors::OrderError;
use super::events::{current_event, TrackingEvent};
use super::value_objects::{
    CustomerContact, Money, OrderId, OrderStatus, PaymentOutcome, PaymentStatus, TrackingToken,
};

// ============================================================================
// Order Projection - current state, kept in step with the tracking ledger
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    // Identity
    pub id: OrderId,
    pub tracking_token: TrackingToken,

    pub customer: CustomerContact,
    /// Serialized line items. Opaque to this service.
    pub items: String,
    pub total: Money,

    // Current State (status mirrors the latest ledger entry)
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_reference: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Decide the payment-status change for a verified outcome.
    ///
    /// Returns `Ok(None)` when the order already carries that status, so the
    /// caller can skip the write.
    pub fn payment_transition(
        &self,
        outcome: PaymentOutcome,
    ) -> Result<Option<PaymentStatus>, OrderError> {
        let next = PaymentStatus::from(outcome);

        if self.payment_status == next {
            return Ok(None);
        }
        if !self.payment_status.can_transition_to(next) {
            return Err(OrderError::InvalidTransition {
                from: self.payment_status,
                to: next,
            });
        }

        Ok(Some(next))
    }

    /// Whether the projection agrees with the ledger's latest entry.
    pub fn is_consistent_with(&self, events: &[TrackingEvent]) -> bool {
        match current_event(events) {
            Some(latest) => latest.order_id == self.id && latest.status.projected() == self.status,
            None => false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}

// ============================================================================
// Order Draft - unvalidated customer input
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDraft {
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub items: String,
    pub total_amount: Decimal,
}

impl OrderDraft {
    pub fn validate(self) -> Result<ValidatedDraft, OrderError> {
        let customer =
            CustomerContact::new(self.customer_name, self.customer_email, self.customer_phone)?;
        let total = Money::new(self.total_amount)?;

        Ok(ValidatedDraft {
            customer,
            items: self.items,
            total,
        })
    }
}

/// Draft that passed validation; the only input the store accepts.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedDraft {
    pub customer: CustomerContact,
    pub items: String,
    pub total: Money,
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn order(payment_status: PaymentStatus) -> Order {
        Order {
            id: OrderId(1),
            tracking_token: TrackingToken::generate(),
            customer: CustomerContact::new("Ada", "a@x.com", None).unwrap(),
            items: "[]".to_string(),
            total: "25.50".parse().unwrap(),
            status: OrderStatus::pending(),
            payment_status,
            payment_reference: None,
            created_at: Utc::now(),
        }
    }

    fn event(sequence: i64, status: &str) -> TrackingEvent {
        TrackingEvent {
            order_id: OrderId(1),
            sequence,
            status: OrderStatus::new(status).unwrap(),
            location: String::new(),
            message: String::new(),
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_payment_transition_from_pending() {
        let pending = order(PaymentStatus::Pending);
        assert_eq!(
            pending.payment_transition(PaymentOutcome::Paid),
            Ok(Some(PaymentStatus::Paid))
        );
        assert_eq!(
            pending.payment_transition(PaymentOutcome::Failed),
            Ok(Some(PaymentStatus::Failed))
        );
    }

    #[test]
    fn test_payment_transition_away_from_paid_rejected() {
        let paid = order(PaymentStatus::Paid);
        assert_eq!(
            paid.payment_transition(PaymentOutcome::Failed),
            Err(OrderError::InvalidTransition {
                from: PaymentStatus::Paid,
                to: PaymentStatus::Failed,
            })
        );
        assert_eq!(paid.payment_transition(PaymentOutcome::Paid), Ok(None));
    }

    #[test]
    fn test_consistency_uses_projected_label() {
        let mut order = order(PaymentStatus::Pending);
        let mut events = vec![event(1, "Order Placed")];
        assert!(order.is_consistent_with(&events));

        events.push(event(2, "preparing"));
        assert!(!order.is_consistent_with(&events));

        order.status = OrderStatus::new("preparing").unwrap();
        assert!(order.is_consistent_with(&events));
        assert!(!order.is_consistent_with(&[]));
    }

    #[test]
    fn test_draft_validation() {
        let draft = OrderDraft {
            customer_name: "Ada".to_string(),
            customer_email: "a@x.com".to_string(),
            customer_phone: None,
            items: "[{\"id\":1}]".to_string(),
            total_amount: Decimal::new(2550, 2),
        };
        let validated = draft.clone().validate().unwrap();
        assert_eq!(validated.total.to_minor_units(), 2550);
        assert_eq!(validated.items, "[{\"id\":1}]");

        let negative = OrderDraft {
            total_amount: Decimal::new(-1, 2),
            ..draft.clone()
        };
        assert!(matches!(negative.validate(), Err(OrderError::Validation(_))));

        let nameless = OrderDraft {
            customer_name: String::new(),
            ..draft
        };
        assert!(matches!(nameless.validate(), Err(OrderError::Validation(_))));
    }
}
