use std::fmt;

use rand::Rng;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::errors::OrderError;

// ============================================================================
// Order Value Objects
// ============================================================================

/// System-assigned numeric order identity. Never shown to customers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderId(pub i64);

impl OrderId {
    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Tracking Token
// ============================================================================

/// Public, opaque order handle. Acts as a shared secret for the tracking
/// lookup, so it carries 80 random bits rather than anything sequential.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackingToken(String);

impl TrackingToken {
    pub const PREFIX: &'static str = "ORD";

    /// Crockford-style alphabet: no 0/O or 1/I/L confusion when read aloud.
    const ALPHABET: &'static [u8] = b"23456789ABCDEFGHJKMNPQRSTUVWXYZ";
    const GROUPS: usize = 4;
    const GROUP_LEN: usize = 4;

    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let mut token = String::with_capacity(
            Self::PREFIX.len() + Self::GROUPS * (Self::GROUP_LEN + 1),
        );
        token.push_str(Self::PREFIX);

        for _ in 0..Self::GROUPS {
            token.push('-');
            for _ in 0..Self::GROUP_LEN {
                let idx = rng.random_range(0..Self::ALPHABET.len());
                token.push(Self::ALPHABET[idx] as char);
            }
        }

        Self(token)
    }

    /// Wrap a token received from a caller. Only shape is checked here;
    /// existence is the store's business.
    pub fn parse(raw: impl Into<String>) -> Result<Self, OrderError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(OrderError::Validation("tracking token cannot be empty".to_string()));
        }
        if trimmed.len() > 100 {
            return Err(OrderError::Validation("tracking token is too long".to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Money
// ============================================================================

/// Non-negative order total with two-decimal fixed-point semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(Decimal);

impl Money {
    /// Upper bound of a `NUMERIC(10, 2)` column: 99999999.99 (9_999_999_999 at scale 2).
    pub const MAX_AMOUNT: Decimal = Decimal::from_parts(1_410_065_407, 2, 0, false, 2);

    pub fn new(amount: Decimal) -> Result<Self, OrderError> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(OrderError::Validation(format!(
                "amount cannot be negative: {}",
                amount
            )));
        }
        if amount.normalize().scale() > 2 {
            return Err(OrderError::Validation(format!(
                "amount cannot have more than 2 decimal places: {}",
                amount
            )));
        }
        if amount > Self::MAX_AMOUNT {
            return Err(OrderError::Validation(format!(
                "amount {} exceeds maximum {}",
                amount,
                Self::MAX_AMOUNT
            )));
        }

        let mut amount = amount.abs();
        amount.rescale(2);
        Ok(Self(amount))
    }

    pub fn from_minor_units(minor: u64) -> Result<Self, OrderError> {
        let minor = i64::try_from(minor)
            .map_err(|_| OrderError::Validation(format!("amount {} is out of range", minor)))?;
        Self::new(Decimal::new(minor, 2))
    }

    pub fn amount(&self) -> Decimal {
        self.0
    }

    /// Amount in the gateway's smallest currency unit (cents, kobo).
    /// Exact: `Money` never holds more than two decimal places.
    pub fn to_minor_units(&self) -> u64 {
        (self.0 * Decimal::ONE_HUNDRED).to_u64().unwrap_or(0)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl std::str::FromStr for Money {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decimal = s.trim().parse::<Decimal>().map_err(|e| {
            OrderError::Validation(format!("failed to parse amount '{}': {}", s, e))
        })?;
        Self::new(decimal)
    }
}

// ============================================================================
// Order Status (open label set)
// ============================================================================

/// Fulfilment status label. Staff may introduce new intermediate labels, so
/// this is a validated string rather than an enum; only the terminal subset
/// is structurally meaningful. Known labels match ignoring ASCII case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderStatus(String);

impl OrderStatus {
    pub const PENDING: &'static str = "pending";
    pub const PREPARING: &'static str = "preparing";
    pub const READY: &'static str = "ready";
    pub const OUT_FOR_DELIVERY: &'static str = "out_for_delivery";
    pub const COMPLETED: &'static str = "completed";
    pub const CANCELLED: &'static str = "cancelled";

    /// Label of the synthetic first ledger entry. Projects onto `pending`.
    pub const ORDER_PLACED: &'static str = "Order Placed";

    const MAX_LEN: usize = 100;

    pub fn new(label: impl Into<String>) -> Result<Self, OrderError> {
        let label = label.into();
        let trimmed = label.trim();
        if trimmed.is_empty() {
            return Err(OrderError::Validation("status cannot be empty".to_string()));
        }
        if trimmed.chars().count() > Self::MAX_LEN {
            return Err(OrderError::Validation(format!(
                "status cannot exceed {} characters",
                Self::MAX_LEN
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn pending() -> Self {
        Self(Self::PENDING.to_string())
    }

    pub fn order_placed() -> Self {
        Self(Self::ORDER_PLACED.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_terminal(&self) -> bool {
        self.0.eq_ignore_ascii_case(Self::COMPLETED) || self.0.eq_ignore_ascii_case(Self::CANCELLED)
    }

    /// The order-row status implied by a ledger entry carrying this label.
    pub fn projected(&self) -> OrderStatus {
        if self.0.eq_ignore_ascii_case(Self::ORDER_PLACED) {
            Self::pending()
        } else {
            self.clone()
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Payment Status
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(PaymentStatus::Pending),
            "paid" => Some(PaymentStatus::Paid),
            "failed" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }

    /// Forward-only rule: nothing leaves `paid`, nothing returns to `pending`.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        match (self, next) {
            (current, next) if *current == next => true,
            (PaymentStatus::Pending, _) => next != PaymentStatus::Pending,
            (PaymentStatus::Failed, PaymentStatus::Paid) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verified result of a payment attempt, in internal vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentOutcome {
    Paid,
    Failed,
}

impl From<PaymentOutcome> for PaymentStatus {
    fn from(outcome: PaymentOutcome) -> Self {
        match outcome {
            PaymentOutcome::Paid => PaymentStatus::Paid,
            PaymentOutcome::Failed => PaymentStatus::Failed,
        }
    }
}

// ============================================================================
// Customer Contact
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerContact {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

impl CustomerContact {
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        phone: Option<String>,
    ) -> Result<Self, OrderError> {
        let name = name.into().trim().to_string();
        let email = email.into().trim().to_string();

        if name.is_empty() {
            return Err(OrderError::Validation("customer name cannot be empty".to_string()));
        }
        if email.is_empty() {
            return Err(OrderError::Validation("customer email cannot be empty".to_string()));
        }
        if !email.contains('@') {
            return Err(OrderError::Validation(format!("invalid email format: {}", email)));
        }

        let phone = phone
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());

        Ok(Self { name, email, phone })
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_tracking_token_shape() {
        let token = TrackingToken::generate();
        let raw = token.as_str();

        assert!(raw.starts_with("ORD-"));
        assert_eq!(raw.len(), 3 + 4 * 5);
        assert!(raw
            .chars()
            .filter(|c| *c != '-')
            .skip(3)
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_tracking_tokens_are_distinct() {
        let tokens: HashSet<TrackingToken> =
            (0..10_000).map(|_| TrackingToken::generate()).collect();
        assert_eq!(tokens.len(), 10_000);
    }

    #[test]
    fn test_tracking_token_parse_rejects_blank() {
        assert!(TrackingToken::parse("   ").is_err());
        assert_eq!(TrackingToken::parse(" ORD-AAAA ").unwrap().as_str(), "ORD-AAAA");
    }

    #[test]
    fn test_money_validation() {
        assert!(Money::new(Decimal::new(2550, 2)).is_ok());
        assert!(Money::new(Decimal::ZERO).is_ok());
        assert!(matches!(
            Money::new(Decimal::new(-100, 2)),
            Err(OrderError::Validation(_))
        ));
        assert!(Money::new(Decimal::new(1001, 3)).is_err());
        assert!(Money::new(Decimal::new(1000, 3)).is_ok());
    }

    #[test]
    fn test_money_upper_bound_matches_column() {
        assert_eq!(Money::MAX_AMOUNT, Decimal::new(9_999_999_999, 2));
        assert!("99999999.50".parse::<Money>().is_ok());
        assert!("99999999.99".parse::<Money>().is_ok());
        assert!("100000000.00".parse::<Money>().is_err());
    }

    #[test]
    fn test_money_minor_units() {
        let money: Money = "25.50".parse().unwrap();
        assert_eq!(money.to_minor_units(), 2550);
        assert_eq!(money.to_string(), "25.50");

        let whole: Money = "12".parse().unwrap();
        assert_eq!(whole.to_minor_units(), 1200);

        assert_eq!(Money::from_minor_units(2550).unwrap(), money);
    }

    #[test]
    fn test_status_labels() {
        let status = OrderStatus::new("  Out for Delivery ").unwrap();
        assert_eq!(status.as_str(), "Out for Delivery");
        assert!(!status.is_terminal());

        assert!(OrderStatus::new("Completed").unwrap().is_terminal());
        assert!(OrderStatus::new("cancelled").unwrap().is_terminal());
        assert!(OrderStatus::new("").is_err());
        assert!(OrderStatus::new("x".repeat(101)).is_err());
    }

    #[test]
    fn test_order_placed_projects_to_pending() {
        assert_eq!(OrderStatus::order_placed().projected(), OrderStatus::pending());
        assert_eq!(
            OrderStatus::new("order placed").unwrap().projected(),
            OrderStatus::pending()
        );
        assert_eq!(
            OrderStatus::new("ORDER PLACED").unwrap().projected(),
            OrderStatus::pending()
        );

        let preparing = OrderStatus::new("preparing").unwrap();
        assert_eq!(preparing.projected(), preparing);
    }

    #[test]
    fn test_payment_status_forward_only() {
        use PaymentStatus::*;

        assert!(Pending.can_transition_to(Paid));
        assert!(Pending.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Paid));
        assert!(Paid.can_transition_to(Paid));

        assert!(!Paid.can_transition_to(Failed));
        assert!(!Paid.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(Pending));
    }

    #[test]
    fn test_payment_status_serialization() {
        let json = serde_json::to_string(&PaymentStatus::Paid).unwrap();
        assert_eq!(json, "\"paid\"");
        assert_eq!(PaymentStatus::parse("failed"), Some(PaymentStatus::Failed));
        assert_eq!(PaymentStatus::parse("refunded"), None);
    }

    #[test]
    fn test_customer_contact_validation() {
        assert!(CustomerContact::new("Ada", "a@x.com", None).is_ok());
        assert!(CustomerContact::new(" ", "a@x.com", None).is_err());
        assert!(CustomerContact::new("Ada", "", None).is_err());
        assert!(CustomerContact::new("Ada", "not-an-email", None).is_err());

        let contact = CustomerContact::new("Ada", "a@x.com", Some("  ".to_string())).unwrap();
        assert_eq!(contact.phone, None);
    }
}
