use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use super::{OrderStore, Storage, StoreError, Transaction, TrackingLedger};
use crate::domain::order::{
    sort_most_recent_first, Order, OrderId, OrderStatus, PaymentStatus, StatusUpdate,
    TrackingEvent, TrackingToken, ValidatedDraft,
};

// ============================================================================
// In-memory Storage
// ============================================================================
//
// Writers take the state lock exclusively for the lifetime of the
// transaction and mutate in place, recording an undo log. A transaction
// dropped before commit replays the log backwards. Readers share the lock,
// so they only ever see committed state.
//
// ============================================================================

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct MemoryState {
    orders: HashMap<OrderId, Order>,
    tokens: HashMap<TrackingToken, OrderId>,
    events: HashMap<OrderId, Vec<TrackingEvent>>,
    references: HashMap<OrderId, Vec<String>>,
    last_order_id: i64,
}

/// Where an injected fault fires. Used by tests to break a unit of work
/// halfway through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPoint {
    Create,
    Append,
    UpdateStatus,
    UpdatePaymentStatus,
    Commit,
}

#[derive(Default)]
struct Faults {
    next: Mutex<Option<FaultPoint>>,
}

impl Faults {
    fn arm(&self, point: FaultPoint) {
        *self.next.lock().unwrap_or_else(|e| e.into_inner()) = Some(point);
    }

    fn check(&self, point: FaultPoint) -> Result<(), StoreError> {
        let mut next = self.next.lock().unwrap_or_else(|e| e.into_inner());
        if *next == Some(point) {
            *next = None;
            return Err(StoreError::Unavailable(format!("injected fault at {:?}", point)));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct MemoryStorage {
    state: Arc<RwLock<MemoryState>>,
    faults: Arc<Faults>,
    timeout: Duration,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            state: Arc::new(RwLock::new(MemoryState::default())),
            faults: Arc::new(Faults::default()),
            timeout,
        }
    }

    /// Make the next operation of the given kind fail as if the store
    /// had gone away.
    pub fn fail_next(&self, point: FaultPoint) {
        self.faults.arm(point);
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    fn engine(&self) -> &'static str {
        "memory"
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        let guard = tokio::time::timeout(self.timeout, self.state.clone().write_owned())
            .await
            .map_err(|_| {
                StoreError::Unavailable(format!(
                    "timed out after {}ms waiting for write lock",
                    self.timeout.as_millis()
                ))
            })?;

        Ok(Box::new(MemoryTransaction {
            guard: Guard::Write(guard),
            undo: Vec::new(),
            faults: self.faults.clone(),
        }))
    }

    async fn begin_read(&self) -> Result<Box<dyn Transaction>, StoreError> {
        let guard = tokio::time::timeout(self.timeout, self.state.clone().read_owned())
            .await
            .map_err(|_| {
                StoreError::Unavailable(format!(
                    "timed out after {}ms waiting for read lock",
                    self.timeout.as_millis()
                ))
            })?;

        Ok(Box::new(MemoryTransaction {
            guard: Guard::Read(guard),
            undo: Vec::new(),
            faults: self.faults.clone(),
        }))
    }

    async fn close(&self) {
        tracing::debug!("Memory storage closed");
    }
}

// ============================================================================
// Transaction
// ============================================================================

enum Guard {
    Read(OwnedRwLockReadGuard<MemoryState>),
    Write(OwnedRwLockWriteGuard<MemoryState>),
}

enum Undo {
    RemoveOrder(OrderId),
    RestoreOrder(Order),
    PopEvent(OrderId),
    PopReference(OrderId),
    LastOrderId(i64),
}

pub struct MemoryTransaction {
    guard: Guard,
    undo: Vec<Undo>,
    faults: Arc<Faults>,
}

impl MemoryTransaction {
    fn state(&self) -> &MemoryState {
        match &self.guard {
            Guard::Read(g) => &**g,
            Guard::Write(g) => &**g,
        }
    }

    fn state_mut(&mut self) -> Result<&mut MemoryState, StoreError> {
        match &mut self.guard {
            Guard::Read(_) => Err(StoreError::ReadOnly),
            Guard::Write(g) => Ok(&mut **g),
        }
    }

    fn order(&self, id: OrderId) -> Result<&Order, StoreError> {
        self.state()
            .orders
            .get(&id)
            .ok_or_else(|| StoreError::NotFound(format!("order {}", id)))
    }

    fn rollback(&mut self) {
        let undo = std::mem::take(&mut self.undo);
        let Guard::Write(state) = &mut self.guard else {
            return;
        };

        for entry in undo.into_iter().rev() {
            match entry {
                Undo::RemoveOrder(id) => {
                    if let Some(order) = state.orders.remove(&id) {
                        state.tokens.remove(&order.tracking_token);
                    }
                    state.events.remove(&id);
                    state.references.remove(&id);
                }
                Undo::RestoreOrder(order) => {
                    state.orders.insert(order.id, order);
                }
                Undo::PopEvent(id) => {
                    if let Some(events) = state.events.get_mut(&id) {
                        events.pop();
                    }
                }
                Undo::PopReference(id) => {
                    if let Some(references) = state.references.get_mut(&id) {
                        references.pop();
                    }
                }
                Undo::LastOrderId(id) => {
                    state.last_order_id = id;
                }
            }
        }
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if !self.undo.is_empty() {
            tracing::debug!(entries = self.undo.len(), "Rolling back uncommitted memory transaction");
            self.rollback();
        }
    }
}

#[async_trait]
impl OrderStore for MemoryTransaction {
    async fn create(
        &mut self,
        draft: &ValidatedDraft,
        token: &TrackingToken,
    ) -> Result<Order, StoreError> {
        self.faults.check(FaultPoint::Create)?;
        let state = self.state_mut()?;

        if state.tokens.contains_key(token) {
            return Err(StoreError::DuplicateTrackingToken);
        }

        let previous_id = state.last_order_id;
        let id = OrderId(previous_id + 1);
        let order = Order {
            id,
            tracking_token: token.clone(),
            customer: draft.customer.clone(),
            items: draft.items.clone(),
            total: draft.total,
            status: OrderStatus::pending(),
            payment_status: PaymentStatus::Pending,
            payment_reference: None,
            created_at: Utc::now(),
        };

        state.last_order_id = id.value();
        state.tokens.insert(token.clone(), id);
        state.orders.insert(id, order.clone());
        state.events.insert(id, Vec::new());

        self.undo.push(Undo::LastOrderId(previous_id));
        self.undo.push(Undo::RemoveOrder(id));

        Ok(order)
    }

    async fn get_by_id(&mut self, id: OrderId) -> Result<Order, StoreError> {
        self.order(id).cloned()
    }

    async fn get_by_tracking_token(&mut self, token: &TrackingToken) -> Result<Order, StoreError> {
        let id = self
            .state()
            .tokens
            .get(token)
            .copied()
            .ok_or_else(|| StoreError::NotFound("tracking token".to_string()))?;
        self.order(id).cloned()
    }

    async fn list_all(&mut self) -> Result<Vec<Order>, StoreError> {
        let mut orders: Vec<Order> = self.state().orders.values().cloned().collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(orders)
    }

    async fn update_status(
        &mut self,
        id: OrderId,
        status: &OrderStatus,
    ) -> Result<bool, StoreError> {
        self.faults.check(FaultPoint::UpdateStatus)?;
        let state = self.state_mut()?;
        let order = state
            .orders
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("order {}", id)))?;

        if &order.status == status {
            return Ok(false);
        }

        let previous = order.clone();
        order.status = status.clone();
        self.undo.push(Undo::RestoreOrder(previous));
        Ok(true)
    }

    async fn update_payment_status(
        &mut self,
        id: OrderId,
        status: PaymentStatus,
    ) -> Result<bool, StoreError> {
        self.faults.check(FaultPoint::UpdatePaymentStatus)?;
        let state = self.state_mut()?;
        let order = state
            .orders
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("order {}", id)))?;

        if order.payment_status == status {
            return Ok(false);
        }

        let previous = order.clone();
        order.payment_status = status;
        self.undo.push(Undo::RestoreOrder(previous));
        Ok(true)
    }

    async fn set_payment_reference(
        &mut self,
        id: OrderId,
        reference: &str,
    ) -> Result<(), StoreError> {
        let state = self.state_mut()?;
        let order = state
            .orders
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("order {}", id)))?;

        let previous = order.clone();
        order.payment_reference = Some(reference.to_string());

        let issued = state.references.entry(id).or_default();
        let first_time = !issued.iter().any(|r| r == reference);
        if first_time {
            issued.push(reference.to_string());
        }

        self.undo.push(Undo::RestoreOrder(previous));
        if first_time {
            self.undo.push(Undo::PopReference(id));
        }
        Ok(())
    }

    async fn payment_references(&mut self, id: OrderId) -> Result<Vec<String>, StoreError> {
        self.order(id)?;
        Ok(self.state().references.get(&id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl TrackingLedger for MemoryTransaction {
    async fn append(
        &mut self,
        order_id: OrderId,
        update: &StatusUpdate,
    ) -> Result<TrackingEvent, StoreError> {
        self.faults.check(FaultPoint::Append)?;
        let state = self.state_mut()?;

        if !state.orders.contains_key(&order_id) {
            return Err(StoreError::NotFound(format!("order {}", order_id)));
        }

        let events = state.events.entry(order_id).or_default();
        let now = Utc::now();
        let (sequence, recorded_at) = match events.last() {
            Some(last) => (last.sequence + 1, now.max(last.recorded_at)),
            None => (1, now),
        };

        let event = TrackingEvent {
            order_id,
            sequence,
            status: update.status.clone(),
            location: update.location.clone(),
            message: update.message.clone(),
            recorded_at,
        };
        events.push(event.clone());
        self.undo.push(Undo::PopEvent(order_id));

        Ok(event)
    }

    async fn list_for_order(&mut self, order_id: OrderId) -> Result<Vec<TrackingEvent>, StoreError> {
        self.order(order_id)?;
        let mut events = self
            .state()
            .events
            .get(&order_id)
            .cloned()
            .unwrap_or_default();
        sort_most_recent_first(&mut events);
        Ok(events)
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut this = self;
        if let Err(err) = this.faults.check(FaultPoint::Commit) {
            // Dropping `this` rolls the whole unit back.
            return Err(err);
        }
        this.undo.clear();
        Ok(())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
